//! Assigns each Drive node its role in the course structure.

use regex::Regex;
use std::sync::LazyLock;

use crate::drive::mime;
use crate::task::TaskKind;

/// Facts the classifier looks at. Depth 0 is the course level.
#[derive(Debug, Clone, Copy)]
pub struct NodeFacts<'a> {
    pub name: &'a str,
    pub mime_type: &'a str,
    pub is_folder: bool,
    pub depth: u32,
}

/// Configurable type lists and naming pattern.
#[derive(Debug, Clone)]
pub struct ClassifierRules {
    pub video_extensions: Vec<String>,
    pub document_extensions: Vec<String>,
    pub document_mime_types: Vec<String>,
    pub quiz_pattern: Regex,
}

static DEFAULT_QUIZ_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(quiz|testes?|tests?|prova|simulado|avalia[cç][aã]o|question[aá]rio|exerc[ií]cios?|quest[oõ]es)\b")
        .expect("static quiz pattern")
});

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            video_extensions: ["mp4", "mov", "m4v", "mkv", "webm", "avi"]
                .map(String::from)
                .to_vec(),
            document_extensions: ["pdf", "docx", "pptx"].map(String::from).to_vec(),
            document_mime_types: vec![
                mime::PDF.to_string(),
                mime::DOCX.to_string(),
                mime::PPTX.to_string(),
                mime::GOOGLE_DOC.to_string(),
                mime::GOOGLE_SLIDES.to_string(),
            ],
            quiz_pattern: DEFAULT_QUIZ_PATTERN.clone(),
        }
    }
}

impl ClassifierRules {
    /// First matching rule wins:
    ///
    /// 1. folder at depth 0 is a course
    /// 2. folder at depth 1 is a module
    /// 3. video by MIME type or extension
    /// 4. pdf/docx/pptx (or Google Docs/Slides, exported as PDF) is a document
    /// 5. name matching the quiz pattern
    /// 6. everything else is skipped, including deeper folders and files
    ///    sitting directly under a collection root
    pub fn classify(&self, node: &NodeFacts<'_>) -> TaskKind {
        if node.is_folder {
            return match node.depth {
                0 => TaskKind::Course,
                1 => TaskKind::Module,
                _ => TaskKind::Skip,
            };
        }
        if node.depth == 0 {
            return TaskKind::Skip;
        }

        let mime_type = node.mime_type.to_ascii_lowercase();
        let ext = extension(node.name);
        let ext_in = |list: &[String]| {
            ext.as_deref()
                .is_some_and(|e| list.iter().any(|x| x.eq_ignore_ascii_case(e)))
        };

        if mime_type.starts_with("video/") || ext_in(&self.video_extensions) {
            return TaskKind::LessonVideo;
        }
        if self.document_mime_types.iter().any(|m| *m == mime_type)
            || ext_in(&self.document_extensions)
        {
            return TaskKind::LessonDocument;
        }
        if self.quiz_pattern.is_match(node.name) {
            return TaskKind::Quiz;
        }
        TaskKind::Skip
    }
}

/// Classify with the default rules.
pub fn classify(node: &NodeFacts<'_>) -> TaskKind {
    static RULES: LazyLock<ClassifierRules> = LazyLock::new(ClassifierRules::default);
    RULES.classify(node)
}

/// Lowercased extension of a file name, if any.
pub fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.contains(' ') {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// File name without its extension.
pub fn file_stem(name: &str) -> &str {
    match extension(name) {
        Some(ext) => &name[..name.len() - ext.len() - 1],
        None => name,
    }
}

static CODE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]{1,4}\d{2,6}|\d{1,3})\s*[-_.]\s*(.+)$").expect("static code pattern")
});

/// Split a leading catalog code off a title: `MAT0201 - Intro` gives
/// `(Some("MAT0201"), "Intro")`. Names without a code come back unchanged.
pub fn split_code(title: &str) -> (Option<String>, String) {
    let title = title.trim();
    match CODE_PREFIX.captures(title) {
        Some(caps) => (
            Some(caps[1].to_ascii_uppercase()),
            caps[2].trim().to_string(),
        ),
        None => (None, title.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, mime_type: &str, depth: u32) -> TaskKind {
        classify(&NodeFacts {
            name,
            mime_type,
            is_folder: false,
            depth,
        })
    }

    fn folder(name: &str, depth: u32) -> TaskKind {
        classify(&NodeFacts {
            name,
            mime_type: mime::FOLDER,
            is_folder: true,
            depth,
        })
    }

    #[test]
    fn test_folders_by_depth() {
        assert_eq!(folder("Course A", 0), TaskKind::Course);
        assert_eq!(folder("Module 1", 1), TaskKind::Module);
        assert_eq!(folder("extras", 2), TaskKind::Skip);
    }

    #[test]
    fn test_files() {
        assert_eq!(file("video1.mp4", "application/octet-stream", 2), TaskKind::LessonVideo);
        assert_eq!(file("clip", "video/quicktime", 1), TaskKind::LessonVideo);
        assert_eq!(file("doc1.pdf", "application/pdf", 2), TaskKind::LessonDocument);
        assert_eq!(file("Slides", mime::GOOGLE_SLIDES, 2), TaskKind::LessonDocument);
        assert_eq!(file("Quiz 1", mime::GOOGLE_SHEET, 2), TaskKind::Quiz);
        assert_eq!(file("teste-final.txt", "text/plain", 2), TaskKind::Quiz);
    }

    #[test]
    fn test_rule_priority() {
        // a pdf named like a quiz is still a document
        assert_eq!(file("Prova 1.pdf", "application/pdf", 2), TaskKind::LessonDocument);
        // "contest" must not match the quiz pattern
        assert_eq!(file("contest.txt", "text/plain", 2), TaskKind::Skip);
    }

    #[test]
    fn test_unknown_and_root_files_are_skipped() {
        assert_eq!(file("archive.zip", "application/zip", 2), TaskKind::Skip);
        assert_eq!(file("noext", "", 1), TaskKind::Skip);
        assert_eq!(file("video1.mp4", "video/mp4", 0), TaskKind::Skip);
    }

    #[test]
    fn test_classify_is_deterministic() {
        for _ in 0..3 {
            assert_eq!(file("Aula 01.MP4", "", 2), TaskKind::LessonVideo);
        }
    }

    #[test]
    fn test_extension_and_stem() {
        assert_eq!(extension("a.b.PDF").as_deref(), Some("pdf"));
        assert_eq!(extension(".hidden"), None);
        assert_eq!(extension("Módulo 1. Intro"), None);
        assert_eq!(file_stem("video1.mp4"), "video1");
        assert_eq!(file_stem("README"), "README");
    }

    #[test]
    fn test_split_code() {
        assert_eq!(
            split_code("MAT0201 - Introdução"),
            (Some("MAT0201".to_string()), "Introdução".to_string())
        );
        assert_eq!(
            split_code("01-Boas vindas"),
            (Some("01".to_string()), "Boas vindas".to_string())
        );
        assert_eq!(split_code("Module 1"), (None, "Module 1".to_string()));
    }
}
