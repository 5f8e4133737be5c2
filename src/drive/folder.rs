use regex::Regex;
use std::sync::LazyLock;

static URL_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"/folders/([a-zA-Z0-9_-]+)").expect("static pattern"),
        Regex::new(r"[?&]id=([a-zA-Z0-9_-]+)").expect("static pattern"),
        Regex::new(r"/d/([a-zA-Z0-9_-]+)").expect("static pattern"),
    ]
});

static BARE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("static pattern"));

/// Accepts a Drive folder URL (`…/folders/<id>`, `…?id=<id>`, `…/d/<id>`)
/// or a bare folder id.
pub fn parse_folder_reference(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    for pattern in URL_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(input) {
            return Some(caps[1].to_string());
        }
    }
    BARE_ID.is_match(input).then(|| input.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_urls() {
        assert_eq!(
            parse_folder_reference("https://drive.google.com/drive/folders/1AbC-d_E?usp=sharing")
                .as_deref(),
            Some("1AbC-d_E")
        );
        assert_eq!(
            parse_folder_reference("https://drive.google.com/open?id=XYZ123").as_deref(),
            Some("XYZ123")
        );
        assert_eq!(
            parse_folder_reference("https://drive.google.com/file/d/F1le/view").as_deref(),
            Some("F1le")
        );
    }

    #[test]
    fn test_bare_id_and_garbage() {
        assert_eq!(parse_folder_reference("  1AbC  ").as_deref(), Some("1AbC"));
        assert_eq!(parse_folder_reference(""), None);
        assert_eq!(parse_folder_reference("not a folder"), None);
    }
}
