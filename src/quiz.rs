//! Turns exported quiz text into question rows.
//!
//! The accepted layout is the one instructors type into Docs or Sheets:
//!
//! ```text
//! 1. What is 2 + 2?
//! a) 3
//! b) 4 *
//! c) 5
//!
//! Questão 2 - A terra é plana. Verdadeiro ou falso?
//! Resposta: F
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static QUESTION_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:(?:quest[aã]o\s+\d+|q\d+)\s*[.):\-]?|\d+\s*[.):\-])\s*(.*)$").expect("static pattern")
});

static OPTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\(([a-e])\)|([a-e])[.)])\s*(.*)$").expect("static pattern")
});

static ANSWER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:resposta|gabarito|answer)\s*:\s*(.+)$").expect("static pattern")
});

static CORRECT_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\((?:correta|correct)\)|\*|✓").expect("static pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice,
    TrueFalse,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultipleChoice => "multiple_choice",
            Self::TrueFalse => "true_false",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedQuestion {
    pub kind: QuestionKind,
    pub prompt: String,
    pub options: Vec<String>,
    /// Option text for multiple choice, `"true"`/`"false"` for true/false.
    pub correct_answer: Option<String>,
    pub points: u32,
}

impl ParsedQuestion {
    fn start(prompt: &str) -> Self {
        let lower = prompt.to_lowercase();
        let kind = if lower.contains("verdadeiro")
            || lower.contains("falso")
            || lower.contains("v ou f")
            || lower.contains("true or false")
        {
            QuestionKind::TrueFalse
        } else {
            QuestionKind::MultipleChoice
        };
        Self {
            kind,
            prompt: prompt.trim().to_string(),
            options: Vec::new(),
            correct_answer: None,
            points: 1,
        }
    }

    fn is_complete(&self) -> bool {
        !self.prompt.is_empty()
            && match self.kind {
                QuestionKind::TrueFalse => true,
                QuestionKind::MultipleChoice => self.options.len() >= 2,
            }
    }

    fn apply_answer(&mut self, answer: &str) {
        let answer = answer.trim();
        match self.kind {
            QuestionKind::TrueFalse => {
                let lower = answer.to_lowercase();
                let value = match lower.as_str() {
                    "v" | "verdadeiro" | "true" | "t" => Some("true"),
                    "f" | "falso" | "false" => Some("false"),
                    _ => None,
                };
                self.correct_answer = value.map(str::to_string);
            }
            QuestionKind::MultipleChoice => {
                let by_letter = letter_index(answer).and_then(|i| self.options.get(i));
                let chosen = by_letter
                    .or_else(|| self.options.iter().find(|o| o.eq_ignore_ascii_case(answer)));
                if let Some(option) = chosen {
                    self.correct_answer = Some(option.clone());
                }
            }
        }
    }
}

/// Option index from the leading letter of an answer: `b`, `(b)`, `b) 7`.
fn letter_index(answer: &str) -> Option<usize> {
    let mut chars = answer.trim_start_matches('(').chars();
    let c = chars.next()?.to_ascii_lowercase();
    if !('a'..='e').contains(&c) || chars.next().is_some_and(char::is_alphanumeric) {
        return None;
    }
    Some(c as usize - 'a' as usize)
}

fn strip_markers(text: &str) -> (String, bool) {
    let marked = CORRECT_MARKER.is_match(text);
    let cleaned = CORRECT_MARKER.replace_all(text, "");
    (cleaned.trim().to_string(), marked)
}

/// Parse questions from plain text. Lines that fit no pattern are ignored;
/// a multiple-choice question needs at least two options to be kept.
pub fn parse_questions(text: &str) -> Vec<ParsedQuestion> {
    let mut questions = Vec::new();
    let mut current: Option<ParsedQuestion> = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(caps) = OPTION_LINE.captures(line) {
            if let Some(question) = current.as_mut() {
                let (option, correct) = strip_markers(&caps[3]);
                if !option.is_empty() {
                    if correct {
                        question.correct_answer = Some(option.clone());
                    }
                    question.options.push(option);
                }
                continue;
            }
        }
        if let Some(caps) = ANSWER_LINE.captures(line) {
            if let Some(question) = current.as_mut() {
                question.apply_answer(&caps[1]);
                continue;
            }
        }
        if let Some(caps) = QUESTION_START.captures(line) {
            if let Some(done) = current.take().filter(ParsedQuestion::is_complete) {
                questions.push(done);
            }
            current = Some(ParsedQuestion::start(&caps[1]));
            continue;
        }
        // continuation of a prompt that wrapped onto the next line
        if let Some(question) = current.as_mut() {
            if question.options.is_empty() {
                question.prompt.push(' ');
                question.prompt.push_str(line);
            }
        }
    }

    if let Some(done) = current.filter(ParsedQuestion::is_complete) {
        questions.push(done);
    }
    questions
}

/// Flatten CSV (as exported from Sheets) into one line per non-empty cell.
pub fn csv_to_lines(csv: &str) -> String {
    let mut lines = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = csv.chars().peekable();

    let mut flush = |cell: &mut String| {
        let trimmed = cell.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
        cell.clear();
    };

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' | '\n' if !in_quotes => flush(&mut cell),
            '\r' if !in_quotes => {}
            other => cell.push(other),
        }
    }
    flush(&mut cell);
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_choice_with_marker() {
        let text = "1. Quanto é 2 + 2?\na) 3\nb) 4 *\nc) 5\n";
        let questions = parse_questions(text);
        assert_eq!(questions.len(), 1);
        let q = &questions[0];
        assert_eq!(q.kind, QuestionKind::MultipleChoice);
        assert_eq!(q.prompt, "Quanto é 2 + 2?");
        assert_eq!(q.options, vec!["3", "4", "5"]);
        assert_eq!(q.correct_answer.as_deref(), Some("4"));
        assert_eq!(q.points, 1);
    }

    #[test]
    fn test_true_false_with_answer_line() {
        let text = "Questão 2 - A terra é plana. Verdadeiro ou falso?\nResposta: F";
        let questions = parse_questions(text);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].kind, QuestionKind::TrueFalse);
        assert_eq!(questions[0].correct_answer.as_deref(), Some("false"));
    }

    #[test]
    fn test_answer_key_letter_and_wrapped_prompt() {
        let text = "Q1) Which one is a\nprime number?\n(a) 4\n(b) 7\nGabarito: b\n2. Incomplete question\na) only one option";
        let questions = parse_questions(text);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].prompt, "Which one is a prime number?");
        assert_eq!(questions[0].correct_answer.as_deref(), Some("7"));
    }

    #[test]
    fn test_answer_line_with_option_text() {
        let text = "1. Which one is prime?\na) 4\nb) 7\nc) 9\nAnswer: b) 7\n\
2. Pick the even number\na) 3\nb) 8\nAnswer: 8";
        let questions = parse_questions(text);
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].correct_answer.as_deref(), Some("7"));
        assert_eq!(questions[1].correct_answer.as_deref(), Some("8"));
    }

    #[test]
    fn test_wrapped_line_starting_with_a_number() {
        let text = "1. According to the\n2020 census figures, which state grew most?\na) Texas *\nb) Ohio";
        let questions = parse_questions(text);
        assert_eq!(questions.len(), 1);
        assert_eq!(
            questions[0].prompt,
            "According to the 2020 census figures, which state grew most?"
        );
        assert_eq!(questions[0].correct_answer.as_deref(), Some("Texas"));
    }

    #[test]
    fn test_text_without_questions() {
        assert!(parse_questions("Just some notes\nabout the lesson").is_empty());
    }

    #[test]
    fn test_csv_to_lines() {
        let csv = "\"1. Pick one, please\",\"a) x\"\r\n,b) y *\n\"He said \"\"hi\"\"\",";
        assert_eq!(
            csv_to_lines(csv),
            "1. Pick one, please\na) x\nb) y *\nHe said \"hi\""
        );
        let questions = parse_questions(&csv_to_lines(csv));
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].correct_answer.as_deref(), Some("y"));
    }
}
