// Initial room content handed to the relay by the content-generation service.

use serde::{Deserialize, Serialize};

/// Fallback editor language when the generator returns something unknown.
pub const DEFAULT_LANGUAGE: &str = "javascript";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Complexity {
    pub time: String,
    pub space: String,
}

/// Seed payload for a new room.
///
/// Field names follow the generator's snake_case output; camelCase aliases are
/// accepted for browser callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedContent {
    pub content: String,
    pub language: String,
    #[serde(default, alias = "starterCode", skip_serializing_if = "Option::is_none")]
    pub starter_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

impl SeedContent {
    pub fn new(content: impl Into<String>, language: impl Into<String>) -> Self {
        Self { content: content.into(), language: language.into(), ..Self::default() }
    }

    /// Starter code when present, otherwise the full content.
    pub fn initial_text(&self) -> &str {
        self.starter_code.as_deref().filter(|code| !code.is_empty()).unwrap_or(&self.content)
    }
}

/// Map a free-form language name to the editor's language identifier.
pub fn normalize_language(language: &str) -> &'static str {
    match language.trim().to_ascii_lowercase().as_str() {
        "c++" | "cpp" | "cplusplus" => "cpp",
        "c" => "c",
        "python" | "python3" | "py" => "python",
        "javascript" | "js" => "javascript",
        "typescript" | "ts" => "typescript",
        "java" => "java",
        "go" | "golang" => "go",
        "rust" => "rust",
        "html" => "html",
        "css" => "css",
        "json" => "json",
        "sql" => "sql",
        "bash" | "sh" | "shell" => "shell",
        "ruby" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kotlin" => "kotlin",
        "r" => "r",
        "scala" => "scala",
        "dart" => "dart",
        _ => DEFAULT_LANGUAGE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_aliases() {
        assert_eq!(normalize_language("C++"), "cpp");
        assert_eq!(normalize_language(" Python3 "), "python");
        assert_eq!(normalize_language("golang"), "go");
        assert_eq!(normalize_language("sh"), "shell");
        assert_eq!(normalize_language("rust"), "rust");
    }

    #[test]
    fn unknown_language_falls_back_to_javascript() {
        assert_eq!(normalize_language("brainfuck"), DEFAULT_LANGUAGE);
        assert_eq!(normalize_language(""), DEFAULT_LANGUAGE);
    }

    #[test]
    fn initial_text_prefers_starter_code() {
        let mut seed = SeedContent::new("fn solve() { 42 }", "rust");
        assert_eq!(seed.initial_text(), "fn solve() { 42 }");

        seed.starter_code = Some("fn solve() {}".into());
        assert_eq!(seed.initial_text(), "fn solve() {}");

        seed.starter_code = Some(String::new());
        assert_eq!(seed.initial_text(), "fn solve() { 42 }");
    }

    #[test]
    fn parses_generator_output_with_camel_case_alias() {
        let seed: SeedContent = serde_json::from_value(json!({
            "content": "print(1)",
            "language": "py",
            "starterCode": "# todo",
            "hints": ["think recursively"],
            "complexity": { "time": "O(n)", "space": "O(1)" }
        }))
        .expect("seed should parse");

        assert_eq!(seed.starter_code.as_deref(), Some("# todo"));
        assert_eq!(seed.hints, vec!["think recursively"]);
        assert_eq!(seed.complexity.map(|c| c.time), Some("O(n)".to_string()));
        assert!(seed.title.is_none());
    }
}
