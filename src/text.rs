use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Maximum number of lines a text element may occupy on the printed layout.
pub const MAX_LINES: usize = 2;

const ELLIPSIS: &str = "...";

/// Line budget for a print layout, optionally restricted to templates whose
/// name starts with `template_prefix` (case-insensitive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutRule {
    pub layout: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_prefix: Option<String>,
    pub max_line_chars: usize,
}

impl LayoutRule {
    pub fn new(layout: &str, max_line_chars: usize) -> Self {
        Self {
            layout: layout.to_string(),
            template_prefix: None,
            max_line_chars,
        }
    }

    pub fn for_template(layout: &str, template_prefix: &str, max_line_chars: usize) -> Self {
        Self {
            layout: layout.to_string(),
            template_prefix: Some(template_prefix.to_string()),
            max_line_chars,
        }
    }

    fn matches(&self, layout: &str, template: Option<&str>) -> bool {
        if self.layout != layout {
            return false;
        }
        match &self.template_prefix {
            None => true,
            Some(prefix) => template
                .map(|name| {
                    name.to_lowercase()
                        .starts_with(prefix.to_lowercase().as_str())
                })
                .unwrap_or(false),
        }
    }
}

/// The built-in rule table. Template-specific rules come first so they win
/// over the generic per-size defaults listed after them.
pub fn default_rules() -> Vec<LayoutRule> {
    vec![
        LayoutRule::for_template("A4 Landscape", "LIM", 90),
        LayoutRule::new("A4 Portrait", 30),
        LayoutRule::new("A3 Portrait", 35),
        LayoutRule::new("A2 Portrait", 40),
        LayoutRule::new("A1 Portrait", 45),
        LayoutRule::new("A0 Portrait", 50),
        LayoutRule::new("A4 Landscape", 50),
        LayoutRule::new("A3 Landscape", 55),
        LayoutRule::new("A2 Landscape", 60),
        LayoutRule::new("A1 Landscape", 65),
        LayoutRule::new("A0 Landscape", 70),
    ]
}

/// Wraps free-text layout elements (title, author, copyright) to the line
/// budget of the selected layout.
#[derive(Debug, Clone)]
pub struct TextFormatter {
    rules: Vec<LayoutRule>,
}

impl Default for TextFormatter {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl TextFormatter {
    pub fn new(rules: Vec<LayoutRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[LayoutRule] {
        &self.rules
    }

    /// First rule matching the layout (and template prefix, when the rule
    /// has one).
    pub fn rule_for(&self, layout: &str, template: Option<&str>) -> Option<&LayoutRule> {
        self.rules.iter().find(|rule| rule.matches(layout, template))
    }

    /// Formats every element, or returns `None` when no rule matches the
    /// layout.
    pub fn format(
        &self,
        elements: &IndexMap<String, String>,
        layout: &str,
        template: Option<&str>,
    ) -> Option<IndexMap<String, String>> {
        let rule = self.rule_for(layout, template)?;
        Some(
            elements
                .iter()
                .map(|(field, raw)| (field.clone(), wrap_text(raw, rule.max_line_chars)))
                .collect(),
        )
    }
}

/// Greedy word wrap capped at [`MAX_LINES`]; an overflowing second line loses
/// its last three characters to an ellipsis.
pub fn wrap_text(raw: &str, max_line_chars: usize) -> String {
    let cleaned = raw.replace(['\r', '\t'], " ");

    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in cleaned.split(' ') {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let candidate_len = current.chars().count() + 1 + word.chars().count();
        if candidate_len <= max_line_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    lines.push(current);

    if lines.len() > MAX_LINES {
        lines.truncate(MAX_LINES);
        let last = &lines[MAX_LINES - 1];
        let keep = last.chars().count().saturating_sub(ELLIPSIS.len());
        let mut shortened: String = last.chars().take(keep).collect();
        shortened.push_str(ELLIPSIS);
        lines[MAX_LINES - 1] = shortened;
    }

    lines.join("\n")
}
