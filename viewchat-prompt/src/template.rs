use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use viewchat_core::{Value, ViewchatError};

fn placeholder_pattern() -> Result<&'static Regex, ViewchatError> {
    static PATTERN: OnceLock<Result<Regex, String>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| ViewchatError::InvalidConfig(e.clone()))
}

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Substitutes `{{name}}` placeholders in a single pass, so substituted
    /// values are never expanded again. Unknown names render empty.
    pub fn render(&self, vars: &HashMap<String, Value>) -> Result<String, ViewchatError> {
        let pattern = placeholder_pattern()?;
        let rendered = pattern.replace_all(&self.template, |caps: &regex::Captures| {
            let key = &caps[1];
            match vars.get(key) {
                Some(value) => value
                    .as_str()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| value.to_string()),
                None => String::new(),
            }
        });
        Ok(rendered.into_owned())
    }

    /// Placeholder names in order of first appearance.
    pub fn variables(&self) -> Vec<String> {
        let Ok(pattern) = placeholder_pattern() else {
            return Vec::new();
        };
        let mut names: Vec<String> = Vec::new();
        for caps in pattern.captures_iter(&self.template) {
            let name = caps[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}
