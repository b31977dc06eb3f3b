use serde::{Deserialize, Serialize};

/// One indexed chunk. `id` is its position in insertion order.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: usize,
    pub text: String,
    pub source_url: Option<String>,
}

impl Document {
    /// Short single-line excerpt for listings.
    pub fn preview(&self, max_chars: usize) -> String {
        let flat: String = self
            .text
            .chars()
            .map(|c| if c.is_whitespace() { ' ' } else { c })
            .take(max_chars)
            .collect();
        if self.text.chars().count() > max_chars {
            format!("{}...", flat.trim_end())
        } else {
            flat.trim_end().to_string()
        }
    }
}
