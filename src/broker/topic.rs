//! Topic routing
//!
//! A `TopicPattern` is a binding key for a topic exchange. Keys are split on
//! `.` into words; in a pattern `*` matches exactly one word and `#` matches
//! zero or more words. Everything else must match literally.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    pattern: String,
}

impl TopicPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Whether a message published with `routing_key` is routed by this binding.
    pub fn matches(&self, routing_key: &str) -> bool {
        let pattern: Vec<&str> = self.pattern.split('.').collect();
        let key: Vec<&str> = routing_key.split('.').collect();
        match_words(&pattern, &key)
    }
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}
