//! Cache key composition
//!
//! Keys are `category:part:part:name=value`, with named components sorted by
//! name so argument order never changes the key. Keys longer than
//! [`MAX_KEY_LENGTH`] collapse to `category:<sha256 of the full key>`.
//!
//! Components are joined verbatim. A part that itself contains `:` yields
//! the same key as the equivalent split parts (`["a:b"]` and `["a", "b"]`
//! both give `category:a:b`), which keeps keys matchable by prefix and glob
//! invalidation. Callers that need the two kept apart must encode the part.

use sha2::{Digest, Sha256};
use std::fmt::Display;

/// Separator between key components
pub const KEY_DELIMITER: &str = ":";

/// Longest composed key stored verbatim
pub const MAX_KEY_LENGTH: usize = 200;

/// Compose a deterministic key from positional and named components
pub fn generate_key(
    category: &str,
    parts: &[&dyn Display],
    named: &[(&str, &dyn Display)],
) -> String {
    let mut builder = KeyBuilder::new(category);
    for part in parts {
        builder = builder.part(part);
    }
    for (name, value) in named {
        builder = builder.named(*name, value);
    }
    builder.build()
}

/// Fluent form of [`generate_key`]
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    category: String,
    parts: Vec<String>,
    named: Vec<(String, String)>,
}

impl KeyBuilder {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            parts: Vec::new(),
            named: Vec::new(),
        }
    }

    /// Append a positional component
    pub fn part(mut self, part: impl Display) -> Self {
        self.parts.push(part.to_string());
        self
    }

    /// Add a `name=value` component
    pub fn named(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.named.push((name.into(), value.to_string()));
        self
    }

    pub fn build(mut self) -> String {
        // Stable sort keeps repeated names in insertion order.
        self.named.sort_by(|a, b| a.0.cmp(&b.0));

        let mut components = Vec::with_capacity(1 + self.parts.len() + self.named.len());
        components.push(self.category.clone());
        components.extend(self.parts);
        components.extend(
            self.named
                .into_iter()
                .map(|(name, value)| format!("{}={}", name, value)),
        );

        let key = components.join(KEY_DELIMITER);
        if key.chars().count() <= MAX_KEY_LENGTH {
            return key;
        }

        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        format!("{}{}{}", self.category, KEY_DELIMITER, digest)
    }
}
