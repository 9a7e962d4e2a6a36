//! Cache invalidation by key, key pattern, or category
//!
//! Exactly one selector wins, in this order: key, pattern, category. A key
//! without a category targets the default category; a pattern without a
//! category matches keys in every category. An empty request removes nothing.
//!
//! Patterns use shell-glob syntax (`*`, `?`, `[abc]`, `[a-z]`, `[!x]`). Only `!`
//! negates a class; `^` is an ordinary member.
//! Literal patterns and trailing-`*` prefixes are answered with indexed
//! deletes; anything else scans keys and matches them one by one.

use crate::cache::store::{CacheStore, ScanOrder};
use crate::cache::types::DEFAULT_CATEGORY;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::ControlFlow;

/// What to remove from the cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalidation {
    /// Exact key
    pub key: Option<String>,

    /// Glob pattern over keys
    pub pattern: Option<String>,

    /// Category restriction, or the whole target when nothing else is set
    pub category: Option<String>,
}

impl Invalidation {
    /// Remove a single key (in the default category unless narrowed)
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Default::default()
        }
    }

    /// Remove every key matching a glob pattern
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Default::default()
        }
    }

    /// Remove every entry in a category
    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Default::default()
        }
    }

    /// Restrict the request to one category
    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Whether the request selects nothing
    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.pattern.is_none() && self.category.is_none()
    }
}

impl fmt::Display for Invalidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = self.category.as_deref().unwrap_or("*");
        match (&self.key, &self.pattern) {
            (Some(key), _) => write!(
                f,
                "key {:?} in {}",
                key,
                self.category.as_deref().unwrap_or(DEFAULT_CATEGORY)
            ),
            (None, Some(pattern)) => write!(f, "pattern {:?} in {}", pattern, scope),
            (None, None) if self.category.is_some() => write!(f, "category {}", scope),
            (None, None) => write!(f, "nothing"),
        }
    }
}

/// How a pattern is evaluated against stored keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternKind {
    /// No wildcards: exact key match
    Literal(String),

    /// Wildcard-free text followed by a single trailing `*`
    Prefix(String),

    /// Anything else
    Glob(GlobPattern),
}

impl PatternKind {
    pub fn classify(pattern: &str) -> Self {
        let is_meta = |c: char| matches!(c, '*' | '?' | '[');

        if !pattern.contains(is_meta) {
            return PatternKind::Literal(pattern.to_string());
        }

        if let Some(prefix) = pattern.strip_suffix('*') {
            if !prefix.contains(is_meta) {
                return PatternKind::Prefix(prefix.to_string());
            }
        }

        PatternKind::Glob(GlobPattern::new(pattern))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    AnySequence,
    Class { negated: bool, items: Vec<ClassItem> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassItem {
    Single(char),
    Range(char, char),
}

impl Token {
    fn matches(&self, c: char) -> bool {
        match self {
            Token::Literal(expected) => *expected == c,
            Token::AnyChar => true,
            Token::AnySequence => false,
            Token::Class { negated, items } => {
                let hit = items.iter().any(|item| match item {
                    ClassItem::Single(x) => *x == c,
                    ClassItem::Range(lo, hi) => *lo <= c && c <= *hi,
                });
                hit != *negated
            }
        }
    }
}

/// A compiled shell-style glob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    tokens: Vec<Token>,
}

impl GlobPattern {
    /// Compile a pattern. An unterminated `[` matches itself literally.
    pub fn new(pattern: &str) -> Self {
        let chars: Vec<char> = pattern.chars().collect();
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '*' => {
                    if tokens.last() != Some(&Token::AnySequence) {
                        tokens.push(Token::AnySequence);
                    }
                    i += 1;
                }
                '?' => {
                    tokens.push(Token::AnyChar);
                    i += 1;
                }
                '[' => match parse_class(&chars, i + 1) {
                    Some((token, next)) => {
                        tokens.push(token);
                        i = next;
                    }
                    None => {
                        tokens.push(Token::Literal('['));
                        i += 1;
                    }
                },
                c => {
                    tokens.push(Token::Literal(c));
                    i += 1;
                }
            }
        }

        Self { tokens }
    }

    /// Whether the whole of `text` matches
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let (mut p, mut t) = (0, 0);
        // (token after the last `*`, text position it is retried from)
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.tokens.get(p) {
                Some(Token::AnySequence) => {
                    backtrack = Some((p + 1, t));
                    p += 1;
                    continue;
                }
                Some(token) if token.matches(text[t]) => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }

            match backtrack {
                Some((resume, from)) => {
                    p = resume;
                    t = from + 1;
                    backtrack = Some((resume, from + 1));
                }
                None => return false,
            }
        }

        self.tokens[p..].iter().all(|token| *token == Token::AnySequence)
    }
}

/// Parse `[...]` starting just after the `[`; `None` if it never closes.
fn parse_class(chars: &[char], start: usize) -> Option<(Token, usize)> {
    let mut i = start;
    let negated = chars.get(i) == Some(&'!');
    if negated {
        i += 1;
    }

    let mut items = Vec::new();
    let mut first = true;
    loop {
        let c = *chars.get(i)?;
        if c == ']' && !first {
            return Some((Token::Class { negated, items }, i + 1));
        }
        first = false;

        match (chars.get(i + 1), chars.get(i + 2)) {
            (Some('-'), Some(&hi)) if hi != ']' => {
                items.push(ClassItem::Range(c, hi));
                i += 3;
            }
            _ => {
                items.push(ClassItem::Single(c));
                i += 1;
            }
        }
    }
}

/// Smallest string greater than every string starting with `prefix`.
///
/// `None` when no such bound exists (every char is `char::MAX`).
pub(crate) fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let next = match last as u32 + 1 {
            0xD800 => Some('\u{E000}'),
            code => char::from_u32(code),
        };
        if let Some(next) = next {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

/// Remove the rows selected by `request`; returns how many were removed.
///
/// Expired rows are removed too when they match.
pub(crate) fn apply(store: &CacheStore, request: &Invalidation) -> Result<usize> {
    let category = request.category.as_deref();

    if let Some(key) = &request.key {
        return store.delete_exact(category.unwrap_or(DEFAULT_CATEGORY), key);
    }

    if let Some(pattern) = &request.pattern {
        return match PatternKind::classify(pattern) {
            PatternKind::Literal(key) => match category {
                Some(category) => store.delete_exact(category, &key),
                None => store.delete_key_everywhere(&key),
            },
            PatternKind::Prefix(prefix) if prefix.is_empty() => match category {
                Some(category) => store.delete_by_category(category),
                None => store.delete_all(),
            },
            PatternKind::Prefix(prefix) => {
                let upper = prefix_upper_bound(&prefix);
                store.delete_key_range(category, &prefix, upper.as_deref())
            }
            PatternKind::Glob(glob) => store.write(|store| {
                let mut matched = Vec::new();
                store.scan(category, None, ScanOrder::Unordered, |summary| {
                    if glob.matches(&summary.key) {
                        matched.push((summary.category, summary.key));
                    }
                    ControlFlow::Continue(())
                })?;
                store.delete_keys(&matched)
            }),
        };
    }

    match category {
        Some(category) => store.delete_by_category(category),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::EntryMetadata;
    use chrono::Utc;

    fn seeded(rows: &[(&str, &str)]) -> CacheStore {
        let store = CacheStore::in_memory().unwrap();
        let now = Utc::now();
        for (category, key) in rows {
            store
                .put(category, key, "1", &EntryMetadata::new(now, None, 1))
                .unwrap();
        }
        store
    }

    fn remaining(store: &CacheStore) -> Vec<String> {
        let mut keys = Vec::new();
        store
            .scan(None, None, ScanOrder::Unordered, |s| {
                keys.push(format!("{}/{}", s.category, s.key));
                ControlFlow::Continue(())
            })
            .unwrap();
        keys.sort();
        keys
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            PatternKind::classify("user:1"),
            PatternKind::Literal("user:1".to_string())
        );
        assert_eq!(
            PatternKind::classify("user:*"),
            PatternKind::Prefix("user:".to_string())
        );
        assert!(matches!(PatternKind::classify("*:1"), PatternKind::Glob(_)));
        assert!(matches!(PatternKind::classify("us?r:*"), PatternKind::Glob(_)));
    }

    #[test]
    fn test_glob_matching() {
        let glob = GlobPattern::new("file[1-2].txt");
        assert!(glob.matches("file1.txt"));
        assert!(glob.matches("file2.txt"));
        assert!(!glob.matches("file3.txt"));

        let glob = GlobPattern::new("*:issue:*");
        assert!(glob.matches("PROJ:issue:42"));
        assert!(!glob.matches("PROJ:epic:42"));

        assert!(GlobPattern::new("a?c").matches("abc"));
        assert!(!GlobPattern::new("a?c").matches("ac"));
        assert!(GlobPattern::new("**").matches(""));
    }

    #[test]
    fn test_glob_negated_class_and_literal_bracket() {
        let glob = GlobPattern::new("v[!0-9]");
        assert!(glob.matches("vx"));
        assert!(!glob.matches("v1"));

        let glob = GlobPattern::new("[^a]");
        assert!(glob.matches("^"));
        assert!(glob.matches("a"));
        assert!(!glob.matches("b"));

        let glob = GlobPattern::new("[]x]");
        assert!(glob.matches("]"));
        assert!(glob.matches("x"));

        let glob = GlobPattern::new("a[b");
        assert!(glob.matches("a[b"));
        assert!(!glob.matches("ab"));
    }

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound("user:"), Some("user;".to_string()));
        assert_eq!(prefix_upper_bound("a\u{D7FF}"), Some("a\u{E000}".to_string()));
        assert_eq!(prefix_upper_bound("a\u{10FFFF}"), Some("b".to_string()));
        assert_eq!(prefix_upper_bound("\u{10FFFF}"), None);
    }

    #[test]
    fn test_invalidate_key_uses_default_category() {
        let store = seeded(&[("default", "k"), ("other", "k")]);
        assert_eq!(apply(&store, &Invalidation::key("k")).unwrap(), 1);
        assert_eq!(remaining(&store), vec!["other/k"]);

        assert_eq!(apply(&store, &Invalidation::key("k")).unwrap(), 0);
        assert_eq!(apply(&store, &Invalidation::key("k").in_category("other")).unwrap(), 1);
    }

    #[test]
    fn test_invalidate_prefix_pattern() {
        let store = seeded(&[
            ("default", "user:1"),
            ("default", "user:2"),
            ("default", "users"),
            ("api", "user:3"),
        ]);

        let request = Invalidation::pattern("user:*").in_category("default");
        let removed = apply(&store, &request).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(remaining(&store), vec!["api/user:3", "default/users"]);

        assert_eq!(apply(&store, &Invalidation::pattern("user:*")).unwrap(), 1);
    }

    #[test]
    fn test_invalidate_glob_pattern_across_categories() {
        let store = seeded(&[
            ("a", "file1.txt"),
            ("b", "file2.txt"),
            ("b", "file3.txt"),
        ]);

        assert_eq!(apply(&store, &Invalidation::pattern("file[1-2].txt")).unwrap(), 2);
        assert_eq!(remaining(&store), vec!["b/file3.txt"]);
    }

    #[test]
    fn test_invalidate_literal_pattern_everywhere() {
        let store = seeded(&[("a", "x"), ("b", "x"), ("b", "y")]);
        assert_eq!(apply(&store, &Invalidation::pattern("x")).unwrap(), 2);
    }

    #[test]
    fn test_key_takes_precedence_over_pattern() {
        let store = seeded(&[("default", "a"), ("default", "b")]);
        let request = Invalidation {
            key: Some("a".to_string()),
            pattern: Some("*".to_string()),
            category: None,
        };
        assert_eq!(apply(&store, &request).unwrap(), 1);
        assert_eq!(remaining(&store), vec!["default/b"]);
    }

    #[test]
    fn test_invalidate_category_and_empty_request() {
        let store = seeded(&[("a", "1"), ("a", "2"), ("b", "1")]);
        assert!(Invalidation::default().is_empty());
        assert_eq!(apply(&store, &Invalidation::default()).unwrap(), 0);
        assert_eq!(apply(&store, &Invalidation::category("a")).unwrap(), 2);
        assert_eq!(remaining(&store), vec!["b/1"]);
        assert_eq!(apply(&store, &Invalidation::category("missing")).unwrap(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(Invalidation::key("k").to_string(), "key \"k\" in default");
        assert_eq!(
            Invalidation::pattern("u:*").in_category("api").to_string(),
            "pattern \"u:*\" in api"
        );
        assert_eq!(Invalidation::default().to_string(), "nothing");
    }
}
