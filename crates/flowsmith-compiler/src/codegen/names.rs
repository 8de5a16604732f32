//! Python identifiers for flow entities.

use std::collections::{HashMap, HashSet};

use flowsmith_core::EntityId;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield", "match", "case", "type",
];

/// Names the generated module defines itself.
const RESERVED: &[&str] = &["os", "main", "results", "autogen", "register_function"];

/// Whether `name` can be used as a Python identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric()) && !KEYWORDS.contains(&name)
}

/// Lowercase `raw` and replace anything that cannot appear in an identifier.
pub fn sanitize(raw: &str, fallback: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_underscore = false;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        return fallback.to_string();
    }
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        return format!("{}_{}", fallback, trimmed);
    }
    trimmed.to_string()
}

/// Assigns unique identifiers to entities, in registration order.
#[derive(Debug, Default)]
pub struct NameRegistry {
    taken: HashSet<String>,
    by_id: HashMap<EntityId, String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        let mut registry = Self::default();
        for name in KEYWORDS.iter().chain(RESERVED) {
            registry.taken.insert(name.to_string());
        }
        registry
    }

    /// Reserve an exact name (tool functions keep their own names).
    pub fn reserve(&mut self, id: &EntityId, name: &str) -> String {
        self.taken.insert(name.to_string());
        self.by_id.insert(id.clone(), name.to_string());
        name.to_string()
    }

    /// Register `id` under a sanitized form of `raw` plus `suffix`,
    /// deduplicated with a numeric suffix.
    pub fn assign(&mut self, id: &EntityId, raw: &str, fallback: &str, suffix: &str) -> String {
        let base = format!("{}{}", sanitize(raw, fallback), suffix);
        let mut candidate = base.clone();
        let mut n = 2;
        while self.taken.contains(&candidate) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        self.taken.insert(candidate.clone());
        self.by_id.insert(id.clone(), candidate.clone());
        candidate
    }

    /// Claim a derived name that is not tied to an entity id.
    pub fn derive(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut n = 2;
        while self.taken.contains(&candidate) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }

    pub fn get(&self, id: &EntityId) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }
}
