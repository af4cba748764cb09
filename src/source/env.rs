//! Environment placeholder substitution.
//!
//! Replaces every `${NAME}` token (whitespace inside the braces tolerated)
//! with the trimmed value of the environment variable `NAME`. Unset variables
//! become the empty string. Substitution is textual and happens once, before
//! any structured parse.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::bytes::{Captures, Regex};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}").expect("placeholder pattern is valid")
});

/// Raw document text after placeholder substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expanded {
    pub bytes: Vec<u8>,
    /// Names of referenced variables that were not set, in order of appearance.
    pub unset: Vec<String>,
}

/// Substitute placeholders using an arbitrary variable lookup.
pub fn expand_with<F>(raw: &[u8], lookup: F) -> Expanded
where
    F: Fn(&str) -> Option<String>,
{
    let mut unset = Vec::new();
    let bytes = PLACEHOLDER
        .replace_all(raw, |caps: &Captures<'_>| {
            let name = String::from_utf8_lossy(&caps[1]).into_owned();
            match lookup(&name) {
                Some(value) => value.trim().as_bytes().to_vec(),
                None => {
                    unset.push(name);
                    Vec::new()
                }
            }
        })
        .into_owned();
    Expanded { bytes, unset }
}

/// Substitute placeholders from the process environment, warning once per
/// unset variable.
pub fn expand(raw: &[u8]) -> Vec<u8> {
    let expanded = expand_with(raw, |name| std::env::var(name).ok());
    let mut warned = HashSet::new();
    for name in expanded.unset.iter().filter(|name| warned.insert(name.as_str())) {
        tracing::warn!(variable = %name, "Environment variable not set, substituting empty string");
    }
    expanded.bytes
}
