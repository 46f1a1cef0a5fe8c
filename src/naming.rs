// Copyright 2025 Cowboy AI, LLC.

//! Name normalization for entities, properties and relationship aliases
//!
//! Every name that enters the model goes through one of these functions so
//! that `user-event`, `user.event` and `User Event` all land on the same
//! entity, and `foo_bar`, `foo-bar` and `FooBar` on the same property.

use convert_case::{Case, Casing};
use deunicode::deunicode;

/// Split on anything that is not alphanumeric and re-join with single spaces
fn words(input: &str) -> String {
    input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `foo_bar` → `fooBar`
pub fn camelize(input: &str) -> String {
    words(input).to_case(Case::Camel)
}

/// `user-event` → `UserEvent`
pub fn pascalize(input: &str) -> String {
    words(input).to_case(Case::Pascal)
}

/// `UserEvents` → `user-events`
pub fn dasherize(input: &str) -> String {
    words(input).to_case(Case::Kebab)
}

/// `magicLogin` → `MAGIC_LOGIN`
pub fn constantize(input: &str) -> String {
    words(input).to_case(Case::Constant)
}

/// URL slug: transliterated to ASCII, lower-case words joined by `-`.
///
/// Empty when `input` has no letter or digit.
pub fn slugify(input: &str) -> String {
    deunicode(input)
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// Normalized singular entity name: `user events` → `UserEvent`
pub fn entity_name(input: &str) -> String {
    singularize(&pascalize(input))
}

fn is_vowel(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u')
}

/// Endings that already read as singular even though they end in `s`
const SINGULAR_S_ENDINGS: [&str; 3] = ["ss", "us", "is"];

/// English plural of the last word
pub fn pluralize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if ["s", "x", "z", "ch", "sh"].iter().any(|e| lower.ends_with(e)) {
        return format!("{word}es");
    }
    if let Some(stem) = word.strip_suffix(['y', 'Y']) {
        if stem.chars().last().is_some_and(|c| !is_vowel(c)) {
            return format!("{stem}ies");
        }
    }
    format!("{word}s")
}

/// English singular of the last word; already-singular words pass through
pub fn singularize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if lower.ends_with("ies") && word.len() > 3 {
        return format!("{}y", &word[..word.len() - 3]);
    }
    if ["sses", "uses", "xes", "zes", "ches", "shes"]
        .iter()
        .any(|e| lower.ends_with(e))
    {
        return word[..word.len() - 2].to_string();
    }
    if lower.ends_with('s') && !SINGULAR_S_ENDINGS.iter().any(|e| lower.ends_with(e)) {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}
