//! Collision-free record naming and identity canonicalization.
//!
//! New object and configuration records must not reuse a name already
//! present in their registry. When a candidate is taken, its suffix is
//! incremented deterministically:
//! - a trailing number is incremented keeping its zero padding ("x 09" → "x 10")
//! - a lone trailing letter after a separator is advanced ("stage-A" → "stage-B")
//! - otherwise "-2", "-3", ... is appended
//!
//! Objects and configurations are namespaced separately; configuration
//! names are additionally bounded to [`CONFIG_NAME_MAX`] characters.

use std::collections::BTreeSet;

use crate::registry::Registry;

/// Maximum length of a configuration name.
pub const CONFIG_NAME_MAX: usize = 42;

/// Attempts before giving up on a candidate.
const MAX_ATTEMPTS: usize = 10_000;

/// Errors that can occur while picking a name.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NamingError {
    #[error("name candidate is empty")]
    Empty,

    #[error("no free name for '{candidate}' (length bound {max_len:?})")]
    Exhausted {
        candidate: String,
        max_len: Option<usize>,
    },
}

/// The incrementable part at the end of a name.
#[derive(Debug, Clone, PartialEq)]
enum Suffix {
    Number { value: u64, width: usize },
    Letter(char),
    Append,
}

fn split_suffix(name: &str) -> (&str, Suffix) {
    let digits = name.chars().rev().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let stem = &name[..name.len() - digits];
        if let Ok(value) = name[stem.len()..].parse::<u64>() {
            return (stem, Suffix::Number { value, width: digits });
        }
    }

    let mut tail = name.chars().rev();
    if let (Some(last), Some(sep)) = (tail.next(), tail.next()) {
        if last.is_ascii_uppercase() && matches!(sep, ' ' | '-' | '_') {
            return (&name[..name.len() - 1], Suffix::Letter(last));
        }
    }

    (name, Suffix::Append)
}

/// Successive (stem, suffix) pairs to try after `name` itself.
fn successors(name: &str) -> Box<dyn Iterator<Item = (String, String)> + '_> {
    match split_suffix(name) {
        (stem, Suffix::Number { value, width }) => match value.checked_add(1) {
            Some(next) => Box::new(
                (next..).map(move |n| (stem.to_string(), format!("{:0width$}", n, width = width))),
            ),
            None => Box::new((2u64..).map(move |n| (name.to_string(), format!("-{}", n)))),
        },
        (stem, Suffix::Letter(letter)) => {
            let letters = ((letter as u8 + 1)..=b'Z').map(move |c| (stem.to_string(), (c as char).to_string()));
            let numbers = (2u64..).map(move |n| (name.to_string(), format!("-{}", n)));
            Box::new(letters.chain(numbers))
        }
        (stem, Suffix::Append) => {
            Box::new((2u64..).map(move |n| (stem.to_string(), format!("-{}", n))))
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// The name `candidate` is stored under before any collision suffix:
/// trimmed and, for bounded namespaces, cut to `max_len` characters.
pub fn bounded_name(candidate: &str, max_len: Option<usize>) -> String {
    let trimmed = candidate.trim();
    match max_len {
        Some(max) => truncate_chars(trimmed, max).trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

fn generate(
    existing: &BTreeSet<String>,
    candidate: &str,
    max_len: Option<usize>,
) -> Result<String, NamingError> {
    let base = bounded_name(candidate, max_len);
    if base.is_empty() {
        return Err(NamingError::Empty);
    }
    if !existing.contains(&base) {
        return Ok(base);
    }

    for (stem, suffix) in successors(&base).take(MAX_ATTEMPTS) {
        let name = match max_len {
            Some(max) => {
                let suffix_len = suffix.chars().count();
                if suffix_len >= max {
                    break;
                }
                format!("{}{}", truncate_chars(&stem, max - suffix_len), suffix)
            }
            None => format!("{}{}", stem, suffix),
        };
        if !existing.contains(&name) {
            return Ok(name);
        }
    }

    Err(NamingError::Exhausted {
        candidate: candidate.to_string(),
        max_len,
    })
}

/// Return `candidate` if unused, otherwise the first unused incremented name.
pub fn next_name(existing: &BTreeSet<String>, candidate: &str) -> Result<String, NamingError> {
    generate(existing, candidate, None)
}

/// Like [`next_name`], but every produced name fits in `max_len` characters.
/// Over-long candidates are truncated before and while incrementing.
pub fn increment_matching(
    candidate: &str,
    existing: &BTreeSet<String>,
    max_len: usize,
) -> Result<String, NamingError> {
    generate(existing, candidate, Some(max_len))
}

/// Free object name in `registry`. `current` is the object's own name when
/// renaming, which does not count as a collision.
pub fn next_object_name<R: Registry + ?Sized>(
    registry: &R,
    candidate: &str,
    current: Option<&str>,
) -> Result<String, NamingError> {
    let mut names = registry.object_names();
    if let Some(current) = current {
        names.remove(current);
    }
    next_name(&names, candidate)
}

/// Free configuration name in `registry`, bounded to [`CONFIG_NAME_MAX`].
pub fn next_config_name<R: Registry + ?Sized>(
    registry: &R,
    candidate: &str,
    current: Option<&str>,
) -> Result<String, NamingError> {
    let mut names = registry.config_names();
    if let Some(current) = current {
        names.remove(current);
    }
    increment_matching(candidate, &names, CONFIG_NAME_MAX)
}

/// Canonicalize a durable identity: trim it and left-pad numeric values
/// with zeros to `width`. Applied on every read and write path.
pub fn pad_identity(raw: &str, width: Option<usize>) -> String {
    let trimmed = raw.trim();
    match width {
        Some(width)
            if !trimmed.is_empty()
                && trimmed.len() < width
                && trimmed.chars().all(|c| c.is_ascii_digit()) =>
        {
            format!("{:0>width$}", trimmed, width = width)
        }
        _ => trimmed.to_string(),
    }
}
