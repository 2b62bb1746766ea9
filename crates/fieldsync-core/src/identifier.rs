//! Device identifier parsing and batch expansion.
//!
//! Device identifiers are colon-separated strings ending in a numeric
//! suffix, like "LAB:EXP:MMS:07". Operators name a batch of devices with
//! one full identifier followed by short suffixes and ranges:
//!
//! ```text
//! LAB:EXP:MMS:01-05 10 12 14-16
//! ```
//!
//! which expands to suffixes 01..05, 10, 12 and 14..16 on the base
//! "LAB:EXP:MMS:".

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

/// Upper bound on the number of identifiers a single range token may produce.
const MAX_RANGE_LEN: u32 = 100;

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<base>(?:[A-Za-z0-9_]+:)+)(?P<num>\d+)$").expect("valid identifier regex")
    })
}

/// A parsed, fully-qualified device identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    raw: String,
    base_len: usize,
    number: u32,
}

impl Identifier {
    /// Parse a full identifier. Returns `None` for anything without a
    /// colon-terminated base and a numeric suffix.
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = identifier_regex().captures(raw)?;
        let base = caps.name("base")?;
        let number = caps.name("num")?.as_str().parse().ok()?;
        Some(Self {
            raw: raw.to_string(),
            base_len: base.end(),
            number,
        })
    }

    /// Get the raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The base shared by all identifiers of a batch, including the trailing colon.
    pub fn base(&self) -> &str {
        &self.raw[..self.base_len]
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// First colon-separated segment, used to infer the domain.
    pub fn prefix(&self) -> &str {
        self.raw.split(':').next().unwrap_or_default()
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Reasons a token is skipped during expansion.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IdentifierError {
    #[error("token '{0}' is not an identifier, suffix or range")]
    Malformed(String),

    #[error("identifier '{token}' does not share base '{base}'")]
    ForeignBase { token: String, base: String },

    #[error("range '{0}' is empty or too large")]
    BadRange(String),
}

/// Derive the shared base from the first token that yields one.
pub fn base_identifier<S: AsRef<str>>(tokens: &[S]) -> Option<String> {
    tokens.iter().find_map(|token| {
        let token = token.as_ref();
        let head = token.split('-').next().unwrap_or(token);
        Identifier::parse(head).map(|id| id.base().to_string())
    })
}

/// Expand a token list into a sorted, deduplicated list of identifiers.
///
/// Malformed tokens are skipped. Returns `None` when no token yields a
/// base identifier.
pub fn expand_identifiers<S: AsRef<str>>(tokens: &[S]) -> Option<Vec<String>> {
    expand_identifiers_reporting(tokens).map(|(ids, _)| ids)
}

/// Like [`expand_identifiers`], also returning why each skipped token
/// was skipped.
pub fn expand_identifiers_reporting<S: AsRef<str>>(
    tokens: &[S],
) -> Option<(Vec<String>, Vec<IdentifierError>)> {
    let base = base_identifier(tokens)?;
    let mut expanded = BTreeSet::new();
    let mut skipped = Vec::new();

    for token in tokens {
        match expand_token(token.as_ref(), &base) {
            Ok(ids) => expanded.extend(ids),
            Err(e) => {
                debug!("Skipping token: {}", e);
                skipped.push(e);
            }
        }
    }

    Some((expanded.into_iter().collect(), skipped))
}

/// Expand a single token against a known base.
pub fn expand_token(token: &str, base: &str) -> Result<Vec<String>, IdentifierError> {
    let token = token.trim();

    if let Some((start, end)) = token.split_once('-') {
        let mut ids = Vec::new();
        let first = match Identifier::parse(start) {
            Some(id) if id.base() == base => {
                ids.push(id.as_str().to_string());
                id.number()
            }
            Some(_) => {
                return Err(IdentifierError::ForeignBase {
                    token: token.to_string(),
                    base: base.to_string(),
                })
            }
            None => parse_suffix(start).ok_or_else(|| IdentifierError::Malformed(token.to_string()))?,
        };
        let last =
            parse_suffix(end).ok_or_else(|| IdentifierError::Malformed(token.to_string()))?;
        if last < first || last - first >= MAX_RANGE_LEN {
            return Err(IdentifierError::BadRange(token.to_string()));
        }
        ids.extend((first..=last).map(|n| format!("{}{:02}", base, n)));
        return Ok(ids);
    }

    if let Some(id) = Identifier::parse(token) {
        if id.base() == base {
            return Ok(vec![id.as_str().to_string()]);
        }
        return Err(IdentifierError::ForeignBase {
            token: token.to_string(),
            base: base.to_string(),
        });
    }

    if token.len() <= 2 {
        if let Some(n) = parse_suffix(token) {
            return Ok(vec![format!("{}{:02}", base, n)]);
        }
    }

    Err(IdentifierError::Malformed(token.to_string()))
}

fn parse_suffix(s: &str) -> Option<u32> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Split domain hints out of a raw token list.
///
/// Tokens equal (ignoring case) to a known domain are returned in the first
/// list using the known spelling; everything else is returned untouched.
pub fn split_domain_hints<S: AsRef<str>>(
    tokens: &[S],
    known_domains: &[String],
) -> (Vec<String>, Vec<String>) {
    let mut domains = Vec::new();
    let mut rest = Vec::new();
    for token in tokens {
        let token = token.as_ref();
        match known_domains.iter().find(|d| d.eq_ignore_ascii_case(token)) {
            Some(domain) => {
                if !domains.contains(domain) {
                    domains.push(domain.clone());
                }
            }
            None => rest.push(token.to_string()),
        }
    }
    (domains, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_identifier_parsing() {
        let id = Identifier::parse("LAB:EXP:MMS:07").unwrap();
        assert_eq!(id.base(), "LAB:EXP:MMS:");
        assert_eq!(id.number(), 7);
        assert_eq!(id.prefix(), "LAB");

        assert!(Identifier::parse("LAB:EXP:MMS").is_none());
        assert!(Identifier::parse("07").is_none());
        assert!(Identifier::parse("LAB:EXP:MMS:07.DESC").is_none());
    }

    #[test]
    fn test_range_expansion() {
        let ids = expand_identifiers(&["LAB:EXP:MMS:01", "03-06"]).unwrap();
        assert_eq!(
            ids,
            vec![
                "LAB:EXP:MMS:01",
                "LAB:EXP:MMS:03",
                "LAB:EXP:MMS:04",
                "LAB:EXP:MMS:05",
                "LAB:EXP:MMS:06",
            ]
        );
    }

    #[test]
    fn test_full_identifier_range() {
        let ids = expand_identifiers(&["LAB:EXP:MMS:01-03", "10", "12", "14-15"]).unwrap();
        assert_eq!(
            ids,
            vec![
                "LAB:EXP:MMS:01",
                "LAB:EXP:MMS:02",
                "LAB:EXP:MMS:03",
                "LAB:EXP:MMS:10",
                "LAB:EXP:MMS:12",
                "LAB:EXP:MMS:14",
                "LAB:EXP:MMS:15",
            ]
        );
    }

    #[test]
    fn test_overlap_deduplicates_and_sorts() {
        let ids = expand_identifiers(&["LAB:EXP:MMS:05", "2", "01-03", "03", "LAB:EXP:MMS:02"])
            .unwrap();
        assert_eq!(
            ids,
            vec![
                "LAB:EXP:MMS:01",
                "LAB:EXP:MMS:02",
                "LAB:EXP:MMS:03",
                "LAB:EXP:MMS:05",
            ]
        );
    }

    #[test]
    fn test_malformed_tokens_skipped() {
        let ids = expand_identifiers(&[
            "lab",
            "LAB:EXP:MMS:04",
            "abc",
            "9-x",
            "OTHER:BASE:02",
            "123",
            "08-02",
            "1",
        ])
        .unwrap();
        assert_eq!(ids, vec!["LAB:EXP:MMS:01", "LAB:EXP:MMS:04"]);
    }

    #[test]
    fn test_skipped_tokens_reported() {
        let (ids, skipped) =
            expand_identifiers_reporting(&["LAB:EXP:MMS:01", "abc", "05-01"]).unwrap();
        assert_eq!(ids, vec!["LAB:EXP:MMS:01"]);
        assert_eq!(
            skipped,
            vec![
                IdentifierError::Malformed("abc".to_string()),
                IdentifierError::BadRange("05-01".to_string()),
            ]
        );
    }

    #[test]
    fn test_no_base() {
        assert!(expand_identifiers(&["01", "02-04"]).is_none());
        assert!(expand_identifiers::<&str>(&[]).is_none());
    }

    #[test]
    fn test_expand_token_errors() {
        assert_eq!(
            expand_token("OTHER:BASE:02", "LAB:EXP:MMS:"),
            Err(IdentifierError::ForeignBase {
                token: "OTHER:BASE:02".to_string(),
                base: "LAB:EXP:MMS:".to_string(),
            })
        );
        assert_eq!(
            expand_token("05-01", "LAB:EXP:MMS:"),
            Err(IdentifierError::BadRange("05-01".to_string()))
        );
    }

    #[test]
    fn test_domain_hints() {
        let known = vec!["lab".to_string(), "field".to_string()];
        let (domains, rest) = split_domain_hints(&["LAB:EXP:MMS:01", "Field", "02", "lab"], &known);
        assert_eq!(domains, vec!["field", "lab"]);
        assert_eq!(rest, vec!["LAB:EXP:MMS:01", "02"]);
    }
}
