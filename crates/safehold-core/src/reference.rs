//! Field reference substitution.
//!
//! Text copied from an entry may embed references to another entry's
//! attributes, e.g. `{REF:P-1b4e28ba-2fa1-11d2-883f-0016d3cca427}` or the
//! KeePass native `{REF:P@I:1B4E28BA2FA111D2883F0016D3CCA427}`. Tokens that
//! cannot be resolved stay in the text unchanged.

use crate::manager::DatabaseManager;
use crate::models::FieldKind;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::OnceLock;
use uuid::Uuid;

/// A parsed `{REF:...}` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldReference {
    pub kind: FieldKind,
    pub target: Uuid,
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\{REF:([^}]*)\}").expect("reference pattern is valid")
    })
}

impl FieldReference {
    /// Parse the body of a token (the part between `{REF:` and `}`).
    pub fn parse_body(body: &str) -> Option<Self> {
        let mut chars = body.chars();
        let kind = FieldKind::from_code(chars.next()?)?;
        let rest = chars.as_str();

        // Hyphenated 36-character form after `-`, 32 hex digits after `@I:`.
        let (id, len) = if let Some(id) = rest.strip_prefix('-') {
            (id, 36)
        } else {
            let (search_in, id) = rest.split_once(':')?;
            if !search_in.eq_ignore_ascii_case("@I") {
                return None;
            }
            (id, 32)
        };
        if id.len() != len {
            return None;
        }

        let target = Uuid::parse_str(id).ok()?;
        Some(Self { kind, target })
    }

    /// Parse a complete token such as `{REF:U-<uuid>}`.
    pub fn parse(token: &str) -> Option<Self> {
        let caps = token_pattern().captures(token)?;
        let whole = caps.get(0)?;
        if whole.start() != 0 || whole.end() != token.len() {
            return None;
        }
        Self::parse_body(caps.get(1)?.as_str())
    }
}

/// Replace every resolvable reference token in `text`.
///
/// Each token is looked up on its own; values substituted in are not scanned
/// again. Returns the input unchanged (borrowed) when it has no tokens.
pub fn resolve<'a, D>(text: &'a str, db: &D) -> Cow<'a, str>
where
    D: DatabaseManager + ?Sized,
{
    token_pattern().replace_all(text, |caps: &Captures<'_>| {
        let token = &caps[0];
        match FieldReference::parse_body(&caps[1]) {
            Some(reference) => match db.lookup_entry_attribute(&reference.target, reference.kind) {
                Some(value) => value,
                None => {
                    tracing::debug!("Reference {} points at a missing entry or field", token);
                    token.to_string()
                }
            },
            None => {
                tracing::debug!("Ignoring malformed reference {}", token);
                token.to_string()
            }
        }
    })
}
