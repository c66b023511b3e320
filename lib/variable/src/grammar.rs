//! Identifier grammar for inline variable tokens.
//!
//! Three spellings name a variable inside free text:
//!
//! - interchange: `@gv_<sourceType>_<entityId>_<field>-=` (authoritative)
//! - display: `@<sourceName>.<field>#<shortId>` (human label, shortId is the
//!   first four characters of the entity id)
//! - legacy: `@<sourceName>.<field>`
//!
//! Entity ids may contain ASCII letters, digits and `-`; fields may contain
//! word characters. The `-=` terminator is always written and is optional when
//! reading, since older producers omitted it.

use crate::variable::{SourceType, VariableKey};
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Terminator that closes an interchange token.
pub const TERMINATOR: &str = "-=";

/// Prefix that opens an interchange token.
pub const PREFIX: &str = "@gv_";

/// Number of entity-id characters shown in a display label.
pub const SHORT_ID_LEN: usize = 4;

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<canonical>
            @gv_
            (?P<source_type>npc|task|workflow|custom|system)
            _(?P<entity_id>[A-Za-z0-9-]+)
            _(?P<field>\w+)
            (?P<terminator>-=)?
        )
        |
        (?P<named>
            @(?P<source_name>[\p{L}\p{N}_-]+)
            \.(?P<named_field>[\p{L}\p{N}_]+)
            (?:\#(?P<short_id>[A-Za-z0-9-]+))?
        )",
    )
    .expect("token pattern is valid")
});

static ENTITY_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("entity id pattern is valid"));

static FIELD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+$").expect("field pattern is valid"));

/// Checks that an identity can be written as an interchange token and read
/// back unchanged. Returns the reason when it cannot.
pub fn check_identity(entity_id: &str, field: &str) -> Result<(), &'static str> {
    if !ENTITY_ID_PATTERN.is_match(entity_id) {
        return Err("entity id must be non-empty ASCII letters, digits or '-'");
    }
    if !FIELD_PATTERN.is_match(field) {
        return Err("field must be non-empty word characters");
    }
    Ok(())
}

/// What a token refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenRef {
    /// Interchange form, identifying the variable by its triple.
    Canonical {
        key: VariableKey,
        /// Whether the `-=` terminator was present.
        terminated: bool,
    },
    /// Display or legacy form, identifying the variable by name.
    Named {
        source_name: String,
        field: String,
        short_id: Option<String>,
    },
}

impl TokenRef {
    /// Returns the run-scoped store key (`sourceName.field`) for named tokens.
    #[must_use]
    pub fn store_key(&self) -> Option<String> {
        match self {
            Self::Canonical { .. } => None,
            Self::Named {
                source_name, field, ..
            } => Some(format!("{source_name}.{field}")),
        }
    }
}

/// A token located inside a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMatch {
    /// Byte offset of the leading `@`.
    pub start: usize,
    /// Byte offset one past the last token byte.
    pub end: usize,
    pub reference: TokenRef,
}

impl TokenMatch {
    /// Returns the token's text.
    #[must_use]
    pub fn as_str<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

/// Finds every token in `text`, leftmost-first and non-overlapping.
///
/// Adjacent tokens are reported separately. Named tokens directly preceded by
/// a word character (for instance inside an e-mail address) are ignored
/// unless that character ends the previous token.
#[must_use]
pub fn scan(text: &str) -> Vec<TokenMatch> {
    let mut found: Vec<TokenMatch> = Vec::new();
    for caps in TOKEN_PATTERN.captures_iter(text) {
        let previous_end = found.last().map(|m| m.end);
        if let Some(token) = to_match(text, &caps, previous_end) {
            found.push(token);
        }
    }
    found
}

/// Returns true if `text` contains at least one token.
#[must_use]
pub fn contains_token(text: &str) -> bool {
    !scan(text).is_empty()
}

/// Parses `text` as exactly one token.
#[must_use]
pub fn parse_token(text: &str) -> Option<TokenRef> {
    let mut matches = scan(text);
    match matches.as_slice() {
        [only] if only.start == 0 && only.end == text.len() => Some(matches.remove(0).reference),
        _ => None,
    }
}

/// Builds the canonical interchange token for a variable triple.
#[must_use]
pub fn canonical_token(source_type: SourceType, entity_id: &str, field: &str) -> String {
    format!("{PREFIX}{source_type}_{entity_id}_{field}{TERMINATOR}")
}

/// Builds the human display label `@<sourceName>.<field>#<shortId>`.
#[must_use]
pub fn display_token(source_name: &str, field: &str, entity_id: &str) -> String {
    format!("@{source_name}.{field}#{}", short_id(entity_id))
}

/// Returns the first [`SHORT_ID_LEN`] characters of an entity id.
#[must_use]
pub fn short_id(entity_id: &str) -> &str {
    match entity_id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &entity_id[..idx],
        None => entity_id,
    }
}

fn to_match(text: &str, caps: &Captures<'_>, previous_end: Option<usize>) -> Option<TokenMatch> {
    if let Some(whole) = caps.name("canonical") {
        let source_type = caps["source_type"].parse::<SourceType>().ok()?;
        let terminated = caps.name("terminator").is_some();
        if !terminated {
            tracing::warn!(token = whole.as_str(), "variable token is missing its -= terminator");
        }
        return Some(TokenMatch {
            start: whole.start(),
            end: whole.end(),
            reference: TokenRef::Canonical {
                key: VariableKey::new(source_type, &caps["entity_id"], &caps["field"]),
                terminated,
            },
        });
    }

    let whole = caps.name("named")?;
    let preceded_by_word = previous_end != Some(whole.start())
        && text[..whole.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '_');
    if preceded_by_word {
        return None;
    }

    Some(TokenMatch {
        start: whole.start(),
        end: whole.end(),
        reference: TokenRef::Named {
            source_name: caps["source_name"].to_string(),
            field: caps["named_field"].to_string(),
            short_id: caps.name("short_id").map(|m| m.as_str().to_string()),
        },
    })
}
