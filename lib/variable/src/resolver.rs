//! Recursive token resolution against an in-memory lookup.

use crate::grammar::{self, TokenRef};
use crate::snapshot::VariableLookup;

/// Default recursion budget for nested substitutions.
pub const DEFAULT_MAX_DEPTH: u32 = 5;

/// A token that could not be resolved and was left verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionMiss {
    /// The token as it appeared in the text.
    pub token: String,
    pub reference: TokenRef,
}

/// Result of resolving a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub text: String,
    /// Distinct unresolved tokens, in first-seen order.
    pub misses: Vec<ResolutionMiss>,
    /// Number of scan passes performed.
    pub passes: u32,
    /// True when the recursion budget ran out while resolvable tokens remained.
    pub depth_exhausted: bool,
}

impl Resolution {
    /// Returns true when every token was resolved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.misses.is_empty() && !self.depth_exhausted
    }
}

/// Replaces tokens in text with their current values.
///
/// Resolution is repeated on the substituted text so values may themselves
/// contain tokens, up to `max_depth` nested levels. Unresolvable tokens stay
/// in the text unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolver {
    max_depth: u32,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl Resolver {
    #[must_use]
    pub const fn new(max_depth: u32) -> Self {
        Self { max_depth }
    }

    #[must_use]
    pub const fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Resolves every token in `text`.
    pub fn resolve<L: VariableLookup + ?Sized>(&self, text: &str, lookup: &L) -> Resolution {
        let mut current = text.to_string();
        let mut misses: Vec<ResolutionMiss> = Vec::new();
        let mut remaining = self.max_depth;
        let mut passes = 0;
        let mut depth_exhausted = false;

        loop {
            passes += 1;
            let mut replacements = Vec::new();
            for token in grammar::scan(&current) {
                match lookup.lookup(&token.reference) {
                    Some(value) => replacements.push((token.start, token.end, value)),
                    None => {
                        let raw = token.as_str(&current);
                        if !misses.iter().any(|m| m.token == raw) {
                            tracing::debug!(token = raw, "variable token did not resolve");
                            misses.push(ResolutionMiss {
                                token: raw.to_string(),
                                reference: token.reference,
                            });
                        }
                    }
                }
            }

            if replacements.is_empty() {
                break;
            }

            // Last to first keeps earlier byte offsets valid.
            for (start, end, value) in replacements.into_iter().rev() {
                current.replace_range(start..end, &value);
            }

            if remaining == 0 {
                depth_exhausted = grammar::scan(&current)
                    .iter()
                    .any(|t| lookup.lookup(&t.reference).is_some());
                if depth_exhausted {
                    tracing::warn!(
                        max_depth = self.max_depth,
                        "variable resolution hit its depth limit, possible circular reference"
                    );
                }
                break;
            }
            remaining -= 1;
        }

        Resolution {
            text: current,
            misses,
            passes,
            depth_exhausted,
        }
    }

    /// Resolves `text` and returns only the resulting string.
    pub fn resolve_text<L: VariableLookup + ?Sized>(&self, text: &str, lookup: &L) -> String {
        self.resolve(text, lookup).text
    }
}
