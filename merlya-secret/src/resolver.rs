//! `@name` reference expansion.
//!
//! Two modes with one invariant between them: anything bound for a language
//! model goes through [`ResolveMode::Redacted`], which leaves secret
//! references textually as `@name` and never touches their values; only
//! local execution uses [`ResolveMode::Resolved`]. The store's value for a
//! secret must never appear in a redacted output.

use crate::{SecretError, SecretValue};
use merlya_types::secret::is_key_char;
use std::sync::Arc;

/// Name lookups used by the resolver. Implemented by the dispatcher over
/// the secret store, the inventory's config variables, and host aliases.
///
/// Classification ([`is_secret`](Self::is_secret)) is separate from
/// fetching ([`secret`](Self::secret)) so redacted-mode expansion never
/// reads a secret value; reading would bump access counters and emit
/// audit events for text that is only being shown to a model.
pub trait ReferenceSource {
    /// Non-sensitive value for `name`: config variable or host alias.
    fn plain(&self, name: &str) -> Option<String>;

    /// Whether `name` names a secret. Must not touch the value.
    fn is_secret(&self, name: &str) -> bool;

    /// Fetch the secret value for `name`. Resolved mode only.
    fn secret(&self, name: &str) -> Option<Arc<SecretValue>>;

    /// Up to five known names with the given case-insensitive prefix.
    fn candidates(&self, prefix: &str) -> Vec<String>;
}

/// Expansion mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// For LLM-bound text: secret references stay literal, and so do
    /// unknown references; an unknown name cannot leak anything.
    Redacted,
    /// For execution: every reference is expanded; unknown references are
    /// an error naming the reference and up to five near matches.
    Resolved,
}

/// Expand every `@name` reference in `text`.
///
/// Reference grammar: `@` followed by one or more of `[A-Za-z0-9_\-:./]`,
/// greedy. An `@` not followed by a grammar character is left intact.
pub fn resolve_references(
    text: &str,
    mode: ResolveMode,
    source: &dyn ReferenceSource,
) -> Result<String, SecretError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(at) = rest.find('@') {
        out.push_str(&rest[..at]);
        let after = &rest[at + 1..];
        let name_len = after
            .char_indices()
            .find(|(_, c)| !is_key_char(*c))
            .map_or(after.len(), |(i, _)| i);

        if name_len == 0 {
            // literal @: whitespace or punctuation follows
            out.push('@');
            rest = after;
            continue;
        }

        let name = &after[..name_len];
        match mode {
            ResolveMode::Redacted => {
                let plain = if source.is_secret(name) {
                    None
                } else {
                    source.plain(name)
                };
                match plain {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('@');
                        out.push_str(name);
                    }
                }
            }
            ResolveMode::Resolved => {
                if let Some(value) = source.secret(name) {
                    value.with_str(|plain| out.push_str(plain));
                } else if let Some(value) = source.plain(name) {
                    out.push_str(&value);
                } else {
                    return Err(SecretError::NotFound {
                        name: name.to_string(),
                        suggestions: source.candidates(name),
                    });
                }
            }
        }
        rest = &after[name_len..];
    }

    out.push_str(rest);
    Ok(out)
}
