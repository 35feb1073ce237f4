//! Property tests for the `@name` reference resolver.

use merlya_secret::{ReferenceSource, ResolveMode, SecretValue, resolve_references};
use proptest::prelude::*;
use std::sync::Arc;

struct OneSecret {
    name: String,
    value: Arc<SecretValue>,
}

impl ReferenceSource for OneSecret {
    fn plain(&self, _name: &str) -> Option<String> {
        None
    }

    fn is_secret(&self, name: &str) -> bool {
        name == self.name
    }

    fn secret(&self, name: &str) -> Option<Arc<SecretValue>> {
        (name == self.name).then(|| Arc::clone(&self.value))
    }

    fn candidates(&self, _prefix: &str) -> Vec<String> {
        vec![self.name.clone()]
    }
}

struct EmptySource;

impl ReferenceSource for EmptySource {
    fn plain(&self, _name: &str) -> Option<String> {
        None
    }

    fn is_secret(&self, _name: &str) -> bool {
        false
    }

    fn secret(&self, _name: &str) -> Option<Arc<SecretValue>> {
        None
    }

    fn candidates(&self, _prefix: &str) -> Vec<String> {
        Vec::new()
    }
}

proptest! {
    /// Text without an `@` passes through both modes unchanged.
    #[test]
    fn at_free_text_is_identity(text in "[a-zA-Z0-9 .,;/_-]{0,80}") {
        prop_assume!(!text.contains('@'));
        let out = resolve_references(&text, ResolveMode::Resolved, &EmptySource).unwrap();
        prop_assert_eq!(&out, &text);
        let out = resolve_references(&text, ResolveMode::Redacted, &EmptySource).unwrap();
        prop_assert_eq!(out, text);
    }

    /// Redacted output never contains the secret's value and always keeps
    /// the reference literal.
    #[test]
    fn redacted_never_leaks(
        name in "[a-z][a-z0-9_-]{0,20}",
        value in "[!-?A-~]{8,32}",
        prefix in "[a-zA-Z ]{0,20}",
        suffix in "[ .,][a-zA-Z .,]{0,20}",
    ) {
        prop_assume!(!prefix.contains(&value) && !suffix.contains(&value));
        prop_assume!(!name.contains(&value));
        let source = OneSecret {
            name: name.clone(),
            value: Arc::new(SecretValue::from_string(value.clone())),
        };
        let text = format!("{prefix}@{name}{suffix}");
        let out = resolve_references(&text, ResolveMode::Redacted, &source).unwrap();
        prop_assert!(!out.contains(&value));
        prop_assert!(out.contains(&format!("@{name}")));
    }

    /// Resolved mode substitutes the exact value where the reference stood.
    #[test]
    fn resolved_substitutes_exactly(
        name in "[a-z][a-z0-9_-]{0,20}",
        value in "[!-~]{1,32}",
    ) {
        let source = OneSecret {
            name: name.clone(),
            value: Arc::new(SecretValue::from_string(value.clone())),
        };
        let out = resolve_references(&format!("x @{name} y"), ResolveMode::Resolved, &source)
            .unwrap();
        prop_assert_eq!(out, format!("x {value} y"));
    }
}
