//! Small ambient helpers shared by every crate in the workspace.
//!
//! Nothing here is Bifrost-specific business logic; it is the plumbing
//! every crate reaches for (env-var indirection, a couple of newtypes)
//! rather than logic tied to dispatch, providers, or protocol shapes.

use std::borrow::Cow;

/// Resolves spec.md §6's `env.NAME` indirection for a single config string.
///
/// Any value of the exact form `env.NAME` is replaced with the value of the
/// `NAME` environment variable at read time. Values that don't match the
/// pattern pass through unchanged. Missing env vars resolve to an empty
/// string rather than erroring — config loading is expected to validate the
/// results it cares about downstream.
pub fn resolve_env_indirection(value: &str) -> Cow<'_, str> {
    match value.strip_prefix("env.") {
        Some(name) if !name.is_empty() => {
            Cow::Owned(std::env::var(name).unwrap_or_default())
        }
        _ => Cow::Borrowed(value),
    }
}

/// Same as [`resolve_env_indirection`] but only treats the value as an
/// indirection if the referenced env var is actually set; otherwise the
/// literal string is kept. Used where an unset env var should not silently
/// become an empty credential.
pub fn resolve_env_indirection_opt(value: &str) -> Option<Cow<'_, str>> {
    match value.strip_prefix("env.") {
        Some(name) if !name.is_empty() => std::env::var(name).ok().map(Cow::Owned),
        _ => Some(Cow::Borrowed(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_for_plain_values() {
        assert_eq!(resolve_env_indirection("sk-abc123"), "sk-abc123");
    }

    #[test]
    fn resolves_env_prefixed_values() {
        unsafe {
            std::env::set_var("BIFROST_TEST_KEY_VALUE", "resolved");
        }
        assert_eq!(
            resolve_env_indirection("env.BIFROST_TEST_KEY_VALUE"),
            "resolved"
        );
        unsafe {
            std::env::remove_var("BIFROST_TEST_KEY_VALUE");
        }
    }

    #[test]
    fn opt_variant_keeps_literal_when_env_missing() {
        unsafe {
            std::env::remove_var("BIFROST_TEST_KEY_MISSING");
        }
        assert_eq!(
            resolve_env_indirection_opt("env.BIFROST_TEST_KEY_MISSING"),
            None
        );
        assert_eq!(
            resolve_env_indirection_opt("plain").as_deref(),
            Some("plain")
        );
    }
}
