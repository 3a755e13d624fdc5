//! Canonical device-name normalization.
//!
//! This function is a cross-component contract: the Hub uses it to resolve
//! device names in search and execute requests, and the Spoke SDK uses it
//! when presenting its own name. The two sides must agree byte-for-byte on
//! the output, so the rules live here in the shared crate and are pinned by
//! the committed test vectors in `tests/fixtures/device_names.json`.
//! Any change to this function is a protocol compatibility change.

/// Normalize a human-facing device name to its canonical form:
/// lowercase, every run of non-alphanumeric characters collapsed to a
/// single `_`, with leading and trailing separators trimmed.
///
/// `"Strawberry Spoke"` → `"strawberry_spoke"`,
/// `" MacBook Pro (Office) "` → `"macbook_pro_office"`.
pub fn normalize_device_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_separator = false;

    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.extend(c.to_lowercase());
        } else {
            pending_separator = true;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_joins_with_underscores() {
        assert_eq!(normalize_device_name("Strawberry Spoke"), "strawberry_spoke");
        assert_eq!(normalize_device_name("spoke two"), "spoke_two");
    }

    #[test]
    fn collapses_separator_runs() {
        assert_eq!(normalize_device_name("a -- b__c"), "a_b_c");
    }

    #[test]
    fn trims_leading_and_trailing_separators() {
        assert_eq!(normalize_device_name("  (Office) "), "office");
        assert_eq!(normalize_device_name("___"), "");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(normalize_device_name(""), "");
    }

    #[test]
    fn idempotent_on_normalized_names() {
        let once = normalize_device_name("MacBook Pro (Office)");
        assert_eq!(normalize_device_name(&once), once);
    }
}
