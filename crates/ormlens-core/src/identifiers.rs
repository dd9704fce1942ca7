//! Attribute key validation.
//!
//! Property keys, class attribute names and column keys become attribute
//! names on mapped instances, so they are restricted to identifier syntax.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, MappingErrorKind, Result};

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| match Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$") {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(error = %e, "identifier pattern failed to compile");
                None
            }
        })
        .as_ref()
}

/// Check whether `key` is usable as an attribute key.
///
/// # Examples
///
/// ```
/// use ormlens_core::is_valid_attribute_key;
///
/// assert!(is_valid_attribute_key("name_syn"));
/// assert!(is_valid_attribute_key("_private"));
/// assert!(!is_valid_attribute_key("1st"));
/// assert!(!is_valid_attribute_key("user-name"));
/// ```
pub fn is_valid_attribute_key(key: &str) -> bool {
    match identifier_pattern() {
        Some(re) => re.is_match(key),
        None => {
            let mut chars = key.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
    }
}

/// Validate an attribute key, returning a mapping error if it is unusable.
pub fn validate_attribute_key(key: &str) -> Result<()> {
    if is_valid_attribute_key(key) {
        Ok(())
    } else {
        Err(Error::mapping(
            MappingErrorKind::InvalidProperty,
            format!("'{}' is not a valid attribute key", key),
        ))
    }
}
