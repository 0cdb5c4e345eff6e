//! Secret reference parsing and filename derivation.

use crate::error::StoreError;

/// The scheme prefix of a conventional secret reference.
pub const REFERENCE_SCHEME: &str = "op://";

/// A parsed `op://<vault>/<item>/<field>` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    pub vault: String,
    pub item: String,
    pub field: String,
}

/// Parse a secret reference into its vault, item, and field components.
pub fn parse_reference(reference: &str) -> Result<SecretReference, StoreError> {
    let Some(rest) = reference.strip_prefix(REFERENCE_SCHEME) else {
        return Err(StoreError::InvalidReference {
            reference: reference.to_string(),
            reason: "must start with op://",
        });
    };

    let mut parts = rest.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(vault), Some(item), Some(field))
            if !vault.is_empty() && !item.is_empty() && !field.is_empty() =>
        {
            Ok(SecretReference {
                vault: vault.to_string(),
                item: item.to_string(),
                field: field.to_string(),
            })
        }
        _ => Err(StoreError::InvalidReference {
            reference: reference.to_string(),
            reason: "expected op://vault/item/field",
        }),
    }
}

/// Derive the mount filename for a reference: strip the `op://` scheme and
/// replace path separators with underscores (`op://A/B/C` -> `A_B_C`).
pub fn reference_to_filename(reference: &str) -> String {
    let name = reference
        .strip_prefix(REFERENCE_SCHEME)
        .unwrap_or(reference)
        .replace('/', "_");
    if name.is_empty() {
        ".".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_well_formed_reference() {
        let parsed = parse_reference("op://Private/GitHub/token").unwrap();
        assert_eq!(parsed.vault, "Private");
        assert_eq!(parsed.item, "GitHub");
        assert_eq!(parsed.field, "token");
    }

    #[test]
    fn parse_keeps_extra_segments_in_field() {
        // Section-qualified fields keep their inner slashes.
        let parsed = parse_reference("op://v/i/section/field").unwrap();
        assert_eq!(parsed.field, "section/field");
    }

    #[test]
    fn parse_rejects_missing_scheme() {
        assert!(matches!(
            parse_reference("Private/GitHub/token"),
            Err(StoreError::InvalidReference { .. })
        ));
    }

    #[test]
    fn parse_rejects_short_references() {
        assert!(parse_reference("op://vault/item").is_err());
        assert!(parse_reference("op://").is_err());
        assert!(parse_reference("op://v//f").is_err());
    }

    #[test]
    fn filename_derivation_is_deterministic() {
        assert_eq!(reference_to_filename("op://A/B/C"), "A_B_C");
        assert_eq!(reference_to_filename("op://A/B/C"), "A_B_C");
    }

    #[test]
    fn filename_without_scheme_still_flattens() {
        assert_eq!(reference_to_filename("a/b"), "a_b");
    }
}
