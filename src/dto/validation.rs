//! Validation helpers for DTOs.

use validator::ValidationError;

const MIN_CODE_LEN: usize = 4;
const MAX_CODE_LEN: usize = 16;

/// Validates that a join code is 4 to 16 ASCII letters or digits, surrounding
/// whitespace ignored.
///
/// # Examples
///
/// ```ignore
/// validate_join_code("AB12CD") // Ok
/// validate_join_code(" ab12cd ") // Ok - case and padding are normalized later
/// validate_join_code("AB-12") // Err - punctuation
/// ```
pub fn validate_join_code(code: &str) -> Result<(), ValidationError> {
    let code = code.trim();
    let len = code.chars().count();
    if !(MIN_CODE_LEN..=MAX_CODE_LEN).contains(&len) {
        let mut err = ValidationError::new("join_code_length");
        err.message = Some(
            format!("Join code must be {MIN_CODE_LEN} to {MAX_CODE_LEN} characters (got {len})")
                .into(),
        );
        return Err(err);
    }

    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        let mut err = ValidationError::new("join_code_format");
        err.message = Some("Join code must contain only letters and digits".into());
        return Err(err);
    }

    Ok(())
}

/// Canonical form of a join code: trimmed and uppercased.
pub fn normalize_join_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_join_code_valid() {
        assert!(validate_join_code("AB12CD").is_ok());
        assert!(validate_join_code("abcd").is_ok());
        assert!(validate_join_code("  XY98ZT  ").is_ok());
        assert!(validate_join_code("0123456789ABCDEF").is_ok());
    }

    #[test]
    fn test_validate_join_code_invalid_length() {
        assert!(validate_join_code("ABC").is_err()); // too short
        assert!(validate_join_code("0123456789ABCDEFG").is_err()); // too long
        assert!(validate_join_code("   ").is_err()); // blank
    }

    #[test]
    fn test_validate_join_code_invalid_format() {
        assert!(validate_join_code("AB-12").is_err());
        assert!(validate_join_code("AB 12").is_err());
        assert!(validate_join_code("ÉCOLE1").is_err());
    }

    #[test]
    fn test_normalize_join_code() {
        assert_eq!(normalize_join_code(" ab12cd\n"), "AB12CD");
    }
}
