//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted round identifier.
pub const MAX_ROUND_ID_LEN: usize = 64;

/// Validates that a round ID is non-empty and made of ASCII letters, digits,
/// `-` and `_` only.
///
/// # Examples
///
/// ```ignore
/// validate_round_id("3f2c9a6e-1b7d-4c1e-9f3a-0d5e8b2a7c41") // Ok
/// validate_round_id("round_42")                             // Ok
/// validate_round_id("round 42")                             // Err - space
/// ```
pub fn validate_round_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_ROUND_ID_LEN {
        let mut err = ValidationError::new("round_id_length");
        err.message = Some(
            format!(
                "Round ID must be between 1 and {MAX_ROUND_ID_LEN} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        let mut err = ValidationError::new("round_id_format");
        err.message = Some("Round ID may only contain letters, digits, '-' and '_'".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_round_id_valid() {
        assert!(validate_round_id("3f2c9a6e-1b7d-4c1e-9f3a-0d5e8b2a7c41").is_ok());
        assert!(validate_round_id("round_42").is_ok());
        assert!(validate_round_id("A").is_ok());
    }

    #[test]
    fn test_validate_round_id_invalid_length() {
        assert!(validate_round_id("").is_err());
        assert!(validate_round_id(&"a".repeat(MAX_ROUND_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_round_id_invalid_format() {
        assert!(validate_round_id("round 42").is_err()); // space
        assert!(validate_round_id("round/42").is_err()); // slash
        assert!(validate_round_id("раунд").is_err()); // non-ascii
        assert!(validate_round_id("r1;drop").is_err());
    }
}
