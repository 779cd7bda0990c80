//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates a chat message after trimming: non-empty and at most `max_chars` characters.
///
/// # Examples
///
/// ```ignore
/// validate_chat_message("gl hf", 500)  // Ok
/// validate_chat_message("   ", 500)    // Err - blank
/// ```
pub fn validate_chat_message(message: &str, max_chars: usize) -> Result<(), ValidationError> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("chat_blank");
        err.message = Some("Chat message must not be blank".into());
        return Err(err);
    }

    let length = trimmed.chars().count();
    if length > max_chars {
        let mut err = ValidationError::new("chat_length");
        err.message = Some(
            format!("Chat message must be at most {max_chars} characters (got {length})").into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Validates a username reference coming from a header or socket message.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() || username.len() > 64 {
        let mut err = ValidationError::new("username_length");
        err.message = Some("Username must be between 1 and 64 bytes".into());
        return Err(err);
    }

    if username.chars().any(|c| c.is_control() || c.is_whitespace()) {
        let mut err = ValidationError::new("username_format");
        err.message = Some("Username must not contain whitespace or control characters".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_valid() {
        assert!(validate_chat_message("gl hf", 500).is_ok());
        assert!(validate_chat_message("  padded  ", 6).is_ok());
    }

    #[test]
    fn chat_message_invalid() {
        assert!(validate_chat_message("", 500).is_err());
        assert!(validate_chat_message(" \n\t", 500).is_err());
        assert!(validate_chat_message("toolong", 3).is_err());
    }

    #[test]
    fn username_rules() {
        assert!(validate_username("alice_42").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username(&"x".repeat(65)).is_err());
    }
}
