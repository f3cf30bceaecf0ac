//! Password policy for password-derived stores.
//!
//! Rules are checked in a fixed order and the first failure is reported,
//! so a UI can show one actionable message at a time.

use thiserror::Error;

/// Minimum length in characters.
pub const MIN_PASSWORD_LEN: usize = 12;

/// Characters that satisfy the special-character rule.
pub const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

const COMMON_PATTERNS: [&str; 4] = ["123456", "password", "qwerty", "admin"];

/// First rule a password breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StrengthViolation {
    /// Fewer than [`MIN_PASSWORD_LEN`] characters.
    #[error("password must be at least {} characters long", MIN_PASSWORD_LEN)]
    TooShort,
    /// No `A-Z`.
    #[error("password must contain an uppercase letter")]
    MissingUppercase,
    /// No `a-z`.
    #[error("password must contain a lowercase letter")]
    MissingLowercase,
    /// No `0-9`.
    #[error("password must contain a digit")]
    MissingDigit,
    /// Nothing from [`SPECIAL_CHARS`].
    #[error("password must contain a special character")]
    MissingSpecial,
    /// Contains a well-known pattern (case-insensitive).
    #[error("password contains the common pattern {0:?}")]
    CommonPattern(&'static str),
}

/// Check `password` against the policy.
///
/// # Errors
///
/// Returns the first [`StrengthViolation`] found.
pub fn validate_password_strength(password: &str) -> Result<(), StrengthViolation> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(StrengthViolation::TooShort);
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(StrengthViolation::MissingUppercase);
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(StrengthViolation::MissingLowercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(StrengthViolation::MissingDigit);
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        return Err(StrengthViolation::MissingSpecial);
    }
    let lowered = password.to_lowercase();
    if let Some(pattern) = COMMON_PATTERNS.into_iter().find(|p| lowered.contains(p)) {
        return Err(StrengthViolation::CommonPattern(pattern));
    }
    Ok(())
}
