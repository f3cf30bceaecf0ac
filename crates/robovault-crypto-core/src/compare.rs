//! Constant-time comparison helpers.

/// Compare two byte slices without short-circuiting on the first difference.
///
/// Lengths are compared up front: every caller compares values whose length
/// is public (hash output, OTP digit count).
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// String flavour of [`constant_time_eq`].
#[must_use]
pub fn secure_compare(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}
