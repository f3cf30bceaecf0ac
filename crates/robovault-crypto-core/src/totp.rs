//! RFC 4226 HOTP / RFC 6238 TOTP engine plus authenticator-app plumbing.
//!
//! Codes are computed with `ring::hmac` (SHA1, SHA256, SHA512). Secrets are
//! exchanged as unpadded RFC 4648 base32, which is what authenticator apps
//! expect in an `otpauth://` URI.

use std::fmt::Write as _;

use data_encoding::BASE32_NOPAD;
use rand::rngs::OsRng;
use rand::RngCore;
use ring::hmac;
use zeroize::Zeroize;

use crate::compare::constant_time_eq;
use crate::error::CryptoError;
use crate::memory::SecretBuffer;

// ── Constants ───────────────────────────────────────────────────────

/// Default time step in seconds.
pub const DEFAULT_PERIOD: u32 = 30;

/// Default tolerance in steps on either side of the current one.
pub const DEFAULT_WINDOW: u32 = 1;

/// Raw secret length for new enrollments (160 bits, RFC 4226 §4 R6).
pub const SECRET_LEN: usize = 20;

// ── Types ───────────────────────────────────────────────────────────

/// HMAC algorithm used for OTP generation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OtpAlgorithm {
    /// HMAC-SHA1, what every authenticator app supports.
    #[default]
    Sha1,
    /// HMAC-SHA256.
    Sha256,
    /// HMAC-SHA512.
    Sha512,
}

impl OtpAlgorithm {
    fn ring_algorithm(self) -> hmac::Algorithm {
        match self {
            Self::Sha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => hmac::HMAC_SHA256,
            Self::Sha512 => hmac::HMAC_SHA512,
        }
    }

    /// Name used in the `algorithm=` URI parameter.
    #[must_use]
    pub const fn uri_name(self) -> &'static str {
        match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }
}

/// Code length.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OtpDigits {
    /// 6 digits.
    #[default]
    Six,
    /// 8 digits.
    Eight,
}

impl OtpDigits {
    /// Numeric digit count.
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::Six => 6,
            Self::Eight => 8,
        }
    }

    const fn modulus(self) -> u32 {
        match self {
            Self::Six => 1_000_000,
            Self::Eight => 100_000_000,
        }
    }
}

// ── HOTP ────────────────────────────────────────────────────────────

/// HOTP code for `counter`, zero-padded to the digit count.
///
/// # Errors
///
/// Returns `CryptoError::Otp` if the secret is empty.
pub fn generate_hotp(
    secret: &[u8],
    counter: u64,
    digits: OtpDigits,
    algorithm: OtpAlgorithm,
) -> Result<String, CryptoError> {
    if secret.is_empty() {
        return Err(CryptoError::Otp("secret must not be empty".to_owned()));
    }

    let key = hmac::Key::new(algorithm.ring_algorithm(), secret);
    let tag = hmac::sign(&key, &counter.to_be_bytes());
    let mac = tag.as_ref();

    // Dynamic truncation: low nibble of the last byte picks a 31-bit window.
    let offset = usize::from(mac[mac.len().saturating_sub(1)] & 0x0F);
    let window = mac
        .get(offset..offset.saturating_add(4))
        .ok_or_else(|| CryptoError::Otp("HMAC output too short".to_owned()))?;
    let binary = u32::from_be_bytes([window[0] & 0x7F, window[1], window[2], window[3]]);

    // modulus is a non-zero constant
    #[allow(clippy::arithmetic_side_effects)]
    let code = binary % digits.modulus();
    let width = usize::from(digits.value());
    Ok(format!("{code:0>width$}"))
}

// ── TOTP ────────────────────────────────────────────────────────────

fn time_step(time: u64, period: u32) -> Result<u64, CryptoError> {
    if period == 0 {
        return Err(CryptoError::Otp("period must be > 0".to_owned()));
    }
    // period checked above
    #[allow(clippy::arithmetic_side_effects)]
    let step = time / u64::from(period);
    Ok(step)
}

/// TOTP code for Unix time `time`.
///
/// # Errors
///
/// Returns `CryptoError::Otp` if `period` is 0 or the secret is empty.
pub fn generate_totp(
    secret: &[u8],
    time: u64,
    digits: OtpDigits,
    period: u32,
    algorithm: OtpAlgorithm,
) -> Result<String, CryptoError> {
    generate_hotp(secret, time_step(time, period)?, digits, algorithm)
}

/// Check `code` against every step in `[T - window, T + window]`.
///
/// Every candidate in the window is computed and compared in constant time,
/// so the running time does not reveal which step matched.
///
/// # Errors
///
/// Returns `CryptoError::Otp` if `period` is 0 or the secret is empty.
pub fn validate_totp(
    secret: &[u8],
    time: u64,
    code: &str,
    digits: OtpDigits,
    period: u32,
    algorithm: OtpAlgorithm,
    window: u32,
) -> Result<bool, CryptoError> {
    let current = time_step(time, period)?;
    let first = current.saturating_sub(u64::from(window));
    let last = current.saturating_add(u64::from(window));

    let code = code.trim();
    let mut matched = false;
    for step in first..=last {
        let expected = generate_hotp(secret, step, digits, algorithm)?;
        matched |= constant_time_eq(expected.as_bytes(), code.as_bytes());
    }
    Ok(matched)
}

// ── Secrets and provisioning ────────────────────────────────────────

/// Fresh 160-bit secret as unpadded base32.
///
/// # Errors
///
/// Returns `CryptoError::SecureMemory` if the CSPRNG fails.
pub fn generate_secret() -> Result<String, CryptoError> {
    let mut raw = [0u8; SECRET_LEN];
    OsRng
        .try_fill_bytes(&mut raw)
        .map_err(|e| CryptoError::SecureMemory(format!("CSPRNG fill failed: {e}")))?;
    let encoded = BASE32_NOPAD.encode(&raw);
    raw.zeroize();
    Ok(encoded)
}

/// Decode a base32 secret as typed or pasted by a user.
///
/// Lowercase, embedded whitespace and trailing `=` padding are accepted.
///
/// # Errors
///
/// Returns `CryptoError::Otp` if the text is empty or not base32.
pub fn decode_secret(secret: &str) -> Result<SecretBuffer, CryptoError> {
    let mut normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let trimmed_len = normalized.trim_end_matches('=').len();
    normalized.truncate(trimmed_len);

    if normalized.is_empty() {
        return Err(CryptoError::Otp("secret must not be empty".to_owned()));
    }
    let decoded = BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|e| CryptoError::Otp(format!("secret is not base32: {e}")));
    normalized.zeroize();
    Ok(SecretBuffer::from_vec(decoded?))
}

/// `otpauth://` enrollment URI for a SHA1 / 6-digit / 30 s account.
///
/// Label and issuer are percent-encoded; the base32 secret is URI-safe as is.
#[must_use]
pub fn provisioning_uri(secret: &str, account: &str, issuer: &str) -> String {
    let issuer = percent_encode(issuer);
    format!(
        "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}&algorithm={alg}&digits={digits}&period={DEFAULT_PERIOD}",
        account = percent_encode(account),
        alg = OtpAlgorithm::Sha1.uri_name(),
        digits = OtpDigits::Six.value(),
    )
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4226 Appendix D: ASCII "12345678901234567890", SHA1, 6 digits.
    const HOTP_SECRET: &[u8] = b"12345678901234567890";
    const HOTP_CODES: [&str; 10] = [
        "755224", "287082", "359152", "969429", "338314", "254676", "287922", "162583", "399871",
        "520489",
    ];

    // RFC 6238 Appendix B: time, SHA1, SHA256, SHA512 (8 digits).
    const TOTP_TABLE: [(u64, &str, &str, &str); 6] = [
        (59, "94287082", "46119246", "90693936"),
        (1_111_111_109, "07081804", "68084774", "25091201"),
        (1_111_111_111, "14050471", "67062674", "99943326"),
        (1_234_567_890, "89005924", "91819424", "93441116"),
        (2_000_000_000, "69279037", "90698825", "38618901"),
        (20_000_000_000, "65353130", "77737706", "47863826"),
    ];
    const SHA256_SECRET: &[u8] = b"12345678901234567890123456789012";
    const SHA512_SECRET: &[u8] =
        b"1234567890123456789012345678901234567890123456789012345678901234";

    #[test]
    fn hotp_matches_published_codes() {
        for (counter, expected) in (0u64..).zip(HOTP_CODES) {
            let code = generate_hotp(HOTP_SECRET, counter, OtpDigits::Six, OtpAlgorithm::Sha1)
                .unwrap();
            assert_eq!(code, expected, "counter {counter}");
        }
    }

    #[test]
    fn totp_matches_published_codes_for_all_algorithms() {
        for (time, sha1, sha256, sha512) in TOTP_TABLE {
            let cases = [
                (HOTP_SECRET, OtpAlgorithm::Sha1, sha1),
                (SHA256_SECRET, OtpAlgorithm::Sha256, sha256),
                (SHA512_SECRET, OtpAlgorithm::Sha512, sha512),
            ];
            for (secret, algorithm, expected) in cases {
                let code = generate_totp(secret, time, OtpDigits::Eight, 30, algorithm).unwrap();
                assert_eq!(code, expected, "{algorithm:?} at t={time}");
            }
        }
    }

    fn check(time: u64, code: &str, window: u32) -> bool {
        validate_totp(
            HOTP_SECRET,
            time,
            code,
            OtpDigits::Six,
            30,
            OtpAlgorithm::Sha1,
            window,
        )
        .unwrap()
    }

    #[test]
    fn window_tolerates_one_step_of_drift() {
        let t = 1_234_567_890;
        let code = generate_totp(HOTP_SECRET, t, OtpDigits::Six, 30, OtpAlgorithm::Sha1).unwrap();
        assert!(check(t, &code, 1));
        assert!(check(t + 30, &code, 1));
        assert!(check(t - 30, &code, 1));
        assert!(!check(t + 60, &code, 1));
        assert!(!check(t - 60, &code, 1));
    }

    #[test]
    fn zero_window_only_accepts_current_step() {
        let t = 1_234_567_890;
        let code = generate_totp(HOTP_SECRET, t, OtpDigits::Six, 30, OtpAlgorithm::Sha1).unwrap();
        assert!(check(t, &code, 0));
        assert!(!check(t + 30, &code, 0));
    }

    #[test]
    fn validation_at_epoch_does_not_wrap() {
        let code = generate_totp(HOTP_SECRET, 0, OtpDigits::Six, 30, OtpAlgorithm::Sha1).unwrap();
        assert!(check(0, &code, 1));
    }

    #[test]
    fn malformed_codes_rejected() {
        assert!(!check(1_234_567_890, "12345", 1));
        assert!(!check(1_234_567_890, "", 1));
        assert!(!check(1_234_567_890, "abcdef", 1));
    }

    #[test]
    fn surrounding_whitespace_in_code_is_ignored() {
        let t = 1_234_567_890;
        let code = generate_totp(HOTP_SECRET, t, OtpDigits::Six, 30, OtpAlgorithm::Sha1).unwrap();
        assert!(check(t, &format!(" {code}\n"), 1));
    }

    #[test]
    fn codes_keep_leading_zeros() {
        let padded = (0u64..10_000)
            .map(|c| generate_hotp(HOTP_SECRET, c, OtpDigits::Six, OtpAlgorithm::Sha1).unwrap())
            .find(|code| code.starts_with('0'))
            .unwrap();
        assert_eq!(padded.len(), 6);
    }

    #[test]
    fn bad_inputs_are_otp_errors() {
        assert!(matches!(
            generate_hotp(&[], 0, OtpDigits::Six, OtpAlgorithm::Sha1),
            Err(CryptoError::Otp(_))
        ));
        assert!(matches!(
            generate_totp(b"k", 100, OtpDigits::Six, 0, OtpAlgorithm::Sha1),
            Err(CryptoError::Otp(_))
        ));
        assert!(matches!(
            validate_totp(b"k", 100, "000000", OtpDigits::Six, 0, OtpAlgorithm::Sha1, 1),
            Err(CryptoError::Otp(_))
        ));
    }

    #[test]
    fn generated_secret_is_32_base32_chars() {
        let secret = generate_secret().unwrap();
        assert_eq!(secret.len(), 32);
        assert!(secret
            .chars()
            .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c)));
        assert_eq!(decode_secret(&secret).unwrap().len(), SECRET_LEN);
        assert_ne!(secret, generate_secret().unwrap());
    }

    #[test]
    fn decode_accepts_user_formatting() {
        // base32("12345678901234567890")
        let canonical = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";
        let typed = "gezd gnbv gy3t qojq gezd gnbv gy3t qojq";
        assert_eq!(decode_secret(canonical).unwrap().expose(), HOTP_SECRET);
        assert_eq!(decode_secret(typed).unwrap().expose(), HOTP_SECRET);
        assert_eq!(decode_secret("MZXW6===").unwrap().expose(), b"foo");
    }

    #[test]
    fn decode_rejects_non_base32() {
        assert!(decode_secret("").is_err());
        assert!(decode_secret("   ").is_err());
        assert!(decode_secret("GEZD1!").is_err());
    }

    #[test]
    fn provisioning_uri_shape() {
        let uri = provisioning_uri("JBSWY3DPEHPK3PXP", "admin@host", "RoboBackup Tool");
        assert_eq!(
            uri,
            "otpauth://totp/RoboBackup%20Tool:admin%40host?secret=JBSWY3DPEHPK3PXP\
             &issuer=RoboBackup%20Tool&algorithm=SHA1&digits=6&period=30"
        );
    }

    #[test]
    fn percent_encoding_covers_reserved_characters() {
        assert_eq!(percent_encode("a-b.c_d~e"), "a-b.c_d~e");
        assert_eq!(percent_encode("a:b/c?d&e"), "a%3Ab%2Fc%3Fd%26e");
        assert_eq!(percent_encode("é"), "%C3%A9");
    }
}
