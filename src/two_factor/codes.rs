//! TOTP and backup code primitives.

use anyhow::{Context, Result, anyhow};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use sha2::Sha256;
use subtle::{Choice, ConstantTimeEq};
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const TOTP_DIGITS: usize = 6;
pub const TOTP_PERIOD_SECONDS: u64 = 30;

/// Accepted time steps relative to now: one period either side, no more.
pub const DRIFT_STEPS: [i64; 3] = [-1, 0, 1];

pub const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_BYTES: usize = 4;
const SECRET_BYTES: usize = 32;
const BACKUP_CODE_DOMAIN: &[u8] = b"guardia.backup-code\0";

/// 256-bit TOTP secret from the OS random source.
pub(crate) fn generate_secret() -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; SECRET_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate TOTP secret")?;
    Ok(bytes)
}

/// Build a SHA-1, 6 digit, 30 second TOTP with no built-in skew.
///
/// Drift is applied explicitly through [`DRIFT_STEPS`].
pub(crate) fn build_totp(secret: Vec<u8>, issuer: &str, account: &str) -> Result<TOTP> {
    // otpauth labels use ':' as the issuer separator.
    let account = account.replace(':', "_");
    let issuer = issuer.replace(':', "_");
    TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        0,
        TOTP_PERIOD_SECONDS,
        secret,
        Some(issuer),
        account,
    )
    .map_err(|e| anyhow!("TOTP init error: {e}"))
}

pub(crate) fn decode_secret(secret_base32: &str) -> Result<Vec<u8>> {
    Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| anyhow!("invalid TOTP secret: {e:?}"))
}

/// Check a 6-digit token against the steps around `unix_time`.
///
/// All candidate steps are compared so timing does not reveal which matched.
pub(crate) fn verify_totp_at(secret_base32: &str, token: &str, unix_time: u64) -> bool {
    if token.len() != TOTP_DIGITS || !token.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let Ok(secret) = decode_secret(secret_base32) else {
        return false;
    };
    let Ok(totp) = build_totp(secret, "guardia", "verify") else {
        return false;
    };

    let step = i64::try_from(TOTP_PERIOD_SECONDS).unwrap_or(30);
    let now = i64::try_from(unix_time).unwrap_or(i64::MAX);
    let mut matched = Choice::from(0);
    for offset in DRIFT_STEPS {
        let Some(at) = now
            .checked_add(offset * step)
            .and_then(|at| u64::try_from(at).ok())
        else {
            continue;
        };
        let expected = totp.generate(at);
        matched |= expected.as_bytes().ct_eq(token.as_bytes());
    }
    matched.into()
}

/// Ten fresh codes: 4 random bytes each, upper-case hex.
pub(crate) fn generate_backup_codes() -> Result<Vec<String>> {
    let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
    for _ in 0..BACKUP_CODE_COUNT {
        let mut bytes = [0u8; BACKUP_CODE_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate backup code")?;
        codes.push(hex::encode_upper(bytes));
    }
    Ok(codes)
}

/// HMAC-SHA256 of a normalized backup code under the server key, bound to its owner.
///
/// Codes carry 32 bits of entropy; the key must not be stored next to the digests.
pub(crate) fn hash_backup_code(key: &[u8], user_id: Uuid, code: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key).context("invalid backup code key")?;
    mac.update(BACKUP_CODE_DOMAIN);
    mac.update(user_id.as_bytes());
    mac.update(code.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Strip separators and whitespace, upper-case. `" abcd-1234 "` -> `"ABCD1234"`.
pub(crate) fn normalize_token(input: &str) -> String {
    input
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '-')
        .map(|ch| ch.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";

    fn code_at(unix_time: u64) -> String {
        let totp = build_totp(decode_secret(SECRET).expect("secret"), "guardia", "test")
            .expect("totp");
        totp.generate(unix_time)
    }

    #[test]
    fn totp_accepts_exactly_one_step_of_drift() {
        let t = 1_700_000_010;
        let code = code_at(t);
        assert!(verify_totp_at(SECRET, &code, t));
        assert!(verify_totp_at(SECRET, &code, t - 30));
        assert!(verify_totp_at(SECRET, &code, t + 30));
        assert!(!verify_totp_at(SECRET, &code, t - 60));
        assert!(!verify_totp_at(SECRET, &code, t + 60));
    }

    #[test]
    fn totp_rejects_malformed_tokens() {
        let t = 1_700_000_010;
        assert!(!verify_totp_at(SECRET, "12345", t));
        assert!(!verify_totp_at(SECRET, "12345a", t));
        assert!(!verify_totp_at(SECRET, "", t));
        assert!(!verify_totp_at("not base32 !!", "123456", t));
    }

    #[test]
    fn known_rfc6238_vector() {
        // RFC 6238 SHA-1 seed "12345678901234567890", T = 59 -> 94287082 (8 digits).
        let totp = build_totp(b"12345678901234567890".to_vec(), "guardia", "rfc")
            .expect("totp");
        assert_eq!(totp.generate(59), "287082");
    }

    #[test]
    fn secret_is_256_bits() {
        let secret = generate_secret().expect("secret");
        assert_eq!(secret.len(), 32);
    }

    #[test]
    fn backup_codes_shape() {
        let codes = generate_backup_codes().expect("codes");
        assert_eq!(codes.len(), BACKUP_CODE_COUNT);
        for code in &codes {
            assert_eq!(code.len(), 8);
            assert!(
                code.chars()
                    .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
            );
        }
    }

    #[test]
    fn backup_code_hash_is_keyed_per_user() {
        let user = Uuid::new_v4();
        let hash = hash_backup_code(b"server-key", user, "ABCD1234").expect("hash");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            Some(&hash),
            hash_backup_code(b"server-key", user, "ABCD1234").ok().as_ref()
        );
        assert_ne!(
            Some(&hash),
            hash_backup_code(b"server-key", user, "ABCD1235").ok().as_ref()
        );
        assert_ne!(
            Some(&hash),
            hash_backup_code(b"other-key", user, "ABCD1234").ok().as_ref()
        );
        assert_ne!(
            Some(&hash),
            hash_backup_code(b"server-key", Uuid::new_v4(), "ABCD1234").ok().as_ref()
        );
    }

    #[test]
    fn backup_code_hash_is_not_plain_sha256() {
        use sha2::Digest;
        let plain = hex::encode(Sha256::digest(b"ABCD1234"));
        let keyed = hash_backup_code(b"", Uuid::nil(), "ABCD1234").expect("hash");
        assert_ne!(plain, keyed);
    }

    #[test]
    fn normalize_strips_separators() {
        assert_eq!(normalize_token(" abcd-1234 "), "ABCD1234");
        assert_eq!(normalize_token("123 456"), "123456");
    }

    #[test]
    fn account_label_with_colon_is_accepted() {
        let secret = generate_secret().expect("secret");
        assert!(build_totp(secret, "Guardia", "team:alice@example.com").is_ok());
    }
}
