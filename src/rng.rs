//! Injected randomness seam.
//!
//! OTP codes and challenge nonces come through [`SecureRng`] so tests can
//! substitute a deterministic sequence. Production uses the OS CSPRNG.

use rand::Rng;
use rand::rngs::OsRng;

/// Source of security-sensitive random values.
pub trait SecureRng: Send + Sync {
    /// 6-digit one-time code, zero-padded ("042917").
    fn otp_code(&self) -> String;

    /// Challenge nonce: random UUID joined with the issue timestamp.
    /// The timestamp makes replayed nonces visibly stale in logs.
    fn challenge_nonce(&self) -> String;
}

/// OS-backed CSPRNG implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSecureRng;

impl SecureRng for OsSecureRng {
    fn otp_code(&self) -> String {
        let n: u32 = OsRng.gen_range(0..1_000_000);
        format!("{:06}", n)
    }

    fn challenge_nonce(&self) -> String {
        format!(
            "{}:{}",
            uuid::Uuid::new_v4(),
            chrono::Utc::now().timestamp_millis()
        )
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otp_code_is_six_digits() {
        let rng = OsSecureRng;
        for _ in 0..50 {
            let code = rng.otp_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_nonce_carries_timestamp() {
        let rng = OsSecureRng;
        let nonce = rng.challenge_nonce();
        let (uuid_part, ts_part) = nonce.split_once(':').unwrap();
        assert!(uuid::Uuid::parse_str(uuid_part).is_ok());
        assert!(ts_part.parse::<i64>().unwrap() > 0);
    }

    #[test]
    fn test_seq_rng_replays_script() {
        let rng = testing::SeqRng::new(vec!["111111", "222222"], vec!["n1"]);
        assert_eq!(rng.otp_code(), "111111");
        assert_eq!(rng.otp_code(), "222222");
        assert_eq!(rng.otp_code(), "222222");
        assert_eq!(rng.challenge_nonce(), "n1");
    }
}
