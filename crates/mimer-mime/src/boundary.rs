//! Multipart boundary generation.
//!
//! Boundaries delimit the parts of a multipart body (RFC 2046 section 5.1.1).
//! They are drawn from a cryptographically secure random source so that
//! attacker-controlled body text cannot predict or contain them.

use crate::error::Result;
use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt;
use std::fmt::Write as _;

/// Number of random bytes behind each boundary.
pub const BOUNDARY_ENTROPY_BYTES: usize = 30;

/// Length of a rendered boundary token (two hex digits per byte).
pub const BOUNDARY_LEN: usize = BOUNDARY_ENTROPY_BYTES * 2;

/// Random token delimiting the parts of one multipart level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Boundary(String);

impl Boundary {
    /// Generates a fresh boundary from the operating system's random source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Entropy`](crate::Error::Entropy) if the operating
    /// system cannot supply random bytes.
    pub fn generate() -> Result<Self> {
        Self::generate_with(&mut OsRng)
    }

    /// Generates a boundary from the given random source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Entropy`](crate::Error::Entropy) if the source fails
    /// to fill the entropy buffer.
    pub fn generate_with<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self> {
        let mut bytes = [0u8; BOUNDARY_ENTROPY_BYTES];
        rng.try_fill_bytes(&mut bytes)?;

        let mut token = String::with_capacity(BOUNDARY_LEN);
        for byte in bytes {
            let _ = write!(token, "{byte:02x}");
        }
        Ok(Self(token))
    }

    /// Returns the boundary token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the delimiter line that opens a part: `--<boundary>\r\n`.
    #[must_use]
    pub fn delimiter(&self) -> String {
        format!("--{}\r\n", self.0)
    }

    /// Returns the close-delimiter line that ends the multipart body:
    /// `--<boundary>--\r\n`.
    #[must_use]
    pub fn close_delimiter(&self) -> String {
        format!("--{}--\r\n", self.0)
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Boundary {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::Error;
    use rand::rngs::mock::StepRng;
    use std::collections::HashSet;

    /// Random source that never yields entropy.
    struct ExhaustedRng;

    impl RngCore for ExhaustedRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::other("entropy pool closed")))
        }
    }

    #[test]
    fn test_boundary_format() {
        let boundary = Boundary::generate().unwrap();
        assert_eq!(boundary.as_str().len(), BOUNDARY_LEN);
        assert!(
            boundary
                .as_str()
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        );
    }

    #[test]
    fn test_boundary_uniqueness() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let boundary = Boundary::generate().unwrap();
            assert!(seen.insert(boundary), "duplicate boundary generated");
        }
    }

    #[test]
    fn test_boundary_from_custom_rng() {
        let mut rng = StepRng::new(0, 0);
        let boundary = Boundary::generate_with(&mut rng).unwrap();
        assert_eq!(boundary.as_str(), "0".repeat(BOUNDARY_LEN));
    }

    #[test]
    fn test_entropy_failure() {
        let err = Boundary::generate_with(&mut ExhaustedRng).unwrap_err();
        assert!(matches!(err, Error::Entropy(_)));
        assert!(err.to_string().contains("entropy pool closed"));
    }

    #[test]
    fn test_delimiters() {
        let boundary = Boundary::generate_with(&mut StepRng::new(0, 0)).unwrap();
        let token = boundary.to_string();
        assert_eq!(boundary.delimiter(), format!("--{token}\r\n"));
        assert_eq!(boundary.close_delimiter(), format!("--{token}--\r\n"));
    }
}
