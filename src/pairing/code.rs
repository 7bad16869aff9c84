//! Pairing code generation and parsing.
//!
//! Codes are 15 decimal digits drawn from `OsRng`. The stored and compared
//! form is the bare digit string; the display form groups digits in
//! dashed segments of three (`123-456-789-012-345`).

use rand::Rng;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::PairingError;

/// Number of digits in a pairing code.
pub const CODE_LENGTH: usize = 15;

/// Digits per dashed display segment.
const DISPLAY_GROUP: usize = 3;

/// A well-formed pairing code (exactly [`CODE_LENGTH`] ASCII digits).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairingCode(String);

impl PairingCode {
    /// Draw a fresh random code.
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let digits: String = (0..CODE_LENGTH)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();
        Self(digits)
    }

    /// Parse user input. Dashes and whitespace from the display form are
    /// ignored; anything else that is not a digit is rejected.
    pub fn parse(input: &str) -> Result<Self, PairingError> {
        let digits: String = input
            .chars()
            .filter(|c| *c != '-' && !c.is_whitespace())
            .collect();

        if digits.len() != CODE_LENGTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PairingError::InvalidArgument(format!(
                "pairing code must be {} digits",
                CODE_LENGTH
            )));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Dashed form for showing on the child's screen.
    pub fn display_form(&self) -> String {
        self.0
            .as_bytes()
            .chunks(DISPLAY_GROUP)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// Codes are bearer secrets while pending; keep them out of debug output.
impl std::fmt::Debug for PairingCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PairingCode([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_generated_code_is_fifteen_digits() {
        for _ in 0..200 {
            let code = PairingCode::generate();
            assert_eq!(code.as_str().len(), CODE_LENGTH);
            assert!(code.as_str().bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_generated_codes_differ() {
        let codes: HashSet<String> = (0..100)
            .map(|_| PairingCode::generate().as_str().to_string())
            .collect();
        assert_eq!(codes.len(), 100);
    }

    #[test]
    fn test_display_form_groups_by_three() {
        let code = PairingCode::parse("123456789012345").unwrap();
        assert_eq!(code.display_form(), "123-456-789-012-345");
    }

    #[test]
    fn test_parse_accepts_display_form() {
        let code = PairingCode::parse("123-456-789-012-345").unwrap();
        assert_eq!(code.as_str(), "123456789012345");

        let code = PairingCode::parse(" 123 456 789 012 345 ").unwrap();
        assert_eq!(code.as_str(), "123456789012345");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "12345",
            "1234567890123456",
            "12345678901234a",
            "١٢٣٤٥٦٧٨٩٠١٢٣٤٥",
        ] {
            let err = PairingCode::parse(bad).unwrap_err();
            assert!(matches!(err, PairingError::InvalidArgument(_)), "{bad}");
        }
    }

    #[test]
    fn test_debug_redacts_code() {
        let code = PairingCode::parse("123456789012345").unwrap();
        assert!(!format!("{:?}", code).contains("123"));
    }
}
