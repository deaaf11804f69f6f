//! Hardware (MAC) address parsing
//!
//! Addresses are accepted in the common textual forms and normalized to the
//! raw 6 bytes used to build wake packets:
//! - `aa:bb:cc:dd:ee:ff`
//! - `aa-bb-cc-dd-ee-ff`
//! - `aabb.ccdd.eeff`
//! - `aabbccddeeff`

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Delimiters stripped before decoding
const DELIMITERS: [char; 3] = [':', '-', '.'];

/// Errors produced when parsing a hardware address
#[derive(Debug, Error, PartialEq)]
pub enum MacAddrError {
    #[error("mac should be 12 hex chars, got {input:?} ({len} after removing delimiters)")]
    InvalidLength { input: String, len: usize },

    #[error("invalid mac {input:?}: {source}")]
    InvalidHex {
        input: String,
        #[source]
        source: hex::FromHexError,
    },
}

/// A 6-byte link-layer hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddr {
    type Err = MacAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean: String = s.trim().chars().filter(|c| !DELIMITERS.contains(c)).collect();

        if clean.len() != 12 {
            return Err(MacAddrError::InvalidLength {
                input: s.to_string(),
                len: clean.len(),
            });
        }

        let mut bytes = [0u8; 6];
        hex::decode_to_slice(&clean, &mut bytes).map_err(|source| MacAddrError::InvalidHex {
            input: s.to_string(),
            source,
        })?;

        Ok(Self(bytes))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPECTED: [u8; 6] = [0xaa, 0xbb, 0xcc, 0x01, 0x02, 0x03];

    #[test]
    fn test_parse_all_delimiter_styles() {
        for input in [
            "aa:bb:cc:01:02:03",
            "AA-BB-CC-01-02-03",
            "aabb.cc01.0203",
            "aabbcc010203",
            "  aa:bb:cc:01:02:03\n",
        ] {
            let mac: MacAddr = input.parse().unwrap();
            assert_eq!(mac.octets(), EXPECTED, "input {:?}", input);
        }
    }

    #[test]
    fn test_mixed_delimiters_are_stripped() {
        let mac: MacAddr = "aa:bb-cc.01:02-03".parse().unwrap();
        assert_eq!(mac.octets(), EXPECTED);
    }

    #[test]
    fn test_rejects_wrong_length() {
        for input in ["", "aa:bb:cc:dd:ee", "aa:bb:cc:dd:ee:ff:00", "aabbccddeef"] {
            let err = input.parse::<MacAddr>().unwrap_err();
            assert!(
                matches!(err, MacAddrError::InvalidLength { .. }),
                "input {:?} gave {:?}",
                input,
                err
            );
        }
    }

    #[test]
    fn test_rejects_non_hex() {
        let err = "zz:bb:cc:dd:ee:ff".parse::<MacAddr>().unwrap_err();
        assert!(matches!(err, MacAddrError::InvalidHex { .. }));
    }

    #[test]
    fn test_other_delimiters_count_toward_length() {
        let err = "aa bb cc dd ee ff".parse::<MacAddr>().unwrap_err();
        assert_eq!(
            err,
            MacAddrError::InvalidLength {
                input: "aa bb cc dd ee ff".to_string(),
                len: 17,
            }
        );
    }

    #[test]
    fn test_display_roundtrips_to_colon_form() {
        let mac = MacAddr::new(EXPECTED);
        assert_eq!(mac.to_string(), "aa:bb:cc:01:02:03");
    }
}
