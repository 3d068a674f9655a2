//! `pg_lsn` codec.
//!
//! A WAL location is printed by `PostgreSQL` as two hexadecimal halves,
//! `HI/LO`, each at most 32 bits wide. The byte offset it denotes is
//! `HI << 32 | LO`, which covers the whole `u64` range
//! (`0/0` .. `FFFFFFFF/FFFFFFFF`).

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SUPPORTED_RANGE: &str = "supported values are between 0/0 and FFFFFFFF/FFFFFFFF";

/// A write-ahead log location as an absolute byte offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(u64);

/// Returned when a `pg_lsn` string cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed wal position `{input}`: {reason}, {SUPPORTED_RANGE}")]
pub struct MalformedPosition {
    input: String,
    reason: &'static str,
}

impl MalformedPosition {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }

    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }
}

impl Lsn {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    #[must_use]
    pub const fn from_u64(bytes: u64) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Bytes between `self` and an earlier location, or zero when `other` is
    /// ahead of `self`.
    #[must_use]
    pub const fn bytes_since(self, other: Self) -> u64 {
        self.0.saturating_sub(other.0)
    }

    /// Parse the textual `HI/LO` form. An empty string is read as `0/0`.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedPosition`] when the text is not two `/`-separated
    /// hexadecimal components or a component does not fit in 32 bits.
    pub fn parse(text: &str) -> Result<Self, MalformedPosition> {
        let text = if text.is_empty() { "0/0" } else { text };

        let mut parts = text.splitn(3, '/');
        let (Some(hi), Some(lo), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(MalformedPosition::new(text, "expected two parts separated by '/'"));
        };

        let hi = parse_component(text, hi, Part::High)?;
        let lo = parse_component(text, lo, Part::Low)?;

        Ok(Self((u64::from(hi) << 32) | u64::from(lo)))
    }
}

/// Which half of `HI/LO` is being decoded, for error messages.
#[derive(Clone, Copy)]
enum Part {
    High,
    Low,
}

fn parse_component(text: &str, component: &str, part: Part) -> Result<u32, MalformedPosition> {
    // from_str_radix tolerates a leading '+', pg_lsn does not
    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_hexdigit()) {
        let reason = match part {
            Part::High => "first part is not hexadecimal",
            Part::Low => "second part is not hexadecimal",
        };
        return Err(MalformedPosition::new(text, reason));
    }

    u32::from_str_radix(component, 16).map_err(|_| {
        let reason = match part {
            Part::High => "first part exceeds 32 bits",
            Part::Low => "second part exceeds 32 bits",
        };
        MalformedPosition::new(text, reason)
    })
}

impl FromStr for Lsn {
    type Err = MalformedPosition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & u64::from(u32::MAX))
    }
}

impl From<Lsn> for u64 {
    fn from(lsn: Lsn) -> Self {
        lsn.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_known_positions() {
        // SELECT '<lsn>'::pg_lsn - '0/0'
        let cases = [
            ("0/0", 0),
            ("0/189B2E78", 412_823_160),
            ("0/90000A0", 150_995_104),
            ("0/FFFFFFFF", 4_294_967_295),
            ("7/A25801C8", 32_788_447_688),
            ("FFFFFFFF/0", 18_446_744_069_414_584_320),
            ("FFFFFFFF/FFFFFFFF", u64::MAX),
        ];

        for (text, expected) in cases {
            assert_eq!(Lsn::parse(text).map(Lsn::as_u64), Ok(expected), "{text}");
        }
    }

    #[test]
    fn test_parse_empty_is_zero() {
        assert_eq!(Lsn::parse(""), Ok(Lsn::ZERO));
    }

    #[test]
    fn test_parse_accepts_lowercase_and_leading_zeros() {
        assert_eq!(Lsn::parse("00000000/0000ff"), Ok(Lsn::from_u64(0xff)));
        assert_eq!(Lsn::parse("a/b"), Ok(Lsn::from_u64((0xa << 32) | 0xb)));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in [
            "notvalid",
            "1/2/3",
            "G/0",
            "0/G",
            "/0",
            "0/",
            "/",
            "+1/0",
            "0/-1",
            " 0/0",
            "100000000/0",
            "0/100000000",
            "FFFFFFFFFFFFFFFFF/0",
        ] {
            let err = Lsn::parse(text);
            assert!(err.is_err(), "{text} should be rejected");
            assert!(
                matches!(err, Err(ref e) if e.input() == text),
                "error should carry the input for {text}"
            );
        }
    }

    #[test]
    fn test_overflow_message_names_the_part() {
        let Err(err) = Lsn::parse("0/100000000") else {
            unreachable!("overflowing component must be rejected");
        };
        assert!(err.to_string().contains("second part exceeds 32 bits"));
    }

    #[test]
    fn test_display_is_uppercase_unpadded() {
        assert_eq!(Lsn::from_u64(0).to_string(), "0/0");
        assert_eq!(Lsn::from_u64(412_823_160).to_string(), "0/189B2E78");
        assert_eq!(Lsn::from_u64(32_788_447_688).to_string(), "7/A25801C8");
        assert_eq!(Lsn::MAX.to_string(), "FFFFFFFF/FFFFFFFF");
    }

    #[test]
    fn test_format_then_parse_preserves_value() {
        let samples = [
            0,
            1,
            u64::from(u32::MAX),
            u64::from(u32::MAX) + 1,
            0x0000_0016_B374_D848,
            0xFFFF_FFFF_0000_0000,
            0x8000_0000_8000_0000,
            u64::MAX - 1,
            u64::MAX,
        ];

        for v in samples {
            let lsn = Lsn::from_u64(v);
            assert_eq!(lsn.to_string().parse::<Lsn>(), Ok(lsn), "{v:#x}");
        }
    }

    proptest! {
        #[test]
        fn test_format_then_parse_holds_for_any_value(v in any::<u64>()) {
            let lsn = Lsn::from_u64(v);
            prop_assert_eq!(lsn.to_string().parse::<Lsn>(), Ok(lsn));
        }

        #[test]
        fn test_parse_combines_both_halves(hi in any::<u32>(), lo in any::<u32>()) {
            let expected = (u64::from(hi) << 32) | u64::from(lo);
            prop_assert_eq!(Lsn::parse(&format!("{hi:X}/{lo:x}")).map(Lsn::as_u64), Ok(expected));
        }
    }

    #[test]
    fn test_bytes_since_saturates() {
        let ahead = Lsn::from_u64(10);
        let behind = Lsn::from_u64(4);
        assert_eq!(ahead.bytes_since(behind), 6);
        assert_eq!(behind.bytes_since(ahead), 0);
        assert_eq!(Lsn::MAX.bytes_since(Lsn::ZERO), u64::MAX);
    }
}
