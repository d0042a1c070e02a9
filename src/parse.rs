//! Parsing helpers for front-end input.
//!
//! A debugger command line hands us addresses, register values, and byte
//! vectors as text. Every parser here accepts a value only when the whole
//! input participates in it; trailing junk is a failure, not a truncation.

use std::num::ParseIntError;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Integer types parseable with an explicit radix.
pub trait Integral: Sized {
    fn from_str_radix(text: &str, radix: u32) -> std::result::Result<Self, ParseIntError>;
}

macro_rules! impl_integral {
    ($($ty:ty),*) => {
        $(
            impl Integral for $ty {
                fn from_str_radix(
                    text: &str,
                    radix: u32,
                ) -> std::result::Result<Self, ParseIntError> {
                    <$ty>::from_str_radix(text, radix)
                }
            }
        )*
    };
}

impl_integral!(u8, u16, u32, u64, i8, i16, i32, i64);

/// Parses an integer in the given radix. A `0x` prefix is accepted (and
/// required to be followed by digits) when the radix is 16.
pub fn to_integral<I: Integral>(text: &str, radix: u32) -> Option<I> {
    let digits = if radix == 16 {
        text.strip_prefix("0x").unwrap_or(text)
    } else {
        text
    };

    I::from_str_radix(digits, radix).ok()
}

/// Parses a floating-point value, requiring the full input to participate.
pub fn to_float<F: FromStr>(text: &str) -> Option<F> {
    text.parse().ok()
}

/// Parses a byte vector of the form `[0xff,0x00,0x2a]`.
pub fn parse_vector(text: &str) -> Result<Vec<u8>> {
    let invalid = || Error::usage("Invalid format");

    let body = text
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(invalid)?;

    if body.is_empty() {
        return Ok(Vec::new());
    }

    body.split(',')
        .map(|elem| {
            if elem.len() != 4 || !elem.starts_with("0x") {
                return Err(invalid());
            }
            to_integral::<u8>(elem, 16).ok_or_else(invalid)
        })
        .collect()
}

/// Parses a byte vector that must contain exactly `N` elements.
pub fn parse_vector_fixed<const N: usize>(text: &str) -> Result<[u8; N]> {
    let bytes = parse_vector(text)?;
    bytes
        .try_into()
        .map_err(|_| Error::usage("Invalid format"))
}
