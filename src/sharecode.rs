//! Sharecode codec.
//!
//! A sharecode packs a match id, an outcome id and a token id into 25 glyphs
//! drawn from a 57-symbol alphabet. Decoding folds the reversed glyphs into a
//! base-57 integer, lays that integer out as an 18-byte big-endian buffer and
//! slices the three fields out of it.
//!
//! The largest 25-glyph values need more than 144 bits, so the fold runs on a
//! 19-byte accumulator and the result is reduced modulo `256^18` before the
//! fields are read.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ShareCodeError;

/// Glyph order is significant: a glyph's index is its base-57 digit value.
pub const ALPHABET: &[u8; 57] = b"ABCDEFGHJKLMNOPQRSTUVWXYZabcdefhijkmnopqrstuvwxyz23456789";
pub const PREFIX: &str = "CSGO";
pub const SIGNIFICANT_LEN: usize = 25;
pub const DEFAULT_CDN_TEMPLATE: &str = "https://replay{shard}.valve.net/730";

const BASE: u32 = 57;
const FIELD_BYTES: usize = 18;
const ACCUMULATOR_BYTES: usize = FIELD_BYTES + 1;
const GROUP_LEN: usize = 5;

static SHARECODE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^CSGO(-[ABCDEFGHJKLMNOPQRSTUVWXYZabcdefhijkmnopqrstuvwxyz23456789]{5}){5}$",
    )
    .expect("sharecode pattern is a valid regex")
});

/// The three fields carried by a sharecode.
///
/// Also serves as the de-duplication key for a specific match outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecodedShareCode {
    pub match_id: u64,
    pub outcome_id: u64,
    pub token_id: u16,
}

/// A sharecode in canonical `CSGO-XXXXX-XXXXX-XXXXX-XXXXX-XXXXX` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ShareCode(String);

impl ShareCode {
    /// Validate user input against the canonical pattern.
    pub fn parse(input: &str) -> Result<Self, ShareCodeError> {
        let input = input.trim();
        if SHARECODE_PATTERN.is_match(input) {
            return Ok(Self(input.to_string()));
        }

        // Surface the most specific reason the glyphs themselves are wrong,
        // otherwise the grouping is.
        significant_digits(input)?;
        Err(ShareCodeError::InvalidFormat(format!(
            "expected {}-XXXXX-XXXXX-XXXXX-XXXXX-XXXXX, got {:?}",
            PREFIX, input
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn decode(&self) -> DecodedShareCode {
        // The pattern admits exactly 25 alphabet glyphs, so this cannot fail.
        match significant_digits(&self.0) {
            Ok(digits) => fold_digits(&digits),
            Err(_) => unreachable!("validated sharecode failed to decode"),
        }
    }
}

impl fmt::Display for ShareCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ShareCode {
    type Err = ShareCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ShareCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Decode a sharecode token into its three fields.
///
/// The prefix and every `-` separator are ignored; what remains must be
/// exactly 25 alphabet glyphs.
pub fn decode(token: &str) -> Result<DecodedShareCode, ShareCodeError> {
    let digits = significant_digits(token)?;
    Ok(fold_digits(&digits))
}

/// Encode the three fields back into canonical sharecode form.
pub fn encode(decoded: &DecodedShareCode) -> String {
    let mut value = [0u8; FIELD_BYTES];
    value[0..8].copy_from_slice(&decoded.match_id.to_be_bytes());
    value[8..16].copy_from_slice(&decoded.outcome_id.to_be_bytes());
    value[16..18].copy_from_slice(&decoded.token_id.to_be_bytes());

    // 256^18 < 57^25, so 25 digits always exhaust the value.
    let glyphs: Vec<char> = (0..SIGNIFICANT_LEN)
        .map(|_| char::from(ALPHABET[div_rem(&mut value, BASE) as usize]))
        .collect();

    let groups: Vec<String> = glyphs
        .chunks(GROUP_LEN)
        .map(|group| group.iter().collect())
        .collect();
    format!("{}-{}", PREFIX, groups.join("-"))
}

/// Candidate download URL on the canonical CDN for `shard`.
pub fn build_url(decoded: &DecodedShareCode, shard: u32) -> String {
    build_url_with_template(decoded, DEFAULT_CDN_TEMPLATE, shard)
}

/// Same as [`build_url`] against any host template containing `{shard}`.
pub fn build_url_with_template(decoded: &DecodedShareCode, template: &str, shard: u32) -> String {
    format!(
        "{}/{}_{}_{}.dem.bz2",
        template.replace("{shard}", &shard.to_string()),
        decoded.match_id,
        decoded.outcome_id,
        decoded.token_id
    )
}

fn significant_digits(token: &str) -> Result<Vec<u8>, ShareCodeError> {
    let trimmed = token.trim();
    let body = trimmed.strip_prefix(PREFIX).unwrap_or(trimmed);
    let glyphs: Vec<char> = body.chars().filter(|c| *c != '-').collect();

    if glyphs.len() != SIGNIFICANT_LEN {
        return Err(ShareCodeError::InvalidFormat(format!(
            "expected {} significant characters, found {}",
            SIGNIFICANT_LEN,
            glyphs.len()
        )));
    }

    glyphs
        .iter()
        .enumerate()
        .map(|(position, &character)| {
            alphabet_index(character)
                .ok_or(ShareCodeError::InvalidCharacter { character, position })
        })
        .collect()
}

fn alphabet_index(character: char) -> Option<u8> {
    if !character.is_ascii() {
        return None;
    }
    ALPHABET
        .iter()
        .position(|&glyph| glyph == character as u8)
        .map(|index| index as u8)
}

fn fold_digits(digits: &[u8]) -> DecodedShareCode {
    let mut accumulator = [0u8; ACCUMULATOR_BYTES];
    for &digit in digits.iter().rev() {
        mul_add(&mut accumulator, BASE, u32::from(digit));
    }

    // Reduce modulo 256^18 by dropping the guard byte.
    let bytes = &accumulator[ACCUMULATOR_BYTES - FIELD_BYTES..];

    let mut match_id = [0u8; 8];
    let mut outcome_id = [0u8; 8];
    let mut token_id = [0u8; 2];
    match_id.copy_from_slice(&bytes[0..8]);
    outcome_id.copy_from_slice(&bytes[8..16]);
    token_id.copy_from_slice(&bytes[16..18]);

    DecodedShareCode {
        match_id: u64::from_be_bytes(match_id),
        outcome_id: u64::from_be_bytes(outcome_id),
        token_id: u16::from_be_bytes(token_id),
    }
}

/// `value = value * mul + add` on a big-endian byte integer.
fn mul_add(value: &mut [u8], mul: u32, add: u32) {
    let mut carry = add;
    for byte in value.iter_mut().rev() {
        let acc = u32::from(*byte) * mul + carry;
        *byte = (acc & 0xff) as u8;
        carry = acc >> 8;
    }
}

/// Divide a big-endian byte integer in place, returning the remainder.
fn div_rem(value: &mut [u8], divisor: u32) -> u32 {
    let mut rem = 0u32;
    for byte in value.iter_mut() {
        let acc = (rem << 8) | u32::from(*byte);
        *byte = (acc / divisor) as u8;
        rem = acc % divisor;
    }
    rem
}
