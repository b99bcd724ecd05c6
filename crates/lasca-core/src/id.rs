use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

use crate::error::ParseIdError;

/// Sharded record identifier: a 4-byte big-endian shard id followed by a
/// 12-byte time-sortable token. Any record id can be matched to its shard
/// by reading the first 4 bytes, which is what lets ack/nack requests be
/// routed without a database lookup.
///
/// The token leads with a 48-bit unix-epoch millisecond timestamp, so ids
/// generated by one process sort roughly in creation order. That property
/// is load-bearing: the ready-for-delivery query ranks rows per topic by
/// id ascending to approximate age ordering without an extra column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id([u8; 16]);

const SHARD_LEN: usize = 4;
const TOKEN_LEN: usize = 12;
const ENCODED_TOKEN_LEN: usize = 20;

/// Base32-hex alphabet (lowercase, no padding) for the token string form.
const ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

impl Id {
    /// Generate a fresh id owned by the given shard.
    pub fn generate(shard_id: u32) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..SHARD_LEN].copy_from_slice(&shard_id.to_be_bytes());
        bytes[SHARD_LEN..].copy_from_slice(&generate_token());
        Self(bytes)
    }

    /// The shard id component (bytes 0..4).
    pub fn shard_id(&self) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.0[..SHARD_LEN]);
        u32::from_be_bytes(buf)
    }

    /// Parse an id from its `<shardId>-<tokenBase32>` string form.
    pub fn parse(value: &str) -> Result<Self, ParseIdError> {
        value.parse()
    }

    /// Reconstruct an id from its raw 16-byte representation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseIdError> {
        if bytes.len() != 16 {
            return Err(ParseIdError);
        }
        let mut buf = [0u8; 16];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Raw byte representation, as stored in the `BYTEA` column.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Generate a 12-byte token: 6 bytes of big-endian unix milliseconds,
/// a 3-byte per-process seed, and a 3-byte wrapping counter. The counter
/// disambiguates ids minted within the same millisecond.
fn generate_token() -> [u8; TOKEN_LEN] {
    static SEED: OnceLock<[u8; 3]> = OnceLock::new();
    static COUNTER: OnceLock<AtomicU32> = OnceLock::new();

    let seed = SEED.get_or_init(|| {
        let mut buf = [0u8; 3];
        rand::thread_rng().fill_bytes(&mut buf);
        buf
    });
    let counter = COUNTER.get_or_init(|| AtomicU32::new(rand::thread_rng().next_u32()));

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let count = counter.fetch_add(1, Ordering::Relaxed);

    let mut token = [0u8; TOKEN_LEN];
    token[..6].copy_from_slice(&millis.to_be_bytes()[2..]);
    token[6..9].copy_from_slice(seed);
    token[9..].copy_from_slice(&count.to_be_bytes()[1..]);
    token
}

fn encode_token(token: &[u8]) -> String {
    let mut out = String::with_capacity(ENCODED_TOKEN_LEN);
    let mut acc: u16 = 0;
    let mut bits = 0;
    for &byte in token {
        acc = (acc << 8) | byte as u16;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((acc >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((acc << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn decode_token(encoded: &str) -> Result<[u8; TOKEN_LEN], ParseIdError> {
    if encoded.len() != ENCODED_TOKEN_LEN {
        return Err(ParseIdError);
    }
    let mut token = [0u8; TOKEN_LEN];
    let mut acc: u16 = 0;
    let mut bits = 0;
    let mut idx = 0;
    for symbol in encoded.bytes() {
        let value = ALPHABET
            .iter()
            .position(|&a| a == symbol)
            .ok_or(ParseIdError)?;
        acc = (acc << 5) | value as u16;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            token[idx] = (acc >> bits) as u8;
            idx += 1;
            if idx == TOKEN_LEN {
                break;
            }
        }
    }
    if idx != TOKEN_LEN {
        return Err(ParseIdError);
    }
    Ok(token)
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.shard_id(),
            encode_token(&self.0[SHARD_LEN..])
        )
    }
}

impl FromStr for Id {
    type Err = ParseIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (shard, token) = value.split_once('-').ok_or(ParseIdError)?;
        let shard_id: u32 = shard.parse().map_err(|_| ParseIdError)?;
        let token = decode_token(token)?;

        let mut bytes = [0u8; 16];
        bytes[..SHARD_LEN].copy_from_slice(&shard_id.to_be_bytes());
        bytes[SHARD_LEN..].copy_from_slice(&token);
        Ok(Self(bytes))
    }
}

impl serde::Serialize for Id {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Id {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

// BYTEA codec so ids load and store directly through sqlx, the same role
// the database/sql Scanner interface plays for custom key types.

impl sqlx::Type<sqlx::Postgres> for Id {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <&[u8] as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::postgres::PgHasArrayType for Id {
    fn array_type_info() -> sqlx::postgres::PgTypeInfo {
        <&[u8] as sqlx::postgres::PgHasArrayType>::array_type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Id {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let bytes = <&[u8] as sqlx::Decode<'r, sqlx::Postgres>>::decode(value)?;
        Ok(Id::from_bytes(bytes)?)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for Id {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        buf.extend_from_slice(self.as_bytes());
        Ok(sqlx::encode::IsNull::No)
    }
}
