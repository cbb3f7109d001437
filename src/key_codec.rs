//! Key Codec - namespace envelopes, logical keys and destination key layout
//!
//! Source dumps multiplex several chains into one physical store by wrapping
//! every logical key in a fixed-width envelope:
//!
//! ```text
//! namespaced = prefix(prefix_len) ++ tag ++ payload ++ suffix(suffix_len)
//! ```
//!
//! Widths differ between dump families (33/8 bytes in one, a bare 3-byte
//! `"evm"` prefix in another), so they are always configuration.
//!
//! On the destination side keys are re-emitted behind an optional prefix
//! (`DestinationSchema`), with some state tags written bare.

use alloy_primitives::B256;
use byteorder::{BigEndian, ByteOrder};

use crate::constants::{
    HASH_LEN, HEIGHT_LEN, TAG_ACCOUNTS, TAG_BODY, TAG_BODY_ALT, TAG_CANONICAL, TAG_CODE,
    TAG_HASH_TO_NUMBER, TAG_HEADER, TAG_OBJECTS, TAG_RECEIPTS, TAG_STATE, TAG_STORAGE,
    TAG_TOTAL_DIFFICULTY,
};
use crate::error::KeyError;

/// Borrowed view of an envelope-free key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalKey<'a> {
    pub tag: u8,
    pub payload: &'a [u8],
}

impl<'a> LogicalKey<'a> {
    pub fn new(tag: u8, payload: &'a [u8]) -> Self {
        Self { tag, payload }
    }

    /// Parse a bare logical key (`tag ++ payload`)
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        let (&tag, payload) = bytes.split_first()?;
        Some(Self { tag, payload })
    }

    /// Encoded length including the tag byte
    pub(crate) fn len(&self) -> usize {
        1 + self.payload.len()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.push(self.tag);
        out.extend_from_slice(self.payload);
        out
    }
}

/// A namespaced key split into its three parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrippedKey<'a> {
    pub prefix: &'a [u8],
    pub logical: LogicalKey<'a>,
    pub suffix: &'a [u8],
}

/// Source-side envelope widths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    prefix_len: usize,
    suffix_len: usize,
}

impl Envelope {
    pub const fn new(prefix_len: usize, suffix_len: usize) -> Self {
        Self {
            prefix_len,
            suffix_len,
        }
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    pub fn suffix_len(&self) -> usize {
        self.suffix_len
    }

    /// Smallest key that still carries a type tag
    pub fn min_len(&self) -> usize {
        self.prefix_len + self.suffix_len + 1
    }

    /// Split a namespaced key into prefix, logical key and suffix
    pub fn strip<'a>(&self, key: &'a [u8]) -> Result<StrippedKey<'a>, KeyError> {
        let min = self.min_len();
        if key.len() < min {
            return Err(KeyError::TooShort {
                len: key.len(),
                min,
            });
        }

        let (prefix, rest) = key.split_at(self.prefix_len);
        let (body, suffix) = rest.split_at(rest.len() - self.suffix_len);

        Ok(StrippedKey {
            prefix,
            logical: LogicalKey {
                tag: body[0],
                payload: &body[1..],
            },
            suffix,
        })
    }

    /// Re-wrap a logical key with envelope bytes of this envelope's widths.
    ///
    /// Returns `None` when the supplied prefix/suffix do not match the widths.
    pub fn wrap(&self, prefix: &[u8], logical: &LogicalKey<'_>, suffix: &[u8]) -> Option<Vec<u8>> {
        if prefix.len() != self.prefix_len || suffix.len() != self.suffix_len {
            return None;
        }
        let mut out = Vec::with_capacity(prefix.len() + logical.len() + suffix.len());
        out.extend_from_slice(prefix);
        out.push(logical.tag);
        out.extend_from_slice(logical.payload);
        out.extend_from_slice(suffix);
        Some(out)
    }
}

/// Shape of a canonical (`'n'`) payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalPayload<'a> {
    /// Already well-formed: 8-byte big-endian height
    Height(u64),
    /// A full or truncated block hash that needs resolving
    PartialHash(&'a [u8]),
    /// Empty or longer than a hash
    Malformed,
}

/// Classification of a logical key by its tag and payload shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind<'a> {
    Header { number: u64, hash: &'a [u8] },
    /// Old 10-byte canonical layout: `'h' ++ be64(height) ++ 'n'`
    LegacyCanonical { height: u64 },
    Body,
    Receipts,
    HashToNumber { hash: &'a [u8] },
    Canonical(CanonicalPayload<'a>),
    TotalDifficulty,
    State,
    Other,
}

/// Classify a logical key.
///
/// A canonical payload of exactly 8 bytes is read as a height; any other
/// length up to 32 is treated as a (possibly truncated) hash.
pub fn classify<'a>(key: &LogicalKey<'a>) -> KeyKind<'a> {
    let payload = key.payload;
    match key.tag {
        TAG_HEADER => {
            if payload.len() == HEIGHT_LEN + 1 && payload[HEIGHT_LEN] == TAG_CANONICAL {
                KeyKind::LegacyCanonical {
                    height: decode_height(&payload[..HEIGHT_LEN]),
                }
            } else if payload.len() == HEIGHT_LEN + HASH_LEN {
                KeyKind::Header {
                    number: decode_height(&payload[..HEIGHT_LEN]),
                    hash: &payload[HEIGHT_LEN..],
                }
            } else {
                KeyKind::Other
            }
        }
        TAG_BODY | TAG_BODY_ALT => KeyKind::Body,
        TAG_RECEIPTS => KeyKind::Receipts,
        TAG_HASH_TO_NUMBER => KeyKind::HashToNumber { hash: payload },
        TAG_CANONICAL => KeyKind::Canonical(match payload.len() {
            HEIGHT_LEN => CanonicalPayload::Height(decode_height(payload)),
            1..=HASH_LEN => CanonicalPayload::PartialHash(payload),
            _ => CanonicalPayload::Malformed,
        }),
        TAG_TOTAL_DIFFICULTY => KeyKind::TotalDifficulty,
        TAG_ACCOUNTS | TAG_STORAGE | TAG_OBJECTS | TAG_STATE | TAG_CODE => KeyKind::State,
        _ => KeyKind::Other,
    }
}

#[inline]
pub fn encode_height(height: u64) -> [u8; HEIGHT_LEN] {
    let mut buf = [0u8; HEIGHT_LEN];
    BigEndian::write_u64(&mut buf, height);
    buf
}

/// Caller guarantees `bytes.len() >= 8`
#[inline]
pub fn decode_height(bytes: &[u8]) -> u64 {
    BigEndian::read_u64(&bytes[..HEIGHT_LEN])
}

/// Bare canonical key: `'n' ++ be64(height)`
pub fn build_canonical_key(height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + HEIGHT_LEN);
    key.push(TAG_CANONICAL);
    key.extend_from_slice(&encode_height(height));
    key
}

/// Destination key layout: optional prefix plus a set of tags written bare
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationSchema {
    prefix: Vec<u8>,
    unprefixed_tags: Vec<u8>,
}

impl DestinationSchema {
    pub fn new(prefix: Vec<u8>, unprefixed_tags: Vec<u8>) -> Self {
        Self {
            prefix,
            unprefixed_tags,
        }
    }

    /// No prefix at all (plain geth-style layout)
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    fn prefix_for(&self, tag: u8) -> &[u8] {
        if self.unprefixed_tags.contains(&tag) {
            &[]
        } else {
            &self.prefix
        }
    }

    /// Re-emit a logical key in destination form
    pub fn encode(&self, key: &LogicalKey<'_>) -> Vec<u8> {
        let prefix = self.prefix_for(key.tag);
        let mut out = Vec::with_capacity(prefix.len() + key.len());
        out.extend_from_slice(prefix);
        out.push(key.tag);
        out.extend_from_slice(key.payload);
        out
    }

    /// Strip the destination prefix from a stored key
    pub fn decode<'a>(&self, key: &'a [u8]) -> Option<LogicalKey<'a>> {
        let rest = key.strip_prefix(self.prefix.as_slice())?;
        LogicalKey::parse(rest)
    }

    /// Scan prefix for every key of one tag
    pub fn tag_prefix(&self, tag: u8) -> Vec<u8> {
        let prefix = self.prefix_for(tag);
        let mut out = Vec::with_capacity(prefix.len() + 1);
        out.extend_from_slice(prefix);
        out.push(tag);
        out
    }

    pub fn canonical_key(&self, height: u64) -> Vec<u8> {
        let mut key = self.tag_prefix(TAG_CANONICAL);
        key.extend_from_slice(&encode_height(height));
        key
    }

    pub fn hash_to_number_key(&self, hash: &B256) -> Vec<u8> {
        let mut key = self.tag_prefix(TAG_HASH_TO_NUMBER);
        key.extend_from_slice(hash.as_slice());
        key
    }

    pub fn header_key(&self, height: u64, hash: &B256) -> Vec<u8> {
        let mut key = self.tag_prefix(TAG_HEADER);
        key.extend_from_slice(&encode_height(height));
        key.extend_from_slice(hash.as_slice());
        key
    }

    pub fn legacy_canonical_key(&self, height: u64) -> Vec<u8> {
        let mut key = self.tag_prefix(TAG_HEADER);
        key.extend_from_slice(&encode_height(height));
        key.push(TAG_CANONICAL);
        key
    }
}

/// Smallest key strictly greater than every key starting with `prefix`.
///
/// `None` when the prefix is all `0xff` (unbounded scan).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.pop() {
        if last < 0xff {
            bound.push(last + 1);
            return Some(bound);
        }
    }
    None
}
