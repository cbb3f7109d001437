//! Key type tags and fixed widths
//!
//! Every logical key starts with a one-byte type tag. These constants keep the
//! tag bytes and record widths in one place; all key handling should use them
//! instead of magic numbers.

/// Block header: `'h' ++ be64(number) ++ hash`
pub const TAG_HEADER: u8 = b'h';

/// Block body: `'b' ++ be64(number) ++ hash`
pub const TAG_BODY: u8 = b'b';

/// Alternative body encoding used by some dumps
pub const TAG_BODY_ALT: u8 = b'B';

/// Receipts: `'r' ++ be64(number) ++ hash`
pub const TAG_RECEIPTS: u8 = b'r';

/// Hash -> height: `'H' ++ hash` => be64(number)
pub const TAG_HASH_TO_NUMBER: u8 = b'H';

/// Height -> hash (canonical): `'n' ++ be64(number)` => hash
pub const TAG_CANONICAL: u8 = b'n';

/// Total difficulty / transaction lookups
pub const TAG_TOTAL_DIFFICULTY: u8 = b't';

/// Last-accepted style values
pub const TAG_LAST_VALUES: u8 = b'l';

/// Chain metadata
pub const TAG_METADATA: u8 = 0xfd;

/// State key-spaces that pass through unchanged
pub const TAG_ACCOUNTS: u8 = 0x26;
pub const TAG_STORAGE: u8 = 0xa3;
pub const TAG_OBJECTS: u8 = b'o';
pub const TAG_STATE: u8 = b's';
pub const TAG_CODE: u8 = b'c';

/// Block hash width
pub const HASH_LEN: usize = 32;

/// Encoded height width (big-endian u64)
pub const HEIGHT_LEN: usize = 8;

/// Genesis block height
pub const HEIGHT_GENESIS: u64 = 0;

/// Default commit size for the batch committer
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Tags that carry chain data (headers, bodies, indices)
pub const CHAIN_TAGS: &[u8] = &[
    TAG_HEADER,
    TAG_BODY,
    TAG_BODY_ALT,
    TAG_RECEIPTS,
    TAG_HASH_TO_NUMBER,
    TAG_CANONICAL,
    TAG_TOTAL_DIFFICULTY,
    TAG_LAST_VALUES,
    TAG_METADATA,
];

/// Tags that carry state data
pub const STATE_TAGS: &[u8] = &[TAG_ACCOUNTS, TAG_STORAGE, TAG_OBJECTS, TAG_STATE, TAG_CODE];

/// Check if a tag belongs to the chain-data key-spaces
#[inline]
pub fn is_chain_tag(tag: u8) -> bool {
    CHAIN_TAGS.contains(&tag)
}

/// Check if a tag belongs to the state key-spaces
#[inline]
pub fn is_state_tag(tag: u8) -> bool {
    STATE_TAGS.contains(&tag)
}

/// Check if a height is the genesis block
#[inline]
pub fn is_genesis_height(height: u64) -> bool {
    height == HEIGHT_GENESIS
}

/// Human-readable name for a tag, used in per-tag counters and logs
pub fn tag_name(tag: u8) -> &'static str {
    match tag {
        TAG_HEADER => "headers",
        TAG_BODY => "bodies",
        TAG_BODY_ALT => "bodies_alt",
        TAG_RECEIPTS => "receipts",
        TAG_HASH_TO_NUMBER => "hash_to_number",
        TAG_CANONICAL => "canonical",
        TAG_TOTAL_DIFFICULTY => "total_difficulty",
        TAG_LAST_VALUES => "last_values",
        TAG_METADATA => "metadata",
        TAG_ACCOUNTS => "accounts",
        TAG_STORAGE => "storage",
        TAG_OBJECTS => "objects",
        TAG_STATE => "state",
        TAG_CODE => "code",
        _ => "other",
    }
}
