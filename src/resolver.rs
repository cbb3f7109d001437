//! Truncated hash resolution
//!
//! Some dumps store canonical keys as `'n' ++ hash[..k]` instead of
//! `'n' ++ be64(height)`. Resolving them means finding every indexed hash that
//! starts with the stored bytes. More than one match is reported, never
//! guessed; a caller may settle it with an explicit [`AmbiguityPolicy`].

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use crate::constants::HASH_LEN;
use crate::hash_index::HashIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Full 32-byte hash present in the index
    Exact,
    /// Shorter input matching exactly one indexed hash
    UniquePrefix,
    /// Shorter input matching several indexed hashes
    AmbiguousPrefix,
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub kind: MatchKind,
    /// Every `(hash, height)` that matched, in hash order
    pub matches: Vec<(B256, u64)>,
}

impl Resolution {
    fn no_match() -> Self {
        Self {
            kind: MatchKind::NoMatch,
            matches: Vec::new(),
        }
    }

    /// The single match of an `Exact` or `UniquePrefix` resolution
    pub fn unique(&self) -> Option<(B256, u64)> {
        match self.kind {
            MatchKind::Exact | MatchKind::UniquePrefix => self.matches.first().copied(),
            _ => None,
        }
    }
}

/// How to settle an `AmbiguousPrefix` resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    #[default]
    Reject,
    PreferLowestHeight,
    PreferHighestHeight,
}

/// Read-only resolver over a finished hash index
pub struct TruncatedHashResolver<'a> {
    index: &'a HashIndex,
}

impl<'a> TruncatedHashResolver<'a> {
    pub fn new(index: &'a HashIndex) -> Self {
        Self { index }
    }

    pub fn resolve(&self, partial: &[u8]) -> Resolution {
        if partial.is_empty() || partial.len() > HASH_LEN {
            return Resolution::no_match();
        }

        if partial.len() == HASH_LEN {
            let hash = B256::from_slice(partial);
            return match self.index.get(&hash) {
                Some(height) => Resolution {
                    kind: MatchKind::Exact,
                    matches: vec![(hash, height)],
                },
                None => Resolution::no_match(),
            };
        }

        let matches: Vec<(B256, u64)> = self.index.prefix_matches(partial).collect();
        let kind = match matches.len() {
            0 => MatchKind::NoMatch,
            1 => MatchKind::UniquePrefix,
            _ => MatchKind::AmbiguousPrefix,
        };
        Resolution { kind, matches }
    }
}

/// Pick one match from a resolution.
///
/// Unique resolutions always select their only match. Ambiguous ones are
/// settled by `policy`, with ties on height going to the lower hash.
pub fn select(resolution: &Resolution, policy: AmbiguityPolicy) -> Option<(B256, u64)> {
    match resolution.kind {
        MatchKind::Exact | MatchKind::UniquePrefix => resolution.unique(),
        MatchKind::NoMatch => None,
        MatchKind::AmbiguousPrefix => match policy {
            AmbiguityPolicy::Reject => None,
            AmbiguityPolicy::PreferLowestHeight => resolution
                .matches
                .iter()
                .copied()
                .min_by_key(|(_, height)| *height),
            AmbiguityPolicy::PreferHighestHeight => resolution
                .matches
                .iter()
                .copied()
                .rev()
                .max_by_key(|(_, height)| *height),
        },
    }
}
