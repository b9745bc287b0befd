//! Globally unique identifiers used throughout RallyBank.
//!
//! All entity IDs use UUIDv7 for time-ordered lexicographic sorting.
//! Ledger entry IDs can also be derived deterministically from an
//! idempotency key, so a retried settlement step reproduces the same ID.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUIDv7 newtype with `new`, `from_bytes`, `Default` and a
/// prefixed `Display`.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

uuid_id!(
    /// A tournament participant. Supplied by the external session service
    /// as a capability; the engine never authenticates.
    PlayerId,
    "player"
);

uuid_id!(
    /// One tournament: the scope of configuration and of every ledger entry.
    TournamentId,
    "tournament"
);

uuid_id!(
    /// A scheduled match between two teams.
    MatchId,
    "match"
);

uuid_id!(
    /// A tournament round. Per-round betting caps are keyed by it.
    RoundId,
    "round"
);

uuid_id!(
    /// An auction: a set of lots closed out together.
    AuctionId,
    "auction"
);

uuid_id!(
    /// A single auctionable lot.
    LotId,
    "lot"
);

uuid_id!(
    /// A player-contributed pledge item backing a lot.
    PledgeItemId,
    "pledge"
);

uuid_id!(
    /// An escrow hold.
    HoldId,
    "hold"
);

uuid_id!(
    /// A match bet.
    BetId,
    "bet"
);

uuid_id!(
    /// An immutable bid record.
    BidId,
    "bid"
);

// ---------------------------------------------------------------------------
// EntryId
// ---------------------------------------------------------------------------

/// Identifier of an immutable ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl EntryId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Deterministic `EntryId` from an idempotency key.
    ///
    /// A settlement step retried after a partial failure carries the same
    /// key, and therefore maps to the same entry ID.
    #[must_use]
    pub fn deterministic(key: &IdempotencyKey) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(b"rallybank:entry_id:v1:");
        hasher.update(key.as_str().as_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash[..16]);
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// IdempotencyKey
// ---------------------------------------------------------------------------

/// Key identifying one economic event. Appending two entries with the same
/// key has the effect of appending one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn starting_grant(tournament: TournamentId, player: PlayerId) -> Self {
        Self(format!("grant:{}:{}", tournament.0, player.0))
    }

    #[must_use]
    pub fn participation(round: RoundId, player: PlayerId) -> Self {
        Self(format!("participation:{}:{}", round.0, player.0))
    }

    #[must_use]
    pub fn match_payout(match_id: MatchId, player: PlayerId) -> Self {
        Self(format!("match:{}:payout:{}", match_id.0, player.0))
    }

    #[must_use]
    pub fn match_penalty(match_id: MatchId, player: PlayerId) -> Self {
        Self(format!("match:{}:penalty:{}", match_id.0, player.0))
    }

    #[must_use]
    pub fn bet_settlement(bet: BetId) -> Self {
        Self(format!("bet:{}:settle", bet.0))
    }

    #[must_use]
    pub fn lot_settlement(lot: LotId) -> Self {
        Self(format!("lot:{}:settle", lot.0))
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_id_uniqueness_and_ordering() {
        let a = PlayerId::new();
        let b = PlayerId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn display_carries_prefix() {
        assert!(LotId::new().to_string().starts_with("lot:"));
        assert!(MatchId::new().to_string().starts_with("match:"));
        assert!(EntryId::new().to_string().starts_with("entry:"));
    }

    #[test]
    fn entry_id_deterministic_from_key() {
        let player = PlayerId::new();
        let m = MatchId::new();
        let a = EntryId::deterministic(&IdempotencyKey::match_payout(m, player));
        let b = EntryId::deterministic(&IdempotencyKey::match_payout(m, player));
        assert_eq!(a, b);
        let c = EntryId::deterministic(&IdempotencyKey::match_penalty(m, player));
        assert_ne!(a, c);
    }

    #[test]
    fn keys_are_scoped_per_player() {
        let m = MatchId::new();
        let a = IdempotencyKey::match_payout(m, PlayerId::new());
        let b = IdempotencyKey::match_payout(m, PlayerId::new());
        assert_ne!(a, b);
    }
}
