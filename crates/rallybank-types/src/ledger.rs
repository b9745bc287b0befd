//! Ledger entry model.
//!
//! A [`LedgerEntry`] is the immutable record of one signed credit movement.
//! The sum of a player's entries is their balance; nothing else is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    EconomyError, EntryId, IdempotencyKey, LotId, MatchId, PlayerId, Result, RoundId,
    TournamentId,
};

/// Credits in integer minor units. Display conversion happens outside the
/// engine.
pub type Credits = i64;

/// The economic event an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    StartingGrant,
    ParticipationBonus,
    MatchPayout,
    Penalty,
    AdminAdjustment,
    /// Reserved for external producers (e.g. an export that mirrors escrow
    /// activity). The engine tracks holds in the escrow manager and never
    /// writes this type: a hold moves spendable credits, not the balance.
    AuctionHold,
    /// Reserved for external producers, like [`EntryType::AuctionHold`].
    AuctionRelease,
    /// The winning bid, debited once per lot when it closes.
    AuctionSettlement,
    BetStake,
    BetPayout,
}

/// Sign an entry type's amount must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountSign {
    Positive,
    Negative,
    /// Either sign, never zero.
    Any,
}

impl EntryType {
    #[must_use]
    pub fn required_sign(self) -> AmountSign {
        match self {
            Self::StartingGrant | Self::ParticipationBonus | Self::MatchPayout | Self::BetPayout => {
                AmountSign::Positive
            }
            Self::Penalty | Self::AuctionSettlement | Self::BetStake => AmountSign::Negative,
            Self::AdminAdjustment | Self::AuctionHold | Self::AuctionRelease => AmountSign::Any,
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StartingGrant => "STARTING_GRANT",
            Self::ParticipationBonus => "PARTICIPATION_BONUS",
            Self::MatchPayout => "MATCH_PAYOUT",
            Self::Penalty => "PENALTY",
            Self::AdminAdjustment => "ADMIN_ADJUSTMENT",
            Self::AuctionHold => "AUCTION_HOLD",
            Self::AuctionRelease => "AUCTION_RELEASE",
            Self::AuctionSettlement => "AUCTION_SETTLEMENT",
            Self::BetStake => "BET_STAKE",
            Self::BetPayout => "BET_PAYOUT",
        };
        f.write_str(s)
    }
}

/// An immutable, appended ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub player_id: PlayerId,
    pub tournament_id: TournamentId,
    pub entry_type: EntryType,
    /// Signed amount. Credits are positive, debits negative.
    pub amount: Credits,
    pub match_id: Option<MatchId>,
    pub round_id: Option<RoundId>,
    pub lot_id: Option<LotId>,
    pub note: String,
    pub idempotency_key: Option<IdempotencyKey>,
    /// Position in the player's history, starting at 0.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

/// A request to append an entry.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub player_id: PlayerId,
    pub tournament_id: TournamentId,
    pub entry_type: EntryType,
    pub amount: Credits,
    pub match_id: Option<MatchId>,
    pub round_id: Option<RoundId>,
    pub lot_id: Option<LotId>,
    pub note: String,
    pub idempotency_key: Option<IdempotencyKey>,
    /// Skip the negative-balance guard. Only honored for
    /// [`EntryType::AdminAdjustment`].
    pub force: bool,
}

impl NewEntry {
    #[must_use]
    pub fn new(
        player_id: PlayerId,
        tournament_id: TournamentId,
        entry_type: EntryType,
        amount: Credits,
    ) -> Self {
        Self {
            player_id,
            tournament_id,
            entry_type,
            amount,
            match_id: None,
            round_id: None,
            lot_id: None,
            note: String::new(),
            idempotency_key: None,
            force: false,
        }
    }

    #[must_use]
    pub fn with_match(mut self, match_id: MatchId) -> Self {
        self.match_id = Some(match_id);
        self
    }

    #[must_use]
    pub fn with_round(mut self, round_id: RoundId) -> Self {
        self.round_id = Some(round_id);
        self
    }

    #[must_use]
    pub fn with_lot(mut self, lot_id: LotId) -> Self {
        self.lot_id = Some(lot_id);
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    #[must_use]
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Structural checks that do not depend on ledger state.
    pub fn validate(&self) -> Result<()> {
        if self.amount == 0 {
            return Err(EconomyError::InvalidAmount {
                reason: format!("{} amount must be non-zero", self.entry_type),
            });
        }
        let sign_ok = match self.entry_type.required_sign() {
            AmountSign::Positive => self.amount > 0,
            AmountSign::Negative => self.amount < 0,
            AmountSign::Any => true,
        };
        if !sign_ok {
            return Err(EconomyError::InvalidAmount {
                reason: format!(
                    "{} amount {} has the wrong sign",
                    self.entry_type, self.amount
                ),
            });
        }
        if self.entry_type == EntryType::AdminAdjustment && self.note.trim().is_empty() {
            return Err(EconomyError::MissingAuditNote);
        }
        Ok(())
    }

    /// Whether the negative-balance guard is bypassed by an explicit force.
    #[must_use]
    pub fn bypasses_guard(&self) -> bool {
        self.force && self.entry_type == EntryType::AdminAdjustment
    }

    /// Whether two requests describe the same economic event. Used to detect
    /// an idempotency key reused for something else.
    #[must_use]
    pub fn matches_entry(&self, entry: &LedgerEntry) -> bool {
        self.player_id == entry.player_id
            && self.tournament_id == entry.tournament_id
            && self.entry_type == entry.entry_type
            && self.amount == entry.amount
    }
}
