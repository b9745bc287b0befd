//! Error types for the RallyBank economy engine.
//!
//! All errors use the `RB_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Ledger errors
//! - 2xx: Escrow errors
//! - 3xx: Auction errors
//! - 4xx: Betting errors
//! - 5xx: Settlement errors
//! - 8xx: Invariant guards
//! - 9xx: General / internal errors
//!
//! The display string doubles as the user-visible rejection reason.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{AuctionId, Credits, HoldId, LotId, MatchId, PlayerId, TournamentId};

/// Central error enum for all RallyBank operations.
#[derive(Debug, Error)]
pub enum EconomyError {
    // =================================================================
    // Ledger Errors (1xx)
    // =================================================================
    /// The append would leave the balance negative and the tournament
    /// does not allow negative balances.
    #[error("RB_ERR_100: Insufficient funds for {player}: need {needed}, balance {balance}")]
    InsufficientFunds {
        player: PlayerId,
        needed: Credits,
        balance: Credits,
    },

    /// No tournament with this ID is registered with the ledger.
    #[error("RB_ERR_101: Tournament not found: {0}")]
    TournamentNotFound(TournamentId),

    /// Administrative operations require a non-empty audit note.
    #[error("RB_ERR_102: Administrative operation requires an audit note")]
    MissingAuditNote,

    /// An amount was zero, negative where a positive value is required, or
    /// overflowed.
    #[error("RB_ERR_103: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// An idempotency key was reused for a different economic event.
    #[error("RB_ERR_104: Idempotency key {key} already bound to a different entry")]
    IdempotencyConflict { key: String },

    // =================================================================
    // Escrow Errors (2xx)
    // =================================================================
    /// The bidder's spendable balance cannot cover the hold.
    #[error("RB_ERR_200: Insufficient spendable balance: need {needed}, spendable {spendable}")]
    InsufficientSpendable { needed: Credits, spendable: Credits },

    /// No hold exists for the (lot, bidder) pair.
    #[error("RB_ERR_201: No escrow hold for {bidder} on {lot}")]
    HoldNotFound { lot: LotId, bidder: PlayerId },

    /// The lot's escrow was already converted into a ledger debit.
    #[error("RB_ERR_202: Lot already settled: {0}")]
    LotAlreadySettled(LotId),

    /// The lot cannot be settled in its current state.
    #[error("RB_ERR_203: Lot {lot} cannot be settled: {reason}")]
    LotNotSettleable { lot: LotId, reason: String },

    /// A hold was found in an unexpected state.
    #[error("RB_ERR_204: Hold {hold} is {state}, expected ACTIVE")]
    HoldNotActive { hold: HoldId, state: String },

    // =================================================================
    // Auction Errors (3xx)
    // =================================================================
    /// The requested lot does not exist.
    #[error("RB_ERR_300: Lot not found: {0}")]
    LotNotFound(LotId),

    /// The lot has ended (or its deadline has passed).
    #[error("RB_ERR_301: Lot not live: {0}")]
    LotNotLive(LotId),

    /// The bid is below the minimum next bid.
    #[error("RB_ERR_302: Bid too low: minimum {minimum}, offered {offered}")]
    BidTooLow { minimum: Credits, offered: Credits },

    /// The bidder owns the pledge behind this lot.
    #[error("RB_ERR_303: Self-bid blocked: bidder owns the pledged item")]
    SelfBid,

    /// `close` was called before the lot's deadline.
    #[error("RB_ERR_304: Lot {lot} still live until {ends_at}")]
    LotStillLive { lot: LotId, ends_at: DateTime<Utc> },

    /// The requested auction does not exist.
    #[error("RB_ERR_305: Auction not found: {0}")]
    AuctionNotFound(AuctionId),

    /// The lot definition is invalid.
    #[error("RB_ERR_306: Invalid lot: {reason}")]
    InvalidLot { reason: String },

    /// The auction is being or has been closed out; no new lots.
    #[error("RB_ERR_307: Auction closed: {0}")]
    AuctionClosed(AuctionId),

    // =================================================================
    // Betting Errors (4xx)
    // =================================================================
    /// The player plays in the match they tried to bet on.
    #[error("RB_ERR_400: Self-bet blocked: player participates in the match")]
    SelfBet,

    /// The player already has a bet on this match.
    #[error("RB_ERR_401: Player already bet on {0}")]
    AlreadyBet(MatchId),

    /// The stake breaks the per-bet or per-round cap.
    #[error("RB_ERR_402: Stake exceeds cap: {reason}")]
    StakeExceedsCap { reason: String },

    /// The stake would push the balance under the protected floor.
    #[error("RB_ERR_403: Stake breaches protected floor: balance {balance}, stake {stake}, floor {floor}")]
    BelowProtectedFloor {
        balance: Credits,
        stake: Credits,
        floor: Credits,
    },

    /// The match is not registered with the market.
    #[error("RB_ERR_404: Match not found: {0}")]
    MatchNotFound(MatchId),

    /// The match already has a result; no further bets.
    #[error("RB_ERR_405: Betting closed for {0}")]
    BettingClosed(MatchId),

    /// The match definition is invalid or conflicts with a registered one.
    #[error("RB_ERR_406: Invalid match: {reason}")]
    InvalidMatch { reason: String },

    // =================================================================
    // Settlement Errors (5xx)
    // =================================================================
    /// The reported score is not a legal result.
    #[error("RB_ERR_500: Invalid score: {reason}")]
    InvalidScore { reason: String },

    /// The match result was already fully processed.
    #[error("RB_ERR_501: Match already settled: {0}")]
    MatchAlreadySettled(MatchId),

    /// Some steps of a settlement were applied and some were not. Re-running
    /// the same operation applies only the missing steps.
    #[error("RB_ERR_502: Settlement {key} incomplete: {applied} applied, {failed} failed ({reason})")]
    SettlementIncomplete {
        key: String,
        applied: usize,
        failed: usize,
        reason: String,
    },

    /// The auction was already fully settled.
    #[error("RB_ERR_503: Auction already settled: {0}")]
    AuctionAlreadySettled(AuctionId),

    /// A retried settlement disagrees with the result it was first run with.
    #[error("RB_ERR_504: Conflicting result for {match_id}: {reason}")]
    ConflictingResult { match_id: MatchId, reason: String },

    // =================================================================
    // Invariant Guards (8xx)
    // =================================================================
    /// A ledger or escrow invariant does not hold.
    #[error("RB_ERR_800: Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("RB_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("RB_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config, missing fields, etc.).
    #[error("RB_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

/// How a caller should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input. No side effects; retry with corrected input.
    Validation,
    /// The operation would break an invariant. Rejected and logged.
    Consistency,
    /// A multi-step settlement stopped part way. Safe to re-run.
    PartialFailure,
    /// Infrastructure or programming error.
    Internal,
}

impl EconomyError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientFunds { .. }
            | Self::IdempotencyConflict { .. }
            | Self::InsufficientSpendable { .. }
            | Self::LotAlreadySettled(_)
            | Self::LotNotSettleable { .. }
            | Self::HoldNotActive { .. }
            | Self::MatchAlreadySettled(_)
            | Self::AuctionAlreadySettled(_)
            | Self::ConflictingResult { .. }
            | Self::InvariantViolation { .. } => ErrorKind::Consistency,
            Self::SettlementIncomplete { .. } => ErrorKind::PartialFailure,
            Self::Internal(_) | Self::Serialization(_) | Self::Configuration(_) => {
                ErrorKind::Internal
            }
            _ => ErrorKind::Validation,
        }
    }

    /// Whether re-running the same operation can succeed without a
    /// double effect.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::PartialFailure | ErrorKind::Internal)
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, EconomyError>;

impl From<serde_json::Error> for EconomyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
