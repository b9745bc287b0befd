//! Results returned by settlement and administrative operations.

use serde::{Deserialize, Serialize};

use crate::{
    AuctionId, Credits, LedgerEntry, LotId, MatchBet, MatchId, MatchOutcome, PlayerId,
};

/// Outcome of recomputing a player's balance from history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub player_id: PlayerId,
    pub old_balance: Credits,
    pub new_balance: Credits,
    pub corrected: bool,
}

/// What `process_match_result` wrote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSettlementReport {
    pub match_id: MatchId,
    pub outcome: MatchOutcome,
    /// Payout and penalty entries for the participants.
    pub ledger_entries: Vec<LedgerEntry>,
    /// Bets that left `Pending` during this call.
    pub bets_settled: Vec<MatchBet>,
}

/// A lot's final winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotWinner {
    pub lot_id: LotId,
    pub player_id: PlayerId,
    pub amount: Credits,
}

/// What `settle_auction` closed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuctionSettlementReport {
    pub auction_id: Option<AuctionId>,
    /// Lots that transitioned to `Ended` during this call.
    pub lots_closed: Vec<LotId>,
    pub winners: Vec<LotWinner>,
    /// The auction had already been fully settled; nothing was done.
    pub already_settled: bool,
}
