//! # rallybank-types
//!
//! Shared types, errors, and configuration for the **RallyBank** tournament
//! economy engine.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Identifiers**: [`PlayerId`], [`TournamentId`], [`MatchId`], [`RoundId`], [`LotId`], [`EntryId`], [`IdempotencyKey`], ...
//! - **Ledger model**: [`LedgerEntry`], [`NewEntry`], [`EntryType`], [`Credits`]
//! - **Escrow model**: [`EscrowHold`], [`HoldState`]
//! - **Auction model**: [`Auction`], [`AuctionLot`], [`LotStatus`], [`Bid`], [`NewLot`]
//! - **Betting model**: [`MatchInfo`], [`MatchResult`], [`MatchOutcome`], [`MatchBet`], [`BetStatus`], [`Team`]
//! - **Reports**: [`ReconcileReport`], [`MatchSettlementReport`], [`AuctionSettlementReport`]
//! - **Configuration**: [`TournamentConfig`], [`MatchRewards`], [`BettingLimits`], [`AuctionRules`]
//! - **Time**: [`Clock`], [`SystemClock`]
//! - **Errors**: [`EconomyError`] with `RB_ERR_` prefix codes

pub mod bet;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod escrow;
pub mod ids;
pub mod ledger;
pub mod lot;
pub mod report;

pub use bet::*;
pub use clock::*;
pub use config::*;
pub use error::*;
pub use escrow::*;
pub use ids::*;
pub use ledger::*;
pub use lot::*;
pub use report::*;

// Constants are accessed via `rallybank_types::constants::FOO`
// (not re-exported to avoid name collisions).
