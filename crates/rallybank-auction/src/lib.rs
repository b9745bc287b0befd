//! # rallybank-auction
//!
//! **Lot bidding plane**: the `Live → Ended` lot state machine, backed by
//! escrow holds, with anti-sniping deadline extensions.
//!
//! - [`rules`]: pure checks (minimum next bid, self-bid, deadline) and the
//!   anti-snipe extension rule
//! - [`AuctionEngine`]: lot registry, per-lot serialized bidding, closing,
//!   and the expiry sweep
//!
//! ## Bid Flow
//!
//! ```text
//! place_bid → rules::validate_bid → EscrowManager.hold(new)
//!           → EscrowManager.release(previous winner) → Bid record
//! close     → Ended → EscrowManager.settle(winner) → AUCTION_SETTLEMENT
//! ```

pub mod engine;
pub mod rules;

pub use engine::{AuctionEngine, LotClosure};
