//! # rallybank-ledger
//!
//! **Money plane**: the append-only credit ledger and the escrow holds that
//! reserve credits against outstanding bids.
//!
//! ## Architecture
//!
//! 1. **Ledger**: per-player accounts (cached balance, reserved credits,
//!    entry history); the only writer of balances
//! 2. **EscrowManager**: places, replaces, releases, and settles holds
//!    against a player's spendable balance
//!
//! ## Balance Flow
//!
//! ```text
//! bid → EscrowManager.hold()    spendable ↓, balance unchanged
//! outbid → EscrowManager.release()  spendable ↑
//! lot ended → EscrowManager.settle() → AUCTION_SETTLEMENT entry, balance ↓
//! ```
//!
//! `balance == Σ entries` holds for every player at every lock release.

pub mod escrow;
pub mod ledger;

pub use escrow::EscrowManager;
pub use ledger::Ledger;
