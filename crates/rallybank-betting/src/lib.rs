//! # rallybank-betting
//!
//! **Side market**: match bets that resolve against the ledger only when
//! the match settles.
//!
//! - [`BettingMarket`]: match registry, bet placement with self-bet,
//!   duplicate, cap, and protected-floor checks, and per-match settlement
//! - [`payout`]: `stake * multiplier` rounded down to minor units
//!
//! Unlike lot bids, a bet reserves nothing: the stake is debited only if
//! the bet is lost.

pub mod market;
pub mod payout;

pub use market::BettingMarket;
pub use payout::bet_payout;
