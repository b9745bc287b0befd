//! # rallybank-settlement
//!
//! **Finality plane**: multi-step settlements across the ledger, the
//! auction engine, and the betting market, plus the invariant audit and the
//! lot-expiry sweeper.
//!
//! ## Architecture
//!
//! 1. Validates idempotency (a match or auction settles once)
//! 2. Applies every step under its own ledger idempotency key
//! 3. Reports partial application as `SettlementIncomplete`; a re-run
//!    applies only what is missing
//! 4. Audits balance and escrow invariants on demand
//!
//! ```text
//! scheduler ─ process_match_result ─▶ Ledger (payouts, penalties)
//!                                  └▶ BettingMarket.settle_match_bets
//! admin     ─ settle_auction ──────▶ AuctionEngine.force_close ─▶ EscrowManager.settle
//! sweeper   ─ every tick ──────────▶ AuctionEngine.sweep_expired
//! ```

pub mod audit;
pub mod coordinator;
pub mod idempotency;
pub mod sweeper;

pub use audit::{AuditReport, LedgerAudit};
pub use coordinator::SettlementCoordinator;
pub use idempotency::{IdempotencyGuard, SettlementKey};
pub use sweeper::{ExpirySweeper, spawn_default_expiry_sweeper, spawn_expiry_sweeper};
