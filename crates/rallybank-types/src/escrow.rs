//! # EscrowHold: credits earmarked for an outstanding bid
//!
//! ## State Machine
//!
//! ```text
//!   ┌────────┐  lot settled   ┌─────────┐
//!   │ ACTIVE ├───────────────▶│ SETTLED │
//!   └───┬────┘                └─────────┘
//!       │ outbid / replaced / lot closed
//!       ▼
//!   ┌──────────┐
//!   │ RELEASED │
//!   └──────────┘
//! ```
//!
//! A hold does not move the ledger balance. It lowers the bidder's
//! *spendable* balance until it is released or settled. Settlement converts
//! it into an `AuctionSettlement` debit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Credits, EconomyError, HoldId, LotId, PlayerId};

/// Lifecycle state of an escrow hold.
///
/// Transitions are monotonic: `Active → Settled` or `Active → Released`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HoldState {
    /// Credits reserved against a live bid.
    Active,
    /// Superseded or closed out; credits spendable again.
    Released,
    /// Converted into a ledger debit. **Irreversible.**
    Settled,
}

impl HoldState {
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!((self, target), (Self::Active, Self::Settled | Self::Released))
    }
}

impl std::fmt::Display for HoldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Released => write!(f, "RELEASED"),
            Self::Settled => write!(f, "SETTLED"),
        }
    }
}

/// A reservation of a bidder's credits against one lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowHold {
    pub id: HoldId,
    pub lot_id: LotId,
    pub bidder_player_id: PlayerId,
    pub reserved_amount: Credits,
    pub status: HoldState,
    pub created_at: DateTime<Utc>,
    /// Set when the hold leaves `Active`.
    pub released_at: Option<DateTime<Utc>>,
}

impl EscrowHold {
    #[must_use]
    pub fn new(lot_id: LotId, bidder: PlayerId, amount: Credits, now: DateTime<Utc>) -> Self {
        Self {
            id: HoldId::new(),
            lot_id,
            bidder_player_id: bidder,
            reserved_amount: amount,
            status: HoldState::Active,
            created_at: now,
            released_at: None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == HoldState::Active
    }

    pub fn mark_settled(&mut self, now: DateTime<Utc>) -> crate::Result<()> {
        self.transition(HoldState::Settled, now)
    }

    pub fn mark_released(&mut self, now: DateTime<Utc>) -> crate::Result<()> {
        self.transition(HoldState::Released, now)
    }

    fn transition(&mut self, target: HoldState, now: DateTime<Utc>) -> crate::Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(EconomyError::HoldNotActive {
                hold: self.id,
                state: self.status.to_string(),
            });
        }
        self.status = target;
        self.released_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_hold() -> EscrowHold {
        EscrowHold::new(LotId::new(), PlayerId::new(), 500, Utc::now())
    }

    #[test]
    fn state_transitions_valid() {
        assert!(HoldState::Active.can_transition_to(HoldState::Settled));
        assert!(HoldState::Active.can_transition_to(HoldState::Released));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!HoldState::Settled.can_transition_to(HoldState::Active));
        assert!(!HoldState::Settled.can_transition_to(HoldState::Released));
        assert!(!HoldState::Released.can_transition_to(HoldState::Active));
        assert!(!HoldState::Released.can_transition_to(HoldState::Settled));
    }

    #[test]
    fn settle_stamps_time() {
        let mut hold = make_hold();
        let now = Utc::now();
        hold.mark_settled(now).unwrap();
        assert_eq!(hold.status, HoldState::Settled);
        assert_eq!(hold.released_at, Some(now));
    }

    #[test]
    fn double_settle_blocked() {
        let mut hold = make_hold();
        hold.mark_settled(Utc::now()).unwrap();
        let err = hold.mark_settled(Utc::now()).unwrap_err();
        assert!(matches!(err, EconomyError::HoldNotActive { .. }));
    }

    #[test]
    fn released_cannot_be_settled() {
        let mut hold = make_hold();
        hold.mark_released(Utc::now()).unwrap();
        assert!(hold.mark_settled(Utc::now()).is_err());
        assert!(!hold.is_active());
    }
}
