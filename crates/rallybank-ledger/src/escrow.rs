//! Escrow manager: reserves, releases, and settles bid holds.
//!
//! A hold lowers the bidder's spendable balance without touching the ledger
//! balance. Each (lot, bidder) pair has at most one Active hold; a higher bid
//! by the same bidder replaces it within the same reservation step, so there
//! is never a window where both or neither are counted.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rallybank_types::{
    AuctionLot, Clock, Credits, EconomyError, EntryId, EntryType, EscrowHold, HoldId, HoldState,
    IdempotencyKey, LedgerEntry, LotId, LotStatus, NewEntry, PlayerId, Result,
};

use crate::ledger::Ledger;

/// Manages escrow holds against the [`Ledger`].
pub struct EscrowManager {
    ledger: Arc<Ledger>,
    /// Every hold ever created, in any state.
    holds: DashMap<HoldId, EscrowHold>,
    /// The Active hold per (lot, bidder).
    active: DashMap<(LotId, PlayerId), HoldId>,
    /// Lots whose winning hold has become a ledger debit.
    settled_lots: DashMap<LotId, EntryId>,
    clock: Arc<dyn Clock>,
}

impl EscrowManager {
    #[must_use]
    pub fn new(ledger: Arc<Ledger>) -> Self {
        let clock = ledger.clock();
        Self {
            ledger,
            holds: DashMap::new(),
            active: DashMap::new(),
            settled_lots: DashMap::new(),
            clock,
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Create or replace the bidder's Active hold on a lot.
    ///
    /// # Errors
    /// - `InvalidAmount` if `amount` is not positive
    /// - `InsufficientSpendable` if `amount` exceeds the bidder's spendable
    ///   balance (their existing hold on this lot counts as spendable)
    pub fn hold(&self, lot: LotId, bidder: PlayerId, amount: Credits) -> Result<EscrowHold> {
        if amount <= 0 {
            return Err(EconomyError::InvalidAmount {
                reason: format!("hold amount {amount} must be positive"),
            });
        }
        let now = self.clock.now();
        let hold = EscrowHold::new(lot, bidder, amount, now);

        match self.active.entry((lot, bidder)) {
            Entry::Occupied(mut slot) => {
                let previous_id = *slot.get();
                let previous_amount = self
                    .holds
                    .get(&previous_id)
                    .map_or(0, |h| h.reserved_amount);
                self.ledger.reserve(bidder, amount, previous_amount)?;
                self.holds.insert(hold.id, hold.clone());
                slot.insert(hold.id);
                if let Some(mut previous) = self.holds.get_mut(&previous_id) {
                    if let Err(err) = previous.mark_released(now) {
                        tracing::error!(hold = %previous_id, error = %err, "Replaced hold was not active");
                    }
                }
                tracing::debug!(
                    lot = %lot,
                    bidder = %bidder,
                    amount,
                    replaced = previous_amount,
                    "Escrow hold replaced"
                );
            }
            Entry::Vacant(slot) => {
                self.ledger.reserve(bidder, amount, 0)?;
                self.holds.insert(hold.id, hold.clone());
                slot.insert(hold.id);
                tracing::debug!(lot = %lot, bidder = %bidder, amount, "Escrow hold placed");
            }
        }
        Ok(hold)
    }

    /// Release the bidder's Active hold on a lot, making the credits
    /// spendable again. Releasing when no Active hold exists is a no-op.
    pub fn release(&self, lot: LotId, bidder: PlayerId) -> Option<EscrowHold> {
        let Some((_, hold_id)) = self.active.remove(&(lot, bidder)) else {
            tracing::debug!(lot = %lot, bidder = %bidder, "No active hold to release");
            return None;
        };
        let now = self.clock.now();
        let mut hold = self.holds.get_mut(&hold_id)?;
        if let Err(err) = hold.mark_released(now) {
            tracing::error!(hold = %hold_id, error = %err, "Indexed hold was not active");
            return None;
        }
        let released = hold.clone();
        drop(hold);
        self.ledger.unreserve(bidder, released.reserved_amount);
        tracing::debug!(lot = %lot, bidder = %bidder, amount = released.reserved_amount, "Escrow hold released");
        Some(released)
    }

    /// Release every Active hold on the lot except `keep`'s.
    pub fn release_all_except(&self, lot: LotId, keep: Option<PlayerId>) -> Vec<EscrowHold> {
        let bidders: Vec<PlayerId> = self
            .active
            .iter()
            .filter(|e| e.key().0 == lot && Some(e.key().1) != keep)
            .map(|e| e.key().1)
            .collect();
        bidders
            .into_iter()
            .filter_map(|bidder| self.release(lot, bidder))
            .collect()
    }

    /// Convert the winner's Active hold into an `AuctionSettlement` debit.
    ///
    /// At most once per lot. The lot must be Ended, and `winner`/`amount`
    /// must be its current winner and bid.
    pub fn settle(&self, lot: &AuctionLot, winner: PlayerId, amount: Credits) -> Result<LedgerEntry> {
        if lot.status != LotStatus::Ended {
            return Err(EconomyError::LotNotSettleable {
                lot: lot.id,
                reason: format!("lot is {}", lot.status),
            });
        }
        if lot.current_winner_player_id != Some(winner) || lot.current_bid != Some(amount) {
            return Err(EconomyError::LotNotSettleable {
                lot: lot.id,
                reason: format!("{winner} at {amount} is not the lot's winning bid"),
            });
        }

        let slot = match self.settled_lots.entry(lot.id) {
            Entry::Occupied(_) => {
                tracing::warn!(lot = %lot.id, "Double settlement attempt rejected");
                return Err(EconomyError::LotAlreadySettled(lot.id));
            }
            Entry::Vacant(slot) => slot,
        };

        let hold_id = self
            .active
            .get(&(lot.id, winner))
            .map(|h| *h.value())
            .ok_or(EconomyError::HoldNotFound {
                lot: lot.id,
                bidder: winner,
            })?;
        let reserved = self
            .holds
            .get(&hold_id)
            .map_or(0, |h| h.reserved_amount);
        if reserved != amount {
            return Err(EconomyError::InvariantViolation {
                reason: format!(
                    "winning bid {amount} on {} but hold {hold_id} reserves {reserved}",
                    lot.id
                ),
            });
        }

        let entry = self.ledger.settle_reserved(
            winner,
            reserved,
            NewEntry::new(winner, lot.tournament_id, EntryType::AuctionSettlement, -amount)
                .with_lot(lot.id)
                .with_note(format!("won {}", lot.pledge_item_id))
                .with_key(IdempotencyKey::lot_settlement(lot.id)),
        )?;

        self.active.remove(&(lot.id, winner));
        if let Some(mut hold) = self.holds.get_mut(&hold_id) {
            if let Err(err) = hold.mark_settled(self.clock.now()) {
                tracing::error!(hold = %hold_id, error = %err, "Settled hold was not active");
            }
        }
        slot.insert(entry.id);

        tracing::info!(
            lot = %lot.id,
            winner = %winner,
            amount,
            entry = %entry.id,
            "Lot escrow settled"
        );
        Ok(entry)
    }

    // =================================================================
    // Reads
    // =================================================================

    /// A hold by id, in whatever state it is in.
    #[must_use]
    pub fn get(&self, hold_id: &HoldId) -> Option<EscrowHold> {
        self.holds.get(hold_id).map(|h| h.value().clone())
    }

    /// The bidder's Active hold on the lot.
    #[must_use]
    pub fn active_hold(&self, lot: LotId, bidder: PlayerId) -> Option<EscrowHold> {
        let hold_id = *self.active.get(&(lot, bidder))?.value();
        self.get(&hold_id)
    }

    /// Every hold ever placed on the lot, oldest first.
    #[must_use]
    pub fn holds_for_lot(&self, lot: LotId) -> Vec<EscrowHold> {
        let mut holds: Vec<EscrowHold> = self
            .holds
            .iter()
            .filter(|h| h.lot_id == lot)
            .map(|h| h.value().clone())
            .collect();
        holds.sort_by_key(|h| h.id);
        holds
    }

    /// Σ of the player's Active holds, recomputed from hold records.
    #[must_use]
    pub fn total_active_holds(&self, player: PlayerId) -> Credits {
        self.holds
            .iter()
            .filter(|h| h.bidder_player_id == player && h.status == HoldState::Active)
            .map(|h| h.reserved_amount)
            .sum()
    }

    /// `balance - Σ Active holds`.
    #[must_use]
    pub fn spendable_of(&self, player: PlayerId) -> Credits {
        self.ledger.spendable_of(player)
    }

    /// Whether the lot's winning hold has become a ledger debit.
    #[must_use]
    pub fn is_settled(&self, lot: LotId) -> bool {
        self.settled_lots.contains_key(&lot)
    }

    /// Number of holds currently Active.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Every player who has ever held escrow.
    #[must_use]
    pub fn bidders(&self) -> Vec<PlayerId> {
        let mut bidders: Vec<PlayerId> = self.holds.iter().map(|h| h.bidder_player_id).collect();
        bidders.sort();
        bidders.dedup();
        bidders
    }
}
