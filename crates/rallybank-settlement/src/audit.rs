//! Ledger and escrow invariant audit.
//!
//! Checked for every player and every lot:
//! ```text
//! ∀ player: balance == Σ entries.amount
//! ∀ player: reserved == Σ Active holds
//! ∀ player: balance - reserved >= 0          (unless exempt)
//! ∀ live lot:  current_bid == winner's Active hold, no other Active holds
//! ∀ ended lot: winner settled, no Active holds
//! ∀ lot: accepted bids strictly increasing, last == current_bid
//! ```
//!
//! A player is exempt from the spendable check when any of their entries
//! belongs to a tournament that allows negative balances or is an admin
//! adjustment (which may have been forced).
//!
//! If any of these ever fails, something has gone badly wrong: the report
//! lists every violation and `verify` turns them into an error.

use std::collections::BTreeSet;
use std::sync::Arc;

use rallybank_auction::AuctionEngine;
use rallybank_ledger::{EscrowManager, Ledger};
use rallybank_types::{AuctionLot, EconomyError, EntryType, HoldState, PlayerId, Result};
use serde::{Deserialize, Serialize};

/// Result of one audit pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditReport {
    pub players_checked: usize,
    pub lots_checked: usize,
    pub violations: Vec<String>,
}

impl AuditReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

pub struct LedgerAudit {
    ledger: Arc<Ledger>,
    escrow: Arc<EscrowManager>,
    auctions: Arc<AuctionEngine>,
}

impl LedgerAudit {
    /// An audit over the engine, its escrow manager, and their ledger.
    #[must_use]
    pub fn new(auctions: Arc<AuctionEngine>) -> Self {
        let escrow = Arc::clone(auctions.escrow());
        let ledger = Arc::clone(escrow.ledger());
        Self {
            ledger,
            escrow,
            auctions,
        }
    }

    /// Check every invariant and collect the violations.
    #[must_use]
    pub fn run(&self) -> AuditReport {
        let mut report = AuditReport::default();

        let players: BTreeSet<PlayerId> = self
            .ledger
            .players()
            .into_iter()
            .chain(self.escrow.bidders())
            .collect();
        for player in &players {
            self.check_player(*player, &mut report.violations);
        }
        report.players_checked = players.len();

        let lots = self.auctions.all_lots();
        for lot in &lots {
            self.check_lot(lot, &mut report.violations);
        }
        report.lots_checked = lots.len();

        for violation in &report.violations {
            tracing::error!(violation = %violation, "Invariant audit failure");
        }
        report
    }

    /// [`LedgerAudit::run`], failing on the first violation.
    ///
    /// # Errors
    /// `InvariantViolation` naming the first failed check.
    pub fn verify(&self) -> Result<AuditReport> {
        let report = self.run();
        match report.violations.first() {
            None => Ok(report),
            Some(first) => Err(EconomyError::InvariantViolation {
                reason: format!("{first} ({} violations)", report.violations.len()),
            }),
        }
    }

    fn check_player(&self, player: PlayerId, violations: &mut Vec<String>) {
        let balance = self.ledger.balance_of(player);
        let replayed = self.ledger.replayed_balance_of(player);
        if balance != replayed {
            violations.push(format!("{player}: balance {balance} != Σ entries {replayed}"));
        }

        let reserved = self.ledger.reserved_of(player);
        let held = self.escrow.total_active_holds(player);
        if reserved != held {
            violations.push(format!("{player}: reserved {reserved} != Σ active holds {held}"));
        }

        if balance - reserved < 0 && !self.negative_allowed(player) {
            violations.push(format!(
                "{player}: spendable {} is negative",
                balance - reserved
            ));
        }
    }

    fn negative_allowed(&self, player: PlayerId) -> bool {
        self.ledger.history_of(player).iter().any(|e| {
            e.entry_type == EntryType::AdminAdjustment
                || self
                    .ledger
                    .tournament(e.tournament_id)
                    .is_ok_and(|cfg| cfg.allow_negative_balance)
        })
    }

    fn check_lot(&self, lot: &AuctionLot, violations: &mut Vec<String>) {
        let holds = self.escrow.holds_for_lot(lot.id);
        let active: Vec<_> = holds.iter().filter(|h| h.is_active()).collect();

        match (lot.is_live(), lot.current_winner_player_id, lot.current_bid) {
            (true, Some(winner), Some(bid)) => {
                match active.iter().find(|h| h.bidder_player_id == winner) {
                    Some(hold) if hold.reserved_amount == bid => {}
                    Some(hold) => violations.push(format!(
                        "{}: current bid {bid} but winner holds {}",
                        lot.id, hold.reserved_amount
                    )),
                    None => violations.push(format!("{}: winner {winner} has no active hold", lot.id)),
                }
                if active.len() > 1 {
                    violations.push(format!("{}: {} active holds on a live lot", lot.id, active.len()));
                }
            }
            (true, _, _) => {
                if !active.is_empty() {
                    violations.push(format!("{}: active holds without a current bid", lot.id));
                }
            }
            (false, winner, _) => {
                if !active.is_empty() {
                    violations.push(format!("{}: {} active holds on an ended lot", lot.id, active.len()));
                }
                if winner.is_some() {
                    let settled = holds.iter().any(|h| h.status == HoldState::Settled);
                    if !lot.settled || !self.escrow.is_settled(lot.id) || !settled {
                        violations.push(format!("{}: ended with a winner but not settled", lot.id));
                    }
                }
            }
        }

        match self.auctions.bids_of(lot.id) {
            Ok(bids) => {
                if !bids.windows(2).all(|w| w[0].amount < w[1].amount) {
                    violations.push(format!("{}: bid history not strictly increasing", lot.id));
                }
                if bids.last().map(|b| b.amount) != lot.current_bid {
                    violations.push(format!("{}: last bid does not match current bid", lot.id));
                }
            }
            Err(err) => violations.push(format!("{}: {err}", lot.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rallybank_types::{
        Clock, ManualClock, NewLot, PledgeItemId, TournamentConfig, TournamentId,
    };

    fn setup() -> (LedgerAudit, Arc<AuctionEngine>, Arc<ManualClock>, TournamentId) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = Arc::new(Ledger::new(clock.clone()));
        let t = TournamentId::new();
        ledger.register_tournament(TournamentConfig::new(t)).unwrap();
        let escrow = Arc::new(EscrowManager::new(ledger));
        let auctions = Arc::new(AuctionEngine::new(escrow));
        (LedgerAudit::new(Arc::clone(&auctions)), auctions, clock, t)
    }

    #[test]
    fn clean_engine_passes() {
        let (audit, auctions, clock, t) = setup();
        let ledger = Arc::clone(auctions.escrow().ledger());
        let auction = auctions.open_auction(t, "a").unwrap();
        let lot = auctions
            .open_lot(NewLot {
                auction_id: auction.id,
                pledge_item_id: PledgeItemId::new(),
                pledged_by: PlayerId::new(),
                estimate_low: 100,
                estimate_high: 200,
                min_increment: 10,
                ends_at: clock.now() + Duration::minutes(5),
            })
            .unwrap();
        let (a, b) = (PlayerId::new(), PlayerId::new());
        ledger.grant_starting_credits(t, a).unwrap();
        ledger.grant_starting_credits(t, b).unwrap();
        auctions.place_bid(lot.id, a, 100).unwrap();
        auctions.place_bid(lot.id, b, 150).unwrap();

        let report = audit.verify().unwrap();
        assert_eq!(report.players_checked, 2);
        assert_eq!(report.lots_checked, 1);

        clock.advance(Duration::minutes(6));
        auctions.close(lot.id).unwrap();
        assert!(audit.run().is_clean());
    }

    #[test]
    fn drift_is_reported() {
        let (audit, auctions, _, t) = setup();
        let ledger = auctions.escrow().ledger();
        let p = PlayerId::new();
        ledger.grant_starting_credits(t, p).unwrap();
        ledger.corrupt_cached_balance(p, 5);

        let report = audit.run();
        assert_eq!(report.violations.len(), 1);
        assert!(report.violations[0].contains("Σ entries"));
        let err = audit.verify().unwrap_err();
        assert!(matches!(err, EconomyError::InvariantViolation { .. }));

        assert!(ledger.reconcile(p).corrected);
        assert!(audit.run().is_clean());
    }

    #[test]
    fn forced_negative_balance_is_exempt() {
        let (audit, auctions, _, t) = setup();
        let ledger = auctions.escrow().ledger();
        let p = PlayerId::new();
        ledger.adjust_balance(t, p, -10, "chargeback", true).unwrap();
        assert!(audit.run().is_clean());
    }
}
