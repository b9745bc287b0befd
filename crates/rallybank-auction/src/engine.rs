//! The auction engine: lot registry and the `Live → Ended` state machine.
//!
//! Every lot sits behind its own mutex. A bid, a close, and a sweep of the
//! same lot serialize on it, which gives each lot a single linear history of
//! current-winner transitions. Lock order is lot → escrow → player account.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rallybank_ledger::{EscrowManager, Ledger};
use rallybank_types::{
    Auction, AuctionId, AuctionLot, Bid, BidId, Clock, Credits, EconomyError, LedgerEntry, LotId,
    LotStatus, NewLot, PlayerId, Result, TournamentId,
};

use crate::rules;

/// A lot and its immutable bid log.
#[derive(Debug)]
struct LotRecord {
    lot: AuctionLot,
    bids: Vec<Bid>,
}

/// What a close did to a lot.
#[derive(Debug, Clone)]
pub struct LotClosure {
    pub lot: AuctionLot,
    /// The lot transitioned `Live → Ended` during this call.
    pub newly_ended: bool,
    /// The winner's `AuctionSettlement` entry, when written during this call.
    pub settlement: Option<LedgerEntry>,
}

pub struct AuctionEngine {
    ledger: Arc<Ledger>,
    escrow: Arc<EscrowManager>,
    auctions: DashMap<AuctionId, Auction>,
    lots: DashMap<LotId, Arc<Mutex<LotRecord>>>,
    clock: Arc<dyn Clock>,
}

impl AuctionEngine {
    /// An engine sharing the escrow manager's ledger and clock.
    #[must_use]
    pub fn new(escrow: Arc<EscrowManager>) -> Self {
        let ledger = Arc::clone(escrow.ledger());
        let clock = ledger.clock();
        Self {
            ledger,
            escrow,
            auctions: DashMap::new(),
            lots: DashMap::new(),
            clock,
        }
    }

    #[must_use]
    pub fn escrow(&self) -> &Arc<EscrowManager> {
        &self.escrow
    }

    // =================================================================
    // Registry
    // =================================================================

    /// Open an auction for a registered tournament.
    pub fn open_auction(&self, tournament: TournamentId, name: impl Into<String>) -> Result<Auction> {
        self.ledger.tournament(tournament)?;
        let auction = Auction {
            id: AuctionId::new(),
            tournament_id: tournament,
            name: name.into(),
            created_at: self.clock.now(),
            closed_at: None,
        };
        self.auctions.insert(auction.id, auction.clone());
        tracing::info!(auction = %auction.id, tournament = %tournament, "Auction opened");
        Ok(auction)
    }

    /// A snapshot of the auction.
    pub fn auction(&self, id: AuctionId) -> Result<Auction> {
        self.auctions
            .get(&id)
            .map(|a| a.value().clone())
            .ok_or(EconomyError::AuctionNotFound(id))
    }

    /// Stop the auction from taking new lots. Idempotent; the first close
    /// time is kept.
    pub fn close_auction(&self, id: AuctionId) -> Result<Auction> {
        let mut auction = self
            .auctions
            .get_mut(&id)
            .ok_or(EconomyError::AuctionNotFound(id))?;
        if auction.closed_at.is_none() {
            auction.closed_at = Some(self.clock.now());
            tracing::info!(auction = %id, "Auction closed to new lots");
        }
        Ok(auction.clone())
    }

    /// Put a pledge up for bidding.
    ///
    /// # Errors
    /// `AuctionNotFound`, `AuctionClosed` once close-out has started,
    /// `InvalidLot`.
    pub fn open_lot(&self, new: NewLot) -> Result<AuctionLot> {
        // Held until the lot is registered, so a concurrent close either
        // rejects this lot or sees it in `lots_of`.
        let auction = self
            .auctions
            .get(&new.auction_id)
            .ok_or(EconomyError::AuctionNotFound(new.auction_id))?;
        if auction.is_closed() {
            return Err(EconomyError::AuctionClosed(auction.id));
        }
        new.validate(self.clock.now())?;
        let lot = AuctionLot {
            id: LotId::new(),
            auction_id: auction.id,
            tournament_id: auction.tournament_id,
            pledge_item_id: new.pledge_item_id,
            pledged_by: new.pledged_by,
            estimate_low: new.estimate_low,
            estimate_high: new.estimate_high,
            current_bid: None,
            current_winner_player_id: None,
            min_increment: new.min_increment,
            ends_at: new.ends_at,
            extensions_count: 0,
            status: LotStatus::Live,
            version: 0,
            settled: false,
        };
        self.lots.insert(
            lot.id,
            Arc::new(Mutex::new(LotRecord {
                lot: lot.clone(),
                bids: Vec::new(),
            })),
        );
        drop(auction);
        tracing::info!(
            lot = %lot.id,
            auction = %lot.auction_id,
            estimate_low = lot.estimate_low,
            ends_at = %lot.ends_at,
            "Lot opened"
        );
        Ok(lot)
    }

    // =================================================================
    // Bidding
    // =================================================================

    /// Place a bid and return the lot state it produced.
    ///
    /// Every check that can fail runs before the hold is taken. The new hold
    /// is recorded before the previous winner's hold is released; a failed
    /// hold leaves the lot untouched.
    ///
    /// # Errors
    /// `LotNotFound`, `LotNotLive`, `SelfBid`, `BidTooLow`,
    /// `InsufficientSpendable`, `Configuration` for anti-snipe rules that
    /// overflow the deadline.
    pub fn place_bid(&self, lot_id: LotId, bidder: PlayerId, amount: Credits) -> Result<AuctionLot> {
        let record = self.record(lot_id)?;
        let mut record = record.lock();
        let now = self.clock.now();

        rules::validate_bid(&record.lot, bidder, amount, now)?;
        let config = self.ledger.tournament(record.lot.tournament_id)?;
        let extended = rules::anti_snipe_deadline(&record.lot, &config.auction, now)?;

        self.escrow.hold(lot_id, bidder, amount)?;
        let previous = record.lot.current_winner_player_id;
        if let Some(previous) = previous.filter(|p| *p != bidder) {
            self.escrow.release(lot_id, previous);
        }

        let lot = &mut record.lot;
        lot.current_bid = Some(amount);
        lot.current_winner_player_id = Some(bidder);
        lot.version += 1;
        if let Some(ends_at) = extended {
            tracing::info!(
                lot = %lot_id,
                from = %lot.ends_at,
                to = %ends_at,
                extensions = lot.extensions_count + 1,
                "Anti-snipe extension"
            );
            lot.ends_at = ends_at;
            lot.extensions_count += 1;
        }
        let lot = lot.clone();

        record.bids.push(Bid {
            id: BidId::new(),
            lot_id,
            bidder_player_id: bidder,
            amount,
            created_at: now,
        });

        tracing::info!(
            lot = %lot_id,
            bidder = %bidder,
            amount,
            previous = ?previous,
            version = lot.version,
            "Bid accepted"
        );
        Ok(lot)
    }

    // =================================================================
    // Closing
    // =================================================================

    /// Close a lot whose deadline has passed. Closing an Ended lot is a
    /// no-op, except that a winner settlement which failed earlier is
    /// retried.
    ///
    /// # Errors
    /// `LotStillLive` before the deadline; escrow errors from settlement.
    pub fn close(&self, lot_id: LotId) -> Result<LotClosure> {
        let record = self.record(lot_id)?;
        let mut record = record.lock();
        let now = self.clock.now();
        if record.lot.is_live() && now < record.lot.ends_at {
            return Err(EconomyError::LotStillLive {
                lot: lot_id,
                ends_at: record.lot.ends_at,
            });
        }
        self.close_locked(&mut record, now)
    }

    /// Close a lot regardless of its deadline. Used when an auction is
    /// settled as a whole.
    pub fn force_close(&self, lot_id: LotId) -> Result<LotClosure> {
        let record = self.record(lot_id)?;
        let mut record = record.lock();
        let now = self.clock.now();
        self.close_locked(&mut record, now)
    }

    fn close_locked(&self, record: &mut LotRecord, now: DateTime<Utc>) -> Result<LotClosure> {
        let lot_id = record.lot.id;
        let newly_ended = record.lot.is_live();
        if newly_ended {
            record.lot.status = LotStatus::Ended;
            tracing::info!(
                lot = %lot_id,
                winner = ?record.lot.current_winner_player_id,
                amount = ?record.lot.current_bid,
                at = %now,
                "Lot closed"
            );
        } else {
            tracing::debug!(lot = %lot_id, "Lot already ended");
        }

        let mut settlement = None;
        if let (Some(winner), Some(amount), false) = (
            record.lot.current_winner_player_id,
            record.lot.current_bid,
            record.lot.settled,
        ) {
            match self.escrow.settle(&record.lot, winner, amount) {
                Ok(entry) => settlement = Some(entry),
                Err(EconomyError::LotAlreadySettled(_)) => {}
                Err(err) => {
                    tracing::warn!(lot = %lot_id, error = %err, "Lot ended but settlement failed");
                    return Err(err);
                }
            }
            record.lot.settled = true;
        }

        let stray = self
            .escrow
            .release_all_except(lot_id, record.lot.current_winner_player_id);
        if !stray.is_empty() {
            tracing::warn!(lot = %lot_id, count = stray.len(), "Released stray holds on close");
        }

        Ok(LotClosure {
            lot: record.lot.clone(),
            newly_ended,
            settlement,
        })
    }

    /// Close every Live lot whose deadline has passed. Failures are logged
    /// and left for the next sweep.
    pub fn sweep_expired(&self) -> Vec<LotClosure> {
        let now = self.clock.now();
        let records: Vec<Arc<Mutex<LotRecord>>> =
            self.lots.iter().map(|r| Arc::clone(r.value())).collect();

        let mut closed = Vec::new();
        for record in records {
            let mut record = record.lock();
            if !rules::is_expired(&record.lot, now) {
                continue;
            }
            match self.close_locked(&mut record, now) {
                Ok(closure) => closed.push(closure),
                Err(err) => {
                    tracing::warn!(lot = %record.lot.id, error = %err, "Expiry sweep could not close lot");
                }
            }
        }
        if !closed.is_empty() {
            tracing::info!(count = closed.len(), "Expired lots closed");
        }
        closed
    }

    // =================================================================
    // Reads
    // =================================================================

    /// A snapshot of the lot, taken under its lock.
    pub fn lot(&self, lot_id: LotId) -> Result<AuctionLot> {
        let record = self.record(lot_id)?;
        let record = record.lock();
        Ok(record.lot.clone())
    }

    /// Lots of one auction, in creation order.
    #[must_use]
    pub fn lots_of(&self, auction: AuctionId) -> Vec<AuctionLot> {
        let mut lots: Vec<AuctionLot> = self
            .all_lots()
            .into_iter()
            .filter(|l| l.auction_id == auction)
            .collect();
        lots.sort_by_key(|l| l.id);
        lots
    }

    /// Every lot the engine knows about.
    #[must_use]
    pub fn all_lots(&self) -> Vec<AuctionLot> {
        let records: Vec<Arc<Mutex<LotRecord>>> =
            self.lots.iter().map(|r| Arc::clone(r.value())).collect();
        records.iter().map(|r| r.lock().lot.clone()).collect()
    }

    /// Accepted bids on a lot, oldest first.
    pub fn bids_of(&self, lot_id: LotId) -> Result<Vec<Bid>> {
        let record = self.record(lot_id)?;
        let record = record.lock();
        Ok(record.bids.clone())
    }

    /// The smallest amount the lot accepts next.
    pub fn minimum_next_bid(&self, lot_id: LotId) -> Result<Credits> {
        Ok(self.lot(lot_id)?.minimum_next_bid())
    }

    fn record(&self, lot_id: LotId) -> Result<Arc<Mutex<LotRecord>>> {
        self.lots
            .get(&lot_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or(EconomyError::LotNotFound(lot_id))
    }
}
