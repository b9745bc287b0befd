//! Auction and lot model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AuctionId, BidId, Credits, EconomyError, LotId, PledgeItemId, PlayerId, Result, TournamentId};

/// Lot lifecycle. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LotStatus {
    Live,
    Ended,
}

impl std::fmt::Display for LotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "LIVE"),
            Self::Ended => write!(f, "ENDED"),
        }
    }
}

/// An auction groups the lots of one tournament that close together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    pub id: AuctionId,
    pub tournament_id: TournamentId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Set when close-out starts. A closed auction accepts no new lots.
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Auction {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

/// One auctionable item and its bidding state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionLot {
    pub id: LotId,
    pub auction_id: AuctionId,
    pub tournament_id: TournamentId,
    pub pledge_item_id: PledgeItemId,
    /// The player who contributed the pledge. Cannot bid on it.
    pub pledged_by: PlayerId,
    /// Lower end of the estimate; the first bid must reach it.
    pub estimate_low: Credits,
    pub estimate_high: Credits,
    pub current_bid: Option<Credits>,
    pub current_winner_player_id: Option<PlayerId>,
    pub min_increment: Credits,
    pub ends_at: DateTime<Utc>,
    pub extensions_count: u32,
    pub status: LotStatus,
    /// Bumped on every accepted bid.
    pub version: u64,
    /// Set once the winner's hold has become a ledger debit.
    pub settled: bool,
}

impl AuctionLot {
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status == LotStatus::Live
    }

    /// The smallest bid the lot accepts next.
    #[must_use]
    pub fn minimum_next_bid(&self) -> Credits {
        match self.current_bid {
            Some(bid) => bid.saturating_add(self.min_increment),
            None => self.estimate_low,
        }
    }
}

/// Parameters for opening a lot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLot {
    pub auction_id: AuctionId,
    pub pledge_item_id: PledgeItemId,
    pub pledged_by: PlayerId,
    pub estimate_low: Credits,
    pub estimate_high: Credits,
    pub min_increment: Credits,
    pub ends_at: DateTime<Utc>,
}

impl NewLot {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if self.estimate_low <= 0 {
            return Err(EconomyError::InvalidLot {
                reason: "estimate_low must be positive".into(),
            });
        }
        if self.estimate_high < self.estimate_low {
            return Err(EconomyError::InvalidLot {
                reason: format!(
                    "estimate range {}..{} is inverted",
                    self.estimate_low, self.estimate_high
                ),
            });
        }
        if self.min_increment <= 0 {
            return Err(EconomyError::InvalidLot {
                reason: "min_increment must be positive".into(),
            });
        }
        if self.ends_at <= now {
            return Err(EconomyError::InvalidLot {
                reason: "ends_at must be in the future".into(),
            });
        }
        Ok(())
    }
}

/// Immutable record of an accepted bid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub lot_id: LotId,
    pub bidder_player_id: PlayerId,
    pub amount: Credits,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_lot() -> AuctionLot {
        AuctionLot {
            id: LotId::new(),
            auction_id: AuctionId::new(),
            tournament_id: TournamentId::new(),
            pledge_item_id: PledgeItemId::new(),
            pledged_by: PlayerId::new(),
            estimate_low: 1000,
            estimate_high: 2000,
            current_bid: None,
            current_winner_player_id: None,
            min_increment: 500,
            ends_at: Utc::now(),
            extensions_count: 0,
            status: LotStatus::Live,
            version: 0,
            settled: false,
        }
    }

    #[test]
    fn minimum_next_bid_starts_at_estimate() {
        let mut lot = make_lot();
        assert_eq!(lot.minimum_next_bid(), 1000);
        lot.current_bid = Some(2500);
        assert_eq!(lot.minimum_next_bid(), 3000);
    }

    #[test]
    fn new_lot_validation() {
        let now = Utc::now();
        let good = NewLot {
            auction_id: AuctionId::new(),
            pledge_item_id: PledgeItemId::new(),
            pledged_by: PlayerId::new(),
            estimate_low: 1000,
            estimate_high: 2000,
            min_increment: 500,
            ends_at: now + chrono::Duration::hours(1),
        };
        assert!(good.validate(now).is_ok());

        let mut inverted = good.clone();
        inverted.estimate_high = 500;
        assert!(inverted.validate(now).is_err());

        let mut no_increment = good.clone();
        no_increment.min_increment = 0;
        assert!(no_increment.validate(now).is_err());

        let mut past = good;
        past.ends_at = now;
        assert!(past.validate(now).is_err());
    }

    #[test]
    fn lot_status_display() {
        assert_eq!(LotStatus::Live.to_string(), "LIVE");
        assert_eq!(LotStatus::Ended.to_string(), "ENDED");
    }
}
