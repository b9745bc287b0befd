//! Pure lot rules.
//!
//! No locks, no ledger, no clock: every function takes the lot and the
//! instant it is evaluated at, so the engine decides *when* and these decide
//! *whether*.

use chrono::{DateTime, Utc};
use rallybank_types::{AuctionLot, AuctionRules, Credits, EconomyError, PlayerId, Result};

/// Check a bid against the lot's current state.
///
/// Order of checks:
/// 1. The lot is Live and its deadline has not passed (`LotNotLive`)
/// 2. The bidder does not own the pledge (`SelfBid`)
/// 3. The amount reaches the minimum next bid (`BidTooLow`)
pub fn validate_bid(
    lot: &AuctionLot,
    bidder: PlayerId,
    amount: Credits,
    now: DateTime<Utc>,
) -> Result<()> {
    if !lot.is_live() || now >= lot.ends_at {
        return Err(EconomyError::LotNotLive(lot.id));
    }
    if bidder == lot.pledged_by {
        return Err(EconomyError::SelfBid);
    }
    let minimum = lot.minimum_next_bid();
    if amount < minimum {
        return Err(EconomyError::BidTooLow {
            minimum,
            offered: amount,
        });
    }
    Ok(())
}

/// The extended deadline if a bid accepted at `now` lands inside the
/// anti-snipe window, `None` otherwise.
///
/// The returned deadline is always strictly later than `lot.ends_at`.
///
/// # Errors
/// `Configuration` if the window or extension cannot be applied to the
/// lot's deadline without overflowing.
pub fn anti_snipe_deadline(
    lot: &AuctionLot,
    rules: &AuctionRules,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    if !rules.anti_sniping_enabled {
        return Ok(None);
    }
    if rules
        .max_extensions
        .is_some_and(|max| lot.extensions_count >= max)
    {
        return Ok(None);
    }
    let overflow = |what: &str| {
        EconomyError::Configuration(format!("anti-snipe {what} overflows the deadline of {}", lot.id))
    };
    let opens_at = rules
        .window()
        .and_then(|w| lot.ends_at.checked_sub_signed(w))
        .ok_or_else(|| overflow("window"))?;
    if now < opens_at {
        return Ok(None);
    }
    let extended = rules
        .extension()
        .and_then(|e| lot.ends_at.checked_add_signed(e))
        .ok_or_else(|| overflow("extension"))?;
    Ok((extended > lot.ends_at).then_some(extended))
}

/// Whether the lot should be closed at `now`.
#[must_use]
pub fn is_expired(lot: &AuctionLot, now: DateTime<Utc>) -> bool {
    lot.is_live() && now >= lot.ends_at
}
