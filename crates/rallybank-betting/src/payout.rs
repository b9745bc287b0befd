//! Bet payout arithmetic.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rallybank_types::{Credits, EconomyError, Result};

/// Credits paid for a won bet: `stake * multiplier`, rounded down to whole
/// minor units.
pub fn bet_payout(stake: Credits, multiplier: Decimal) -> Result<Credits> {
    let overflow = || EconomyError::InvalidAmount {
        reason: format!("payout for stake {stake} at {multiplier}x overflows"),
    };
    Decimal::from(stake)
        .checked_mul(multiplier)
        .ok_or_else(overflow)?
        .floor()
        .to_i64()
        .ok_or_else(overflow)
}
