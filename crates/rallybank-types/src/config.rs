//! Per-tournament economy configuration.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{constants, Credits, EconomyError, Result, TournamentId};

/// Everything the engine needs to know about one tournament.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentConfig {
    pub id: TournamentId,
    /// Whether ordinary debits may take a balance below zero.
    #[serde(default)]
    pub allow_negative_balance: bool,
    #[serde(default = "default_starting_grant")]
    pub starting_grant: Credits,
    /// A bet may not leave `balance - stake` under this value.
    #[serde(default = "default_min_protected_balance")]
    pub min_protected_balance: Credits,
    #[serde(default)]
    pub rewards: MatchRewards,
    #[serde(default)]
    pub betting: BettingLimits,
    #[serde(default)]
    pub auction: AuctionRules,
}

fn default_starting_grant() -> Credits {
    constants::DEFAULT_STARTING_GRANT
}

fn default_min_protected_balance() -> Credits {
    constants::DEFAULT_MIN_PROTECTED_BALANCE
}

impl TournamentConfig {
    /// Default configuration for a tournament.
    #[must_use]
    pub fn new(id: TournamentId) -> Self {
        Self {
            id,
            allow_negative_balance: false,
            starting_grant: constants::DEFAULT_STARTING_GRANT,
            min_protected_balance: constants::DEFAULT_MIN_PROTECTED_BALANCE,
            rewards: MatchRewards::default(),
            betting: BettingLimits::default(),
            auction: AuctionRules::default(),
        }
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.starting_grant < 0 {
            return Err(EconomyError::Configuration(
                "starting_grant must not be negative".into(),
            ));
        }
        self.rewards.validate()?;
        self.betting.validate()?;
        self.auction.validate()
    }
}

/// Match payout rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchRewards {
    /// Sets a team must win to take the match.
    pub sets_to_win: u8,
    pub win_reward: Credits,
    pub loss_reward: Credits,
    /// Paid to every participant of an unfinished match.
    pub unfinished_split_reward: Credits,
    /// Charged to every participant of an unfinished match.
    pub unfinished_penalty: Credits,
}

impl Default for MatchRewards {
    fn default() -> Self {
        Self {
            sets_to_win: constants::DEFAULT_SETS_TO_WIN,
            win_reward: constants::DEFAULT_WIN_REWARD,
            loss_reward: constants::DEFAULT_LOSS_REWARD,
            unfinished_split_reward: constants::DEFAULT_UNFINISHED_SPLIT_REWARD,
            unfinished_penalty: constants::DEFAULT_UNFINISHED_PENALTY,
        }
    }
}

impl MatchRewards {
    fn validate(&self) -> Result<()> {
        if self.sets_to_win == 0 {
            return Err(EconomyError::Configuration(
                "sets_to_win must be at least 1".into(),
            ));
        }
        let amounts = [
            self.win_reward,
            self.loss_reward,
            self.unfinished_split_reward,
            self.unfinished_penalty,
        ];
        if amounts.iter().any(|a| *a < 0) {
            return Err(EconomyError::Configuration(
                "match rewards and penalties are magnitudes and must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Betting caps and payout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BettingLimits {
    pub max_stake_per_bet: Credits,
    pub max_stake_per_round: Credits,
    /// A won bet pays `stake * payout_multiplier`, rounded down.
    pub payout_multiplier: Decimal,
}

impl Default for BettingLimits {
    fn default() -> Self {
        Self {
            max_stake_per_bet: constants::DEFAULT_MAX_STAKE_PER_BET,
            max_stake_per_round: constants::DEFAULT_MAX_STAKE_PER_ROUND,
            payout_multiplier: Decimal::ONE,
        }
    }
}

impl BettingLimits {
    fn validate(&self) -> Result<()> {
        if self.max_stake_per_bet <= 0 || self.max_stake_per_round <= 0 {
            return Err(EconomyError::Configuration(
                "stake caps must be positive".into(),
            ));
        }
        if self.payout_multiplier <= Decimal::ZERO {
            return Err(EconomyError::Configuration(
                "payout_multiplier must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Anti-sniping rules for lots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctionRules {
    pub anti_sniping_enabled: bool,
    /// A bid landing less than this many seconds before `ends_at` extends it.
    pub anti_snipe_window_secs: i64,
    /// Seconds added to `ends_at` per extension.
    pub anti_snipe_extension_secs: i64,
    /// Upper bound on extensions per lot, if any.
    pub max_extensions: Option<u32>,
}

impl Default for AuctionRules {
    fn default() -> Self {
        Self {
            anti_sniping_enabled: true,
            anti_snipe_window_secs: constants::DEFAULT_ANTI_SNIPE_WINDOW_SECS,
            anti_snipe_extension_secs: constants::DEFAULT_ANTI_SNIPE_EXTENSION_SECS,
            max_extensions: None,
        }
    }
}

impl AuctionRules {
    /// The anti-snipe window, or `None` if it does not fit a duration.
    #[must_use]
    pub fn window(&self) -> Option<Duration> {
        Duration::try_seconds(self.anti_snipe_window_secs)
    }

    /// The per-extension delay, or `None` if it does not fit a duration.
    #[must_use]
    pub fn extension(&self) -> Option<Duration> {
        Duration::try_seconds(self.anti_snipe_extension_secs)
    }

    fn validate(&self) -> Result<()> {
        if !self.anti_sniping_enabled {
            return Ok(());
        }
        let limit = constants::MAX_ANTI_SNIPE_SECS;
        for (name, secs) in [
            ("anti_snipe_window_secs", self.anti_snipe_window_secs),
            ("anti_snipe_extension_secs", self.anti_snipe_extension_secs),
        ] {
            if secs <= 0 || secs > limit {
                return Err(EconomyError::Configuration(format!(
                    "{name} must be between 1 and {limit} seconds, got {secs}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = TournamentConfig::new(TournamentId::new());
        assert!(cfg.validate().is_ok());
        assert!(!cfg.allow_negative_balance);
        assert_eq!(cfg.rewards.sets_to_win, 2);
        assert_eq!(cfg.betting.payout_multiplier, Decimal::ONE);
    }

    #[test]
    fn from_json_fills_defaults() {
        let id = TournamentId::new();
        let json = format!(
            r#"{{"id":"{}","allow_negative_balance":true,"betting":{{"payout_multiplier":"1.5"}}}}"#,
            id.0
        );
        let cfg = TournamentConfig::from_json(&json).unwrap();
        assert_eq!(cfg.id, id);
        assert!(cfg.allow_negative_balance);
        assert_eq!(cfg.betting.payout_multiplier, Decimal::new(15, 1));
        assert_eq!(cfg.betting.max_stake_per_bet, constants::DEFAULT_MAX_STAKE_PER_BET);
        assert_eq!(cfg.starting_grant, constants::DEFAULT_STARTING_GRANT);
    }

    #[test]
    fn from_json_rejects_zero_extension() {
        let json = format!(
            r#"{{"id":"{}","auction":{{"anti_snipe_extension_secs":0}}}}"#,
            TournamentId::new().0
        );
        let err = TournamentConfig::from_json(&json).unwrap_err();
        assert!(matches!(err, EconomyError::Configuration(_)));
    }

    #[test]
    fn anti_snipe_durations_are_bounded() {
        let mut cfg = TournamentConfig::new(TournamentId::new());
        cfg.auction.anti_snipe_window_secs = constants::MAX_ANTI_SNIPE_SECS;
        cfg.auction.anti_snipe_extension_secs = constants::MAX_ANTI_SNIPE_SECS;
        assert!(cfg.validate().is_ok());

        cfg.auction.anti_snipe_window_secs = i64::MAX / 10;
        assert!(matches!(cfg.validate(), Err(EconomyError::Configuration(_))));

        cfg.auction.anti_snipe_window_secs = 60;
        cfg.auction.anti_snipe_extension_secs = constants::MAX_ANTI_SNIPE_SECS + 1;
        assert!(cfg.validate().is_err());

        // Disabled rules are not checked.
        cfg.auction.anti_sniping_enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn from_json_malformed_is_serialization_error() {
        let err = TournamentConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, EconomyError::Serialization(_)));
    }

    #[test]
    fn zero_sets_to_win_rejected() {
        let mut cfg = TournamentConfig::new(TournamentId::new());
        cfg.rewards.sets_to_win = 0;
        assert!(cfg.validate().is_err());
    }
}
