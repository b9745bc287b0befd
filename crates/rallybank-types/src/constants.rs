//! System-wide constants for the RallyBank economy engine.
//!
//! All amounts are integer minor currency units (cents).

/// Credits granted to each player on joining a tournament.
pub const DEFAULT_STARTING_GRANT: i64 = 2_000;

/// Balance a player must keep after staking a bet.
pub const DEFAULT_MIN_PROTECTED_BALANCE: i64 = 0;

/// Sets needed to win a match (best of three).
pub const DEFAULT_SETS_TO_WIN: u8 = 2;

/// Match payout per winning player.
pub const DEFAULT_WIN_REWARD: i64 = 300;

/// Match payout per losing player.
pub const DEFAULT_LOSS_REWARD: i64 = 100;

/// Payout per player when a match is left unfinished.
pub const DEFAULT_UNFINISHED_SPLIT_REWARD: i64 = 150;

/// Penalty per player when a match is left unfinished.
pub const DEFAULT_UNFINISHED_PENALTY: i64 = 50;

/// Largest stake accepted on a single bet.
pub const DEFAULT_MAX_STAKE_PER_BET: i64 = 500;

/// Largest total stake a player may place across one round.
pub const DEFAULT_MAX_STAKE_PER_ROUND: i64 = 1_000;

/// Anti-sniping threshold window before `ends_at`, in seconds.
pub const DEFAULT_ANTI_SNIPE_WINDOW_SECS: i64 = 120;

/// How far a late bid pushes `ends_at`, in seconds.
pub const DEFAULT_ANTI_SNIPE_EXTENSION_SECS: i64 = 120;

/// Upper bound for the anti-snipe window and extension: 30 days.
pub const MAX_ANTI_SNIPE_SECS: i64 = 30 * 24 * 60 * 60;

/// Interval between lot-expiry sweeps, in milliseconds.
pub const DEFAULT_EXPIRY_SWEEP_MS: u64 = 1_000;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "RallyBank";
