//! Match, result, and bet model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BetId, Credits, EconomyError, MatchId, PlayerId, Result, RoundId, TournamentId};

/// One side of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    A,
    B,
}

impl Team {
    #[must_use]
    pub fn opponent(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// A scheduled match, as handed over by the external scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchInfo {
    pub id: MatchId,
    pub round_id: RoundId,
    pub tournament_id: TournamentId,
    pub team_a: Vec<PlayerId>,
    pub team_b: Vec<PlayerId>,
}

impl MatchInfo {
    #[must_use]
    pub fn is_participant(&self, player: PlayerId) -> bool {
        self.team_a.contains(&player) || self.team_b.contains(&player)
    }

    #[must_use]
    pub fn team(&self, team: Team) -> &[PlayerId] {
        match team {
            Team::A => &self.team_a,
            Team::B => &self.team_b,
        }
    }

    /// Both teams non-empty, no player on both sides.
    pub fn validate(&self) -> Result<()> {
        if self.team_a.is_empty() || self.team_b.is_empty() {
            return Err(EconomyError::InvalidMatch {
                reason: format!("{} needs players on both teams", self.id),
            });
        }
        if self.team_a.iter().any(|p| self.team_b.contains(p)) {
            return Err(EconomyError::InvalidMatch {
                reason: format!("{} has a player on both teams", self.id),
            });
        }
        Ok(())
    }

    /// All participants, team A first.
    pub fn participants(&self) -> impl Iterator<Item = (Team, PlayerId)> + '_ {
        self.team_a
            .iter()
            .map(|p| (Team::A, *p))
            .chain(self.team_b.iter().map(|p| (Team::B, *p)))
    }
}

/// A reported score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_id: MatchId,
    pub sets_a: u8,
    pub sets_b: u8,
    /// The match stopped before either team reached the winning-set count.
    pub unfinished: bool,
}

/// What a legal score means for payouts and bets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    Won(Team),
    /// Stopped early. `leader` is the team ahead on sets, if any.
    Unfinished { leader: Option<Team> },
}

impl MatchOutcome {
    /// The team bets are settled against, if any.
    #[must_use]
    pub fn betting_winner(self) -> Option<Team> {
        match self {
            Self::Won(team) => Some(team),
            Self::Unfinished { leader } => leader,
        }
    }
}

impl MatchResult {
    /// Check score legality against the winning-set threshold.
    pub fn outcome(&self, sets_to_win: u8) -> Result<MatchOutcome> {
        let (a, b) = (self.sets_a, self.sets_b);
        if self.unfinished {
            if a >= sets_to_win || b >= sets_to_win {
                return Err(EconomyError::InvalidScore {
                    reason: format!(
                        "{a}-{b} flagged unfinished but a team reached {sets_to_win} sets"
                    ),
                });
            }
            let leader = match a.cmp(&b) {
                std::cmp::Ordering::Greater => Some(Team::A),
                std::cmp::Ordering::Less => Some(Team::B),
                std::cmp::Ordering::Equal => None,
            };
            return Ok(MatchOutcome::Unfinished { leader });
        }
        match (a == sets_to_win, b == sets_to_win) {
            (true, false) if b < sets_to_win => Ok(MatchOutcome::Won(Team::A)),
            (false, true) if a < sets_to_win => Ok(MatchOutcome::Won(Team::B)),
            _ => Err(EconomyError::InvalidScore {
                reason: format!("{a}-{b}: exactly one team must win {sets_to_win} sets"),
            }),
        }
    }
}

/// Bet lifecycle. Every state except `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
    /// The match ended without a winner. No ledger effect.
    Void,
}

impl std::fmt::Display for BetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Won => write!(f, "WON"),
            Self::Lost => write!(f, "LOST"),
            Self::Void => write!(f, "VOID"),
        }
    }
}

/// A stake on a match outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchBet {
    pub id: BetId,
    pub match_id: MatchId,
    pub round_id: RoundId,
    pub tournament_id: TournamentId,
    pub player_id: PlayerId,
    pub predicted_winner: Team,
    pub stake: Credits,
    pub status: BetStatus,
    /// Credited amount for a won bet, zero otherwise.
    pub payout: Credits,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl MatchBet {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == BetStatus::Pending
    }
}
