//! The betting market.
//!
//! A bet does not touch the ledger when it is placed. The stake is at risk
//! but unresolved until the match settles: a won bet appends `BET_PAYOUT`,
//! a lost bet appends a negative `BET_STAKE`, a void bet appends nothing.
//!
//! Each match has one book behind one mutex. Placing and settling bets on
//! the same match serialize on it.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rallybank_ledger::Ledger;
use rallybank_types::{
    BetId, BetStatus, Clock, Credits, EconomyError, EntryType, IdempotencyKey, MatchBet, MatchId,
    MatchInfo, NewEntry, PlayerId, Result, RoundId, Team,
};
use rust_decimal::Decimal;

use crate::payout::bet_payout;

#[derive(Debug)]
struct MatchBook {
    info: MatchInfo,
    /// Placement order.
    bets: Vec<MatchBet>,
    /// A result arrived; no further bets.
    closed: bool,
    /// Every bet left `Pending` and its ledger entry is applied.
    settled: bool,
    /// The winner of the first settlement run. Later runs must agree.
    winner: Option<Option<Team>>,
}

pub struct BettingMarket {
    ledger: Arc<Ledger>,
    books: DashMap<MatchId, Arc<Mutex<MatchBook>>>,
    /// Σ stake per (player, round), for the per-round cap.
    round_stakes: DashMap<(PlayerId, RoundId), Credits>,
    clock: Arc<dyn Clock>,
}

impl BettingMarket {
    /// A market settling bets against `ledger`.
    #[must_use]
    pub fn new(ledger: Arc<Ledger>) -> Self {
        let clock = ledger.clock();
        Self {
            ledger,
            books: DashMap::new(),
            round_stakes: DashMap::new(),
            clock,
        }
    }

    /// Register a scheduled match. Registering the same match twice with
    /// identical teams is a no-op.
    pub fn register_match(&self, info: MatchInfo) -> Result<()> {
        info.validate()?;
        self.ledger.tournament(info.tournament_id)?;
        match self.books.entry(info.id) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                if existing.get().lock().info == info {
                    return Ok(());
                }
                Err(EconomyError::InvalidMatch {
                    reason: format!("{} already registered with different teams", info.id),
                })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::debug!(match_id = %info.id, round = %info.round_id, "Match registered");
                slot.insert(Arc::new(Mutex::new(MatchBook {
                    info,
                    bets: Vec::new(),
                    closed: false,
                    settled: false,
                    winner: None,
                })));
                Ok(())
            }
        }
    }

    /// Place a bet on a registered match.
    ///
    /// # Errors
    /// - `InvalidAmount` if `stake` is not positive
    /// - `MatchNotFound`, `BettingClosed`
    /// - `SelfBet` if the player plays in the match
    /// - `AlreadyBet` if the player has a bet on this match
    /// - `StakeExceedsCap` over the per-bet maximum or the per-round total
    /// - `BelowProtectedFloor` if `balance - stake` falls under the
    ///   tournament's protected minimum
    pub fn place_bet(
        &self,
        match_id: MatchId,
        player: PlayerId,
        predicted_winner: Team,
        stake: Credits,
    ) -> Result<MatchBet> {
        if stake <= 0 {
            return Err(EconomyError::InvalidAmount {
                reason: format!("stake {stake} must be positive"),
            });
        }
        let book = self.book(match_id)?;
        let mut book = book.lock();

        if book.closed {
            return Err(EconomyError::BettingClosed(match_id));
        }
        if book.info.is_participant(player) {
            return Err(EconomyError::SelfBet);
        }
        if book.bets.iter().any(|b| b.player_id == player) {
            return Err(EconomyError::AlreadyBet(match_id));
        }

        let config = self.ledger.tournament(book.info.tournament_id)?;
        let limits = &config.betting;
        if stake > limits.max_stake_per_bet {
            return Err(EconomyError::StakeExceedsCap {
                reason: format!(
                    "stake {stake} over per-bet maximum {}",
                    limits.max_stake_per_bet
                ),
            });
        }

        let balance = self.ledger.balance_of(player);
        if balance - stake < config.min_protected_balance {
            return Err(EconomyError::BelowProtectedFloor {
                balance,
                stake,
                floor: config.min_protected_balance,
            });
        }

        let round = book.info.round_id;
        {
            let mut staked = self.round_stakes.entry((player, round)).or_insert(0);
            if *staked + stake > limits.max_stake_per_round {
                return Err(EconomyError::StakeExceedsCap {
                    reason: format!(
                        "round total {} would exceed {}",
                        *staked + stake,
                        limits.max_stake_per_round
                    ),
                });
            }
            *staked += stake;
        }

        let bet = MatchBet {
            id: BetId::new(),
            match_id,
            round_id: round,
            tournament_id: book.info.tournament_id,
            player_id: player,
            predicted_winner,
            stake,
            status: BetStatus::Pending,
            payout: 0,
            created_at: self.clock.now(),
            settled_at: None,
        };
        book.bets.push(bet.clone());
        tracing::info!(
            bet = %bet.id,
            match_id = %match_id,
            player = %player,
            team = %predicted_winner,
            stake,
            "Bet placed"
        );
        Ok(bet)
    }

    /// Stop accepting bets on a match. Idempotent.
    pub fn close_betting(&self, match_id: MatchId) -> Result<()> {
        let book = self.book(match_id)?;
        book.lock().closed = true;
        Ok(())
    }

    /// Resolve every Pending bet on the match against `winner`. With no
    /// winner every Pending bet becomes Void.
    ///
    /// Returns the bets that left Pending during this call. On an already
    /// settled match this is a no-op returning nothing.
    ///
    /// # Errors
    /// - `SettlementIncomplete` if some ledger appends failed. The bets that
    ///   did settle stay settled; re-running settles the rest.
    /// - `ConflictingResult` if `winner` differs from the first run's.
    pub fn settle_match_bets(&self, match_id: MatchId, winner: Option<Team>) -> Result<Vec<MatchBet>> {
        let book = self.book(match_id)?;
        let mut book = book.lock();
        match book.winner {
            Some(first) if first != winner => {
                tracing::warn!(match_id = %match_id, first = ?first, retried = ?winner, "Conflicting bet settlement rejected");
                return Err(EconomyError::ConflictingResult {
                    match_id,
                    reason: format!("bets were settled against {first:?}, not {winner:?}"),
                });
            }
            Some(_) => {}
            None => book.winner = Some(winner),
        }
        if book.settled {
            tracing::debug!(match_id = %match_id, "Bets already settled");
            return Ok(Vec::new());
        }
        book.closed = true;

        let config = self.ledger.tournament(book.info.tournament_id)?;
        let multiplier = config.betting.payout_multiplier;
        let now = self.clock.now();

        let mut settled = Vec::new();
        let mut failures: Vec<(BetId, EconomyError)> = Vec::new();
        for bet in book.bets.iter_mut().filter(|b| b.is_pending()) {
            match self.resolve(bet, winner, multiplier) {
                Ok(()) => {
                    bet.settled_at = Some(now);
                    settled.push(bet.clone());
                }
                Err(err) => {
                    tracing::warn!(bet = %bet.id, player = %bet.player_id, error = %err, "Bet settlement failed");
                    failures.push((bet.id, err));
                }
            }
        }

        if let Some((bet, err)) = failures.first() {
            return Err(EconomyError::SettlementIncomplete {
                key: format!("{match_id}:bets"),
                applied: settled.len(),
                failed: failures.len(),
                reason: format!("{bet}: {err}"),
            });
        }

        book.settled = true;
        tracing::info!(
            match_id = %match_id,
            winner = ?winner,
            bets = settled.len(),
            "Match bets settled"
        );
        Ok(settled)
    }

    /// Apply one bet's ledger effect and move it out of Pending.
    fn resolve(&self, bet: &mut MatchBet, winner: Option<Team>, multiplier: Decimal) -> Result<()> {
        let Some(winner) = winner else {
            bet.status = BetStatus::Void;
            return Ok(());
        };
        let key = IdempotencyKey::bet_settlement(bet.id);
        if bet.predicted_winner == winner {
            let payout = bet_payout(bet.stake, multiplier)?;
            if payout > 0 {
                self.ledger.append(
                    NewEntry::new(bet.player_id, bet.tournament_id, EntryType::BetPayout, payout)
                        .with_match(bet.match_id)
                        .with_round(bet.round_id)
                        .with_note(format!("won {}", bet.id))
                        .with_key(key),
                )?;
            }
            bet.status = BetStatus::Won;
            bet.payout = payout;
        } else {
            self.ledger.append(
                NewEntry::new(bet.player_id, bet.tournament_id, EntryType::BetStake, -bet.stake)
                    .with_match(bet.match_id)
                    .with_round(bet.round_id)
                    .with_note(format!("lost {}", bet.id))
                    .with_key(key),
            )?;
            bet.status = BetStatus::Lost;
        }
        Ok(())
    }

    // =================================================================
    // Reads
    // =================================================================

    /// The match as registered.
    pub fn match_info(&self, match_id: MatchId) -> Result<MatchInfo> {
        Ok(self.book(match_id)?.lock().info.clone())
    }

    /// Bets on a match, in placement order.
    pub fn bets_of_match(&self, match_id: MatchId) -> Result<Vec<MatchBet>> {
        Ok(self.book(match_id)?.lock().bets.clone())
    }

    /// A player's bets across all matches.
    #[must_use]
    pub fn bets_of_player(&self, player: PlayerId) -> Vec<MatchBet> {
        let books: Vec<Arc<Mutex<MatchBook>>> =
            self.books.iter().map(|b| Arc::clone(b.value())).collect();
        let mut bets: Vec<MatchBet> = books
            .iter()
            .flat_map(|b| {
                let book = b.lock();
                book.bets
                    .iter()
                    .filter(|bet| bet.player_id == player)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        bets.sort_by_key(|b| b.id);
        bets
    }

    /// Total stake the player has placed in the round.
    #[must_use]
    pub fn round_stake_of(&self, player: PlayerId, round: RoundId) -> Credits {
        self.round_stakes
            .get(&(player, round))
            .map_or(0, |s| *s.value())
    }

    /// Whether every bet on the match has left Pending.
    #[must_use]
    pub fn is_settled(&self, match_id: MatchId) -> bool {
        self.book(match_id).is_ok_and(|b| b.lock().settled)
    }

    fn book(&self, match_id: MatchId) -> Result<Arc<Mutex<MatchBook>>> {
        self.books
            .get(&match_id)
            .map(|b| Arc::clone(b.value()))
            .ok_or(EconomyError::MatchNotFound(match_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rallybank_types::{SystemClock, TournamentConfig, TournamentId};

    struct Fixture {
        market: BettingMarket,
        ledger: Arc<Ledger>,
        tournament: TournamentId,
        round: RoundId,
    }

    fn fixture_with(configure: impl FnOnce(&mut TournamentConfig)) -> Fixture {
        let ledger = Arc::new(Ledger::new(Arc::new(SystemClock)));
        let tournament = TournamentId::new();
        let mut config = TournamentConfig::new(tournament);
        configure(&mut config);
        ledger.register_tournament(config).unwrap();
        Fixture {
            market: BettingMarket::new(Arc::clone(&ledger)),
            ledger,
            tournament,
            round: RoundId::new(),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|_| {})
    }

    impl Fixture {
        fn player(&self) -> PlayerId {
            let p = PlayerId::new();
            self.ledger.grant_starting_credits(self.tournament, p).unwrap();
            p
        }

        fn match_between(&self, a: PlayerId, b: PlayerId) -> MatchId {
            let info = MatchInfo {
                id: MatchId::new(),
                round_id: self.round,
                tournament_id: self.tournament,
                team_a: vec![a],
                team_b: vec![b],
            };
            let id = info.id;
            self.market.register_match(info).unwrap();
            id
        }

        fn some_match(&self) -> MatchId {
            self.match_between(PlayerId::new(), PlayerId::new())
        }
    }

    #[test]
    fn placing_a_bet_leaves_balance_alone() {
        let f = fixture();
        let m = f.some_match();
        let p = f.player();
        let bet = f.market.place_bet(m, p, Team::A, 200).unwrap();
        assert!(bet.is_pending());
        assert_eq!(f.ledger.balance_of(p), 2_000);
        assert_eq!(f.ledger.history_of(p).len(), 1);
        assert_eq!(f.market.round_stake_of(p, f.round), 200);
    }

    #[test]
    fn participant_cannot_bet() {
        let f = fixture();
        let (a, b) = (f.player(), f.player());
        let m = f.match_between(a, b);
        let err = f.market.place_bet(m, a, Team::B, 100).unwrap_err();
        assert!(matches!(err, EconomyError::SelfBet));
    }

    #[test]
    fn one_bet_per_match() {
        let f = fixture();
        let m = f.some_match();
        let p = f.player();
        f.market.place_bet(m, p, Team::A, 100).unwrap();
        let err = f.market.place_bet(m, p, Team::B, 100).unwrap_err();
        assert!(matches!(err, EconomyError::AlreadyBet(id) if id == m));
    }

    #[test]
    fn per_bet_and_per_round_caps() {
        let f = fixture();
        let p = f.player();
        let err = f.market.place_bet(f.some_match(), p, Team::A, 501).unwrap_err();
        assert!(matches!(err, EconomyError::StakeExceedsCap { .. }));

        f.market.place_bet(f.some_match(), p, Team::A, 500).unwrap();
        f.market.place_bet(f.some_match(), p, Team::A, 400).unwrap();
        let err = f.market.place_bet(f.some_match(), p, Team::A, 200).unwrap_err();
        assert!(matches!(err, EconomyError::StakeExceedsCap { .. }));
        // The rejected stake did not count toward the round.
        assert_eq!(f.market.round_stake_of(p, f.round), 900);
        f.market.place_bet(f.some_match(), p, Team::A, 100).unwrap();
    }

    #[test]
    fn protected_floor() {
        let f = fixture_with(|cfg| cfg.min_protected_balance = 1_800);
        let p = f.player();
        let err = f.market.place_bet(f.some_match(), p, Team::A, 300).unwrap_err();
        assert!(matches!(
            err,
            EconomyError::BelowProtectedFloor {
                balance: 2_000,
                stake: 300,
                floor: 1_800
            }
        ));
        f.market.place_bet(f.some_match(), p, Team::A, 200).unwrap();
    }

    #[test]
    fn non_positive_stake_rejected() {
        let f = fixture();
        let err = f.market.place_bet(f.some_match(), f.player(), Team::A, 0).unwrap_err();
        assert!(matches!(err, EconomyError::InvalidAmount { .. }));
    }

    #[test]
    fn unknown_match_rejected() {
        let f = fixture();
        let err = f
            .market
            .place_bet(MatchId::new(), f.player(), Team::A, 10)
            .unwrap_err();
        assert!(matches!(err, EconomyError::MatchNotFound(_)));
    }

    #[test]
    fn settlement_pays_winners_and_debits_losers() {
        let f = fixture();
        let m = f.some_match();
        let (winner, loser) = (f.player(), f.player());
        f.market.place_bet(m, winner, Team::A, 250).unwrap();
        f.market.place_bet(m, loser, Team::B, 150).unwrap();

        let settled = f.market.settle_match_bets(m, Some(Team::A)).unwrap();
        assert_eq!(settled.len(), 2);
        assert_eq!(settled[0].status, BetStatus::Won);
        assert_eq!(settled[0].payout, 250);
        assert_eq!(settled[1].status, BetStatus::Lost);
        assert_eq!(f.ledger.balance_of(winner), 2_250);
        assert_eq!(f.ledger.balance_of(loser), 1_850);

        let again = f.market.settle_match_bets(m, Some(Team::A)).unwrap();
        assert!(again.is_empty());
        assert_eq!(f.ledger.balance_of(winner), 2_250);
        assert_eq!(f.ledger.balance_of(loser), 1_850);
        assert!(f.market.is_settled(m));
    }

    #[test]
    fn multiplier_applies_to_payout() {
        let f = fixture_with(|cfg| cfg.betting.payout_multiplier = Decimal::new(15, 1));
        let m = f.some_match();
        let p = f.player();
        f.market.place_bet(m, p, Team::B, 333).unwrap();
        let settled = f.market.settle_match_bets(m, Some(Team::B)).unwrap();
        assert_eq!(settled[0].payout, 499);
        assert_eq!(f.ledger.balance_of(p), 2_499);
    }

    #[test]
    fn no_winner_voids_bets() {
        let f = fixture();
        let m = f.some_match();
        let p = f.player();
        f.market.place_bet(m, p, Team::A, 100).unwrap();
        let settled = f.market.settle_match_bets(m, None).unwrap();
        assert_eq!(settled[0].status, BetStatus::Void);
        assert!(settled[0].settled_at.is_some());
        assert_eq!(f.ledger.history_of(p).len(), 1);
    }

    #[test]
    fn betting_closes_once_result_arrives() {
        let f = fixture();
        let m = f.some_match();
        f.market.settle_match_bets(m, Some(Team::A)).unwrap();
        let err = f.market.place_bet(m, f.player(), Team::A, 10).unwrap_err();
        assert!(matches!(err, EconomyError::BettingClosed(_)));
    }

    #[test]
    fn failed_loss_debit_is_retryable() {
        let f = fixture();
        let m = f.some_match();
        let (broke, winner) = (f.player(), f.player());
        f.market.place_bet(m, broke, Team::B, 400).unwrap();
        f.market.place_bet(m, winner, Team::A, 100).unwrap();
        f.ledger
            .adjust_balance(f.tournament, broke, -1_900, "spent elsewhere", false)
            .unwrap();

        let err = f.market.settle_match_bets(m, Some(Team::A)).unwrap_err();
        assert!(matches!(
            err,
            EconomyError::SettlementIncomplete {
                applied: 1,
                failed: 1,
                ..
            }
        ));
        assert!(!f.market.is_settled(m));
        assert_eq!(f.ledger.balance_of(winner), 2_100);

        f.ledger
            .adjust_balance(f.tournament, broke, 500, "refill", false)
            .unwrap();
        let settled = f.market.settle_match_bets(m, Some(Team::A)).unwrap();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].player_id, broke);
        assert_eq!(f.ledger.balance_of(broke), 200);
        assert_eq!(f.ledger.balance_of(winner), 2_100);
        assert!(f.market.is_settled(m));
    }

    #[test]
    fn retry_with_other_winner_is_rejected() {
        let f = fixture();
        let m = f.some_match();
        let (broke, on_a) = (f.player(), f.player());
        f.market.place_bet(m, broke, Team::B, 400).unwrap();
        f.market.place_bet(m, on_a, Team::A, 100).unwrap();
        f.ledger
            .adjust_balance(f.tournament, broke, -1_900, "spent elsewhere", false)
            .unwrap();
        let err = f.market.settle_match_bets(m, Some(Team::A)).unwrap_err();
        assert!(matches!(err, EconomyError::SettlementIncomplete { .. }));

        // Flipping the winner must not pay the still-pending loser.
        let err = f.market.settle_match_bets(m, Some(Team::B)).unwrap_err();
        assert!(matches!(err, EconomyError::ConflictingResult { match_id, .. } if match_id == m));
        let err = f.market.settle_match_bets(m, None).unwrap_err();
        assert!(matches!(err, EconomyError::ConflictingResult { .. }));
        assert_eq!(f.ledger.balance_of(broke), 100);
        assert_eq!(f.ledger.balance_of(on_a), 2_100);
        let bets = f.market.bets_of_match(m).unwrap();
        assert_eq!(bets[0].status, BetStatus::Pending);
        assert_eq!(bets[1].status, BetStatus::Won);
    }

    #[test]
    fn re_registering_a_match() {
        let f = fixture();
        let info = MatchInfo {
            id: MatchId::new(),
            round_id: f.round,
            tournament_id: f.tournament,
            team_a: vec![PlayerId::new()],
            team_b: vec![PlayerId::new()],
        };
        f.market.register_match(info.clone()).unwrap();
        f.market.register_match(info.clone()).unwrap();
        let mut changed = info;
        changed.team_b = vec![PlayerId::new()];
        let err = f.market.register_match(changed).unwrap_err();
        assert!(matches!(err, EconomyError::InvalidMatch { .. }));
    }

    #[test]
    fn bets_listed_per_player() {
        let f = fixture();
        let p = f.player();
        f.market.place_bet(f.some_match(), p, Team::A, 10).unwrap();
        f.market.place_bet(f.some_match(), p, Team::B, 20).unwrap();
        f.market.place_bet(f.some_match(), f.player(), Team::B, 20).unwrap();
        let bets = f.market.bets_of_player(p);
        assert_eq!(bets.len(), 2);
        assert_eq!(bets[0].stake, 10);
    }
}
