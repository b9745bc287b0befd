//! The settlement coordinator.
//!
//! Runs the multi-step settlements that touch more than one plane:
//!
//! ```text
//! process_match_result
//!   → score check (no side effects on failure)
//!   → close betting
//!   → MATCH_PAYOUT / PENALTY per participant   (keyed per player)
//!   → BettingMarket.settle_match_bets          (keyed per bet)
//!   → mark match settled
//!
//! settle_auction
//!   → close the auction to new lots
//!   → force-close every lot (escrow settles each winner once)
//!   → mark auction settled
//! ```
//!
//! Every ledger write carries an idempotency key, and the settlement key is
//! marked only after all steps succeed. A settlement that stopped part way
//! returns `SettlementIncomplete`; re-running it applies only the missing
//! steps. The first legal result of a match is recorded before any write,
//! and a retry that reports a different score is `ConflictingResult`.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rallybank_auction::AuctionEngine;
use rallybank_betting::BettingMarket;
use rallybank_ledger::{EscrowManager, Ledger};
use rallybank_types::{
    AuctionId, AuctionSettlementReport, Clock, Credits, EconomyError, EntryType, IdempotencyKey,
    LedgerEntry, LotWinner, MatchId, MatchInfo, MatchOutcome, MatchResult,
    MatchSettlementReport, NewEntry, PlayerId, ReconcileReport, Result, RoundId,
    TournamentConfig, TournamentId,
};

use crate::idempotency::{IdempotencyGuard, SettlementKey};

/// Steps of one settlement that failed, for `SettlementIncomplete`.
#[derive(Default)]
struct Failures {
    count: usize,
    first: Option<String>,
}

impl Failures {
    fn record(&mut self, step: impl std::fmt::Display, err: &EconomyError) {
        self.count += 1;
        if self.first.is_none() {
            self.first = Some(format!("{step}: {err}"));
        }
    }

    fn into_result(self, key: SettlementKey, applied: usize) -> Result<()> {
        match self.first {
            None => Ok(()),
            Some(reason) => {
                tracing::warn!(
                    key = %key,
                    applied,
                    failed = self.count,
                    reason = %reason,
                    "Partial settlement"
                );
                Err(EconomyError::SettlementIncomplete {
                    key: key.to_string(),
                    applied,
                    failed: self.count,
                    reason,
                })
            }
        }
    }
}

pub struct SettlementCoordinator {
    ledger: Arc<Ledger>,
    auctions: Arc<AuctionEngine>,
    market: Arc<BettingMarket>,
    guard: Mutex<IdempotencyGuard>,
    /// One lock per settlement key; concurrent settlements of the same key
    /// run one after the other.
    in_flight: DashMap<SettlementKey, Arc<Mutex<()>>>,
    /// The first legal result reported per match.
    results: DashMap<MatchId, MatchResult>,
    clock: Arc<dyn Clock>,
}

impl SettlementCoordinator {
    /// A coordinator over existing planes. They must share one ledger.
    #[must_use]
    pub fn new(auctions: Arc<AuctionEngine>, market: Arc<BettingMarket>) -> Self {
        let ledger = Arc::clone(auctions.escrow().ledger());
        let clock = ledger.clock();
        Self {
            ledger,
            auctions,
            market,
            guard: Mutex::new(IdempotencyGuard::new()),
            in_flight: DashMap::new(),
            results: DashMap::new(),
            clock,
        }
    }

    /// Wire a complete engine around one clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let ledger = Arc::new(Ledger::new(clock));
        let escrow = Arc::new(EscrowManager::new(Arc::clone(&ledger)));
        let auctions = Arc::new(AuctionEngine::new(escrow));
        let market = Arc::new(BettingMarket::new(ledger));
        Self::new(auctions, market)
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    #[must_use]
    pub fn escrow(&self) -> &Arc<EscrowManager> {
        self.auctions.escrow()
    }

    #[must_use]
    pub fn auctions(&self) -> &Arc<AuctionEngine> {
        &self.auctions
    }

    #[must_use]
    pub fn market(&self) -> &Arc<BettingMarket> {
        &self.market
    }

    // =================================================================
    // Enrollment
    // =================================================================

    /// Register (or replace) a tournament's configuration.
    pub fn register_tournament(&self, config: TournamentConfig) -> Result<()> {
        self.ledger.register_tournament(config)
    }

    /// Admit a player and grant the starting credits. Idempotent.
    pub fn enroll_player(&self, tournament: TournamentId, player: PlayerId) -> Result<LedgerEntry> {
        self.ledger.grant_starting_credits(tournament, player)
    }

    /// Credit every listed player a participation bonus for the round.
    /// Players already credited for the round are skipped.
    pub fn award_participation(
        &self,
        tournament: TournamentId,
        round: RoundId,
        players: &[PlayerId],
        amount: Credits,
    ) -> Result<Vec<LedgerEntry>> {
        let mut entries = Vec::with_capacity(players.len());
        for player in players {
            entries.push(self.ledger.award_participation(tournament, round, *player, amount)?);
        }
        tracing::info!(round = %round, players = players.len(), amount, "Participation awarded");
        Ok(entries)
    }

    // =================================================================
    // Match results
    // =================================================================

    /// Apply a reported score: participant payouts and penalties, then the
    /// match's bets.
    ///
    /// # Errors
    /// - `InvalidScore` for an illegal score (nothing is written)
    /// - `MatchAlreadySettled` once the match was fully processed
    /// - `SettlementIncomplete` if some steps failed; re-run with the same
    ///   score to finish
    /// - `ConflictingResult` if a re-run reports a different score (nothing
    ///   is written)
    pub fn process_match_result(
        &self,
        match_id: MatchId,
        sets_a: u8,
        sets_b: u8,
        unfinished: bool,
    ) -> Result<MatchSettlementReport> {
        let key = SettlementKey::Match(match_id);
        let lock = self.key_lock(key);
        let _serialized = lock.lock();

        if self.guard.lock().is_settled(&key) {
            tracing::warn!(match_id = %match_id, "Duplicate match result rejected");
            return Err(EconomyError::MatchAlreadySettled(match_id));
        }

        let info = self.market.match_info(match_id)?;
        let config = self.ledger.tournament(info.tournament_id)?;
        let result = MatchResult {
            match_id,
            sets_a,
            sets_b,
            unfinished,
        };
        let outcome = result.outcome(config.rewards.sets_to_win)?;
        let first = *self.results.entry(match_id).or_insert(result);
        if first != result {
            tracing::warn!(
                match_id = %match_id,
                first = ?first,
                retried = ?result,
                "Conflicting match result rejected"
            );
            return Err(EconomyError::ConflictingResult {
                match_id,
                reason: format!(
                    "first reported {}-{} (unfinished: {}), retried with {sets_a}-{sets_b} (unfinished: {unfinished})",
                    first.sets_a, first.sets_b, first.unfinished
                ),
            });
        }
        self.market.close_betting(match_id)?;

        let mut failures = Failures::default();
        let mut ledger_entries = Vec::new();
        for new in match_entries(&info, outcome, &config) {
            let player = new.player_id;
            match self.ledger.append(new) {
                Ok(entry) => ledger_entries.push(entry),
                Err(err) => failures.record(player, &err),
            }
        }

        let bets_settled = match self
            .market
            .settle_match_bets(match_id, outcome.betting_winner())
        {
            Ok(bets) => bets,
            Err(err) => {
                failures.record("bets", &err);
                Vec::new()
            }
        };

        failures.into_result(key, ledger_entries.len() + bets_settled.len())?;
        self.guard.lock().mark_settled(key, self.clock.now())?;

        tracing::info!(
            match_id = %match_id,
            outcome = ?outcome,
            entries = ledger_entries.len(),
            bets = bets_settled.len(),
            "Match settled"
        );
        Ok(MatchSettlementReport {
            match_id,
            outcome,
            ledger_entries,
            bets_settled,
        })
    }

    // =================================================================
    // Auctions
    // =================================================================

    /// Close the auction to new lots, then close every lot and report the
    /// winners. Re-invoking on a settled auction is a no-op.
    ///
    /// # Errors
    /// `AuctionNotFound`; `SettlementIncomplete` if some lots could not be
    /// closed out.
    pub fn settle_auction(&self, auction_id: AuctionId) -> Result<AuctionSettlementReport> {
        let key = SettlementKey::Auction(auction_id);
        let lock = self.key_lock(key);
        let _serialized = lock.lock();

        self.auctions.close_auction(auction_id)?;
        if self.guard.lock().is_settled(&key) {
            tracing::debug!(auction = %auction_id, "Auction already settled");
            return Ok(AuctionSettlementReport {
                auction_id: Some(auction_id),
                already_settled: true,
                ..AuctionSettlementReport::default()
            });
        }

        let mut report = AuctionSettlementReport {
            auction_id: Some(auction_id),
            ..AuctionSettlementReport::default()
        };
        let mut failures = Failures::default();
        for lot in self.auctions.lots_of(auction_id) {
            match self.auctions.force_close(lot.id) {
                Ok(closure) => {
                    if closure.newly_ended {
                        report.lots_closed.push(lot.id);
                    }
                    if let (Some(player_id), Some(amount)) = (
                        closure.lot.current_winner_player_id,
                        closure.lot.current_bid,
                    ) {
                        report.winners.push(LotWinner {
                            lot_id: lot.id,
                            player_id,
                            amount,
                        });
                    }
                }
                Err(err) => failures.record(lot.id, &err),
            }
        }

        failures.into_result(key, report.lots_closed.len())?;
        self.guard.lock().mark_settled(key, self.clock.now())?;

        tracing::info!(
            auction = %auction_id,
            lots_closed = report.lots_closed.len(),
            winners = report.winners.len(),
            "Auction settled"
        );
        Ok(report)
    }

    // =================================================================
    // Administration
    // =================================================================

    /// Administrative override with a mandatory reason.
    pub fn adjust_balance(
        &self,
        tournament: TournamentId,
        player: PlayerId,
        amount: Credits,
        reason: &str,
        force: bool,
    ) -> Result<LedgerEntry> {
        self.ledger.adjust_balance(tournament, player, amount, reason, force)
    }

    /// Recompute one player's balance from history, correcting drift.
    #[must_use]
    pub fn reconcile(&self, player: PlayerId) -> ReconcileReport {
        self.ledger.reconcile(player)
    }

    /// [`SettlementCoordinator::reconcile`] for every player with history.
    #[must_use]
    pub fn reconcile_all(&self) -> Vec<ReconcileReport> {
        self.ledger.reconcile_all()
    }

    /// Whether every step of the settlement has been applied.
    #[must_use]
    pub fn is_settled(&self, key: SettlementKey) -> bool {
        self.guard.lock().is_settled(&key)
    }

    fn key_lock(&self, key: SettlementKey) -> Arc<Mutex<()>> {
        Arc::clone(self.in_flight.entry(key).or_default().value())
    }
}

/// The payout and penalty entries a result produces, payouts first for each
/// player so a penalty never lands before the matching credit.
fn match_entries(info: &MatchInfo, outcome: MatchOutcome, config: &TournamentConfig) -> Vec<NewEntry> {
    let rewards = &config.rewards;
    let mut entries = Vec::new();
    for (side, player) in info.participants() {
        let (payout, penalty) = match outcome {
            MatchOutcome::Won(winner) if side == winner => (rewards.win_reward, 0),
            MatchOutcome::Won(_) => (rewards.loss_reward, 0),
            MatchOutcome::Unfinished { .. } => {
                (rewards.unfinished_split_reward, rewards.unfinished_penalty)
            }
        };
        if payout > 0 {
            entries.push(
                NewEntry::new(player, info.tournament_id, EntryType::MatchPayout, payout)
                    .with_match(info.id)
                    .with_round(info.round_id)
                    .with_note(format!("team {side}"))
                    .with_key(IdempotencyKey::match_payout(info.id, player)),
            );
        }
        if penalty > 0 {
            entries.push(
                NewEntry::new(player, info.tournament_id, EntryType::Penalty, -penalty)
                    .with_match(info.id)
                    .with_round(info.round_id)
                    .with_note("unfinished match")
                    .with_key(IdempotencyKey::match_penalty(info.id, player)),
            );
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rallybank_types::{BetStatus, ManualClock, NewLot, PledgeItemId, Team};

    struct Fixture {
        coord: SettlementCoordinator,
        clock: Arc<ManualClock>,
        tournament: TournamentId,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let coord = SettlementCoordinator::with_clock(clock.clone());
        let tournament = TournamentId::new();
        coord
            .register_tournament(TournamentConfig::new(tournament))
            .unwrap();
        Fixture {
            coord,
            clock,
            tournament,
        }
    }

    impl Fixture {
        fn player(&self) -> PlayerId {
            let p = PlayerId::new();
            self.coord.enroll_player(self.tournament, p).unwrap();
            p
        }

        fn doubles(&self) -> MatchInfo {
            let info = MatchInfo {
                id: MatchId::new(),
                round_id: RoundId::new(),
                tournament_id: self.tournament,
                team_a: vec![self.player(), self.player()],
                team_b: vec![self.player(), self.player()],
            };
            self.coord.market().register_match(info.clone()).unwrap();
            info
        }
    }

    #[test]
    fn straight_sets_pays_both_teams_without_penalty() {
        let f = fixture();
        let info = f.doubles();
        let report = f.coord.process_match_result(info.id, 2, 0, false).unwrap();
        assert_eq!(report.outcome, MatchOutcome::Won(Team::A));
        assert_eq!(report.ledger_entries.len(), 4);
        assert!(report
            .ledger_entries
            .iter()
            .all(|e| e.entry_type == EntryType::MatchPayout));
        let ledger = f.coord.ledger();
        for p in &info.team_a {
            assert_eq!(ledger.balance_of(*p), 2_300);
        }
        for p in &info.team_b {
            assert_eq!(ledger.balance_of(*p), 2_100);
        }
    }

    #[test]
    fn unfinished_match_splits_and_penalizes() {
        let f = fixture();
        let info = f.doubles();
        let report = f.coord.process_match_result(info.id, 1, 1, true).unwrap();
        assert_eq!(report.outcome, MatchOutcome::Unfinished { leader: None });
        assert_eq!(report.ledger_entries.len(), 8);
        for (_, p) in info.participants() {
            assert_eq!(f.coord.ledger().balance_of(p), 2_100);
        }
    }

    #[test]
    fn invalid_score_writes_nothing() {
        let f = fixture();
        let info = f.doubles();
        let bettor = f.player();
        f.coord
            .market()
            .place_bet(info.id, bettor, Team::A, 100)
            .unwrap();
        let err = f.coord.process_match_result(info.id, 2, 2, false).unwrap_err();
        assert!(matches!(err, EconomyError::InvalidScore { .. }));
        for (_, p) in info.participants() {
            assert_eq!(f.coord.ledger().history_of(p).len(), 1);
        }
        assert!(!f.coord.is_settled(SettlementKey::Match(info.id)));
        // Betting is still open after a rejected score.
        f.coord
            .market()
            .place_bet(info.id, f.player(), Team::B, 100)
            .unwrap();
    }

    #[test]
    fn duplicate_result_rejected() {
        let f = fixture();
        let info = f.doubles();
        f.coord.process_match_result(info.id, 0, 2, false).unwrap();
        let err = f.coord.process_match_result(info.id, 0, 2, false).unwrap_err();
        assert!(matches!(err, EconomyError::MatchAlreadySettled(id) if id == info.id));
        assert_eq!(f.coord.ledger().balance_of(info.team_b[0]), 2_300);
    }

    #[test]
    fn unfinished_leader_settles_bets() {
        let f = fixture();
        let info = f.doubles();
        let (on_a, on_b) = (f.player(), f.player());
        f.coord.market().place_bet(info.id, on_a, Team::A, 100).unwrap();
        f.coord.market().place_bet(info.id, on_b, Team::B, 100).unwrap();
        let report = f.coord.process_match_result(info.id, 1, 0, true).unwrap();
        assert_eq!(report.bets_settled[0].status, BetStatus::Won);
        assert_eq!(report.bets_settled[1].status, BetStatus::Lost);
        assert_eq!(f.coord.ledger().balance_of(on_a), 2_100);
        assert_eq!(f.coord.ledger().balance_of(on_b), 1_900);
    }

    #[test]
    fn partial_failure_then_retry_completes() {
        let f = fixture();
        let mut config = TournamentConfig::new(f.tournament);
        config.rewards.unfinished_split_reward = 0;
        config.rewards.unfinished_penalty = 2_500;
        f.coord.register_tournament(config).unwrap();
        let info = f.doubles();
        let broke = info.team_a[0];

        let err = f.coord.process_match_result(info.id, 0, 0, true).unwrap_err();
        assert!(matches!(
            err,
            EconomyError::SettlementIncomplete {
                applied: 0,
                failed: 4,
                ..
            }
        ));
        assert!(err.is_retryable());

        for (_, p) in info.participants() {
            f.coord
                .adjust_balance(f.tournament, p, 1_000, "late sponsor", false)
                .unwrap();
        }
        let report = f.coord.process_match_result(info.id, 0, 0, true).unwrap();
        assert_eq!(report.ledger_entries.len(), 4);
        assert_eq!(f.coord.ledger().balance_of(broke), 500);
        assert!(f.coord.is_settled(SettlementKey::Match(info.id)));
    }

    #[test]
    fn retry_with_different_score_is_rejected() {
        let f = fixture();
        let info = f.doubles();
        let (broke, on_a) = (f.player(), f.player());
        f.coord.market().place_bet(info.id, broke, Team::B, 400).unwrap();
        f.coord.market().place_bet(info.id, on_a, Team::A, 100).unwrap();
        f.coord
            .adjust_balance(f.tournament, broke, -1_900, "spent elsewhere", false)
            .unwrap();

        let err = f.coord.process_match_result(info.id, 2, 0, false).unwrap_err();
        assert!(matches!(err, EconomyError::SettlementIncomplete { .. }));

        let before: Vec<_> = info
            .participants()
            .map(|(_, p)| f.coord.ledger().history_of(p).len())
            .collect();
        for (sets_a, sets_b, unfinished) in [(0, 2, false), (1, 0, true)] {
            let err = f
                .coord
                .process_match_result(info.id, sets_a, sets_b, unfinished)
                .unwrap_err();
            assert!(matches!(err, EconomyError::ConflictingResult { match_id, .. } if match_id == info.id));
            assert!(!err.is_retryable());
        }
        let after: Vec<_> = info
            .participants()
            .map(|(_, p)| f.coord.ledger().history_of(p).len())
            .collect();
        assert_eq!(before, after);
        assert_eq!(f.coord.ledger().balance_of(broke), 100);
        assert_eq!(f.coord.ledger().balance_of(on_a), 2_100);
        let bets = f.coord.market().bets_of_match(info.id).unwrap();
        assert_eq!(bets[0].status, BetStatus::Pending);

        f.coord
            .adjust_balance(f.tournament, broke, 500, "refill", false)
            .unwrap();
        let report = f.coord.process_match_result(info.id, 2, 0, false).unwrap();
        assert_eq!(report.outcome, MatchOutcome::Won(Team::A));
        assert_eq!(report.bets_settled.len(), 1);
        assert_eq!(report.bets_settled[0].status, BetStatus::Lost);
        assert_eq!(f.coord.ledger().balance_of(broke), 200);
        assert_eq!(f.coord.ledger().balance_of(on_a), 2_100);
        assert_eq!(f.coord.ledger().balance_of(info.team_a[0]), 2_300);
        assert!(f.coord.is_settled(SettlementKey::Match(info.id)));
    }

    #[test]
    fn settle_auction_reports_winners_once() {
        let f = fixture();
        let auction = f.coord.auctions().open_auction(f.tournament, "Gala").unwrap();
        let lot = f
            .coord
            .auctions()
            .open_lot(NewLot {
                auction_id: auction.id,
                pledge_item_id: PledgeItemId::new(),
                pledged_by: PlayerId::new(),
                estimate_low: 500,
                estimate_high: 900,
                min_increment: 100,
                ends_at: f.clock.now() + Duration::hours(1),
            })
            .unwrap();
        let bidder = f.player();
        f.coord.auctions().place_bid(lot.id, bidder, 700).unwrap();

        let report = f.coord.settle_auction(auction.id).unwrap();
        assert_eq!(report.lots_closed, vec![lot.id]);
        assert_eq!(
            report.winners,
            vec![LotWinner {
                lot_id: lot.id,
                player_id: bidder,
                amount: 700
            }]
        );
        assert!(!report.already_settled);
        assert_eq!(f.coord.ledger().balance_of(bidder), 1_300);

        let again = f.coord.settle_auction(auction.id).unwrap();
        assert!(again.already_settled);
        assert!(again.lots_closed.is_empty());
        assert_eq!(f.coord.ledger().balance_of(bidder), 1_300);
    }

    #[test]
    fn settled_auction_rejects_new_lots() {
        let f = fixture();
        let auction = f.coord.auctions().open_auction(f.tournament, "Gala").unwrap();
        f.coord.settle_auction(auction.id).unwrap();
        assert!(f.coord.auctions().auction(auction.id).unwrap().is_closed());

        let err = f
            .coord
            .auctions()
            .open_lot(NewLot {
                auction_id: auction.id,
                pledge_item_id: PledgeItemId::new(),
                pledged_by: PlayerId::new(),
                estimate_low: 500,
                estimate_high: 900,
                min_increment: 100,
                ends_at: f.clock.now() + Duration::hours(1),
            })
            .unwrap_err();
        assert!(matches!(err, EconomyError::AuctionClosed(id) if id == auction.id));
        assert!(f.coord.auctions().lots_of(auction.id).is_empty());
        assert!(f.coord.settle_auction(auction.id).unwrap().already_settled);
    }

    #[test]
    fn unknown_auction_rejected() {
        let f = fixture();
        let err = f.coord.settle_auction(AuctionId::new()).unwrap_err();
        assert!(matches!(err, EconomyError::AuctionNotFound(_)));
    }

    #[test]
    fn participation_is_once_per_round() {
        let f = fixture();
        let round = RoundId::new();
        let players = [f.player(), f.player()];
        f.coord
            .award_participation(f.tournament, round, &players, 25)
            .unwrap();
        f.coord
            .award_participation(f.tournament, round, &players, 25)
            .unwrap();
        for p in players {
            assert_eq!(f.coord.ledger().balance_of(p), 2_025);
        }
    }
}
