//! The credit ledger.
//!
//! Every player has one account: the cached balance, the credits reserved
//! by escrow holds, and the append-only entry history. An account is only
//! ever touched under its own mutex, so appends for one player serialize
//! while different players proceed in parallel.
//!
//! Invariants, per player, at every lock release:
//! ```text
//! balance == Σ entries.amount
//! balance - reserved >= 0   (unless negative balances are allowed or forced)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rallybank_types::{
    Clock, Credits, EconomyError, EntryId, EntryType, IdempotencyKey, LedgerEntry, NewEntry,
    PlayerId, ReconcileReport, Result, RoundId, TournamentConfig, TournamentId,
};
use sha2::{Digest, Sha256};

/// One player's slice of the ledger.
#[derive(Debug)]
struct Account {
    balance: Credits,
    /// Σ of the player's Active escrow holds.
    reserved: Credits,
    entries: Vec<LedgerEntry>,
    /// Idempotency key → index into `entries`.
    keys: HashMap<IdempotencyKey, usize>,
}

impl Account {
    fn new() -> Self {
        Self {
            balance: 0,
            reserved: 0,
            entries: Vec::new(),
            keys: HashMap::new(),
        }
    }

    fn replayed_balance(&self) -> Credits {
        self.entries.iter().map(|e| e.amount).sum()
    }
}

/// Append-only store of signed credit movements. The only component that
/// mutates a player's balance.
pub struct Ledger {
    tournaments: DashMap<TournamentId, TournamentConfig>,
    accounts: DashMap<PlayerId, Arc<Mutex<Account>>>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    /// An empty ledger stamping entries with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tournaments: DashMap::new(),
            accounts: DashMap::new(),
            clock,
        }
    }

    /// The clock this ledger stamps entries with.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    // =================================================================
    // Tournaments
    // =================================================================

    /// Register (or replace) a tournament's configuration.
    pub fn register_tournament(&self, config: TournamentConfig) -> Result<()> {
        config.validate()?;
        tracing::info!(tournament = %config.id, "Tournament registered");
        self.tournaments.insert(config.id, config);
        Ok(())
    }

    /// A copy of the tournament's configuration.
    pub fn tournament(&self, id: TournamentId) -> Result<TournamentConfig> {
        self.tournaments
            .get(&id)
            .map(|cfg| cfg.value().clone())
            .ok_or(EconomyError::TournamentNotFound(id))
    }

    // =================================================================
    // Appends
    // =================================================================

    /// Append an entry and move the player's balance by its amount, as one
    /// atomic unit.
    ///
    /// An entry whose idempotency key was already applied is not appended
    /// again; the original entry is returned.
    ///
    /// # Errors
    /// - `InsufficientFunds` if a debit would take the balance below the
    ///   credits reserved by escrow (zero without holds) and neither the
    ///   tournament nor an admin force allows it
    /// - `IdempotencyConflict` if the key is bound to a different event
    /// - `InvalidAmount` / `MissingAuditNote` from structural validation
    pub fn append(&self, new: NewEntry) -> Result<LedgerEntry> {
        new.validate()?;
        let config = self.tournament(new.tournament_id)?;
        let account = self.account(new.player_id);
        let mut account = account.lock();
        self.append_locked(&mut account, &config, new, 0)
    }

    /// `releasing` is the part of `reserved` this entry consumes.
    fn append_locked(
        &self,
        account: &mut Account,
        config: &TournamentConfig,
        new: NewEntry,
        releasing: Credits,
    ) -> Result<LedgerEntry> {
        if let Some(key) = &new.idempotency_key {
            if let Some(&idx) = account.keys.get(key) {
                let existing = &account.entries[idx];
                if !new.matches_entry(existing) {
                    tracing::warn!(key = %key, "Idempotency key reused for a different entry");
                    return Err(EconomyError::IdempotencyConflict {
                        key: key.to_string(),
                    });
                }
                tracing::debug!(key = %key, entry = %existing.id, "Entry already applied");
                return Ok(existing.clone());
            }
        }

        let resulting = account
            .balance
            .checked_add(new.amount)
            .ok_or_else(|| EconomyError::InvalidAmount {
                reason: "balance overflow".into(),
            })?;

        let floor = (account.reserved - releasing).max(0);
        if new.amount < 0
            && resulting < floor
            && !config.allow_negative_balance
            && !new.bypasses_guard()
        {
            tracing::warn!(
                player = %new.player_id,
                entry_type = %new.entry_type,
                amount = new.amount,
                balance = account.balance,
                reserved = account.reserved,
                "Negative balance guard hit"
            );
            return Err(EconomyError::InsufficientFunds {
                player: new.player_id,
                needed: -new.amount,
                balance: account.balance,
            });
        }

        let id = new
            .idempotency_key
            .as_ref()
            .map_or_else(EntryId::new, EntryId::deterministic);
        let entry = LedgerEntry {
            id,
            player_id: new.player_id,
            tournament_id: new.tournament_id,
            entry_type: new.entry_type,
            amount: new.amount,
            match_id: new.match_id,
            round_id: new.round_id,
            lot_id: new.lot_id,
            note: new.note,
            idempotency_key: new.idempotency_key,
            sequence: account.entries.len() as u64,
            created_at: self.clock.now(),
        };

        if let Some(key) = &entry.idempotency_key {
            account.keys.insert(key.clone(), account.entries.len());
        }
        account.entries.push(entry.clone());
        account.balance = resulting;

        tracing::debug!(
            player = %entry.player_id,
            entry = %entry.id,
            entry_type = %entry.entry_type,
            amount = entry.amount,
            balance = account.balance,
            "Ledger entry appended"
        );
        Ok(entry)
    }

    /// Grant a player the tournament's starting credits. Once per
    /// (tournament, player).
    pub fn grant_starting_credits(
        &self,
        tournament: TournamentId,
        player: PlayerId,
    ) -> Result<LedgerEntry> {
        let config = self.tournament(tournament)?;
        self.append(
            NewEntry::new(player, tournament, EntryType::StartingGrant, config.starting_grant)
                .with_note("starting grant")
                .with_key(IdempotencyKey::starting_grant(tournament, player)),
        )
    }

    /// Credit a participation bonus for a round. Once per (round, player).
    pub fn award_participation(
        &self,
        tournament: TournamentId,
        round: RoundId,
        player: PlayerId,
        amount: Credits,
    ) -> Result<LedgerEntry> {
        self.append(
            NewEntry::new(player, tournament, EntryType::ParticipationBonus, amount)
                .with_round(round)
                .with_note("round participation")
                .with_key(IdempotencyKey::participation(round, player)),
        )
    }

    /// Administrative override. Always logged, always needs a reason.
    ///
    /// A debit past zero is permitted when the tournament allows negative
    /// balances or when `force` is set.
    pub fn adjust_balance(
        &self,
        tournament: TournamentId,
        player: PlayerId,
        amount: Credits,
        reason: &str,
        force: bool,
    ) -> Result<LedgerEntry> {
        if reason.trim().is_empty() {
            return Err(EconomyError::MissingAuditNote);
        }
        let mut new = NewEntry::new(player, tournament, EntryType::AdminAdjustment, amount)
            .with_note(reason);
        if force {
            new = new.forced();
        }
        let entry = self.append(new)?;
        tracing::info!(
            player = %player,
            amount,
            force,
            reason,
            entry = %entry.id,
            "Administrative balance adjustment"
        );
        Ok(entry)
    }

    // =================================================================
    // Escrow support (called by EscrowManager only)
    // =================================================================

    /// Reserve `amount` of the player's spendable balance, replacing a
    /// previous reservation of `replacing` in the same critical section.
    pub(crate) fn reserve(&self, player: PlayerId, amount: Credits, replacing: Credits) -> Result<()> {
        let account = self.account(player);
        let mut account = account.lock();
        let spendable = account.balance - account.reserved + replacing;
        if amount > spendable {
            return Err(EconomyError::InsufficientSpendable {
                needed: amount,
                spendable: account.balance - account.reserved,
            });
        }
        account.reserved += amount - replacing;
        Ok(())
    }

    /// Return previously reserved credits to the spendable balance.
    pub(crate) fn unreserve(&self, player: PlayerId, amount: Credits) {
        let account = self.account(player);
        let mut account = account.lock();
        if account.reserved < amount {
            tracing::error!(
                player = %player,
                reserved = account.reserved,
                amount,
                "Reserved credits underflow"
            );
            account.reserved = 0;
        } else {
            account.reserved -= amount;
        }
    }

    /// Consume a reservation into a ledger debit, atomically.
    pub(crate) fn settle_reserved(
        &self,
        player: PlayerId,
        reserved: Credits,
        new: NewEntry,
    ) -> Result<LedgerEntry> {
        new.validate()?;
        let config = self.tournament(new.tournament_id)?;
        let account = self.account(player);
        let mut account = account.lock();
        let already_applied = new
            .idempotency_key
            .as_ref()
            .is_some_and(|k| account.keys.contains_key(k));
        let entry = self.append_locked(&mut account, &config, new, reserved)?;
        if !already_applied {
            account.reserved = (account.reserved - reserved).max(0);
        }
        Ok(entry)
    }

    // =================================================================
    // Reads
    // =================================================================

    /// Cached balance. Zero for a player with no history.
    #[must_use]
    pub fn balance_of(&self, player: PlayerId) -> Credits {
        self.existing(player).map_or(0, |a| {
            let a = a.lock();
            a.balance
        })
    }

    /// Credits reserved by Active escrow holds.
    #[must_use]
    pub fn reserved_of(&self, player: PlayerId) -> Credits {
        self.existing(player).map_or(0, |a| {
            let a = a.lock();
            a.reserved
        })
    }

    /// `balance - reserved`, read under one lock.
    #[must_use]
    pub fn spendable_of(&self, player: PlayerId) -> Credits {
        self.existing(player).map_or(0, |a| {
            let a = a.lock();
            a.balance - a.reserved
        })
    }

    /// The player's entries in append order.
    #[must_use]
    pub fn history_of(&self, player: PlayerId) -> Vec<LedgerEntry> {
        self.existing(player)
            .map(|a| {
                let a = a.lock();
                a.entries.clone()
            })
            .unwrap_or_default()
    }

    /// The entry applied under `key`, if any.
    #[must_use]
    pub fn entry_for_key(&self, player: PlayerId, key: &IdempotencyKey) -> Option<LedgerEntry> {
        let account = self.existing(player)?;
        let account = account.lock();
        account
            .keys
            .get(key)
            .map(|&idx| account.entries[idx].clone())
    }

    /// Every player with an account.
    #[must_use]
    pub fn players(&self) -> Vec<PlayerId> {
        let mut players: Vec<PlayerId> = self.accounts.iter().map(|e| *e.key()).collect();
        players.sort();
        players
    }

    /// Σ of the player's entries, recomputed.
    #[must_use]
    pub fn replayed_balance_of(&self, player: PlayerId) -> Credits {
        self.existing(player).map_or(0, |a| {
            let a = a.lock();
            a.replayed_balance()
        })
    }

    /// Hex SHA-256 hash chain over the player's history, for audit export.
    #[must_use]
    pub fn history_digest(&self, player: PlayerId) -> String {
        let mut digest = [0u8; 32];
        for entry in self.history_of(player) {
            let mut hasher = Sha256::new();
            hasher.update(digest);
            hasher.update(entry.id.0.as_bytes());
            hasher.update(entry.entry_type.to_string().as_bytes());
            hasher.update(entry.amount.to_le_bytes());
            hasher.update(entry.sequence.to_le_bytes());
            digest = hasher.finalize().into();
        }
        hex::encode(digest)
    }

    // =================================================================
    // Reconciliation
    // =================================================================

    /// Recompute the cached balance from history. Corrects drift, touches
    /// nothing else.
    #[must_use]
    pub fn reconcile(&self, player: PlayerId) -> ReconcileReport {
        let Some(account) = self.existing(player) else {
            return ReconcileReport {
                player_id: player,
                old_balance: 0,
                new_balance: 0,
                corrected: false,
            };
        };
        let mut account = account.lock();
        let old_balance = account.balance;
        let new_balance = account.replayed_balance();
        let corrected = old_balance != new_balance;
        if corrected {
            tracing::warn!(
                player = %player,
                old_balance,
                new_balance,
                "Balance drift corrected from history"
            );
            account.balance = new_balance;
        }
        ReconcileReport {
            player_id: player,
            old_balance,
            new_balance,
            corrected,
        }
    }

    /// [`Ledger::reconcile`] for every player.
    #[must_use]
    pub fn reconcile_all(&self) -> Vec<ReconcileReport> {
        self.players()
            .into_iter()
            .map(|p| self.reconcile(p))
            .collect()
    }

    // =================================================================
    // Internals
    // =================================================================

    fn account(&self, player: PlayerId) -> Arc<Mutex<Account>> {
        Arc::clone(
            self.accounts
                .entry(player)
                .or_insert_with(|| Arc::new(Mutex::new(Account::new())))
                .value(),
        )
    }

    fn existing(&self, player: PlayerId) -> Option<Arc<Mutex<Account>>> {
        self.accounts.get(&player).map(|a| Arc::clone(a.value()))
    }
}

/// Drift injection for reconciliation tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Ledger {
    /// Skew the cached balance without an entry, to exercise drift detection.
    pub fn corrupt_cached_balance(&self, player: PlayerId, delta: Credits) {
        let account = self.account(player);
        account.lock().balance += delta;
    }
}
