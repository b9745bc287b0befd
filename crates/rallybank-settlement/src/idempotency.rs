//! Settlement idempotency guard: prevents double-settlement.
//!
//! Each match result and each auction close-out can only be settled once.
//! A key is marked only after every step of its settlement succeeded, so a
//! settlement that stopped part way stays unmarked and can be re-run.
//!
//! Unlike a trade cache, settled keys are never evicted: a forgotten key
//! would let a late duplicate result pay out twice.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use rallybank_types::{AuctionId, EconomyError, MatchId, Result};
use serde::{Deserialize, Serialize};

/// The identity of one multi-step settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementKey {
    Match(MatchId),
    Auction(AuctionId),
}

impl fmt::Display for SettlementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match(id) => write!(f, "settle:{id}"),
            Self::Auction(id) => write!(f, "settle:{id}"),
        }
    }
}

/// A settled key and when it was marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledRecord {
    pub key: SettlementKey,
    pub settled_at: DateTime<Utc>,
}

/// The set of fully settled keys, in settlement order.
#[derive(Debug, Default)]
pub struct IdempotencyGuard {
    settled: HashSet<SettlementKey>,
    order: Vec<SettledRecord>,
}

impl IdempotencyGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a settlement as complete.
    ///
    /// # Errors
    /// `MatchAlreadySettled` / `AuctionAlreadySettled` if the key was
    /// already marked.
    pub fn mark_settled(&mut self, key: SettlementKey, at: DateTime<Utc>) -> Result<()> {
        if !self.settled.insert(key) {
            return Err(match key {
                SettlementKey::Match(id) => EconomyError::MatchAlreadySettled(id),
                SettlementKey::Auction(id) => EconomyError::AuctionAlreadySettled(id),
            });
        }
        self.order.push(SettledRecord {
            key,
            settled_at: at,
        });
        Ok(())
    }

    #[must_use]
    pub fn is_settled(&self, key: &SettlementKey) -> bool {
        self.settled.contains(key)
    }

    /// Every settled key, oldest first.
    #[must_use]
    pub fn records(&self) -> &[SettledRecord] {
        &self.order
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.settled.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.settled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_settle_ok() {
        let mut guard = IdempotencyGuard::new();
        let key = SettlementKey::Match(MatchId::new());
        assert!(guard.mark_settled(key, Utc::now()).is_ok());
        assert!(guard.is_settled(&key));
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn double_settle_blocked() {
        let mut guard = IdempotencyGuard::new();
        let m = MatchId::new();
        guard.mark_settled(SettlementKey::Match(m), Utc::now()).unwrap();

        let err = guard
            .mark_settled(SettlementKey::Match(m), Utc::now())
            .unwrap_err();
        assert!(
            matches!(err, EconomyError::MatchAlreadySettled(id) if id == m),
            "Expected MatchAlreadySettled, got: {err:?}"
        );

        let a = AuctionId::new();
        guard.mark_settled(SettlementKey::Auction(a), Utc::now()).unwrap();
        let err = guard
            .mark_settled(SettlementKey::Auction(a), Utc::now())
            .unwrap_err();
        assert!(matches!(err, EconomyError::AuctionAlreadySettled(id) if id == a));
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn records_keep_settlement_order() {
        let mut guard = IdempotencyGuard::new();
        let keys: Vec<SettlementKey> = (0..5).map(|_| SettlementKey::Match(MatchId::new())).collect();
        for key in &keys {
            guard.mark_settled(*key, Utc::now()).unwrap();
        }
        let recorded: Vec<SettlementKey> = guard.records().iter().map(|r| r.key).collect();
        assert_eq!(recorded, keys);
    }

    #[test]
    fn empty_guard() {
        let guard = IdempotencyGuard::new();
        assert!(guard.is_empty());
        assert!(!guard.is_settled(&SettlementKey::Auction(AuctionId::new())));
    }

    #[test]
    fn key_display_names_the_subject() {
        let m = MatchId::new();
        assert_eq!(SettlementKey::Match(m).to_string(), format!("settle:{m}"));
    }
}
