// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

//! Metered credit spending reconciled against the authoritative ledger.
//!
//! The ledger only reports cumulative purchases; it never sees local
//! spends. Reconciliation therefore credits the delta above the
//! `fetch_at_sc` high-water mark instead of trusting the observed total,
//! which would resurrect credits already burned here.
//!
//! Spends are staged: `begin_spend` decrements the in-memory balance and
//! hands back a receipt holding the per-pair lock. The decrement becomes
//! durable on `commit` (one atomic write with the usage entry) or is
//! rolled back on `release`. Holding the lock for the whole prediction
//! serializes spends per (model, user), so a single credit admits exactly
//! one of any number of concurrent requests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

use crate::chain::{pair_key, ChainError, ChainLedger};
use crate::store::{unix_now, MetadataStore, StoreError, UsageRecord};

#[derive(Debug, Error)]
pub enum SpendError {
    #[error("insufficient credit: {remaining} remaining")]
    InsufficientCredit { remaining: u64 },
    #[error("authoritative ledger unreachable")]
    Chain(#[source] ChainError),
}

pub struct CreditLedger {
    store: Arc<Mutex<MetadataStore>>,
    chain: Arc<dyn ChainLedger>,
    pair_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// A staged, not yet durable spend. The embedded guard keeps the
/// (model, user) pair serialized until the receipt is committed or
/// released.
#[derive(Debug)]
pub struct SpendReceipt {
    pair: String,
    amount: u64,
    credits_before: u64,
    _guard: OwnedMutexGuard<()>,
}

impl SpendReceipt {
    pub fn credits_before(&self) -> u64 {
        self.credits_before
    }

    pub fn remaining(&self) -> u64 {
        self.credits_before - self.amount
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }
}

impl CreditLedger {
    pub fn new(store: Arc<Mutex<MetadataStore>>, chain: Arc<dyn ChainLedger>) -> Self {
        Self {
            store,
            chain,
            pair_locks: Mutex::new(HashMap::new()),
        }
    }

    fn pair_lock(&self, pair: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.pair_locks
            .lock()
            .entry(pair.to_string())
            .or_default()
            .clone()
    }

    /// Stages a spend of `amount` credits for the pair.
    ///
    /// The ledger is consulted lazily: only when the cached balance cannot
    /// cover the spend. The happy path is a pure in-memory decrement.
    pub async fn begin_spend(
        &self,
        model_cid: &str,
        user_address: &str,
        amount: u64,
    ) -> Result<SpendReceipt, SpendError> {
        let pair = pair_key(model_cid, user_address);
        let guard = self.pair_lock(&pair).lock_owned().await;

        let mut record = self.store.lock().credit(&pair);
        if record.remaining < amount {
            let observed = self
                .chain
                .credits_purchased(model_cid, user_address)
                .await
                .map_err(SpendError::Chain)?;
            let newly_purchased = observed.saturating_sub(record.fetch_at_sc);
            record.remaining = record.remaining.saturating_add(newly_purchased).min(observed);
            record.fetch_at_sc = observed;
            record.last_synced_at_unix = unix_now().unwrap_or(0);
            tracing::debug!(
                pair = %pair,
                observed,
                newly_purchased,
                remaining = record.remaining,
                "synced credits from ledger"
            );
            // Keep the advanced high-water mark even when the spend is
            // denied; it becomes durable with the next commit.
            self.store.lock().stage_credit(&pair, record);
        }

        if record.remaining < amount {
            return Err(SpendError::InsufficientCredit {
                remaining: record.remaining,
            });
        }

        let credits_before = record.remaining;
        record.remaining -= amount;
        self.store.lock().stage_credit(&pair, record);
        Ok(SpendReceipt {
            pair,
            amount,
            credits_before,
            _guard: guard,
        })
    }

    /// Rolls back a staged spend. Used when the prediction fails before
    /// anything was delivered to the caller.
    pub fn release(&self, receipt: SpendReceipt) {
        let mut store = self.store.lock();
        let mut record = store.credit(&receipt.pair);
        record.remaining = receipt.credits_before;
        store.stage_credit(&receipt.pair, record);
    }

    /// Makes a staged spend durable together with its usage entry, in one
    /// atomic snapshot write. On failure the decrement is rolled back and
    /// the error propagates; the caller must withhold the prediction.
    pub fn commit(
        &self,
        receipt: SpendReceipt,
        entry: UsageRecord,
    ) -> Result<u64, StoreError> {
        let remaining = receipt.remaining();
        let mut store = self.store.lock();
        match store.commit_spend(&receipt.pair, entry) {
            Ok(()) => Ok(remaining),
            Err(err) => {
                let mut record = store.credit(&receipt.pair);
                record.remaining = receipt.credits_before;
                store.stage_credit(&receipt.pair, record);
                Err(err)
            }
        }
    }
}
