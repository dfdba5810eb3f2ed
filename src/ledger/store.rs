//! Durable order-pair store with atomic status transitions.
//!
//! The ledger is the single serialization point for the workers: every
//! status change goes through `transition`, a compare-and-set on
//! `(id, expected_status)` performed under the store's write lock. The
//! backing file is replaced atomically (write to temp, fsync, rename) so a
//! crash leaves either the old snapshot or the new one, never a torn file.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::pair::{OrderPair, PairDraft, PairId, PairStatus, PairUpdate};

/// Errors surfaced by ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Storage failure. The in-memory mutation may already have been applied;
    /// callers must not assume the write did not happen.
    #[error("ledger persistence failure: {0}")]
    Persistence(String),

    /// A mutation that would corrupt the ledger: backward status move,
    /// double-set of `quantity_actual` or `sell_order_ref`. Fatal to the
    /// worker that attempted it.
    #[error("invariant violation on pair {id}: {reason}")]
    InvariantViolation { id: PairId, reason: String },

    #[error("pair not found: {0}")]
    NotFound(PairId),
}

/// Aggregate view over the pair history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerStats {
    pub total_pairs: usize,
    pub opening: usize,
    pub awaiting_sell: usize,
    pub closing: usize,
    pub complete: usize,
    pub failed: usize,
    pub total_gain_quote: Decimal,
    pub profitable_trades: usize,
    pub losing_trades: usize,
    pub win_rate_percent: Decimal,
    pub average_gain_quote: Decimal,
}

/// On-disk snapshot layout.
#[derive(Serialize, Deserialize, Default)]
struct LedgerFile {
    next_id: u64,
    pairs: Vec<OrderPair>,
}

struct LedgerInner {
    next_id: u64,
    pairs: BTreeMap<PairId, OrderPair>,
}

/// Durable store of order pairs.
///
/// All cross-worker coordination is expressed as compare-and-set through
/// `transition`; there are no other write paths for status. Reads are
/// snapshots: a pair observed via `list_by_status` may be concurrently
/// transitioned by another worker, which the CAS semantics absorb.
pub struct Ledger {
    inner: RwLock<LedgerInner>,
    path: Option<PathBuf>,
}

impl Ledger {
    /// Open a ledger backed by `path`, loading the existing snapshot if one
    /// is present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let file = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str::<LedgerFile>(&data)
                .map_err(|e| LedgerError::Persistence(format!("corrupt ledger file: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LedgerFile::default(),
            Err(e) => return Err(LedgerError::Persistence(e.to_string())),
        };

        let pairs: BTreeMap<PairId, OrderPair> =
            file.pairs.into_iter().map(|p| (p.id, p)).collect();
        // Recover the counter from the data if the snapshot predates it.
        let next_id = file
            .next_id
            .max(pairs.keys().last().map(|id| id.value() + 1).unwrap_or(1));

        info!(
            path = %path.display(),
            pairs = pairs.len(),
            "Ledger opened"
        );

        Ok(Self {
            inner: RwLock::new(LedgerInner { next_id, pairs }),
            path: Some(path),
        })
    }

    /// In-memory ledger with no backing file. Restart durability is the
    /// caller's problem; used by tests and embedders with their own store.
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(LedgerInner {
                next_id: 1,
                pairs: BTreeMap::new(),
            }),
            path: None,
        }
    }

    /// Insert a new pair in `Opening` with a fresh unique id.
    ///
    /// On `Persistence` errors the pair may still have been recorded; callers
    /// must not assume non-occurrence of the write.
    pub async fn create_pair(&self, draft: PairDraft) -> Result<PairId, LedgerError> {
        debug_assert!(
            draft.buy_price > Decimal::ZERO && draft.quantity_requested > Decimal::ZERO,
            "pairs must be created with positive price and quantity"
        );

        let mut inner = self.inner.write().await;

        let id = PairId::new(inner.next_id);
        inner.next_id += 1;

        let pair = OrderPair {
            id,
            status: PairStatus::Opening,
            symbol: draft.symbol,
            market_regime: draft.market_regime,
            buy_price: draft.buy_price,
            sell_price: draft.sell_price,
            quantity_requested: draft.quantity_requested,
            quantity_actual: None,
            buy_order_ref: Some(draft.buy_order_ref),
            sell_order_ref: None,
            created_at: Utc::now(),
            buy_filled_at: None,
            sell_placed_at: None,
            completed_at: None,
            realized_gain_quote: None,
            realized_gain_percent: None,
        };

        info!(
            pair_id = %id,
            symbol = %pair.symbol,
            regime = %pair.market_regime,
            buy_price = %pair.buy_price,
            sell_price = %pair.sell_price,
            quantity_requested = %pair.quantity_requested,
            "Pair created"
        );

        inner.pairs.insert(id, pair);
        self.persist(&inner)?;
        Ok(id)
    }

    /// Atomic compare-and-set transition.
    ///
    /// Verifies the current status equals `expected`; if so applies `update`
    /// and persists, returning `Ok(Some(updated))`. A stale expected status
    /// is a no-op, not an error: returns `Ok(None)` without mutation. A
    /// mutation that would move the pair backward or re-set a single-set
    /// field is an `InvariantViolation`.
    pub async fn transition(
        &self,
        id: PairId,
        expected: PairStatus,
        update: PairUpdate,
    ) -> Result<Option<OrderPair>, LedgerError> {
        let mut inner = self.inner.write().await;

        let current = match inner.pairs.get(&id) {
            Some(p) => p.clone(),
            None => return Err(LedgerError::NotFound(id)),
        };

        if current.status != expected {
            debug!(
                pair_id = %id,
                expected = %expected,
                actual = %current.status,
                "Transition skipped: stale expected status"
            );
            return Ok(None);
        }

        let updated = Self::apply(&current, update)?;

        info!(
            pair_id = %id,
            old_status = %current.status,
            new_status = %updated.status,
            quantity_requested = %updated.quantity_requested,
            quantity_actual = ?updated.quantity_actual,
            "Pair transitioned"
        );

        inner.pairs.insert(id, updated.clone());
        self.persist(&inner)?;
        Ok(Some(updated))
    }

    /// Snapshot read of all pairs in `status`, in id order.
    pub async fn list_by_status(&self, status: PairStatus) -> Vec<OrderPair> {
        let inner = self.inner.read().await;
        inner
            .pairs
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect()
    }

    /// Fetch a single pair.
    pub async fn get(&self, id: PairId) -> Option<OrderPair> {
        let inner = self.inner.read().await;
        inner.pairs.get(&id).cloned()
    }

    /// Snapshot of the full history, most recent last.
    pub async fn all_pairs(&self) -> Vec<OrderPair> {
        let inner = self.inner.read().await;
        inner.pairs.values().cloned().collect()
    }

    /// Aggregate statistics over the pair history.
    pub async fn stats(&self) -> LedgerStats {
        let inner = self.inner.read().await;
        let mut stats = LedgerStats::default();

        for pair in inner.pairs.values() {
            stats.total_pairs += 1;
            match pair.status {
                PairStatus::Opening => stats.opening += 1,
                PairStatus::AwaitingSell => stats.awaiting_sell += 1,
                PairStatus::Closing => stats.closing += 1,
                PairStatus::Complete => stats.complete += 1,
                PairStatus::Failed => stats.failed += 1,
            }
            if let Some(gain) = pair.realized_gain_quote {
                stats.total_gain_quote += gain;
                if gain > Decimal::ZERO {
                    stats.profitable_trades += 1;
                } else {
                    stats.losing_trades += 1;
                }
            }
        }

        if stats.complete > 0 {
            let complete = Decimal::from(stats.complete as u64);
            stats.win_rate_percent =
                Decimal::from(stats.profitable_trades as u64) / complete * Decimal::ONE_HUNDRED;
            stats.average_gain_quote = stats.total_gain_quote / complete;
        }

        stats
    }

    /// Apply an update to a pair, enforcing the single-set and forward-only
    /// invariants. Pure; the caller has already CAS-checked the status.
    fn apply(current: &OrderPair, update: PairUpdate) -> Result<OrderPair, LedgerError> {
        if !current.status.allows(update.status) {
            return Err(LedgerError::InvariantViolation {
                id: current.id,
                reason: format!(
                    "illegal status move {} -> {}",
                    current.status, update.status
                ),
            });
        }

        if update.quantity_actual.is_some() {
            if current.quantity_actual.is_some() {
                return Err(LedgerError::InvariantViolation {
                    id: current.id,
                    reason: "quantity_actual is already set".to_string(),
                });
            }
            if !(current.status == PairStatus::Opening
                && update.status == PairStatus::AwaitingSell)
            {
                return Err(LedgerError::InvariantViolation {
                    id: current.id,
                    reason: format!(
                        "quantity_actual may only be set on Opening -> AwaitingSell, not {} -> {}",
                        current.status, update.status
                    ),
                });
            }
        }

        if update.sell_order_ref.is_some() {
            if current.sell_order_ref.is_some() {
                return Err(LedgerError::InvariantViolation {
                    id: current.id,
                    reason: "sell_order_ref is already set".to_string(),
                });
            }
            if current.status != PairStatus::AwaitingSell {
                return Err(LedgerError::InvariantViolation {
                    id: current.id,
                    reason: format!(
                        "sell_order_ref may only be set from AwaitingSell, not {}",
                        current.status
                    ),
                });
            }
        }

        let mut updated = current.clone();
        updated.status = update.status;
        if let Some(q) = update.quantity_actual {
            updated.quantity_actual = Some(q);
        }
        if let Some(r) = update.sell_order_ref {
            updated.sell_order_ref = Some(r);
        }
        if let Some(p) = update.sell_price {
            updated.sell_price = p;
        }
        if let Some(t) = update.buy_filled_at {
            updated.buy_filled_at = Some(t);
        }
        if let Some(t) = update.sell_placed_at {
            updated.sell_placed_at = Some(t);
        }
        if let Some(t) = update.completed_at {
            updated.completed_at = Some(t);
        }
        if let Some(g) = update.realized_gain_quote {
            updated.realized_gain_quote = Some(g);
        }
        if let Some(g) = update.realized_gain_percent {
            updated.realized_gain_percent = Some(g);
        }
        Ok(updated)
    }

    /// Persist the current snapshot with write-to-temp, fsync, rename.
    ///
    /// Called with the write lock held, so snapshots are serialized with the
    /// mutations they capture.
    fn persist(&self, inner: &LedgerInner) -> Result<(), LedgerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = LedgerFile {
            next_id: inner.next_id,
            pairs: inner.pairs.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;

        match Self::write_atomic(path, &json) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ledger snapshot write failed");
                Err(LedgerError::Persistence(e.to_string()))
            }
        }
    }

    fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(contents.as_bytes())?;
        // Commit the write before making it visible; rename is atomic on the
        // same filesystem, so a crash leaves old-or-new, never partial.
        file.sync_all()?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::MarketRegime;
    use crate::types::OrderRef;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn draft(symbol: &str) -> PairDraft {
        PairDraft {
            symbol: symbol.to_string(),
            market_regime: MarketRegime::Range,
            buy_price: dec!(100000),
            sell_price: dec!(100400),
            quantity_requested: dec!(0.001),
            buy_order_ref: OrderRef::new("buy-1"),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let ledger = Ledger::in_memory();

        let id = ledger.create_pair(draft("BTC/USDC")).await.unwrap();
        let pair = ledger.get(id).await.unwrap();

        assert_eq!(pair.status, PairStatus::Opening);
        assert_eq!(pair.symbol, "BTC/USDC");
        assert!(pair.quantity_actual.is_none());
        assert!(pair.sell_order_ref.is_none());
        assert!(pair.buy_order_ref.is_some());

        // Fresh ids, never reused
        let id2 = ledger.create_pair(draft("BTC/USDC")).await.unwrap();
        assert!(id2 > id);
    }

    #[tokio::test]
    async fn test_transition_cas_success_and_stale() {
        let ledger = Ledger::in_memory();
        let id = ledger.create_pair(draft("BTC/USDC")).await.unwrap();

        let updated = ledger
            .transition(id, PairStatus::Opening, PairUpdate::buy_filled(dec!(0.00099996), Utc::now()))
            .await
            .unwrap();
        assert!(updated.is_some());
        assert_eq!(updated.unwrap().status, PairStatus::AwaitingSell);

        // Stale expected status is a no-op, not an error
        let stale = ledger
            .transition(id, PairStatus::Opening, PairUpdate::failed())
            .await
            .unwrap();
        assert!(stale.is_none());
        assert_eq!(ledger.get(id).await.unwrap().status, PairStatus::AwaitingSell);
    }

    #[tokio::test]
    async fn test_transition_unknown_pair() {
        let ledger = Ledger::in_memory();
        let err = ledger
            .transition(PairId::new(99), PairStatus::Opening, PairUpdate::failed())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_quantity_actual_set_exactly_once() {
        let ledger = Ledger::in_memory();
        let id = ledger.create_pair(draft("BTC/USDC")).await.unwrap();

        ledger
            .transition(id, PairStatus::Opening, PairUpdate::buy_filled(dec!(0.001), Utc::now()))
            .await
            .unwrap();

        // A second set must be rejected loudly, whatever the transition
        let mut update = PairUpdate::sell_placed(OrderRef::new("sell-1"), dec!(100400), Utc::now());
        update.quantity_actual = Some(dec!(0.002));
        let err = ledger
            .transition(id, PairStatus::AwaitingSell, update)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation { .. }));
        assert_eq!(ledger.get(id).await.unwrap().quantity_actual, Some(dec!(0.001)));
    }

    #[tokio::test]
    async fn test_backward_transition_is_invariant_violation() {
        let ledger = Ledger::in_memory();
        let id = ledger.create_pair(draft("BTC/USDC")).await.unwrap();

        ledger
            .transition(id, PairStatus::Opening, PairUpdate::buy_filled(dec!(0.001), Utc::now()))
            .await
            .unwrap();

        // AwaitingSell -> Opening is a regression even with a matching CAS
        let mut backward = PairUpdate::failed();
        backward.status = PairStatus::Opening;
        let err = ledger
            .transition(id, PairStatus::AwaitingSell, backward)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation { .. }));
    }

    #[tokio::test]
    async fn test_sell_order_ref_only_from_awaiting_sell() {
        let ledger = Ledger::in_memory();
        let id = ledger.create_pair(draft("BTC/USDC")).await.unwrap();

        // Still Opening: placing a sell ref must be rejected
        let mut update = PairUpdate::failed();
        update.sell_order_ref = Some(OrderRef::new("sell-1"));
        let err = ledger
            .transition(id, PairStatus::Opening, update)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_cas_exactly_one_wins() {
        let ledger = Arc::new(Ledger::in_memory());
        let id = ledger.create_pair(draft("BTC/USDC")).await.unwrap();

        let a = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                ledger
                    .transition(
                        id,
                        PairStatus::Opening,
                        PairUpdate::buy_filled(dec!(0.001), Utc::now()),
                    )
                    .await
                    .unwrap()
            })
        };
        let b = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                ledger
                    .transition(id, PairStatus::Opening, PairUpdate::failed())
                    .await
                    .unwrap()
            })
        };

        let (ra, rb) = (a.await.unwrap(), b.await.unwrap());
        assert!(
            ra.is_some() ^ rb.is_some(),
            "exactly one of two same-expected-status transitions must win"
        );
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let ledger = Ledger::in_memory();
        let a = ledger.create_pair(draft("BTC/USDC")).await.unwrap();
        let _b = ledger.create_pair(draft("BTC/USDC")).await.unwrap();

        ledger
            .transition(a, PairStatus::Opening, PairUpdate::buy_filled(dec!(0.001), Utc::now()))
            .await
            .unwrap();

        assert_eq!(ledger.list_by_status(PairStatus::Opening).await.len(), 1);
        assert_eq!(ledger.list_by_status(PairStatus::AwaitingSell).await.len(), 1);
        assert_eq!(ledger.list_by_status(PairStatus::Closing).await.len(), 0);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let id = {
            let ledger = Ledger::open(&path).unwrap();
            let id = ledger.create_pair(draft("BTC/USDC")).await.unwrap();
            ledger
                .transition(id, PairStatus::Opening, PairUpdate::buy_filled(dec!(0.00099996), Utc::now()))
                .await
                .unwrap();
            id
        };

        let reopened = Ledger::open(&path).unwrap();
        let pair = reopened.get(id).await.unwrap();
        assert_eq!(pair.status, PairStatus::AwaitingSell);
        assert_eq!(pair.quantity_actual, Some(dec!(0.00099996)));

        // Ids keep advancing after restart
        let id2 = reopened.create_pair(draft("BTC/USDC")).await.unwrap();
        assert!(id2 > id);
    }

    #[tokio::test]
    async fn test_stats() {
        let ledger = Ledger::in_memory();
        let a = ledger.create_pair(draft("BTC/USDC")).await.unwrap();
        let _open = ledger.create_pair(draft("BTC/USDC")).await.unwrap();

        ledger
            .transition(a, PairStatus::Opening, PairUpdate::buy_filled(dec!(0.001), Utc::now()))
            .await
            .unwrap();
        ledger
            .transition(
                a,
                PairStatus::AwaitingSell,
                PairUpdate::sell_placed(OrderRef::new("sell-1"), dec!(100400), Utc::now()),
            )
            .await
            .unwrap();
        ledger
            .transition(
                a,
                PairStatus::Closing,
                PairUpdate::completed(dec!(0.32), dec!(0.32), Utc::now()),
            )
            .await
            .unwrap();

        let stats = ledger.stats().await;
        assert_eq!(stats.total_pairs, 2);
        assert_eq!(stats.complete, 1);
        assert_eq!(stats.opening, 1);
        assert_eq!(stats.profitable_trades, 1);
        assert_eq!(stats.total_gain_quote, dec!(0.32));
        assert_eq!(stats.win_rate_percent, dec!(100));
    }
}
