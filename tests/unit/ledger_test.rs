//! Tests for budget accounting and forecasting

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use prometheus_budget_scheduler::config::{EngineConfig, PartitionConfig};
use prometheus_budget_scheduler::core::{
    BudgetLedger, LedgerRecord, ReallocationOutcome, RiskLevel, SchedulerError,
};
use prometheus_budget_scheduler::infra::{InMemoryStore, StateStore, StoreError};
use prometheus_budget_scheduler::util::Category;

fn config() -> EngineConfig {
    EngineConfig {
        total_capacity: 10_000,
        partitions: vec![
            PartitionConfig::new("alpha", [Category::Security], 2, 4_000).with_pool_reserve(1_000),
            PartitionConfig::new("beta", [Category::Test], 2, 3_000),
        ],
        ..EngineConfig::default()
    }
}

/// Store whose next `fail_next` writes land but report an error, the way
/// a write can reach disk before its sync fails.
#[derive(Default)]
struct AmbiguousStore {
    inner: InMemoryStore,
    fail_next: AtomicUsize,
}

impl AmbiguousStore {
    fn fail_next_puts(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

impl StateStore for AmbiguousStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.inner.put(key, value)?;
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Io {
                key: key.to_string(),
                source: std::io::Error::other("sync failed"),
            });
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys(prefix)
    }
}

fn stored_record(store: &dyn StateStore) -> LedgerRecord {
    serde_json::from_slice(&store.get("ledger").unwrap().unwrap()).unwrap()
}

#[test]
fn test_predict_is_deterministic() {
    let ledger = BudgetLedger::new(&config(), 0).unwrap();
    let forecast = ledger.predict(24, "development").unwrap();
    assert_eq!(forecast.burn_rate_per_hour, 12_000);
    assert_eq!(forecast.point, 288_000);
    assert_eq!(forecast.low, 244_800);
    assert_eq!(forecast.high, 331_200);
    assert!((forecast.confidence - 0.85).abs() < f64::EPSILON);
    assert_eq!(ledger.predict(24, "development").unwrap(), forecast);
}

#[test]
fn test_predict_unknown_burn_category() {
    let ledger = BudgetLedger::new(&config(), 0).unwrap();
    assert!(ledger.predict(1, "astrology").is_err());
    ledger.set_burn_rate("astrology", 10).unwrap();
    assert_eq!(ledger.predict(3, "astrology").unwrap().point, 30);
}

#[test]
fn test_reserve_then_release_restores_exact_state() {
    let ledger = BudgetLedger::new(&config(), 0).unwrap();
    let spent = ledger.reserve("alpha", 700).unwrap().unwrap();
    ledger.commit(&spent, 650).unwrap();

    let before = ledger.record();
    let reservation = ledger.reserve("alpha", 1_234).unwrap().unwrap();
    assert_ne!(ledger.record(), before);
    ledger.release(&reservation).unwrap();
    assert_eq!(ledger.record(), before);
}

#[test]
fn test_failed_reallocation_leaves_both_partitions_unchanged() {
    let ledger = BudgetLedger::new(&config(), 0).unwrap();
    let held = ledger.reserve("alpha", 4_000).unwrap().unwrap();
    let alpha_before = serde_json::to_vec(&ledger.partition_status("alpha").unwrap()).unwrap();
    let beta_before = serde_json::to_vec(&ledger.partition_status("beta").unwrap()).unwrap();

    // only 1_000 of alpha is unreserved
    let outcome = ledger.reallocate("alpha", "beta", 1_500).unwrap();
    assert!(matches!(outcome, ReallocationOutcome::Rejected { available: 1_000, .. }));
    assert_eq!(
        serde_json::to_vec(&ledger.partition_status("alpha").unwrap()).unwrap(),
        alpha_before
    );
    assert_eq!(
        serde_json::to_vec(&ledger.partition_status("beta").unwrap()).unwrap(),
        beta_before
    );
    ledger.release(&held).unwrap();
}

#[test]
fn test_concurrent_reservations_never_overbook() {
    let ledger = Arc::new(BudgetLedger::new(&config(), 0).unwrap());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            std::thread::spawn(move || {
                let mut won = Vec::new();
                for _ in 0..100 {
                    if let Some(r) = ledger.reserve("beta", 7).unwrap() {
                        won.push(r);
                    }
                }
                won
            })
        })
        .collect();
    let won: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();

    // 3_000 / 7 = 428 reservations fit
    assert_eq!(won.len(), 428);
    let beta = ledger.partition_status("beta").unwrap();
    assert_eq!(beta.reserved, 428 * 7);
    for r in &won {
        ledger.commit(r, 7).unwrap();
    }
    let (consumed, reserved) = ledger.consumed_and_reserved();
    assert_eq!(reserved, 0);
    assert!(consumed <= ledger.total_capacity());
}

#[test]
fn test_exhaustion_forecast_uses_default_burn_before_observation() {
    let ledger = BudgetLedger::new(&config(), 0).unwrap();
    // 10_000 remaining at the default 12_000/hour is under an hour
    let forecast = ledger.forecast_exhaustion(1_000);
    assert_eq!(forecast.remaining, 10_000);
    assert_eq!(forecast.risk, RiskLevel::Critical);
    assert_eq!(ledger.last_forecast(), Some(forecast));
}

#[test]
fn test_status_reports_every_partition() {
    let ledger = BudgetLedger::new(&config(), 0).unwrap();
    let status = ledger.status(0);
    assert_eq!(status.total, 10_000);
    assert_eq!(status.unallocated, 2_000);
    let names: Vec<&str> = status.partitions.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    assert!((status.partitions[0].percentage - 50.0).abs() < 1e-9);
}

#[test]
fn test_overrun_is_consumed_in_full() {
    let cfg = EngineConfig {
        total_capacity: 1_000,
        partitions: vec![PartitionConfig::new("main", Category::ALL, 2, 1_000)],
        ..EngineConfig::default()
    };
    let ledger = BudgetLedger::new(&cfg, 0).unwrap();
    let reservation = ledger.reserve("main", 1_000).unwrap().unwrap();

    let receipt = ledger.commit(&reservation, 1_500).unwrap();
    assert_eq!(receipt.delta, 500);

    // the actual cost is never clipped, so consumption can pass the total
    let main = ledger.partition_status("main").unwrap();
    assert_eq!(main.consumed, 1_500);
    assert_eq!(main.overrun, 500);
    assert_eq!(main.remaining, 0);
    assert!(ledger.consumed_and_reserved().0 > ledger.total_capacity());
    assert!(ledger.is_globally_exhausted());
    assert!(ledger.reserve("main", 1).unwrap().is_none());
}

#[test]
fn test_failed_write_leaves_store_matching_memory() {
    let store = Arc::new(AmbiguousStore::default());
    let ledger = BudgetLedger::new(&config(), 0)
        .unwrap()
        .with_store(Arc::clone(&store) as Arc<dyn StateStore>);
    let kept = ledger.reserve("alpha", 500).unwrap().unwrap();

    store.fail_next_puts(1);
    assert!(matches!(
        ledger.reserve("alpha", 200),
        Err(SchedulerError::Persistence(_))
    ));
    assert_eq!(ledger.partition_status("alpha").unwrap().reserved, 500);
    assert_eq!(stored_record(store.as_ref()), ledger.record());

    store.fail_next_puts(1);
    assert!(ledger.commit(&kept, 450).is_err());
    assert_eq!(stored_record(store.as_ref()), ledger.record());
    assert_eq!(ledger.partition_status("alpha").unwrap().consumed, 0);

    store.fail_next_puts(1);
    assert!(ledger.reallocate("alpha", "beta", 100).is_err());
    assert_eq!(stored_record(store.as_ref()), ledger.record());
    assert_eq!(ledger.partition_status("beta").unwrap().allocation, 3_000);
}

#[test]
fn test_burn_rates_and_forecast_are_persisted() {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
    let ledger = BudgetLedger::new(&config(), 0).unwrap().with_store(Arc::clone(&store));

    ledger.set_burn_rate("review", 3_000).unwrap();
    assert_eq!(stored_record(store.as_ref()).burn_rates.get("review"), Some(&3_000));

    let forecast = ledger.forecast_exhaustion(1_000);
    let cached = stored_record(store.as_ref()).last_forecast.unwrap();
    assert_eq!(cached.computed_at_ms, 1_000);
    assert_eq!(cached.remaining, forecast.remaining);
    assert_eq!(cached.risk, forecast.risk);

    let restored = BudgetLedger::restore(&config(), stored_record(store.as_ref())).unwrap();
    assert_eq!(restored.predict(2, "review").unwrap().point, 6_000);
}

#[test]
fn test_unreferenced_reservations_are_released() {
    let ledger = BudgetLedger::new(&config(), 0).unwrap();
    let owned = ledger.reserve("alpha", 300).unwrap().unwrap();
    ledger.reserve("alpha", 200).unwrap().unwrap();
    ledger.reserve("beta", 50).unwrap().unwrap();

    let referenced = std::iter::once(owned.id).collect();
    assert_eq!(ledger.release_unreferenced(&referenced).unwrap(), 250);
    assert_eq!(ledger.partition_status("alpha").unwrap().reserved, 300);
    assert_eq!(ledger.partition_status("beta").unwrap().reserved, 0);
    assert_eq!(ledger.release_unreferenced(&referenced).unwrap(), 0);
}
