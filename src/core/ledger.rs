//! Budget ledger: the shared consumable budget, its per-partition allocation,
//! reservations made at admission time, and usage forecasting.
//!
//! Each partition account sits behind its own `parking_lot::Mutex`, so reserving
//! in one partition never waits on another. Ledger-wide fields (capacity, epoch,
//! burn rates) live behind a separate `RwLock`. Lock order is always meta first,
//! then accounts in declaration order.
//!
//! Every mutation is persisted as one ledger snapshot. Snapshots are taken
//! under a dedicated persist lock, so the last write always covers every
//! mutation that finished before it. If the write fails the in-memory change
//! is undone, the snapshot is written again so a concurrent writer cannot
//! leave the undone change in the store, and the error is returned.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{EngineConfig, ForecastConfig};
use crate::core::audit::{emit, AuditAction, SharedAuditSink};
use crate::core::SchedulerError;
use crate::infra::store::{self, StateStore, LEDGER_KEY};
use crate::util::clock::ms_to_hours;
use crate::util::types::PartitionId;

/// Provisional debit made at admission time.
///
/// Settled exactly once, by [`BudgetLedger::commit`] or
/// [`BudgetLedger::release`]; a second settlement is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier.
    pub id: Uuid,
    /// Partition the amount is held in.
    pub partition: PartitionId,
    /// Reserved amount.
    pub amount: u64,
}

/// Result of converting a reservation into consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Amount that had been reserved.
    pub reserved: u64,
    /// Amount actually consumed.
    pub actual: u64,
    /// `actual - reserved`; positive when the estimate was too low.
    pub delta: i128,
}

/// Persisted state of one partition account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionAccount {
    /// Partition name.
    pub name: PartitionId,
    /// Base allocation.
    pub base: u64,
    /// Reserve held for the partition's pool.
    pub pool_reserve: u64,
    /// Consumed in the current epoch.
    pub consumed: u64,
    /// Open reservations.
    #[serde(default)]
    pub reservations: BTreeMap<Uuid, u64>,
}

impl PartitionAccount {
    fn allocation(&self) -> u64 {
        self.base.saturating_add(self.pool_reserve)
    }

    fn reserved(&self) -> u64 {
        self.reservations.values().sum()
    }

    fn unreserved(&self) -> u64 {
        self.allocation()
            .saturating_sub(self.consumed.saturating_add(self.reserved()))
    }

    fn overrun(&self) -> u64 {
        self.consumed.saturating_sub(self.allocation())
    }

    /// Take `amount` out of the allocation, base first.
    fn debit(&mut self, amount: u64) {
        let from_base = amount.min(self.base);
        self.base -= from_base;
        self.pool_reserve = self.pool_reserve.saturating_sub(amount - from_base);
    }
}

/// Read-only view of one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionStatus {
    /// Partition name.
    pub name: PartitionId,
    /// Base allocation.
    pub base: u64,
    /// Pool reserve.
    pub pool_reserve: u64,
    /// Base plus reserve.
    pub allocation: u64,
    /// Allocation as a percentage of total capacity.
    pub percentage: f64,
    /// Outstanding reservations.
    pub reserved: u64,
    /// Consumed in the current epoch.
    pub consumed: u64,
    /// Consumption beyond the allocation.
    pub overrun: u64,
    /// Allocation not yet consumed or reserved.
    pub remaining: u64,
}

/// Exhaustion risk bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Comfortable runway.
    Low,
    /// Runway below the medium threshold.
    Medium,
    /// Runway below the high threshold.
    High,
    /// Runway below the critical threshold.
    Critical,
}

/// Usage prediction for a burn category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageForecast {
    /// Burn category.
    pub category: String,
    /// Horizon in hours.
    pub hours: u32,
    /// Burn rate used.
    pub burn_rate_per_hour: u64,
    /// Point estimate.
    pub point: u64,
    /// Lower bound of the interval.
    pub low: u64,
    /// Upper bound of the interval.
    pub high: u64,
    /// Confidence attached to the interval.
    pub confidence: f64,
}

/// Runway estimate for the whole ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExhaustionForecast {
    /// Budget neither consumed nor reserved.
    pub remaining: u64,
    /// Burn rate used for the estimate.
    pub burn_rate_per_hour: f64,
    /// Hours until exhaustion; `None` when nothing is burning.
    pub hours_remaining: Option<f64>,
    /// Risk bucket.
    pub risk: RiskLevel,
    /// When the estimate was made.
    pub computed_at_ms: u128,
}

/// Ledger-wide status for operators and dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    /// Total capacity for the epoch.
    pub total: u64,
    /// Consumed across partitions.
    pub consumed: u64,
    /// Reserved across partitions.
    pub reserved: u64,
    /// Capacity not allocated to any partition.
    pub unallocated: u64,
    /// Current epoch number.
    pub epoch: u64,
    /// Per-partition detail in declaration order.
    pub partitions: Vec<PartitionStatus>,
    /// Runway estimate.
    pub forecast: ExhaustionForecast,
}

/// Outcome of a reallocation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ReallocationOutcome {
    /// Both partitions were updated.
    Applied {
        /// Amount moved.
        moved: u64,
        /// Source allocation afterwards.
        from_allocation: u64,
        /// Target allocation afterwards.
        to_allocation: u64,
    },
    /// Validation failed; neither partition changed.
    Rejected {
        /// Why the request was refused.
        reason: String,
        /// Unreserved allocation available in the source.
        available: u64,
    },
}

/// Durable ledger snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Total capacity.
    pub total_capacity: u64,
    /// Epoch number.
    pub epoch: u64,
    /// Epoch start.
    pub epoch_started_ms: u128,
    /// Accounts in declaration order.
    pub partitions: Vec<PartitionAccount>,
    /// Declared burn rates.
    pub burn_rates: BTreeMap<String, u64>,
    /// Most recent exhaustion forecast.
    pub last_forecast: Option<ExhaustionForecast>,
}

struct LedgerMeta {
    total_capacity: u64,
    epoch: u64,
    epoch_started_ms: u128,
    burn_rates: BTreeMap<String, u64>,
    last_forecast: Option<ExhaustionForecast>,
}

/// Shared budget with per-partition accounts.
pub struct BudgetLedger {
    meta: RwLock<LedgerMeta>,
    accounts: Vec<Mutex<PartitionAccount>>,
    index: HashMap<PartitionId, usize>,
    forecast: ForecastConfig,
    store: Option<Arc<dyn StateStore>>,
    persist_lock: Mutex<()>,
    audit: Option<SharedAuditSink>,
}

impl BudgetLedger {
    /// Create a ledger with the allocations declared in `cfg`.
    pub fn new(cfg: &EngineConfig, now_ms: u128) -> Result<Self, SchedulerError> {
        cfg.validate().map_err(SchedulerError::InvalidConfig)?;
        let accounts = cfg
            .partitions
            .iter()
            .map(|p| PartitionAccount {
                name: p.name.clone(),
                base: p.base_allocation,
                pool_reserve: p.pool_reserve,
                consumed: 0,
                reservations: BTreeMap::new(),
            })
            .collect();
        Ok(Self::from_parts(
            cfg,
            LedgerMeta {
                total_capacity: cfg.total_capacity,
                epoch: 0,
                epoch_started_ms: now_ms,
                burn_rates: cfg.forecast.burn_rates.clone(),
                last_forecast: None,
            },
            accounts,
        ))
    }

    /// Rebuild a ledger from a persisted record.
    ///
    /// Partitions are taken from `cfg`; balances come from the record where a
    /// partition of the same name exists there.
    pub fn restore(cfg: &EngineConfig, record: LedgerRecord) -> Result<Self, SchedulerError> {
        let mut saved: HashMap<PartitionId, PartitionAccount> = record
            .partitions
            .into_iter()
            .map(|a| (a.name.clone(), a))
            .collect();
        let accounts: Vec<PartitionAccount> = cfg
            .partitions
            .iter()
            .map(|p| {
                saved.remove(&p.name).unwrap_or_else(|| PartitionAccount {
                    name: p.name.clone(),
                    base: p.base_allocation,
                    pool_reserve: p.pool_reserve,
                    consumed: 0,
                    reservations: BTreeMap::new(),
                })
            })
            .collect();
        let allocated: u64 = accounts.iter().map(PartitionAccount::allocation).sum();
        if allocated > record.total_capacity {
            return Err(SchedulerError::InvalidConfig(format!(
                "restored allocations ({allocated}) exceed total capacity ({})",
                record.total_capacity
            )));
        }
        for dropped in saved.keys() {
            warn!(partition = %dropped, "persisted partition no longer configured; dropping its account");
        }
        Ok(Self::from_parts(
            cfg,
            LedgerMeta {
                total_capacity: record.total_capacity,
                epoch: record.epoch,
                epoch_started_ms: record.epoch_started_ms,
                burn_rates: record.burn_rates,
                last_forecast: record.last_forecast,
            },
            accounts,
        ))
    }

    fn from_parts(cfg: &EngineConfig, meta: LedgerMeta, accounts: Vec<PartitionAccount>) -> Self {
        let index = accounts
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.clone(), i))
            .collect();
        Self {
            meta: RwLock::new(meta),
            accounts: accounts.into_iter().map(Mutex::new).collect(),
            index,
            forecast: cfg.forecast.clone(),
            store: None,
            persist_lock: Mutex::new(()),
            audit: None,
        }
    }

    /// Persist every mutation to `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    fn account(&self, partition: &str) -> Result<(usize, &Mutex<PartitionAccount>), SchedulerError> {
        self.index
            .get(partition)
            .map(|&i| (i, &self.accounts[i]))
            .ok_or_else(|| SchedulerError::UnknownPartition(partition.to_string()))
    }

    /// Partition names in declaration order.
    #[must_use]
    pub fn partition_names(&self) -> Vec<PartitionId> {
        self.accounts.iter().map(|a| a.lock().name.clone()).collect()
    }

    /// Snapshot of the ledger as it would be persisted.
    #[must_use]
    pub fn record(&self) -> LedgerRecord {
        let meta = self.meta.read();
        let partitions = self.accounts.iter().map(|a| a.lock().clone()).collect();
        LedgerRecord {
            total_capacity: meta.total_capacity,
            epoch: meta.epoch,
            epoch_started_ms: meta.epoch_started_ms,
            partitions,
            burn_rates: meta.burn_rates.clone(),
            last_forecast: meta.last_forecast.clone(),
        }
    }

    /// Write the current snapshot to the store, if one is attached.
    pub fn persist(&self) -> Result<(), SchedulerError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock();
        let record = self.record();
        store::save_json(store.as_ref(), LEDGER_KEY, &record).map_err(|e| {
            error!(error = %e, "failed to persist ledger snapshot");
            SchedulerError::from(e)
        })
    }

    /// Rewrite the snapshot after an in-memory undo.
    fn resync(&self) {
        if self.persist().is_err() {
            warn!("ledger store may hold an undone change until the next write");
        }
    }

    /// Reserve `amount` in `partition` if its unreserved allocation covers it.
    ///
    /// Returns `Ok(None)` without side effects when the allocation is short.
    pub fn reserve(&self, partition: &str, amount: u64) -> Result<Option<Reservation>, SchedulerError> {
        let (_, account) = self.account(partition)?;
        let reservation = {
            let mut acct = account.lock();
            let available = acct.unreserved();
            if amount > available {
                debug!(partition, amount, available, "reservation refused");
                return Ok(None);
            }
            let reservation = Reservation {
                id: Uuid::new_v4(),
                partition: partition.to_string(),
                amount,
            };
            acct.reservations.insert(reservation.id, amount);
            reservation
        };
        if let Err(e) = self.persist() {
            account.lock().reservations.remove(&reservation.id);
            self.resync();
            return Err(e);
        }
        debug!(partition, amount, reservation = %reservation.id, "budget reserved");
        Ok(Some(reservation))
    }

    /// Convert a reservation into consumption of `actual`.
    ///
    /// The difference from the reserved amount is absorbed into the partition's
    /// consumed total.
    pub fn commit(&self, reservation: &Reservation, actual: u64) -> Result<CommitReceipt, SchedulerError> {
        let (_, account) = self.account(&reservation.partition)?;
        let reserved = {
            let mut acct = account.lock();
            let Some(reserved) = acct.reservations.remove(&reservation.id) else {
                return Err(SchedulerError::ConcurrentModification(format!(
                    "reservation {} already settled",
                    reservation.id
                )));
            };
            acct.consumed = acct.consumed.saturating_add(actual);
            if acct.overrun() > 0 {
                warn!(
                    partition = %acct.name,
                    overrun = acct.overrun(),
                    "partition consumption exceeds its allocation"
                );
            }
            reserved
        };
        if let Err(e) = self.persist() {
            let mut acct = account.lock();
            acct.consumed = acct.consumed.saturating_sub(actual);
            acct.reservations.insert(reservation.id, reserved);
            drop(acct);
            self.resync();
            return Err(e);
        }
        let receipt = CommitReceipt {
            reserved,
            actual,
            delta: i128::from(actual) - i128::from(reserved),
        };
        debug!(
            partition = %reservation.partition,
            reserved,
            actual,
            delta = receipt.delta,
            "reservation committed"
        );
        Ok(receipt)
    }

    /// Cancel an unused reservation.
    pub fn release(&self, reservation: &Reservation) -> Result<(), SchedulerError> {
        let (_, account) = self.account(&reservation.partition)?;
        let reserved = account
            .lock()
            .reservations
            .remove(&reservation.id)
            .ok_or_else(|| {
                SchedulerError::ConcurrentModification(format!(
                    "reservation {} already settled",
                    reservation.id
                ))
            })?;
        if let Err(e) = self.persist() {
            account.lock().reservations.insert(reservation.id, reserved);
            self.resync();
            return Err(e);
        }
        debug!(partition = %reservation.partition, amount = reserved, "reservation released");
        Ok(())
    }

    /// Move `amount` of allocation from one partition to another.
    ///
    /// Validation happens with both accounts locked; a rejected request
    /// leaves both untouched.
    pub fn reallocate(&self, from: &str, to: &str, amount: u64) -> Result<ReallocationOutcome, SchedulerError> {
        let (from_idx, from_acct) = self.account(from)?;
        let (to_idx, to_acct) = self.account(to)?;
        if from_idx == to_idx {
            return Ok(ReallocationOutcome::Rejected {
                reason: "source and target are the same partition".into(),
                available: from_acct.lock().unreserved(),
            });
        }

        // Lock in declaration order.
        let (mut first, mut second) = if from_idx < to_idx {
            (from_acct.lock(), to_acct.lock())
        } else {
            (to_acct.lock(), from_acct.lock())
        };
        let (src, dst) = if from_idx < to_idx {
            (&mut *first, &mut *second)
        } else {
            (&mut *second, &mut *first)
        };

        let available = src.unreserved();
        if amount == 0 || amount > available {
            warn!(from, to, amount, available, "reallocation rejected");
            return Ok(ReallocationOutcome::Rejected {
                reason: if amount == 0 {
                    "amount must be greater than zero".into()
                } else {
                    format!("`{from}` has only {available} unreserved")
                },
                available,
            });
        }

        let saved = ((src.base, src.pool_reserve), dst.base);
        src.debit(amount);
        dst.base = dst.base.saturating_add(amount);
        let outcome = ReallocationOutcome::Applied {
            moved: amount,
            from_allocation: src.allocation(),
            to_allocation: dst.allocation(),
        };
        drop(first);
        drop(second);

        if let Err(e) = self.persist() {
            let (mut first, mut second) = if from_idx < to_idx {
                (from_acct.lock(), to_acct.lock())
            } else {
                (to_acct.lock(), from_acct.lock())
            };
            let (src, dst) = if from_idx < to_idx {
                (&mut *first, &mut *second)
            } else {
                (&mut *second, &mut *first)
            };
            (src.base, src.pool_reserve) = saved.0;
            dst.base = saved.1;
            drop(first);
            drop(second);
            self.resync();
            return Err(e);
        }

        info!(from, to, amount, "budget reallocated");
        emit(
            self.audit.as_ref(),
            format!("{from}->{to}"),
            Some(from),
            AuditAction::Reallocate,
            Some(amount.to_string()),
        );
        Ok(outcome)
    }

    /// Widen a partition's base allocation out of unallocated capacity.
    ///
    /// Returns `false` when the headroom is smaller than `amount`.
    pub fn grow_allocation(&self, partition: &str, amount: u64) -> Result<bool, SchedulerError> {
        let (_, account) = self.account(partition)?;
        {
            let meta = self.meta.write();
            let allocated = self.allocated_locked();
            let headroom = meta.total_capacity.saturating_sub(allocated);
            if amount == 0 || amount > headroom {
                debug!(partition, amount, headroom, "allocation growth refused");
                return Ok(false);
            }
            let mut acct = account.lock();
            acct.base = acct.base.saturating_add(amount);
        }
        if let Err(e) = self.persist() {
            {
                let mut acct = account.lock();
                acct.base = acct.base.saturating_sub(amount);
            }
            self.resync();
            return Err(e);
        }
        info!(partition, amount, "partition allocation widened");
        emit(
            self.audit.as_ref(),
            partition,
            Some(partition),
            AuditAction::Grow,
            Some(amount.to_string()),
        );
        Ok(true)
    }

    /// Change total capacity. It may not drop below the sum of allocations.
    pub fn set_total_capacity(&self, total: u64) -> Result<(), SchedulerError> {
        let previous = {
            let mut meta = self.meta.write();
            let allocated = self.allocated_locked();
            if total < allocated {
                return Err(SchedulerError::InvalidConfig(format!(
                    "total capacity {total} is below allocated {allocated}"
                )));
            }
            std::mem::replace(&mut meta.total_capacity, total)
        };
        if let Err(e) = self.persist() {
            self.meta.write().total_capacity = previous;
            self.resync();
            return Err(e);
        }
        info!(previous, total, "total capacity changed");
        Ok(())
    }

    /// Sum of allocations; caller must already hold the meta lock.
    fn allocated_locked(&self) -> u64 {
        self.accounts.iter().map(|a| a.lock().allocation()).sum()
    }

    /// Declare or replace a burn rate.
    pub fn set_burn_rate(&self, category: impl Into<String>, per_hour: u64) -> Result<(), SchedulerError> {
        let category = category.into();
        let previous = self.meta.write().burn_rates.insert(category.clone(), per_hour);
        if let Err(e) = self.persist() {
            {
                let mut meta = self.meta.write();
                match previous {
                    Some(rate) => meta.burn_rates.insert(category, rate),
                    None => meta.burn_rates.remove(&category),
                };
            }
            self.resync();
            return Err(e);
        }
        debug!(category = %category, per_hour, "burn rate declared");
        Ok(())
    }

    /// Predict consumption of `category` over `hours`.
    ///
    /// The point estimate is `rate * hours`; the interval is the configured
    /// percentage either side of it and the confidence is one minus that
    /// percentage.
    pub fn predict(&self, hours: u32, category: &str) -> Result<UsageForecast, SchedulerError> {
        let rate = self
            .meta
            .read()
            .burn_rates
            .get(category)
            .copied()
            .ok_or_else(|| SchedulerError::InvalidCategory(format!("no burn rate for `{category}`")))?;
        let pct = u128::from(self.forecast.interval_percent);
        let point = u128::from(rate) * u128::from(hours);
        let clamp = |v: u128| u64::try_from(v).unwrap_or(u64::MAX);
        Ok(UsageForecast {
            category: category.to_string(),
            hours,
            burn_rate_per_hour: rate,
            point: clamp(point),
            low: clamp(point * (100 - pct) / 100),
            high: clamp(point * (100 + pct) / 100),
            confidence: f64::from(100 - self.forecast.interval_percent) / 100.0,
        })
    }

    /// Estimate runway from the current burn rate and cache the result.
    ///
    /// The cached forecast is written with the ledger snapshot. A failed write
    /// is logged; the forecast is still returned since it is derived state.
    pub fn forecast_exhaustion(&self, now_ms: u128) -> ExhaustionForecast {
        let forecast = self.compute_exhaustion(now_ms);
        match forecast.risk {
            RiskLevel::Critical | RiskLevel::High => {
                warn!(risk = ?forecast.risk, hours = ?forecast.hours_remaining, "budget runway is short");
            }
            _ => debug!(risk = ?forecast.risk, hours = ?forecast.hours_remaining, "budget forecast"),
        }
        self.meta.write().last_forecast = Some(forecast.clone());
        if let Err(e) = self.persist() {
            warn!(error = %e, "cached forecast not persisted");
        }
        forecast
    }

    /// The most recent cached exhaustion forecast.
    #[must_use]
    pub fn last_forecast(&self) -> Option<ExhaustionForecast> {
        self.meta.read().last_forecast.clone()
    }

    #[allow(clippy::cast_precision_loss)]
    fn compute_exhaustion(&self, now_ms: u128) -> ExhaustionForecast {
        let (total, started) = {
            let meta = self.meta.read();
            (meta.total_capacity, meta.epoch_started_ms)
        };
        let (consumed, reserved) = self.totals();
        let remaining = total.saturating_sub(consumed.saturating_add(reserved));
        let age_ms = now_ms.saturating_sub(started);
        let observed = age_ms >= u128::from(self.forecast.min_observation_secs) * 1000 && consumed > 0;
        let burn_rate_per_hour = if observed {
            consumed as f64 / ms_to_hours(age_ms)
        } else {
            self.forecast.default_burn_rate_per_hour as f64
        };
        let hours_remaining = (burn_rate_per_hour > 0.0).then(|| remaining as f64 / burn_rate_per_hour);
        ExhaustionForecast {
            remaining,
            burn_rate_per_hour,
            hours_remaining,
            risk: classify_risk(hours_remaining, &self.forecast),
            computed_at_ms: now_ms,
        }
    }

    fn totals(&self) -> (u64, u64) {
        self.accounts.iter().fold((0, 0), |(c, r), a| {
            let acct = a.lock();
            (c.saturating_add(acct.consumed), r.saturating_add(acct.reserved()))
        })
    }

    /// Consumed and reserved across all partitions.
    #[must_use]
    pub fn consumed_and_reserved(&self) -> (u64, u64) {
        self.totals()
    }

    /// Total capacity.
    #[must_use]
    pub fn total_capacity(&self) -> u64 {
        self.meta.read().total_capacity
    }

    /// Fraction of total capacity consumed this epoch.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        let total = self.total_capacity();
        if total == 0 {
            return 1.0;
        }
        self.totals().0 as f64 / total as f64
    }

    /// Whether consumption has reached total capacity; admissions halt
    /// everywhere until capacity is raised or the epoch rolls over.
    #[must_use]
    pub fn is_globally_exhausted(&self) -> bool {
        self.totals().0 >= self.total_capacity()
    }

    /// Unreserved allocation left in `partition`.
    pub fn remaining(&self, partition: &str) -> Result<u64, SchedulerError> {
        Ok(self.account(partition)?.1.lock().unreserved())
    }

    /// Status of one partition.
    pub fn partition_status(&self, partition: &str) -> Result<PartitionStatus, SchedulerError> {
        let total = self.total_capacity();
        let (_, account) = self.account(partition)?;
        let acct = account.lock();
        Ok(status_of(&acct, total))
    }

    /// Read-only ledger status. Does not update the cached forecast.
    #[must_use]
    pub fn status(&self, now_ms: u128) -> BudgetStatus {
        let (total, epoch) = {
            let meta = self.meta.read();
            (meta.total_capacity, meta.epoch)
        };
        let partitions: Vec<PartitionStatus> = self
            .accounts
            .iter()
            .map(|a| status_of(&a.lock(), total))
            .collect();
        let consumed = partitions.iter().map(|p| p.consumed).sum();
        let reserved = partitions.iter().map(|p| p.reserved).sum();
        let allocated: u64 = partitions.iter().map(|p| p.allocation).sum();
        BudgetStatus {
            total,
            consumed,
            reserved,
            unallocated: total.saturating_sub(allocated),
            epoch,
            partitions,
            forecast: self.compute_exhaustion(now_ms),
        }
    }

    /// Ids of every open reservation.
    #[must_use]
    pub fn reservation_ids(&self) -> HashSet<Uuid> {
        self.accounts
            .iter()
            .flat_map(|a| a.lock().reservations.keys().copied().collect::<Vec<_>>())
            .collect()
    }

    /// Drop every open reservation whose id is not in `referenced`.
    ///
    /// A crash between writing the ledger and writing the task that owns a
    /// reservation leaves it held by nobody. Returns the amount freed.
    pub fn release_unreferenced(&self, referenced: &HashSet<Uuid>) -> Result<u64, SchedulerError> {
        let mut dropped: Vec<(usize, Uuid, u64)> = Vec::new();
        for (idx, account) in self.accounts.iter().enumerate() {
            let mut acct = account.lock();
            let orphans: Vec<Uuid> = acct
                .reservations
                .keys()
                .filter(|id| !referenced.contains(id))
                .copied()
                .collect();
            for id in orphans {
                if let Some(amount) = acct.reservations.remove(&id) {
                    warn!(partition = %acct.name, reservation = %id, amount, "releasing unreferenced reservation");
                    dropped.push((idx, id, amount));
                }
            }
        }
        if dropped.is_empty() {
            return Ok(0);
        }
        if let Err(e) = self.persist() {
            for (idx, id, amount) in dropped {
                self.accounts[idx].lock().reservations.insert(id, amount);
            }
            self.resync();
            return Err(e);
        }
        let freed = dropped.iter().map(|(_, _, amount)| amount).sum();
        info!(released = dropped.len(), freed, "unreferenced reservations released");
        Ok(freed)
    }

    /// Put back a reservation a restored task still owns but the ledger lost.
    ///
    /// Returns `false` if the ledger already holds it.
    pub fn adopt_reservation(&self, reservation: &Reservation) -> Result<bool, SchedulerError> {
        let (_, account) = self.account(&reservation.partition)?;
        {
            let mut acct = account.lock();
            if acct.reservations.contains_key(&reservation.id) {
                return Ok(false);
            }
            acct.reservations.insert(reservation.id, reservation.amount);
        }
        if let Err(e) = self.persist() {
            account.lock().reservations.remove(&reservation.id);
            self.resync();
            return Err(e);
        }
        warn!(
            partition = %reservation.partition,
            reservation = %reservation.id,
            amount = reservation.amount,
            "reservation re-adopted from task record"
        );
        Ok(true)
    }

    /// Current epoch number.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.meta.read().epoch
    }

    /// Start a new budget epoch: consumption resets, reservations carry over.
    pub fn reset_epoch(&self, now_ms: u128) -> Result<u64, SchedulerError> {
        let (epoch, saved, previous) = {
            let mut meta = self.meta.write();
            let saved: Vec<u64> = self
                .accounts
                .iter()
                .map(|a| std::mem::take(&mut a.lock().consumed))
                .collect();
            let previous = (
                std::mem::replace(&mut meta.epoch_started_ms, now_ms),
                meta.last_forecast.take(),
            );
            meta.epoch += 1;
            (meta.epoch, saved, previous)
        };
        if let Err(e) = self.persist() {
            let mut meta = self.meta.write();
            meta.epoch -= 1;
            (meta.epoch_started_ms, meta.last_forecast) = previous;
            for (account, consumed) in self.accounts.iter().zip(saved) {
                account.lock().consumed += consumed;
            }
            drop(meta);
            self.resync();
            return Err(e);
        }
        info!(epoch, "budget epoch reset");
        emit(self.audit.as_ref(), format!("epoch-{epoch}"), None, AuditAction::EpochReset, None);
        Ok(epoch)
    }

    /// Roll the epoch over if the configured length has elapsed.
    pub fn maybe_roll_epoch(&self, now_ms: u128) -> Result<bool, SchedulerError> {
        if self.forecast.epoch_length_secs == 0 {
            return Ok(false);
        }
        let started = self.meta.read().epoch_started_ms;
        if now_ms.saturating_sub(started) < u128::from(self.forecast.epoch_length_secs) * 1000 {
            return Ok(false);
        }
        self.reset_epoch(now_ms).map(|_| true)
    }
}

#[allow(clippy::cast_precision_loss)]
fn status_of(acct: &PartitionAccount, total: u64) -> PartitionStatus {
    let allocation = acct.allocation();
    PartitionStatus {
        name: acct.name.clone(),
        base: acct.base,
        pool_reserve: acct.pool_reserve,
        allocation,
        percentage: if total == 0 {
            0.0
        } else {
            allocation as f64 * 100.0 / total as f64
        },
        reserved: acct.reserved(),
        consumed: acct.consumed,
        overrun: acct.overrun(),
        remaining: acct.unreserved(),
    }
}

/// Bucket a runway into a risk level using the configured thresholds.
#[must_use]
pub fn classify_risk(hours_remaining: Option<f64>, cfg: &ForecastConfig) -> RiskLevel {
    match hours_remaining {
        None => RiskLevel::Low,
        Some(h) if h < cfg.critical_hours => RiskLevel::Critical,
        Some(h) if h < cfg.high_hours => RiskLevel::High,
        Some(h) if h < cfg.medium_hours => RiskLevel::Medium,
        Some(_) => RiskLevel::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitionConfig;
    use crate::util::types::Category;

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

    #[test]
    fn test_reserve_refuses_without_side_effect() {
        let ledger = BudgetLedger::new(&config(), 0).unwrap();
        let before = ledger.record();
        assert!(ledger.reserve("beta", 3_001).unwrap().is_none());
        assert_eq!(ledger.record(), before);
    }

    #[test]
    fn test_commit_absorbs_delta() {
        let ledger = BudgetLedger::new(&config(), 0).unwrap();
        let r = ledger.reserve("alpha", 500).unwrap().unwrap();
        let receipt = ledger.commit(&r, 650).unwrap();
        assert_eq!(receipt.delta, 150);
        let status = ledger.partition_status("alpha").unwrap();
        assert_eq!(status.consumed, 650);
        assert_eq!(status.reserved, 0);
        assert_eq!(status.remaining, 5_000 - 650);
    }

    #[test]
    fn test_double_settlement_rejected() {
        let ledger = BudgetLedger::new(&config(), 0).unwrap();
        let r = ledger.reserve("alpha", 100).unwrap().unwrap();
        ledger.release(&r).unwrap();
        assert!(matches!(
            ledger.release(&r),
            Err(SchedulerError::ConcurrentModification(_))
        ));
        assert!(ledger.commit(&r, 100).is_err());
    }

    #[test]
    fn test_unknown_partition() {
        let ledger = BudgetLedger::new(&config(), 0).unwrap();
        assert!(matches!(
            ledger.reserve("gamma", 1),
            Err(SchedulerError::UnknownPartition(_))
        ));
    }

    #[test]
    fn test_reallocate_debits_base_then_reserve() {
        let ledger = BudgetLedger::new(&config(), 0).unwrap();
        let outcome = ledger.reallocate("alpha", "beta", 4_500).unwrap();
        assert_eq!(
            outcome,
            ReallocationOutcome::Applied {
                moved: 4_500,
                from_allocation: 500,
                to_allocation: 7_500,
            }
        );
        let alpha = ledger.partition_status("alpha").unwrap();
        assert_eq!(alpha.base, 0);
        assert_eq!(alpha.pool_reserve, 500);
    }

    #[test]
    fn test_grow_allocation_respects_headroom() {
        let ledger = BudgetLedger::new(&config(), 0).unwrap();
        assert!(!ledger.grow_allocation("beta", 2_001).unwrap());
        assert!(ledger.grow_allocation("beta", 2_000).unwrap());
        assert_eq!(ledger.status(0).unallocated, 0);
    }

    #[test]
    fn test_set_total_capacity_below_allocation_fails() {
        let ledger = BudgetLedger::new(&config(), 0).unwrap();
        assert!(ledger.set_total_capacity(7_999).is_err());
        ledger.set_total_capacity(8_000).unwrap();
        assert_eq!(ledger.total_capacity(), 8_000);
    }

    #[test]
    fn test_classify_risk_buckets() {
        let cfg = ForecastConfig::default();
        assert_eq!(classify_risk(Some(3.9), &cfg), RiskLevel::Critical);
        assert_eq!(classify_risk(Some(4.0), &cfg), RiskLevel::High);
        assert_eq!(classify_risk(Some(12.0), &cfg), RiskLevel::Medium);
        assert_eq!(classify_risk(Some(16.0), &cfg), RiskLevel::Low);
        assert_eq!(classify_risk(None, &cfg), RiskLevel::Low);
    }

    #[test]
    fn test_epoch_reset_keeps_reservations() {
        let ledger = BudgetLedger::new(&config(), 0).unwrap();
        let spent = ledger.reserve("alpha", 300).unwrap().unwrap();
        ledger.commit(&spent, 300).unwrap();
        let held = ledger.reserve("alpha", 200).unwrap().unwrap();

        assert_eq!(ledger.reset_epoch(1_000).unwrap(), 1);
        let alpha = ledger.partition_status("alpha").unwrap();
        assert_eq!(alpha.consumed, 0);
        assert_eq!(alpha.reserved, 200);
        ledger.release(&held).unwrap();
    }

    #[test]
    fn test_maybe_roll_epoch_uses_configured_length() {
        let ledger = BudgetLedger::new(&config(), 0).unwrap();
        assert!(!ledger.maybe_roll_epoch(1_000).unwrap());
        assert!(ledger.maybe_roll_epoch(86_400_000).unwrap());
        assert_eq!(ledger.epoch(), 1);
    }
}
