use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::time::Instant;

use crate::model::*;

use super::tables::{RowGuard, RowKey, Snapshot, TableRow, acquire, change_key, read_latest};
use super::{Engine, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Each read sees the latest committed row.
    ReadCommitted,
    /// Reads are repeatable and validated at commit.
    Serializable,
}

impl IsolationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "read_committed",
            IsolationLevel::Serializable => "serializable",
        }
    }
}

/// A unit of work against the engine's tables.
///
/// Writes are buffered and become visible only on `commit`. Dropping the
/// transaction without committing discards them and releases every row lock
/// it holds.
pub struct Transaction<'e> {
    engine: &'e Engine,
    isolation: IsolationLevel,
    deadline: Instant,
    now: Ms,
    /// Version of every row read under `Serializable`.
    reads: HashMap<RowKey, u64>,
    snapshots: HashMap<RowKey, Snapshot>,
    /// Rows locked for update, released at commit or drop.
    held: BTreeMap<RowKey, RowGuard>,
    writes: Vec<Change>,
}

impl Engine {
    pub fn begin(&self, isolation: IsolationLevel) -> Transaction<'_> {
        Transaction {
            engine: self,
            isolation,
            deadline: Instant::now() + self.config.lock_timeout,
            now: self.now_ms(),
            reads: HashMap::new(),
            snapshots: HashMap::new(),
            held: BTreeMap::new(),
            writes: Vec::new(),
        }
    }
}

impl<'e> Transaction<'e> {
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Clock reading taken when the transaction began.
    pub fn now(&self) -> Ms {
        self.now
    }

    pub(crate) fn write(&mut self, change: Change) {
        self.writes.push(change);
    }

    pub(crate) fn pending_writes(&self) -> &[Change] {
        &self.writes
    }

    // ── Reads ────────────────────────────────────────────────

    async fn read_row<T: TableRow>(
        &mut self,
        key: RowKey,
        row: Option<super::tables::Row<T>>,
    ) -> Result<Option<T>, EngineError> {
        if let Some(v) = self.held.get(&key).and_then(T::from_guard) {
            return Ok(Some(v.value.clone()));
        }
        if let Some(v) = self.snapshots.get(&key).and_then(T::from_snapshot) {
            return Ok(Some(v.clone()));
        }
        let Some(row) = row else {
            if self.isolation == IsolationLevel::Serializable {
                self.reads.insert(key, 0);
            }
            return Ok(None);
        };
        let current = read_latest(&row, self.deadline).await?;
        if self.isolation == IsolationLevel::Serializable {
            self.reads.insert(key, current.version);
            self.snapshots
                .insert(key, T::wrap_snapshot(current.value.clone()));
        }
        Ok(Some(current.value))
    }

    pub async fn read_resource(&mut self, id: ResourceId) -> Result<Resource, EngineError> {
        let row = self.engine.tables.resource_row(id);
        self.read_row(RowKey::Resource(id), row)
            .await?
            .ok_or(EngineError::ResourceNotFound(id))
    }

    /// A missing partition reads as an empty schedule.
    pub async fn read_day(&mut self, key: DayKey) -> Result<DaySchedule, EngineError> {
        let row = self.engine.tables.day_row(key);
        if let Some(day) = self.read_row(RowKey::Day(key), row).await? {
            return Ok(day);
        }
        let empty = DaySchedule::new(key);
        if self.isolation == IsolationLevel::Serializable {
            self.snapshots
                .insert(RowKey::Day(key), Snapshot::Day(empty.clone()));
        }
        Ok(empty)
    }

    pub async fn read_booking(&mut self, id: BookingId) -> Result<Booking, EngineError> {
        let row = self.engine.tables.booking_row(id);
        self.read_row(RowKey::Booking(id), row)
            .await?
            .ok_or(EngineError::BookingNotFound(id))
    }

    // ── Locks for update ─────────────────────────────────────

    async fn lock_row<T: TableRow>(
        &mut self,
        key: RowKey,
        row: super::tables::Row<T>,
    ) -> Result<T, EngineError> {
        if let Some(v) = self.held.get(&key).and_then(T::from_guard) {
            return Ok(v.value.clone());
        }
        let guard = acquire(row, self.deadline).await?;
        if let Some(seen) = self.reads.remove(&key)
            && seen != guard.version
        {
            return Err(EngineError::SerializationConflict);
        }
        self.snapshots.remove(&key);
        let value = guard.value.clone();
        self.held.insert(key, T::wrap_guard(guard));
        Ok(value)
    }

    pub async fn lock_resource(&mut self, id: ResourceId) -> Result<Resource, EngineError> {
        let row = self
            .engine
            .tables
            .resource_row(id)
            .ok_or(EngineError::ResourceNotFound(id))?;
        self.lock_row(RowKey::Resource(id), row).await
    }

    pub async fn lock_booking(&mut self, id: BookingId) -> Result<Booking, EngineError> {
        let row = self
            .engine
            .tables
            .booking_row(id)
            .ok_or(EngineError::BookingNotFound(id))?;
        self.lock_row(RowKey::Booking(id), row).await
    }

    pub async fn lock_inventory(
        &mut self,
        key: InventoryKey,
    ) -> Result<InventoryRecord, EngineError> {
        let row = self
            .engine
            .tables
            .inventory_row(key)
            .ok_or(EngineError::InventoryNotFound(key))?;
        self.lock_row(RowKey::Inventory(key), row).await
    }

    // ── Commit / rollback ────────────────────────────────────

    /// Validate, log, and apply the buffered writes as one atomic unit.
    pub async fn commit(mut self) -> Result<(), EngineError> {
        if self.writes.is_empty() {
            return Ok(());
        }
        if Instant::now() >= self.deadline {
            metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
            return Err(EngineError::TransactionTimeout);
        }
        let tables = &self.engine.tables;

        let mut keys: BTreeSet<RowKey> = self.writes.iter().filter_map(change_key).collect();
        if self.isolation == IsolationLevel::Serializable {
            keys.extend(self.reads.keys().copied());
        }

        let mut guards = std::mem::take(&mut self.held);
        for key in keys {
            if guards.contains_key(&key) {
                continue;
            }
            if let Some(guard) = tables.lock(key, self.deadline).await? {
                guards.insert(key, guard);
            }
        }

        for (key, seen) in &self.reads {
            let current = guards.get(key).map(RowGuard::version).unwrap_or(0);
            if current != *seen {
                metrics::counter!(crate::observability::SERIALIZATION_CONFLICTS_TOTAL)
                    .increment(1);
                tracing::debug!(?key, seen, current, "read set validation failed");
                return Err(EngineError::SerializationConflict);
            }
        }

        let commit = Commit {
            changes: std::mem::take(&mut self.writes),
        };
        self.engine.wal_append(&commit).await?;
        tables.apply(&commit.changes, &mut guards);
        Ok(())
    }

    /// Discard buffered writes and release locks.
    pub fn rollback(self) {
        if !self.writes.is_empty() {
            tracing::debug!(writes = self.writes.len(), "transaction rolled back");
        }
    }
}
