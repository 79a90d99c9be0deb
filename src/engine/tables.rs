use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tokio::time::{Instant, timeout_at};

use crate::model::*;

use super::EngineError;

/// A committed row value plus the number of commits that have written it.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

pub type Row<T> = Arc<RwLock<Versioned<T>>>;

fn new_row<T>(value: T, version: u64) -> Row<T> {
    Arc::new(RwLock::new(Versioned { version, value }))
}

/// Identity of a lockable row. The derived order is the global lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowKey {
    Resource(ResourceId),
    Day(DayKey),
    Booking(BookingId),
    Inventory(InventoryKey),
}

/// Row touched by a change, if any. Catalog changes (services, prices) are
/// not row-locked.
pub(crate) fn change_key(change: &Change) -> Option<RowKey> {
    match change {
        Change::ResourceSaved(r) => Some(RowKey::Resource(r.id)),
        Change::InventoryStocked(rec) => Some(RowKey::Inventory(rec.key())),
        Change::InventoryAdjusted { key, .. } => Some(RowKey::Inventory(*key)),
        Change::HoldPlaced(hold) => Some(RowKey::Day(hold.key())),
        Change::HoldRenewed { key, .. }
        | Change::HoldRemoved { key, .. }
        | Change::ScheduleRemoved { key, .. } => Some(RowKey::Day(*key)),
        Change::ScheduleAdded(entry) => Some(RowKey::Day(entry.key())),
        Change::BookingSaved(b) => Some(RowKey::Booking(b.id)),
        Change::ServiceSaved(_) | Change::PriceBandsSet { .. } => None,
    }
}

/// Exclusive guard on one row, held by a transaction until commit or drop.
pub(crate) enum RowGuard {
    Resource(OwnedRwLockWriteGuard<Versioned<Resource>>),
    Day(OwnedRwLockWriteGuard<Versioned<DaySchedule>>),
    Booking(OwnedRwLockWriteGuard<Versioned<Booking>>),
    Inventory(OwnedRwLockWriteGuard<Versioned<InventoryRecord>>),
}

impl RowGuard {
    pub(crate) fn version(&self) -> u64 {
        match self {
            RowGuard::Resource(g) => g.version,
            RowGuard::Day(g) => g.version,
            RowGuard::Booking(g) => g.version,
            RowGuard::Inventory(g) => g.version,
        }
    }

    fn bump(&mut self) {
        match self {
            RowGuard::Resource(g) => g.version += 1,
            RowGuard::Day(g) => g.version += 1,
            RowGuard::Booking(g) => g.version += 1,
            RowGuard::Inventory(g) => g.version += 1,
        }
    }
}

/// Private copy of a row taken by a serializable read.
#[derive(Debug, Clone)]
pub(crate) enum Snapshot {
    Resource(Resource),
    Day(DaySchedule),
    Booking(Booking),
    Inventory(InventoryRecord),
}

/// Glue between a row payload type and the type-erased guard/snapshot enums.
pub(crate) trait TableRow: Clone + Send + Sync + 'static {
    fn wrap_guard(guard: OwnedRwLockWriteGuard<Versioned<Self>>) -> RowGuard;
    fn from_guard(guard: &RowGuard) -> Option<&Versioned<Self>>;
    fn wrap_snapshot(value: Self) -> Snapshot;
    fn from_snapshot(snapshot: &Snapshot) -> Option<&Self>;
}

macro_rules! table_row {
    ($ty:ty, $variant:ident) => {
        impl TableRow for $ty {
            fn wrap_guard(guard: OwnedRwLockWriteGuard<Versioned<Self>>) -> RowGuard {
                RowGuard::$variant(guard)
            }
            fn from_guard(guard: &RowGuard) -> Option<&Versioned<Self>> {
                match guard {
                    RowGuard::$variant(g) => Some(&**g),
                    _ => None,
                }
            }
            fn wrap_snapshot(value: Self) -> Snapshot {
                Snapshot::$variant(value)
            }
            fn from_snapshot(snapshot: &Snapshot) -> Option<&Self> {
                match snapshot {
                    Snapshot::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

table_row!(Resource, Resource);
table_row!(DaySchedule, Day);
table_row!(Booking, Booking);
table_row!(InventoryRecord, Inventory);

/// Wait for an exclusive guard, giving up at `deadline`.
pub(crate) async fn acquire<T>(
    row: Row<T>,
    deadline: Instant,
) -> Result<OwnedRwLockWriteGuard<Versioned<T>>, EngineError> {
    timeout_at(deadline, row.write_owned()).await.map_err(|_| {
        metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
        EngineError::TransactionTimeout
    })
}

/// Copy out the latest committed version of a row.
pub(crate) async fn read_latest<T: Clone>(
    row: &Row<T>,
    deadline: Instant,
) -> Result<Versioned<T>, EngineError> {
    let guard = timeout_at(deadline, row.read()).await.map_err(|_| {
        metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
        EngineError::TransactionTimeout
    })?;
    Ok((*guard).clone())
}

/// The system of record: every table the engine owns.
pub struct Tables {
    pub(crate) resources: DashMap<ResourceId, Row<Resource>>,
    pub(crate) days: DashMap<DayKey, Row<DaySchedule>>,
    pub(crate) bookings: DashMap<BookingId, Row<Booking>>,
    pub(crate) inventory: DashMap<InventoryKey, Row<InventoryRecord>>,
    pub(crate) services: DashMap<ItemId, ServiceItem>,
    pub(crate) prices: DashMap<String, Vec<PriceBand>>,
    /// Reverse lookup: hold token → partition holding it.
    pub(crate) hold_index: DashMap<HoldToken, DayKey>,
    /// Reverse lookup: line item → owning booking.
    pub(crate) line_item_index: DashMap<LineItemId, BookingId>,
    next_booking_id: AtomicI64,
    next_line_item_id: AtomicI64,
}

impl Default for Tables {
    fn default() -> Self {
        Self::new()
    }
}

impl Tables {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            days: DashMap::new(),
            bookings: DashMap::new(),
            inventory: DashMap::new(),
            services: DashMap::new(),
            prices: DashMap::new(),
            hold_index: DashMap::new(),
            line_item_index: DashMap::new(),
            next_booking_id: AtomicI64::new(1),
            next_line_item_id: AtomicI64::new(1),
        }
    }

    pub(crate) fn next_booking_id(&self) -> BookingId {
        self.next_booking_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn next_line_item_id(&self) -> LineItemId {
        self.next_line_item_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn resource_row(&self, id: ResourceId) -> Option<Row<Resource>> {
        self.resources.get(&id).map(|e| e.value().clone())
    }

    pub(crate) fn booking_row(&self, id: BookingId) -> Option<Row<Booking>> {
        self.bookings.get(&id).map(|e| e.value().clone())
    }

    pub(crate) fn inventory_row(&self, key: InventoryKey) -> Option<Row<InventoryRecord>> {
        self.inventory.get(&key).map(|e| e.value().clone())
    }

    pub(crate) fn day_row(&self, key: DayKey) -> Option<Row<DaySchedule>> {
        self.days.get(&key).map(|e| e.value().clone())
    }

    /// Partitions spring into existence empty, at version 0.
    pub(crate) fn day_row_or_insert(&self, key: DayKey) -> Row<DaySchedule> {
        self.days
            .entry(key)
            .or_insert_with(|| new_row(DaySchedule::new(key), 0))
            .value()
            .clone()
    }

    /// Partitions that currently index a hold on `resource_id`.
    pub(crate) fn hold_partitions(&self, resource_id: ResourceId) -> BTreeSet<DayKey> {
        self.hold_index
            .iter()
            .filter(|e| e.value().resource_id == resource_id)
            .map(|e| *e.value())
            .collect()
    }

    /// Exclusive guard on the row behind `key`; `None` when the row does not
    /// exist yet (it will be inserted at apply time).
    pub(crate) async fn lock(
        &self,
        key: RowKey,
        deadline: Instant,
    ) -> Result<Option<RowGuard>, EngineError> {
        Ok(match key {
            RowKey::Resource(id) => match self.resource_row(id) {
                Some(row) => Some(RowGuard::Resource(acquire(row, deadline).await?)),
                None => None,
            },
            RowKey::Day(k) => Some(RowGuard::Day(
                acquire(self.day_row_or_insert(k), deadline).await?,
            )),
            RowKey::Booking(id) => match self.booking_row(id) {
                Some(row) => Some(RowGuard::Booking(acquire(row, deadline).await?)),
                None => None,
            },
            RowKey::Inventory(k) => match self.inventory_row(k) {
                Some(row) => Some(RowGuard::Inventory(acquire(row, deadline).await?)),
                None => None,
            },
        })
    }

    /// Same as `lock`, for replay where nothing else holds a guard.
    fn lock_uncontended(&self, key: RowKey) -> Option<RowGuard> {
        match key {
            RowKey::Resource(id) => self
                .resource_row(id)
                .and_then(|row| row.try_write_owned().ok())
                .map(RowGuard::Resource),
            RowKey::Day(k) => self
                .day_row_or_insert(k)
                .try_write_owned()
                .ok()
                .map(RowGuard::Day),
            RowKey::Booking(id) => self
                .booking_row(id)
                .and_then(|row| row.try_write_owned().ok())
                .map(RowGuard::Booking),
            RowKey::Inventory(k) => self
                .inventory_row(k)
                .and_then(|row| row.try_write_owned().ok())
                .map(RowGuard::Inventory),
        }
    }

    /// Apply one committed change list. The caller holds a guard for every
    /// existing row the changes touch; rows without a guard are new.
    pub(crate) fn apply(&self, changes: &[Change], guards: &mut BTreeMap<RowKey, RowGuard>) {
        let mut touched = BTreeSet::new();
        for change in changes {
            if let Some(key) = change_key(change) {
                touched.insert(key);
            }
            self.apply_change(change, guards);
        }
        for key in touched {
            if let Some(guard) = guards.get_mut(&key) {
                guard.bump();
            }
        }
    }

    fn apply_change(&self, change: &Change, guards: &mut BTreeMap<RowKey, RowGuard>) {
        match change {
            Change::ResourceSaved(resource) => {
                match guards.get_mut(&RowKey::Resource(resource.id)) {
                    Some(RowGuard::Resource(g)) => g.value = resource.clone(),
                    _ => {
                        self.resources
                            .insert(resource.id, new_row(resource.clone(), 1));
                    }
                }
            }
            Change::ServiceSaved(item) => {
                self.services.insert(item.id, item.clone());
            }
            Change::PriceBandsSet { category, bands } => {
                self.prices.insert(category.clone(), bands.clone());
            }
            Change::InventoryStocked(record) => {
                match guards.get_mut(&RowKey::Inventory(record.key())) {
                    Some(RowGuard::Inventory(g)) => g.value = record.clone(),
                    _ => {
                        self.inventory
                            .insert(record.key(), new_row(record.clone(), 1));
                    }
                }
            }
            Change::InventoryAdjusted { key, delta, at } => {
                match guards.get_mut(&RowKey::Inventory(*key)) {
                    Some(RowGuard::Inventory(g)) => {
                        g.value.quantity += delta;
                        g.value.updated_at = *at;
                    }
                    _ => tracing::warn!(?key, "inventory adjustment for unknown row skipped"),
                }
            }
            Change::HoldPlaced(hold) => {
                if let Some(day) = day_mut(guards, hold.key()) {
                    day.insert_hold(hold);
                    self.hold_index.insert(hold.token, hold.key());
                }
            }
            Change::HoldRenewed {
                token,
                key,
                expires_at,
            } => {
                if let Some(day) = day_mut(guards, *key) {
                    day.renew_hold(*token, *expires_at);
                }
            }
            Change::HoldRemoved { token, key } => {
                if let Some(day) = day_mut(guards, *key) {
                    day.remove_hold(*token);
                }
                self.hold_index.remove(token);
            }
            Change::ScheduleAdded(entry) => {
                if let Some(day) = day_mut(guards, entry.key()) {
                    day.insert_entry(entry);
                }
            }
            Change::ScheduleRemoved { booking_id, key } => {
                if let Some(day) = day_mut(guards, *key) {
                    day.remove_scheduled(*booking_id);
                }
            }
            Change::BookingSaved(booking) => {
                match guards.get_mut(&RowKey::Booking(booking.id)) {
                    Some(RowGuard::Booking(g)) => {
                        for old in &g.value.line_items {
                            if !booking.line_items.iter().any(|l| l.id == old.id) {
                                self.line_item_index.remove(&old.id);
                            }
                        }
                        g.value = booking.clone();
                    }
                    _ => {
                        self.bookings
                            .insert(booking.id, new_row(booking.clone(), 1));
                    }
                }
                for item in &booking.line_items {
                    self.line_item_index.insert(item.id, booking.id);
                    self.next_line_item_id
                        .fetch_max(item.id + 1, Ordering::SeqCst);
                }
                self.next_booking_id
                    .fetch_max(booking.id + 1, Ordering::SeqCst);
            }
        }
    }

    /// Re-apply a commit read back from the WAL.
    pub(crate) fn replay(&self, commit: &Commit) {
        let mut guards = BTreeMap::new();
        for change in &commit.changes {
            if let Some(key) = change_key(change)
                && !guards.contains_key(&key)
                && let Some(guard) = self.lock_uncontended(key)
            {
                guards.insert(key, guard);
            }
        }
        self.apply(&commit.changes, &mut guards);
    }

    /// One commit that recreates the current state. Holds already expired at
    /// `now` are left out. Only called on tables nobody else is using.
    pub(crate) fn snapshot(&self, now: Ms) -> Commit {
        let mut changes = Vec::new();

        for entry in self.resources.iter() {
            if let Ok(row) = entry.value().try_read() {
                changes.push(Change::ResourceSaved(row.value.clone()));
            }
        }
        for entry in self.services.iter() {
            changes.push(Change::ServiceSaved(entry.value().clone()));
        }
        for entry in self.prices.iter() {
            changes.push(Change::PriceBandsSet {
                category: entry.key().clone(),
                bands: entry.value().clone(),
            });
        }
        for entry in self.inventory.iter() {
            if let Ok(row) = entry.value().try_read() {
                changes.push(Change::InventoryStocked(row.value.clone()));
            }
        }
        for entry in self.bookings.iter() {
            if let Ok(row) = entry.value().try_read() {
                changes.push(Change::BookingSaved(row.value.clone()));
            }
        }
        for entry in self.days.iter() {
            let Ok(row) = entry.value().try_read() else {
                continue;
            };
            let day = &row.value;
            for sched in day.entries() {
                changes.push(Change::ScheduleAdded(sched));
            }
            for interval in day.active_holds(now) {
                if let IntervalKind::Hold { token, .. } = interval.kind
                    && let Some(hold) = day.hold(token)
                {
                    changes.push(Change::HoldPlaced(hold));
                }
            }
        }

        Commit { changes }
    }
}

fn day_mut(guards: &mut BTreeMap<RowKey, RowGuard>, key: DayKey) -> Option<&mut DaySchedule> {
    match guards.get_mut(&RowKey::Day(key)) {
        Some(RowGuard::Day(g)) => Some(&mut g.value),
        _ => {
            tracing::warn!(?key, "change for unlocked partition skipped");
            None
        }
    }
}
