use chrono::{NaiveDate, NaiveTime};

use crate::model::*;

use super::conflict::{self, ConflictScope};
use super::{Engine, EngineError, IsolationLevel};

impl Engine {
    /// Whether `[start, end)` collides with a schedule entry or a live hold.
    pub async fn has_conflict(
        &self,
        resource_id: ResourceId,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<bool, EngineError> {
        let span = Span::checked(start, end).ok_or(EngineError::InvalidTimeRange)?;
        let mut tx = self.begin(IsolationLevel::ReadCommitted);
        let day = tx.read_day(DayKey::new(resource_id, date)).await?;
        Ok(conflict::has_conflict(&day, &span, tx.now(), ConflictScope::AllActive))
    }

    /// Availability plus the occupants that block it. Read-only.
    pub async fn check_availability(
        &self,
        resource_id: ResourceId,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Availability, EngineError> {
        let span = Span::checked(start, end).ok_or(EngineError::InvalidTimeRange)?;
        let mut tx = self.begin(IsolationLevel::ReadCommitted);
        tx.read_resource(resource_id).await?;
        let day = tx.read_day(DayKey::new(resource_id, date)).await?;
        let conflicting_slots = conflict::conflicts(&day, &span, tx.now(), ConflictScope::AllActive);
        Ok(Availability {
            is_available: conflicting_slots.is_empty(),
            conflicting_slots,
        })
    }

    pub async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, EngineError> {
        let mut tx = self.begin(IsolationLevel::ReadCommitted);
        match tx.read_booking(id).await {
            Ok(b) => Ok(Some(b)),
            Err(EngineError::BookingNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>, EngineError> {
        let mut tx = self.begin(IsolationLevel::ReadCommitted);
        match tx.read_resource(id).await {
            Ok(r) => Ok(Some(r)),
            Err(EngineError::ResourceNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Schedule entries for one resource and date, ordered by start time.
    pub async fn list_schedule(
        &self,
        resource_id: ResourceId,
        date: NaiveDate,
    ) -> Result<Vec<ScheduleEntry>, EngineError> {
        let mut tx = self.begin(IsolationLevel::ReadCommitted);
        let day = tx.read_day(DayKey::new(resource_id, date)).await?;
        Ok(day.entries().collect())
    }

    pub async fn get_inventory(
        &self,
        key: InventoryKey,
    ) -> Result<Option<InventoryRecord>, EngineError> {
        let Some(row) = self.tables.inventory_row(key) else {
            return Ok(None);
        };
        let guard = tokio::time::timeout(self.config.lock_timeout, row.read())
            .await
            .map_err(|_| EngineError::TransactionTimeout)?;
        Ok(Some(guard.value.clone()))
    }

    pub fn get_service(&self, id: ItemId) -> Option<ServiceItem> {
        self.tables.services.get(&id).map(|e| e.value().clone())
    }
}
