use chrono::NaiveDate;
use tracing::info;

use crate::limits::{MAX_NAME_LEN, MAX_PRICE_BANDS};
use crate::model::*;

use super::retry::retry_once;
use super::{Engine, EngineError, IsolationLevel};

/// Field price for `span` on `date`: minutes of overlap with each band of the
/// matching day type, at that band's hourly rate. Unpriced time is free.
/// `None` when the amount does not fit in an `i64`.
pub fn quote(bands: &[PriceBand], date: NaiveDate, span: Span) -> Option<i64> {
    let day_type = DayType::of(date);
    bands
        .iter()
        .filter(|b| b.day_type == day_type)
        .try_fold(0i64, |acc, b| match b.span.intersect(&span) {
            Some(overlap) => acc.checked_add(overlap.minutes().checked_mul(b.hourly_rate)? / 60),
            None => Some(acc),
        })
}

impl Engine {
    pub(crate) fn price_for(
        &self,
        category: &str,
        date: NaiveDate,
        span: Span,
    ) -> Result<i64, EngineError> {
        match self.tables.prices.get(category) {
            Some(bands) => quote(bands.value(), date, span)
                .ok_or(EngineError::LimitExceeded("booking amount out of range")),
            None => Ok(0),
        }
    }

    /// Insert or replace a resource. A status change is subject to the same
    /// rules as `set_resource_status`.
    pub async fn upsert_resource(&self, resource: Resource) -> Result<(), EngineError> {
        if resource.category.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("category too long"));
        }
        let exists = self.tables.resources.contains_key(&resource.id);
        let resource = &resource;
        retry_once("upsert_resource", move || async move {
            let mut tx = self.begin(IsolationLevel::ReadCommitted);
            if exists {
                let current = tx.lock_resource(resource.id).await?;
                if current.status != resource.status && self.has_active_hold(&mut tx, resource.id).await? {
                    return Err(EngineError::HoldActive(resource.id));
                }
            }
            tx.write(Change::ResourceSaved(resource.clone()));
            tx.commit().await
        })
        .await?;
        info!(resource_id = resource.id, status = resource.status.as_str(), "resource saved");
        Ok(())
    }

    /// Change a resource's status. Refused while any live hold exists on it.
    pub async fn set_resource_status(
        &self,
        id: ResourceId,
        status: ResourceStatus,
    ) -> Result<(), EngineError> {
        retry_once("set_resource_status", move || async move {
            let mut tx = self.begin(IsolationLevel::ReadCommitted);
            let mut resource = tx.lock_resource(id).await?;
            if resource.status == status {
                return Ok(());
            }
            if self.has_active_hold(&mut tx, id).await? {
                return Err(EngineError::HoldActive(id));
            }
            resource.status = status;
            tx.write(Change::ResourceSaved(resource));
            tx.commit().await
        })
        .await?;
        info!(resource_id = id, status = status.as_str(), "resource status changed");
        Ok(())
    }

    /// Caller must already hold the resource row lock: hold placement
    /// validates the resource version at commit, so no new hold can slip in.
    async fn has_active_hold(
        &self,
        tx: &mut super::Transaction<'_>,
        id: ResourceId,
    ) -> Result<bool, EngineError> {
        let now = tx.now();
        for key in self.tables.hold_partitions(id) {
            if tx.read_day(key).await?.active_holds(now).next().is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Set the absolute stock level for an item at a facility.
    pub async fn stock_inventory(
        &self,
        key: InventoryKey,
        quantity: i64,
    ) -> Result<(), EngineError> {
        if quantity < 0 {
            return Err(EngineError::LimitExceeded("stock cannot be negative"));
        }
        retry_once("stock_inventory", move || async move {
            let mut tx = self.begin(IsolationLevel::ReadCommitted);
            if self.tables.inventory.contains_key(&key) {
                tx.lock_inventory(key).await?;
            }
            let updated_at = tx.now();
            tx.write(Change::InventoryStocked(InventoryRecord {
                item_id: key.item_id,
                facility_id: key.facility_id,
                quantity,
                updated_at,
            }));
            tx.commit().await
        })
        .await?;
        info!(item_id = key.item_id, facility_id = key.facility_id, quantity, "inventory stocked");
        Ok(())
    }

    pub async fn upsert_service(&self, item: ServiceItem) -> Result<(), EngineError> {
        if item.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("service name too long"));
        }
        if item.unit_price < 0 {
            return Err(EngineError::LimitExceeded("unit price cannot be negative"));
        }
        let mut tx = self.begin(IsolationLevel::ReadCommitted);
        tx.write(Change::ServiceSaved(item));
        tx.commit().await
    }

    /// Replace every price band of a resource category.
    pub async fn set_price_bands(
        &self,
        category: &str,
        bands: Vec<PriceBand>,
    ) -> Result<(), EngineError> {
        if category.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("category too long"));
        }
        if bands.len() > MAX_PRICE_BANDS {
            return Err(EngineError::LimitExceeded("too many price bands"));
        }
        for (i, a) in bands.iter().enumerate() {
            if a.hourly_rate < 0 {
                return Err(EngineError::LimitExceeded("hourly rate cannot be negative"));
            }
            if bands[i + 1..]
                .iter()
                .any(|b| b.day_type == a.day_type && b.span.overlaps(&a.span))
            {
                return Err(EngineError::InvalidTimeRange);
            }
        }
        let mut tx = self.begin(IsolationLevel::ReadCommitted);
        tx.write(Change::PriceBandsSet {
            category: category.to_string(),
            bands,
        });
        tx.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn bands() -> Vec<PriceBand> {
        vec![
            PriceBand {
                day_type: DayType::Weekday,
                span: Span::new(t(8, 0), t(17, 0)),
                hourly_rate: 6_000,
            },
            PriceBand {
                day_type: DayType::Weekday,
                span: Span::new(t(17, 0), t(23, 0)),
                hourly_rate: 9_000,
            },
            PriceBand {
                day_type: DayType::Weekend,
                span: Span::new(t(8, 0), t(23, 0)),
                hourly_rate: 12_000,
            },
        ]
    }

    #[test]
    fn quote_within_one_band() {
        let monday = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        assert_eq!(quote(&bands(), monday, Span::new(t(14, 0), t(16, 0))), Some(12_000));
    }

    #[test]
    fn quote_spanning_bands_is_pro_rated() {
        let monday = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        // 30 min at 6000/h + 90 min at 9000/h
        assert_eq!(
            quote(&bands(), monday, Span::new(t(16, 30), t(18, 30))),
            Some(3_000 + 13_500)
        );
    }

    #[test]
    fn quote_uses_weekend_rates() {
        let saturday = NaiveDate::from_ymd_opt(2025, 12, 6).unwrap();
        assert_eq!(quote(&bands(), saturday, Span::new(t(10, 0), t(11, 0))), Some(12_000));
    }

    #[test]
    fn unpriced_time_is_free() {
        let monday = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        assert_eq!(quote(&bands(), monday, Span::new(t(6, 0), t(8, 0))), Some(0));
        assert_eq!(quote(&[], monday, Span::new(t(10, 0), t(11, 0))), Some(0));
    }

    #[test]
    fn oversized_rate_does_not_wrap() {
        let monday = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        let band = PriceBand {
            day_type: DayType::Weekday,
            span: Span::new(t(8, 0), t(17, 0)),
            hourly_rate: i64::MAX / 2,
        };
        assert_eq!(quote(&[band], monday, Span::new(t(9, 0), t(10, 0))), None);
    }
}
