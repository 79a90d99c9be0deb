use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::HOLDS_TOTAL;

use super::conflict::{ConflictScope, has_conflict};
use super::retry::retry_once;
use super::{Engine, EngineError, IsolationLevel};

/// Request for a short-lived soft lock on a slot.
#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub resource_id: ResourceId,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// Free-form client label (session, kiosk, staff member).
    pub owner: String,
    /// Falls back to the configured default.
    pub ttl: Option<Duration>,
}

impl Engine {
    /// Place a hold on a free slot, returning its token and expiry.
    pub async fn acquire_hold(&self, request: &HoldRequest) -> Result<HoldReceipt, EngineError> {
        let span =
            Span::checked(request.start, request.end).ok_or(EngineError::InvalidTimeRange)?;
        if request.owner.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("hold owner too long"));
        }
        let ttl = self.hold_ttl(request.ttl)?;

        let result = retry_once("acquire_hold", move || self.try_acquire_hold(request, span, ttl))
            .await
            .map_err(|e| match e {
                EngineError::SerializationConflict => EngineError::SlotConflict {
                    resource_id: request.resource_id,
                    date: request.date,
                },
                other => other,
            });

        match &result {
            Ok(receipt) => {
                metrics::counter!(HOLDS_TOTAL, "outcome" => "acquired").increment(1);
                info!(
                    token = %receipt.token,
                    resource_id = request.resource_id,
                    date = %request.date,
                    start = %span.start,
                    end = %span.end,
                    "hold acquired"
                );
            }
            Err(e) => {
                metrics::counter!(HOLDS_TOTAL, "outcome" => e.kind()).increment(1);
                debug!(resource_id = request.resource_id, error = %e, "hold rejected");
            }
        }
        result
    }

    fn hold_ttl(&self, requested: Option<Duration>) -> Result<Ms, EngineError> {
        let ttl = requested.unwrap_or(self.config.default_hold_ttl);
        if ttl.is_zero() {
            return Err(EngineError::LimitExceeded("hold ttl must be positive"));
        }
        if ttl > self.config.max_hold_ttl {
            return Err(EngineError::LimitExceeded("hold ttl too long"));
        }
        Ok(ttl.as_millis() as Ms)
    }

    async fn try_acquire_hold(
        &self,
        request: &HoldRequest,
        span: Span,
        ttl: Ms,
    ) -> Result<HoldReceipt, EngineError> {
        let mut tx = self.begin(IsolationLevel::Serializable);
        let resource = tx.read_resource(request.resource_id).await?;
        if resource.status != ResourceStatus::Available {
            return Err(EngineError::ResourceUnavailable(resource.id));
        }

        let key = DayKey::new(request.resource_id, request.date);
        let day = tx.read_day(key).await?;
        if day.intervals.len() >= MAX_INTERVALS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many intervals on day"));
        }
        let now = tx.now();
        if has_conflict(&day, &span, now, ConflictScope::AllActive) {
            return Err(EngineError::SlotConflict {
                resource_id: request.resource_id,
                date: request.date,
            });
        }

        let hold = HoldRecord {
            token: Ulid::new(),
            resource_id: request.resource_id,
            date: request.date,
            span,
            owner: request.owner.clone(),
            created_at: now,
            expires_at: now + ttl,
        };
        let receipt = HoldReceipt {
            token: hold.token,
            expires_at: hold.expires_at,
        };
        tx.write(Change::HoldPlaced(hold));
        tx.commit().await?;
        Ok(receipt)
    }

    /// Delete a hold. Unknown or already-removed tokens are a no-op.
    pub async fn release_hold(&self, token: HoldToken) -> Result<(), EngineError> {
        let Some(key) = self.tables.hold_index.get(&token).map(|e| *e.value()) else {
            return Ok(());
        };
        retry_once("release_hold", move || async move {
            let mut tx = self.begin(IsolationLevel::ReadCommitted);
            tx.write(Change::HoldRemoved { token, key });
            tx.commit().await
        })
        .await?;
        metrics::counter!(HOLDS_TOTAL, "outcome" => "released").increment(1);
        info!(%token, resource_id = key.resource_id, "hold released");
        Ok(())
    }

    /// The hold behind `token`, if it exists and has not expired.
    pub async fn hold_status(&self, token: HoldToken) -> Result<Option<HoldRecord>, EngineError> {
        let Some(key) = self.tables.hold_index.get(&token).map(|e| *e.value()) else {
            return Ok(None);
        };
        let mut tx = self.begin(IsolationLevel::ReadCommitted);
        let day = tx.read_day(key).await?;
        let now = tx.now();
        Ok(day.hold(token).filter(|h| h.is_active(now)))
    }

    pub async fn is_hold_active(&self, token: HoldToken) -> Result<bool, EngineError> {
        Ok(self.hold_status(token).await?.is_some())
    }

    /// Push a live hold's expiry out to `now + ttl`.
    pub async fn renew_hold(
        &self,
        token: HoldToken,
        ttl: Option<Duration>,
    ) -> Result<HoldReceipt, EngineError> {
        let ttl = self.hold_ttl(ttl)?;
        let receipt = retry_once("renew_hold", move || self.try_renew_hold(token, ttl)).await?;
        debug!(%token, expires_at = receipt.expires_at, "hold renewed");
        Ok(receipt)
    }

    async fn try_renew_hold(&self, token: HoldToken, ttl: Ms) -> Result<HoldReceipt, EngineError> {
        let key = self
            .tables
            .hold_index
            .get(&token)
            .map(|e| *e.value())
            .ok_or(EngineError::HoldNotFound(token))?;
        let mut tx = self.begin(IsolationLevel::Serializable);
        let day = tx.read_day(key).await?;
        let now = tx.now();
        if !day.hold(token).is_some_and(|h| h.is_active(now)) {
            return Err(EngineError::HoldNotFound(token));
        }
        let expires_at = now + ttl;
        tx.write(Change::HoldRenewed {
            token,
            key,
            expires_at,
        });
        tx.commit().await?;
        Ok(HoldReceipt { token, expires_at })
    }

    /// Delete holds that have already expired, one partition per transaction.
    /// Partitions that change underneath the sweep are skipped until next time.
    pub async fn purge_expired_holds(&self) -> Result<usize, EngineError> {
        let partitions: BTreeSet<DayKey> =
            self.tables.hold_index.iter().map(|e| *e.value()).collect();
        let mut purged = 0;
        for key in partitions {
            let mut tx = self.begin(IsolationLevel::Serializable);
            let day = tx.read_day(key).await?;
            let expired = day.expired_holds(tx.now());
            if expired.is_empty() {
                continue;
            }
            let count = expired.len();
            for token in expired {
                tx.write(Change::HoldRemoved { token, key });
            }
            match tx.commit().await {
                Ok(()) => purged += count,
                Err(e) if e.is_retriable() => {
                    debug!(resource_id = key.resource_id, date = %key.date, error = %e, "sweep skipped partition");
                }
                Err(e) => return Err(e),
            }
        }
        if purged > 0 {
            metrics::counter!(HOLDS_TOTAL, "outcome" => "expired").increment(purged as u64);
        }
        Ok(purged)
    }
}
