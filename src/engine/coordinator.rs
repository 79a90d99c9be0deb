use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, info};

use crate::limits::MAX_INTERVALS_PER_DAY;
use crate::model::*;
use crate::observability::BOOKINGS_TOTAL;

use super::conflict::{ConflictScope, has_conflict};
use super::retry::retry_once;
use super::{Engine, EngineError, IsolationLevel};

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub resource_id: ResourceId,
    pub customer_id: CustomerId,
    pub created_by: Option<EmployeeId>,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub channel: Channel,
    /// Hold previously acquired for exactly this slot, consumed on success.
    pub hold_token: Option<HoldToken>,
}

/// Where a create-booking attempt stands.
///
/// `Requested -> Validating -> Committed`, or `-> Rejected` from either of the
/// first two. A rejected attempt leaves no trace in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Requested,
    Validating,
    Committed,
    Rejected,
}

impl AttemptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptState::Requested => "requested",
            AttemptState::Validating => "validating",
            AttemptState::Committed => "committed",
            AttemptState::Rejected => "rejected",
        }
    }

    fn settled<T>(result: &Result<T, EngineError>) -> Self {
        match result {
            Ok(_) => AttemptState::Committed,
            Err(_) => AttemptState::Rejected,
        }
    }
}

impl Engine {
    /// Atomically check the slot, consume the caller's hold (if any), and
    /// insert the booking together with its schedule entry.
    pub async fn create_booking(&self, request: &BookingRequest) -> Result<BookingId, EngineError> {
        debug!(
            state = AttemptState::Requested.as_str(),
            resource_id = request.resource_id,
            date = %request.date,
            "booking attempt"
        );
        let result = self.run_create_booking(request).await;
        let state = AttemptState::settled(&result);
        match &result {
            Ok(id) => {
                metrics::counter!(BOOKINGS_TOTAL, "outcome" => "created").increment(1);
                info!(
                    booking_id = id,
                    resource_id = request.resource_id,
                    customer_id = request.customer_id,
                    date = %request.date,
                    start = %request.start,
                    end = %request.end,
                    channel = request.channel.as_str(),
                    state = state.as_str(),
                    "booking created"
                );
            }
            Err(e) => {
                metrics::counter!(BOOKINGS_TOTAL, "outcome" => e.kind()).increment(1);
                debug!(
                    resource_id = request.resource_id,
                    error = %e,
                    state = state.as_str(),
                    "booking rejected"
                );
            }
        }
        result
    }

    async fn run_create_booking(&self, request: &BookingRequest) -> Result<BookingId, EngineError> {
        let span =
            Span::checked(request.start, request.end).ok_or(EngineError::InvalidTimeRange)?;
        retry_once("create_booking", move || self.try_create_booking(request, span))
            .await
            .map_err(|e| match e {
                EngineError::SerializationConflict => EngineError::SlotConflict {
                    resource_id: request.resource_id,
                    date: request.date,
                },
                other => other,
            })
    }

    async fn try_create_booking(
        &self,
        request: &BookingRequest,
        span: Span,
    ) -> Result<BookingId, EngineError> {
        debug!(state = AttemptState::Validating.as_str(), resource_id = request.resource_id, "booking attempt");
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
        let scope = request
            .hold_token
            .map_or(ConflictScope::AllActive, ConflictScope::ExcludingHold);
        if has_conflict(&day, &span, now, scope) {
            return Err(EngineError::SlotConflict {
                resource_id: request.resource_id,
                date: request.date,
            });
        }
        if let Some(token) = request.hold_token {
            let matches = day
                .hold(token)
                .is_some_and(|h| h.is_active(now) && h.span == span);
            if !matches {
                return Err(EngineError::HoldExpired(token));
            }
        }

        let base_amount = self.price_for(&resource.category, request.date, span)?;
        let booking = Booking {
            id: self.tables.next_booking_id(),
            resource_id: request.resource_id,
            customer_id: request.customer_id,
            created_by: request.created_by,
            date: request.date,
            span,
            channel: request.channel,
            status: if self.config.confirm_on_create {
                BookingStatus::Confirmed
            } else {
                BookingStatus::PendingConfirmation
            },
            payment_state: PaymentState::Unpaid,
            base_amount,
            total_amount: base_amount,
            line_items: Vec::new(),
            created_at: now,
        };
        let id = booking.id;

        tx.write(Change::BookingSaved(booking));
        tx.write(Change::ScheduleAdded(ScheduleEntry {
            resource_id: request.resource_id,
            date: request.date,
            span,
            booking_id: id,
        }));
        if let Some(token) = request.hold_token {
            tx.write(Change::HoldRemoved { token, key });
        }
        tx.commit().await?;
        Ok(id)
    }

    /// `pending_confirmation -> confirmed`. Confirming twice is a no-op.
    pub async fn confirm_booking(&self, id: BookingId) -> Result<(), EngineError> {
        retry_once("confirm_booking", move || async move {
            let mut tx = self.begin(IsolationLevel::ReadCommitted);
            let mut booking = tx.lock_booking(id).await?;
            match booking.status {
                BookingStatus::Confirmed => return Ok(()),
                BookingStatus::Cancelled => {
                    return Err(EngineError::InvalidBookingState {
                        booking_id: id,
                        status: booking.status,
                    });
                }
                BookingStatus::PendingConfirmation => {}
            }
            booking.status = BookingStatus::Confirmed;
            tx.write(Change::BookingSaved(booking));
            tx.commit().await
        })
        .await?;
        info!(booking_id = id, "booking confirmed");
        Ok(())
    }
}
