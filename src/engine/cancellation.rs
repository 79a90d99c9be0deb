use tracing::info;

use crate::model::*;
use crate::observability::CANCELLATIONS_TOTAL;

use super::retry::retry_once;
use super::{Engine, EngineError, IsolationLevel};

/// Outcome of the cancellation policy for a booking in its current state.
#[derive(Debug, PartialEq, Eq)]
pub enum CancelDecision {
    /// Nothing to do; cancelling again succeeds without side effects.
    AlreadyCancelled,
    Allowed,
    /// Paid bookings go through a refund first.
    Rejected(PaymentState),
}

pub fn cancellation_decision(booking: &Booking) -> CancelDecision {
    match (booking.status, booking.payment_state) {
        (BookingStatus::Cancelled, _) => CancelDecision::AlreadyCancelled,
        (_, PaymentState::Paid) => CancelDecision::Rejected(PaymentState::Paid),
        (_, PaymentState::Unpaid | PaymentState::RefundPending) => CancelDecision::Allowed,
    }
}

impl Engine {
    /// Cancel a booking: free its slot and restock every line item, all in one
    /// transaction.
    pub async fn cancel_booking(&self, id: BookingId) -> Result<(), EngineError> {
        let result = retry_once("cancel_booking", move || self.try_cancel_booking(id)).await;
        let outcome = match &result {
            Ok(true) => "cancelled",
            Ok(false) => "already_cancelled",
            Err(e) => e.kind(),
        };
        metrics::counter!(CANCELLATIONS_TOTAL, "outcome" => outcome).increment(1);
        if let Ok(true) = result {
            info!(booking_id = id, "booking cancelled");
        }
        result.map(|_| ())
    }

    async fn try_cancel_booking(&self, id: BookingId) -> Result<bool, EngineError> {
        let mut tx = self.begin(IsolationLevel::ReadCommitted);
        let mut booking = tx.lock_booking(id).await?;
        match cancellation_decision(&booking) {
            CancelDecision::AlreadyCancelled => return Ok(false),
            CancelDecision::Rejected(payment_state) => {
                return Err(EngineError::PaymentStateConflict {
                    booking_id: id,
                    payment_state,
                });
            }
            CancelDecision::Allowed => {}
        }

        for line in &booking.line_items {
            tx.release_inventory(line.inventory_key(), line.quantity).await?;
        }

        booking.status = BookingStatus::Cancelled;
        let key = booking.key();
        tx.write(Change::BookingSaved(booking));
        tx.write(Change::ScheduleRemoved { booking_id: id, key });
        tx.commit().await?;
        Ok(true)
    }

    /// `confirmed/unpaid -> paid`.
    pub async fn record_payment(&self, id: BookingId) -> Result<(), EngineError> {
        retry_once("record_payment", move || async move {
            let mut tx = self.begin(IsolationLevel::ReadCommitted);
            let mut booking = tx.lock_booking(id).await?;
            if booking.status != BookingStatus::Confirmed {
                return Err(EngineError::InvalidBookingState {
                    booking_id: id,
                    status: booking.status,
                });
            }
            if booking.payment_state != PaymentState::Unpaid {
                return Err(EngineError::PaymentStateConflict {
                    booking_id: id,
                    payment_state: booking.payment_state,
                });
            }
            booking.payment_state = PaymentState::Paid;
            tx.write(Change::BookingSaved(booking));
            tx.commit().await
        })
        .await?;
        info!(booking_id = id, "payment recorded");
        Ok(())
    }

    /// `paid -> refund_pending`, which makes the booking cancellable again.
    pub async fn request_refund(&self, id: BookingId) -> Result<(), EngineError> {
        retry_once("request_refund", move || async move {
            let mut tx = self.begin(IsolationLevel::ReadCommitted);
            let mut booking = tx.lock_booking(id).await?;
            if booking.payment_state != PaymentState::Paid {
                return Err(EngineError::PaymentStateConflict {
                    booking_id: id,
                    payment_state: booking.payment_state,
                });
            }
            booking.payment_state = PaymentState::RefundPending;
            tx.write(Change::BookingSaved(booking));
            tx.commit().await
        })
        .await?;
        info!(booking_id = id, "refund requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn booking(status: BookingStatus, payment_state: PaymentState) -> Booking {
        Booking {
            id: 1,
            resource_id: 1,
            customer_id: 1,
            created_by: None,
            date: NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
            span: Span::new(
                NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            ),
            channel: Channel::Counter,
            status,
            payment_state,
            base_amount: 0,
            total_amount: 0,
            line_items: Vec::new(),
            created_at: 0,
        }
    }

    #[test]
    fn policy_table() {
        use BookingStatus::*;
        use PaymentState::*;
        assert_eq!(cancellation_decision(&booking(Confirmed, Unpaid)), CancelDecision::Allowed);
        assert_eq!(
            cancellation_decision(&booking(PendingConfirmation, Unpaid)),
            CancelDecision::Allowed
        );
        assert_eq!(cancellation_decision(&booking(Confirmed, RefundPending)), CancelDecision::Allowed);
        assert_eq!(cancellation_decision(&booking(Confirmed, Paid)), CancelDecision::Rejected(Paid));
        assert_eq!(cancellation_decision(&booking(Cancelled, Unpaid)), CancelDecision::AlreadyCancelled);
        assert_eq!(cancellation_decision(&booking(Cancelled, Paid)), CancelDecision::AlreadyCancelled);
    }
}
