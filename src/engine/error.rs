use chrono::NaiveDate;
use thiserror::Error;

use crate::model::*;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid time range: start must be before end")]
    InvalidTimeRange,
    #[error("slot on resource {resource_id} at {date} overlaps an existing booking or active hold")]
    SlotConflict {
        resource_id: ResourceId,
        date: NaiveDate,
    },
    #[error("hold {0} is missing, expired, or does not match the requested slot")]
    HoldExpired(HoldToken),
    #[error("hold {0} not found or no longer active")]
    HoldNotFound(HoldToken),
    #[error("resource {0} has an active hold")]
    HoldActive(ResourceId),
    #[error("insufficient inventory for item {item_id} at facility {facility_id}: requested {requested}, available {available}")]
    InsufficientInventory {
        item_id: ItemId,
        facility_id: FacilityId,
        requested: u32,
        available: i64,
    },
    #[error("booking {booking_id} is {} and cannot change in this way", .payment_state.as_str())]
    PaymentStateConflict {
        booking_id: BookingId,
        payment_state: PaymentState,
    },
    #[error("booking {booking_id} is {}", .status.as_str())]
    InvalidBookingState {
        booking_id: BookingId,
        status: BookingStatus,
    },
    #[error("resource {0} is not available for booking")]
    ResourceUnavailable(ResourceId),
    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),
    #[error("booking not found: {0}")]
    BookingNotFound(BookingId),
    #[error("line item not found: {0}")]
    LineItemNotFound(LineItemId),
    #[error("service item not found: {0}")]
    ServiceNotFound(ItemId),
    #[error("no inventory for item {} at facility {}", .0.item_id, .0.facility_id)]
    InventoryNotFound(InventoryKey),
    #[error("serialization conflict: a row read by this transaction changed before commit")]
    SerializationConflict,
    #[error("transaction timed out waiting for a row lock")]
    TransactionTimeout,
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidTimeRange => "invalid_time_range",
            EngineError::SlotConflict { .. } => "slot_conflict",
            EngineError::HoldExpired(_) => "hold_expired",
            EngineError::HoldNotFound(_) => "hold_not_found",
            EngineError::HoldActive(_) => "hold_active",
            EngineError::InsufficientInventory { .. } => "insufficient_inventory",
            EngineError::PaymentStateConflict { .. } => "payment_state_conflict",
            EngineError::InvalidBookingState { .. } => "invalid_booking_state",
            EngineError::ResourceUnavailable(_) => "resource_unavailable",
            EngineError::ResourceNotFound(_) => "resource_not_found",
            EngineError::BookingNotFound(_) => "booking_not_found",
            EngineError::LineItemNotFound(_) => "line_item_not_found",
            EngineError::ServiceNotFound(_) => "service_not_found",
            EngineError::InventoryNotFound(_) => "inventory_not_found",
            EngineError::SerializationConflict => "serialization_conflict",
            EngineError::TransactionTimeout => "transaction_timeout",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }

    /// Worth one more attempt in a fresh transaction.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            EngineError::SerializationConflict | EngineError::TransactionTimeout
        )
    }
}
