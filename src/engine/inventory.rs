use tracing::{debug, info};

use crate::limits::{MAX_LINE_ITEM_QUANTITY, MAX_LINE_ITEMS_PER_BOOKING};
use crate::model::*;
use crate::observability::INVENTORY_REJECTIONS_TOTAL;

use super::retry::retry_once;
use super::{Engine, EngineError, IsolationLevel, Transaction};

impl Transaction<'_> {
    /// Net adjustment already buffered in this transaction for `key`.
    fn pending_inventory_delta(&self, key: InventoryKey) -> i64 {
        self.pending_writes()
            .iter()
            .map(|c| match c {
                Change::InventoryAdjusted { key: k, delta, .. } if *k == key => *delta,
                _ => 0,
            })
            .sum()
    }

    /// Take `quantity` units out of stock. The row stays locked until this
    /// transaction ends, so concurrent reservations queue behind it.
    pub async fn reserve_inventory(
        &mut self,
        key: InventoryKey,
        quantity: u32,
    ) -> Result<(), EngineError> {
        let record = self.lock_inventory(key).await?;
        let available = record.quantity + self.pending_inventory_delta(key);
        if available < i64::from(quantity) {
            metrics::counter!(INVENTORY_REJECTIONS_TOTAL).increment(1);
            return Err(EngineError::InsufficientInventory {
                item_id: key.item_id,
                facility_id: key.facility_id,
                requested: quantity,
                available,
            });
        }
        let at = self.now();
        self.write(Change::InventoryAdjusted {
            key,
            delta: -i64::from(quantity),
            at,
        });
        Ok(())
    }

    /// Put `quantity` units back.
    pub async fn release_inventory(
        &mut self,
        key: InventoryKey,
        quantity: u32,
    ) -> Result<(), EngineError> {
        self.lock_inventory(key).await?;
        let at = self.now();
        self.write(Change::InventoryAdjusted {
            key,
            delta: i64::from(quantity),
            at,
        });
        Ok(())
    }
}

const AMOUNT_OVERFLOW: EngineError = EngineError::LimitExceeded("booking amount out of range");

fn ensure_editable(booking: &Booking) -> Result<(), EngineError> {
    if booking.status == BookingStatus::Cancelled {
        return Err(EngineError::InvalidBookingState {
            booking_id: booking.id,
            status: booking.status,
        });
    }
    if booking.payment_state != PaymentState::Unpaid {
        return Err(EngineError::PaymentStateConflict {
            booking_id: booking.id,
            payment_state: booking.payment_state,
        });
    }
    Ok(())
}

impl Engine {
    /// Reserve stock and attach a line item to a booking in one transaction.
    pub async fn add_line_item(
        &self,
        booking_id: BookingId,
        item_id: ItemId,
        quantity: u32,
    ) -> Result<LineItemId, EngineError> {
        if quantity == 0 {
            return Err(EngineError::LimitExceeded("quantity must be positive"));
        }
        if quantity > MAX_LINE_ITEM_QUANTITY {
            return Err(EngineError::LimitExceeded("quantity too large"));
        }
        let result = retry_once("add_line_item", move || {
            self.try_add_line_item(booking_id, item_id, quantity)
        })
        .await;
        match &result {
            Ok(line_item_id) => info!(booking_id, item_id, quantity, line_item_id, "line item added"),
            Err(e) => debug!(booking_id, item_id, quantity, error = %e, "line item rejected"),
        }
        result
    }

    async fn try_add_line_item(
        &self,
        booking_id: BookingId,
        item_id: ItemId,
        quantity: u32,
    ) -> Result<LineItemId, EngineError> {
        let service = self
            .tables
            .services
            .get(&item_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::ServiceNotFound(item_id))?;

        let mut tx = self.begin(IsolationLevel::ReadCommitted);
        let mut booking = tx.lock_booking(booking_id).await?;
        ensure_editable(&booking)?;
        if booking.line_items.len() >= MAX_LINE_ITEMS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many line items on booking"));
        }
        let resource = tx.read_resource(booking.resource_id).await?;
        let subtotal = service
            .unit_price
            .checked_mul(i64::from(quantity))
            .ok_or(AMOUNT_OVERFLOW)?;

        let line = LineItem {
            id: self.tables.next_line_item_id(),
            booking_id,
            item_id,
            facility_id: resource.facility_id,
            quantity,
            unit_price: service.unit_price,
            subtotal,
        };
        let line_id = line.id;
        let key = line.inventory_key();
        booking.line_items.push(line);
        booking.recompute_total().ok_or(AMOUNT_OVERFLOW)?;

        tx.reserve_inventory(key, quantity).await?;
        tx.write(Change::BookingSaved(booking));
        tx.commit().await?;
        Ok(line_id)
    }

    /// Detach a line item and restock what it reserved.
    pub async fn remove_line_item(&self, line_item_id: LineItemId) -> Result<(), EngineError> {
        retry_once("remove_line_item", move || self.try_remove_line_item(line_item_id)).await?;
        info!(line_item_id, "line item removed");
        Ok(())
    }

    async fn try_remove_line_item(&self, line_item_id: LineItemId) -> Result<(), EngineError> {
        let booking_id = self
            .tables
            .line_item_index
            .get(&line_item_id)
            .map(|e| *e.value())
            .ok_or(EngineError::LineItemNotFound(line_item_id))?;

        let mut tx = self.begin(IsolationLevel::ReadCommitted);
        let mut booking = tx.lock_booking(booking_id).await?;
        let pos = booking
            .line_items
            .iter()
            .position(|l| l.id == line_item_id)
            .ok_or(EngineError::LineItemNotFound(line_item_id))?;
        ensure_editable(&booking)?;

        let line = booking.line_items.remove(pos);
        tx.release_inventory(line.inventory_key(), line.quantity).await?;
        booking.recompute_total().ok_or(AMOUNT_OVERFLOW)?;
        tx.write(Change::BookingSaved(booking));
        tx.commit().await
    }
}
