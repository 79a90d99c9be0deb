use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Used for instants (creation, expiry, last update),
/// never for slot times.
pub type Ms = i64;

pub type ResourceId = i64;
pub type FacilityId = i64;
pub type CustomerId = i64;
pub type EmployeeId = i64;
pub type BookingId = i64;
pub type LineItemId = i64;
pub type ItemId = i64;

/// Opaque, unique hold token handed to the client.
pub type HoldToken = Ulid;

/// Half-open time-of-day range `[start, end)` within one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Span {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Validating constructor for caller-supplied ranges.
    pub fn checked(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersect(&self, other: &Span) -> Option<Span> {
        Span::checked(self.start.max(other.start), self.end.min(other.end))
    }
}

/// Calendar partition of the schedule: one resource on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DayKey {
    pub resource_id: ResourceId,
    pub date: NaiveDate,
}

impl DayKey {
    pub fn new(resource_id: ResourceId, date: NaiveDate) -> Self {
        Self { resource_id, date }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InventoryKey {
    pub item_id: ItemId,
    pub facility_id: FacilityId,
}

impl InventoryKey {
    pub fn new(item_id: ItemId, facility_id: FacilityId) -> Self {
        Self { item_id, facility_id }
    }
}

// ── Resources ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Available,
    InUse,
    Maintenance,
    Unavailable,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Available => "available",
            ResourceStatus::InUse => "in_use",
            ResourceStatus::Maintenance => "maintenance",
            ResourceStatus::Unavailable => "unavailable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "available" => Some(ResourceStatus::Available),
            "in_use" => Some(ResourceStatus::InUse),
            "maintenance" => Some(ResourceStatus::Maintenance),
            "unavailable" => Some(ResourceStatus::Unavailable),
            _ => None,
        }
    }
}

/// A bookable field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub category: String,
    pub facility_id: FacilityId,
    pub status: ResourceStatus,
}

// ── Schedule partition ───────────────────────────────────────────

/// What occupies a range of a day partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalKind {
    /// Durable schedule entry owned by a booking.
    Scheduled { booking_id: BookingId },
    /// Soft lock; ignored once `expires_at <= now`.
    Hold {
        token: HoldToken,
        owner: String,
        created_at: Ms,
        expires_at: Ms,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub span: Span,
    pub kind: IntervalKind,
}

impl Interval {
    pub fn is_active(&self, now: Ms) -> bool {
        match &self.kind {
            IntervalKind::Scheduled { .. } => true,
            IntervalKind::Hold { expires_at, .. } => *expires_at > now,
        }
    }
}

/// Everything committed for one resource on one date: schedule entries and
/// holds, sorted by `span.start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub key: DayKey,
    pub intervals: Vec<Interval>,
}

impl DaySchedule {
    pub fn new(key: DayKey) -> Self {
        Self {
            key,
            intervals: Vec::new(),
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .partition_point(|i| i.span.start <= interval.span.start);
        self.intervals.insert(pos, interval);
    }

    pub fn remove_scheduled(&mut self, booking_id: BookingId) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| {
            matches!(i.kind, IntervalKind::Scheduled { booking_id: b } if b == booking_id)
        })?;
        Some(self.intervals.remove(pos))
    }

    pub fn remove_hold(&mut self, token: HoldToken) -> Option<Interval> {
        let pos = self
            .intervals
            .iter()
            .position(|i| matches!(i.kind, IntervalKind::Hold { token: t, .. } if t == token))?;
        Some(self.intervals.remove(pos))
    }

    /// Return only intervals whose span overlaps the query window.
    /// Everything at index >= right_bound starts at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    pub fn entries(&self) -> impl Iterator<Item = ScheduleEntry> + '_ {
        self.intervals.iter().filter_map(|i| match i.kind {
            IntervalKind::Scheduled { booking_id } => Some(ScheduleEntry {
                resource_id: self.key.resource_id,
                date: self.key.date,
                span: i.span,
                booking_id,
            }),
            IntervalKind::Hold { .. } => None,
        })
    }

    pub fn entry_count(&self) -> usize {
        self.intervals
            .iter()
            .filter(|i| matches!(i.kind, IntervalKind::Scheduled { .. }))
            .count()
    }

    /// Look up a hold by token regardless of expiry.
    pub fn hold(&self, token: HoldToken) -> Option<HoldRecord> {
        self.intervals.iter().find_map(|i| match &i.kind {
            IntervalKind::Hold {
                token: t,
                owner,
                created_at,
                expires_at,
            } if *t == token => Some(HoldRecord {
                token,
                resource_id: self.key.resource_id,
                date: self.key.date,
                span: i.span,
                owner: owner.clone(),
                created_at: *created_at,
                expires_at: *expires_at,
            }),
            _ => None,
        })
    }

    pub fn active_holds(&self, now: Ms) -> impl Iterator<Item = &Interval> {
        self.intervals
            .iter()
            .filter(move |i| matches!(i.kind, IntervalKind::Hold { .. }) && i.is_active(now))
    }

    pub fn expired_holds(&self, now: Ms) -> Vec<HoldToken> {
        self.intervals
            .iter()
            .filter_map(|i| match i.kind {
                IntervalKind::Hold {
                    token, expires_at, ..
                } if expires_at <= now => Some(token),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub resource_id: ResourceId,
    pub date: NaiveDate,
    pub span: Span,
    pub booking_id: BookingId,
}

impl ScheduleEntry {
    pub fn key(&self) -> DayKey {
        DayKey::new(self.resource_id, self.date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldRecord {
    pub token: HoldToken,
    pub resource_id: ResourceId,
    pub date: NaiveDate,
    pub span: Span,
    pub owner: String,
    pub created_at: Ms,
    pub expires_at: Ms,
}

impl HoldRecord {
    pub fn key(&self) -> DayKey {
        DayKey::new(self.resource_id, self.date)
    }

    pub fn is_active(&self, now: Ms) -> bool {
        self.expires_at > now
    }

    fn interval(&self) -> Interval {
        Interval {
            span: self.span,
            kind: IntervalKind::Hold {
                token: self.token,
                owner: self.owner.clone(),
                created_at: self.created_at,
                expires_at: self.expires_at,
            },
        }
    }
}

impl DaySchedule {
    pub fn insert_hold(&mut self, hold: &HoldRecord) {
        self.insert_interval(hold.interval());
    }

    pub fn insert_entry(&mut self, entry: &ScheduleEntry) {
        self.insert_interval(Interval {
            span: entry.span,
            kind: IntervalKind::Scheduled {
                booking_id: entry.booking_id,
            },
        });
    }

    pub fn renew_hold(&mut self, token: HoldToken, new_expiry: Ms) -> bool {
        for interval in &mut self.intervals {
            if let IntervalKind::Hold {
                token: t,
                expires_at,
                ..
            } = &mut interval.kind
                && *t == token
            {
                *expires_at = new_expiry;
                return true;
            }
        }
        false
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    Online,
    Counter,
    Phone,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Online => "online",
            Channel::Counter => "counter",
            Channel::Phone => "phone",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Some(Channel::Online),
            "counter" => Some(Channel::Counter),
            "phone" => Some(Channel::Phone),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    PendingConfirmation,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingConfirmation => "pending_confirmation",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentState {
    Unpaid,
    Paid,
    RefundPending,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Unpaid => "unpaid",
            PaymentState::Paid => "paid",
            PaymentState::RefundPending => "refund_pending",
        }
    }
}

/// Service or trainer addition to a booking. Amounts are in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub booking_id: BookingId,
    pub item_id: ItemId,
    /// Facility whose stock was drawn down; restocks go back here.
    pub facility_id: FacilityId,
    pub quantity: u32,
    pub unit_price: i64,
    pub subtotal: i64,
}

impl LineItem {
    pub fn inventory_key(&self) -> InventoryKey {
        InventoryKey::new(self.item_id, self.facility_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub resource_id: ResourceId,
    pub customer_id: CustomerId,
    /// Staff member who created the booking, if not self-service.
    pub created_by: Option<EmployeeId>,
    pub date: NaiveDate,
    pub span: Span,
    pub channel: Channel,
    pub status: BookingStatus,
    pub payment_state: PaymentState,
    /// Field price before line items.
    pub base_amount: i64,
    pub total_amount: i64,
    pub line_items: Vec<LineItem>,
    pub created_at: Ms,
}

impl Booking {
    pub fn key(&self) -> DayKey {
        DayKey::new(self.resource_id, self.date)
    }

    /// Recompute `total_amount` from the base amount and line subtotals.
    /// Returns `None` and leaves the total untouched on overflow.
    pub fn recompute_total(&mut self) -> Option<i64> {
        let total = self
            .line_items
            .iter()
            .try_fold(self.base_amount, |acc, l| acc.checked_add(l.subtotal))?;
        self.total_amount = total;
        Some(total)
    }
}

// ── Inventory & catalog ──────────────────────────────────────────

/// Finite per-facility service stock. `quantity` never goes negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub item_id: ItemId,
    pub facility_id: FacilityId,
    pub quantity: i64,
    pub updated_at: Ms,
}

impl InventoryRecord {
    pub fn key(&self) -> InventoryKey {
        InventoryKey::new(self.item_id, self.facility_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceItem {
    pub id: ItemId,
    pub name: String,
    pub unit_price: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayType {
    Weekday,
    Weekend,
}

impl DayType {
    pub fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            Weekday::Sat | Weekday::Sun => DayType::Weekend,
            _ => DayType::Weekday,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "weekday" => Some(DayType::Weekday),
            "weekend" => Some(DayType::Weekend),
            _ => None,
        }
    }
}

/// Hourly rate for one time band of one day type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBand {
    pub day_type: DayType,
    pub span: Span,
    pub hourly_rate: i64,
}

// ── WAL record ───────────────────────────────────────────────────

/// A single committed mutation. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    ResourceSaved(Resource),
    ServiceSaved(ServiceItem),
    PriceBandsSet {
        category: String,
        bands: Vec<PriceBand>,
    },
    /// Absolute stock level.
    InventoryStocked(InventoryRecord),
    InventoryAdjusted {
        key: InventoryKey,
        delta: i64,
        at: Ms,
    },
    HoldPlaced(HoldRecord),
    HoldRenewed {
        token: HoldToken,
        key: DayKey,
        expires_at: Ms,
    },
    HoldRemoved {
        token: HoldToken,
        key: DayKey,
    },
    BookingSaved(Booking),
    ScheduleAdded(ScheduleEntry),
    ScheduleRemoved {
        booking_id: BookingId,
        key: DayKey,
    },
}

/// Everything one transaction wrote. This is the WAL record format: a commit
/// is replayed entirely or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub changes: Vec<Change>,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    Scheduled { booking_id: BookingId },
    Hold { token: HoldToken, expires_at: Ms },
}

impl ConflictKind {
    pub fn label(&self) -> &'static str {
        match self {
            ConflictKind::Scheduled { .. } => "booking",
            ConflictKind::Hold { .. } => "hold",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub span: Span,
    pub kind: ConflictKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub is_available: bool,
    pub conflicting_slots: Vec<Conflict>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldReceipt {
    pub token: HoldToken,
    pub expires_at: Ms,
}
