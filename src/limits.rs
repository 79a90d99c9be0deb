// Hard limits that bound memory per row and per request.

/// Maximum intervals (schedule entries + holds) in one day partition.
pub const MAX_INTERVALS_PER_DAY: usize = 1_000;

/// Maximum line items on a single booking.
pub const MAX_LINE_ITEMS_PER_BOOKING: usize = 100;

/// Maximum units requested by a single line item.
pub const MAX_LINE_ITEM_QUANTITY: u32 = 10_000;

/// Maximum length of a hold owner or category string.
pub const MAX_NAME_LEN: usize = 256;

/// Maximum price bands per category.
pub const MAX_PRICE_BANDS: usize = 48;

/// Maximum concurrent connections (default, overridable via env).
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Maximum SQL query length in bytes.
pub const MAX_SQL_LENGTH: usize = 65_536;
