use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    UpsertResource {
        id: ResourceId,
        category: String,
        facility_id: FacilityId,
        status: ResourceStatus,
    },
    UpsertService {
        id: ItemId,
        name: String,
        unit_price: i64,
    },
    SetPriceBands {
        category: String,
        bands: Vec<PriceBand>,
    },
    StockInventory {
        item_id: ItemId,
        facility_id: FacilityId,
        quantity: i64,
    },
    InsertHold {
        resource_id: ResourceId,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        owner: String,
        ttl_seconds: Option<u64>,
    },
    DeleteHold {
        token: HoldToken,
    },
    InsertBooking {
        resource_id: ResourceId,
        customer_id: CustomerId,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        channel: Channel,
        hold_token: Option<HoldToken>,
        created_by: Option<EmployeeId>,
    },
    CancelBooking {
        id: BookingId,
    },
    ConfirmBooking {
        id: BookingId,
    },
    RecordPayment {
        id: BookingId,
    },
    RequestRefund {
        id: BookingId,
    },
    InsertLineItem {
        booking_id: BookingId,
        item_id: ItemId,
        quantity: u32,
    },
    DeleteLineItem {
        id: LineItemId,
    },
    SelectAvailability {
        resource_id: ResourceId,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    },
    SelectHold {
        token: HoldToken,
    },
    SelectBooking {
        id: BookingId,
    },
    SelectSchedule {
        resource_id: ResourceId,
        date: NaiveDate,
    },
    SelectInventory {
        item_id: ItemId,
        facility_id: FacilityId,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn require(table: &'static str, values: &[Expr], n: usize) -> Result<(), SqlError> {
    if values.len() < n {
        return Err(SqlError::WrongArity(table, n, values.len()));
    }
    Ok(())
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;
    let values = &rows[0];

    match table.as_str() {
        "resources" => {
            require("resources", values, 3)?;
            let status = match values.get(3) {
                Some(expr) => {
                    let s = parse_string(expr)?;
                    ResourceStatus::parse(&s)
                        .ok_or_else(|| SqlError::Parse(format!("bad resource status: {s}")))?
                }
                None => ResourceStatus::Available,
            };
            Ok(Command::UpsertResource {
                id: parse_i64(&values[0])?,
                category: parse_string(&values[1])?,
                facility_id: parse_i64(&values[2])?,
                status,
            })
        }
        "services" => {
            require("services", values, 3)?;
            Ok(Command::UpsertService {
                id: parse_i64(&values[0])?,
                name: parse_string(&values[1])?,
                unit_price: parse_i64(&values[2])?,
            })
        }
        "prices" => {
            let mut category: Option<String> = None;
            let mut bands = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                require("prices", row, 5)?;
                let row_category = parse_string(&row[0])?;
                if *category.get_or_insert_with(|| row_category.clone()) != row_category {
                    return Err(SqlError::Parse(format!(
                        "row {i}: all price bands must share one category"
                    )));
                }
                let day_type = parse_string(&row[1])?;
                let day_type = DayType::parse(&day_type)
                    .ok_or_else(|| SqlError::Parse(format!("row {i}: bad day type: {day_type}")))?;
                let span = parse_span(&row[2], &row[3])?;
                bands.push(PriceBand {
                    day_type,
                    span,
                    hourly_rate: parse_i64(&row[4])?,
                });
            }
            Ok(Command::SetPriceBands {
                category: category.unwrap_or_default(),
                bands,
            })
        }
        "inventory" => {
            require("inventory", values, 3)?;
            Ok(Command::StockInventory {
                item_id: parse_i64(&values[0])?,
                facility_id: parse_i64(&values[1])?,
                quantity: parse_i64(&values[2])?,
            })
        }
        "holds" => {
            require("holds", values, 4)?;
            let owner = match values.get(4) {
                Some(expr) => parse_string_or_null(expr)?.unwrap_or_default(),
                None => String::new(),
            };
            let ttl_seconds = match values.get(5) {
                Some(expr) => parse_i64_or_null(expr)?
                    .map(|v| u64::try_from(v).map_err(|_| SqlError::Parse(format!("bad ttl: {v}"))))
                    .transpose()?,
                None => None,
            };
            Ok(Command::InsertHold {
                resource_id: parse_i64(&values[0])?,
                date: parse_date(&values[1])?,
                start: parse_time(&values[2])?,
                end: parse_time(&values[3])?,
                owner,
                ttl_seconds,
            })
        }
        "bookings" => {
            require("bookings", values, 5)?;
            let channel = match values.get(5).map(parse_string_or_null).transpose()?.flatten() {
                Some(s) => Channel::parse(&s)
                    .ok_or_else(|| SqlError::Parse(format!("bad channel: {s}")))?,
                None => Channel::Online,
            };
            Ok(Command::InsertBooking {
                resource_id: parse_i64(&values[0])?,
                customer_id: parse_i64(&values[1])?,
                date: parse_date(&values[2])?,
                start: parse_time(&values[3])?,
                end: parse_time(&values[4])?,
                channel,
                hold_token: values.get(6).map(parse_ulid_or_null).transpose()?.flatten(),
                created_by: values.get(7).map(parse_i64_or_null).transpose()?.flatten(),
            })
        }
        "line_items" => {
            require("line_items", values, 3)?;
            Ok(Command::InsertLineItem {
                booking_id: parse_i64(&values[0])?,
                item_id: parse_i64(&values[1])?,
                quantity: parse_u32(&values[2])?,
            })
        }
        "confirmations" => {
            require("confirmations", values, 1)?;
            Ok(Command::ConfirmBooking { id: parse_i64(&values[0])? })
        }
        "payments" => {
            require("payments", values, 1)?;
            Ok(Command::RecordPayment { id: parse_i64(&values[0])? })
        }
        "refunds" => {
            require("refunds", values, 1)?;
            Ok(Command::RequestRefund { id: parse_i64(&values[0])? })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_filters(delete.selection.as_ref());

    match table.as_str() {
        "holds" => Ok(Command::DeleteHold {
            token: parse_ulid(require_eq(&filters, "token")?)?,
        }),
        "bookings" => Ok(Command::CancelBooking {
            id: parse_i64(require_eq(&filters, "id")?)?,
        }),
        "line_items" => Ok(Command::DeleteLineItem {
            id: parse_i64(require_eq(&filters, "id")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = collect_filters(select.selection.as_ref());

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            resource_id: parse_i64(require_eq(&filters, "resource_id")?)?,
            date: parse_date(require_eq(&filters, "day")?)?,
            start: parse_time(
                find_filter(&filters, "start", ast::BinaryOperator::GtEq)
                    .ok_or(SqlError::MissingFilter("start"))?,
            )?,
            end: parse_time(
                find_filter(&filters, "end", ast::BinaryOperator::LtEq)
                    .ok_or(SqlError::MissingFilter("end"))?,
            )?,
        }),
        "holds" => Ok(Command::SelectHold {
            token: parse_ulid(require_eq(&filters, "token")?)?,
        }),
        "bookings" => Ok(Command::SelectBooking {
            id: parse_i64(require_eq(&filters, "id")?)?,
        }),
        "schedule" => Ok(Command::SelectSchedule {
            resource_id: parse_i64(require_eq(&filters, "resource_id")?)?,
            date: parse_date(require_eq(&filters, "day")?)?,
        }),
        "inventory" => Ok(Command::SelectInventory {
            item_id: parse_i64(require_eq(&filters, "item_id")?)?,
            facility_id: parse_i64(require_eq(&filters, "facility_id")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clauses ─────────────────────────────────────────────

/// One `column <op> value` comparison from an AND-chain.
struct Filter<'a> {
    column: String,
    op: ast::BinaryOperator,
    value: &'a Expr,
}

fn collect_filters(selection: Option<&Expr>) -> Vec<Filter<'_>> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        walk_filters(expr, &mut out);
    }
    out
}

fn walk_filters<'a>(expr: &'a Expr, out: &mut Vec<Filter<'a>>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            walk_filters(left, out);
            walk_filters(right, out);
        }
        Expr::BinaryOp { left, op, right } => {
            if let Some(column) = expr_column_name(left) {
                out.push(Filter {
                    column,
                    op: op.clone(),
                    value: right,
                });
            }
        }
        Expr::Nested(inner) => walk_filters(inner, out),
        _ => {}
    }
}

fn find_filter<'a>(filters: &[Filter<'a>], column: &str, op: ast::BinaryOperator) -> Option<&'a Expr> {
    filters
        .iter()
        .find(|f| f.column == column && f.op == op)
        .map(|f| f.value)
}

fn require_eq<'a>(filters: &[Filter<'a>], column: &'static str) -> Result<&'a Expr, SqlError> {
    find_filter(filters, column, ast::BinaryOperator::Eq).ok_or(SqlError::MissingFilter(column))
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(&values.rows)
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad token: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

/// `HH:MM` or `HH:MM:SS`.
fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string(expr)?;
    NaiveTime::parse_from_str(&s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
        .map_err(|e| SqlError::Parse(format!("bad time {s}: {e}")))
}

fn parse_span(start: &Expr, end: &Expr) -> Result<Span, SqlError> {
    let (start, end) = (parse_time(start)?, parse_time(end)?);
    Span::checked(start, end).ok_or_else(|| SqlError::Parse(format!("empty range {start}-{end}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_i64(expr).map(Some),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn parse_upsert_resource() {
        let sql = "INSERT INTO resources (id, category, facility_id, status) VALUES (1, 'football', 2, 'maintenance')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::UpsertResource {
                id: 1,
                category: "football".into(),
                facility_id: 2,
                status: ResourceStatus::Maintenance,
            }
        );
    }

    #[test]
    fn resource_status_defaults_to_available() {
        let sql = "INSERT INTO resources (id, category, facility_id) VALUES (1, 'tennis', 2)";
        match parse_sql(sql).unwrap() {
            Command::UpsertResource { status, .. } => assert_eq!(status, ResourceStatus::Available),
            cmd => panic!("expected UpsertResource, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_price_bands_multi_row() {
        let sql = r#"INSERT INTO prices (category, day_type, start, "end", hourly_rate) VALUES ('football', 'weekday', '08:00', '17:00', 6000), ('football', 'weekend', '08:00', '23:00', 12000)"#;
        match parse_sql(sql).unwrap() {
            Command::SetPriceBands { category, bands } => {
                assert_eq!(category, "football");
                assert_eq!(bands.len(), 2);
                assert_eq!(bands[1].day_type, DayType::Weekend);
                assert_eq!(bands[1].span, Span::new(t(8, 0), t(23, 0)));
                assert_eq!(bands[0].hourly_rate, 6000);
            }
            cmd => panic!("expected SetPriceBands, got {cmd:?}"),
        }
    }

    #[test]
    fn price_bands_must_share_category() {
        let sql = r#"INSERT INTO prices (category, day_type, start, "end", hourly_rate) VALUES ('football', 'weekday', '08:00', '17:00', 6000), ('tennis', 'weekday', '08:00', '17:00', 3000)"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_hold() {
        let sql = r#"INSERT INTO holds (resource_id, day, start, "end", owner, ttl_seconds) VALUES (1, '2025-12-01', '14:00', '16:00', 'web-42', 300)"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertHold {
                resource_id: 1,
                date: d("2025-12-01"),
                start: t(14, 0),
                end: t(16, 0),
                owner: "web-42".into(),
                ttl_seconds: Some(300),
            }
        );
    }

    #[test]
    fn parse_insert_hold_minimal() {
        let sql = r#"INSERT INTO holds (resource_id, day, start, "end") VALUES (1, '2025-12-01', '14:00:00', '16:30')"#;
        match parse_sql(sql).unwrap() {
            Command::InsertHold { end, owner, ttl_seconds, .. } => {
                assert_eq!(end, t(16, 30));
                assert!(owner.is_empty());
                assert_eq!(ttl_seconds, None);
            }
            cmd => panic!("expected InsertHold, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_with_hold() {
        let sql = format!(
            r#"INSERT INTO bookings (resource_id, customer_id, day, start, "end", channel, hold_token) VALUES (1, 7, '2025-12-01', '14:00', '16:00', 'counter', '{TOKEN}')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking { customer_id, channel, hold_token, created_by, .. } => {
                assert_eq!(customer_id, 7);
                assert_eq!(channel, Channel::Counter);
                assert_eq!(hold_token.map(|t| t.to_string()).as_deref(), Some(TOKEN));
                assert_eq!(created_by, None);
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_null_hold() {
        let sql = r#"INSERT INTO bookings (resource_id, customer_id, day, start, "end", channel, hold_token, created_by) VALUES (1, 7, '2025-12-01', '14:00', '16:00', 'phone', NULL, 99)"#;
        match parse_sql(sql).unwrap() {
            Command::InsertBooking { hold_token, created_by, channel, .. } => {
                assert_eq!(hold_token, None);
                assert_eq!(created_by, Some(99));
                assert_eq!(channel, Channel::Phone);
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn bad_date_is_rejected() {
        let sql = r#"INSERT INTO bookings (resource_id, customer_id, day, start, "end") VALUES (1, 7, '2025-13-01', '14:00', '16:00')"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_transitions() {
        assert_eq!(
            parse_sql("INSERT INTO confirmations (booking_id) VALUES (5)").unwrap(),
            Command::ConfirmBooking { id: 5 }
        );
        assert_eq!(
            parse_sql("INSERT INTO payments (booking_id) VALUES (5)").unwrap(),
            Command::RecordPayment { id: 5 }
        );
        assert_eq!(
            parse_sql("INSERT INTO refunds (booking_id) VALUES (5)").unwrap(),
            Command::RequestRefund { id: 5 }
        );
        assert_eq!(
            parse_sql("DELETE FROM bookings WHERE id = 5").unwrap(),
            Command::CancelBooking { id: 5 }
        );
    }

    #[test]
    fn parse_line_items() {
        assert_eq!(
            parse_sql("INSERT INTO line_items (booking_id, item_id, quantity) VALUES (5, 3, 2)").unwrap(),
            Command::InsertLineItem { booking_id: 5, item_id: 3, quantity: 2 }
        );
        assert_eq!(
            parse_sql("DELETE FROM line_items WHERE id = 11").unwrap(),
            Command::DeleteLineItem { id: 11 }
        );
        assert!(parse_sql("INSERT INTO line_items (booking_id, item_id, quantity) VALUES (5, 3, -2)").is_err());
    }

    #[test]
    fn parse_hold_by_token() {
        let sql = format!("DELETE FROM holds WHERE token = '{TOKEN}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteHold { .. }));
        let sql = format!("SELECT * FROM holds WHERE token = '{TOKEN}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectHold { .. }));
    }

    #[test]
    fn parse_select_availability() {
        let sql = r#"SELECT * FROM availability WHERE resource_id = 1 AND day = '2025-12-01' AND start >= '14:00' AND "end" <= '16:00'"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability {
                resource_id: 1,
                date: d("2025-12-01"),
                start: t(14, 0),
                end: t(16, 0),
            }
        );
    }

    #[test]
    fn availability_requires_range() {
        let sql = "SELECT * FROM availability WHERE resource_id = 1 AND day = '2025-12-01'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("start"))));
    }

    #[test]
    fn parse_other_selects() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE id = 9").unwrap(),
            Command::SelectBooking { id: 9 }
        );
        assert_eq!(
            parse_sql("SELECT * FROM schedule WHERE resource_id = 1 AND day = '2025-12-01'").unwrap(),
            Command::SelectSchedule { resource_id: 1, date: d("2025-12-01") }
        );
        assert_eq!(
            parse_sql("SELECT * FROM inventory WHERE item_id = 3 AND facility_id = 2").unwrap(),
            Command::SelectInventory { item_id: 3, facility_id: 2 }
        );
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("INSERT INTO foobar (id) VALUES (1)"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_wrong_arity() {
        assert!(matches!(
            parse_sql("INSERT INTO services (id) VALUES (1)"),
            Err(SqlError::WrongArity("services", 3, 1))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
