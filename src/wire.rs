use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SlotGuardAuthSource;
use crate::engine::{BookingRequest, Engine, EngineError, HoldRequest};
use crate::limits::MAX_SQL_LENGTH;
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, SqlError};

pub struct SlotGuardHandler {
    engine: Arc<Engine>,
    query_parser: Arc<SlotGuardQueryParser>,
}

impl SlotGuardHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(SlotGuardQueryParser),
        }
    }

    async fn run(&self, query: &str) -> PgWireResult<Vec<Response>> {
        if query.len() > MAX_SQL_LENGTH {
            return Err(sql_err(SqlError::Unsupported("query too long".into())));
        }
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::UpsertResource {
                id,
                category,
                facility_id,
                status,
            } => {
                engine
                    .upsert_resource(Resource {
                        id,
                        category,
                        facility_id,
                        status,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpsertService {
                id,
                name,
                unit_price,
            } => {
                engine
                    .upsert_service(ServiceItem {
                        id,
                        name,
                        unit_price,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SetPriceBands { category, bands } => {
                let count = bands.len();
                engine
                    .set_price_bands(&category, bands)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::StockInventory {
                item_id,
                facility_id,
                quantity,
            } => {
                engine
                    .stock_inventory(InventoryKey::new(item_id, facility_id), quantity)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertHold {
                resource_id,
                date,
                start,
                end,
                owner,
                ttl_seconds,
            } => {
                let receipt = engine
                    .acquire_hold(&HoldRequest {
                        resource_id,
                        date,
                        start,
                        end,
                        owner,
                        ttl: ttl_seconds.map(Duration::from_secs),
                    })
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(hold_receipt_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&receipt.token.to_string())?;
                encoder.encode_field(&receipt.expires_at)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::DeleteHold { token } => {
                engine.release_hold(token).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking {
                resource_id,
                customer_id,
                date,
                start,
                end,
                channel,
                hold_token,
                created_by,
            } => {
                let id = engine
                    .create_booking(&BookingRequest {
                        resource_id,
                        customer_id,
                        created_by,
                        date,
                        start,
                        end,
                        channel,
                        hold_token,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![id_response("booking_id", id)?])
            }
            Command::CancelBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::ConfirmBooking { id } => {
                engine.confirm_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RecordPayment { id } => {
                engine.record_payment(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RequestRefund { id } => {
                engine.request_refund(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertLineItem {
                booking_id,
                item_id,
                quantity,
            } => {
                let id = engine
                    .add_line_item(booking_id, item_id, quantity)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![id_response("line_item_id", id)?])
            }
            Command::DeleteLineItem { id } => {
                engine.remove_line_item(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectAvailability {
                resource_id,
                date,
                start,
                end,
            } => {
                let availability = engine
                    .check_availability(resource_id, date, start, end)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = if availability.is_available {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&true)?;
                    encoder.encode_field(&None::<String>)?;
                    encoder.encode_field(&None::<String>)?;
                    encoder.encode_field(&None::<String>)?;
                    encoder.encode_field(&None::<String>)?;
                    vec![Ok(encoder.take_row())]
                } else {
                    availability
                        .conflicting_slots
                        .iter()
                        .map(|c| {
                            let reference = match &c.kind {
                                ConflictKind::Scheduled { booking_id } => booking_id.to_string(),
                                ConflictKind::Hold { token, .. } => token.to_string(),
                            };
                            let mut encoder = DataRowEncoder::new(schema.clone());
                            encoder.encode_field(&false)?;
                            encoder.encode_field(&Some(c.kind.label().to_string()))?;
                            encoder.encode_field(&Some(fmt_time(c.span.start)))?;
                            encoder.encode_field(&Some(fmt_time(c.span.end)))?;
                            encoder.encode_field(&Some(reference))?;
                            Ok(encoder.take_row())
                        })
                        .collect()
                };
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectHold { token } => {
                let hold = engine.hold_status(token).await.map_err(engine_err)?;
                let schema = Arc::new(hold_schema());
                let rows: Vec<PgWireResult<_>> = hold
                    .into_iter()
                    .map(|h| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&h.token.to_string())?;
                        encoder.encode_field(&h.resource_id)?;
                        encoder.encode_field(&h.date.to_string())?;
                        encoder.encode_field(&fmt_time(h.span.start))?;
                        encoder.encode_field(&fmt_time(h.span.end))?;
                        encoder.encode_field(&h.owner)?;
                        encoder.encode_field(&h.expires_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectBooking { id } => {
                let booking = engine.get_booking(id).await.map_err(engine_err)?;
                let schema = Arc::new(booking_schema());
                let rows: Vec<PgWireResult<_>> = booking
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id)?;
                        encoder.encode_field(&b.resource_id)?;
                        encoder.encode_field(&b.customer_id)?;
                        encoder.encode_field(&b.date.to_string())?;
                        encoder.encode_field(&fmt_time(b.span.start))?;
                        encoder.encode_field(&fmt_time(b.span.end))?;
                        encoder.encode_field(&b.channel.as_str().to_string())?;
                        encoder.encode_field(&b.status.as_str().to_string())?;
                        encoder.encode_field(&b.payment_state.as_str().to_string())?;
                        encoder.encode_field(&b.base_amount)?;
                        encoder.encode_field(&b.total_amount)?;
                        encoder.encode_field(&(b.line_items.len() as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectSchedule { resource_id, date } => {
                let entries = engine
                    .list_schedule(resource_id, date)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(schedule_schema());
                let rows: Vec<PgWireResult<_>> = entries
                    .into_iter()
                    .map(|e| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&e.booking_id)?;
                        encoder.encode_field(&fmt_time(e.span.start))?;
                        encoder.encode_field(&fmt_time(e.span.end))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectInventory {
                item_id,
                facility_id,
            } => {
                let record = engine
                    .get_inventory(InventoryKey::new(item_id, facility_id))
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(inventory_schema());
                let rows: Vec<PgWireResult<_>> = record
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.item_id)?;
                        encoder.encode_field(&r.facility_id)?;
                        encoder.encode_field(&r.quantity)?;
                        encoder.encode_field(&r.updated_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

fn fmt_time(t: chrono::NaiveTime) -> String {
    t.format("%H:%M:%S").to_string()
}

fn id_response(column: &str, id: i64) -> PgWireResult<Response> {
    let schema = Arc::new(vec![int8(column)]);
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&id)?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

// ── Result schemas ───────────────────────────────────────────────

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("available".into(), None, None, Type::BOOL, FieldFormat::Text),
        varchar("conflict_kind"),
        varchar("start"),
        varchar("end"),
        varchar("reference"),
    ]
}

fn hold_receipt_schema() -> Vec<FieldInfo> {
    vec![varchar("token"), int8("expires_at")]
}

fn hold_schema() -> Vec<FieldInfo> {
    vec![
        varchar("token"),
        int8("resource_id"),
        varchar("day"),
        varchar("start"),
        varchar("end"),
        varchar("owner"),
        int8("expires_at"),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        int8("id"),
        int8("resource_id"),
        int8("customer_id"),
        varchar("day"),
        varchar("start"),
        varchar("end"),
        varchar("channel"),
        varchar("status"),
        varchar("payment_state"),
        int8("base_amount"),
        int8("total_amount"),
        int8("line_items"),
    ]
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![int8("booking_id"), varchar("start"), varchar("end")]
}

fn inventory_schema() -> Vec<FieldInfo> {
    vec![
        int8("item_id"),
        int8("facility_id"),
        int8("quantity"),
        int8("updated_at"),
    ]
}

/// Result columns for a statement, decided from its verb and target table
/// so it works on unbound statements with `$N` placeholders.
fn result_schema(stmt: &str) -> Vec<FieldInfo> {
    let lower = stmt.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .filter(|w| !w.is_empty())
        .collect();
    let after = |kw: &str| {
        words
            .windows(2)
            .find(|w| w[0] == kw)
            .map(|w| w[1].trim_matches('"'))
    };
    match words.first().copied() {
        Some("select") => match after("from") {
            Some("availability") => availability_schema(),
            Some("holds") => hold_schema(),
            Some("bookings") => booking_schema(),
            Some("schedule") => schedule_schema(),
            Some("inventory") => inventory_schema(),
            _ => vec![],
        },
        Some("insert") => match after("into") {
            Some("holds") => hold_receipt_schema(),
            Some("bookings") => vec![int8("booking_id")],
            Some("line_items") => vec![int8("line_item_id")],
            _ => vec![],
        },
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotGuardHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotGuardQueryParser;

#[async_trait]
impl QueryParser for SlotGuardQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotGuardHandler {
    type Statement = String;
    type QueryParser = SlotGuardQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let mut responses = self.run(&sql).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Replaced from the highest index down so `$1` never clobbers `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotGuardFactory {
    handler: Arc<SlotGuardHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SlotGuardAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl SlotGuardFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = SlotGuardAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotGuardHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotGuardFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(SlotGuardFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// SQLSTATE per engine error kind.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidTimeRange => "22023",
        EngineError::SlotConflict { .. } => "23P01",
        EngineError::HoldExpired(_) => "SG001",
        EngineError::HoldNotFound(_) => "SG002",
        EngineError::InsufficientInventory { .. } => "SG003",
        EngineError::PaymentStateConflict { .. } => "SG004",
        EngineError::ResourceUnavailable(_) => "SG005",
        EngineError::HoldActive(_) => "55006",
        EngineError::InvalidBookingState { .. } => "55000",
        EngineError::ResourceNotFound(_)
        | EngineError::BookingNotFound(_)
        | EngineError::LineItemNotFound(_)
        | EngineError::ServiceNotFound(_)
        | EngineError::InventoryNotFound(_) => "P0002",
        EngineError::SerializationConflict => "40001",
        EngineError::TransactionTimeout => "55P03",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM bookings WHERE id = $1"), 1);
        assert_eq!(count_params("INSERT INTO line_items (booking_id, item_id, quantity) VALUES ($1, $3, $2)"), 3);
        assert_eq!(count_params("SELECT * FROM holds"), 0);
    }

    #[test]
    fn schema_follows_statement_target() {
        assert_eq!(result_schema("SELECT * FROM availability WHERE resource_id = $1").len(), 5);
        assert_eq!(result_schema("insert into holds (resource_id) values ($1)").len(), 2);
        assert_eq!(result_schema("INSERT INTO bookings(resource_id) VALUES ($1)").len(), 1);
        assert!(result_schema("DELETE FROM bookings WHERE id = $1").is_empty());
        assert!(result_schema("INSERT INTO payments (booking_id) VALUES ($1)").is_empty());
    }

    #[test]
    fn core_error_kinds_have_distinct_sqlstates() {
        let errors = [
            EngineError::InvalidTimeRange,
            EngineError::SlotConflict {
                resource_id: 1,
                date: chrono::NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
            },
            EngineError::HoldExpired(ulid::Ulid::nil()),
            EngineError::InsufficientInventory {
                item_id: 1,
                facility_id: 1,
                requested: 1,
                available: 0,
            },
            EngineError::PaymentStateConflict {
                booking_id: 1,
                payment_state: PaymentState::Paid,
            },
            EngineError::ResourceUnavailable(1),
            EngineError::SerializationConflict,
            EngineError::TransactionTimeout,
        ];
        let codes: std::collections::HashSet<_> = errors.iter().map(sqlstate).collect();
        assert_eq!(codes.len(), errors.len());
    }
}
