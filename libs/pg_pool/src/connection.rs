use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use postgres_protocol::escape::escape_literal;
use tokio::{sync::watch, task::JoinHandle};
use tokio_postgres::{
    types::{ToSql, Type},
    Client, NoTls, Row, SimpleQueryMessage, Statement,
};
use uuid::Uuid;

use crate::{
    error::{ConnectError, QueryError},
    events::{ConnectionEvent, EventBus},
    serializer::QuerySerializer,
};

/// Result of one `Connection::query` call.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub command: String,
    pub row_count: u64,
    pub fields: Vec<(String, u32)>,
    pub rows: Vec<Vec<Option<String>>>,
}

enum State {
    Created,
    Connecting,
    Connected {
        client: Arc<Client>,
        server_version: String,
        driver_task: JoinHandle<()>,
    },
    Destroyed,
}

/// A single-use-at-a-time handle to one PostgreSQL backend. All driver
/// calls are mediated through `serializer` so at most one query ever runs
/// against the wrapped client at a time.
pub struct Connection {
    id: Uuid,
    options: String,
    state: Mutex<State>,
    destroyed: AtomicBool,
    destroy_tx: watch::Sender<bool>,
    events: EventBus<ConnectionEvent>,
    serializer: QuerySerializer,
}

impl Connection {
    pub fn new(options: impl Into<String>) -> Arc<Self> {
        let (destroy_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: Uuid::new_v4(),
            options: options.into(),
            state: Mutex::new(State::Created),
            destroyed: AtomicBool::new(false),
            destroy_tx,
            events: EventBus::new(32),
            serializer: QuerySerializer::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub fn server_version(&self) -> Option<String> {
        match &*self.state.lock() {
            State::Connected { server_version, .. } => Some(server_version.clone()),
            _ => None,
        }
    }

    /// May only be called once per connection.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        {
            let mut state = self.state.lock();
            match &*state {
                State::Destroyed => return Err(ConnectError::AlreadyDestroyed),
                State::Connected { .. } | State::Connecting => {
                    return Err(ConnectError::AlreadyConnected);
                }
                State::Created => *state = State::Connecting,
            }
        }

        let mut destroy_rx = self.destroy_tx.subscribe();
        tokio::select! {
            biased;
            _ = destroy_rx.changed() => {
                self.finalize_destroy(Some("aborted".to_string()));
                Err(ConnectError::Aborted)
            }
            result = tokio_postgres::connect(&self.options, NoTls) => {
                match result {
                    Ok((client, connection)) => {
                        if *destroy_rx.borrow() {
                            drop(client);
                            drop(connection);
                            self.finalize_destroy(Some("aborted".to_string()));
                            return Err(ConnectError::Aborted);
                        }
                        let server_version = client
                            .parameter("server_version")
                            .map(parse_server_version)
                            .unwrap_or_else(|| "0.0".to_string());
                        let driver_task = tokio::spawn(async move {
                            if let Err(e) = connection.await {
                                tracing::error!("postgres driver connection ended: {}", e);
                            }
                        });
                        let client = Arc::new(client);
                        *self.state.lock() = State::Connected {
                            client,
                            server_version,
                            driver_task,
                        };
                        self.events.emit(ConnectionEvent::Connected);
                        Ok(())
                    }
                    Err(e) => {
                        self.finalize_destroy(Some(e.to_string()));
                        Err(ConnectError::ConnectFailed(e.to_string()))
                    }
                }
            }
        }
    }

    /// Enqueues a query on the serializer. Multiple results in `text` are
    /// drained before reporting a failure.
    pub async fn query(
        &self,
        text: &str,
        params: &[Option<String>],
    ) -> Result<QueryOutcome, QueryError> {
        let client = self.connected_client()?;
        let text = text.to_string();
        let params = params.to_vec();
        let outcome = self
            .serializer
            .enqueue(async move { run_query(client, &text, &params).await })
            .await;
        if let Err(QueryError::Unrecoverable(ref msg)) = outcome {
            self.finalize_destroy(Some(msg.clone()));
        }
        outcome
    }

    /// Fire-and-forget cancellation of the in-flight query via a
    /// dedicated cancel-request connection. Never awaits completion.
    pub fn cancel(&self) -> Result<(), QueryError> {
        let client = self.connected_client()?;
        let cancel_token = client.cancel_token();
        tokio::spawn(async move {
            if let Err(e) = cancel_token.cancel_query(NoTls).await {
                tracing::warn!("cancel_query failed: {}", e);
            }
        });
        Ok(())
    }

    /// Idempotent: closes the driver handle, marks destroyed, and emits
    /// `destroyed` exactly once over the connection's lifetime.
    pub fn destroy(&self) {
        let _ = self.destroy_tx.send(true);
        self.finalize_destroy(None);
    }

    fn connected_client(&self) -> Result<Arc<Client>, QueryError> {
        match &*self.state.lock() {
            State::Connected { client, .. } => Ok(Arc::clone(client)),
            _ => Err(QueryError::NotConnected),
        }
    }

    /// Single arbiter for the destroyed transition: whichever caller wins
    /// the `destroyed` flag swap performs the state change and fires the
    /// terminal event; everyone else is a no-op.
    fn finalize_destroy(&self, emit_error: Option<String>) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(msg) = emit_error {
            self.events.emit(ConnectionEvent::Error(msg));
        }
        {
            let mut state = self.state.lock();
            if let State::Connected { driver_task, .. } = &*state {
                driver_task.abort();
            }
            *state = State::Destroyed;
        }
        self.events.emit(ConnectionEvent::Destroyed);
    }
}

fn parse_server_version(raw: &str) -> String {
    let mut parts = raw.split(|c: char| !c.is_ascii_digit()).filter(|s| !s.is_empty());
    let major = parts.next().unwrap_or("0");
    let minor = parts.next().unwrap_or("0");
    format!("{major}.{minor}")
}

fn leading_keyword(text: &str) -> String {
    text.trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_uppercase()
}

async fn run_query(
    client: Arc<Client>,
    text: &str,
    params: &[Option<String>],
) -> Result<QueryOutcome, QueryError> {
    let param_types = vec![Type::UNKNOWN; params.len()];
    match client.prepare_typed(text, &param_types).await {
        Ok(stmt) => {
            // `cell_to_text` only has decoders for a fixed set of types; a
            // column outside that set (xid8, bytea, inet, arrays, enums,
            // interval, ...) would fail `try_get`'s type check. Run those
            // through the text protocol instead, which returns every column
            // as text with no type-based decode step.
            if stmt.columns().iter().any(|c| !is_decodable_type(c.type_())) {
                let substituted = substitute_params(text, params)?;
                return execute_simple(&client, &substituted).await;
            }
            execute_prepared(&client, &stmt, params, text).await
        }
        Err(prepare_err) => {
            let message = prepare_err
                .as_db_error()
                .map(|e| e.message().to_string())
                .unwrap_or_else(|| prepare_err.to_string());
            if message.contains("cannot insert multiple commands") {
                let substituted = substitute_params(text, params)?;
                execute_simple(&client, &substituted).await
            } else if prepare_err.as_db_error().is_some() {
                Err(QueryError::Recoverable(message))
            } else {
                Err(QueryError::Unrecoverable(message))
            }
        }
    }
}

async fn execute_prepared(
    client: &Client,
    stmt: &Statement,
    params: &[Option<String>],
    text: &str,
) -> Result<QueryOutcome, QueryError> {
    let values: Vec<Option<&str>> = params.iter().map(|p| p.as_deref()).collect();
    let refs: Vec<&(dyn ToSql + Sync)> =
        values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();

    let command = leading_keyword(text);
    let fields: Vec<(String, u32)> = stmt
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), c.type_().oid()))
        .collect();

    if stmt.columns().is_empty() {
        let row_count = client
            .execute(stmt, &refs)
            .await
            .map_err(classify_runtime_error)?;
        Ok(QueryOutcome {
            command,
            row_count,
            fields,
            rows: Vec::new(),
        })
    } else {
        let rows = client
            .query(stmt, &refs)
            .await
            .map_err(classify_runtime_error)?;
        let mut text_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            text_rows.push(row_to_text(row)?);
        }
        Ok(QueryOutcome {
            row_count: text_rows.len() as u64,
            command,
            fields,
            rows: text_rows,
        })
    }
}

async fn execute_simple(client: &Client, text: &str) -> Result<QueryOutcome, QueryError> {
    let messages = client.simple_query(text).await.map_err(classify_runtime_error)?;
    let mut fields: Vec<(String, u32)> = Vec::new();
    let mut rows = Vec::new();
    let mut row_count = 0u64;
    for message in &messages {
        match message {
            SimpleQueryMessage::Row(row) => {
                if fields.is_empty() {
                    fields = row
                        .columns()
                        .iter()
                        .map(|c| (c.name().to_string(), 0u32))
                        .collect();
                }
                let values = row
                    .columns()
                    .iter()
                    .enumerate()
                    .map(|(i, _)| row.get(i).map(|v| v.to_string()))
                    .collect();
                rows.push(values);
                row_count += 1;
            }
            SimpleQueryMessage::CommandComplete(n) => {
                row_count = row_count.max(*n);
            }
            _ => {}
        }
    }
    Ok(QueryOutcome {
        command: leading_keyword(text),
        row_count,
        fields,
        rows,
    })
}

fn classify_runtime_error(err: tokio_postgres::Error) -> QueryError {
    match err.as_db_error() {
        Some(db) => QueryError::Recoverable(db.message().to_string()),
        None => QueryError::Unrecoverable(err.to_string()),
    }
}

/// Substitutes `$1`, `$2`, ... placeholders with escaped SQL literals for
/// the simple-query fallback path, which does not support bind parameters.
fn substitute_params(text: &str, params: &[Option<String>]) -> Result<String, QueryError> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit() {
            let mut j = i + 1;
            let mut digits = String::new();
            while j < chars.len() && chars[j].is_ascii_digit() {
                digits.push(chars[j]);
                j += 1;
            }
            let n: usize = digits
                .parse()
                .map_err(|_| QueryError::Unrecoverable("malformed parameter placeholder".into()))?;
            if n == 0 || n > params.len() {
                return Err(QueryError::Unrecoverable(format!(
                    "parameter ${n} has no matching value"
                )));
            }
            match &params[n - 1] {
                Some(v) => out.push_str(&escape_literal(v)),
                None => out.push_str("NULL"),
            }
            i = j;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Decodes one row into `string|null` cells per the wire payload schema,
/// dispatching on the column's Postgres type oid.
fn row_to_text(row: &Row) -> Result<Vec<Option<String>>, QueryError> {
    (0..row.len()).map(|i| cell_to_text(row, i)).collect()
}

/// Types `cell_to_text` has a decoder for. Anything else is routed through
/// the text protocol before it ever reaches `cell_to_text`.
fn is_decodable_type(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::BOOL
            | Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::NUMERIC
            | Type::UUID
            | Type::DATE
            | Type::TIMESTAMP
            | Type::TIMESTAMPTZ
            | Type::JSON
            | Type::JSONB
            | Type::TEXT
            | Type::VARCHAR
            | Type::BPCHAR
            | Type::NAME
            | Type::UNKNOWN
    )
}

fn cell_to_text(row: &Row, idx: usize) -> Result<Option<String>, QueryError> {
    let ty = row.columns()[idx].type_().clone();
    let decode_err = |e: tokio_postgres::Error| {
        QueryError::Unrecoverable(format!("failed to decode column {idx}: {e}"))
    };

    let value = if ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx).map(|v| v.map(|v| v.to_string()))
    } else if ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx).map(|v| v.map(|v| v.to_string()))
    } else if ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx).map(|v| v.map(|v| v.to_string()))
    } else if ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx).map(|v| v.map(|v| v.to_string()))
    } else if ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx).map(|v| v.map(|v| v.to_string()))
    } else if ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx).map(|v| v.map(|v| v.to_string()))
    } else if ty == Type::NUMERIC {
        row.try_get::<_, Option<rust_decimal::Decimal>>(idx)
            .map(|v| v.map(|v| v.to_string()))
    } else if ty == Type::UUID {
        row.try_get::<_, Option<uuid::Uuid>>(idx).map(|v| v.map(|v| v.to_string()))
    } else if ty == Type::DATE {
        row.try_get::<_, Option<chrono::NaiveDate>>(idx).map(|v| v.map(|v| v.to_string()))
    } else if ty == Type::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .map(|v| v.map(|v| v.to_string()))
    } else if ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .map(|v| v.map(|v| v.to_rfc3339()))
    } else if ty == Type::JSON || ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(idx).map(|v| v.map(|v| v.to_string()))
    } else {
        // TEXT, VARCHAR, BPCHAR, NAME, UNKNOWN and anything else we have
        // no specific decoder for: best-effort as text.
        row.try_get::<_, Option<String>>(idx).map(|v| v.map(|v| v))
    };
    value.map_err(decode_err)
}
