//! The chainable query surface application code calls.
//!
//! A [`TableHandle`] only accumulates a [`Query`]; nothing is sent until it is
//! awaited (or `execute`/`fetch` is called). Execution tries the remote
//! source through the retry executor and, when the failure is one the
//! application can live without (unreachable backend, server trouble, rate
//! limiting, a missing table), answers the same query from the fallback
//! store. Caller-actionable failures come back unchanged.

use std::future::IntoFuture;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::client::{Inner, Served};
use crate::error::{ClassifiedError, ErrorKind, Result};
use crate::models::Table;
use crate::query::{Filter, Operation, OrderBy, Query, Row, parse_columns, sort_rows};
use crate::remote::DataSource;

#[must_use = "a table handle does nothing until it is awaited"]
pub struct TableHandle {
    inner: Arc<Inner>,
    table: Option<Table>,
    query: Query,
    /// First problem met while building; reported as `Validation` on execute.
    invalid: Option<String>,
    cancel: CancellationToken,
}

impl TableHandle {
    pub(crate) fn new(inner: Arc<Inner>, table: &str) -> Self {
        let parsed = Table::parse(table);
        let invalid = parsed
            .is_none()
            .then(|| format!("relation '{table}' does not exist"));
        let name = parsed.map_or_else(|| table.to_string(), |t| t.name().to_string());
        Self {
            inner,
            table: parsed,
            query: Query::new(name),
            invalid,
            cancel: CancellationToken::new(),
        }
    }

    /// The query accumulated so far.
    pub fn query(&self) -> &Query {
        &self.query
    }

    // --- Operations ---

    /// Comma-separated column list; `"*"` selects every column.
    pub fn select(mut self, columns: &str) -> Self {
        self.query.operation = Operation::Select(parse_columns(columns));
        self
    }

    /// Accepts one row (any struct or map) or a sequence of them.
    pub fn insert<T: Serialize>(mut self, rows: T) -> Self {
        match serde_json::to_value(rows) {
            Ok(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Object(row) => out.push(row),
                        other => {
                            self.reject(format!("insert expects row objects, got {other}"));
                            return self;
                        }
                    }
                }
                self.query.operation = Operation::Insert(out);
            }
            Ok(Value::Object(row)) => self.query.operation = Operation::Insert(vec![row]),
            Ok(other) => self.reject(format!("insert expects row objects, got {other}")),
            Err(e) => self.reject(format!("insert payload: {e}")),
        }
        self
    }

    pub fn update<T: Serialize>(mut self, patch: T) -> Self {
        match serde_json::to_value(patch) {
            Ok(Value::Object(patch)) => self.query.operation = Operation::Update(patch),
            Ok(other) => self.reject(format!("update expects an object, got {other}")),
            Err(e) => self.reject(format!("update payload: {e}")),
        }
        self
    }

    pub fn delete(mut self) -> Self {
        self.query.operation = Operation::Delete;
        self
    }

    // --- Filters and modifiers ---

    pub fn eq<V: Serialize>(mut self, column: &str, value: V) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => self.query.filters.push(Filter::Eq {
                column: column.to_string(),
                value,
            }),
            Err(e) => self.reject(format!("filter value for '{column}': {e}")),
        }
        self
    }

    pub fn in_<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Serialize,
    {
        let values: std::result::Result<Vec<Value>, _> =
            values.into_iter().map(serde_json::to_value).collect();
        match values {
            Ok(values) => self.query.filters.push(Filter::In {
                column: column.to_string(),
                values,
            }),
            Err(e) => self.reject(format!("filter values for '{column}': {e}")),
        }
        self
    }

    /// Case-insensitive match where `%` stands for any run of characters.
    pub fn ilike(mut self, column: &str, pattern: &str) -> Self {
        self.query.filters.push(Filter::ILike {
            column: column.to_string(),
            pattern: pattern.to_string(),
        });
        self
    }

    /// Adds a sort key; later calls break ties of earlier ones.
    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.query.order.push(OrderBy {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.query.limit = Some(n);
        self
    }

    /// Aborts the call (including pending retries) when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Resolves to exactly one row; zero or several rows is `NotFound`.
    pub fn single(mut self) -> SingleHandle {
        self.query.single = true;
        SingleHandle { handle: self }
    }

    fn reject(&mut self, message: String) {
        if self.invalid.is_none() {
            self.invalid = Some(message);
        }
    }

    // --- Execution ---

    pub async fn execute(self) -> Result<Vec<Row>> {
        let TableHandle {
            inner,
            table,
            query,
            invalid,
            cancel,
        } = self;

        let name = query.table.clone();
        let Some(table) = table else {
            return Err(rejected(&inner, &name, invalid.unwrap_or_default()));
        };
        if let Some(message) = invalid {
            return Err(rejected(&inner, &name, message));
        }
        if let Err(message) = query.validate(table) {
            return Err(rejected(&inner, &name, message));
        }

        let fingerprint = query.is_read().then(|| query.fingerprint());
        if let Some(rows) = fingerprint
            .as_deref()
            .and_then(|fp| inner.cache.get(&name, fp))
        {
            inner.status.served(Served::Cache);
            debug!(table = %name, rows = rows.len(), "served from cache");
            return cardinality(&inner, &query, rows);
        }

        // Taken before any I/O so a write finishing mid-read is noticed.
        let generation = inner.cache.generation(&name);
        let (mut rows, served) = match inner.remote.as_ref().filter(|_| !inner.prefer_fallback) {
            Some(remote) => run_remote(&inner, remote.as_ref(), table, &query, &cancel).await?,
            None => {
                if cancel.is_cancelled() {
                    return Err(ClassifiedError::new(
                        ErrorKind::Cancelled,
                        &name,
                        "call cancelled by caller",
                    ));
                }
                (run_fallback(&inner, &query)?, Served::Fallback)
            }
        };

        // Backends are not trusted to honor ordering identically.
        sort_rows(&mut rows, &query.order);

        if query.is_read() {
            if served == Served::Remote {
                if let Some(fp) = &fingerprint {
                    inner.cache.put(&name, fp, &rows, generation);
                }
            }
        } else {
            invalidate_after_write(&inner, table);
        }

        inner.status.served(served);
        debug!(
            table = %name,
            op = query.operation.name(),
            source = served.as_str(),
            rows = rows.len(),
            "query complete"
        );
        cardinality(&inner, &query, rows)
    }

    /// Executes and decodes every row into `T`.
    pub async fn fetch<T: DeserializeOwned>(self) -> Result<Vec<T>> {
        let name = self.query.table.clone();
        let rows = self.execute().await?;
        rows.into_iter().map(|row| decode(&name, row)).collect()
    }
}

impl IntoFuture for TableHandle {
    type Output = Result<Vec<Row>>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.execute())
    }
}

/// A handle narrowed to exactly one row.
#[must_use = "a table handle does nothing until it is awaited"]
pub struct SingleHandle {
    handle: TableHandle,
}

impl SingleHandle {
    pub fn query(&self) -> &Query {
        self.handle.query()
    }

    pub fn with_cancellation(self, token: CancellationToken) -> Self {
        Self {
            handle: self.handle.with_cancellation(token),
        }
    }

    pub async fn execute(self) -> Result<Row> {
        let name = self.handle.query.table.clone();
        let mut rows = self.handle.execute().await?;
        rows.pop()
            .ok_or_else(|| ClassifiedError::new(ErrorKind::NotFound, name, "no rows returned"))
    }

    pub async fn fetch<T: DeserializeOwned>(self) -> Result<T> {
        let name = self.handle.query.table.clone();
        let row = self.execute().await?;
        decode(&name, row)
    }
}

impl IntoFuture for SingleHandle {
    type Output = Result<Row>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.execute())
    }
}

async fn run_remote(
    inner: &Inner,
    remote: &dyn DataSource,
    table: Table,
    query: &Query,
    cancel: &CancellationToken,
) -> Result<(Vec<Row>, Served)> {
    let result = inner
        .executor
        .execute(table.name(), query.is_retry_safe(), cancel, move || remote.run(query))
        .await;

    match result {
        Ok(rows) => Ok((rows, Served::Remote)),
        Err(err) if err.kind.degrades() => {
            warn!(
                table = %table,
                op = query.operation.name(),
                kind = %err.kind,
                attempts = err.attempts,
                error = %err.message,
                "remote unavailable, answering from fallback store"
            );
            inner.status.degraded(&err);
            Ok((run_fallback(inner, query)?, Served::Fallback))
        }
        Err(err) => {
            if err.kind == ErrorKind::Unknown {
                error!(table = %table, op = query.operation.name(), error = %err.message, "unclassified remote failure");
            }
            inner.status.failed();
            Err(err)
        }
    }
}

fn run_fallback(inner: &Inner, query: &Query) -> Result<Vec<Row>> {
    inner.fallback.evaluate(query).map_err(|e| {
        inner.status.failed();
        let kind = inner.executor.classifier().classify(&e);
        ClassifiedError::from_source(kind, &query.table, &e, 0)
    })
}

/// Drops cached reads a write may have changed, including tables the write
/// cascades into.
fn invalidate_after_write(inner: &Inner, table: Table) {
    inner.cache.invalidate(table.name());
    if table == Table::Recipes {
        inner.cache.invalidate(Table::RecipeIngredients.name());
        inner.cache.invalidate(Table::RecipeIterations.name());
    }
}

fn cardinality(inner: &Inner, query: &Query, rows: Vec<Row>) -> Result<Vec<Row>> {
    if query.single && rows.len() != 1 {
        inner.status.failed();
        return Err(ClassifiedError::new(
            ErrorKind::NotFound,
            &query.table,
            format!("expected exactly one row, got {}", rows.len()),
        ));
    }
    Ok(rows)
}

fn rejected(inner: &Inner, table: &str, message: String) -> ClassifiedError {
    inner.status.failed();
    ClassifiedError::validation(table, message)
}

fn decode<T: DeserializeOwned>(table: &str, row: Row) -> Result<T> {
    serde_json::from_value(Value::Object(row)).map_err(|e| {
        ClassifiedError::new(ErrorKind::Unknown, table, format!("row does not match schema: {e}"))
    })
}
