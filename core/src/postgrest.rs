//! PostgREST wire dialect: turns a [`Query`] into an HTTP request description
//! and decodes response bodies back into rows.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::{ErrorPayload, SourceError};
use crate::query::{Filter, Operation, OrderBy, Query, Row};

/// Path prefix of the REST endpoint, relative to the backend URL.
pub const REST_PATH: &str = "rest/v1/";

const RETURN_REPRESENTATION: &str = "return=representation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// Everything needed to send one query, independent of the HTTP client.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Relative to [`REST_PATH`].
    pub path: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
    pub prefer: Option<&'static str>,
}

#[must_use]
pub fn encode(query: &Query) -> Request {
    let mut params = Vec::new();

    let (method, body, prefer) = match &query.operation {
        Operation::Select(columns) => {
            let select = columns.as_ref().map_or_else(|| "*".to_string(), |c| c.join(","));
            params.push(("select".to_string(), select));
            (Method::Get, None, None)
        }
        Operation::Insert(rows) => {
            if let Some(columns) = uneven_columns(rows) {
                params.push(("columns".to_string(), columns));
            }
            let body = Value::Array(rows.iter().cloned().map(Value::Object).collect());
            (Method::Post, Some(body), Some(RETURN_REPRESENTATION))
        }
        Operation::Update(patch) => (
            Method::Patch,
            Some(Value::Object(patch.clone())),
            Some(RETURN_REPRESENTATION),
        ),
        Operation::Delete => (Method::Delete, None, Some(RETURN_REPRESENTATION)),
    };

    params.extend(query.filters.iter().map(encode_filter));
    if !query.order.is_empty() {
        params.push(("order".to_string(), encode_order(&query.order)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }

    Request {
        method,
        path: query.table.clone(),
        params,
        body,
        prefer,
    }
}

fn encode_filter(filter: &Filter) -> (String, String) {
    let value = match filter {
        // `eq.null` would compare against the text 'null'.
        Filter::Eq {
            value: Value::Null, ..
        } => "is.null".to_string(),
        Filter::Eq { value, .. } => format!("eq.{}", encode_value(value)),
        Filter::In { values, .. } => {
            let list: Vec<String> = values.iter().map(encode_list_item).collect();
            format!("in.({})", list.join(","))
        }
        Filter::ILike { pattern, .. } => format!("ilike.{pattern}"),
    };
    (filter.column().to_string(), value)
}

fn encode_order(order: &[OrderBy]) -> String {
    order
        .iter()
        .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
        .collect::<Vec<_>>()
        .join(",")
}

fn encode_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// List members containing reserved characters must be double-quoted.
fn encode_list_item(value: &Value) -> String {
    let raw = encode_value(value);
    if raw.contains([',', '(', ')', '"', ' ']) {
        format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        raw
    }
}

/// Bulk inserts whose rows disagree on keys need an explicit column list,
/// otherwise the backend rejects the payload.
fn uneven_columns(rows: &[Row]) -> Option<String> {
    let first: BTreeSet<&String> = rows.first()?.keys().collect();
    let uneven = rows.iter().skip(1).any(|r| r.keys().collect::<BTreeSet<_>>() != first);
    if !uneven {
        return None;
    }
    let all: BTreeSet<&str> = rows.iter().flat_map(|r| r.keys().map(String::as_str)).collect();
    Some(all.into_iter().collect::<Vec<_>>().join(","))
}

/// Decodes a success body. Arrays are the normal shape; a lone object (as
/// returned for singular responses) becomes one row and an empty body none.
pub fn decode_rows(body: &[u8]) -> Result<Vec<Row>, SourceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let value: Value =
        serde_json::from_slice(body).map_err(|e| SourceError::Decode(e.to_string()))?;
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(SourceError::Decode(format!("expected row object, got {other}"))),
            })
            .collect(),
        Value::Object(row) => Ok(vec![row]),
        Value::Null => Ok(Vec::new()),
        other => Err(SourceError::Decode(format!("expected rows, got {other}"))),
    }
}

/// Decodes an error body, falling back to the raw text when it is not the
/// usual `{code, message, details, hint}` object.
#[must_use]
pub fn decode_error(status: u16, body: &[u8]) -> ErrorPayload {
    let parsed = serde_json::from_slice::<ErrorPayload>(body).ok();
    if let Some(payload) = parsed.filter(|p| p.code.is_some() || p.message.is_some()) {
        return payload;
    }
    let text = String::from_utf8_lossy(body).trim().to_string();
    if text.is_empty() {
        ErrorPayload::with_message(format!("HTTP {status}"))
    } else {
        ErrorPayload::with_message(text)
    }
}
