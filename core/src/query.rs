//! The accumulated, source-independent description of one table call.

use std::cmp::Ordering;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::models::Table;

/// A row as it travels between sources and callers: a JSON object keyed by
/// column name.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    /// Case-insensitive pattern match; `%` matches any run of characters.
    ILike { column: String, pattern: String },
}

impl Filter {
    #[must_use]
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq { column, .. } | Filter::In { column, .. } | Filter::ILike { column, .. } => {
                column
            }
        }
    }

    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        let cell = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Filter::Eq { value, .. } => values_equal(cell, value),
            Filter::In { values, .. } => values.iter().any(|v| values_equal(cell, v)),
            Filter::ILike { pattern, .. } => cell
                .as_str()
                .is_some_and(|s| ilike(&s.to_lowercase(), &pattern.to_lowercase())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    /// `None` selects every column.
    Select(Option<Vec<String>>),
    Insert(Vec<Row>),
    Update(Row),
    Delete,
}

impl Operation {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Select(_) => "select",
            Operation::Insert(_) => "insert",
            Operation::Update(_) => "update",
            Operation::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub table: String,
    pub operation: Operation,
    pub filters: Vec<Filter>,
    pub order: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub single: bool,
}

impl Query {
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            operation: Operation::Select(None),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            single: false,
        }
    }

    #[must_use]
    pub fn is_read(&self) -> bool {
        matches!(self.operation, Operation::Select(_))
    }

    /// Every inserted row carries its own `id`, so repeating the insert cannot
    /// create a second copy.
    #[must_use]
    pub fn has_dedup_keys(&self) -> bool {
        match &self.operation {
            Operation::Insert(rows) => {
                !rows.is_empty()
                    && rows
                        .iter()
                        .all(|r| r.get("id").and_then(Value::as_str).is_some_and(|id| !id.is_empty()))
            }
            _ => false,
        }
    }

    /// Safe to send more than once: reads, filtered updates and deletes, and
    /// inserts whose rows carry client-assigned ids.
    #[must_use]
    pub fn is_retry_safe(&self) -> bool {
        match self.operation {
            Operation::Select(_) | Operation::Update(_) | Operation::Delete => true,
            Operation::Insert(_) => self.has_dedup_keys(),
        }
    }

    /// Stable text identity used as a cache key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }

    /// Structural checks that hold for every source. Column names are checked
    /// against the schema model.
    pub fn validate(&self, table: Table) -> Result<(), String> {
        let check = |column: &str| {
            if table.has_column(column) {
                Ok(())
            } else {
                Err(format!("column '{column}' does not exist on {table}"))
            }
        };

        for filter in &self.filters {
            check(filter.column())?;
        }
        for order in &self.order {
            check(&order.column)?;
        }
        match &self.operation {
            Operation::Select(Some(columns)) => {
                if columns.is_empty() {
                    return Err("select needs at least one column".to_string());
                }
                for column in columns {
                    check(column)?;
                }
            }
            Operation::Select(None) => {}
            Operation::Insert(rows) => {
                if rows.is_empty() {
                    return Err("insert needs at least one row".to_string());
                }
                for row in rows {
                    for column in row.keys() {
                        check(column)?;
                    }
                }
            }
            Operation::Update(patch) => {
                if patch.is_empty() {
                    return Err("update needs at least one column".to_string());
                }
                for column in patch.keys() {
                    check(column)?;
                }
                if self.filters.is_empty() {
                    return Err("update requires a filter".to_string());
                }
            }
            Operation::Delete => {
                if self.filters.is_empty() {
                    return Err("delete requires a filter".to_string());
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Columns to keep in the output, if the query narrowed them.
    #[must_use]
    pub fn projection(&self) -> Option<&[String]> {
        match &self.operation {
            Operation::Select(Some(columns)) => Some(columns),
            _ => None,
        }
    }
}

/// Parses a `select` column list such as `"id, title"`; `"*"` means all.
#[must_use]
pub fn parse_columns(columns: &str) -> Option<Vec<String>> {
    let parsed: Vec<String> = columns
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    if parsed.is_empty() || parsed.iter().any(|c| c == "*") {
        None
    } else {
        Some(parsed)
    }
}

#[must_use]
pub fn project(row: &Row, columns: Option<&[String]>) -> Row {
    match columns {
        None => row.clone(),
        Some(columns) => columns
            .iter()
            .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
            .collect(),
    }
}

/// Stable multi-key sort. Nulls sort last when ascending and first when
/// descending, matching Postgres defaults.
pub fn sort_rows(rows: &mut [Row], order: &[OrderBy]) {
    if order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for key in order {
            let left = a.get(&key.column).unwrap_or(&Value::Null);
            let right = b.get(&key.column).unwrap_or(&Value::Null);
            let ord = compare_values(left, right);
            let ord = if key.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Total order over JSON scalars: numbers < strings < booleans < everything
/// else, with null greater than all of them.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Number(_) => 0,
            Value::String(_) => 1,
            Value::Bool(_) => 2,
            Value::Array(_) | Value::Object(_) => 3,
            Value::Null => 4,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn values_equal(cell: &Value, wanted: &Value) -> bool {
    match (cell, wanted) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        // Filters arrive as text on the wire, so compare numbers by value.
        (Value::Number(x), Value::String(y)) | (Value::String(y), Value::Number(x)) => {
            y.parse::<f64>().ok() == x.as_f64()
        }
        _ => cell == wanted,
    }
}

/// Escapes `%`, `_` and `\` so `text` matches only itself in a LIKE pattern.
#[must_use]
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Clone, Copy, PartialEq)]
enum LikeToken {
    AnyRun,
    AnyOne,
    Literal(char),
}

fn like_tokens(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::AnyRun,
            '_' => LikeToken::AnyOne,
            // A trailing backslash stands for itself.
            '\\' => LikeToken::Literal(chars.next().unwrap_or('\\')),
            other => LikeToken::Literal(other),
        });
    }
    tokens
}

/// SQL LIKE: `%` is any run of characters, `_` exactly one, `\` escapes.
fn ilike(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let tokens = like_tokens(pattern);

    let (mut t, mut p) = (0, 0);
    // Position of the last `%` and the text index it was tried against.
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match tokens.get(p) {
            Some(LikeToken::AnyRun) => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(LikeToken::AnyOne) => {
                t += 1;
                p += 1;
            }
            Some(LikeToken::Literal(c)) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, tried)) => {
                    p = star + 1;
                    t = tried + 1;
                    backtrack = Some((star, tried + 1));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|tok| *tok == LikeToken::AnyRun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_parse_columns() {
        assert_eq!(parse_columns("*"), None);
        assert_eq!(parse_columns(""), None);
        assert_eq!(
            parse_columns("id, title"),
            Some(vec!["id".to_string(), "title".to_string()])
        );
    }

    #[test]
    fn test_sort_rows_ascending_by_name() {
        let mut rows = vec![row(json!({"name": "Z"})), row(json!({"name": "A"}))];
        sort_rows(
            &mut rows,
            &[OrderBy {
                column: "name".to_string(),
                ascending: true,
            }],
        );
        assert_eq!(rows[0]["name"], "A");
        assert_eq!(rows[1]["name"], "Z");
    }

    #[test]
    fn test_sort_rows_nulls_last_then_first() {
        let mut rows = vec![
            row(json!({"v": null})),
            row(json!({"v": 2})),
            row(json!({"v": 1})),
        ];
        let mut order = vec![OrderBy {
            column: "v".to_string(),
            ascending: true,
        }];
        sort_rows(&mut rows, &order);
        assert_eq!(rows[0]["v"], 1);
        assert_eq!(rows[2]["v"], Value::Null);

        order[0].ascending = false;
        sort_rows(&mut rows, &order);
        assert_eq!(rows[0]["v"], Value::Null);
        assert_eq!(rows[1]["v"], 2);
    }

    #[test]
    fn test_sort_rows_secondary_key() {
        let mut rows = vec![
            row(json!({"recipe_id": "b", "version_number": 1})),
            row(json!({"recipe_id": "a", "version_number": 2})),
            row(json!({"recipe_id": "a", "version_number": 1})),
        ];
        sort_rows(
            &mut rows,
            &[
                OrderBy {
                    column: "recipe_id".to_string(),
                    ascending: true,
                },
                OrderBy {
                    column: "version_number".to_string(),
                    ascending: false,
                },
            ],
        );
        assert_eq!(rows[0]["version_number"], 2);
        assert_eq!(rows[1]["version_number"], 1);
        assert_eq!(rows[2]["recipe_id"], "b");
    }

    #[test]
    fn test_filters() {
        let r = row(json!({"id": "x", "quantity": 2.0, "name": "Olive Oil"}));
        assert!(
            Filter::Eq {
                column: "id".into(),
                value: json!("x")
            }
            .matches(&r)
        );
        assert!(
            Filter::Eq {
                column: "quantity".into(),
                value: json!(2)
            }
            .matches(&r)
        );
        assert!(
            Filter::In {
                column: "id".into(),
                values: vec![json!("y"), json!("x")]
            }
            .matches(&r)
        );
        assert!(
            Filter::ILike {
                column: "name".into(),
                pattern: "%oil".into()
            }
            .matches(&r)
        );
        assert!(
            Filter::ILike {
                column: "name".into(),
                pattern: "olive oil".into()
            }
            .matches(&r)
        );
        assert!(
            !Filter::ILike {
                column: "name".into(),
                pattern: "%butter%".into()
            }
            .matches(&r)
        );
    }

    #[test]
    fn test_validate_rejects_unknown_column() {
        let mut q = Query::new("recipes");
        q.filters.push(Filter::Eq {
            column: "colour".into(),
            value: json!("red"),
        });
        let err = q.validate(Table::Recipes).unwrap_err();
        assert!(err.contains("colour"));
    }

    #[test]
    fn test_validate_requires_filter_for_writes() {
        let mut q = Query::new("recipes");
        q.operation = Operation::Delete;
        assert!(q.validate(Table::Recipes).is_err());

        q.filters.push(Filter::Eq {
            column: "id".into(),
            value: json!("r1"),
        });
        assert!(q.validate(Table::Recipes).is_ok());
    }

    #[test]
    fn test_retry_safety() {
        let mut q = Query::new("ingredients");
        assert!(q.is_retry_safe());

        q.operation = Operation::Insert(vec![row(json!({"name": "Salt"}))]);
        assert!(!q.is_retry_safe());

        q.operation = Operation::Insert(vec![row(json!({"id": "i9", "name": "Salt"}))]);
        assert!(q.is_retry_safe());
    }

    #[test]
    fn test_fingerprint_differs_by_filter() {
        let a = Query::new("recipes");
        let mut b = Query::new("recipes");
        b.limit = Some(1);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), Query::new("recipes").fingerprint());
    }

    #[test]
    fn test_project() {
        let r = row(json!({"id": "x", "title": "Soup", "notes": null}));
        let projected = project(&r, Some(&["title".to_string()]));
        assert_eq!(projected.len(), 1);
        assert_eq!(projected["title"], "Soup");
    }

    #[test]
    fn test_ilike_wildcards_and_escapes() {
        assert!(ilike("salt", "sal_"));
        assert!(!ilike("salt", "sa_"));
        assert!(ilike("olive oil", "%oil"));
        assert!(ilike("olive oil", "o%i%l"));
        assert!(ilike("aab", "%ab"));
        assert!(!ilike("olive oil", "olive%x"));
        assert!(ilike("", "%"));

        assert!(!ilike("olive oil", &escape_like("olive%")));
        assert!(ilike("olive%", &escape_like("olive%")));
        assert!(!ilike("salt", &escape_like("sal_")));
        assert!(ilike(r"a\b", &escape_like(r"a\b")));
        assert_eq!(escape_like("50%_off"), r"50\%\_off");
    }
}
