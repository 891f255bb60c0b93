//! In-memory stand-in for the backend.
//!
//! Holds a small, internally consistent seed dataset and evaluates the same
//! [`Query`] descriptions the remote source receives, emulating the handful
//! of constraints the real schema enforces (required columns, unique names,
//! foreign keys, per-recipe version numbers, cascade/restrict deletes).
//! Writes only touch the in-memory copy and are lost when the process exits.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::SourceError;
use crate::models::{
    Ingredient, OFFLINE_USER_ID, Recipe, RecipeIngredient, RecipeIteration, Table,
};
use crate::query::{Operation, Query, Row, project, sort_rows};
use crate::remote::DataSource;

type Tables = BTreeMap<Table, Vec<Row>>;

pub struct FallbackStore {
    tables: RwLock<Tables>,
}

impl Default for FallbackStore {
    fn default() -> Self {
        Self::seeded()
    }
}

impl FallbackStore {
    /// A store holding the seed dataset.
    #[must_use]
    pub fn seeded() -> Self {
        Self {
            tables: RwLock::new(seed_tables()),
        }
    }

    /// A store with every table present and empty.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            tables: RwLock::new(Table::ALL.into_iter().map(|t| (t, Vec::new())).collect()),
        }
    }

    /// Discards every write and restores the seed dataset.
    pub fn reset(&self) {
        *self.tables.write() = seed_tables();
    }

    #[must_use]
    pub fn snapshot(&self, table: Table) -> Vec<Row> {
        self.tables.read().get(&table).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self, table: Table) -> usize {
        self.tables.read().get(&table).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.read().values().all(Vec::is_empty)
    }

    /// Evaluates one query against the in-memory tables.
    pub fn evaluate(&self, query: &Query) -> Result<Vec<Row>, SourceError> {
        let table = Table::parse(&query.table).ok_or_else(|| {
            SourceError::InvalidQuery(format!("relation '{}' does not exist", query.table))
        })?;
        query.validate(table).map_err(SourceError::InvalidQuery)?;

        match &query.operation {
            Operation::Select(columns) => {
                let tables = self.tables.read();
                let mut rows: Vec<Row> = rows_of(&tables, table)
                    .iter()
                    .filter(|r| query.matches(r))
                    .cloned()
                    .collect();
                drop(tables);
                sort_rows(&mut rows, &query.order);
                if let Some(limit) = query.limit {
                    rows.truncate(limit);
                }
                Ok(rows
                    .iter()
                    .map(|r| project(r, columns.as_deref()))
                    .collect())
            }
            Operation::Insert(rows) => {
                let mut tables = self.tables.write();
                insert(&mut tables, table, rows)
            }
            Operation::Update(patch) => {
                let mut tables = self.tables.write();
                update(&mut tables, table, query, patch)
            }
            Operation::Delete => {
                let mut tables = self.tables.write();
                delete(&mut tables, table, query)
            }
        }
    }
}

#[async_trait]
impl DataSource for FallbackStore {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn run(&self, query: &Query) -> Result<Vec<Row>, SourceError> {
        self.evaluate(query)
    }
}

// --- Writes ---

fn insert(tables: &mut Tables, table: Table, rows: &[Row]) -> Result<Vec<Row>, SourceError> {
    let mut staged: Vec<Row> = Vec::with_capacity(rows.len());

    for input in rows {
        for column in table.required_columns() {
            if input.get(*column).is_none_or(Value::is_null) {
                return Err(invalid(format!(
                    "null value in column \"{column}\" of relation \"{table}\" violates not-null constraint"
                )));
            }
        }

        let mut row = Row::new();
        row.insert("id".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
        row.insert("created_at".to_string(), Value::String(now()));
        match table {
            Table::Recipes => {
                row.insert("user_id".to_string(), Value::String(OFFLINE_USER_ID.to_string()));
            }
            Table::RecipeIterations => {
                row.insert("metrics".to_string(), Value::Object(Row::new()));
            }
            Table::Ingredients | Table::RecipeIngredients => {}
        }
        for (column, value) in input {
            let defaulted = matches!(column.as_str(), "id" | "created_at" | "user_id" | "metrics");
            if !(value.is_null() && defaulted) {
                row.insert(column.clone(), value.clone());
            }
        }
        if table == Table::RecipeIterations && row.get("version_number").is_none_or(Value::is_null) {
            let recipe_id = row.get("recipe_id").cloned().unwrap_or(Value::Null);
            let next = next_version(rows_of(tables, table).iter().chain(&staged), &recipe_id);
            row.insert("version_number".to_string(), Value::from(next));
        }

        let row = normalize(table, row)?;
        let id = id_of(&row);
        if rows_of(tables, table).iter().chain(&staged).any(|r| id_of(r) == id) {
            return Err(invalid(format!(
                "duplicate key value violates unique constraint \"{table}_pkey\": id {id}"
            )));
        }
        check_constraints(tables, table, &row, &staged, true)?;
        staged.push(row);
    }

    debug!(%table, rows = staged.len(), "fallback insert");
    tables.entry(table).or_default().extend(staged.iter().cloned());
    Ok(staged)
}

fn update(
    tables: &mut Tables,
    table: Table,
    query: &Query,
    patch: &Row,
) -> Result<Vec<Row>, SourceError> {
    if patch.contains_key("id") {
        return Err(invalid(format!("column \"id\" of relation \"{table}\" cannot be updated")));
    }
    for column in table.required_columns() {
        if patch.get(*column).is_some_and(Value::is_null) {
            return Err(invalid(format!(
                "null value in column \"{column}\" of relation \"{table}\" violates not-null constraint"
            )));
        }
    }

    let current = rows_of(tables, table);
    let mut changed: Vec<(usize, Row, bool)> = Vec::new();
    for (idx, row) in current.iter().enumerate() {
        if !query.matches(row) {
            continue;
        }
        let mut next = row.clone();
        for (column, value) in patch {
            next.insert(column.clone(), value.clone());
        }
        let renumbered = next.get("version_number") != row.get("version_number")
            || next.get("recipe_id") != row.get("recipe_id");
        changed.push((idx, normalize(table, next)?, renumbered));
    }

    let staged: Vec<Row> = changed.iter().map(|(_, r, _)| r.clone()).collect();
    for (_, row, renumbered) in &changed {
        check_constraints(tables, table, row, &staged, *renumbered)?;
    }

    let rows = tables.entry(table).or_default();
    for (idx, row, _) in &changed {
        rows[*idx] = row.clone();
    }
    debug!(%table, rows = staged.len(), "fallback update");
    Ok(staged)
}

fn delete(tables: &mut Tables, table: Table, query: &Query) -> Result<Vec<Row>, SourceError> {
    let doomed: Vec<Row> = rows_of(tables, table)
        .iter()
        .filter(|r| query.matches(r))
        .cloned()
        .collect();
    let ids: BTreeSet<String> = doomed.iter().map(|r| id_of(r).to_string()).collect();

    if table == Table::Ingredients {
        if let Some(line) = rows_of(tables, Table::RecipeIngredients)
            .iter()
            .find(|r| ids.contains(str_of(r, "ingredient_id")))
        {
            return Err(invalid(format!(
                "ingredient {} is still used by recipe {}",
                str_of(line, "ingredient_id"),
                str_of(line, "recipe_id")
            )));
        }
    }

    if table == Table::Recipes {
        for child in [Table::RecipeIngredients, Table::RecipeIterations] {
            tables
                .entry(child)
                .or_default()
                .retain(|r| !ids.contains(str_of(r, "recipe_id")));
        }
    }
    tables
        .entry(table)
        .or_default()
        .retain(|r| !ids.contains(id_of(r)));

    debug!(%table, rows = doomed.len(), "fallback delete");
    Ok(doomed)
}

/// Checks `row` against the table's unique and foreign-key constraints.
/// `staged` holds the rows written by the same statement so far; for an
/// update it includes `row` itself. `versioned` is set when the row takes a
/// new iteration version, which must follow the recipe's latest.
fn check_constraints(
    tables: &Tables,
    table: Table,
    row: &Row,
    staged: &[Row],
    versioned: bool,
) -> Result<(), SourceError> {
    let id = id_of(row);
    let staged_ids: BTreeSet<&str> = staged.iter().map(id_of).collect();
    // The table as it would look after the statement, minus `row`.
    let others: Vec<&Row> = rows_of(tables, table)
        .iter()
        .filter(|r| !staged_ids.contains(id_of(r)))
        .chain(staged)
        .filter(|r| id_of(r) != id)
        .collect();

    match table {
        Table::Recipes => {}
        Table::Ingredients => {
            let name = str_of(row, "name").to_lowercase();
            if others.iter().any(|r| str_of(r, "name").to_lowercase() == name) {
                return Err(invalid(format!(
                    "duplicate key value violates unique constraint \"ingredients_name_key\": {}",
                    str_of(row, "name")
                )));
            }
        }
        Table::RecipeIngredients => {
            require_parent(tables, Table::Recipes, str_of(row, "recipe_id"), "recipe_id")?;
            require_parent(tables, Table::Ingredients, str_of(row, "ingredient_id"), "ingredient_id")?;
        }
        Table::RecipeIterations => {
            let recipe_id = str_of(row, "recipe_id");
            require_parent(tables, Table::Recipes, recipe_id, "recipe_id")?;
            let version = row.get("version_number").and_then(Value::as_i64).unwrap_or(0);
            if version < 1 {
                return Err(invalid(format!(
                    "version_number must be at least 1 (got {version})"
                )));
            }
            if others.iter().any(|r| {
                str_of(r, "recipe_id") == recipe_id
                    && r.get("version_number").and_then(Value::as_i64) == Some(version)
            }) {
                return Err(invalid(format!(
                    "duplicate key value violates unique constraint \"recipe_iterations_recipe_id_version_number_key\": recipe {recipe_id} version {version}"
                )));
            }
            let expected = next_version(others.iter().copied(), &Value::from(recipe_id));
            if versioned && version != expected {
                return Err(invalid(format!(
                    "version_number of recipe {recipe_id} must be {expected} (got {version})"
                )));
            }
        }
    }
    Ok(())
}

fn require_parent(tables: &Tables, parent: Table, id: &str, column: &str) -> Result<(), SourceError> {
    if rows_of(tables, parent).iter().any(|r| id_of(r) == id) {
        Ok(())
    } else {
        Err(invalid(format!(
            "insert or update violates foreign key constraint on \"{column}\": {parent} {id} does not exist"
        )))
    }
}

fn next_version<'a>(rows: impl Iterator<Item = &'a Row>, recipe_id: &Value) -> i64 {
    rows.filter(|r| r.get("recipe_id") == Some(recipe_id))
        .filter_map(|r| r.get("version_number").and_then(Value::as_i64))
        .max()
        .unwrap_or(0)
        + 1
}

/// Round-trips a row through its typed struct so fallback rows have exactly
/// the shape and types backend rows have.
fn normalize(table: Table, row: Row) -> Result<Row, SourceError> {
    let value = Value::Object(row);
    match table {
        Table::Recipes => through::<Recipe>(value),
        Table::Ingredients => through::<Ingredient>(value),
        Table::RecipeIngredients => through::<RecipeIngredient>(value),
        Table::RecipeIterations => through::<RecipeIteration>(value),
    }
}

fn through<T: DeserializeOwned + Serialize>(value: Value) -> Result<Row, SourceError> {
    let typed: T = serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
    to_row(&typed).map_err(|e| SourceError::Decode(e.to_string()))
}

fn to_row<T: Serialize>(value: &T) -> Result<Row, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(row) => Ok(row),
        other => Err(serde::ser::Error::custom(format!(
            "expected a row object, got {other}"
        ))),
    }
}

fn rows_of(tables: &Tables, table: Table) -> &[Row] {
    tables.get(&table).map_or(&[], Vec::as_slice)
}

fn id_of(row: &Row) -> &str {
    str_of(row, "id")
}

fn str_of<'a>(row: &'a Row, column: &str) -> &'a str {
    row.get(column).and_then(Value::as_str).unwrap_or("")
}

fn invalid(message: String) -> SourceError {
    SourceError::InvalidQuery(message)
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// --- Seed data ---

const SEED_CREATED_AT: &str = "2024-03-01T12:00:00.000Z";

fn seed_id(table: u32, n: u32) -> String {
    format!("{table:08x}-5eed-4000-8000-{n:012x}")
}

#[must_use]
pub fn seed_recipes() -> Vec<Recipe> {
    let recipe = |n: u32, title: &str, description: &str, instructions: &str| Recipe {
        id: seed_id(1, n),
        title: title.to_string(),
        description: Some(description.to_string()),
        instructions: Some(instructions.to_string()),
        notes: None,
        created_at: SEED_CREATED_AT.to_string(),
        user_id: OFFLINE_USER_ID.to_string(),
    };
    vec![
        recipe(
            1,
            "Roasted Tomato Soup",
            "Slow-roasted tomatoes blended with garlic and onion.",
            "Roast tomatoes, garlic and onion at 200C for 40 minutes. Blend with stock and season.",
        ),
        recipe(
            2,
            "Garlic Focaccia",
            "Overnight focaccia with olive oil and garlic.",
            "Mix dough, rest overnight, dimple with oil and garlic, bake at 220C for 25 minutes.",
        ),
        recipe(
            3,
            "Lemon Chickpea Salad",
            "Quick chickpea salad with lemon and olive oil.",
            "Drain chickpeas, toss with lemon juice, olive oil, garlic and salt.",
        ),
    ]
}

#[must_use]
pub fn seed_ingredients() -> Vec<Ingredient> {
    [
        "Tomatoes",
        "Olive Oil",
        "Garlic",
        "Onion",
        "Salt",
        "Flour",
        "Chickpeas",
        "Lemon",
    ]
    .into_iter()
    .zip(1..)
    .map(|(name, n)| Ingredient {
        id: seed_id(2, n),
        name: name.to_string(),
        description: None,
        created_at: SEED_CREATED_AT.to_string(),
    })
    .collect()
}

#[must_use]
pub fn seed_recipe_ingredients() -> Vec<RecipeIngredient> {
    // (recipe, ingredient, quantity, unit)
    let lines: [(u32, u32, f64, &str); 14] = [
        (1, 1, 800.0, "g"),
        (1, 2, 2.0, "tbsp"),
        (1, 3, 3.0, "clove"),
        (1, 4, 1.0, "whole"),
        (1, 5, 1.0, "tsp"),
        (2, 6, 500.0, "g"),
        (2, 2, 4.0, "tbsp"),
        (2, 3, 4.0, "clove"),
        (2, 5, 2.0, "tsp"),
        (3, 7, 400.0, "g"),
        (3, 8, 1.0, "whole"),
        (3, 2, 3.0, "tbsp"),
        (3, 3, 1.0, "clove"),
        (3, 5, 0.5, "tsp"),
    ];
    lines
        .into_iter()
        .zip(1..)
        .map(|((recipe, ingredient, quantity, unit), n)| RecipeIngredient {
            id: seed_id(3, n),
            recipe_id: seed_id(1, recipe),
            ingredient_id: seed_id(2, ingredient),
            quantity,
            unit: unit.to_string(),
            notes: None,
            created_at: SEED_CREATED_AT.to_string(),
        })
        .collect()
}

#[must_use]
pub fn seed_iterations() -> Vec<RecipeIteration> {
    let iteration = |n: u32, recipe: u32, version: i64, title: &str, notes: &str, metrics: &[(&str, f64)]| {
        RecipeIteration {
            id: seed_id(4, n),
            recipe_id: seed_id(1, recipe),
            version_number: version,
            title: title.to_string(),
            description: None,
            notes: Some(notes.to_string()),
            instructions: None,
            metrics: metrics.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
            created_at: SEED_CREATED_AT.to_string(),
        }
    };
    vec![
        iteration(1, 1, 1, "First attempt", "Too thin.", &[("rating", 3.0), ("prep_minutes", 50.0)]),
        iteration(2, 1, 2, "Less stock", "Better body.", &[("rating", 4.5), ("prep_minutes", 50.0)]),
        iteration(3, 2, 1, "Overnight rise", "Good crumb.", &[("rating", 4.0), ("hydration_pct", 75.0)]),
        iteration(4, 3, 1, "Original", "Needs more lemon.", &[("rating", 3.5)]),
    ]
}

fn seed_tables() -> Tables {
    fn rows<T: Serialize>(items: &[T]) -> Vec<Row> {
        items.iter().filter_map(|item| to_row(item).ok()).collect()
    }
    let mut tables = Tables::new();
    tables.insert(Table::Recipes, rows(&seed_recipes()));
    tables.insert(Table::Ingredients, rows(&seed_ingredients()));
    tables.insert(Table::RecipeIngredients, rows(&seed_recipe_ingredients()));
    tables.insert(Table::RecipeIterations, rows(&seed_iterations()));
    tables
}
