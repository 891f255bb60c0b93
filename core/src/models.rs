use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Owner assigned to rows created while the backend is unreachable.
pub const OFFLINE_USER_ID: &str = "00000000-0000-4000-8000-000000000000";

// --- Relations ---

/// The relations this crate knows about. Anything outside this set is not a
/// table the application can query, and a backend that lacks one of these is
/// a schema gap rather than a data problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Recipes,
    Ingredients,
    RecipeIngredients,
    RecipeIterations,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Recipes,
        Table::Ingredients,
        Table::RecipeIngredients,
        Table::RecipeIterations,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Table::Recipes => "recipes",
            Table::Ingredients => "ingredients",
            Table::RecipeIngredients => "recipe_ingredients",
            Table::RecipeIterations => "recipe_iterations",
        }
    }

    /// Resolve a relation name, ignoring a leading `public.` schema qualifier.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        let name = name.strip_prefix("public.").unwrap_or(name);
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Every column of the row shape, in declaration order.
    ///
    /// Both the remote and the fallback path validate queries against this
    /// list, so a column must be added here (and to the row struct) before
    /// either path will accept it.
    #[must_use]
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Table::Recipes => &[
                "id",
                "title",
                "description",
                "instructions",
                "notes",
                "created_at",
                "user_id",
            ],
            Table::Ingredients => &["id", "name", "description", "created_at"],
            Table::RecipeIngredients => &[
                "id",
                "recipe_id",
                "ingredient_id",
                "quantity",
                "unit",
                "notes",
                "created_at",
            ],
            Table::RecipeIterations => &[
                "id",
                "recipe_id",
                "version_number",
                "title",
                "description",
                "notes",
                "instructions",
                "metrics",
                "created_at",
            ],
        }
    }

    /// Columns an insert must supply; everything else has a default.
    #[must_use]
    pub fn required_columns(self) -> &'static [&'static str] {
        match self {
            Table::Recipes => &["title"],
            Table::Ingredients => &["name"],
            Table::RecipeIngredients => &["recipe_id", "ingredient_id", "quantity", "unit"],
            Table::RecipeIterations => &["recipe_id", "title"],
        }
    }

    #[must_use]
    pub fn has_column(self, column: &str) -> bool {
        self.columns().contains(&column)
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// --- Row shapes ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeIngredient {
    pub id: String,
    pub recipe_id: String,
    pub ingredient_id: String,
    pub quantity: f64,
    pub unit: String,
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeIteration {
    pub id: String,
    pub recipe_id: String,
    pub version_number: i64,
    pub title: String,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub instructions: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub created_at: String,
}

// --- Insert payloads ---
//
// `id` is optional: leave it empty to let the data source assign one, or set
// it to make the insert safe to retry.

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewRecipe {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewIngredient {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewRecipeIngredient {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub recipe_id: String,
    pub ingredient_id: String,
    pub quantity: f64,
    pub unit: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewRecipeIteration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub recipe_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_number: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub instructions: Option<String>,
    pub metrics: BTreeMap<String, f64>,
}

// --- Joined views ---

/// One ingredient line of a recipe, with the ingredient name resolved.
#[derive(Debug, Clone, Serialize)]
pub struct IngredientLine {
    pub id: String,
    pub ingredient_id: String,
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    pub recipe: Recipe,
    pub ingredients: Vec<IngredientLine>,
    /// Latest version first.
    pub iterations: Vec<RecipeIteration>,
}

impl RecipeDetail {
    #[must_use]
    pub fn latest_version(&self) -> Option<i64> {
        self.iterations.iter().map(|i| i.version_number).max()
    }
}

// --- Validation ---

pub fn validate_new_recipe(recipe: &NewRecipe) -> Result<()> {
    if recipe.title.trim().is_empty() {
        bail!("Recipe title must not be empty");
    }
    Ok(())
}

pub fn validate_new_ingredient(ingredient: &NewIngredient) -> Result<()> {
    if ingredient.name.trim().is_empty() {
        bail!("Ingredient name must not be empty");
    }
    Ok(())
}

pub fn validate_new_recipe_ingredient(line: &NewRecipeIngredient) -> Result<()> {
    if !line.quantity.is_finite() || line.quantity <= 0.0 {
        bail!("Ingredient quantity must be greater than 0");
    }
    if line.unit.trim().is_empty() {
        bail!("Ingredient unit must not be empty");
    }
    Ok(())
}

pub fn validate_new_iteration(iteration: &NewRecipeIteration) -> Result<()> {
    if iteration.title.trim().is_empty() {
        bail!("Iteration title must not be empty");
    }
    if iteration.version_number.is_some_and(|v| v < 1) {
        bail!("Iteration version_number must start at 1");
    }
    if let Some((name, _)) = iteration.metrics.iter().find(|(_, v)| !v.is_finite()) {
        bail!("Metric '{name}' must be a finite number");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn keys_of<T: Serialize>(row: &T) -> BTreeSet<String> {
        match serde_json::to_value(row).unwrap() {
            serde_json::Value::Object(map) => map.keys().cloned().collect(),
            other => panic!("expected object, got {other}"),
        }
    }

    fn column_set(table: Table) -> BTreeSet<String> {
        table.columns().iter().map(|c| (*c).to_string()).collect()
    }

    #[test]
    fn test_recipe_columns_match_struct() {
        let recipe = Recipe {
            id: "r1".to_string(),
            title: "Soup".to_string(),
            description: None,
            instructions: None,
            notes: None,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            user_id: OFFLINE_USER_ID.to_string(),
        };
        assert_eq!(keys_of(&recipe), column_set(Table::Recipes));
    }

    #[test]
    fn test_ingredient_columns_match_struct() {
        let ingredient = Ingredient {
            id: "i1".to_string(),
            name: "Salt".to_string(),
            description: None,
            created_at: "2024-01-01T00:00:00Z".to_string(),
        };
        assert_eq!(keys_of(&ingredient), column_set(Table::Ingredients));
    }

    #[test]
    fn test_recipe_ingredient_columns_match_struct() {
        let line = RecipeIngredient {
            id: "ri1".to_string(),
            recipe_id: "r1".to_string(),
            ingredient_id: "i1".to_string(),
            quantity: 2.0,
            unit: "tsp".to_string(),
            notes: None,
            created_at: "2024-01-01T00:00:00Z".to_string(),
        };
        assert_eq!(keys_of(&line), column_set(Table::RecipeIngredients));
    }

    #[test]
    fn test_iteration_columns_match_struct() {
        let iteration = RecipeIteration {
            id: "it1".to_string(),
            recipe_id: "r1".to_string(),
            version_number: 1,
            title: "First".to_string(),
            description: None,
            notes: None,
            instructions: None,
            metrics: BTreeMap::new(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
        };
        assert_eq!(keys_of(&iteration), column_set(Table::RecipeIterations));
    }

    #[test]
    fn test_required_columns_are_columns() {
        for table in Table::ALL {
            for column in table.required_columns() {
                assert!(table.has_column(column), "{table}.{column}");
            }
        }
    }

    #[test]
    fn test_table_parse() {
        assert_eq!(Table::parse("recipes"), Some(Table::Recipes));
        assert_eq!(
            Table::parse("public.recipe_iterations"),
            Some(Table::RecipeIterations)
        );
        assert_eq!(Table::parse("meal_entries"), None);
        assert_eq!(Table::RecipeIngredients.to_string(), "recipe_ingredients");
    }

    #[test]
    fn test_iteration_metrics_default_when_missing() {
        let json = serde_json::json!({
            "id": "it1",
            "recipe_id": "r1",
            "version_number": 2,
            "title": "Less salt",
            "description": null,
            "notes": null,
            "instructions": null,
            "created_at": "2024-01-01T00:00:00Z"
        });
        let iteration: RecipeIteration = serde_json::from_value(json).unwrap();
        assert!(iteration.metrics.is_empty());
    }

    #[test]
    fn test_new_recipe_skips_absent_id() {
        let recipe = NewRecipe {
            title: "Bread".to_string(),
            ..Default::default()
        };
        let keys = keys_of(&recipe);
        assert!(!keys.contains("id"));
        assert!(!keys.contains("user_id"));
        assert!(keys.contains("title"));
    }

    #[test]
    fn test_validate_new_recipe_empty_title() {
        let recipe = NewRecipe {
            title: "   ".to_string(),
            ..Default::default()
        };
        assert!(validate_new_recipe(&recipe).is_err());
    }

    #[test]
    fn test_validate_new_ingredient() {
        let ok = NewIngredient {
            name: "Flour".to_string(),
            ..Default::default()
        };
        assert!(validate_new_ingredient(&ok).is_ok());
        assert!(validate_new_ingredient(&NewIngredient::default()).is_err());
    }

    #[test]
    fn test_validate_new_recipe_ingredient_quantity() {
        let mut line = NewRecipeIngredient {
            recipe_id: "r1".to_string(),
            ingredient_id: "i1".to_string(),
            quantity: 200.0,
            unit: "g".to_string(),
            ..Default::default()
        };
        assert!(validate_new_recipe_ingredient(&line).is_ok());

        line.quantity = 0.0;
        assert!(validate_new_recipe_ingredient(&line).is_err());

        line.quantity = f64::NAN;
        assert!(validate_new_recipe_ingredient(&line).is_err());

        line.quantity = 1.0;
        line.unit = String::new();
        assert!(validate_new_recipe_ingredient(&line).is_err());
    }

    #[test]
    fn test_validate_new_iteration() {
        let mut iteration = NewRecipeIteration {
            recipe_id: "r1".to_string(),
            title: "v2".to_string(),
            ..Default::default()
        };
        assert!(validate_new_iteration(&iteration).is_ok());

        iteration.version_number = Some(0);
        assert!(validate_new_iteration(&iteration).is_err());

        iteration.version_number = None;
        iteration.metrics.insert("rating".to_string(), f64::INFINITY);
        assert!(validate_new_iteration(&iteration).is_err());
    }

    #[test]
    fn test_recipe_detail_latest_version() {
        let detail = RecipeDetail {
            recipe: Recipe {
                id: "r1".to_string(),
                title: "Soup".to_string(),
                description: None,
                instructions: None,
                notes: None,
                created_at: "2024-01-01T00:00:00Z".to_string(),
                user_id: OFFLINE_USER_ID.to_string(),
            },
            ingredients: vec![],
            iterations: vec![],
        };
        assert_eq!(detail.latest_version(), None);
    }
}
