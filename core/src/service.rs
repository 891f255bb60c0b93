use std::collections::HashMap;

use anyhow::{Context, Result, bail};

use crate::client::Client;
use crate::models::{
    Ingredient, IngredientLine, NewIngredient, NewRecipe, NewRecipeIngredient, NewRecipeIteration,
    Recipe, RecipeDetail, RecipeIngredient, RecipeIteration, Table, validate_new_ingredient,
    validate_new_iteration, validate_new_recipe, validate_new_recipe_ingredient,
};
use crate::query::escape_like;

/// Recipe operations built only on the client facade, so every call gets the
/// same retry and fallback behaviour as direct table access.
pub struct RecipeService {
    client: Client,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl RecipeService {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    // --- Recipes ---

    pub async fn list_recipes(&self) -> Result<Vec<Recipe>> {
        self.client
            .from(Table::Recipes.name())
            .select("*")
            .order("title", true)
            .fetch()
            .await
            .context("Failed to list recipes")
    }

    pub async fn recipe_detail(&self, recipe_id: &str) -> Result<RecipeDetail> {
        let recipe: Recipe = self
            .client
            .from(Table::Recipes.name())
            .select("*")
            .eq("id", recipe_id)
            .single()
            .fetch()
            .await
            .with_context(|| format!("Recipe '{recipe_id}' not found"))?;

        let lines: Vec<RecipeIngredient> = self
            .client
            .from(Table::RecipeIngredients.name())
            .select("*")
            .eq("recipe_id", recipe_id)
            .order("created_at", true)
            .fetch()
            .await
            .context("Failed to load recipe ingredients")?;

        let names: HashMap<String, String> = if lines.is_empty() {
            HashMap::new()
        } else {
            let ids: Vec<&str> = lines.iter().map(|l| l.ingredient_id.as_str()).collect();
            let ingredients: Vec<Ingredient> = self
                .client
                .from(Table::Ingredients.name())
                .select("*")
                .in_("id", ids)
                .fetch()
                .await
                .context("Failed to load ingredients")?;
            ingredients.into_iter().map(|i| (i.id, i.name)).collect()
        };

        let ingredients = lines
            .into_iter()
            .map(|line| IngredientLine {
                name: names
                    .get(&line.ingredient_id)
                    .cloned()
                    .unwrap_or_else(|| line.ingredient_id.clone()),
                id: line.id,
                ingredient_id: line.ingredient_id,
                quantity: line.quantity,
                unit: line.unit,
                notes: line.notes,
            })
            .collect();

        let iterations = self.list_iterations(recipe_id).await?;

        Ok(RecipeDetail {
            recipe,
            ingredients,
            iterations,
        })
    }

    pub async fn create_recipe(&self, recipe: &NewRecipe) -> Result<Recipe> {
        validate_new_recipe(recipe)?;
        let mut recipe = recipe.clone();
        recipe.id.get_or_insert_with(new_id);
        self.client
            .from(Table::Recipes.name())
            .insert(&recipe)
            .single()
            .fetch()
            .await
            .with_context(|| format!("Failed to create recipe '{}'", recipe.title))
    }

    /// Deletes a recipe with its ingredient lines and iterations. Returns
    /// `false` when no recipe had that id.
    ///
    /// Existence is checked up front: a retried DELETE whose first attempt
    /// already committed comes back empty, and that still counts as deleted.
    pub async fn delete_recipe(&self, recipe_id: &str) -> Result<bool> {
        let existing = self
            .client
            .from(Table::Recipes.name())
            .select("id")
            .eq("id", recipe_id)
            .limit(1)
            .await
            .with_context(|| format!("Failed to look up recipe '{recipe_id}'"))?;
        if existing.is_empty() {
            return Ok(false);
        }

        for child in [Table::RecipeIngredients, Table::RecipeIterations] {
            self.client
                .from(child.name())
                .delete()
                .eq("recipe_id", recipe_id)
                .await
                .with_context(|| format!("Failed to delete {child} of recipe '{recipe_id}'"))?;
        }
        self.client
            .from(Table::Recipes.name())
            .delete()
            .eq("id", recipe_id)
            .await
            .with_context(|| format!("Failed to delete recipe '{recipe_id}'"))?;
        Ok(true)
    }

    // --- Ingredients ---

    /// All ingredients by name, optionally narrowed to names containing
    /// `search` (case-insensitive).
    pub async fn list_ingredients(&self, search: Option<&str>) -> Result<Vec<Ingredient>> {
        let mut handle = self
            .client
            .from(Table::Ingredients.name())
            .select("*")
            .order("name", true);
        if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
            handle = handle.ilike("name", &format!("%{term}%"));
        }
        handle.fetch().await.context("Failed to list ingredients")
    }

    /// Case-insensitive exact match; `%` and `_` in `name` are literal.
    pub async fn find_ingredient_by_name(&self, name: &str) -> Result<Option<Ingredient>> {
        let found: Vec<Ingredient> = self
            .client
            .from(Table::Ingredients.name())
            .select("*")
            .ilike("name", &escape_like(name.trim()))
            .limit(1)
            .fetch()
            .await
            .with_context(|| format!("Failed to look up ingredient '{name}'"))?;
        Ok(found.into_iter().next())
    }

    /// Returns the ingredient with this name, creating it if needed.
    pub async fn ensure_ingredient(&self, name: &str) -> Result<Ingredient> {
        if let Some(existing) = self.find_ingredient_by_name(name).await? {
            return Ok(existing);
        }
        let ingredient = NewIngredient {
            id: Some(new_id()),
            name: name.trim().to_string(),
            description: None,
        };
        validate_new_ingredient(&ingredient)?;
        self.client
            .from(Table::Ingredients.name())
            .insert(&ingredient)
            .single()
            .fetch()
            .await
            .with_context(|| format!("Failed to create ingredient '{}'", ingredient.name))
    }

    pub async fn add_recipe_ingredient(
        &self,
        recipe_id: &str,
        ingredient_name: &str,
        quantity: f64,
        unit: &str,
        notes: Option<String>,
    ) -> Result<IngredientLine> {
        let ingredient = self.ensure_ingredient(ingredient_name).await?;
        let line = NewRecipeIngredient {
            id: Some(new_id()),
            recipe_id: recipe_id.to_string(),
            ingredient_id: ingredient.id.clone(),
            quantity,
            unit: unit.trim().to_string(),
            notes,
        };
        validate_new_recipe_ingredient(&line)?;

        let created: RecipeIngredient = self
            .client
            .from(Table::RecipeIngredients.name())
            .insert(&line)
            .single()
            .fetch()
            .await
            .with_context(|| {
                format!("Failed to add '{}' to recipe '{recipe_id}'", ingredient.name)
            })?;

        Ok(IngredientLine {
            id: created.id,
            ingredient_id: created.ingredient_id,
            name: ingredient.name,
            quantity: created.quantity,
            unit: created.unit,
            notes: created.notes,
        })
    }

    // --- Iterations ---

    /// Iterations of a recipe, latest version first.
    pub async fn list_iterations(&self, recipe_id: &str) -> Result<Vec<RecipeIteration>> {
        self.client
            .from(Table::RecipeIterations.name())
            .select("*")
            .eq("recipe_id", recipe_id)
            .order("version_number", false)
            .fetch()
            .await
            .with_context(|| format!("Failed to load iterations of recipe '{recipe_id}'"))
    }

    /// Records a new iteration as the version after the recipe's latest. An
    /// explicit version number must be exactly that next version.
    pub async fn record_iteration(&self, iteration: &NewRecipeIteration) -> Result<RecipeIteration> {
        validate_new_iteration(iteration)?;
        let mut iteration = iteration.clone();
        iteration.id.get_or_insert_with(new_id);

        let existing = self.list_iterations(&iteration.recipe_id).await?;
        let next = existing.iter().map(|i| i.version_number).max().unwrap_or(0) + 1;
        match iteration.version_number {
            Some(v) if v < next => bail!(
                "Recipe '{}' already has version {v} (next is {next})",
                iteration.recipe_id
            ),
            Some(v) if v > next => bail!(
                "Version {v} would skip ahead; recipe '{}' is at version {}",
                iteration.recipe_id,
                next - 1
            ),
            _ => {}
        }
        iteration.version_number = Some(next);

        self.client
            .from(Table::RecipeIterations.name())
            .insert(&iteration)
            .single()
            .fetch()
            .await
            .with_context(|| {
                format!("Failed to record iteration of recipe '{}'", iteration.recipe_id)
            })
    }
}
