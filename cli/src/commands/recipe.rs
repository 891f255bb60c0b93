use anyhow::Result;
use std::process;
use tabled::{Table, Tabled, settings::Style};

use larder_core::RecipeService;
use larder_core::models::NewRecipe;

use super::helpers::{format_date, format_quantity, json_error, parse_quantity, truncate};

pub(crate) async fn cmd_recipe_list(svc: &RecipeService, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Description")]
        description: String,
        #[tabled(rename = "Created")]
        created: String,
    }

    let recipes = svc.list_recipes().await?;
    if recipes.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No recipes found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
        return Ok(());
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id.clone(),
            title: truncate(&r.title, 30),
            description: truncate(r.description.as_deref().unwrap_or(""), 40),
            created: format_date(&r.created_at),
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
    Ok(())
}

pub(crate) async fn cmd_recipe_show(svc: &RecipeService, recipe_id: &str, json: bool) -> Result<()> {
    let detail = svc.recipe_detail(recipe_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    let recipe = &detail.recipe;
    println!("=== {} ===", recipe.title);
    let created = format_date(&recipe.created_at);
    match detail.latest_version() {
        Some(v) => println!("  Created: {created}  |  Latest version: v{v}\n"),
        None => println!("  Created: {created}\n"),
    }
    if let Some(description) = &recipe.description {
        println!("  {description}\n");
    }

    println!("  INGREDIENTS:");
    if detail.ingredients.is_empty() {
        println!("    (none)");
    }
    for line in &detail.ingredients {
        let qty = format_quantity(line.quantity, &line.unit);
        match &line.notes {
            Some(notes) => println!("    {qty} {} ({notes})", line.name),
            None => println!("    {qty} {}", line.name),
        }
    }

    if let Some(instructions) = &recipe.instructions {
        println!("\n  INSTRUCTIONS:");
        for step in instructions.lines() {
            println!("    {step}");
        }
    }
    if let Some(notes) = &recipe.notes {
        println!("\n  NOTES:\n    {notes}");
    }
    Ok(())
}

pub(crate) async fn cmd_recipe_create(
    svc: &RecipeService,
    title: &str,
    description: Option<String>,
    instructions: Option<String>,
    notes: Option<String>,
    json: bool,
) -> Result<()> {
    let recipe = svc
        .create_recipe(&NewRecipe {
            title: title.to_string(),
            description,
            instructions,
            notes,
            ..NewRecipe::default()
        })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
    } else {
        let id = &recipe.id;
        println!("Created recipe: {title} (id: {id})");
        println!("Add ingredients with: larder recipe add-ingredient {id} <ingredient> <quantity>");
    }
    Ok(())
}

pub(crate) async fn cmd_recipe_delete(svc: &RecipeService, recipe_id: &str, json: bool) -> Result<()> {
    if svc.delete_recipe(recipe_id).await? {
        if json {
            println!("{}", serde_json::json!({ "deleted": recipe_id }));
        } else {
            println!("Deleted recipe {recipe_id}");
        }
    } else {
        let message = format!("Recipe '{recipe_id}' not found");
        if json {
            println!("{}", json_error(&message));
        } else {
            eprintln!("{message}");
        }
        process::exit(2);
    }
    Ok(())
}

pub(crate) async fn cmd_recipe_add_ingredient(
    svc: &RecipeService,
    recipe_id: &str,
    ingredient_name: &str,
    quantity_str: &str,
    notes: Option<String>,
    json: bool,
) -> Result<()> {
    // Fails with a not-found error before any ingredient is created.
    let recipe = svc.recipe_detail(recipe_id).await?.recipe;
    let (quantity, unit) = parse_quantity(quantity_str)?;

    let line = svc
        .add_recipe_ingredient(&recipe.id, ingredient_name, quantity, &unit, notes)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&line)?);
    } else {
        let qty = format_quantity(line.quantity, &line.unit);
        println!("Added {qty} of {} to {}", line.name, recipe.title);
    }
    Ok(())
}
