use anyhow::Result;
use std::process;
use tabled::{Table, Tabled, settings::Style};

use larder_core::RecipeService;

use super::helpers::{format_date, truncate};

pub(crate) async fn cmd_ingredient_list(
    svc: &RecipeService,
    search: Option<&str>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct IngredientRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Description")]
        description: String,
        #[tabled(rename = "Added")]
        added: String,
    }

    let ingredients = svc.list_ingredients(search).await?;
    if ingredients.is_empty() {
        if json {
            println!("[]");
        } else {
            match search {
                Some(term) => eprintln!("No ingredients matching '{term}'"),
                None => eprintln!("No ingredients found"),
            }
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&ingredients)?);
        return Ok(());
    }

    let rows: Vec<IngredientRow> = ingredients
        .iter()
        .map(|i| IngredientRow {
            id: i.id.clone(),
            name: truncate(&i.name, 30),
            description: truncate(i.description.as_deref().unwrap_or(""), 40),
            added: format_date(&i.created_at),
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
    Ok(())
}

/// Adds an ingredient, or reports the existing one with the same name.
pub(crate) async fn cmd_ingredient_add(svc: &RecipeService, name: &str, json: bool) -> Result<()> {
    let existed = svc.find_ingredient_by_name(name).await?.is_some();
    let ingredient = svc.ensure_ingredient(name).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ingredient)?);
    } else if existed {
        println!(
            "Ingredient already exists: {} (id: {})",
            ingredient.name, ingredient.id
        );
    } else {
        println!("Added ingredient: {} (id: {})", ingredient.name, ingredient.id);
    }
    Ok(())
}
