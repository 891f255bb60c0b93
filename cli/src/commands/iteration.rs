use anyhow::Result;
use std::collections::BTreeMap;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::RecipeService;
use larder_core::models::NewRecipeIteration;

use super::helpers::{format_date, parse_metric, truncate};

fn format_metrics(metrics: &BTreeMap<String, f64>) -> String {
    metrics
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) async fn cmd_iteration_list(svc: &RecipeService, recipe_id: &str, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct IterationRow {
        #[tabled(rename = "Version")]
        version: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Metrics")]
        metrics: String,
        #[tabled(rename = "Created")]
        created: String,
    }

    let iterations = svc.list_iterations(recipe_id).await?;
    if iterations.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No iterations recorded for recipe {recipe_id}");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&iterations)?);
        return Ok(());
    }

    let rows: Vec<IterationRow> = iterations
        .iter()
        .map(|i| IterationRow {
            version: format!("v{}", i.version_number),
            title: truncate(&i.title, 30),
            metrics: truncate(&format_metrics(&i.metrics), 40),
            created: format_date(&i.created_at),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::first()).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn cmd_iteration_add(
    svc: &RecipeService,
    recipe_id: &str,
    title: &str,
    version: Option<i64>,
    description: Option<String>,
    notes: Option<String>,
    metrics: &[String],
    json: bool,
) -> Result<()> {
    let metrics = metrics
        .iter()
        .map(|m| parse_metric(m))
        .collect::<Result<BTreeMap<_, _>>>()?;

    // Surfaces a missing recipe as not-found rather than an empty history.
    svc.recipe_detail(recipe_id).await?;

    let iteration = svc
        .record_iteration(&NewRecipeIteration {
            recipe_id: recipe_id.to_string(),
            version_number: version,
            title: title.to_string(),
            description,
            notes,
            metrics,
            ..NewRecipeIteration::default()
        })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&iteration)?);
    } else {
        println!(
            "Recorded v{} of recipe {recipe_id}: {}",
            iteration.version_number, iteration.title
        );
        if !iteration.metrics.is_empty() {
            println!("  Metrics: {}", format_metrics(&iteration.metrics));
        }
    }
    Ok(())
}
