mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{
    cmd_ingredient_add, cmd_ingredient_list, cmd_iteration_add, cmd_iteration_list,
    cmd_recipe_add_ingredient, cmd_recipe_create, cmd_recipe_delete, cmd_recipe_list,
    cmd_recipe_show, cmd_status,
};
use crate::config::Config;
use larder_core::{ClassifiedError, Client, RecipeService};

#[derive(Parser)]
#[command(
    name = "larder",
    version,
    about = "Recipes, ingredients and iterations, online or offline"
)]
struct Cli {
    #[command(flatten)]
    config: Config,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage recipes
    Recipe {
        #[command(subcommand)]
        action: RecipeAction,
    },
    /// Manage the ingredient catalogue
    Ingredient {
        #[command(subcommand)]
        action: IngredientAction,
    },
    /// Track versions of a recipe
    Iteration {
        #[command(subcommand)]
        action: IterationAction,
    },
    /// Check which data source is answering
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeAction {
    /// List all recipes
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe with its ingredients
    Show {
        /// Recipe ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a new recipe
    Create {
        /// Recipe title
        title: String,
        /// Short description
        #[arg(short, long)]
        description: Option<String>,
        /// Cooking instructions
        #[arg(short, long)]
        instructions: Option<String>,
        /// Free-form notes
        #[arg(short, long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe with its ingredient lines and iterations
    Delete {
        /// Recipe ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an ingredient to a recipe, creating the ingredient if needed
    AddIngredient {
        /// Recipe ID
        id: String,
        /// Ingredient name
        ingredient: String,
        /// Quantity with unit (e.g. "200g", "2 tbsp", "3")
        quantity: String,
        /// Preparation notes (e.g. "finely chopped")
        #[arg(short, long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum IngredientAction {
    /// List ingredients
    List {
        /// Only names containing this text
        #[arg(short, long)]
        search: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an ingredient (no-op if the name exists)
    Add {
        /// Ingredient name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum IterationAction {
    /// List iterations of a recipe, latest first
    List {
        /// Recipe ID
        recipe_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record a new iteration
    Add {
        /// Recipe ID
        recipe_id: String,
        /// What changed in this version
        title: String,
        /// Expected version number, checked against latest + 1 (default: latest + 1)
        #[arg(long)]
        version: Option<i64>,
        /// Longer description
        #[arg(short, long)]
        description: Option<String>,
        /// Tasting notes
        #[arg(short, long)]
        notes: Option<String>,
        /// Metric as name=value (repeatable, e.g. --metric rating=4.5)
        #[arg(short, long = "metric")]
        metrics: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "larder=debug,larder_core=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().flatten_event(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        if let Some(classified) = e.downcast_ref::<ClassifiedError>() {
            eprintln!("{}", classified.user_message());
        }
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let client = Client::new(cli.config.client_config()?)?;
    debug!(offline = client.is_offline(), "client ready");
    let svc = RecipeService::new(client.clone());

    match cli.command {
        Commands::Recipe { action } => match action {
            RecipeAction::List { json } => cmd_recipe_list(&svc, json).await,
            RecipeAction::Show { id, json } => cmd_recipe_show(&svc, &id, json).await,
            RecipeAction::Create {
                title,
                description,
                instructions,
                notes,
                json,
            } => cmd_recipe_create(&svc, &title, description, instructions, notes, json).await,
            RecipeAction::Delete { id, json } => cmd_recipe_delete(&svc, &id, json).await,
            RecipeAction::AddIngredient {
                id,
                ingredient,
                quantity,
                notes,
                json,
            } => cmd_recipe_add_ingredient(&svc, &id, &ingredient, &quantity, notes, json).await,
        },
        Commands::Ingredient { action } => match action {
            IngredientAction::List { search, json } => {
                cmd_ingredient_list(&svc, search.as_deref(), json).await
            }
            IngredientAction::Add { name, json } => cmd_ingredient_add(&svc, &name, json).await,
        },
        Commands::Iteration { action } => match action {
            IterationAction::List { recipe_id, json } => {
                cmd_iteration_list(&svc, &recipe_id, json).await
            }
            IterationAction::Add {
                recipe_id,
                title,
                version,
                description,
                notes,
                metrics,
                json,
            } => {
                cmd_iteration_add(
                    &svc,
                    &recipe_id,
                    &title,
                    version,
                    description,
                    notes,
                    &metrics,
                    json,
                )
                .await
            }
        },
        Commands::Status { json } => return cmd_status(&client, json).await,
    }?;

    warn_if_degraded(&client);
    Ok(())
}

/// Tells the user when results came from the offline dataset because the
/// backend could not be used.
fn warn_if_degraded(client: &Client) {
    let status = client.status();
    debug!(
        remote = status.remote_served,
        fallback = status.fallback_served,
        cache = status.cache_hits,
        failed = status.failed,
        "command finished"
    );
    if let Some(d) = status.last_degradation {
        eprintln!(
            "Note: backend unavailable for {} ({}); showing offline data. Changes are not saved remotely.",
            d.table,
            d.kind.as_str()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_summary_logs_under_subscriber() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let client = Client::offline();
            assert!(client.status().last_degradation.is_none());
            warn_if_degraded(&client);
        });
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_iteration_add_metrics() {
        let cli = Cli::try_parse_from([
            "larder",
            "--offline",
            "iteration",
            "add",
            "r1",
            "Less salt",
            "-m",
            "rating=4.5",
            "--metric",
            "salt_g=6",
        ])
        .unwrap();
        assert!(cli.config.prefer_fallback);
        match cli.command {
            Commands::Iteration {
                action: IterationAction::Add { metrics, .. },
            } => assert_eq!(metrics, ["rating=4.5", "salt_g=6"]),
            _ => panic!("expected iteration add"),
        }
    }
}
