mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    cmd_plan_copy, cmd_plan_group, cmd_plan_place, cmd_plan_show, cmd_recipe_delete,
    cmd_recipe_import, cmd_recipe_list, cmd_recipe_show, cmd_shop, cmd_today, cmd_user_create,
    cmd_user_rotate_token,
};
use crate::config::Config;
use mealflo_core::service::MealPlanService;

#[derive(Parser)]
#[command(
    name = "mealflo",
    version,
    about = "Plan a week of meals and get the shopping list for it"
)]
struct Cli {
    /// Path to the database file (default: platform data directory)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
    /// User to act as for recipe, plan and shopping commands
    #[arg(short, long, global = true, default_value = server::DEV_USERNAME)]
    user: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable token authentication; requests without a token act as the dev user
        #[arg(long)]
        no_auth: bool,
    },
    /// Manage users and their API tokens
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Weekly meal plans
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Show the shopping list for a week
    Shop {
        /// Week start date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        week_start: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the meal groups planned for a day
    Today {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user and print their API token
    Create {
        username: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Issue a new API token, invalidating the old one
    RotateToken {
        username: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// List recipes, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe with its ingredients
    Show {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import recipes from a CSV file (one recipe per distinct title)
    Import {
        /// Path to the CSV file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe (also removes it from meal plans)
    Delete {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Show the week starting on a date
    Show {
        /// Week start date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        week_start: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Copy a week's meal groups and recipes to another week
    Copy {
        /// Source week start date
        from: String,
        /// Target week start date
        to: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a meal group to a day, creating the week if needed
    Group {
        /// Week start date
        week_start: String,
        /// Day of the group
        day: String,
        /// Group name (e.g. "Dinner")
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Place a recipe in a meal group
    Place {
        /// Meal group ID
        group_id: i64,
        /// Recipe ID
        recipe_id: i64,
        /// Planned servings (default: the recipe's servings)
        #[arg(short, long)]
        servings: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.db)?;
    let svc = MealPlanService::new(&config.db_path)?;
    tracing::debug!(db = %config.db_path.display(), "opened database");

    match cli.command {
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => server::start_server(svc, port, &bind, no_auth).await,
        Commands::User { command } => match command {
            UserCommands::Create { username, json } => cmd_user_create(&svc, &username, json),
            UserCommands::RotateToken { username, json } => {
                cmd_user_rotate_token(&svc, &username, json)
            }
        },
        Commands::Recipe { command } => {
            let user = svc.ensure_user(&cli.user)?;
            match command {
                RecipeCommands::List { json } => cmd_recipe_list(&svc, &user, json),
                RecipeCommands::Show { id, json } => cmd_recipe_show(&svc, &user, id, json),
                RecipeCommands::Import { file, json } => {
                    cmd_recipe_import(&svc, &user, &file, json)
                }
                RecipeCommands::Delete { id, json } => cmd_recipe_delete(&svc, &user, id, json),
            }
        }
        Commands::Plan { command } => {
            let user = svc.ensure_user(&cli.user)?;
            match command {
                PlanCommands::Show { week_start, json } => {
                    cmd_plan_show(&svc, &user, week_start, json)
                }
                PlanCommands::Copy { from, to, json } => cmd_plan_copy(&svc, &user, from, to, json),
                PlanCommands::Group {
                    week_start,
                    day,
                    name,
                    json,
                } => cmd_plan_group(&svc, &user, week_start, day, name, json),
                PlanCommands::Place {
                    group_id,
                    recipe_id,
                    servings,
                    json,
                } => cmd_plan_place(&svc, &user, group_id, recipe_id, servings, json),
            }
        }
        Commands::Shop { week_start, json } => {
            let user = svc.ensure_user(&cli.user)?;
            cmd_shop(&svc, &user, week_start, json)
        }
        Commands::Today { date, json } => {
            let user = svc.ensure_user(&cli.user)?;
            cmd_today(&svc, &user, date, json)
        }
    }
}
