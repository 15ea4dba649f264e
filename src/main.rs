use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tempvoice::config::Settings;
use tempvoice::db::Database;
use tempvoice::models::{GuildId, GuildPolicy, ResourceId};
use tempvoice::store::PersistentStore;

#[derive(Parser)]
#[command(name = "tempvoice")]
#[command(about = "Manage temporary voice channel policies and state")]
struct Cli {
    /// Database file, overriding config and TEMPVOICE_DB_PATH
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    Migrate,
    /// Inspect or change guild policies
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },
    /// List the temporary channels recorded for a guild
    Resources { guild_id: GuildId },
    /// List the access grants recorded for a channel
    Grants { resource_id: ResourceId },
}

#[derive(Subcommand)]
enum PolicyCommand {
    /// Print a guild's policy
    Show { guild_id: GuildId },
    /// Print every configured guild's policy
    List,
    /// Create or update a guild's policy
    Set {
        guild_id: GuildId,

        /// Channel whose join creates a temporary channel
        #[arg(long)]
        creator: Option<ResourceId>,

        /// Category to create channels under
        #[arg(long)]
        container: Option<ResourceId>,

        /// Name template, `{username}` and `{user}` are substituted
        #[arg(long)]
        template: Option<String>,

        /// Member limit, 0 for unlimited
        #[arg(long)]
        capacity: Option<u32>,

        /// Audio bitrate in bits per second
        #[arg(long)]
        quality: Option<u32>,

        /// Create a paired text channel with each voice channel
        #[arg(long)]
        secondary: Option<bool>,

        /// Whether owners may edit their channels
        #[arg(long)]
        editable: Option<bool>,
    },
}

/// Logs go to stderr so stdout carries only JSON output.
fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct GuildPolicyEntry {
    guild_id: GuildId,
    #[serde(flatten)]
    policy: GuildPolicy,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (settings, skipped) = Settings::load();
    init_tracing(settings.log_filter());
    if let Some(e) = skipped {
        tracing::warn!("Ignoring config file: {:#}", e);
    }

    let path = match cli.db {
        Some(path) => path,
        None => settings.database_path()?,
    };
    let db = Database::open(path)?;
    db.migrate()?;

    match cli.command {
        Commands::Migrate => {
            tracing::info!("Database schema is up to date");
        }
        Commands::Policy { command } => match command {
            PolicyCommand::Show { guild_id } => {
                let policy = db
                    .get_guild_policy(guild_id)?
                    .with_context(|| format!("No policy configured for guild {}", guild_id))?;
                print_json(&policy)?;
            }
            PolicyCommand::List => {
                let entries: Vec<GuildPolicyEntry> = db
                    .list_guild_policies()?
                    .into_iter()
                    .map(|(guild_id, policy)| GuildPolicyEntry { guild_id, policy })
                    .collect();
                print_json(&entries)?;
            }
            PolicyCommand::Set {
                guild_id,
                creator,
                container,
                template,
                capacity,
                quality,
                secondary,
                editable,
            } => {
                let mut policy = match (db.get_guild_policy(guild_id)?, creator) {
                    (Some(existing), _) => existing,
                    (None, Some(creator)) => GuildPolicy::new(creator),
                    (None, None) => {
                        anyhow::bail!("Guild {} has no policy yet, --creator is required", guild_id)
                    }
                };

                if let Some(creator) = creator {
                    policy.creator_resource_id = creator;
                }
                if container.is_some() {
                    policy.container_id = container;
                }
                if let Some(template) = template {
                    policy.name_template = template;
                }
                if let Some(capacity) = capacity {
                    policy.default_capacity = capacity;
                }
                if let Some(quality) = quality {
                    policy.default_quality = quality;
                }
                if let Some(secondary) = secondary {
                    policy.auto_secondary_resource = secondary;
                }
                if let Some(editable) = editable {
                    policy.editable = editable;
                }

                db.set_guild_policy(guild_id, &policy)?;
                tracing::info!("Updated policy for guild {}", guild_id);
                print_json(&policy)?;
            }
        },
        Commands::Resources { guild_id } => {
            print_json(&db.list_temp_resources(guild_id)?)?;
        }
        Commands::Grants { resource_id } => {
            print_json(&db.list_permission_grants(resource_id)?)?;
        }
    }

    Ok(())
}
