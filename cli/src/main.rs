mod commands;
mod config;
mod gemini;
mod remote;

use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{
    PlanInput, build_operation, cmd_plan, cmd_plan_delete, cmd_plans, cmd_queue_clear,
    cmd_queue_drain, cmd_queue_push, cmd_queue_show, cmd_sync,
};
use crate::config::Config;
use crate::gemini::GeminiClient;
use crate::remote::{OfflineRemote, RestRemoteStore};
use nourish_core::queue::{OfflineQueue, QueueOptions, RemoteStore};
use nourish_core::resolver::{CalorieResolver, GenerativeProvider};
use nourish_core::service::PlanService;
use nourish_core::storage::LocalStore;

#[derive(Parser)]
#[command(
    name = "nourish",
    version,
    about = "A local-first calorie planner with an offline write queue"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work out BMR, TDEE, a daily calorie goal and a macro split
    Plan {
        /// Age in years (13-120)
        #[arg(long)]
        age: u32,
        /// male, female or other
        #[arg(long)]
        gender: String,
        /// Height in cm (100-250)
        #[arg(long)]
        height: f64,
        /// Current weight in kg (30-300)
        #[arg(long)]
        weight: f64,
        /// Target weight in kg (30-300)
        #[arg(long)]
        target: f64,
        /// sedentary, lightly_active, moderately_active, very_active, extremely_active
        #[arg(short, long, default_value = "sedentary")]
        activity: String,
        /// Free-form goal tag, repeatable (e.g. --goal "build muscle")
        #[arg(long = "goal")]
        goals: Vec<String>,
        /// Weekly change in kg, negative to lose (default: 0.5 toward target)
        #[arg(long, allow_hyphen_values = true)]
        weekly: Option<f64>,
        /// Store the plan and sync it to the remote store
        #[arg(long)]
        save: bool,
        /// Skip the generative model and use the formula only
        #[arg(long)]
        manual: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List saved plans, newest first
    Plans {
        /// Number of plans to show
        #[arg(short, long, default_value = "10")]
        limit: i64,
        /// Delete the plan with this ID instead of listing
        #[arg(long)]
        delete: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or manage the offline write queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Replay the queue periodically until Ctrl-C
    Sync {
        /// Seconds between passes (default: NOURISH_DRAIN_INTERVAL_SECS or 30)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Show pending operations and given-up entries
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replay pending operations once
    Drain {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Discard every queued operation
    Clear {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue a raw mutation against a remote table
    Push {
        /// insert, update or delete
        kind: String,
        /// Remote table name
        target: String,
        /// JSON record (insert) or partial update (update)
        payload: Option<String>,
        /// Record ID for update and delete
        #[arg(long)]
        id: Option<String>,
        /// Try the remote store right away instead of only queueing
        #[arg(long)]
        now: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nourish=warn,nourish_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    tracing::debug!(data_dir = %config.data_dir.display(), "loaded configuration");
    let store = Arc::new(LocalStore::open(&config.db_path)?);

    let remote: Arc<dyn RemoteStore> = match &config.remote {
        Some(remote) => Arc::new(RestRemoteStore::new(remote)?),
        None => {
            tracing::debug!("no remote store configured, writes stay queued");
            Arc::new(OfflineRemote)
        }
    };
    let queue = Arc::new(OfflineQueue::load(
        store.clone(),
        remote,
        QueueOptions {
            max_attempts: config.max_attempts,
            ..QueueOptions::default()
        },
    ));

    match cli.command {
        Commands::Plan {
            age,
            gender,
            height,
            weight,
            target,
            activity,
            goals,
            weekly,
            save,
            manual,
            json,
        } => {
            let provider: Option<Arc<dyn GenerativeProvider>> = match (&config.ai, manual) {
                (Some(ai), false) => Some(Arc::new(GeminiClient::new(ai)?)),
                _ => None,
            };
            let service = PlanService::new(store, queue, CalorieResolver::new(provider));
            let input = PlanInput {
                age,
                gender,
                height_cm: height,
                current_weight_kg: weight,
                target_weight_kg: target,
                activity,
                goals,
                weekly_goal_kg: weekly,
            };
            cmd_plan(&service, input, save, json).await
        }
        Commands::Plans {
            limit,
            delete,
            json,
        } => {
            let service = PlanService::new(store, queue, CalorieResolver::manual_only());
            match delete {
                Some(id) => cmd_plan_delete(&service, id, json).await,
                None => cmd_plans(&service, limit, json),
            }
        }
        Commands::Queue { command } => match command {
            QueueCommands::Show { json } => cmd_queue_show(&queue, json),
            QueueCommands::Drain { json } => cmd_queue_drain(&queue, json).await,
            QueueCommands::Clear { json } => cmd_queue_clear(&queue, json),
            QueueCommands::Push {
                kind,
                target,
                payload,
                id,
                now,
                json,
            } => {
                let op = build_operation(&kind, &target, payload.as_deref(), id.as_deref())?;
                cmd_queue_push(&queue, op, now, json).await
            }
        },
        Commands::Sync { interval } => {
            let interval = match interval {
                Some(0) => anyhow::bail!("--interval must be greater than 0"),
                Some(secs) => std::time::Duration::from_secs(secs),
                None => config.drain_interval,
            };
            cmd_sync(&queue, interval).await
        }
    }
}
