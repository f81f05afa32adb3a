use clap::{Parser, Subcommand};
use rainbow_core::{RainbowConfig, SessionStatus, SessionView};
use rainbow_engine::{RoutineEngine, Turn};
use rainbow_intent::Intent;
use rainbow_memory::SqliteStore;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "rainbow", author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "rainbow.toml")]
    config: String,

    /// Path to the routine database (overrides config)
    #[arg(long)]
    db: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Talk to the companion as a child would
    Chat {
        #[arg(long)]
        child: i64,
    },
    /// Create a routine
    Create {
        #[arg(long)]
        child: i64,
        #[arg(long)]
        name: String,
        /// One activity, in order; repeat for more
        #[arg(long = "activity")]
        activities: Vec<String>,
        /// Schedule time, HH:MM
        #[arg(long)]
        at: Option<String>,
    },
    /// Append an activity to the end of a routine
    Add {
        #[arg(long)]
        routine: i64,
        #[arg(long)]
        activity: String,
    },
    /// Start (or resume) a routine session
    Start {
        #[arg(long)]
        routine: i64,
    },
    /// Mark one activity of a session complete
    Complete {
        #[arg(long)]
        session: i64,
        /// 0-based activity position
        #[arg(long)]
        activity: usize,
    },
    /// Show a session with its routine details
    Status {
        #[arg(long)]
        session: i64,
    },
    /// Repair one session, or every in-progress session
    Reconcile {
        #[arg(long)]
        session: Option<i64>,
    },
    /// Show a child's activity completion history
    Log {
        #[arg(long)]
        child: i64,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = RainbowConfig::load_or_default(&args.config);
    if let Some(db) = args.db {
        config.storage.db_path = db;
    }

    info!("Opening routine database at {}", config.storage.db_path);
    let store = Arc::new(SqliteStore::new(&config.storage.db_path).await?);
    let engine = RoutineEngine::new(store, &config.classifier);

    match args.command {
        Command::Chat { child } => chat(&engine, child).await?,
        Command::Create { child, name, activities, at } => {
            let routine = engine.create_routine(child, &name, &activities, at.as_deref()).await?;
            print_json(&routine)?;
        }
        Command::Add { routine, activity } => print_json(&engine.add_activity(routine, &activity).await?)?,
        Command::Start { routine } => print_json(&engine.start_session(routine).await?)?,
        Command::Complete { session, activity } => {
            print_json(&engine.complete_activity(session, activity).await?)?
        }
        Command::Status { session } => print_json(&engine.session_view(session).await?)?,
        Command::Reconcile { session: Some(session) } => print_json(&engine.reconcile(session).await?)?,
        Command::Reconcile { session: None } => print_json(&engine.reconcile_all().await?)?,
        Command::Log { child } => print_json(&engine.completion_log(child).await?)?,
    }
    Ok(())
}

async fn chat(engine: &RoutineEngine, child: i64) -> anyhow::Result<()> {
    println!("Rainbow is listening. Type 'quit' to exit.");
    print!("> ");
    io::stdout().flush()?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();

        if trimmed == "quit" || trimmed == "exit" {
            break;
        }
        if !trimmed.is_empty() {
            match engine.handle(trimmed, child).await {
                Ok(turn) => {
                    let view = match &turn.report {
                        Some(report) => match engine.session_view(report.snapshot.session_id).await {
                            Ok(view) => Some(view),
                            Err(e) => {
                                warn!("Could not load session {} for reply: {}", report.snapshot.session_id, e);
                                None
                            }
                        },
                        None => None,
                    };
                    println!("Rainbow: {}", reply(&turn, view.as_ref()));
                }
                Err(e) => {
                    error!("Failed to handle message: {}", e);
                    println!("[System Error]: {}", e);
                }
            }
        }
        print!("> ");
        io::stdout().flush()?;
    }
    Ok(())
}

fn reply(turn: &Turn, view: Option<&SessionView>) -> String {
    match (&turn.intent, view) {
        (Intent::CompleteActivity(done), Some(view)) => {
            if view.snapshot.status == SessionStatus::Completed {
                format!("You finished {} and the whole {}! Amazing!", done.activity_name, view.routine_name)
            } else {
                format!(
                    "Great job with {}! That's {}/{} done. Next up: {}.",
                    done.activity_name,
                    view.completed_count,
                    view.total_activities,
                    view.current_activity_name.as_deref().unwrap_or("nothing")
                )
            }
        }
        (Intent::StartRoutine { .. }, Some(view)) => match view.current_activity_name.as_deref() {
            Some(first) => format!("Let's do {}! First up: {}.", view.routine_name, first),
            None => format!("{} is already all done!", view.routine_name),
        },
        (Intent::StartRoutine { routine_hint, .. }, None) => {
            format!("I couldn't find a routine called '{}'. Which one should we start?", routine_hint)
        }
        (Intent::CreateRoutine(hint), _) => match &hint.name {
            Some(name) => format!("Let's make {}! Which steps should it have?", name),
            None => "Let's make a new routine! What should we call it?".to_string(),
        },
        (Intent::AchievementSharing, _) => "That's wonderful! I'm so proud of you!".to_string(),
        (Intent::CompleteActivity(done), None) => format!("Nice work on {}!", done.activity_name),
        (Intent::None, _) => "I'm listening! Tell me when you finish a step.".to_string(),
    }
}
