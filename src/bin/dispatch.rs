//! dispatch CLI: run the engine against a demo scenario or a TOML plan.

use clap::{Parser, Subcommand};
use dispatch_rs::config::Config;
use dispatch_rs::engine::{Engine, Handle};
use dispatch_rs::model::{EventStatus, NewEvent};
use dispatch_rs::plan::Plan;
use dispatch_rs::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Parser)]
#[command(name = "dispatch", about = "Idle and timed event dispatch engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk through ordering, cancellation, and in-flight removal
    Demo,
    /// Schedule every event in a plan file, wait, then shut down
    Run {
        /// TOML plan with [[event]] entries
        plan: PathBuf,
        /// How long to let the engine run before shutting down
        #[arg(long, default_value_t = 3000)]
        wait_ms: u64,
        /// Print the engine event stream as JSON lines instead of messages
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "dispatch".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let engine = Engine::new(config.engine_config())?;

    let outcome = match cli.command {
        Command::Demo => cmd_demo(&engine).await,
        Command::Run {
            plan,
            wait_ms,
            json,
        } => cmd_run(engine, plan, wait_ms, json).await,
    };
    guard.force_flush();
    outcome
}

/// Sleep, but let ctrl-c cut it short.
async fn pause(duration: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
        }
    }
}

fn announce(origin: Instant, label: &'static str, work: Duration) -> NewEvent {
    NewEvent::new(move || {
        println!("[{:>6.3}s] {label}", origin.elapsed().as_secs_f64());
        if !work.is_zero() {
            std::thread::sleep(work);
        }
        EventStatus::OneShot
    })
    .tag(label)
}

async fn cmd_demo(engine: &Engine) -> anyhow::Result<()> {
    let origin = Instant::now();
    let second = Duration::from_secs(1);
    let h: Handle = engine.handle();

    println!("timed event fires after one second");
    h.timed_add_after(announce(origin, "t1", Duration::ZERO), second);
    pause(2 * second).await;

    println!("later-added, earlier-deadline event fires first");
    let now = Instant::now();
    h.timed_add(announce(origin, "t2", Duration::ZERO), now + 2 * second);
    h.timed_add(announce(origin, "t3", Duration::ZERO), now + second);
    pause(3 * second).await;

    println!("event removed before its deadline never fires");
    h.timed_add_after(announce(origin, "t4", Duration::ZERO), second);
    if let Some(removed) = h.remove_by_tag("t4") {
        println!("removed {} from the {} queue", removed.id, removed.queue);
    }
    pause(2 * second).await;

    println!("running event cannot be removed");
    h.idle_add(announce(origin, "t5", second));
    pause(Duration::from_millis(200)).await;
    h.idle_add(announce(origin, "t6", Duration::ZERO));
    match h.remove_by_tag("t5") {
        Some(removed) => println!("removed {}", removed.id),
        None => println!("t5 already running, nothing removed"),
    }
    pause(2 * second).await;

    Ok(())
}

async fn cmd_run(engine: Engine, path: PathBuf, wait_ms: u64, json: bool) -> anyhow::Result<()> {
    let plan = Plan::load(&path)?;
    let events = engine.subscribe();
    let (tx, messages) = mpsc::channel();

    let scheduled = plan.schedule(&engine.handle(), &tx);
    drop(tx);
    info!(
        scheduled = scheduled.len(),
        cancelled = scheduled.iter().filter(|s| s.cancelled).count(),
        "plan scheduled"
    );

    pause(Duration::from_millis(wait_ms)).await;
    info!(pending = engine.pending().total(), "shutting down");
    let report = engine.shutdown();

    if json {
        for event in events.try_iter() {
            println!("{}", serde_json::to_string(&event)?);
        }
    } else {
        for message in messages.try_iter() {
            println!("{message}");
        }
        println!(
            "\ndiscarded: {} idle, {} timed",
            report.discarded_idle, report.discarded_timed
        );
    }
    Ok(())
}
