//! Regatta Host - local race host
//!
//! Starts one client on an in-process race bus. Once it wins the host
//! election it joins bot boats and arms the countdown, then logs the
//! leaderboard until shut down.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use regatta_host::bus::RaceBus;
use regatta_host::config::Config;
use regatta_host::election::{ElectionNode, NodeHandle, Role};
use regatta_host::host::{ControlCommand, LoggingHooks, RaceRegistry};
use regatta_host::race::RaceState;
use regatta_host::util::time::LoopClock;

/// Leaderboard log period
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    info!("Starting Regatta Host");
    info!(
        client_id = %config.election.client_id,
        race_id = %config.race_id,
        tick_rate = config.race.tick_rate,
        bots = config.bots,
        "Local client"
    );

    let registry = Arc::new(RaceRegistry::new());
    let (node, handle) = ElectionNode::new(
        config.election.clone(),
        config.race_id,
        config.race.clone(),
        RaceBus::default(),
        LoopClock::new(),
        Arc::new(LoggingHooks),
        registry.clone(),
    );
    let node_task = tokio::spawn(node.run());

    let mut status = handle.watch_status();
    let mut role = Role::Unassigned;
    let mut report = tokio::time::interval(REPORT_INTERVAL);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().role;
                if current == Role::Host && role != Role::Host {
                    set_up_race(&handle, config.bots, config.race.countdown_secs).await;
                }
                role = current;
            }
            _ = report.tick() => {
                if let Some(frame) = handle.last_frame() {
                    log_leaderboard(&frame.state, &registry);
                }
            }
        }
    }

    handle.leave();
    node_task.await?;

    if let Some(frame) = handle.last_frame() {
        print_standings(&frame.state);
    }
    info!("Shutdown complete");
    Ok(())
}

/// Fill a fresh race with bots and arm the countdown
async fn set_up_race(handle: &NodeHandle, bots: usize, countdown_secs: f32) {
    if handle.last_frame().is_some_and(|f| !f.state.boats.is_empty()) {
        info!("Resumed a race in progress");
        return;
    }
    for i in 0..bots {
        let join = ControlCommand::JoinBoat {
            id: Uuid::new_v4(),
            name: format!("Bot {}", i + 1),
            bot: true,
        };
        if let Err(e) = handle.control(join).await {
            warn!(error = %e, "Failed to add bot");
            return;
        }
    }
    match handle
        .control(ControlCommand::ArmCountdown {
            seconds: countdown_secs,
        })
        .await
    {
        Ok(_) => info!(seconds = countdown_secs, "Race armed"),
        Err(e) => warn!(error = %e, "Failed to arm countdown"),
    }
}

fn log_leaderboard(state: &RaceState, registry: &RaceRegistry) {
    let board: Vec<String> = state
        .leaderboard
        .iter()
        .filter_map(|id| state.boats.get(id))
        .map(|b| format!("{} lap {} leg {}", b.name, b.lap, b.next_mark_index))
        .collect();
    info!(
        race_id = %state.race_id,
        phase = ?state.phase,
        t = state.t,
        hosted = registry.active_races(),
        boats = registry.total_boats(),
        leaderboard = %board.join(", "),
        "Race status"
    );
}

fn print_standings(state: &RaceState) {
    println!("Final standings ({:?} at t={:.1}s)", state.phase, state.t);
    for (place, id) in state.leaderboard.iter().enumerate() {
        let Some(boat) = state.boats.get(id) else {
            continue;
        };
        match boat.finish_time {
            Some(t) => println!("{:>3}. {:<12} {:>8.1}s  penalties {}", place + 1, boat.name, t, boat.penalties),
            None => println!("{:>3}. {:<12} {:>9}  penalties {}", place + 1, boat.name, "DNF", boat.penalties),
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}
