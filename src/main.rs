use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use match_authority::config::MatchConfig;
use match_authority::game::dedup::VictimHandle;
use match_authority::game::match_result::MatchOutcome;
use match_authority::game::state::PlayerId;
use match_authority::metrics::{self, Metrics};
use match_authority::net::local::LocalRoom;
use match_authority::net::match_session::start_tick_loop;
use match_authority::net::reconnect::ReconnectPolicy;
use match_authority::net::substrate::AgentEnvironment;
use match_authority::net::SessionNotification;

/// Drive one simulated round of combat: a random member scores a kill
/// against a live fill agent or another member.
fn simulate_combat(room: &mut LocalRoom, lives: &mut HashMap<PlayerId, u32>) {
    let mut rng = rand::thread_rng();
    let members = room.members().to_vec();
    let Some(actor) = members.choose(&mut rng).cloned() else {
        return;
    };

    let agents: Vec<_> = room
        .world()
        .agents()
        .into_iter()
        .filter(|a| a.alive)
        .collect();
    let others: Vec<_> = members.iter().filter(|m| **m != actor).cloned().collect();

    let hunt_agent = !agents.is_empty() && (others.is_empty() || rng.gen_bool(0.7));
    if hunt_agent {
        let Some(agent) = agents.choose(&mut rng) else {
            return;
        };
        room.world().kill_agent(agent.id);
        if let Some(session) = room.session_mut(&actor) {
            if let Err(e) = session.report_kill(actor.clone(), VictimHandle::FillAgent(agent.id)) {
                debug!(actor = %actor, "Kill report not applied: {}", e);
            }
            if let Err(e) = session.request_agent_respawn(agent.position) {
                debug!(actor = %actor, "Respawn request not applied: {}", e);
            }
        }
    } else if let Some(victim) = others.choose(&mut rng) {
        let life = lives.entry(victim.clone()).or_insert(0);
        let handle = VictimHandle::Player {
            identity: victim.clone(),
            life: *life,
        };
        *life += 1;
        if let Some(session) = room.session_mut(&actor) {
            if let Err(e) = session.report_kill(actor.clone(), handle) {
                debug!(actor = %actor, "Kill report not applied: {}", e);
            }
            if let Err(e) = session.report_elimination(victim.clone()) {
                debug!(victim = %victim, "Elimination not applied: {}", e);
            }
        }
    }
    room.pump();
}

async fn run_demo(
    room: Arc<RwLock<LocalRoom>>,
    config: MatchConfig,
    peers: Vec<PlayerId>,
) -> anyhow::Result<MatchOutcome> {
    let observer = peers
        .last()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("No peers configured"))?;
    let notifications = {
        let mut room = room.write().await;
        room.session_mut(&observer)
            .map(|s| s.subscribe())
            .ok_or_else(|| anyhow::anyhow!("Observer {} not in room", observer))?
    };

    // Let the first authority finish its recovery before starting
    tokio::time::sleep(config.recovery_settle + Duration::from_millis(200)).await;
    {
        let mut room = room.write().await;
        let authority = room
            .authority()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Room has no authority"))?;
        if let Some(session) = room.session_mut(&authority) {
            session.start_match()?;
        }
        room.pump();
    }

    let mut lives = HashMap::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut elapsed = 0.0f32;
    let mut handed_off = false;

    loop {
        ticker.tick().await;
        elapsed += 1.0;

        for notification in notifications.try_iter() {
            match notification {
                SessionNotification::Leaderboard(outcome) => return Ok(outcome),
                SessionNotification::Message(text) => info!("[chat] {}", text),
                SessionNotification::PhaseChanged(phase) => info!("Phase: {}", phase),
                SessionNotification::StatsChanged {
                    identity,
                    score,
                    kills,
                    is_local: true,
                } => info!("{}: score {} kills {}", identity, score, kills),
                _ => {}
            }
        }

        // Midway through, the authority drops out and reconnects. The
        // observer is the newest peer, so it is never the one dropped.
        if !handed_off && peers.len() > 1 && elapsed >= config.match_duration_secs / 2.0 {
            handed_off = true;
            let dropped = {
                let mut room = room.write().await;
                let dropped = room.authority().cloned();
                if let Some(dropped) = &dropped {
                    warn!("Authority {} lost connection", dropped);
                    room.leave(dropped)?;
                }
                dropped
            };

            if let Some(dropped) = dropped {
                let policy = ReconnectPolicy::from_config(&config);
                let result = policy
                    .run(
                        |attempt| async move { attempt >= 2 },
                        |status| {
                            if !status.is_empty() {
                                info!("{}: {}", dropped, status);
                            }
                        },
                    )
                    .await;
                match result {
                    Ok(_) => room.write().await.join(dropped)?,
                    Err(e) => error!("{}", e),
                }
            }
        }

        let mut room = room.write().await;
        simulate_combat(&mut room, &mut lives);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Match Authority v{}", env!("CARGO_PKG_VERSION"));

    let config = MatchConfig::load_or_default();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    info!(
        "Configuration loaded: total_slots={}, duration={}s, tick_rate={}Hz",
        config.total_slots, config.match_duration_secs, config.tick_rate
    );

    let metrics = Arc::new(Metrics::new());

    #[cfg(feature = "metrics_server")]
    {
        let metrics_port: u16 = std::env::var("METRICS_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(9090);
        let metrics_clone = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let peer_count: usize = std::env::var("PEER_COUNT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3);
    let peers: Vec<PlayerId> = (1..=peer_count.max(1))
        .map(|i| PlayerId::new(format!("Player{}", i)))
        .collect();

    let room = Arc::new(RwLock::new(LocalRoom::new(config.clone(), metrics.clone())));
    {
        let mut room = room.write().await;
        for peer in &peers {
            room.join(peer.clone())?;
        }
    }

    let tick_loop = start_tick_loop(room.clone(), config.tick_duration(), metrics.clone());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = run_demo(room.clone(), config, peers) => {
            match result {
                Ok(outcome) => info!("Final leaderboard:\n{}", outcome.render()),
                Err(e) => error!("Demo error: {}", e),
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    tick_loop.abort();
    info!("{}", metrics.to_json());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_reports_do_not_stop_combat() {
        let mut room = LocalRoom::new(MatchConfig::default(), Arc::new(Metrics::new()));
        room.join(PlayerId::from("A")).unwrap();
        room.join(PlayerId::from("B")).unwrap();
        room.run_for(Duration::from_millis(1100), Duration::from_millis(100));

        // Scoring is closed while waiting, so every kill report is refused
        let mut lives = HashMap::new();
        for _ in 0..5 {
            simulate_combat(&mut room, &mut lives);
        }

        assert_eq!(lives.values().sum::<u32>(), 5);
        for name in ["A", "B"] {
            let session = room.session(&PlayerId::from(name)).unwrap();
            assert_eq!(session.get_display_stats(&PlayerId::from("A")), (0, 0));
            assert_eq!(session.get_display_stats(&PlayerId::from("B")), (0, 0));
        }
    }
}
