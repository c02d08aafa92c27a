//! Per-peer match session
//!
//! Every peer runs one `MatchSession`. Followers mirror what the authority
//! broadcasts and forward mutation requests; the authority applies them,
//! drives the lifecycle and population controller from its tick, and keeps
//! the replicated snapshot current for whoever is elected next.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::RwLock;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::authority::backup::LocalBackup;
use crate::authority::manager::{AuthorityError, AuthorityManager, AuthorityRole};
use crate::authority::recovery;
use crate::config::MatchConfig;
use crate::game::dedup::{DeduplicationFilter, EventFingerprint, VictimHandle};
use crate::game::ledger::{LedgerError, PlayerStatsLedger};
use crate::game::lifecycle::{LifecycleError, MatchLifecycle};
use crate::game::match_result::{determine_result, MatchOutcome};
use crate::game::message_log::MessageLog;
use crate::game::population::PopulationController;
use crate::game::schedule::{IntervalTimer, Scheduler};
use crate::game::state::{format_time, MatchClock, MatchPhase, PlayerId, PlayerRecord, Position};
use crate::metrics::Metrics;
use crate::net::properties::{self, keys, ReplicatedSnapshot, RoomOccupancy};
use crate::net::protocol::{MatchEvent, Target};
use crate::net::substrate::{AgentEnvironment, EventBus, PropertyStore};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Authority(#[from] AuthorityError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// What happened to an event or request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestRoute {
    /// Applied to canonical state on this peer
    Applied,
    /// Sent to the authority
    Forwarded,
    /// Held until the recovery procedure completes
    Deferred,
    /// Already applied once; discarded
    Absorbed,
    /// Broadcast folded into the local mirror
    Mirrored,
}

/// Notifications for UI and gameplay collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotification {
    StatsChanged {
        identity: PlayerId,
        score: u32,
        kills: u32,
        is_local: bool,
    },
    Message(String),
    PhaseChanged(MatchPhase),
    ClockChanged {
        remaining_seconds: f32,
        text: String,
    },
    /// Player and agent action handles must stop
    ActionsDisabled,
    Leaderboard(MatchOutcome),
}

/// Work deferred on the session's logical clock
#[derive(Debug, Clone, PartialEq)]
pub enum Continuation {
    RunRecovery { epoch: u64 },
    SpawnAgent,
    RespawnCheck { position: Position },
    FinalizeMatch,
    ShowLeaderboard,
}

impl Continuation {
    fn authority_only(&self) -> bool {
        !matches!(self, Continuation::ShowLeaderboard)
    }
}

pub struct MatchSession {
    local: PlayerId,
    config: MatchConfig,
    authority: AuthorityManager,
    ledger: PlayerStatsLedger,
    lifecycle: MatchLifecycle,
    population: PopulationController,
    messages: MessageLog,
    /// Stats as last broadcast by the authority
    display: BTreeMap<PlayerId, PlayerRecord>,
    /// Fingerprints the authority has announced as applied
    applied: DeduplicationFilter,
    roster: BTreeSet<PlayerId>,
    occupancy: RoomOccupancy,
    observed_phase: MatchPhase,
    outcome: Option<MatchOutcome>,
    bots_announced: bool,
    scheduler: Scheduler<Continuation>,
    resync_timer: IntervalTimer,
    safety_timer: IntervalTimer,
    clock_sync_timer: IntervalTimer,
    bus: Arc<dyn EventBus>,
    store: Arc<dyn PropertyStore>,
    env: Arc<dyn AgentEnvironment>,
    metrics: Arc<Metrics>,
    subscribers: Vec<Sender<SessionNotification>>,
}

impl MatchSession {
    pub fn new(
        local: PlayerId,
        config: MatchConfig,
        bus: Arc<dyn EventBus>,
        store: Arc<dyn PropertyStore>,
        env: Arc<dyn AgentEnvironment>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let mut roster = BTreeSet::new();
        roster.insert(local.clone());

        Self {
            authority: AuthorityManager::new(local.clone()),
            ledger: PlayerStatsLedger::new(config.kill_base_score, config.dedup_capacity),
            lifecycle: MatchLifecycle::new(),
            population: PopulationController::new(config.total_slots),
            messages: MessageLog::new(config.message_log_capacity),
            display: BTreeMap::new(),
            applied: DeduplicationFilter::new(config.dedup_capacity),
            roster,
            occupancy: RoomOccupancy::default(),
            observed_phase: MatchPhase::Waiting,
            outcome: None,
            bots_announced: false,
            scheduler: Scheduler::new(),
            resync_timer: IntervalTimer::new(config.resync_interval),
            safety_timer: IntervalTimer::new(config.population_safety_interval),
            clock_sync_timer: IntervalTimer::new(config.clock_sync_interval),
            local,
            config,
            bus,
            store,
            env,
            metrics,
            subscribers: Vec::new(),
        }
    }

    /// Receive every notification emitted from now on
    pub fn subscribe(&mut self) -> Receiver<SessionNotification> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    // === Accessors ===

    pub fn local(&self) -> &PlayerId {
        &self.local
    }

    pub fn role(&self) -> AuthorityRole {
        self.authority.role()
    }

    pub fn is_authority(&self) -> bool {
        self.authority.is_authority()
    }

    pub fn phase(&self) -> MatchPhase {
        self.lifecycle.phase()
    }

    pub fn clock(&self) -> MatchClock {
        self.lifecycle.clock()
    }

    pub fn ledger(&self) -> &PlayerStatsLedger {
        &self.ledger
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    pub fn room_occupancy(&self) -> RoomOccupancy {
        self.occupancy
    }

    pub fn roster(&self) -> &BTreeSet<PlayerId> {
        &self.roster
    }

    pub fn outcome(&self) -> Option<&MatchOutcome> {
        self.outcome.as_ref()
    }

    pub fn backup(&self) -> Option<&LocalBackup> {
        self.authority.backup()
    }

    pub fn pending_continuations(&self) -> usize {
        self.scheduler.len()
    }

    /// Score and kills as last broadcast by the authority
    pub fn get_display_stats(&self, identity: &PlayerId) -> (u32, u32) {
        self.display
            .get(identity)
            .map(|r| (r.score, r.kills))
            .unwrap_or((0, 0))
    }

    // === Substrate callbacks ===

    /// The local peer entered the room
    pub fn on_joined_room(&mut self, members: &[PlayerId], authority: Option<PlayerId>) {
        self.roster = members.iter().cloned().collect();
        self.roster.insert(self.local.clone());
        self.authority.set_current_authority(authority);

        if let Some(occupancy) = RoomOccupancy::read(self.store.as_ref()) {
            self.occupancy = occupancy;
        }

        // Seed the phase and clock mirror until the first broadcast lands
        if let Ok(Some(snapshot)) = ReplicatedSnapshot::read(self.store.as_ref()) {
            self.lifecycle.mirror_phase(snapshot.phase);
            self.lifecycle.mirror_clock(snapshot.clock.remaining_seconds);
            self.observed_phase = snapshot.phase;
        }

        info!(identity = %self.local, members = self.roster.len(), "Joined room");
    }

    pub fn on_peer_joined(&mut self, identity: PlayerId) {
        self.roster.insert(identity.clone());
        if !self.authority.is_authority() {
            return;
        }

        if let Ok(cap) = self.authority.capability() {
            self.ledger.ensure_player(cap, &identity);
        }
        if self.roster.len() > self.config.max_real_players {
            warn!(
                identity = %identity,
                real_players = self.roster.len(),
                max = self.config.max_real_players,
                "Room above max real players"
            );
        }

        self.post_message(format!("Player {} Joined Game.", identity));
        self.reconcile_population();
        // Catch the newcomer up on everything
        self.full_resync();
        self.publish_snapshot();
    }

    pub fn on_peer_left(&mut self, identity: PlayerId) {
        self.roster.remove(&identity);
        if !self.authority.is_authority() {
            return;
        }

        self.post_message(format!("Player {} Left Game.", identity));
        let adoption = recovery::adopt_orphans(self.env.as_ref(), &self.local);
        Metrics::add(&self.metrics.orphans_adopted, adoption.adopted.len());
        self.reconcile_population();
        self.publish_snapshot();
    }

    pub fn on_authority_elected(&mut self) {
        let epoch = self.authority.on_elected();
        Metrics::incr(&self.metrics.elections);
        self.scheduler
            .schedule_in(self.config.recovery_settle, Continuation::RunRecovery { epoch });
    }

    pub fn on_authority_demoted(&mut self, new_authority: PlayerId) {
        self.authority.on_demoted(new_authority);
        self.scheduler.retain(|task| !task.authority_only());
        self.population.clear_pending();
    }

    pub fn on_properties_changed(&mut self, changed: &[String]) {
        let occupancy_changed = changed.iter().any(|key| {
            key == keys::REAL_PLAYER_COUNT || key == keys::NPC_COUNT || key == keys::TOTAL_PLAYERS
        });
        if occupancy_changed {
            if let Some(occupancy) = RoomOccupancy::read(self.store.as_ref()) {
                self.occupancy = occupancy;
            }
        }
    }

    /// Deliver one event received from `from`
    pub fn handle_event(&mut self, from: &PlayerId, event: MatchEvent) -> Result<RequestRoute, SessionError> {
        Metrics::incr(&self.metrics.messages_received);

        if event.is_request() {
            return match self.authority.role() {
                AuthorityRole::Authority => self.apply_request(from, event),
                AuthorityRole::Migrating => {
                    self.authority.defer(from.clone(), event);
                    Metrics::incr(&self.metrics.requests_deferred);
                    Ok(RequestRoute::Deferred)
                }
                AuthorityRole::Follower => {
                    Metrics::incr(&self.metrics.requests_rejected);
                    debug!(from = %from, "Request reached a follower");
                    Err(AuthorityError::NotAuthority.into())
                }
            };
        }

        self.mirror(from, event);
        Ok(RequestRoute::Mirrored)
    }

    // === Requests from local collaborators ===

    pub fn report_kill(&mut self, actor: PlayerId, victim: VictimHandle) -> Result<RequestRoute, SessionError> {
        self.submit(MatchEvent::ReportKill { actor, victim })
    }

    pub fn report_score_delta(&mut self, actor: PlayerId, amount: i64) -> Result<RequestRoute, SessionError> {
        self.submit(MatchEvent::ReportScoreDelta {
            actor,
            amount,
            request_id: Uuid::new_v4(),
        })
    }

    pub fn report_elimination(&mut self, identity: PlayerId) -> Result<RequestRoute, SessionError> {
        self.submit(MatchEvent::ReportElimination { identity })
    }

    pub fn request_agent_respawn(&mut self, last_death_position: Position) -> Result<RequestRoute, SessionError> {
        self.submit(MatchEvent::RequestAgentRespawn { last_death_position })
    }

    fn submit(&mut self, event: MatchEvent) -> Result<RequestRoute, SessionError> {
        match self.authority.role() {
            AuthorityRole::Authority => {
                let local = self.local.clone();
                self.apply_request(&local, event)
            }
            AuthorityRole::Migrating => {
                self.authority.defer(self.local.clone(), event);
                Metrics::incr(&self.metrics.requests_deferred);
                Ok(RequestRoute::Deferred)
            }
            AuthorityRole::Follower => {
                self.send(Target::Authority, &event);
                Ok(RequestRoute::Forwarded)
            }
        }
    }

    // === Authority operations ===

    /// Waiting -> InProgress
    pub fn start_match(&mut self) -> Result<(), SessionError> {
        {
            let cap = self.authority.capability()?;
            self.lifecycle.start(cap, self.config.match_duration_secs)?;
        }
        info!(duration = self.config.match_duration_secs, "Match started");

        self.env.set_agents_enabled(true);
        self.send(
            Target::All,
            &MatchEvent::PhaseChanged {
                phase: MatchPhase::InProgress,
            },
        );
        self.broadcast_clock();
        self.reconcile_population();
        self.publish_snapshot();
        Ok(())
    }

    /// Ended -> Waiting. Returns the finished match's leaderboard.
    pub fn reset_match(&mut self) -> Result<Option<MatchOutcome>, SessionError> {
        {
            let cap = self.authority.capability()?;
            self.lifecycle.reset(cap)?;
            self.ledger.reset(cap);
            for member in &self.roster {
                self.ledger.ensure_player(cap, member);
            }
        }
        info!("Match reset");

        self.population.clear_pending();
        self.scheduler.retain(|task| !task.authority_only());
        self.bots_announced = false;
        let archived = self.outcome.take();

        self.send(Target::All, &MatchEvent::MatchReset);
        self.full_resync();
        self.publish_snapshot();
        Ok(archived)
    }

    fn apply_request(&mut self, from: &PlayerId, event: MatchEvent) -> Result<RequestRoute, SessionError> {
        match event {
            MatchEvent::ReportKill { actor, victim } => self.apply_kill(&actor, &victim),
            MatchEvent::ReportScoreDelta {
                actor,
                amount,
                request_id,
            } => self.apply_score_delta(&actor, amount, request_id),
            MatchEvent::ReportElimination { identity } => {
                let cap = self.authority.capability()?;
                self.ledger.record_death(cap, &identity);
                debug!(identity = %identity, "Streak reset on elimination");
                Ok(RequestRoute::Applied)
            }
            MatchEvent::RequestAgentRespawn { last_death_position } => {
                self.authority.capability()?;
                self.scheduler.schedule_in(
                    self.config.agent_respawn_delay,
                    Continuation::RespawnCheck {
                        position: last_death_position,
                    },
                );
                Ok(RequestRoute::Applied)
            }
            other => {
                debug!(from = %from, event = ?other, "Ignoring non-request event");
                Ok(RequestRoute::Absorbed)
            }
        }
    }

    fn apply_kill(&mut self, actor: &PlayerId, victim: &VictimHandle) -> Result<RequestRoute, SessionError> {
        let cap = self.authority.capability()?;
        if !self.lifecycle.phase().scoring_active() {
            Metrics::incr(&self.metrics.requests_rejected);
            return Err(LedgerError::ScoringClosed.into());
        }

        let outcome = match self.ledger.apply_kill(cap, actor, victim) {
            Ok(outcome) => outcome,
            Err(LedgerError::Duplicate) => {
                debug!(actor = %actor, victim = %victim.label(), "Duplicate kill absorbed");
                Metrics::incr(&self.metrics.duplicates_absorbed);
                return Ok(RequestRoute::Absorbed);
            }
            Err(e) => return Err(e.into()),
        };

        Metrics::incr(&self.metrics.kills_applied);
        debug!(
            actor = %actor,
            victim = %victim.label(),
            streak = outcome.streak,
            awarded = outcome.awarded,
            "Kill applied"
        );

        self.broadcast_stats(&outcome.actor, outcome.record);
        self.announce_applied(EventFingerprint::Kill {
            victim: victim.clone(),
            actor: actor.clone(),
        });
        self.post_message(format!("{} eliminated {}!", actor, victim.label()));
        if let Some(notification) = outcome.notification {
            self.post_message(format!("{} - {}!", actor, notification));
        }
        self.publish_stats();
        Ok(RequestRoute::Applied)
    }

    fn apply_score_delta(&mut self, actor: &PlayerId, amount: i64, request_id: Uuid) -> Result<RequestRoute, SessionError> {
        let cap = self.authority.capability()?;
        if !self.lifecycle.phase().scoring_active() {
            Metrics::incr(&self.metrics.requests_rejected);
            return Err(LedgerError::ScoringClosed.into());
        }

        let record = match self.ledger.apply_score_delta(cap, actor, amount, Some(request_id)) {
            Ok(record) => record,
            Err(LedgerError::Duplicate) => {
                debug!(actor = %actor, %request_id, "Duplicate score delta absorbed");
                Metrics::incr(&self.metrics.duplicates_absorbed);
                return Ok(RequestRoute::Absorbed);
            }
            Err(e) => return Err(e.into()),
        };

        Metrics::incr(&self.metrics.score_deltas_applied);
        self.broadcast_stats(actor, record);
        self.announce_applied(EventFingerprint::ScoreDelta {
            actor: actor.clone(),
            request_id,
        });
        self.publish_stats();
        Ok(RequestRoute::Applied)
    }

    // === Tick ===

    /// Advance the session by `dt`. Runs due continuations on every peer;
    /// the authority additionally drives the clock, resync and population.
    pub fn tick(&mut self, dt: Duration) {
        self.scheduler.advance(dt);
        for task in self.scheduler.drain_due() {
            self.run_continuation(task);
        }

        if !self.authority.is_authority() {
            return;
        }

        let transition = match self.authority.capability() {
            Ok(cap) => self.lifecycle.tick(cap, dt.as_secs_f32()),
            Err(_) => None,
        };
        if transition == Some(MatchPhase::Ending) {
            self.begin_ending();
        }

        if self.clock_sync_timer.tick(dt) && self.lifecycle.phase() == MatchPhase::InProgress {
            self.broadcast_clock();
        }
        if self.safety_timer.tick(dt) {
            self.reconcile_population();
        }
        if self.resync_timer.tick(dt) {
            self.full_resync();
            self.publish_snapshot();
        }

        self.capture_backup();
    }

    fn run_continuation(&mut self, task: Continuation) {
        match task {
            Continuation::RunRecovery { epoch } => {
                if self.authority.is_migrating() && self.authority.epoch() == epoch {
                    self.run_recovery();
                } else {
                    debug!(epoch, "Dropping stale recovery");
                }
            }
            Continuation::SpawnAgent => self.spawn_one(),
            Continuation::RespawnCheck { position } => {
                if self.authority.is_authority() {
                    debug!(x = position.x, y = position.y, z = position.z, "Respawn check");
                    self.reconcile_population();
                }
            }
            Continuation::FinalizeMatch => self.finalize_match(),
            Continuation::ShowLeaderboard => {
                let outcome = determine_result(&self.display);
                self.outcome = Some(outcome.clone());
                self.notify(SessionNotification::Leaderboard(outcome));
            }
        }
    }

    /// Recovery procedure, run once per election after the settle window
    fn run_recovery(&mut self) {
        let restored = recovery::restore_state(self.store.as_ref(), self.authority.backup());
        let source = restored.source;
        let phase = restored.phase;

        {
            let cap = match self.authority.migration_capability() {
                Ok(cap) => cap,
                Err(_) => return,
            };
            let mut ledger = PlayerStatsLedger::claim(
                restored.records,
                self.config.kill_base_score,
                self.applied.clone(),
            );
            ledger.restore_streaks(restored.streaks);
            for member in &self.roster {
                ledger.ensure_player(cap, member);
            }
            self.ledger = ledger;
            self.lifecycle = MatchLifecycle::from_parts(phase, restored.clock);
        }

        let adoption = recovery::adopt_orphans(self.env.as_ref(), &self.local);
        Metrics::add(&self.metrics.orphans_adopted, adoption.adopted.len());
        self.env
            .set_agents_enabled(!matches!(phase, MatchPhase::Ending | MatchPhase::Ended));

        self.reconcile_population();
        self.full_resync();
        self.publish_snapshot();

        self.authority.complete_recovery();
        self.resync_timer.reset();
        self.safety_timer.reset();
        self.clock_sync_timer.reset();
        Metrics::incr(&self.metrics.recoveries);
        info!(
            source = ?source,
            players = self.ledger.len(),
            adopted = adoption.adopted.len(),
            valid_agents = adoption.valid,
            phase = %phase,
            "Recovery finished"
        );

        for (from, event) in self.authority.take_deferred() {
            if let Err(e) = self.apply_request(&from, event) {
                debug!(from = %from, "Deferred request not applied: {}", e);
            }
        }

        match phase {
            MatchPhase::Ending => {
                self.scheduler
                    .schedule_in(self.config.ending_settle, Continuation::FinalizeMatch);
            }
            MatchPhase::Ended if self.outcome.is_none() => {
                self.outcome = Some(determine_result(self.ledger.get_all()));
            }
            _ => {}
        }
    }

    fn reconcile_population(&mut self) {
        let real_players = self.roster.len();
        let active = self.lifecycle.phase().population_active();
        let report = match self.authority.migration_capability() {
            Ok(cap) => self
                .population
                .reconcile(cap, self.env.as_ref(), real_players, active),
            Err(_) => return,
        };

        for i in 0..report.spawns_to_schedule {
            self.scheduler
                .schedule_in(self.config.inter_spawn_delay * i as u32, Continuation::SpawnAgent);
        }

        Metrics::add(&self.metrics.dead_agents_cleaned, report.cleaned_dead.len());
        Metrics::add(&self.metrics.agents_despawned, report.despawned.len());
        self.metrics
            .real_players
            .store(real_players as u64, std::sync::atomic::Ordering::Relaxed);
        self.metrics
            .fill_agents
            .store(report.alive as u64, std::sync::atomic::Ordering::Relaxed);
        self.metrics
            .fill_agent_target
            .store(report.target as u64, std::sync::atomic::Ordering::Relaxed);

        if report.changed() {
            debug!(
                real_players,
                alive = report.alive,
                target = report.target,
                cleaned = report.cleaned_dead.len(),
                despawned = report.despawned.len(),
                scheduled = report.spawns_to_schedule,
                "Population reconciled"
            );
        }

        self.publish_occupancy(RoomOccupancy::new(real_players as u32, report.target as u32));
    }

    fn spawn_one(&mut self) {
        let real_players = self.roster.len();
        let active = self.lifecycle.phase().population_active();
        let spawned = match self.authority.migration_capability() {
            Ok(cap) => self
                .population
                .try_spawn(cap, self.env.as_ref(), &self.local, real_players, active),
            Err(_) => None,
        };

        if spawned.is_some() {
            Metrics::incr(&self.metrics.agents_spawned);
            if !self.bots_announced {
                self.bots_announced = true;
                self.post_message("Bots are joining the battle!");
            }
        }
    }

    /// InProgress -> Ending, already applied to the lifecycle
    fn begin_ending(&mut self) {
        info!("Match clock expired");
        self.env.set_agents_enabled(false);
        self.scheduler.retain(|task| {
            !matches!(task, Continuation::SpawnAgent | Continuation::RespawnCheck { .. })
        });
        self.population.clear_pending();

        self.full_resync();
        self.publish_snapshot();
        self.scheduler
            .schedule_in(self.config.ending_settle, Continuation::FinalizeMatch);
    }

    /// Ending -> Ended
    fn finalize_match(&mut self) {
        let result = match self.authority.capability() {
            Ok(cap) => self.lifecycle.finalize(cap),
            Err(e) => {
                debug!("Skipping finalize: {}", e);
                return;
            }
        };
        if let Err(e) = result {
            warn!("Cannot finalize match: {}", e);
            return;
        }

        let outcome = determine_result(self.ledger.get_all());
        info!(winner = ?outcome.winner, total_kills = outcome.total_kills, "Match ended");

        self.send(
            Target::All,
            &MatchEvent::PhaseChanged {
                phase: MatchPhase::Ended,
            },
        );
        self.publish_snapshot();
        self.outcome = Some(outcome.clone());
        self.notify(SessionNotification::Leaderboard(outcome));
    }

    fn capture_backup(&mut self) {
        let positions = self
            .env
            .agents()
            .into_iter()
            .filter(|a| a.alive && a.owner.as_ref() == Some(&self.local))
            .map(|a| (a.id, a.position))
            .collect();
        let backup = LocalBackup::capture(
            &self.ledger,
            self.lifecycle.clock(),
            self.lifecycle.phase(),
            positions,
            self.scheduler.now(),
        );
        self.authority.capture_backup(backup);
    }

    // === Replication ===

    fn send(&self, target: Target, event: &MatchEvent) {
        self.bus.send(&self.local, target, event);
        Metrics::incr(&self.metrics.messages_sent);
    }

    fn broadcast_stats(&self, identity: &PlayerId, record: PlayerRecord) {
        self.send(
            Target::All,
            &MatchEvent::StatsUpdated {
                identity: identity.clone(),
                score: record.score,
                kills: record.kills,
            },
        );
    }

    fn announce_applied(&self, fingerprint: EventFingerprint) {
        self.send(Target::All, &MatchEvent::EventApplied { fingerprint });
    }

    fn broadcast_clock(&self) {
        let remaining_seconds = self.lifecycle.clock().remaining_seconds;
        self.send(Target::All, &MatchEvent::ClockSync { remaining_seconds });
        self.store.set(vec![(
            keys::GAME_TIME.to_string(),
            serde_json::json!(remaining_seconds),
        )]);
    }

    fn post_message(&self, text: impl Into<String>) {
        self.send(Target::All, &MatchEvent::ChatMessage { text: text.into() });
    }

    /// Re-broadcast clock, phase and every ledger entry
    fn full_resync(&self) {
        self.send(
            Target::All,
            &MatchEvent::ClockSync {
                remaining_seconds: self.lifecycle.clock().remaining_seconds,
            },
        );
        self.send(
            Target::All,
            &MatchEvent::PhaseChanged {
                phase: self.lifecycle.phase(),
            },
        );

        let mut records: Vec<_> = self.ledger.get_all().iter().collect();
        records.sort_by(|a, b| a.0.cmp(b.0));
        for (identity, record) in records {
            self.broadcast_stats(identity, *record);
        }
        Metrics::incr(&self.metrics.resyncs);
    }

    fn publish_stats(&self) {
        self.store.set(vec![(
            keys::PLAYER_STATS.to_string(),
            properties::player_stats_value(self.ledger.get_all()),
        )]);
    }

    fn publish_occupancy(&mut self, occupancy: RoomOccupancy) {
        self.store.set(occupancy.to_properties());
        if occupancy != self.occupancy {
            self.occupancy = occupancy;
            self.send(
                Target::Others,
                &MatchEvent::RosterCounts {
                    real_players: occupancy.real_players,
                    fill_agents: occupancy.fill_agents,
                },
            );
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = ReplicatedSnapshot {
            players: self
                .ledger
                .get_all()
                .iter()
                .map(|(id, record)| (id.clone(), *record))
                .collect(),
            clock: self.lifecycle.clock(),
            phase: self.lifecycle.phase(),
            occupancy: self.occupancy,
        };
        self.store.set(snapshot.to_properties());
    }

    // === Mirroring ===

    fn mirror(&mut self, from: &PlayerId, event: MatchEvent) {
        let from_authority = self
            .authority
            .current_authority()
            .map_or(true, |authority| authority == from);
        if !from_authority {
            debug!(from = %from, "Ignoring broadcast from a former authority");
            return;
        }
        let is_authority = self.authority.role() != AuthorityRole::Follower;

        match event {
            MatchEvent::StatsUpdated {
                identity,
                score,
                kills,
            } => {
                self.display
                    .insert(identity.clone(), PlayerRecord::new(score, kills));
                let is_local = identity == self.local;
                self.notify(SessionNotification::StatsChanged {
                    identity,
                    score,
                    kills,
                    is_local,
                });
            }
            MatchEvent::EventApplied { fingerprint } => {
                self.applied.insert(fingerprint);
            }
            MatchEvent::ClockSync { remaining_seconds } => {
                if !is_authority {
                    self.lifecycle.mirror_clock(remaining_seconds);
                }
                self.notify(SessionNotification::ClockChanged {
                    remaining_seconds,
                    text: format_time(remaining_seconds),
                });
            }
            MatchEvent::PhaseChanged { phase } => {
                if !is_authority {
                    self.lifecycle.mirror_phase(phase);
                }
                self.observe_phase(phase);
            }
            MatchEvent::ChatMessage { text } => {
                self.messages.push(text.clone());
                self.notify(SessionNotification::Message(text));
            }
            MatchEvent::RosterCounts {
                real_players,
                fill_agents,
            } => {
                self.occupancy = RoomOccupancy::new(real_players, fill_agents);
            }
            MatchEvent::MatchReset => {
                self.display.clear();
                self.applied.clear();
                self.messages.clear();
                self.outcome = None;
                if !is_authority {
                    self.lifecycle.mirror_phase(MatchPhase::Waiting);
                    self.lifecycle.mirror_clock(0.0);
                }
                self.observe_phase(MatchPhase::Waiting);
            }
            other => debug!(event = ?other, "Unexpected broadcast"),
        }
    }

    fn observe_phase(&mut self, phase: MatchPhase) {
        if self.observed_phase == phase {
            return;
        }
        self.observed_phase = phase;
        self.notify(SessionNotification::PhaseChanged(phase));

        match phase {
            MatchPhase::Ending => self.notify(SessionNotification::ActionsDisabled),
            MatchPhase::Ended if !self.authority.is_authority() => {
                // Give the final stats broadcasts time to land
                self.scheduler.schedule_in(
                    self.config.follower_leaderboard_delay,
                    Continuation::ShowLeaderboard,
                );
            }
            _ => {}
        }
    }

    fn notify(&mut self, notification: SessionNotification) {
        self.subscribers
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }
}

/// Anything driven by the fixed-rate tick loop
pub trait Tickable: Send + Sync + 'static {
    fn tick(&mut self, dt: Duration);
}

impl Tickable for MatchSession {
    fn tick(&mut self, dt: Duration) {
        MatchSession::tick(self, dt);
    }
}

/// Start the tick loop background task
pub fn start_tick_loop<T: Tickable>(
    target: Arc<RwLock<T>>,
    tick: Duration,
    metrics: Arc<Metrics>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Tick loop started at {:?} per tick", tick);
        let mut last = Instant::now();

        loop {
            ticker.tick().await;
            let now = Instant::now();
            let dt = now - last;
            last = now;

            target.write().await.tick(dt);
            metrics.record_tick_time(now.elapsed());
        }
    })
}
