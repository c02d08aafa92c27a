//! Population controller
//!
//! Converges the number of live fill agents on
//! `max(0, total_slots - real_players)`. Reconciliation is idempotent and
//! may run on any tick; spawning is spread out by the caller, one scheduled
//! `try_spawn` per missing agent.

use tracing::{debug, info};

use crate::authority::manager::WriteCapability;
use crate::game::state::{AgentId, FillAgentHandle, PlayerId};
use crate::net::substrate::AgentEnvironment;

/// Fill agents needed to top the room up to `total_slots`
pub fn target_fill_agents(total_slots: usize, real_players: usize) -> usize {
    total_slots.saturating_sub(real_players)
}

/// What one reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub cleaned_dead: Vec<AgentId>,
    pub despawned: Vec<AgentId>,
    /// New spawns the caller must schedule
    pub spawns_to_schedule: usize,
    /// Live agents after despawning
    pub alive: usize,
    pub target: usize,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        !self.cleaned_dead.is_empty() || !self.despawned.is_empty() || self.spawns_to_schedule > 0
    }
}

#[derive(Debug)]
pub struct PopulationController {
    total_slots: usize,
    /// Spawns scheduled but not yet attempted
    pending_spawns: usize,
}

impl PopulationController {
    pub fn new(total_slots: usize) -> Self {
        Self {
            total_slots,
            pending_spawns: 0,
        }
    }

    pub fn total_slots(&self) -> usize {
        self.total_slots
    }

    pub fn pending_spawns(&self) -> usize {
        self.pending_spawns
    }

    pub fn target(&self, real_players: usize) -> usize {
        target_fill_agents(self.total_slots, real_players)
    }

    /// Compare live agents against the target and converge.
    ///
    /// Dead agents are always cleaned up. Despawning and spawning only
    /// happen while `active` (the match is in progress).
    pub fn reconcile(
        &mut self,
        _cap: &WriteCapability,
        env: &dyn AgentEnvironment,
        real_players: usize,
        active: bool,
    ) -> ReconcileReport {
        let target = self.target(real_players);
        let (mut alive, dead): (Vec<FillAgentHandle>, Vec<FillAgentHandle>) =
            env.agents().into_iter().partition(|a| a.alive);

        let mut report = ReconcileReport {
            target,
            ..Default::default()
        };

        for agent in dead {
            if env.destroy_agent(agent.id) {
                report.cleaned_dead.push(agent.id);
            }
        }

        if !active {
            report.alive = alive.len();
            return report;
        }

        if alive.len() > target {
            alive.sort_by_key(|a| a.id);
            let excess = alive.len() - target;
            for agent in alive.drain(..excess) {
                if env.destroy_agent(agent.id) {
                    report.despawned.push(agent.id);
                }
            }
            info!(
                despawned = report.despawned.len(),
                target, "Despawned excess fill agents"
            );
        }

        report.alive = alive.len();

        let deficit = target.saturating_sub(report.alive + self.pending_spawns);
        if deficit > 0 {
            self.pending_spawns += deficit;
            report.spawns_to_schedule = deficit;
            debug!(deficit, target, alive = report.alive, "Scheduling fill agent spawns");
        }

        report
    }

    /// Attempt one scheduled spawn. Rejected as a no-op when, at this
    /// instant, live agents already meet the target.
    pub fn try_spawn(
        &mut self,
        _cap: &WriteCapability,
        env: &dyn AgentEnvironment,
        owner: &PlayerId,
        real_players: usize,
        active: bool,
    ) -> Option<AgentId> {
        self.pending_spawns = self.pending_spawns.saturating_sub(1);

        if !active {
            debug!("Spawn skipped, population control inactive");
            return None;
        }

        let target = self.target(real_players);
        let alive = env.agents().iter().filter(|a| a.alive).count();
        if alive >= target {
            debug!(alive, target, "Spawn rejected, target already met");
            return None;
        }

        let id = env.spawn_agent(owner)?;
        debug!(agent = %id, alive = alive + 1, target, "Spawned fill agent");
        Some(id)
    }

    /// Forget scheduled spawns (demotion or match reset)
    pub fn clear_pending(&mut self) {
        self.pending_spawns = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::local::LocalWorld;

    fn cap() -> WriteCapability {
        WriteCapability::for_tests()
    }

    fn spawn_all(controller: &mut PopulationController, world: &LocalWorld, real: usize, count: usize) {
        let owner = PlayerId::from("host");
        for _ in 0..count {
            controller.try_spawn(&cap(), world, &owner, real, true);
        }
    }

    #[test]
    fn test_target_clamps_at_zero() {
        assert_eq!(target_fill_agents(6, 2), 4);
        assert_eq!(target_fill_agents(6, 6), 0);
        assert_eq!(target_fill_agents(6, 7), 0);
    }

    #[test]
    fn test_fills_deficit() {
        let world = LocalWorld::new();
        let mut controller = PopulationController::new(6);

        let report = controller.reconcile(&cap(), &world, 2, true);
        assert_eq!(report.spawns_to_schedule, 4);
        assert_eq!(controller.pending_spawns(), 4);

        // A second pass before the spawns land must not double-schedule
        let again = controller.reconcile(&cap(), &world, 2, true);
        assert_eq!(again.spawns_to_schedule, 0);

        spawn_all(&mut controller, &world, 2, 4);
        assert_eq!(world.alive_count(), 4);
        assert_eq!(controller.pending_spawns(), 0);
    }

    #[test]
    fn test_despawns_oldest_first() {
        let world = LocalWorld::new();
        let owner = PlayerId::from("host");
        let ids: Vec<_> = (0..4).filter_map(|_| world.spawn_agent(&owner)).collect();
        let mut controller = PopulationController::new(6);

        let report = controller.reconcile(&cap(), &world, 4, true);

        assert_eq!(report.despawned, ids[..2].to_vec());
        assert_eq!(report.alive, 2);
        assert_eq!(world.alive_count(), 2);
    }

    #[test]
    fn test_dead_agents_cleaned_in_any_phase() {
        let world = LocalWorld::new();
        let owner = PlayerId::from("host");
        let id = world.spawn_agent(&owner).unwrap();
        world.kill_agent(id);
        let mut controller = PopulationController::new(6);

        let report = controller.reconcile(&cap(), &world, 1, false);

        assert_eq!(report.cleaned_dead, vec![id]);
        assert_eq!(report.spawns_to_schedule, 0);
        assert!(world.agents().is_empty());
    }

    #[test]
    fn test_spawn_rejected_when_target_met() {
        let world = LocalWorld::new();
        let mut controller = PopulationController::new(6);
        controller.reconcile(&cap(), &world, 4, true);
        spawn_all(&mut controller, &world, 4, 2);

        // A racing reconcile already satisfied the target
        let extra = controller.try_spawn(&cap(), &world, &PlayerId::from("host"), 4, true);
        assert_eq!(extra, None);
        assert_eq!(world.alive_count(), 2);
    }

    #[test]
    fn test_converges_over_join_leave_sequence() {
        let world = LocalWorld::new();
        let mut controller = PopulationController::new(6);

        for real in [1, 3, 2, 7, 0, 5] {
            let report = controller.reconcile(&cap(), &world, real, true);
            spawn_all(&mut controller, &world, real, report.spawns_to_schedule);
            assert_eq!(world.alive_count(), target_fill_agents(6, real));
        }
    }
}
