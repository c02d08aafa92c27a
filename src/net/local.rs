//! In-process networking substrate
//!
//! Implements the event bus, property store and agent environment over
//! shared memory so several sessions can run inside one process. Events are
//! still bincode-encoded on the way through so the wire codec is exercised.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::MatchConfig;
use crate::game::state::{AgentId, FillAgentHandle, PlayerId, Position};
use crate::metrics::Metrics;
use crate::net::match_session::{MatchSession, Tickable};
use crate::net::protocol::{decode, encode, MatchEvent, Target};
use crate::net::substrate::{AgentEnvironment, EventBus, PropertyStore, PropertyValue};

/// Upper bound on delivery rounds per pump; a round only happens when
/// the previous one delivered something
const MAX_PUMP_ROUNDS: usize = 64;

/// Arena half-extent for spawned agent positions
const SPAWN_EXTENT: f32 = 50.0;

type Inbox = VecDeque<(PlayerId, Vec<u8>)>;

/// Shared-memory event bus with per-peer inboxes
#[derive(Debug, Default)]
pub struct LocalNetwork {
    inboxes: Mutex<BTreeMap<PlayerId, Inbox>>,
    authority: Mutex<Option<PlayerId>>,
    /// Deliver every request twice, as an at-least-once transport may
    duplicate_requests: AtomicBool,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, identity: PlayerId) {
        self.inboxes.lock().entry(identity).or_default();
    }

    pub fn disconnect(&self, identity: &PlayerId) {
        self.inboxes.lock().remove(identity);
    }

    pub fn set_authority(&self, authority: Option<PlayerId>) {
        *self.authority.lock() = authority;
    }

    pub fn set_duplicate_requests(&self, enabled: bool) {
        self.duplicate_requests.store(enabled, Ordering::Relaxed);
    }

    /// Drain and decode everything queued for `identity`
    pub fn take_inbox(&self, identity: &PlayerId) -> Vec<(PlayerId, MatchEvent)> {
        let raw: Vec<_> = match self.inboxes.lock().get_mut(identity) {
            Some(inbox) => inbox.drain(..).collect(),
            None => return Vec::new(),
        };

        raw.into_iter()
            .filter_map(|(from, bytes)| match decode::<MatchEvent>(&bytes) {
                Ok(event) => Some((from, event)),
                Err(e) => {
                    warn!(from = %from, "Dropping undecodable event: {}", e);
                    None
                }
            })
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.inboxes.lock().values().map(VecDeque::len).sum()
    }
}

impl EventBus for LocalNetwork {
    fn send(&self, from: &PlayerId, target: Target, event: &MatchEvent) {
        let bytes = match encode(event) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode event: {}", e);
                return;
            }
        };
        let copies = if event.is_request() && self.duplicate_requests.load(Ordering::Relaxed) {
            2
        } else {
            1
        };

        let authority = self.authority.lock().clone();
        let mut inboxes = self.inboxes.lock();
        let recipients: Vec<PlayerId> = match target {
            Target::All => inboxes.keys().cloned().collect(),
            Target::Others => inboxes.keys().filter(|id| *id != from).cloned().collect(),
            Target::Authority => authority.into_iter().collect(),
            Target::Peer(identity) => vec![identity],
        };

        for recipient in recipients {
            if let Some(inbox) = inboxes.get_mut(&recipient) {
                for _ in 0..copies {
                    inbox.push_back((from.clone(), bytes.clone()));
                }
            }
        }
    }
}

/// Last-write-wins property map that remembers which keys changed
#[derive(Debug, Default)]
pub struct LocalPropertyStore {
    values: RwLock<HashMap<String, PropertyValue>>,
    changed: Mutex<Vec<String>>,
}

impl LocalPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys written with a new value since the last call
    pub fn take_changes(&self) -> Vec<String> {
        let mut changed = std::mem::take(&mut *self.changed.lock());
        changed.sort();
        changed.dedup();
        changed
    }
}

impl PropertyStore for LocalPropertyStore {
    fn set(&self, properties: Vec<(String, PropertyValue)>) {
        let mut values = self.values.write();
        let mut changed = self.changed.lock();
        for (key, value) in properties {
            if values.get(&key) != Some(&value) {
                changed.push(key.clone());
                values.insert(key, value);
            }
        }
    }

    fn get(&self, key: &str) -> Option<PropertyValue> {
        self.values.read().get(key).cloned()
    }

    fn snapshot(&self) -> HashMap<String, PropertyValue> {
        self.values.read().clone()
    }
}

/// Shared world the fill agents live in
#[derive(Debug)]
pub struct LocalWorld {
    agents: Mutex<BTreeMap<AgentId, FillAgentHandle>>,
    next_id: AtomicU64,
    enabled: AtomicBool,
}

impl Default for LocalWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalWorld {
    pub fn new() -> Self {
        Self {
            agents: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            enabled: AtomicBool::new(true),
        }
    }

    /// Health collaborator: mark an agent dead
    pub fn kill_agent(&self, id: AgentId) -> bool {
        match self.agents.lock().get_mut(&id) {
            Some(agent) if agent.alive => {
                agent.alive = false;
                true
            }
            _ => false,
        }
    }

    /// Drop ownership of every agent owned by a departed peer
    pub fn orphan_agents_of(&self, owner: &PlayerId) -> usize {
        let mut count = 0;
        for agent in self.agents.lock().values_mut() {
            if agent.owner.as_ref() == Some(owner) {
                agent.owner = None;
                count += 1;
            }
        }
        count
    }

    pub fn alive_count(&self) -> usize {
        self.agents.lock().values().filter(|a| a.alive).count()
    }

    pub fn agents_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

impl AgentEnvironment for LocalWorld {
    fn agents(&self) -> Vec<FillAgentHandle> {
        self.agents.lock().values().cloned().collect()
    }

    fn spawn_agent(&self, owner: &PlayerId) -> Option<AgentId> {
        let id = AgentId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut rng = rand::thread_rng();
        let position = Position::new(
            rng.gen_range(-SPAWN_EXTENT..SPAWN_EXTENT),
            0.0,
            rng.gen_range(-SPAWN_EXTENT..SPAWN_EXTENT),
        );
        self.agents.lock().insert(
            id,
            FillAgentHandle {
                id,
                owner: Some(owner.clone()),
                alive: true,
                position,
            },
        );
        Some(id)
    }

    fn destroy_agent(&self, id: AgentId) -> bool {
        self.agents.lock().remove(&id).is_some()
    }

    fn transfer_ownership(&self, id: AgentId, new_owner: &PlayerId) -> bool {
        match self.agents.lock().get_mut(&id) {
            Some(agent) => {
                agent.owner = Some(new_owner.clone());
                true
            }
            None => false,
        }
    }

    fn set_agents_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("{0} is already in the room")]
    AlreadyJoined(PlayerId),
    #[error("{0} is not in the room")]
    NotInRoom(PlayerId),
}

/// A room of sessions sharing one in-process substrate.
///
/// Plays the substrate's part in membership: join/leave notifications,
/// authority election (oldest remaining member) and message delivery.
pub struct LocalRoom {
    config: MatchConfig,
    network: Arc<LocalNetwork>,
    store: Arc<LocalPropertyStore>,
    world: Arc<LocalWorld>,
    metrics: Arc<Metrics>,
    /// Join order; the first entry is elected when the authority leaves
    members: Vec<PlayerId>,
    sessions: HashMap<PlayerId, MatchSession>,
    authority: Option<PlayerId>,
}

impl LocalRoom {
    pub fn new(config: MatchConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            network: Arc::new(LocalNetwork::new()),
            store: Arc::new(LocalPropertyStore::new()),
            world: Arc::new(LocalWorld::new()),
            metrics,
            members: Vec::new(),
            sessions: HashMap::new(),
            authority: None,
        }
    }

    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    pub fn store(&self) -> &LocalPropertyStore {
        &self.store
    }

    pub fn world(&self) -> &LocalWorld {
        &self.world
    }

    pub fn members(&self) -> &[PlayerId] {
        &self.members
    }

    pub fn authority(&self) -> Option<&PlayerId> {
        self.authority.as_ref()
    }

    pub fn session(&self, identity: &PlayerId) -> Option<&MatchSession> {
        self.sessions.get(identity)
    }

    pub fn session_mut(&mut self, identity: &PlayerId) -> Option<&mut MatchSession> {
        self.sessions.get_mut(identity)
    }

    pub fn join(&mut self, identity: PlayerId) -> Result<(), RoomError> {
        if self.sessions.contains_key(&identity) {
            return Err(RoomError::AlreadyJoined(identity));
        }

        self.network.connect(identity.clone());
        let mut session = MatchSession::new(
            identity.clone(),
            self.config.clone(),
            self.network.clone(),
            self.store.clone(),
            self.world.clone(),
            self.metrics.clone(),
        );
        self.members.push(identity.clone());

        let first = self.authority.is_none();
        if first {
            self.authority = Some(identity.clone());
            self.network.set_authority(Some(identity.clone()));
        }

        session.on_joined_room(&self.members, self.authority.clone());
        for other in self.sessions.values_mut() {
            other.on_peer_joined(identity.clone());
        }
        if first {
            session.on_authority_elected();
        }
        self.sessions.insert(identity.clone(), session);

        info!(identity = %identity, members = self.members.len(), "Peer joined");
        self.pump();
        Ok(())
    }

    pub fn leave(&mut self, identity: &PlayerId) -> Result<(), RoomError> {
        if self.sessions.remove(identity).is_none() {
            return Err(RoomError::NotInRoom(identity.clone()));
        }

        self.members.retain(|m| m != identity);
        self.network.disconnect(identity);
        let orphaned = self.world.orphan_agents_of(identity);
        info!(identity = %identity, orphaned, "Peer left");

        for other in self.sessions.values_mut() {
            other.on_peer_left(identity.clone());
        }

        if self.authority.as_ref() == Some(identity) {
            self.authority = None;
            self.network.set_authority(None);
            if let Some(next) = self.members.first().cloned() {
                self.elect(next);
            }
        }

        self.pump();
        Ok(())
    }

    /// Move authority to `identity` without anyone leaving
    pub fn handoff(&mut self, identity: &PlayerId) -> Result<(), RoomError> {
        if !self.sessions.contains_key(identity) {
            return Err(RoomError::NotInRoom(identity.clone()));
        }
        if self.authority.as_ref() != Some(identity) {
            self.elect(identity.clone());
            self.pump();
        }
        Ok(())
    }

    fn elect(&mut self, identity: PlayerId) {
        info!(identity = %identity, "Authority elected");
        self.authority = Some(identity.clone());
        self.network.set_authority(Some(identity.clone()));

        for (member, session) in self.sessions.iter_mut() {
            if *member == identity {
                session.on_authority_elected();
            } else {
                session.on_authority_demoted(identity.clone());
            }
        }
    }

    /// Deliver property changes and queued events until the room is quiet.
    /// Returns the number of events delivered.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;

        for _ in 0..MAX_PUMP_ROUNDS {
            let changes = self.store.take_changes();
            if !changes.is_empty() {
                for session in self.sessions.values_mut() {
                    session.on_properties_changed(&changes);
                }
            }

            let mut progressed = false;
            for identity in self.members.clone() {
                let inbox = self.network.take_inbox(&identity);
                if inbox.is_empty() {
                    continue;
                }
                progressed = true;

                if let Some(session) = self.sessions.get_mut(&identity) {
                    for (from, event) in inbox {
                        delivered += 1;
                        if let Err(e) = session.handle_event(&from, event) {
                            debug!(peer = %identity, from = %from, "Event not applied: {}", e);
                        }
                    }
                }
            }

            if !progressed {
                break;
            }
        }

        delivered
    }

    /// Tick every session once, then deliver what they sent
    pub fn tick(&mut self, dt: Duration) {
        for session in self.sessions.values_mut() {
            session.tick(dt);
        }
        self.pump();
    }

    /// Tick repeatedly in `step` increments until `total` has elapsed
    pub fn run_for(&mut self, total: Duration, step: Duration) {
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            self.tick(step);
            elapsed += step;
        }
    }
}

impl Tickable for LocalRoom {
    fn tick(&mut self, dt: Duration) {
        LocalRoom::tick(self, dt);
    }
}
