//! Interfaces consumed from the networking substrate
//!
//! The substrate owns connections, message delivery, the session property
//! store and the world the fill agents live in. It is at-least-once and
//! ordered per sender; nothing here assumes exactly-once delivery.

use std::collections::HashMap;

use crate::game::state::{AgentId, FillAgentHandle, PlayerId};
use crate::net::protocol::{MatchEvent, Target};

/// Value type held by the replicated property store
pub type PropertyValue = serde_json::Value;

/// Fire-and-forget remote calls
pub trait EventBus: Send + Sync {
    fn send(&self, from: &PlayerId, target: Target, event: &MatchEvent);
}

/// Small last-write-wins key/value map scoped to the session
pub trait PropertyStore: Send + Sync {
    fn set(&self, properties: Vec<(String, PropertyValue)>);
    fn get(&self, key: &str) -> Option<PropertyValue>;
    fn snapshot(&self) -> HashMap<String, PropertyValue>;
}

/// The environment fill agents are instantiated in
pub trait AgentEnvironment: Send + Sync {
    /// Every fill agent currently visible, live or dead
    fn agents(&self) -> Vec<FillAgentHandle>;
    /// Instantiate an agent owned by `owner`
    fn spawn_agent(&self, owner: &PlayerId) -> Option<AgentId>;
    /// Destroy an agent. Returns false if it no longer exists.
    fn destroy_agent(&self, id: AgentId) -> bool;
    /// Atomic ownership transfer, last write wins
    fn transfer_ownership(&self, id: AgentId, new_owner: &PlayerId) -> bool;
    /// Enable or disable agent action handles (AI, movement, weapons)
    fn set_agents_enabled(&self, enabled: bool);
}
