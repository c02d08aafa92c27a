//! Authority role tracking and the guarded write capability

use tracing::{debug, info};

use crate::authority::backup::LocalBackup;
use crate::game::state::PlayerId;
use crate::net::protocol::MatchEvent;

/// Proof that the holder may mutate canonical state.
///
/// Cannot be constructed outside this module; [`AuthorityManager`] lends one
/// only while the local peer holds authority.
#[derive(Debug)]
pub struct WriteCapability {
    _private: (),
}

impl WriteCapability {
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self { _private: () }
    }
}

/// Local peer's view of its own authority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityRole {
    Follower,
    /// Elected, recovery procedure not yet complete
    Migrating,
    Authority,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    #[error("Not the authority")]
    NotAuthority,
    #[error("Authority migration in progress")]
    Migrating,
}

#[derive(Debug)]
pub struct AuthorityManager {
    local: PlayerId,
    role: AuthorityRole,
    authority: Option<PlayerId>,
    backup: Option<LocalBackup>,
    /// Requests that arrived during the settle window, in arrival order
    deferred: Vec<(PlayerId, MatchEvent)>,
    /// Bumped on every election so stale recovery continuations can be told apart
    epoch: u64,
    capability: WriteCapability,
}

impl AuthorityManager {
    pub fn new(local: PlayerId) -> Self {
        Self {
            local,
            role: AuthorityRole::Follower,
            authority: None,
            backup: None,
            deferred: Vec::new(),
            epoch: 0,
            capability: WriteCapability { _private: () },
        }
    }

    pub fn local(&self) -> &PlayerId {
        &self.local
    }

    pub fn role(&self) -> AuthorityRole {
        self.role
    }

    pub fn is_authority(&self) -> bool {
        self.role == AuthorityRole::Authority
    }

    pub fn is_migrating(&self) -> bool {
        self.role == AuthorityRole::Migrating
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Peer currently believed to hold authority, if known
    pub fn current_authority(&self) -> Option<&PlayerId> {
        self.authority.as_ref()
    }

    /// Lend the write capability for normal mutation
    pub fn capability(&self) -> Result<&WriteCapability, AuthorityError> {
        match self.role {
            AuthorityRole::Authority => Ok(&self.capability),
            AuthorityRole::Migrating => Err(AuthorityError::Migrating),
            AuthorityRole::Follower => Err(AuthorityError::NotAuthority),
        }
    }

    /// Lend the write capability to the recovery procedure, which runs
    /// before the migrating flag is cleared
    pub fn migration_capability(&self) -> Result<&WriteCapability, AuthorityError> {
        match self.role {
            AuthorityRole::Authority | AuthorityRole::Migrating => Ok(&self.capability),
            AuthorityRole::Follower => Err(AuthorityError::NotAuthority),
        }
    }

    /// The substrate elected this peer. Returns the new epoch.
    pub fn on_elected(&mut self) -> u64 {
        self.epoch += 1;
        self.role = AuthorityRole::Migrating;
        self.authority = Some(self.local.clone());
        info!(identity = %self.local, epoch = self.epoch, "Elected authority, recovery pending");
        self.epoch
    }

    /// Recovery finished; clear the migrating flag
    pub fn complete_recovery(&mut self) {
        if self.role == AuthorityRole::Migrating {
            self.role = AuthorityRole::Authority;
            info!(identity = %self.local, epoch = self.epoch, "Recovery complete");
        }
    }

    /// Authority moved to `new_authority`. Pending requests are dropped, and
    /// so is the backup: once another peer writes, it no longer describes
    /// the match.
    pub fn on_demoted(&mut self, new_authority: PlayerId) {
        if !self.deferred.is_empty() {
            debug!(count = self.deferred.len(), "Dropping deferred requests on demotion");
        }
        self.deferred.clear();
        if new_authority != self.local && self.backup.take().is_some() {
            debug!(new_authority = %new_authority, "Discarding local backup");
        }
        if self.role != AuthorityRole::Follower {
            info!(identity = %self.local, new_authority = %new_authority, "Demoted");
        }
        self.role = AuthorityRole::Follower;
        self.authority = Some(new_authority);
    }

    /// Record who holds authority without changing the local role
    pub fn set_current_authority(&mut self, authority: Option<PlayerId>) {
        if self.role == AuthorityRole::Follower {
            self.authority = authority;
        }
    }

    pub fn capture_backup(&mut self, backup: LocalBackup) {
        self.backup = Some(backup);
    }

    pub fn backup(&self) -> Option<&LocalBackup> {
        self.backup.as_ref()
    }

    pub fn defer(&mut self, from: PlayerId, event: MatchEvent) {
        self.deferred.push((from, event));
    }

    pub fn take_deferred(&mut self) -> Vec<(PlayerId, MatchEvent)> {
        std::mem::take(&mut self.deferred)
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}
