//! Charging point registry
//!
//! Owns every live session. Sessions sit in an arena keyed by a stable
//! [`SessionId`]; identity and connection indexes point into it. All three
//! maps change together under one lock, so an identity can never resolve to
//! a session whose connection index disagrees.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use tracing::{debug, info};

use super::charging_point::{ChargingPointSession, SessionId, SessionSettings};
use crate::application::ports::{ConnectionId, SharedBinding};
use crate::domain::TransportProtocol;
use crate::support::SessionError;

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, Arc<ChargingPointSession>>,
    by_identity: HashMap<String, SessionId>,
    by_connection: HashMap<ConnectionId, SessionId>,
    next_id: SessionId,
}

impl RegistryInner {
    fn unlink(&mut self, session: &ChargingPointSession) {
        self.sessions.remove(&session.id());
        let identity = session.identity();
        if self.by_identity.get(&identity) == Some(&session.id()) {
            self.by_identity.remove(&identity);
        }
        self.by_connection.retain(|_, id| *id != session.id());
    }
}

/// Result of one maintenance pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_calls: usize,
    pub retired: usize,
}

/// Session counts by state, for the sessions gauge
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub unbound: usize,
    pub online: usize,
    pub offline: usize,
}

pub struct ChargingPointRegistry {
    inner: RwLock<RegistryInner>,
    settings: Arc<SessionSettings>,
}

pub type SharedRegistry = Arc<ChargingPointRegistry>;

impl ChargingPointRegistry {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            settings: Arc::new(settings),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Create an unbound session attached to `binding`.
    pub fn create(&self, binding: SharedBinding, protocol: TransportProtocol) -> Arc<ChargingPointSession> {
        let connection_id = binding.connection_id();
        let mut inner = self.write();
        inner.next_id += 1;
        let id = inner.next_id;
        let session = Arc::new(ChargingPointSession::new(
            id,
            protocol,
            binding,
            self.settings.clone(),
        ));
        inner.sessions.insert(id, session.clone());
        inner.by_connection.insert(connection_id, id);
        debug!(session_id = id, connection_id, protocol = %protocol, "Session created");
        session
    }

    /// Assign `identity` to `session`. Binding the identity a session
    /// already holds is a no-op.
    pub fn bind(&self, session: &ChargingPointSession, identity: &str) -> Result<(), SessionError> {
        if identity.is_empty() {
            return Err(SessionError::EmptyIdentity);
        }
        let mut inner = self.write();
        if session.is_retired() || !inner.sessions.contains_key(&session.id()) {
            return Err(SessionError::Retired(identity.to_string()));
        }
        match inner.by_identity.get(identity) {
            Some(id) if *id == session.id() => return Ok(()),
            Some(_) => return Err(SessionError::DuplicateIdentity(identity.to_string())),
            None => {}
        }
        let previous = session.identity();
        if !previous.is_empty() && inner.by_identity.get(&previous) == Some(&session.id()) {
            inner.by_identity.remove(&previous);
        }
        inner.by_identity.insert(identity.to_string(), session.id());
        session.set_identity(identity);
        info!(identity, session_id = session.id(), "Charging point bound");
        Ok(())
    }

    /// Move `session` onto `new_binding`, closing the binding it replaces.
    /// Pending calls stay with the session.
    pub fn switch_transport(
        &self,
        session: &ChargingPointSession,
        new_binding: SharedBinding,
    ) -> Result<(), SessionError> {
        let connection_id = new_binding.connection_id();
        let previous = {
            let mut inner = self.write();
            if session.is_retired() || !inner.sessions.contains_key(&session.id()) {
                return Err(SessionError::Retired(session.identity()));
            }
            let previous = session.switch_transport(new_binding);
            if let Some(old) = &previous {
                inner.by_connection.remove(&old.connection_id());
            }
            inner.by_connection.insert(connection_id, session.id());
            previous
        };
        if let Some(old) = previous {
            if old.connection_id() != connection_id {
                info!(
                    identity = %session.identity(),
                    old_connection = old.connection_id(),
                    new_connection = connection_id,
                    "Transport replaced"
                );
                old.close();
            }
        }
        Ok(())
    }

    /// Bring `identity` online on `binding`: the existing session takes the
    /// new transport, or a new session is created and bound. A session of
    /// the same identity on the other transport protocol is retired first.
    /// Returns the session and whether it already existed.
    pub fn attach(
        &self,
        identity: &str,
        binding: SharedBinding,
        protocol: TransportProtocol,
    ) -> Result<(Arc<ChargingPointSession>, bool), SessionError> {
        if identity.is_empty() {
            return Err(SessionError::EmptyIdentity);
        }
        let connection_id = binding.connection_id();
        let mut displaced = None;
        let mut replaced = None;
        let attached = {
            let mut inner = self.write();
            let existing = inner
                .by_identity
                .get(identity)
                .and_then(|id| inner.sessions.get(id))
                .cloned();
            match existing {
                Some(session) if session.protocol() == protocol => {
                    replaced = session.switch_transport(binding);
                    if let Some(old) = &replaced {
                        inner.by_connection.remove(&old.connection_id());
                    }
                    inner.by_connection.insert(connection_id, session.id());
                    (session, true)
                }
                other => {
                    if let Some(old_session) = other {
                        replaced = old_session.mark_retired();
                        inner.unlink(&old_session);
                        displaced = Some(old_session);
                    }
                    inner.next_id += 1;
                    let id = inner.next_id;
                    let session = Arc::new(ChargingPointSession::new(
                        id,
                        protocol,
                        binding,
                        self.settings.clone(),
                    ));
                    session.set_identity(identity);
                    inner.sessions.insert(id, session.clone());
                    inner.by_connection.insert(connection_id, id);
                    inner.by_identity.insert(identity.to_string(), id);
                    (session, false)
                }
            }
        };

        if let Some(old) = replaced.filter(|b| b.connection_id() != connection_id) {
            old.close();
        }
        if let Some(old_session) = displaced {
            old_session.drain("charge point switched transport protocol");
        }
        let (session, existed) = &attached;
        info!(
            identity,
            session_id = session.id(),
            connection_id,
            protocol = %protocol,
            takeover = *existed,
            "🔗 Charge point attached"
        );
        Ok(attached)
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<ChargingPointSession>> {
        self.read().sessions.get(&id).cloned()
    }

    pub fn find_by_identity(&self, identity: &str) -> Option<Arc<ChargingPointSession>> {
        let inner = self.read();
        inner
            .by_identity
            .get(identity)
            .and_then(|id| inner.sessions.get(id))
            .cloned()
    }

    pub fn find_by_connection(&self, connection_id: ConnectionId) -> Option<Arc<ChargingPointSession>> {
        let inner = self.read();
        inner
            .by_connection
            .get(&connection_id)
            .and_then(|id| inner.sessions.get(id))
            .cloned()
    }

    /// Forget a closed connection. The owning session goes offline and is
    /// kept for a reconnect; a session that never bound an identity is
    /// retired right away.
    pub fn detach(&self, connection_id: ConnectionId) -> Option<Arc<ChargingPointSession>> {
        let (session, unbound) = {
            let mut inner = self.write();
            let id = inner.by_connection.remove(&connection_id)?;
            let session = inner.sessions.get(&id)?.clone();
            session.detach(connection_id);
            let unbound = session.identity().is_empty();
            if unbound {
                session.mark_retired();
                inner.unlink(&session);
            }
            (session, unbound)
        };
        if unbound {
            session.drain("connection closed before identification");
        }
        Some(session)
    }

    /// Unlink a retired session.
    pub fn remove(&self, session: &ChargingPointSession) -> Result<(), SessionError> {
        if !session.is_retired() {
            return Err(SessionError::NotRetired(session.identity()));
        }
        self.write().unlink(session);
        Ok(())
    }

    /// Retire `session` now: take its binding, unlink it, fail its pending
    /// calls with `reason`.
    pub fn retire(&self, session: &ChargingPointSession, reason: &str) {
        let binding = {
            let mut inner = self.write();
            let binding = session.mark_retired();
            inner.unlink(session);
            binding
        };
        if let Some(binding) = binding {
            binding.close();
        }
        let drained = session.drain(reason);
        info!(identity = %session.identity(), drained, reason, "Session retired");
    }

    /// Expire overdue calls and retire sessions past their offline grace.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        for session in self.sessions() {
            report.expired_calls += session.correlation().expire(now);
        }

        let retired: Vec<_> = {
            let mut inner = self.write();
            let candidates: Vec<_> = inner
                .sessions
                .values()
                .filter(|s| s.can_retire(now))
                .cloned()
                .collect();
            for session in &candidates {
                session.mark_retired();
                inner.unlink(session);
            }
            candidates
        };
        for session in &retired {
            session.drain("session closed");
            debug!(identity = %session.identity(), "Offline session retired");
        }
        report.retired = retired.len();
        report
    }

    pub fn sessions(&self) -> Vec<Arc<ChargingPointSession>> {
        self.read().sessions.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn stats(&self) -> RegistryStats {
        use super::charging_point::SessionState;
        let mut stats = RegistryStats::default();
        for session in self.read().sessions.values() {
            match session.state() {
                SessionState::Unbound => stats.unbound += 1,
                SessionState::Online => stats.online += 1,
                SessionState::Offline => stats.offline += 1,
                SessionState::Retired => {}
            }
        }
        stats
    }

    /// Retire every session, closing transports and failing pending calls.
    pub fn shutdown(&self, reason: &str) -> usize {
        let sessions: Vec<_> = {
            let mut inner = self.write();
            inner.by_identity.clear();
            inner.by_connection.clear();
            inner.sessions.drain().map(|(_, s)| s).collect()
        };
        let mut drained = 0;
        for session in &sessions {
            if let Some(binding) = session.mark_retired() {
                binding.close();
            }
            drained += session.drain(reason);
        }
        info!(sessions = sessions.len(), drained, "Registry shut down");
        drained
    }
}
