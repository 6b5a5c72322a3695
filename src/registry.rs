use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    engine::{Connection, ConnectionState, DataChannel},
    models::token::PeerToken,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Offerer,
    Answerer,
}

pub(crate) struct NegotiationSession {
    pub(crate) id: u64,
    pub(crate) role: Role,
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) created: Instant,
    pub(crate) state: ConnectionState,
}

impl NegotiationSession {
    pub(crate) fn new(id: u64, role: Role, connection: Arc<dyn Connection>) -> Self {
        NegotiationSession {
            id,
            role,
            connection,
            created: Instant::now(),
            state: ConnectionState::New,
        }
    }
}

/// Sessions and channels keyed by peer token.
///
/// Holds the only strong references to both; engine callbacks keep weak
/// ones. Not synchronized, the owner serializes access.
#[derive(Default)]
pub(crate) struct PeerRegistry {
    sessions: HashMap<PeerToken, NegotiationSession>,
    channels: HashMap<PeerToken, Arc<dyn DataChannel>>,
}

impl PeerRegistry {
    pub(crate) fn lookup(&self, token: &PeerToken) -> Option<&NegotiationSession> {
        self.sessions.get(token)
    }

    pub(crate) fn lookup_mut(&mut self, token: &PeerToken) -> Option<&mut NegotiationSession> {
        self.sessions.get_mut(token)
    }

    /// Returns the session this one replaced, which the caller must close.
    pub(crate) fn insert(&mut self, token: PeerToken, session: NegotiationSession) -> Option<NegotiationSession> {
        self.sessions.insert(token, session)
    }

    pub(crate) fn channel(&self, token: &PeerToken) -> Option<&Arc<dyn DataChannel>> {
        self.channels.get(token)
    }

    pub(crate) fn insert_channel(&mut self, token: PeerToken, channel: Arc<dyn DataChannel>) {
        self.channels.insert(token, channel);
    }

    pub(crate) fn remove_channel(&mut self, token: &PeerToken) -> Option<Arc<dyn DataChannel>> {
        self.channels.remove(token)
    }

    pub(crate) fn tokens(&self) -> Vec<PeerToken> {
        let mut tokens: Vec<_> = self.sessions.keys().cloned().collect();
        tokens.sort();
        tokens
    }

    /// Removes sessions older than `timeout` that never connected, along
    /// with their channels.
    pub(crate) fn expired(&mut self, timeout: Duration, now: Instant) -> Vec<(PeerToken, NegotiationSession)> {
        let stale: Vec<PeerToken> = self
            .sessions
            .iter()
            .filter(|(_, session)| {
                session.state != ConnectionState::Connected && now.duration_since(session.created) > timeout
            })
            .map(|(token, _)| token.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|token| {
                self.channels.remove(&token);
                self.sessions.remove(&token).map(|session| (token, session))
            })
            .collect()
    }

    pub(crate) fn remove_all(&mut self) -> Vec<(PeerToken, NegotiationSession)> {
        self.channels.clear();
        self.sessions.drain().collect()
    }
}
