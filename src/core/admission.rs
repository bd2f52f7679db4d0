//! Admission control and the session registry.
//!
//! Every accepted client socket passes through [`AdmissionController::admit`]
//! before any session resources exist. The per-address check and increment
//! happen as one step under the registry shard lock, so concurrent upgrades
//! from the same address can never overshoot the cap. An admitted session
//! is registered under a fresh UUID and removed exactly once, when its
//! [`SessionGuard`] is dropped.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::relay::close_code;
use crate::core::relay::{
    ClientRoute, ConnectionManager, ConnectionState, ControlHandler, ManagerHandle,
    SessionSettings, UpstreamConnector,
};

/// Default number of concurrent sessions allowed from one address.
pub const DEFAULT_MAX_PER_ADDRESS: usize = 3;

/// Reasons an inbound connection is refused.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Too many connections from {addr} (limit {limit})")]
    PerAddressLimit { addr: IpAddr, limit: usize },

    #[error("Server at capacity (limit {limit})")]
    GlobalLimit { limit: usize },
}

impl AdmissionError {
    /// Close code sent to the refused client.
    pub fn close_code(&self) -> u16 {
        close_code::POLICY_VIOLATION
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionLimits {
    pub max_per_address: usize,
    /// `None` means no global cap
    pub max_total: Option<usize>,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_per_address: DEFAULT_MAX_PER_ADDRESS,
            max_total: None,
        }
    }
}

/// Read-only view of one registered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub address: IpAddr,
    pub state: ConnectionState,
    pub queue_depth: usize,
    /// RFC 3339 UTC
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionSnapshot {
    pub count: usize,
    pub sessions: Vec<SessionSnapshot>,
}

struct SessionEntry {
    address: IpAddr,
    created_at: String,
    handle: ManagerHandle,
}

/// Everything the transport layer needs to drive a freshly admitted session.
pub struct AdmittedSession {
    pub id: String,
    pub manager: ConnectionManager,
    pub handle: ManagerHandle,
    pub guard: SessionGuard,
}

pub struct AdmissionController {
    sessions: DashMap<String, SessionEntry>,
    per_address: DashMap<IpAddr, usize>,
    total: AtomicUsize,
    limits: AdmissionLimits,
    settings: SessionSettings,
    connector: Arc<dyn UpstreamConnector>,
    control: Arc<dyn ControlHandler>,
}

impl AdmissionController {
    pub fn new(
        limits: AdmissionLimits,
        settings: SessionSettings,
        connector: Arc<dyn UpstreamConnector>,
        control: Arc<dyn ControlHandler>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            per_address: DashMap::new(),
            total: AtomicUsize::new(0),
            limits,
            settings,
            connector,
            control,
        }
    }

    /// Admit a connection from `addr`, or refuse it without allocating
    /// anything.
    ///
    /// The returned manager is not running yet; the caller spawns
    /// [`ConnectionManager::run`] and keeps the guard alive for as long as
    /// the client socket is served.
    pub fn admit(
        self: &Arc<Self>,
        addr: IpAddr,
        client: mpsc::Sender<ClientRoute>,
    ) -> Result<AdmittedSession, AdmissionError> {
        self.reserve_global()?;

        if let Err(e) = self.reserve_address(addr) {
            self.total.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }

        let id = Uuid::new_v4().to_string();
        let (manager, handle) = ConnectionManager::new(
            id.clone(),
            self.settings.clone(),
            self.connector.clone(),
            self.control.clone(),
            client,
        );
        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();

        self.sessions.insert(
            id.clone(),
            SessionEntry {
                address: addr,
                created_at,
                handle: handle.clone(),
            },
        );

        info!(session_id = %id, ip = %addr, sessions = self.sessions.len(), "Session admitted");

        Ok(AdmittedSession {
            guard: SessionGuard {
                controller: self.clone(),
                id: id.clone(),
            },
            id,
            manager,
            handle,
        })
    }

    fn reserve_global(&self) -> Result<(), AdmissionError> {
        let Some(limit) = self.limits.max_total else {
            self.total.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        };

        self.total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < limit).then_some(current + 1)
            })
            .map(|_| ())
            .map_err(|_| {
                warn!(limit, "Rejecting connection: global limit reached");
                AdmissionError::GlobalLimit { limit }
            })
    }

    fn reserve_address(&self, addr: IpAddr) -> Result<(), AdmissionError> {
        let limit = self.limits.max_per_address;
        {
            let mut count = self.per_address.entry(addr).or_insert(0);
            if *count < limit {
                *count += 1;
                return Ok(());
            }
        }

        self.per_address.remove_if(&addr, |_, count| *count == 0);
        warn!(ip = %addr, limit, "Rejecting connection: per-address limit reached");
        Err(AdmissionError::PerAddressLimit { addr, limit })
    }

    /// Remove a session and release its slots. Only the first call for an
    /// id has any effect.
    fn release(&self, id: &str) {
        let Some((_, entry)) = self.sessions.remove(id) else {
            return;
        };

        if let Some(mut count) = self.per_address.get_mut(&entry.address) {
            *count = count.saturating_sub(1);
        }
        self.per_address
            .remove_if(&entry.address, |_, count| *count == 0);
        self.total.fetch_sub(1, Ordering::SeqCst);

        debug!(session_id = %id, ip = %entry.address, "Session removed from registry");
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn count_for(&self, addr: IpAddr) -> usize {
        self.per_address.get(&addr).map(|count| *count).unwrap_or(0)
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let mut sessions: Vec<SessionSnapshot> = self
            .sessions
            .iter()
            .map(|entry| {
                let view = entry.handle.view();
                SessionSnapshot {
                    id: entry.key().clone(),
                    address: entry.address,
                    state: view.state,
                    queue_depth: view.queue_depth,
                    created_at: entry.created_at.clone(),
                }
            })
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        AdmissionSnapshot {
            count: sessions.len(),
            sessions,
        }
    }

    /// Ask every registered session to close. Returns how many accepted.
    pub fn shutdown_all(&self, code: u16, reason: &str) -> usize {
        let handles: Vec<ManagerHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.handle.clone())
            .collect();

        let closed = handles
            .iter()
            .filter(|handle| handle.close(code, reason))
            .count();
        info!(closed, total = handles.len(), code, "Closing all sessions");
        closed
    }
}

/// Registry membership of one session; dropping it removes the session.
pub struct SessionGuard {
    controller: Arc<AdmissionController>,
    id: String,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.controller.release(&self.id);
    }
}
