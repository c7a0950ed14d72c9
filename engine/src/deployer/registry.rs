//! Deployment registry
//!
//! The single source of truth for which ports are in use and which processes
//! belong to which deployment. All state sits behind one `std::sync::Mutex`;
//! the lock is never held across an await.
//!
//! A port is taken while it is either reserved by an in-flight deployment or
//! held by a live record. Stopped records leave the live set and only a
//! bounded history of them is kept; the database holds the rest.

use super::process::ServicePair;
use crate::config::DeployConfig;
use chrono::Utc;
use sdk::errors::PipelineError;
use sdk::{DeploymentRecord, DeploymentStatus};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::TcpListener;
use std::sync::{Mutex, MutexGuard};

const STOPPED_HISTORY: usize = 64;

/// Ports handed out by `allocate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortPair {
    pub backend: u16,
    pub frontend: u16,
}

/// Outcome of `claim_for_stop`
#[derive(Debug)]
pub enum StopClaim {
    /// The caller now owns the processes and must call `complete_stop`
    Claimed(Option<ServicePair>),
    /// Stopped already, or another caller is stopping it
    AlreadyStopped,
    NotFound,
}

struct Entry {
    record: DeploymentRecord,
    services: Option<ServicePair>,
    stopping: bool,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, Entry>,
    reserved: HashSet<u16>,
    /// Most recently stopped last
    stopped: VecDeque<DeploymentRecord>,
}

impl RegistryState {
    fn is_taken(&self, port: u16) -> bool {
        self.reserved.contains(&port)
            || self
                .entries
                .values()
                .any(|e| e.record.status.holds_ports() && e.record.ports().contains(&port))
    }

    fn stopped(&self, id: &str) -> Option<&DeploymentRecord> {
        self.stopped.iter().find(|r| r.id == id)
    }

    fn archive(&mut self, record: DeploymentRecord) {
        if self.stopped.len() == STOPPED_HISTORY {
            self.stopped.pop_front();
        }
        self.stopped.push_back(record);
    }
}

/// Ports held for one launch
///
/// Dropping the reservation hands the ports back unless `commit` moved them
/// into a record.
#[must_use]
pub struct Reservation<'a> {
    registry: &'a DeploymentRegistry,
    ports: PortPair,
    committed: bool,
}

impl Reservation<'_> {
    pub fn ports(&self) -> PortPair {
        self.ports
    }

    /// Record the deployment; its ports stay taken
    pub fn commit(mut self, record: DeploymentRecord, services: Option<ServicePair>) {
        self.registry.insert(record, services);
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.release(self.ports);
        }
    }
}

pub struct DeploymentRegistry {
    host: String,
    range_start: u16,
    range_end: u16,
    state: Mutex<RegistryState>,
}

impl DeploymentRegistry {
    pub fn new(config: &DeployConfig) -> Self {
        Self::with_range(&config.host, config.port_range_start, config.port_range_end)
    }

    pub fn with_range(host: &str, range_start: u16, range_end: u16) -> Self {
        Self {
            host: host.to_string(),
            range_start,
            range_end,
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_bindable(&self, port: u16) -> bool {
        TcpListener::bind((self.host.as_str(), port)).is_ok()
    }

    /// Reserve the first two free ports: backend first, then frontend
    pub fn allocate(&self) -> Result<PortPair, PipelineError> {
        let mut state = self.lock();

        let mut free = (self.range_start..=self.range_end)
            .filter(|port| !state.is_taken(*port))
            .filter(|port| self.is_bindable(*port));

        let (Some(backend), Some(frontend)) = (free.next(), free.next()) else {
            tracing::warn!(
                start = self.range_start,
                end = self.range_end,
                "No free port pair"
            );
            return Err(PipelineError::PortExhaustion {
                start: self.range_start,
                end: self.range_end,
            });
        };

        state.reserved.insert(backend);
        state.reserved.insert(frontend);
        tracing::debug!(backend, frontend, "Ports reserved");

        Ok(PortPair { backend, frontend })
    }

    /// `allocate`, released again when the reservation is dropped
    pub fn reserve(&self) -> Result<Reservation<'_>, PipelineError> {
        let ports = self.allocate()?;
        Ok(Reservation {
            registry: self,
            ports,
            committed: false,
        })
    }

    /// Drop a reservation that never became a record
    pub fn release(&self, ports: PortPair) {
        let mut state = self.lock();
        state.reserved.remove(&ports.backend);
        state.reserved.remove(&ports.frontend);
        tracing::debug!(backend = ports.backend, frontend = ports.frontend, "Ports released");
    }

    /// Record a deployment, taking over the reservation of its ports
    pub fn insert(&self, record: DeploymentRecord, services: Option<ServicePair>) {
        let mut state = self.lock();
        for port in record.ports() {
            state.reserved.remove(&port);
        }
        state.entries.insert(
            record.id.clone(),
            Entry {
                record,
                services,
                stopping: false,
            },
        );
    }

    pub fn lookup(&self, id: &str) -> Option<DeploymentRecord> {
        let state = self.lock();
        state
            .entries
            .get(id)
            .map(|e| &e.record)
            .or_else(|| state.stopped(id))
            .cloned()
    }

    /// Live records and the stopped history, newest first
    pub fn list(&self) -> Vec<DeploymentRecord> {
        let state = self.lock();
        let mut records: Vec<DeploymentRecord> = state
            .entries
            .values()
            .map(|e| e.record.clone())
            .chain(state.stopped.iter().cloned())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Live records only
    pub fn live_count(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn active_count(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|e| e.record.status.holds_ports())
            .count()
    }

    /// Take the processes of a live deployment, at most once
    pub fn claim_for_stop(&self, id: &str) -> StopClaim {
        let mut state = self.lock();
        if state.stopped(id).is_some() {
            return StopClaim::AlreadyStopped;
        }
        match state.entries.get_mut(id) {
            None => StopClaim::NotFound,
            Some(entry) if entry.stopping || entry.record.status == DeploymentStatus::Stopped => {
                StopClaim::AlreadyStopped
            }
            Some(entry) => {
                entry.stopping = true;
                StopClaim::Claimed(entry.services.take())
            }
        }
    }

    /// Move a claimed deployment to the stopped history; its ports become free
    pub fn complete_stop(&self, id: &str) -> Option<DeploymentRecord> {
        let mut state = self.lock();
        let mut record = state.entries.remove(id)?.record;
        record.status = DeploymentStatus::Stopped;
        record.stopped_at = Some(Utc::now());
        state.archive(record.clone());
        Some(record)
    }

    /// Ids of every deployment still holding ports
    pub fn active_ids(&self) -> Vec<String> {
        self.lock()
            .entries
            .values()
            .filter(|e| e.record.status.holds_ports())
            .map(|e| e.record.id.clone())
            .collect()
    }

    /// Forget a deployment without touching its processes
    ///
    /// The services keep running; only the record and its handles leave the
    /// registry.
    pub fn detach(&self, id: &str) -> Option<DeploymentRecord> {
        let entry = self.lock().entries.remove(id)?;
        Some(entry.record)
    }
}
