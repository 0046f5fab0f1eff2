//! Tracepoint lifecycle manager — the control loop that:
//! - Persists tracepoint deployments with idempotent create semantics
//! - Fans register messages out to agents matching each program's selectors
//! - Reaps deployments whose lease expired and requests their removal
//! - Deletes a deployment once every agent acknowledges termination
//!
//! The manager owns exactly one background task (the TTL reaper) and holds
//! its collaborators behind capability traits, so all mutable state lives in
//! the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tracefleet_state::{
    now_millis, AgentId, AgentTracepointStatus, LifecycleState, TracepointDeployment,
    TracepointId, TracepointProgram, TracepointRecord, TracepointStore,
};

use crate::agent::Agent;
use crate::envelope::ControlMessage;
use crate::error::{ManagerError, ManagerResult};
use crate::fanout::plan_register;
use crate::messenger::AgentMessenger;

/// Manages the tracepoints deployed across the agent fleet.
///
/// The collaborator slots are filled at construction and emptied by
/// [`close`](Self::close); every entry point re-reads them, so a closed
/// manager reports [`ManagerError::Closed`] instead of touching released
/// collaborators.
pub struct TracepointManager {
    store: Mutex<Option<Arc<dyn TracepointStore>>>,
    messenger: Mutex<Option<Arc<dyn AgentMessenger>>>,
    shutdown_tx: watch::Sender<bool>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl TracepointManager {
    /// Create a new manager and start its TTL reaper.
    ///
    /// Must be called within a tokio runtime; the reaper runs until
    /// [`close`](Self::close).
    pub fn new(
        store: Arc<dyn TracepointStore>,
        messenger: Arc<dyn AgentMessenger>,
        reaper_period: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reaper_store = Arc::clone(&store);
        let reaper_messenger = Arc::clone(&messenger);
        let handle = tokio::spawn(run_reaper(
            reaper_store,
            reaper_messenger,
            reaper_period,
            shutdown_rx,
        ));

        Self {
            store: Mutex::new(Some(store)),
            messenger: Mutex::new(Some(messenger)),
            shutdown_tx,
            reaper: Mutex::new(Some(handle)),
        }
    }

    /// The store handle, or [`ManagerError::Closed`] after close.
    fn store(&self) -> ManagerResult<Arc<dyn TracepointStore>> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ManagerError::Closed)
    }

    /// The messenger handle, or [`ManagerError::Closed`] after close.
    fn messenger(&self) -> ManagerResult<Arc<dyn AgentMessenger>> {
        self.messenger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ManagerError::Closed)
    }

    /// Create and persist a named tracepoint deployment.
    ///
    /// If a live deployment already exists under this name with a pairwise
    /// equal program list, only its lease is refreshed and the call returns
    /// [`ManagerError::AlreadyExists`] carrying the existing id. If the
    /// programs differ, the old deployment's lease is dropped (the reaper
    /// will drive it to termination) and a fresh id is minted for the new
    /// one.
    pub fn create_tracepoint(
        &self,
        name: &str,
        deployment: TracepointDeployment,
        ttl: Duration,
    ) -> ManagerResult<TracepointId> {
        let store = self.store()?;

        let resolved = store.lookup_names(&[name.to_string()])?;
        if resolved.len() != 1 {
            return Err(ManagerError::NameLookup);
        }

        if let Some(prev_id) = resolved[0] {
            if let Some(prev) = store.get_tracepoint(prev_id)? {
                if prev.expected_state != LifecycleState::Terminated {
                    if programs_equal(&deployment.programs, &prev.deployment.programs) {
                        // Same deployment; just extend the lease.
                        store.set_ttl(prev_id, ttl)?;
                        return Err(ManagerError::AlreadyExists(prev_id));
                    }
                    // Something changed: schedule termination of the old
                    // deployment and fall through to create the new one.
                    store.delete_ttls(&[prev_id])?;
                    debug!(%name, old = %prev_id, "deployment changed, old lease dropped");
                }
            }
        }

        let id = Uuid::new_v4();
        let record = TracepointRecord {
            id,
            name: name.to_string(),
            deployment,
            expected_state: LifecycleState::Running,
        };
        store.upsert_tracepoint(id, &record)?;
        store.set_ttl(id, ttl)?;
        store.bind_name(name, id)?;

        info!(%name, %id, ttl_secs = ttl.as_secs(), "tracepoint created");
        Ok(id)
    }

    /// Send register requests for the given deployment to matching agents.
    ///
    /// Programs sharing a valid-agent set are coalesced into one message.
    /// A transport failure aborts the remaining groups; already-dispatched
    /// groups are not rolled back (agent-side registration is idempotent).
    pub async fn register_tracepoint(
        &self,
        agents: &[Agent],
        id: TracepointId,
        deployment: &TracepointDeployment,
    ) -> ManagerResult<()> {
        let messenger = self.messenger()?;

        let groups = plan_register(agents, deployment);
        let group_count = groups.len();

        for group in groups {
            let payload = ControlMessage::RegisterTracepoint {
                id,
                deployment: group.deployment,
            }
            .to_bytes()?;
            messenger.send_to_agents(&group.agents, payload).await?;
        }

        debug!(%id, groups = group_count, "register fan-out dispatched");
        Ok(())
    }

    /// Record a status reported by an agent for a tracepoint.
    ///
    /// A terminal report from the last outstanding agent deletes the
    /// deployment record entirely; the check excludes the reporting agent,
    /// whose own terminal status has not been written yet.
    pub fn update_agent_status(
        &self,
        tracepoint_id: TracepointId,
        agent_id: AgentId,
        state: LifecycleState,
        status: Option<String>,
    ) -> ManagerResult<()> {
        let store = self.store()?;

        if state == LifecycleState::Terminated {
            let statuses = store.list_agent_statuses(tracepoint_id)?;
            let all_terminated = statuses
                .iter()
                .all(|s| s.state == LifecycleState::Terminated || s.agent_id == agent_id);

            if all_terminated {
                info!(tracepoint = %tracepoint_id, "all agents terminated, deleting record");
                return Ok(store.delete_tracepoint(tracepoint_id)?);
            }
        }

        store.update_agent_status(&AgentTracepointStatus {
            tracepoint_id,
            agent_id,
            state,
            status,
        })?;
        Ok(())
    }

    /// Start the termination process for the named tracepoints.
    ///
    /// Fails with [`ManagerError::NotFound`] naming the first unbound name;
    /// otherwise drops every lease so the reaper drives each deployment to
    /// termination.
    pub fn remove_tracepoints(&self, names: &[String]) -> ManagerResult<()> {
        let store = self.store()?;
        let resolved = store.lookup_names(names)?;

        let mut ids = Vec::with_capacity(resolved.len());
        for (i, id) in resolved.iter().enumerate() {
            match id {
                Some(id) => ids.push(*id),
                None => return Err(ManagerError::NotFound(names[i].clone())),
            }
        }

        store.delete_ttls(&ids)?;
        info!(count = ids.len(), "tracepoint removal scheduled");
        Ok(())
    }

    /// Drop all per-agent statuses for an agent that permanently left.
    pub fn delete_agent(&self, agent_id: AgentId) -> ManagerResult<()> {
        Ok(self.store()?.delete_all_for_agent(agent_id)?)
    }

    // ── Read-only views ────────────────────────────────────────────

    /// All tracepoints currently tracked.
    pub fn all_tracepoints(&self) -> ManagerResult<Vec<TracepointRecord>> {
        Ok(self.store()?.list_tracepoints()?)
    }

    /// The record for a single tracepoint, if present.
    pub fn tracepoint_info(&self, id: TracepointId) -> ManagerResult<Option<TracepointRecord>> {
        Ok(self.store()?.get_tracepoint(id)?)
    }

    /// All known agent statuses for a tracepoint.
    pub fn tracepoint_statuses(
        &self,
        id: TracepointId,
    ) -> ManagerResult<Vec<AgentTracepointStatus>> {
        Ok(self.store()?.list_agent_statuses(id)?)
    }

    /// Records for the given ids; absent ids are skipped.
    pub fn tracepoints_for_ids(
        &self,
        ids: &[TracepointId],
    ) -> ManagerResult<Vec<TracepointRecord>> {
        Ok(self.store()?.lookup_by_ids(ids)?)
    }

    /// Stop the reaper and release the store and messenger references.
    /// Idempotent; further manager calls report [`ManagerError::Closed`].
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut slot = self.reaper.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
            debug!("tracepoint reaper stopped");
        }
        drop(slot);

        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.messenger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Pairwise structural comparison of program lists. A length mismatch always
/// counts as different.
fn programs_equal(new: &[TracepointProgram], prev: &[TracepointProgram]) -> bool {
    new.len() == prev.len() && new.iter().zip(prev).all(|(a, b)| a == b)
}

// ── TTL reaper ─────────────────────────────────────────────────────

/// The reaper loop: every `period`, terminate deployments whose lease is
/// absent or expired.
async fn run_reaper(
    store: Arc<dyn TracepointStore>,
    messenger: Arc<dyn AgentMessenger>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(period_ms = period.as_millis() as u64, "tracepoint reaper started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {
                terminate_expired(store.as_ref(), messenger.as_ref()).await;
            }
            _ = shutdown.changed() => {
                debug!("tracepoint reaper shutting down");
                break;
            }
        }
    }
}

/// One reaper pass. Errors are logged and the pass moves on; the next tick
/// retries from scratch.
async fn terminate_expired(store: &dyn TracepointStore, messenger: &dyn AgentMessenger) {
    let tracepoints = match store.list_tracepoints() {
        Ok(tps) => tps,
        Err(e) => {
            warn!(error = %e, "failed to list tracepoints for expiry check");
            return;
        }
    };

    let (ids, expiries) = match store.list_ttls() {
        Ok(ttls) => ttls,
        Err(e) => {
            warn!(error = %e, "failed to list leases for expiry check");
            return;
        }
    };

    let now = now_millis();
    // Ids absent from the lease index count as expired.
    let active: HashMap<TracepointId, bool> = ids
        .into_iter()
        .zip(expiries)
        .map(|(id, expiry)| (id, expiry > now))
        .collect();

    for tp in tracepoints {
        if active.get(&tp.id).copied().unwrap_or(false) {
            continue;
        }
        if tp.expected_state == LifecycleState::Terminated {
            continue;
        }
        if let Err(e) = terminate(store, messenger, tp.id).await {
            warn!(tracepoint = %tp.id, error = %e, "failed to terminate expired tracepoint");
        }
    }
}

/// Mark a deployment terminated and broadcast its removal.
///
/// Broadcast rather than addressed send: the manager does not track which
/// agents currently host the deployment, and agents ignore removes for
/// tracepoints they never registered. Record deletion happens later, when
/// the last agent reports terminated.
async fn terminate(
    store: &dyn TracepointStore,
    messenger: &dyn AgentMessenger,
    id: TracepointId,
) -> ManagerResult<()> {
    let Some(mut tp) = store.get_tracepoint(id)? else {
        // Another actor already deleted it.
        return Ok(());
    };

    tp.expected_state = LifecycleState::Terminated;
    store.upsert_tracepoint(id, &tp)?;

    let payload = ControlMessage::RemoveTracepoint { id }.to_bytes()?;
    messenger.broadcast(payload).await?;

    info!(tracepoint = %id, name = %tp.name, "tracepoint termination requested");
    Ok(())
}
