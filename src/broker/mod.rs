//! The broker: job intake, queue ordering, executor selection and
//! dispatch, and peer coordination (spec §4.3). Each submodule owns one
//! lock-guarded structure; `Broker` wires them together and is the only
//! place that crosses structures.

pub mod in_flight;
pub mod peer;
pub mod queue;
pub mod registry;
pub mod sync;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::clock::VectorClock;
use crate::config::NodeConfig;
use crate::discovery::PeerDiscovery;
use crate::emergency::EmergencyLevel;
use crate::error::FabricError;
use crate::job::{priority_score, ExecutorHealth, JobId, JobInfo, JobSubmission};
use crate::net::{ExecutorClient, PeerClient};
use crate::recovery::RecoveryManager;

use in_flight::InFlightJobs;
use peer::PeerTable;
use queue::JobQueue;
use registry::ExecutorRegistry;
use sync::{BrokerMetadata, EmergencySlot, PeerAdvertisement, SyncSequence};

/// Everything one broker node owns. Cloning a `Broker` clones only `Arc`
/// handles, so background tasks (discovery loop, sync loop, dispatch
/// pump) can each hold one and run concurrently against shared state
/// (spec §5: "single lock per structure", never a lock across structures).
#[derive(Clone)]
pub struct Broker {
    pub node_id: String,
    pub config: Arc<NodeConfig>,
    pub clock: VectorClock,
    pub queue: Arc<JobQueue>,
    pub executors: Arc<ExecutorRegistry>,
    pub peers: Arc<PeerTable>,
    pub emergency: Arc<EmergencySlot>,
    pub in_flight: Arc<InFlightJobs>,
    pub recovery: Arc<RecoveryManager>,
    sync_sequence: Arc<SyncSequence>,
    /// First time each head-of-queue job was observed with no capable
    /// executor, for the §4.3.3 wait-deadline. Cleared once the job is
    /// dispatched or failed.
    unservable_since: Arc<Mutex<HashMap<JobId, DateTime<Utc>>>>,
    /// Failed executors excluded from redispatch candidacy until the
    /// recorded instant (spec §4.5 grace window).
    excluded_until: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl Broker {
    pub fn new(config: NodeConfig) -> Self {
        let clock = VectorClock::new(config.node_id.clone());
        let executors = Arc::new(ExecutorRegistry::new());
        let emergency = Arc::new(EmergencySlot::default());
        let recovery = Arc::new(RecoveryManager::new(
            executors.clone(),
            emergency.clone(),
            clock.clone(),
        ));
        Self {
            node_id: config.node_id.clone(),
            queue: Arc::new(JobQueue::new(config.queue_capacity)),
            executors,
            peers: Arc::new(PeerTable::new()),
            emergency,
            in_flight: Arc::new(InFlightJobs::new()),
            recovery,
            sync_sequence: Arc::new(SyncSequence::default()),
            unservable_since: Arc::new(Mutex::new(HashMap::new())),
            excluded_until: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
            clock,
        }
    }

    /// Job intake (spec §4.3.1): tick the clock, classify for emergency
    /// content, score, and push onto the ordered queue. A fleet-wide
    /// HIGH/CRITICAL emergency does *not* block admission here — normal
    /// jobs still queue (spec Scenario 3: "new normal jobs still queue but
    /// do not start"); preemption is enforced where jobs transition from
    /// queued to running, at the executor dispatch pump
    /// (`executor::Executor::try_dispatch_one`).
    pub fn submit_job(&self, job_id: JobId, job_info: JobInfo) -> Result<(), FabricError> {
        let haystack = String::from_utf8_lossy(&job_info.payload).to_string();
        let classification = self.config.emergency_keywords.classify(&haystack);
        let is_emergency = classification.is_some();

        self.clock.tick();
        let score = priority_score(
            &job_info,
            classification
                .as_ref()
                .map(|(kind, level)| (kind.as_str(), *level)),
            &self.config.priority_weights,
        );
        let submission = JobSubmission {
            job_id,
            job_info,
            submitted_at: Utc::now(),
            submission_clock: self.clock.snapshot(),
            is_emergency,
            emergency_kind: classification.as_ref().map(|(kind, _)| kind.clone()),
            emergency_level: classification.as_ref().map(|(_, level)| *level),
            priority_score: score,
            assigned_executor: None,
        };
        self.queue.push(submission)
    }

    /// Executors currently excluded from redispatch candidacy because
    /// they were the ones a job was orphaned away from, pruning any whose
    /// grace window (spec §4.5) has elapsed.
    fn currently_excluded(&self) -> HashSet<String> {
        let now = Utc::now();
        let mut guard = self.excluded_until.lock().unwrap();
        guard.retain(|_, expiry| *expiry > now);
        guard.keys().cloned().collect()
    }

    /// Dispatch the head of the queue to the best candidate executor
    /// (spec §4.3.3), if any is available. Returns `Ok(Some(job_id))` when
    /// a job was sent, `Ok(None)` when the queue is empty or the head has
    /// no capable executor yet (it stays queued for the next attempt).
    /// Once a job has sat at the head with no capable executor past
    /// `no_capable_executor_deadline_seconds`, it is dropped from the
    /// queue and failed with `NoCapableExecutor` (spec §4.3.3, Scenario 6).
    pub async fn dispatch_next(
        &self,
        executor_client: &dyn ExecutorClient,
        excluded: &HashSet<String>,
    ) -> Result<Option<JobId>, FabricError> {
        let Some(job) = self.queue.peek_head() else {
            return Ok(None);
        };
        let mut excluded = excluded.clone();
        excluded.extend(self.currently_excluded());

        let Some(candidate) = self.executors.select_candidate(
            &job.job_info.capabilities_required,
            job.is_emergency,
            &excluded,
        ) else {
            let now = Utc::now();
            let deadline = chrono::Duration::seconds(
                self.config.no_capable_executor_deadline_seconds as i64,
            );
            let mut waiting = self.unservable_since.lock().unwrap();
            let first_seen = *waiting.entry(job.job_id).or_insert(now);
            if now - first_seen >= deadline {
                waiting.remove(&job.job_id);
                drop(waiting);
                self.queue.remove(&job.job_id);
                warn!(job_id = %job.job_id, "no capable executor within deadline, failing job");
                return Err(FabricError::NoCapableExecutor);
            }
            return Ok(None);
        };
        self.unservable_since.lock().unwrap().remove(&job.job_id);

        let emergency_context = if job.is_emergency {
            self.emergency.get()
        } else {
            None
        };
        executor_client
            .submit_job(
                &candidate.endpoint,
                &self.clock,
                job.job_id,
                &job.job_info,
                job.priority_score,
                emergency_context,
            )
            .await?;

        self.queue.remove(&job.job_id);
        self.executors
            .set_running_count(&candidate.executor_id, candidate.running_job_count + 1);
        let mut dispatched = job.clone();
        dispatched.assigned_executor = Some(candidate.executor_id.clone());
        self.in_flight.record(&candidate.executor_id, dispatched);
        info!(job_id = %job.job_id, executor = %candidate.executor_id, "dispatched job");
        Ok(Some(job.job_id))
    }

    /// Drain and redispatch jobs orphaned by a newly FAILED executor
    /// (spec §4.5 step 3-4): push each back onto the queue, excluding the
    /// failed executor from redispatch candidacy for
    /// `failed_executor_exclusion_seconds`.
    pub fn requeue_orphaned(&self, executor_id: &str) -> usize {
        let expiry = Utc::now()
            + chrono::Duration::seconds(self.config.failed_executor_exclusion_seconds as i64);
        self.excluded_until
            .lock()
            .unwrap()
            .insert(executor_id.to_string(), expiry);

        let orphaned = self.in_flight.drain_executor(executor_id);
        let mut requeued = 0;
        for mut job in orphaned {
            job.assigned_executor = None;
            if self.queue.push(job).is_ok() {
                requeued += 1;
            } else {
                warn!(executor_id, "dropped orphaned job: queue saturated");
            }
        }
        requeued
    }

    /// Push the current fleet emergency state to every known healthy
    /// executor (spec §4.5: "every broker... instructs every local
    /// executor to enter emergency mode with the same kind/level";
    /// clearing is symmetric). A single push failure does not stop the
    /// rest of the fleet from being notified.
    pub async fn broadcast_emergency(&self, executor_client: &dyn ExecutorClient) {
        let context = self.emergency.get();
        for record in self.executors.snapshot() {
            if record.health != ExecutorHealth::Healthy {
                continue;
            }
            if let Err(error) = executor_client
                .push_emergency(&record.endpoint, &self.clock, context.clone())
                .await
            {
                warn!(executor_id = %record.executor_id, %error, "failed to push emergency state");
            }
        }
    }

    /// Declare a fleet emergency and immediately push it to this
    /// broker's own executors, in addition to the next metadata sync
    /// propagating it to peer brokers (spec §4.5).
    pub async fn declare_emergency(
        &self,
        kind: impl Into<String>,
        level: EmergencyLevel,
        location: Option<String>,
        executor_client: &dyn ExecutorClient,
    ) {
        self.recovery.declare_fleet_emergency(kind, level, location);
        self.broadcast_emergency(executor_client).await;
    }

    /// Clear the fleet emergency and immediately push the clear to this
    /// broker's own executors.
    pub async fn clear_emergency(&self, executor_client: &dyn ExecutorClient) {
        self.recovery.clear_fleet_emergency();
        self.broadcast_emergency(executor_client).await;
    }

    /// One heartbeat-timeout sweep (spec §4.5): declares silent executors
    /// FAILED and requeues whatever they had in flight.
    pub fn run_recovery_sweep(&self) {
        for executor_id in self.recovery.check_timeouts(self.config.heartbeat_failure_threshold()) {
            let count = self.requeue_orphaned(&executor_id);
            warn!(executor_id, requeued = count, "executor declared failed");
        }
    }

    /// Build this broker's current metadata snapshot for sync (spec §3
    /// "BrokerMetadata", §4.3.5).
    pub fn metadata_snapshot(&self) -> BrokerMetadata {
        let job_counts = [
            ("queued".to_string(), self.queue.len() as u64),
            ("in_flight".to_string(), self.executors.snapshot().iter().map(|e| e.running_job_count as u64).sum()),
        ]
        .into_iter()
        .collect();
        BrokerMetadata {
            broker_id: self.node_id.clone(),
            clock: self.clock.snapshot(),
            executors: self.executors.snapshot(),
            peers: self
                .peers
                .snapshot()
                .into_iter()
                .map(|p| PeerAdvertisement {
                    node_id: p.node_id,
                    endpoint: p.endpoint,
                })
                .collect(),
            emergency: self.emergency.get(),
            job_counts,
            sync_sequence: self.sync_sequence.next(),
        }
    }

    /// Merge a peer's metadata into local state (spec §4.3.5 steps 1-4):
    /// merge clock, reconcile each executor record, reconcile the
    /// emergency context, union peer tables. Returns whether the
    /// reconciled emergency context changed, so callers know whether to
    /// push the new state on to their own executors.
    pub fn absorb_peer_metadata(&self, peer: &BrokerMetadata) -> bool {
        self.clock.merge(&peer.clock);
        for record in &peer.executors {
            self.executors.reconcile_with_peer(record);
        }
        let emergency_changed = self.emergency.reconcile_with_peer(peer.emergency.as_ref());
        let entries: Vec<peer::PeerEntry> = peer
            .peers
            .iter()
            .map(|p| peer::PeerEntry {
                node_id: p.node_id.clone(),
                endpoint: p.endpoint.clone(),
                state: peer::PeerState::Unknown,
                last_sync_at: None,
                unhealthy_since: None,
            })
            .collect();
        self.peers.union_with(&entries);
        emergency_changed
    }

    /// One round of the sync loop (spec §4.3.5, default period 60s): sync
    /// with every known healthy peer, absorbing whatever comes back. A
    /// peer timeout marks it unhealthy and does not merge any clock
    /// (spec §5: "timeout never merges the caller's clock"). If sync
    /// brings in a causally later fleet emergency, it is pushed on to
    /// this broker's own executors the same way a local declaration is.
    pub async fn sync_with_peers(&self, peer_client: &dyn PeerClient, executor_client: &dyn ExecutorClient) {
        let mine = self.metadata_snapshot();
        let mut emergency_changed = false;
        for peer in self.peers.healthy_peers() {
            match peer_client
                .sync_metadata(&peer.endpoint, &mine, self.config.sync_timeout())
                .await
            {
                Ok(remote) => {
                    emergency_changed |= self.absorb_peer_metadata(&remote);
                    self.peers.mark_healthy(&peer.node_id);
                }
                Err(_) => self.peers.mark_unhealthy(&peer.node_id),
            }
        }
        self.peers.drop_expired();
        if emergency_changed {
            self.broadcast_emergency(executor_client).await;
        }
    }

    /// One round of the discovery loop (spec §4.3.5, default period 30s):
    /// probe every discovered candidate, inserting or refreshing it and
    /// transitioning its probe state.
    pub async fn run_discovery(&self, discovery: &dyn PeerDiscovery, peer_client: &dyn PeerClient) {
        let candidates = match discovery.discover().await {
            Ok(candidates) => candidates,
            Err(error) => {
                warn!(%error, "peer discovery failed");
                return;
            }
        };
        for candidate in candidates {
            if candidate.node_id == self.node_id {
                continue;
            }
            self.peers.discovered(&candidate.node_id, &candidate.endpoint);
            self.peers.mark_probing(&candidate.node_id);
            if peer_client
                .probe(&candidate.endpoint, self.config.heartbeat_probe_timeout())
                .await
            {
                self.peers.mark_healthy(&candidate.node_id);
            } else {
                self.peers.mark_unhealthy(&candidate.node_id);
            }
        }
    }

    /// Periodic background loop driver, cancellable via `cancel` (spec §5
    /// "Cancellation and timeouts": background loops must stop promptly).
    pub async fn run_sync_loop(
        &self,
        peer_client: Arc<dyn PeerClient>,
        executor_client: Arc<dyn ExecutorClient>,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.sync_period());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.sync_with_peers(peer_client.as_ref(), executor_client.as_ref()).await,
            }
        }
    }

    pub async fn run_discovery_loop(
        &self,
        discovery: Arc<dyn PeerDiscovery>,
        peer_client: Arc<dyn PeerClient>,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.discovery_period());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.run_discovery(discovery.as_ref(), peer_client.as_ref()).await,
            }
        }
    }

    pub async fn run_recovery_loop(&self, cancel: tokio_util::sync::CancellationToken) {
        let period: Duration = self.config.heartbeat_period();
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.run_recovery_sweep(),
            }
        }
    }
}
