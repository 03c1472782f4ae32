//! End-to-end scenarios spanning broker, executor, and recovery,
//! exercising the library surface the binaries are thin wrappers around
//! (spec §8 literal end-to-end scenarios).

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use fabric::broker::Broker;
use fabric::clock::ClockSnapshot;
use fabric::config::NodeConfig;
use fabric::emergency::{EmergencyContext, EmergencyLevel};
use fabric::error::FabricError;
use fabric::executor::Executor;
use fabric::job::{CapabilitiesRequired, JobId, JobInfo};
use fabric::net::ExecutorClient;
use fabric::sandbox::MockSandbox;

fn job(payload: &[u8]) -> JobInfo {
    JobInfo {
        payload: payload.to_vec(),
        capabilities_required: CapabilitiesRequired::default(),
        dependencies: vec![],
        user_priority: 1,
        deadline_urgency: 0.0,
        computational_weight: 1.0,
        deadline: None,
    }
}

/// Forwards a broker's dispatch straight into an in-process executor,
/// standing in for the HTTP hop the reference binaries perform.
struct InProcessExecutorClient {
    executor: Arc<Executor>,
    calls: AtomicUsize,
}

#[async_trait]
impl ExecutorClient for InProcessExecutorClient {
    async fn submit_job(
        &self,
        _endpoint: &str,
        broker_clock: &fabric::clock::VectorClock,
        job_id: JobId,
        job_info: &JobInfo,
        priority_score: f64,
        emergency_context: Option<EmergencyContext>,
    ) -> Result<(), FabricError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executor.clock.merge(&broker_clock.snapshot());
        let (kind, level) = match &emergency_context {
            Some(ctx) => (Some(ctx.kind.clone()), Some(ctx.level)),
            None => (None, None),
        };
        self.executor.receive_job(
            job_id,
            job_info.clone(),
            emergency_context.is_some(),
            kind,
            level,
            priority_score,
        )
    }

    async fn push_emergency(
        &self,
        _endpoint: &str,
        broker_clock: &fabric::clock::VectorClock,
        context: Option<EmergencyContext>,
    ) -> Result<(), FabricError> {
        self.executor.clock.merge(&broker_clock.snapshot());
        match context {
            Some(ctx) => {
                self.executor.enter_emergency(ctx);
            }
            None => self.executor.clear_emergency(),
        }
        Ok(())
    }
}

#[tokio::test]
async fn job_travels_from_broker_submission_to_accepted_result() {
    let broker = Broker::new(NodeConfig {
        node_id: "b1".into(),
        ..Default::default()
    });
    broker
        .executors
        .upsert_heartbeat("e1", "http://e1", HashSet::new(), ClockSnapshot::new(), false);

    let executor = Arc::new(Executor::new(
        "e1",
        Arc::new(NodeConfig::default()),
        HashSet::new(),
        Arc::new(MockSandbox::echo()),
    ));
    let client = InProcessExecutorClient {
        executor: executor.clone(),
        calls: AtomicUsize::new(0),
    };

    let job_id = JobId::new_v4();
    broker.submit_job(job_id, job(b"hello")).unwrap();
    let dispatched = broker.dispatch_next(&client, &HashSet::new()).await.unwrap();
    assert_eq!(dispatched, Some(job_id));
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    // the executor's clock now carries the broker's causal history.
    assert!(executor.clock.get("b1") > 0);

    let running_job = executor.try_dispatch_one().unwrap();
    executor
        .run_job(running_job, tokio_util::sync::CancellationToken::new())
        .await;

    let record = executor.results.get(&job_id).unwrap();
    assert_eq!(record.result, b"hello");
    assert_eq!(record.producing_executor, "e1");
}

#[tokio::test]
async fn declared_emergency_still_queues_normal_submissions_until_cleared() {
    // spec Scenario 3: "new normal jobs still queue but do not start" —
    // the broker admits normal work during a fleet emergency; preemption
    // happens at the executor dispatch pump, not at submission.
    let broker = Broker::new(NodeConfig {
        node_id: "b1".into(),
        ..Default::default()
    });
    broker
        .recovery
        .declare_fleet_emergency("fire", EmergencyLevel::High, Some("block 4".into()));

    broker.submit_job(JobId::new_v4(), job(b"routine")).unwrap();
    assert_eq!(broker.queue.len(), 1);

    // an emergency-classified submission is also admitted.
    broker
        .submit_job(JobId::new_v4(), job(b"fire in sector 9"))
        .unwrap();
    assert_eq!(broker.queue.len(), 2);

    broker.recovery.clear_fleet_emergency();
    broker.submit_job(JobId::new_v4(), job(b"routine")).unwrap();
    assert_eq!(broker.queue.len(), 3);
}

#[tokio::test]
async fn broker_declared_emergency_preempts_a_job_already_queued_on_the_executor() {
    let broker = Broker::new(NodeConfig {
        node_id: "b1".into(),
        ..Default::default()
    });
    broker
        .executors
        .upsert_heartbeat("e1", "http://e1", HashSet::new(), ClockSnapshot::new(), false);

    let executor = Arc::new(Executor::new(
        "e1",
        Arc::new(NodeConfig::default()),
        HashSet::new(),
        Arc::new(MockSandbox::echo()),
    ));
    let client = InProcessExecutorClient {
        executor: executor.clone(),
        calls: AtomicUsize::new(0),
    };

    let normal_job = JobId::new_v4();
    broker.submit_job(normal_job, job(b"routine")).unwrap();
    broker.dispatch_next(&client, &HashSet::new()).await.unwrap();
    assert_eq!(executor.pending_len(), 1);

    // a fleet emergency declared after the job was already queued must
    // still block it from starting.
    broker.declare_emergency("fire", EmergencyLevel::Critical, None, &client).await;
    assert!(executor.is_suppressing_normal_work());
    assert!(executor.try_dispatch_one().is_none());
    assert_eq!(executor.pending_len(), 1);

    broker.clear_emergency(&client).await;
    assert!(!executor.is_suppressing_normal_work());
    let dispatched = executor.try_dispatch_one().expect("job dispatches once the emergency clears");
    assert_eq!(dispatched.job_id, normal_job);
}

#[tokio::test]
async fn failed_executor_orphans_are_redispatched_to_a_healthy_peer() {
    let broker = Broker::new(NodeConfig {
        node_id: "b1".into(),
        heartbeat_period_seconds: 1,
        heartbeat_failure_multiplier: 1,
        ..Default::default()
    });
    broker
        .executors
        .upsert_heartbeat("e1", "http://e1", HashSet::new(), ClockSnapshot::new(), false);
    broker
        .executors
        .upsert_heartbeat("e2", "http://e2", HashSet::new(), ClockSnapshot::new(), false);
    broker.recovery.register("e1");
    broker.recovery.register("e2");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let job_id = JobId::new_v4();
    broker.in_flight.record(
        "e1",
        fabric::job::JobSubmission {
            job_id,
            job_info: job(b"hello"),
            submitted_at: chrono::Utc::now(),
            submission_clock: broker.clock.snapshot(),
            is_emergency: false,
            emergency_kind: None,
            emergency_level: None,
            priority_score: 0.0,
            assigned_executor: Some("e1".to_string()),
        },
    );

    // e1 has been silent for 50ms, e2 just heartbeated: a 20ms threshold
    // catches e1 only.
    broker.recovery.heartbeat("e2");
    let newly_failed = broker
        .recovery
        .check_timeouts(std::time::Duration::from_millis(20));
    assert_eq!(newly_failed, vec!["e1".to_string()]);

    let requeued = broker.requeue_orphaned("e1");
    assert_eq!(requeued, 1);
    assert!(broker.queue.contains(&job_id));

    let client = Arc::new(Mutex::new(Vec::<String>::new()));
    struct RecordingExecutorClient(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl ExecutorClient for RecordingExecutorClient {
        async fn submit_job(
            &self,
            endpoint: &str,
            _broker_clock: &fabric::clock::VectorClock,
            _job_id: JobId,
            _job_info: &JobInfo,
            _priority_score: f64,
            _emergency_context: Option<EmergencyContext>,
        ) -> Result<(), FabricError> {
            self.0.lock().unwrap().push(endpoint.to_string());
            Ok(())
        }

        async fn push_emergency(
            &self,
            _endpoint: &str,
            _broker_clock: &fabric::clock::VectorClock,
            _context: Option<EmergencyContext>,
        ) -> Result<(), FabricError> {
            Ok(())
        }
    }

    let recorder = RecordingExecutorClient(client.clone());
    let mut excluded = HashSet::new();
    excluded.insert("e1".to_string());
    broker.dispatch_next(&recorder, &excluded).await.unwrap();
    assert_eq!(client.lock().unwrap().as_slice(), ["http://e2"]);
}
