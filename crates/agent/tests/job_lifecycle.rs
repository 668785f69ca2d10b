mod support;

use mip_agent::integrity::{self, verify_token};
use mip_agent::{
    InlineDispatcher, LifecycleConfig, LifecycleError, UnconfiguredComputation, WorkerPool,
};
use mip_core::JobStatus;
use mip_storage::{JobStore, MemoryJobStore, SqliteJobStore};
use serde_json::json;
use std::sync::{Arc, Barrier};
use support::{Fixture, HELLO_SHA256, RecordingComputation};

fn stores() -> Vec<(&'static str, Arc<dyn JobStore>)> {
    let memory: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new(64));
    let sqlite: Arc<dyn JobStore> =
        Arc::new(SqliteJobStore::open_in_memory(64).expect("open sqlite"));
    vec![("memory", memory), ("sqlite", sqlite)]
}

#[test]
fn full_lifecycle_with_worker_pool() {
    for (backend, store) in stores() {
        let computation = Arc::new(RecordingComputation::echo_payload_len());
        let pool = Arc::new(WorkerPool::start(2, computation.clone()).expect("pool"));
        let fx = Fixture::new(store, pool.clone());

        let created = fx
            .controller
            .create_job(
                Some(&json!("buyer-7")),
                Some(&json!({ "html_file": support::HELLO_B64 })),
            )
            .expect("create");
        assert_eq!(created.input_hash, HELLO_SHA256, "{backend}");
        let job_id = created.job_id.as_str();
        assert_eq!(
            fx.controller.get_status(job_id).unwrap().status,
            JobStatus::AwaitingPayment
        );

        fx.controller.advance_on_payment(job_id).unwrap();
        let accepted = fx
            .controller
            .provide_input(job_id, &created.status_id, Some(&json!({ "month": "may" })), None)
            .unwrap();

        let view = fx.wait_settled(job_id);
        assert_eq!(view.status, JobStatus::Completed, "{backend}");
        assert_eq!(view.result, Some(json!({ "payload_len": 5 })));
        assert!(view.input_schema.is_none());

        let seen = computation.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload, b"hello".to_vec());
        assert_eq!(seen[0].extra_input, Some(json!({ "month": "may" })));

        let digest = integrity::fingerprint_json(&json!({ "month": "may" }));
        assert_eq!(accepted.input_hash, digest.as_str());
        assert!(verify_token(
            fx.signer.as_ref(),
            job_id,
            &created.status_id,
            &digest,
            &accepted.signature
        ));
        pool.shutdown();
    }
}

#[test]
fn computation_failures_and_panics_fail_the_job() {
    let computation = Arc::new(RecordingComputation::new(|input| {
        match input.extra_input.as_ref().and_then(|v| v.get("mode")).and_then(|v| v.as_str()) {
            Some("panic") => panic!("planner blew up"),
            _ => Err("no transactions found".to_string()),
        }
    }));
    let dispatcher = Arc::new(InlineDispatcher::new(computation));
    let fx = Fixture::new(Arc::new(MemoryJobStore::new(16)), dispatcher);

    let (failing, failing_status) = fx.job_awaiting_input();
    fx.controller
        .provide_input(&failing, &failing_status, Some(&json!({ "mode": "err" })), None)
        .unwrap();
    let view = fx.controller.get_status(&failing).unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error.as_deref(), Some("no transactions found"));

    let (panicking, panicking_status) = fx.job_awaiting_input();
    fx.controller
        .provide_input(
            &panicking,
            &panicking_status,
            Some(&json!({ "mode": "panic" })),
            None,
        )
        .unwrap();
    let view = fx.controller.get_status(&panicking).unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert!(
        view.error.as_deref().unwrap_or_default().contains("planner blew up"),
        "{:?}",
        view.error
    );
}

#[test]
fn unconfigured_backend_reports_unavailable_and_fails_jobs() {
    let dispatcher = Arc::new(InlineDispatcher::new(Arc::new(UnconfiguredComputation)));
    let fx = Fixture::with_config(
        Arc::new(MemoryJobStore::new(16)),
        dispatcher,
        LifecycleConfig {
            require_additional_input: false,
            ..LifecycleConfig::default()
        },
    );
    assert!(!fx.controller.is_available());

    let created = fx
        .controller
        .create_job(
            Some(&json!("buyer")),
            Some(&json!({ "html_file": support::HELLO_B64 })),
        )
        .unwrap();
    let status = fx
        .controller
        .advance_on_payment(created.job_id.as_str())
        .unwrap();
    assert_eq!(status, JobStatus::Running);

    let view = fx.controller.get_status(created.job_id.as_str()).unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.error.is_some());
}

#[test]
fn concurrent_provide_input_has_one_winner() {
    for (backend, store) in stores() {
        let (fx, dispatcher) = {
            let dispatcher = Arc::new(mip_agent::DeferredDispatcher::new());
            (Fixture::new(store, dispatcher.clone()), dispatcher)
        };
        let (job_id, status_id) = fx.job_awaiting_input();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles = (0..threads)
            .map(|n| {
                let controller = Arc::clone(&fx.controller);
                let barrier = Arc::clone(&barrier);
                let job_id = job_id.clone();
                let status_id = status_id.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    controller.provide_input(&job_id, &status_id, Some(&json!({ "n": n })), None)
                })
            })
            .collect::<Vec<_>>();
        let outcomes = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect::<Vec<_>>();

        let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        assert_eq!(winners, 1, "{backend}");
        for outcome in outcomes.iter().filter_map(|outcome| outcome.as_ref().err()) {
            assert!(
                matches!(outcome, LifecycleError::InvalidTransition { .. }),
                "{backend}: {outcome:?}"
            );
        }
        assert_eq!(dispatcher.len(), 1, "{backend}");
    }
}

#[test]
fn rejected_calls_leave_sqlite_records_untouched() {
    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::open_in_memory(16).unwrap());
    let dispatcher = Arc::new(mip_agent::DeferredDispatcher::new());
    let fx = Fixture::new(Arc::clone(&store), dispatcher.clone());
    let (job_id, _status_id) = fx.job_awaiting_input();
    let id = mip_core::JobId::try_new(job_id.clone()).unwrap();
    let before = store.get(&id).unwrap().unwrap();

    let err = fx
        .controller
        .provide_input(&job_id, "not-the-status-id", Some(&json!({})), None)
        .unwrap_err();
    assert_eq!(err.kind(), "unauthorized");
    let err = fx
        .controller
        .provide_input(&job_id, "x", Some(&json!({})), Some(&json!([])))
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    assert_eq!(store.get(&id).unwrap().unwrap(), before);
    assert!(dispatcher.is_empty());
}

#[test]
fn jobs_survive_a_restart_with_sqlite() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (job_id, status_id) = {
        let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::open(dir.path(), 16).unwrap());
        let fx = Fixture::new(store, Arc::new(mip_agent::DeferredDispatcher::new()));
        fx.job_awaiting_input()
    };

    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::open(dir.path(), 16).unwrap());
    let dispatcher = Arc::new(mip_agent::DeferredDispatcher::new());
    let fx = Fixture::new(store, dispatcher.clone());
    assert_eq!(
        fx.controller.get_status(&job_id).unwrap().status,
        JobStatus::AwaitingInput
    );
    fx.controller
        .provide_input(&job_id, &status_id, Some(&json!({ "resumed": true })), None)
        .unwrap();
    for work in dispatcher.take() {
        work.completion.finish(Ok(json!({ "ok": true })));
    }
    assert_eq!(
        fx.controller.get_status(&job_id).unwrap().result,
        Some(json!({ "ok": true }))
    );
}

#[test]
fn reaper_uses_the_injected_clock() {
    let (fx, _dispatcher) = Fixture::deferred();
    let (job_id, _) = fx.job_awaiting_input();

    fx.clock.advance_ms(2 * 60 * 60 * 1_000);
    assert!(fx.controller.reap_expired(fx.controller.now_ms()).unwrap().is_empty());

    fx.clock.advance_ms(1);
    let reaped = fx.controller.reap_expired(fx.controller.now_ms()).unwrap();
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].as_str(), job_id);

    let view = fx.controller.get_status(&job_id).unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error.as_deref(), Some("submitResultTime passed"));

    let err = fx
        .controller
        .provide_input(&job_id, "whatever", Some(&json!({})), None)
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_transition");
}
