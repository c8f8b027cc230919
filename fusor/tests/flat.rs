//! End-to-end flat allreduce over the simulated cluster.

mod common;

use std::sync::Arc;
use std::sync::mpsc::channel;

use common::{make_entry, wait_all};
use fusor::sim::SimCluster;
use fusor::{
    AllreduceStrategy, DataType, EngineConfig, FusorError, Status, Timeline, TracingTimeline,
};

#[test]
fn four_workers_sum_ones_f32() {
    let cluster = SimCluster::new(&[2, 2], EngineConfig::default());
    let response = cluster.response();

    cluster.run(|w| {
        let input = vec![1.0f32; 100];
        let mut output = vec![0.0f32; 100];
        let (tx, rx) = channel();
        let entry = make_entry("grad", &input, &mut output, DataType::F32, w.device(), &tx);

        let status =
            unsafe { w.engine.execute(AllreduceStrategy::Flat, vec![entry], &response) }.unwrap();
        assert_eq!(status, Status::InProgress);

        assert!(wait_all(&rx, 1)[0].is_ok());
        assert_eq!(output, vec![4.0f32; 100], "rank {}", w.rank);
    });
}

#[test]
fn i64_contribution_from_one_rank_reaches_all() {
    let cluster = SimCluster::new(&[2, 2], EngineConfig::default());
    let response = cluster.response();

    cluster.run(|w| {
        let input: Vec<i64> = if w.rank == 0 {
            (0..10).collect()
        } else {
            vec![0; 10]
        };
        let mut output = vec![-1i64; 10];
        let (tx, rx) = channel();
        let entry = make_entry("ids", &input, &mut output, DataType::I64, w.device(), &tx);

        unsafe { w.engine.execute(AllreduceStrategy::Flat, vec![entry], &response) }.unwrap();
        assert!(wait_all(&rx, 1)[0].is_ok());

        let expected: Vec<i64> = (0..10).collect();
        assert_eq!(output, expected, "rank {}", w.rank);
    });
}

#[test]
fn fused_batch_keeps_entry_layout() {
    let cluster = SimCluster::new(&[2, 2], EngineConfig::default());
    let response = cluster.response();

    cluster.run(|w| {
        let scale = (w.rank + 1) as f32;
        let a_in = vec![scale; 7];
        let b_in = vec![10.0 * scale; 5];
        let mut a_out = vec![0.0f32; 7];
        let mut b_out = vec![0.0f32; 5];
        let (tx, rx) = channel();
        let entries = vec![
            make_entry("layer.a", &a_in, &mut a_out, DataType::F32, w.device(), &tx),
            make_entry("layer.b", &b_in, &mut b_out, DataType::F32, w.device(), &tx),
        ];

        unsafe { w.engine.execute(AllreduceStrategy::Flat, entries, &response) }.unwrap();
        let statuses = wait_all(&rx, 2);
        assert!(statuses.iter().all(Status::is_ok));

        // 1 + 2 + 3 + 4 = 10, scaled per entry.
        assert_eq!(a_out, vec![10.0f32; 7], "rank {}", w.rank);
        assert_eq!(b_out, vec![100.0f32; 5], "rank {}", w.rank);
    });
}

#[test]
fn unsupported_type_rejected_before_any_callback() {
    let cluster = SimCluster::new(&[1], EngineConfig::default());
    let response = cluster.response();
    let w = cluster.worker(0).unwrap();

    let input = vec![1i8; 4];
    let mut output = vec![0i8; 4];
    let (tx, rx) = channel();
    let entry = make_entry("quant", &input, &mut output, DataType::I8, w.device(), &tx);

    let err = unsafe { w.engine.execute(AllreduceStrategy::Flat, vec![entry], &response) }
        .unwrap_err();
    assert!(matches!(err, FusorError::UnsupportedDType { .. }));
    assert!(err.to_string().contains("i8"));
    assert!(rx.try_recv().is_err(), "no callback may fire on rejection");
}

#[test]
fn mixed_dtype_batch_rejected() {
    let cluster = SimCluster::new(&[1], EngineConfig::default());
    let response = cluster.response();
    let w = cluster.worker(0).unwrap();

    let a = vec![0.0f32; 2];
    let mut a_out = vec![0.0f32; 2];
    let b = vec![0.0f64; 2];
    let mut b_out = vec![0.0f64; 2];
    let (tx, _rx) = channel();
    let entries = vec![
        make_entry("a", &a, &mut a_out, DataType::F32, w.device(), &tx),
        make_entry("b", &b, &mut b_out, DataType::F64, w.device(), &tx),
    ];

    let err = unsafe { w.engine.execute(AllreduceStrategy::Flat, entries, &response) }.unwrap_err();
    assert!(matches!(err, FusorError::InvalidBatch { .. }));
}

#[test]
fn single_worker_is_a_copy_with_no_collectives() {
    let cluster = SimCluster::new(&[1], EngineConfig::default());
    let response = cluster.response();
    let w = cluster.worker(0).unwrap();

    let input: Vec<f32> = (0..5).map(|i| i as f32).collect();
    let mut output = vec![0.0f32; 5];
    let (tx, rx) = channel();
    let entry = make_entry("solo", &input, &mut output, DataType::F32, w.device(), &tx);

    unsafe { w.engine.execute(AllreduceStrategy::Flat, vec![entry], &response) }.unwrap();
    assert!(wait_all(&rx, 1)[0].is_ok());

    assert_eq!(output, input);
    assert_eq!(w.fabric.collective_calls(), 0);
}

#[test]
fn communicator_built_once_across_batches() {
    let cluster = SimCluster::new(&[2, 2], EngineConfig::default());
    let response = cluster.response();

    cluster.run(|w| {
        for round in 0..2 {
            let input = vec![1.0f32; 16];
            let mut output = vec![0.0f32; 16];
            let (tx, rx) = channel();
            let entry = make_entry(
                &format!("grad.{round}"),
                &input,
                &mut output,
                DataType::F32,
                w.device(),
                &tx,
            );
            unsafe { w.engine.execute(AllreduceStrategy::Flat, vec![entry], &response) }.unwrap();
            assert!(wait_all(&rx, 1)[0].is_ok());
        }
        assert_eq!(w.engine.context().comms.len(), 1);
    });

    // Exactly one unique id for the whole worker set, both batches.
    assert_eq!(cluster.fabric().unique_ids_issued(), 1);
}

#[test]
fn event_pool_drains_and_recycles() {
    let cluster = SimCluster::new(&[2], EngineConfig::default());
    let response = cluster.response();

    std::thread::scope(|scope| {
        for rank in 0..2 {
            let cluster = &cluster;
            let response = &response;
            scope.spawn(move || {
                let timeline: Arc<dyn Timeline> = Arc::new(TracingTimeline);
                let w = cluster.worker_with_timeline(rank, timeline).unwrap();

                let run_batch = |tag: &str| {
                    let input = vec![1.0f32; 8];
                    let mut output = vec![0.0f32; 8];
                    let (tx, rx) = channel();
                    let entry =
                        make_entry(tag, &input, &mut output, DataType::F32, w.device(), &tx);
                    unsafe { w.engine.execute(AllreduceStrategy::Flat, vec![entry], response) }
                        .unwrap();
                    assert!(wait_all(&rx, 1)[0].is_ok());
                    assert_eq!(output, vec![2.0f32; 8]);
                };

                run_batch("first");
                // Callbacks fire only after the drain, so nothing is held.
                assert_eq!(w.engine.context().events.outstanding(), 0);
                let created = w.devices.events_created();
                assert!(created > 0, "traced run must record events");

                run_batch("second");
                assert_eq!(w.engine.context().events.outstanding(), 0);
                assert_eq!(
                    w.devices.events_created(),
                    created,
                    "second batch must reuse pooled events"
                );
            });
        }
    });
}
