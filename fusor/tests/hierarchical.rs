//! End-to-end hierarchical allreduce over the simulated cluster.

mod common;

use std::sync::mpsc::channel;

use common::{make_entry, wait_all};
use fusor::sim::SimCluster;
use fusor::{AllreduceStrategy, DataType, EngineConfig, Status};

fn hierarchical_config() -> EngineConfig {
    EngineConfig {
        hierarchical_allreduce: true,
        ..EngineConfig::default()
    }
}

#[test]
fn evenly_divisible_single_entry() {
    let cluster = SimCluster::new(&[2, 2], hierarchical_config());
    let response = cluster.response();

    cluster.run(|w| {
        // input[i] = rank + 1; 1 + 2 + 3 + 4 = 10 at every position.
        let input = vec![(w.rank + 1) as f32; 1024];
        let mut output = vec![0.0f32; 1024];
        let (tx, rx) = channel();
        let entry = make_entry("grad", &input, &mut output, DataType::F32, w.device(), &tx);

        let status = unsafe {
            w.engine
                .execute(AllreduceStrategy::Hierarchical, vec![entry], &response)
        }
        .unwrap();
        assert_eq!(status, Status::InProgress);
        assert!(wait_all(&rx, 1)[0].is_ok());
        assert_eq!(output, vec![10.0f32; 1024], "rank {}", w.rank);
    });
}

#[test]
fn fused_batch_pads_without_touching_outputs() {
    let cluster = SimCluster::new(&[2, 2], hierarchical_config());
    let response = cluster.response();

    cluster.run(|w| {
        // 1026 elements across two entries: forces padding to 1152
        // (local_size 2 times the 64-element atom) inside the fusion
        // buffer, invisible at the entry outputs.
        let a_in = vec![1.0f32; 1000];
        let b_in = vec![1.0f32; 26];
        let mut a_out = vec![0.0f32; 1000];
        let mut b_out = vec![0.0f32; 26];
        let (tx, rx) = channel();
        let entries = vec![
            make_entry("body", &a_in, &mut a_out, DataType::F32, w.device(), &tx),
            make_entry("tail", &b_in, &mut b_out, DataType::F32, w.device(), &tx),
        ];

        unsafe {
            w.engine
                .execute(AllreduceStrategy::Hierarchical, entries, &response)
        }
        .unwrap();
        let statuses = wait_all(&rx, 2);
        assert!(statuses.iter().all(Status::is_ok));

        assert_eq!(a_out, vec![4.0f32; 1000], "rank {}", w.rank);
        assert_eq!(b_out, vec![4.0f32; 26], "rank {}", w.rank);
    });
}

#[test]
fn indivisible_single_entry_uses_the_tail() {
    let cluster = SimCluster::new(&[2, 2], hierarchical_config());
    let response = cluster.response();

    cluster.run(|w| {
        // Three elements, local_size 2: one per rank plus a one-element
        // tail owned by the last local rank. Single-entry batches are
        // never padded.
        let input = vec![1.0f32; 3];
        let mut output = vec![0.0f32; 3];
        let (tx, rx) = channel();
        let entry = make_entry("odd", &input, &mut output, DataType::F32, w.device(), &tx);

        unsafe {
            w.engine
                .execute(AllreduceStrategy::Hierarchical, vec![entry], &response)
        }
        .unwrap();
        assert!(wait_all(&rx, 1)[0].is_ok());
        assert_eq!(output, vec![4.0f32; 3], "rank {}", w.rank);
    });
}

#[test]
fn fewer_elements_than_local_ranks() {
    let cluster = SimCluster::new(&[2, 2], hierarchical_config());
    let response = cluster.response();

    cluster.run(|w| {
        let input = vec![(w.rank + 1) as f32];
        let mut output = vec![0.0f32];
        let (tx, rx) = channel();
        let entry = make_entry("scalar", &input, &mut output, DataType::F32, w.device(), &tx);

        unsafe {
            w.engine
                .execute(AllreduceStrategy::Hierarchical, vec![entry], &response)
        }
        .unwrap();
        assert!(wait_all(&rx, 1)[0].is_ok());
        assert_eq!(output, vec![10.0f32], "rank {}", w.rank);
    });
}

#[test]
fn heterogeneous_cluster_reduces_through_the_roots() {
    let cluster = SimCluster::new(&[2, 1], hierarchical_config());
    let response = cluster.response();

    cluster.run(|w| {
        let input = vec![(w.rank + 1) as f32; 5];
        let mut output = vec![0.0f32; 5];
        let (tx, rx) = channel();
        let entry = make_entry("uneven", &input, &mut output, DataType::F32, w.device(), &tx);

        unsafe {
            w.engine
                .execute(AllreduceStrategy::Hierarchical, vec![entry], &response)
        }
        .unwrap();
        assert!(wait_all(&rx, 1)[0].is_ok());
        // 1 + 2 + 3 = 6 at every position.
        assert_eq!(output, vec![6.0f32; 5], "rank {}", w.rank);
    });
}

#[test]
fn single_node_cluster_degenerates_cleanly() {
    let cluster = SimCluster::new(&[2], hierarchical_config());
    let response = cluster.response();

    cluster.run(|w| {
        let input = vec![1.0f32; 4];
        let mut output = vec![0.0f32; 4];
        let (tx, rx) = channel();
        let entry = make_entry("local", &input, &mut output, DataType::F32, w.device(), &tx);

        unsafe {
            w.engine
                .execute(AllreduceStrategy::Hierarchical, vec![entry], &response)
        }
        .unwrap();
        assert!(wait_all(&rx, 1)[0].is_ok());
        assert_eq!(output, vec![2.0f32; 4], "rank {}", w.rank);
    });
}

#[test]
fn integer_results_are_bit_identical_across_repetitions() {
    let cluster = SimCluster::new(&[2, 2], hierarchical_config());
    let response = cluster.response();

    cluster.run(|w| {
        let input: Vec<i64> = (0..1024).map(|i| (w.rank as i64 + 1) * (i % 7 + 1)).collect();
        let expected: Vec<i64> = (0..1024).map(|i| 10 * (i % 7 + 1)).collect();

        for round in 0..100 {
            let mut output = vec![0i64; 1024];
            let (tx, rx) = channel();
            let entry = make_entry("det", &input, &mut output, DataType::I64, w.device(), &tx);
            unsafe {
                w.engine
                    .execute(AllreduceStrategy::Hierarchical, vec![entry], &response)
            }
            .unwrap();
            assert!(wait_all(&rx, 1)[0].is_ok());
            assert_eq!(output, expected, "rank {} round {round}", w.rank);
        }
    });
}

#[test]
fn matches_flat_for_integers() {
    let node_sizes = [2usize, 2];
    let run_with = |strategy: AllreduceStrategy| -> Vec<i32> {
        let cluster = SimCluster::new(&node_sizes, hierarchical_config());
        let response = cluster.response();
        let results = std::sync::Mutex::new(vec![Vec::new(); 4]);

        cluster.run(|w| {
            let input: Vec<i32> = (0..301).map(|i| (w.rank as i32 + 1) * (i - 150)).collect();
            let mut output = vec![0i32; 301];
            let (tx, rx) = channel();
            let entry = make_entry("cmp", &input, &mut output, DataType::I32, w.device(), &tx);
            unsafe { w.engine.execute(strategy, vec![entry], &response) }.unwrap();
            assert!(wait_all(&rx, 1)[0].is_ok());
            results.lock().unwrap()[w.rank] = output;
        });

        let results = results.into_inner().unwrap();
        for r in &results[1..] {
            assert_eq!(r, &results[0], "all ranks must agree");
        }
        results.into_iter().next().unwrap()
    };

    assert_eq!(
        run_with(AllreduceStrategy::Hierarchical),
        run_with(AllreduceStrategy::Flat)
    );
}
