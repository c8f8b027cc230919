//! Shared harness for the end-to-end reduction tests.

use std::sync::mpsc::{Receiver, Sender};
use std::time::Duration;

use fusor::{DataType, DeviceId, Status, TensorEntry};

/// Build an entry over caller-owned buffers whose callback reports into
/// `tx`.
pub fn make_entry<T>(
    name: &str,
    input: &[T],
    output: &mut [T],
    dtype: DataType,
    device: DeviceId,
    tx: &Sender<Status>,
) -> TensorEntry {
    assert_eq!(input.len(), output.len(), "entry buffers must match");
    let tx = tx.clone();
    TensorEntry::new(
        name,
        input.as_ptr() as u64,
        output.as_mut_ptr() as u64,
        input.len(),
        dtype,
        device,
        Box::new(move |status| {
            let _ = tx.send(status);
        }),
    )
}

/// Collect `n` callback statuses, failing loudly on a stall.
pub fn wait_all(rx: &Receiver<Status>, n: usize) -> Vec<Status> {
    (0..n)
        .map(|i| {
            rx.recv_timeout(Duration::from_secs(10))
                .unwrap_or_else(|e| panic!("callback {i} never fired: {e}"))
        })
        .collect()
}
