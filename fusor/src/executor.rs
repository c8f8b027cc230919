use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use crate::context::EngineContext;
use crate::entry::TensorEntry;
use crate::error::{FusorError, Result};
use crate::job::{EventSlot, drain_events};
use crate::timeline::Timeline;
use crate::types::{DeviceId, Status};

/// Everything the finalizer needs, moved off the submission thread.
pub(crate) struct CompletionTask {
    pub device: DeviceId,
    pub tensor_names: Vec<String>,
    pub events: Vec<EventSlot>,
    pub host_buffer: Option<Vec<u8>>,
    pub entries: Vec<TensorEntry>,
}

/// Owned finalizer thread.
///
/// Jobs are values moved onto the worker; callbacks fire from it. Dropping
/// the executor closes the channel and joins the worker, so engine teardown
/// drains every in-flight job instead of racing a detached thread.
pub(crate) struct CompletionExecutor {
    tx: Option<Sender<CompletionTask>>,
    worker: Option<JoinHandle<()>>,
}

impl CompletionExecutor {
    pub fn spawn(ctx: Arc<EngineContext>, timeline: Arc<dyn Timeline>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<CompletionTask>();
        let worker = std::thread::Builder::new()
            .name("fusor-completion".into())
            .spawn(move || {
                for mut task in rx {
                    let status = match finalize(&ctx, timeline.as_ref(), &mut task) {
                        Ok(()) => Status::Ok,
                        Err(e) => {
                            tracing::error!(error = %e, "job finalization failed");
                            e.into_status()
                        }
                    };
                    for entry in task.entries {
                        timeline.finish(&entry.name);
                        (entry.callback)(status.clone());
                    }
                }
            })
            .map_err(|e| FusorError::collective("spawn_completion_worker", e.to_string()))?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn submit(&self, task: CompletionTask) -> Result<()> {
        match &self.tx {
            Some(tx) => tx.send(task).map_err(|_| FusorError::ShuttingDown),
            None => Err(FusorError::ShuttingDown),
        }
    }
}

impl Drop for CompletionExecutor {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Await the job's device work and release its resources. The host buffer,
/// when one was allocated during the job, is freed only after the event
/// drain proves the device is done with it.
fn finalize(ctx: &EngineContext, timeline: &dyn Timeline, task: &mut CompletionTask) -> Result<()> {
    ctx.devices.set_device(task.device)?;
    drain_events(
        ctx,
        timeline,
        &task.tensor_names,
        &mut task.events,
        task.device,
    )?;
    task.host_buffer = None;
    Ok(())
}
