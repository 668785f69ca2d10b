#![forbid(unsafe_code)]

use super::{Computation, ComputationInput, Dispatch, Work};
use std::panic::AssertUnwindSafe;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Fixed set of worker threads draining one queue.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Work>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    computation: Arc<dyn Computation>,
}

impl WorkerPool {
    pub fn start(workers: usize, computation: Arc<dyn Computation>) -> std::io::Result<Self> {
        let (sender, receiver) = std::sync::mpsc::channel::<Work>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::new();
        for index in 0..workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let computation = Arc::clone(&computation);
            let handle = std::thread::Builder::new()
                .name(format!("mip-worker-{index}"))
                .spawn(move || worker_loop(&receiver, computation.as_ref()))?;
            handles.push(handle);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
            computation,
        })
    }

    /// Stops accepting work, lets queued items finish, and joins the workers.
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let handles = match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => return,
        };
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked outside a computation");
            }
        }
    }
}

impl Dispatch for WorkerPool {
    fn dispatch(&self, work: Work) {
        let sender = self.sender.lock().ok().and_then(|sender| sender.clone());
        let Some(sender) = sender else {
            work.completion
                .finish(Err("worker pool is shut down".to_string()));
            return;
        };
        if let Err(returned) = sender.send(work) {
            returned
                .0
                .completion
                .finish(Err("worker pool is shut down".to_string()));
        }
    }

    fn is_available(&self) -> bool {
        let accepting = self
            .sender
            .lock()
            .map(|sender| sender.is_some())
            .unwrap_or(false);
        accepting && self.computation.is_available()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Work>>, computation: &dyn Computation) {
    loop {
        let next = match receiver.lock() {
            Ok(receiver) => receiver.recv(),
            Err(_) => return,
        };
        let Ok(work) = next else {
            return;
        };
        tracing::debug!(job_id = %work.input.job_id, "computation started");
        let outcome = run_guarded(computation, &work.input);
        work.completion.finish(outcome);
    }
}

/// A panicking computation still settles its job.
pub(super) fn run_guarded(
    computation: &dyn Computation,
    input: &ComputationInput,
) -> Result<serde_json::Value, String> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| computation.run(input))) {
        Ok(outcome) => outcome,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("computation panicked: {detail}"))
        }
    }
}
