//! Background post-processing worker.
//!
//! Jobs run one at a time in submission order. A running job is never
//! interrupted; shutdown lets the queue empty first.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use super::transforms::{PostProcessor, TransformKind, TransformOutcome};
use crate::error::{EtwError, Result};

/// Transforms to run over one trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostProcessJob {
    pub trace: PathBuf,
    pub transforms: Vec<TransformKind>,
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<PostProcessJob>,
    busy: bool,
    shutdown: bool,
    finished: Vec<TransformOutcome>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    work_ready: Condvar,
    idle: Condvar,
}

pub struct PostProcessQueue {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl PostProcessQueue {
    pub fn new(processor: PostProcessor) -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("postprocess".to_string())
            .spawn(move || worker_loop(processor, worker_shared))
            .map_err(|e| EtwError::other(format!("Failed to start post-processing: {}", e)))?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Queue a job. Returns false once the queue is shut down.
    pub fn enqueue(&self, job: PostProcessJob) -> bool {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            log::warn!("Post-processing is shut down, dropping job for {:?}", job.trace);
            return false;
        }
        log::debug!("Queued {:?} for {:?}", job.transforms, job.trace);
        state.jobs.push_back(job);
        self.shared.work_ready.notify_one();
        true
    }

    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        state.jobs.is_empty() && !state.busy
    }

    pub fn pending(&self) -> usize {
        let state = self.shared.state.lock();
        state.jobs.len() + usize::from(state.busy)
    }

    /// Block until every queued job has finished.
    pub fn drain(&self) {
        let mut state = self.shared.state.lock();
        while !state.jobs.is_empty() || state.busy {
            if self.worker.is_none() {
                break;
            }
            self.shared.idle.wait(&mut state);
        }
    }

    /// Outcomes finished since the last call.
    pub fn take_reports(&self) -> Vec<TransformOutcome> {
        std::mem::take(&mut self.shared.state.lock().finished)
    }

    /// Finish queued work and stop the worker. Safe to call more than once.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.work_ready.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Post-processing worker panicked");
            }
        }
    }
}

impl Drop for PostProcessQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(processor: PostProcessor, shared: Arc<Shared>) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    state.busy = true;
                    break job;
                }
                if state.shutdown {
                    shared.idle.notify_all();
                    return;
                }
                shared.idle.notify_all();
                shared.work_ready.wait(&mut state);
            }
        };

        let outcomes = processor.run_all(&job.trace, &job.transforms);

        let mut state = shared.state.lock();
        state.finished.extend(outcomes);
        state.busy = false;
        if state.jobs.is_empty() {
            shared.idle.notify_all();
        }
    }
}
