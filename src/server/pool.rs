//! Bounded worker pool for client sessions.
//!
//! A fixed set of workers drains a bounded queue. When the queue is full
//! the submitting thread runs the job itself, which throttles the accept
//! loop instead of growing an unbounded backlog.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: Mutex<QueueState>,
    job_ready: Condvar,
}

struct QueueState {
    jobs: VecDeque<Job>,
    running: bool,
}

pub struct WorkerPool {
    state: Arc<PoolState>,
    capacity: usize,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize, capacity: usize) -> Self {
        let state = Arc::new(PoolState {
            queue: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                running: true,
            }),
            job_ready: Condvar::new(),
        });

        let handles = (0..workers)
            .map(|worker| {
                let state = Arc::clone(&state);
                thread::Builder::new()
                    .name(format!("worker-{worker}"))
                    .spawn(move || worker_loop(state))
                    .expect("spawn worker thread")
            })
            .collect();

        Self {
            state,
            capacity,
            workers: handles,
        }
    }

    /// Queues `job`, or runs it on the calling thread when the queue is at
    /// capacity.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        {
            let mut queue = self.state.queue.lock();
            if queue.jobs.len() < self.capacity {
                queue.jobs.push_back(Box::new(job));
                self.state.job_ready.notify_one();
                return;
            }
        }
        debug!("pool.caller_runs");
        job();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut queue = self.state.queue.lock();
            queue.running = false;
            self.state.job_ready.notify_all();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(state: Arc<PoolState>) {
    loop {
        let job = {
            let mut queue = state.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if !queue.running {
                    return;
                }
                state.job_ready.wait(&mut queue);
            }
        };
        job();
    }
}
