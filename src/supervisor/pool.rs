// Worker process pool: spawn, kill, and poll out-of-process workers

use crate::utils::lock_mutex_recover;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use sysinfo::{Pid, System};

/// A worker process tracked by the pool
#[derive(Debug)]
struct PooledWorker {
    child: Child,
    started_at: Instant,
}

/// Pool of running worker processes, keyed by worker id.
pub struct WorkerPool {
    workers: Arc<Mutex<HashMap<String, PooledWorker>>>,
    /// System info for distinguishing live processes from zombies
    system: Arc<Mutex<System>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            workers: Arc::new(Mutex::new(HashMap::new())),
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    /// Spawn a worker process and track it under `worker_id`.
    pub fn spawn(&self, worker_id: &str, mut command: Command) -> Result<u32> {
        let child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn worker process: {}", e))?;

        let pid = child.id();
        log::info!("[WorkerPool] Worker {} spawned with PID {}", worker_id, pid);

        let mut workers = lock_mutex_recover(&self.workers);
        workers.insert(
            worker_id.to_string(),
            PooledWorker {
                child,
                started_at: Instant::now(),
            },
        );

        Ok(pid)
    }

    /// Kill a worker's process. Missing workers are not an error; the
    /// supervisor may race a natural exit.
    pub fn kill(&self, worker_id: &str) {
        let mut workers = lock_mutex_recover(&self.workers);

        if let Some(mut worker) = workers.remove(worker_id) {
            if let Err(e) = worker.child.kill() {
                log::warn!("[WorkerPool] Failed to kill worker {}: {}", worker_id, e);
            }
            let _ = worker.child.wait(); // Reap
            log::info!("[WorkerPool] Worker {} killed", worker_id);
        }
    }

    /// Check whether a worker has exited; returns its exit code once it has.
    ///
    /// `try_wait` covers the common case; the sysinfo check catches workers
    /// whose process vanished without becoming waitable.
    pub fn poll_exit(&self, worker_id: &str) -> Option<i32> {
        let mut workers = lock_mutex_recover(&self.workers);
        let worker = workers.get_mut(worker_id)?;
        let pid = worker.child.id();

        match worker.child.try_wait() {
            Ok(Some(status)) => {
                let code = status.code().unwrap_or(-1);
                log::info!(
                    "[WorkerPool] Worker {} (PID {}) exited with code {}",
                    worker_id,
                    pid,
                    code
                );
                workers.remove(worker_id);
                Some(code)
            }
            Ok(None) => {
                if self.process_is_alive(pid) {
                    None
                } else {
                    // Not waitable but gone from the process table; reap and
                    // report whatever wait() gives us
                    let mut worker = workers.remove(worker_id)?;
                    let code = worker
                        .child
                        .wait()
                        .ok()
                        .and_then(|s| s.code())
                        .unwrap_or(-1);
                    log::warn!(
                        "[WorkerPool] Worker {} disappeared; reaped with code {}",
                        worker_id,
                        code
                    );
                    Some(code)
                }
            }
            Err(e) => {
                log::error!("[WorkerPool] Failed to poll worker {}: {}", worker_id, e);
                workers.remove(worker_id);
                Some(-1)
            }
        }
    }

    fn process_is_alive(&self, pid: u32) -> bool {
        let mut system = lock_mutex_recover(&self.system);
        system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

        system
            .process(Pid::from_u32(pid))
            .map(|p| {
                !matches!(p.status(), sysinfo::ProcessStatus::Zombie)
                    && p.status() != sysinfo::ProcessStatus::Dead
            })
            .unwrap_or(false)
    }

    /// Runtime of a worker in seconds.
    pub fn runtime_secs(&self, worker_id: &str) -> Option<u64> {
        let workers = lock_mutex_recover(&self.workers);
        workers
            .get(worker_id)
            .map(|w| w.started_at.elapsed().as_secs())
    }

    pub fn running_count(&self) -> usize {
        let workers = lock_mutex_recover(&self.workers);
        workers.len()
    }

    pub fn is_running(&self, worker_id: &str) -> bool {
        let workers = lock_mutex_recover(&self.workers);
        workers.contains_key(worker_id)
    }

    /// Kill every tracked worker. Best effort.
    pub fn kill_all(&self) {
        let worker_ids: Vec<String> = {
            let workers = lock_mutex_recover(&self.workers);
            workers.keys().cloned().collect()
        };

        for worker_id in worker_ids {
            self.kill(&worker_id);
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}
