//! Worker-pool scheduler: a fixed set of OS threads consuming tasks from a
//! shared FIFO queue under a mutex + condition-variable protocol. A single
//! coordinator may block in [ThreadPool::wait_for_completion] until N tasks
//! have finished. Shutdown is observed between tasks, never within one.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

//==============================================================================
// Constants & Structures
//==============================================================================

type TaskFn = Box<dyn FnOnce() + Send + 'static>;

struct Task {
    id: u32,
    func: TaskFn,
}

/// Everything guarded by the pool mutex.
struct Shared {
    queue: VecDeque<Task>,
    /// Workers spawned but not yet through their startup barrier.
    starting: u32,
    /// Workers whose loop is live.
    running: u32,
    /// Workers currently executing a task.
    busy: u32,
    /// Tasks completed since start.
    completed: u32,
    /// Completion target a coordinator is waiting for; 0 = nobody waiting.
    wait_target: u32,
    /// Bumped by [ThreadPool::wake] to release a waiter unconditionally.
    wake_seq: u64,
    shutdown: bool,
    /// Per-worker (thread id, most recent task id), filled in at startup.
    workers: Vec<Option<(thread::ThreadId, u32)>>,
}

struct Inner {
    shared: Mutex<Shared>,
    cv_task: Condvar,
    cv_wait: Condvar,
    size: usize,
    cores: Vec<core_affinity::CoreId>,
}

pub struct ThreadPool {
    inner: Arc<Inner>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Inner {
    /// Mutex poisoning only happens if a task panicked; the pool state is
    /// plain counters, so recover the guard and continue.
    fn lock(&self) -> MutexGuard<Shared> {
        match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ThreadPool {
    /// Prepares a pool of `size` workers without starting them. `cores`
    /// optionally pins workers round-robin (advisory; failures are logged
    /// and ignored).
    pub fn new(size: usize, cores: Vec<core_affinity::CoreId>) -> Self {
        let size = size.max(1);
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    queue: VecDeque::new(),
                    starting: 0,
                    running: 0,
                    busy: 0,
                    completed: 0,
                    wait_target: 0,
                    wake_seq: 0,
                    shutdown: true,
                    workers: Vec::new(),
                }),
                cv_task: Condvar::new(),
                cv_wait: Condvar::new(),
                size,
                cores,
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Launches every worker. Until each has passed its startup barrier,
    /// [execute](Self::execute) holds back enqueues.
    pub fn start(&self) {
        {
            let mut s = self.inner.lock();
            if !s.shutdown {
                warn!("thread pool is already running");
                return;
            }
            s.shutdown = false;
            s.starting = 0;
            s.running = 0;
            s.busy = 0;
            s.completed = 0;
            s.wait_target = 0;
            s.queue.clear();
            s.workers = vec![None; self.inner.size];
        }
        let mut handles = match self.handles.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        for slot in 0..self.inner.size {
            {
                let mut s = self.inner.lock();
                s.starting += 1;
                s.running += 1;
            }
            let inner = self.inner.clone();
            let builder = thread::Builder::new().name(format!("worker-{}", slot));
            match builder.spawn(move || worker_loop(inner, slot)) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("failed to start worker #{}: {}", slot, e);
                    let mut s = self.inner.lock();
                    s.starting -= 1;
                    s.running -= 1;
                }
            }
        }
    }

    /// Requests shutdown, joins every worker, then releases any coordinator
    /// blocked in [wait_for_completion](Self::wait_for_completion).
    pub fn stop(&self) {
        {
            let mut s = self.inner.lock();
            s.shutdown = true;
        }
        self.inner.cv_task.notify_all();
        let handles: Vec<_> = {
            let mut guard = match self.handles.lock() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            guard.drain(..).collect()
        };
        for handle in handles {
            if handle.join().is_err() {
                error!("a pool worker panicked");
            }
        }
        self.inner.cv_wait.notify_all();
    }

    /// Enqueues a task and signals one worker. Returns false if the pool is
    /// not running.
    pub fn execute<F>(&self, id: u32, func: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        // Hold enqueues until every worker has reached its startup barrier
        // so no task can be dequeued before the pool is fully formed.
        loop {
            let s = self.inner.lock();
            if s.shutdown {
                warn!("task {} rejected: pool is not running", id);
                return false;
            }
            if s.starting == 0 {
                break;
            }
            drop(s);
            thread::sleep(Duration::from_millis(1));
        }
        let mut s = self.inner.lock();
        s.queue.push_back(Task { id, func: Box::new(func) });
        drop(s);
        self.inner.cv_task.notify_one();
        true
    }

    /// Blocks until `target` tasks have completed since start. Only one
    /// coordinator may wait at a time; a second concurrent waiter is
    /// rejected. Returns true iff the completion count reached the target.
    pub fn wait_for_completion(&self, target: u32) -> bool {
        if target == 0 {
            return true;
        }
        let mut s = self.inner.lock();
        if s.wait_target > 0 {
            error!("thread pool failed to wait (already waiting)");
            return false;
        }
        s.wait_target = target;
        let seq = s.wake_seq;
        while s.completed < target && !s.shutdown && s.wake_seq == seq {
            s = match self.inner.cv_wait.wait(s) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        let reached = s.completed >= target;
        s.wait_target = 0;
        reached
    }

    /// Releases a blocked coordinator unconditionally; the wait reports
    /// whether its target had been reached.
    pub fn wake(&self) {
        {
            let mut s = self.inner.lock();
            s.wake_seq += 1;
        }
        self.inner.cv_wait.notify_all();
    }

    /// Task id most recently dequeued by the calling worker thread; zero if
    /// the caller is not a pool worker.
    pub fn id_of_caller(&self) -> u32 {
        let me = thread::current().id();
        let s = self.inner.lock();
        for worker in s.workers.iter() {
            if let Some((tid, task)) = worker {
                if *tid == me {
                    return *task;
                }
            }
        }
        0
    }

    /// Worker slot index of the calling thread, if it is a pool worker.
    pub fn handle_of_caller(&self) -> Option<usize> {
        let me = thread::current().id();
        let s = self.inner.lock();
        for (slot, worker) in s.workers.iter().enumerate() {
            if let Some((tid, _)) = worker {
                if *tid == me {
                    return Some(slot);
                }
            }
        }
        None
    }

    pub fn running(&self) -> bool {
        !self.inner.lock().shutdown
    }

    pub fn busy_count(&self) -> u32 {
        self.inner.lock().busy
    }

    pub fn queued_count(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn thread_count(&self) -> u32 {
        self.inner.lock().running
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }
}

//==============================================================================
// Worker Loop
//==============================================================================

fn worker_loop(inner: Arc<Inner>, slot: usize) {
    if !inner.cores.is_empty() {
        let core = inner.cores[slot % inner.cores.len()];
        if !core_affinity::set_for_current(core) {
            debug!("worker #{} could not pin to core {:?}", slot, core);
        }
    }
    let mut s = inner.lock();
    s.workers[slot] = Some((thread::current().id(), 0));
    s.starting -= 1;
    while !s.shutdown {
        if let Some(task) = s.queue.pop_front() {
            if let Some(w) = s.workers[slot].as_mut() {
                w.1 = task.id;
            }
            s.busy += 1;
            drop(s);
            (task.func)();
            s = inner.lock();
            s.busy -= 1;
            s.completed += 1;
            if s.wait_target > 0 && s.completed >= s.wait_target {
                inner.cv_wait.notify_all();
            }
            continue;
        }
        s = match inner.cv_task.wait(s) {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
    }
    s.running -= 1;
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn execute_before_start_is_rejected() {
        let pool = ThreadPool::new(2, Vec::new());
        assert!(!pool.execute(1, || {}));
        assert!(!pool.running());
    }

    #[test]
    fn counters_settle_after_stop() {
        let pool = ThreadPool::new(3, Vec::new());
        pool.start();
        assert!(pool.running());
        pool.stop();
        assert!(!pool.running());
        assert_eq!(pool.thread_count(), 0);
        assert_eq!(pool.busy_count(), 0);
    }

    #[test]
    fn tasks_run_exactly_once() {
        let pool = ThreadPool::new(4, Vec::new());
        pool.start();
        let counter = Arc::new(AtomicU32::new(0));
        for i in 0..32 {
            let counter = counter.clone();
            assert!(pool.execute(i + 1, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(pool.wait_for_completion(32));
        assert_eq!(counter.load(Ordering::SeqCst), 32);
        pool.stop();
    }
}
