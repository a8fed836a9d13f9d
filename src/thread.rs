use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crate::current_thread;

static NUM_CREATED: AtomicUsize = AtomicUsize::new(0);

/// A handle around one worker thread.
///
/// `start` publishes the worker's OS thread id back to the creator before
/// the worker function runs, so the creator always observes a valid `tid`
/// once `start` returns. Dropping a started handle without joining detaches
/// the worker.
pub struct Thread {
    started: bool,
    joined: bool,
    handle: Option<JoinHandle<()>>,
    tid: libc::pid_t,
    func: Option<Box<dyn FnOnce() + Send>>,
    name: String,
}

impl Thread {
    pub fn new<F>(func: F, name: impl Into<String>) -> Thread
    where
        F: FnOnce() + Send + 'static,
    {
        let num = NUM_CREATED.fetch_add(1, Ordering::Relaxed) + 1;

        let mut name = name.into();
        if name.is_empty() {
            name = format!("Thread{}", num);
        }

        Thread {
            started: false,
            joined: false,
            handle: None,
            tid: 0,
            func: Some(Box::new(func)),
            name,
        }
    }

    /// Spawns the worker and blocks until it has cached its own thread id.
    pub fn start(&mut self) -> io::Result<()> {
        assert!(!self.started, "thread {:?} started twice", self.name);
        self.started = true;

        let func = match self.func.take() {
            Some(func) => func,
            None => panic!("thread {:?} has no function to run", self.name),
        };

        let (tx, rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                // Publish before running: the creator is blocked on this.
                let _ = tx.send(current_thread::tid());
                func();
            })?;

        self.handle = Some(handle);

        if let Ok(tid) = rx.recv() {
            self.tid = tid;
        }

        Ok(())
    }

    pub fn join(&mut self) {
        self.joined = true;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn tid(&self) -> libc::pid_t {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_created() -> usize {
        NUM_CREATED.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::Thread;

    #[test]
    fn start_publishes_tid() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();

        let mut thread = Thread::new(move || ran2.store(true, Ordering::SeqCst), "worker");
        assert_eq!(thread.tid(), 0);

        thread.start().unwrap();
        assert_ne!(thread.tid(), 0);

        thread.join();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn default_name_is_numbered() {
        let before = Thread::num_created();
        let thread = Thread::new(|| {}, "");

        // Other tests may mint threads concurrently; only the shape and
        // monotonicity of the default name are stable.
        let num: usize = thread.name().strip_prefix("Thread").unwrap().parse().unwrap();
        assert!(num > before);
        assert!(Thread::num_created() >= num);
    }

    #[test]
    fn explicit_name_is_kept() {
        let thread = Thread::new(|| {}, "io-worker");
        assert_eq!(thread.name(), "io-worker");
        assert!(!thread.started());
    }
}
