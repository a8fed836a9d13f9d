use std::io;
use std::sync::{mpsc, Arc, Condvar, Mutex};

use crate::event_loop::{EventLoop, LoopHandle};
use crate::thread::Thread;

/// Runs once on the worker thread with the freshly built loop, before the
/// loop starts waiting.
pub type ThreadInitCallback = Arc<dyn Fn(&EventLoop) + Send + Sync>;

struct State {
    handle: Mutex<Option<LoopHandle>>,
    cond: Condvar,
}

/// Couples one worker thread to one [`EventLoop`] living on that worker's
/// stack.
///
/// The worker publishes its loop's handle before entering the dispatch
/// loop, and `start_loop` blocks until that handoff completes, so the
/// caller always gets a handle to a loop that is about to wait. Dropping
/// the `LoopThread` asks the loop to quit and joins the worker.
///
/// [`EventLoop`]: struct.EventLoop.html
pub struct LoopThread {
    thread: Thread,
    state: Arc<State>,
}

impl LoopThread {
    pub fn new(init: Option<ThreadInitCallback>, name: impl Into<String>) -> LoopThread {
        let state = Arc::new(State {
            handle: Mutex::new(None),
            cond: Condvar::new(),
        });

        let worker_state = state.clone();
        let thread = Thread::new(move || LoopThread::worker(worker_state, init), name);

        LoopThread { thread, state }
    }

    /// Spawns the worker and blocks until its loop is up and waiting.
    pub fn start_loop(&mut self) -> io::Result<LoopHandle> {
        self.thread.start()?;

        let handle = {
            let mut slot = self.state.handle.lock().unwrap();
            loop {
                if let Some(handle) = slot.as_ref() {
                    break handle.clone();
                }
                slot = self.state.cond.wait(slot).unwrap();
            }
        };

        // The loop clears its quit flag when it enters run(); ride one
        // task through the queue so a quit() issued after this returns
        // cannot be clobbered by that reset.
        let (tx, rx) = mpsc::channel();
        handle.run_in_loop(move || {
            let _ = tx.send(());
        });
        let _ = rx.recv();

        Ok(handle)
    }

    fn worker(state: Arc<State>, init: Option<ThreadInitCallback>) {
        let event_loop = match EventLoop::new() {
            Ok(event_loop) => event_loop,
            Err(err) => panic!("failed to create EventLoop on worker: {}", err),
        };

        if let Some(init) = &init {
            init(&event_loop);
        }

        // Publish, then notify, then run: the creator must observe a loop
        // that is headed into its blocking wait.
        {
            let mut slot = state.handle.lock().unwrap();
            *slot = Some(event_loop.handle());
            state.cond.notify_one();
        }

        event_loop.run();

        let mut slot = state.handle.lock().unwrap();
        *slot = None;
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        let handle = self.state.handle.lock().unwrap().clone();
        if let Some(handle) = handle {
            handle.quit();
            self.thread.join();
        }
    }
}
