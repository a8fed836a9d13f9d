use std::io;

use crate::event_loop::{EventLoop, LoopHandle};
use crate::loop_thread::{LoopThread, ThreadInitCallback};

/// Starts N subordinate loops and hands them out round-robin.
///
/// With N == 0 every request falls back to the base loop — the loop of the
/// thread that built the pool, typically the one hosting the acceptor.
/// Round-robin is deterministic and load-blind.
pub struct LoopThreadPool {
    base_loop: LoopHandle,
    name: String,
    started: bool,
    num_threads: usize,
    next: usize,
    threads: Vec<LoopThread>,
    loops: Vec<LoopHandle>,
}

impl LoopThreadPool {
    pub fn new(base_loop: &EventLoop, name: impl Into<String>) -> LoopThreadPool {
        LoopThreadPool {
            base_loop: base_loop.handle(),
            name: name.into(),
            started: false,
            num_threads: 0,
            next: 0,
            threads: Vec::new(),
            loops: Vec::new(),
        }
    }

    pub fn set_thread_num(&mut self, num_threads: usize) {
        self.num_threads = num_threads;
    }

    pub fn start(&mut self, init: Option<ThreadInitCallback>) -> io::Result<()> {
        assert!(!self.started, "pool {:?} started twice", self.name);
        assert!(
            self.base_loop.is_in_loop_thread(),
            "pool {:?} must be started from its base loop's thread",
            self.name
        );

        self.started = true;

        for i in 0..self.num_threads {
            let name = format!("{}{}", self.name, i);
            let mut thread = LoopThread::new(init.clone(), name);
            self.loops.push(thread.start_loop()?);
            self.threads.push(thread);
        }

        if self.num_threads == 0 {
            if let Some(init) = &init {
                EventLoop::with_current(|event_loop| init(event_loop));
            }
        }

        Ok(())
    }

    /// The loop for the next connection: the base loop when the pool is
    /// empty, otherwise round-robin over the subordinate loops.
    pub fn next_loop(&mut self) -> LoopHandle {
        assert!(self.started, "pool {:?} not started", self.name);

        if self.loops.is_empty() {
            return self.base_loop.clone();
        }

        let handle = self.loops[self.next].clone();
        self.next += 1;
        if self.next >= self.loops.len() {
            self.next = 0;
        }
        handle
    }

    pub fn all_loops(&self) -> Vec<LoopHandle> {
        if self.loops.is_empty() {
            vec![self.base_loop.clone()]
        } else {
            self.loops.clone()
        }
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
