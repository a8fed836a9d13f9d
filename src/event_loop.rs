use std::cell::{Cell, RefCell};
use std::fmt;
use std::io;
use std::mem;
use std::os::unix::io::AsRawFd;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, trace};

use crate::channel::Channel;
use crate::current_thread;
use crate::poller::{self, Poller};
use crate::ready::Ready;
use crate::sys::EventFd;

/// Upper bound on one poller wait. Wakeups normally cut the wait short in
/// well under a millisecond; the bound only matters if the wakeup
/// descriptor is somehow lost.
const POLL_TIMEOUT: Duration = Duration::from_millis(10_000);

pub type Task = Box<dyn FnOnce() + Send>;

thread_local! {
    static CURRENT_LOOP: RefCell<Option<Weak<LoopCore>>> = RefCell::new(None);
}

// State reachable from other threads. Everything else about a loop stays
// on its own thread.
struct Shared {
    tid: libc::pid_t,
    quit: AtomicBool,
    draining: AtomicBool,
    pending: Mutex<Vec<Task>>,
    wakeup: Arc<EventFd>,
}

pub(crate) struct LoopCore {
    shared: Arc<Shared>,
    looping: Cell<bool>,
    poller: RefCell<Box<dyn Poller>>,
    active: RefCell<Vec<Rc<Channel>>>,
    wakeup_channel: RefCell<Option<Rc<Channel>>>,
}

impl LoopCore {
    pub(crate) fn handle(&self) -> LoopHandle {
        LoopHandle {
            shared: self.shared.clone(),
        }
    }

    pub(crate) fn assert_in_loop_thread(&self) {
        let current = current_thread::tid();
        if self.shared.tid != current {
            panic!(
                "EventLoop owned by thread {} was used from thread {}",
                self.shared.tid, current
            );
        }
    }

    pub(crate) fn update_channel(&self, channel: &Rc<Channel>) {
        self.assert_in_loop_thread();
        self.poller.borrow_mut().update_channel(channel);
    }

    pub(crate) fn remove_channel(&self, channel: &Rc<Channel>) {
        self.assert_in_loop_thread();
        self.poller.borrow_mut().remove_channel(channel);
    }

    pub(crate) fn has_channel(&self, channel: &Channel) -> bool {
        self.poller.borrow().has_channel(channel)
    }
}

impl Drop for LoopCore {
    fn drop(&mut self) {
        // The wakeup channel was the first one in; it goes out last, and
        // without going through Channel::update, whose back-reference to
        // this core is already dead.
        if let Some(channel) = self.wakeup_channel.borrow_mut().take() {
            channel.set_interest(Ready::empty());
            self.poller.borrow_mut().remove_channel(&channel);
        }

        let _ = CURRENT_LOOP.try_with(|current| current.borrow_mut().take());

        debug!("EventLoop in thread {} destroyed", self.shared.tid);
    }
}

/// A per-thread reactor: multiplexes readiness on registered channels and
/// drains a cross-thread task queue.
///
/// At most one `EventLoop` may exist per OS thread; constructing a second
/// one panics. The loop is not `Send` — it is created, run, and destroyed
/// on its owning thread. Other threads talk to it through a [`LoopHandle`].
///
/// [`LoopHandle`]: struct.LoopHandle.html
pub struct EventLoop {
    core: Rc<LoopCore>,
}

impl EventLoop {
    pub fn new() -> io::Result<EventLoop> {
        let tid = current_thread::tid();

        CURRENT_LOOP.with(|current| {
            if current.borrow().as_ref().and_then(Weak::upgrade).is_some() {
                panic!("another EventLoop already exists in thread {}", tid);
            }
        });

        let wakeup = Arc::new(EventFd::new()?);
        let poller = poller::new_default_poller()?;

        let shared = Arc::new(Shared {
            tid,
            quit: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
            wakeup,
        });

        let core = Rc::new(LoopCore {
            shared,
            looping: Cell::new(false),
            poller: RefCell::new(poller),
            active: RefCell::new(Vec::new()),
            wakeup_channel: RefCell::new(None),
        });

        CURRENT_LOOP.with(|current| {
            *current.borrow_mut() = Some(Rc::downgrade(&core));
        });

        let wakeup_channel = Channel::from_core(&core, core.shared.wakeup.as_raw_fd());
        let eventfd = core.shared.wakeup.clone();
        wakeup_channel.set_read_callback(move |_| match eventfd.read() {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                trace!("wakeup eventfd already drained");
            }
            Err(err) => error!("wakeup eventfd read failed: {}", err),
        });
        wakeup_channel.enable_reading();
        *core.wakeup_channel.borrow_mut() = Some(wakeup_channel);

        debug!("EventLoop created in thread {}", tid);

        Ok(EventLoop { core })
    }

    /// Calls `f` with the loop owned by the current thread, if any.
    ///
    /// This is how a task submitted through [`LoopHandle::run_in_loop`]
    /// gets at its hosting loop, e.g. to construct channels on it.
    ///
    /// [`LoopHandle::run_in_loop`]: struct.LoopHandle.html#method.run_in_loop
    pub fn with_current<F, R>(f: F) -> Option<R>
    where
        F: FnOnce(&EventLoop) -> R,
    {
        CURRENT_LOOP.with(|current| {
            let core = current.borrow().as_ref().and_then(Weak::upgrade)?;
            Some(f(&EventLoop { core }))
        })
    }

    /// Runs the dispatch loop until [`quit`] is observed.
    ///
    /// Each iteration clears the activation list, waits on the poller,
    /// dispatches every reported channel with the instant the wait
    /// returned, and then drains the pending-task queue.
    ///
    /// [`quit`]: struct.EventLoop.html#method.quit
    pub fn run(&self) {
        self.core.assert_in_loop_thread();
        assert!(!self.core.looping.get(), "EventLoop::run called reentrantly");

        self.core.looping.set(true);
        self.core.shared.quit.store(false, Ordering::Release);

        debug!("EventLoop in thread {} start looping", self.core.shared.tid);

        while !self.core.shared.quit.load(Ordering::Acquire) {
            let mut active = self.core.active.take();
            active.clear();

            let receive_time = {
                let mut poller = self.core.poller.borrow_mut();
                match poller.poll(POLL_TIMEOUT, &mut active) {
                    Ok(receive_time) => receive_time,
                    Err(err) => {
                        error!("poller wait failed: {}", err);
                        Instant::now()
                    }
                }
            };

            for channel in &active {
                channel.handle_event(receive_time);
            }

            self.core.active.replace(active);

            self.drain_tasks();
        }

        debug!("EventLoop in thread {} stop looping", self.core.shared.tid);
        self.core.looping.set(false);
    }

    pub fn quit(&self) {
        self.handle().quit();
    }

    pub fn run_in_loop<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle().run_in_loop(task);
    }

    pub fn queue_in_loop<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle().queue_in_loop(task);
    }

    pub fn wakeup(&self) {
        self.handle().wakeup();
    }

    pub fn is_in_loop_thread(&self) -> bool {
        self.handle().is_in_loop_thread()
    }

    pub fn update_channel(&self, channel: &Rc<Channel>) {
        self.core.update_channel(channel);
    }

    pub fn remove_channel(&self, channel: &Rc<Channel>) {
        self.core.remove_channel(channel);
    }

    pub fn has_channel(&self, channel: &Channel) -> bool {
        self.core.has_channel(channel)
    }

    /// A cheap, cloneable, `Send` face of this loop for other threads.
    pub fn handle(&self) -> LoopHandle {
        self.core.handle()
    }

    pub(crate) fn core(&self) -> &Rc<LoopCore> {
        &self.core
    }

    fn drain_tasks(&self) {
        let shared = &self.core.shared;

        shared.draining.store(true, Ordering::Release);

        // Swap the queue out under the mutex and run the snapshot outside
        // it: submitters never block on a running task, and a task that
        // enqueues more work cannot extend the current drain.
        let tasks = {
            let mut pending = shared.pending.lock().unwrap();
            mem::take(&mut *pending)
        };

        for task in tasks {
            task();
        }

        shared.draining.store(false, Ordering::Release);
    }
}

/// The cross-thread face of an [`EventLoop`]: submit tasks, force the
/// poller out of its wait, or ask the loop to quit, from any thread.
///
/// Handles compare equal iff they refer to the same loop.
///
/// [`EventLoop`]: struct.EventLoop.html
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<Shared>,
}

impl LoopHandle {
    pub fn is_in_loop_thread(&self) -> bool {
        self.shared.tid == current_thread::tid()
    }

    pub fn quit(&self) {
        self.shared.quit.store(true, Ordering::Release);
        if !self.is_in_loop_thread() {
            self.wakeup();
        }
    }

    /// Runs `task` inline when called on the loop's own thread, otherwise
    /// enqueues it for the loop's next iteration.
    pub fn run_in_loop<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_in_loop_thread() {
            task();
        } else {
            self.queue_in_loop(task);
        }
    }

    /// Appends `task` to the loop's pending queue.
    ///
    /// The loop is woken when the caller is on another thread, and also
    /// when the loop is currently draining tasks: the drain snapshot has
    /// already been taken, so without a wakeup a task enqueued by another
    /// task would sleep out a full poll timeout.
    pub fn queue_in_loop<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut pending = self.shared.pending.lock().unwrap();
            pending.push(Box::new(task));
        }

        if !self.is_in_loop_thread() || self.shared.draining.load(Ordering::Acquire) {
            self.wakeup();
        }
    }

    /// Writes 8 bytes to the loop's wakeup descriptor, forcing a blocked
    /// poller wait to return.
    pub fn wakeup(&self) {
        match self.shared.wakeup.write(1) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                // The counter is saturated; the loop is overdue to wake anyway.
                trace!("wakeup eventfd saturated");
            }
            Err(err) => error!("wakeup eventfd write failed: {}", err),
        }
    }
}

impl PartialEq for LoopHandle {
    fn eq(&self, other: &LoopHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for LoopHandle {}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "LoopHandle {{ tid: {} }}", self.shared.tid)
    }
}
