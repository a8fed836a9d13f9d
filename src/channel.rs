use std::any::Any;
use std::cell::{Cell, RefCell};
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::Instant;

use crate::event_loop::{EventLoop, LoopCore, LoopHandle};
use crate::ready::Ready;

/// Where a channel currently stands with its loop's poller.
///
/// `Deleted` entries stay in the poller's index so that re-enabling the
/// channel is a plain kernel ADD, not a fresh bookkeeping cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Membership {
    New,
    Added,
    Deleted,
}

#[derive(Default)]
struct Callbacks {
    read: Option<Box<dyn FnMut(Instant)>>,
    write: Option<Box<dyn FnMut()>>,
    close: Option<Box<dyn FnMut()>>,
    error: Option<Box<dyn FnMut()>>,
}

/// The binding of one file descriptor to an event loop: an interest mask,
/// the revents the poller last reported, and the callbacks to fan them
/// out to.
///
/// A `Channel` never closes its fd; whatever handed the fd in keeps
/// ownership of it. All mutation and dispatch happens on the owning loop's
/// thread (`Channel` is not `Send`, and the loop checks the thread id on
/// every registration change).
///
/// A channel must be taken out of its loop (`disable_all` + `remove`)
/// before the last `Rc` to it is dropped; dropping a channel the poller
/// still knows about is a programming error and panics.
pub struct Channel {
    me: Weak<Channel>,
    owner: Weak<LoopCore>,
    fd: RawFd,
    events: Cell<Ready>,
    revents: Cell<Ready>,
    membership: Cell<Membership>,
    tie: RefCell<Option<Weak<dyn Any>>>,
    callbacks: RefCell<Callbacks>,
}

impl Channel {
    pub fn new(event_loop: &EventLoop, fd: RawFd) -> Rc<Channel> {
        Channel::from_core(event_loop.core(), fd)
    }

    pub(crate) fn from_core(core: &Rc<LoopCore>, fd: RawFd) -> Rc<Channel> {
        Rc::new_cyclic(|me| Channel {
            me: me.clone(),
            owner: Rc::downgrade(core),
            fd,
            events: Cell::new(Ready::empty()),
            revents: Cell::new(Ready::empty()),
            membership: Cell::new(Membership::New),
            tie: RefCell::new(None),
            callbacks: RefCell::new(Callbacks::default()),
        })
    }

    pub fn set_read_callback<F>(&self, callback: F)
    where
        F: FnMut(Instant) + 'static,
    {
        self.callbacks.borrow_mut().read = Some(Box::new(callback));
    }

    pub fn set_write_callback<F>(&self, callback: F)
    where
        F: FnMut() + 'static,
    {
        self.callbacks.borrow_mut().write = Some(Box::new(callback));
    }

    pub fn set_close_callback<F>(&self, callback: F)
    where
        F: FnMut() + 'static,
    {
        self.callbacks.borrow_mut().close = Some(Box::new(callback));
    }

    pub fn set_error_callback<F>(&self, callback: F)
    where
        F: FnMut() + 'static,
    {
        self.callbacks.borrow_mut().error = Some(Box::new(callback));
    }

    /// Installs a weak lifetime anchor. When the anchor is gone by the time
    /// an event arrives, dispatch is silently skipped; this protects
    /// callbacks whose captured state is owned by an object that may be
    /// destroyed between poll return and dispatch.
    pub fn tie(&self, anchor: &Rc<dyn Any>) {
        *self.tie.borrow_mut() = Some(Rc::downgrade(anchor));
    }

    pub fn enable_reading(&self) {
        self.set_interest(self.events.get() | Ready::readable());
        self.update();
    }

    pub fn disable_reading(&self) {
        self.set_interest(self.events.get() - Ready::readable());
        self.update();
    }

    pub fn enable_writing(&self) {
        self.set_interest(self.events.get() | Ready::writable());
        self.update();
    }

    pub fn disable_writing(&self) {
        self.set_interest(self.events.get() - Ready::writable());
        self.update();
    }

    pub fn disable_all(&self) {
        self.set_interest(Ready::empty());
        self.update();
    }

    /// Unregisters this channel's fd and erases it from the poller's index.
    /// The interest mask must already be empty.
    pub fn remove(&self) {
        let core = self.owner_core();
        if let Some(me) = self.me.upgrade() {
            core.remove_channel(&me);
        }
    }

    /// Fans the last reported revents out to the installed callbacks.
    ///
    /// Invoked by the owning loop with the instant its poll wait returned.
    /// The branches are independent and fire in the order close, error,
    /// read, write.
    pub fn handle_event(&self, receive_time: Instant) {
        let tie = self.tie.borrow().clone();
        match tie {
            Some(tie) => {
                // Promote at most once per delivery.
                if let Some(_guard) = tie.upgrade() {
                    self.dispatch(receive_time);
                }
            }
            None => self.dispatch(receive_time),
        }
    }

    fn dispatch(&self, receive_time: Instant) {
        let revents = self.revents();
        let mut callbacks = self.callbacks.borrow_mut();

        // Hang-up with nothing left to read means the connection is done.
        if revents.is_hup() && !revents.is_readable() {
            if let Some(callback) = callbacks.close.as_mut() {
                callback();
            }
        }

        if revents.is_error() {
            if let Some(callback) = callbacks.error.as_mut() {
                callback();
            }
        }

        if revents.is_readable() {
            if let Some(callback) = callbacks.read.as_mut() {
                callback(receive_time);
            }
        }

        if revents.is_writable() {
            if let Some(callback) = callbacks.write.as_mut() {
                callback();
            }
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn events(&self) -> Ready {
        self.events.get()
    }

    pub fn is_none_event(&self) -> bool {
        self.events.get().is_empty()
    }

    pub fn is_reading(&self) -> bool {
        self.events.get().is_readable()
    }

    pub fn is_writing(&self) -> bool {
        self.events.get().is_writable()
    }

    pub fn owner_loop(&self) -> LoopHandle {
        self.owner_core().handle()
    }

    /// Adjusts the interest mask without touching the poller; registration
    /// is the caller's job.
    pub(crate) fn set_interest(&self, interest: Ready) {
        self.events.set(interest);
    }

    pub(crate) fn revents(&self) -> Ready {
        self.revents.get()
    }

    pub(crate) fn set_revents(&self, revents: Ready) {
        self.revents.set(revents);
    }

    pub(crate) fn membership(&self) -> Membership {
        self.membership.get()
    }

    pub(crate) fn set_membership(&self, membership: Membership) {
        self.membership.set(membership);
    }

    fn update(&self) {
        let core = self.owner_core();
        if let Some(me) = self.me.upgrade() {
            core.update_channel(&me);
        }
    }

    fn owner_core(&self) -> Rc<LoopCore> {
        match self.owner.upgrade() {
            Some(core) => core,
            None => panic!("Channel fd={} used after its EventLoop was dropped", self.fd),
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.membership.get() != Membership::New && !std::thread::panicking() {
            panic!(
                "Channel fd={} dropped while still known to its poller",
                self.fd
            );
        }
    }
}
