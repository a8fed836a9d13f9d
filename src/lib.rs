//! A multi-reactor event-dispatch library: many non-blocking fds
//! multiplexed across a small pool of I/O threads, one epoll loop per
//! thread.
//!
//! An [`EventLoop`] owns a poller and a cross-thread task queue; a
//! [`Channel`] binds one fd to a loop, an interest mask, and a set of
//! callbacks; a [`LoopThreadPool`] starts subordinate loops and hands them
//! out round-robin. Any thread can reach any loop through its
//! [`LoopHandle`].
//!
//! # Example
//!
//! ```no_run
//! use std::os::unix::io::AsRawFd;
//! use std::sync::Arc;
//!
//! use reactor_io::{Channel, EventFd, EventLoop};
//!
//! let event_loop = EventLoop::new().unwrap();
//!
//! let eventfd = Arc::new(EventFd::new().unwrap());
//! let channel = Channel::new(&event_loop, eventfd.as_raw_fd());
//!
//! let counter = eventfd.clone();
//! channel.set_read_callback(move |_when| {
//!     let _ = counter.read();
//!     println!("counter bumped");
//! });
//! channel.enable_reading();
//!
//! // Any thread may poke the loop through its handle.
//! let handle = event_loop.handle();
//! std::thread::spawn(move || {
//!     handle.run_in_loop(|| println!("ran on the loop thread"));
//! });
//!
//! eventfd.write(1).unwrap();
//! event_loop.run();
//!
//! channel.disable_all();
//! channel.remove();
//! ```

mod channel;
pub mod current_thread;
mod event_loop;
mod loop_thread;
mod loop_thread_pool;
mod poller;
mod ready;
mod sys;
mod thread;

pub use channel::Channel;

pub use event_loop::{EventLoop, LoopHandle, Task};

pub use loop_thread::{LoopThread, ThreadInitCallback};

pub use loop_thread_pool::LoopThreadPool;

pub use poller::{new_default_poller, EpollPoller, PollPoller, Poller};

pub use ready::Ready;

pub use sys::EventFd;

pub use thread::Thread;
