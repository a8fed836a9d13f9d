use std::env;
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::channel::Channel;

pub use self::epoll::EpollPoller;
pub use self::poll::PollPoller;

mod epoll;
mod poll;

/// A pluggable readiness back-end for one event loop.
///
/// The poller indexes channels by fd but does not own them; the loop hands
/// in `Rc`s and the index keeps weak references. All methods are called
/// from the owning loop's thread only.
pub trait Poller {
    /// Blocks up to `timeout`, fills `active` with the channels whose
    /// revents were freshly observed, and returns the instant the wait
    /// returned. An interrupted wait reports no channels.
    fn poll(&mut self, timeout: Duration, active: &mut Vec<Rc<Channel>>) -> io::Result<Instant>;

    /// Inserts, modifies, or re-adds `channel` based on its membership
    /// state and current interest mask.
    fn update_channel(&mut self, channel: &Rc<Channel>);

    /// Detaches `channel` and erases it from the index. The channel's
    /// interest mask must be empty.
    fn remove_channel(&mut self, channel: &Channel);

    /// True iff the index maps `channel`'s fd to this exact channel.
    fn has_channel(&self, channel: &Channel) -> bool;
}

/// Selects the back-end for a new loop: `poll(2)` when `USE_POLL` is set to
/// a non-empty value, epoll otherwise.
pub fn new_default_poller() -> io::Result<Box<dyn Poller>> {
    match env::var_os("USE_POLL") {
        Some(value) if !value.is_empty() => Ok(Box::new(PollPoller::new())),
        _ => Ok(Box::new(EpollPoller::new()?)),
    }
}
