use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use libc::{self, c_short};
use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, POLLPRI, POLLRDHUP};
use log::trace;

use crate::channel::{Channel, Membership};
use crate::ready::Ready;
use crate::sys;

use super::Poller;

struct Entry {
    channel: Weak<Channel>,
    idx: usize,
}

/// The level-triggered `poll(2)` back-end, selected by `USE_POLL`.
///
/// Mirrors the epoll back-end with a pollfd array in place of a kernel
/// handle. A detached entry keeps its array slot with a negated fd, which
/// `poll(2)` ignores, so re-enabling the channel is a slot restore.
pub struct PollPoller {
    pollfds: Vec<libc::pollfd>,
    channels: IndexMap<RawFd, Entry>,
}

impl PollPoller {
    pub fn new() -> PollPoller {
        PollPoller {
            pollfds: Vec::new(),
            channels: IndexMap::new(),
        }
    }

    fn fill_active_channels(&self, num_events: usize, active: &mut Vec<Rc<Channel>>) {
        let mut left = num_events;

        for pollfd in &self.pollfds {
            if left == 0 {
                break;
            }

            if pollfd.revents == 0 {
                continue;
            }

            left -= 1;

            let channel = self
                .channels
                .get(&pollfd.fd)
                .and_then(|entry| entry.channel.upgrade());

            if let Some(channel) = channel {
                channel.set_revents(revents_from_poll(pollfd.revents));
                active.push(channel);
            }
        }
    }
}

impl Poller for PollPoller {
    fn poll(&mut self, timeout: Duration, active: &mut Vec<Rc<Channel>>) -> io::Result<Instant> {
        let num_events = match sys::poll(&mut self.pollfds, Some(timeout)) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                trace!("poll wait interrupted");
                0
            }
            Err(err) => return Err(err),
        };

        let receive_time = Instant::now();

        if num_events > 0 {
            trace!("{} events happened", num_events);
            self.fill_active_channels(num_events, active);
        } else {
            trace!("nothing happened");
        }

        Ok(receive_time)
    }

    fn update_channel(&mut self, channel: &Rc<Channel>) {
        let fd = channel.fd();

        match channel.membership() {
            Membership::New => {
                self.pollfds.push(libc::pollfd {
                    fd,
                    events: interest_to_poll(channel.events()),
                    revents: 0,
                });
                self.channels.insert(
                    fd,
                    Entry {
                        channel: Rc::downgrade(channel),
                        idx: self.pollfds.len() - 1,
                    },
                );
                channel.set_membership(Membership::Added);
            }
            Membership::Deleted => {
                let idx = self.channels[&fd].idx;
                self.pollfds[idx].fd = fd;
                self.pollfds[idx].events = interest_to_poll(channel.events());
                self.pollfds[idx].revents = 0;
                channel.set_membership(Membership::Added);
            }
            Membership::Added => {
                let idx = self.channels[&fd].idx;
                if channel.is_none_event() {
                    // Park the slot: poll(2) skips negative fds.
                    self.pollfds[idx].fd = -fd - 1;
                    self.pollfds[idx].revents = 0;
                    channel.set_membership(Membership::Deleted);
                } else {
                    self.pollfds[idx].events = interest_to_poll(channel.events());
                    self.pollfds[idx].revents = 0;
                }
            }
        }
    }

    fn remove_channel(&mut self, channel: &Channel) {
        let fd = channel.fd();

        assert!(self.has_channel(channel), "fd {} is not in this poller", fd);
        assert!(channel.is_none_event(), "fd {} still has interests", fd);

        let entry = match self.channels.swap_remove(&fd) {
            Some(entry) => entry,
            None => return,
        };

        self.pollfds.swap_remove(entry.idx);

        // The slot now holds whatever pollfd was at the tail; point its
        // index entry at the new position.
        if entry.idx < self.pollfds.len() {
            let moved = self.pollfds[entry.idx].fd;
            let moved = if moved < 0 { -moved - 1 } else { moved };
            if let Some(moved_entry) = self.channels.get_mut(&moved) {
                moved_entry.idx = entry.idx;
            }
        }

        channel.set_membership(Membership::New);
    }

    fn has_channel(&self, channel: &Channel) -> bool {
        self.channels
            .get(&channel.fd())
            .map_or(false, |entry| ptr::eq(entry.channel.as_ptr(), channel))
    }
}

fn interest_to_poll(interest: Ready) -> c_short {
    let mut events = 0;

    if interest.is_readable() {
        // POLLRDHUP is only reported when asked for, unlike ERR and HUP.
        events |= POLLIN | POLLPRI | POLLRDHUP;
    }

    if interest.is_writable() {
        events |= POLLOUT;
    }

    events
}

fn revents_from_poll(revents: c_short) -> Ready {
    let mut ready = Ready::empty();

    if revents & (POLLIN | POLLPRI | POLLRDHUP) != 0 {
        ready.insert(Ready::readable());
    }

    if revents & POLLOUT != 0 {
        ready.insert(Ready::writable());
    }

    if revents & (POLLERR | POLLNVAL) != 0 {
        ready.insert(Ready::error());
    }

    if revents & POLLHUP != 0 {
        ready.insert(Ready::hup());
    }

    ready
}

#[cfg(test)]
mod test {
    use std::os::unix::io::AsRawFd;
    use std::rc::Rc;
    use std::time::Duration;

    use super::PollPoller;
    use crate::channel::{Channel, Membership};
    use crate::event_loop::EventLoop;
    use crate::poller::Poller;
    use crate::ready::Ready;
    use crate::sys::EventFd;

    fn poll_now(poller: &mut PollPoller, active: &mut Vec<Rc<Channel>>) {
        active.clear();
        poller.poll(Duration::from_millis(0), active).unwrap();
    }

    #[test]
    fn membership_state_machine() {
        let event_loop = EventLoop::new().unwrap();
        let eventfd = EventFd::new().unwrap();
        let channel = Channel::new(&event_loop, eventfd.as_raw_fd());
        let mut poller = PollPoller::new();

        channel.set_interest(Ready::readable());
        poller.update_channel(&channel);
        assert_eq!(channel.membership(), Membership::Added);
        assert!(poller.has_channel(&channel));

        channel.set_interest(Ready::empty());
        poller.update_channel(&channel);
        assert_eq!(channel.membership(), Membership::Deleted);
        assert!(poller.has_channel(&channel));

        // A parked entry must not be reported even when the fd is ready.
        eventfd.write(1).unwrap();
        let mut active = Vec::new();
        poll_now(&mut poller, &mut active);
        assert!(active.is_empty());

        channel.set_interest(Ready::readable());
        poller.update_channel(&channel);
        poll_now(&mut poller, &mut active);
        assert_eq!(active.len(), 1);
        assert!(channel.revents().is_readable());

        channel.set_interest(Ready::empty());
        poller.remove_channel(&channel);
        assert_eq!(channel.membership(), Membership::New);
        assert!(!poller.has_channel(&channel));
    }

    #[test]
    fn swap_removal_keeps_tail_entry_polled() {
        let event_loop = EventLoop::new().unwrap();
        let mut poller = PollPoller::new();

        let eventfds: Vec<EventFd> = (0..3).map(|_| EventFd::new().unwrap()).collect();
        let channels: Vec<Rc<Channel>> = eventfds
            .iter()
            .map(|eventfd| {
                let channel = Channel::new(&event_loop, eventfd.as_raw_fd());
                channel.set_interest(Ready::readable());
                poller.update_channel(&channel);
                channel
            })
            .collect();

        // Removing the head swaps the tail channel into its slot.
        channels[0].set_interest(Ready::empty());
        poller.remove_channel(&channels[0]);

        eventfds[2].write(1).unwrap();

        let mut active = Vec::new();
        poll_now(&mut poller, &mut active);
        assert_eq!(active.len(), 1);
        assert!(Rc::ptr_eq(&active[0], &channels[2]));

        for channel in &channels[1..] {
            channel.set_interest(Ready::empty());
            poller.remove_channel(channel);
        }
    }
}
