use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{error, trace, warn};

use crate::channel::{Channel, Membership};
use crate::sys;

use super::Poller;

const INIT_EVENT_LIST_SIZE: usize = 16;

/// The epoll back-end.
///
/// Registrations are level-triggered. The event buffer starts small and
/// doubles whenever a wait fills it completely, so a burst of ready fds
/// cannot starve the ones past the buffer's end for more than one
/// iteration.
pub struct EpollPoller {
    epoll: sys::Epoll,
    events: sys::Events,
    channels: IndexMap<RawFd, Weak<Channel>>,
}

impl EpollPoller {
    pub fn new() -> io::Result<EpollPoller> {
        Ok(EpollPoller {
            epoll: sys::Epoll::new()?,
            events: sys::Events::with_capacity(INIT_EVENT_LIST_SIZE),
            channels: IndexMap::new(),
        })
    }

    fn fill_active_channels(&self, num_events: usize, active: &mut Vec<Rc<Channel>>) {
        for idx in 0..num_events {
            let (fd, revents) = match self.events.get(idx) {
                Some(event) => event,
                None => break,
            };

            match self.channels.get(&fd).and_then(Weak::upgrade) {
                Some(channel) => {
                    channel.set_revents(revents);
                    active.push(channel);
                }
                None => warn!("epoll reported fd {} with no live channel", fd),
            }
        }
    }
}

impl Poller for EpollPoller {
    fn poll(&mut self, timeout: Duration, active: &mut Vec<Rc<Channel>>) -> io::Result<Instant> {
        let num_events = match self.epoll.wait(&mut self.events, Some(timeout)) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                trace!("epoll wait interrupted");
                0
            }
            Err(err) => return Err(err),
        };

        let receive_time = Instant::now();

        if num_events > 0 {
            trace!("{} events happened", num_events);
            self.fill_active_channels(num_events, active);

            if num_events == self.events.capacity() {
                self.events.double_capacity();
            }
        } else {
            trace!("nothing happened");
        }

        Ok(receive_time)
    }

    fn update_channel(&mut self, channel: &Rc<Channel>) {
        let fd = channel.fd();

        match channel.membership() {
            Membership::New | Membership::Deleted => {
                if channel.membership() == Membership::New {
                    self.channels.insert(fd, Rc::downgrade(channel));
                } else {
                    debug_assert!(self.has_channel(channel));
                }

                channel.set_membership(Membership::Added);
                if let Err(err) = self.epoll.add(fd, channel.events()) {
                    panic!("epoll add failed for fd {}: {}", fd, err);
                }
            }
            Membership::Added => {
                if channel.is_none_event() {
                    if let Err(err) = self.epoll.delete(fd) {
                        error!("epoll delete failed for fd {}: {}", fd, err);
                    }
                    channel.set_membership(Membership::Deleted);
                } else if let Err(err) = self.epoll.modify(fd, channel.events()) {
                    panic!("epoll modify failed for fd {}: {}", fd, err);
                }
            }
        }
    }

    fn remove_channel(&mut self, channel: &Channel) {
        let fd = channel.fd();

        assert!(self.has_channel(channel), "fd {} is not in this poller", fd);
        assert!(channel.is_none_event(), "fd {} still has interests", fd);

        self.channels.swap_remove(&fd);

        if channel.membership() == Membership::Added {
            if let Err(err) = self.epoll.delete(fd) {
                error!("epoll delete failed for fd {}: {}", fd, err);
            }
        }

        channel.set_membership(Membership::New);
    }

    fn has_channel(&self, channel: &Channel) -> bool {
        self.channels
            .get(&channel.fd())
            .map_or(false, |weak| ptr::eq(weak.as_ptr(), channel))
    }
}

#[cfg(test)]
mod test {
    use std::os::unix::io::AsRawFd;
    use std::rc::Rc;
    use std::time::Duration;

    use super::{EpollPoller, INIT_EVENT_LIST_SIZE};
    use crate::channel::{Channel, Membership};
    use crate::event_loop::EventLoop;
    use crate::poller::Poller;
    use crate::ready::Ready;
    use crate::sys::EventFd;

    fn poll_now(poller: &mut EpollPoller, active: &mut Vec<Rc<Channel>>) {
        active.clear();
        poller
            .poll(Duration::from_millis(0), active)
            .unwrap();
    }

    #[test]
    fn membership_state_machine() {
        let event_loop = EventLoop::new().unwrap();
        let eventfd = EventFd::new().unwrap();
        let channel = Channel::new(&event_loop, eventfd.as_raw_fd());
        let mut poller = EpollPoller::new().unwrap();

        assert_eq!(channel.membership(), Membership::New);
        assert!(!poller.has_channel(&channel));

        channel.set_interest(Ready::readable());
        poller.update_channel(&channel);
        assert_eq!(channel.membership(), Membership::Added);
        assert!(poller.has_channel(&channel));

        // Same mask again: a plain modify, nothing changes.
        poller.update_channel(&channel);
        assert_eq!(channel.membership(), Membership::Added);

        // Empty interest detaches from the kernel but stays indexed.
        channel.set_interest(Ready::empty());
        poller.update_channel(&channel);
        assert_eq!(channel.membership(), Membership::Deleted);
        assert!(poller.has_channel(&channel));

        // Re-enabling is a cheap re-add.
        channel.set_interest(Ready::readable());
        poller.update_channel(&channel);
        assert_eq!(channel.membership(), Membership::Added);

        channel.set_interest(Ready::empty());
        poller.remove_channel(&channel);
        assert_eq!(channel.membership(), Membership::New);
        assert!(!poller.has_channel(&channel));
    }

    #[test]
    fn reports_ready_channels_with_revents() {
        let event_loop = EventLoop::new().unwrap();
        let eventfd = EventFd::new().unwrap();
        let channel = Channel::new(&event_loop, eventfd.as_raw_fd());
        let mut poller = EpollPoller::new().unwrap();

        channel.set_interest(Ready::readable());
        poller.update_channel(&channel);

        let mut active = Vec::new();
        poll_now(&mut poller, &mut active);
        assert!(active.is_empty());

        eventfd.write(1).unwrap();
        poll_now(&mut poller, &mut active);
        assert_eq!(active.len(), 1);
        assert!(Rc::ptr_eq(&active[0], &channel));
        assert!(channel.revents().is_readable());

        channel.set_interest(Ready::empty());
        poller.remove_channel(&channel);
    }

    #[test]
    fn removed_channel_is_not_reported() {
        let event_loop = EventLoop::new().unwrap();
        let eventfd = EventFd::new().unwrap();
        let channel = Channel::new(&event_loop, eventfd.as_raw_fd());
        let mut poller = EpollPoller::new().unwrap();

        channel.set_interest(Ready::readable());
        poller.update_channel(&channel);
        eventfd.write(1).unwrap();

        channel.set_interest(Ready::empty());
        poller.remove_channel(&channel);

        let mut active = Vec::new();
        poll_now(&mut poller, &mut active);
        assert!(active.is_empty());
    }

    #[test]
    fn grows_event_buffer_when_saturated() {
        let event_loop = EventLoop::new().unwrap();
        let mut poller = EpollPoller::new().unwrap();

        let eventfds: Vec<EventFd> = (0..17).map(|_| EventFd::new().unwrap()).collect();
        let channels: Vec<Rc<Channel>> = eventfds
            .iter()
            .map(|eventfd| {
                let channel = Channel::new(&event_loop, eventfd.as_raw_fd());
                channel.set_interest(Ready::readable());
                poller.update_channel(&channel);
                channel
            })
            .collect();

        for eventfd in &eventfds {
            eventfd.write(1).unwrap();
        }

        assert_eq!(poller.events.capacity(), INIT_EVENT_LIST_SIZE);

        let mut active = Vec::new();
        poll_now(&mut poller, &mut active);
        assert_eq!(active.len(), INIT_EVENT_LIST_SIZE);
        assert!(poller.events.capacity() >= 2 * INIT_EVENT_LIST_SIZE);

        // Level-triggered and unread: the grown buffer sees all of them.
        poll_now(&mut poller, &mut active);
        assert_eq!(active.len(), 17);

        for channel in &channels {
            channel.set_interest(Ready::empty());
            poller.remove_channel(channel);
        }
    }
}
