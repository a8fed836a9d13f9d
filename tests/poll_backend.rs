use std::cell::RefCell;
use std::os::unix::io::AsRawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use reactor_io::{Channel, EventFd, EventLoop, LoopThread};

thread_local! {
    static CHANNELS: RefCell<Vec<Rc<Channel>>> = RefCell::new(Vec::new());
}

// This file runs as its own process, so flipping the backend selector here
// cannot leak into the other test binaries.
#[test]
fn poll_backend_dispatches_events_and_tasks() {
    std::env::set_var("USE_POLL", "1");

    let mut loop_thread = LoopThread::new(None, "poll-io");
    let handle = loop_thread.start_loop().unwrap();

    let eventfd = Arc::new(EventFd::new().unwrap());
    let seen = Arc::new(AtomicU64::new(0));

    let (tx, rx) = mpsc::channel();
    {
        let eventfd = eventfd.clone();
        let seen = seen.clone();
        handle.run_in_loop(move || {
            EventLoop::with_current(|event_loop| {
                let channel = Channel::new(event_loop, eventfd.as_raw_fd());
                let counter = eventfd.clone();
                let seen = seen.clone();
                channel.set_read_callback(move |_when| {
                    if let Ok(n) = counter.read() {
                        seen.fetch_add(n, Ordering::SeqCst);
                    }
                });
                channel.enable_reading();
                CHANNELS.with(|stash| stash.borrow_mut().push(channel));
            })
            .unwrap();
            tx.send(()).unwrap();
        });
    }
    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    eventfd.write(7).unwrap();

    let deadline = Instant::now() + Duration::from_millis(500);
    while Instant::now() < deadline && seen.load(Ordering::SeqCst) != 7 {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(seen.load(Ordering::SeqCst), 7);

    let (tx, rx) = mpsc::channel();
    handle.run_in_loop(move || {
        CHANNELS.with(|stash| {
            for channel in stash.borrow_mut().drain(..) {
                channel.disable_all();
                channel.remove();
            }
        });
        tx.send(()).unwrap();
    });
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
}
