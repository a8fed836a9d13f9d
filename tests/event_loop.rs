use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use reactor_io::LoopThread;

fn wait_for(flag: &AtomicBool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    flag.load(Ordering::SeqCst)
}

#[test]
fn cross_thread_task_runs_promptly() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut loop_thread = LoopThread::new(None, "io");
    let handle = loop_thread.start_loop().unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let ran2 = ran.clone();
    handle.run_in_loop(move || ran2.store(true, Ordering::SeqCst));

    // The wakeup descriptor breaks the loop out of its blocking wait; no
    // need to ride out a poll timeout.
    assert!(wait_for(&ran, Duration::from_millis(100)));
}

#[test]
fn quit_from_another_thread_returns_promptly() {
    let mut loop_thread = LoopThread::new(None, "io");
    let handle = loop_thread.start_loop().unwrap();

    let start = Instant::now();
    handle.quit();
    drop(loop_thread); // joins the worker
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn tasks_run_in_fifo_order() {
    let mut loop_thread = LoopThread::new(None, "io");
    let handle = loop_thread.start_loop().unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::channel();

    for i in 0..100 {
        let order = order.clone();
        let tx = tx.clone();
        handle.queue_in_loop(move || {
            order.lock().unwrap().push(i);
            if i == 99 {
                tx.send(()).unwrap();
            }
        });
    }

    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let order = order.lock().unwrap();
    assert_eq!(*order, (0..100).collect::<Vec<_>>());
}

#[test]
fn task_enqueued_during_drain_runs_promptly() {
    let mut loop_thread = LoopThread::new(None, "io");
    let handle = loop_thread.start_loop().unwrap();

    let (tx, rx) = mpsc::channel();
    let inner_handle = handle.clone();
    let start = Instant::now();

    // The outer task runs inside the loop's drain; the task it enqueues
    // from there must still run in the next iteration without sleeping
    // out the 10 s poll timeout.
    handle.queue_in_loop(move || {
        let tx = tx.clone();
        inner_handle.queue_in_loop(move || {
            tx.send(()).unwrap();
        });
    });

    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn each_task_runs_exactly_once() {
    let mut loop_thread = LoopThread::new(None, "io");
    let handle = loop_thread.start_loop().unwrap();

    let count = Arc::new(Mutex::new(0u32));
    let (tx, rx) = mpsc::channel();

    for _ in 0..50 {
        let count = count.clone();
        handle.queue_in_loop(move || {
            *count.lock().unwrap() += 1;
        });
    }
    handle.queue_in_loop(move || {
        tx.send(()).unwrap();
    });

    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(*count.lock().unwrap(), 50);
}
