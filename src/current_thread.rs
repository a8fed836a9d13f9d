//! Cached OS thread id of the calling thread.
//!
//! `gettid(2)` is a full syscall; event-loop code asks for the id on every
//! dispatch and every cross-thread submit, so the value is cached in a
//! thread-local slot. 0 is the uncached sentinel, never a valid tid.

use std::cell::Cell;

thread_local! {
    static CACHED_TID: Cell<libc::pid_t> = Cell::new(0);
}

fn cache_tid() -> libc::pid_t {
    unsafe { libc::syscall(libc::SYS_gettid) as libc::pid_t }
}

pub fn tid() -> libc::pid_t {
    CACHED_TID.with(|cell| {
        let mut tid = cell.get();
        if tid == 0 {
            tid = cache_tid();
            cell.set(tid);
        }
        tid
    })
}
