/// Helper macro to execute a system call that returns an `io::Result`.
//
// Macro must be defined before any modules that uses them.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub mod epoll;
pub mod eventfd;
mod fd;

pub use epoll::{Epoll, Events};
pub use eventfd::EventFd;

use std::cmp;
use std::io;
use std::time::Duration;

pub fn poll(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> io::Result<usize> {
    let timeout = timeout
        .map(|to| cmp::min(to.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
        .unwrap_or(-1);

    let cnt = syscall!(poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout))?;

    Ok(cnt as usize)
}
