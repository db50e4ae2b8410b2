//! The notify back-channel: a nonblocking self-pipe whose read end sits
//! in the poller set. Writing one byte interrupts a blocked
//! `epoll_wait`; the poller drains the pipe before dispatching.

use crate::errors::IoqError;
use nix::errno::Errno;
use std::io;
use std::os::unix::io::RawFd;

pub(crate) struct Notifier {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl Notifier {
    pub(crate) fn new() -> Result<Self, IoqError> {
        let mut fds = [0 as RawFd; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if ret < 0 {
            return Err(IoqError::NotifySetup(io::Error::last_os_error()));
        }
        Ok(Notifier {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    pub(crate) fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Wake the poller. A full pipe means a wakeup is already pending,
    /// which is all a level-triggered consumer needs.
    pub(crate) fn signal(&self) {
        let byte = 1u8;
        loop {
            let ret = unsafe { libc::write(self.write_fd, &byte as *const u8 as *const _, 1) };
            if ret >= 0 || Errno::last() != Errno::EINTR {
                return;
            }
        }
    }

    /// Swallow every pending wakeup byte.
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let ret = unsafe { libc::read(self.read_fd, buf.as_mut_ptr() as *mut _, buf.len()) };
            if ret > 0 {
                continue;
            }
            if ret < 0 && Errno::last() == Errno::EINTR {
                continue;
            }
            // 0 (impossible while the write end lives) or EAGAIN: dry.
            return;
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.write_fd);
            libc::close(self.read_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_then_drain_leaves_the_pipe_dry() {
        let notifier = Notifier::new().unwrap();
        notifier.signal();
        notifier.signal();
        notifier.drain();

        // A drained pipe reads EAGAIN, i.e. drain returns immediately.
        notifier.drain();
    }
}
