//! Thin epoll wrapper. This is the platform seam: everything above it
//! speaks [`IoEvents`], so another readiness backend only has to
//! reimplement this module.

use super::fd_watch::IoEvents;
use crate::errors::IoqError;
use nix::errno::Errno;
use std::io;
use std::os::unix::io::RawFd;

pub(crate) const MAX_EVENTS: usize = 64;

#[derive(Debug, Clone, Copy)]
pub(crate) struct PollEvent {
    pub(crate) fd: RawFd,
    pub(crate) events: IoEvents,
}

pub(crate) struct Poller {
    epfd: RawFd,
}

impl Poller {
    pub(crate) fn new() -> Result<Self, IoqError> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(IoqError::PollerSetup(io::Error::last_os_error()));
        }
        Ok(Poller { epfd })
    }

    /// Register `fd` with an initial interest set.
    pub(crate) fn add(&self, fd: RawFd, mask: IoEvents) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, mask)
    }

    /// Replace the interest set of a registered fd.
    pub(crate) fn arm(&self, fd: RawFd, mask: IoEvents) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, mask)
    }

    /// Clear the interest set without deregistering.
    pub(crate) fn disarm(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, IoEvents::empty())
    }

    pub(crate) fn delete(&self, fd: RawFd) -> io::Result<()> {
        let ret = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        Errno::result(ret).map(drop)?;
        Ok(())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, mask: IoEvents) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: epoll_bits(mask),
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut event) };
        Errno::result(ret).map(drop)?;
        Ok(())
    }

    /// Block for up to `timeout_ms` (`None` = until something happens)
    /// and decode the ready fds into `out`. EINTR yields an empty
    /// batch rather than an error.
    pub(crate) fn wait(&self, timeout_ms: Option<u64>, out: &mut Vec<PollEvent>) -> io::Result<()> {
        out.clear();
        let timeout = timeout_ms.map_or(-1, |ms| ms.min(i32::MAX as u64) as i32);

        let mut buf: [libc::epoll_event; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::epoll_wait(self.epfd, buf.as_mut_ptr(), MAX_EVENTS as i32, timeout) };

        let n = match Errno::result(ret) {
            Ok(n) => n as usize,
            Err(Errno::EINTR) => 0,
            Err(e) => return Err(e.into()),
        };

        for event in &buf[..n] {
            out.push(PollEvent {
                fd: event.u64 as RawFd,
                events: io_bits(event.events),
            });
        }
        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe { libc::close(self.epfd) };
    }
}

fn epoll_bits(mask: IoEvents) -> u32 {
    let mut bits = 0;
    if mask.contains(IoEvents::READABLE) {
        bits |= libc::EPOLLIN as u32;
    }
    if mask.contains(IoEvents::WRITABLE) {
        bits |= libc::EPOLLOUT as u32;
    }
    // EPOLLERR and EPOLLHUP are always reported; nothing to request.
    bits
}

fn io_bits(events: u32) -> IoEvents {
    let mut mask = IoEvents::empty();
    if events & libc::EPOLLIN as u32 != 0 {
        mask |= IoEvents::READABLE;
    }
    if events & libc::EPOLLOUT as u32 != 0 {
        mask |= IoEvents::WRITABLE;
    }
    if events & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0 {
        mask |= IoEvents::ERROR;
    }
    mask
}
