//! Shared fixtures for the in-tree tests.

use parking_lot::Mutex;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Records callback deliveries so tests can assert one-to-one delivery
/// and observation order.
#[derive(Clone, Default)]
pub(crate) struct Spy {
    state: Arc<Mutex<SpyState>>,
}

#[derive(Default)]
struct SpyState {
    fires: usize,
    values: Vec<u64>,
}

impl Spy {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, value: u64) {
        let mut state = self.state.lock();
        state.fires += 1;
        state.values.push(value);
    }

    pub(crate) fn fires(&self) -> usize {
        self.state.lock().fires
    }

    pub(crate) fn values(&self) -> Vec<u64> {
        self.state.lock().values.clone()
    }

    /// Spin (politely) until at least `n` deliveries were recorded.
    /// Panics after two seconds so a broken test fails instead of
    /// hanging.
    pub(crate) fn wait_for_fires(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.fires() < n {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {n} deliveries (got {})",
                self.fires()
            );
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

/// A nonblocking pipe pair for fd-watch tests. Closes both ends on
/// drop; `take_write_fd` hands the write end over (e.g. to be closed
/// early to provoke HUP).
pub(crate) struct PipeFixture {
    read_fd: RawFd,
    write_fd: Option<RawFd>,
}

impl PipeFixture {
    pub(crate) fn new() -> Self {
        let mut fds = [0 as RawFd; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        assert_eq!(ret, 0, "pipe2 failed: {}", std::io::Error::last_os_error());
        PipeFixture {
            read_fd: fds[0],
            write_fd: Some(fds[1]),
        }
    }

    pub(crate) fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    pub(crate) fn write_byte(&self) {
        let byte = 1u8;
        let fd = self.write_fd.expect("write end already taken");
        let ret = unsafe { libc::write(fd, &byte as *const u8 as *const _, 1) };
        assert_eq!(ret, 1, "pipe write failed");
    }

    pub(crate) fn close_write_end(&mut self) {
        if let Some(fd) = self.write_fd.take() {
            unsafe { libc::close(fd) };
        }
    }
}

impl Drop for PipeFixture {
    fn drop(&mut self) {
        unsafe { libc::close(self.read_fd) };
        self.close_write_end();
    }
}
