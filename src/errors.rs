use std::io;

/// Setup-time failures. Once a queue is built, every in-flight outcome
/// (including OS errors on watched fds) is delivered through the normal
/// completion path and the submission side cannot fail.
#[derive(thiserror::Error, Debug)]
pub enum IoqError {
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    #[error("failed to create readiness poller: {0}")]
    PollerSetup(#[source] io::Error),

    #[error("failed to create notify pipe: {0}")]
    NotifySetup(#[source] io::Error),

    /// An I/O error while (de)registering an fd with the poller.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
