use std::sync::OnceLock;
use std::time::Instant;

/// Milliseconds elapsed since the clock was first observed in this
/// process. Monotonic; a 64-bit millisecond counter does not wrap on
/// any realistic timescale, so deadline comparisons are plain `<`.
pub(crate) fn now_ms() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}
