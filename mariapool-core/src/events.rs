//! Pool event lines printed when connection logging is on.
//!
//! Every pool implementation reports through [`ConnectionLog`], so the
//! wording is the same whichever driver is in use.

use tracing::info;

/// One `info` line per acquire, release and slot wait; silent when disabled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionLog {
    enabled: bool,
}

impl ConnectionLog {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Call just before borrowing. A pool at its limit with nothing idle
    /// makes the caller wait for a slot.
    pub fn before_acquire(&self, idle: usize, open: usize, limit: usize) {
        if self.enabled && idle == 0 && open >= limit {
            info!(open, limit, "[MYSQL] Waiting for available connection slot");
        }
    }

    pub fn acquired(&self, connection: u64) {
        if self.enabled {
            info!(connection, "[MYSQL] Connection acquired");
        }
    }

    pub fn released(&self, connection: u64) {
        if self.enabled {
            info!(connection, "[MYSQL] Connection released");
        }
    }
}

/// In-memory `tracing` output for asserting log lines
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct LogCapture(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl LogCapture {
    /// Route this thread's events into the capture until the guard drops
    pub(crate) fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub(crate) fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub(crate) fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

#[cfg(test)]
impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_event_prints_one_line() {
        let logs = LogCapture::default();
        let _guard = logs.install();

        let log = ConnectionLog::new(true);
        log.acquired(3);
        log.released(3);
        log.before_acquire(0, 10, 10);

        assert_eq!(logs.count("Connection acquired"), 1);
        assert_eq!(logs.count("Connection released"), 1);
        assert_eq!(logs.count("Waiting for available connection slot"), 1);
        assert!(logs.contents().contains("connection=3"));
    }

    #[test]
    fn no_slot_wait_while_capacity_remains() {
        let logs = LogCapture::default();
        let _guard = logs.install();

        let log = ConnectionLog::new(true);
        log.before_acquire(0, 9, 10);
        log.before_acquire(2, 10, 10);

        assert_eq!(logs.count("Waiting"), 0);
    }

    #[test]
    fn disabled_log_is_silent() {
        let logs = LogCapture::default();
        let _guard = logs.install();

        let log = ConnectionLog::default();
        log.acquired(1);
        log.released(1);
        log.before_acquire(0, 1, 1);

        assert!(logs.contents().is_empty());
    }
}
