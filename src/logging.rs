//! Logging setup
//!
//! The CLI logs to stderr through `tracing_subscriber::fmt`. An embedding
//! host instead installs a [`TelioLoggerCb`] with [`set_global_logger`] and
//! receives every record at or above its level as a formatted line.

use std::cell::Cell;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Once};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::telio::{TelioLogLevel, TelioLoggerCb};

/// Environment variable holding a filter directive that overrides the
/// configured level.
pub const LOG_ENV: &str = "TELIO_BRIDGE_LOG";

/// Initialize structured logging for the CLI.
pub fn init(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

struct Sink {
    level: TelioLogLevel,
    logger: Arc<dyn TelioLoggerCb>,
}

static SINK: Lazy<RwLock<Option<Sink>>> = Lazy::new(|| RwLock::new(None));
static INSTALL: Once = Once::new();

thread_local! {
    static IN_LOGGER: Cell<bool> = const { Cell::new(false) };
}

/// Route log records at or above `level` to `logger`.
///
/// The first call installs [`ForeignLoggerLayer`] as the process-wide
/// subscriber; later calls only replace the logger and level.
pub fn set_global_logger(level: TelioLogLevel, logger: Arc<dyn TelioLoggerCb>) {
    // The previous logger may log while it is dropped, so release the lock first.
    let previous = SINK.write().replace(Sink { level, logger });
    drop(previous);
    INSTALL.call_once(|| {
        if tracing_subscriber::registry()
            .with(ForeignLoggerLayer)
            .try_init()
            .is_err()
        {
            tracing::warn!("a global subscriber is already installed, host logger not attached");
        }
    });
}

/// Stop forwarding records to the host logger.
pub fn clear_global_logger() {
    let previous = SINK.write().take();
    drop(previous);
}

/// Forwards events to the host logger.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForeignLoggerLayer;

impl<S: Subscriber> Layer<S> for ForeignLoggerLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        forward(event);
    }
}

fn forward(event: &tracing::Event<'_>) {
    let metadata = event.metadata();
    let level = TelioLogLevel::from(*metadata.level());
    let logger = {
        let sink = SINK.read();
        match sink.as_ref() {
            Some(sink) if level <= sink.level => sink.logger.clone(),
            _ => return,
        }
    };

    // A host logger that logs back into this library must not recurse.
    if IN_LOGGER.with(|busy| busy.replace(true)) {
        return;
    }
    let _busy = Busy;

    let mut line = LineVisitor::default();
    event.record(&mut line);
    let _ = logger.log(level, format!("{}: {}", metadata.target(), line.finish()));
}

/// Clears the reentrancy flag, also when the host logger panics.
struct Busy;

impl Drop for Busy {
    fn drop(&mut self) {
        IN_LOGGER.with(|busy| busy.set(false));
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telio::TelioError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    // The sink is process-wide.
    static SERIAL: Mutex<()> = Mutex::new(());

    #[derive(Default)]
    struct Lines(Mutex<Vec<(TelioLogLevel, String)>>);

    impl TelioLoggerCb for Lines {
        fn log(&self, log_level: TelioLogLevel, payload: String) -> Result<(), TelioError> {
            self.0.lock().push((log_level, payload));
            Ok(())
        }
    }

    impl Lines {
        fn with_target(&self, target: &str) -> Vec<(TelioLogLevel, String)> {
            self.0
                .lock()
                .iter()
                .filter(|(_, line)| line.starts_with(target))
                .cloned()
                .collect()
        }
    }

    /// Logs while it is released.
    struct LogsOnDrop;

    impl TelioLoggerCb for LogsOnDrop {
        fn log(&self, _log_level: TelioLogLevel, _payload: String) -> Result<(), TelioError> {
            Ok(())
        }
    }

    impl Drop for LogsOnDrop {
        fn drop(&mut self) {
            tracing::warn!(target: "telio::drop", "logger released");
        }
    }

    /// Panics on the first record.
    #[derive(Default)]
    struct Flaky {
        failed: AtomicBool,
        lines: Lines,
    }

    impl TelioLoggerCb for Flaky {
        fn log(&self, log_level: TelioLogLevel, payload: String) -> Result<(), TelioError> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                panic!("host logger failed");
            }
            self.lines.log(log_level, payload)
        }
    }

    #[test]
    fn test_layer_filters_and_formats() {
        let _serial = SERIAL.lock();
        let lines = Arc::new(Lines::default());
        *SINK.write() = Some(Sink {
            level: TelioLogLevel::Info,
            logger: lines.clone(),
        });

        let subscriber = tracing_subscriber::registry().with(ForeignLoggerLayer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "telio::test", peers = 3, "meshnet configured");
            tracing::debug!(target: "telio::test", "too chatty");
            tracing::error!(target: "telio::test", "relay lost");
        });
        clear_global_logger();

        let lines = lines.with_target("telio::test");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, TelioLogLevel::Info);
        assert_eq!(lines[0].1, "telio::test: meshnet configured peers=3");
        assert_eq!(lines[1], (TelioLogLevel::Error, "telio::test: relay lost".to_string()));
    }

    #[test]
    fn test_replace_logger_that_logs_on_drop() {
        let _serial = SERIAL.lock();
        let lines = Arc::new(Lines::default());

        let subscriber = tracing_subscriber::registry().with(ForeignLoggerLayer);
        tracing::subscriber::with_default(subscriber, || {
            set_global_logger(TelioLogLevel::Info, Arc::new(LogsOnDrop));
            set_global_logger(TelioLogLevel::Info, lines.clone());
        });
        clear_global_logger();

        // The old logger's last record reaches its replacement.
        let lines = lines.with_target("telio::drop");
        assert_eq!(
            lines,
            vec![(TelioLogLevel::Warning, "telio::drop: logger released".to_string())]
        );
    }

    #[test]
    fn test_forwarding_survives_logger_panic() {
        let _serial = SERIAL.lock();
        let flaky = Arc::new(Flaky::default());
        *SINK.write() = Some(Sink {
            level: TelioLogLevel::Info,
            logger: flaky.clone(),
        });

        let subscriber = tracing_subscriber::registry().with(ForeignLoggerLayer);
        tracing::subscriber::with_default(subscriber, || {
            let first = std::panic::catch_unwind(|| {
                tracing::info!(target: "telio::flaky", "first");
            });
            assert!(first.is_err());
            tracing::info!(target: "telio::flaky", "second");
        });
        clear_global_logger();

        let lines = flaky.lines.with_target("telio::flaky");
        assert_eq!(lines, vec![(TelioLogLevel::Info, "telio::flaky: second".to_string())]);
    }
}
