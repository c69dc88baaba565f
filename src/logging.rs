// Logging setup: tracing events go to stderr, or to the system log when
// `syslog` is enabled. Never to stdout, which carries the public keys.

use std::io::{self, IsTerminal};
use std::sync::Mutex;
use syslog::{Facility, Formatter3164, Logger, LoggerBackend};
use tracing::{warn, Level, Metadata};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const IDENT: &str = "octopass";

/// Install the global subscriber. `RUST_LOG` wins over `debug` when set.
/// Falls back to stderr when the system log cannot be reached.
pub fn init(debug: bool, syslog: bool) {
    if syslog {
        match Syslog::connect() {
            Ok(writer) => {
                tracing_subscriber::registry()
                    .with(filter(debug))
                    .with(
                        fmt::layer()
                            .without_time()
                            .with_ansi(false)
                            .with_target(false)
                            .with_level(false)
                            .with_writer(writer),
                    )
                    .init();
                return;
            }
            Err(err) => {
                init_stderr(debug);
                warn!("syslog unavailable, logging to stderr: {err}");
                return;
            }
        }
    }
    init_stderr(debug);
}

fn filter(debug: bool) -> EnvFilter {
    let default_level = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn init_stderr(debug: bool) {
    tracing_subscriber::registry()
        .with(filter(debug))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(io::stderr().is_terminal())
                .with_writer(io::stderr),
        )
        .init();
}

type SyslogLogger = Logger<LoggerBackend, Formatter3164>;

/// [`MakeWriter`] that sends each formatted event to the local syslog
/// socket with facility USER and a priority derived from the event level.
pub struct Syslog {
    logger: Mutex<SyslogLogger>,
}

impl Syslog {
    pub fn connect() -> Result<Self, syslog::Error> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: IDENT.into(),
            pid: std::process::id(),
        };
        Ok(Syslog {
            logger: Mutex::new(syslog::unix(formatter)?),
        })
    }
}

impl<'a> MakeWriter<'a> for Syslog {
    type Writer = SyslogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogWriter::new(&self.logger, Priority::Notice)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        SyslogWriter::new(&self.logger, priority(meta.level()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Priority {
    Err,
    Warning,
    Notice,
    Debug,
}

fn priority(level: &Level) -> Priority {
    match *level {
        Level::ERROR => Priority::Err,
        Level::WARN => Priority::Warning,
        Level::INFO => Priority::Notice,
        Level::DEBUG | Level::TRACE => Priority::Debug,
    }
}

/// One syslog line per event: trailing newline removed, blank events dropped.
fn message(buf: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(buf);
    let line = line.trim_end();
    (!line.is_empty()).then(|| line.to_string())
}

/// Buffers one event and hands it to syslog when dropped.
pub struct SyslogWriter<'a> {
    logger: &'a Mutex<SyslogLogger>,
    priority: Priority,
    buf: Vec<u8>,
}

impl<'a> SyslogWriter<'a> {
    fn new(logger: &'a Mutex<SyslogLogger>, priority: Priority) -> Self {
        SyslogWriter {
            logger,
            priority,
            buf: Vec::new(),
        }
    }
}

impl io::Write for SyslogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogWriter<'_> {
    fn drop(&mut self) {
        let Some(msg) = message(&self.buf) else {
            return;
        };
        let Ok(mut logger) = self.logger.lock() else {
            return;
        };
        // A lost log line must not turn into a failed login.
        let _ = match self.priority {
            Priority::Err => logger.err(msg),
            Priority::Warning => logger.warning(msg),
            Priority::Notice => logger.notice(msg),
            Priority::Debug => logger.debug(msg),
        };
    }
}
