use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CapturedLog {
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub msg: String,
}

/// Output shared by every logger derived from the same root.
struct Sink {
    level: AtomicU8,
    format: AtomicU8,
    timestamps: AtomicBool,
    stderr_enabled: AtomicBool,
    capture_enabled: AtomicBool,
    capture_capacity: AtomicUsize,
    capture: Mutex<VecDeque<CapturedLog>>,
}

impl Sink {
    fn new(config: LogConfig) -> Self {
        Self {
            level: AtomicU8::new(config.level as u8),
            format: AtomicU8::new(config.format as u8),
            timestamps: AtomicBool::new(config.timestamps),
            stderr_enabled: AtomicBool::new(true),
            capture_enabled: AtomicBool::new(false),
            capture_capacity: AtomicUsize::new(0),
            capture: Mutex::new(VecDeque::new()),
        }
    }
}

/// Logging handle handed to each component at construction.
///
/// Clones share the same sink; [`Logger::named`] changes only the target
/// printed with each line.
#[derive(Clone)]
pub struct Logger {
    target: &'static str,
    sink: Arc<Sink>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("target", &self.target)
            .finish()
    }
}

impl Logger {
    pub fn new(config: LogConfig) -> Self {
        Self {
            target: "dagd",
            sink: Arc::new(Sink::new(config)),
        }
    }

    /// A logger that writes nowhere. Capture can still be enabled on it.
    pub fn discard() -> Self {
        let logger = Self::new(LogConfig::default());
        logger.set_stderr_enabled(false);
        logger
    }

    pub fn named(&self, target: &'static str) -> Self {
        Self {
            target,
            sink: Arc::clone(&self.sink),
        }
    }

    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn set_level(&self, level: Level) {
        self.sink.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn set_stderr_enabled(&self, enabled: bool) {
        self.sink.stderr_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn enable_capture(&self, capacity: usize) {
        if capacity == 0 {
            self.disable_capture();
            return;
        }
        self.sink
            .capture_capacity
            .store(capacity, Ordering::Relaxed);
        self.sink.capture_enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable_capture(&self) {
        self.sink.capture_enabled.store(false, Ordering::Relaxed);
    }

    pub fn clear_captured(&self) {
        if let Ok(mut guard) = self.sink.capture.lock() {
            guard.clear();
        }
    }

    pub fn capture_snapshot(&self, limit: usize) -> Vec<CapturedLog> {
        let Ok(guard) = self.sink.capture.lock() else {
            return Vec::new();
        };
        let start = guard.len().saturating_sub(limit);
        guard.iter().skip(start).cloned().collect()
    }

    pub fn enabled(&self, level: Level) -> bool {
        level as u8 <= self.sink.level.load(Ordering::Relaxed)
    }

    pub fn log(&self, level: Level, file: &'static str, line: u32, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }

        let sink = &self.sink;
        let capture_enabled = sink.capture_enabled.load(Ordering::Relaxed);
        let format = match sink.format.load(Ordering::Relaxed) {
            1 => Format::Json,
            _ => Format::Text,
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let ts_ms: u64 = now.as_millis().try_into().unwrap_or(u64::MAX);
        let msg = if matches!(format, Format::Json) || capture_enabled {
            Some(args.to_string())
        } else {
            None
        };

        if sink.stderr_enabled.load(Ordering::Relaxed) {
            let mut out = io::stderr().lock();
            match format {
                Format::Text => {
                    if sink.timestamps.load(Ordering::Relaxed) {
                        let ts = Timestamp {
                            unix_seconds: now.as_secs(),
                            millis: now.subsec_millis(),
                        };
                        let _ = write!(out, "{ts} ");
                    }
                    let _ = write!(out, "{} {}: ", level.as_str(), self.target);
                    let _ = writeln!(out, "{args}");
                }
                Format::Json => {
                    let line = json!({
                        "ts_ms": ts_ms,
                        "level": level.as_str(),
                        "target": self.target,
                        "file": file,
                        "line": line,
                        "msg": msg.as_deref().unwrap_or_default(),
                    });
                    let _ = writeln!(out, "{line}");
                }
            }
        }

        if capture_enabled {
            let cap = sink.capture_capacity.load(Ordering::Relaxed);
            let Ok(mut guard) = sink.capture.lock() else {
                return;
            };
            guard.push_back(CapturedLog {
                ts_ms,
                level,
                target: self.target,
                file,
                line,
                msg: msg.unwrap_or_default(),
            });
            while guard.len() > cap {
                let _ = guard.pop_front();
            }
        }
    }
}

static DEFAULT_LOGGER: OnceLock<Logger> = OnceLock::new();

/// Installs the process-wide logger. Only the outermost binary should call
/// this; libraries take a [`Logger`] as a constructor argument.
pub fn init(config: LogConfig) -> Logger {
    DEFAULT_LOGGER
        .get_or_init(|| Logger::new(config))
        .clone()
}

pub fn default_logger() -> Logger {
    DEFAULT_LOGGER
        .get_or_init(|| Logger::new(LogConfig::default()))
        .clone()
}

#[macro_export]
macro_rules! log_at {
    ($logger:expr, $level:expr, $($arg:tt)*) => {{
        let logger: &$crate::Logger = &$logger;
        if logger.enabled($level) {
            logger.log($level, file!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {{
        $crate::log_at!($logger, $crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {{
        $crate::log_at!($logger, $crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {{
        $crate::log_at!($logger, $crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {{
        $crate::log_at!($logger, $crate::Level::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($logger:expr, $($arg:tt)*) => {{
        $crate::log_at!($logger, $crate::Level::Trace, $($arg)*);
    }};
}

struct Timestamp {
    unix_seconds: u64,
    millis: u32,
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SECS_PER_DAY: u64 = 86_400;
        let days = (self.unix_seconds / SECS_PER_DAY) as i64;
        let secs_of_day = self.unix_seconds % SECS_PER_DAY;
        let hour = secs_of_day / 3600;
        let minute = (secs_of_day % 3600) / 60;
        let second = secs_of_day % 60;
        let (year, month, day) = civil_from_days(days);
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millis:03}Z",
            millis = self.millis
        )
    }
}

fn civil_from_days(days_since_unix_epoch: i64) -> (i32, u32, u32) {
    // Howard Hinnant's civil_from_days.
    let z = days_since_unix_epoch + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = (yoe as i32) + (era as i32) * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = y + if m <= 2 { 1 } else { 0 };
    (year, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level() {
        assert_eq!(Level::parse("info"), Some(Level::Info));
        assert_eq!(Level::parse("WARN"), Some(Level::Warn));
        assert_eq!(Level::parse("warning"), Some(Level::Warn));
        assert_eq!(Level::parse("debug"), Some(Level::Debug));
        assert_eq!(Level::parse("nope"), None);
    }

    #[test]
    fn parse_format() {
        assert_eq!(Format::parse("text"), Some(Format::Text));
        assert_eq!(Format::parse("JSON"), Some(Format::Json));
        assert_eq!(Format::parse("nope"), None);
    }

    #[test]
    fn named_loggers_share_capture() {
        let root = Logger::discard();
        root.enable_capture(8);
        let mempool = root.named("dagd::mempool");
        log_info!(mempool, "accepted {}", 3);
        log_debug!(mempool, "filtered by level");

        let captured = root.capture_snapshot(8);
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].target, "dagd::mempool");
        assert_eq!(captured[0].level, Level::Info);
        assert_eq!(captured[0].msg, "accepted 3");
    }

    #[test]
    fn capture_is_bounded() {
        let logger = Logger::discard();
        logger.enable_capture(2);
        for i in 0..5 {
            log_warn!(logger, "line {i}");
        }
        let captured = logger.capture_snapshot(10);
        let msgs: Vec<_> = captured.iter().map(|entry| entry.msg.as_str()).collect();
        assert_eq!(msgs, vec!["line 3", "line 4"]);
    }

    #[test]
    fn epoch_formats_as_1970() {
        let ts = Timestamp {
            unix_seconds: 0,
            millis: 7,
        };
        assert_eq!(ts.to_string(), "1970-01-01T00:00:00.007Z");
    }
}
