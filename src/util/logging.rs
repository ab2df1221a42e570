use colored::*;
use std::env;

/// Message severity. The discriminants follow the operations' `-v`
/// convention: 1 error, 2 warning, 3 info, 4 debug. Verbosity 0
/// silences everything except the tally output itself, which goes to
/// stdout and never through this logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
}

/// Severity-gated stderr logger. The threshold comes from the
/// `TRACKED_VOTE_VERBOSITY` environment variable, either a bare number
/// (`0` through `4`) or a severity name; unset means info.
pub struct Logger {
    verbosity: u8,
}

impl Logger {
    pub fn from_env() -> Logger {
        let verbosity = match env::var("TRACKED_VOTE_VERBOSITY") {
            Ok(raw) => parse_verbosity(&raw),
            Err(_) => Severity::Info as u8,
        };
        Logger { verbosity }
    }

    pub fn enabled(&self, severity: Severity) -> bool {
        severity as u8 <= self.verbosity
    }

    /// Write one line to stderr, colored by severity.
    pub fn emit(&self, severity: Severity, message: &str) {
        if !self.enabled(severity) {
            return;
        }
        let line = match severity {
            Severity::Error => message.red().to_string(),
            Severity::Warn => message.yellow().to_string(),
            Severity::Info => message.to_string(),
            Severity::Debug => message.bright_black().to_string(),
        };
        eprintln!("{}", line);
    }

    /// Banner announcing each contest as its tally starts. Shown at
    /// every verbosity except silent.
    pub fn contest_banner(&self, contest: &str, tally: &str) {
        if self.verbosity == 0 {
            return;
        }
        eprintln!("{} {} ({})", "🗳".green(), contest.bright_cyan(), tally);
    }
}

fn parse_verbosity(raw: &str) -> u8 {
    match raw.trim().to_lowercase().as_str() {
        "0" | "quiet" => 0,
        "1" | "error" => 1,
        "2" | "warn" | "warning" => 2,
        "3" | "info" => 3,
        "4" | "debug" => 4,
        _ => Severity::Info as u8,
    }
}

lazy_static::lazy_static! {
    pub static ref LOG: Logger = Logger::from_env();
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::util::LOG.emit($crate::util::Severity::Error, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::util::LOG.emit($crate::util::Severity::Warn, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::util::LOG.emit($crate::util::Severity::Info, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::util::LOG.emit($crate::util::Severity::Debug, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_contest {
    ($contest:expr, $tally:expr) => {
        $crate::util::LOG.contest_banner($contest, $tally);
    };
}
