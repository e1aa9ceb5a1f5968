//! Leveled logging with timestamps, source locations, and ANSI colour support.
//!
//! Log lines look like:
//!
//! ```text
//! 20260802T09:14:05.312 I src/handlers.rs:210 - channel [12] created
//! ```
//!
//! Four levels mirror the verbosity knob of the daemon: debug, info, warn,
//! error. The minimum level is a process-wide atomic so the CLI can raise it
//! without threading a handle everywhere.
//!
//! Output goes to stderr by default. [`set_writer`] redirects all subsequent
//! lines to any [`std::io::Write`] implementor and disables colour, since the
//! replacement is unlikely to be a terminal.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    fn letter(self) -> char {
        match self {
            Level::Debug => 'D',
            Level::Info => 'I',
            Level::Warn => 'W',
            Level::Error => 'E',
        }
    }

    fn colour(self) -> &'static str {
        match self {
            Level::Debug => DIM,
            Level::Info => "\x1b[32m",
            Level::Warn => "\x1b[33m",
            Level::Error => "\x1b[31m",
        }
    }
}

static MIN_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static COLOUR_ENABLED: AtomicBool = AtomicBool::new(false);

static LOG_WRITER: LazyLock<Mutex<Box<dyn Write + Send>>> =
    LazyLock::new(|| Mutex::new(Box::new(io::stderr())));

/// Initialize the logging system. Call once at startup before any logging.
/// Detects whether stderr supports ANSI colours.
pub fn init(min_level: Level) {
    MIN_LEVEL.store(min_level as u8, Ordering::Relaxed);
    COLOUR_ENABLED.store(io::stderr().is_terminal(), Ordering::Relaxed);
}

/// Replace the log writer. Also disables ANSI colour codes.
pub fn set_writer(w: Box<dyn Write + Send>) {
    COLOUR_ENABLED.store(false, Ordering::Relaxed);
    *LOG_WRITER.lock().unwrap() = w;
}

pub fn enabled(level: Level) -> bool {
    level as u8 >= MIN_LEVEL.load(Ordering::Relaxed)
}

fn colour_enabled() -> bool {
    COLOUR_ENABLED.load(Ordering::Relaxed)
}

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

/// Palette for node-id hashing. Bright variants only, so ids stay readable
/// next to the level colours.
const ID_COLOURS: &[&str] = &[
    "\x1b[91m", "\x1b[92m", "\x1b[93m", "\x1b[94m", "\x1b[95m", "\x1b[96m",
];

const ID_TRUNCATE_LEN: usize = 8;

/// Format a transport node id with consistent colour and truncation, e.g.
/// `n-Ay82kFpR`.
pub fn node_id(id: &str) -> String {
    let end = id
        .char_indices()
        .nth(ID_TRUNCATE_LEN)
        .map(|(i, _)| i)
        .unwrap_or(id.len());
    let short = &id[..end];
    if colour_enabled() {
        let hash: u32 = id
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        let colour = ID_COLOURS[(hash as usize) % ID_COLOURS.len()];
        format!("{colour}n-{short}{RESET}")
    } else {
        format!("n-{short}")
    }
}

/// Format the current wall-clock time as `YYYYMMDDTHH:MM:SS.mmm`.
fn format_timestamp() -> String {
    let elapsed = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = elapsed.as_secs();
    let (year, month, day) = civil_date(secs / 86400);

    format!(
        "{year:04}{month:02}{day:02}T{:02}:{:02}:{:02}.{:03}",
        secs / 3600 % 24,
        secs / 60 % 60,
        secs % 60,
        elapsed.subsec_millis()
    )
}

/// Gregorian (year, month, day) for a day count since 1970-01-01.
///
/// Timestamps here are always post-epoch, so this is the unsigned half of
/// the usual civil-from-days conversion: shift the origin to 0000-03-01 so
/// leap days fall at the end of the shifted year, decompose into 400-year
/// eras, then peel the year and March-based month out of the remainder.
fn civil_date(days_since_epoch: u64) -> (u64, u64, u64) {
    let shifted = days_since_epoch + 719_468;
    let era = shifted / 146_097;
    let day_of_era = shifted % 146_097;
    let year_of_era =
        (day_of_era - day_of_era / 1460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);

    // month 0 is March in the shifted calendar
    let month_index = (5 * day_of_year + 2) / 153;
    let day = day_of_year - (153 * month_index + 2) / 5 + 1;
    let month = if month_index < 10 {
        month_index + 3
    } else {
        month_index - 9
    };
    let year = year_of_era + era * 400 + u64::from(month <= 2);
    (year, month, day)
}

/// Write a single log line to the current writer.
///
/// Called by the logging macros; not intended for direct use.
pub fn emit(level: Level, file: &str, line: u32, msg: &str) {
    if !enabled(level) {
        return;
    }
    let ts = format_timestamp();
    let letter = level.letter();
    let formatted = if colour_enabled() {
        let lc = level.colour();
        format!("{DIM}{ts}{RESET} {lc}{letter}{RESET} {DIM}{file}:{line}{RESET} {msg}")
    } else {
        format!("{ts} {letter} {file}:{line} - {msg}")
    };
    let mut writer = LOG_WRITER.lock().unwrap();
    let _ = writeln!(*writer, "{formatted}");
}

#[macro_export]
macro_rules! vlogd {
    ($($arg:tt)*) => {{
        $crate::logging::emit($crate::logging::Level::Debug, file!(), line!(), &format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! vlogi {
    ($($arg:tt)*) => {{
        $crate::logging::emit($crate::logging::Level::Info, file!(), line!(), &format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! vlogw {
    ($($arg:tt)*) => {{
        $crate::logging::emit($crate::logging::Level::Warn, file!(), line!(), &format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! vloge {
    ($($arg:tt)*) => {{
        $crate::logging::emit($crate::logging::Level::Error, file!(), line!(), &format!($($arg)*));
    }};
}
