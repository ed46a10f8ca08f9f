//! # Logger
//!
//! Handles log:: messages, including the ones coming from libbpf. Messages
//! are written to stderr, in color when it is a terminal.

use std::{
    env,
    io::{stderr, IsTerminal, Write},
    sync::{Mutex, PoisonError},
};

use anyhow::Result;
use log::{LevelFilter, Metadata, Record};
use termcolor::{BufferedStandardStream, Color, ColorChoice, ColorSpec, WriteColor};
use time::{macros::format_description, OffsetDateTime};

pub(crate) struct Logger {
    /// Max level the logger will output.
    max_level: LevelFilter,
    inner: Mutex<LoggerWriter>,
}

struct LoggerWriter {
    stderr: BufferedStandardStream,
    /// Should colors be used in the output?
    use_colors: bool,
}

impl Logger {
    pub(crate) fn init(max_level: LevelFilter) -> Result<()> {
        let use_colors =
            Self::use_colors(stderr().is_terminal(), env::var("TERM").ok().as_deref());
        let logger = Logger {
            max_level,
            inner: Mutex::new(LoggerWriter {
                stderr: BufferedStandardStream::stderr(match use_colors {
                    true => ColorChoice::Auto,
                    false => ColorChoice::Never,
                }),
                use_colors,
            }),
        };

        log::set_max_level(max_level);
        log::set_boxed_logger(Box::new(logger))?;
        Ok(())
    }

    fn try_log(&self, record: &Record) -> Result<()> {
        static LEVEL_COLORS: &[Option<Color>] = &[
            None,                // Default.
            Some(Color::Red),    // Error.
            Some(Color::Yellow), // Warn.
            Some(Color::Blue),   // Info.
            Some(Color::Cyan),   // Debug.
            Some(Color::White),  // Trace.
        ];
        let inner: &mut LoggerWriter =
            &mut self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let verbose = self.max_level >= LevelFilter::Debug;

        if verbose {
            OffsetDateTime::now_utc().format_into(
                &mut inner.stderr,
                format_description!("[hour]:[minute]:[second].[subsecond digits:6] "),
            )?;
        }

        if record.level() <= LevelFilter::Warn || verbose {
            if inner.use_colors {
                inner
                    .stderr
                    .set_color(ColorSpec::new().set_fg(LEVEL_COLORS[record.level() as usize]))?;
            }
            write!(inner.stderr, "{:5} ", record.level())?;
            if inner.use_colors {
                inner.stderr.reset()?;
            }
        }

        // libbpf messages are already prefixed.
        if self.max_level == LevelFilter::Trace && !record.target().ends_with("libbpf_log") {
            write!(inner.stderr, "[{}] ", record.target())?;
        }

        writeln!(inner.stderr, "{}", record.args())?;
        inner.stderr.flush()?;
        Ok(())
    }

    fn use_colors(is_terminal: bool, term: Option<&str>) -> bool {
        is_terminal && matches!(term, Some(x) if x != "dumb")
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Not much we can do to report the error...
        let _ = self.try_log(record);
    }

    fn flush(&self) {
        let _ = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stderr
            .flush();
    }
}
