use std::fmt::{self, Display, Formatter};
use fern::colors::ColoredLevelConfig;

pub use fern::colors::Color;
use log::LevelFilter;

// used for launch param
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Off => Self::Off,
            LogLevel::Error => Self::Error,
            LogLevel::Warn => Self::Warn,
            LogLevel::Info => Self::Info,
            LogLevel::Debug => Self::Debug,
            LogLevel::Trace => Self::Trace
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let str = match &self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        };
        write!(f, "{}", str)
    }
}

pub fn colorize_str(color: Color, message: &str) -> String {
    format!("\x1B[{}m{}\x1B[0m", color.to_fg_str(), message)
}

// Dependencies only logged from warn
const QUIET_TARGETS: [&str; 5] = ["sled", "reqwest", "hyper", "hyper_util", "rustls"];
// Targets are right aligned on this width
const TARGET_WIDTH: usize = 24;

fn timestamp() -> impl Display {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f")
}

// Colored stdout plus an optional plain file, both receiving the same records
pub fn setup_logger(level: LogLevel, filename_log: &str, disable_file_logging: bool) -> Result<(), fern::InitError> {
    let colors = ColoredLevelConfig::new()
        .trace(Color::BrightBlack)
        .debug(Color::Green)
        .info(Color::Cyan)
        .warn(Color::Yellow)
        .error(Color::Red);

    let stdout_log = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} {:<5} {} {}",
                colorize_str(Color::BrightBlack, &timestamp().to_string()),
                colors.color(record.level()),
                colorize_str(Color::BrightBlue, &format!("{:>width$}", record.target(), width = TARGET_WIDTH)),
                message
            ))
        })
        .chain(std::io::stdout());

    let mut dispatch = fern::Dispatch::new()
        .level(level.into())
        .chain(stdout_log);

    if !disable_file_logging {
        let file_log = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} [{:<5}] [{:>width$}] {}",
                    timestamp(),
                    record.level(),
                    record.target(),
                    message,
                    width = TARGET_WIDTH
                ))
            })
            .chain(fern::log_file(filename_log)?);
        dispatch = dispatch.chain(file_log);
    }

    for target in QUIET_TARGETS {
        dispatch = dispatch.level_for(target, LevelFilter::Warn.min(level.into()));
    }

    dispatch.apply()?;
    Ok(())
}
