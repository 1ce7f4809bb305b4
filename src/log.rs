//! Program logging.
//!
//! Messages go to the console and, during a coupled run, to log files in the output folder.
use anyhow::{Context, Result, bail, ensure};
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use fern::{Dispatch, FormatCallback};
use log::{LevelFilter, Record};
use std::env;
use std::fmt::{Arguments, Display};
use std::fs::{File, OpenOptions};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::OnceLock;

/// A flag indicating whether the logger has been initialised
static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// The default log level for the program.
///
/// Used as a fallback if the user hasn't specified something else with the `COUPLER_LOG_LEVEL`
/// environment variable or the settings.toml file.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// The environment variable used to override the log level
const LOG_LEVEL_ENV_VAR: &str = "COUPLER_LOG_LEVEL";

/// The file name for the log file containing messages about the ordinary operation of a run
const LOG_INFO_FILE_NAME: &str = "coupler_info.log";

/// The file name for the log file containing warnings and error messages
const LOG_ERROR_FILE_NAME: &str = "coupler_error.log";

/// Whether the program logger has been initialised
pub fn is_logger_initialised() -> bool {
    LOGGER_INIT.get().is_some()
}

/// Parse a log level string into a [`LevelFilter`]
fn parse_log_level(log_level: &str) -> Result<LevelFilter> {
    let level = match log_level.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        unknown => bail!("Unknown log level: {unknown}"),
    };

    Ok(level)
}

/// Resolve the log level, letting the `COUPLER_LOG_LEVEL` environment variable override settings
fn resolve_log_level(from_env: Option<String>, from_settings: &str) -> Result<LevelFilter> {
    match from_env {
        Some(level) if !level.is_empty() => parse_log_level(&level),
        _ => parse_log_level(from_settings),
    }
}

/// Strip the crate name from a log target, e.g. `coupler::coupling::merge` becomes
/// `coupling::merge`
fn short_target(target: &str) -> &str {
    match target.strip_prefix(env!("CARGO_CRATE_NAME")) {
        Some("") => env!("CARGO_CRATE_NAME"),
        Some(rest) => rest.trim_start_matches("::"),
        None => target,
    }
}

/// The log files kept in a run's output folder
struct LogFiles {
    info: File,
    error: File,
}

impl LogFiles {
    /// Create (or truncate) both log files in `dir`
    fn create(dir: &Path) -> Result<Self> {
        let open = |file_name: &str| {
            let path = dir.join(file_name);
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .with_context(|| format!("Could not create log file {}", path.display()))
        };

        Ok(Self {
            info: open(LOG_INFO_FILE_NAME)?,
            error: open(LOG_ERROR_FILE_NAME)?,
        })
    }

    /// Route ordinary messages to the info file and warnings and errors to the error file
    fn dispatch(self, log_level: LevelFilter) -> Dispatch {
        Dispatch::new()
            .chain(
                Dispatch::new()
                    .filter(|metadata| metadata.level() > LevelFilter::Warn)
                    .format(write_log_plain)
                    .level(log_level.max(LevelFilter::Info))
                    .chain(self.info),
            )
            .chain(
                Dispatch::new()
                    .format(write_log_plain)
                    .level(LevelFilter::Warn)
                    .chain(self.error),
            )
    }
}

/// Route ordinary messages to stdout and warnings and errors to stderr, colouring each stream
/// only if it is a terminal
fn console_dispatch(log_level: LevelFilter) -> Dispatch {
    let colours = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);
    let use_colour_stdout = std::io::stdout().is_terminal();
    let use_colour_stderr = std::io::stderr().is_terminal();

    Dispatch::new()
        .chain(
            Dispatch::new()
                .filter(|metadata| metadata.level() > LevelFilter::Warn)
                .format(move |out, message, record| {
                    write_log_colour(out, message, record, use_colour_stdout, &colours);
                })
                .level(log_level)
                .chain(std::io::stdout()),
        )
        .chain(
            Dispatch::new()
                .format(move |out, message, record| {
                    write_log_colour(out, message, record, use_colour_stderr, &colours);
                })
                .level(log_level.min(LevelFilter::Warn))
                .chain(std::io::stderr()),
        )
}

/// Initialise the program logger.
///
/// The level comes from the `COUPLER_LOG_LEVEL` environment variable if set, otherwise from
/// `settings.toml`. When `log_file_path` is given, `coupler_info.log` and `coupler_error.log`
/// are written there as well. The info file always records at least `info` messages so that the
/// progress of every iteration is kept, whatever the console level.
pub fn init(log_level_from_settings: &str, log_file_path: Option<&Path>) -> Result<()> {
    let log_level = resolve_log_level(env::var(LOG_LEVEL_ENV_VAR).ok(), log_level_from_settings)?;

    let mut dispatch = Dispatch::new().chain(console_dispatch(log_level));
    if let Some(log_file_path) = log_file_path {
        dispatch = dispatch.chain(LogFiles::create(log_file_path)?.dispatch(log_level));
    }
    dispatch.apply()?;

    ensure!(
        LOGGER_INIT.set(()).is_ok(),
        "Logger has already been initialised"
    );

    Ok(())
}

/// Write to the log in the format we want for Coupler
fn write_log<T: Display>(out: FormatCallback, level: T, target: &str, message: &Arguments) {
    let timestamp = Local::now().format("%H:%M:%S");
    let target = short_target(target);

    out.finish(format_args!("[{timestamp} {level} {target}] {message}"));
}

/// Write to the log with no colours
fn write_log_plain(out: FormatCallback, message: &Arguments, record: &Record) {
    write_log(out, record.level(), record.target(), message);
}

/// Write to the log with optional colours
fn write_log_colour(
    out: FormatCallback,
    message: &Arguments,
    record: &Record,
    use_colour: bool,
    colours: &ColoredLevelConfig,
) {
    if use_colour {
        write_log(out, colours.color(record.level()), record.target(), message);
    } else {
        write_log_plain(out, message, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("off", LevelFilter::Off)]
    #[case("WARN", LevelFilter::Warn)]
    #[case("Info", LevelFilter::Info)]
    #[case("trace", LevelFilter::Trace)]
    fn test_parse_log_level(#[case] input: &str, #[case] expected: LevelFilter) {
        assert_eq!(parse_log_level(input).unwrap(), expected);
    }

    #[rstest]
    #[case(Some("debug"), "warn", LevelFilter::Debug)]
    #[case(None, "warn", LevelFilter::Warn)]
    #[case(Some(""), "error", LevelFilter::Error)]
    fn test_resolve_log_level(
        #[case] from_env: Option<&str>,
        #[case] from_settings: &str,
        #[case] expected: LevelFilter,
    ) {
        assert_eq!(
            resolve_log_level(from_env.map(String::from), from_settings).unwrap(),
            expected
        );
    }

    #[rstest]
    #[case("coupler::coupling::merge", "coupling::merge")]
    #[case("coupler", "coupler")]
    #[case("highs", "highs")]
    fn test_short_target(#[case] target: &str, #[case] expected: &str) {
        assert_eq!(short_target(target), expected);
    }

    #[test]
    fn test_log_files_create() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LOG_INFO_FILE_NAME), "old").unwrap();
        LogFiles::create(dir.path()).unwrap();
        assert!(std::fs::read_to_string(dir.path().join(LOG_INFO_FILE_NAME))
            .unwrap()
            .is_empty());
        assert!(dir.path().join(LOG_ERROR_FILE_NAME).is_file());
    }

    #[test]
    fn test_parse_log_level_unknown() {
        assert_eq!(
            parse_log_level("loud").unwrap_err().to_string(),
            "Unknown log level: loud"
        );
    }
}
