//! Process-wide logging bootstrap.
//!
//! # Responsibility
//! - Start the rolling file logger once per process.
//! - Capture panics as sanitized `event=panic_captured` records.
//!
//! # Invariants
//! - Re-initialization with identical settings is a no-op.
//! - Re-initialization with a different level or directory is rejected.
//! - Initialization never panics.
//!
//! Core log lines are metadata only (`event=... module=... status=...`);
//! member names and emails are never logged.

use crate::config::LoggingConfig;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "epicerie";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    settings: LogSettings,
    _handle: LoggerHandle,
}

/// Normalized logger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: &'static str,
    pub dir: PathBuf,
}

impl LogSettings {
    pub fn new(level: &str, dir: impl AsRef<Path>) -> Result<Self, LoggingError> {
        Ok(Self {
            level: normalize_level(level)?,
            dir: normalize_dir(dir.as_ref())?,
        })
    }

    /// Builds settings from the `logging` config section.
    ///
    /// Returns `Ok(None)` when no directory is configured.
    pub fn from_config(config: &LoggingConfig) -> Result<Option<Self>, LoggingError> {
        let Some(dir) = config.dir.as_ref() else {
            return Ok(None);
        };
        let level = config.level.as_deref().unwrap_or(default_log_level());
        Self::new(level, dir).map(Some)
    }
}

#[derive(Debug)]
pub enum LoggingError {
    UnsupportedLevel(String),
    RelativeDir(PathBuf),
    EmptyDir,
    CreateDir { dir: PathBuf, source: std::io::Error },
    Backend(String),
    AlreadyInitialized { active: LogSettings, requested: LogSettings },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected trace|debug|info|warn|error"
            ),
            Self::RelativeDir(dir) => {
                write!(f, "log dir must be an absolute path, got `{}`", dir.display())
            }
            Self::EmptyDir => write!(f, "log dir cannot be empty"),
            Self::CreateDir { dir, source } => {
                write!(f, "failed to create log dir `{}`: {source}", dir.display())
            }
            Self::Backend(message) => write!(f, "failed to start logger: {message}"),
            Self::AlreadyInitialized { active, requested } => write!(
                f,
                "logging already initialized with level `{}` at `{}`; refusing to switch to level `{}` at `{}`",
                active.level,
                active.dir.display(),
                requested.level,
                requested.dir.display()
            ),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDir { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Starts file logging with `level` under the absolute directory `log_dir`.
///
/// # Errors
/// - Unsupported level, relative or blank directory.
/// - Directory creation or logger backend failure.
/// - A logger is already active with different settings.
pub fn init_logging(level: &str, log_dir: impl AsRef<Path>) -> Result<(), LoggingError> {
    start(LogSettings::new(level, log_dir)?)
}

/// Starts file logging from normalized settings.
pub fn start(settings: LogSettings) -> Result<(), LoggingError> {
    let active = ACTIVE.get_or_try_init(|| -> Result<ActiveLogger, LoggingError> {
        std::fs::create_dir_all(&settings.dir).map_err(|source| LoggingError::CreateDir {
            dir: settings.dir.clone(),
            source,
        })?;

        let handle = Logger::try_with_str(settings.level)
            .map_err(|err| LoggingError::Backend(err.to_string()))?
            .log_to_file(
                FileSpec::default()
                    .directory(settings.dir.as_path())
                    .basename(LOG_FILE_BASENAME),
            )
            .rotate(
                Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(MAX_LOG_FILES),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()
            .map_err(|err| LoggingError::Backend(err.to_string()))?;

        install_panic_hook_once();
        info!(
            "event=core_init module=logging status=ok level={} version={} platform={}",
            settings.level,
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS
        );

        Ok(ActiveLogger {
            settings: settings.clone(),
            _handle: handle,
        })
    })?;

    if active.settings != settings {
        return Err(LoggingError::AlreadyInitialized {
            active: active.settings.clone(),
            requested: settings,
        });
    }
    Ok(())
}

/// Settings of the active logger, if any.
pub fn logging_status() -> Option<LogSettings> {
    ACTIVE.get().map(|active| active.settings.clone())
}

/// `debug` for debug builds, `info` for release builds.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn normalize_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(LoggingError::UnsupportedLevel(other.to_string())),
    }
}

fn normalize_dir(dir: &Path) -> Result<PathBuf, LoggingError> {
    if dir.as_os_str().is_empty() {
        return Err(LoggingError::EmptyDir);
    }
    if !dir.is_absolute() {
        return Err(LoggingError::RelativeDir(dir.to_path_buf()));
    }
    Ok(dir.to_path_buf())
}

fn install_panic_hook_once() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = if let Some(message) = panic_info.payload().downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = panic_info.payload().downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        error!(
            "event=panic_captured module=core status=error location={} payload={}",
            location,
            sanitize_message(&payload, MAX_PANIC_PAYLOAD_CHARS)
        );
        previous_hook(panic_info);
    }));
}

fn sanitize_message(value: &str, max_chars: usize) -> String {
    let normalized = value.replace(['\n', '\r'], " ");
    let mut truncated = normalized.chars().take(max_chars).collect::<String>();
    if normalized.chars().count() > max_chars {
        truncated.push_str("...");
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::{
        init_logging, logging_status, normalize_level, sanitize_message, LogSettings,
        LoggingError,
    };
    use crate::config::LoggingConfig;

    #[test]
    fn level_aliases_normalize() {
        assert_eq!(normalize_level(" WARNING ").unwrap(), "warn");
        assert!(matches!(
            normalize_level("loud"),
            Err(LoggingError::UnsupportedLevel(_))
        ));
    }

    #[test]
    fn settings_reject_relative_dir() {
        let err = LogSettings::new("info", "logs/dev").unwrap_err();
        assert!(matches!(err, LoggingError::RelativeDir(_)));
    }

    #[test]
    fn config_without_dir_disables_file_logging() {
        let settings = LogSettings::from_config(&LoggingConfig::default()).unwrap();
        assert!(settings.is_none());
    }

    #[test]
    fn sanitize_strips_newlines_and_caps_length() {
        let sanitized = sanitize_message("a\nb\rcdefghij", 6);
        assert_eq!(sanitized, "a b cd...");
    }

    #[test]
    fn init_is_idempotent_and_rejects_conflicting_settings() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();

        init_logging("info", first.path()).unwrap();
        init_logging("info", first.path()).unwrap();

        let level_err = init_logging("debug", first.path()).unwrap_err();
        assert!(matches!(level_err, LoggingError::AlreadyInitialized { .. }));
        let dir_err = init_logging("info", second.path()).unwrap_err();
        assert!(matches!(dir_err, LoggingError::AlreadyInitialized { .. }));

        let active = logging_status().expect("logging should be active");
        assert_eq!(active.level, "info");
        assert_eq!(active.dir, first.path());
    }
}
