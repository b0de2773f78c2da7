//! Global logger set-up: stdout always, plus a file when `[logging].enable`.

use chrono::Local;
use fern::Dispatch;
use std::{
    path::{Path, PathBuf},
    process, thread,
};

use crate::config::{ConfigError, LoggingConfig};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("logger initialisation failed: {0}")]
    Init(#[from] fern::InitError),
}

/// Where the log file goes, if file logging is enabled.
pub fn log_path(base_dir: &Path, logging: &LoggingConfig) -> Option<PathBuf> {
    logging
        .enable
        .then(|| base_dir.join(logging.file.as_deref().unwrap_or("udefx.log")))
}

/// Configure global logging as requested in `[logging]`.
pub fn setup_logging(base_dir: &Path, logging: &LoggingConfig) -> Result<(), LoggingError> {
    let level = logging.level_filter()?;

    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                process::id(),
                thread::current().id(),
                msg
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(path) = log_path(base_dir, logging) {
        dispatch = dispatch.chain(fern::log_file(path).map_err(fern::InitError::Io)?);
    }

    dispatch.apply().map_err(fern::InitError::SetLoggerError)?;
    Ok(())
}
