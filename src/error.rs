use std::path::PathBuf;

use crate::process_table::ProcessId;

/// Единый тип ошибок FsLogger Core.
#[derive(thiserror::Error, Debug)]
pub enum LoggerError {
  #[error("Invalid configuration: {0}")]
  InvalidConfiguration(String),

  #[error("Invalid path: {0:?}")]
  InvalidPath(PathBuf),

  #[error("Subscription failed: {0}")]
  SubscriptionFailed(String),

  /// Процесс завершился между перечислением и запросом. Поглощается внутри
  /// атрибуции и наружу не выходит.
  #[error("Process {0} is gone")]
  ProcessGone(ProcessId),

  #[error("Log write failed: {0}")]
  LogWriteError(#[source] std::io::Error),

  #[error("Watcher is already running")]
  AlreadyRunning,

  #[error("Watcher is not running")]
  NotRunning,

  #[error("Malformed log line: {0}")]
  MalformedLogLine(String),

  #[error("Application data directory is not available on this OS/user")]
  DataDirNotFound,

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

impl LoggerError {
  pub(crate) fn log_write_closed() -> Self {
    LoggerError::LogWriteError(std::io::Error::new(
      std::io::ErrorKind::BrokenPipe,
      "log writer is closed",
    ))
  }
}
