//! FsLogger Rust Core
//!
//! Следит за деревьями директорий, для каждого изменения пытается определить
//! процесс (и пользователя), который его сделал, и дописывает запись в журнал.
//! Меню, окно настроек, автозапуск и уведомления это тонкая оболочка вокруг
//! этого crate и сюда не входят.

pub mod api;
pub mod attribution;
pub mod config;
pub mod error;
pub mod file_watcher;
pub mod log_writer;
pub mod logging;
pub mod paths;
pub mod process_table;

pub use config::{WatcherOptions, WatcherSettings, WriteMode};
pub use error::LoggerError;
pub use file_watcher::{EventFlags, Watcher, WatcherState};
