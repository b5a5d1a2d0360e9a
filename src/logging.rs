//! Нормализованное диагностическое логирование FsLogger Core.
//!
//! Не путать с журналом событий (`log_writer`): здесь внутренний канал
//! диагностики самого процесса (старт/стоп, ошибки записи, сбои подписки).
//!
//! ## Уровни логов
//! - `ERROR`: ошибки записи в журнал, сбои подписки
//! - `WARN`:  пропущенные папки, переполнение очереди событий
//! - `INFO`:  жизненный цикл сессии (start, stop)
//! - `DEBUG`: отдельные события и результаты атрибуции
//! - `TRACE`: сканирование таблицы процессов
//!
//! ## Использование
//! ```ignore
//! use fslogger_rust::logging::{init_logging, LogContext};
//!
//! init_logging(); // вызывается один раз при старте
//!
//! let ctx = LogContext::with_operation("watcher");
//! log::info!(target: "fslogger_rust::file_watcher", "[{}] Starting watcher", ctx.correlation_id);
//! ```

use std::io::Write;
use std::sync::Once;

use chrono::Local;
use log::{Level, LevelFilter};

static INIT: Once = Once::new();

/// Инициализировать логирование (idempotent).
///
/// Управление уровнем логов: переменная окружения `RUST_LOG`.
/// Примеры:
/// - `RUST_LOG=info` — только INFO и выше
/// - `RUST_LOG=fslogger_rust=debug` — DEBUG для нашего crate
/// - `RUST_LOG=fslogger_rust::attribution=trace` — подробности атрибуции
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::new()
            .format(|buf, record| {
                let level = match record.level() {
                    Level::Error => "E",
                    Level::Warn => "W",
                    Level::Info => "I",
                    Level::Debug => "D",
                    Level::Trace => "T",
                };

                // Формат: [timestamp] [LEVEL] [target] message
                writeln!(
                    buf,
                    "[{}] [{}] [{}] {}",
                    Local::now().format("%H:%M:%S%.3f"),
                    level,
                    record.target(),
                    record.args()
                )
            })
            .filter_module("fslogger_rust", LevelFilter::Info)
            .filter_module("fslogger", LevelFilter::Info)
            .filter_module("notify", LevelFilter::Warn)
            // RUST_LOG применяется последним и перекрывает значения по умолчанию.
            .parse_env("RUST_LOG")
            .try_init();
    });
}

/// Контекст логирования с корреляционным ID.
///
/// Одна сессия наблюдения, один контекст: по `correlation_id` можно
/// найти в диагностике все сообщения конкретного запуска.
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Уникальный идентификатор для корреляции событий.
    pub correlation_id: String,
    /// Опциональный контекст операции.
    pub operation: Option<String>,
}

impl LogContext {
    /// Создать новый контекст с уникальным correlation_id.
    pub fn new() -> Self {
        Self {
            correlation_id: generate_correlation_id(),
            operation: None,
        }
    }

    /// Создать контекст с указанным operation name.
    pub fn with_operation(operation: impl Into<String>) -> Self {
        Self {
            correlation_id: generate_correlation_id(),
            operation: Some(operation.into()),
        }
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Формат: `corr_<timestamp_ms>_<counter>`
fn generate_correlation_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);

    format!(
        "corr_{}_{}",
        Local::now().timestamp_millis(),
        counter % 10000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_context_has_correlation_id() {
        let ctx = LogContext::new();
        assert!(ctx.correlation_id.starts_with("corr_"));
        assert!(ctx.operation.is_none());
    }

    #[test]
    fn test_log_context_with_operation() {
        let ctx = LogContext::with_operation("watcher");
        assert!(ctx.correlation_id.starts_with("corr_"));
        assert_eq!(ctx.operation, Some("watcher".to_string()));
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let ctx1 = LogContext::new();
        let ctx2 = LogContext::new();
        assert_ne!(ctx1.correlation_id, ctx2.correlation_id);
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
