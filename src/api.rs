//! Внешний API.
//!
//! Тонкий слой поверх [`Watcher`](crate::file_watcher::Watcher) с теми же точками
//! входа, что и у оболочки приложения: старт/стоп наблюдения, запись в журнал,
//! приём сырого события. Один watcher на процесс; вся логика живёт в `src/*` модулях.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;

use crate::config::{self, WatcherOptions, WatcherSettings};
use crate::error::LoggerError;
use crate::file_watcher::{EventFlags, EventId, Watcher, WatcherState};
use crate::logging;

static WATCHER: Lazy<Mutex<Watcher>> = Lazy::new(|| Mutex::new(Watcher::new()));

// Примечание: recover from poisoned mutex - если предыдущий поток паниковал,
// состояние watcher'а всё равно согласовано (переходы делаются под блокировкой).
fn watcher() -> MutexGuard<'static, Watcher> {
    WATCHER.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Инициализация логирования.
pub fn init_logging() {
    logging::init_logging();
}

/// Запуск наблюдения.
///
/// - `since_when`: курсор возобновления; `None`/пусто — с текущего момента.
/// - `latency`: окно сбора событий в секундах; `None`/пусто — 1.0.
/// - `log_path`: `None` — журнал по умолчанию в каталоге данных пользователя.
///   Файл создаётся при отсутствии, иначе дописывается.
///
/// Повторный старт при активной сессии — `AlreadyRunning`.
pub fn init_watcher(
    folders: Vec<String>,
    since_when: Option<String>,
    latency: Option<String>,
    log_path: Option<String>,
    dont_check_subfolders: bool,
    dont_search_pid_user: bool,
) -> Result<(), LoggerError> {
    logging::init_logging();

    let mut guard = watcher();
    if guard.state() == WatcherState::Running {
        return Err(LoggerError::AlreadyRunning);
    }

    let log_path = match log_path.filter(|p| !p.trim().is_empty()) {
        Some(p) => PathBuf::from(p),
        None => config::default_log_path()?,
    };
    let options = WatcherOptions {
        folders: folders.into_iter().map(PathBuf::from).collect(),
        since_when: config::parse_since_when(since_when.as_deref())?,
        latency: config::parse_latency(latency.as_deref())?,
        log_path,
        dont_check_subfolders,
        dont_search_pid_user,
        ..WatcherOptions::default()
    };

    guard.start(WatcherSettings::open(options)?)
}

/// Остановить наблюдение (graceful shutdown). Идемпотентно.
pub fn dispose_watcher() -> Result<(), LoggerError> {
    watcher().stop()
}

/// Дописать строку в журнал активной сессии.
pub fn write_message_to_log(message: &str, asynchronous: bool) -> Result<(), LoggerError> {
    watcher().write_message_to_log(message, asynchronous)
}

/// Принять сырое событие (граница callback'а потока уведомлений).
///
/// `flags` — битовая маска [`EventFlags`]; неизвестные биты отбрасываются.
pub fn report_fs_event(flags: u32, path: &str, timestamp_text: &str) -> Result<(), LoggerError> {
    watcher().report_fs_event(EventFlags::from_bits_truncate(flags), path, timestamp_text)
}

/// Курсор для следующего `init_watcher(since_when = …)`.
pub fn last_event_id() -> EventId {
    watcher().last_event_id()
}

/// Текущее состояние watcher'а.
pub fn watcher_state() -> WatcherState {
    watcher().state()
}
