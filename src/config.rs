//! Настройки сессии наблюдения.
//!
//! [`WatcherOptions`] — распознаваемые опции в виде простых данных (то, что
//! пользователь задаёт в CLI или через `api`). [`WatcherSettings`] — неизменяемый
//! снимок одной сессии: опции плюс открытый журнал и форматтер времени.
//! Хранение настроек между запусками не задача этого crate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

use crate::error::LoggerError;
use crate::file_watcher::EventId;
use crate::log_writer::{log_diagnostics, DiagnosticSink, LogWriter};

/// Задержка сбора событий в пакет по умолчанию, секунды.
pub const DEFAULT_LATENCY: f64 = 1.0;

/// Папка приложения внутри каталога данных пользователя.
pub const APP_FOLDER_NAME: &str = "FsLogger";

/// Имя журнала по умолчанию.
pub const DEFAULT_LOG_FILE_NAME: &str = "fslogger.log";

/// Формат времени в журнале по умолчанию (ISO 8601 с миллисекундами и смещением).
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

/// Режим записи событий в журнал.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Через очередь фонового писателя (по умолчанию).
    #[default]
    Async,
    /// Каждая запись ждёт записи и flush.
    Sync,
}

impl WriteMode {
    pub fn is_async(self) -> bool {
        self == WriteMode::Async
    }
}

/// Форматтер времени событий (strftime-шаблон `chrono`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimestampFormat(String);

impl TimestampFormat {
    /// Шаблон должен быть корректным, а время по нему должно выходить одним
    /// полем строки журнала (без пробелов и переводов строк) и читаться обратно.
    /// Проверяется результат форматирования: `%c`, `%r`, `%n`, `%t` сами по себе
    /// пробелов не содержат, но порождают их.
    pub fn new(pattern: impl Into<String>) -> Result<Self, LoggerError> {
        let pattern = pattern.into();
        if pattern.is_empty() || pattern.chars().any(char::is_whitespace) {
            return Err(LoggerError::InvalidConfiguration(format!(
                "timestamp format must be non-empty and contain no whitespace: {pattern:?}"
            )));
        }
        if StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error)) {
            return Err(LoggerError::InvalidConfiguration(format!(
                "invalid timestamp format: {pattern:?}"
            )));
        }

        let format = Self(pattern);
        let sample = Local
            .with_ymd_and_hms(2001, 2, 3, 4, 5, 6)
            .earliest()
            .unwrap_or_else(Local::now);
        let rendered = format.format(&sample);
        if rendered.is_empty() || rendered.chars().any(char::is_whitespace) {
            return Err(LoggerError::InvalidConfiguration(format!(
                "timestamp format renders whitespace: {:?} -> {rendered:?}",
                format.0
            )));
        }
        if format.parse(&rendered).is_none() {
            return Err(LoggerError::InvalidConfiguration(format!(
                "timestamp format cannot be read back: {:?} -> {rendered:?}",
                format.0
            )));
        }
        Ok(format)
    }

    pub fn pattern(&self) -> &str {
        &self.0
    }

    pub fn format(&self, time: &DateTime<Local>) -> String {
        time.format(&self.0).to_string()
    }

    /// Разобрать время, отформатированное этим же шаблоном.
    pub fn parse(&self, text: &str) -> Option<DateTime<Local>> {
        if let Ok(time) = DateTime::parse_from_str(text, &self.0) {
            return Some(time.with_timezone(&Local));
        }
        // Шаблон без смещения: трактуем как локальное время.
        NaiveDateTime::parse_from_str(text, &self.0)
            .ok()
            .and_then(|naive| Local.from_local_datetime(&naive).earliest())
    }
}

impl Default for TimestampFormat {
    fn default() -> Self {
        Self(DEFAULT_TIMESTAMP_FORMAT.to_string())
    }
}

/// Распознаваемые опции наблюдения.
#[derive(Clone, Debug)]
pub struct WatcherOptions {
    /// Корневые папки наблюдения (порядок на поведение не влияет).
    pub folders: Vec<PathBuf>,
    /// Курсор возобновления; `None`: с текущего момента.
    pub since_when: Option<EventId>,
    /// Окно сбора событий в пакет, секунды.
    pub latency: f64,
    /// Журнал событий.
    pub log_path: PathBuf,
    /// Не следить за подпапками.
    pub dont_check_subfolders: bool,
    /// Не искать процесс и пользователя (быстрый путь).
    pub dont_search_pid_user: bool,
    pub write_mode: WriteMode,
    pub timestamp_format: TimestampFormat,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            since_when: None,
            latency: DEFAULT_LATENCY,
            log_path: PathBuf::from(DEFAULT_LOG_FILE_NAME),
            dont_check_subfolders: false,
            dont_search_pid_user: false,
            write_mode: WriteMode::default(),
            timestamp_format: TimestampFormat::default(),
        }
    }
}

impl WatcherOptions {
    pub fn new(folders: Vec<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            folders,
            log_path: log_path.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), LoggerError> {
        if !self.latency.is_finite() || self.latency < 0.0 {
            return Err(LoggerError::InvalidConfiguration(format!(
                "latency must be a non-negative number of seconds, got {}",
                self.latency
            )));
        }
        if self.folders.is_empty() {
            return Err(LoggerError::InvalidConfiguration(
                "at least one folder must be watched".to_string(),
            ));
        }
        if self.log_path.as_os_str().is_empty() {
            return Err(LoggerError::InvalidConfiguration(
                "log path is empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn latency_duration(&self) -> Duration {
        Duration::from_secs_f64(self.latency.max(0.0))
    }
}

/// Разобрать курсор возобновления в текстовом виде. Пусто: «с текущего момента».
pub fn parse_since_when(text: Option<&str>) -> Result<Option<EventId>, LoggerError> {
    match text.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s.parse().map(Some).map_err(|_| {
            LoggerError::InvalidConfiguration(format!("since_when is not an event id: {s:?}"))
        }),
    }
}

/// Разобрать задержку в секундах. Пусто: [`DEFAULT_LATENCY`].
pub fn parse_latency(text: Option<&str>) -> Result<f64, LoggerError> {
    match text.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(DEFAULT_LATENCY),
        Some(s) => s.parse().map_err(|_| {
            LoggerError::InvalidConfiguration(format!("latency is not a number: {s:?}"))
        }),
    }
}

/// Журнал по умолчанию: `<data dir>/FsLogger/fslogger.log`. Папка создаётся.
pub fn default_log_path() -> Result<PathBuf, LoggerError> {
    let base = dirs::data_dir()
        .or_else(dirs::home_dir)
        .ok_or(LoggerError::DataDirNotFound)?;
    let folder = base.join(APP_FOLDER_NAME);
    std::fs::create_dir_all(&folder)?;
    Ok(folder.join(DEFAULT_LOG_FILE_NAME))
}

/// Неизменяемый снимок сессии: опции + открытый журнал.
pub struct WatcherSettings {
    options: WatcherOptions,
    log: LogWriter,
}

impl WatcherSettings {
    /// Открыть журнал из опций с диагностикой по умолчанию.
    pub fn open(options: WatcherOptions) -> Result<Self, LoggerError> {
        Self::open_with_diagnostics(options, log_diagnostics())
    }

    pub fn open_with_diagnostics(
        options: WatcherOptions,
        diagnostics: DiagnosticSink,
    ) -> Result<Self, LoggerError> {
        options.validate()?;
        let log = LogWriter::open(&options.log_path, diagnostics)?;
        Ok(Self { options, log })
    }

    /// Снимок с уже открытым писателем журнала.
    pub fn new(options: WatcherOptions, log: LogWriter) -> Self {
        Self { options, log }
    }

    /// Проверка на переходе Stopped → Starting.
    pub fn validate(&self) -> Result<(), LoggerError> {
        self.options.validate()?;
        if self.log.is_closed() {
            return Err(LoggerError::InvalidConfiguration(
                "log descriptor is not open".to_string(),
            ));
        }
        Ok(())
    }

    pub fn options(&self) -> &WatcherOptions {
        &self.options
    }

    pub fn log(&self) -> &LogWriter {
        &self.log
    }

    pub fn log_path(&self) -> &Path {
        &self.options.log_path
    }

    pub fn timestamp_format(&self) -> &TimestampFormat {
        &self.options.timestamp_format
    }
}
