//! Модуль мониторинга файловой системы.
//!
//! Отвечает за:
//! - подписку `notify` на перечисленные директории
//! - передачу сырых событий из callback'а в рабочий поток (ограниченная FIFO-очередь)
//! - сбор событий в пакеты по окну задержки
//! - атрибуцию и запись в журнал в порядке доставки
//! - graceful shutdown
//!
//! Состояния: `Stopped` → `Starting` → `Running` → `Stopped`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};

use crate::attribution::Attributor;
use crate::config::WatcherSettings;
use crate::error::LoggerError;
use crate::logging::LogContext;
use crate::paths;
use crate::process_table::{ProcessTable, SystemProcessTable};

mod events;
mod pipeline;

pub use events::{AttributedEvent, EventFlags, EventId, RawEvent};
use pipeline::EventProcessor;

/// Ёмкость очереди между callback'ом `notify` и рабочим потоком.
pub const EVENT_QUEUE_CAPACITY: usize = 4096;

/// Как часто рабочий поток проверяет запрос остановки.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Состояние watcher'а.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatcherState {
  Stopped,
  Starting,
  Running,
}

/// Приём сырых событий: общий для callback'а `notify` и `report_fs_event`.
///
/// Никогда не блокирует: при переполнении очереди событие теряется, а
/// следующее доставленное помечается `Dropped | MustScanSubDirs`.
struct Intake {
  tx: mpsc::SyncSender<RawEvent>,
  cursor: Arc<AtomicU64>,
  dropped: AtomicU64,
}

impl Intake {
  fn push(&self, path: PathBuf, mut flags: EventFlags, observed_at: DateTime<Local>) {
    let pending = self.dropped.swap(0, Ordering::AcqRel);
    if pending > 0 {
      flags |= EventFlags::DROPPED | EventFlags::MUST_SCAN_SUBDIRS;
    }
    let id = self.cursor.fetch_add(1, Ordering::AcqRel) + 1;

    match self.tx.try_send(RawEvent {
      id,
      path,
      flags,
      observed_at,
    }) {
      Ok(()) => {}
      Err(TrySendError::Full(event)) => {
        if self.dropped.fetch_add(pending + 1, Ordering::AcqRel) == 0 {
          warn!("Event queue is full, dropping events (first: {})", event.path.display());
        }
      }
      Err(TrySendError::Disconnected(_)) => {
        debug!("Event dropped: watcher thread is gone");
      }
    }
  }

  fn push_notify(&self, event: notify::Event) {
    let Some(mut flags) = EventFlags::from_kind(&event.kind) else {
      return;
    };
    if event.need_rescan() {
      flags |= EventFlags::MUST_SCAN_SUBDIRS;
    }
    let observed_at = Local::now();
    for path in event.paths {
      self.push(path, flags, observed_at);
    }
  }
}

/// Подписка на поток уведомлений: одна неглубокая (NonRecursive) подписка на
/// каждую перечисленную директорию.
pub(crate) struct Subscription {
  watcher: Mutex<Option<RecommendedWatcher>>,
  watched: Mutex<BTreeSet<PathBuf>>,
}

impl Subscription {
  fn open(paths: &[PathBuf], intake: Arc<Intake>) -> Result<Self, LoggerError> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
      match res {
        Ok(event) => intake.push_notify(event),
        Err(e) => warn!("notify error: {e}"),
      }
    })
    .map_err(|e| LoggerError::SubscriptionFailed(e.to_string()))?;

    for path in paths {
      watcher
        .watch(path, RecursiveMode::NonRecursive)
        .map_err(|e| LoggerError::SubscriptionFailed(format!("{}: {e}", path.display())))?;
    }

    Ok(Self {
      watcher: Mutex::new(Some(watcher)),
      watched: Mutex::new(paths.iter().cloned().collect()),
    })
  }

  /// Добавить в подписку новую директорию и её поддиректории.
  pub(crate) fn extend(&self, dir: &Path) {
    let mut guard = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(watcher) = guard.as_mut() else {
      return;
    };
    let mut watched = self.watched.lock().unwrap_or_else(PoisonError::into_inner);

    for path in paths::descendant_dirs(dir) {
      if watched.contains(&path) {
        continue;
      }
      match watcher.watch(&path, RecursiveMode::NonRecursive) {
        Ok(()) => {
          debug!("Now watching new directory {}", path.display());
          watched.insert(path);
        }
        Err(e) => warn!("Failed to watch new directory {}: {e}", path.display()),
      }
    }
  }

  /// Убрать из подписки `dir` и всё под ним, чего больше нет на диске.
  pub(crate) fn prune(&self, dir: &Path) {
    let mut guard = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
    let mut watched = self.watched.lock().unwrap_or_else(PoisonError::into_inner);

    let gone: Vec<PathBuf> = watched
      .iter()
      .filter(|path| path.starts_with(dir) && !path.exists())
      .cloned()
      .collect();
    for path in gone {
      // inotify уже снял наблюдение с удалённой директории, ошибка ожидаема.
      if let Some(watcher) = guard.as_mut() {
        let _ = watcher.unwatch(&path);
      }
      debug!("Stopped watching removed directory {}", path.display());
      watched.remove(&path);
    }
  }

  fn paths(&self) -> Vec<PathBuf> {
    self
      .watched
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .cloned()
      .collect()
  }

  /// Снять подписку. Повторный вызов - no-op.
  fn close(&self) {
    let watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner).take();
    drop(watcher);
  }
}

/// Ресурсы активной сессии: снимок настроек (с журналом) и подписка
/// освобождаются вместе.
struct Session {
  settings: Arc<WatcherSettings>,
  subscription: Arc<Subscription>,
  /// Сильная ссылка живёт только в callback'е подписки.
  intake: Weak<Intake>,
  stop_tx: mpsc::Sender<()>,
  join: Option<thread::JoinHandle<()>>,
  context: LogContext,
}

/// Сессия наблюдения. Принадлежит вызывающему; одна активная подписка на объект.
pub struct Watcher {
  table: Arc<dyn ProcessTable>,
  state: Arc<Mutex<WatcherState>>,
  cursor: Arc<AtomicU64>,
  session: Option<Session>,
}

impl Watcher {
  /// Watcher поверх реальной таблицы процессов.
  pub fn new() -> Self {
    Self::with_process_table(Arc::new(SystemProcessTable::new()))
  }

  pub fn with_process_table(table: Arc<dyn ProcessTable>) -> Self {
    Self {
      table,
      state: Arc::new(Mutex::new(WatcherState::Stopped)),
      cursor: Arc::new(AtomicU64::new(0)),
      session: None,
    }
  }

  pub fn state(&self) -> WatcherState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Номер последнего принятого события (курсор для следующего `since_when`).
  pub fn last_event_id(&self) -> EventId {
    self.cursor.load(Ordering::Acquire)
  }

  /// Директории, на которые сейчас подписан watcher.
  pub fn watched_paths(&self) -> Vec<PathBuf> {
    self
      .session
      .as_ref()
      .map(|s| s.subscription.paths())
      .unwrap_or_default()
  }

  /// Запустить сессию.
  ///
  /// Ошибки: `AlreadyRunning`, `InvalidConfiguration`, `SubscriptionFailed`.
  /// При ошибке watcher остаётся в `Stopped`, журнал закрывается.
  pub fn start(&mut self, settings: WatcherSettings) -> Result<(), LoggerError> {
    if self.state() == WatcherState::Running {
      return Err(LoggerError::AlreadyRunning);
    }
    // Сессия, чей поток завершился сам (поток событий оборвался).
    if self.session.is_some() {
      self.stop()?;
    }

    self.set_state(WatcherState::Starting);
    match self.open_session(settings) {
      Ok(session) => {
        self.session = Some(session);
        self.set_state(WatcherState::Running);
        Ok(())
      }
      Err(e) => {
        error!("Failed to start watcher: {e}");
        self.set_state(WatcherState::Stopped);
        Err(e)
      }
    }
  }

  fn open_session(&self, settings: WatcherSettings) -> Result<Session, LoggerError> {
    settings.validate()?;
    let context = LogContext::with_operation("watcher");
    let options = settings.options();

    let folders: Vec<PathBuf> = options
      .folders
      .iter()
      .filter_map(|folder| match paths::validate_folder(folder) {
        Ok(path) => Some(path),
        Err(e) => {
          warn!("[{}] Skipping folder: {e}", context.correlation_id);
          None
        }
      })
      .collect();
    if folders.is_empty() {
      return Err(LoggerError::InvalidConfiguration(
        "none of the configured folders can be watched".to_string(),
      ));
    }

    let recursive = !options.dont_check_subfolders;
    let latency = options.latency_duration();
    let watch_paths = paths::enumerate(&folders, recursive)?;

    if let Some(since_when) = options.since_when {
      self.cursor.store(since_when, Ordering::Release);
    }

    info!(
      "[{}] Starting watcher: {} folder(s), {} director(ies), latency {:?}, subfolders {}, attribution {}",
      context.correlation_id,
      folders.len(),
      watch_paths.len(),
      latency,
      if recursive { "on" } else { "off" },
      if options.dont_search_pid_user { "off" } else { "on" },
    );

    let (event_tx, event_rx) = mpsc::sync_channel::<RawEvent>(EVENT_QUEUE_CAPACITY);
    let intake = Arc::new(Intake {
      tx: event_tx,
      cursor: self.cursor.clone(),
      dropped: AtomicU64::new(0),
    });
    let weak_intake = Arc::downgrade(&intake);
    let subscription = Arc::new(Subscription::open(&watch_paths, intake)?);

    let settings = Arc::new(settings);
    let processor = EventProcessor::new(
      settings.clone(),
      Attributor::new(self.table.clone()),
      recursive.then(|| subscription.clone()),
    );

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let state = self.state.clone();
    let join = thread::Builder::new()
      .name("fslogger-watcher".to_string())
      .spawn(move || run_worker(&processor, &event_rx, &stop_rx, latency, &state))
      .map_err(|e| {
        subscription.close();
        LoggerError::SubscriptionFailed(format!("cannot spawn watcher thread: {e}"))
      })?;

    Ok(Session {
      settings,
      subscription,
      intake: weak_intake,
      stop_tx,
      join: Some(join),
      context,
    })
  }

  /// Остановить сессию: дождаться текущего пакета, снять подписку, дописать
  /// и закрыть журнал. Идемпотентно.
  pub fn stop(&mut self) -> Result<(), LoggerError> {
    let Some(mut session) = self.session.take() else {
      self.set_state(WatcherState::Stopped);
      return Ok(());
    };

    let _ = session.stop_tx.send(());
    if let Some(join) = session.join.take() {
      if join.join().is_err() {
        error!("[{}] Watcher thread panicked", session.context.correlation_id);
      }
    }
    session.subscription.close();
    session.settings.log().close();

    info!(
      "[{}] Watcher stopped at event id {}",
      session.context.correlation_id,
      self.last_event_id()
    );
    self.set_state(WatcherState::Stopped);
    Ok(())
  }

  /// Принять сырое событие на границе потока уведомлений.
  ///
  /// Событие идёт через ту же очередь, что и события ОС, поэтому сохраняет
  /// общий порядок. Пустой `timestamp_text` означает текущее время.
  pub fn report_fs_event(
    &self,
    flags: EventFlags,
    path: impl Into<PathBuf>,
    timestamp_text: &str,
  ) -> Result<(), LoggerError> {
    let session = self.running_session()?;
    let intake = session.intake.upgrade().ok_or(LoggerError::NotRunning)?;

    let observed_at = if timestamp_text.trim().is_empty() {
      Local::now()
    } else {
      session
        .settings
        .timestamp_format()
        .parse(timestamp_text)
        .unwrap_or_else(|| {
          warn!("Unparsable event timestamp {timestamp_text:?}, using current time");
          Local::now()
        })
    };

    intake.push(path.into(), flags, observed_at);
    Ok(())
  }

  /// Дописать произвольную строку в журнал активной сессии.
  pub fn write_message_to_log(&self, message: &str, asynchronous: bool) -> Result<(), LoggerError> {
    self
      .running_session()?
      .settings
      .log()
      .write_message(message, asynchronous)
  }

  fn running_session(&self) -> Result<&Session, LoggerError> {
    match &self.session {
      Some(session) if self.state() == WatcherState::Running => Ok(session),
      _ => Err(LoggerError::NotRunning),
    }
  }

  fn set_state(&self, state: WatcherState) {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
  }
}

impl Default for Watcher {
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for Watcher {
  fn drop(&mut self) {
    let _ = self.stop();
  }
}

fn run_worker(
  processor: &EventProcessor,
  event_rx: &mpsc::Receiver<RawEvent>,
  stop_rx: &mpsc::Receiver<()>,
  latency: Duration,
  state: &Mutex<WatcherState>,
) {
  loop {
    // 1) graceful shutdown: дописываем всё, что уже в очереди
    match stop_rx.try_recv() {
      Ok(()) | Err(TryRecvError::Disconnected) => {
        info!("Watcher shutdown requested");
        let rest: Vec<RawEvent> = event_rx.try_iter().collect();
        if !rest.is_empty() {
          processor.process_batch(rest);
        }
        break;
      }
      Err(TryRecvError::Empty) => {}
    }

    // 2) обработка событий
    match event_rx.recv_timeout(STOP_POLL_INTERVAL) {
      Ok(first) => {
        let batch = collect_batch(first, event_rx, latency);
        debug!("Processing batch of {} event(s)", batch.len());
        processor.process_batch(batch);
      }
      Err(RecvTimeoutError::Timeout) => {
        // тик
      }
      Err(RecvTimeoutError::Disconnected) => {
        warn!("Event stream disconnected");
        *state.lock().unwrap_or_else(PoisonError::into_inner) = WatcherState::Stopped;
        break;
      }
    }
  }

  info!("Watcher thread finished");
}

/// Собрать пакет: всё, что пришло в течение окна задержки после первого события.
fn collect_batch(
  first: RawEvent,
  event_rx: &mpsc::Receiver<RawEvent>,
  latency: Duration,
) -> Vec<RawEvent> {
  let mut batch = vec![first];
  let deadline = Instant::now() + latency;

  loop {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
      batch.extend(event_rx.try_iter());
      break;
    }
    match event_rx.recv_timeout(remaining) {
      Ok(event) => batch.push(event),
      Err(_) => break,
    }
  }

  batch
}
