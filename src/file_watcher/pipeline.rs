//! Обработка пакета событий: атрибуция → журнал.

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, trace};

use super::events::{AttributedEvent, EventFlags, RawEvent};
use super::Subscription;
use crate::attribution::Attributor;
use crate::config::WatcherSettings;

/// Обработчик событий одной сессии. Живёт в рабочем потоке watcher'а.
pub(crate) struct EventProcessor {
  settings: Arc<WatcherSettings>,
  attributor: Attributor,
  /// Только в рекурсивном режиме: новые директории добавляются в подписку.
  subscription: Option<Arc<Subscription>>,
  log_path: PathBuf,
}

impl EventProcessor {
  pub(crate) fn new(
    settings: Arc<WatcherSettings>,
    attributor: Attributor,
    subscription: Option<Arc<Subscription>>,
  ) -> Self {
    let log_path = settings
      .log_path()
      .canonicalize()
      .unwrap_or_else(|_| settings.log_path().to_path_buf());
    Self {
      settings,
      attributor,
      subscription,
      log_path,
    }
  }

  /// Обработать пакет строго в порядке доставки.
  pub(crate) fn process_batch(&self, batch: Vec<RawEvent>) {
    for event in batch {
      self.process(event);
    }
  }

  pub(crate) fn process(&self, mut event: RawEvent) {
    // Запись в собственный журнал порождала бы событие на каждое событие.
    if event.path == self.log_path {
      trace!("Ignoring event on own log file");
      return;
    }

    if !event.flags.intersects(EventFlags::TYPE_MASK) {
      event.flags |= type_flags(&event.path);
    }

    if let Some(subscription) = &self.subscription {
      follow_tree(subscription, &event);
    }

    let options = self.settings.options();
    let process = self
      .attributor
      .attribute_event(&event, options.dont_search_pid_user);
    let timestamp = self.settings.timestamp_format().format(&event.observed_at);
    let attributed = AttributedEvent {
      raw: event,
      process,
      timestamp,
    };
    debug!(
      "event #{} {} {}",
      attributed.raw.id,
      attributed.raw.flags,
      attributed.raw.path.display()
    );

    let log = self.settings.log();
    if let Err(err) = log.write(&attributed, options.write_mode.is_async()) {
      (log.diagnostics())(&err);
    }
  }
}

/// Рекурсивный режим: директория, появившаяся в дереве (создана или
/// перемещена внутрь), добавляется в подписку; исчезнувшие снимаются.
fn follow_tree(subscription: &Subscription, event: &RawEvent) {
  let appeared = event.flags.intersects(EventFlags::CREATED | EventFlags::RENAMED);
  if appeared && event.flags.contains(EventFlags::IS_DIR) && event.path.is_dir() {
    subscription.extend(&event.path);
  } else if event.flags.intersects(EventFlags::REMOVED | EventFlags::RENAMED)
    && !event.path.exists()
  {
    subscription.prune(&event.path);
  }
}

/// Тип объекта, если он ещё существует.
fn type_flags(path: &std::path::Path) -> EventFlags {
  match std::fs::symlink_metadata(path) {
    Ok(meta) if meta.file_type().is_symlink() => EventFlags::IS_SYMLINK,
    Ok(meta) if meta.is_dir() => EventFlags::IS_DIR,
    Ok(_) => EventFlags::IS_FILE,
    Err(_) => EventFlags::empty(),
  }
}
