//! Атрибуция: какой процесс держит открытым изменившийся путь.
//!
//! Best-effort. Процесс мог уже закрыть файл к моменту проверки, тогда
//! события просто остаются без атрибуции (в журнале: `unknown`).
//!
//! Известное ограничение: поиск останавливается на первом совпадении в порядке
//! возрастания pid. Если файл открыт несколькими процессами, в журнал попадёт
//! процесс с наименьшим pid, а не обязательно тот, кто писал.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, trace};

use crate::error::LoggerError;
use crate::file_watcher::{EventFlags, RawEvent};
use crate::process_table::{ProcessInfo, ProcessTable};

/// Движок атрибуции поверх таблицы процессов.
#[derive(Clone)]
pub struct Attributor {
    table: Arc<dyn ProcessTable>,
}

impl Attributor {
    pub fn new(table: Arc<dyn ProcessTable>) -> Self {
        Self { table }
    }

    /// Найти процесс, который держит `path` открытым.
    ///
    /// При `skip_attribution` таблица процессов не трогается вовсе.
    pub fn attribute(&self, path: &Path, skip_attribution: bool) -> Option<ProcessInfo> {
        if skip_attribution {
            return None;
        }
        self.find(path, path.is_dir())
    }

    /// То же для события: уровень директории берётся из флага `IsDir`,
    /// а не из файловой системы (удалённую директорию уже не проверить).
    pub fn attribute_event(&self, event: &RawEvent, skip_attribution: bool) -> Option<ProcessInfo> {
        if skip_attribution {
            return None;
        }
        self.find(&event.path, event.flags.contains(EventFlags::IS_DIR))
    }

    fn find(&self, path: &Path, directory_level: bool) -> Option<ProcessInfo> {
        for pid in self.table.list_process_ids() {
            let open_paths = match self.table.open_paths_of(pid) {
                Ok(paths) => paths,
                Err(LoggerError::ProcessGone(_)) => {
                    trace!("pid {pid} exited during attribution scan");
                    continue;
                }
                Err(e) => {
                    trace!("pid {pid} skipped: {e}");
                    continue;
                }
            };

            if holds(&open_paths, path, directory_level) {
                let (uid, user_name) = self.table.user_of(pid);
                debug!("{} attributed to pid {pid} ({user_name})", path.display());
                return Some(ProcessInfo {
                    pid,
                    uid,
                    user_name,
                });
            }
        }

        trace!("{} not held open by any visible process", path.display());
        None
    }
}

fn holds(open_paths: &[PathBuf], target: &Path, directory_level: bool) -> bool {
    open_paths
        .iter()
        .any(|open| open == target || (directory_level && open.starts_with(target)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_table::{FakeProcessTable, UNKNOWN};
    use chrono::Local;

    fn table() -> Arc<FakeProcessTable> {
        Arc::new(FakeProcessTable::new())
    }

    #[test]
    fn test_skip_attribution_never_touches_the_table() {
        let fake = table();
        fake.insert(10, Some(501), Some("alice"), vec![PathBuf::from("/w/a.txt")]);
        let attributor = Attributor::new(fake.clone());

        assert_eq!(attributor.attribute(Path::new("/w/a.txt"), true), None);
        assert_eq!(fake.list_calls(), 0);
        assert_eq!(fake.open_paths_calls(), 0);
        assert_eq!(fake.user_calls(), 0);
    }

    #[test]
    fn test_match_resolves_user() {
        let fake = table();
        fake.insert(10, Some(0), Some("root"), vec![PathBuf::from("/etc/hosts")]);
        fake.insert(42, Some(501), Some("alice"), vec![PathBuf::from("/w/a.txt")]);
        let attributor = Attributor::new(fake.clone());

        let info = attributor.attribute(Path::new("/w/a.txt"), false).unwrap();
        assert_eq!(
            info,
            ProcessInfo {
                pid: 42,
                uid: Some(501),
                user_name: "alice".to_string()
            }
        );
        assert_eq!(fake.user_calls(), 1);
    }

    #[test]
    fn test_first_match_wins_in_pid_order() {
        let fake = table();
        let path = PathBuf::from("/w/shared.log");
        fake.insert(300, Some(2), Some("bob"), vec![path.clone()]);
        fake.insert(200, Some(1), Some("alice"), vec![path.clone()]);
        let attributor = Attributor::new(fake.clone());

        let info = attributor.attribute(&path, false).unwrap();
        assert_eq!(info.pid, 200);
        // pid 300 уже не опрашивается
        assert_eq!(fake.open_paths_calls(), 1);
    }

    #[test]
    fn test_gone_process_is_skipped_not_fatal() {
        let fake = table();
        let path = PathBuf::from("/w/a.txt");
        fake.insert(5, Some(1), Some("alice"), vec![path.clone()]);
        fake.insert(6, Some(2), Some("bob"), vec![path.clone()]);
        fake.mark_gone(5);
        let attributor = Attributor::new(fake.clone());

        assert_eq!(attributor.attribute(&path, false).unwrap().pid, 6);
    }

    #[test]
    fn test_no_holder_gives_none() {
        let fake = table();
        fake.insert(5, Some(1), Some("alice"), vec![PathBuf::from("/other")]);
        let attributor = Attributor::new(fake.clone());

        assert_eq!(attributor.attribute(Path::new("/w/a.txt"), false), None);
        assert_eq!(fake.user_calls(), 0);
    }

    #[test]
    fn test_empty_table_degrades_to_none() {
        let attributor = Attributor::new(table());
        assert_eq!(attributor.attribute(Path::new("/w/a.txt"), false), None);
    }

    #[test]
    fn test_directory_event_matches_paths_beneath() {
        let fake = table();
        fake.insert(7, None, None, vec![PathBuf::from("/w/sub/file.bin")]);
        let attributor = Attributor::new(fake.clone());

        let dir_event = RawEvent {
            id: 1,
            path: PathBuf::from("/w/sub"),
            flags: EventFlags::MODIFIED | EventFlags::IS_DIR,
            observed_at: Local::now(),
        };
        let info = attributor.attribute_event(&dir_event, false).unwrap();
        assert_eq!(info.pid, 7);
        assert_eq!(info.uid, None);
        assert_eq!(info.user_name, UNKNOWN);

        // Для файлового события префикс не считается совпадением.
        let file_event = RawEvent {
            flags: EventFlags::MODIFIED | EventFlags::IS_FILE,
            ..dir_event
        };
        assert_eq!(attributor.attribute_event(&file_event, false), None);
    }
}
