//! Таблица процессов в памяти для детерминированных тестов атрибуции и watcher'а.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{ProcessId, ProcessTable, UserId, UNKNOWN};
use crate::error::LoggerError;

#[derive(Clone, Debug)]
struct FakeProcess {
    uid: Option<UserId>,
    user_name: Option<String>,
    open_paths: Vec<PathBuf>,
}

/// Поддельная таблица процессов со счётчиками вызовов.
#[derive(Debug, Default)]
pub struct FakeProcessTable {
    processes: Mutex<BTreeMap<ProcessId, FakeProcess>>,
    gone: Mutex<BTreeSet<ProcessId>>,
    list_calls: AtomicUsize,
    open_paths_calls: AtomicUsize,
    user_calls: AtomicUsize,
}

impl FakeProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавить (или заменить) процесс.
    pub fn insert(
        &self,
        pid: ProcessId,
        uid: Option<UserId>,
        user_name: Option<&str>,
        open_paths: Vec<PathBuf>,
    ) {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                pid,
                FakeProcess {
                    uid,
                    user_name: user_name.map(str::to_string),
                    open_paths,
                },
            );
    }

    /// Процесс остаётся в списке, но `open_paths_of` отвечает `ProcessGone`,
    /// как если бы он завершился между перечислением и запросом.
    pub fn mark_gone(&self, pid: ProcessId) {
        self.gone
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pid);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn open_paths_calls(&self) -> usize {
        self.open_paths_calls.load(Ordering::SeqCst)
    }

    pub fn user_calls(&self) -> usize {
        self.user_calls.load(Ordering::SeqCst)
    }
}

impl ProcessTable for FakeProcessTable {
    fn list_process_ids(&self) -> Vec<ProcessId> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    fn open_paths_of(&self, pid: ProcessId) -> Result<Vec<PathBuf>, LoggerError> {
        self.open_paths_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .gone
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&pid)
        {
            return Err(LoggerError::ProcessGone(pid));
        }
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pid)
            .map(|p| p.open_paths.clone())
            .ok_or(LoggerError::ProcessGone(pid))
    }

    fn user_of(&self, pid: ProcessId) -> (Option<UserId>, String) {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        let processes = self.processes.lock().unwrap_or_else(PoisonError::into_inner);
        match processes.get(&pid) {
            Some(p) => (
                p.uid,
                p.user_name.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            ),
            None => (None, UNKNOWN.to_string()),
        }
    }
}
