//! Таблица процессов поверх `sysinfo`. Открытые файлы: `/proc/<pid>/fd` на Linux,
//! `libproc` на macOS.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use log::trace;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind, Users};

use super::{ProcessId, ProcessTable, UserId, UNKNOWN};
use crate::error::LoggerError;

/// Реальная таблица процессов ОС.
pub struct SystemProcessTable {
    system: Mutex<System>,
    users: Mutex<Users>,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            users: Mutex::new(Users::new_with_refreshed_list()),
        }
    }

    fn user_name(&self, uid: UserId) -> String {
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        let find = |users: &Users| {
            users
                .list()
                .iter()
                .find(|u| **u.id() == uid)
                .map(|u| u.name().to_string())
        };

        if let Some(name) = find(&users) {
            return name;
        }
        // Пользователь мог появиться после старта, перечитываем список один раз.
        *users = Users::new_with_refreshed_list();
        find(&users).unwrap_or_else(|| UNKNOWN.to_string())
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn list_process_ids(&self) -> Vec<ProcessId> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );

        let mut pids: Vec<ProcessId> = system.processes().keys().map(|pid| pid.as_u32()).collect();
        pids.sort_unstable();
        trace!("Process table snapshot: {} pids", pids.len());
        pids
    }

    fn open_paths_of(&self, pid: ProcessId) -> Result<Vec<PathBuf>, LoggerError> {
        open_paths(pid)
    }

    fn user_of(&self, pid: ProcessId) -> (Option<UserId>, String) {
        let uid = {
            let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
            let sys_pid = Pid::from_u32(pid);
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[sys_pid]),
                true,
                ProcessRefreshKind::nothing().with_user(UpdateKind::OnlyIfNotSet),
            );
            system
                .process(sys_pid)
                .and_then(|process| process.user_id())
                .map(|uid| **uid)
        };

        match uid {
            Some(uid) => (Some(uid), self.user_name(uid)),
            None => (None, UNKNOWN.to_string()),
        }
    }
}

#[cfg(target_os = "linux")]
fn open_paths(pid: ProcessId) -> Result<Vec<PathBuf>, LoggerError> {
    use std::io::ErrorKind;

    const DELETED_SUFFIX: &str = " (deleted)";

    let fd_dir = PathBuf::from(format!("/proc/{pid}/fd"));
    let entries = match std::fs::read_dir(&fd_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(LoggerError::ProcessGone(pid)),
        Err(e) => {
            // Чужие процессы без прав: просто не видим их дескрипторы.
            trace!("Cannot read {}: {e}", fd_dir.display());
            return Ok(Vec::new());
        }
    };

    let mut paths = Vec::new();
    for entry in entries.flatten() {
        // Дескриптор мог закрыться между read_dir и read_link.
        let Ok(target) = std::fs::read_link(entry.path()) else {
            continue;
        };
        // socket:[…], pipe:[…], anon_inode:…: не пути файловой системы.
        if !target.is_absolute() {
            continue;
        }
        let target = match target.to_str().and_then(|s| s.strip_suffix(DELETED_SUFFIX)) {
            Some(stripped) => PathBuf::from(stripped),
            None => target,
        };
        paths.push(target);
    }

    if paths.is_empty() && !PathBuf::from(format!("/proc/{pid}")).exists() {
        return Err(LoggerError::ProcessGone(pid));
    }
    Ok(paths)
}

#[cfg(target_os = "macos")]
fn open_paths(process_id: ProcessId) -> Result<Vec<PathBuf>, LoggerError> {
    use libproc::libproc::bsd_info::BSDInfo;
    use libproc::libproc::file_info::{pidfdinfo, ListFDs, ProcFDType, VnodeFdInfoWithPath};
    use libproc::libproc::proc_pid::{listpidinfo, pidinfo};

    let Ok(pid) = i32::try_from(process_id) else {
        return Err(LoggerError::ProcessGone(process_id));
    };
    let info = pidinfo::<BSDInfo>(pid, 0).map_err(|_| LoggerError::ProcessGone(process_id))?;
    let fds = match listpidinfo::<ListFDs>(pid, info.pbi_nfiles as usize) {
        Ok(fds) => fds,
        Err(e) => {
            // Чужие процессы без прав: просто не видим их дескрипторы.
            trace!("Cannot list descriptors of pid {pid}: {e}");
            return Ok(Vec::new());
        }
    };

    let mut paths = Vec::new();
    for fd in fds {
        if !matches!(ProcFDType::from(fd.proc_fdtype), ProcFDType::VNode) {
            continue;
        }
        // Дескриптор мог закрыться между перечислением и запросом.
        let Ok(vnode) = pidfdinfo::<VnodeFdInfoWithPath>(pid, fd.proc_fd) else {
            continue;
        };
        let bytes: Vec<u8> = vnode
            .pvip
            .vip_path
            .iter()
            .flatten()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        if !bytes.is_empty() {
            paths.push(PathBuf::from(String::from_utf8_lossy(&bytes).into_owned()));
        }
    }
    Ok(paths)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn open_paths(pid: ProcessId) -> Result<Vec<PathBuf>, LoggerError> {
    use std::sync::Once;

    static WARN_ONCE: Once = Once::new();
    WARN_ONCE.call_once(|| {
        log::warn!("Open files of other processes are not available on this platform, events stay unattributed");
    });
    trace!("Open files of pid {pid} are not available");
    Ok(Vec::new())
}
