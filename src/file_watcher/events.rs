//! Типы событий file_watcher.
//!
//! `RawEvent` — то, что пришло из потока уведомлений ОС; `AttributedEvent` —
//! то же событие после атрибуции, готовое к записи в журнал.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use bitflags::bitflags;
use chrono::{DateTime, Local};
use notify::event::{CreateKind, MetadataKind, ModifyKind, RemoveKind};
use notify::EventKind;

use crate::error::LoggerError;
use crate::process_table::ProcessInfo;

/// Позиция в потоке событий (курсор возобновления).
pub type EventId = u64;

bitflags! {
    /// Флаги события. Набор повторяет флаги FSEvents, которые имеют смысл
    /// для журнала; на других платформах заполняется из `notify::EventKind`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventFlags: u32 {
        const CREATED           = 1 << 0;
        const REMOVED           = 1 << 1;
        const RENAMED           = 1 << 2;
        const MODIFIED          = 1 << 3;
        const INODE_META_MOD    = 1 << 4;
        const OWNER_CHANGED     = 1 << 5;
        const XATTR_MOD         = 1 << 6;
        const IS_FILE           = 1 << 7;
        const IS_DIR            = 1 << 8;
        const IS_SYMLINK        = 1 << 9;
        const MUST_SCAN_SUBDIRS = 1 << 10;
        const DROPPED           = 1 << 11;
    }
}

/// Человекочитаемые имена флагов в порядке вывода.
const FLAG_NAMES: &[(EventFlags, &str)] = &[
    (EventFlags::CREATED, "Created"),
    (EventFlags::REMOVED, "Removed"),
    (EventFlags::RENAMED, "Renamed"),
    (EventFlags::MODIFIED, "Modified"),
    (EventFlags::INODE_META_MOD, "InodeMetaMod"),
    (EventFlags::OWNER_CHANGED, "OwnerChanged"),
    (EventFlags::XATTR_MOD, "XattrMod"),
    (EventFlags::IS_FILE, "IsFile"),
    (EventFlags::IS_DIR, "IsDir"),
    (EventFlags::IS_SYMLINK, "IsSymlink"),
    (EventFlags::MUST_SCAN_SUBDIRS, "MustScanSubDirs"),
    (EventFlags::DROPPED, "Dropped"),
];

const NO_FLAGS: &str = "None";

impl EventFlags {
    /// Флаги типа объекта (файл / директория / симлинк).
    pub const TYPE_MASK: EventFlags = EventFlags::IS_FILE
        .union(EventFlags::IS_DIR)
        .union(EventFlags::IS_SYMLINK);

    /// Перевести `notify::EventKind` во флаги.
    ///
    /// `None` — уведомление не является изменением (чтение, открытие,
    /// закрытие) и в журнал не попадает.
    pub fn from_kind(kind: &EventKind) -> Option<EventFlags> {
        let flags = match kind {
            EventKind::Create(CreateKind::File) => EventFlags::CREATED | EventFlags::IS_FILE,
            EventKind::Create(CreateKind::Folder) => EventFlags::CREATED | EventFlags::IS_DIR,
            EventKind::Create(_) => EventFlags::CREATED,
            EventKind::Remove(RemoveKind::File) => EventFlags::REMOVED | EventFlags::IS_FILE,
            EventKind::Remove(RemoveKind::Folder) => EventFlags::REMOVED | EventFlags::IS_DIR,
            EventKind::Remove(_) => EventFlags::REMOVED,
            EventKind::Modify(ModifyKind::Name(_)) => EventFlags::RENAMED,
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Ownership)) => {
                EventFlags::OWNER_CHANGED
            }
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Extended)) => {
                EventFlags::XATTR_MOD
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => EventFlags::INODE_META_MOD,
            EventKind::Modify(_) => EventFlags::MODIFIED,
            EventKind::Access(_) => return None,
            EventKind::Any | EventKind::Other => EventFlags::empty(),
        };
        Some(flags)
    }
}

impl fmt::Display for EventFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (flag, name) in FLAG_NAMES {
            if self.contains(*flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str(NO_FLAGS)?;
        }
        Ok(())
    }
}

impl FromStr for EventFlags {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == NO_FLAGS {
            return Ok(EventFlags::empty());
        }
        s.split('|').try_fold(EventFlags::empty(), |acc, part| {
            FLAG_NAMES
                .iter()
                .find(|(_, name)| *name == part)
                .map(|(flag, _)| acc | *flag)
                .ok_or_else(|| LoggerError::MalformedLogLine(format!("unknown event flag: {part}")))
        })
    }
}

/// Одно уведомление из потока ОС.
#[derive(Clone, Debug)]
pub struct RawEvent {
    /// Номер события в потоке; продвигает курсор возобновления.
    pub id: EventId,
    /// Абсолютный путь.
    pub path: PathBuf,
    pub flags: EventFlags,
    /// Момент получения уведомления.
    pub observed_at: DateTime<Local>,
}

/// Событие после атрибуции.
#[derive(Clone, Debug)]
pub struct AttributedEvent {
    pub raw: RawEvent,
    /// `None`: атрибуция не удалась или выключена.
    pub process: Option<ProcessInfo>,
    /// Отформатированное время события.
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, RenameMode};

    #[test]
    fn test_flags_display_joins_names_in_fixed_order() {
        let flags = EventFlags::IS_FILE | EventFlags::MODIFIED | EventFlags::CREATED;
        assert_eq!(flags.to_string(), "Created|Modified|IsFile");
    }

    #[test]
    fn test_empty_flags_render_as_none() {
        assert_eq!(EventFlags::empty().to_string(), "None");
        assert_eq!("None".parse::<EventFlags>().unwrap(), EventFlags::empty());
    }

    #[test]
    fn test_flags_parse_rejects_unknown_name() {
        let err = "Created|Exploded".parse::<EventFlags>().unwrap_err();
        assert!(err.to_string().contains("Exploded"));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            EventFlags::from_kind(&EventKind::Create(CreateKind::File)),
            Some(EventFlags::CREATED | EventFlags::IS_FILE)
        );
        assert_eq!(
            EventFlags::from_kind(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(EventFlags::MODIFIED)
        );
        assert_eq!(
            EventFlags::from_kind(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))),
            Some(EventFlags::RENAMED)
        );
        assert_eq!(
            EventFlags::from_kind(&EventKind::Modify(ModifyKind::Metadata(
                MetadataKind::Ownership
            ))),
            Some(EventFlags::OWNER_CHANGED)
        );
        assert_eq!(
            EventFlags::from_kind(&EventKind::Remove(RemoveKind::Folder)),
            Some(EventFlags::REMOVED | EventFlags::IS_DIR)
        );
    }

    #[test]
    fn test_access_events_are_not_mutations() {
        assert_eq!(EventFlags::from_kind(&EventKind::Access(AccessKind::Any)), None);
    }
}
