//! Снимок таблицы процессов.
//!
//! Доступ к ОС спрятан за трейтом [`ProcessTable`]: атрибуция и watcher
//! работают с `Arc<dyn ProcessTable>`, а тесты подставляют
//! [`FakeProcessTable`] вместо живой таблицы процессов.

use std::path::PathBuf;

use crate::error::LoggerError;

mod fake;
mod system;

pub use fake::FakeProcessTable;
pub use system::SystemProcessTable;

/// Идентификатор процесса. Переиспользуется ОС и не годится как долгоживущий ключ.
pub type ProcessId = u32;

/// Идентификатор пользователя.
pub type UserId = u32;

/// Маркер неразрешённого значения (имя пользователя, uid, вся атрибуция).
pub const UNKNOWN: &str = "unknown";

/// Процесс, которому приписано событие.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: ProcessId,
    /// `None`, если владельца процесса определить не удалось.
    pub uid: Option<UserId>,
    /// Имя пользователя или [`UNKNOWN`].
    pub user_name: String,
}

/// Доступ к таблице процессов ОС.
///
/// Результаты не кешируются: каждое обращение, свежий запрос.
pub trait ProcessTable: Send + Sync {
    /// Все видимые процессы в порядке возрастания pid.
    ///
    /// Без прав на привилегированные процессы список будет неполным; полный
    /// отказ ОС даёт пустой список. Ни то, ни другое не ошибка.
    fn list_process_ids(&self) -> Vec<ProcessId>;

    /// Пути, открытые процессом сейчас (файлы и директории).
    ///
    /// Дорогой вызов, делать только по требованию.
    /// `Err(LoggerError::ProcessGone)`: процесс завершился после перечисления.
    fn open_paths_of(&self, pid: ProcessId) -> Result<Vec<PathBuf>, LoggerError>;

    /// Владелец процесса. Никогда не падает: неразрешённое имя: [`UNKNOWN`].
    fn user_of(&self, pid: ProcessId) -> (Option<UserId>, String);
}
