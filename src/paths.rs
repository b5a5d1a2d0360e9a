//! Перечисление директорий для подписки.
//!
//! Поток уведомлений следит за директориями и сообщает о файлах внутри них,
//! поэтому здесь собираются только директории, не файлы.

use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

use crate::error::LoggerError;

/// Проверить папку наблюдения и привести путь к каноническому виду.
///
/// `InvalidPath`, если папки нет или это не директория.
pub fn validate_folder(folder: &Path) -> Result<PathBuf, LoggerError> {
    let canonical = folder
        .canonicalize()
        .map_err(|_| LoggerError::InvalidPath(folder.to_path_buf()))?;
    if !canonical.is_dir() {
        return Err(LoggerError::InvalidPath(folder.to_path_buf()));
    }
    Ok(canonical)
}

/// Директории для подписки.
///
/// - `recursive = true`: каждая папка и все её поддиректории. Папка, вложенная
///   в другую папку из списка, отбрасывается, её покрывает внешняя.
/// - `recursive = false`: только сами папки (убираются лишь точные дубли).
///
/// Порядок: корни в порядке входа, потомки, по имени.
pub fn enumerate<P: AsRef<Path>>(folders: &[P], recursive: bool) -> Result<Vec<PathBuf>, LoggerError> {
    let mut roots: Vec<PathBuf> = Vec::with_capacity(folders.len());

    for folder in folders {
        let canonical = validate_folder(folder.as_ref())?;

        if recursive {
            if roots.iter().any(|root| canonical.starts_with(root)) {
                debug!("{} is covered by another watched folder", canonical.display());
                continue;
            }
            // Новая папка может оказаться внешней для уже принятых.
            roots.retain(|root| !root.starts_with(&canonical));
        } else if roots.contains(&canonical) {
            continue;
        }
        roots.push(canonical);
    }

    if !recursive {
        return Ok(roots);
    }

    let mut paths = Vec::new();
    for root in &roots {
        paths.extend(descendant_dirs(root));
    }
    Ok(paths)
}

/// Директория и все её поддиректории (симлинки не раскрываются).
pub(crate) fn descendant_dirs(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping unreadable entry under {}: {e}", root.display());
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .map(walkdir::DirEntry::into_path)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::create_dir_all(root.join("d")).unwrap();
        fs::write(root.join("a/file.txt"), b"x").unwrap();
        (temp, root)
    }

    #[test]
    fn test_recursive_yields_directories_only() {
        let (_temp, root) = tree();
        let paths = enumerate(&[&root], true).unwrap();

        assert_eq!(
            paths,
            vec![
                root.clone(),
                root.join("a"),
                root.join("a/b"),
                root.join("a/b/c"),
                root.join("d"),
            ]
        );
    }

    #[test]
    fn test_single_level_yields_root_only() {
        let (_temp, root) = tree();
        assert_eq!(enumerate(&[&root], false).unwrap(), vec![root]);
    }

    #[test]
    fn test_nested_inputs_are_watched_once_at_outer_level() {
        let (_temp, root) = tree();
        // Вложенная папка идёт первой, внешняя, второй: итог тот же.
        let paths = enumerate(&[root.join("a/b"), root.clone(), root.join("a")], true).unwrap();

        let unique: HashSet<_> = paths.iter().collect();
        assert_eq!(unique.len(), paths.len(), "duplicate watch paths: {paths:?}");
        assert_eq!(paths[0], root);
        assert_eq!(paths.len(), 5);
    }

    #[test]
    fn test_single_level_keeps_nested_roots_but_drops_duplicates() {
        let (_temp, root) = tree();
        let paths = enumerate(&[root.clone(), root.join("a"), root.clone()], false).unwrap();
        assert_eq!(paths, vec![root.clone(), root.join("a")]);
    }

    #[test]
    fn test_missing_folder_is_invalid_path() {
        let (_temp, root) = tree();
        let missing = root.join("nope");
        let err = enumerate(&[&missing], true).unwrap_err();
        assert!(matches!(err, LoggerError::InvalidPath(p) if p == missing));
    }

    #[test]
    fn test_file_is_not_a_folder() {
        let (_temp, root) = tree();
        let err = validate_folder(&root.join("a/file.txt")).unwrap_err();
        assert!(matches!(err, LoggerError::InvalidPath(_)));
    }
}
