//! Формат строки журнала.
//!
//! `<timestamp> <flags> <path> <pid> <uid> <uname>`
//!
//! Поля разделены одним пробелом. Путь может содержать пробелы, поэтому
//! строка разбирается с обоих концов: два поля слева, три справа.
//! Без атрибуции три правых поля: `unknown unknown unknown`.

use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::LoggerError;
use crate::file_watcher::{AttributedEvent, EventFlags};
use crate::process_table::{ProcessInfo, UNKNOWN};

/// Одна запись журнала.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: String,
    pub flags: EventFlags,
    pub path: PathBuf,
    pub process: Option<ProcessInfo>,
}

impl From<&AttributedEvent> for LogRecord {
    fn from(event: &AttributedEvent) -> Self {
        Self {
            timestamp: event.timestamp.clone(),
            flags: event.raw.flags,
            path: event.raw.path.clone(),
            process: event.process.clone(),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.timestamp,
            self.flags,
            escape(&self.path)
        )?;
        match &self.process {
            Some(info) => {
                let uid = info
                    .uid
                    .map_or_else(|| UNKNOWN.to_string(), |uid| uid.to_string());
                write!(f, " {} {} {}", info.pid, uid, field(&info.user_name))
            }
            None => write!(f, " {UNKNOWN} {UNKNOWN} {UNKNOWN}"),
        }
    }
}

impl FromStr for LogRecord {
    type Err = LoggerError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = || LoggerError::MalformedLogLine(line.to_string());
        let line = line.strip_suffix('\n').unwrap_or(line);

        let mut left = line.splitn(3, ' ');
        let timestamp = left.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let flags: EventFlags = left.next().ok_or_else(malformed)?.parse()?;
        let rest = left.next().ok_or_else(malformed)?;

        let mut right = rest.rsplitn(4, ' ');
        let uname = right.next().ok_or_else(malformed)?;
        let uid = right.next().ok_or_else(malformed)?;
        let pid = right.next().ok_or_else(malformed)?;
        let path = right.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;

        let process = if pid == UNKNOWN {
            None
        } else {
            let pid = pid.parse().map_err(|_| malformed())?;
            let uid = if uid == UNKNOWN {
                None
            } else {
                Some(uid.parse().map_err(|_| malformed())?)
            };
            Some(ProcessInfo {
                pid,
                uid,
                user_name: uname.to_string(),
            })
        };

        Ok(Self {
            timestamp: timestamp.to_string(),
            flags,
            path: unescape(path),
            process,
        })
    }
}

/// Одна запись, одна строка: переводы строк и `\` в пути экранируются.
/// Байты, не образующие UTF-8, пишутся как `\xNN`, поэтому путь
/// восстанавливается побайтно. Вне unix имя берётся через `to_string_lossy`
/// и такие символы заменяются на U+FFFD.
fn escape(path: &Path) -> String {
    let mut out = String::new();
    let raw = path_bytes(path);
    let mut bytes = raw.as_slice();
    loop {
        match std::str::from_utf8(bytes) {
            Ok(text) => {
                push_escaped(&mut out, text);
                break;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                push_escaped(&mut out, &String::from_utf8_lossy(valid));
                let bad = e.error_len().unwrap_or(rest.len());
                for byte in &rest[..bad] {
                    let _ = write!(out, "\\x{byte:02x}");
                }
                bytes = &rest[bad..];
            }
        }
    }
    out
}

fn push_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
}

fn unescape(path: &str) -> PathBuf {
    let mut out = Vec::with_capacity(path.len());
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('r') => out.push(b'\r'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(byte) if hex.len() == 2 => out.push(byte),
                    _ => {
                        out.extend_from_slice(b"\\x");
                        out.extend_from_slice(hex.as_bytes());
                    }
                }
            }
            Some(other) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => out.push(b'\\'),
        }
    }
    path_from_bytes(out)
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

/// Имя пользователя: одно поле: пробельные символы заменяются на `_`.
fn field(value: &str) -> String {
    if value.is_empty() {
        return UNKNOWN.to_string();
    }
    value
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}
