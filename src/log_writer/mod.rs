//! Запись событий в журнал.
//!
//! Файл журнала принадлежит одному фоновому потоку, который разбирает
//! FIFO-очередь команд. Асинхронная запись только ставит строку в очередь;
//! синхронная становится в ту же очередь и ждёт подтверждения записи и flush,
//! поэтому она упорядочена после всех ранее поставленных записей.
//!
//! Ошибки асинхронной записи уходят в [`DiagnosticSink`]: наблюдение из-за них
//! не останавливается.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use log::{debug, error};

use crate::error::LoggerError;
use crate::file_watcher::AttributedEvent;

mod record;

pub use record::LogRecord;

/// Канал диагностики: сюда сообщаются ошибки, которые не прерывают работу.
pub type DiagnosticSink = Arc<dyn Fn(&LoggerError) + Send + Sync>;

/// Канал диагностики по умолчанию: `log::error!`.
pub fn log_diagnostics() -> DiagnosticSink {
    Arc::new(|err: &LoggerError| {
        error!(target: "fslogger_rust::log_writer", "{err}");
    })
}

type Ack = mpsc::Sender<Result<(), LoggerError>>;

enum Command {
    Write { line: String, ack: Option<Ack> },
    Flush { ack: Ack },
}

/// Писатель журнала с фоновым потоком.
pub struct LogWriter {
    tx: Mutex<Option<mpsc::Sender<Command>>>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
    diagnostics: DiagnosticSink,
}

impl LogWriter {
    /// Открыть файл журнала: создаётся при отсутствии, иначе дописывается.
    pub fn open(path: &Path, diagnostics: DiagnosticSink) -> Result<Self, LoggerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        debug!("Log file opened: {}", path.display());
        Ok(Self::from_writer(Box::new(file), diagnostics))
    }

    /// Писатель поверх произвольного `Write` (тесты, нестандартные приёмники).
    pub fn from_writer(writer: Box<dyn Write + Send>, diagnostics: DiagnosticSink) -> Self {
        let (tx, rx) = mpsc::channel::<Command>();
        let sink = diagnostics.clone();
        let join = thread::Builder::new()
            .name("fslogger-log-writer".to_string())
            .spawn(move || run_writer(writer, &rx, &sink))
            .map_err(|e| error!("Failed to spawn log writer thread: {e}"))
            .ok();

        Self {
            tx: Mutex::new(join.as_ref().map(|_| tx)),
            join: Mutex::new(join),
            diagnostics,
        }
    }

    /// Записать событие одной строкой.
    pub fn write(&self, event: &AttributedEvent, asynchronous: bool) -> Result<(), LoggerError> {
        self.write_message(&LogRecord::from(event).to_string(), asynchronous)
    }

    /// Дописать произвольное сообщение (перевод строки добавляется).
    ///
    /// `asynchronous = false`: возврат только после записи и flush.
    pub fn write_message(&self, message: &str, asynchronous: bool) -> Result<(), LoggerError> {
        let mut line = String::with_capacity(message.len() + 1);
        line.push_str(message.trim_end_matches('\n'));
        line.push('\n');

        if asynchronous {
            return self.send(Command::Write { line, ack: None });
        }
        let (ack, done) = mpsc::channel();
        self.send(Command::Write {
            line,
            ack: Some(ack),
        })?;
        done.recv().map_err(|_| LoggerError::log_write_closed())?
    }

    /// Дождаться записи всего, что уже в очереди.
    pub fn flush(&self) -> Result<(), LoggerError> {
        let (ack, done) = mpsc::channel();
        self.send(Command::Flush { ack })?;
        done.recv().map_err(|_| LoggerError::log_write_closed())?
    }

    /// Дописать очередь, сбросить буферы и закрыть файл. Повторный вызов - no-op.
    pub fn close(&self) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        // Закрытый канал служит потоку сигналом: дочитать очередь и выйти.
        drop(tx);
        let join = self.join.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(join) = join {
            if join.join().is_err() {
                error!("Log writer thread panicked");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    pub fn diagnostics(&self) -> &DiagnosticSink {
        &self.diagnostics
    }

    fn send(&self, command: Command) -> Result<(), LoggerError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or_else(LoggerError::log_write_closed)?;
        tx.send(command).map_err(|_| LoggerError::log_write_closed())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_writer(
    mut writer: Box<dyn Write + Send>,
    rx: &mpsc::Receiver<Command>,
    diagnostics: &DiagnosticSink,
) {
    for command in rx {
        match command {
            Command::Write { line, ack } => {
                let result = writer
                    .write_all(line.as_bytes())
                    .and_then(|()| if ack.is_some() { writer.flush() } else { Ok(()) })
                    .map_err(LoggerError::LogWriteError);
                match ack {
                    Some(ack) => {
                        let _ = ack.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            diagnostics(&err);
                        }
                    }
                }
            }
            Command::Flush { ack } => {
                let _ = ack.send(writer.flush().map_err(LoggerError::LogWriteError));
            }
        }
    }

    if let Err(e) = writer.flush() {
        diagnostics(&LoggerError::LogWriteError(e));
    }
    debug!("Log writer thread finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Пишет в общий буфер, содержимое видно из теста.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    /// Устройство, которое отвергает любую запись.
    struct BrokenDevice;

    impl Write for BrokenDevice {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device removed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn counting_sink() -> (DiagnosticSink, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sink: DiagnosticSink = Arc::new(move |_err: &LoggerError| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (sink, count)
    }

    #[test]
    fn test_async_writes_keep_fifo_order() {
        let buffer = SharedBuffer::default();
        let writer = LogWriter::from_writer(Box::new(buffer.clone()), log_diagnostics());

        for i in 0..100 {
            writer.write_message(&format!("line {i}"), true).unwrap();
        }
        writer.flush().unwrap();

        let expected: String = (0..100).map(|i| format!("line {i}\n")).collect();
        assert_eq!(buffer.text(), expected);
    }

    #[test]
    fn test_sync_write_is_ordered_after_queued_async_writes() {
        let buffer = SharedBuffer::default();
        let writer = LogWriter::from_writer(Box::new(buffer.clone()), log_diagnostics());

        writer.write_message("first", true).unwrap();
        writer.write_message("second", true).unwrap();
        writer.write_message("third\n", false).unwrap();

        // Синхронная запись вернулась, значит всё до неё уже записано.
        assert_eq!(buffer.text(), "first\nsecond\nthird\n");
    }

    #[test]
    fn test_sync_write_error_is_returned() {
        let (sink, count) = counting_sink();
        let writer = LogWriter::from_writer(Box::new(BrokenDevice), sink);

        let err = writer.write_message("x", false).unwrap_err();
        assert!(matches!(err, LoggerError::LogWriteError(_)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_async_write_error_goes_to_diagnostics() {
        let (sink, count) = counting_sink();
        let writer = LogWriter::from_writer(Box::new(BrokenDevice), sink);

        writer.write_message("a", true).unwrap();
        writer.write_message("b", true).unwrap();
        writer.flush().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_later_writes() {
        let buffer = SharedBuffer::default();
        let writer = LogWriter::from_writer(Box::new(buffer.clone()), log_diagnostics());
        writer.write_message("pending", true).unwrap();

        writer.close();
        writer.close();

        assert!(writer.is_closed());
        assert_eq!(buffer.text(), "pending\n");
        assert!(matches!(
            writer.write_message("late", true),
            Err(LoggerError::LogWriteError(_))
        ));
    }

    #[test]
    fn test_open_appends_to_existing_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("logs").join("fslogger.log");

        let writer = LogWriter::open(&path, log_diagnostics()).unwrap();
        writer.write_message("one", false).unwrap();
        writer.close();

        let writer = LogWriter::open(&path, log_diagnostics()).unwrap();
        writer.write_message("two", false).unwrap();
        writer.close();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }
}
