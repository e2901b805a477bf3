//! Async adapters for PTY I/O.
//!
//! These adapters convert blocking PTY read/write operations into
//! async-friendly channel-based communication. The blocking loops run on
//! their own threads, outside the tokio runtime.

use std::io::{Read, Write};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

/// Async reader for PTY output.
///
/// Runs on its own thread and sends output chunks through a channel.
pub struct AsyncPtyReader<R: Read + Send + 'static> {
    reader: R,
    tx: mpsc::Sender<Vec<u8>>,
    buffer_size: usize,
}

impl<R: Read + Send + 'static> AsyncPtyReader<R> {
    /// Create a new AsyncPtyReader.
    ///
    /// # Arguments
    ///
    /// * `reader` - The PTY reader (blocking).
    /// * `tx` - Channel sender for output data.
    pub fn new(reader: R, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            reader,
            tx,
            buffer_size: 4096,
        }
    }

    /// Create with custom buffer size.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Start the reader loop on a dedicated thread.
    ///
    /// A shell can live for hours, so the loop never occupies a slot of
    /// tokio's blocking pool. The thread ends when:
    /// - The PTY is closed (read returns 0 or EIO)
    /// - The channel is closed (receiver dropped)
    /// - An unrecoverable error occurs
    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("pty-reader".to_string())
            .spawn(move || self.read_loop())
    }

    fn read_loop(self) {
        let mut reader = self.reader;
        let tx = self.tx;
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!("PTY reader: EOF");
                    break;
                }
                Ok(n) => {
                    trace!("PTY reader: read {} bytes", n);
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        debug!("PTY reader: channel closed");
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // EIO on Unix means the PTY slave was closed
                    #[cfg(unix)]
                    if e.raw_os_error() == Some(libc::EIO) {
                        debug!("PTY reader: PTY closed (EIO)");
                        break;
                    }

                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        debug!("PTY reader: broken pipe");
                        break;
                    }

                    error!("PTY reader error: {}", e);
                    break;
                }
            }
        }
    }
}

/// Async writer for PTY input.
///
/// Receives data through a channel and writes to the PTY on its own
/// thread, in the order it was queued.
pub struct AsyncPtyWriter<W: Write + Send + 'static> {
    writer: W,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl<W: Write + Send + 'static> AsyncPtyWriter<W> {
    /// Create a new AsyncPtyWriter.
    ///
    /// # Arguments
    ///
    /// * `writer` - The PTY writer (blocking).
    /// * `rx` - Channel receiver for input data.
    pub fn new(writer: W, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { writer, rx }
    }

    /// Start the writer loop on a dedicated thread.
    ///
    /// The thread ends when the channel is closed (all senders dropped) or
    /// the PTY stops accepting input, and yields the writer so callers can
    /// inspect what was written.
    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<W>> {
        thread::Builder::new()
            .name("pty-writer".to_string())
            .spawn(move || self.write_loop())
    }

    fn write_loop(self) -> W {
        let mut writer = self.writer;
        let mut rx = self.rx;

        while let Some(data) = rx.blocking_recv() {
            trace!("PTY writer: writing {} bytes", data.len());
            if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                if e.kind() == std::io::ErrorKind::BrokenPipe {
                    debug!("PTY writer: broken pipe");
                } else {
                    error!("PTY writer error: {}", e);
                }
                break;
            }
        }
        debug!("PTY writer: channel closed");
        writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    #[tokio::test]
    async fn test_async_reader_basic() {
        let data = b"Hello, World!\nTest line 2\n";
        let cursor = Cursor::new(data.to_vec());

        let (tx, mut rx) = mpsc::channel(32);
        let reader = AsyncPtyReader::new(cursor, tx).with_buffer_size(8);

        let handle = reader.spawn().unwrap();

        let mut received = Vec::new();
        while let Ok(Some(chunk)) =
            tokio::time::timeout(Duration::from_millis(500), rx.recv()).await
        {
            received.extend(chunk);
        }

        handle.join().unwrap();
        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn test_async_reader_empty() {
        let cursor = Cursor::new(Vec::new());
        let (tx, mut rx) = mpsc::channel(32);
        let reader = AsyncPtyReader::new(cursor, tx);

        let handle = reader.spawn().unwrap();

        let result = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(result.is_ok());
        assert!(result.unwrap().is_none()); // Channel closed, no data

        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_async_writer_preserves_order() {
        let (tx, rx) = mpsc::channel(32);
        let writer = AsyncPtyWriter::new(Vec::new(), rx);

        tx.send(b"echo ".to_vec()).await.unwrap();
        tx.send(b"one; ".to_vec()).await.unwrap();
        tx.send(b"echo two\n".to_vec()).await.unwrap();
        drop(tx);

        let handle = writer.spawn().unwrap();
        let written = tokio::task::spawn_blocking(move || handle.join().unwrap())
            .await
            .unwrap();
        assert_eq!(written, b"echo one; echo two\n");
    }

    #[tokio::test]
    async fn test_reader_channel_closed() {
        let data = b"Some data that won't be fully read";
        let cursor = Cursor::new(data.to_vec());

        let (tx, rx) = mpsc::channel(1);
        let reader = AsyncPtyReader::new(cursor, tx);

        drop(rx);

        let handle = reader.spawn().unwrap();
        assert!(handle.join().is_ok());
    }

    #[test]
    fn test_loops_run_on_named_threads() {
        struct ThreadName(std::sync::Arc<std::sync::Mutex<Option<String>>>);

        impl Read for ThreadName {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                *self.0.lock().unwrap() = thread::current().name().map(str::to_string);
                Ok(0)
            }
        }

        let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        let (tx, _rx) = mpsc::channel(1);
        AsyncPtyReader::new(ThreadName(seen.clone()), tx)
            .spawn()
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("pty-reader"));
    }
}
