// ABOUTME: Append-only snapshot file sink, plain or gzip-compressed
// ABOUTME: Ordered writes, comments and replay-time progress messages

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{SnapError, SnapResult};
use crate::utils::quote_literal;

/// Extension of a compressed snapshot.
pub const GZIP_EXTENSION: &str = "gz";
/// Extension of a plain snapshot.
pub const SQL_EXTENSION: &str = "sql";

enum Sink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Plain(w) => w as &mut dyn Write,
            Sink::Gzip(w) => w as &mut dyn Write,
        }
    }

    fn finish(self) -> io::Result<()> {
        match self {
            Sink::Plain(mut w) => {
                w.flush()?;
                w.get_ref().sync_all()
            }
            Sink::Gzip(encoder) => {
                let mut inner = encoder.finish()?;
                inner.flush()?;
                inner.get_ref().sync_all()
            }
        }
    }
}

/// Deterministic snapshot location: `{dir}/{base_name}.{gz|sql}`.
pub fn snapshot_path(dir: &Path, base_name: &str, compress: bool) -> PathBuf {
    let ext = if compress { GZIP_EXTENSION } else { SQL_EXTENSION };
    dir.join(format!("{}.{}", base_name, ext))
}

/// Writer for one snapshot file.
///
/// Every write goes straight to the sink in the order issued; the only
/// buffering is the `BufWriter` and whatever gzip needs. Any I/O error is
/// returned immediately as [`SnapError::Output`].
pub struct OutputWriter {
    path: PathBuf,
    sink: Option<Sink>,
    bytes_written: u64,
}

impl OutputWriter {
    /// Create the snapshot file, replacing any previous file at `path`.
    ///
    /// Parent directories are created when missing.
    pub fn open(path: &Path, compress: bool) -> SnapResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                SnapError::output(path, "failed to create output directory", e)
            })?;
        }

        if path.exists() {
            fs::remove_file(path)
                .map_err(|e| SnapError::output(path, "failed to remove previous snapshot", e))?;
        }

        let file = File::create(path)
            .map_err(|e| SnapError::output(path, "failed to create snapshot file", e))?;
        let buffered = BufWriter::new(file);
        let sink = if compress {
            Sink::Gzip(GzEncoder::new(buffered, Compression::default()))
        } else {
            Sink::Plain(buffered)
        };

        tracing::debug!("Opened snapshot file {} (compressed: {})", path.display(), compress);

        Ok(Self {
            path: path.to_path_buf(),
            sink: Some(sink),
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    /// Uncompressed bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn sink(&mut self) -> SnapResult<&mut dyn Write> {
        match self.sink.as_mut() {
            Some(sink) => Ok(sink.writer()),
            None => Err(SnapError::output(
                &self.path,
                "write after close",
                io::Error::new(io::ErrorKind::BrokenPipe, "snapshot writer is closed"),
            )),
        }
    }

    /// Write raw text.
    pub fn write(&mut self, text: &str) -> SnapResult<()> {
        let path = self.path.clone();
        self.sink()?
            .write_all(text.as_bytes())
            .map_err(|e| SnapError::output(&path, "failed to write snapshot", e))?;
        self.bytes_written += text.len() as u64;
        Ok(())
    }

    /// Write text followed by a newline.
    pub fn writeln(&mut self, text: &str) -> SnapResult<()> {
        self.write(text)?;
        self.write("\n")
    }

    /// Write `count` empty lines.
    pub fn new_line(&mut self, count: usize) -> SnapResult<()> {
        self.write(&"\n".repeat(count))
    }

    /// Write an SQL comment; every line of `text` gets the `-- ` prefix.
    pub fn comment(&mut self, text: &str) -> SnapResult<()> {
        for line in text.lines() {
            if line.is_empty() {
                self.writeln("--")?;
            } else {
                self.writeln(&format!("-- {}", line))?;
            }
        }
        Ok(())
    }

    /// Write a statement that prints `text` when the snapshot is replayed.
    pub fn message(&mut self, text: &str) -> SnapResult<()> {
        self.writeln(&format!("SELECT {} AS '';", quote_literal(text)))
    }

    /// Copy a whole file into the snapshot. Returns the number of bytes copied.
    pub fn append_file(&mut self, source: &Path) -> SnapResult<u64> {
        let mut file = File::open(source)
            .map_err(|e| SnapError::output(source, "failed to open file to append", e))?;
        let path = self.path.clone();
        let copied = io::copy(&mut file, self.sink()?)
            .map_err(|e| SnapError::output(&path, "failed to append file to snapshot", e))?;
        self.bytes_written += copied;
        Ok(copied)
    }

    pub fn flush(&mut self) -> SnapResult<()> {
        let path = self.path.clone();
        self.sink()?
            .flush()
            .map_err(|e| SnapError::output(&path, "failed to flush snapshot", e))
    }

    /// Flush, finish compression and close the file. Closing twice is a no-op.
    pub fn close(&mut self) -> SnapResult<()> {
        if let Some(sink) = self.sink.take() {
            sink.finish()
                .map_err(|e| SnapError::output(&self.path, "failed to close snapshot", e))?;
            tracing::debug!(
                "Closed snapshot file {} ({} bytes before compression)",
                self.path.display(),
                self.bytes_written
            );
        }
        Ok(())
    }
}

impl Drop for OutputWriter {
    fn drop(&mut self) {
        // Aborted runs still release the handle; the file itself is left for the caller
        if let Some(sink) = self.sink.take() {
            let _ = sink.finish();
        }
    }
}
