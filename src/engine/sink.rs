use super::LogRecord;
use super::pattern::{DEFAULT_PATTERN, Formatter, PatternCompiler};
use crate::models::{RotationSpec, WriterDescriptor};
use crate::state::{StatusEvent, StatusLog};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::io::{self, BufWriter, Write};
use std::sync::Arc;
use thiserror::Error;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Shared handle to a sink. Sinks are identified by name, not by pointer.
pub type SinkRef = Arc<Sink>;

/// Errors that can occur while opening a sink destination
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("destination {0} has no file name")]
    NoFileName(Utf8PathBuf),

    #[error("failed to prepare directory {path}: {source}")]
    Directory {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open rolling file: {0}")]
    Rolling(#[from] tracing_appender::rolling::InitError),
}

/// Verdict of a [`SinkFilter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReply {
    /// Write the record, skipping the remaining filters
    Accept,
    /// No opinion; ask the next filter
    Neutral,
    /// Drop the record
    Deny,
}

/// Filter attached to one or more named sinks.
pub trait SinkFilter: Send + Sync {
    fn decide(&self, record: &LogRecord) -> FilterReply;
    fn start(&self) {}
    fn stop(&self) {}
}

/// Contributes a header prefix to every line written by the sinks it targets.
pub trait HeaderProcessor: Send + Sync {
    fn header(&self, record: &LogRecord) -> Option<String>;
    fn start(&self) {}
    fn stop(&self) {}
}

/// Where a sink's formatted lines end up.
pub trait RecordWriter: Send {
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes lines to standard output
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleWriter;

impl RecordWriter for ConsoleWriter {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        write_terminated(&mut out, line)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().lock().flush()
    }
}

/// Writes lines to a rolling file through `tracing-appender`.
///
/// Time-based rotation and the rotation count map directly onto
/// [`RollingFileAppender`]. It has no size trigger, so size-based specs roll
/// daily and the size is only kept in the descriptor.
pub struct FileWriter {
    inner: Box<dyn Write + Send>,
    path: Utf8PathBuf,
}

impl FileWriter {
    pub fn open(descriptor: &WriterDescriptor) -> Result<Self, SinkError> {
        let Some(path) = descriptor.path.clone() else {
            return Err(SinkError::NoFileName(Utf8PathBuf::from(&descriptor.name)));
        };
        let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(SinkError::NoFileName(path));
        };

        std::fs::create_dir_all(dir).map_err(|source| SinkError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;

        let rotation = match descriptor.rotation {
            RotationSpec::Minutely => Rotation::MINUTELY,
            RotationSpec::Hourly => Rotation::HOURLY,
            RotationSpec::Daily => Rotation::DAILY,
            RotationSpec::Never => Rotation::NEVER,
            RotationSpec::Size(bytes) => {
                tracing::debug!(
                    path = %path,
                    bytes,
                    "Size-based rotation is not supported by the file backend, rolling daily"
                );
                Rotation::DAILY
            }
        };

        let mut builder = RollingFileAppender::builder()
            .rotation(rotation)
            .filename_prefix(file_name);
        if descriptor.rotation_count > 0 {
            builder = builder.max_log_files(descriptor.rotation_count);
        }
        let appender = builder.build(dir)?;

        let inner: Box<dyn Write + Send> = if descriptor.buffered {
            Box::new(BufWriter::new(appender))
        } else {
            Box::new(appender)
        };

        Ok(Self { inner, path })
    }

    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }
}

impl RecordWriter for FileWriter {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        write_terminated(&mut self.inner, line)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Keeps lines in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryWriter {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl RecordWriter for MemoryWriter {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.lines.lock().push(line.trim_end_matches('\n').to_string());
        Ok(())
    }
}

fn write_terminated<W: Write + ?Sized>(out: &mut W, line: &str) -> io::Result<()> {
    out.write_all(line.as_bytes())?;
    if !line.ends_with('\n') {
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// A named output destination with its formatter, filters and header processors.
///
/// Filters and header processors are keyed by collaborator id so re-attaching the
/// same collaborator replaces it instead of stacking a duplicate.
pub struct Sink {
    name: String,
    writer: Mutex<Box<dyn RecordWriter>>,
    formatter: RwLock<Formatter>,
    filters: RwLock<IndexMap<String, Arc<dyn SinkFilter>>>,
    headers: RwLock<IndexMap<String, Arc<dyn HeaderProcessor>>>,
}

impl Sink {
    pub fn new(name: impl Into<String>, writer: impl RecordWriter + 'static, formatter: Formatter) -> Self {
        Self::with_boxed_writer(name, Box::new(writer), formatter)
    }

    pub fn with_boxed_writer(
        name: impl Into<String>,
        writer: Box<dyn RecordWriter>,
        formatter: Formatter,
    ) -> Self {
        Self {
            name: name.into(),
            writer: Mutex::new(writer),
            formatter: RwLock::new(formatter),
            filters: RwLock::new(IndexMap::new()),
            headers: RwLock::new(IndexMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filter, decorate, format and write one record. Returns whether it was written.
    pub fn append(&self, record: &LogRecord) -> bool {
        for filter in self.filters.read().values() {
            match filter.decide(record) {
                FilterReply::Deny => return false,
                FilterReply::Accept => break,
                FilterReply::Neutral => {}
            }
        }

        let mut line = String::new();
        for header in self.headers.read().values() {
            if let Some(text) = header.header(record) {
                line.push_str(&text);
                line.push(' ');
            }
        }
        line.push_str(&self.formatter.read().format(record));

        match self.writer.lock().write_line(&line) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(sink = %self.name, error = %e, "Failed to write log record");
                false
            }
        }
    }

    pub fn flush(&self) {
        if let Err(e) = self.writer.lock().flush() {
            tracing::warn!(sink = %self.name, error = %e, "Failed to flush sink");
        }
    }

    pub fn set_formatter(&self, formatter: Formatter) {
        *self.formatter.write() = formatter;
    }

    pub fn add_filter(&self, id: &str, filter: Arc<dyn SinkFilter>) {
        self.filters.write().insert(id.to_string(), filter);
    }

    pub fn remove_filter(&self, id: &str) -> bool {
        self.filters.write().shift_remove(id).is_some()
    }

    pub fn filter_ids(&self) -> Vec<String> {
        self.filters.read().keys().cloned().collect()
    }

    pub fn add_header(&self, id: &str, header: Arc<dyn HeaderProcessor>) {
        self.headers.write().insert(id.to_string(), header);
    }

    pub fn remove_header(&self, id: &str) -> bool {
        self.headers.write().shift_remove(id).is_some()
    }

    pub fn header_ids(&self) -> Vec<String> {
        self.headers.read().keys().cloned().collect()
    }

    /// Drop every filter and header processor
    pub fn clear_collaborators(&self) {
        self.filters.write().clear();
        self.headers.write().clear();
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("name", &self.name)
            .field("filters", &self.filter_ids())
            .field("headers", &self.header_ids())
            .finish()
    }
}

/// Builds sinks from writer descriptors.
///
/// Never fails: a pattern with bad keywords still compiles, and a file that cannot
/// be opened degrades to the console. Both are recorded in the status log so the
/// problem is visible without output going silent.
pub struct SinkFactory {
    compiler: Arc<dyn PatternCompiler>,
    status: Arc<StatusLog>,
}

impl SinkFactory {
    pub fn new(compiler: Arc<dyn PatternCompiler>, status: Arc<StatusLog>) -> Self {
        Self { compiler, status }
    }

    pub fn build(&self, name: &str, descriptor: &WriterDescriptor, pattern: Option<&str>) -> SinkRef {
        let compiled = self.compiler.compile(pattern.unwrap_or(DEFAULT_PATTERN));
        for error in &compiled.errors {
            tracing::warn!(sink = name, error = %error, "Pattern keyword could not be resolved");
            self.status.record(StatusEvent::PatternError {
                sink: name.to_string(),
                message: error.to_string(),
            });
        }

        let writer: Box<dyn RecordWriter> = if descriptor.is_console() {
            Box::new(ConsoleWriter)
        } else {
            match FileWriter::open(descriptor) {
                Ok(writer) => Box::new(writer),
                Err(e) => {
                    tracing::error!(sink = name, error = %e, "Sink destination unavailable, writing to console");
                    self.status.record(StatusEvent::SinkUnavailable {
                        sink: name.to_string(),
                        error: e.to_string(),
                    });
                    Box::new(ConsoleWriter)
                }
            }
        };

        Arc::new(Sink::with_boxed_writer(name, writer, compiled.formatter))
    }
}
