//! Streaming record writer.
//!
//! Records are serialized, length-delimited and pushed through one of a
//! fixed set of chains chosen at construction:
//!
//! ```text
//! serialize → frame → [BufWriter] → [ParallelGzWriter] → file
//! serialize → frame → ChannelSink → consumer
//! ```

use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub mod channel;
pub mod compress;
pub mod framing;


pub use channel::{ChannelSink, Records};
pub use compress::ParallelGzWriter;
pub use framing::{RecordReader, frame};

pub const FILE_EXTENSION: &str = "ncap";
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024 * 1024;
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Destination a record is finalized into.
pub trait RecordSink<R: ?Sized>: Send + Sync {
    fn write_record(&self, record: &R) -> Result<()>;
}

/// First record of every output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub record_type: String,
    pub source: String,
    pub version: String,
    pub includes_payloads: bool,
    pub created: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Write `<dir>/<name>.ncap[.gz]`.
    File { dir: PathBuf },
    /// Hand framed records to a bounded queue.
    Channel { capacity: usize },
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub name: String,
    pub output: Output,
    pub buffer: bool,
    pub compress: bool,
    pub compression_level: u32,
    pub compression_block_size: usize,
    pub compression_workers: usize,
    pub mem_buffer_size: usize,
    pub source: String,
    pub version: String,
    pub includes_payloads: bool,
    pub start_time: f64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            name: crate::profile::PROFILE_RECORD_TYPE.to_string(),
            output: Output::File {
                dir: PathBuf::from("."),
            },
            buffer: true,
            compress: true,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            compression_block_size: DEFAULT_BLOCK_SIZE,
            compression_workers: compress::default_workers(),
            mem_buffer_size: DEFAULT_BUFFER_SIZE,
            source: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            includes_payloads: false,
            start_time: 0.0,
        }
    }
}

impl WriterConfig {
    pub fn file(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: Output::File { dir: dir.into() },
            ..Default::default()
        }
    }

    /// Channel output. Buffering and compression are switched off, since
    /// neither applies to queued records.
    pub fn channel(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            output: Output::Channel { capacity },
            buffer: false,
            compress: false,
            ..Default::default()
        }
    }

    pub fn with_buffer(mut self, buffer: bool) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.mem_buffer_size = size;
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.compression_block_size = block_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.compression_workers = workers;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_payloads(mut self, includes_payloads: bool) -> Self {
        self.includes_payloads = includes_payloads;
        self
    }

    pub fn with_start_time(mut self, start_time: f64) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn validate(&self) -> Result<()> {
        match &self.output {
            Output::Channel { capacity } => {
                if self.buffer || self.compress {
                    return Err(Error::Config(
                        "buffering or compression cannot be combined with channel output".into(),
                    ));
                }
                if *capacity == 0 {
                    return Err(Error::Config("channel capacity must be positive".into()));
                }
            }
            Output::File { .. } => {
                if self.name.trim().is_empty() {
                    return Err(Error::Config("file output requires a record name".into()));
                }
            }
        }
        if self.compress {
            if self.compression_level > 9 {
                return Err(Error::Config(format!(
                    "compression level {} outside 0..=9",
                    self.compression_level
                )));
            }
            if self.compression_block_size == 0 {
                return Err(Error::Config("compression block size must be positive".into()));
            }
        }
        if self.buffer && self.mem_buffer_size == 0 {
            return Err(Error::Config("buffer size must be positive".into()));
        }
        Ok(())
    }

    /// Path of the file this configuration writes, if any.
    pub fn file_path(&self) -> Option<PathBuf> {
        match &self.output {
            Output::File { dir } => {
                let mut file_name = format!("{}.{}", self.name, FILE_EXTENSION);
                if self.compress {
                    file_name.push_str(".gz");
                }
                Some(dir.join(file_name))
            }
            Output::Channel { .. } => None,
        }
    }
}

/// Both sides of a channel output, split off from the chain at build time.
struct ChannelEnds {
    sink: Arc<ChannelSink>,
    records: Records,
}

enum Chain {
    Plain(File),
    Buffered(BufWriter<File>),
    Compressed(ParallelGzWriter<File>),
    BufferedCompressed(BufWriter<ParallelGzWriter<File>>),
    Channel(Arc<ChannelSink>),
}

impl Chain {
    fn build(config: &WriterConfig) -> Result<(Self, Option<ChannelEnds>)> {
        let dir = match &config.output {
            Output::Channel { capacity } => {
                let (sink, records) = ChannelSink::new(*capacity);
                let sink = Arc::new(sink);
                let ends = ChannelEnds {
                    sink: Arc::clone(&sink),
                    records,
                };
                return Ok((Chain::Channel(sink), Some(ends)));
            }
            Output::File { dir } => dir,
        };

        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
        let path = config.file_path().unwrap_or_default();
        let file = File::create(&path)?;

        let gzip = |file: File| {
            ParallelGzWriter::new(
                file,
                config.compression_level,
                config.compression_block_size,
                config.compression_workers,
            )
        };

        let chain = match (config.buffer, config.compress) {
            (false, false) => Chain::Plain(file),
            (true, false) => Chain::Buffered(BufWriter::with_capacity(config.mem_buffer_size, file)),
            (false, true) => Chain::Compressed(gzip(file)?),
            (true, true) => Chain::BufferedCompressed(BufWriter::with_capacity(
                config.mem_buffer_size,
                gzip(file)?,
            )),
        };
        Ok((chain, None))
    }

    fn write_frame(&mut self, frame: Vec<u8>) -> Result<()> {
        match self {
            Chain::Plain(file) => file.write_all(&frame)?,
            Chain::Buffered(writer) => writer.write_all(&frame)?,
            Chain::Compressed(writer) => writer.write_all(&frame)?,
            Chain::BufferedCompressed(writer) => writer.write_all(&frame)?,
            Chain::Channel(sink) => {
                sink.write(frame)?;
            }
        }
        Ok(())
    }

    /// Flushes and closes every layer. Returns the underlying file, if any.
    fn close(self) -> Result<Option<File>> {
        let file = match self {
            Chain::Plain(file) => file,
            Chain::Buffered(writer) => writer.into_inner().map_err(|e| e.into_error())?,
            Chain::Compressed(writer) => writer.finish()?,
            Chain::BufferedCompressed(writer) => writer
                .into_inner()
                .map_err(|e| e.into_error())?
                .finish()?,
            Chain::Channel(sink) => {
                sink.close();
                return Ok(None);
            }
        };
        file.sync_all()?;
        Ok(Some(file))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderState {
    Unwritten,
    Written,
}

struct WriterState {
    chain: Option<Chain>,
    header: HeaderState,
    records: u64,
    bytes_out: u64,
}

/// Serializes records into the configured chain. All operations are
/// serialized by one writer-wide lock.
pub struct StreamingWriter {
    config: WriterConfig,
    state: Mutex<WriterState>,
    /// Reachable without the writer lock so `close` can release a producer
    /// blocked on a full queue.
    channel: Option<Arc<ChannelSink>>,
    records: Mutex<Option<Records>>,
}

impl StreamingWriter {
    pub fn new(config: WriterConfig) -> Result<Self> {
        config.validate()?;
        let (chain, ends) = Chain::build(&config)?;
        let (channel, records) = match ends {
            Some(ChannelEnds { sink, records }) => (Some(sink), Some(records)),
            None => (None, None),
        };
        info!(
            name = %config.name,
            output = ?config.output,
            buffer = config.buffer,
            compress = config.compress,
            "Created streaming writer"
        );

        Ok(Self {
            config,
            state: Mutex::new(WriterState {
                chain: Some(chain),
                header: HeaderState::Unwritten,
                records: 0,
                bytes_out: 0,
            }),
            channel,
            records: Mutex::new(records),
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Consumer side of a channel output. Handed out once; `None` for file
    /// output or on later calls.
    pub fn take_records(&self) -> Option<Records> {
        self.records.lock().take()
    }

    pub fn write_header(&self, record_type: &str) -> Result<()> {
        let header = Header {
            record_type: record_type.to_string(),
            source: self.config.source.clone(),
            version: self.config.version.clone(),
            includes_payloads: self.config.includes_payloads,
            created: self.config.start_time,
        };

        let mut state = self.state.lock();
        if state.chain.is_none() {
            return Err(Error::Closed);
        }
        if state.header == HeaderState::Written {
            return Err(Error::Config("header already written".into()));
        }

        let framed = frame(&serde_json::to_vec(&header)?);
        let len = framed.len() as u64;
        if let Some(chain) = state.chain.as_mut() {
            chain.write_frame(framed)?;
        }
        state.header = HeaderState::Written;
        state.bytes_out += len;
        debug!(record_type, "Wrote header");
        Ok(())
    }

    pub fn write<R: Serialize + ?Sized>(&self, record: &R) -> Result<()> {
        let mut state = self.state.lock();
        if state.chain.is_none() {
            return Err(Error::Closed);
        }
        if state.header == HeaderState::Unwritten {
            return Err(Error::Config("record written before header".into()));
        }

        let framed = frame(&serde_json::to_vec(record)?);
        let len = framed.len() as u64;
        if let Some(chain) = state.chain.as_mut() {
            chain.write_frame(framed)?;
        }
        state.records += 1;
        state.bytes_out += len;
        Ok(())
    }

    /// Flushes and closes the chain. Returns the output name and the number
    /// of bytes it holds: the file size on disk, or for channel output the
    /// bytes handed to the queue.
    ///
    /// A channel sink is closed before the writer lock is taken; a write
    /// blocked on a full queue fails with `SinkError::Closed` and records
    /// already queued stay readable.
    pub fn close(&self) -> Result<(String, u64)> {
        if let Some(sink) = &self.channel {
            sink.close();
        }
        let mut state = self.state.lock();
        let chain = state.chain.take().ok_or(Error::Closed)?;

        let file = chain.close()?;
        let (name, size) = match (file, self.config.file_path()) {
            (Some(file), Some(path)) => (path_name(&path), file.metadata()?.len()),
            _ => (self.config.name.clone(), state.bytes_out),
        };

        info!(
            name = %name,
            size,
            records = state.records,
            "Closed streaming writer"
        );
        Ok((name, size))
    }

    pub fn records_written(&self) -> u64 {
        self.state.lock().records
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().chain.is_none()
    }
}

impl<R: Serialize + ?Sized> RecordSink<R> for StreamingWriter {
    fn write_record(&self, record: &R) -> Result<()> {
        self.write(record)
    }
}

fn path_name(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
