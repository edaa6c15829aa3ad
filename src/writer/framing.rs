//! Length-delimited record framing and the sequential reader for written
//! output.
//!
//! # Format
//!
//! Each record is stored as:
//! ```text
//! [unsigned LEB128 varint length][serialized record]
//! ```
//! The first record of every output is the [`Header`]. Files ending in `.gz`
//! are a sequence of gzip members over the same byte stream.

use super::Header;
use crate::error::{Error, Result};
use flate2::read::MultiGzDecoder;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Upper bound of a u64 varint encoding.
const MAX_VARINT_LEN: usize = 10;

/// Frames one serialized record into a single contiguous buffer.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + MAX_VARINT_LEN);
    put_uvarint(&mut out, payload.len() as u64);
    out.extend_from_slice(payload);
    out
}

fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Reads a varint length. `Ok(None)` on a clean end of stream.
fn read_uvarint<R: Read>(reader: &mut R) -> io::Result<Option<u64>> {
    let mut value = 0u64;
    let mut byte = [0u8; 1];
    for i in 0..MAX_VARINT_LEN {
        match reader.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && i == 0 => return Ok(None),
            Err(e) => return Err(e),
        }
        if i == MAX_VARINT_LEN - 1 && byte[0] > 1 {
            break;
        }
        value |= u64::from(byte[0] & 0x7f) << (7 * i);
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "record length varint overflows u64",
    ))
}

/// Reads one framed record. `Ok(None)` at end of stream.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let Some(len) = read_uvarint(reader)? else {
        return Ok(None);
    };
    // The prefix is untrusted; only allocate what the stream delivers.
    let mut data = Vec::new();
    let read = reader.by_ref().take(len).read_to_end(&mut data)?;
    if read as u64 != len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("record truncated: expected {len} bytes, found {read}"),
        ));
    }
    Ok(Some(data))
}

/// Sequential reader for writer output.
///
/// The header is read and validated on construction; the records that follow
/// are returned in write order, as raw serialized bytes or decoded.
pub struct RecordReader {
    reader: Box<dyn Read + Send>,
    header: Header,
}

impl RecordReader {
    /// Opens a written file, decompressing when the name ends in `.gz`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let is_compressed = path.to_string_lossy().ends_with(".gz");

        let file = File::open(path)?;
        let buf_reader = BufReader::with_capacity(32 * 1024, file);

        let reader: Box<dyn Read + Send> = if is_compressed {
            Box::new(MultiGzDecoder::new(buf_reader))
        } else {
            Box::new(buf_reader)
        };
        Self::from_reader(reader)
    }

    pub fn from_reader(mut reader: Box<dyn Read + Send>) -> Result<Self> {
        let bytes = read_frame(&mut reader)?.ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "stream has no header record",
            ))
        })?;
        let header = serde_json::from_slice(&bytes)?;
        Ok(Self { reader, header })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Next serialized record, `None` at end of stream.
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(read_frame(&mut self.reader)?)
    }

    /// Next record decoded as `T`.
    pub fn next_as<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.next_record()? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Reads all remaining records.
    pub fn read_all(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }
}

impl Iterator for RecordReader {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
