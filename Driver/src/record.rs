//! Binary record decoding for the kernel event stream.
//!
//! Every record is a fixed 24-byte metadata header followed by
//! `event_len - metadata_len` bytes of information blocks. Fields are read
//! at fixed offsets in native byte order; nothing is overlaid onto the
//! buffer.

use crate::error::{DriverError, DriverResult};
use std::io::{self, Read};

// ============================================================================
// Layout Constants
// ============================================================================

/// Size of `struct fanotify_event_metadata`.
pub const METADATA_LEN: usize = 24;

/// `FANOTIFY_METADATA_VERSION` understood by this decoder.
pub const METADATA_VERSION: u8 = 3;

/// `FAN_EVENT_INFO_TYPE_FID`
pub const INFO_TYPE_FID: u8 = 1;

/// Size of `struct fanotify_event_info_header`.
pub const INFO_HEADER_LEN: usize = 4;

/// Records longer than this cannot come from the kernel and mean the
/// stream has lost its framing.
pub const MAX_RECORD_LEN: usize = 64 * 1024;

// ============================================================================
// Record Types
// ============================================================================

/// The fixed header of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMetadata {
    pub event_len: u32,
    pub version: u8,
    pub metadata_len: u16,
    pub mask: u64,
    pub pid: i32,
}

impl EventMetadata {
    pub fn parse(buf: &[u8; METADATA_LEN]) -> Self {
        EventMetadata {
            event_len: u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
            version: buf[4],
            // buf[5] is reserved
            metadata_len: u16::from_ne_bytes([buf[6], buf[7]]),
            mask: u64::from_ne_bytes([
                buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
            ]),
            // buf[16..20] is the event fd, always FAN_NOFD when the group
            // reports file identities
            pid: i32::from_ne_bytes([buf[20], buf[21], buf[22], buf[23]]),
        }
    }

    /// Bytes that follow the 24-byte header, validated against the
    /// declared lengths.
    fn remaining_len(&self) -> DriverResult<usize> {
        let event_len = self.event_len as usize;
        let metadata_len = self.metadata_len as usize;

        if metadata_len < METADATA_LEN || event_len < metadata_len {
            return Err(DriverError::Malformed {
                event_len: self.event_len,
                metadata_len: self.metadata_len,
            });
        }
        if event_len > MAX_RECORD_LEN {
            return Err(DriverError::Framing(format!(
                "record length {} exceeds {} bytes",
                event_len, MAX_RECORD_LEN
            )));
        }

        Ok(event_len - METADATA_LEN)
    }
}

/// A record whose leading information block is a file identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub mask: u64,
    pub pid: i32,
    /// The complete identity block, header included, as declared by its
    /// own length field.
    pub info: Vec<u8>,
}

/// Outcome of decoding one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Event(RawEvent),
    /// The record was consumed but carries no file identity. `info_type`
    /// is `None` when the record has no information block at all, as with
    /// queue overflow notifications.
    Skipped { mask: u64, info_type: Option<u8> },
}

impl Decoded {
    pub fn mask(&self) -> u64 {
        match self {
            Decoded::Event(event) => event.mask,
            Decoded::Skipped { mask, .. } => *mask,
        }
    }
}

// ============================================================================
// Record Reader
// ============================================================================

/// Pulls records off a byte stream one at a time.
///
/// Each call consumes exactly `event_len` bytes when the header is sane.
/// Buffers are allocated per record and never shared between readers.
pub struct RecordReader<R> {
    reader: R,
    records: u64,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        RecordReader { reader, records: 0 }
    }

    /// Number of records consumed so far, skipped ones included.
    pub fn records_read(&self) -> u64 {
        self.records
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Decode the next record.
    ///
    /// Returns `StreamClosed` when the stream ends on a record boundary and
    /// `Framing` when it ends inside one.
    pub fn read_record(&mut self) -> DriverResult<Decoded> {
        let mut header = [0u8; METADATA_LEN];
        let got = read_full(&mut self.reader, &mut header)?;
        if got == 0 {
            return Err(DriverError::StreamClosed);
        }
        if got != METADATA_LEN {
            return Err(DriverError::Framing(format!(
                "short header: read {} of {} bytes",
                got, METADATA_LEN
            )));
        }

        let meta = EventMetadata::parse(&header);
        let remaining = meta.remaining_len()?;

        let mut body = vec![0u8; remaining];
        let got = read_full(&mut self.reader, &mut body)?;
        if got != remaining {
            return Err(DriverError::Framing(format!(
                "truncated record: read {} of {} payload bytes",
                got, remaining
            )));
        }
        self.records += 1;

        if meta.version != METADATA_VERSION {
            return Err(DriverError::UnsupportedVersion(meta.version));
        }

        // Extra metadata from a newer header layout precedes the info blocks.
        let payload = &body[meta.metadata_len as usize - METADATA_LEN..];
        decode_info(meta.mask, meta.pid, payload)
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = DriverResult<Decoded>;

    /// Yields records until the stream closes or loses its framing.
    fn next(&mut self) -> Option<Self::Item> {
        match self.read_record() {
            Err(DriverError::StreamClosed) => None,
            other => Some(other),
        }
    }
}

fn decode_info(mask: u64, pid: i32, payload: &[u8]) -> DriverResult<Decoded> {
    if payload.len() < INFO_HEADER_LEN {
        return Ok(Decoded::Skipped {
            mask,
            info_type: None,
        });
    }

    let info_type = payload[0];
    // payload[1] is padding
    let block_len = u16::from_ne_bytes([payload[2], payload[3]]) as usize;

    if info_type != INFO_TYPE_FID {
        return Ok(Decoded::Skipped {
            mask,
            info_type: Some(info_type),
        });
    }

    if block_len < INFO_HEADER_LEN || block_len > payload.len() {
        return Err(DriverError::HandleBounds {
            end: block_len,
            available: payload.len(),
        });
    }

    Ok(Decoded::Event(RawEvent {
        mask,
        pid,
        info: payload[..block_len].to_vec(),
    }))
}

/// Read until `buf` is full or the stream ends, returning the byte count.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ============================================================================
// Record Encoding (test streams)
// ============================================================================

/// Builds records in the kernel layout. Used by tests and benchmarks to
/// produce synthetic streams.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    mask: u64,
    pid: i32,
    version: u8,
    info: Vec<u8>,
}

impl RecordBuilder {
    pub fn new(mask: u64) -> Self {
        RecordBuilder {
            mask,
            pid: 0,
            version: METADATA_VERSION,
            info: Vec::new(),
        }
    }

    pub fn pid(mut self, pid: i32) -> Self {
        self.pid = pid;
        self
    }

    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Append a file identity block carrying `handle`.
    pub fn fid(mut self, fsid: [i32; 2], handle_type: i32, handle: &[u8]) -> Self {
        let block_len = crate::resolve::HANDLE_OFFSET + handle.len();
        self.info.push(INFO_TYPE_FID);
        self.info.push(0);
        self.info.extend_from_slice(&(block_len as u16).to_ne_bytes());
        self.info.extend_from_slice(&fsid[0].to_ne_bytes());
        self.info.extend_from_slice(&fsid[1].to_ne_bytes());
        self.info.extend_from_slice(&(handle.len() as u32).to_ne_bytes());
        self.info.extend_from_slice(&handle_type.to_ne_bytes());
        self.info.extend_from_slice(handle);
        self
    }

    /// Append an arbitrary information block.
    pub fn info_block(mut self, info_type: u8, data: &[u8]) -> Self {
        let block_len = INFO_HEADER_LEN + data.len();
        self.info.push(info_type);
        self.info.push(0);
        self.info.extend_from_slice(&(block_len as u16).to_ne_bytes());
        self.info.extend_from_slice(data);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let event_len = (METADATA_LEN + self.info.len()) as u32;
        let mut out = Vec::with_capacity(event_len as usize);
        out.extend_from_slice(&event_len.to_ne_bytes());
        out.push(self.version);
        out.push(0);
        out.extend_from_slice(&(METADATA_LEN as u16).to_ne_bytes());
        out.extend_from_slice(&self.mask.to_ne_bytes());
        out.extend_from_slice(&(-1i32).to_ne_bytes());
        out.extend_from_slice(&self.pid.to_ne_bytes());
        out.extend_from_slice(&self.info);
        out
    }
}
