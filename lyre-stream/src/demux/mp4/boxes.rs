//! ISO-BMFF box reading
//!
//! Two layers: [`iter_boxes`] walks a fully buffered region (used inside
//! `moov`/`moof`), and [`BoxStream`] walks top-level boxes of a live stream,
//! collecting, streaming, or skipping each body according to a policy.

use crate::error::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};

pub type FourCc = [u8; 4];

/// Largest box [`BoxStream`] will collect into memory
pub const MAX_COLLECT_BYTES: u64 = 64 * 1024 * 1024;

/// Parsed box header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub kind: FourCc,
    pub header_len: usize,
    /// Total size including header; `None` extends to end of stream
    pub size: Option<u64>,
}

impl BoxHeader {
    /// Parse a header; `Ok(None)` when more bytes are needed
    pub fn parse(data: &[u8]) -> Result<Option<BoxHeader>> {
        if data.len() < 8 {
            return Ok(None);
        }
        let size32 = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
        let kind = [data[4], data[5], data[6], data[7]];

        let (size, header_len) = match size32 {
            0 => (None, 8),
            1 => {
                if data.len() < 16 {
                    return Ok(None);
                }
                (Some(super::super::be_uint(&data[8..16])), 16)
            }
            n => (Some(n), 8),
        };

        if let Some(size) = size {
            if size < header_len as u64 {
                return Err(Error::malformed(
                    "mp4",
                    format!("box '{}' size {} smaller than its header", fourcc_str(&kind), size),
                ));
            }
        }

        Ok(Some(BoxHeader {
            kind,
            header_len,
            size,
        }))
    }

    pub fn body_len(&self) -> Option<u64> {
        self.size.map(|s| s - self.header_len as u64)
    }
}

/// Printable box type
pub fn fourcc_str(kind: &FourCc) -> String {
    kind.iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
        .collect()
}

/// Iterator over sibling boxes in a buffered region, yielding `(type, body)`
pub struct BoxIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for BoxIter<'a> {
    type Item = Result<(FourCc, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.data[self.pos..];
        if rest.len() < 8 {
            return None;
        }
        let header = match BoxHeader::parse(rest) {
            Ok(Some(h)) => h,
            Ok(None) => return None,
            Err(e) => {
                self.pos = self.data.len();
                return Some(Err(e));
            }
        };
        let total = header.size.map(|s| s as usize).unwrap_or(rest.len());
        if total > rest.len() {
            self.pos = self.data.len();
            return Some(Err(Error::malformed(
                "mp4",
                format!("box '{}' overruns its parent", fourcc_str(&header.kind)),
            )));
        }
        self.pos += total;
        Some(Ok((header.kind, &rest[header.header_len..total])))
    }
}

pub fn iter_boxes(data: &[u8]) -> BoxIter<'_> {
    BoxIter { data, pos: 0 }
}

/// Body of the first child of type `kind`
pub fn find_box<'a>(data: &'a [u8], kind: &FourCc) -> Result<Option<&'a [u8]>> {
    for item in iter_boxes(data) {
        let (k, body) = item?;
        if &k == kind {
            return Ok(Some(body));
        }
    }
    Ok(None)
}

/// Body at the end of a path of nested boxes
pub fn find_path<'a>(data: &'a [u8], path: &[&FourCc]) -> Result<Option<&'a [u8]>> {
    let mut current = data;
    for kind in path {
        match find_box(current, kind)? {
            Some(body) => current = body,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Cursor over a box body with big-endian reads
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.data.len()).ok_or_else(|| {
            Error::malformed("mp4", "box body ended early")
        })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(super::super::be_uint(b))
    }

    /// Version and 24-bit flags of a full box
    pub fn full_box(&mut self) -> Result<(u8, u32)> {
        let v = self.u32()?;
        Ok(((v >> 24) as u8, v & 0x00FF_FFFF))
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

/// What to do with a top-level box body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxPolicy {
    /// Buffer the whole box and hand it over at once
    Collect,
    /// Hand the body over as it arrives
    Stream,
    /// Discard the body
    Skip,
}

/// Events produced by [`BoxStream`]
#[derive(Debug)]
pub enum BoxEvent {
    /// A collected box; `body` excludes the header
    Complete { kind: FourCc, start: u64, body: Bytes },
    /// A streamed box began
    StreamStart { kind: FourCc, start: u64, body_start: u64 },
    /// Body bytes of the streamed box at absolute `offset`
    StreamData { offset: u64, data: Bytes },
    /// The streamed box ended
    StreamEnd { kind: FourCc },
}

#[derive(Debug, Clone, Copy)]
enum StreamState {
    Header,
    Collect { kind: FourCc, start: u64, total: usize, header_len: usize },
    Stream { kind: FourCc, remaining: Option<u64> },
    Skip { remaining: Option<u64> },
}

/// Incremental top-level box walker
pub struct BoxStream {
    buf: BytesMut,
    /// Absolute offset of `buf[0]`
    offset: u64,
    state: StreamState,
}

impl BoxStream {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            offset: 0,
            state: StreamState::Header,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn advance(&mut self, n: usize) {
        self.buf.advance(n);
        self.offset += n as u64;
    }

    /// Append a chunk and produce events for everything it completes
    pub fn feed(
        &mut self,
        chunk: &[u8],
        policy: impl Fn(&FourCc) -> BoxPolicy,
        events: &mut Vec<BoxEvent>,
    ) -> Result<()> {
        self.buf.extend_from_slice(chunk);

        loop {
            match self.state {
                StreamState::Header => {
                    let header = match BoxHeader::parse(&self.buf)? {
                        Some(h) => h,
                        None => return Ok(()),
                    };
                    let start = self.offset;
                    self.state = match policy(&header.kind) {
                        BoxPolicy::Collect => {
                            let size = header.size.ok_or_else(|| {
                                Error::malformed(
                                    "mp4",
                                    format!("'{}' extends to end of file", fourcc_str(&header.kind)),
                                )
                            })?;
                            if size > MAX_COLLECT_BYTES {
                                return Err(Error::malformed(
                                    "mp4",
                                    format!("'{}' of {} bytes is too large", fourcc_str(&header.kind), size),
                                ));
                            }
                            StreamState::Collect {
                                kind: header.kind,
                                start,
                                total: size as usize,
                                header_len: header.header_len,
                            }
                        }
                        BoxPolicy::Stream => {
                            self.advance(header.header_len);
                            events.push(BoxEvent::StreamStart {
                                kind: header.kind,
                                start,
                                body_start: self.offset,
                            });
                            StreamState::Stream {
                                kind: header.kind,
                                remaining: header.body_len(),
                            }
                        }
                        BoxPolicy::Skip => {
                            self.advance(header.header_len);
                            StreamState::Skip {
                                remaining: header.body_len(),
                            }
                        }
                    };
                }
                StreamState::Collect {
                    kind,
                    start,
                    total,
                    header_len,
                } => {
                    if self.buf.len() < total {
                        return Ok(());
                    }
                    let mut whole = self.buf.split_to(total);
                    self.offset += total as u64;
                    whole.advance(header_len);
                    events.push(BoxEvent::Complete {
                        kind,
                        start,
                        body: whole.freeze(),
                    });
                    self.state = StreamState::Header;
                }
                StreamState::Stream { kind, remaining } => {
                    let n = match remaining {
                        Some(r) => (r.min(self.buf.len() as u64)) as usize,
                        None => self.buf.len(),
                    };
                    if n > 0 {
                        let offset = self.offset;
                        let data = self.buf.split_to(n).freeze();
                        self.offset += n as u64;
                        events.push(BoxEvent::StreamData { offset, data });
                    }
                    match remaining {
                        Some(r) if r == n as u64 => {
                            events.push(BoxEvent::StreamEnd { kind });
                            self.state = StreamState::Header;
                        }
                        Some(r) => {
                            self.state = StreamState::Stream {
                                kind,
                                remaining: Some(r - n as u64),
                            };
                            return Ok(());
                        }
                        None => return Ok(()),
                    }
                }
                StreamState::Skip { remaining } => {
                    let n = match remaining {
                        Some(r) => (r.min(self.buf.len() as u64)) as usize,
                        None => self.buf.len(),
                    };
                    self.advance(n);
                    match remaining {
                        Some(r) if r == n as u64 => self.state = StreamState::Header,
                        Some(r) => {
                            self.state = StreamState::Skip {
                                remaining: Some(r - n as u64),
                            };
                            return Ok(());
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    /// End of input: close a box that extends to end of file
    pub fn finish(&mut self, events: &mut Vec<BoxEvent>) {
        if let StreamState::Stream { kind, remaining: None } = self.state {
            events.push(BoxEvent::StreamEnd { kind });
        }
        self.state = StreamState::Header;
    }
}

impl Default for BoxStream {
    fn default() -> Self {
        Self::new()
    }
}
