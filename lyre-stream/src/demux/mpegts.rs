//! MPEG transport stream demuxer for ADTS AAC
//!
//! PAT on PID 0 gives the PMT PID, the PMT gives the first elementary stream
//! of type 0x0F (ADTS AAC), and PES packets on that PID are reassembled into
//! access units. An access unit ends at the next payload-unit-start, or as
//! soon as the PES length it declared has arrived.

use super::Demuxer;
use crate::error::Result;
use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, info, warn};

/// Transport packet size
pub const TS_PACKET_LEN: usize = 188;
const SYNC_BYTE: u8 = 0x47;
const PID_PAT: u16 = 0;
/// ISO/IEC 13818-7 ADTS AAC
pub const STREAM_TYPE_ADTS_AAC: u8 = 0x0F;

#[derive(Debug, Default)]
struct AccessUnit {
    data: BytesMut,
    /// Payload bytes the PES header promised, when it declared a length
    expected: Option<usize>,
}

pub struct MpegTsDemuxer {
    buf: BytesMut,
    pmt_pid: Option<u16>,
    aac_pid: Option<u16>,
    unit: Option<AccessUnit>,
    resync_bytes: u64,
    units: u64,
}

impl MpegTsDemuxer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            pmt_pid: None,
            aac_pid: None,
            unit: None,
            resync_bytes: 0,
            units: 0,
        }
    }

    /// Elementary PID carrying AAC, once the PMT has been seen
    pub fn aac_pid(&self) -> Option<u16> {
        self.aac_pid
    }

    fn emit(&mut self, out: &mut Vec<Bytes>) {
        if let Some(unit) = self.unit.take() {
            if !unit.data.is_empty() {
                out.push(unit.data.freeze());
                self.units += 1;
            }
        }
    }

    fn handle_packet(&mut self, packet: &[u8], out: &mut Vec<Bytes>) {
        let pusi = packet[1] & 0x40 != 0;
        let pid = (((packet[1] & 0x1F) as u16) << 8) | packet[2] as u16;
        let adaptation = (packet[3] >> 4) & 0x03;

        let mut start = 4;
        if adaptation & 0x02 != 0 {
            start += 1 + packet[4] as usize;
        }
        if adaptation & 0x01 == 0 || start >= TS_PACKET_LEN {
            return;
        }
        let payload = &packet[start..];

        if pid == PID_PAT {
            if let Some(pmt) = parse_pat(payload, pusi) {
                if self.pmt_pid != Some(pmt) {
                    debug!("MPEG-TS PMT on PID {}", pmt);
                    self.pmt_pid = Some(pmt);
                }
            }
        } else if Some(pid) == self.pmt_pid {
            if self.aac_pid.is_none() {
                if let Some(es) = parse_pmt(payload, pusi) {
                    info!("MPEG-TS AAC stream on PID {}", es);
                    self.aac_pid = Some(es);
                }
            }
        } else if Some(pid) == self.aac_pid {
            self.handle_pes(payload, pusi, out);
        }
    }

    fn handle_pes(&mut self, payload: &[u8], pusi: bool, out: &mut Vec<Bytes>) {
        if pusi {
            self.emit(out);

            if payload.len() < 9 || payload[..3] != [0x00, 0x00, 0x01] {
                warn!("MPEG-TS PES without start code, dropping");
                return;
            }
            let pes_len = ((payload[4] as usize) << 8) | payload[5] as usize;
            let header_data_len = payload[8] as usize;
            let body_start = 9 + header_data_len;
            if body_start > payload.len() {
                warn!("MPEG-TS PES header spans packets, dropping");
                return;
            }
            let expected = (pes_len != 0).then(|| pes_len.saturating_sub(3 + header_data_len));
            self.unit = Some(AccessUnit {
                data: BytesMut::from(&payload[body_start..]),
                expected,
            });
        } else if let Some(unit) = self.unit.as_mut() {
            unit.data.extend_from_slice(payload);
        } else {
            // continuation with no start seen
            return;
        }

        let complete = self
            .unit
            .as_ref()
            .and_then(|u| u.expected.map(|e| u.data.len() >= e))
            .unwrap_or(false);
        if complete {
            if let Some(unit) = self.unit.as_mut() {
                if let Some(expected) = unit.expected {
                    unit.data.truncate(expected);
                }
            }
            self.emit(out);
        }
    }
}

impl Default for MpegTsDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

/// Skip the pointer field of a PSI section
fn section_start(payload: &[u8], pusi: bool) -> Option<&[u8]> {
    if pusi {
        let pointer = *payload.first()? as usize;
        payload.get(1 + pointer..)
    } else {
        Some(payload)
    }
}

/// First program's PMT PID
fn parse_pat(payload: &[u8], pusi: bool) -> Option<u16> {
    let section = section_start(payload, pusi)?;
    if *section.first()? != 0x00 {
        return None;
    }
    let section_len = ((((*section.get(1)? & 0x0F) as usize) << 8) | *section.get(2)? as usize).min(section.len().saturating_sub(3));
    // 5 bytes of table header after the length, 4 bytes CRC at the end
    let programs = section.get(8..(3 + section_len).saturating_sub(4))?;
    programs.chunks_exact(4).find_map(|entry| {
        let program = ((entry[0] as u16) << 8) | entry[1] as u16;
        (program != 0).then(|| (((entry[2] & 0x1F) as u16) << 8) | entry[3] as u16)
    })
}

/// First ADTS AAC elementary PID in the PMT
fn parse_pmt(payload: &[u8], pusi: bool) -> Option<u16> {
    let section = section_start(payload, pusi)?;
    if *section.first()? != 0x02 {
        return None;
    }
    let section_len = ((((*section.get(1)? & 0x0F) as usize) << 8) | *section.get(2)? as usize).min(section.len().saturating_sub(3));
    let end = (3 + section_len).saturating_sub(4);
    let program_info_len = (((*section.get(10)? & 0x0F) as usize) << 8) | *section.get(11)? as usize;

    let mut pos = 12 + program_info_len;
    while pos + 5 <= end {
        let stream_type = section[pos];
        let pid = (((section[pos + 1] & 0x1F) as u16) << 8) | section[pos + 2] as u16;
        let es_info_len = (((section[pos + 3] & 0x0F) as usize) << 8) | section[pos + 4] as usize;
        if stream_type == STREAM_TYPE_ADTS_AAC {
            return Some(pid);
        }
        pos += 5 + es_info_len;
    }
    None
}

impl Demuxer for MpegTsDemuxer {
    fn name(&self) -> &'static str {
        "mpegts"
    }

    fn feed(&mut self, chunk: &[u8], out: &mut Vec<Bytes>) -> Result<()> {
        self.buf.extend_from_slice(chunk);

        loop {
            if self.buf.first() != Some(&SYNC_BYTE) {
                let skip = self
                    .buf
                    .iter()
                    .position(|&b| b == SYNC_BYTE)
                    .unwrap_or(self.buf.len());
                if skip > 0 {
                    if self.resync_bytes == 0 {
                        warn!("MPEG-TS lost sync, skipping {} bytes", skip);
                    }
                    self.resync_bytes += skip as u64;
                    self.buf.advance(skip);
                }
            }
            if self.buf.len() < TS_PACKET_LEN {
                return Ok(());
            }
            let packet = self.buf.split_to(TS_PACKET_LEN).freeze();
            self.handle_packet(&packet, out);
        }
    }

    fn finish(&mut self, out: &mut Vec<Bytes>) -> Result<()> {
        self.emit(out);
        debug!(
            "MPEG-TS demuxer done: {} access units, {} resync bytes",
            self.units, self.resync_bytes
        );
        Ok(())
    }

    fn pending_bytes(&self) -> usize {
        self.buf.len() + self.unit.as_ref().map(|u| u.data.len()).unwrap_or(0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const PMT_PID: u16 = 0x1000;
    const AAC_PID: u16 = 0x0101;

    fn packet(pid: u16, pusi: bool, payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() <= 184);
        let mut out = vec![
            SYNC_BYTE,
            ((pusi as u8) << 6) | ((pid >> 8) as u8 & 0x1F),
            pid as u8,
        ];
        if payload.len() == 184 {
            out.push(0x10);
            out.extend_from_slice(payload);
        } else {
            // pad with an adaptation field
            out.push(0x30);
            let af_len = 183 - payload.len();
            out.push(af_len as u8);
            if af_len > 0 {
                out.push(0x00);
                out.extend(std::iter::repeat(0xFF).take(af_len - 1));
            }
            out.extend_from_slice(payload);
        }
        assert_eq!(out.len(), TS_PACKET_LEN);
        out
    }

    fn pat() -> Vec<u8> {
        let mut s = vec![0x00, 0x00, 0xB0, 13, 0x00, 0x01, 0xC1, 0x00, 0x00];
        s.extend_from_slice(&[0x00, 0x01, 0xE0 | (PMT_PID >> 8) as u8, PMT_PID as u8]);
        s.extend_from_slice(&[0, 0, 0, 0]); // CRC (unchecked)
        packet(PID_PAT, true, &s)
    }

    fn pmt() -> Vec<u8> {
        let mut s = vec![0x00, 0x02, 0xB0, 23, 0x00, 0x01, 0xC1, 0x00, 0x00, 0xE1, 0x00, 0xF0, 0x00];
        // a video stream first, then AAC
        s.extend_from_slice(&[0x1B, 0xE1, 0x00, 0xF0, 0x00]);
        s.extend_from_slice(&[STREAM_TYPE_ADTS_AAC, 0xE0 | (AAC_PID >> 8) as u8, AAC_PID as u8, 0xF0, 0x00]);
        s.extend_from_slice(&[0, 0, 0, 0]);
        packet(PMT_PID, true, &s)
    }

    /// PES packets for `units`, split across TS packets
    pub(crate) fn build_ts(units: &[Vec<u8>], declare_length: bool) -> Vec<u8> {
        let mut out = pat();
        out.extend(pmt());
        for unit in units {
            let mut pes = vec![0x00, 0x00, 0x01, 0xC0];
            let pes_len = if declare_length { unit.len() + 3 + 5 } else { 0 };
            pes.extend_from_slice(&(pes_len as u16).to_be_bytes());
            pes.extend_from_slice(&[0x80, 0x80, 5, 0x21, 0, 1, 0, 1]);
            pes.extend_from_slice(unit);

            for (i, part) in pes.chunks(184).enumerate() {
                out.extend(packet(AAC_PID, i == 0, part));
            }
        }
        out
    }

    #[test]
    fn test_reassembles_access_units_byte_by_byte() {
        let units: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 150 + 100 * i as usize]).collect();
        let stream = build_ts(&units, false);

        let mut demuxer = MpegTsDemuxer::new();
        let mut out = Vec::new();
        for b in &stream {
            demuxer.feed(std::slice::from_ref(b), &mut out).unwrap();
        }
        // last unit has no following start flag
        assert_eq!(out.len(), 3);
        demuxer.finish(&mut out).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(demuxer.aac_pid(), Some(AAC_PID));
        for (got, want) in out.iter().zip(&units) {
            assert_eq!(&got[..], &want[..]);
        }
    }

    #[test]
    fn test_declared_length_emits_early() {
        let units = vec![vec![7u8; 300], vec![8u8; 50]];
        let stream = build_ts(&units, true);

        let mut demuxer = MpegTsDemuxer::new();
        let mut out = Vec::new();
        demuxer.feed(&stream, &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(&out[1][..], &units[1][..]);
    }

    #[test]
    fn test_resync_after_garbage() {
        let units = vec![vec![1u8; 100], vec![2u8; 100]];
        let mut stream = vec![0x12, 0x34, 0x56];
        stream.extend(build_ts(&units, true));

        let mut demuxer = MpegTsDemuxer::new();
        let mut out = Vec::new();
        demuxer.feed(&stream, &mut out).unwrap();
        assert_eq!(out.len(), 2);
    }
}
