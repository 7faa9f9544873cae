//! Container demuxers
//!
//! Every demuxer accepts byte chunks of any size, keeps just enough state to
//! resume mid-element, and emits complete elementary frames in source order.
//! None of them block: a call either makes progress or returns with the
//! partial input buffered for the next chunk.

pub mod adts;
pub mod flv;
pub mod mp4;
pub mod mpegts;
pub mod webm;

use crate::error::Result;
use bytes::Bytes;
use lyre_common::{AacContainer, AudioFormat};

pub use adts::AdtsFramer;
pub use flv::FlvDemuxer;
pub use mp4::{FragmentedMp4Demuxer, Mp4Demuxer};
pub use mpegts::MpegTsDemuxer;
pub use webm::WebmOpusDemuxer;

/// Streaming container parser
pub trait Demuxer: Send {
    /// Short container name used in logs and errors
    fn name(&self) -> &'static str;

    /// Parse a chunk, appending every newly completed frame to `out`
    fn feed(&mut self, chunk: &[u8], out: &mut Vec<Bytes>) -> Result<()>;

    /// Flush at end of input
    ///
    /// Containers whose last frame has no terminating boundary emit it here.
    fn finish(&mut self, _out: &mut Vec<Bytes>) -> Result<()> {
        Ok(())
    }

    /// Bytes buffered but not yet emitted
    fn pending_bytes(&self) -> usize;
}

/// Two demuxers in series: frames from the first are parsed by the second
pub struct DemuxChain {
    first: Box<dyn Demuxer>,
    second: Box<dyn Demuxer>,
    staged: Vec<Bytes>,
}

impl DemuxChain {
    pub fn new(first: Box<dyn Demuxer>, second: Box<dyn Demuxer>) -> Self {
        Self {
            first,
            second,
            staged: Vec::new(),
        }
    }

    fn drain_staged(&mut self, out: &mut Vec<Bytes>) -> Result<()> {
        for unit in self.staged.drain(..) {
            self.second.feed(&unit, out)?;
        }
        Ok(())
    }
}

impl Demuxer for DemuxChain {
    fn name(&self) -> &'static str {
        self.first.name()
    }

    fn feed(&mut self, chunk: &[u8], out: &mut Vec<Bytes>) -> Result<()> {
        self.first.feed(chunk, &mut self.staged)?;
        self.drain_staged(out)
    }

    fn finish(&mut self, out: &mut Vec<Bytes>) -> Result<()> {
        self.first.finish(&mut self.staged)?;
        self.drain_staged(out)?;
        self.second.finish(out)
    }

    fn pending_bytes(&self) -> usize {
        self.first.pending_bytes() + self.second.pending_bytes()
    }
}

/// Demuxer for a format, or `None` when the decoder reads the container itself
pub fn demuxer_for(format: AudioFormat) -> Option<Box<dyn Demuxer>> {
    match format {
        AudioFormat::Opus => Some(Box::new(WebmOpusDemuxer::new())),
        AudioFormat::Flv => Some(Box::new(FlvDemuxer::new())),
        AudioFormat::Aac(AacContainer::Adts) => Some(Box::new(AdtsFramer::new())),
        AudioFormat::Aac(AacContainer::MpegTs) => Some(Box::new(DemuxChain::new(
            Box::new(MpegTsDemuxer::new()),
            Box::new(AdtsFramer::new()),
        ))),
        AudioFormat::Aac(AacContainer::Mp4) => Some(Box::new(Mp4Demuxer::new())),
        AudioFormat::Aac(AacContainer::FragmentedMp4) => Some(Box::new(FragmentedMp4Demuxer::new())),
        AudioFormat::MpegAudio | AudioFormat::Flac | AudioFormat::OggVorbis | AudioFormat::Wav => None,
    }
}

/// Big-endian unsigned integer from up to 8 bytes
pub(crate) fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_be_uint() {
        assert_eq!(be_uint(&[0x01, 0x02]), 0x0102);
        assert_eq!(be_uint(&[0xFF, 0x00, 0x01]), 0xFF0001);
        assert_eq!(be_uint(&[]), 0);
    }

    #[test]
    fn test_demuxer_selection() {
        assert_eq!(demuxer_for(AudioFormat::Opus).unwrap().name(), "webm");
        assert_eq!(
            demuxer_for(AudioFormat::Aac(AacContainer::MpegTs)).unwrap().name(),
            "mpegts"
        );
        assert!(demuxer_for(AudioFormat::Flac).is_none());
    }
}
