//! Symphonia codec access
//!
//! One shared codec registry (defaults plus the libopus adapter) and a
//! packet-level decoder for elementary frames recovered by the demuxers.

use crate::audio::types::{convert_to_stereo_f32, PcmBlock};
use crate::error::{Error, Result};
use std::sync::OnceLock;
use symphonia::core::codecs::{
    CodecParameters, CodecRegistry, CodecType, Decoder, DecoderOptions,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;
use symphonia_adapter_libopus::OpusDecoder;
use tracing::debug;

/// Codec registry with Opus support
pub fn codec_registry() -> &'static CodecRegistry {
    static CODEC_REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    CODEC_REGISTRY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        registry.register_all::<OpusDecoder>();
        registry.register_all::<symphonia::default::codecs::MpaDecoder>();
        registry.register_all::<symphonia::default::codecs::PcmDecoder>();
        registry.register_all::<symphonia::default::codecs::VorbisDecoder>();
        registry.register_all::<symphonia::default::codecs::FlacDecoder>();
        registry.register_all::<symphonia::default::codecs::AdpcmDecoder>();
        registry.register_all::<symphonia::default::codecs::AacDecoder>();
        registry
    })
}

/// Decodes one self-contained compressed frame per call
pub struct PacketDecoder {
    decoder: Box<dyn Decoder>,
    sample_rate: u32,
    packets: u64,
}

impl PacketDecoder {
    /// Build a decoder for `codec`
    ///
    /// # Arguments
    /// * `codec` - Symphonia codec type
    /// * `sample_rate` - Nominal rate, used when the decoder reports none
    /// * `extra_data` - Codec setup bytes (AudioSpecificConfig for AAC)
    pub fn new(codec: CodecType, sample_rate: u32, extra_data: Option<&[u8]>) -> Result<Self> {
        let mut params = CodecParameters::new();
        params.for_codec(codec).with_sample_rate(sample_rate);
        if let Some(extra) = extra_data {
            params.with_extra_data(extra.to_vec().into_boxed_slice());
        }

        let decoder = codec_registry()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;
        debug!("Packet decoder ready: codec {:?}, {} Hz", codec, sample_rate);

        Ok(Self {
            decoder,
            sample_rate,
            packets: 0,
        })
    }

    /// Decode one frame to stereo PCM
    ///
    /// Undecodable data is reported as [`Error::CorruptFrame`].
    pub fn decode(&mut self, data: &[u8]) -> Result<PcmBlock> {
        let packet = Packet::new_from_slice(0, self.packets, 0, data);
        self.packets += 1;

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::IoError(e)) => {
                return Err(Error::CorruptFrame(format!("truncated frame: {}", e)));
            }
            Err(e) => return Err(Error::CorruptFrame(e.to_string())),
        };

        let rate = decoded.spec().rate;
        let mut samples = Vec::new();
        convert_to_stereo_f32(decoded, &mut samples);
        Ok(PcmBlock::new(
            samples,
            if rate == 0 { self.sample_rate } else { rate },
        ))
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }
}
