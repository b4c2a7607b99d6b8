use crate::config::EncoderConfig;
use crate::format::AudioFormat;
use thiserror::Error;

const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Errors reported by a codec engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// The engine rejected the mode / channel / rate combination.
    #[error("error initializing vorbis encoder: {reason}")]
    InitFailed { reason: String },
    #[error("error writing vorbis headers: {reason}")]
    HeaderFailed { reason: String },
    /// Analysis of an audio block failed.
    #[error("vorbis analysis failed with code {code}")]
    EncodeFailed { code: i32 },
    #[error("error resetting vorbis analysis state: {reason}")]
    ResetFailed { reason: String },
}

/// One unit of codec output, handed to the Ogg stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    /// Sample position at the end of this packet (0 for headers).
    pub granule_position: u64,
    pub is_header: bool,
    pub is_end_of_stream: bool,
}

impl Packet {
    pub fn header(data: Vec<u8>) -> Self {
        Self {
            data,
            granule_position: 0,
            is_header: true,
            is_end_of_stream: false,
        }
    }

    pub fn audio(data: Vec<u8>, granule_position: u64) -> Self {
        Self {
            data,
            granule_position,
            is_header: false,
            is_end_of_stream: false,
        }
    }

    /// Empty audio packet that terminates a logical bitstream.
    pub fn end_of_stream(granule_position: u64) -> Self {
        Self {
            data: Vec::new(),
            granule_position,
            is_header: false,
            is_end_of_stream: true,
        }
    }
}

/// A psychoacoustic encoder producing packets from planar float audio.
///
/// The orchestrator owns exactly one engine per open stream. Dropping the
/// engine releases its resources.
pub trait CodecEngine: Sized {
    /// Negotiate encoding parameters for `config` at the given format.
    fn init(config: &EncoderConfig, format: &AudioFormat) -> Result<Self, CodecError>;

    /// Produce the identification, comment and setup header packets.
    ///
    /// Only valid on a fresh generation, before any audio is fed.
    fn headers(&mut self, comments: &[(String, String)]) -> Result<[Packet; 3], CodecError>;

    /// Submit `frames` frames of input.
    ///
    /// `fill` is called once per channel with that channel's slice of the
    /// engine's analysis buffer. Zero frames flags the end of the stream.
    fn feed(
        &mut self,
        frames: usize,
        fill: &mut dyn FnMut(usize, &mut [f32]),
    ) -> Result<(), CodecError>;

    /// Extract the next encoded packet, if a block is ready.
    fn next_packet(&mut self) -> Result<Option<Packet>, CodecError>;

    /// Start a new generation, keeping the parameters from `init`.
    fn soft_reset(&mut self) -> Result<(), CodecError>;

    /// Number of soft resets performed so far.
    fn generation(&self) -> u32;

    /// Lazily drain every packet that is currently ready.
    fn drain(&mut self) -> Drain<'_, Self> {
        Drain {
            engine: self,
            done: false,
        }
    }
}

/// Iterator over ready packets; see [`CodecEngine::drain`].
pub struct Drain<'a, E: CodecEngine> {
    engine: &'a mut E,
    done: bool,
}

impl<E: CodecEngine> Iterator for Drain<'_, E> {
    type Item = Result<Packet, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.engine.next_packet() {
            Ok(Some(packet)) => Some(Ok(packet)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Reject formats no engine can encode: zero channels or a zero rate.
pub(crate) fn check_format(format: &AudioFormat) -> Result<(), CodecError> {
    if format.is_valid() {
        return Ok(());
    }
    Err(CodecError::InitFailed {
        reason: format!(
            "unsupported format: {} channels at {} Hz",
            format.channels, format.sample_rate
        ),
    })
}

/// Copy one channel out of interleaved native-endian f32 bytes.
///
/// Fills `dst[i]` with sample `i * channels + channel` of `src`, for as many
/// frames as both buffers hold.
pub fn deinterleave(src: &[u8], channels: usize, channel: usize, dst: &mut [f32]) {
    let samples = src
        .chunks_exact(SAMPLE_BYTES)
        .skip(channel)
        .step_by(channels);
    for (out, sample) in dst.iter_mut().zip(samples) {
        *out = f32::from_ne_bytes([sample[0], sample[1], sample[2], sample[3]]);
    }
}
