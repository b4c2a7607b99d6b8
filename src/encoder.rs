use std::mem;

use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace, warn};
use thiserror::Error;

use crate::codec::{check_format, deinterleave, CodecEngine, CodecError, Packet};
use crate::config::{ConfigError, EncoderConfig, EncoderOptions};
use crate::format::{AudioFormat, SampleFormat};
use crate::serial::SerialGenerator;
use crate::stream::{OggStream, PageConfig};
use crate::tag::Tag;
use crate::vorbis::VorbisEngine;

/// Content type of the produced byte stream.
pub const MIME_TYPE: &str = "audio/ogg";

/// Errors returned by [`Encoder`] operations.
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The PCM block does not hold a whole number of frames.
    #[error("PCM block of {len} bytes is not a multiple of the {frame_size} byte frame size")]
    InvalidLength { len: usize, frame_size: usize },
    /// The operation is not valid in the encoder's current state.
    #[error("cannot {operation} while the encoder is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("tag item {name:?} contains a NUL byte")]
    InvalidTag { name: String },
    #[error("writing Ogg pages: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether the current logical bitstream still accepts audio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Bitstream {
    Streaming,
    /// Closed with an EOS packet; waiting for a tag to start the next one.
    Ended,
}

/// Everything that exists only while the encoder is open.
struct Session<E> {
    format: AudioFormat,
    codec: E,
    stream: OggStream,
    bitstream: Bitstream,
}

impl<E: CodecEngine> Session<E> {
    /// Move every ready packet from the codec into the Ogg stream.
    fn pump(&mut self) -> Result<(), EncoderError> {
        for packet in self.codec.drain() {
            self.stream.packet_in(packet?)?;
        }
        Ok(())
    }

    /// Terminate the current bitstream and reset the codec for the next.
    ///
    /// The bitstream counts as ended even if draining the final packets
    /// fails, since the codec has already seen the end of its input. The
    /// drain error is returned after the reset.
    fn end_bitstream(&mut self) -> Result<(), EncoderError> {
        let drained = self
            .codec
            .feed(0, &mut |_, _| {})
            .map_err(EncoderError::from)
            .and_then(|()| self.pump());

        let closed = if self.stream.has_ended() {
            Ok(())
        } else {
            warn!(
                "No end-of-stream packet from codec on serial={:#x}; appending an empty one",
                self.stream.serial()
            );
            let granule = self.stream.granule_position();
            self.stream
                .packet_in(Packet::end_of_stream(granule))
                .map_err(EncoderError::from)
        };

        self.bitstream = Bitstream::Ended;
        self.codec.soft_reset()?;
        self.stream.flush()?;
        drained.and(closed)
    }
}

fn emit_headers(stream: &mut OggStream, headers: [Packet; 3]) -> Result<(), EncoderError> {
    for packet in headers {
        stream.packet_in(packet)?;
    }
    // make the headers readable before any audio arrives
    stream.flush()?;
    Ok(())
}

enum State<E> {
    Unconfigured,
    Configured(EncoderConfig),
    Open {
        config: EncoderConfig,
        session: Session<E>,
    },
    Closed {
        config: EncoderConfig,
        pending: BytesMut,
    },
}

impl<E: CodecEngine> State<E> {
    fn name(&self) -> &'static str {
        match self {
            State::Unconfigured => "unconfigured",
            State::Configured(_) => "configured",
            State::Open { session, .. } => match session.bitstream {
                Bitstream::Streaming => "open",
                Bitstream::Ended => "open with its bitstream ended",
            },
            State::Closed { .. } => "closed",
        }
    }

    fn invalid(&self, operation: &'static str) -> EncoderError {
        EncoderError::InvalidState {
            operation,
            state: self.name(),
        }
    }

    fn session_mut(&mut self, operation: &'static str) -> Result<&mut Session<E>, EncoderError> {
        match self {
            State::Open { session, .. } => Ok(session),
            other => Err(other.invalid(operation)),
        }
    }

    /// The open session, provided its bitstream still accepts audio.
    fn streaming_mut(&mut self, operation: &'static str) -> Result<&mut Session<E>, EncoderError> {
        let state = self.name();
        let session = self.session_mut(operation)?;
        if session.bitstream != Bitstream::Streaming {
            return Err(EncoderError::InvalidState { operation, state });
        }
        Ok(session)
    }
}

/// Streaming Ogg Vorbis encoder.
///
/// Lifecycle: [`configure`](Self::configure), [`open`](Self::open), then any
/// number of [`write`](Self::write) / [`read`](Self::read) calls. A tag update
/// is [`pre_tag`](Self::pre_tag) followed by [`tag`](Self::tag), which ends the
/// current logical bitstream and starts a new one with a fresh serial.
/// [`close`](Self::close) releases the codec; bytes not yet read stay
/// readable.
pub struct Encoder<E: CodecEngine = VorbisEngine> {
    state: State<E>,
    serials: SerialGenerator,
    page_config: PageConfig,
}

impl Encoder<VorbisEngine> {
    /// Create an unconfigured libvorbis encoder.
    pub fn new() -> Self {
        Self::for_engine()
    }
}

impl Default for Encoder<VorbisEngine> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: CodecEngine> Encoder<E> {
    /// Create an unconfigured encoder driving codec engine `E`.
    pub fn for_engine() -> Self {
        Self {
            state: State::Unconfigured,
            serials: SerialGenerator::new(),
            page_config: PageConfig::default(),
        }
    }

    pub fn with_page_config(mut self, config: PageConfig) -> Self {
        self.page_config = config;
        self
    }

    /// Use a deterministic serial sequence.
    pub fn with_serial_seed(mut self, seed: u64) -> Self {
        self.serials = SerialGenerator::with_seed(seed);
        self
    }

    /// Skip option parsing and use an already validated config.
    pub fn with_config(mut self, config: EncoderConfig) -> Self {
        self.state = State::Configured(config);
        self
    }

    /// Validate `options` and store the resulting config.
    ///
    /// On failure the encoder keeps its previous state.
    pub fn configure(&mut self, options: &EncoderOptions) -> Result<(), EncoderError> {
        if let State::Open { .. } = self.state {
            return Err(self.state.invalid("configure"));
        }
        let config = EncoderConfig::from_options(options)?;

        if let State::Closed { pending, .. } = &self.state {
            if !pending.is_empty() {
                warn!("Discarding {} unread bytes on reconfigure", pending.len());
            }
        }
        self.state = State::Configured(config);
        Ok(())
    }

    /// Open the encoder and emit the first set of header packets.
    ///
    /// The sample format is negotiated to float; the returned format is the
    /// one [`write`](Self::write) expects. Reopening a closed encoder keeps
    /// its unread bytes ahead of the new stream.
    pub fn open(&mut self, format: AudioFormat) -> Result<AudioFormat, EncoderError> {
        let config = match &self.state {
            State::Configured(config) | State::Closed { config, .. } => *config,
            other => return Err(other.invalid("open")),
        };

        let format = format.with_sample_format(SampleFormat::Float);
        check_format(&format)?;
        let mut codec = E::init(&config, &format)?;
        let headers = codec.headers(&[])?;
        let serial = self.serials.next_serial();

        let pending = match &mut self.state {
            State::Closed { pending, .. } => mem::take(pending),
            _ => BytesMut::new(),
        };
        let mut stream = OggStream::with_pending(serial, self.page_config, pending);
        emit_headers(&mut stream, headers)?;

        debug!(
            "Opened encoder: {} channels at {} Hz, serial={serial:#x}",
            format.channels, format.sample_rate
        );
        self.state = State::Open {
            config,
            session: Session {
                format,
                codec,
                stream,
                bitstream: Bitstream::Streaming,
            },
        };
        Ok(format)
    }

    /// Encode a block of interleaved native-endian f32 PCM.
    pub fn write(&mut self, pcm: &[u8]) -> Result<(), EncoderError> {
        let session = self.state.streaming_mut("write")?;

        let frame_size = session.format.frame_size();
        if pcm.len() % frame_size != 0 {
            return Err(EncoderError::InvalidLength {
                len: pcm.len(),
                frame_size,
            });
        }
        let frames = pcm.len() / frame_size;
        // feeding zero frames would end the stream
        if frames == 0 {
            return Ok(());
        }

        let channels = session.format.channels as usize;
        session
            .codec
            .feed(frames, &mut |channel, dst| deinterleave(pcm, channels, channel, dst))?;
        session.pump()?;
        trace!("Encoded {frames} frames");
        Ok(())
    }

    /// Copy up to `dest.len()` encoded bytes into `dest`.
    pub fn read(&mut self, dest: &mut [u8]) -> Result<usize, EncoderError> {
        match &mut self.state {
            State::Open { session, .. } => Ok(session.stream.page_out(dest)),
            State::Closed { pending, .. } => {
                let len = dest.len().min(pending.len());
                pending.copy_to_slice(&mut dest[..len]);
                Ok(len)
            }
            other => Err(other.invalid("read")),
        }
    }

    /// Take up to `max_len` encoded bytes.
    pub fn read_bytes(&mut self, max_len: usize) -> Result<Bytes, EncoderError> {
        match &mut self.state {
            State::Open { session, .. } => Ok(session.stream.read_bytes(max_len)),
            State::Closed { pending, .. } => {
                let len = max_len.min(pending.len());
                Ok(pending.split_to(len).freeze())
            }
            other => Err(other.invalid("read")),
        }
    }

    /// Make the page in progress readable.
    pub fn flush(&mut self) -> Result<(), EncoderError> {
        let session = self.state.session_mut("flush")?;
        session.stream.flush()?;
        Ok(())
    }

    /// End the current logical bitstream ahead of a [`tag`](Self::tag).
    ///
    /// Flushes pending audio, writes the end-of-stream packet and resets the
    /// codec's analysis state. Does nothing if the bitstream already ended.
    pub fn pre_tag(&mut self) -> Result<(), EncoderError> {
        self.finish_bitstream("pre_tag")
    }

    /// End the current logical bitstream without starting another.
    pub fn end(&mut self) -> Result<(), EncoderError> {
        self.finish_bitstream("end")
    }

    fn finish_bitstream(&mut self, operation: &'static str) -> Result<(), EncoderError> {
        let session = self.state.session_mut(operation)?;
        if session.bitstream == Bitstream::Ended {
            debug!("Bitstream already ended; {operation} is a no-op");
            return Ok(());
        }
        session.end_bitstream()
    }

    /// Start a new logical bitstream whose comment header carries `tag`.
    ///
    /// Must follow [`pre_tag`](Self::pre_tag). Names are upper-cased.
    pub fn tag(&mut self, tag: &Tag) -> Result<(), EncoderError> {
        let session = self.state.session_mut("tag")?;
        if session.bitstream != Bitstream::Ended {
            return Err(EncoderError::InvalidState {
                operation: "tag",
                state: "open with its bitstream still streaming",
            });
        }

        let comments = tag
            .comments()
            .map_err(|name| EncoderError::InvalidTag { name })?;
        let headers = session.codec.headers(&comments)?;

        let serial = self.serials.next_serial();
        session.stream.reinitialize(serial)?;
        emit_headers(&mut session.stream, headers)?;
        session.bitstream = Bitstream::Streaming;

        debug!(
            "Started logical bitstream serial={serial:#x} with {} tag items",
            comments.len()
        );
        Ok(())
    }

    /// Release the codec and move to the closed state.
    ///
    /// A bitstream that is still streaming is ended first. Encoded bytes that
    /// have not been read remain available through [`read`](Self::read).
    pub fn close(&mut self) -> Result<(), EncoderError> {
        let (config, mut session) = match mem::replace(&mut self.state, State::Unconfigured) {
            State::Open { config, session } => (config, session),
            other => {
                let err = other.invalid("close");
                self.state = other;
                return Err(err);
            }
        };

        if session.bitstream == Bitstream::Streaming {
            if let Err(e) = session.end_bitstream() {
                warn!("Failed to end bitstream on close: {e}");
            }
        }
        if let Err(e) = session.stream.flush() {
            warn!("Failed to flush final page on close: {e}");
        }

        let pending = session.stream.take_pending();
        debug!(
            "Closed encoder on serial={:#x}, {} bytes left to read",
            session.stream.serial(),
            pending.len()
        );
        self.state = State::Closed { config, pending };
        Ok(())
    }

    pub fn mime_type(&self) -> &'static str {
        MIME_TYPE
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open { .. })
    }

    /// Serial of the current logical bitstream while open.
    pub fn serial(&self) -> Option<u32> {
        match &self.state {
            State::Open { session, .. } => Some(session.stream.serial()),
            _ => None,
        }
    }

    /// Negotiated audio format while open.
    pub fn format(&self) -> Option<AudioFormat> {
        match &self.state {
            State::Open { session, .. } => Some(session.format),
            _ => None,
        }
    }

    /// Codec generation (number of bitstream resets) while open.
    pub fn generation(&self) -> Option<u32> {
        match &self.state {
            State::Open { session, .. } => Some(session.codec.generation()),
            _ => None,
        }
    }
}
