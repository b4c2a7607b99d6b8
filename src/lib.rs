//! # OggEnc
//!
//! OggEnc is a streaming Ogg Vorbis encoder for live audio, suitable for
//! feeding Icecast-style sources.
//!
//! Interleaved float PCM goes in, a byte stream of Ogg pages comes out. A tag
//! update ends the current logical bitstream and starts a new one with a
//! fresh serial and a comment header carrying the new metadata, so players
//! that only read headers still pick up the change.
//!
//! ## Example
//! ```rust,no_run
//! use oggenc::{AudioFormat, Encoder, EncoderOptions, Tag};
//!
//! fn main() -> Result<(), oggenc::EncoderError> {
//!     let mut encoder = Encoder::new();
//!     encoder.configure(&EncoderOptions::new().with("quality", "5"))?;
//!     let format = encoder.open(AudioFormat::new(44100, 2))?;
//!
//!     // One second of stereo silence
//!     let pcm = vec![0u8; format.frame_size() * 44100];
//!     encoder.write(&pcm)?;
//!
//!     encoder.pre_tag()?;
//!     encoder.tag(&Tag::new().with("artist", "Someone").with("title", "Next"))?;
//!
//!     let mut page = [0u8; 4096];
//!     while encoder.read(&mut page)? > 0 {
//!         // send the bytes on
//!     }
//!     encoder.close()?;
//!     Ok(())
//! }
//! ```
//!
//! With tokio, [`task::spawn`] moves an open encoder into a background task
//! driven by [`EncoderCommand`]s.

mod codec;
mod config;
mod encoder;
mod format;
mod serial;
mod stream;
mod tag;
pub mod task;
mod vorbis;

// Re-export public API
pub use codec::{deinterleave, CodecEngine, CodecError, Drain, Packet};
pub use config::{ConfigError, EncoderConfig, EncoderOptions, BITRATE, QUALITY};
pub use encoder::{Encoder, EncoderError, MIME_TYPE};
pub use format::{AudioFormat, SampleFormat};
pub use serial::SerialGenerator;
pub use stream::{OggStream, PageConfig};
pub use tag::{Tag, TagNames, TagType};
pub use task::{EncoderCommand, TaskConfig};
pub use vorbis::VorbisEngine;
