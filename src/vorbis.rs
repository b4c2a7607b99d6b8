//! libvorbis-backed [`CodecEngine`].
//!
//! The native state is split the same way libvorbis splits it: a
//! `vorbis_info` holding the negotiated parameters, a `vorbis_dsp_state`
//! holding the analysis pipeline and a `vorbis_block` used as scratch space
//! for one block at a time. The dsp state keeps a pointer to the info and the
//! block keeps a pointer to the dsp state, so all three live in boxes that
//! never move.

use std::ffi::{c_int, c_long, CString};
use std::{mem, ptr, slice};

use aotuv_lancer_vorbis_sys::{
    vorbis_analysis, vorbis_analysis_blockout, vorbis_analysis_buffer, vorbis_analysis_headerout,
    vorbis_analysis_init, vorbis_analysis_wrote, vorbis_bitrate_addblock,
    vorbis_bitrate_flushpacket, vorbis_block, vorbis_block_clear, vorbis_block_init,
    vorbis_comment, vorbis_comment_add_tag, vorbis_comment_clear, vorbis_comment_init,
    vorbis_dsp_clear, vorbis_dsp_state, vorbis_encode_init, vorbis_encode_init_vbr, vorbis_info,
    vorbis_info_clear, vorbis_info_init,
};
use log::{debug, trace};
use ogg_next_sys::ogg_packet;

use crate::codec::{check_format, CodecEngine, CodecError, Packet};
use crate::config::EncoderConfig;
use crate::format::AudioFormat;

// libvorbis error codes (codec.h)
const OV_EFAULT: c_int = -129;
const OV_EINVAL: c_int = -131;

/// Vorbis encoder state for one open stream.
pub struct VorbisEngine {
    info: Box<vorbis_info>,
    dsp: Box<vorbis_dsp_state>,
    block: Box<vorbis_block>,
    channels: usize,
    generation: u32,
}

// SAFETY: the native state is only reachable through the owning engine and
// carries no thread affinity.
unsafe impl Send for VorbisEngine {}

impl VorbisEngine {
    fn start_analysis(&mut self) -> Result<(), String> {
        // SAFETY: info was set up by vorbis_encode_init*, and the boxes keep
        // the addresses stored by libvorbis stable.
        let code = unsafe { vorbis_analysis_init(&mut *self.dsp, &mut *self.info) };
        if code != 0 {
            return Err(format!("vorbis_analysis_init returned {code}"));
        }
        let code = unsafe { vorbis_block_init(&mut *self.dsp, &mut *self.block) };
        if code != 0 {
            return Err(format!("vorbis_block_init returned {code}"));
        }
        Ok(())
    }

    fn clear_analysis(&mut self) {
        // SAFETY: both clear functions accept zeroed or already cleared state
        // and leave the struct zeroed.
        unsafe {
            vorbis_block_clear(&mut *self.block);
            vorbis_dsp_clear(&mut *self.dsp);
        }
    }
}

impl CodecEngine for VorbisEngine {
    fn init(config: &EncoderConfig, format: &AudioFormat) -> Result<Self, CodecError> {
        check_format(format)?;

        // SAFETY: zeroed is the state libvorbis expects before *_init.
        let mut info: Box<vorbis_info> = Box::new(unsafe { mem::zeroed() });
        unsafe { vorbis_info_init(&mut *info) };

        let code = match *config {
            EncoderConfig::Vbr { quality } => unsafe {
                vorbis_encode_init_vbr(
                    &mut *info,
                    format.channels as _,
                    format.sample_rate as _,
                    quality * 0.1,
                )
            },
            EncoderConfig::Cbr { bitrate } => {
                let nominal = c_long::try_from(i64::from(bitrate) * 1000).map_err(|_| {
                    CodecError::InitFailed {
                        reason: format!("bitrate {bitrate} kbps is too large"),
                    }
                })?;
                unsafe {
                    vorbis_encode_init(
                        &mut *info,
                        format.channels as _,
                        format.sample_rate as _,
                        -1,
                        nominal,
                        -1,
                    )
                }
            }
        };

        if code != 0 {
            unsafe { vorbis_info_clear(&mut *info) };
            return Err(CodecError::InitFailed {
                reason: format!(
                    "{:?} rejected for {} channels at {} Hz (code {code})",
                    config, format.channels, format.sample_rate
                ),
            });
        }

        let mut engine = Self {
            info,
            dsp: Box::new(unsafe { mem::zeroed() }),
            block: Box::new(unsafe { mem::zeroed() }),
            channels: format.channels as usize,
            generation: 0,
        };
        // on failure, Drop releases whatever was set up
        engine
            .start_analysis()
            .map_err(|reason| CodecError::InitFailed { reason })?;

        debug!(
            "Initialised vorbis engine: {:?}, {} channels at {} Hz",
            config, format.channels, format.sample_rate
        );
        Ok(engine)
    }

    fn headers(&mut self, comments: &[(String, String)]) -> Result<[Packet; 3], CodecError> {
        let mut comment = Comment::new();
        for (name, value) in comments {
            comment.add(name, value)?;
        }

        // SAFETY: plain C structs, filled in by headerout.
        let mut ident: ogg_packet = unsafe { mem::zeroed() };
        let mut comm: ogg_packet = unsafe { mem::zeroed() };
        let mut setup: ogg_packet = unsafe { mem::zeroed() };
        let code = unsafe {
            vorbis_analysis_headerout(
                &mut *self.dsp,
                &mut comment.inner,
                &mut ident,
                &mut comm,
                &mut setup,
            )
        };
        if code != 0 {
            return Err(CodecError::HeaderFailed {
                reason: format!("vorbis_analysis_headerout returned {code}"),
            });
        }

        // SAFETY: the packets point into dsp-owned buffers that stay valid
        // until the next call on this state; they are copied out right away.
        let packets = unsafe {
            [
                Packet::header(copy_payload(&ident)),
                Packet::header(copy_payload(&comm)),
                Packet::header(copy_payload(&setup)),
            ]
        };
        trace!(
            "Header packets: {}/{}/{} bytes",
            packets[0].data.len(),
            packets[1].data.len(),
            packets[2].data.len()
        );
        Ok(packets)
    }

    fn feed(
        &mut self,
        frames: usize,
        fill: &mut dyn FnMut(usize, &mut [f32]),
    ) -> Result<(), CodecError> {
        let vals = c_int::try_from(frames).map_err(|_| CodecError::EncodeFailed { code: OV_EINVAL })?;

        if frames > 0 {
            // SAFETY: libvorbis returns one buffer per channel, each with room
            // for at least `vals` samples, valid until vorbis_analysis_wrote.
            let buffers = unsafe { vorbis_analysis_buffer(&mut *self.dsp, vals) };
            if buffers.is_null() {
                return Err(CodecError::EncodeFailed { code: OV_EFAULT });
            }
            for channel in 0..self.channels {
                let dst = unsafe { slice::from_raw_parts_mut(*buffers.add(channel), frames) };
                fill(channel, dst);
            }
        }

        let code = unsafe { vorbis_analysis_wrote(&mut *self.dsp, vals) };
        if code < 0 {
            return Err(CodecError::EncodeFailed { code });
        }
        Ok(())
    }

    fn next_packet(&mut self) -> Result<Option<Packet>, CodecError> {
        // SAFETY: filled in by vorbis_bitrate_flushpacket.
        let mut op: ogg_packet = unsafe { mem::zeroed() };

        loop {
            // a single block may leave several packets in the bitrate manager
            if unsafe { vorbis_bitrate_flushpacket(&mut *self.dsp, &mut op) } == 1 {
                let packet = Packet {
                    data: unsafe { copy_payload(&op) },
                    granule_position: u64::try_from(op.granulepos).unwrap_or(0),
                    is_header: false,
                    is_end_of_stream: op.e_o_s != 0,
                };
                return Ok(Some(packet));
            }

            match unsafe { vorbis_analysis_blockout(&mut *self.dsp, &mut *self.block) } {
                1 => {}
                0 => return Ok(None),
                code => return Err(CodecError::EncodeFailed { code }),
            }

            let code = unsafe { vorbis_analysis(&mut *self.block, ptr::null_mut()) };
            if code < 0 {
                return Err(CodecError::EncodeFailed { code });
            }
            let code = unsafe { vorbis_bitrate_addblock(&mut *self.block) };
            if code < 0 {
                return Err(CodecError::EncodeFailed { code });
            }
        }
    }

    fn soft_reset(&mut self) -> Result<(), CodecError> {
        self.clear_analysis();
        self.start_analysis()
            .map_err(|reason| CodecError::ResetFailed { reason })?;
        self.generation = self.generation.wrapping_add(1);
        debug!("Vorbis analysis state reset, generation {}", self.generation);
        Ok(())
    }

    fn generation(&self) -> u32 {
        self.generation
    }
}

impl Drop for VorbisEngine {
    fn drop(&mut self) {
        self.clear_analysis();
        unsafe { vorbis_info_clear(&mut *self.info) };
    }
}

/// Owned `vorbis_comment`, cleared on drop.
struct Comment {
    inner: vorbis_comment,
}

impl Comment {
    fn new() -> Self {
        // SAFETY: vorbis_comment_init fully initialises the zeroed struct.
        let mut inner: vorbis_comment = unsafe { mem::zeroed() };
        unsafe { vorbis_comment_init(&mut inner) };
        Self { inner }
    }

    fn add(&mut self, name: &str, value: &str) -> Result<(), CodecError> {
        let to_cstring = |s: &str| {
            CString::new(s).map_err(|_| CodecError::HeaderFailed {
                reason: format!("comment {s:?} contains a NUL byte"),
            })
        };
        let name = to_cstring(name)?;
        let value = to_cstring(value)?;
        // libvorbis copies both strings
        unsafe { vorbis_comment_add_tag(&mut self.inner, name.as_ptr(), value.as_ptr()) };
        Ok(())
    }
}

impl Drop for Comment {
    fn drop(&mut self) {
        unsafe { vorbis_comment_clear(&mut self.inner) };
    }
}

/// Copy a packet payload out of libvorbis-owned memory.
///
/// # Safety
///
/// `op` must have just been filled in by libvorbis.
unsafe fn copy_payload(op: &ogg_packet) -> Vec<u8> {
    match usize::try_from(op.bytes) {
        Ok(len) if len > 0 && !op.packet.is_null() => slice::from_raw_parts(op.packet, len).to_vec(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(config: EncoderConfig) -> VorbisEngine {
        VorbisEngine::init(&config, &AudioFormat::new(44100, 2)).unwrap()
    }

    fn feed_sine(engine: &mut VorbisEngine, frames: usize) {
        engine
            .feed(frames, &mut |channel, dst| {
                for (i, sample) in dst.iter_mut().enumerate() {
                    let phase = (i as f32 + channel as f32 * 10.0) * 440.0 / 44100.0;
                    *sample = (phase * std::f32::consts::TAU).sin() * 0.5;
                }
            })
            .unwrap();
    }

    fn drain_all(engine: &mut VorbisEngine) -> Vec<Packet> {
        engine.drain().collect::<Result<Vec<_>, _>>().unwrap()
    }

    #[test]
    fn test_headers_have_vorbis_signatures() {
        let mut engine = engine(EncoderConfig::Vbr { quality: 5.0 });
        let comments = vec![("ARTIST".to_string(), "Someone".to_string())];
        let [ident, comment, setup] = engine.headers(&comments).unwrap();

        assert_eq!(&ident.data[..7], b"\x01vorbis");
        assert_eq!(&comment.data[..7], b"\x03vorbis");
        assert_eq!(&setup.data[..7], b"\x05vorbis");
        assert!(ident.is_header && comment.is_header && setup.is_header);
        assert!(comment
            .data
            .windows(b"ARTIST=Someone".len())
            .any(|w| w == b"ARTIST=Someone"));
    }

    #[test]
    fn test_rejects_unreachable_bitrate() {
        let result = VorbisEngine::init(
            &EncoderConfig::Cbr { bitrate: 100_000 },
            &AudioFormat::new(44100, 2),
        );
        assert!(matches!(result, Err(CodecError::InitFailed { .. })));
    }

    #[test]
    fn test_rejects_invalid_format() {
        let result = VorbisEngine::init(
            &EncoderConfig::Vbr { quality: 3.0 },
            &AudioFormat::new(44100, 0),
        );
        assert!(matches!(result, Err(CodecError::InitFailed { .. })));
    }

    #[test]
    fn test_end_of_stream_after_zero_length_feed() {
        let mut engine = engine(EncoderConfig::Cbr { bitrate: 128 });
        engine.headers(&[]).unwrap();

        feed_sine(&mut engine, 44100);
        let packets = drain_all(&mut engine);
        assert!(packets.iter().all(|p| !p.is_end_of_stream));

        engine.feed(0, &mut |_, _| {}).unwrap();
        let packets = drain_all(&mut engine);
        let last = packets.last().expect("final packets");
        assert!(last.is_end_of_stream);
        assert!(last.granule_position >= 44100);
    }

    #[test]
    fn test_soft_reset_starts_new_generation() {
        let mut engine = engine(EncoderConfig::Vbr { quality: 2.0 });
        engine.headers(&[]).unwrap();
        feed_sine(&mut engine, 8192);
        engine.feed(0, &mut |_, _| {}).unwrap();
        drain_all(&mut engine);

        engine.soft_reset().unwrap();
        assert_eq!(engine.generation(), 1);

        // a fresh generation accepts headers and audio again
        let [ident, _, _] = engine.headers(&[]).unwrap();
        assert_eq!(ident.data[0], 1);
        feed_sine(&mut engine, 8192);
        let packets = drain_all(&mut engine);
        assert!(packets.iter().all(|p| !p.is_end_of_stream));
    }
}
