use anyhow::{Context, Result};
use bytes::Bytes;
use log::{debug, error, trace, warn};
use tokio::sync::mpsc;

use crate::codec::CodecEngine;
use crate::encoder::{Encoder, EncoderError};
use crate::tag::Tag;

/// Work items accepted by a spawned encoder task.
#[derive(Clone, Debug)]
pub enum EncoderCommand {
    /// Interleaved native-endian f32 PCM.
    Pcm(Bytes),
    /// End the current bitstream and start a new one carrying this tag.
    Tag(Tag),
    Flush,
}

/// Channel sizing for [`spawn`].
#[derive(Clone, Copy, Debug)]
pub struct TaskConfig {
    pub channel_capacity: usize,

    /// Largest chunk sent on the output channel
    pub read_chunk: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            read_chunk: 65536,
        }
    }
}

/// Move an open encoder into a tokio task: returns (input_tx, output_rx).
///
/// - Send commands into `input_tx`.
/// - Encoded Ogg bytes arrive on `output_rx`.
///
/// Dropping `input_tx` closes the encoder and delivers the final pages
/// before `output_rx` ends. Dropping `output_rx` stops the task.
pub fn spawn<E>(
    mut encoder: Encoder<E>,
    config: TaskConfig,
) -> (mpsc::Sender<EncoderCommand>, mpsc::Receiver<Bytes>)
where
    E: CodecEngine + Send + 'static,
{
    let (input_tx, mut input_rx) = mpsc::channel::<EncoderCommand>(config.channel_capacity);
    let (output_tx, output_rx) = mpsc::channel::<Bytes>(config.channel_capacity);
    let read_chunk = config.read_chunk.max(1);

    tokio::spawn(async move {
        debug!("Encoder task started");

        // headers written by open
        if !forward(&mut encoder, &output_tx, read_chunk).await {
            debug!("Output channel closed; exiting encoder task");
            return;
        }

        loop {
            tokio::select! {
                maybe_command = input_rx.recv() => {
                    let Some(command) = maybe_command else {
                        break;
                    };
                    if let Err(e) = handle(&mut encoder, command) {
                        error!("Encoder command failed: {:?}", e);
                    }
                    if !forward(&mut encoder, &output_tx, read_chunk).await {
                        debug!("Output channel closed; exiting encoder task");
                        return;
                    }
                }
                _ = output_tx.closed() => {
                    debug!("Output channel closed; exiting encoder task");
                    return;
                }
            }
        }

        debug!("Input channel closed; closing encoder");
        if let Err(e) = encoder.close() {
            error!("Error closing encoder: {:?}", e);
        }
        forward(&mut encoder, &output_tx, read_chunk).await;
        debug!("Encoder task ended");
    });

    (input_tx, output_rx)
}

fn handle<E: CodecEngine>(encoder: &mut Encoder<E>, command: EncoderCommand) -> Result<()> {
    match command {
        EncoderCommand::Pcm(pcm) => {
            trace!("Encoding {} byte PCM block", pcm.len());
            encoder.write(&pcm).context("encoding PCM block")?;
        }
        EncoderCommand::Tag(tag) => {
            // a tag that cannot be written leaves the current bitstream running
            tag.comments()
                .map_err(|name| EncoderError::InvalidTag { name })
                .context("validating tag")?;
            encoder.pre_tag().context("ending bitstream for tag")?;
            if let Err(e) = encoder.tag(&tag) {
                warn!("Starting untagged bitstream after tag failure: {e}");
                encoder
                    .tag(&Tag::new())
                    .context("starting untagged bitstream")?;
                return Err(e).context("starting tagged bitstream");
            }
        }
        EncoderCommand::Flush => encoder.flush().context("flushing page")?,
    }
    Ok(())
}

/// Send every readable byte; false once the receiver is gone.
async fn forward<E: CodecEngine>(
    encoder: &mut Encoder<E>,
    output_tx: &mpsc::Sender<Bytes>,
    read_chunk: usize,
) -> bool {
    loop {
        let bytes = match encoder.read_bytes(read_chunk) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Error reading encoded bytes: {:?}", e);
                return true;
            }
        };
        if bytes.is_empty() {
            return true;
        }
        if output_tx.send(bytes).await.is_err() {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderConfig;
    use crate::format::AudioFormat;
    use ogg::PacketReader;
    use std::io::Cursor;
    use tokio::time::{sleep, Duration};

    fn opened() -> Encoder {
        let mut encoder = Encoder::new()
            .with_config(EncoderConfig::Vbr { quality: 3.0 })
            .with_serial_seed(11);
        encoder.open(AudioFormat::new(44100, 2)).unwrap();
        encoder
    }

    fn sine(frames: usize) -> Bytes {
        (0..frames)
            .flat_map(|i| {
                let s = (i as f32 * 440.0 * std::f32::consts::TAU / 44100.0).sin() * 0.5;
                [s, s]
            })
            .flat_map(|s| s.to_ne_bytes())
            .collect::<Vec<u8>>()
            .into()
    }

    async fn collect(mut rx: mpsc::Receiver<Bytes>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    fn packets(bytes: &[u8]) -> Vec<ogg::Packet> {
        let mut reader = PacketReader::new(Cursor::new(bytes));
        let mut out = Vec::new();
        while let Some(packet) = reader.read_packet().unwrap() {
            out.push(packet);
        }
        out
    }

    #[tokio::test]
    async fn test_commands_produce_chained_stream() -> Result<()> {
        let (tx, rx) = spawn(opened(), TaskConfig::default());

        tx.send(EncoderCommand::Pcm(sine(4410))).await?;
        tx.send(EncoderCommand::Tag(Tag::new().with("title", "Second")))
            .await?;
        tx.send(EncoderCommand::Pcm(sine(4410))).await?;
        tx.send(EncoderCommand::Flush).await?;
        drop(tx);

        let decoded = packets(&collect(rx).await);
        let starts: Vec<_> = decoded.iter().filter(|p| p.first_in_stream()).collect();
        let ends: Vec<_> = decoded.iter().filter(|p| p.last_in_stream()).collect();
        assert_eq!(starts.len(), 2);
        assert_eq!(ends.len(), 2);
        assert_ne!(starts[0].stream_serial(), starts[1].stream_serial());
        assert_eq!(decoded.last().unwrap().stream_serial(), starts[1].stream_serial());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_command_does_not_stop_task() -> Result<()> {
        let (tx, rx) = spawn(opened(), TaskConfig::default());

        tx.send(EncoderCommand::Pcm(Bytes::from_static(&[0u8; 5])))
            .await?;
        tx.send(EncoderCommand::Pcm(sine(2048))).await?;
        drop(tx);

        let decoded = packets(&collect(rx).await);
        assert!(decoded.len() > 3);
        assert!(decoded.last().unwrap().last_in_stream());
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_tag_keeps_stream_running() -> Result<()> {
        let (tx, rx) = spawn(opened(), TaskConfig::default());

        tx.send(EncoderCommand::Tag(Tag::new().with("title", "bad\0")))
            .await?;
        for i in 0..10 {
            tx.send(EncoderCommand::Pcm(sine(4410 + i))).await?;
        }
        drop(tx);

        let decoded = packets(&collect(rx).await);
        assert_eq!(decoded.iter().filter(|p| p.first_in_stream()).count(), 1);
        let audio_bytes: usize = decoded[3..].iter().map(|p| p.data.len()).sum();
        assert!(audio_bytes > 1000, "only {audio_bytes} audio bytes");
        assert!(decoded.last().unwrap().last_in_stream());
        Ok(())
    }

    #[tokio::test]
    async fn test_small_read_chunks() -> Result<()> {
        let config = TaskConfig {
            channel_capacity: 4,
            read_chunk: 100,
        };
        let (tx, mut rx) = spawn(opened(), config);
        tx.send(EncoderCommand::Pcm(sine(8192))).await?;
        drop(tx);

        let mut total = Vec::new();
        while let Some(chunk) = rx.recv().await {
            assert!(chunk.len() <= 100);
            total.extend_from_slice(&chunk);
        }
        assert_eq!(&total[..4], b"OggS");
        assert!(packets(&total).last().unwrap().last_in_stream());
        Ok(())
    }

    #[tokio::test]
    async fn test_task_shutdown_behavior() {
        let (input_tx, output_rx) = spawn(opened(), TaskConfig::default());
        drop(output_rx);
        let _ = input_tx.send(EncoderCommand::Flush).await;
        sleep(Duration::from_millis(200)).await;
        let result = input_tx.send(EncoderCommand::Flush).await;
        assert!(result.is_err(), "Expected send to fail after shutdown");
    }
}
