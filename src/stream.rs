use std::io;

use bytes::buf::Writer;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::{debug, trace, warn};
use ogg::{PacketWriteEndInfo, PacketWriter};

use crate::codec::Packet;

/// When the page under construction is written out automatically.
#[derive(Clone, Copy, Debug)]
pub struct PageConfig {
    /// Payload bytes after which the page is closed
    pub target_page_size: usize,

    /// Packets after which the page is closed
    pub max_packets: usize,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            target_page_size: 4096,
            max_packets: 255,
        }
    }
}

/// Packs codec packets into Ogg pages for one logical bitstream at a time.
///
/// Completed pages accumulate in a byte queue until they are read, and
/// survive a change of serial. The most recent packet is held back until
/// it is known whether it closes its page, since the writer decides page
/// boundaries at the moment a packet is written.
pub struct OggStream {
    writer: PacketWriter<'static, Writer<BytesMut>>,
    config: PageConfig,
    serial: u32,
    held: Option<Packet>,
    page_bytes: usize,
    page_packets: usize,
    started: bool,
    ended: bool,
    granule_position: u64,
}

impl OggStream {
    /// Open a stream with the given serial and an empty queue.
    pub fn new(serial: u32, config: PageConfig) -> Self {
        Self::with_pending(serial, config, BytesMut::new())
    }

    /// Open a stream whose queue already holds `pending` unread bytes.
    pub fn with_pending(serial: u32, config: PageConfig, pending: BytesMut) -> Self {
        let mut stream = Self {
            writer: PacketWriter::new(pending.writer()),
            config,
            serial,
            held: None,
            page_bytes: 0,
            page_packets: 0,
            started: false,
            ended: false,
            granule_position: 0,
        };
        stream.begin(serial);
        stream
    }

    /// Start a new logical bitstream, dropping any page in progress.
    pub fn begin(&mut self, serial: u32) {
        if let Some(packet) = self.held.take() {
            warn!(
                "Dropping unflushed packet ({} bytes) on serial={:#x}",
                packet.data.len(),
                self.serial
            );
        }
        debug!("Beginning logical bitstream serial={serial:#x}");
        self.serial = serial;
        self.page_bytes = 0;
        self.page_packets = 0;
        self.started = false;
        self.ended = false;
        self.granule_position = 0;
    }

    /// Flush the current page and begin a bitstream with `serial`.
    pub fn reinitialize(&mut self, serial: u32) -> io::Result<()> {
        self.flush()?;
        self.begin(serial);
        Ok(())
    }

    /// Append a packet to the current logical bitstream.
    pub fn packet_in(&mut self, packet: Packet) -> io::Result<()> {
        if self.ended {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("packet after end of stream on serial {:#x}", self.serial),
            ));
        }
        if !packet.is_header {
            self.granule_position = packet.granule_position;
        }

        // the first packet sits alone on the BOS page
        if !self.started {
            self.started = true;
            let info = if packet.is_end_of_stream {
                PacketWriteEndInfo::EndStream
            } else {
                PacketWriteEndInfo::EndPage
            };
            return self.write(packet, info);
        }

        if let Some(previous) = self.held.take() {
            self.write(previous, PacketWriteEndInfo::NormalPacket)?;
        }

        if packet.is_end_of_stream {
            return self.write(packet, PacketWriteEndInfo::EndStream);
        }

        self.page_bytes += packet.data.len();
        self.page_packets += 1;
        self.held = Some(packet);

        if self.page_bytes >= self.config.target_page_size
            || self.page_packets >= self.config.max_packets
        {
            self.flush()?;
        }
        Ok(())
    }

    /// Close the page in progress, if there is one.
    pub fn flush(&mut self) -> io::Result<()> {
        match self.held.take() {
            Some(packet) => self.write(packet, PacketWriteEndInfo::EndPage),
            None => Ok(()),
        }
    }

    fn write(&mut self, packet: Packet, info: PacketWriteEndInfo) -> io::Result<()> {
        let ends_page = !matches!(info, PacketWriteEndInfo::NormalPacket);
        if matches!(info, PacketWriteEndInfo::EndStream) {
            debug!(
                "Ending logical bitstream serial={:#x} at granule {}",
                self.serial, packet.granule_position
            );
            self.ended = true;
        }
        trace!(
            "Writing {} byte packet to serial={:#x}{}",
            packet.data.len(),
            self.serial,
            if ends_page { " (page end)" } else { "" }
        );

        self.writer
            .write_packet(packet.data, self.serial, info, packet.granule_position)?;

        if ends_page {
            self.page_bytes = 0;
            self.page_packets = 0;
        }
        Ok(())
    }

    fn queue(&mut self) -> &mut BytesMut {
        self.writer.inner_mut().get_mut()
    }

    /// Copy up to `dest.len()` bytes of completed pages into `dest`.
    ///
    /// Pages may be read across several calls. Returns 0 once the queue is
    /// empty.
    pub fn page_out(&mut self, dest: &mut [u8]) -> usize {
        let queue = self.queue();
        let len = dest.len().min(queue.len());
        queue.copy_to_slice(&mut dest[..len]);
        len
    }

    /// Take up to `max_len` bytes of completed pages.
    pub fn read_bytes(&mut self, max_len: usize) -> Bytes {
        let queue = self.queue();
        let len = max_len.min(queue.len());
        queue.split_to(len).freeze()
    }

    /// Take every completed byte still waiting to be read.
    pub fn take_pending(&mut self) -> BytesMut {
        self.queue().split()
    }

    /// Number of completed bytes waiting to be read.
    pub fn pending_len(&self) -> usize {
        self.writer.inner().get_ref().len()
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Whether the current bitstream has been closed with an EOS page.
    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Granule position of the last audio packet on this bitstream.
    pub fn granule_position(&self) -> u64 {
        self.granule_position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogg::PacketReader;
    use std::io::Cursor;

    fn packets(bytes: &[u8]) -> Vec<ogg::Packet> {
        let mut reader = PacketReader::new(Cursor::new(bytes));
        let mut out = Vec::new();
        while let Some(packet) = reader.read_packet().unwrap() {
            out.push(packet);
        }
        out
    }

    fn headers(stream: &mut OggStream) {
        stream.packet_in(Packet::header(b"\x01ident".to_vec())).unwrap();
        stream.packet_in(Packet::header(b"\x03comment".to_vec())).unwrap();
        stream.packet_in(Packet::header(b"\x05setup".to_vec())).unwrap();
    }

    #[test]
    fn test_first_packet_is_paged_immediately() {
        let mut stream = OggStream::new(0x42, PageConfig::default());
        assert_eq!(stream.pending_len(), 0);

        stream.packet_in(Packet::header(b"\x01ident".to_vec())).unwrap();
        let after_ident = stream.pending_len();
        assert!(after_ident > 0);

        stream.packet_in(Packet::header(b"\x03comment".to_vec())).unwrap();
        assert_eq!(stream.pending_len(), after_ident);

        stream.flush().unwrap();
        assert!(stream.pending_len() > after_ident);
    }

    #[test]
    fn test_second_flush_is_a_no_op() {
        let mut stream = OggStream::new(0x42, PageConfig::default());
        headers(&mut stream);
        stream.flush().unwrap();
        let once = stream.pending_len();
        stream.flush().unwrap();
        assert_eq!(stream.pending_len(), once);
    }

    #[test]
    fn test_partial_reads() {
        let mut stream = OggStream::new(0x42, PageConfig::default());
        headers(&mut stream);
        stream.flush().unwrap();

        let total = stream.pending_len();
        let mut collected = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = stream.page_out(&mut buf);
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected.len(), total);
        assert_eq!(&collected[..4], b"OggS");
        assert_eq!(stream.page_out(&mut buf), 0);

        let decoded = packets(&collected);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].data, b"\x01ident");
        assert!(decoded[0].first_in_stream());
        assert!(decoded.iter().all(|p| p.stream_serial() == 0x42));
    }

    #[test]
    fn test_page_written_at_size_threshold() {
        let config = PageConfig {
            target_page_size: 100,
            max_packets: 255,
        };
        let mut stream = OggStream::new(1, config);
        headers(&mut stream);
        stream.flush().unwrap();
        let before = stream.pending_len();

        stream.packet_in(Packet::audio(vec![0xaa; 60], 1024)).unwrap();
        assert_eq!(stream.pending_len(), before);
        stream.packet_in(Packet::audio(vec![0xbb; 60], 2048)).unwrap();
        assert!(stream.pending_len() > before + 120);
    }

    #[test]
    fn test_page_written_at_packet_count_threshold() {
        let config = PageConfig {
            target_page_size: usize::MAX,
            max_packets: 4,
        };
        let mut stream = OggStream::new(1, config);
        headers(&mut stream);
        stream.flush().unwrap();
        let before = stream.pending_len();

        for i in 0..3 {
            stream.packet_in(Packet::audio(vec![1; 10], i * 128)).unwrap();
        }
        assert_eq!(stream.pending_len(), before);
        stream.packet_in(Packet::audio(vec![1; 10], 512)).unwrap();
        assert!(stream.pending_len() > before);
    }

    #[test]
    fn test_reinitialize_starts_new_serial() {
        let mut stream = OggStream::new(0x1000, PageConfig::default());
        headers(&mut stream);
        stream.packet_in(Packet::audio(vec![7; 32], 1024)).unwrap();
        stream.packet_in(Packet::end_of_stream(1500)).unwrap();
        assert!(stream.has_ended());
        assert_eq!(stream.granule_position(), 1500);

        stream.reinitialize(0x2000).unwrap();
        assert!(!stream.has_ended());
        assert_eq!(stream.serial(), 0x2000);
        headers(&mut stream);
        stream.flush().unwrap();

        let bytes = stream.read_bytes(usize::MAX);
        let decoded = packets(&bytes);
        assert_eq!(decoded.len(), 8);

        let (first, second) = decoded.split_at(5);
        assert!(first.iter().all(|p| p.stream_serial() == 0x1000));
        assert!(first[4].last_in_stream());
        assert_eq!(first[4].absgp_page(), 1500);
        assert!(second.iter().all(|p| p.stream_serial() == 0x2000));
        assert!(second[0].first_in_stream());
        assert_eq!(second[0].data, b"\x01ident");
    }

    #[test]
    fn test_unread_pages_survive_begin() {
        let mut stream = OggStream::new(5, PageConfig::default());
        headers(&mut stream);
        stream.flush().unwrap();
        let pending = stream.pending_len();

        stream.begin(6);
        assert_eq!(stream.pending_len(), pending);
    }

    #[test]
    fn test_packet_after_end_is_rejected() {
        let mut stream = OggStream::new(9, PageConfig::default());
        headers(&mut stream);
        stream.packet_in(Packet::end_of_stream(0)).unwrap();
        assert!(stream.packet_in(Packet::audio(vec![1], 10)).is_err());
    }

    #[test]
    fn test_with_pending_keeps_leftover_bytes() {
        let leftover = BytesMut::from(&b"leftover"[..]);
        let mut stream = OggStream::with_pending(3, PageConfig::default(), leftover);
        assert_eq!(stream.read_bytes(8), Bytes::from_static(b"leftover"));
        assert_eq!(stream.pending_len(), 0);
    }
}
