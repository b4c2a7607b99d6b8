/// PCM sample encodings a caller may propose when opening an encoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    S16,
    S24,
    S32,
    /// 32-bit native-endian IEEE float, the only format the encoder consumes.
    Float,
}

impl SampleFormat {
    /// Size of one sample in bytes.
    pub fn sample_size(&self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::S24 | SampleFormat::S32 | SampleFormat::Float => 4,
        }
    }
}

/// Audio parameters negotiated at open time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u8,
    /// Encoding of each sample in the interleaved input
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    /// Float format with the given rate and channel count.
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format: SampleFormat::Float,
        }
    }

    pub fn with_sample_format(mut self, sample_format: SampleFormat) -> Self {
        self.sample_format = sample_format;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }

    pub fn sample_size(&self) -> usize {
        self.sample_format.sample_size()
    }

    /// Size of one interleaved frame (one sample per channel) in bytes.
    pub fn frame_size(&self) -> usize {
        self.sample_size() * self.channels as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size() {
        assert_eq!(AudioFormat::new(44100, 2).frame_size(), 8);
        assert_eq!(
            AudioFormat::new(48000, 6)
                .with_sample_format(SampleFormat::S16)
                .frame_size(),
            12
        );
    }

    #[test]
    fn test_validity() {
        assert!(AudioFormat::new(8000, 1).is_valid());
        assert!(!AudioFormat::new(0, 2).is_valid());
        assert!(!AudioFormat::new(44100, 0).is_valid());
    }
}
