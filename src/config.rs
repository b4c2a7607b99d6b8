use log::debug;
use thiserror::Error;

/// Option name selecting variable bitrate mode.
pub const QUALITY: &str = "quality";
/// Option name selecting constant bitrate mode.
pub const BITRATE: &str = "bitrate";

const QUALITY_MIN: f32 = -1.0;
const QUALITY_MAX: f32 = 10.0;

/// Errors raised while validating encoder options.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The value could not be parsed or lies outside its permitted range.
    #[error("{option} \"{value}\" is out of range: {expected}")]
    OutOfRange {
        option: &'static str,
        value: String,
        expected: &'static str,
    },
    /// Both `quality` and `bitrate` were supplied.
    #[error("quality and bitrate are both defined")]
    Conflicting,
    /// Neither `quality` nor `bitrate` was supplied.
    #[error("neither bitrate nor quality defined")]
    MissingRequired,
}

/// Named string options, in the order they were supplied.
///
/// Later entries with the same name shadow earlier ones.
#[derive(Clone, Debug, Default)]
pub struct EncoderOptions {
    entries: Vec<(String, String)>,
}

impl EncoderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an option, returning the updated set.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    /// Look up the most recent value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl<K, V> FromIterator<(K, V)> for EncoderOptions
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Validated encoder mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EncoderConfig {
    /// Variable bitrate, targeting a quality level in `[-1.0, 10.0]`.
    Vbr { quality: f32 },
    /// Constant bitrate target in kbps.
    Cbr { bitrate: u32 },
}

impl EncoderConfig {
    /// Validate a VBR quality level.
    pub fn vbr(quality: f32) -> Result<Self, ConfigError> {
        if !(QUALITY_MIN..=QUALITY_MAX).contains(&quality) {
            return Err(quality_out_of_range(quality.to_string()));
        }
        Ok(Self::Vbr { quality })
    }

    /// Validate a CBR bitrate in kbps.
    pub fn cbr(bitrate: u32) -> Result<Self, ConfigError> {
        if bitrate == 0 {
            return Err(bitrate_out_of_range(bitrate.to_string()));
        }
        Ok(Self::Cbr { bitrate })
    }

    /// Build a config from the `quality` / `bitrate` options.
    ///
    /// `quality` wins the lookup, so a malformed quality is reported before
    /// a conflicting bitrate.
    pub fn from_options(options: &EncoderOptions) -> Result<Self, ConfigError> {
        if let Some(value) = options.get(QUALITY) {
            let quality = value
                .trim_start()
                .parse::<f32>()
                .map_err(|_| quality_out_of_range(value.to_string()))?;
            let config = Self::vbr(quality).map_err(|_| quality_out_of_range(value.to_string()))?;

            if options.get(BITRATE).is_some() {
                return Err(ConfigError::Conflicting);
            }

            debug!("Configured VBR encoding at quality {quality}");
            return Ok(config);
        }

        let value = options.get(BITRATE).ok_or(ConfigError::MissingRequired)?;
        let bitrate = value
            .trim_start()
            .parse::<i64>()
            .ok()
            .filter(|&kbps| kbps > 0)
            .and_then(|kbps| u32::try_from(kbps).ok())
            .ok_or_else(|| bitrate_out_of_range(value.to_string()))?;

        debug!("Configured CBR encoding at {bitrate} kbps");
        Ok(Self::Cbr { bitrate })
    }
}

fn quality_out_of_range(value: String) -> ConfigError {
    ConfigError::OutOfRange {
        option: QUALITY,
        value,
        expected: "a number in the range -1 to 10",
    }
}

fn bitrate_out_of_range(value: String) -> ConfigError {
    ConfigError::OutOfRange {
        option: BITRATE,
        value,
        expected: "a positive integer",
    }
}
