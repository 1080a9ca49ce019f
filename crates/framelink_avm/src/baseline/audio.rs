//! Baseline audio profile v01.00.

use std::fmt;

use super::{
    key_value, tokens, warn_unknown_key, BaselineConfig, BaselineProfile, MakeConfigError,
    MediaKind, ParseConfigError, ProfileVersion, PROFILE_V1,
};
use crate::config::GenericConfig;

/// Channel grouping of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AudioGrouping {
    /// Mono.
    Mono,
    /// Two independent mono channels.
    DualMono,
    /// Standard stereo pair.
    #[default]
    Stereo,
    /// Matrixed left-total/right-total stereo.
    LtRt,
    /// 5.1 surround.
    Surround51,
    /// 7.1 surround.
    Surround71,
    /// 22.2 surround.
    Surround222,
    /// One SDI audio group of four channels.
    Sgrp,
}

impl AudioGrouping {
    /// Number of channels in this grouping.
    #[must_use]
    pub const fn channels(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::DualMono | Self::Stereo | Self::LtRt => 2,
            Self::Surround51 => 6,
            Self::Surround71 => 8,
            Self::Surround222 => 24,
            Self::Sgrp => 4,
        }
    }
}

impl fmt::Display for AudioGrouping {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Mono => "M",
            Self::DualMono => "DM",
            Self::Stereo => "ST",
            Self::LtRt => "LtRt",
            Self::Surround51 => "51",
            Self::Surround71 => "71",
            Self::Surround222 => "222",
            Self::Sgrp => "SGRP",
        })
    }
}

/// Sample rate of an audio stream, in kHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AudioRate {
    /// 48 kHz.
    #[default]
    Khz48,
    /// 96 kHz.
    Khz96,
}

impl fmt::Display for AudioRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Khz48 => "48",
            Self::Khz96 => "96",
        })
    }
}

/// Baseline audio stream configuration.
///
/// Samples are 24-bit PCM; one sample across all channels of the
/// grouping forms the payload unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    /// Profile version of this configuration.
    pub version: ProfileVersion,
    /// Channel grouping.
    pub grouping: AudioGrouping,
    /// Sample rate.
    pub sample_rate_khz: AudioRate,
    /// ISO 639 language code, up to three characters.
    pub language: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            version: PROFILE_V1,
            grouping: AudioGrouping::default(),
            sample_rate_khz: AudioRate::default(),
            language: None,
        }
    }
}

impl AudioConfig {
    /// Payload unit size in bits: 24-bit samples across every channel of
    /// the grouping.
    #[must_use]
    pub const fn unit_size_bits(&self) -> usize {
        self.grouping.channels() * 24
    }
}

/// The baseline audio profile codec, v01.00.
#[derive(Debug, Clone, Copy)]
pub struct AudioProfileV1;

impl BaselineProfile for AudioProfileV1 {
    fn media_kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn version(&self) -> ProfileVersion {
        PROFILE_V1
    }

    fn make_config(&self, config: &BaselineConfig) -> Result<GenericConfig, MakeConfigError> {
        let BaselineConfig::Audio(audio) = config else {
            return Err(MakeConfigError::InvalidField {
                field: "config",
                reason: "not an audio configuration",
            });
        };
        if let Some(language) = &audio.language {
            if language.is_empty() || language.len() > 3 || !language.is_ascii() {
                return Err(MakeConfigError::InvalidField {
                    field: "language",
                    reason: "must be 1-3 ascii characters",
                });
            }
        }

        let mut data = format!(
            "cdi_profile_version={}; order={}; rate={};",
            audio.version, audio.grouping, audio.sample_rate_khz,
        );
        if let Some(language) = &audio.language {
            data.push_str(" language=");
            data.push_str(language);
            data.push(';');
        }

        Ok(GenericConfig {
            uri: MediaKind::Audio.uri().to_owned(),
            data: data.into_bytes(),
        })
    }

    fn parse_config(&self, data: &str) -> Result<BaselineConfig, ParseConfigError> {
        let mut audio = AudioConfig::default();
        let mut seen_order = false;
        let mut seen_rate = false;

        for token in tokens(data) {
            match key_value(token) {
                ("cdi_profile_version", value) => {
                    audio.version = value.and_then(|value| value.parse().ok()).ok_or_else(
                        || invalid("cdi_profile_version", value.unwrap_or_default()),
                    )?;
                }
                ("order", value) => {
                    audio.grouping = match value {
                        Some("M") => AudioGrouping::Mono,
                        Some("DM") => AudioGrouping::DualMono,
                        Some("ST") => AudioGrouping::Stereo,
                        Some("LtRt") => AudioGrouping::LtRt,
                        Some("51") => AudioGrouping::Surround51,
                        Some("71") => AudioGrouping::Surround71,
                        Some("222") => AudioGrouping::Surround222,
                        Some("SGRP") => AudioGrouping::Sgrp,
                        other => return Err(invalid("order", other.unwrap_or_default())),
                    };
                    seen_order = true;
                }
                ("rate", value) => {
                    audio.sample_rate_khz = match value {
                        Some("48") => AudioRate::Khz48,
                        Some("96") => AudioRate::Khz96,
                        other => return Err(invalid("rate", other.unwrap_or_default())),
                    };
                    seen_rate = true;
                }
                ("language", value) => {
                    let value = value.ok_or_else(|| invalid("language", ""))?;
                    if value.len() > 3 {
                        return Err(invalid("language", value));
                    }
                    audio.language = Some(value.to_owned());
                }
                (key, _) => warn_unknown_key(MediaKind::Audio, key),
            }
        }

        if !seen_order {
            return Err(ParseConfigError::MissingKey { key: "order" });
        }
        if !seen_rate {
            return Err(ParseConfigError::MissingKey { key: "rate" });
        }
        Ok(BaselineConfig::Audio(audio))
    }
}

fn invalid(key: &'static str, value: &str) -> ParseConfigError {
    ParseConfigError::InvalidValue {
        key,
        value: value.to_owned(),
    }
}
