//! Baseline profiles: constrained, versioned media configurations
//! carried as ASCII key-value strings.
//!
//! A profile understands one media kind at one profile version. The
//! process-wide registry maps `(media kind, version)` to the profile's
//! codec; the three baseline v01.00 profiles (video, audio, ancillary
//! data) register themselves on first use. Applications may register
//! additional profile versions at startup; registering a version twice
//! is rejected.
//!
//! The text format is a sequence of `key=value` tokens (plus a few
//! valueless flags) separated by `"; "`, the first of which must be
//! `cdi_profile_version=<major>.<minor>`. Unknown keys are logged and
//! skipped; missing required keys fail the parse, in which case the
//! receive facade falls back to handing the application the raw generic
//! configuration.

pub mod ancillary;
pub mod audio;
pub mod video;

use std::{
    fmt,
    str::FromStr,
    sync::{Mutex, MutexGuard, OnceLock},
};

use tracing::warn;

pub use self::{ancillary::AncillaryConfig, audio::AudioConfig, video::VideoConfig};
use crate::config::GenericConfig;

/// URI selecting the baseline video profile.
pub const VIDEO_URI: &str = "https://cdi.elemental.com/specs/baseline-video";
/// URI selecting the baseline audio profile.
pub const AUDIO_URI: &str = "https://cdi.elemental.com/specs/baseline-audio";
/// URI selecting the baseline ancillary-data profile.
pub const ANCILLARY_URI: &str = "https://cdi.elemental.com/specs/baseline-ancillary-data";

/// The media category of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Uncompressed video frames.
    Video,
    /// PCM audio grains.
    Audio,
    /// Ancillary data (SMPTE ST 291 style).
    AncillaryData,
}

impl MediaKind {
    /// The configuration URI registered for this media kind.
    #[must_use]
    pub const fn uri(self) -> &'static str {
        match self {
            Self::Video => VIDEO_URI,
            Self::Audio => AUDIO_URI,
            Self::AncillaryData => ANCILLARY_URI,
        }
    }

    /// Maps a configuration URI back to its media kind, by exact match.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            VIDEO_URI => Some(Self::Video),
            AUDIO_URI => Some(Self::Audio),
            ANCILLARY_URI => Some(Self::AncillaryData),
            _ => None,
        }
    }
}

/// A `major.minor` baseline profile version, rendered as two-digit
/// decimal fields (`01.00`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfileVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

/// Version 01.00, the baseline profiles implemented in this crate.
pub const PROFILE_V1: ProfileVersion = ProfileVersion { major: 1, minor: 0 };

impl Default for ProfileVersion {
    fn default() -> Self {
        PROFILE_V1
    }
}

impl fmt::Display for ProfileVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02}.{:02}", self.major, self.minor)
    }
}

impl FromStr for ProfileVersion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.split_once('.').ok_or(())?;
        Ok(Self {
            major: major.parse().map_err(|_| ())?,
            minor: minor.parse().map_err(|_| ())?,
        })
    }
}

/// A parsed baseline configuration of any media kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaselineConfig {
    /// Video stream configuration.
    Video(VideoConfig),
    /// Audio stream configuration.
    Audio(AudioConfig),
    /// Ancillary-data stream configuration.
    Ancillary(AncillaryConfig),
}

impl BaselineConfig {
    /// The media kind of this configuration.
    #[must_use]
    pub const fn media_kind(&self) -> MediaKind {
        match self {
            Self::Video(_) => MediaKind::Video,
            Self::Audio(_) => MediaKind::Audio,
            Self::Ancillary(_) => MediaKind::AncillaryData,
        }
    }

    /// The profile version of this configuration.
    #[must_use]
    pub const fn version(&self) -> ProfileVersion {
        match self {
            Self::Video(config) => config.version,
            Self::Audio(config) => config.version,
            Self::Ancillary(config) => config.version,
        }
    }

    /// The payload unit size in bits: the granularity at which packet
    /// boundaries are allowed for this stream.
    #[must_use]
    pub const fn unit_size_bits(&self) -> usize {
        match self {
            Self::Video(config) => config.unit_size_bits(),
            Self::Audio(config) => config.unit_size_bits(),
            Self::Ancillary(_) => 32,
        }
    }

    /// The payload unit size in whole bytes, as used by the packetizer.
    /// Every baseline unit size is byte-divisible.
    #[must_use]
    pub const fn unit_size_bytes(&self) -> usize {
        self.unit_size_bits() / 8
    }
}

/// Failed to serialize a [`BaselineConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MakeConfigError {
    /// No profile is registered for this media kind and version.
    #[error("no {media:?} profile registered for version {version}")]
    ProfileNotSupported {
        /// Media kind of the configuration.
        media: MediaKind,
        /// Profile version of the configuration.
        version: ProfileVersion,
    },
    /// A configuration field cannot be represented by the profile.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value cannot be serialized.
        reason: &'static str,
    },
}

/// Failed to parse a generic configuration as a baseline profile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseConfigError {
    /// The URI matches none of the registered media kinds.
    #[error("unknown configuration uri {uri:?}")]
    UnknownUri {
        /// The URI received.
        uri: String,
    },
    /// The data blob is not ASCII/UTF-8 text.
    #[error("configuration data is not text")]
    NotText,
    /// The first token is not `cdi_profile_version=<major>.<minor>`.
    #[error("configuration does not start with a profile version")]
    MissingVersion,
    /// No profile is registered for this media kind and version.
    #[error("no {media:?} profile registered for version {version}")]
    ProfileNotSupported {
        /// Media kind selected by the URI.
        media: MediaKind,
        /// Version the configuration declared.
        version: ProfileVersion,
    },
    /// A required key is absent.
    #[error("required key {key:?} missing")]
    MissingKey {
        /// The missing key.
        key: &'static str,
    },
    /// A key's value would not parse.
    #[error("invalid value {value:?} for key {key:?}")]
    InvalidValue {
        /// The key whose value failed.
        key: &'static str,
        /// The value as received.
        value: String,
    },
}

/// A registered baseline profile: the codec for one media kind at one
/// profile version.
pub trait BaselineProfile: Send + Sync {
    /// Media kind this profile serves.
    fn media_kind(&self) -> MediaKind;

    /// Profile version this profile implements.
    fn version(&self) -> ProfileVersion;

    /// Serializes a configuration into the generic `(uri, data)` form.
    ///
    /// # Errors
    ///
    /// Errors if the configuration cannot be represented.
    fn make_config(&self, config: &BaselineConfig) -> Result<GenericConfig, MakeConfigError>;

    /// Parses the text form back into a configuration.
    ///
    /// # Errors
    ///
    /// Errors if required keys are missing or values are malformed.
    fn parse_config(&self, data: &str) -> Result<BaselineConfig, ParseConfigError>;
}

/// Registering a profile failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A profile for this media kind and version already exists.
    #[error("{media:?} profile version {version} already registered")]
    DuplicateVersion {
        /// Media kind of the rejected profile.
        media: MediaKind,
        /// Version of the rejected profile.
        version: ProfileVersion,
    },
}

struct Registry {
    profiles: Vec<Box<dyn BaselineProfile>>,
}

impl Registry {
    fn with_defaults() -> Self {
        Self {
            profiles: vec![
                Box::new(video::VideoProfileV1),
                Box::new(audio::AudioProfileV1),
                Box::new(ancillary::AncillaryProfileV1),
            ],
        }
    }

    fn find(&self, media: MediaKind, version: ProfileVersion) -> Option<&dyn BaselineProfile> {
        self.profiles
            .iter()
            .find(|profile| profile.media_kind() == media && profile.version() == version)
            .map(|profile| profile.as_ref())
    }
}

fn registry() -> MutexGuard<'static, Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    #[allow(clippy::unwrap_used)] // lock poisoning propagates the panic
    REGISTRY
        .get_or_init(|| Mutex::new(Registry::with_defaults()))
        .lock()
        .unwrap()
}

/// Registers an additional baseline profile version. Call at startup,
/// before the first payload flows.
///
/// # Errors
///
/// [`RegistryError::DuplicateVersion`] if the `(media kind, version)`
/// pair is already bound; the registry is unchanged.
pub fn register_profile(profile: Box<dyn BaselineProfile>) -> Result<(), RegistryError> {
    let mut registry = registry();
    if registry
        .find(profile.media_kind(), profile.version())
        .is_some()
    {
        return Err(RegistryError::DuplicateVersion {
            media: profile.media_kind(),
            version: profile.version(),
        });
    }
    registry.profiles.push(profile);
    Ok(())
}

/// Serializes a baseline configuration through its registered profile.
///
/// # Errors
///
/// See [`MakeConfigError`].
pub fn make_baseline_config(config: &BaselineConfig) -> Result<GenericConfig, MakeConfigError> {
    let registry = registry();
    let profile = registry
        .find(config.media_kind(), config.version())
        .ok_or(MakeConfigError::ProfileNotSupported {
            media: config.media_kind(),
            version: config.version(),
        })?;
    profile.make_config(config)
}

/// Parses a generic configuration through the profile its URI and
/// version token select.
///
/// # Errors
///
/// See [`ParseConfigError`].
pub fn parse_baseline_config(generic: &GenericConfig) -> Result<BaselineConfig, ParseConfigError> {
    let media = MediaKind::from_uri(&generic.uri).ok_or_else(|| ParseConfigError::UnknownUri {
        uri: generic.uri.clone(),
    })?;
    let data = std::str::from_utf8(&generic.data).map_err(|_| ParseConfigError::NotText)?;

    let version = tokens(data)
        .next()
        .and_then(|token| token.strip_prefix("cdi_profile_version="))
        .and_then(|value| value.parse().ok())
        .ok_or(ParseConfigError::MissingVersion)?;

    let registry = registry();
    let profile = registry
        .find(media, version)
        .ok_or(ParseConfigError::ProfileNotSupported { media, version })?;
    profile.parse_config(data)
}

/// Splits a configuration string into trimmed tokens. Tokens are
/// separated by semicolons; the `width=<w>, height=<h>` pairing also
/// makes the comma a separator.
pub(crate) fn tokens(data: &str) -> impl Iterator<Item = &str> {
    data.split([';', ','])
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Splits one token into its key and optional value.
pub(crate) fn key_value(token: &str) -> (&str, Option<&str>) {
    token
        .split_once('=')
        .map_or((token, None), |(key, value)| (key, Some(value)))
}

/// Logs and skips a key the profile does not know.
pub(crate) fn warn_unknown_key(media: MediaKind, key: &str) {
    warn!(?media, key, "unknown configuration key skipped");
}
