//! Baseline video profile v01.00.

use std::fmt;

use super::{
    key_value, tokens, warn_unknown_key, BaselineConfig, BaselineProfile, MakeConfigError,
    MediaKind, ParseConfigError, ProfileVersion, PROFILE_V1,
};
use crate::config::GenericConfig;

/// Pixel sampling structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VideoSampling {
    /// 4:4:4 YCbCr.
    YCbCr444,
    /// 4:2:2 YCbCr.
    #[default]
    YCbCr422,
    /// Full-resolution RGB.
    Rgb,
}

impl fmt::Display for VideoSampling {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::YCbCr444 => "YCbCr-4:4:4",
            Self::YCbCr422 => "YCbCr-4:2:2",
            Self::Rgb => "RGB",
        })
    }
}

/// Whether an alpha channel rides alongside the video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AlphaUsage {
    /// No alpha channel.
    #[default]
    Unused,
    /// Alpha is carried.
    Used,
}

/// Bits per component sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BitDepth {
    /// 8-bit samples.
    Eight,
    /// 10-bit samples.
    #[default]
    Ten,
    /// 12-bit samples.
    Twelve,
}

impl BitDepth {
    /// Bits per sample as a number.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Eight => 8,
            Self::Ten => 10,
            Self::Twelve => 12,
        }
    }
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Colorimetry of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)] // names mirror the standards they cite
pub enum Colorimetry {
    Bt601,
    #[default]
    Bt709,
    Bt2020,
    Bt2100,
    St2065_1,
    St2065_3,
    Xyz,
}

impl fmt::Display for Colorimetry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Bt601 => "BT601",
            Self::Bt709 => "BT709",
            Self::Bt2020 => "BT2020",
            Self::Bt2100 => "BT2100",
            Self::St2065_1 => "ST2065-1",
            Self::St2065_3 => "ST2065-3",
            Self::Xyz => "XYZ",
        })
    }
}

/// Transfer characteristic system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)] // names mirror the standards they cite
pub enum Tcs {
    #[default]
    Sdr,
    Pq,
    Hlg,
    Linear,
    Bt2100LinPq,
    Bt2100LinHlg,
    St2065_1,
    St428_1,
    Density,
}

impl fmt::Display for Tcs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Sdr => "SDR",
            Self::Pq => "PQ",
            Self::Hlg => "HLG",
            Self::Linear => "LINEAR",
            Self::Bt2100LinPq => "BT2100LINPQ",
            Self::Bt2100LinHlg => "BT2100LINHLG",
            Self::St2065_1 => "ST2065-1",
            Self::St428_1 => "ST428-1",
            Self::Density => "DENSITY",
        })
    }
}

/// Encoding range of the samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VideoRange {
    /// Narrow (legal) range.
    #[default]
    Narrow,
    /// Full range with protected values.
    FullProtect,
    /// Full range.
    Full,
}

impl fmt::Display for VideoRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Narrow => "NARROW",
            Self::FullProtect => "FULLPROTECT",
            Self::Full => "FULL",
        })
    }
}

/// Baseline video stream configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConfig {
    /// Profile version of this configuration.
    pub version: ProfileVersion,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel sampling structure.
    pub sampling: VideoSampling,
    /// Alpha channel usage.
    pub alpha: AlphaUsage,
    /// Bits per component sample.
    pub depth: BitDepth,
    /// Frame rate numerator.
    pub frame_rate_num: u32,
    /// Frame rate denominator.
    pub frame_rate_den: u32,
    /// Colorimetry.
    pub colorimetry: Colorimetry,
    /// Whether the stream is interlaced.
    pub interlace: bool,
    /// Whether an interlaced stream is progressive segmented-frame.
    pub segmented: bool,
    /// Transfer characteristic system.
    pub tcs: Tcs,
    /// Encoding range.
    pub range: VideoRange,
    /// Pixel aspect ratio width.
    pub par_width: u32,
    /// Pixel aspect ratio height.
    pub par_height: u32,
    /// Partial frame: first row of the window, 0 when unused.
    pub start_vertical_pos: u32,
    /// Partial frame: window height, 0 when unused.
    pub vertical_size: u32,
    /// Partial frame: first column of the window, 0 when unused.
    pub start_horizontal_pos: u32,
    /// Partial frame: window width, 0 when unused.
    pub horizontal_size: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            version: PROFILE_V1,
            width: 0,
            height: 0,
            sampling: VideoSampling::default(),
            alpha: AlphaUsage::default(),
            depth: BitDepth::default(),
            frame_rate_num: 0,
            frame_rate_den: 1,
            colorimetry: Colorimetry::default(),
            interlace: false,
            segmented: false,
            tcs: Tcs::default(),
            range: VideoRange::default(),
            par_width: 1,
            par_height: 1,
            start_vertical_pos: 0,
            vertical_size: 0,
            start_horizontal_pos: 0,
            horizontal_size: 0,
        }
    }
}

impl VideoConfig {
    /// Payload unit size in bits: the size of the pixel group that must
    /// not straddle a packet boundary.
    #[must_use]
    pub const fn unit_size_bits(&self) -> usize {
        match (self.sampling, self.depth) {
            (VideoSampling::YCbCr422, BitDepth::Eight) => 32,
            (VideoSampling::YCbCr422, BitDepth::Ten) => 40,
            (VideoSampling::YCbCr422, BitDepth::Twelve) => 48,
            (VideoSampling::YCbCr444 | VideoSampling::Rgb, BitDepth::Eight) => 24,
            (VideoSampling::YCbCr444 | VideoSampling::Rgb, BitDepth::Ten) => 120,
            (VideoSampling::YCbCr444 | VideoSampling::Rgb, BitDepth::Twelve) => 72,
        }
    }

    fn has_partial_frame(&self) -> bool {
        self.start_vertical_pos != 0
            || self.vertical_size != 0
            || self.start_horizontal_pos != 0
            || self.horizontal_size != 0
    }
}

/// The baseline video profile codec, v01.00.
#[derive(Debug, Clone, Copy)]
pub struct VideoProfileV1;

impl BaselineProfile for VideoProfileV1 {
    fn media_kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn version(&self) -> ProfileVersion {
        PROFILE_V1
    }

    fn make_config(&self, config: &BaselineConfig) -> Result<GenericConfig, MakeConfigError> {
        let BaselineConfig::Video(video) = config else {
            return Err(MakeConfigError::InvalidField {
                field: "config",
                reason: "not a video configuration",
            });
        };
        if video.frame_rate_den == 0 {
            return Err(MakeConfigError::InvalidField {
                field: "exactframerate",
                reason: "zero denominator",
            });
        }

        use std::fmt::Write;
        let mut data = format!(
            "cdi_profile_version={}; sampling={}; depth={}; width={}, height={}; \
             exactframerate={}; colorimetry={};",
            video.version,
            video.sampling,
            video.depth,
            video.width,
            video.height,
            FrameRate(video.frame_rate_num, video.frame_rate_den),
            video.colorimetry,
        );
        // optional keys ride along only when they differ from defaults
        if video.interlace {
            data.push_str(" interlace;");
        }
        if video.segmented {
            data.push_str(" segmented;");
        }
        if video.tcs != Tcs::Sdr {
            let _ = write!(data, " TCS={};", video.tcs);
        }
        if video.range != VideoRange::Narrow {
            let _ = write!(data, " RANGE={};", video.range);
        }
        if (video.par_width, video.par_height) != (1, 1) {
            let _ = write!(data, " PAR={}:{};", video.par_width, video.par_height);
        }
        if video.alpha == AlphaUsage::Used {
            data.push_str(" alpha_included=enabled;");
        }
        if video.has_partial_frame() {
            let _ = write!(
                data,
                " partial_frame={}x{}+{}+{};",
                video.horizontal_size,
                video.vertical_size,
                video.start_horizontal_pos,
                video.start_vertical_pos,
            );
        }

        Ok(GenericConfig {
            uri: MediaKind::Video.uri().to_owned(),
            data: data.into_bytes(),
        })
    }

    fn parse_config(&self, data: &str) -> Result<BaselineConfig, ParseConfigError> {
        let mut video = VideoConfig::default();
        let mut seen_sampling = false;
        let mut seen_depth = false;
        let mut seen_width = false;
        let mut seen_height = false;
        let mut seen_rate = false;
        let mut seen_colorimetry = false;

        for token in tokens(data) {
            match key_value(token) {
                ("cdi_profile_version", value) => {
                    video.version = parse_value("cdi_profile_version", value)?;
                }
                ("sampling", value) => {
                    video.sampling = match require("sampling", value)? {
                        "YCbCr-4:4:4" => VideoSampling::YCbCr444,
                        "YCbCr-4:2:2" => VideoSampling::YCbCr422,
                        "RGB" => VideoSampling::Rgb,
                        other => return Err(invalid("sampling", other)),
                    };
                    seen_sampling = true;
                }
                ("depth", value) => {
                    video.depth = match require("depth", value)? {
                        "8" => BitDepth::Eight,
                        "10" => BitDepth::Ten,
                        "12" => BitDepth::Twelve,
                        other => return Err(invalid("depth", other)),
                    };
                    seen_depth = true;
                }
                ("width", value) => {
                    video.width = parse_value("width", value)?;
                    seen_width = true;
                }
                ("height", value) => {
                    video.height = parse_value("height", value)?;
                    seen_height = true;
                }
                ("exactframerate", value) => {
                    let value = require("exactframerate", value)?;
                    let bad = || invalid("exactframerate", value);
                    let (num, den) = match value.split_once('/') {
                        Some((num, den)) => (
                            num.parse().map_err(|_| bad())?,
                            den.parse().map_err(|_| bad())?,
                        ),
                        None => (value.parse().map_err(|_| bad())?, 1),
                    };
                    if den == 0 {
                        return Err(bad());
                    }
                    video.frame_rate_num = num;
                    video.frame_rate_den = den;
                    seen_rate = true;
                }
                ("colorimetry", value) => {
                    video.colorimetry = match require("colorimetry", value)? {
                        "BT601" => Colorimetry::Bt601,
                        "BT709" => Colorimetry::Bt709,
                        "BT2020" => Colorimetry::Bt2020,
                        "BT2100" => Colorimetry::Bt2100,
                        "ST2065-1" => Colorimetry::St2065_1,
                        "ST2065-3" => Colorimetry::St2065_3,
                        "XYZ" => Colorimetry::Xyz,
                        other => return Err(invalid("colorimetry", other)),
                    };
                    seen_colorimetry = true;
                }
                ("interlace", None) => video.interlace = true,
                ("segmented", None) => video.segmented = true,
                ("TCS", value) => {
                    video.tcs = match require("TCS", value)? {
                        "SDR" => Tcs::Sdr,
                        "PQ" => Tcs::Pq,
                        "HLG" => Tcs::Hlg,
                        "LINEAR" => Tcs::Linear,
                        "BT2100LINPQ" => Tcs::Bt2100LinPq,
                        "BT2100LINHLG" => Tcs::Bt2100LinHlg,
                        "ST2065-1" => Tcs::St2065_1,
                        "ST428-1" => Tcs::St428_1,
                        "DENSITY" => Tcs::Density,
                        other => return Err(invalid("TCS", other)),
                    };
                }
                ("RANGE", value) => {
                    video.range = match require("RANGE", value)? {
                        "NARROW" => VideoRange::Narrow,
                        "FULLPROTECT" => VideoRange::FullProtect,
                        "FULL" => VideoRange::Full,
                        other => return Err(invalid("RANGE", other)),
                    };
                }
                ("PAR", value) => {
                    let value = require("PAR", value)?;
                    let bad = || invalid("PAR", value);
                    let (w, h) = value.split_once(':').ok_or_else(|| bad())?;
                    video.par_width = w.parse().map_err(|_| bad())?;
                    video.par_height = h.parse().map_err(|_| bad())?;
                }
                ("alpha_included", value) => {
                    video.alpha = match require("alpha_included", value)? {
                        "enabled" => AlphaUsage::Used,
                        "disabled" => AlphaUsage::Unused,
                        other => return Err(invalid("alpha_included", other)),
                    };
                }
                ("partial_frame", value) => {
                    let value = require("partial_frame", value)?;
                    let parsed = (|| {
                        let (size, rest) = value.split_once('+')?;
                        let (w, h) = size.split_once('x')?;
                        let (x, y) = rest.split_once('+')?;
                        Some((
                            w.parse().ok()?,
                            h.parse().ok()?,
                            x.parse().ok()?,
                            y.parse().ok()?,
                        ))
                    })()
                    .ok_or_else(|| invalid("partial_frame", value))?;
                    video.horizontal_size = parsed.0;
                    video.vertical_size = parsed.1;
                    video.start_horizontal_pos = parsed.2;
                    video.start_vertical_pos = parsed.3;
                }
                (key, _) => warn_unknown_key(MediaKind::Video, key),
            }
        }

        for (seen, key) in [
            (seen_sampling, "sampling"),
            (seen_depth, "depth"),
            (seen_width, "width"),
            (seen_height, "height"),
            (seen_rate, "exactframerate"),
            (seen_colorimetry, "colorimetry"),
        ] {
            if !seen {
                return Err(ParseConfigError::MissingKey { key });
            }
        }
        Ok(BaselineConfig::Video(video))
    }
}

struct FrameRate(u32, u32);

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.1 == 1 {
            write!(f, "{}", self.0)
        } else {
            write!(f, "{}/{}", self.0, self.1)
        }
    }
}

fn require<'a>(key: &'static str, value: Option<&'a str>) -> Result<&'a str, ParseConfigError> {
    value.ok_or(ParseConfigError::InvalidValue {
        key,
        value: String::new(),
    })
}

fn invalid(key: &'static str, value: &str) -> ParseConfigError {
    ParseConfigError::InvalidValue {
        key,
        value: value.to_owned(),
    }
}

fn parse_value<T: std::str::FromStr>(
    key: &'static str,
    value: Option<&str>,
) -> Result<T, ParseConfigError> {
    let value = require(key, value)?;
    value.parse().map_err(|_| invalid(key, value))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    use super::*;
    use crate::baseline::{make_baseline_config, parse_baseline_config};

    fn hd60() -> VideoConfig {
        VideoConfig {
            width: 1920,
            height: 1080,
            sampling: VideoSampling::YCbCr422,
            depth: BitDepth::Ten,
            frame_rate_num: 60,
            frame_rate_den: 1,
            colorimetry: Colorimetry::Bt709,
            ..VideoConfig::default()
        }
    }

    #[test]
    fn hd60_text_form() {
        let generic = make_baseline_config(&BaselineConfig::Video(hd60())).unwrap();
        assert_eq!(
            "https://cdi.elemental.com/specs/baseline-video",
            generic.uri
        );
        assert_eq!(
            "cdi_profile_version=01.00; sampling=YCbCr-4:2:2; depth=10; width=1920, \
             height=1080; exactframerate=60; colorimetry=BT709;",
            std::str::from_utf8(&generic.data).unwrap()
        );

        let config = BaselineConfig::Video(hd60());
        assert_eq!(40, config.unit_size_bits());
        assert_eq!(5, config.unit_size_bytes());
    }

    #[test]
    fn hd60_round_trip() {
        let config = BaselineConfig::Video(hd60());
        let generic = make_baseline_config(&config).unwrap();
        assert_eq!(config, parse_baseline_config(&generic).unwrap());
    }

    #[test]
    fn fractional_rate_and_optionals_round_trip() {
        let video = VideoConfig {
            frame_rate_num: 60_000,
            frame_rate_den: 1001,
            interlace: true,
            segmented: true,
            tcs: Tcs::Pq,
            range: VideoRange::Full,
            par_width: 4,
            par_height: 3,
            alpha: AlphaUsage::Used,
            start_vertical_pos: 8,
            vertical_size: 540,
            start_horizontal_pos: 16,
            horizontal_size: 960,
            ..hd60()
        };
        let config = BaselineConfig::Video(video);
        let generic = make_baseline_config(&config).unwrap();
        let text = std::str::from_utf8(&generic.data).unwrap();
        assert!(text.contains("exactframerate=60000/1001;"), "{text}");
        assert!(text.contains(" interlace;"), "{text}");
        assert!(text.contains(" PAR=4:3;"), "{text}");
        assert!(text.contains(" partial_frame=960x540+16+8;"), "{text}");
        assert_eq!(config, parse_baseline_config(&generic).unwrap());
    }

    #[test]
    fn defaults_are_omitted() {
        let generic = make_baseline_config(&BaselineConfig::Video(hd60())).unwrap();
        let text = std::str::from_utf8(&generic.data).unwrap();
        for key in ["TCS", "RANGE", "PAR", "alpha_included", "partial_frame"] {
            assert!(!text.contains(key), "{key} in {text}");
        }
    }

    #[test]
    fn unit_sizes_per_sampling_and_depth() {
        let unit = |sampling, depth| {
            BaselineConfig::Video(VideoConfig {
                sampling,
                depth,
                ..hd60()
            })
            .unit_size_bits()
        };
        assert_eq!(48, unit(VideoSampling::YCbCr422, BitDepth::Twelve));
        assert_eq!(72, unit(VideoSampling::YCbCr444, BitDepth::Twelve));
        assert_eq!(120, unit(VideoSampling::Rgb, BitDepth::Ten));
        assert_eq!(32, unit(VideoSampling::YCbCr422, BitDepth::Eight));
    }

    #[test]
    fn unknown_keys_are_skipped() {
        let generic = GenericConfig {
            uri: MediaKind::Video.uri().into(),
            data: b"cdi_profile_version=01.00; sampling=YCbCr-4:2:2; depth=10; \
                    width=1920, height=1080; exactframerate=60; colorimetry=BT709; \
                    glitter=yes;"
                .to_vec(),
        };
        let parsed = parse_baseline_config(&generic).unwrap();
        assert_eq!(BaselineConfig::Video(hd60()), parsed);
    }

    #[test]
    fn missing_required_key_fails() {
        let generic = GenericConfig {
            uri: MediaKind::Video.uri().into(),
            data: b"cdi_profile_version=01.00; sampling=YCbCr-4:2:2; depth=10; \
                    width=1920, height=1080; exactframerate=60;"
                .to_vec(),
        };
        assert_matches!(
            parse_baseline_config(&generic),
            Err(ParseConfigError::MissingKey { key: "colorimetry" })
        );
    }

    #[test]
    fn bad_values_fail() {
        let generic = GenericConfig {
            uri: MediaKind::Video.uri().into(),
            data: b"cdi_profile_version=01.00; sampling=YCbCr-4:9:9;".to_vec(),
        };
        assert_matches!(
            parse_baseline_config(&generic),
            Err(ParseConfigError::InvalidValue {
                key: "sampling",
                ..
            })
        );
    }

    proptest! {
        #[test]
        fn round_trip_any(
            width in 1u32..=8192,
            height in 1u32..=4320,
            sampling_ix in 0usize..3,
            depth_ix in 0usize..3,
            num in 1u32..=120_000,
            den in 1u32..=1001,
            colorimetry_ix in 0usize..7,
            interlace: bool,
            segmented: bool,
            tcs_ix in 0usize..9,
            range_ix in 0usize..3,
            alpha: bool,
        ) {
            let video = VideoConfig {
                width,
                height,
                sampling: [VideoSampling::YCbCr444, VideoSampling::YCbCr422, VideoSampling::Rgb][sampling_ix],
                depth: [BitDepth::Eight, BitDepth::Ten, BitDepth::Twelve][depth_ix],
                frame_rate_num: num,
                frame_rate_den: den,
                colorimetry: [
                    Colorimetry::Bt601, Colorimetry::Bt709, Colorimetry::Bt2020,
                    Colorimetry::Bt2100, Colorimetry::St2065_1, Colorimetry::St2065_3,
                    Colorimetry::Xyz,
                ][colorimetry_ix],
                interlace,
                segmented,
                tcs: [
                    Tcs::Sdr, Tcs::Pq, Tcs::Hlg, Tcs::Linear, Tcs::Bt2100LinPq,
                    Tcs::Bt2100LinHlg, Tcs::St2065_1, Tcs::St428_1, Tcs::Density,
                ][tcs_ix],
                range: [VideoRange::Narrow, VideoRange::FullProtect, VideoRange::Full][range_ix],
                alpha: if alpha { AlphaUsage::Used } else { AlphaUsage::Unused },
                ..VideoConfig::default()
            };
            let config = BaselineConfig::Video(video);
            let generic = make_baseline_config(&config).unwrap();
            prop_assert_eq!(config, parse_baseline_config(&generic).unwrap());
        }
    }
}
