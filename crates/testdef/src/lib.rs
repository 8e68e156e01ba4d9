//! Declarative benchmark test definitions.
//!
//! A test is a TOML document with three sections: `[input]` describes the
//! raw file that gets played out, `[configure]` the codec settings it is
//! translated into, and `[render]` how the pacing engine presents it.

mod codec;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

pub use codec::{
    magnitude_to_int, BitrateMode, CodecParams, ColorRange, ColorStandard, ColorTransfer,
    ParamKind, ParamValue,
};

pub const DEFAULT_INPUT_RESOLUTION: Resolution = Resolution {
    width: 1280,
    height: 720,
};
pub const DEFAULT_FRAMERATE: f32 = 30.0;
pub const DEFAULT_BITRATE: &str = "1 Mbps";
pub const DEFAULT_I_FRAME_INTERVAL: u32 = 10;
pub const DEFAULT_REFRESH_RATE: f64 = 60.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read test definition {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse test definition: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid test definition: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::Invalid(format!("resolution '{raw}' is not WIDTHxHEIGHT"));
        let (width, height) = raw
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(invalid)?;
        let width: u32 = width.trim().parse().map_err(|_| invalid())?;
        let height: u32 = height.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(ConfigError::Invalid(format!(
                "resolution '{raw}' must be non-zero in both dimensions"
            )));
        }
        Ok(Self { width, height })
    }
}

impl Serialize for Resolution {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Rgba,
    Yuv420p,
    Nv12,
}

impl PixelFormat {
    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Rgba => "rgba",
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Nv12 => "nv12",
        }
    }

    pub fn bytes_per_pixel(&self) -> Option<u64> {
        match self {
            PixelFormat::Rgba => Some(4),
            PixelFormat::Yuv420p | PixelFormat::Nv12 => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Feed {
    /// Codec-buffer tokens released back to a bounded pool.
    #[default]
    Frames,
    /// Pixels written to the input surface, then a bare frame-ready signal.
    Signal,
    /// Every frame delivered as a still image.
    Stills,
}

impl FromStr for Feed {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "frames" => Ok(Feed::Frames),
            "signal" => Ok(Feed::Signal),
            "stills" => Ok(Feed::Stills),
            other => Err(ConfigError::Invalid(format!("unknown feed '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestDefinition {
    pub input: InputConfig,
    #[serde(default)]
    pub configure: CodecConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    pub filepath: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framerate: Option<f32>,
    #[serde(default)]
    pub pix_fmt: PixelFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playout_frames: Option<u64>,
    #[serde(default)]
    pub realtime: bool,
    #[serde(default, rename = "loop")]
    pub looping: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CodecConfig {
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(
        default,
        deserialize_with = "deserialize_magnitude_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub bitrate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate_mode: Option<BitrateMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i_frame_interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framerate: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_range: Option<ColorRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_standard: Option<ColorStandard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_transfer: Option<ColorTransfer>,
    #[serde(default, rename = "parameter", skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<CustomParameter>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            codec: default_codec(),
            bitrate: None,
            bitrate_mode: None,
            i_frame_interval: None,
            quality: None,
            framerate: None,
            resolution: None,
            color_range: None,
            color_standard: None,
            color_transfer: None,
            parameters: Vec::new(),
        }
    }
}

/// A codec key passed through verbatim with an explicit value type.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CustomParameter {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    #[serde(deserialize_with = "deserialize_magnitude")]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenderConfig {
    #[serde(default = "default_true")]
    pub drop_frames: bool,
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        serialize_with = "serialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub late_tolerance: Option<Duration>,
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        serialize_with = "serialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub idle_timeout: Option<Duration>,
    #[serde(default = "default_refresh_rate")]
    pub refresh_rate: f64,
    #[serde(default)]
    pub feed: Feed,
    #[serde(default)]
    pub sync: bool,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            drop_frames: true,
            late_tolerance: None,
            idle_timeout: None,
            refresh_rate: DEFAULT_REFRESH_RATE,
            feed: Feed::default(),
            sync: false,
            targets: Vec::new(),
        }
    }
}

/// An extra off-screen output attached for part of the playout.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TargetConfig {
    pub name: String,
    pub resolution: Resolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attach_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detach_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<PathBuf>,
}

impl TargetConfig {
    pub fn attach_frame(&self) -> u64 {
        self.attach_at.unwrap_or(0)
    }
}

fn default_codec() -> String {
    "video/avc".to_string()
}

fn default_true() -> bool {
    true
}

fn default_refresh_rate() -> f64 {
    DEFAULT_REFRESH_RATE
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u64::try_from(v)
                .map(|secs| Some(Duration::from_secs(secs)))
                .map_err(|_| E::custom("duration must be non-negative"))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Duration::try_from_secs_f64(v)
                .map(Some)
                .map_err(|_| E::custom(format!("duration of {v} seconds is out of range")))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn serialize_duration_opt<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(duration) => serializer.collect_str(&humantime::format_duration(*duration)),
        None => serializer.serialize_none(),
    }
}

/// Accepts `"2 Mbps"` as well as a bare `2000000`.
fn deserialize_magnitude<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Str(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Helper::deserialize(deserializer)? {
        Helper::Str(raw) => raw,
        Helper::Int(value) => value.to_string(),
        Helper::Float(value) => value.to_string(),
    })
}

fn deserialize_magnitude_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_magnitude(deserializer).map(Some)
}

impl TestDefinition {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: TestDefinition = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Loads a test file. A relative `input.filepath` is resolved against
    /// the directory holding the test.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut test = Self::from_toml_str(&text)?;
        if test.input.filepath.is_relative() {
            if let Some(parent) = path.parent() {
                test.input.filepath = parent.join(&test.input.filepath);
            }
        }
        Ok(test)
    }

    /// Fills in the basic settings every run needs when the test leaves
    /// them out.
    pub fn apply_basic_defaults(&mut self) {
        let input = &mut self.input;
        let resolution = *input.resolution.get_or_insert(DEFAULT_INPUT_RESOLUTION);
        let framerate = *input.framerate.get_or_insert(DEFAULT_FRAMERATE);

        let configure = &mut self.configure;
        configure
            .bitrate
            .get_or_insert_with(|| DEFAULT_BITRATE.to_string());
        configure.framerate.get_or_insert(framerate);
        configure
            .i_frame_interval
            .get_or_insert(DEFAULT_I_FRAME_INTERVAL);
        configure.resolution.get_or_insert(resolution);
    }

    pub fn with_basic_defaults(mut self) -> Self {
        self.apply_basic_defaults();
        self
    }

    pub fn with_encoder_resolution(mut self, resolution: Resolution) -> Self {
        self.configure.resolution = Some(resolution);
        self
    }

    pub fn input_resolution(&self) -> Resolution {
        self.input.resolution.unwrap_or(DEFAULT_INPUT_RESOLUTION)
    }

    pub fn input_framerate(&self) -> f32 {
        self.input.framerate.unwrap_or(DEFAULT_FRAMERATE)
    }

    /// Byte size of one raw input frame.
    pub fn frame_size(&self) -> u64 {
        let bytes_per_pixel = self.input.pix_fmt.bytes_per_pixel().unwrap_or(4);
        self.input_resolution().pixels() * bytes_per_pixel
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.filepath.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("input.filepath may not be empty".into()));
        }

        if self.input.pix_fmt.bytes_per_pixel().is_none() {
            return Err(ConfigError::Invalid(format!(
                "input.pix_fmt '{}' is not supported; raw inputs must be rgba",
                self.input.pix_fmt.name()
            )));
        }

        for (name, framerate) in [
            ("input.framerate", self.input.framerate),
            ("configure.framerate", self.configure.framerate),
        ] {
            if let Some(fps) = framerate {
                if !(fps.is_finite() && fps > 0.0) {
                    return Err(ConfigError::Invalid(format!("{name} must be > 0")));
                }
            }
        }

        if self.configure.codec.trim().is_empty() {
            return Err(ConfigError::Invalid("configure.codec may not be empty".into()));
        }

        if let Some(bitrate) = &self.configure.bitrate {
            magnitude_to_int(bitrate)?;
        }

        for param in &self.configure.parameters {
            if param.key.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "configure.parameter entries need a key".into(),
                ));
            }
            param.kind.parse(&param.value).map_err(|err| {
                ConfigError::Invalid(format!("parameter '{}': {err}", param.key))
            })?;
        }

        let render = &self.render;
        if !(render.refresh_rate.is_finite() && render.refresh_rate > 0.0) {
            return Err(ConfigError::Invalid("render.refresh_rate must be > 0".into()));
        }
        if Duration::try_from_secs_f64(1.0 / render.refresh_rate).is_err() {
            return Err(ConfigError::Invalid(format!(
                "render.refresh_rate {} Hz is too low",
                render.refresh_rate
            )));
        }

        if let Some(timeout) = render.idle_timeout {
            if timeout.is_zero() {
                return Err(ConfigError::Invalid(
                    "render.idle_timeout must be greater than zero".into(),
                ));
            }
        }

        let mut names = std::collections::BTreeSet::new();
        for target in &render.targets {
            if target.name.trim().is_empty() {
                return Err(ConfigError::Invalid("render target name may not be empty".into()));
            }
            if !names.insert(target.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "render target '{}' is defined twice",
                    target.name
                )));
            }
            if let (Some(attach), Some(detach)) = (target.attach_at, target.detach_at) {
                if detach <= attach {
                    return Err(ConfigError::Invalid(format!(
                        "render target '{}' detach_at must come after attach_at",
                        target.name
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[input]
filepath = "clips/akiyo_1280x720.rgba"
resolution = "1280x720"
framerate = 30
playout_frames = 300
loop = true

[configure]
codec = "video/hevc"
bitrate = "2 Mbps"
bitrate_mode = "vbr"
i_frame_interval = 2
color_standard = "bt601_pal"

[[configure.parameter]]
key = "vendor.qcom-ext-enc-custom-profile-level.profile"
type = "int"
value = "1"

[[configure.parameter]]
key = "max-bframes"
type = "int"
value = 2

[render]
drop_frames = false
late_tolerance = "2s"
idle_timeout = "500ms"
refresh_rate = 59.94
feed = "signal"

[[render.targets]]
name = "preview"
resolution = "640x360"
attach_at = 10
detach_at = 200
capture = "preview.png"
"#;

    #[test]
    fn parses_sample_definition() {
        let test = TestDefinition::from_toml_str(SAMPLE).expect("parse test");
        assert_eq!(test.input.resolution, Some(Resolution::new(1280, 720)));
        assert_eq!(test.input.playout_frames, Some(300));
        assert!(test.input.looping);
        assert_eq!(test.configure.codec, "video/hevc");
        assert_eq!(test.configure.bitrate_mode, Some(BitrateMode::Vbr));
        assert_eq!(test.configure.parameters.len(), 2);
        assert_eq!(test.configure.parameters[1].value, "2");
        assert!(!test.render.drop_frames);
        assert_eq!(test.render.late_tolerance, Some(Duration::from_secs(2)));
        assert_eq!(test.render.idle_timeout, Some(Duration::from_millis(500)));
        assert_eq!(test.render.feed, Feed::Signal);
        let target = &test.render.targets[0];
        assert_eq!(target.resolution, Resolution::new(640, 360));
        assert_eq!(target.attach_frame(), 10);
        assert_eq!(target.capture.as_deref(), Some(Path::new("preview.png")));
    }

    #[test]
    fn minimal_definition_gets_basic_defaults() {
        let mut test = TestDefinition::from_toml_str(
            r#"
[input]
filepath = "raw.rgba"
"#,
        )
        .expect("parse minimal test");
        assert_eq!(test.configure.codec, "video/avc");
        assert!(test.render.drop_frames);
        assert_eq!(test.render.refresh_rate, DEFAULT_REFRESH_RATE);

        test.apply_basic_defaults();
        assert_eq!(test.input.resolution, Some(Resolution::new(1280, 720)));
        assert_eq!(test.input.framerate, Some(30.0));
        assert_eq!(test.configure.bitrate.as_deref(), Some("1 Mbps"));
        assert_eq!(test.configure.framerate, Some(30.0));
        assert_eq!(test.configure.i_frame_interval, Some(10));
        assert_eq!(test.configure.resolution, Some(Resolution::new(1280, 720)));
    }

    #[test]
    fn basic_defaults_keep_explicit_settings() {
        let test = TestDefinition::from_toml_str(
            r#"
[input]
filepath = "raw.rgba"
resolution = "320x240"
framerate = 25

[configure]
bitrate = 500000
i_frame_interval = 1
"#,
        )
        .expect("parse test")
        .with_basic_defaults();
        assert_eq!(test.configure.bitrate.as_deref(), Some("500000"));
        assert_eq!(test.configure.framerate, Some(25.0));
        assert_eq!(test.configure.i_frame_interval, Some(1));
        assert_eq!(test.configure.resolution, Some(Resolution::new(320, 240)));
    }

    #[test]
    fn frame_size_counts_rgba_bytes() {
        let test = TestDefinition::from_toml_str(SAMPLE).expect("parse test");
        assert_eq!(test.frame_size(), 1280 * 720 * 4);
        let small = test.with_encoder_resolution(Resolution::new(16, 16));
        assert_eq!(small.frame_size(), 1280 * 720 * 4);
    }

    #[test]
    fn parses_resolutions() {
        assert_eq!(
            "1920x1080".parse::<Resolution>().unwrap(),
            Resolution::new(1920, 1080)
        );
        assert_eq!(" 64X48 ".parse::<Resolution>().unwrap(), Resolution::new(64, 48));
        assert!("1920".parse::<Resolution>().is_err());
        assert!("0x10".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn rejects_non_rgba_input() {
        let err = TestDefinition::from_toml_str(
            r#"
[input]
filepath = "raw.yuv"
pix_fmt = "yuv420p"
"#,
        )
        .expect_err("yuv input should be rejected");
        assert!(err.to_string().contains("rgba"), "{err}");
    }

    #[test]
    fn rejects_bad_bitrate() {
        let err = TestDefinition::from_toml_str(
            r#"
[input]
filepath = "raw.rgba"

[configure]
bitrate = "fast"
"#,
        )
        .expect_err("bitrate should be rejected");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_target_window() {
        let err = TestDefinition::from_toml_str(
            r#"
[input]
filepath = "raw.rgba"

[[render.targets]]
name = "late"
resolution = "64x64"
attach_at = 20
detach_at = 5
"#,
        )
        .expect_err("inverted window should be rejected");
        assert!(err.to_string().contains("detach_at"), "{err}");
    }

    #[test]
    fn rejects_duplicate_target_names() {
        let err = TestDefinition::from_toml_str(
            r#"
[input]
filepath = "raw.rgba"

[[render.targets]]
name = "a"
resolution = "64x64"

[[render.targets]]
name = "a"
resolution = "32x32"
"#,
        )
        .expect_err("duplicate names should be rejected");
        assert!(err.to_string().contains("twice"), "{err}");
    }

    #[test]
    fn rejects_negative_duration() {
        let err = TestDefinition::from_toml_str(
            r#"
[input]
filepath = "raw.rgba"

[render]
late_tolerance = -1
"#,
        )
        .expect_err("negative duration should fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_out_of_range_durations() {
        for value in ["1e300", "inf"] {
            let err = TestDefinition::from_toml_str(&format!(
                "[input]\nfilepath = \"raw.rgba\"\n\n[render]\nlate_tolerance = {value}\n"
            ))
            .expect_err("oversized duration should fail");
            assert!(matches!(err, ConfigError::Parse(_)), "{value}: {err}");
        }
    }

    #[test]
    fn rejects_refresh_rate_without_representable_period() {
        let err = TestDefinition::from_toml_str(
            r#"
[input]
filepath = "raw.rgba"

[render]
refresh_rate = 1e-300
"#,
        )
        .expect_err("vanishing refresh rate should fail");
        assert!(err.to_string().contains("refresh_rate"), "{err}");
    }

    #[test]
    fn parses_feed_names() {
        assert_eq!("Stills".parse::<Feed>().unwrap(), Feed::Stills);
        assert!("video".parse::<Feed>().is_err());
    }
}
