use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, TestDefinition, DEFAULT_BITRATE, DEFAULT_I_FRAME_INTERVAL};

const DEFAULT_QUALITY: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BitrateMode {
    Cq,
    Vbr,
    #[default]
    Cbr,
    CbrFd,
}

impl BitrateMode {
    pub fn code(&self) -> i64 {
        match self {
            BitrateMode::Cq => 0,
            BitrateMode::Vbr => 1,
            BitrateMode::Cbr => 2,
            BitrateMode::CbrFd => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorRange {
    Full,
    #[default]
    Limited,
}

impl ColorRange {
    pub fn code(&self) -> i64 {
        match self {
            ColorRange::Full => 1,
            ColorRange::Limited => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorStandard {
    #[default]
    Bt709,
    Bt601Pal,
    Bt601Ntsc,
    Bt2020,
}

impl ColorStandard {
    pub fn code(&self) -> i64 {
        match self {
            ColorStandard::Bt709 => 1,
            ColorStandard::Bt601Pal => 2,
            ColorStandard::Bt601Ntsc => 4,
            ColorStandard::Bt2020 => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorTransfer {
    Linear,
    #[default]
    SdrVideo,
    St2084,
    Hlg,
}

impl ColorTransfer {
    pub fn code(&self) -> i64 {
        match self {
            ColorTransfer::Linear => 1,
            ColorTransfer::SdrVideo => 3,
            ColorTransfer::St2084 => 6,
            ColorTransfer::Hlg => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Int,
    Long,
    Float,
    #[serde(rename = "string")]
    Str,
}

impl ParamKind {
    pub fn parse(&self, raw: &str) -> Result<ParamValue, ConfigError> {
        match self {
            ParamKind::Int => magnitude_to_int(raw).map(ParamValue::Int),
            ParamKind::Long => raw
                .trim()
                .parse()
                .map(ParamValue::Long)
                .map_err(|_| ConfigError::Invalid(format!("'{raw}' is not a long value"))),
            ParamKind::Float => raw
                .trim()
                .parse()
                .map(ParamValue::Float)
                .map_err(|_| ConfigError::Invalid(format!("'{raw}' is not a float value"))),
            ParamKind::Str => Ok(ParamValue::Str(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Long(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(value) | ParamValue::Long(value) => Some(*value),
            _ => None,
        }
    }
}

/// Codec keys in the order they were set. Setting a key twice keeps its
/// original position and takes the newer value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodecParams {
    entries: Vec<(String, ParamValue)>,
}

impl CodecParams {
    pub fn set(&mut self, key: impl Into<String>, value: ParamValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for CodecParams {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Parses a bitrate-like magnitude such as `"2 Mbps"`, `"500k"` or `"64000"`.
///
/// Anything from `bps` onwards is ignored. A trailing `k` scales by one
/// thousand and a trailing `M` by one million. An empty string is zero.
pub fn magnitude_to_int(text: &str) -> Result<i64, ConfigError> {
    let text = match text.find("bps") {
        Some(index) if index > 0 => &text[..index],
        _ => text,
    }
    .trim();

    if text.is_empty() {
        return Ok(0);
    }

    let (digits, scale) = if let Some(rest) = text.strip_suffix('k') {
        (rest, 1_000)
    } else if let Some(rest) = text.strip_suffix('M') {
        (rest, 1_000_000)
    } else {
        (text, 1)
    };

    let value: i64 = digits
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("'{text}' is not a magnitude")))?;
    value
        .checked_mul(scale)
        .ok_or_else(|| ConfigError::Invalid(format!("'{text}' is out of range")))
}

impl TestDefinition {
    /// Translates the `[configure]` section into codec parameters. The
    /// frame size always comes from the input, whatever the encoder
    /// resolution says.
    pub fn codec_params(&self) -> Result<CodecParams, ConfigError> {
        let configure = &self.configure;
        let resolution = self.input_resolution();
        let mut params = CodecParams::default();

        params.set("mime", ParamValue::Str(configure.codec.clone()));
        params.set("width", ParamValue::Int(i64::from(resolution.width)));
        params.set("height", ParamValue::Int(i64::from(resolution.height)));

        let bitrate = configure.bitrate.as_deref().unwrap_or(DEFAULT_BITRATE);
        params.set("bitrate", ParamValue::Int(magnitude_to_int(bitrate)?));

        let mode = configure.bitrate_mode.unwrap_or_default();
        params.set("bitrate-mode", ParamValue::Int(mode.code()));

        let framerate = configure.framerate.unwrap_or_else(|| self.input_framerate());
        params.set("frame-rate", ParamValue::Float(f64::from(framerate)));

        let interval = configure
            .i_frame_interval
            .unwrap_or(DEFAULT_I_FRAME_INTERVAL);
        params.set("i-frame-interval", ParamValue::Int(i64::from(interval)));

        let quality = match (mode, configure.quality) {
            (BitrateMode::Cq, Some(level)) => i64::from(level),
            _ => DEFAULT_QUALITY,
        };
        params.set("quality", ParamValue::Int(quality));

        params.set(
            "color-range",
            ParamValue::Int(configure.color_range.unwrap_or_default().code()),
        );
        params.set(
            "color-standard",
            ParamValue::Int(configure.color_standard.unwrap_or_default().code()),
        );
        params.set(
            "color-transfer",
            ParamValue::Int(configure.color_transfer.unwrap_or_default().code()),
        );

        for param in &configure.parameters {
            let value = param.kind.parse(&param.value).map_err(|err| {
                ConfigError::Invalid(format!("parameter '{}': {err}", param.key))
            })?;
            params.set(param.key.clone(), value);
        }

        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnitudes_scale_by_suffix() {
        assert_eq!(magnitude_to_int("1 Mbps").unwrap(), 1_000_000);
        assert_eq!(magnitude_to_int("500 kbps").unwrap(), 500_000);
        assert_eq!(magnitude_to_int("750k").unwrap(), 750_000);
        assert_eq!(magnitude_to_int(" 64000 ").unwrap(), 64_000);
        assert_eq!(magnitude_to_int("").unwrap(), 0);
        assert_eq!(magnitude_to_int("  ").unwrap(), 0);
    }

    #[test]
    fn magnitudes_reject_garbage() {
        assert!(magnitude_to_int("fast").is_err());
        assert!(magnitude_to_int("1.5M").is_err());
        assert!(magnitude_to_int("10G").is_err());
    }

    fn definition(configure: &str) -> TestDefinition {
        let text = format!(
            "[input]\nfilepath = \"raw.rgba\"\nresolution = \"640x480\"\nframerate = 24\n\n[configure]\n{configure}"
        );
        TestDefinition::from_toml_str(&text).expect("parse test")
    }

    #[test]
    fn translates_defaults_in_order() {
        let params = definition("").codec_params().unwrap();
        let keys: Vec<_> = params.keys().collect();
        assert_eq!(
            keys,
            vec![
                "mime",
                "width",
                "height",
                "bitrate",
                "bitrate-mode",
                "frame-rate",
                "i-frame-interval",
                "quality",
                "color-range",
                "color-standard",
                "color-transfer",
            ]
        );
        assert_eq!(params.get("mime"), Some(&ParamValue::Str("video/avc".into())));
        assert_eq!(params.get("width"), Some(&ParamValue::Int(640)));
        assert_eq!(params.get("height"), Some(&ParamValue::Int(480)));
        assert_eq!(params.get("bitrate"), Some(&ParamValue::Int(1_000_000)));
        assert_eq!(params.get("bitrate-mode"), Some(&ParamValue::Int(2)));
        assert_eq!(params.get("frame-rate"), Some(&ParamValue::Float(24.0)));
        assert_eq!(params.get("i-frame-interval"), Some(&ParamValue::Int(10)));
        assert_eq!(params.get("quality"), Some(&ParamValue::Int(30)));
        assert_eq!(params.get("color-range"), Some(&ParamValue::Int(2)));
        assert_eq!(params.get("color-standard"), Some(&ParamValue::Int(1)));
        assert_eq!(params.get("color-transfer"), Some(&ParamValue::Int(3)));
    }

    #[test]
    fn quality_only_follows_the_test_in_cq_mode() {
        let cq = definition("bitrate_mode = \"cq\"\nquality = 12\n");
        assert_eq!(
            cq.codec_params().unwrap().get("quality"),
            Some(&ParamValue::Int(12))
        );

        let vbr = definition("bitrate_mode = \"vbr\"\nquality = 12\n");
        let params = vbr.codec_params().unwrap();
        assert_eq!(params.get("quality"), Some(&ParamValue::Int(30)));
        assert_eq!(params.get("bitrate-mode"), Some(&ParamValue::Int(1)));
    }

    #[test]
    fn width_comes_from_input_not_encoder_resolution() {
        let test = definition("resolution = \"320x240\"\n");
        let params = test.codec_params().unwrap();
        assert_eq!(params.get("width").and_then(ParamValue::as_int), Some(640));
    }

    #[test]
    fn named_colors_become_codec_constants() {
        let test = definition(
            "color_range = \"full\"\ncolor_standard = \"bt2020\"\ncolor_transfer = \"hlg\"\n",
        );
        let params = test.codec_params().unwrap();
        assert_eq!(params.get("color-range"), Some(&ParamValue::Int(1)));
        assert_eq!(params.get("color-standard"), Some(&ParamValue::Int(6)));
        assert_eq!(params.get("color-transfer"), Some(&ParamValue::Int(7)));
    }

    #[test]
    fn custom_parameters_are_typed_and_appended() {
        let test = definition(
            r#"
[[configure.parameter]]
key = "vendor.intra-refresh"
type = "int"
value = "2k"

[[configure.parameter]]
key = "durationUs"
type = "long"
value = "10000000000"

[[configure.parameter]]
key = "operating-rate"
type = "float"
value = 120.5

[[configure.parameter]]
key = "profile-name"
type = "string"
value = "main10"

[[configure.parameter]]
key = "i-frame-interval"
type = "int"
value = 1
"#,
        );
        let params = test.codec_params().unwrap();
        assert_eq!(params.len(), 15);
        assert_eq!(params.get("vendor.intra-refresh"), Some(&ParamValue::Int(2000)));
        assert_eq!(
            params.get("durationUs"),
            Some(&ParamValue::Long(10_000_000_000))
        );
        assert_eq!(params.get("operating-rate"), Some(&ParamValue::Float(120.5)));
        assert_eq!(
            params.get("profile-name"),
            Some(&ParamValue::Str("main10".into()))
        );
        assert_eq!(params.get("i-frame-interval"), Some(&ParamValue::Int(1)));
        assert_eq!(params.keys().nth(6), Some("i-frame-interval"));
    }

    #[test]
    fn invalid_custom_parameter_is_rejected() {
        let err = TestDefinition::from_toml_str(
            r#"
[input]
filepath = "raw.rgba"

[[configure.parameter]]
key = "operating-rate"
type = "float"
value = "fast"
"#,
        )
        .expect_err("bad float should be rejected");
        assert!(err.to_string().contains("operating-rate"), "{err}");
    }
}
