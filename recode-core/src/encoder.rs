//! Encoder handles: which codec to use and how to rate-control it.
//!
//! An encoder composes the output side of an ffmpeg command; the input
//! side and stream mapping are the command builder's business.


use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::probe::StreamType;

// Stream kind each known codec encodes, used for the `-c:v` / `-c:a`
// specifier. Unknown codecs fall back to a bare `-c`.
const VIDEO_CODECS: &[&str] = &[
    "libx264", "libx265", "libvpx", "libvpx-vp9", "libaom-av1", "libsvtav1", "rav1e",
];
const AUDIO_CODECS: &[&str] = &["aac", "libopus", "opus", "libmp3lame", "flac", "ac3"];

#[derive(
    Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize, strum::EnumString, strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum RateControlMode {
    /// Constant quality; the value is the CRF level.
    Crf,
    /// Average bitrate targeting, the mode two-pass encodes use.
    Vbr,
    /// Constrained bitrate with a capped buffer.
    Cbr,
}

impl Display for RateControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(<&'static str>::from(self))
    }
}

/// A configured encoder. Cloning yields an independent configuration, as
/// the two-pass step relies on when it derives its per-pass encoders.
#[derive(Clone, Debug, PartialEq)]
pub struct FfmpegEncoder {
    executable: String,
    codec: String,
    parameters: Vec<(String, String)>,
    rate: Option<(RateControlMode, u64)>,
    pass: Option<u8>,
}

impl FfmpegEncoder {
    pub fn new(codec: &str) -> FfmpegEncoder {
        Self::with_executable(codec, "ffmpeg")
    }

    pub fn with_executable(codec: &str, executable: &str) -> FfmpegEncoder {
        FfmpegEncoder {
            executable: executable.to_owned(),
            codec: codec.to_owned(),
            parameters: Vec::new(),
            rate: None,
            pass: None,
        }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn codec(&self) -> &str {
        &self.codec
    }

    /// Human-readable one-line description of the configuration.
    pub fn spec(&self) -> String {
        let mut parts = vec![self.codec.clone()];
        parts.extend(self.parameters.iter().map(|(k, v)| format!("{k}={v}")));
        if let Some((mode, value)) = &self.rate {
            parts.push(format!("{mode}={value}"));
        }
        if let Some(pass) = self.pass {
            parts.push(format!("pass={pass}"));
        }
        parts.join(" ")
    }

    /// Sets a codec parameter, replacing any earlier value for the key.
    pub fn set_parameter(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(existing) = self.parameters.iter_mut().find(|(k, _)| k == key) {
            existing.1 = value;
        } else {
            self.parameters.push((key.to_owned(), value));
        }
    }

    pub fn set_parameters<'a>(&mut self, kv: impl IntoIterator<Item = (&'a str, &'a str)>) {
        for (key, value) in kv {
            self.set_parameter(key, value);
        }
    }

    pub fn set_rate(&mut self, mode: RateControlMode, value: u64) {
        self.rate = Some((mode, value));
    }

    /// Marks the encoder as running pass 1 or 2 of a two-pass encode.
    pub fn set_pass(&mut self, pass: u8) {
        self.pass = Some(pass);
    }

    pub fn stream_type(&self) -> Option<StreamType> {
        if VIDEO_CODECS.contains(&self.codec.as_str()) {
            Some(StreamType::Video)
        } else if AUDIO_CODECS.contains(&self.codec.as_str()) {
            Some(StreamType::Audio)
        } else {
            None
        }
    }

    /// Container the encoded stream should land in.
    pub fn preferred_container(&self) -> &'static str {
        match self.codec.as_str() {
            "libx264" | "libx265" => "mp4",
            "libvpx" | "libvpx-vp9" | "libaom-av1" | "libsvtav1" | "rav1e" => "webm",
            "libopus" | "opus" => "ogg",
            "aac" => "m4a",
            "flac" => "flac",
            "libmp3lame" => "mp3",
            _ => "mkv",
        }
    }

    /// Output-side ffmpeg arguments: codec selection, codec parameters,
    /// rate control, and the two-pass marker.
    pub fn output_args(&self) -> Vec<String> {
        let codec_flag = match self.stream_type() {
            Some(StreamType::Video) => "-c:v",
            Some(StreamType::Audio) => "-c:a",
            _ => "-c",
        };
        let mut args = vec![codec_flag.to_owned(), self.codec.clone()];
        for (key, value) in &self.parameters {
            args.push(format!("-{key}"));
            args.push(value.clone());
        }
        match self.rate {
            Some((RateControlMode::Crf, level)) => {
                args.push("-crf".to_owned());
                args.push(level.to_string());
            }
            Some((RateControlMode::Vbr, bitrate)) => {
                args.push("-b:v".to_owned());
                args.push(bitrate.to_string());
            }
            Some((RateControlMode::Cbr, bitrate)) => {
                args.push("-b:v".to_owned());
                args.push(bitrate.to_string());
                args.push("-maxrate".to_owned());
                args.push(bitrate.to_string());
                args.push("-bufsize".to_owned());
                args.push((2 * bitrate).to_string());
            }
            None => {}
        }
        if let Some(pass) = self.pass {
            args.push("-pass".to_owned());
            args.push(pass.to_string());
        }
        args
    }
}
