//! Composition of ffmpeg command lines from inputs, options, a stream
//! mapping, and an encoder configuration.


use std::path::{Path, PathBuf};

use crate::encoder::FfmpegEncoder;
use crate::into_vec;

const NULL_SINK: &str = if cfg!(windows) { "NUL" } else { "/dev/null" };

/// One `-i` input with its input-side flags.
#[derive(Debug, Clone)]
pub struct FfmpegInput {
    pub file: PathBuf,
    /// Force a constant input frame rate (`-r` before `-i`).
    pub fix_fps: Option<f64>,
    /// Free-form extra input flags, already split into argv words.
    pub more: Vec<String>,
}

impl FfmpegInput {
    pub fn new(file: impl Into<PathBuf>) -> FfmpegInput {
        FfmpegInput {
            file: file.into(),
            fix_fps: None,
            more: Vec::new(),
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(fps) = self.fix_fps {
            args.push("-r".to_owned());
            args.push(fps.to_string());
        }
        args.extend(self.more.iter().cloned());
        args.push("-i".to_owned());
        args.push(self.file.display().to_string());
        args
    }
}

/// Global output-side switches.
#[derive(Debug, Clone)]
pub struct FfmpegOptions {
    pub hide_banner: bool,
    pub no_stats: bool,
    pub overwrite: bool,
    pub loglevel: Option<String>,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        FfmpegOptions {
            hide_banner: true,
            no_stats: true,
            overwrite: true,
            loglevel: Some("error".to_owned()),
        }
    }
}

impl FfmpegOptions {
    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.overwrite {
            args.push("-y".to_owned());
        }
        if self.hide_banner {
            args.push("-hide_banner".to_owned());
        }
        if self.no_stats {
            args.push("-nostats".to_owned());
        }
        if let Some(level) = &self.loglevel {
            args.push("-loglevel".to_owned());
            args.push(level.clone());
        }
        args
    }
}

/// Maps stream `stream` of input number `input` into the output.
#[derive(Debug, Clone, Copy)]
pub struct StreamMap {
    pub input: usize,
    pub stream: usize,
}

/// Builds the full argv for one encode. Without an output path the
/// command ends in a null sink, which is what pass 1 of a two-pass
/// encode wants.
pub fn build_ffmpeg_command(
    inputs: &[FfmpegInput],
    encoder: &FfmpegEncoder,
    options: &FfmpegOptions,
    mapping: &[StreamMap],
    output: Option<&Path>,
    extra: &[String],
) -> Vec<String> {
    let mut cmd: Vec<String> = into_vec![encoder.executable()];
    cmd.extend(options.args());
    for input in inputs {
        cmd.extend(input.args());
    }
    for map in mapping {
        cmd.push("-map".to_owned());
        cmd.push(format!("{}:{}", map.input, map.stream));
    }
    cmd.extend(encoder.output_args());
    cmd.extend(extra.iter().cloned());
    match output {
        Some(path) => cmd.push(path.display().to_string()),
        None => {
            cmd.push("-f".to_owned());
            cmd.push("null".to_owned());
            cmd.push(NULL_SINK.to_owned());
        }
    }
    cmd
}
