//! mkvmerge command composition: muxing streams from several source
//! files into one MKV, or joining sources end to end.


use std::fmt::{self, Display};
use std::path::Path;

use itertools::Itertools;
use tracing::warn;

use crate::probe::{MediaFile, Stream, StreamType};

#[derive(Clone, Copy, PartialEq, Eq, Debug, strum::EnumString, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum MkvmergeMode {
    /// Mux the selected streams side by side.
    Merge,
    /// Append the source files one after another.
    Join,
}

impl Display for MkvmergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(<&'static str>::from(self))
    }
}

// Positive and negative per-type selectors, in the order mkvmerge flags
// are emitted for every source file.
const TYPE_SELECTORS: &[(StreamType, &str, &str)] = &[
    (StreamType::Video, "--video-tracks", "--no-video"),
    (StreamType::Audio, "--audio-tracks", "--no-audio"),
    (StreamType::Subtitle, "--subtitle-tracks", "--no-subtitles"),
    (StreamType::Attachment, "--attachments", "--no-attachments"),
];

/// Builds the mkvmerge argv for the given input streams. Inputs are
/// grouped by source file preserving first-seen order; each file gets a
/// positive selector per stream type it contributes and a blanket
/// exclusion for the types it does not.
pub fn make_mkvmerge_command(
    executable: &str,
    output: &Path,
    inputs: &[Stream],
    mode: MkvmergeMode,
) -> Vec<String> {
    let mut source_files: Vec<MediaFile> = Vec::new();
    let mut track_order: Vec<String> = Vec::new();
    for stream in inputs {
        let file = stream.media_file();
        let file_id = match source_files.iter().position(|f| f == file) {
            Some(pos) => pos,
            None => {
                source_files.push(file.clone());
                source_files.len() - 1
            }
        };
        track_order.push(format!("{file_id}:{}", stream.idx()));
    }

    let mut cmd: Vec<String> = vec![
        executable.to_owned(),
        "--output".to_owned(),
        output.display().to_string(),
    ];
    for (file_id, file) in source_files.iter().enumerate() {
        for (stream_type, positive, negative) in TYPE_SELECTORS {
            let indices: Vec<usize> = inputs
                .iter()
                .filter(|s| s.media_file() == file && s.stream_type() == *stream_type)
                .map(Stream::idx)
                .collect();
            if indices.is_empty() {
                cmd.push((*negative).to_owned());
            } else {
                cmd.push((*positive).to_owned());
                cmd.push(indices.iter().map(ToString::to_string).join(","));
            }
        }
        if file_id > 0 && mode == MkvmergeMode::Join {
            cmd.push("+".to_owned());
        }
        cmd.push(file.path().display().to_string());
    }

    if inputs.iter().any(|s| s.stream_type() == StreamType::Data) {
        warn!("data streams cannot be selected by mkvmerge and are ignored");
    }

    if mode == MkvmergeMode::Merge {
        cmd.push("--track-order".to_owned());
        cmd.push(track_order.join(","));
    }

    cmd
}
