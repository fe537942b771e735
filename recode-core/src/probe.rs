//! Read-only handles over probed media files.
//!
//! Probing shells out to `ffprobe` once per file and keeps the parsed JSON
//! around; everything else in the engine works off these handles and never
//! mutates them.


use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

pub type FfprobeInfo = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run {executable:?}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ffprobe failed for {path:?}: {stderr}")]
    Failed { path: PathBuf, stderr: String },
    #[error("unreadable ffprobe output for {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Debug, strum::EnumString, strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum StreamType {
    Video,
    Audio,
    Subtitle,
    Attachment,
    Data,
}

impl Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(<&'static str>::from(self))
    }
}

/// Filter for [`MediaFile::get_streams`].
#[derive(Debug, Default, Clone)]
pub struct StreamCriteria {
    pub codec_type: Option<StreamType>,
    pub codec: Option<String>,
}

/// File-level format numbers; fields are absent when the container does
/// not report them.
#[derive(Debug, Clone, Default)]
pub struct FormatInfo {
    pub size: Option<u64>,
    pub duration: Option<f64>,
    pub bit_rate: Option<u64>,
}

#[derive(Debug)]
struct StreamInfo {
    index: usize,
    stream_type: StreamType,
    ffinfo: FfprobeInfo,
}

#[derive(Debug)]
struct MediaInner {
    path: PathBuf,
    format: FormatInfo,
    has_chapters: bool,
    streams: Vec<StreamInfo>,
}

/// A probed media file. Cheap to clone; stream handles share the probe
/// data through it.
#[derive(Clone)]
pub struct MediaFile {
    inner: Arc<MediaInner>,
}

#[derive(Debug, Deserialize)]
struct RawProbe {
    #[serde(default)]
    streams: Vec<FfprobeInfo>,
    #[serde(default)]
    format: RawFormat,
    #[serde(default)]
    chapters: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
struct RawFormat {
    size: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

impl MediaFile {
    /// Probes a file on disk with the default `ffprobe` executable.
    pub fn open(path: &Path) -> Result<MediaFile, ProbeError> {
        Self::open_with(path, "ffprobe")
    }

    pub fn open_with(path: &Path, ffprobe: &str) -> Result<MediaFile, ProbeError> {
        let mut cmd = Command::new(ffprobe);
        cmd.args(["-v", "error", "-print_format", "json"])
            .args(["-show_format", "-show_streams", "-show_chapters"])
            .arg(path);
        debug!("probing: {cmd:?}");
        let output = cmd.output().map_err(|source| ProbeError::Spawn {
            executable: ffprobe.to_owned(),
            source,
        })?;
        if !output.status.success() {
            return Err(ProbeError::Failed {
                path: path.to_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Self::from_probe_json(path, &String::from_utf8_lossy(&output.stdout))
    }

    /// Builds a handle from raw ffprobe JSON.
    pub fn from_probe_json(path: &Path, json: &str) -> Result<MediaFile, ProbeError> {
        let raw: RawProbe = serde_json::from_str(json).map_err(|source| ProbeError::Parse {
            path: path.to_owned(),
            source,
        })?;

        let mut streams: Vec<StreamInfo> = raw
            .streams
            .into_iter()
            .map(|ffinfo| {
                let index = ffinfo
                    .get("index")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or_default() as usize;
                let stream_type = ffinfo
                    .get("codec_type")
                    .and_then(serde_json::Value::as_str)
                    .and_then(|ct| StreamType::from_str(ct).ok())
                    .unwrap_or_else(|| {
                        warn!("stream {index} of {path:?} has an unknown codec type");
                        StreamType::Data
                    });
                StreamInfo {
                    index,
                    stream_type,
                    ffinfo,
                }
            })
            .collect();
        streams.sort_by_key(|stream| stream.index);

        Ok(MediaFile {
            inner: Arc::new(MediaInner {
                path: path.to_owned(),
                format: FormatInfo {
                    size: raw.format.size.and_then(|s| s.parse().ok()),
                    duration: raw.format.duration.and_then(|s| s.parse().ok()),
                    bit_rate: raw.format.bit_rate.and_then(|s| s.parse().ok()),
                },
                has_chapters: !raw.chapters.is_empty(),
                streams,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn format_info(&self) -> &FormatInfo {
        &self.inner.format
    }

    pub fn has_chapters(&self) -> bool {
        self.inner.has_chapters
    }

    /// All streams, ordered by index.
    pub fn streams(&self) -> Vec<Stream> {
        (0..self.inner.streams.len())
            .map(|slot| Stream {
                file: self.clone(),
                slot,
            })
            .collect()
    }

    /// Streams matching the given criteria, ordered by index.
    pub fn get_streams(&self, criteria: &StreamCriteria) -> Vec<Stream> {
        self.streams()
            .into_iter()
            .filter(|stream| {
                criteria
                    .codec_type
                    .map_or(true, |t| stream.stream_type() == t)
                    && criteria.codec.as_deref().map_or(true, |codec| {
                        stream.get("codec_name").and_then(serde_json::Value::as_str)
                            == Some(codec)
                    })
            })
            .collect()
    }
}

impl fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaFile")
            .field("path", &self.inner.path)
            .field("streams", &self.inner.streams.len())
            .finish()
    }
}

impl PartialEq for MediaFile {
    fn eq(&self, other: &Self) -> bool {
        self.inner.path == other.inner.path
    }
}

impl Eq for MediaFile {}

impl std::hash::Hash for MediaFile {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.path.hash(state);
    }
}

/// Handle to a single stream of a probed file.
#[derive(Clone, PartialEq)]
pub struct Stream {
    file: MediaFile,
    slot: usize,
}

impl Stream {
    fn info(&self) -> &StreamInfo {
        &self.file.inner.streams[self.slot]
    }

    /// Index of the stream within its media file.
    pub fn idx(&self) -> usize {
        self.info().index
    }

    pub fn media_file(&self) -> &MediaFile {
        &self.file
    }

    pub fn stream_type(&self) -> StreamType {
        self.info().stream_type
    }

    /// Looks up a raw probe key, e.g. `codec_name` or `width`.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.info().ffinfo.get(key)
    }

    pub fn ffinfo(&self) -> &FfprobeInfo {
        &self.info().ffinfo
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stream({}#{} {})",
            self.file.inner.path.display(),
            self.idx(),
            self.stream_type()
        )
    }
}
