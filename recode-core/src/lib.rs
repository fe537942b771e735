//! Core of the recode engine: a declarative media-transcoding
//! orchestrator.
//!
//! A [`recipe::Recipe`] describes which input files are acceptable, what
//! arguments a run takes, how each kind of stream is transcoded, and how
//! the results are muxed back together. The engine validates the recipe
//! document against a [`grammar`]-based schema, gates candidate files
//! through the recipe's admission rules, materializes [`step`]s from the
//! selected processor configurations, and drives them through the
//! [`sprint`] scheduler.

pub mod encoder;
pub mod ffmpeg;
pub mod grammar;
pub mod logging;
pub mod mkvmerge;
pub mod parse;
pub mod probe;
pub mod recipe;
pub mod schema;
pub mod sprint;
pub mod step;
pub mod util;
pub mod workdir;

pub use encoder::{FfmpegEncoder, RateControlMode};
pub use mkvmerge::MkvmergeMode;
pub use probe::{MediaFile, Stream, StreamType};
pub use recipe::{Recipe, RecipeError};
pub use workdir::WorkingDirectory;
