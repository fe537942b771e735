//! Processing steps: the units a transcoding plan is made of.
//!
//! A step validates its parameters at construction, runs exactly once,
//! and leaves behind a result carrying an output artifact and/or the
//! steps of the next sprint. Failure handling and sequencing are the
//! scheduler's business, not the step's.

#[cfg(test)]
mod tests;

use std::fmt::{self, Debug, Display};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::encoder::{FfmpegEncoder, RateControlMode};
use crate::ffmpeg::{build_ffmpeg_command, FfmpegInput, FfmpegOptions, StreamMap};
use crate::mkvmerge::{make_mkvmerge_command, MkvmergeMode};
use crate::parse::parse_bitrate;
use crate::probe::{MediaFile, ProbeError, Stream};
use crate::workdir::{available_pass_log_name, pass_log_file_names, WorkingDirectory};

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("missing required parameter '{0}'")]
    Missing(&'static str),
    #[error("invalid parameter '{name}': {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl ParameterError {
    fn invalid(name: &'static str, reason: impl Into<String>) -> ParameterError {
        ParameterError::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

/// Captured stdio of an external command, kept printable when it is
/// valid UTF-8.
#[derive(Clone)]
pub enum StringOrBytes {
    String(String),
    Bytes(Vec<u8>),
}

impl Debug for StringOrBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Bytes(b) => write!(f, "raw bytes: {b:?}"),
        }
    }
}

impl From<Vec<u8>> for StringOrBytes {
    fn from(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(s) => Self::String(s),
            Err(e) => Self::Bytes(e.into_bytes()),
        }
    }
}

/// An external command exited with a failure status.
#[derive(Debug, Error)]
pub struct CommandCrash {
    pub program: String,
    pub exit_status: ExitStatus,
    pub stdout: StringOrBytes,
    pub stderr: StringOrBytes,
}

impl Display for CommandCrash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} crashed: {}\nstdout:\n{:?}\nstderr:\n{:?}",
            self.program, self.exit_status, self.stdout, self.stderr
        )
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    CommandFailed(#[from] Box<CommandCrash>),
    #[error("multiplexing produced no output file at {0:?}")]
    MultiplexFailed(PathBuf),
    #[error("expected artifact is missing: {0:?}")]
    MissingArtifact(PathBuf),
    #[error("result queried before a successful run")]
    ResultNotReady,
    #[error("step already completed; a retry needs a fresh step")]
    AlreadyCompleted,
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error("probing a produced artifact failed: {0}")]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Runs an argv vector, capturing stdio; non-zero exit is an error
/// carrying the captured streams.
fn run_command(argv: &[String]) -> Result<(), StepError> {
    let (program, args) = argv.split_first().expect("non-empty command");
    debug!("executing: {argv:?}");
    let output = Command::new(program).args(args).output()?;
    if !output.status.success() {
        return Err(Box::new(CommandCrash {
            program: program.clone(),
            exit_status: output.status,
            stdout: output.stdout.into(),
            stderr: output.stderr.into(),
        })
        .into());
    }
    Ok(())
}

/// What a completed step leaves behind.
#[derive(Debug, Default)]
pub struct StepResult {
    pub output_media_file: Option<MediaFile>,
    pub next_sprint_steps: Vec<Box<dyn ProcessingStep>>,
}

/// A single unit of the transcoding plan.
///
/// Lifecycle: constructed (parameters verified) -> `run` once ->
/// `take_result`. Running a completed step or taking the result of an
/// unfinished one is a programmer error and fails accordingly.
pub trait ProcessingStep: Debug {
    /// Checks the parameters; construction runs this and fails on error.
    fn verify(&self) -> Result<(), ParameterError>;

    /// Executes the step and stores its result.
    fn run(&mut self) -> Result<(), StepError>;

    /// Takes the stored result of a successful run.
    fn take_result(&mut self) -> Result<StepResult, StepError>;
}

/// Shared completed/result bookkeeping for the concrete steps.
#[derive(Debug, Default)]
struct StepState {
    result: Option<StepResult>,
    completed: bool,
}

impl StepState {
    fn begin(&mut self) -> Result<(), StepError> {
        if self.completed {
            return Err(StepError::AlreadyCompleted);
        }
        Ok(())
    }

    fn finish(&mut self, result: StepResult) {
        self.result = Some(result);
        self.completed = true;
    }

    fn take(&mut self) -> Result<StepResult, StepError> {
        self.result.take().ok_or(StepError::ResultNotReady)
    }
}

/// Parameters of [`MkvmergeStep`].
#[derive(Debug, Clone)]
pub struct MkvmergeParams {
    /// Streams to mux, in the order they should appear in the output.
    pub inputs: Vec<Stream>,
    /// Target path; must carry an `.mkv` suffix and not exist yet.
    pub output: PathBuf,
    pub mode: MkvmergeMode,
    pub executable: Option<String>,
}

/// Muxes or joins streams into an MKV file with mkvmerge.
#[derive(Debug)]
pub struct MkvmergeStep {
    params: MkvmergeParams,
    state: StepState,
}

impl MkvmergeStep {
    pub fn new(params: MkvmergeParams) -> Result<MkvmergeStep, ParameterError> {
        let step = MkvmergeStep {
            params,
            state: StepState::default(),
        };
        step.verify()?;
        Ok(step)
    }
}

impl ProcessingStep for MkvmergeStep {
    fn verify(&self) -> Result<(), ParameterError> {
        if self.params.inputs.is_empty() {
            return Err(ParameterError::Missing("inputs"));
        }
        let output = &self.params.output;
        let is_mkv = output
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mkv"));
        if !is_mkv {
            return Err(ParameterError::invalid(
                "output",
                format!("expected an .mkv path, got {}", output.display()),
            ));
        }
        if output.exists() {
            return Err(ParameterError::invalid(
                "output",
                format!("{} already exists", output.display()),
            ));
        }
        Ok(())
    }

    fn run(&mut self) -> Result<(), StepError> {
        self.state.begin()?;
        let executable = self.params.executable.as_deref().unwrap_or("mkvmerge");
        let cmd = make_mkvmerge_command(
            executable,
            &self.params.output,
            &self.params.inputs,
            self.params.mode,
        );
        run_command(&cmd)?;
        if !self.params.output.exists() {
            return Err(StepError::MultiplexFailed(self.params.output.clone()));
        }
        let output_media_file = MediaFile::open(&self.params.output)?;
        self.state.finish(StepResult {
            output_media_file: Some(output_media_file),
            next_sprint_steps: Vec::new(),
        });
        Ok(())
    }

    fn take_result(&mut self) -> Result<StepResult, StepError> {
        self.state.take()
    }
}

/// Input-side options of a transcode, as selected by the recipe.
#[derive(Debug, Clone, Default)]
pub struct InputOptions {
    pub fix_fps: Option<f64>,
    pub more: Vec<String>,
}

/// Parameters shared by the single-pass and two-pass transcode steps.
#[derive(Debug, Clone)]
pub struct TranscodeParams {
    pub input: Stream,
    pub input_opt: InputOptions,
    pub encoder: FfmpegEncoder,
    pub ffmpeg_opt: FfmpegOptions,
}

impl TranscodeParams {
    fn verify(&self) -> Result<(), ParameterError> {
        if let Some(fps) = self.input_opt.fix_fps {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(ParameterError::invalid("fix_fps", format!("{fps}")));
            }
        }
        if let Some(kind) = self.encoder.stream_type() {
            if kind != self.input.stream_type() {
                return Err(ParameterError::invalid(
                    "encoder",
                    format!(
                        "{} encodes {kind} but the input is a {} stream",
                        self.encoder.codec(),
                        self.input.stream_type()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn ffmpeg_input(&self) -> FfmpegInput {
        FfmpegInput {
            file: self.input.media_file().path().to_owned(),
            fix_fps: self.input_opt.fix_fps,
            more: self.input_opt.more.clone(),
        }
    }

    fn mapping(&self) -> [StreamMap; 1] {
        [StreamMap {
            input: 0,
            stream: self.input.idx(),
        }]
    }

    /// Allocates the output artifact `stream<idx>.<container>`.
    fn new_output_file(&self, wd: &WorkingDirectory) -> io::Result<PathBuf> {
        wd.new_file(&format!(
            "stream{}.{}",
            self.input.idx(),
            self.encoder.preferred_container()
        ))
    }
}

/// Transcodes one stream with a single ffmpeg pass.
#[derive(Debug)]
pub struct TranscodeStep {
    params: TranscodeParams,
    wd: Arc<WorkingDirectory>,
    state: StepState,
}

impl TranscodeStep {
    pub fn new(
        params: TranscodeParams,
        wd: Arc<WorkingDirectory>,
    ) -> Result<TranscodeStep, ParameterError> {
        let step = TranscodeStep {
            params,
            wd,
            state: StepState::default(),
        };
        step.verify()?;
        Ok(step)
    }
}

impl ProcessingStep for TranscodeStep {
    fn verify(&self) -> Result<(), ParameterError> {
        self.params.verify()
    }

    fn run(&mut self) -> Result<(), StepError> {
        self.state.begin()?;
        let output = self.params.new_output_file(&self.wd)?;
        let cmd = build_ffmpeg_command(
            &[self.params.ffmpeg_input()],
            &self.params.encoder,
            &self.params.ffmpeg_opt,
            &self.params.mapping(),
            Some(&output),
            &[],
        );
        run_command(&cmd)?;
        if !output.exists() {
            return Err(StepError::MissingArtifact(output));
        }
        let output_media_file = MediaFile::open(&output)?;
        self.state.finish(StepResult {
            output_media_file: Some(output_media_file),
            next_sprint_steps: Vec::new(),
        });
        Ok(())
    }

    fn take_result(&mut self) -> Result<StepResult, StepError> {
        self.state.take()
    }
}

/// Parameters of [`TwoPassStep`].
#[derive(Debug, Clone)]
pub struct TwoPassParams {
    pub transcode: TranscodeParams,
    /// Target bitrate in bits per second; integers and human-friendly
    /// strings like `2000k` or `2M` are accepted.
    pub target_bitrate: serde_yaml::Value,
    /// Stats-file base name. Never set by callers: pass 1 sets it on the
    /// pass-2 step it spawns.
    pub pass_log: Option<String>,
}

/// Target-bitrate encode in two ffmpeg passes.
///
/// Pass 1 analyzes the stream into a stats-file pair and spawns the
/// pass-2 step through `next_sprint_steps`; pass 2 produces the actual
/// output. The stats files are parked in the working directory between
/// the two sprints.
#[derive(Debug)]
pub struct TwoPassStep {
    params: TwoPassParams,
    wd: Arc<WorkingDirectory>,
    state: StepState,
}

impl TwoPassStep {
    pub fn new(
        params: TwoPassParams,
        wd: Arc<WorkingDirectory>,
    ) -> Result<TwoPassStep, ParameterError> {
        let step = TwoPassStep {
            params,
            wd,
            state: StepState::default(),
        };
        step.verify()?;
        Ok(step)
    }

    fn bitrate(&self) -> Result<u64, ParameterError> {
        parse_bitrate(&self.params.target_bitrate).ok_or_else(|| {
            ParameterError::invalid(
                "target_bitrate",
                format!("{:?}", self.params.target_bitrate),
            )
        })
    }

    /// The encoder configuration for one pass of this encode.
    fn pass_encoder(&self, pass: u8) -> Result<FfmpegEncoder, ParameterError> {
        let mut encoder = self.params.transcode.encoder.clone();
        encoder.set_pass(pass);
        encoder.set_rate(RateControlMode::Vbr, self.bitrate()?);
        Ok(encoder)
    }

    fn run_pass1(&mut self) -> Result<(), StepError> {
        let base = available_pass_log_name(
            self.wd.cwd(),
            &format!("stream{}_passlog", self.params.transcode.input.idx()),
        );
        let encoder = self.pass_encoder(1)?;
        let cmd = build_ffmpeg_command(
            &[self.params.transcode.ffmpeg_input()],
            &encoder,
            &self.params.transcode.ffmpeg_opt,
            &self.params.transcode.mapping(),
            None,
            &["-passlogfile".to_owned(), base.clone()],
        );
        run_command(&cmd)?;

        // Park the stats files in the working directory until pass 2.
        let (log, mbtree) = pass_log_file_names(&base);
        for name in [log, mbtree] {
            let produced = self.wd.cwd().join(&name);
            if !produced.exists() {
                return Err(StepError::MissingArtifact(produced));
            }
            let parked = self.wd.get_file(&name);
            if parked.exists() {
                warn!("overwriting stale stats file {}", parked.display());
            }
            fs::copy(&produced, &parked)?;
            fs::remove_file(&produced)?;
        }

        let mut next_params = self.params.clone();
        next_params.pass_log = Some(base);
        let pass2 = TwoPassStep::new(next_params, Arc::clone(&self.wd))?;
        self.state.finish(StepResult {
            output_media_file: None,
            next_sprint_steps: vec![Box::new(pass2)],
        });
        Ok(())
    }

    fn run_pass2(&mut self, base: &str) -> Result<(), StepError> {
        // The stats files go back to where ffmpeg expects them.
        let (log, mbtree) = pass_log_file_names(base);
        for name in [log, mbtree] {
            let parked = self.wd.get_file(&name);
            if !parked.exists() {
                return Err(StepError::MissingArtifact(parked));
            }
            let target = self.wd.cwd().join(&name);
            if target.exists() {
                warn!("overwriting {}", target.display());
            }
            fs::copy(&parked, &target)?;
        }

        let output = self.params.transcode.new_output_file(&self.wd)?;
        let encoder = self.pass_encoder(2)?;
        let cmd = build_ffmpeg_command(
            &[self.params.transcode.ffmpeg_input()],
            &encoder,
            &self.params.transcode.ffmpeg_opt,
            &self.params.transcode.mapping(),
            Some(&output),
            &["-passlogfile".to_owned(), base.to_owned()],
        );
        run_command(&cmd)?;
        if !output.exists() {
            return Err(StepError::MissingArtifact(output));
        }
        let output_media_file = MediaFile::open(&output)?;
        self.state.finish(StepResult {
            output_media_file: Some(output_media_file),
            next_sprint_steps: Vec::new(),
        });
        Ok(())
    }
}

impl ProcessingStep for TwoPassStep {
    fn verify(&self) -> Result<(), ParameterError> {
        self.params.transcode.verify()?;
        self.bitrate().map(|_| ())
    }

    fn run(&mut self) -> Result<(), StepError> {
        self.state.begin()?;
        match self.params.pass_log.clone() {
            None => self.run_pass1(),
            Some(base) => self.run_pass2(&base),
        }
    }

    fn take_result(&mut self) -> Result<StepResult, StepError> {
        self.state.take()
    }
}
