use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{panic, process};

use anyhow::{bail, ensure, Context};
use clap::Parser;
use path_abs::{PathAbs, PathInfo};
use serde_yaml::{Mapping, Value};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;

use recode_core::encoder::FfmpegEncoder;
use recode_core::ffmpeg::FfmpegOptions;
use recode_core::logging::{init_logging, DEFAULT_CONSOLE_LEVEL, DEFAULT_FILE_LEVEL};
use recode_core::mkvmerge::MkvmergeMode;
use recode_core::probe::{MediaFile, Stream, StreamCriteria, StreamType};
use recode_core::recipe::{ProcessorConfig, Recipe, ResolvedArguments};
use recode_core::sprint;
use recode_core::step::{
    InputOptions, MkvmergeParams, MkvmergeStep, ProcessingStep, TranscodeParams, TranscodeStep,
    TwoPassParams, TwoPassStep,
};
use recode_core::workdir::WorkingDirectory;

/// Declarative media transcoding: apply a recipe to candidate files,
/// driving ffmpeg and mkvmerge.
#[derive(Parser, Debug)]
#[clap(name = "recode", version)]
struct CliOpts {
    /// Recipe file (YAML)
    #[clap(short, long)]
    recipe: PathBuf,

    /// Candidate input media files
    #[clap(required = true)]
    input: Vec<PathBuf>,

    /// Recipe argument, as name=value (repeatable)
    #[clap(short = 'a', long = "arg", value_name = "NAME=VALUE")]
    arg: Vec<String>,

    /// ffmpeg executable
    #[clap(long, default_value = "ffmpeg")]
    ffmpeg: String,

    /// ffprobe executable
    #[clap(long, default_value = "ffprobe")]
    ffprobe: String,

    /// mkvmerge executable
    #[clap(long, default_value = "mkvmerge")]
    mkvmerge: String,

    /// Log file location
    #[clap(short, long, default_value = "recode.log")]
    log_file: PathBuf,

    /// Only warnings and errors on the console
    #[clap(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Extra debug output on the console
    #[clap(long)]
    verbose: bool,

    /// Keep the per-file working directories around after a run
    #[clap(long)]
    keep: bool,
}

fn main() -> anyhow::Result<()> {
    let orig_hook = panic::take_hook();
    // Catch panics in child threads
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(1);
    }));
    run()
}

fn run() -> anyhow::Result<()> {
    let opts = CliOpts::parse();

    let console_level = if opts.quiet {
        LevelFilter::WARN
    } else if opts.verbose {
        LevelFilter::DEBUG
    } else {
        DEFAULT_CONSOLE_LEVEL
    };
    init_logging(console_level, &opts.log_file, DEFAULT_FILE_LEVEL);

    for executable in [&opts.ffmpeg, &opts.ffprobe, &opts.mkvmerge] {
        which::which(executable)
            .map(|path| info!("using {executable}: {}", path.display()))
            .with_context(|| format!("required executable not found: {executable}"))?;
    }

    let recipe_text = fs::read_to_string(&opts.recipe)
        .with_context(|| format!("cannot read recipe {}", opts.recipe.display()))?;
    let recipe = Recipe::from_yaml(&recipe_text)
        .with_context(|| format!("invalid recipe {}", opts.recipe.display()))?;

    let supplied = parse_cli_arguments(&opts.arg)?;
    let arguments = recipe
        .resolve_arguments(&supplied)
        .context("argument resolution failed")?;
    info!("resolved arguments: {arguments:?}");

    let mut completed = 0usize;
    for input in &opts.input {
        let input = PathAbs::new(input)
            .with_context(|| format!("cannot resolve input path {}", input.display()))?;
        match run_candidate(&opts, &recipe, &arguments, input.as_path())? {
            Some(outputs) => {
                completed += 1;
                for output in outputs {
                    info!("wrote {}", output.display());
                }
            }
            None => info!("skipped {}", input.as_path().display()),
        }
    }

    ensure!(completed > 0, "no candidate file was admitted by the recipe");
    Ok(())
}

/// name=value pairs from the command line, values kept as raw strings
/// for the recipe's argument declarations to coerce.
fn parse_cli_arguments(pairs: &[String]) -> anyhow::Result<HashMap<String, Value>> {
    let mut supplied = HashMap::new();
    for pair in pairs {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("argument '{pair}' is not of the form name=value");
        };
        supplied.insert(name.to_owned(), Value::from(value));
    }
    Ok(supplied)
}

enum ProcessorKind {
    Ffmpeg,
    Ffmpeg2Pass,
    Copy,
}

fn processor_kind(name: &str) -> anyhow::Result<ProcessorKind> {
    match name {
        "ffmpeg" => Ok(ProcessorKind::Ffmpeg),
        "ffmpeg-2pass" => Ok(ProcessorKind::Ffmpeg2Pass),
        "copy" => Ok(ProcessorKind::Copy),
        other => bail!("recipe selected an unknown processor '{other}'"),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Splits a processor's `parameters` into the encoder configuration,
/// the input-side options, and the two-pass target bitrate.
fn read_transcode_parameters(
    config: &ProcessorConfig,
    ffmpeg: &str,
) -> anyhow::Result<(FfmpegEncoder, InputOptions, Option<Value>)> {
    let parameters: &Mapping = &config.parameters;
    let codec = parameters
        .get("codec")
        .and_then(Value::as_str)
        .context("processor parameters are missing 'codec'")?;
    let mut encoder = FfmpegEncoder::with_executable(codec, ffmpeg);
    let mut input_opt = InputOptions::default();
    let mut target_bitrate = None;

    for (key, value) in parameters {
        let Some(key) = key.as_str() else { continue };
        match key {
            "codec" => {}
            "target_bitrate" => target_bitrate = Some(value.clone()),
            "fix_fps" => input_opt.fix_fps = value.as_f64(),
            "more" => {
                input_opt.more = match value {
                    Value::String(s) => shlex::split(s)
                        .with_context(|| format!("unparseable 'more' options: {s}"))?,
                    Value::Sequence(items) => {
                        items.iter().filter_map(scalar_to_string).collect()
                    }
                    _ => bail!("'more' must be a string or a list of strings"),
                };
            }
            _ => {
                if let Some(value) = scalar_to_string(value) {
                    encoder.set_parameter(key, value);
                } else {
                    warn!("ignoring non-scalar encoder parameter '{key}'");
                }
            }
        }
    }
    Ok((encoder, input_opt, target_bitrate))
}

/// Transcodes one stream according to its selected processor config,
/// returning the artifacts of the final sprint.
fn process_stream(
    config: &ProcessorConfig,
    stream: &Stream,
    wd: &Arc<WorkingDirectory>,
    ffmpeg: &str,
) -> anyhow::Result<Vec<MediaFile>> {
    let (encoder, input_opt, target_bitrate) = read_transcode_parameters(config, ffmpeg)?;
    let transcode = TranscodeParams {
        input: stream.clone(),
        input_opt,
        encoder,
        ffmpeg_opt: FfmpegOptions::default(),
    };
    let step: Box<dyn ProcessingStep> = match processor_kind(&config.processor)? {
        ProcessorKind::Ffmpeg => Box::new(TranscodeStep::new(transcode, Arc::clone(wd))?),
        ProcessorKind::Ffmpeg2Pass => {
            let target_bitrate =
                target_bitrate.context("two-pass processor needs a 'target_bitrate' parameter")?;
            Box::new(TwoPassStep::new(
                TwoPassParams {
                    transcode,
                    target_bitrate,
                    pass_log: None,
                },
                Arc::clone(wd),
            )?)
        }
        ProcessorKind::Copy => unreachable!("copy streams are muxed straight from the source"),
    };

    let outputs = sprint::execute(step)
        .with_context(|| format!("transcoding failed for {stream:?}"))?;
    ensure!(
        !outputs.is_empty(),
        "transcoding produced no artifact for {stream:?}"
    );
    Ok(outputs)
}

/// The mux mode selected by post-processing, defaulting to a merge.
fn select_mux_mode(recipe: &Recipe, media: &MediaFile, arguments: &ResolvedArguments) -> MkvmergeMode {
    for config in recipe.select_post_processing(media, arguments) {
        if config.processor == "mkvmerge" {
            let mode = config
                .parameters
                .get("mode")
                .and_then(Value::as_str)
                .unwrap_or("merge");
            match mode.parse::<MkvmergeMode>() {
                Ok(mode) => return mode,
                Err(_) => warn!("unknown mkvmerge mode '{mode}', using merge"),
            }
        } else {
            warn!(
                "unsupported post-processing processor '{}' ignored",
                config.processor
            );
        }
    }
    MkvmergeMode::Merge
}

/// Runs the whole plan for one candidate. `Ok(None)` means the file was
/// rejected by the recipe's admission rules; that is not an error.
fn run_candidate(
    opts: &CliOpts,
    recipe: &Recipe,
    arguments: &ResolvedArguments,
    input: &Path,
) -> anyhow::Result<Option<Vec<PathBuf>>> {
    info!("processing candidate {}", input.display());
    let media = MediaFile::open_with(input, &opts.ffprobe)
        .with_context(|| format!("probing {} failed", input.display()))?;

    if !recipe.validate_input(&media) {
        return Ok(None);
    }

    let wd = Arc::new(WorkingDirectory::create(input)?);

    // Transcode every stream of the declared types; remember which source
    // stream each artifact replaces.
    let mut encoded: Vec<(usize, MediaFile)> = Vec::new();
    let mut copied_types: HashSet<StreamType> = HashSet::new();
    let mut processed_types: HashSet<StreamType> = HashSet::new();

    for type_name in recipe.stream_processor_types() {
        let stream_type: StreamType = match type_name.parse() {
            Ok(t) => t,
            Err(_) => {
                warn!("unknown stream type '{type_name}' in stream-processor");
                continue;
            }
        };
        let Some(config) = recipe.select_stream_processor(&type_name, &media, arguments) else {
            warn!("no processor config selected for {type_name} streams");
            continue;
        };
        info!("selected processor '{}' for {type_name} streams", config.processor);
        processed_types.insert(stream_type);
        if matches!(processor_kind(&config.processor)?, ProcessorKind::Copy) {
            copied_types.insert(stream_type);
            continue;
        }
        let streams = media.get_streams(&StreamCriteria {
            codec_type: Some(stream_type),
            codec: None,
        });
        for stream in &streams {
            for output in process_stream(&config, stream, &wd, &opts.ffmpeg)? {
                encoded.push((stream.idx(), output));
            }
        }
    }

    // Mux inputs in source order: transcoded artifacts replace their
    // source streams; streams of undeclared or copied types pass through.
    let mut mux_inputs: Vec<Stream> = Vec::new();
    for stream in media.streams() {
        if let Some((_, artifact)) = encoded.iter().find(|(idx, _)| *idx == stream.idx()) {
            mux_inputs.extend(artifact.streams());
        } else {
            let passthrough = !processed_types.contains(&stream.stream_type())
                || copied_types.contains(&stream.stream_type());
            if passthrough && stream.stream_type() != StreamType::Data {
                mux_inputs.push(stream);
            }
        }
    }
    ensure!(!mux_inputs.is_empty(), "nothing to mux for {}", input.display());

    let output_spec = recipe.output_spec()?;
    fs::create_dir_all(&output_spec.directory).with_context(|| {
        format!("cannot create output directory {}", output_spec.directory.display())
    })?;
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_owned());
    let final_output = output_spec
        .directory
        .join(format!("{stem}{}", output_spec.suffix));

    let mux = MkvmergeStep::new(MkvmergeParams {
        inputs: mux_inputs,
        output: final_output,
        mode: select_mux_mode(recipe, &media, arguments),
        executable: Some(opts.mkvmerge.clone()),
    })?;
    let outputs = sprint::execute(Box::new(mux))
        .with_context(|| format!("muxing failed for {}", input.display()))?;
    ensure!(
        !outputs.is_empty(),
        "the final sprint produced no artifact for {}",
        input.display()
    );

    if !opts.keep {
        match Arc::try_unwrap(wd) {
            Ok(wd) => wd.remove()?,
            Err(wd) => warn!("working directory still in use, keeping {}", wd.root().display()),
        }
    }

    Ok(Some(
        outputs.iter().map(|file| file.path().to_owned()).collect(),
    ))
}
