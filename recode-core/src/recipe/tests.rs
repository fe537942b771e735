use std::collections::HashMap;
use std::path::Path;

use serde_yaml::Value;

use crate::parse::weak_leaf_parse;
use crate::probe::MediaFile;

use super::*;

const HD_PROBE: &str = r#"{
    "streams": [
        {
            "index": 0,
            "codec_name": "h264",
            "codec_type": "video",
            "width": 1920,
            "height": 1080,
            "bits_per_raw_sample": "8",
            "avg_frame_rate": "24/1",
            "duration": "600.0",
            "bit_rate": "4500000"
        },
        {"index": 1, "codec_name": "aac", "codec_type": "audio", "bit_rate": "192000"}
    ],
    "chapters": [],
    "format": {"size": "367001600", "duration": "600.0", "bit_rate": "4892000"}
}"#;

const SD_AV1_PROBE: &str = r#"{
    "streams": [
        {
            "index": 0,
            "codec_name": "av1",
            "codec_type": "video",
            "width": 854,
            "height": 480,
            "avg_frame_rate": "24/1",
            "bit_rate": "900000"
        }
    ],
    "chapters": [],
    "format": {"size": "80000000", "duration": "600.0", "bit_rate": "1000000"}
}"#;

fn hd_file() -> MediaFile {
    MediaFile::from_probe_json(Path::new("movie.mkv"), HD_PROBE).unwrap()
}

fn sd_av1_file() -> MediaFile {
    MediaFile::from_probe_json(Path::new("clip.webm"), SD_AV1_PROBE).unwrap()
}

const FULL_RECIPE: &str = r#"
recode-engine: 1
recipe:
  input:
    extension:
      whitelist: [mkv, mp4]
    size:
      max: 4G
    streams:
      video:
        codec:
          whitelist: [h264, hevc]
  arguments:
    crf:
      type: int
      default: 23
      min: 0
      max: 51
    preset:
      type: str
      values: [fast, medium, slow]
      default: medium
    bitrate:
      type: str
      required: true
  stream-processor:
    video:
      processor: ffmpeg
      parameters:
        codec: libx264
      case:
        - if:
            width:
              min: 1920
            then:
              processor: ffmpeg-2pass
              parameters:
                codec: libx264
                target_bitrate: 2000k
        - if:
            argument:
              name: preset
              value: slow
            then:
              processor: ffmpeg
              parameters:
                codec: libx265
        - default:
            processor: ffmpeg
            parameters:
              codec: libx264
  post-processing:
    - case:
        - default:
            processor: mkvmerge
            parameters:
              mode: merge
  output:
    directory: out
    suffix: "-recoded.mkv"
"#;

fn full_recipe() -> Recipe {
    Recipe::from_yaml(FULL_RECIPE).unwrap()
}

fn args(recipe: &Recipe, supplied: &[(&str, &str)]) -> ResolvedArguments {
    let supplied: HashMap<String, Value> = supplied
        .iter()
        .map(|(k, v)| ((*k).to_owned(), Value::from(*v)))
        .collect();
    recipe.resolve_arguments(&supplied).unwrap()
}

#[test]
fn minimal_recipe_survives_validation_unchanged() {
    let text = r#"
recode-engine: 1
recipe:
  input:
    size:
      max: 4G
  stream-processor:
    video:
      processor: ffmpeg
      parameters:
        codec: libx264
      case:
        - default:
            processor: ffmpeg
            parameters:
              codec: libx264
  post-processing:
    - case:
        - default:
            processor: mkvmerge
            parameters:
              mode: merge
  output:
    directory: out
    suffix: "-recoded.mkv"
"#;
    let document: Value = serde_yaml::from_str(text).unwrap();
    let recipe = Recipe::new(&document).unwrap();
    let expected = weak_leaf_parse(document.get("recipe").unwrap());
    assert_eq!(recipe.tree(), &expected);
}

#[test]
fn unknown_keys_are_pruned() {
    let text = FULL_RECIPE.replace("  input:", "  zzz: 1\n  input:");
    let recipe = Recipe::from_yaml(&text).unwrap();
    assert!(recipe.tree().get("zzz").is_none());
    assert!(recipe.tree().get("input").is_some());
}

#[test]
fn version_token_is_checked() {
    let text = FULL_RECIPE.replace("recode-engine: 1", "recode-engine: 2");
    match Recipe::from_yaml(&text) {
        Err(RecipeError::UnsupportedVersion { found }) => {
            assert_eq!(found, Value::from(2));
        }
        other => panic!("expected an unsupported version error, got {other:?}"),
    }
}

#[test]
fn missing_required_sections_are_rejected() {
    let text = FULL_RECIPE.replace("  post-processing:", "  not-post-processing:");
    assert!(matches!(
        Recipe::from_yaml(&text),
        Err(RecipeError::MissingSection(_)) | Err(RecipeError::InvalidDocument)
    ));
}

#[test]
fn arguments_resolve_with_defaults_and_coercion() {
    let recipe = full_recipe();
    let resolved = args(&recipe, &[("crf", "30"), ("bitrate", "2M")]);
    assert_eq!(resolved.get("crf"), Some(&Value::from(30)));
    assert_eq!(resolved.get("preset"), Some(&Value::from("medium")));
    assert_eq!(resolved.get("bitrate"), Some(&Value::from("2M")));
}

#[test]
fn argument_type_errors_are_fatal() {
    let recipe = full_recipe();
    let supplied: HashMap<String, Value> = [
        ("crf".to_owned(), Value::from("not-a-number")),
        ("bitrate".to_owned(), Value::from("2M")),
    ]
    .into();
    assert!(matches!(
        recipe.resolve_arguments(&supplied),
        Err(ArgumentError::Type { .. })
    ));
}

#[test]
fn argument_constraints_are_enforced() {
    let recipe = full_recipe();

    let over_max: HashMap<String, Value> = [
        ("crf".to_owned(), Value::from(99)),
        ("bitrate".to_owned(), Value::from("2M")),
    ]
    .into();
    assert!(matches!(
        recipe.resolve_arguments(&over_max),
        Err(ArgumentError::Constraint { .. })
    ));

    let not_enumerated: HashMap<String, Value> = [
        ("preset".to_owned(), Value::from("ultraslow")),
        ("bitrate".to_owned(), Value::from("2M")),
    ]
    .into();
    assert!(matches!(
        recipe.resolve_arguments(&not_enumerated),
        Err(ArgumentError::Constraint { .. })
    ));
}

#[test]
fn required_arguments_must_be_supplied() {
    let recipe = full_recipe();
    assert!(matches!(
        recipe.resolve_arguments(&HashMap::new()),
        Err(ArgumentError::Missing(name)) if name == "bitrate"
    ));
}

#[test]
fn undeclared_arguments_are_dropped() {
    let recipe = full_recipe();
    let resolved = args(&recipe, &[("bitrate", "2M"), ("unknown", "x")]);
    assert!(!resolved.contains_key("unknown"));
}

#[test]
fn codec_whitelist_admits_and_rejects() {
    let recipe = full_recipe();
    assert!(recipe.validate_input(&hd_file()));
    // av1 video, and a .webm extension on top
    assert!(!recipe.validate_input(&sd_av1_file()));
}

#[test]
fn file_size_limits_apply() {
    let text = FULL_RECIPE.replace("max: 4G", "max: 100M");
    let recipe = Recipe::from_yaml(&text).unwrap();
    assert!(!recipe.validate_input(&hd_file()));
}

#[test]
fn rules_without_probe_data_are_skipped() {
    // quality-index is not derivable for the audio-less AV1 sample if
    // the probe carries no frame rate; a rule on it must not reject.
    let mut info = DataPointInfo::new();
    info.insert(
        "codec".to_owned(),
        DataValue::Many(vec![Value::from("h264")]),
    );
    let spec: Value = serde_yaml::from_str("{min: 2}").unwrap();
    assert!(verify_rule("quality-index", &spec, &info));
}

#[test]
fn bare_scalar_rules_mean_equality() {
    let mut info = DataPointInfo::new();
    info.insert("has-chapters".to_owned(), DataValue::One(Value::from(false)));
    assert!(verify_rule("has-chapters", &Value::from(false), &info));
    assert!(!verify_rule("has-chapters", &Value::from(true), &info));
}

#[test]
fn rule_bounds_are_weak_parsed() {
    let mut info = DataPointInfo::new();
    info.insert(
        "duration".to_owned(),
        DataValue::One(Value::from("1 h 10 min")),
    );
    let below: Value = serde_yaml::from_str("{max: 2 h}").unwrap();
    let above: Value = serde_yaml::from_str("{max: 30 min}").unwrap();
    assert!(verify_rule("duration", &below, &info));
    assert!(!verify_rule("duration", &above, &info));
}

#[test]
fn whitelists_accept_comma_separated_strings() {
    let mut info = DataPointInfo::new();
    info.insert(
        "codec".to_owned(),
        DataValue::Many(vec![Value::from("h264"), Value::from("hevc")]),
    );
    let spec: Value = serde_yaml::from_str("{whitelist: 'h264, hevc, av1'}").unwrap();
    assert!(verify_rule("codec", &spec, &info));
    let narrow: Value = serde_yaml::from_str("{whitelist: 'h264'}").unwrap();
    assert!(!verify_rule("codec", &narrow, &info));
}

#[test]
fn numeric_rules_match_numified_probe_data() {
    // Probe numbers arrive as Value::Number; quoted rule values must
    // still compare equal.
    let mut info = DataPointInfo::new();
    info.insert("width".to_owned(), DataValue::Many(vec![Value::from(1920)]));

    let quoted_list: Value = serde_yaml::from_str("{whitelist: '1920, 1280'}").unwrap();
    assert!(verify_rule("width", &quoted_list, &info));

    let bare_equality: Value = serde_yaml::from_str("'1920'").unwrap();
    assert!(verify_rule("width", &bare_equality, &info));

    let quoted_bound: Value = serde_yaml::from_str("{min: '1080'}").unwrap();
    assert!(verify_rule("width", &quoted_bound, &info));

    let elsewhere: Value = serde_yaml::from_str("{whitelist: '1280, 720'}").unwrap();
    assert!(!verify_rule("width", &elsewhere, &info));
}

#[test]
fn case_selects_by_data_point_condition() {
    let recipe = full_recipe();
    let resolved = args(&recipe, &[("bitrate", "2M")]);
    let config = recipe
        .select_stream_processor("video", &hd_file(), &resolved)
        .unwrap();
    assert_eq!(config.processor, "ffmpeg-2pass");
    assert_eq!(
        config.parameters.get("target_bitrate"),
        Some(&Value::from(2_000_000))
    );
}

#[test]
fn case_selects_by_argument_condition() {
    let recipe = full_recipe();
    let resolved = args(&recipe, &[("bitrate", "2M"), ("preset", "slow")]);
    let config = recipe
        .select_stream_processor("video", &sd_av1_file(), &resolved)
        .unwrap();
    assert_eq!(config.processor, "ffmpeg");
    assert_eq!(config.parameters.get("codec"), Some(&Value::from("libx265")));
}

#[test]
fn case_falls_back_to_the_default() {
    let recipe = full_recipe();
    let resolved = args(&recipe, &[("bitrate", "2M")]);
    let config = recipe
        .select_stream_processor("video", &sd_av1_file(), &resolved)
        .unwrap();
    assert_eq!(config.processor, "ffmpeg");
    assert_eq!(config.parameters.get("codec"), Some(&Value::from("libx264")));
}

#[test]
fn post_processing_selects_the_mux_config() {
    let recipe = full_recipe();
    let resolved = args(&recipe, &[("bitrate", "2M")]);
    let configs = recipe.select_post_processing(&hd_file(), &resolved);
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].processor, "mkvmerge");
    assert_eq!(configs[0].parameters.get("mode"), Some(&Value::from("merge")));
}

#[test]
fn declared_stream_types_are_listed() {
    let recipe = full_recipe();
    assert_eq!(recipe.stream_processor_types(), vec!["video".to_owned()]);
}

#[test]
fn output_spec_reads_directory_and_suffix() {
    let recipe = full_recipe();
    let spec = recipe.output_spec().unwrap();
    assert_eq!(spec.directory, PathBuf::from("out"));
    assert_eq!(spec.suffix, "-recoded.mkv");
}
