//! Recipes: declarative descriptions of how to transcode a media file.
//!
//! A recipe declares which input files it applies to, which arguments it
//! accepts, how each kind of stream is processed, and how the results
//! are put back together. Construction validates the raw document
//! against the grammar of [`crate::schema`] and normalizes its scalars;
//! everything after that works on the validated tree.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::grammar::DocumentValidator;
use crate::parse::{read_list, weak_leaf_parse, weak_parse};
use crate::probe::{MediaFile, StreamCriteria, StreamType};
use crate::schema::{self, recipe_validator, SUPPORTED_SPEC_VERSION};

static VALIDATOR: Lazy<DocumentValidator> = Lazy::new(recipe_validator);

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("unreadable recipe document: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("recipe failed structural validation")]
    InvalidDocument,
    #[error("unsupported recode-engine version {found:?}, this engine expects {SUPPORTED_SPEC_VERSION}")]
    UnsupportedVersion { found: Value },
    #[error("recipe section missing or invalid: {0}")]
    MissingSection(&'static str),
}

#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("argument '{name}': cannot read {value:?} as {expected}")]
    Type {
        name: String,
        expected: &'static str,
        value: Value,
    },
    #[error("argument '{name}': value {value:?} violates {constraint}")]
    Constraint {
        name: String,
        constraint: String,
        value: Value,
    },
    #[error("missing required argument '{0}'")]
    Missing(String),
}

/// Argument values after coercion and constraint checking.
pub type ResolvedArguments = HashMap<String, Value>;

/// A data point of a file or a set of streams: either one value or the
/// per-stream collection of values.
#[derive(Debug, Clone)]
pub enum DataValue {
    One(Value),
    Many(Vec<Value>),
}

impl DataValue {
    fn parsed_elements(&self) -> Vec<Value> {
        match self {
            DataValue::One(value) => vec![weak_parse(value)],
            DataValue::Many(values) => values.iter().map(weak_parse).collect(),
        }
    }
}

/// Named data points admissibility rules are checked against.
pub type DataPointInfo = HashMap<String, DataValue>;

/// The `{processor, parameters}` pair a `case` evaluation selects.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    pub processor: String,
    pub parameters: Mapping,
}

/// Where the final artifact goes: `<directory>/<input stem><suffix>`.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub directory: PathBuf,
    pub suffix: String,
}

#[derive(Debug)]
pub struct Recipe {
    /// The validated, weak-parsed subtree under the `recipe` key.
    recipe: Value,
}

impl Recipe {
    /// Parses and validates a recipe from its YAML text.
    pub fn from_yaml(text: &str) -> Result<Recipe, RecipeError> {
        let document: Value = serde_yaml::from_str(text)?;
        Recipe::new(&document)
    }

    /// Validates a raw document tree into a usable recipe.
    pub fn new(document: &Value) -> Result<Recipe, RecipeError> {
        let validated = VALIDATOR
            .validate(document)
            .ok_or(RecipeError::InvalidDocument)?;

        let version = validated
            .get(schema::KW_SPEC_VERSION)
            .ok_or(RecipeError::InvalidDocument)?;
        if version.as_u64() != Some(SUPPORTED_SPEC_VERSION) {
            return Err(RecipeError::UnsupportedVersion {
                found: version.clone(),
            });
        }

        let recipe = validated
            .get(schema::KW_RECIPE_ROOT)
            .filter(|node| node.is_mapping())
            .ok_or(RecipeError::InvalidDocument)?;
        for section in [
            schema::KW_RECIPE_INPUT,
            schema::KW_RECIPE_STREAM_PROCESSOR,
            schema::KW_RECIPE_POST_PROCESSING,
            schema::KW_RECIPE_OUTPUT,
        ] {
            if recipe.get(section).map_or(true, Value::is_null) {
                return Err(RecipeError::MissingSection(section));
            }
        }

        Ok(Recipe {
            recipe: weak_leaf_parse(recipe),
        })
    }

    fn section(&self, name: &str) -> Option<&Value> {
        self.recipe.get(name).filter(|node| !node.is_null())
    }

    /// Output location and naming, as declared by the recipe.
    pub fn output_spec(&self) -> Result<OutputSpec, RecipeError> {
        let output = self
            .section(schema::KW_RECIPE_OUTPUT)
            .ok_or(RecipeError::MissingSection(schema::KW_RECIPE_OUTPUT))?;
        let directory = output
            .get(schema::KW_OUTPUT_DIRECTORY)
            .and_then(Value::as_str)
            .ok_or(RecipeError::MissingSection(schema::KW_OUTPUT_DIRECTORY))?;
        let suffix = output
            .get(schema::KW_OUTPUT_SUFFIX)
            .and_then(Value::as_str)
            .ok_or(RecipeError::MissingSection(schema::KW_OUTPUT_SUFFIX))?;
        Ok(OutputSpec {
            directory: PathBuf::from(directory),
            suffix: suffix.to_owned(),
        })
    }

    /// Merges user-supplied argument values with the recipe's argument
    /// declarations: coercion to the declared type, constraint checks,
    /// defaults, and required-ness.
    pub fn resolve_arguments(
        &self,
        supplied: &HashMap<String, Value>,
    ) -> Result<ResolvedArguments, ArgumentError> {
        let mut resolved = ResolvedArguments::new();
        let declarations = self
            .section(schema::KW_RECIPE_ARGUMENTS)
            .and_then(Value::as_mapping);

        if let Some(declarations) = declarations {
            for (name, spec) in declarations {
                let Some(name) = name.as_str() else { continue };
                let Some(spec) = spec.as_mapping() else {
                    warn!("argument '{name}' lost its declaration during validation; dropping");
                    continue;
                };
                if let Some(value) = supplied.get(name) {
                    resolved.insert(name.to_owned(), match_argument(name, spec, value)?);
                } else if let Some(default) = spec.get(schema::KW_DEFAULT) {
                    resolved.insert(name.to_owned(), default.clone());
                } else if spec
                    .get(schema::KW_ARGUMENT_REQUIRED)
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                {
                    return Err(ArgumentError::Missing(name.to_owned()));
                } else {
                    warn!("dropping argument '{name}': no value given and no default set");
                }
            }
        }

        let dropped: Vec<&str> = supplied
            .keys()
            .filter(|name| !resolved.contains_key(*name))
            .map(String::as_str)
            .collect();
        if !dropped.is_empty() {
            warn!("arguments not declared by the recipe were dropped: {dropped:?}");
        }

        Ok(resolved)
    }

    /// Checks a candidate file against the recipe's admission rules.
    /// Rejections are logged; they are not errors.
    pub fn validate_input(&self, media: &MediaFile) -> bool {
        let Some(input) = self.section(schema::KW_RECIPE_INPUT).and_then(Value::as_mapping)
        else {
            return true;
        };
        let finfo = file_info(media);
        for (key, rule) in input {
            let Some(key) = key.as_str() else { continue };
            if rule.is_null() {
                warn!("skipping admission rule '{key}' dropped during validation");
                continue;
            }
            if key == schema::KW_STREAMS_ROOT {
                let Some(per_type) = rule.as_mapping() else { continue };
                for (stream_type, rules) in per_type {
                    let (Some(type_name), Some(rules)) =
                        (stream_type.as_str(), rules.as_mapping())
                    else {
                        continue;
                    };
                    let info = stream_aggregate_info(media, type_name);
                    for (data_point, spec) in rules {
                        let Some(data_point) = data_point.as_str() else { continue };
                        if !verify_rule(data_point, spec, &info) {
                            warn!(
                                "file {:?} invalidated by rule streams.{type_name}.{data_point}",
                                media.path()
                            );
                            return false;
                        }
                    }
                }
            } else if !verify_rule(key, rule, &finfo) {
                warn!("file {:?} invalidated by rule {key}", media.path());
                return false;
            }
        }
        true
    }

    /// Stream types the recipe declares a processor for.
    pub fn stream_processor_types(&self) -> Vec<String> {
        self.section(schema::KW_RECIPE_STREAM_PROCESSOR)
            .and_then(Value::as_mapping)
            .map(|processors| {
                processors
                    .keys()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Selects the processor configuration for one stream type by
    /// evaluating its `case` control flow against the candidate file and
    /// the resolved arguments.
    pub fn select_stream_processor(
        &self,
        stream_type: &str,
        media: &MediaFile,
        arguments: &ResolvedArguments,
    ) -> Option<ProcessorConfig> {
        let node = self
            .section(schema::KW_RECIPE_STREAM_PROCESSOR)?
            .get(stream_type)
            .filter(|node| node.is_mapping())?;

        // Data point conditions see the file info with the aggregate info
        // of this stream type layered on top.
        let mut info = file_info(media);
        info.extend(stream_aggregate_info(media, stream_type));

        if let Some(case) = node.get(schema::KW_CF_CASE) {
            if let Some(config) = evaluate_case(case, &info, arguments) {
                return Some(config);
            }
        }
        // A processor/parameters pair on the node itself is the
        // unconditional fallback.
        read_processor_config(node)
    }

    /// Evaluates every post-processing `case` against the candidate file,
    /// yielding the selected configurations in declaration order.
    pub fn select_post_processing(
        &self,
        media: &MediaFile,
        arguments: &ResolvedArguments,
    ) -> Vec<ProcessorConfig> {
        let Some(entries) = self
            .section(schema::KW_RECIPE_POST_PROCESSING)
            .and_then(Value::as_sequence)
        else {
            return Vec::new();
        };
        let info = file_info(media);
        entries
            .iter()
            .filter_map(|entry| entry.get(schema::KW_CF_CASE))
            .filter_map(|case| evaluate_case(case, &info, arguments))
            .collect()
    }

    /// The validated recipe tree, mostly interesting to tests and debug
    /// output.
    pub fn tree(&self) -> &Value {
        &self.recipe
    }
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Checks one data-point rule against the probed info. A missing data
/// point skips the rule rather than failing it.
pub fn verify_rule(data_point: &str, spec: &Value, info: &DataPointInfo) -> bool {
    let Some(data) = info.get(data_point) else {
        debug!("no data for '{data_point}', rule skipped");
        return true;
    };
    let elements = data.parsed_elements();

    let Some(specifiers) = spec.as_mapping() else {
        // Bare scalar: equality across all elements.
        let expected = weak_parse(spec);
        return elements.iter().all(|element| *element == expected);
    };

    for (specifier, raw) in specifiers {
        let Some(specifier) = specifier.as_str() else { continue };
        let ok = match specifier {
            schema::KW_DPS_MAX => match as_number(&weak_parse(raw)) {
                Some(bound) => elements
                    .iter()
                    .all(|e| as_number(e).is_some_and(|v| v <= bound)),
                None => false,
            },
            schema::KW_DPS_MIN => match as_number(&weak_parse(raw)) {
                Some(bound) => elements
                    .iter()
                    .all(|e| as_number(e).is_some_and(|v| v >= bound)),
                None => false,
            },
            schema::KW_DPS_WHITELIST => match read_list(raw) {
                Some(list) => {
                    let list: Vec<Value> = list.iter().map(weak_parse).collect();
                    elements.iter().all(|e| list.contains(e))
                }
                None => false,
            },
            schema::KW_DPS_BLACKLIST => match read_list(raw) {
                Some(list) => {
                    let list: Vec<Value> = list.iter().map(weak_parse).collect();
                    elements.iter().all(|e| !list.contains(e))
                }
                None => false,
            },
            other => {
                warn!("unknown data point specifier '{other}' ignored");
                true
            }
        };
        if !ok {
            return false;
        }
    }
    true
}

/// File-level data points of a candidate.
pub fn file_info(media: &MediaFile) -> DataPointInfo {
    let mut info = DataPointInfo::new();
    let extension = media
        .path()
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();
    info.insert(
        schema::KW_DP_EXTENSION.to_owned(),
        DataValue::One(Value::from(extension)),
    );
    info.insert(
        schema::KW_DP_NB_STREAMS.to_owned(),
        DataValue::One(Value::from(media.streams().len() as u64)),
    );
    info.insert(
        schema::KW_DP_HAS_CHAPTERS.to_owned(),
        DataValue::One(Value::from(media.has_chapters())),
    );
    let format = media.format_info();
    if let Some(size) = format.size {
        info.insert(schema::KW_DP_SIZE.to_owned(), DataValue::One(Value::from(size)));
    }
    if let Some(duration) = format.duration {
        info.insert(
            schema::KW_DP_DURATION.to_owned(),
            DataValue::One(Value::from(duration)),
        );
    }
    if let Some(bit_rate) = format.bit_rate {
        info.insert(
            schema::KW_DP_BITRATE.to_owned(),
            DataValue::One(Value::from(bit_rate)),
        );
    }
    info
}

fn json_to_yaml_scalar(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::Bool(b) => Some(Value::from(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::from(i))
            } else {
                n.as_f64().map(Value::from)
            }
        }
        serde_json::Value::String(s) => {
            // Probe output carries numbers as strings.
            if let Ok(i) = s.parse::<i64>() {
                Some(Value::from(i))
            } else if let Ok(f) = s.parse::<f64>() {
                Some(Value::from(f))
            } else {
                Some(Value::from(s.as_str()))
            }
        }
        _ => None,
    }
}

fn parse_frame_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    (den != 0.0 && num > 0.0).then(|| num / den)
}

/// Bits per pixel and frame, the quality index of a video stream.
fn quality_index(ffinfo: &crate::probe::FfprobeInfo) -> Option<f64> {
    let bit_rate: f64 = ffinfo.get("bit_rate")?.as_str()?.parse().ok()?;
    let width = ffinfo.get("width")?.as_f64()?;
    let height = ffinfo.get("height")?.as_f64()?;
    let fps = parse_frame_rate(ffinfo.get("avg_frame_rate")?.as_str()?)?;
    (width > 0.0 && height > 0.0).then(|| bit_rate / (width * height * fps))
}

/// Aggregate data points over all streams of one type.
pub fn stream_aggregate_info(media: &MediaFile, stream_type: &str) -> DataPointInfo {
    let Ok(codec_type) = stream_type.parse::<StreamType>() else {
        warn!("unknown stream type '{stream_type}' in recipe");
        return DataPointInfo::new();
    };
    let streams = media.get_streams(&StreamCriteria {
        codec_type: Some(codec_type),
        codec: None,
    });

    let mut info = DataPointInfo::new();
    info.insert(
        schema::KW_DP_NB_STREAMS.to_owned(),
        DataValue::One(Value::from(streams.len() as u64)),
    );

    let mut collect = |data_point: &str, values: Vec<Value>| {
        if !values.is_empty() {
            info.insert(data_point.to_owned(), DataValue::Many(values));
        }
    };

    let gather = |key: &str| -> Vec<Value> {
        streams
            .iter()
            .filter_map(|s| s.get(key))
            .filter_map(json_to_yaml_scalar)
            .collect()
    };

    collect(schema::KW_DP_CODEC, gather("codec_name"));
    if matches!(codec_type, StreamType::Video | StreamType::Audio) {
        collect(schema::KW_DP_DURATION, gather("duration"));
        collect(schema::KW_DP_BITRATE, gather("bit_rate"));
        let sizes: Vec<Value> = streams
            .iter()
            .filter_map(|s| {
                let tags = s.get("tags")?.as_object()?;
                tags.get("NUMBER_OF_BYTES")
                    .or_else(|| tags.get("NUMBER_OF_BYTES-eng"))
                    .and_then(json_to_yaml_scalar)
            })
            .collect();
        collect(schema::KW_DP_SIZE, sizes);
    }
    if codec_type == StreamType::Video {
        collect(schema::KW_DP_WIDTH, gather("width"));
        collect(schema::KW_DP_HEIGHT, gather("height"));
        collect(schema::KW_DP_BIT_DEPTH, gather("bits_per_raw_sample"));
        let quality: Vec<Value> = streams
            .iter()
            .filter_map(|s| quality_index(s.ffinfo()))
            .map(Value::from)
            .collect();
        collect(schema::KW_DP_QUALITY_INDEX, quality);
    }
    info
}

fn coerce_argument(name: &str, spec_type: &str, value: &Value) -> Result<Value, ArgumentError> {
    let type_error = || ArgumentError::Type {
        name: name.to_owned(),
        expected: match spec_type {
            "str" => "str",
            "int" => "int",
            "float" => "float",
            _ => "bool",
        },
        value: value.clone(),
    };
    match spec_type {
        "str" => match value {
            Value::String(s) => Ok(Value::from(s.as_str())),
            Value::Number(n) => Ok(Value::from(n.to_string())),
            Value::Bool(b) => Ok(Value::from(b.to_string())),
            _ => Err(type_error()),
        },
        "int" => match value {
            Value::Number(n) if n.as_i64().is_some() => Ok(value.clone()),
            Value::Number(n) => Ok(Value::from(n.as_f64().unwrap_or_default() as i64)),
            Value::Bool(b) => Ok(Value::from(i64::from(*b))),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| type_error()),
            _ => Err(type_error()),
        },
        "float" => match value {
            Value::Number(n) => Ok(Value::from(n.as_f64().unwrap_or_default())),
            Value::Bool(b) => Ok(Value::from(f64::from(u8::from(*b)))),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| type_error()),
            _ => Err(type_error()),
        },
        "bool" => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::from(n.as_f64() != Some(0.0))),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::from(true)),
                "false" | "no" | "0" => Ok(Value::from(false)),
                _ => Err(type_error()),
            },
            _ => Err(type_error()),
        },
        other => {
            warn!("argument '{name}' declares unknown type '{other}'");
            Err(type_error())
        }
    }
}

fn constraint_error(name: &str, constraint: &str, value: &Value) -> ArgumentError {
    ArgumentError::Constraint {
        name: name.to_owned(),
        constraint: constraint.to_owned(),
        value: value.clone(),
    }
}

fn check_argument_constraints(
    name: &str,
    spec: &Mapping,
    value: &Value,
) -> Result<(), ArgumentError> {
    let numeric = as_number(value);
    if let Some(min) = spec.get(schema::KW_DPS_MIN) {
        let bound = as_number(&weak_parse(min));
        if !matches!((numeric, bound), (Some(v), Some(b)) if v >= b) {
            return Err(constraint_error(name, "min", value));
        }
    }
    if let Some(max) = spec.get(schema::KW_DPS_MAX) {
        let bound = as_number(&weak_parse(max));
        if !matches!((numeric, bound), (Some(v), Some(b)) if v <= b) {
            return Err(constraint_error(name, "max", value));
        }
    }
    // Membership compares weak-parsed forms on both sides, so quoted
    // numerals in either place still line up.
    let candidate = weak_parse(value);
    for (key, constraint) in [
        (schema::KW_DPS_WHITELIST, "whitelist"),
        (schema::KW_ARGUMENT_VALUES, "values"),
    ] {
        if let Some(raw) = spec.get(key) {
            let allowed: Vec<Value> = read_list(raw)
                .unwrap_or_default()
                .iter()
                .map(weak_parse)
                .collect();
            if !allowed.contains(&candidate) {
                return Err(constraint_error(name, constraint, value));
            }
        }
    }
    if let Some(raw) = spec.get(schema::KW_DPS_BLACKLIST) {
        let banned: Vec<Value> = read_list(raw)
            .unwrap_or_default()
            .iter()
            .map(weak_parse)
            .collect();
        if banned.contains(&candidate) {
            return Err(constraint_error(name, "blacklist", value));
        }
    }
    Ok(())
}

fn match_argument(name: &str, spec: &Mapping, value: &Value) -> Result<Value, ArgumentError> {
    let spec_type = spec
        .get(schema::KW_ARGUMENT_TYPE)
        .and_then(Value::as_str)
        .unwrap_or("str");
    let coerced = coerce_argument(name, spec_type, value)?;
    check_argument_constraints(name, spec, &coerced)?;
    Ok(coerced)
}

fn read_processor_config(node: &Value) -> Option<ProcessorConfig> {
    let processor = node
        .get(schema::KW_PROCESSOR)
        .and_then(Value::as_str)?
        .to_owned();
    let parameters = node
        .get(schema::KW_PROCESSOR_PARAMETERS)
        .and_then(Value::as_mapping)
        .cloned()
        .unwrap_or_default();
    Some(ProcessorConfig {
        processor,
        parameters,
    })
}

/// Walks a `case` list: the first `if` whose conditions all hold wins,
/// otherwise the last `default`.
fn evaluate_case(
    case: &Value,
    info: &DataPointInfo,
    arguments: &ResolvedArguments,
) -> Option<ProcessorConfig> {
    let entries = case.as_sequence()?;
    let mut fallback = None;
    for entry in entries {
        let Some(map) = entry.as_mapping() else { continue };
        let Some((key, body)) = map.iter().next() else { continue };
        match key.as_str() {
            Some(schema::KW_CF_IF) => {
                if if_conditions_hold(body, info, arguments) {
                    if let Some(config) =
                        body.get(schema::KW_CF_THEN).and_then(read_processor_config)
                    {
                        return Some(config);
                    }
                    warn!("matching 'if' case carries no usable 'then' config");
                }
            }
            Some(schema::KW_DEFAULT) => {
                fallback = read_processor_config(body).or(fallback);
            }
            _ => {}
        }
    }
    fallback
}

/// Every entry of an `if` body other than `then` is a condition; they
/// are conjoined.
fn if_conditions_hold(body: &Value, info: &DataPointInfo, arguments: &ResolvedArguments) -> bool {
    let Some(map) = body.as_mapping() else {
        return false;
    };
    for (key, condition) in map {
        let Some(key) = key.as_str() else { continue };
        match key {
            schema::KW_CF_THEN => {}
            schema::KW_COND_ARGUMENT => {
                let name = condition
                    .get(schema::KW_COND_NAME)
                    .and_then(Value::as_str);
                let expected = condition.get(schema::KW_COND_VALUE);
                let holds = match (name, expected) {
                    (Some(name), Some(expected)) => {
                        arguments.get(name) == Some(&weak_parse(expected))
                    }
                    _ => {
                        warn!("argument condition needs both 'name' and 'value'");
                        false
                    }
                };
                if !holds {
                    return false;
                }
            }
            data_point => {
                if !verify_rule(data_point, condition, info) {
                    return false;
                }
            }
        }
    }
    true
}
