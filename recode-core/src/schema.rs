//! The fixed grammar describing the recipe language.
//!
//! Paths are matched by their tail, so a rule registered at `size` covers
//! `input.size` as well as `input.streams.video.size`; wildcard patterns
//! like `arguments.*` win over shorter ones by match power.

use crate::grammar::{DocumentValidator, GrammarRule, ScalarKind, DOCUMENT_ROOT};

/// Spec version the engine understands, checked against `recode-engine`.
pub const SUPPORTED_SPEC_VERSION: u64 = 1;

pub const KW_SPEC_VERSION: &str = "recode-engine";

pub const KW_RECIPE_ROOT: &str = "recipe";
pub const KW_RECIPE_INPUT: &str = "input";
pub const KW_RECIPE_ARGUMENTS: &str = "arguments";
pub const KW_RECIPE_STREAM_PROCESSOR: &str = "stream-processor";
pub const KW_RECIPE_POST_PROCESSING: &str = "post-processing";
pub const KW_RECIPE_OUTPUT: &str = "output";

pub const KW_STREAMS_ROOT: &str = "streams";

// Argument definition keywords (see also KW_DEFAULT)
pub const KW_ARGUMENT_TYPE: &str = "type";
pub const KW_ARGUMENT_VALUES: &str = "values";
pub const KW_ARGUMENT_REQUIRED: &str = "required";

// Control flow keywords
pub const KW_CF_CASE: &str = "case";
pub const KW_CF_IF: &str = "if";
pub const KW_CF_THEN: &str = "then";

/// Used both as the default value of an argument and as the default case.
pub const KW_DEFAULT: &str = "default";

// Data points (applicable scope in comment: FILE, STREAM[types])
pub const KW_DP_EXTENSION: &str = "extension"; // FILE : str (no '.')
pub const KW_DP_SIZE: &str = "size"; // FILE, STREAM[V,A] : int
pub const KW_DP_DURATION: &str = "duration"; // FILE, STREAM[V,A] : int
pub const KW_DP_NB_STREAMS: &str = "nb-streams"; // FILE, STREAM : int
pub const KW_DP_WIDTH: &str = "width"; // STREAM[V] : int
pub const KW_DP_HEIGHT: &str = "height"; // STREAM[V] : int
pub const KW_DP_BIT_DEPTH: &str = "bit-depth"; // STREAM[V] : int
pub const KW_DP_BITRATE: &str = "bitrate"; // FILE, STREAM[V,A] : int
pub const KW_DP_CODEC: &str = "codec"; // STREAM : str
pub const KW_DP_HAS_CHAPTERS: &str = "has-chapters"; // FILE : bool
pub const KW_DP_QUALITY_INDEX: &str = "quality-index"; // STREAM[V] : float

// Data point specifiers
pub const KW_DPS_MAX: &str = "max";
pub const KW_DPS_MIN: &str = "min";
pub const KW_DPS_BLACKLIST: &str = "blacklist";
pub const KW_DPS_WHITELIST: &str = "whitelist";

// Argument reference in `if` conditions
pub const KW_COND_ARGUMENT: &str = "argument";
pub const KW_COND_NAME: &str = "name";
pub const KW_COND_VALUE: &str = "value";

pub const KW_OUTPUT_DIRECTORY: &str = "directory";
pub const KW_OUTPUT_SUFFIX: &str = "suffix";

pub const KW_PROCESSOR: &str = "processor";
pub const KW_PROCESSOR_PARAMETERS: &str = "parameters";

pub const ALL_DPS: &[&str] = &[KW_DPS_MAX, KW_DPS_MIN, KW_DPS_BLACKLIST, KW_DPS_WHITELIST];

pub const FILE_DATA_POINTS: &[&str] = &[
    KW_DP_EXTENSION,
    KW_DP_SIZE,
    KW_DP_DURATION,
    KW_DP_NB_STREAMS,
    KW_DP_BITRATE,
    KW_DP_HAS_CHAPTERS,
];

pub const STREAM_TYPES: &[&str] = &["video", "audio", "subtitle", "attachment"];

pub const GENERIC_STREAM_DPS: &[&str] = &[KW_DP_NB_STREAMS, KW_DP_CODEC];

pub const AV_STREAM_DPS: &[&str] = &[
    KW_DP_NB_STREAMS,
    KW_DP_CODEC,
    KW_DP_SIZE,
    KW_DP_DURATION,
    KW_DP_BITRATE,
];

pub const VIDEO_STREAM_DPS: &[&str] = &[
    KW_DP_NB_STREAMS,
    KW_DP_CODEC,
    KW_DP_SIZE,
    KW_DP_DURATION,
    KW_DP_BITRATE,
    KW_DP_WIDTH,
    KW_DP_HEIGHT,
    KW_DP_QUALITY_INDEX,
    KW_DP_BIT_DEPTH,
];

pub const ARGUMENT_TYPE_NAMES: &[&str] = &["str", "int", "float", "bool"];

/// A data point rule is either a specifier mapping drawn from
/// min/max/whitelist/blacklist or a bare scalar meaning equality.
fn data_point_rule() -> GrammarRule {
    GrammarRule::combine(vec![
        GrammarRule::at_least_1_of(ALL_DPS),
        GrammarRule::terminal_variable(None),
    ])
}

/// `{processor: ..., parameters: ...}` as required by processor configs.
fn processor_config_rules() -> Vec<GrammarRule> {
    vec![
        GrammarRule::all_of(&[KW_PROCESSOR]),
        GrammarRule::all_of(&[KW_PROCESSOR_PARAMETERS]),
    ]
}

/// Builds the full path -> rule table of the recipe language.
pub fn recipe_schema() -> Vec<(String, GrammarRule)> {
    let mut schema: Vec<(String, GrammarRule)> = Vec::new();
    let mut rule = |path: String, rule: GrammarRule| schema.push((path, rule));

    rule(
        DOCUMENT_ROOT.to_owned(),
        GrammarRule::all_of(&[KW_SPEC_VERSION, KW_RECIPE_ROOT]),
    );
    rule(
        KW_SPEC_VERSION.to_owned(),
        GrammarRule::terminal_variable(None),
    );
    rule(
        KW_RECIPE_ROOT.to_owned(),
        GrammarRule::combine(vec![
            GrammarRule::all_of(&[
                KW_RECIPE_INPUT,
                KW_RECIPE_STREAM_PROCESSOR,
                KW_RECIPE_POST_PROCESSING,
                KW_RECIPE_OUTPUT,
            ]),
            GrammarRule::any_of(&[KW_RECIPE_ARGUMENTS]),
        ]),
    );

    // Input admissibility: file data points plus per-type stream rules.
    let mut input_keys = FILE_DATA_POINTS.to_vec();
    input_keys.push(KW_STREAMS_ROOT);
    rule(KW_RECIPE_INPUT.to_owned(), GrammarRule::any_of(&input_keys));
    rule(
        KW_STREAMS_ROOT.to_owned(),
        GrammarRule::at_least_1_of(STREAM_TYPES),
    );
    rule("video".to_owned(), GrammarRule::at_least_1_of(VIDEO_STREAM_DPS));
    rule("audio".to_owned(), GrammarRule::at_least_1_of(AV_STREAM_DPS));
    rule(
        "subtitle".to_owned(),
        GrammarRule::at_least_1_of(GENERIC_STREAM_DPS),
    );
    rule(
        "attachment".to_owned(),
        GrammarRule::at_least_1_of(GENERIC_STREAM_DPS),
    );
    for data_point in [
        KW_DP_EXTENSION,
        KW_DP_SIZE,
        KW_DP_DURATION,
        KW_DP_NB_STREAMS,
        KW_DP_WIDTH,
        KW_DP_HEIGHT,
        KW_DP_BIT_DEPTH,
        KW_DP_BITRATE,
        KW_DP_CODEC,
        KW_DP_QUALITY_INDEX,
    ] {
        rule(data_point.to_owned(), data_point_rule());
    }
    rule(
        KW_DP_HAS_CHAPTERS.to_owned(),
        GrammarRule::terminal_variable(Some(ScalarKind::Bool)),
    );
    rule(
        KW_DPS_MAX.to_owned(),
        GrammarRule::terminal_variable(None),
    );
    rule(
        KW_DPS_MIN.to_owned(),
        GrammarRule::terminal_variable(None),
    );
    for list in [KW_DPS_BLACKLIST, KW_DPS_WHITELIST] {
        rule(
            list.to_owned(),
            GrammarRule::combine(vec![
                GrammarRule::terminal_collection(ScalarKind::Str),
                GrammarRule::terminal_variable(Some(ScalarKind::Str)),
            ]),
        );
    }

    // Argument declarations.
    rule(KW_RECIPE_ARGUMENTS.to_owned(), GrammarRule::any());
    let mut argument_keys = vec![KW_ARGUMENT_REQUIRED, KW_DEFAULT, KW_ARGUMENT_VALUES];
    argument_keys.extend_from_slice(ALL_DPS);
    rule(
        format!("{KW_RECIPE_ARGUMENTS}.*"),
        GrammarRule::combine(vec![
            GrammarRule::all_of(&[KW_ARGUMENT_TYPE]),
            GrammarRule::any_of(&argument_keys),
        ]),
    );
    rule(
        format!("{KW_RECIPE_ARGUMENTS}.*.{KW_ARGUMENT_TYPE}"),
        GrammarRule::terminal_variable_in(ScalarKind::Str, ARGUMENT_TYPE_NAMES),
    );
    rule(
        format!("{KW_RECIPE_ARGUMENTS}.*.{KW_ARGUMENT_VALUES}"),
        GrammarRule::terminal_collection(ScalarKind::Str),
    );
    rule(
        format!("{KW_RECIPE_ARGUMENTS}.*.{KW_ARGUMENT_REQUIRED}"),
        GrammarRule::terminal_variable(Some(ScalarKind::Bool)),
    );
    rule(
        format!("{KW_RECIPE_ARGUMENTS}.*.{KW_DEFAULT}"),
        GrammarRule::terminal_variable(None),
    );

    // Stream processors and their control flow.
    rule(
        KW_RECIPE_STREAM_PROCESSOR.to_owned(),
        GrammarRule::at_least_1_of(STREAM_TYPES),
    );
    let mut stream_processor_rules = processor_config_rules();
    stream_processor_rules.push(GrammarRule::all_of(&[KW_CF_CASE]));
    rule(
        format!("{KW_RECIPE_STREAM_PROCESSOR}.*"),
        GrammarRule::combine(stream_processor_rules),
    );
    rule(
        KW_CF_CASE.to_owned(),
        GrammarRule::nonterminal_collection(&[KW_DEFAULT, KW_CF_IF]),
    );
    rule(
        KW_CF_IF.to_owned(),
        GrammarRule::combine(vec![GrammarRule::all_of(&[KW_CF_THEN]), GrammarRule::any()]),
    );
    rule(
        KW_CF_THEN.to_owned(),
        GrammarRule::combine(processor_config_rules()),
    );
    rule(
        KW_DEFAULT.to_owned(),
        GrammarRule::combine(processor_config_rules()),
    );
    rule(
        KW_COND_ARGUMENT.to_owned(),
        GrammarRule::any_of(&[KW_COND_NAME, KW_COND_VALUE]),
    );
    rule(
        KW_COND_NAME.to_owned(),
        GrammarRule::terminal_variable(Some(ScalarKind::Str)),
    );
    rule(
        KW_COND_VALUE.to_owned(),
        GrammarRule::terminal_variable(None),
    );
    rule(
        KW_PROCESSOR.to_owned(),
        GrammarRule::terminal_variable(Some(ScalarKind::Str)),
    );
    rule(KW_PROCESSOR_PARAMETERS.to_owned(), GrammarRule::any());
    rule(
        format!("{KW_PROCESSOR_PARAMETERS}.*"),
        GrammarRule::terminal_variable(None),
    );

    // Post-processing and output.
    rule(
        KW_RECIPE_POST_PROCESSING.to_owned(),
        GrammarRule::nonterminal_collection(&[KW_CF_CASE]),
    );
    rule(
        KW_RECIPE_OUTPUT.to_owned(),
        GrammarRule::all_of(&[KW_OUTPUT_DIRECTORY, KW_OUTPUT_SUFFIX]),
    );
    rule(
        KW_OUTPUT_DIRECTORY.to_owned(),
        GrammarRule::terminal_variable(Some(ScalarKind::Str)),
    );
    rule(
        KW_OUTPUT_SUFFIX.to_owned(),
        GrammarRule::terminal_variable(Some(ScalarKind::Str)),
    );

    schema
}

/// The validator every [`crate::recipe::Recipe`] is checked with.
pub fn recipe_validator() -> DocumentValidator {
    DocumentValidator::new(recipe_schema())
}
