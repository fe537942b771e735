//! Parsing of human-friendly scalar literals found in recipes and probe data.
//!
//! `weak_parse` is deliberately forgiving: anything it cannot make sense of
//! is returned unchanged, so callers can compare values without caring
//! whether the recipe author wrote `7200` or `2 h`.


use serde_yaml::Value;

use crate::regex;

/// Seconds per duration unit, as printed by common probing tools.
fn duration_unit_factor(unit: &str) -> Option<u64> {
    match unit {
        "h" => Some(3600),
        "min" => Some(60),
        "s" => Some(1),
        _ => None,
    }
}

/// Parses durations of the form `(<number> <unit>)+`, e.g. `2 min 12 s`.
fn parse_duration(s: &str) -> Option<u64> {
    let tokens: Vec<&str> = s.split_ascii_whitespace().collect();
    if tokens.is_empty() || tokens.len() % 2 != 0 {
        return None;
    }
    let mut total = 0u64;
    for pair in tokens.chunks(2) {
        let amount: u64 = pair[0].parse().ok()?;
        total += amount * duration_unit_factor(pair[1])?;
    }
    Some(total)
}

/// Parses SI-suffixed magnitudes (`217M`, `1.2k`), preserving the numeric
/// kind of the prefix.
fn parse_si_suffix(s: &str) -> Option<Value> {
    let caps = regex!(r"^([0-9]+(?:\.[0-9]+)?)([kKmMgG])$").captures(s)?;
    let factor = match &caps[2] {
        "k" | "K" => 1_000u64,
        "m" | "M" => 1_000_000,
        _ => 1_000_000_000,
    };
    let prefix = &caps[1];
    if let Ok(int) = prefix.parse::<u64>() {
        Some(Value::from(int * factor))
    } else {
        prefix.parse::<f64>().ok().map(|f| Value::from(f * factor as f64))
    }
}

/// Parses bare decimal literals (`1920`, `600.024`, `-3`). Deliberately
/// stricter than `f64::from_str`: scientific notation and the inf/nan
/// spellings stay strings.
fn parse_plain_number(s: &str) -> Option<Value> {
    if regex!(r"^-?[0-9]+$").is_match(s) {
        return s.parse::<i64>().ok().map(Value::from);
    }
    if regex!(r"^-?[0-9]+\.[0-9]+$").is_match(s) {
        return s.parse::<f64>().ok().map(Value::from);
    }
    None
}

/// Attempts to parse string scalars into numbers:
/// - durations into seconds: `1 h 10 min` => 4200, `2 min 12 s` => 132
/// - human-friendly factors: `217M` => 217000000, `1.2k` => 1200.0
/// - bare numerals: `"1920"` => 1920, so quoted values compare equal to
///   the numbers probing yields
///
/// Everything else comes back unchanged.
pub fn weak_parse(value: &Value) -> Value {
    let Value::String(s) = value else {
        return value.clone();
    };
    if let Some(seconds) = parse_duration(s) {
        return Value::from(seconds);
    }
    if let Some(parsed) = parse_si_suffix(s) {
        return parsed;
    }
    if let Some(parsed) = parse_plain_number(s) {
        return parsed;
    }
    value.clone()
}

/// Applies [`weak_parse`] to every scalar leaf of a tree, preserving the
/// map and list structure.
pub fn weak_leaf_parse(value: &Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.iter().map(|(k, v)| (k.clone(), weak_leaf_parse(v))).collect(),
        ),
        Value::Sequence(items) => Value::Sequence(items.iter().map(weak_leaf_parse).collect()),
        other => weak_parse(other),
    }
}

/// Reads a list that recipe authors may write either as a proper list or as
/// a single comma-separated string.
pub fn read_list(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::String(s) => Some(
            s.split(',').map(|item| Value::from(item.trim().to_owned())).collect(),
        ),
        Value::Sequence(items) => Some(items.clone()),
        _ => None,
    }
}

/// Interprets a scalar as a bitrate in bits per second, accepting plain
/// integers and ffmpeg-style human values like `2M`, `1200k` or `1.2M`.
/// Fractional prefixes are fine as long as the scaled rate comes out at
/// a whole number of bits.
pub fn parse_bitrate(value: &Value) -> Option<u64> {
    match weak_parse(value) {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| *f > 0.0 && f.fract() == 0.0)
                    .map(|f| f as u64)
            })
            .filter(|&v| v > 0),
        _ => None,
    }
}
