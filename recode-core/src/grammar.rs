//! Grammar-driven validation of structured documents.
//!
//! A schema is a table of dotted path patterns, each carrying a grammar
//! rule. The validator walks a document tree, matches every location
//! against the schema, and keeps only the subset the rules admit. Keys in
//! mappings are the non-terminals; scalars are the terminals. Collections
//! of mappings are only allowed as lists of single-entry mappings.

#[cfg(test)]
mod tests;

use std::collections::HashSet;

use regex::Regex;
use serde_yaml::{Mapping, Value};
use tracing::{debug, error, warn};

/// Path of the document root in a schema.
pub const DOCUMENT_ROOT: &str = "/";

pub type ValueSet = HashSet<Value>;

pub fn key_set(keys: &[&str]) -> ValueSet {
    keys.iter().map(|k| Value::from(*k)).collect()
}

/// Scalar type constraint for terminal rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarKind {
    Str,
    Int,
    Float,
    Bool,
}

impl ScalarKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            ScalarKind::Str => value.is_string(),
            ScalarKind::Int => value.as_i64().is_some() || value.as_u64().is_some(),
            ScalarKind::Float => value.as_f64().is_some(),
            ScalarKind::Bool => value.is_bool(),
        }
    }
}

/// What a rule is applied to, depending on the shape of the document node:
/// the key set of a mapping, the items of a list, or a bare scalar.
#[derive(Debug)]
pub enum RuleInput<'a> {
    Scalar(&'a Value),
    Keys(ValueSet),
    Items(&'a [Value]),
}

/// A grammar rule maps its input to the set of accepted items. For
/// terminal scalars the set contains the value itself when accepted; for
/// mappings it contains the accepted keys; for lists the accepted entries.
#[derive(Clone, Debug)]
pub enum GrammarRule {
    Any,
    AnyOf(ValueSet),
    NOf(usize, ValueSet),
    AtLeastNOf(usize, ValueSet),
    TerminalVariable {
        kind: Option<ScalarKind>,
        allowed: Option<ValueSet>,
    },
    TerminalCollection {
        kind: ScalarKind,
        allowed: Option<ValueSet>,
        required: Option<ValueSet>,
    },
    NonterminalCollection {
        allowed: Option<ValueSet>,
        required: Option<ValueSet>,
    },
    Combine(Vec<GrammarRule>),
}

impl GrammarRule {
    /// Accepts anything, unchanged.
    pub fn any() -> Self {
        GrammarRule::Any
    }

    /// For when values may exist but are not required.
    pub fn any_of(what: &[&str]) -> Self {
        GrammarRule::AnyOf(key_set(what))
    }

    /// For when exactly `n` of a set of values must exist.
    pub fn n_of(n: usize, what: &[&str]) -> Self {
        GrammarRule::NOf(n, key_set(what))
    }

    /// For when at least `n` of a set of values must exist.
    pub fn at_least_n_of(n: usize, what: &[&str]) -> Self {
        assert!(
            n <= what.len(),
            "at_least_n_of: n={n} larger than the {} allowed items",
            what.len()
        );
        GrammarRule::AtLeastNOf(n, key_set(what))
    }

    pub fn at_least_1_of(what: &[&str]) -> Self {
        Self::at_least_n_of(1, what)
    }

    pub fn one_of(what: &[&str]) -> Self {
        Self::n_of(1, what)
    }

    /// For when every member of a set of values must exist.
    pub fn all_of(what: &[&str]) -> Self {
        Self::n_of(what.len(), what)
    }

    /// A terminal scalar, optionally constrained by type.
    pub fn terminal_variable(kind: Option<ScalarKind>) -> Self {
        GrammarRule::TerminalVariable { kind, allowed: None }
    }

    /// A terminal scalar drawn from an enumerated set.
    pub fn terminal_variable_in(kind: ScalarKind, allowed: &[&str]) -> Self {
        GrammarRule::TerminalVariable {
            kind: Some(kind),
            allowed: Some(key_set(allowed)),
        }
    }

    /// A list of terminal scalars of one type.
    pub fn terminal_collection(kind: ScalarKind) -> Self {
        GrammarRule::TerminalCollection {
            kind,
            allowed: None,
            required: None,
        }
    }

    /// A list of single-entry mappings, identified by their sole keys.
    pub fn nonterminal_collection(allowed: &[&str]) -> Self {
        GrammarRule::NonterminalCollection {
            allowed: Some(key_set(allowed)),
            required: None,
        }
    }

    /// Combines multiple grammar rules in an or-like fashion: the union of
    /// everything any of them accepts.
    pub fn combine(rules: Vec<GrammarRule>) -> Self {
        GrammarRule::Combine(rules)
    }

    pub fn apply(&self, input: &RuleInput<'_>) -> ValueSet {
        match self {
            GrammarRule::Any => match input {
                RuleInput::Scalar(value) => std::iter::once((*value).clone()).collect(),
                RuleInput::Keys(keys) => keys.clone(),
                RuleInput::Items(items) => items.iter().map(item_identity).collect(),
            },
            GrammarRule::AnyOf(what) => match input {
                RuleInput::Keys(keys) => keys.intersection(what).cloned().collect(),
                other => reject_non_set("any_of", other),
            },
            GrammarRule::NOf(n, what) => match input {
                RuleInput::Keys(keys) => {
                    let common: ValueSet = keys.intersection(what).cloned().collect();
                    if common.len() == *n {
                        common
                    } else {
                        debug!(
                            "expected {n} items among {what:?}, got {}",
                            common.len()
                        );
                        ValueSet::new()
                    }
                }
                other => reject_non_set("n_of", other),
            },
            GrammarRule::AtLeastNOf(n, what) => match input {
                RuleInput::Keys(keys) => {
                    let common: ValueSet = keys.intersection(what).cloned().collect();
                    if common.len() >= *n {
                        common
                    } else {
                        debug!(
                            "missing {} among allowed items {what:?}",
                            n - common.len()
                        );
                        ValueSet::new()
                    }
                }
                other => reject_non_set("at_least_n_of", other),
            },
            GrammarRule::TerminalVariable { kind, allowed } => match input {
                RuleInput::Scalar(value)
                    if kind.map_or(true, |k| k.matches(value))
                        && allowed.as_ref().map_or(true, |a| a.contains(*value)) =>
                {
                    std::iter::once((*value).clone()).collect()
                }
                _ => ValueSet::new(),
            },
            GrammarRule::TerminalCollection {
                kind,
                allowed,
                required,
            } => match input {
                RuleInput::Items(items)
                    if items.iter().all(|item| kind.matches(item))
                        && allowed
                            .as_ref()
                            .map_or(true, |a| items.iter().all(|item| a.contains(item)))
                        && required
                            .as_ref()
                            .map_or(true, |r| r.iter().all(|item| items.contains(item))) =>
                {
                    items.iter().cloned().collect()
                }
                _ => ValueSet::new(),
            },
            GrammarRule::NonterminalCollection { allowed, required } => match input {
                RuleInput::Items(items) => nonterminal_keys(items, allowed, required),
                _ => ValueSet::new(),
            },
            GrammarRule::Combine(rules) => {
                let mut result = ValueSet::new();
                for rule in rules {
                    result.extend(rule.apply(input));
                }
                result
            }
        }
    }
}

/// The identity a list entry goes by in an accepted set: single-entry
/// mappings go by their sole key, scalars by themselves.
fn item_identity(item: &Value) -> Value {
    if let Value::Mapping(map) = item {
        if map.len() == 1 {
            return map.keys().next().cloned().unwrap_or(Value::Null);
        }
    }
    item.clone()
}

fn reject_non_set(rule: &str, input: &RuleInput<'_>) -> ValueSet {
    match input {
        // Scalars routinely reach set-shaped rules through `combine`d
        // alternatives, so this is not worth a warning.
        RuleInput::Scalar(value) => debug!("{rule}: expected a key set, got scalar {value:?}"),
        other => warn!("{rule}: expected a key set, got {other:?}"),
    }
    ValueSet::new()
}

fn nonterminal_keys(
    items: &[Value],
    allowed: &Option<ValueSet>,
    required: &Option<ValueSet>,
) -> ValueSet {
    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let Value::Mapping(map) = item else {
            return ValueSet::new();
        };
        let Some(key) = map.keys().next() else {
            warn!("nonterminal_collection: skipping empty mapping entry");
            continue;
        };
        entries.push((key.clone(), map.len() == 1));
    }
    if let Some(required) = required {
        if !required.iter().all(|r| entries.iter().any(|(key, _)| key == r)) {
            return ValueSet::new();
        }
    }
    entries
        .into_iter()
        .filter(|(key, single)| {
            *single && allowed.as_ref().map_or(true, |a| a.contains(key))
        })
        .map(|(key, _)| key)
        .collect()
}

/// Disambiguation score of a path pattern: 1.0 per literal segment, 0.5
/// per `*` wildcard, 0 per empty segment.
pub fn match_power(pattern: &str) -> f64 {
    pattern
        .split('.')
        .map(|segment| match segment {
            "*" => 0.5,
            "" => 0.0,
            _ => 1.0,
        })
        .sum()
}

fn compile_pattern(pattern: &str) -> Regex {
    let escaped = regex::escape(pattern).replace(r"\*", "[^.]*");
    Regex::new(&format!(r"^.*\.?{escaped}$")).expect("path pattern compiles")
}

fn child_path(path: &str, key: &str) -> String {
    format!("{path}.{key}")
}

struct SchemaEntry {
    pattern: String,
    regex: Regex,
    rule: GrammarRule,
}

/// Validates document trees against a grammar schema, returning the
/// admissible subset. Rule violations are logged and the offending
/// subtree dropped; the walk itself never fails.
pub struct DocumentValidator {
    entries: Vec<SchemaEntry>,
}

impl DocumentValidator {
    pub fn new(schema: Vec<(String, GrammarRule)>) -> Self {
        assert!(
            schema.iter().any(|(pattern, _)| pattern == DOCUMENT_ROOT),
            "schema without a document root rule"
        );
        let entries: Vec<SchemaEntry> = schema
            .into_iter()
            .map(|(pattern, rule)| SchemaEntry {
                regex: compile_pattern(&pattern),
                pattern,
                rule,
            })
            .collect();
        debug!("loaded grammar with {} rules", entries.len());
        DocumentValidator { entries }
    }

    /// Checks a document against the grammar and returns the valid subset
    /// of it. Returns `None` when the root itself is inadmissible.
    pub fn validate(&self, document: &Value) -> Option<Value> {
        let mut used = HashSet::new();
        let result = self.validate_at(document, DOCUMENT_ROOT, &mut used);
        let unused: Vec<&str> = self
            .entries
            .iter()
            .map(|entry| entry.pattern.as_str())
            .filter(|pattern| !used.contains(*pattern))
            .collect();
        if !unused.is_empty() {
            warn!("grammar rules never consulted: {unused:?}");
        }
        result
    }

    /// Selects the best-matching rule for a path: unique match-power
    /// maximum wins; ties at power 1.0 go to the longest pattern; any
    /// other tie is a schema ambiguity and drops the subtree.
    fn find_rule(&self, path: &str, used: &mut HashSet<String>) -> Option<&SchemaEntry> {
        let candidates: Vec<&SchemaEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.regex.is_match(path))
            .collect();

        let selected = match candidates.len() {
            0 => {
                warn!("no grammar rule matches '{path}'; dropping the subtree");
                None
            }
            1 => Some(candidates[0]),
            _ => {
                let max_power = candidates
                    .iter()
                    .map(|entry| match_power(&entry.pattern))
                    .fold(f64::MIN, f64::max);
                let mut at_max: Vec<&SchemaEntry> = candidates
                    .into_iter()
                    .filter(|entry| match_power(&entry.pattern) == max_power)
                    .collect();
                if at_max.len() == 1 {
                    Some(at_max[0])
                } else if max_power == 1.0 {
                    at_max.sort_by_key(|entry| entry.pattern.len());
                    at_max.last().copied()
                } else {
                    error!(
                        "ambiguous grammar rules for '{path}' at match power {max_power}: {:?}",
                        at_max.iter().map(|e| e.pattern.as_str()).collect::<Vec<_>>()
                    );
                    None
                }
            }
        };
        if let Some(entry) = selected {
            debug!("matched '{path}' to grammar rule '{}'", entry.pattern);
            used.insert(entry.pattern.clone());
        }
        selected
    }

    fn validate_at(&self, data: &Value, path: &str, used: &mut HashSet<String>) -> Option<Value> {
        let entry = self.find_rule(path, used)?;
        match data {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                if entry.rule.apply(&RuleInput::Scalar(data)).is_empty() {
                    warn!("grammar rule '{}' rejected the value at {path}", entry.pattern);
                    None
                } else {
                    Some(data.clone())
                }
            }
            Value::Mapping(map) => {
                let keys: ValueSet = map.keys().cloned().collect();
                let accepted = entry.rule.apply(&RuleInput::Keys(keys));
                let mut result = Mapping::new();
                for (key, value) in map {
                    let Some(key_str) = key.as_str() else {
                        warn!("dropping non-string key {key:?} at {path}");
                        continue;
                    };
                    let key_path = child_path(path, key_str);
                    if !accepted.contains(key) {
                        warn!("key not admitted by the grammar: {key_path}");
                        continue;
                    }
                    let child = self.validate_at(value, &key_path, used);
                    result.insert(key.clone(), child.unwrap_or(Value::Null));
                }
                if result.is_empty() {
                    warn!("grammar produced an empty mapping at {path}");
                }
                Some(Value::Mapping(result))
            }
            Value::Sequence(items) => {
                let accepted = entry.rule.apply(&RuleInput::Items(items));
                let mut result = Vec::new();
                for item in items {
                    match item {
                        Value::Mapping(map) if map.len() == 1 => {
                            let (key, value) = map.iter().next().expect("single entry");
                            match key.as_str() {
                                Some(key_str) if accepted.contains(key) => {
                                    let key_path = child_path(path, key_str);
                                    let child = self.validate_at(value, &key_path, used);
                                    let mut entry_map = Mapping::new();
                                    entry_map.insert(key.clone(), child.unwrap_or(Value::Null));
                                    result.push(Value::Mapping(entry_map));
                                }
                                _ => warn!("list entry {key:?} not admitted at {path}"),
                            }
                        }
                        Value::Mapping(_) => {
                            warn!("expected a single-entry mapping in the list at {path}");
                        }
                        scalar if accepted.contains(scalar) => result.push(scalar.clone()),
                        other => warn!("list item {other:?} not admitted at {path}"),
                    }
                }
                if result.is_empty() {
                    warn!("grammar produced an empty list at {path}");
                }
                Some(Value::Sequence(result))
            }
            other => {
                error!("value of unexpected kind at {path}: {other:?}");
                None
            }
        }
    }
}
