//! IAM condition blocks and their satisfiability analysis.
//!
//! A [`ConditionSet`] mirrors the provider's `Condition` object:
//! operator -> key -> values. Values under one key are ORed; distinct
//! operator/key entries are ANDed.
//!
//! The analysis answers two questions the checker needs:
//! - can this set ever be satisfied on its own ([`ConditionSet::is_satisfiable`])
//! - can two sets hold for the same request ([`ConditionSet::compatible_with`])
//!
//! It is conservative: when it cannot prove a contradiction it reports the
//! conditions as satisfiable.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate};

use crate::synth::errors::SynthError;
use crate::synth::wildcard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionOperator {
    StringEquals,
    StringNotEquals,
    StringLike,
    StringNotLike,
    ArnEquals,
    ArnNotEquals,
    ArnLike,
    ArnNotLike,
    NumericEquals,
    NumericNotEquals,
    NumericLessThan,
    NumericLessThanEquals,
    NumericGreaterThan,
    NumericGreaterThanEquals,
    DateEquals,
    DateNotEquals,
    DateLessThan,
    DateLessThanEquals,
    DateGreaterThan,
    DateGreaterThanEquals,
    Bool,
    IpAddress,
    NotIpAddress,
    Null,
}

const ALL_OPERATORS: &[ConditionOperator] = &[
    ConditionOperator::StringEquals,
    ConditionOperator::StringNotEquals,
    ConditionOperator::StringLike,
    ConditionOperator::StringNotLike,
    ConditionOperator::ArnEquals,
    ConditionOperator::ArnNotEquals,
    ConditionOperator::ArnLike,
    ConditionOperator::ArnNotLike,
    ConditionOperator::NumericEquals,
    ConditionOperator::NumericNotEquals,
    ConditionOperator::NumericLessThan,
    ConditionOperator::NumericLessThanEquals,
    ConditionOperator::NumericGreaterThan,
    ConditionOperator::NumericGreaterThanEquals,
    ConditionOperator::DateEquals,
    ConditionOperator::DateNotEquals,
    ConditionOperator::DateLessThan,
    ConditionOperator::DateLessThanEquals,
    ConditionOperator::DateGreaterThan,
    ConditionOperator::DateGreaterThanEquals,
    ConditionOperator::Bool,
    ConditionOperator::IpAddress,
    ConditionOperator::NotIpAddress,
    ConditionOperator::Null,
];

/// How an ordered operator compares the request value with its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Equals,
    NotEquals,
    LessThan,
    LessThanEquals,
    GreaterThan,
    GreaterThanEquals,
}

impl ConditionOperator {
    /// Base operator name without qualifiers, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        ALL_OPERATORS
            .iter()
            .copied()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOperator::StringEquals => "StringEquals",
            ConditionOperator::StringNotEquals => "StringNotEquals",
            ConditionOperator::StringLike => "StringLike",
            ConditionOperator::StringNotLike => "StringNotLike",
            ConditionOperator::ArnEquals => "ArnEquals",
            ConditionOperator::ArnNotEquals => "ArnNotEquals",
            ConditionOperator::ArnLike => "ArnLike",
            ConditionOperator::ArnNotLike => "ArnNotLike",
            ConditionOperator::NumericEquals => "NumericEquals",
            ConditionOperator::NumericNotEquals => "NumericNotEquals",
            ConditionOperator::NumericLessThan => "NumericLessThan",
            ConditionOperator::NumericLessThanEquals => "NumericLessThanEquals",
            ConditionOperator::NumericGreaterThan => "NumericGreaterThan",
            ConditionOperator::NumericGreaterThanEquals => "NumericGreaterThanEquals",
            ConditionOperator::DateEquals => "DateEquals",
            ConditionOperator::DateNotEquals => "DateNotEquals",
            ConditionOperator::DateLessThan => "DateLessThan",
            ConditionOperator::DateLessThanEquals => "DateLessThanEquals",
            ConditionOperator::DateGreaterThan => "DateGreaterThan",
            ConditionOperator::DateGreaterThanEquals => "DateGreaterThanEquals",
            ConditionOperator::Bool => "Bool",
            ConditionOperator::IpAddress => "IpAddress",
            ConditionOperator::NotIpAddress => "NotIpAddress",
            ConditionOperator::Null => "Null",
        }
    }

    /// Negated operators evaluate to true when the key is absent.
    fn is_negated(&self) -> bool {
        matches!(
            self,
            ConditionOperator::StringNotEquals
                | ConditionOperator::StringNotLike
                | ConditionOperator::ArnNotEquals
                | ConditionOperator::ArnNotLike
                | ConditionOperator::NumericNotEquals
                | ConditionOperator::DateNotEquals
                | ConditionOperator::NotIpAddress
        )
    }

    fn numeric_comparison(&self) -> Option<Comparison> {
        match self {
            ConditionOperator::NumericEquals => Some(Comparison::Equals),
            ConditionOperator::NumericNotEquals => Some(Comparison::NotEquals),
            ConditionOperator::NumericLessThan => Some(Comparison::LessThan),
            ConditionOperator::NumericLessThanEquals => Some(Comparison::LessThanEquals),
            ConditionOperator::NumericGreaterThan => Some(Comparison::GreaterThan),
            ConditionOperator::NumericGreaterThanEquals => Some(Comparison::GreaterThanEquals),
            _ => None,
        }
    }

    fn date_comparison(&self) -> Option<Comparison> {
        match self {
            ConditionOperator::DateEquals => Some(Comparison::Equals),
            ConditionOperator::DateNotEquals => Some(Comparison::NotEquals),
            ConditionOperator::DateLessThan => Some(Comparison::LessThan),
            ConditionOperator::DateLessThanEquals => Some(Comparison::LessThanEquals),
            ConditionOperator::DateGreaterThan => Some(Comparison::GreaterThan),
            ConditionOperator::DateGreaterThanEquals => Some(Comparison::GreaterThanEquals),
            _ => None,
        }
    }

    fn validate_value(&self, key: &str, value: &str) -> Result<(), SynthError> {
        let invalid = |what: &str| {
            Err(SynthError::InvalidCondition(format!(
                "{} on `{key}` expects {what}, got `{value}`",
                self.as_str()
            )))
        };
        match self {
            ConditionOperator::Bool | ConditionOperator::Null => {
                if value != "true" && value != "false" {
                    return invalid("`true` or `false`");
                }
            }
            ConditionOperator::IpAddress | ConditionOperator::NotIpAddress => {
                if value.parse::<IpNetwork>().is_err() {
                    return invalid("a CIDR block");
                }
            }
            op if op.numeric_comparison().is_some() => {
                if parse_number(value).is_none() {
                    return invalid("a number");
                }
            }
            op if op.date_comparison().is_some() => {
                if parse_date(value).is_none() {
                    return invalid("an ISO 8601 date or epoch seconds");
                }
            }
            ConditionOperator::ArnEquals
            | ConditionOperator::ArnNotEquals
            | ConditionOperator::ArnLike
            | ConditionOperator::ArnNotLike => {
                if !value.starts_with("arn:") && value != "*" {
                    return invalid("an ARN");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn parse_number(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Epoch seconds of an ISO 8601 timestamp, a plain date, or an integer.
fn parse_date(value: &str) -> Option<f64> {
    if let Ok(secs) = value.parse::<i64>() {
        return Some(secs as f64);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp() as f64);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp() as f64)
}

impl std::fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-valued key qualifier: `ForAnyValue:` or `ForAllValues:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SetQualifier {
    ForAnyValue,
    ForAllValues,
}

impl SetQualifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetQualifier::ForAnyValue => "ForAnyValue",
            SetQualifier::ForAllValues => "ForAllValues",
        }
    }
}

/// A base operator with its optional set qualifier and `IfExists` suffix,
/// e.g. `ForAnyValue:StringLikeIfExists`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedOperator {
    pub base: ConditionOperator,
    pub set: Option<SetQualifier>,
    pub if_exists: bool,
}

impl QualifiedOperator {
    /// Case-insensitive. `Null` takes neither `IfExists` nor a set qualifier.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (set, rest) = [SetQualifier::ForAnyValue, SetQualifier::ForAllValues]
            .into_iter()
            .find_map(|q| {
                let prefix = format!("{}:", q.as_str());
                strip_prefix_ignore_case(s, &prefix).map(|rest| (Some(q), rest))
            })
            .unwrap_or((None, s));
        let (if_exists, name) = match strip_suffix_ignore_case(rest, "IfExists") {
            Some(name) => (true, name),
            None => (false, rest),
        };
        let base = ConditionOperator::parse(name)?;
        if base == ConditionOperator::Null && (if_exists || set.is_some()) {
            return None;
        }
        Some(Self {
            base,
            set,
            if_exists,
        })
    }

    /// Whether the entry holds for a request that lacks the key.
    fn holds_when_absent(&self, values: &BTreeSet<String>) -> bool {
        if self.if_exists {
            return true;
        }
        match (self.set, self.base) {
            (Some(SetQualifier::ForAllValues), _) => true,
            (Some(SetQualifier::ForAnyValue), _) => false,
            (None, ConditionOperator::Null) => values.contains("true"),
            (None, base) => base.is_negated(),
        }
    }

    /// `Null` with only `true`: the key must be missing.
    fn requires_absence(&self, values: &BTreeSet<String>) -> bool {
        self.base == ConditionOperator::Null && !values.contains("false")
    }
}

impl From<ConditionOperator> for QualifiedOperator {
    fn from(base: ConditionOperator) -> Self {
        Self {
            base,
            set: None,
            if_exists: false,
        }
    }
}

impl std::fmt::Display for QualifiedOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(set) = self.set {
            write!(f, "{}:", set.as_str())?;
        }
        f.write_str(self.base.as_str())?;
        if self.if_exists {
            f.write_str("IfExists")?;
        }
        Ok(())
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let at = s.len().checked_sub(suffix.len())?;
    let tail = s.get(at..)?;
    tail.eq_ignore_ascii_case(suffix).then(|| &s[..at])
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConditionSet {
    entries: BTreeMap<QualifiedOperator, BTreeMap<String, BTreeSet<String>>>,
}

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one operator/key entry. The same operator/key pair may only be
    /// declared once per grant.
    pub fn insert(
        &mut self,
        operator: impl Into<QualifiedOperator>,
        key: &str,
        values: impl IntoIterator<Item = String>,
    ) -> Result<(), SynthError> {
        let operator = operator.into();
        if key.trim().is_empty() {
            return Err(SynthError::InvalidCondition(
                "condition key must not be empty".into(),
            ));
        }
        let values: BTreeSet<String> = values.into_iter().collect();
        if values.is_empty() {
            return Err(SynthError::InvalidCondition(format!(
                "{operator} on `{key}` has no values"
            )));
        }
        for v in &values {
            operator.base.validate_value(key, v)?;
        }
        let by_key = self.entries.entry(operator).or_default();
        if by_key.contains_key(key) {
            return Err(SynthError::InvalidCondition(format!(
                "{operator} on `{key}` declared more than once"
            )));
        }
        by_key.insert(key.to_string(), values);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of operator/key entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(|m| m.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (QualifiedOperator, &str, &BTreeSet<String>)> {
        self.entries.iter().flat_map(|(op, by_key)| {
            by_key
                .iter()
                .map(move |(key, values)| (*op, key.as_str(), values))
        })
    }

    /// Every entry of `self` appears, with identical values, in `other`.
    pub fn is_subset_of(&self, other: &ConditionSet) -> bool {
        self.iter().all(|(op, key, values)| {
            other
                .entries
                .get(&op)
                .and_then(|m| m.get(key))
                .map(|v| v == values)
                .unwrap_or(false)
        })
    }

    pub fn is_strict_subset_of(&self, other: &ConditionSet) -> bool {
        self.len() < other.len() && self.is_subset_of(other)
    }

    /// Provider JSON shape: `{"Operator": {"key": ["v", ...]}}`.
    pub fn to_document(&self) -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
        self.entries
            .iter()
            .map(|(op, by_key)| {
                (
                    op.to_string(),
                    by_key
                        .iter()
                        .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
                        .collect(),
                )
            })
            .collect()
    }

    pub fn is_satisfiable(&self) -> bool {
        satisfiable(self.iter())
    }

    /// Whether some request could satisfy both `self` and `other`.
    pub fn compatible_with(&self, other: &ConditionSet) -> bool {
        satisfiable(self.iter().chain(other.iter()))
    }
}

impl std::fmt::Display for ConditionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("(none)");
        }
        let parts: Vec<String> = self
            .iter()
            .map(|(op, key, values)| {
                let vals: Vec<&str> = values.iter().map(|s| s.as_str()).collect();
                format!("{op} {key} [{}]", vals.join(", "))
            })
            .collect();
        f.write_str(&parts.join(" && "))
    }
}

// ─── Satisfiability ─────────────────────────────────────────────────────

fn satisfiable<'a>(
    entries: impl Iterator<Item = (QualifiedOperator, &'a str, &'a BTreeSet<String>)>,
) -> bool {
    // Condition keys are case-insensitive on the provider side.
    let mut by_key: BTreeMap<String, Vec<(QualifiedOperator, &BTreeSet<String>)>> =
        BTreeMap::new();
    for (op, key, values) in entries {
        by_key
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push((op, values));
    }
    by_key.values().all(|constraints| key_satisfiable(constraints))
}

/// A key is satisfiable if every entry holds when it is missing, or if its
/// values can agree when it is present.
fn key_satisfiable(constraints: &[(QualifiedOperator, &BTreeSet<String>)]) -> bool {
    let when_absent = constraints
        .iter()
        .all(|(op, values)| op.holds_when_absent(values));
    when_absent || present_satisfiable(constraints)
}

fn present_satisfiable(constraints: &[(QualifiedOperator, &BTreeSet<String>)]) -> bool {
    if constraints
        .iter()
        .any(|(op, values)| op.requires_absence(values))
    {
        return false;
    }
    // Set-qualified entries test multi-valued keys and are not compared
    // value by value.
    let single: Vec<(ConditionOperator, &BTreeSet<String>)> = constraints
        .iter()
        .filter(|(op, _)| op.set.is_none())
        .map(|&(op, values)| (op.base, values))
        .collect();
    string_satisfiable(&single)
        && bool_satisfiable(&single)
        && ordered_satisfiable(&single, ConditionOperator::numeric_comparison, parse_number)
        && ordered_satisfiable(&single, ConditionOperator::date_comparison, parse_date)
        && ip_satisfiable(&single)
}

fn string_satisfiable(constraints: &[(ConditionOperator, &BTreeSet<String>)]) -> bool {
    let mut candidates: Option<BTreeSet<String>> = None;
    let mut like: Vec<&BTreeSet<String>> = Vec::new();
    let mut not_equal: BTreeSet<&str> = BTreeSet::new();
    let mut not_like: Vec<&str> = Vec::new();

    for &(op, values) in constraints {
        match op {
            ConditionOperator::StringEquals | ConditionOperator::ArnEquals => {
                intersect(&mut candidates, values);
            }
            ConditionOperator::StringLike | ConditionOperator::ArnLike => {
                // A like set without wildcards behaves as equality.
                if values.iter().all(|v| !wildcard::has_wildcard(v)) {
                    intersect(&mut candidates, values);
                } else {
                    like.push(values);
                }
            }
            ConditionOperator::StringNotEquals | ConditionOperator::ArnNotEquals => {
                not_equal.extend(values.iter().map(|s| s.as_str()));
            }
            ConditionOperator::StringNotLike | ConditionOperator::ArnNotLike => {
                not_like.extend(values.iter().map(|s| s.as_str()));
            }
            _ => {}
        }
    }

    match candidates {
        Some(candidates) => candidates.iter().any(|c| {
            like.iter()
                .all(|set| set.iter().any(|p| wildcard::matches(p, c)))
                && !not_equal.contains(c.as_str())
                && !not_like.iter().any(|p| wildcard::matches(p, c))
        }),
        None => {
            // Without concrete candidates the only provable contradiction is a
            // positive pattern against a catch-all negative one.
            let positive = !like.is_empty();
            !(positive && not_like.iter().any(|p| p.chars().all(|c| c == '*')))
        }
    }
}

fn intersect(candidates: &mut Option<BTreeSet<String>>, values: &BTreeSet<String>) {
    *candidates = Some(match candidates.take() {
        None => values.clone(),
        Some(current) => current.intersection(values).cloned().collect(),
    });
}

fn bool_satisfiable(constraints: &[(ConditionOperator, &BTreeSet<String>)]) -> bool {
    let mut allowed: Option<BTreeSet<String>> = None;
    for &(op, values) in constraints {
        if op == ConditionOperator::Bool {
            intersect(&mut allowed, values);
        }
    }
    allowed.map(|a| !a.is_empty()).unwrap_or(true)
}

#[derive(Debug, Clone, Copy)]
struct Bound {
    value: f64,
    inclusive: bool,
}

/// Numeric and date operators: intersect the bounds, then check the
/// allowed exact values against them.
fn ordered_satisfiable(
    constraints: &[(ConditionOperator, &BTreeSet<String>)],
    comparison: fn(&ConditionOperator) -> Option<Comparison>,
    parse: fn(&str) -> Option<f64>,
) -> bool {
    let mut lower: Option<Bound> = None;
    let mut upper: Option<Bound> = None;
    let mut equals: Option<Vec<f64>> = None;
    let mut excluded: Vec<f64> = Vec::new();

    for &(op, values) in constraints {
        let Some(cmp) = comparison(&op) else {
            continue;
        };
        let nums: Vec<f64> = values.iter().filter_map(|v| parse(v)).collect();
        if nums.is_empty() {
            continue;
        }
        let max = nums.iter().copied().fold(f64::MIN, f64::max);
        let min = nums.iter().copied().fold(f64::MAX, f64::min);
        match cmp {
            Comparison::Equals => {
                equals = Some(match equals.take() {
                    None => nums,
                    Some(current) => current.into_iter().filter(|v| nums.contains(v)).collect(),
                });
            }
            // A single negated value excludes it; several are ORed and
            // exclude nothing provably.
            Comparison::NotEquals => {
                if let [only] = nums.as_slice() {
                    excluded.push(*only);
                }
            }
            // Multiple values are ORed, so the loosest one wins.
            Comparison::LessThan => tighten_upper(&mut upper, max, false),
            Comparison::LessThanEquals => tighten_upper(&mut upper, max, true),
            Comparison::GreaterThan => tighten_lower(&mut lower, min, false),
            Comparison::GreaterThanEquals => tighten_lower(&mut lower, min, true),
        }
    }

    let within = |v: f64| {
        lower
            .map(|b| if b.inclusive { v >= b.value } else { v > b.value })
            .unwrap_or(true)
            && upper
                .map(|b| if b.inclusive { v <= b.value } else { v < b.value })
                .unwrap_or(true)
    };

    match equals {
        Some(values) => values
            .into_iter()
            .any(|v| within(v) && !excluded.contains(&v)),
        None => match (lower, upper) {
            (Some(l), Some(u)) if l.value == u.value => {
                l.inclusive && u.inclusive && !excluded.contains(&l.value)
            }
            (Some(l), Some(u)) => l.value < u.value,
            _ => true,
        },
    }
}

fn tighten_upper(upper: &mut Option<Bound>, value: f64, inclusive: bool) {
    let candidate = Bound { value, inclusive };
    *upper = Some(match upper.take() {
        None => candidate,
        Some(b) if value < b.value || (value == b.value && !inclusive) => candidate,
        Some(b) => b,
    });
}

fn tighten_lower(lower: &mut Option<Bound>, value: f64, inclusive: bool) {
    let candidate = Bound { value, inclusive };
    *lower = Some(match lower.take() {
        None => candidate,
        Some(b) if value > b.value || (value == b.value && !inclusive) => candidate,
        Some(b) => b,
    });
}

fn ip_satisfiable(constraints: &[(ConditionOperator, &BTreeSet<String>)]) -> bool {
    let parse = |values: &BTreeSet<String>| -> Vec<IpNetwork> {
        values
            .iter()
            .filter_map(|v| v.parse::<IpNetwork>().ok())
            .collect()
    };

    let mut candidates: Option<Vec<IpNetwork>> = None;
    let mut excluded: Vec<IpNetwork> = Vec::new();

    for &(op, values) in constraints {
        match op {
            ConditionOperator::IpAddress => {
                let nets = parse(values);
                candidates = Some(match candidates.take() {
                    None => nets,
                    Some(current) => intersect_networks(&current, &nets),
                });
            }
            ConditionOperator::NotIpAddress => excluded.extend(parse(values)),
            _ => {}
        }
    }

    match candidates {
        Some(nets) => nets
            .iter()
            .any(|n| !excluded.iter().any(|ex| network_contains(ex, n))),
        None => true,
    }
}

/// CIDR blocks either nest or are disjoint, so the intersection of two
/// overlapping blocks is the narrower one.
fn intersect_networks(a: &[IpNetwork], b: &[IpNetwork]) -> Vec<IpNetwork> {
    let mut out = Vec::new();
    for x in a {
        for y in b {
            if network_contains(x, y) {
                out.push(*y);
            } else if network_contains(y, x) {
                out.push(*x);
            }
        }
    }
    out
}

fn network_contains(outer: &IpNetwork, inner: &IpNetwork) -> bool {
    outer.is_ipv4() == inner.is_ipv4()
        && outer.prefix() <= inner.prefix()
        && outer.contains(inner.network())
}
