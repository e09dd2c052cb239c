//! Event log records.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Written wherever a value does not apply: open-ended `end_time`s and parameters a
/// record does not carry.
pub const NOT_APPLICABLE: &str = "NaN";

/// Record categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Gas presentation. End times are extended to the next gas change.
    Gas,
    /// Optogenetic stimulation
    Opto,
    /// Anything else
    Event,
    /// Olfactometer
    Odor,
}

impl Category {
    /// Name written to the log table
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Gas => "gas",
            Category::Opto => "opto",
            Category::Event => "event",
            Category::Odor => "odor",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parameter value attached to a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Whole number
    Int(i64),
    /// Real number
    Float(f64),
    /// Flag
    Bool(bool),
    /// Free text
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) if v.is_nan() => f.write_str(NOT_APPLICABLE),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

macro_rules! int_param {
    ($($t:ty),*) => {
        $(impl From<$t> for ParamValue {
            fn from(v: $t) -> Self {
                ParamValue::Int(i64::from(v))
            }
        })*
    };
}
int_param!(u8, u16, u32, i32, i64);

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// Operation parameters in insertion order. Serializes as a map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    /// No parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Params::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set `key`, replacing an earlier value in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Value of `key`
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no parameters
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct ParamsVisitor;

impl<'de> Visitor<'de> for ParamsVisitor {
    type Value = Params;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of parameter names to values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Params, A::Error> {
        let mut params = Params::new();
        while let Some((key, value)) = access.next_entry::<String, ParamValue>()? {
            params.insert(key, value);
        }
        Ok(params)
    }
}

impl<'de> Deserialize<'de> for Params {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(ParamsVisitor)
    }
}

/// What an action reports about itself: label, category and parameters.
///
/// Timing is added by the pipeline when it turns this into a [`LogRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Record label
    pub label: String,
    /// Record category
    pub category: Category,
    /// Operation parameters
    pub params: Params,
}

impl Outcome {
    /// Outcome with no parameters
    pub fn new(label: impl Into<String>, category: Category) -> Self {
        Self {
            label: label.into(),
            category,
            params: Params::new(),
        }
    }

    /// Attach a parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key, value);
        self
    }
}

/// One row of the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// What happened
    pub label: String,
    /// Category
    pub category: Category,
    /// Epoch seconds
    pub start_time: f64,
    /// Epoch seconds, `None` for instantaneous events
    pub end_time: Option<f64>,
    /// Operation parameters
    pub params: Params,
}

impl LogRecord {
    /// Record from an outcome and its timing
    pub fn from_outcome(outcome: Outcome, start_time: f64, end_time: Option<f64>) -> Self {
        Self {
            label: outcome.label,
            category: outcome.category,
            start_time,
            end_time,
            params: outcome.params,
        }
    }

    /// Copy with every timestamp shifted by `-base`
    pub fn relative_to(&self, base: f64) -> Self {
        Self {
            start_time: self.start_time - base,
            end_time: self.end_time.map(|t| t - base),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_keep_insertion_order_and_replace_in_place() {
        let mut params = Params::new().with("amplitude", 0.5).with("duration", 2.0);
        params.insert("amplitude", 0.7);
        params.insert("frequency", 20u8);

        let keys: Vec<&str> = params.keys().collect();
        assert_eq!(keys, vec!["amplitude", "duration", "frequency"]);
        assert_eq!(params.get("amplitude"), Some(&ParamValue::Float(0.7)));
        assert_eq!(params.get("frequency"), Some(&ParamValue::Int(20)));
    }

    #[test]
    fn values_render_for_the_table() {
        assert_eq!(ParamValue::from(0.05).to_string(), "0.05");
        assert_eq!(ParamValue::from(3u16).to_string(), "3");
        assert_eq!(ParamValue::from(f64::NAN).to_string(), NOT_APPLICABLE);
        assert_eq!(ParamValue::from("insp").to_string(), "insp");
        assert_eq!(Category::Odor.to_string(), "odor");
    }

    #[test]
    fn params_are_a_map_on_the_wire() {
        let params: Params = serde_json::from_str(r#"{"odor": "limonene", "trial": 3}"#).unwrap();
        assert_eq!(params.keys().collect::<Vec<_>>(), vec!["odor", "trial"]);
        assert_eq!(params.get("trial"), Some(&ParamValue::Int(3)));
        assert_eq!(
            serde_json::to_string(&params).unwrap(),
            r#"{"odor":"limonene","trial":3}"#
        );
    }

    #[test]
    fn relative_times() {
        let record = LogRecord::from_outcome(Outcome::new("pulse", Category::Opto), 110.0, None);
        let rel = record.relative_to(100.0);
        assert_eq!(rel.start_time, 10.0);
        assert_eq!(rel.end_time, None);
    }
}
