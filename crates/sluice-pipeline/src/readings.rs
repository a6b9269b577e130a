//! Record batches flowing through filter stages
//!
//! A `Reading` is one record from a data source: the asset it came
//! from, when it was taken, and a map of named datapoint values. A
//! `ReadingSet` is an owned batch of readings; passing one by value is
//! how the host hands a batch over for consumption.

use crate::errors::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One datapoint value inside a reading.
///
/// Variant order matters for untagged deserialization: booleans must be
/// tried before integers so `true` does not parse as a number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DatapointValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    FloatArray(Vec<f64>),
}

impl From<bool> for DatapointValue {
    fn from(v: bool) -> Self {
        DatapointValue::Bool(v)
    }
}

impl From<i64> for DatapointValue {
    fn from(v: i64) -> Self {
        DatapointValue::Integer(v)
    }
}

impl From<f64> for DatapointValue {
    fn from(v: f64) -> Self {
        DatapointValue::Float(v)
    }
}

impl From<&str> for DatapointValue {
    fn from(v: &str) -> Self {
        DatapointValue::Text(v.to_string())
    }
}

impl From<String> for DatapointValue {
    fn from(v: String) -> Self {
        DatapointValue::Text(v)
    }
}

impl From<Vec<f64>> for DatapointValue {
    fn from(v: Vec<f64>) -> Self {
        DatapointValue::FloatArray(v)
    }
}

/// One record from a data source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub asset: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "readings", default)]
    pub datapoints: BTreeMap<String, DatapointValue>,
}

impl Reading {
    pub fn new(asset: impl Into<String>) -> Self {
        Reading {
            asset: asset.into(),
            timestamp: Utc::now(),
            datapoints: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_datapoint(
        mut self,
        name: impl Into<String>,
        value: impl Into<DatapointValue>,
    ) -> Self {
        self.datapoints.insert(name.into(), value.into());
        self
    }
}

/// An owned batch of readings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ReadingSet {
    readings: Vec<Reading>,
}

impl ReadingSet {
    pub fn new(readings: Vec<Reading>) -> Self {
        ReadingSet { readings }
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn into_readings(self) -> Vec<Reading> {
        self.readings
    }

    pub fn push(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Parse a batch from a JSON array of reading objects
    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a batch from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(&self.readings)?)
    }
}

impl From<Vec<Reading>> for ReadingSet {
    fn from(readings: Vec<Reading>) -> Self {
        ReadingSet::new(readings)
    }
}

impl IntoIterator for ReadingSet {
    type Item = Reading;
    type IntoIter = std::vec::IntoIter<Reading>;

    fn into_iter(self) -> Self::IntoIter {
        self.readings.into_iter()
    }
}
