//! Data marshalling between host types and interpreter objects
//!
//! Reading batches cross the boundary as a list of dicts with `asset`,
//! `timestamp` and `readings` keys; configuration crosses as JSON text;
//! plugin metadata comes back through the interpreter's own `json`
//! module. All conversion lives here so the dispatch code never touches
//! raw interpreter objects beyond calling entry points.

use crate::errors::BridgeError;
use chrono::{DateTime, NaiveDateTime, Utc};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyList, PyModule};
use sluice_logger as logger;
use sluice_pipeline::{
    DatapointValue, OutputStream, OutputToken, PluginMetadata, Reading, ReadingSet,
};
use std::collections::BTreeMap;

/// Timestamp layout used on the wire, microsecond precision
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Opaque output-side token handed to interpreted code.
///
/// Plugins never look inside it; they pass it back through the emitter
/// when forwarding a batch downstream.
#[pyclass]
pub(crate) struct OutputHandle {
    token: OutputToken,
}

impl OutputHandle {
    pub(crate) fn new(token: OutputToken) -> Self {
        OutputHandle { token }
    }
}

/// Callable handed to interpreted code for forwarding filtered batches.
///
/// Invoked as `emitter(output_handle, readings)`. The readings argument
/// is converted back to host form and pushed into the output stream the
/// host registered at init time.
#[pyclass]
pub(crate) struct OutputEmitter {
    stream: OutputStream,
}

impl OutputEmitter {
    pub(crate) fn new(stream: OutputStream) -> Self {
        OutputEmitter { stream }
    }
}

#[pymethods]
impl OutputEmitter {
    fn __call__(
        &self,
        handle: PyRef<'_, OutputHandle>,
        readings: &Bound<'_, PyAny>,
    ) -> PyResult<()> {
        let batch = py_to_readings(readings)
            .map_err(|e| PyValueError::new_err(format!("invalid readings batch: {}", e)))?;
        (self.stream)(handle.token, batch);
        Ok(())
    }
}

/// Convert a host batch into the interpreter-side list of dicts
pub(crate) fn readings_to_py<'py>(
    py: Python<'py>,
    batch: &ReadingSet,
) -> Result<Bound<'py, PyList>, BridgeError> {
    let list = PyList::empty(py);
    for reading in batch.readings() {
        let entry = PyDict::new(py);
        entry.set_item("asset", reading.asset.as_str())?;
        entry.set_item(
            "timestamp",
            reading.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        )?;

        let values = PyDict::new(py);
        for (name, value) in &reading.datapoints {
            match value {
                DatapointValue::Bool(v) => values.set_item(name, *v)?,
                DatapointValue::Integer(v) => values.set_item(name, *v)?,
                DatapointValue::Float(v) => values.set_item(name, *v)?,
                DatapointValue::Text(v) => values.set_item(name, v.as_str())?,
                DatapointValue::FloatArray(v) => values.set_item(name, v.clone())?,
            }
        }
        entry.set_item("readings", &values)?;
        list.append(&entry)?;
    }
    Ok(list)
}

/// Convert an interpreter-side batch back into host form.
///
/// Entries that are not dicts, or that carry no usable asset name, are
/// skipped with a logged error rather than failing the whole batch. A
/// missing or unparseable timestamp falls back to the current time.
pub(crate) fn py_to_readings(list: &Bound<'_, PyAny>) -> Result<ReadingSet, BridgeError> {
    let mut readings = Vec::new();
    for item in list.try_iter()? {
        let item = item?;
        let Ok(entry) = item.cast::<PyDict>() else {
            logger::error("skipping reading that is not a mapping");
            continue;
        };

        let asset = match entry.get_item("asset")? {
            Some(value) => match value.extract::<String>() {
                Ok(asset) => asset,
                Err(_) => {
                    logger::error("skipping reading with a non-string asset");
                    continue;
                }
            },
            None => {
                logger::error("skipping reading without an asset");
                continue;
            }
        };

        let timestamp = match entry.get_item("timestamp")? {
            Some(value) => value
                .extract::<String>()
                .ok()
                .and_then(|text| parse_timestamp(&text))
                .unwrap_or_else(Utc::now),
            None => Utc::now(),
        };

        let mut datapoints = BTreeMap::new();
        if let Some(values) = entry.get_item("readings")? {
            if let Ok(values) = values.cast::<PyDict>() {
                for (key, value) in values.iter() {
                    let name = key.extract::<String>().unwrap_or_else(|_| key.to_string());
                    datapoints.insert(name, datapoint_from_py(&value)?);
                }
            }
        }

        readings.push(Reading {
            asset,
            timestamp,
            datapoints,
        });
    }
    Ok(ReadingSet::new(readings))
}

/// Convert one datapoint value, trying the narrowest type first.
///
/// Booleans must be checked before integers because the interpreter
/// treats a boolean as an integer subtype. Anything unrecognized is
/// carried as its string form rather than dropped.
fn datapoint_from_py(value: &Bound<'_, PyAny>) -> Result<DatapointValue, BridgeError> {
    if let Ok(flag) = value.cast::<PyBool>() {
        return Ok(DatapointValue::Bool(flag.is_true()));
    }
    if let Ok(number) = value.extract::<i64>() {
        return Ok(DatapointValue::Integer(number));
    }
    if let Ok(number) = value.extract::<f64>() {
        return Ok(DatapointValue::Float(number));
    }
    if let Ok(text) = value.extract::<String>() {
        return Ok(DatapointValue::Text(text));
    }
    if let Ok(array) = value.extract::<Vec<f64>>() {
        return Ok(DatapointValue::FloatArray(array));
    }
    Ok(DatapointValue::Text(value.str()?.to_string()))
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    // %.f accepts both a microsecond fraction and none at all
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Read plugin metadata out of whatever `plugin_info` returned.
///
/// The object is serialized through the interpreter's `json` module and
/// parsed on the host side, which rejects non-JSON-able shapes in one
/// step instead of field-by-field extraction.
pub(crate) fn metadata_from_py(
    py: Python<'_>,
    info: &Bound<'_, PyAny>,
) -> Result<PluginMetadata, BridgeError> {
    let json_module = PyModule::import(py, "json")
        .map_err(|e| BridgeError::Import("json".to_string(), format!("{}", e)))?;
    let dumps = json_module.getattr("dumps")?;
    let json_text = dumps.call1((info,))?.extract::<String>()?;
    serde_json::from_str(&json_text).map_err(|e| {
        BridgeError::Serialization(format!("plugin_info returned an unexpected shape: {}", e))
    })
}
