//! Integration tests for sluice
//!
//! Each test spawns the real binary against a temporary home holding
//! the filter shim, a couple of plugin modules, a chain definition,
//! and an input batch. Every invocation is a fresh process, so tests
//! never share an embedded interpreter.

use assert_cmd::{cargo::cargo_bin_cmd, Command};
use predicates::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SHIM_SOURCE: &str = r#""""Shim between the native filter host and a plugin module."""

import importlib
import json
import sys

_plugin = importlib.import_module(sys.argv[1])


def plugin_info():
    return _plugin.plugin_info()


def plugin_init(config_json, output_handle, output_stream):
    return _plugin.plugin_init(json.loads(config_json), output_handle, output_stream)


def plugin_ingest(handle, readings):
    _plugin.plugin_ingest(handle, readings)


def plugin_reconfigure(handle, config_json):
    return _plugin.plugin_reconfigure(handle, json.loads(config_json))


def plugin_shutdown(handle):
    if hasattr(_plugin, "plugin_shutdown"):
        _plugin.plugin_shutdown(handle)
"#;

const SCALE_SOURCE: &str = r#""""Scaling filter: multiplies numeric datapoints by a factor."""


def plugin_info():
    return {
        "name": "scale",
        "version": "1.0.0",
        "mode": "none",
        "type": "filter",
        "interface": "1.0",
        "config": {"factor": {"description": "multiplier", "type": "float", "default": "1.0"}},
    }


def plugin_init(config, output_handle, output_stream):
    return {
        "factor": float(config.get("factor", "1.0")),
        "out": output_handle,
        "emit": output_stream,
    }


def plugin_ingest(handle, readings):
    for entry in readings:
        values = entry["readings"]
        for name, value in list(values.items()):
            if isinstance(value, bool):
                continue
            if isinstance(value, (int, float)):
                values[name] = value * handle["factor"]
    handle["emit"](handle["out"], readings)


def plugin_reconfigure(handle, config):
    return {
        "factor": float(config.get("factor", "1.0")),
        "out": handle["out"],
        "emit": handle["emit"],
    }
"#;

const METADATA_SOURCE: &str = r#""""Metadata filter: stamps each reading with a source label."""


def plugin_info():
    return {
        "name": "metadata",
        "version": "1.0.0",
        "mode": "none",
        "type": "filter",
        "interface": "1.0",
        "config": {"source": {"description": "label to attach", "type": "string", "default": ""}},
    }


def plugin_init(config, output_handle, output_stream):
    return {
        "source": config.get("source", ""),
        "out": output_handle,
        "emit": output_stream,
    }


def plugin_ingest(handle, readings):
    for entry in readings:
        if handle["source"]:
            entry["readings"]["source"] = handle["source"]
    handle["emit"](handle["out"], readings)


def plugin_reconfigure(handle, config):
    return {
        "source": config.get("source", ""),
        "out": handle["out"],
        "emit": handle["emit"],
    }
"#;

const NOISY_SOURCE: &str = r#""""Filter that reports through the stdlib logging module."""

import logging


def plugin_info():
    logging.warning("noisy plugin loaded")
    return {
        "name": "noisy",
        "version": "1.0.0",
        "mode": "none",
        "type": "filter",
        "interface": "1.0",
        "config": {},
    }


def plugin_init(config, output_handle, output_stream):
    return {"out": output_handle, "emit": output_stream}


def plugin_ingest(handle, readings):
    handle["emit"](handle["out"], readings)
"#;

const INPUT_JSON: &str = r#"[
  {"asset": "pump-1", "readings": {"rpm": 120, "status": "ok"}},
  {"asset": "pump-2", "readings": {"rpm": 80}}
]"#;

fn chain_yaml() -> String {
    r#"variables:
  factor: "2.5"
  site: "bench"

chains:
  demo:
    - scale-stage
    - label-stage

config:
  scale-stage:
    plugin: scale
    factor: ${factor}

  label-stage:
    plugin: metadata
    source: ${site}
"#
    .to_string()
}

struct ChainHarness {
    _home: TempDir,
    shim_dir: PathBuf,
    plugin_dir: PathBuf,
    chain_path: PathBuf,
    input_path: PathBuf,
}

impl ChainHarness {
    fn new() -> io::Result<Self> {
        let home = TempDir::new()?;
        let home_path = home.path();

        let shim_dir = home_path.join("shim");
        fs::create_dir_all(&shim_dir)?;
        fs::write(shim_dir.join("filter_shim.py"), SHIM_SOURCE)?;

        let plugin_dir = home_path.join("plugins");
        fs::create_dir_all(&plugin_dir)?;
        fs::write(plugin_dir.join("scale.py"), SCALE_SOURCE)?;
        fs::write(plugin_dir.join("metadata.py"), METADATA_SOURCE)?;

        let chain_path = home_path.join("chain.yaml");
        fs::write(&chain_path, chain_yaml())?;

        let input_path = home_path.join("input.json");
        fs::write(&input_path, INPUT_JSON)?;

        Ok(Self {
            _home: home,
            shim_dir,
            plugin_dir,
            chain_path,
            input_path,
        })
    }

    fn command(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("sluice");
        cmd.env("HOME", self.home_path());
        cmd.env("SLUICE_SHIM_DIR", &self.shim_dir);
        cmd.env("SLUICE_PLUGIN_DIR", &self.plugin_dir);
        cmd
    }

    fn home_path(&self) -> &Path {
        self._home.path()
    }

    fn chain_path(&self) -> String {
        self.chain_path.to_string_lossy().to_string()
    }

    fn input_path(&self) -> String {
        self.input_path.to_string_lossy().to_string()
    }
}

#[test]
fn test_version() {
    cargo_bin_cmd!("sluice")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sluice"));
}

#[test]
fn test_help() {
    cargo_bin_cmd!("sluice")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Sluice runs reading batches"));
}

#[test]
fn test_invalid_command() {
    cargo_bin_cmd!("sluice").arg("invalid").assert().failure();
}

#[test]
fn test_run_chain_end_to_end() {
    let env = ChainHarness::new().expect("chain harness");
    env.command()
        .arg("run")
        .arg(env.chain_path())
        .arg("demo")
        .arg("--input")
        .arg(env.input_path())
        .assert()
        .success()
        .stdout(
            predicate::str::contains("pump-1")
                .and(predicate::str::contains("300.0"))
                .and(predicate::str::contains("\"source\": \"bench\"")),
        );
}

#[test]
fn test_run_defaults_to_the_only_chain() {
    let env = ChainHarness::new().expect("chain harness");

    // "demo" is the only chain in the file, so the name can be dropped
    env.command()
        .arg("run")
        .arg(env.chain_path())
        .arg("--input")
        .arg(env.input_path())
        .assert()
        .success()
        .stdout(predicate::str::contains("pump-2"));
}

#[test]
fn test_run_with_batch_size_splits_the_feed() {
    let env = ChainHarness::new().expect("chain harness");
    env.command()
        .arg("run")
        .arg(env.chain_path())
        .arg("demo")
        .arg("--input")
        .arg(env.input_path())
        .arg("--batch-size")
        .arg("1")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("pump-1").and(predicate::str::contains("pump-2")),
        );
}

#[test]
fn test_run_writes_output_file() {
    let env = ChainHarness::new().expect("chain harness");
    let out_path = env.home_path().join("out.json");

    env.command()
        .arg("run")
        .arg(env.chain_path())
        .arg("demo")
        .arg("--input")
        .arg(env.input_path())
        .arg("-o")
        .arg(&out_path)
        .assert()
        .success();

    let text = fs::read_to_string(&out_path).expect("output file");
    let parsed: serde_json::Value = serde_json::from_str(&text).expect("output JSON");
    let entries = parsed.as_array().expect("output array");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["asset"], "pump-1");
    assert_eq!(entries[0]["readings"]["rpm"], 300.0);
    assert_eq!(entries[1]["readings"]["source"], "bench");
}

#[test]
fn test_run_list_shows_chains() {
    let env = ChainHarness::new().expect("chain harness");
    env.command()
        .arg("run")
        .arg(env.chain_path())
        .arg("--list")
        .assert()
        .success()
        .stdout(predicate::str::contains("demo (2 stages)"));
}

#[test]
fn test_run_dry_run_does_not_execute() {
    let env = ChainHarness::new().expect("chain harness");
    env.command()
        .arg("run")
        .arg(env.chain_path())
        .arg("demo")
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("No actual execution"));
}

#[test]
fn test_run_print_resolves_variables() {
    let env = ChainHarness::new().expect("chain harness");
    env.command()
        .arg("run")
        .arg(env.chain_path())
        .arg("demo")
        .arg("--print")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Chain: demo").and(predicate::str::contains("factor: '2.5'")),
        );
}

#[test]
fn test_run_unknown_chain_fails() {
    let env = ChainHarness::new().expect("chain harness");
    env.command()
        .arg("run")
        .arg(env.chain_path())
        .arg("missing")
        .arg("--input")
        .arg(env.input_path())
        .assert()
        .failure();
}

#[test]
fn test_run_missing_input_file_fails() {
    let env = ChainHarness::new().expect("chain harness");
    env.command()
        .arg("run")
        .arg(env.chain_path())
        .arg("demo")
        .arg("--input")
        .arg("no-such-input.json")
        .assert()
        .failure();
}

#[test]
fn test_info_prints_metadata_json() {
    let env = ChainHarness::new().expect("chain harness");
    env.command()
        .arg("info")
        .arg("scale")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"name\": \"scale\"")
                .and(predicate::str::contains("\"type\": \"filter\"")),
        );
}

#[test]
fn test_log_python_routes_plugin_logging_to_the_log_file() {
    let env = ChainHarness::new().expect("chain harness");
    fs::write(env.plugin_dir.join("noisy.py"), NOISY_SOURCE).expect("plugin fixture");

    // --log-python echoes interpreted-side log records to the console;
    // they land in the log file either way.
    env.command()
        .arg("info")
        .arg("noisy")
        .arg("--log-python")
        .assert()
        .success()
        .stderr(predicate::str::contains("noisy plugin loaded"));

    let log_path = env
        .home_path()
        .join(".config")
        .join("sluice")
        .join("sluice.log");
    let log = fs::read_to_string(&log_path).expect("log file");
    assert!(log.contains("[PYTHON]"));
    assert!(log.contains("noisy plugin loaded"));
}

#[test]
fn test_log_file_keeps_python_records_without_console_echo() {
    let env = ChainHarness::new().expect("chain harness");
    fs::write(env.plugin_dir.join("noisy.py"), NOISY_SOURCE).expect("plugin fixture");

    env.command().arg("info").arg("noisy").assert().success();

    let log_path = env
        .home_path()
        .join(".config")
        .join("sluice")
        .join("sluice.log");
    let log = fs::read_to_string(&log_path).expect("log file");
    assert!(log.contains("[PYTHON] WARNING noisy plugin loaded"));
}

#[test]
fn test_info_unknown_plugin_fails() {
    let env = ChainHarness::new().expect("chain harness");
    env.command()
        .arg("info")
        .arg("missing_plugin")
        .assert()
        .failure();
}

#[test]
fn test_init_creates_chain_file() {
    let env = ChainHarness::new().expect("chain harness");
    let target = env.home_path().join("fresh-chain.yaml");

    env.command()
        .arg("init")
        .arg(&target)
        .assert()
        .success();

    let written = fs::read_to_string(&target).expect("chain template");
    assert!(written.contains("chains:"));
}
