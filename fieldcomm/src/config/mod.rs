/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Link and controller configuration loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! log_dir: /var/log/fieldcomm
//! sample_dir: /var/lib/fieldcomm
//! links:
//!   east:
//!     transport: tcp
//!     uri: "10.0.4.20:4001"
//!     protocol: tdc
//!     timeout_ms: 750
//!     poll_period_s: 30
//! controllers:
//!   det_east_1:
//!     link: east
//!     drop: 1
//!     retry_threshold: 3
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::comm::ft12::{MAX_ADDRESS, MIN_ADDRESS};
use crate::comm::TransportKind;
use crate::controller::DEFAULT_RETRY_THRESHOLD;
use crate::device::Protocol;

pub const DEFAULT_TIMEOUT_MS: u64 = 750;
pub const DEFAULT_POLL_PERIOD_S: u32 = 30;

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Deserialize)]
struct CommConfigFile {
    log_dir: Option<PathBuf>,
    sample_dir: Option<PathBuf>,
    #[serde(default)]
    links: BTreeMap<String, LinkEntry>,
    #[serde(default)]
    controllers: BTreeMap<String, ControllerEntry>,
}

#[derive(Debug, Deserialize)]
struct LinkEntry {
    transport: TransportKind,
    uri: String,
    protocol: Protocol,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_poll_period_s")]
    poll_period_s: u32,
}

#[derive(Debug, Deserialize)]
struct ControllerEntry {
    link: String,
    drop: u16,
    #[serde(default = "default_retry_threshold")]
    retry_threshold: u32,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_poll_period_s() -> u32 {
    DEFAULT_POLL_PERIOD_S
}

fn default_retry_threshold() -> u32 {
    DEFAULT_RETRY_THRESHOLD
}

// ── Public data structures ────────────────────────────────────────────────────

/// One communication link and the protocol spoken on it.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub name: String,
    pub transport: TransportKind,
    pub uri: String,
    pub protocol: Protocol,
    pub timeout: Duration,
    pub poll_period_s: u32,
}

impl LinkConfig {
    pub fn poll_period_ms(&self) -> u64 {
        u64::from(self.poll_period_s) * 1_000
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub name: String,
    pub link: String,
    pub drop: u16,
    pub retry_threshold: u32,
}

// ── CommConfigManager ─────────────────────────────────────────────────────────

/// Loads and validates link/controller configuration from a YAML file.
#[derive(Debug, Default)]
pub struct CommConfigManager {
    log_dir: Option<PathBuf>,
    sample_dir: Option<PathBuf>,
    /// Command-line overrides; survive reloads.
    log_dir_override: Option<PathBuf>,
    sample_dir_override: Option<PathBuf>,
    links: BTreeMap<String, LinkConfig>,
    controllers: BTreeMap<String, ControllerConfig>,
    loaded: bool,
}

impl CommConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `path` and replaces any previously loaded configuration.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is invalid, or
    /// a controller names an unknown link, has a drop outside 1..=255, or a
    /// link has a zero poll period.
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        info!("Loading comm configuration from: {}", path.display());

        // Reset state before (re-)loading
        self.log_dir = None;
        self.sample_dir = None;
        self.links.clear();
        self.controllers.clear();
        self.loaded = false;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let file: CommConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        let mut links = BTreeMap::new();
        for (name, entry) in file.links {
            if entry.poll_period_s == 0 {
                bail!("link {}: poll_period_s must be non-zero", name);
            }
            debug!(
                "  Link: {} | {}://{} | protocol: {} | timeout: {}ms",
                name, entry.transport, entry.uri, entry.protocol, entry.timeout_ms,
            );
            links.insert(
                name.clone(),
                LinkConfig {
                    name,
                    transport: entry.transport,
                    uri: entry.uri,
                    protocol: entry.protocol,
                    timeout: Duration::from_millis(entry.timeout_ms),
                    poll_period_s: entry.poll_period_s,
                },
            );
        }

        let mut controllers = BTreeMap::new();
        for (name, entry) in file.controllers {
            if !links.contains_key(&entry.link) {
                bail!("controller {}: unknown link {}", name, entry.link);
            }
            if !(MIN_ADDRESS..=MAX_ADDRESS).contains(&entry.drop) {
                bail!("controller {}: drop {} outside {}..={}", name, entry.drop, MIN_ADDRESS, MAX_ADDRESS);
            }
            controllers.insert(
                name.clone(),
                ControllerConfig {
                    name,
                    link: entry.link,
                    drop: entry.drop,
                    retry_threshold: entry.retry_threshold,
                },
            );
        }

        if links.is_empty() {
            warn!("No links found in configuration file");
        }

        self.log_dir = file.log_dir;
        self.sample_dir = file.sample_dir;
        self.links = links;
        self.controllers = controllers;
        self.loaded = true;

        info!(
            "Successfully loaded {} link(s), {} controller(s)",
            self.links.len(),
            self.controllers.len()
        );
        Ok(())
    }

    /// Use `dir` for debug logs regardless of the file.
    pub fn set_log_dir(&mut self, dir: PathBuf) {
        self.log_dir_override = Some(dir);
    }

    pub fn set_sample_dir(&mut self, dir: PathBuf) {
        self.sample_dir_override = Some(dir);
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir_override.as_deref().or(self.log_dir.as_deref())
    }

    pub fn sample_dir(&self) -> Option<&Path> {
        self.sample_dir_override.as_deref().or(self.sample_dir.as_deref())
    }

    pub fn get_link(&self, name: &str) -> Option<&LinkConfig> {
        self.links.get(name)
    }

    pub fn get_all_links(&self) -> &BTreeMap<String, LinkConfig> {
        &self.links
    }

    pub fn get_controller(&self, name: &str) -> Option<&ControllerConfig> {
        self.controllers.get(name)
    }

    pub fn get_all_controllers(&self) -> &BTreeMap<String, ControllerConfig> {
        &self.controllers
    }

    /// Controllers on `link`, in name order.
    pub fn controllers_on(&self, link: &str) -> impl Iterator<Item = &ControllerConfig> {
        let link = link.to_string();
        self.controllers.values().filter(move |c| c.link == link)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper: write a YAML string to a temp file and return it.
    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    fn load(yaml: &str) -> Result<CommConfigManager> {
        let f = yaml_tempfile(yaml);
        let mut mgr = CommConfigManager::new();
        mgr.load_from_file(f.path())?;
        Ok(mgr)
    }

    // ── load_from_file ────────────────────────────────────────────────────────

    #[test]
    fn load_full_example() {
        let yaml = r#"
log_dir: /var/log/fieldcomm
sample_dir: /var/lib/fieldcomm
links:
  east:
    transport: tcp
    uri: "10.0.4.20:4001"
    protocol: tdc
    timeout_ms: 500
    poll_period_s: 20
  ramp:
    transport: udp
    uri: "10.0.4.21:5000"
    protocol: gate
controllers:
  det_east_1:
    link: east
    drop: 1
  det_east_2:
    link: east
    drop: 2
    retry_threshold: 5
  gate_ramp:
    link: ramp
    drop: 12
"#;
        let mgr = load(yaml).unwrap();
        assert!(mgr.is_loaded());
        assert_eq!(mgr.log_dir(), Some(Path::new("/var/log/fieldcomm")));
        assert_eq!(mgr.get_all_links().len(), 2);

        let east = mgr.get_link("east").unwrap();
        assert_eq!(east.transport, TransportKind::Tcp);
        assert_eq!(east.protocol, Protocol::Tdc);
        assert_eq!(east.timeout, Duration::from_millis(500));
        assert_eq!(east.poll_period_ms(), 20_000);

        let ramp = mgr.get_link("ramp").unwrap();
        assert_eq!(ramp.transport, TransportKind::Udp);
        assert_eq!(ramp.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(ramp.poll_period_s, DEFAULT_POLL_PERIOD_S);

        assert_eq!(mgr.get_controller("det_east_1").unwrap().retry_threshold, DEFAULT_RETRY_THRESHOLD);
        assert_eq!(mgr.get_controller("det_east_2").unwrap().retry_threshold, 5);
        let names: Vec<_> = mgr.controllers_on("east").map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["det_east_1", "det_east_2"]);
    }

    #[test]
    fn empty_file_sections_are_accepted() {
        let mgr = load("links: {}\n").unwrap();
        assert!(mgr.is_loaded());
        assert!(mgr.get_all_controllers().is_empty());
        assert_eq!(mgr.sample_dir(), None);
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn unknown_link_is_rejected() {
        let yaml = r#"
links: {}
controllers:
  lost:
    link: nowhere
    drop: 3
"#;
        let err = load(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown link nowhere"));
    }

    #[test]
    fn drop_out_of_range_is_rejected() {
        let yaml = r#"
links:
  l: { transport: tcp, uri: "h:1", protocol: gate }
controllers:
  c: { link: l, drop: 0 }
"#;
        assert!(load(yaml).is_err());
        assert!(load(&yaml.replace("drop: 0", "drop: 256")).is_err());
        assert!(load(&yaml.replace("drop: 0", "drop: 255")).is_ok());
    }

    #[test]
    fn zero_poll_period_is_rejected() {
        let yaml = "links:\n  l: { transport: tcp, uri: \"h:1\", protocol: tdc, poll_period_s: 0 }\n";
        assert!(load(yaml).is_err());
    }

    #[test]
    fn unknown_protocol_is_a_parse_error() {
        let yaml = "links:\n  l: { transport: tcp, uri: \"h:1\", protocol: soap }\n";
        assert!(load(yaml).is_err());
    }

    #[test]
    fn missing_file_returns_error() {
        let mut mgr = CommConfigManager::new();
        let result = mgr.load_from_file(Path::new("/nonexistent/path/config.yaml"));
        assert!(result.is_err());
        assert!(!mgr.is_loaded());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("this is: not: valid: yaml: content:::");
        let mut mgr = CommConfigManager::new();
        assert!(mgr.load_from_file(f.path()).is_err());
        assert!(!mgr.is_loaded());
    }

    // ── Overrides and reload ──────────────────────────────────────────────────

    #[test]
    fn command_line_directories_win_over_the_file() {
        let f = yaml_tempfile("log_dir: /from/file\nsample_dir: /from/file\n");
        let mut mgr = CommConfigManager::new();
        mgr.set_log_dir(PathBuf::from("/from/cli"));
        mgr.load_from_file(f.path()).unwrap();
        assert_eq!(mgr.log_dir(), Some(Path::new("/from/cli")));
        assert_eq!(mgr.sample_dir(), Some(Path::new("/from/file")));
    }

    #[test]
    fn reload_replaces_previous_links() {
        let f1 = yaml_tempfile("links:\n  a: { transport: tcp, uri: \"h:1\", protocol: tdc }\n");
        let f2 = yaml_tempfile("links:\n  b: { transport: tcp, uri: \"h:2\", protocol: gate }\n");

        let mut mgr = CommConfigManager::new();
        mgr.load_from_file(f1.path()).unwrap();
        assert!(mgr.get_link("a").is_some());

        mgr.load_from_file(f2.path()).unwrap();
        assert!(mgr.get_link("a").is_none(), "old link must be gone");
        assert!(mgr.get_link("b").is_some());
    }

    #[test]
    fn reload_drops_directories_of_the_previous_file() {
        let f1 = yaml_tempfile("log_dir: /first
");
        let f2 = yaml_tempfile("links: {}
");
        let mut mgr = CommConfigManager::new();
        mgr.load_from_file(f1.path()).unwrap();
        assert_eq!(mgr.log_dir(), Some(Path::new("/first")));
        mgr.load_from_file(f2.path()).unwrap();
        assert_eq!(mgr.log_dir(), None);
    }
}
