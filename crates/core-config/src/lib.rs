//! Configuration loading and the named job table.
//!
//! `vigil.toml` is discovered in the working directory first, then the
//! platform config dir. Unknown fields are ignored and a parse error falls
//! back to defaults; a broken config file must never keep the tool from
//! starting. The `[jobs]` table maps job names to command vectors; `[watch]`
//! tunes the polling watcher.

use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_JOB: &str = "build";

#[derive(Debug, Deserialize, Clone)]
pub struct WatchSection {
    #[serde(default = "WatchSection::default_paths")]
    pub paths: Vec<String>,
    #[serde(default = "WatchSection::default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "WatchSection::default_interval_ms")]
    pub interval_ms: u64,
}

impl WatchSection {
    fn default_paths() -> Vec<String> {
        vec!["src".to_string()]
    }
    fn default_extensions() -> Vec<String> {
        vec!["zig".to_string()]
    }
    const fn default_interval_ms() -> u64 {
        250
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            paths: Self::default_paths(),
            extensions: Self::default_extensions(),
            interval_ms: Self::default_interval_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    /// Job name -> argv. Merged over the built-in `build`/`test` pair.
    #[serde(default)]
    pub jobs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub watch: WatchSection,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub file: ConfigFile,
    pub path: Option<PathBuf>,
}

/// Prefer a local `vigil.toml`, then the platform config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("vigil.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("vigil").join("vigil.toml");
    }
    PathBuf::from("vigil.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                info!(target: "config", path = %path.display(), jobs = file.jobs.len(), "config_loaded");
                Ok(Config {
                    file,
                    path: Some(path),
                })
            }
            Err(err) => {
                warn!(target: "config", path = %path.display(), %err, "config_parse_failed_using_defaults");
                Ok(Config::default())
            }
        },
        Err(_) => Ok(Config::default()),
    }
}

/// One runnable job: a command and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
}

impl Job {
    fn from_argv(name: &str, argv: &[String]) -> Option<Self> {
        let (command, args) = argv.split_first()?;
        Some(Self {
            name: name.to_string(),
            command: command.clone(),
            args: args.to_vec(),
        })
    }
}

/// The small fixed set of named jobs plus which one is active. Switching
/// jobs replaces the command vector; the orchestrator reacts by starting a
/// fresh build.
#[derive(Debug)]
pub struct JobTable {
    jobs: Vec<Job>,
    active: usize,
}

impl JobTable {
    /// Built-in defaults overlaid with `[jobs]` from the config file.
    pub fn from_config(config: &Config) -> Self {
        let mut argvs: BTreeMap<String, Vec<String>> = BTreeMap::new();
        argvs.insert(
            "build".to_string(),
            vec!["zig".to_string(), "build".to_string()],
        );
        argvs.insert(
            "test".to_string(),
            vec!["zig".to_string(), "build".to_string(), "test".to_string()],
        );
        for (name, argv) in &config.file.jobs {
            // An empty argv would erase a built-in and cannot run anyway.
            if argv.is_empty() {
                warn!(target: "config", job = name.as_str(), "empty job argv ignored");
                continue;
            }
            argvs.insert(name.clone(), argv.clone());
        }

        // Every argv left in the table is non-empty, so the built-in jobs
        // always survive and the table is never empty.
        let jobs: Vec<Job> = argvs
            .iter()
            .filter_map(|(name, argv)| Job::from_argv(name, argv))
            .collect();
        let active = jobs
            .iter()
            .position(|job| job.name == DEFAULT_JOB)
            .unwrap_or(0);
        Self { jobs, active }
    }

    /// Replace the active job's argv (CLI `-- CMD ARGS...` override).
    pub fn override_active(&mut self, argv: &[String]) {
        if let Some(job) = Job::from_argv("custom", argv) {
            self.jobs[self.active] = Job {
                name: self.jobs[self.active].name.clone(),
                ..job
            };
        }
    }

    pub fn active(&self) -> &Job {
        &self.jobs[self.active]
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.jobs.iter().map(|job| job.name.as_str())
    }

    /// Returns true when the active job actually changed.
    pub fn switch_to(&mut self, name: &str) -> bool {
        match self.jobs.iter().position(|job| job.name == name) {
            Some(index) if index != self.active => {
                self.active = index;
                info!(target: "config", job = name, "job_switched");
                true
            }
            _ => false,
        }
    }
}
