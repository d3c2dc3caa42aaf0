//! Layered configuration (§6, §9): a YAML base file made of named [`ConfigModule`]s, overridden
//! by `--set module.field=value` CLI flags, with session parameters additionally adjustable at
//! runtime via `SET_PARAMETER` against [`Id::VISTLE`] (handled by
//! [`StateTracker`](crate::state_tracker::StateTracker), not here).
//!
//! Directly grounded on `src/simulation/config.rs`'s `Config`/`ConfigModule`/`CommandLineArgs`
//! trio: a `RefCell<HashMap<String, Box<dyn ConfigModule>>>` keyed by module name, `typetag`
//! giving each boxed module its own `{"type": "..."}` tag on the wire, and dotted
//! `module.field=value` override parsing.

use std::any::Any;
use std::cell::RefCell;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ahash::HashMap;
use clap::Parser;
use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};

use crate::data_manager::compression::{CompressionMode, SzVariant};
use crate::error::{Result, VistleError};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CommandLineArgs {
    #[arg(long, short)]
    pub config_path: String,
    #[arg(long, value_name = "rank")]
    pub rank: Option<i32>,
    #[arg(long = "set", value_parser = parse_key_val, number_of_values = 1)]
    pub overrides: Vec<(String, String)>,
}

impl CommandLineArgs {
    pub fn new_with_path(path: impl ToString) -> Self {
        CommandLineArgs { config_path: path.to_string(), rank: None, overrides: Vec::new() }
    }
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    match s.find('=') {
        Some(pos) => Ok((s[..pos].to_string(), s[pos + 1..].to_string())),
        None => Err(format!("invalid KEY=VALUE: no `=` found in `{s}`")),
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    modules: RefCell<HashMap<String, Box<dyn ConfigModule>>>,
    #[serde(skip)]
    context: Option<PathBuf>,
}

impl Config {
    pub fn from_file(args: &CommandLineArgs) -> Result<Self> {
        let reader = BufReader::new(File::open(&args.config_path)?);
        let de = serde_yaml::Deserializer::from_reader(reader);
        let mut config: Config = serde_path_to_error::deserialize(de)
            .map_err(|err| VistleError::ConfigAt { path: err.path().to_string(), source: err.into_inner() })?;
        config.context = Some(PathBuf::from(&args.config_path));
        config.apply_overrides(&args.overrides)?;
        Ok(config)
    }

    pub fn context(&self) -> Option<&PathBuf> {
        self.context.as_ref()
    }

    /// `--set module.field=value` (§6). Unknown modules/fields are reported rather than
    /// silently ignored, unlike the teacher's `continue`-on-miss loop, since a manager's config
    /// errors should surface before the cluster starts rather than after.
    fn apply_overrides(&mut self, overrides: &[(String, String)]) -> Result<()> {
        for (key, value) in overrides {
            let mut parts = key.splitn(2, '.');
            let (module, field) = match (parts.next(), parts.next()) {
                (Some(m), Some(f)) => (m, f),
                _ => {
                    return Err(VistleError::UserLevel(format!(
                        "override key `{key}` must be `module.field`"
                    )))
                }
            };
            match module {
                "session" => {
                    let mut session = self.session_parameters();
                    session.apply_field(field, value)?;
                    self.set_session_parameters(session);
                }
                "output" => {
                    let mut output = self.output();
                    match field {
                        "log_dir" => output.log_dir = value.into(),
                        "logging" => output.logging = parse_log_level(value)?,
                        _ => return Err(unknown_field(module, field)),
                    }
                    self.set_output(output);
                }
                "computational_setup" => {
                    let mut setup = self.computational_setup();
                    match field {
                        "global_sync" => setup.global_sync = value.parse().map_err(|_| unknown_field(module, field))?,
                        "concurrency" => setup.concurrency = value.parse().ok(),
                        _ => return Err(unknown_field(module, field)),
                    }
                    self.set_computational_setup(setup);
                }
                other => return Err(VistleError::UserLevel(format!("unknown config module `{other}`"))),
            }
        }
        Ok(())
    }

    pub fn session_parameters(&self) -> SessionParametersModule {
        self.module::<SessionParametersModule>("session").unwrap_or_default()
    }

    pub fn set_session_parameters(&mut self, module: SessionParametersModule) {
        self.modules.get_mut().insert("session".to_string(), Box::new(module));
    }

    pub fn output(&self) -> Output {
        self.module::<Output>("output").unwrap_or_default()
    }

    pub fn set_output(&mut self, output: Output) {
        self.modules.get_mut().insert("output".to_string(), Box::new(output));
    }

    pub fn computational_setup(&self) -> ComputationalSetup {
        self.module::<ComputationalSetup>("computational_setup").unwrap_or_default()
    }

    pub fn set_computational_setup(&mut self, setup: ComputationalSetup) {
        self.modules.get_mut().insert("computational_setup".to_string(), Box::new(setup));
    }

    fn module<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.modules.borrow().get(key).and_then(|boxed| boxed.as_ref().as_any().downcast_ref::<T>().cloned())
    }
}

/// Resolves a possibly-relative output path against the directory the config file itself lives
/// in, so `output.log_dir: ./log` means "next to the config", not "next to the binary's cwd".
pub fn resolve_path(config_path: Option<&PathBuf>, file_path: &Path) -> PathBuf {
    if file_path.is_absolute() || file_path.starts_with("./") {
        return file_path.to_path_buf();
    }
    match config_path.and_then(|c| c.parent()) {
        Some(dir) => dir.join(file_path),
        None => file_path.to_path_buf(),
    }
}

fn unknown_field(module: &str, field: &str) -> VistleError {
    VistleError::UserLevel(format!("unknown field `{field}` on config module `{module}`"))
}

fn parse_log_level(value: &str) -> Result<LogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "off" | "none" => Ok(LogLevel::Off),
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        other => Err(VistleError::UserLevel(format!("invalid log level `{other}`"))),
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SessionParametersModule {
    pub archive_compression: CompressionMode,
    pub archive_compression_speed: i32,
}

impl Default for SessionParametersModule {
    fn default() -> Self {
        SessionParametersModule { archive_compression: CompressionMode::default(), archive_compression_speed: 0 }
    }
}

impl SessionParametersModule {
    fn apply_field(&mut self, field: &str, value: &str) -> Result<()> {
        match field {
            "archive_compression" => self.archive_compression = parse_compression_mode(value)?,
            "archive_compression_speed" => {
                self.archive_compression_speed = value.parse().map_err(|_| unknown_field("session", field))?
            }
            _ => return Err(unknown_field("session", field)),
        }
        Ok(())
    }
}

fn parse_compression_mode(value: &str) -> Result<CompressionMode> {
    match value {
        "none" => Ok(CompressionMode::None),
        "lz4" => Ok(CompressionMode::Lz4),
        "zfp" => Ok(CompressionMode::Zfp { rate: None, precision: None, accuracy: None }),
        "sz3" => Ok(CompressionMode::Sz { variant: SzVariant::Sz3, error_bound: 1e-3 }),
        "bigwhoop" => Ok(CompressionMode::BigWhoop { quality: 20.0 }),
        other => Err(VistleError::UserLevel(format!("unknown compression mode `{other}`"))),
    }
}

/// Mirrors the teacher config's own `Logging` enum rather than reusing `tracing::Level`
/// directly, since `tracing::Level` carries no `serde` support without pulling in a feature the
/// rest of the pack doesn't otherwise need.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// No per-rank log file at all, mirroring the qsim crate's `Logging::None` default.
    Off,
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off | LogLevel::Info => tracing::Level::INFO,
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Whether the CSV span-duration profiler (§8, [`crate::profiling::SpanDurationToCSVLayer`]) is
/// enabled, and at what span level. Off by default: the profiler is a performance-debugging aid,
/// not something every run should pay the file-write cost for.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Profiling {
    #[default]
    Off,
    Csv(LogLevel),
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Output {
    pub log_dir: PathBuf,
    #[serde(default)]
    pub logging: LogLevel,
    #[serde(default)]
    pub profiling: Profiling,
}

impl Default for Output {
    fn default() -> Self {
        Output { log_dir: PathBuf::from("./log"), logging: LogLevel::default(), profiling: Profiling::default() }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct ComputationalSetup {
    pub global_sync: bool,
    pub concurrency: Option<usize>,
}

impl Default for ComputationalSetup {
    fn default() -> Self {
        ComputationalSetup { global_sync: false, concurrency: None }
    }
}

/// Tag added to each boxed module on the wire (`{"type": "..."}`), the same mechanism the
/// teacher's config uses so the YAML file stays self-describing without a schema.
#[typetag::serde(tag = "type")]
pub trait ConfigModule: std::fmt::Debug + Send + DynClone {
    fn as_any(&self) -> &dyn Any;
}

#[typetag::serde]
impl ConfigModule for SessionParametersModule {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[typetag::serde]
impl ConfigModule for Output {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[typetag::serde]
impl ConfigModule for ComputationalSetup {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_override_parses_compression_mode() {
        let mut config = Config::default();
        config.apply_overrides(&[("session.archive_compression".to_string(), "lz4".to_string())]).unwrap();
        assert!(matches!(config.session_parameters().archive_compression, CompressionMode::Lz4));
    }

    #[test]
    fn unknown_module_override_is_reported_not_ignored() {
        let mut config = Config::default();
        let err = config.apply_overrides(&[("bogus.field".to_string(), "1".to_string())]).unwrap_err();
        assert!(matches!(err, VistleError::UserLevel(_)));
    }

    #[test]
    fn output_override_updates_log_dir() {
        let mut config = Config::default();
        config.apply_overrides(&[("output.log_dir".to_string(), "/tmp/vistle".to_string())]).unwrap();
        assert_eq!(config.output().log_dir, PathBuf::from("/tmp/vistle"));
    }

    #[test]
    fn resolve_path_joins_relative_paths_against_the_config_directory() {
        let config_path = PathBuf::from("/etc/vistle/cluster.yaml");
        let resolved = resolve_path(Some(&config_path), Path::new("log"));
        assert_eq!(resolved, PathBuf::from("/etc/vistle/log"));
    }

    #[test]
    fn resolve_path_leaves_absolute_paths_untouched() {
        let config_path = PathBuf::from("/etc/vistle/cluster.yaml");
        let resolved = resolve_path(Some(&config_path), Path::new("/var/log/vistle"));
        assert_eq!(resolved, PathBuf::from("/var/log/vistle"));
    }
}
