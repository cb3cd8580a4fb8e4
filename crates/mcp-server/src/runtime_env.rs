use serde::Serialize;
use std::path::PathBuf;
use thinking_core::{StorageBackend, ThinkingConfig};

pub const CONFIG_ENV: &str = "THINKING_CONFIG";
pub const STORAGE_ENV: &str = "THINKING_STORAGE";
pub const DATA_DIR_ENV: &str = "THINKING_DATA_DIR";
pub const MAX_BRANCHES_ENV: &str = "THINKING_MAX_BRANCHES";
pub const MAX_HISTORY_ENV: &str = "THINKING_MAX_HISTORY";
pub const REFLECTION_INTERVAL_ENV: &str = "THINKING_REFLECTION_INTERVAL";
pub const THRESHOLD_ENV: &str = "THINKING_THRESHOLD";

/// What the environment contributed to the effective config.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigReport {
    pub config_file: Option<String>,
    pub applied_env: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn load_config_from_env() -> (ThinkingConfig, ConfigReport) {
    config_from_lookup(|key| std::env::var(key).ok())
}

/// Config file first, then individual overrides. Anything unparseable is reported
/// and skipped so the server still starts.
pub fn config_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> (ThinkingConfig, ConfigReport) {
    let value = |key: &str| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let mut report = ConfigReport::default();

    let mut config = match value(CONFIG_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            match ThinkingConfig::from_file(&path) {
                Ok(config) => {
                    report.config_file = Some(path.to_string_lossy().to_string());
                    config
                }
                Err(err) => {
                    report
                        .warnings
                        .push(format!("{err:#}; falling back to defaults"));
                    ThinkingConfig::default()
                }
            }
        }
        None => ThinkingConfig::default(),
    };

    if let Some(raw) = value(STORAGE_ENV) {
        match StorageBackend::parse(&raw) {
            Some(backend) => {
                config.storage.backend = backend;
                report.applied_env.push(STORAGE_ENV.to_string());
            }
            None => report
                .warnings
                .push(format!("{STORAGE_ENV}: unknown backend '{raw}' (expected memory or file)")),
        }
    }
    if let Some(raw) = value(DATA_DIR_ENV) {
        config.storage.data_dir = Some(PathBuf::from(raw));
        report.applied_env.push(DATA_DIR_ENV.to_string());
    }
    if let Some(parsed) = parse_env(&value, MAX_BRANCHES_ENV, &mut report) {
        config.max_branches = parsed;
    }
    if let Some(parsed) = parse_env(&value, MAX_HISTORY_ENV, &mut report) {
        config.max_history_size = parsed;
    }
    if let Some(parsed) = parse_env(&value, REFLECTION_INTERVAL_ENV, &mut report) {
        config.reflection_interval = parsed;
    }
    if let Some(parsed) = parse_env::<f64>(&value, THRESHOLD_ENV, &mut report) {
        if parsed.is_finite() {
            config.detector.threshold = parsed;
        } else {
            report.applied_env.pop();
            report
                .warnings
                .push(format!("{THRESHOLD_ENV}: '{parsed}' is not a finite number"));
        }
    }

    (config.normalized(), report)
}

fn parse_env<T: std::str::FromStr>(
    value: &impl Fn(&str) -> Option<String>,
    key: &str,
    report: &mut ConfigReport,
) -> Option<T> {
    let raw = value(key)?;
    match raw.parse::<T>() {
        Ok(parsed) => {
            report.applied_env.push(key.to_string());
            Some(parsed)
        }
        Err(_) => {
            report.warnings.push(format!("{key}: cannot parse '{raw}'"));
            None
        }
    }
}
