use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::session::SessionSettings;
use crate::voice::VoiceConfig;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "fitmirror".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub default_exercise: String,
    /// Upper bound in seconds for any collaborator call made from a
    /// session operation
    pub collaborator_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_exercise: "squat".to_string(),
            collaborator_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Posture sampling rate; clamped to a 0.5 Hz floor at use
    pub sample_hz: f64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self { sample_hz: 5.0 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON-lines file session metrics are appended to
    pub metrics_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            metrics_path: "data/session_metrics.jsonl".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Session core settings assembled from the config sections.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            default_exercise: self.session.default_exercise.clone(),
            collaborator_timeout: Duration::from_secs(self.session.collaborator_timeout_secs),
            recorder_sample_hz: self.recorder.sample_hz,
        }
    }
}
