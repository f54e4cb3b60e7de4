use std::path::{Path, PathBuf};
use std::time::Duration;

use rollcall_core::ModelPaths;
use serde::Deserialize;
use thiserror::Error;

use crate::monitoring::CameraSource;

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:5000/api";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Console configuration: TOML file (optional) overlaid with `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API root including the `/api` prefix.
    pub api_base_url: String,
    /// Holds `session.json`.
    pub data_dir: PathBuf,
    /// Camera the server monitors with: an index or a stream URL.
    pub camera_source: CameraSource,
    /// Local V4L2 device for enrollment; `None` forces server-side capture.
    pub local_camera: Option<String>,
    pub model_dir: PathBuf,
    /// Detect and embed locally when the models load.
    pub prefer_client_processing: bool,
    /// Skip client samples whose pose repeats an accepted one.
    pub angle_gate: bool,
    pub angle_threshold: f32,
    pub cache_ttl_secs: u64,
    pub dashboard_refresh_secs: u64,
    pub status_poll_secs: u64,
    pub local_capture_interval_ms: u64,
    pub remote_capture_interval_ms: u64,
    pub stop_settle_ms: u64,
    pub stream_ready_timeout_ms: u64,
    pub stream_ready_poll_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = xdg_dir("XDG_DATA_HOME", ".local/share").join("rollcall");
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            model_dir: data_dir.join("models"),
            data_dir,
            camera_source: CameraSource::Index(0),
            local_camera: Some("/dev/video0".to_string()),
            prefer_client_processing: true,
            angle_gate: false,
            angle_threshold: rollcall_core::angle::DEFAULT_DIVERSITY_THRESHOLD,
            cache_ttl_secs: 30,
            dashboard_refresh_secs: 30,
            status_poll_secs: 10,
            local_capture_interval_ms: 500,
            remote_capture_interval_ms: 1000,
            stop_settle_ms: 500,
            stream_ready_timeout_ms: 3000,
            stream_ready_poll_ms: 100,
            request_timeout_secs: 15,
        }
    }
}

impl Config {
    /// Defaults overlaid with `ROLLCALL_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Config file (if present) overlaid with the environment.
    ///
    /// The file is `$ROLLCALL_CONFIG`, else `$XDG_CONFIG_HOME/rollcall/config.toml`.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from);
        let path = explicit
            .clone()
            .unwrap_or_else(|| xdg_dir("XDG_CONFIG_HOME", ".config").join("rollcall/config.toml"));

        let mut config = if explicit.is_some() || path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        tracing::debug!(api = %config.api_base_url, data_dir = %config.data_dir.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        let parse = |key: &str| get(key).and_then(|v| v.parse().ok());

        if let Some(v) = get("ROLLCALL_API_URL") {
            self.api_base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("ROLLCALL_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ROLLCALL_CAMERA_SOURCE") {
            self.camera_source = CameraSource::parse(&v);
        }
        if let Some(v) = get("ROLLCALL_LOCAL_CAMERA") {
            self.local_camera = (!v.is_empty() && v != "none").then_some(v);
        }
        if let Some(v) = get("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ROLLCALL_CLIENT_PROCESSING") {
            self.prefer_client_processing = v != "0";
        }
        if let Some(v) = get("ROLLCALL_ANGLE_GATE") {
            self.angle_gate = v != "0";
        }
        self.angle_threshold = parse("ROLLCALL_ANGLE_THRESHOLD").unwrap_or(self.angle_threshold);
        self.cache_ttl_secs = parse("ROLLCALL_CACHE_TTL_SECS").unwrap_or(self.cache_ttl_secs);
        self.dashboard_refresh_secs = parse("ROLLCALL_DASHBOARD_REFRESH_SECS").unwrap_or(self.dashboard_refresh_secs);
        self.status_poll_secs = parse("ROLLCALL_STATUS_POLL_SECS").unwrap_or(self.status_poll_secs);
        self.request_timeout_secs = parse("ROLLCALL_REQUEST_TIMEOUT_SECS").unwrap_or(self.request_timeout_secs);
    }

    pub fn session_file(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    /// SCRFD at 320 input, ArcFace, and the optional 68-point model when present.
    pub fn model_paths(&self) -> ModelPaths {
        let landmarks = self.model_dir.join("landmarks_68.onnx");
        ModelPaths {
            detector: self.model_dir.join("det_500m.onnx"),
            recognizer: self.model_dir.join("w600k_r50.onnx"),
            landmarks: landmarks.exists().then_some(landmarks),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn angle_gate_threshold(&self) -> Option<f32> {
        self.angle_gate.then_some(self.angle_threshold)
    }
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(fallback)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(c.camera_source, CameraSource::Index(0));
        assert_eq!(c.cache_ttl(), Duration::from_secs(30));
        assert_eq!(c.status_poll_secs, 10);
        assert!(c.prefer_client_processing);
        assert_eq!(c.angle_gate_threshold(), None);
        assert!(c.session_file().ends_with("rollcall/session.json"));
    }

    #[test]
    fn test_env_overrides() {
        let mut c = Config::default();
        c.apply_overrides(overrides(&[
            ("ROLLCALL_API_URL", "http://attendance.local/api/"),
            ("ROLLCALL_CAMERA_SOURCE", "rtsp://cam/stream"),
            ("ROLLCALL_LOCAL_CAMERA", "none"),
            ("ROLLCALL_ANGLE_GATE", "1"),
            ("ROLLCALL_CACHE_TTL_SECS", "5"),
            ("ROLLCALL_STATUS_POLL_SECS", "not-a-number"),
        ]));
        assert_eq!(c.api_base_url, "http://attendance.local/api");
        assert_eq!(c.camera_source, CameraSource::Url("rtsp://cam/stream".into()));
        assert_eq!(c.local_camera, None);
        assert_eq!(c.angle_gate_threshold(), Some(7.0));
        assert_eq!(c.cache_ttl_secs, 5);
        assert_eq!(c.status_poll_secs, 10);
    }

    #[test]
    fn test_toml_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "api_base_url = \"http://10.0.0.5:5000/api\"\ncamera_source = 2\nprefer_client_processing = false\n",
        )
        .unwrap();
        let c = Config::from_file(&path).unwrap();
        assert_eq!(c.api_base_url, "http://10.0.0.5:5000/api");
        assert_eq!(c.camera_source, CameraSource::Index(2));
        assert!(!c.prefer_client_processing);
        assert_eq!(c.remote_capture_interval_ms, 1000);
    }

    #[test]
    fn test_toml_file_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "cache_ttl_secs = \"soon\"").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }
}
