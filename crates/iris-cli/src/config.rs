//! Demo configuration – reads/writes `~/.iris/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use iris_runtime::{PipelineConfig, SessionConfig};

/// Persisted settings for the `iris` demo run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Frames per second produced by the simulated camera.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    /// Seconds to run before stopping; `0` runs until Ctrl-C.
    #[serde(default = "default_run_seconds")]
    pub run_seconds: u64,

    /// Simulated classifier latency per inference.
    #[serde(default = "default_inference_latency_ms")]
    pub inference_latency_ms: u64,

    /// Take one photo this many seconds into the run.
    #[serde(default = "default_photo_after_seconds")]
    pub photo_after_seconds: u64,

    /// Switch the torch on once the session runs.
    #[serde(default)]
    pub torch: bool,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_frame_rate() -> u32 {
    30
}
fn default_run_seconds() -> u64 {
    10
}
fn default_inference_latency_ms() -> u64 {
    60
}
fn default_photo_after_seconds() -> u64 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            run_seconds: default_run_seconds(),
            inference_latency_ms: default_inference_latency_ms(),
            photo_after_seconds: default_photo_after_seconds(),
            torch: false,
            session: SessionConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Return the path to `~/.iris/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".iris").join("config.toml")
}

/// Load the config from disk with `IRIS_*` overrides applied.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    let mut cfg = read_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

/// Parse the file at `path` as is.
pub(crate) fn read_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| format!("Failed to parse config: {}", e))
}

/// Apply `IRIS_*` environment variable overrides to `cfg`.  Unparseable
/// values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `IRIS_FRAME_RATE` | `frame_rate` |
/// | `IRIS_RUN_SECONDS` | `run_seconds` |
/// | `IRIS_FEEDBACK_THRESHOLD` | `pipeline.feedback_threshold` |
/// | `IRIS_TOP_K` | `pipeline.top_k` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(fps) = env_parse::<u32>("IRIS_FRAME_RATE") {
        cfg.frame_rate = fps;
    }
    if let Some(secs) = env_parse::<u64>("IRIS_RUN_SECONDS") {
        cfg.run_seconds = secs;
    }
    if let Some(threshold) = env_parse::<f32>("IRIS_FEEDBACK_THRESHOLD")
        && (0.0..=1.0).contains(&threshold)
    {
        cfg.pipeline.feedback_threshold = threshold;
    }
    if let Some(k) = env_parse::<usize>("IRIS_TOP_K") {
        cfg.pipeline.top_k = k;
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Save the config to disk, creating `~/.iris/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iris_hal::PixelFormat;
    use iris_types::CameraPosition;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = read_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.session.camera_position, CameraPosition::Back);
        assert_eq!(loaded.session.pixel_format, PixelFormat::Bgra8);
        assert_eq!(loaded.pipeline.top_k, 5);
        assert!(loaded.session.auto_start);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "frame_rate = 15\n\n[session]\ncamera_position = \"front\"\n",
        )
        .expect("write");

        let loaded = read_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.frame_rate, 15);
        assert_eq!(loaded.session.camera_position, CameraPosition::Front);
        assert_eq!(loaded.session.pixel_format, PixelFormat::Bgra8);
        assert_eq!(loaded.pipeline.metrics_interval_ms, 1000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "frame_rate = \"fast\"").expect("write");
        let err = read_from(&path).unwrap_err();
        assert!(err.starts_with("Failed to parse config"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn read_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(read_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_iris_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.ends_with(".iris/config.toml"));
    }

    // All env-var cases share one test so they never race each other.
    #[test]
    fn apply_env_overrides_reads_iris_vars() {
        // SAFETY: single-threaded test; no other test touches IRIS_* vars.
        unsafe {
            std::env::set_var("IRIS_FRAME_RATE", "12");
            std::env::set_var("IRIS_RUN_SECONDS", "0");
            std::env::set_var("IRIS_FEEDBACK_THRESHOLD", "0.6");
            std::env::set_var("IRIS_TOP_K", "not-a-number");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.frame_rate, 12);
        assert_eq!(cfg.run_seconds, 0);
        assert_eq!(cfg.pipeline.feedback_threshold, 0.6);
        assert_eq!(cfg.pipeline.top_k, 5);

        // SAFETY: as above.
        unsafe { std::env::set_var("IRIS_FEEDBACK_THRESHOLD", "7.5") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.pipeline.feedback_threshold, 0.85);

        // SAFETY: as above.
        unsafe {
            for var in [
                "IRIS_FRAME_RATE",
                "IRIS_RUN_SECONDS",
                "IRIS_FEEDBACK_THRESHOLD",
                "IRIS_TOP_K",
            ] {
                std::env::remove_var(var);
            }
        }
    }
}
