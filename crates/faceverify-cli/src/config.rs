use anyhow::{Context, Result};
use faceverify_hw::CaptureConstraints;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration: built-in defaults, then an optional TOML file, then
/// `FACEVERIFY_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the verification service.
    pub server_url: String,
    /// V4L2 device path.
    pub camera_device: String,
    /// Ideal capture width; the driver picks the closest supported size.
    pub capture_width: u32,
    /// Ideal capture height.
    pub capture_height: u32,
    /// Frames discarded after opening the camera (auto-exposure settling).
    pub warmup_frames: usize,
    /// Timeout in seconds for a whole verification request.
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:5001".to_string(),
            camera_device: "/dev/video0".to_string(),
            capture_width: 1280,
            capture_height: 720,
            warmup_frames: 4,
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    ///
    /// A file named by `FACEVERIFY_CONFIG` must exist; the default location
    /// is optional.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("FACEVERIFY_CONFIG") {
            Ok(path) => Self::from_file(&PathBuf::from(path))?,
            Err(_) => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &PathBuf) -> Result<Self> {
        let src = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_toml(&src)
            .with_context(|| format!("invalid config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml(src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(src)
    }

    /// Override fields from `FACEVERIFY_*` variables; unparsable values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("FACEVERIFY_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(device) = lookup("FACEVERIFY_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        env_parse(&lookup, "FACEVERIFY_CAPTURE_WIDTH", &mut self.capture_width);
        env_parse(&lookup, "FACEVERIFY_CAPTURE_HEIGHT", &mut self.capture_height);
        env_parse(&lookup, "FACEVERIFY_WARMUP_FRAMES", &mut self.warmup_frames);
        env_parse(&lookup, "FACEVERIFY_TIMEOUT_SECS", &mut self.timeout_secs);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Capture constraints for `device` (or the configured device).
    pub fn constraints(&self, device: Option<&str>, basic: bool) -> CaptureConstraints {
        let device = device.unwrap_or(&self.camera_device);
        let constraints = if basic {
            CaptureConstraints::basic(device)
        } else {
            CaptureConstraints::new(device)
                .with_ideal_resolution(self.capture_width, self.capture_height)
        };
        constraints.with_warmup_frames(self.warmup_frames)
    }
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable config value"),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
        .ok()?;
    Some(base.join("faceverify").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            server_url = "https://verify.example.com"
            warmup_frames = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.server_url, "https://verify.example.com");
        assert_eq!(config.warmup_frames, 0);
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(Config::from_toml("camera = \"/dev/video1\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FACEVERIFY_SERVER_URL", "http://10.0.0.2:8000"),
            ("FACEVERIFY_CAPTURE_WIDTH", "640"),
            ("FACEVERIFY_TIMEOUT_SECS", "soon"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.server_url, "http://10.0.0.2:8000");
        assert_eq!(config.capture_width, 640);
        // Unparsable values leave the previous setting alone.
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_constraints() {
        let config = Config::default();
        let ideal = config.constraints(None, false);
        assert_eq!(ideal.device, "/dev/video0");
        assert_eq!(ideal.ideal_resolution, Some((1280, 720)));
        assert_eq!(ideal.warmup_frames, 4);

        let basic = config.constraints(Some("/dev/video2"), true);
        assert_eq!(basic.device, "/dev/video2");
        assert_eq!(basic.ideal_resolution, None);
    }
}
