//! Configuration vault – reads/writes `~/.armlink/config.toml`.

use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;

use armlink_kernel::PeerAllowList;
use armlink_memory::DEFAULT_LOG_PATH;
use armlink_middleware::framing::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_READ_CHUNK};
use armlink_middleware::{ClientOptions, ServerOptions};
use armlink_perception::CalibrationProfile;
use armlink_runtime::{DepthMode, PipelineConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Persisted relay configuration stored in `~/.armlink/config.toml`.
///
/// Tables (`depth`, `calibration`) come last so the TOML stays valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the server role binds.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Address the client role connects to.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,

    /// Peers the server accepts.  Empty admits everyone.
    #[serde(default)]
    pub allow_list: Vec<IpAddr>,

    #[serde(default = "default_action_log_path")]
    pub action_log_path: PathBuf,

    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Pose pushed to every client on connect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_pose: Option<Vec<f64>>,

    #[serde(default)]
    pub return_home_after_turn: bool,

    #[serde(default = "default_true")]
    pub attach_metadata: bool,

    #[serde(default)]
    pub fail_on_log_error: bool,

    #[serde(default)]
    pub depth: DepthMode,

    #[serde(default)]
    pub calibration: CalibrationProfile,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_server_addr() -> String {
    "192.168.168.42:8000".to_string()
}
fn default_action_log_path() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_PATH)
}
fn default_read_chunk() -> usize {
    DEFAULT_READ_CHUNK
}
fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}
fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            server_addr: default_server_addr(),
            allow_list: Vec::new(),
            action_log_path: default_action_log_path(),
            read_chunk: default_read_chunk(),
            max_frame_bytes: default_max_frame_bytes(),
            initial_pose: None,
            return_home_after_turn: false,
            attach_metadata: true,
            fail_on_log_error: false,
            depth: DepthMode::default(),
            calibration: CalibrationProfile::default(),
        }
    }
}

impl Config {
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            allow_list: self.allow_list.iter().copied().collect::<PeerAllowList>(),
            initial_pose: self.initial_pose.clone(),
            return_home_after_turn: self.return_home_after_turn,
            attach_metadata: self.attach_metadata,
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            read_chunk: self.read_chunk,
            max_frame_bytes: self.max_frame_bytes,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            depth: self.depth,
            fail_on_log_error: self.fail_on_log_error,
        }
    }
}

/// Return the path to `~/.armlink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".armlink").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
///
/// A profile that fails calibration validation is a load error.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ARMLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARMLINK_LISTEN_ADDR` | `listen_addr` |
/// | `ARMLINK_SERVER_ADDR` | `server_addr` |
/// | `ARMLINK_ALLOW_LIST` | `allow_list` (comma separated IPs) |
/// | `ARMLINK_ACTION_LOG` | `action_log_path` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ARMLINK_LISTEN_ADDR") {
        cfg.listen_addr = v;
    }
    if let Ok(v) = std::env::var("ARMLINK_SERVER_ADDR") {
        cfg.server_addr = v;
    }
    if let Ok(v) = std::env::var("ARMLINK_ALLOW_LIST") {
        match parse_allow_list(&v) {
            Ok(list) => cfg.allow_list = list,
            Err(bad) => warn!(entry = %bad, "ignoring ARMLINK_ALLOW_LIST: not an IP address"),
        }
    }
    if let Ok(v) = std::env::var("ARMLINK_ACTION_LOG")
        && !v.trim().is_empty()
    {
        cfg.action_log_path = PathBuf::from(v);
    }
}

/// Parse `"a, b, c"` into addresses.  Blank entries are skipped; the first
/// invalid entry is returned as the error.
pub fn parse_allow_list(raw: &str) -> Result<Vec<IpAddr>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<IpAddr>().map_err(|_| s.to_string()))
        .collect()
}

/// Save the config to disk, creating `~/.armlink/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner-only directory (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        (dir, path)
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, path) = temp_config_path();
        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let (_dir, path) = temp_config_path();
        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.read_chunk, 4096);
        assert_eq!(loaded.max_frame_bytes, 1024 * 1024);
        assert!(loaded.attach_metadata);
        assert!(!loaded.return_home_after_turn);
        assert_eq!(loaded.depth, DepthMode::Fixed { meters: 0.42 });
        assert_eq!(loaded.calibration, CalibrationProfile::default());
    }

    #[test]
    fn roundtrip_keeps_optional_fields() {
        let (_dir, path) = temp_config_path();
        let cfg = Config {
            initial_pose: Some(vec![0.16, 0.96, 0.426, 3.131, -0.396, 0.009]),
            depth: DepthMode::Detection,
            return_home_after_turn: true,
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.initial_pose, cfg.initial_pose);
        assert_eq!(loaded.depth, DepthMode::Detection);
        assert!(loaded.return_home_after_turn);
    }

    #[test]
    fn sparse_file_falls_back_to_defaults() {
        let (_dir, path) = temp_config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "read_chunk = 512\n").unwrap();

        let loaded = load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.read_chunk, 512);
        assert_eq!(loaded.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert!(loaded.attach_metadata);
    }

    #[test]
    fn invalid_calibration_is_a_load_error() {
        let (_dir, path) = temp_config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "[calibration]\n\
             intrinsics = [[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 1.0]]\n\
             rotation = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]\n\
             translation = [0.0, 0.0, 0.0]\n",
        )
        .unwrap();

        assert!(load_from(&path).is_err());
    }

    #[test]
    fn config_path_points_to_armlink_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".armlink"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let (_dir, path) = temp_config_path();
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn derived_options_follow_the_config() {
        let cfg = Config {
            allow_list: vec!["192.168.168.76".parse().unwrap()],
            read_chunk: 1024,
            fail_on_log_error: true,
            ..Config::default()
        };
        let server = cfg.server_options();
        assert_eq!(server.allow_list.len(), 1);
        assert!(server.attach_metadata);
        assert_eq!(cfg.client_options().read_chunk, 1024);
        assert!(cfg.pipeline_config().fail_on_log_error);
    }

    #[test]
    fn parse_allow_list_accepts_mixed_families() {
        let list = parse_allow_list(" 192.168.168.76, ::1 ,,").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(parse_allow_list("10.0.0.1, robot"), Err("robot".to_string()));
    }

    #[test]
    fn apply_env_overrides_changes_server_addr() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ARMLINK_SERVER_ADDR", "127.0.0.1:9000") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.server_addr, "127.0.0.1:9000");
        unsafe { std::env::remove_var("ARMLINK_SERVER_ADDR") };
    }

    #[test]
    fn apply_env_overrides_changes_allow_list() {
        let previous: IpAddr = "10.0.0.9".parse().unwrap();

        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ARMLINK_ALLOW_LIST", "192.168.168.76,10.0.0.2") };
        let mut cfg = Config {
            allow_list: vec![previous],
            ..Config::default()
        };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.allow_list.len(), 2);

        // One bad entry leaves the configured list alone.
        unsafe { std::env::set_var("ARMLINK_ALLOW_LIST", "192.168.168.76,robot") };
        let mut cfg = Config {
            allow_list: vec![previous],
            ..Config::default()
        };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.allow_list, vec![previous]);
        unsafe { std::env::remove_var("ARMLINK_ALLOW_LIST") };
    }

    #[test]
    fn apply_env_overrides_changes_listen_addr() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ARMLINK_LISTEN_ADDR", "0.0.0.0:8100") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.listen_addr, "0.0.0.0:8100");
        unsafe { std::env::remove_var("ARMLINK_LISTEN_ADDR") };
    }

    #[test]
    fn apply_env_overrides_changes_action_log() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ARMLINK_ACTION_LOG", "/tmp/armlink-actions.jsonl") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.action_log_path, PathBuf::from("/tmp/armlink-actions.jsonl"));
        unsafe { std::env::remove_var("ARMLINK_ACTION_LOG") };
    }
}
