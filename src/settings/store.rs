use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::link_cache::{CacheOptions, VerifyOptions};
use crate::player::PlayerConfig;
use crate::resolver::YtDlpConfig;
use crate::transport::ReconnectPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    // 缓存
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
    #[serde(default = "default_cache_file")]
    pub cache_file: String,

    // 播放
    #[serde(default)]
    pub history_limit: Option<usize>,
    #[serde(default = "default_prefetch_window")]
    pub prefetch_window: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_reconnect_enabled")]
    pub reconnect_enabled: bool,
    #[serde(default = "default_reconnect_streamed")]
    pub reconnect_streamed: bool,
    #[serde(default = "default_reconnect_max_delay_secs")]
    pub reconnect_max_delay_secs: u64,

    // 解析器
    #[serde(default = "default_resolver_bin")]
    pub resolver_bin: String,
    #[serde(default = "default_resolver_timeout_secs")]
    pub resolver_timeout_secs: u64,
    /// 相对路径按数据目录解析
    #[serde(default = "default_cookies_file")]
    pub cookies_file: Option<String>,

    // 批量校验
    #[serde(default = "default_verify_delay_ms")]
    pub verify_delay_ms: u64,
    #[serde(default = "default_verify_search_delay_ms")]
    pub verify_search_delay_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            use_cache: default_use_cache(),
            cache_file: default_cache_file(),
            history_limit: None, // None 表示不限
            prefetch_window: default_prefetch_window(),
            idle_timeout_secs: default_idle_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            reconnect_enabled: default_reconnect_enabled(),
            reconnect_streamed: default_reconnect_streamed(),
            reconnect_max_delay_secs: default_reconnect_max_delay_secs(),
            resolver_bin: default_resolver_bin(),
            resolver_timeout_secs: default_resolver_timeout_secs(),
            cookies_file: default_cookies_file(),
            verify_delay_ms: default_verify_delay_ms(),
            verify_search_delay_ms: default_verify_search_delay_ms(),
        }
    }
}

// 默认值函数（用于 serde default）
fn default_use_cache() -> bool { true }
fn default_cache_file() -> String { "cache.json".to_owned() }
fn default_prefetch_window() -> usize { 2 }
fn default_idle_timeout_secs() -> u64 { 300 }
fn default_probe_timeout_secs() -> u64 { 8 }
fn default_reconnect_enabled() -> bool { true }
fn default_reconnect_streamed() -> bool { true }
fn default_reconnect_max_delay_secs() -> u64 { 5 }
fn default_resolver_bin() -> String { "yt-dlp".to_owned() }
fn default_resolver_timeout_secs() -> u64 { 60 }
fn default_cookies_file() -> Option<String> { Some("cookies.txt".to_owned()) }
fn default_verify_delay_ms() -> u64 { 700 }
fn default_verify_search_delay_ms() -> u64 { 900 }

impl AppSettings {
    pub fn player_config(&self) -> PlayerConfig {
        PlayerConfig {
            prefetch_window: self.prefetch_window,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            history_limit: self.history_limit,
            reconnect: ReconnectPolicy {
                enabled: self.reconnect_enabled,
                streamed: self.reconnect_streamed,
                max_delay_secs: self.reconnect_max_delay_secs,
            },
        }
    }

    pub fn resolver_config(&self, data_dir: &Path) -> YtDlpConfig {
        YtDlpConfig {
            bin: self.resolver_bin.clone(),
            cookies_file: self
                .cookies_file
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(|s| resolve_in(data_dir, s)),
            timeout: Duration::from_secs(self.resolver_timeout_secs),
            ..YtDlpConfig::default()
        }
    }

    /// `override_path` 来自命令行 `--cache-file`
    pub fn cache_options(&self, data_dir: &Path, override_path: Option<PathBuf>) -> CacheOptions {
        CacheOptions {
            path: Some(override_path.unwrap_or_else(|| resolve_in(data_dir, &self.cache_file))),
            use_cache: self.use_cache,
        }
    }

    pub fn verify_options(&self, check_search_keys: bool, prune_invalid: bool) -> VerifyOptions {
        VerifyOptions {
            check_search_keys,
            prune_invalid,
            entry_delay: Duration::from_millis(self.verify_delay_ms),
            search_delay: Duration::from_millis(self.verify_search_delay_ms),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

pub fn load_settings(data_dir: &Path) -> AppSettings {
    let p = settings_path(data_dir);
    let Ok(bytes) = fs::read(&p) else {
        return AppSettings::default();
    };
    match serde_json::from_slice(&bytes) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(path = %p.display(), err = %e, "设置文件损坏，使用默认值");
            AppSettings::default()
        }
    }
}

pub fn save_settings(data_dir: &Path, s: &AppSettings) -> std::io::Result<()> {
    fs::create_dir_all(data_dir)?;
    let p = settings_path(data_dir);
    let tmp = p.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(s)?;
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, &p) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// 系统数据目录；取不到时落在当前目录
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("dev", "tracklink", "tracklink")
        .map(|d| d.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".tracklink"))
}

fn resolve_in(data_dir: &Path, p: &str) -> PathBuf {
    let p = Path::new(p);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        data_dir.join(p)
    }
}

fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}
