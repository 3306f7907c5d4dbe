// src/config.rs
//! Pipeline configuration: built-in defaults, optional TOML file, then
//! environment overrides (env wins).
//!
//! File lookup: `$LINE_STATUS_CONFIG_PATH`, else `config/pipeline.toml`; a
//! missing default file just means defaults.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "LINE_STATUS_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

const DEFAULT_STATUS_URLS: &[&str] = &[
    "https://www.metro.sp.gov.br/direto-do-metro",
    "https://www.diretodostrens.com.br/",
];
const DEFAULT_REASON_URL: &str = "https://ccm.artesp.sp.gov.br/metroferroviario/ocorrencias/";
const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
];
const DEFAULT_ACCEPT_LANGUAGE: &str = "pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7";

const DEFAULT_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const MAX_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;
const DEFAULT_STATUS_TTL_SECS: u64 = 60;
const DEFAULT_REASON_TTL_SECS: u64 = 45;
const DEFAULT_LAST_GOOD_TTL_SECS: u64 = 15 * 60;
const DEFAULT_REFRESH_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tried in order; the first document that yields lines wins.
    pub status_urls: Vec<String>,
    /// Independent sources (one per operator, e.g. the CPTM JSON feed)
    /// fetched every cycle; their lines are merged in after `status_urls`,
    /// earlier sources winning on the same line.
    pub merged_status_urls: Vec<String>,
    /// `None` disables the incident feed.
    pub reason_url: Option<String>,
    pub request_timeout_ms: u64,
    /// Total attempts per fetch (1 = no retry).
    pub retry_attempts: u32,
    /// Delay before retry `n` is `retry_delay_ms * n`.
    pub retry_delay_ms: u64,
    pub status_cache_ttl_secs: u64,
    pub reason_cache_ttl_secs: u64,
    pub last_good_ttl_secs: u64,
    pub refresh_interval_secs: u64,
    pub user_agents: Vec<String>,
    pub accept_language: String,
    pub fill_missing_from_catalog: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            status_urls: DEFAULT_STATUS_URLS.iter().map(|s| s.to_string()).collect(),
            merged_status_urls: Vec::new(),
            reason_url: Some(DEFAULT_REASON_URL.to_string()),
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            status_cache_ttl_secs: DEFAULT_STATUS_TTL_SECS,
            reason_cache_ttl_secs: DEFAULT_REASON_TTL_SECS,
            last_good_ttl_secs: DEFAULT_LAST_GOOD_TTL_SECS,
            refresh_interval_secs: DEFAULT_REFRESH_SECS,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            fill_missing_from_catalog: false,
        }
    }
}

impl PipelineConfig {
    /// Defaults ← file ← env, then sanitised.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
                }
                Self::from_path(&pb)?
            }
            Err(_) => {
                let pb = PathBuf::from(DEFAULT_CONFIG_PATH);
                if pb.exists() {
                    Self::from_path(&pb)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_overrides(|k| std::env::var(k).ok());
        Ok(cfg.sanitized())
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing pipeline config {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Apply `KEY=value` overrides from `lookup`. Unparsable numbers are
    /// logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STATUS_SOURCE_URL") {
            let urls = split_list(&v);
            if !urls.is_empty() {
                self.status_urls = urls;
            }
        }
        if let Some(v) = lookup("MERGED_STATUS_URLS") {
            self.merged_status_urls = split_list(&v);
        }
        if let Some(v) = lookup("REASON_SOURCE_URL").or_else(|| lookup("CCM_OCCURRENCES_URL")) {
            let v = v.trim();
            self.reason_url = (!v.is_empty()).then(|| v.to_string());
        }
        set_num(&lookup, "REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms);
        set_num(&lookup, "RETRY_ATTEMPTS", &mut self.retry_attempts);
        set_num(&lookup, "RETRY_DELAY_MS", &mut self.retry_delay_ms);
        set_num(&lookup, "STATUS_CACHE_TTL_SECS", &mut self.status_cache_ttl_secs);
        set_num(&lookup, "REASON_CACHE_TTL_SECS", &mut self.reason_cache_ttl_secs);
        set_num(&lookup, "LAST_GOOD_TTL_SECS", &mut self.last_good_ttl_secs);
        set_num(&lookup, "REFRESH_INTERVAL_SECS", &mut self.refresh_interval_secs);
    }

    /// Clamp out-of-range values back to something usable.
    pub fn sanitized(mut self) -> Self {
        self.status_urls = clean_list(self.status_urls);
        if self.status_urls.is_empty() {
            self.status_urls = DEFAULT_STATUS_URLS.iter().map(|s| s.to_string()).collect();
        }
        self.merged_status_urls = clean_list(self.merged_status_urls);
        self.reason_url = self
            .reason_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        self.retry_attempts = self.retry_attempts.clamp(1, MAX_RETRY_ATTEMPTS);
        if self.request_timeout_ms == 0 {
            self.request_timeout_ms = DEFAULT_TIMEOUT_MS;
        }
        if self.status_cache_ttl_secs == 0 {
            self.status_cache_ttl_secs = DEFAULT_STATUS_TTL_SECS;
        }
        if self.reason_cache_ttl_secs == 0 {
            self.reason_cache_ttl_secs = DEFAULT_REASON_TTL_SECS;
        }
        if self.last_good_ttl_secs == 0 {
            self.last_good_ttl_secs = DEFAULT_LAST_GOOD_TTL_SECS;
        }
        if self.refresh_interval_secs == 0 {
            self.refresh_interval_secs = DEFAULT_REFRESH_SECS;
        }
        self.user_agents = clean_list(self.user_agents);
        if self.user_agents.is_empty() {
            self.user_agents = DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect();
        }
        if self.accept_language.trim().is_empty() {
            self.accept_language = DEFAULT_ACCEPT_LANGUAGE.to_string();
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_cache_ttl_secs)
    }
    pub fn reason_ttl(&self) -> Duration {
        Duration::from_secs(self.reason_cache_ttl_secs)
    }
    pub fn last_good_ttl(&self) -> Duration {
        Duration::from_secs(self.last_good_ttl_secs)
    }
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

fn set_num<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse::<T>() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable config override"),
    }
}

fn split_list(s: &str) -> Vec<String> {
    clean_list(s.split(',').map(str::to_string).collect())
}

/// Trim, drop blanks and repeats, keep order.
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::{env, fs};

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
status_urls = ["http://a.example/status"]
last_good_ttl_secs = 600
fill_missing_from_catalog = true
"#,
        )
        .unwrap();
        assert_eq!(cfg.status_urls, vec!["http://a.example/status".to_string()]);
        assert_eq!(cfg.last_good_ttl_secs, 600);
        assert!(cfg.fill_missing_from_catalog);
        assert_eq!(cfg.reason_cache_ttl_secs, 45);
        assert_eq!(cfg.retry_attempts, 3);
    }

    #[test]
    fn env_overrides_win_and_empty_reason_url_disables_feed() {
        let mut cfg = PipelineConfig::default();
        cfg.apply_overrides(lookup_from(&[
            ("STATUS_SOURCE_URL", " http://x/1 , http://x/2,, http://x/1"),
            ("REASON_SOURCE_URL", ""),
            ("RETRY_ATTEMPTS", "2"),
            ("STATUS_CACHE_TTL_SECS", "not-a-number"),
            ("MERGED_STATUS_URLS", "http://cptm/status"),
        ]));
        assert_eq!(cfg.merged_status_urls, vec!["http://cptm/status".to_string()]);
        assert_eq!(cfg.status_urls, vec!["http://x/1".to_string(), "http://x/2".to_string()]);
        assert_eq!(cfg.reason_url, None);
        assert_eq!(cfg.retry_attempts, 2);
        assert_eq!(cfg.status_cache_ttl_secs, 60);
    }

    #[test]
    fn legacy_reason_alias_is_honoured() {
        let mut cfg = PipelineConfig::default();
        cfg.apply_overrides(lookup_from(&[("CCM_OCCURRENCES_URL", "http://ccm.local/")]));
        assert_eq!(cfg.reason_url.as_deref(), Some("http://ccm.local/"));
    }

    #[test]
    fn sanitize_clamps_out_of_range() {
        let cfg = PipelineConfig {
            status_urls: vec!["  ".into()],
            retry_attempts: 0,
            status_cache_ttl_secs: 0,
            user_agents: vec![],
            ..PipelineConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.retry_attempts, 1);
        assert_eq!(cfg.status_cache_ttl_secs, 60);
        assert_eq!(cfg.status_urls.len(), 2);
        assert_eq!(cfg.user_agents.len(), 3);

        let cfg = PipelineConfig {
            retry_attempts: 10,
            ..PipelineConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.retry_attempts, 3);
    }

    #[serial_test::serial]
    #[test]
    fn load_uses_env_path_then_default_file() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);
        env::remove_var("STATUS_SOURCE_URL");
        env::remove_var("MERGED_STATUS_URLS");

        // No file anywhere → defaults
        let cfg = PipelineConfig::load().unwrap();
        assert_eq!(cfg, PipelineConfig::default());

        let p = tmp.path().join("custom.toml");
        fs::write(&p, "refresh_interval_secs = 30\n").unwrap();
        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        assert_eq!(PipelineConfig::load().unwrap().refresh_interval_secs, 30);

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(PipelineConfig::load().is_err());
        env::remove_var(ENV_CONFIG_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
