#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use crate::catalog::TimestampPolicy;
use crate::extractor::DEFAULT_PROGRAM;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DOWNLOADS_DIR: &str = "downloads";

pub const DOWNLOAD_DIR_KEY: &str = "VIDSHELF_DOWNLOAD_DIR";
pub const HOST_KEY: &str = "VIDSHELF_HOST";
pub const PORT_KEY: &str = "VIDSHELF_PORT";
pub const YT_DLP_KEY: &str = "VIDSHELF_YT_DLP";
pub const TIMESTAMP_POLICY_KEY: &str = "VIDSHELF_TIMESTAMP_POLICY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub download_dir: PathBuf,
    pub host: String,
    pub port: u16,
    /// Command line used to launch yt-dlp, e.g. `yt-dlp` or
    /// `python3 -m yt_dlp`.
    pub yt_dlp: String,
    pub timestamp_policy: TimestampPolicy,
}

/// Values coming from the command line; they win over the environment and
/// the `.env` file.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub download_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub yt_dlp: Option<String>,
    pub timestamp_policy: Option<TimestampPolicy>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_runtime_config(&file_vars, env_var_string, overrides, default_download_dir)
}

/// `downloads/` beside the running executable.
pub fn default_download_dir() -> Result<PathBuf> {
    let exe = env::current_exe().context("locating vidshelf executable")?;
    let parent = exe
        .parent()
        .ok_or_else(|| anyhow!("executable {} has no parent directory", exe.display()))?;
    Ok(parent.join(DOWNLOADS_DIR))
}

fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
    fallback_dir: impl FnOnce() -> Result<PathBuf>,
) -> Result<RuntimeConfig> {
    let download_dir = match overrides
        .download_dir
        .or_else(|| lookup_value(DOWNLOAD_DIR_KEY, file_vars, &env_lookup).map(PathBuf::from))
    {
        Some(dir) => dir,
        None => fallback_dir()?,
    };
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value(HOST_KEY, file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| {
            lookup_value(PORT_KEY, file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let yt_dlp = overrides
        .yt_dlp
        .filter(|value| !value.trim().is_empty())
        .or_else(|| lookup_value(YT_DLP_KEY, file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_PROGRAM.to_string());
    let timestamp_policy = match overrides.timestamp_policy {
        Some(policy) => policy,
        None => match lookup_value(TIMESTAMP_POLICY_KEY, file_vars, &env_lookup) {
            Some(raw) => TimestampPolicy::parse(&raw).ok_or_else(|| {
                anyhow!("{TIMESTAMP_POLICY_KEY} must be `modified` or `created`, got `{raw}`")
            })?,
            None => TimestampPolicy::default(),
        },
    };

    Ok(RuntimeConfig {
        download_dir,
        host,
        port,
        yt_dlp,
        timestamp_policy,
    })
}

/// Creates the download directory if needed and returns its absolute path.
/// Called once at startup; a failure here is fatal.
pub fn ensure_download_dir(path: &Path) -> Result<PathBuf> {
    fs::create_dir_all(path).with_context(|| format!("creating {}", path.display()))?;
    fs::canonicalize(path).with_context(|| format!("resolving {}", path.display()))
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn fixed_dir() -> Result<PathBuf> {
        Ok(PathBuf::from("/app/downloads"))
    }

    fn config_from(contents: &str) -> RuntimeConfig {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_config(&vars, |_| None, RuntimeOverrides::default(), fixed_dir).unwrap()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from("");
        assert_eq!(config.download_dir, PathBuf::from("/app/downloads"));
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.yt_dlp, "yt-dlp");
        assert_eq!(config.timestamp_policy, TimestampPolicy::Modified);
    }

    #[test]
    fn env_file_values_are_used() {
        let config = config_from(
            "VIDSHELF_DOWNLOAD_DIR=\"/srv/videos\"\nVIDSHELF_PORT=\"4242\"\nVIDSHELF_HOST=0.0.0.0\nVIDSHELF_YT_DLP='python3 -m yt_dlp'\nVIDSHELF_TIMESTAMP_POLICY=created\n",
        );
        assert_eq!(config.download_dir, PathBuf::from("/srv/videos"));
        assert_eq!(config.port, 4242);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.yt_dlp, "python3 -m yt_dlp");
        assert_eq!(config.timestamp_policy, TimestampPolicy::Created);
    }

    #[test]
    fn invalid_port_defaults() {
        let config = config_from("VIDSHELF_PORT=\"nope\"\n");
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn invalid_timestamp_policy_is_an_error() {
        let vars = read_env_file(make_config("VIDSHELF_TIMESTAMP_POLICY=atime\n").path()).unwrap();
        let err = build_runtime_config(&vars, |_| None, RuntimeOverrides::default(), fixed_dir)
            .unwrap_err();
        assert!(err.to_string().contains("VIDSHELF_TIMESTAMP_POLICY"));
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(make_config("VIDSHELF_DOWNLOAD_DIR=\"/file\"\n").path()).unwrap();
        let config = build_runtime_config(
            &vars,
            |key| (key == DOWNLOAD_DIR_KEY).then(|| "/env".to_string()),
            RuntimeOverrides::default(),
            fixed_dir,
        )
        .unwrap();
        assert_eq!(config.download_dir, PathBuf::from("/env"));
    }

    #[test]
    fn override_precedence() {
        let mut vars = HashMap::new();
        vars.insert(DOWNLOAD_DIR_KEY.to_string(), "/file-dir".to_string());
        vars.insert(HOST_KEY.to_string(), "file-host".to_string());
        vars.insert(PORT_KEY.to_string(), "7000".to_string());
        vars.insert(TIMESTAMP_POLICY_KEY.to_string(), "modified".to_string());

        let overrides = RuntimeOverrides {
            download_dir: Some(PathBuf::from("/override-dir")),
            host: Some("override-host".into()),
            port: None,
            yt_dlp: None,
            timestamp_policy: Some(TimestampPolicy::Created),
            env_path: None,
        };

        let config = build_runtime_config(
            &vars,
            |key| (key == PORT_KEY).then(|| "8000".to_string()),
            overrides,
            || Err(anyhow!("fallback must not be used")),
        )
        .unwrap();

        assert_eq!(config.download_dir, PathBuf::from("/override-dir"));
        assert_eq!(config.host, "override-host");
        assert_eq!(config.port, 8000);
        assert_eq!(config.timestamp_policy, TimestampPolicy::Created);
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let vars = HashMap::new();
        let config = build_runtime_config(
            &vars,
            |_| None,
            RuntimeOverrides {
                host: Some("   ".into()),
                yt_dlp: Some(" ".into()),
                ..RuntimeOverrides::default()
            },
            fixed_dir,
        )
        .unwrap();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.yt_dlp, DEFAULT_PROGRAM);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export VIDSHELF_DOWNLOAD_DIR="/media"
            VIDSHELF_YT_DLP='yt-dlp'
            VIDSHELF_HOST =  "0.0.0.0"
            VIDSHELF_PORT=9090
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get(DOWNLOAD_DIR_KEY).unwrap(), "/media");
        assert_eq!(vars.get(YT_DLP_KEY).unwrap(), "yt-dlp");
        assert_eq!(vars.get(HOST_KEY).unwrap(), "0.0.0.0");
        assert_eq!(vars.get(PORT_KEY).unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn ensure_download_dir_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a").join("downloads");
        let resolved = ensure_download_dir(&target).unwrap();
        assert!(resolved.is_dir());
        assert!(resolved.is_absolute());
        // Idempotent on an existing directory.
        assert_eq!(ensure_download_dir(&target).unwrap(), resolved);
    }

    #[test]
    fn ensure_download_dir_fails_on_a_file() {
        let file = make_config("not a directory");
        assert!(ensure_download_dir(file.path()).is_err());
    }

    #[test]
    fn default_download_dir_sits_beside_the_executable() {
        let dir = default_download_dir().unwrap();
        assert!(dir.ends_with(DOWNLOADS_DIR));
    }
}
