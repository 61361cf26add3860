use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 配置文件 ~/.config/bulkinstall/config.toml，所有字段均可省略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 默认安装命令模板，必须包含 {name}
    pub template: Option<String>,
    pub timeout_secs: u64,
    pub grace_secs: u64,
    pub tail_lines: usize,
    pub jobs: usize,
    pub show_output: bool,
    pub save_report: bool,
    pub report_dir: PathBuf,
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            template: None,
            timeout_secs: 300,
            grace_secs: 5,
            tail_lines: 20,
            jobs: 1,
            show_output: false,
            save_report: false,
            report_dir: home_dir().join(".bulkinstall/reports"),
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        home_dir().join(".config/bulkinstall/config.toml")
    }

    /// 读取配置：显式指定的文件必须存在，默认位置不存在时使用默认值
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = Self::default_path();
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::ConfigRead {
            path: config_path.clone(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::ConfigParse {
            path: config_path.clone(),
            source,
        })?;
        log::debug!("已加载配置 {}", config_path.display());
        Ok(config)
    }
}
