//! 配置 - 数据目录、命令前缀和首次启动的默认上限
//!
//! 优先级：`TOURNEY_DATA_DIR` 环境变量 > `~/.config/tourney-registry`。
//! 数据目录下可选的 `config.json` 提供 `prefix`、`default_max_players`、
//! `default_max_teams`。

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::store::{JsonFileStore, Settings, DEFAULT_MAX_PLAYERS, DEFAULT_MAX_TEAMS};

pub const DATA_DIR_ENV: &str = "TOURNEY_DATA_DIR";
pub const CONFIG_FILE: &str = "config.json";

/// 运行配置
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// 聊天命令前缀
    pub prefix: String,
    /// settings.json 不存在时使用
    pub default_max_players: usize,
    /// settings.json 不存在时使用
    pub default_max_teams: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            prefix: "-".to_string(),
            default_max_players: DEFAULT_MAX_PLAYERS,
            default_max_teams: DEFAULT_MAX_TEAMS,
        }
    }
}

impl Config {
    /// 默认数据目录
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("tourney-registry")
    }

    /// 从环境变量和配置文件加载
    pub fn load() -> Result<Self> {
        let data_dir = std::env::var(DATA_DIR_ENV)
            .ok()
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_data_dir);
        Self::load_from(data_dir)
    }

    /// 从指定数据目录加载
    pub fn load_from(data_dir: PathBuf) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE);

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            serde_json::from_str::<Config>(&content)
                .with_context(|| format!("invalid config file {}", config_path.display()))?
        } else {
            Config::default()
        };
        config.data_dir = data_dir;

        debug!(data_dir = %config.data_dir.display(), prefix = %config.prefix, "Loaded config");
        Ok(config)
    }

    /// 首次启动写入 settings.json 的初始值
    pub fn default_settings(&self) -> Settings {
        Settings {
            max_players: self.default_max_players,
            max_teams: self.default_max_teams,
            ..Settings::default()
        }
    }

    /// 打开数据目录下的文件存储
    pub fn open_store(&self) -> JsonFileStore {
        JsonFileStore::new(self.data_dir.clone()).with_default_settings(self.default_settings())
    }
}
