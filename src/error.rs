//! 错误类型与退出码策略
//!
//! 单个包安装失败不是错误，而是报告中的数据（见 `InstallStatus::Failed`）。
//! 只有配置错误和引擎级致命错误会让进程异常退出。

use std::path::PathBuf;
use thiserror::Error;

/// 全部成功
pub const EXIT_ALL_SUCCEEDED: i32 = 0;
/// 部分失败
pub const EXIT_PARTIAL_FAILURE: i32 = 1;
/// 全部失败
pub const EXIT_ALL_FAILED: i32 = 2;
/// 输入/配置错误（EX_USAGE），未执行任何安装
pub const EXIT_CONFIG_ERROR: i32 = 64;
/// 引擎致命错误（EX_SOFTWARE），剩余包未尝试
pub const EXIT_ENGINE_FATAL: i32 = 70;
/// 运行中再次收到中断信号，立即退出（128 + SIGINT）
pub const EXIT_INTERRUPTED: i32 = 130;

/// 运行开始前发现的输入或配置问题
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("包名不能为空: {entry:?}")]
    EmptyName { entry: String },

    #[error("包名 {name:?} 含有不安全字符 {ch:?}")]
    UnsafeName { name: String, ch: char },

    #[error("包 {name} 的自定义安装命令为空")]
    EmptyCommand { name: String },

    #[error("命令中的引号未闭合: {command:?}")]
    UnterminatedQuote { command: String },

    #[error("默认安装模板必须包含 {{name}} 占位符: {template:?}")]
    TemplateMissingPlaceholder { template: String },

    #[error("{path}:{line}: {source}")]
    ListEntry {
        path: PathBuf,
        line: usize,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("无法读取包列表 {path}: {source}")]
    ListFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("无法读取配置文件 {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("配置文件 {path} 格式错误: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("参数 {option} 的值无效: {reason}")]
    InvalidOption { option: &'static str, reason: String },

    #[error("{0}")]
    Usage(String),
}

/// 基础设施层面的失败：无法再启动任何子进程
#[derive(Debug, Error)]
#[error("无法启动子进程 ({package}): {source}")]
pub struct EngineFatal {
    pub package: String,
    #[source]
    pub source: std::io::Error,
}
