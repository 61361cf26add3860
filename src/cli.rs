//! 命令行参数定义

use clap::Parser;
use std::path::PathBuf;

/// bulkinstall - 跨发行版批量安装软件包
///
/// 包可以写成 `name` 或 `name:command`；`command` 中的 {name} 会替换为包名。
/// 退出码: 0 全部成功, 1 部分失败, 2 全部失败, 64 输入错误, 70 无法创建进程。
#[derive(Debug, Parser)]
#[command(name = "bulkinstall")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bulk package installation with customizable install commands and package lists")]
pub struct Cli {
    /// 要安装的包（name 或 name:command）
    #[arg(value_name = "PACKAGE")]
    pub packages: Vec<String>,

    /// 包列表文件，每行一个条目，`-` 表示标准输入（可重复）
    #[arg(short, long = "file", value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// 默认安装命令模板，必须包含 {name}
    #[arg(short, long, value_name = "CMD")]
    pub template: Option<String>,

    /// 单个包的超时时间（秒）
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// SIGTERM 之后等待多久发送 SIGKILL（秒）
    #[arg(long, value_name = "SECS")]
    pub grace: Option<u64>,

    /// 失败时保留的 stderr 行数
    #[arg(long, value_name = "LINES")]
    pub tail: Option<usize>,

    /// 并发安装数量；仅在包管理器支持并发调用时使用
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// 只打印将执行的命令
    #[arg(long)]
    pub dry_run: bool,

    /// 透传安装命令的标准输出
    #[arg(long)]
    pub show_output: bool,

    /// 将运行报告保存为 JSON
    #[arg(long)]
    pub save_report: bool,

    /// 使用其他配置文件
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let cli = Cli::try_parse_from([
            "bulkinstall",
            "-f",
            "base.list",
            "--jobs",
            "2",
            "curl",
            "wget:custom-install.sh wget",
        ])
        .unwrap();
        assert_eq!(cli.files, [PathBuf::from("base.list")]);
        assert_eq!(cli.jobs, Some(2));
        assert_eq!(cli.packages, ["curl", "wget:custom-install.sh wget"]);
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_help_is_display_help() {
        let err = Cli::try_parse_from(["bulkinstall", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_bad_number_is_error() {
        assert!(Cli::try_parse_from(["bulkinstall", "--timeout", "soon"]).is_err());
    }
}
