//! 包管理器模块 — 批量安装引擎及其依赖

pub mod engine;
pub mod parser;
pub mod streaming;
pub mod types;

// 重新导出常用类型和函数
pub use engine::{BulkInstaller, EngineOptions, PlannedInstall, RunEvent};
pub use parser::{collect_specs, CommandTemplate};
pub use streaming::{CancelToken, ExecOptions, ProcessRunner};
pub use types::{InstallResult, InstallStatus, RunReport};

use crate::sysinfo::SystemInfo;

/// 没有检测到任何包管理器时使用的模板
pub const FALLBACK_TEMPLATE: &str = "apt-get install -y {name}";

/// 已知包管理器：可执行文件、默认安装模板、对应的发行版族
const KNOWN_MANAGERS: &[(&str, &str, &[&str])] = &[
    ("apt-get", "apt-get install -y {name}", &["debian", "ubuntu"]),
    ("dnf", "dnf install -y {name}", &["fedora", "rhel", "centos"]),
    ("yum", "yum install -y {name}", &["fedora", "rhel", "centos"]),
    ("pacman", "pacman -S --noconfirm --needed {name}", &["arch"]),
    ("zypper", "zypper --non-interactive install {name}", &["suse", "opensuse"]),
    ("apk", "apk add {name}", &["alpine"]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManager {
    pub command: String,
    pub install_template: String,
}

impl PackageManager {
    /// 按发行版检测包管理器：先匹配 ID/ID_LIKE，再按优先级尝试 PATH 中存在的
    pub fn detect(system: &SystemInfo) -> Option<Self> {
        Self::detect_with(system, |cmd| which::which(cmd).is_ok())
    }

    fn detect_with(system: &SystemInfo, available: impl Fn(&str) -> bool) -> Option<Self> {
        let matches_distro = |families: &[&str]| families.iter().any(|f| system.is_like(f));

        KNOWN_MANAGERS
            .iter()
            .filter(|(cmd, _, families)| matches_distro(*families) && available(*cmd))
            .chain(KNOWN_MANAGERS.iter().filter(|(cmd, _, _)| available(*cmd)))
            .map(|(cmd, template, _)| PackageManager {
                command: cmd.to_string(),
                install_template: template.to_string(),
            })
            .next()
    }

    pub fn name(&self) -> &str {
        &self.command
    }
}
