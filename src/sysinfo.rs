use std::process::Command;

const OS_RELEASE: &str = "/etc/os-release";

/// 系统环境信息，用于选择默认安装命令和写入报告
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemInfo {
    /// os-release 中的 ID，如 "ubuntu"
    pub id: String,
    /// os-release 中的 ID_LIKE，如 ["debian"]
    pub id_like: Vec<String>,
    pub distro: String,
    pub kernel: String,
}

impl SystemInfo {
    /// 自动检测系统环境信息
    pub fn detect() -> Self {
        let os_release = std::fs::read_to_string(OS_RELEASE).unwrap_or_default();
        let mut info = Self::from_os_release(&os_release);
        info.kernel = Self::run_cmd("uname", &["-r"]);
        info
    }

    /// 解析 os-release 内容（KEY=VALUE，值可带引号）
    pub fn from_os_release(content: &str) -> Self {
        let mut info = Self {
            distro: "Linux".to_string(),
            ..Self::default()
        };

        for line in content.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches(|c: char| c == '"' || c == '\'');
            match key {
                "ID" => info.id = value.to_ascii_lowercase(),
                "ID_LIKE" => {
                    info.id_like = value
                        .split_whitespace()
                        .map(|s| s.to_ascii_lowercase())
                        .collect()
                }
                "PRETTY_NAME" if !value.is_empty() => info.distro = value.to_string(),
                _ => {}
            }
        }

        info
    }

    /// ID 或 ID_LIKE 是否包含给定发行版
    pub fn is_like(&self, distro: &str) -> bool {
        !distro.is_empty() && (self.id == distro || self.id_like.iter().any(|d| d == distro))
    }

    fn run_cmd(cmd: &str, args: &[&str]) -> String {
        Command::new(cmd)
            .args(args)
            .output()
            .ok()
            .and_then(|o| {
                if o.status.success() {
                    Some(String::from_utf8_lossy(&o.stdout).trim().to_string())
                } else {
                    None
                }
            })
            .unwrap_or_else(|| "unknown".to_string())
    }
}
