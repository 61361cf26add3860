use crate::package_manager::{InstallResult, InstallStatus, RunReport};
use crate::sysinfo::SystemInfo;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// 单个包的结果行：`name: OK` / `name: FAILED (exit=<code>)`
pub fn format_result_line(result: &InstallResult) -> String {
    match &result.status {
        InstallStatus::Success => format!("{}: OK", result.package.name),
        InstallStatus::Failed { reason, .. } => {
            format!("{}: FAILED ({})", result.package.name, reason)
        }
    }
}

/// 失败时附带的 stderr 尾部，缩进输出
pub fn format_stderr_tail(result: &InstallResult) -> Vec<String> {
    match &result.status {
        InstallStatus::Success => Vec::new(),
        InstallStatus::Failed { stderr_tail, .. } => stderr_tail
            .iter()
            .map(|line| format!("    | {}", line))
            .collect(),
    }
}

pub fn format_summary(report: &RunReport) -> String {
    let mut summary = format!(
        "Summary: {} succeeded, {} failed, {} total",
        report.succeeded(),
        report.failed(),
        report.len()
    );
    if report.cancelled {
        summary.push_str(" (interrupted)");
    }
    summary
}

/// 未成功的包名（按输入顺序），便于重新运行
pub fn failed_packages(report: &RunReport) -> Vec<&str> {
    report
        .results()
        .iter()
        .filter(|r| !r.status.is_success())
        .map(|r| r.package.name.as_str())
        .collect()
}

#[derive(Serialize)]
struct SavedReport<'a> {
    generated_at: DateTime<Local>,
    distro: &'a str,
    kernel: &'a str,
    template: &'a str,
    aggregate: crate::package_manager::types::AggregateStatus,
    exit_code: i32,
    #[serde(flatten)]
    report: &'a RunReport,
}

pub struct ReportSaver {
    base_dir: PathBuf,
}

impl ReportSaver {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn save(
        &self,
        report: &RunReport,
        system: &SystemInfo,
        template: &str,
        exit_code: i32,
    ) -> Result<PathBuf> {
        // 获取当前时间
        let now = Local::now();

        // 创建目录结构: YYYY/MM/DD/
        let dir = self
            .base_dir
            .join(now.format("%Y").to_string())
            .join(now.format("%m").to_string())
            .join(now.format("%d").to_string());
        fs::create_dir_all(&dir)
            .with_context(|| format!("无法创建报告目录 {}", dir.display()))?;

        let saved = SavedReport {
            generated_at: now,
            distro: &system.distro,
            kernel: &system.kernel,
            template,
            aggregate: report.aggregate(),
            exit_code,
            report,
        };
        let content = serde_json::to_string_pretty(&saved)?;

        // 文件名: HH-MM-SS.mmm.json，同一毫秒内重复保存时追加序号
        let stem = now.format("%H-%M-%S%.3f").to_string();
        let (filepath, mut file) = create_unique(&dir, &stem)?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("无法写入报告 {}", filepath.display()))?;

        Ok(filepath)
    }
}

/// 以 create_new 方式创建文件，已存在的报告不会被覆盖
fn create_unique(dir: &Path, stem: &str) -> Result<(PathBuf, File)> {
    for n in 0u32.. {
        let name = match n {
            0 => format!("{}.json", stem),
            n => format!("{}-{}.json", stem, n),
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("无法创建报告 {}", path.display()));
            }
        }
    }
    bail!("{} 下没有可用的报告文件名", dir.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package_manager::types::{FailureReason, PackageSpec};
    use std::time::Duration;

    fn result(name: &str, status: InstallStatus) -> InstallResult {
        InstallResult {
            package: PackageSpec::new(name),
            argv: vec!["apt-get".into(), "install".into(), "-y".into(), name.into()],
            status,
            duration: Duration::from_millis(120),
        }
    }

    #[test]
    fn test_result_lines() {
        let ok = result("curl", InstallStatus::Success);
        assert_eq!(format_result_line(&ok), "curl: OK");
        assert!(format_stderr_tail(&ok).is_empty());

        let failed = result(
            "wget",
            InstallStatus::Failed {
                reason: FailureReason::Exit { code: 100 },
                stderr_tail: vec!["E: Unable to locate package wget".into()],
            },
        );
        assert_eq!(format_result_line(&failed), "wget: FAILED (exit=100)");
        assert_eq!(
            format_stderr_tail(&failed),
            ["    | E: Unable to locate package wget"]
        );

        let skipped = result("vim", InstallStatus::failed(FailureReason::NotAttempted));
        assert_eq!(format_result_line(&skipped), "vim: FAILED (not attempted)");
    }

    #[test]
    fn test_summary() {
        let report = RunReport::new(
            vec![
                result("curl", InstallStatus::Success),
                result("wget", InstallStatus::failed(FailureReason::Exit { code: 1 })),
            ],
            false,
        );
        assert_eq!(
            format_summary(&report),
            "Summary: 1 succeeded, 1 failed, 2 total"
        );
    }

    #[test]
    fn test_failed_packages() {
        let report = RunReport::new(
            vec![
                result("curl", InstallStatus::Success),
                result("wget", InstallStatus::failed(FailureReason::Exit { code: 1 })),
                result("vim", InstallStatus::failed(FailureReason::NotAttempted)),
            ],
            false,
        );
        assert_eq!(failed_packages(&report), ["wget", "vim"]);
        assert!(failed_packages(&RunReport::default()).is_empty());
    }

    #[test]
    fn test_repeated_saves_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let report = RunReport::new(vec![result("curl", InstallStatus::Success)], false);
        let system = SystemInfo::from_os_release("ID=debian\n");
        let saver = ReportSaver::new(dir.path().to_path_buf());

        let paths: Vec<PathBuf> = (0..3)
            .map(|_| saver.save(&report, &system, "apt-get install -y {name}", 0).unwrap())
            .collect();
        assert_ne!(paths[0], paths[1]);
        assert_ne!(paths[1], paths[2]);
        assert_ne!(paths[0], paths[2]);
        for path in &paths {
            assert!(path.exists());
        }
    }

    #[test]
    fn test_create_unique_appends_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let (first, _) = create_unique(dir.path(), "10-00-00.000").unwrap();
        let (second, _) = create_unique(dir.path(), "10-00-00.000").unwrap();
        assert_eq!(first.file_name().unwrap(), "10-00-00.000.json");
        assert_eq!(second.file_name().unwrap(), "10-00-00.000-1.json");
    }

    #[test]
    fn test_save_report_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let report = RunReport::new(vec![result("curl", InstallStatus::Success)], false);
        let system = SystemInfo::from_os_release("ID=debian\nPRETTY_NAME=\"Debian 12\"\n");

        let path = ReportSaver::new(dir.path().to_path_buf())
            .save(&report, &system, "apt-get install -y {name}", 0)
            .unwrap();
        assert!(path.starts_with(dir.path()));

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["distro"], "Debian 12");
        assert_eq!(json["aggregate"], "all_succeeded");
        assert_eq!(json["results"][0]["package"]["name"], "curl");
        assert_eq!(json["results"][0]["status"], "success");
    }
}
