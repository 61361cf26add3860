//! 批量安装相关数据类型定义

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// 单个待安装包：包名 + 可选的自定义安装命令
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSpec {
    pub name: String,
    pub install_command: Option<String>,
}

impl PackageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            install_command: None,
        }
    }

    pub fn with_command(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            install_command: Some(command.into()),
        }
    }
}

/// 安装失败的原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// 非零退出码
    Exit { code: i32 },
    /// 被信号终止
    Signal { signal: i32 },
    /// 超时后被强制终止
    Timeout { after: Duration },
    /// 命令无法启动（如找不到可执行文件）
    Spawn { message: String },
    /// 用户中断时被终止
    Cancelled,
    /// 从未启动
    NotAttempted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Exit { code } => write!(f, "exit={}", code),
            FailureReason::Signal { signal } => write!(f, "signal={}", signal),
            FailureReason::Timeout { after } => {
                write!(f, "timeout after {}s", after.as_secs_f64())
            }
            FailureReason::Spawn { message } => write!(f, "spawn: {}", message),
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::NotAttempted => write!(f, "not attempted"),
        }
    }
}

/// 单个包的最终状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstallStatus {
    Success,
    Failed {
        reason: FailureReason,
        stderr_tail: Vec<String>,
    },
}

impl InstallStatus {
    pub fn failed(reason: FailureReason) -> Self {
        InstallStatus::Failed {
            reason,
            stderr_tail: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, InstallStatus::Success)
    }

    pub fn reason(&self) -> Option<&FailureReason> {
        match self {
            InstallStatus::Success => None,
            InstallStatus::Failed { reason, .. } => Some(reason),
        }
    }
}

/// 单个包的安装结果，生成后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallResult {
    pub package: PackageSpec,
    /// 实际执行（或将要执行）的参数向量
    pub argv: Vec<String>,
    #[serde(flatten)]
    pub status: InstallStatus,
    pub duration: Duration,
}

impl InstallResult {
    pub fn not_attempted(package: PackageSpec, argv: Vec<String>) -> Self {
        Self {
            package,
            argv,
            status: InstallStatus::failed(FailureReason::NotAttempted),
            duration: Duration::ZERO,
        }
    }
}

/// 单个包在一次运行中的状态机
///
/// Pending → Running → Finished，或 Pending → Finished(NotAttempted)。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageState {
    Pending,
    Running,
    Finished(InstallStatus),
}

/// 非法状态迁移
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("非法状态迁移: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub to: &'static str,
}

impl PackageState {
    fn label(&self) -> &'static str {
        match self {
            PackageState::Pending => "pending",
            PackageState::Running => "running",
            PackageState::Finished(_) => "finished",
        }
    }

    /// Pending → Running
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        match self {
            PackageState::Pending => {
                *self = PackageState::Running;
                Ok(())
            }
            other => Err(InvalidTransition {
                from: other.label(),
                to: "running",
            }),
        }
    }

    /// Running → Finished；Pending 只能以 NotAttempted 结束
    pub fn finish(&mut self, status: InstallStatus) -> Result<(), InvalidTransition> {
        let allowed = match self {
            PackageState::Running => true,
            PackageState::Pending => {
                status.reason() == Some(&FailureReason::NotAttempted)
            }
            PackageState::Finished(_) => false,
        };
        if !allowed {
            return Err(InvalidTransition {
                from: self.label(),
                to: "finished",
            });
        }
        *self = PackageState::Finished(status);
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, PackageState::Finished(_))
    }
}

/// 整体结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    AllSucceeded,
    PartialFailure,
    AllFailed,
}

impl AggregateStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            AggregateStatus::AllSucceeded => crate::error::EXIT_ALL_SUCCEEDED,
            AggregateStatus::PartialFailure => crate::error::EXIT_PARTIAL_FAILURE,
            AggregateStatus::AllFailed => crate::error::EXIT_ALL_FAILED,
        }
    }
}

/// 一次运行的有序结果集合（按输入顺序）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    results: Vec<InstallResult>,
    /// 运行是否被用户中断
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(results: Vec<InstallResult>, cancelled: bool) -> Self {
        Self { results, cancelled }
    }

    pub fn results(&self) -> &[InstallResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    /// 空列表视为全部成功
    pub fn aggregate(&self) -> AggregateStatus {
        if self.is_empty() {
            return AggregateStatus::AllSucceeded;
        }
        match (self.succeeded(), self.failed()) {
            (_, 0) => AggregateStatus::AllSucceeded,
            (0, _) => AggregateStatus::AllFailed,
            _ => AggregateStatus::PartialFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, status: InstallStatus) -> InstallResult {
        InstallResult {
            package: PackageSpec::new(name),
            argv: vec!["true".to_string()],
            status,
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_aggregate_status() {
        let ok = || result("a", InstallStatus::Success);
        let bad = || result("b", InstallStatus::failed(FailureReason::Exit { code: 1 }));

        assert_eq!(
            RunReport::new(vec![ok(), ok()], false).aggregate(),
            AggregateStatus::AllSucceeded
        );
        assert_eq!(
            RunReport::new(vec![ok(), bad()], false).aggregate(),
            AggregateStatus::PartialFailure
        );
        assert_eq!(
            RunReport::new(vec![bad(), bad()], false).aggregate(),
            AggregateStatus::AllFailed
        );
        assert_eq!(
            RunReport::default().aggregate(),
            AggregateStatus::AllSucceeded
        );
        assert_eq!(AggregateStatus::PartialFailure.exit_code(), 1);
        assert_eq!(AggregateStatus::AllFailed.exit_code(), 2);
    }

    #[test]
    fn test_state_transitions() {
        let mut state = PackageState::Pending;
        state.start().unwrap();
        assert_eq!(state, PackageState::Running);
        assert!(state.start().is_err());
        state.finish(InstallStatus::Success).unwrap();
        assert!(state.is_finished());
        assert!(state.finish(InstallStatus::Success).is_err());
    }

    #[test]
    fn test_pending_can_only_finish_as_not_attempted() {
        let mut state = PackageState::Pending;
        assert!(state.finish(InstallStatus::Success).is_err());
        assert_eq!(state, PackageState::Pending);

        state
            .finish(InstallStatus::failed(FailureReason::NotAttempted))
            .unwrap();
        assert!(state.is_finished());
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::Exit { code: 100 }.to_string(), "exit=100");
        assert_eq!(
            FailureReason::Timeout {
                after: Duration::from_secs(300)
            }
            .to_string(),
            "timeout after 300s"
        );
        assert_eq!(FailureReason::NotAttempted.to_string(), "not attempted");
    }
}
