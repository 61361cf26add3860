//! 子进程执行：超时、stderr 尾部收集、进程组终止

use super::parser::clean_terminal_output;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;

/// 取消令牌，替代全局取消标志；克隆后共享同一状态
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// 请求取消：不再启动新的安装，正在运行的进程会被终止
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// 等待直到被取消
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// 单次执行的参数
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub timeout: Duration,
    /// SIGTERM 之后等待多久再发 SIGKILL
    pub grace: Duration,
    /// 失败诊断保留的 stderr 行数
    pub tail_lines: usize,
    /// 是否把子进程 stdout 透传到终端
    pub show_output: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            grace: Duration::from_secs(5),
            tail_lines: 20,
            show_output: false,
        }
    }
}

/// 子进程如何结束
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    TimedOut,
    Cancelled,
}

impl Termination {
    fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Termination::Exited(code),
            None => Termination::Signaled(status.signal().unwrap_or(0)),
        }
    }
}

/// 命令输出结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub termination: Termination,
    pub stderr_tail: Vec<String>,
}

/// 启动失败
#[derive(Debug)]
pub enum SpawnError {
    /// 只影响当前包（命令不存在、无执行权限等）
    Package(String),
    /// 系统已无法创建进程，继续尝试没有意义
    Fatal(std::io::Error),
}

/// 资源耗尽类错误视为致命，其余只算当前包失败
pub fn classify_spawn_error(err: std::io::Error) -> SpawnError {
    match err.raw_os_error() {
        Some(libc::EAGAIN) | Some(libc::ENOMEM) | Some(libc::EMFILE) | Some(libc::ENFILE) => {
            SpawnError::Fatal(err)
        }
        _ => SpawnError::Package(err.to_string()),
    }
}

/// 执行一条安装命令
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        argv: &[String],
        options: &ExecOptions,
        cancel: &CancelToken,
    ) -> Result<ExecOutput, SpawnError>;
}

/// 真实子进程执行器
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

/// 向整个进程组发送信号
fn signal_group(pgid: u32, signal: libc::c_int) {
    unsafe {
        libc::kill(-(pgid as i32), signal);
    }
}

/// 终止阶梯：SIGTERM → 等待 grace → SIGKILL
async fn terminate_group(child: &mut Child, pgid: Option<u32>, grace: Duration) {
    if let Some(pgid) = pgid {
        signal_group(pgid, libc::SIGTERM);
    }
    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
        return;
    }
    log::warn!("子进程 {:?} 在 {:?} 内未退出，发送 SIGKILL", pgid, grace);
    if let Some(pgid) = pgid {
        signal_group(pgid, libc::SIGKILL);
    }
    let _ = child.kill().await;
}

/// 逐行读取 stderr，只保留最后 `limit` 行
async fn collect_tail(stderr: Option<ChildStderr>, limit: usize) -> Vec<String> {
    let mut tail = VecDeque::new();
    let Some(stderr) = stderr else {
        return Vec::new();
    };

    let mut segments = BufReader::new(stderr).split(b'\n');
    while let Ok(Some(segment)) = segments.next_segment().await {
        let cleaned = clean_terminal_output(&String::from_utf8_lossy(&segment));
        if cleaned.trim().is_empty() {
            continue;
        }
        log::debug!("stderr: {}", cleaned);
        if limit == 0 {
            continue;
        }
        if tail.len() == limit {
            tail.pop_front();
        }
        tail.push_back(cleaned);
    }

    tail.into_iter().collect()
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        argv: &[String],
        options: &ExecOptions,
        cancel: &CancelToken,
    ) -> Result<ExecOutput, SpawnError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(SpawnError::Package("命令不能为空".to_string()));
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(if options.show_output {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        unsafe {
            cmd.pre_exec(|| {
                // 独立进程组，超时或取消时可以一并杀死 sudo + 包管理器整棵进程树
                libc::setpgid(0, 0);
                #[cfg(target_os = "linux")]
                libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(classify_spawn_error)?;
        let pgid = child.id();
        log::debug!("已启动 {:?} (pid={:?})", argv, pgid);

        let stderr = child.stderr.take();
        let mut tail_task = tokio::spawn(collect_tail(stderr, options.tail_lines));

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = tokio::time::sleep(options.timeout) => Waited::TimedOut,
            _ = cancel.cancelled() => Waited::Cancelled,
        };

        let termination = match waited {
            Waited::Exited(Ok(status)) => Termination::from_status(status),
            Waited::Exited(Err(e)) => {
                return Err(SpawnError::Package(format!("等待子进程失败: {}", e)));
            }
            Waited::TimedOut => {
                log::warn!("{} 超时 ({:?})，终止进程组", program, options.timeout);
                terminate_group(&mut child, pgid, options.grace).await;
                Termination::TimedOut
            }
            Waited::Cancelled => {
                terminate_group(&mut child, pgid, options.grace).await;
                Termination::Cancelled
            }
        };

        // 后台孙进程可能仍持有 stderr，不能无限等待
        let stderr_tail = match tokio::time::timeout(options.grace, &mut tail_task).await {
            Ok(Ok(tail)) => tail,
            _ => {
                tail_task.abort();
                Vec::new()
            }
        };

        Ok(ExecOutput {
            termination,
            stderr_tail,
        })
    }
}
