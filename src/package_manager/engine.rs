//! 批量安装引擎
//!
//! 按输入顺序逐个安装；单个包失败只记录在报告中，不会中止整个运行。
//! `jobs > 1` 时最多同时运行 `jobs` 个安装进程，报告仍按输入顺序排列。

use super::parser::{resolve_argv, validate_name, CommandTemplate};
use super::streaming::{CancelToken, CommandRunner, ExecOptions, SpawnError, Termination};
use super::types::{
    FailureReason, InstallResult, InstallStatus, PackageSpec, PackageState, RunReport,
};
use crate::error::{ConfigError, EngineFatal, EXIT_ENGINE_FATAL};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};

/// 已校验、已解析出参数向量的安装任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInstall {
    pub spec: PackageSpec,
    pub argv: Vec<String>,
}

/// 运行过程中推送给输出端的事件
#[derive(Debug, Clone)]
pub enum RunEvent {
    Started {
        index: usize,
        name: String,
        argv: Vec<String>,
    },
    Finished {
        index: usize,
        result: InstallResult,
    },
}

/// 一次运行的最终产物
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub fatal: Option<EngineFatal>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        if self.fatal.is_some() {
            EXIT_ENGINE_FATAL
        } else {
            self.report.aggregate().exit_code()
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub exec: ExecOptions,
    /// 并发安装数，1 为顺序执行
    pub jobs: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            exec: ExecOptions::default(),
            jobs: 1,
        }
    }
}

pub struct BulkInstaller<R: CommandRunner + 'static> {
    runner: Arc<R>,
    template: CommandTemplate,
    options: EngineOptions,
}

/// 单个任务的返回：结果 + 可能的致命错误
struct Attempt {
    index: usize,
    result: InstallResult,
    fatal: Option<EngineFatal>,
}

impl<R: CommandRunner + 'static> BulkInstaller<R> {
    pub fn new(runner: R, template: CommandTemplate, options: EngineOptions) -> Self {
        Self {
            runner: Arc::new(runner),
            template,
            options,
        }
    }

    pub fn template(&self) -> &CommandTemplate {
        &self.template
    }

    /// 校验全部输入并解析命令；任何一项无效都会在执行前整体失败
    pub fn plan(&self, specs: Vec<PackageSpec>) -> Result<Vec<PlannedInstall>, ConfigError> {
        specs
            .into_iter()
            .map(|spec| {
                validate_name(&spec.name)?;
                let argv = resolve_argv(&spec, &self.template)?;
                Ok(PlannedInstall { spec, argv })
            })
            .collect()
    }

    /// 校验并执行
    pub async fn run(
        &self,
        specs: Vec<PackageSpec>,
        events: &mpsc::UnboundedSender<RunEvent>,
        cancel: &CancelToken,
    ) -> Result<RunOutcome, ConfigError> {
        let plan = self.plan(specs)?;
        Ok(self.execute(plan, events, cancel).await)
    }

    /// 执行已校验的计划
    pub async fn execute(
        &self,
        plan: Vec<PlannedInstall>,
        events: &mpsc::UnboundedSender<RunEvent>,
        cancel: &CancelToken,
    ) -> RunOutcome {
        let total = plan.len();
        let mut states = vec![PackageState::Pending; total];
        let mut slots: Vec<Option<InstallResult>> = vec![None; total];
        let mut fatal: Option<EngineFatal> = None;

        let semaphore = Arc::new(Semaphore::new(self.options.jobs.max(1)));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Attempt>();

        for (index, item) in plan.iter().cloned().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = cancel.cancelled() => break,
            };

            // 任务在释放许可之前发送结果，此处一定能看到已完成的任务
            while let Ok(attempt) = done_rx.try_recv() {
                record(attempt, &mut states, &mut slots, &mut fatal);
            }
            if fatal.is_some() || cancel.is_cancelled() {
                break;
            }

            if let Err(e) = states[index].start() {
                log::error!("{}: {}", item.spec.name, e);
            }
            let _ = events.send(RunEvent::Started {
                index,
                name: item.spec.name.clone(),
                argv: item.argv.clone(),
            });

            let runner = Arc::clone(&self.runner);
            let options = self.options.exec.clone();
            let cancel = cancel.clone();
            let events = events.clone();
            let done_tx = done_tx.clone();
            tokio::spawn(async move {
                let attempt = attempt_install(&*runner, index, item, &options, &cancel).await;
                let _ = events.send(RunEvent::Finished {
                    index,
                    result: attempt.result.clone(),
                });
                let _ = done_tx.send(attempt);
                drop(permit);
            });
        }

        drop(done_tx);
        while let Some(attempt) = done_rx.recv().await {
            record(attempt, &mut states, &mut slots, &mut fatal);
        }

        // 未启动的包一律标记为 NotAttempted，报告中不会遗漏任何包
        let results = plan
            .into_iter()
            .zip(slots)
            .zip(states.iter_mut())
            .enumerate()
            .map(|(index, ((item, slot), state))| match slot {
                Some(result) => result,
                None => {
                    let result = InstallResult::not_attempted(item.spec, item.argv);
                    if let Err(e) = state.finish(result.status.clone()) {
                        log::error!("{}: {}", result.package.name, e);
                    }
                    let _ = events.send(RunEvent::Finished {
                        index,
                        result: result.clone(),
                    });
                    result
                }
            })
            .collect();
        debug_assert!(states.iter().all(PackageState::is_finished));

        RunOutcome {
            report: RunReport::new(results, cancel.is_cancelled()),
            fatal,
        }
    }
}

/// 唯一写入报告槽位的地方
fn record(
    attempt: Attempt,
    states: &mut [PackageState],
    slots: &mut [Option<InstallResult>],
    fatal: &mut Option<EngineFatal>,
) {
    let Attempt {
        index,
        result,
        fatal: attempt_fatal,
    } = attempt;

    if let Err(e) = states[index].finish(result.status.clone()) {
        log::error!("{}: {}", result.package.name, e);
    }
    slots[index] = Some(result);

    if let Some(err) = attempt_fatal {
        log::error!("{}", err);
        fatal.get_or_insert(err);
    }
}

/// 执行单个包的安装并分类结果
async fn attempt_install<R: CommandRunner + ?Sized>(
    runner: &R,
    index: usize,
    item: PlannedInstall,
    options: &ExecOptions,
    cancel: &CancelToken,
) -> Attempt {
    let PlannedInstall { spec, argv } = item;
    let start = Instant::now();
    log::info!("安装 {}: {:?}", spec.name, argv);

    let (status, fatal) = match runner.run(&argv, options, cancel).await {
        Ok(output) => {
            let reason = match output.termination {
                Termination::Exited(0) => None,
                Termination::Exited(code) => Some(FailureReason::Exit { code }),
                Termination::Signaled(signal) => Some(FailureReason::Signal { signal }),
                Termination::TimedOut => Some(FailureReason::Timeout {
                    after: options.timeout,
                }),
                Termination::Cancelled => Some(FailureReason::Cancelled),
            };
            let status = match reason {
                None => InstallStatus::Success,
                Some(reason) => InstallStatus::Failed {
                    reason,
                    stderr_tail: output.stderr_tail,
                },
            };
            (status, None)
        }
        Err(SpawnError::Package(message)) => {
            (InstallStatus::failed(FailureReason::Spawn { message }), None)
        }
        Err(SpawnError::Fatal(source)) => {
            let status = InstallStatus::failed(FailureReason::Spawn {
                message: source.to_string(),
            });
            let fatal = EngineFatal {
                package: spec.name.clone(),
                source,
            };
            (status, Some(fatal))
        }
    };

    let duration = start.elapsed();
    match &status {
        InstallStatus::Success => log::info!("{} 安装成功，用时 {:?}", spec.name, duration),
        InstallStatus::Failed { reason, .. } => {
            log::warn!("{} 安装失败 ({})，用时 {:?}", spec.name, reason, duration)
        }
    }

    Attempt {
        index,
        result: InstallResult {
            package: spec,
            argv,
            status,
            duration,
        },
        fatal,
    }
}
