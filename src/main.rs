mod cli;
mod config;
mod error;
mod package_manager;
mod report;
mod sysinfo;

use clap::error::ErrorKind;
use clap::Parser;
use cli::Cli;
use config::Config;
use error::{ConfigError, EXIT_ALL_SUCCEEDED, EXIT_CONFIG_ERROR, EXIT_INTERRUPTED};
use package_manager::{
    collect_specs, BulkInstaller, CancelToken, CommandTemplate, EngineOptions, ExecOptions,
    PackageManager, PlannedInstall, ProcessRunner, RunEvent, FALLBACK_TEMPLATE,
};
use report::ReportSaver;
use std::process::ExitCode;
use std::time::Duration;
use sysinfo::SystemInfo;
use tokio::sync::mpsc;

fn exit(code: i32) -> ExitCode {
    ExitCode::from(code as u8)
}

/// clap 的帮助/版本输出视为成功，其余参数错误按输入错误处理
fn cli_error_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_ALL_SUCCEEDED,
        _ => EXIT_CONFIG_ERROR,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return exit(cli_error_code(e.kind()));
        }
    };

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    // 加载配置
    let config = match Config::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return config_error(&e),
    };

    let system = SystemInfo::detect();
    let env_template = std::env::var("BULKINSTALL_TEMPLATE").ok();
    let (template, options) = match resolve_settings(&cli, &config, env_template, &system) {
        Ok(settings) => settings,
        Err(e) => return config_error(&e),
    };

    let specs = match collect_specs(&cli.files, &cli.packages) {
        Ok(specs) if specs.is_empty() => {
            return config_error(&ConfigError::Usage(
                "没有指定要安装的包，使用 --help 查看用法".to_string(),
            ))
        }
        Ok(specs) => specs,
        Err(e) => return config_error(&e),
    };
    let installer = BulkInstaller::new(ProcessRunner, template, options);

    if cli.dry_run {
        return match installer.plan(specs) {
            Ok(plan) => {
                print_plan(&plan);
                exit(EXIT_ALL_SUCCEEDED)
            }
            Err(e) => config_error(&e),
        };
    }

    let cancel = CancelToken::new();
    spawn_signal_handler(cancel.clone());

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(rx, specs.len()));

    // 所有输入先整体校验，任何错误都不会启动安装
    let result = installer.run(specs, &tx, &cancel).await;
    drop(tx);
    let _ = printer.await;
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => return config_error(&e),
    };

    println!("{}", report::format_summary(&outcome.report));
    let failed = report::failed_packages(&outcome.report);
    if !failed.is_empty() {
        log::warn!("未成功安装: {}", failed.join(" "));
    }
    if let Some(fatal) = &outcome.fatal {
        eprintln!("错误: {}", fatal);
    }

    let exit_code = outcome.exit_code();
    if cli.save_report || config.save_report {
        let saver = ReportSaver::new(config.report_dir.clone());
        match saver.save(
            &outcome.report,
            &system,
            installer.template().as_str(),
            exit_code,
        ) {
            Ok(path) => eprintln!("报告已保存: {}", path.display()),
            Err(e) => log::error!("保存报告失败: {:#}", e),
        }
    }

    exit(exit_code)
}

fn config_error(e: &ConfigError) -> ExitCode {
    eprintln!("错误: {}", e);
    exit(EXIT_CONFIG_ERROR)
}

/// 合并命令行、配置文件、环境变量与检测结果
///
/// 模板优先级：--template > 配置文件 > BULKINSTALL_TEMPLATE > 检测到的包管理器 > apt-get
fn resolve_settings(
    cli: &Cli,
    config: &Config,
    env_template: Option<String>,
    system: &SystemInfo,
) -> Result<(CommandTemplate, EngineOptions), ConfigError> {
    let template = match cli
        .template
        .clone()
        .or_else(|| config.template.clone())
        .or(env_template)
    {
        Some(template) => template,
        None => match PackageManager::detect(system) {
            Some(pm) => {
                log::info!("检测到包管理器 {} ({})", pm.name(), system.distro);
                pm.install_template
            }
            None => {
                log::warn!("未检测到包管理器，使用默认模板 {}", FALLBACK_TEMPLATE);
                FALLBACK_TEMPLATE.to_string()
            }
        },
    };
    let template = CommandTemplate::parse(&template)?;

    let timeout = cli.timeout.unwrap_or(config.timeout_secs);
    if timeout == 0 {
        return Err(ConfigError::InvalidOption {
            option: "timeout",
            reason: "必须大于 0".to_string(),
        });
    }
    let jobs = cli.jobs.unwrap_or(config.jobs);
    if jobs == 0 {
        return Err(ConfigError::InvalidOption {
            option: "jobs",
            reason: "必须大于 0".to_string(),
        });
    }
    if jobs > 1 {
        log::warn!("并发模式 (jobs={})：请确认包管理器支持同时调用", jobs);
    }

    let options = EngineOptions {
        exec: ExecOptions {
            timeout: Duration::from_secs(timeout),
            grace: Duration::from_secs(cli.grace.unwrap_or(config.grace_secs)),
            tail_lines: cli.tail.unwrap_or(config.tail_lines),
            show_output: cli.show_output || config.show_output,
        },
        jobs,
    };

    Ok((template, options))
}

fn print_plan(plan: &[PlannedInstall]) {
    for item in plan {
        println!("{}: {}", item.spec.name, item.argv.join(" "));
    }
}

/// 按完成顺序输出每个包的结果
async fn print_events(mut rx: mpsc::UnboundedReceiver<RunEvent>, total: usize) {
    while let Some(event) = rx.recv().await {
        match event {
            RunEvent::Started { index, name, argv } => {
                log::info!("[{}/{}] 开始安装 {}: {}", index + 1, total, name, argv.join(" "));
            }
            RunEvent::Finished { index, result } => {
                log::debug!("[{}/{}] {} 已结束", index + 1, total, result.package.name);
                println!("{}", report::format_result_line(&result));
                for line in report::format_stderr_tail(&result) {
                    println!("{}", line);
                }
            }
        }
    }
}

/// 第一次中断请求取消；已经在取消中再次中断时返回 true，调用方应立即退出
fn should_exit_on_interrupt(cancel: &CancelToken) -> bool {
    if cancel.is_cancelled() {
        return true;
    }
    cancel.cancel();
    false
}

/// Ctrl+C / SIGTERM：停止启动新的安装，正在运行的进程由引擎终止；
/// 再次收到信号时不再等待，直接以 130 退出
fn spawn_signal_handler(cancel: CancelToken) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let (mut interrupt, mut terminate) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(interrupt), Ok(terminate)) => (interrupt, terminate),
                (Err(e), _) | (_, Err(e)) => {
                    log::warn!("无法注册信号处理: {}", e);
                    return;
                }
            };

        loop {
            tokio::select! {
                _ = interrupt.recv() => {}
                _ = terminate.recv() => {}
            }
            if should_exit_on_interrupt(&cancel) {
                eprintln!("再次收到中断信号，立即退出");
                std::process::exit(EXIT_INTERRUPTED);
            }
            eprintln!("收到中断信号，停止启动新的安装（再次中断立即退出）...");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("bulkinstall").chain(args.iter().copied())).unwrap()
    }

    fn debian() -> SystemInfo {
        SystemInfo::from_os_release("ID=debian\n")
    }

    fn template_of(cli: &Cli, config: &Config, env: Option<&str>) -> String {
        let (template, _) =
            resolve_settings(cli, config, env.map(str::to_string), &debian()).unwrap();
        template.as_str().to_string()
    }

    #[test]
    fn test_template_precedence() {
        let config = Config {
            template: Some("dnf install -y {name}".to_string()),
            ..Config::default()
        };
        let env = Some("zypper install {name}");

        let with_flag = cli(&["--template", "apk add {name}", "curl"]);
        assert_eq!(template_of(&with_flag, &config, env), "apk add {name}");

        let without_flag = cli(&["curl"]);
        assert_eq!(template_of(&without_flag, &config, env), "dnf install -y {name}");
        assert_eq!(
            template_of(&without_flag, &Config::default(), env),
            "zypper install {name}"
        );

        // 没有显式模板时使用检测结果或 apt-get 兜底
        let detected = template_of(&without_flag, &Config::default(), None);
        assert!(detected.contains("{name}"));
    }

    #[test]
    fn test_invalid_template_is_config_error() {
        let env = Some("apt-get install".to_string());
        let err = resolve_settings(&cli(&["curl"]), &Config::default(), env, &debian()).unwrap_err();
        assert!(matches!(err, ConfigError::TemplateMissingPlaceholder { .. }));
    }

    #[test]
    fn test_zero_timeout_and_jobs_rejected() {
        let config = Config::default();
        for (args, expected) in [
            (&["--timeout", "0", "curl"][..], "timeout"),
            (&["--jobs", "0", "curl"][..], "jobs"),
        ] {
            let err = resolve_settings(&cli(args), &config, None, &debian()).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidOption { option, .. } if option == expected),
                "{:?}",
                err
            );
        }
    }

    #[test]
    fn test_cli_values_override_config() {
        let config = Config {
            timeout_secs: 60,
            jobs: 4,
            ..Config::default()
        };
        let (_, options) =
            resolve_settings(&cli(&["--timeout", "10", "curl"]), &config, None, &debian()).unwrap();
        assert_eq!(options.exec.timeout, Duration::from_secs(10));
        assert_eq!(options.jobs, 4);
    }

    #[test]
    fn test_cli_error_codes() {
        let code = |args: &[&str]| {
            let err = Cli::try_parse_from(std::iter::once("bulkinstall").chain(args.iter().copied()))
                .unwrap_err();
            cli_error_code(err.kind())
        };
        assert_eq!(code(&["--help"]), 0);
        assert_eq!(code(&["--version"]), 0);
        assert_eq!(code(&["--jobs", "many", "curl"]), 64);
        assert_eq!(code(&["--no-such-flag"]), 64);
    }

    #[test]
    fn test_second_interrupt_exits() {
        let cancel = CancelToken::new();
        assert!(!should_exit_on_interrupt(&cancel));
        assert!(cancel.is_cancelled());
        assert!(should_exit_on_interrupt(&cancel));
    }
}
