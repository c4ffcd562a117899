use clap::{ArgAction, Parser, Subcommand};
use sharedfolders_lib::config::DEFAULT_CONFIG_FILE;
use sharedfolders_lib::logging::{LogConfig, SizeRotatingWriter};
use sharedfolders_lib::{
    dirs, load_shared_folders_configuration, run_all, Command, FolderManager, PendingRemovals,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

/// 在本地目录、暂存镜像和云端之间同步共享文件夹
#[derive(Parser, Debug)]
#[command(name = "sharedfolders")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// 只处理指定的文件夹（可重复）
    #[arg(long, value_name = "NAME", global = true)]
    only: Vec<String>,

    /// 跳过 rewrite / pull 的确认提示
    #[arg(short, long, global = true)]
    yes: bool,

    /// 输出更详细的日志（-v 为 debug，-vv 为 trace）
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Verb,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    /// 云端 → 暂存
    Fetch,
    /// 暂存 → 本地（覆盖本地文件）
    Rewrite,
    /// fetch 后 rewrite
    Pull,
    /// 本地 → 暂存
    Stage,
    /// 暂存 → 云端
    Push,
    /// stage 后 push
    Dump,
}

impl From<Verb> for Command {
    fn from(verb: Verb) -> Self {
        match verb {
            Verb::Fetch => Command::Fetch,
            Verb::Rewrite => Command::Rewrite,
            Verb::Pull => Command::Pull,
            Verb::Stage => Command::Stage,
            Verb::Push => Command::Push,
            Verb::Dump => Command::Dump,
        }
    }
}

/// 配置错误的退出码
const EXIT_CONFIG_ERROR: u8 = 2;

/// 初始化日志系统，返回的 guard 在退出前不能丢弃
fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(config.tracing_level().into());
    for directive in ["opendal=warn", "hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    let mut guard = None;
    let file_layer = if config.enabled {
        match SizeRotatingWriter::new(&config.log_dir(), config.max_size_mb) {
            Ok(writer) => {
                let (non_blocking, worker_guard) = tracing_appender::non_blocking(writer.make_writer());
                guard = Some(worker_guard);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_thread_names(false),
                )
            }
            Err(e) => {
                eprintln!("无法创建日志文件，仅输出到控制台: {}", e);
                None
            }
        }
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    guard
}

/// 询问用户是否继续，只有输入 y / yes 时返回 true
fn confirm(command: Command, names: &[&str]) -> io::Result<bool> {
    let mut stderr = io::stderr();
    write!(
        stderr,
        "{} 会用暂存区的内容覆盖本地文件夹 [{}]，继续吗？[y/N] ",
        command,
        names.join(", ")
    )?;
    stderr.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = Command::from(cli.command);

    let log_config = LogConfig::load(&cli.config).with_verbosity(cli.verbose);
    let _guard = init_logging(&log_config);

    // 1. 加载配置
    let app_config = match load_shared_folders_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("加载配置失败 ({}): {:#}", cli.config.display(), e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let mut folders = app_config.folders;
    if !cli.only.is_empty() {
        if let Some(unknown) = cli
            .only
            .iter()
            .find(|name| !folders.iter().any(|f| f.name() == name.as_str()))
        {
            error!("配置中没有名为 {} 的共享文件夹", unknown);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
        folders.retain(|f| cli.only.iter().any(|name| name == f.name()));
    }

    // 2. 重试上次没删掉的文件
    let state_dir = app_config.state_dir.unwrap_or_else(dirs::data_dir);
    let pending = match PendingRemovals::load(&state_dir) {
        Ok(pending) => Arc::new(pending),
        Err(e) => {
            error!("加载待删除列表失败: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = pending.retry_all() {
        warn!("重试删除失败: {:#}", e);
    }

    // 3. 为每个文件夹创建管理器
    let mut managers = Vec::with_capacity(folders.len());
    for config in folders {
        match FolderManager::from_config(config, pending.clone()) {
            Ok(manager) => managers.push(manager),
            Err(e) => {
                error!("{}", e);
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        }
    }

    if command.is_destructive() && !cli.yes {
        let names: Vec<&str> = managers.iter().map(|m| m.name()).collect();
        match confirm(command, &names) {
            Ok(true) => {}
            Ok(false) => {
                info!("已取消 {}", command);
                return ExitCode::FAILURE;
            }
            Err(e) => {
                error!("读取确认输入失败: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    // 4. 执行
    let summary = run_all(&managers, command).await;
    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        for (name, e) in &summary.failed {
            eprintln!("{} 失败: {:#}", name, e);
        }
        ExitCode::FAILURE
    }
}
