use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};
use anyhow::{Context, Result};
use std::path::Path;

/// 初始化日志系统
///
/// 指定 `log_file` 时额外按天滚动写入文件（不带颜色）；返回的 guard 必须在进程存活期间持有，
/// drop 时会刷新缓冲区。
pub fn init_logging(
    log_level: &str,
    log_format: Option<&str>,
    log_file: Option<&str>,
    quiet: bool,
) -> Result<Option<WorkerGuard>> {
    // 如果静默模式，只输出错误
    let level = if quiet {
        "error"
    } else {
        log_level
    };

    // 解析日志级别
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    // 根据格式选择不同的输出方式
    let stdout_layer = match log_format {
        // JSON 格式（适合生产环境）
        Some("json") => fmt::layer().json().boxed(),
        // Pretty 格式（适合开发环境）
        Some("pretty") | Some("dev") => fmt::layer().pretty().boxed(),
        // Compact 格式（默认）
        _ => fmt::layer().compact().boxed(),
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let path = Path::new(path);
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .context("日志文件路径缺少文件名")?;
            std::fs::create_dir_all(directory)
                .with_context(|| format!("无法创建日志目录: {:?}", directory))?;

            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = match log_format {
                Some("json") => fmt::layer().json().with_writer(writer).boxed(),
                _ => fmt::layer().with_ansi(false).with_writer(writer).boxed(),
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("日志系统已初始化")?;

    Ok(guard)
}
