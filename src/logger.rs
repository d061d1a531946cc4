use anyhow::Result;
use std::str::FromStr;
use tracing::Subscriber;
use tracing_appender::{
    non_blocking,
    non_blocking::{NonBlocking, WorkerGuard},
    rolling,
};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Target of the structured key-issuance events
pub const ISSUANCE_TARGET: &str = "issuance";

/// 日志级别枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for &'static str {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// 日志文件滚动策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Hourly,
    Daily,
}

/// 日志配置结构体
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: LogLevel,
    /// 日志文件目录
    pub log_dir: String,
    /// 日志文件名前缀
    pub file_prefix: String,
    /// 是否启用控制台输出
    pub console_output: bool,
    /// 是否启用JSON格式
    pub json_format: bool,
    pub rotation: Rotation,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            log_dir: "logs".to_string(),
            file_prefix: "dispenser".to_string(),
            console_output: true,
            json_format: false,
            rotation: Rotation::Daily,
        }
    }
}

/// Default directive: this crate, the binary and issuance events at the configured level.
fn default_directive(level: LogLevel) -> String {
    let level: &str = level.into();
    let crate_name = env!("CARGO_PKG_NAME").replace('-', "_");
    format!("{crate_name}={level},{ISSUANCE_TARGET}={level}")
}

/// 文件输出层，按配置选择 JSON 或纯文本格式
fn file_layer<S>(writer: NonBlocking, json_format: bool) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    if json_format {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

/// 初始化日志系统，返回的 guard 需要一直持有到进程退出
pub fn init_logger(config: LogConfig) -> Result<WorkerGuard> {
    // 确保日志目录存在
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = match config.rotation {
        Rotation::Hourly => rolling::hourly(&config.log_dir, &config.file_prefix),
        Rotation::Daily => rolling::daily(&config.log_dir, &config.file_prefix),
    };
    let (non_blocking_file, guard) = non_blocking(file_appender);

    // RUST_LOG 优先
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.level)));

    let console_layer = config.console_output.then(|| {
        fmt::layer()
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(true)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer(non_blocking_file, config.json_format))
        .with(console_layer)
        .try_init()?;

    Ok(guard)
}

/// 快速初始化开发环境日志
pub fn init_dev_logger() -> Result<WorkerGuard> {
    let config = LogConfig {
        level: LogLevel::Debug,
        file_prefix: "dev".to_string(),
        ..LogConfig::default()
    };
    init_logger(config)
}

/// 快速初始化生产环境日志
pub fn init_prod_logger() -> Result<WorkerGuard> {
    let config = LogConfig {
        level: LogLevel::Info,
        log_dir: "/var/log/key_dispenser".to_string(),
        file_prefix: "dispenser".to_string(),
        console_output: false,
        json_format: true,
        rotation: Rotation::Daily,
    };
    init_logger(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, error, info, warn};

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("INFO".parse::<LogLevel>(), Ok(LogLevel::Info));
        assert_eq!(" warning ".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_default_directive_covers_issuance() {
        let directive = default_directive(LogLevel::Warn);
        assert_eq!(directive, "key_dispenser=warn,issuance=warn");
    }

    fn temp_log_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("key_dispenser_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// 在局部订阅者下写入一条事件，返回文件内容
    fn capture_file_output(json_format: bool) -> String {
        let dir = temp_log_dir(if json_format { "json" } else { "plain" });
        let (writer, guard) = non_blocking(rolling::never(&dir, "capture.log"));
        let subscriber = tracing_subscriber::registry().with(file_layer(writer, json_format));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(
                target: ISSUANCE_TARGET,
                pool = "paid",
                user_id = 77,
                "Key issued"
            );
        });
        // guard 释放时刷新缓冲
        drop(guard);

        let content = std::fs::read_to_string(dir.join("capture.log")).unwrap();
        let _ = std::fs::remove_dir_all(&dir);
        content
    }

    #[test]
    fn test_json_file_layer_writes_structured_lines() {
        let content = capture_file_output(true);
        let line = content.lines().next().expect("no log line written");
        let event: serde_json::Value = serde_json::from_str(line).expect("log line is not JSON");

        assert_eq!(event["level"], "INFO");
        assert_eq!(event["target"], ISSUANCE_TARGET);
        assert_eq!(event["fields"]["message"], "Key issued");
        assert_eq!(event["fields"]["pool"], "paid");
        assert_eq!(event["fields"]["user_id"], 77);
    }

    #[test]
    fn test_plain_file_layer_writes_text_lines() {
        let content = capture_file_output(false);
        assert!(content.contains("Key issued"));
        assert!(content.contains("user_id=77"));
        assert!(serde_json::from_str::<serde_json::Value>(content.trim()).is_err());
    }

    #[tokio::test]
    async fn test_logging() {
        let dir = temp_log_dir("global");
        let config = LogConfig {
            level: LogLevel::Debug,
            log_dir: dir.to_string_lossy().into_owned(),
            file_prefix: "test".to_string(),
            console_output: false,
            ..LogConfig::default()
        };
        let _guard = init_logger(config.clone()).unwrap();

        error!("This is an error message");
        warn!("This is a warning message");
        info!("This is an info message");
        debug!("This is a debug message");

        // 测试结构化日志
        info!(
            target: ISSUANCE_TARGET,
            pool = "trial",
            user_id = 123,
            username = "@tester",
            "Key issued"
        );

        // 全局订阅者只能安装一次
        let json_config = LogConfig {
            json_format: true,
            ..config
        };
        assert!(init_logger(json_config).is_err());
    }
}
