use chat_proxy::{AppError, load_config_from, start_server};
use clap::Parser;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Proxy for multi-provider chat, image, and video generation
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Override the listen host from the configuration
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port from the configuration
    #[arg(long)]
    port: Option<u16>,
}

/// 主函数 - 代理服务的入口点
///
/// 负责初始化日志系统、加载配置并启动HTTP服务器
#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    // 加载配置文件和环境变量配置
    let mut config = load_config_from(Some(&cli.config))
        .map_err(|e| AppError::Config(format!("加载配置失败: {}", e)))?;

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    // 初始化结构化日志系统
    init_tracing(&config.logging.format)?;

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        "Configuration loaded successfully"
    );

    // 启动HTTP服务器，监听指定地址和端口
    start_server(config).await?;

    Ok(())
}

/// 初始化结构化日志系统
///
/// 配置tracing和tracing-subscriber，支持：
/// - 结构化JSON或pretty日志输出
/// - 环境变量控制日志级别
/// - 请求ID传播和追踪
fn init_tracing(format: &str) -> Result<(), AppError> {
    // 从环境变量获取日志级别，默认为info
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chat_proxy=info,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format {
        "json" => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                    .json(),
            )
            .try_init(),
        "pretty" => registry.with(fmt::layer().with_target(true).pretty()).try_init(),
        _ => registry.with(fmt::layer().with_target(false).compact()).try_init(),
    };

    result.map_err(|e| AppError::Config(format!("Failed to initialize tracing: {}", e)))?;

    tracing::info!("Structured logging system initialized");
    Ok(())
}
