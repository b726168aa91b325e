use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

/// 主配置结构体
///
/// 包含代理服务的所有配置信息，从配置文件和环境变量加载
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// 服务器配置
    pub server: ServerConfig,
    /// 上游端点覆盖（可选，默认使用各提供商的官方地址）
    #[serde(default)]
    pub endpoints: EndpointOverrides,
    /// 日志配置（可选，有默认值）
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 视频任务轮询配置（可选，有默认值）
    #[serde(default)]
    pub poller: PollerConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_max_request_size")]
    pub max_request_size_bytes: usize,
}

/// Base-URL overrides for the upstream providers.
///
/// Production deployments leave these unset and talk to the real vendor
/// endpoints; tests point them at a mock server.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct EndpointOverrides {
    pub siliconflow: Option<String>,
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub doubao: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Video-task polling knobs. The interval matches the 2-second cadence the
/// browser client historically used; `max_attempts` bounds a loop that was
/// previously unbounded in wall-clock time.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,
}

// Default value functions
fn default_connect_timeout() -> u64 {
    10
}
fn default_max_request_size() -> usize {
    // Inbound bodies can carry base64 frames for image-to-video requests
    32 * 1024 * 1024
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_poll_interval() -> u64 {
    2
}
fn default_poll_max_attempts() -> u32 {
    900
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_poll_interval(),
            max_attempts: default_poll_max_attempts(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            connect_timeout_seconds: default_connect_timeout(),
            max_request_size_bytes: default_max_request_size(),
        }
    }
}

/// 加载配置文件和环境变量
///
/// 从config.toml文件和环境变量（前缀CHAT_PROXY_）加载配置，
/// 环境变量会覆盖配置文件中的相同设置
pub fn load_config() -> Result<Config> {
    load_config_from(Some("config.toml"))
}

/// Load configuration from an explicit file path (or defaults only).
pub fn load_config_from(path: Option<&str>) -> Result<Config> {
    let mut figment = Figment::from(figment::providers::Serialized::defaults(Config {
        server: ServerConfig::default(),
        endpoints: EndpointOverrides::default(),
        logging: LoggingConfig::default(),
        poller: PollerConfig::default(),
    }));

    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }

    let config: Config = figment
        .merge(Env::prefixed("CHAT_PROXY_").split("__"))
        .extract()
        .context("Failed to load configuration from config.toml or environment variables")?;

    config.validate().context("Configuration validation failed")?;

    Ok(config)
}

impl Config {
    /// 验证整个配置的有效性
    pub fn validate(&self) -> Result<()> {
        self.server
            .validate()
            .context("Server configuration validation failed")?;

        self.endpoints
            .validate()
            .context("Endpoint configuration validation failed")?;

        self.logging
            .validate()
            .context("Logging configuration validation failed")?;

        self.poller
            .validate()
            .context("Poller configuration validation failed")?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.connect_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Connect timeout must be greater than 0"));
        }

        if self.connect_timeout_seconds > 300 {
            return Err(anyhow::anyhow!("Connect timeout cannot exceed 300 seconds"));
        }

        if self.max_request_size_bytes == 0 {
            return Err(anyhow::anyhow!("Max request size must be greater than 0"));
        }

        // 上限100MB，图生视频请求会携带base64图片
        if self.max_request_size_bytes > 100 * 1024 * 1024 {
            return Err(anyhow::anyhow!("Max request size cannot exceed 100MB"));
        }

        Ok(())
    }
}

impl EndpointOverrides {
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("siliconflow", &self.siliconflow),
            ("openai", &self.openai),
            ("anthropic", &self.anthropic),
            ("doubao", &self.doubao),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(anyhow::anyhow!(
                        "Endpoint override for '{}' must start with http:// or https://",
                        name
                    ));
                }
            }
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level '{}': must be one of {:?}",
                self.level,
                valid_levels
            ));
        }

        let valid_formats = ["json", "pretty", "compact"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format '{}': must be one of {:?}",
                self.format,
                valid_formats
            ));
        }

        Ok(())
    }
}

impl PollerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_seconds == 0 {
            return Err(anyhow::anyhow!("Poll interval must be greater than 0"));
        }

        if self.interval_seconds > 60 {
            return Err(anyhow::anyhow!("Poll interval cannot exceed 60 seconds"));
        }

        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("Poll max attempts must be greater than 0"));
        }

        Ok(())
    }
}
