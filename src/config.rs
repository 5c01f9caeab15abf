use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::interval_to_milliseconds;

/// 支持订阅的K线周期
pub const SUPPORTED_INTERVALS: [&str; 11] = [
    "1m", "3m", "5m", "15m", "30m", "1H", "2H", "4H", "6H", "12H", "1D",
];

/// 主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub alert: AlertConfig,
    pub fetch: FetchConfig,
    pub network: NetworkConfig,
    pub redis: RedisConfig,
    pub dingtalk: DingTalkConfig,
    pub pushplus: PushPlusConfig,
    pub strategy: StrategyConfig,
    pub database: DatabaseConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// 价格预警配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// 触发预警的涨跌幅阈值（百分比），大于0时启用预警管线
    pub threshold: f64,
    /// 监控周期（秒）：滑动窗口视野，同时也是去重冷却时间
    pub monitor_period: u64,
}

impl AlertConfig {
    pub fn monitor_period(&self) -> Duration {
        Duration::from_secs(self.monitor_period)
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            monitor_period: 300,
        }
    }
}

/// 行情拉取配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// ticker轮询间隔（秒）
    pub interval: u64,
}

impl FetchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { interval: 60 }
    }
}

/// 网络配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// 出站HTTP(S)代理，如 http://127.0.0.1:7890，留空表示直连
    pub proxy: String,
    /// HTTP请求超时（秒）
    pub timeout: u64,
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: String::new(),
            timeout: 30,
        }
    }
}

/// Redis二级存储配置（留空url表示纯内存模式）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub password: String,
    pub db: i64,
}

impl RedisConfig {
    /// 拼接redis连接串，兼容 host:port 简写
    pub fn connection_url(&self) -> String {
        let base = if self.url.starts_with("redis://") || self.url.starts_with("rediss://") {
            self.url.clone()
        } else {
            format!("redis://{}", self.url)
        };

        if self.password.is_empty() && self.db == 0 {
            return base;
        }

        let stripped = base
            .trim_start_matches("redis://")
            .trim_start_matches("rediss://");
        if self.password.is_empty() {
            format!("redis://{}/{}", stripped, self.db)
        } else {
            format!("redis://:{}@{}/{}", self.password, stripped, self.db)
        }
    }
}

/// 钉钉通知配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DingTalkConfig {
    pub webhook_url: String,
    pub secret: String,
}

/// PushPlus通知配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PushPlusConfig {
    pub user_token: String,
    /// 好友令牌，多人用逗号分隔
    pub to: String,
}

/// 策略配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub donchian: DonchianConfig,
}

/// 唐奇安通道策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DonchianConfig {
    pub enabled: bool,
    pub symbols: Vec<String>,
    pub interval: String,
    pub donchian_length: usize,
    pub donchian_offset: usize,
    pub atr_length: usize,
    pub consolidation_bars: usize,
    pub volume_multiplier: f64,
    pub min_signal_strength: f64,
}

impl Default for DonchianConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            symbols: vec!["BTC-USDT".to_string(), "ETH-USDT".to_string()],
            interval: "15m".to_string(),
            donchian_length: 20,
            donchian_offset: 1,
            atr_length: 14,
            consolidation_bars: 15,
            volume_multiplier: 1.5,
            min_signal_strength: 60.0,
        }
    }
}

impl DonchianConfig {
    /// 信号检测所需的最小K线数量
    pub fn required_bars(&self) -> usize {
        self.consolidation_bars + self.donchian_length + self.donchian_offset + self.atr_length + 45
    }

    /// 历史数据初始化拉取数量（额外10根作为缓冲）
    pub fn history_limit(&self) -> usize {
        self.consolidation_bars + self.donchian_length + self.atr_length + 10
    }
}

/// 信号存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/sentry.db".to_string(),
        }
    }
}

impl Config {
    /// 从TOML文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(AppError::IoError)?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| AppError::ConfigError(format!("解析配置文件失败: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.alert.threshold < 0.0 {
            return Err(AppError::ConfigError(
                "alert.threshold 不能为负数".to_string(),
            ));
        }

        if self.alert.monitor_period == 0 {
            return Err(AppError::ConfigError(
                "alert.monitor_period 必须大于0".to_string(),
            ));
        }

        if self.fetch.interval == 0 {
            return Err(AppError::ConfigError(
                "fetch.interval 必须大于0".to_string(),
            ));
        }

        let donchian = &self.strategy.donchian;
        if donchian.enabled {
            if donchian.symbols.is_empty() {
                return Err(AppError::ConfigError(
                    "strategy.donchian.symbols 不能为空".to_string(),
                ));
            }

            if !SUPPORTED_INTERVALS.contains(&donchian.interval.as_str()) {
                return Err(AppError::ConfigError(format!(
                    "无效的K线周期: {}",
                    donchian.interval
                )));
            }

            if interval_to_milliseconds(&donchian.interval) <= 0 {
                return Err(AppError::ConfigError(format!(
                    "无效的K线周期: {}",
                    donchian.interval
                )));
            }

            if donchian.donchian_length == 0 || donchian.atr_length == 0 {
                return Err(AppError::ConfigError(
                    "donchian_length/atr_length 必须大于0".to_string(),
                ));
            }

            if donchian.volume_multiplier <= 0.0 {
                return Err(AppError::ConfigError(
                    "volume_multiplier 必须大于0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.alert.threshold, 3.0);
        assert_eq!(config.alert.monitor_period(), Duration::from_secs(300));
        assert_eq!(config.fetch.interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_toml() {
        let raw = r#"
            [alert]
            threshold = 5.0
            monitor_period = 600

            [strategy.donchian]
            enabled = true
            symbols = ["BTC-USDT"]
            interval = "5m"
        "#;

        let config: Config = toml::from_str(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.alert.threshold, 5.0);
        assert!(config.strategy.donchian.enabled);
        // 未给出的字段落到默认值
        assert_eq!(config.strategy.donchian.donchian_length, 20);
        assert_eq!(config.network.timeout, 30);
    }

    #[test]
    fn test_invalid_interval_rejected() {
        let mut config = Config::default();
        config.strategy.donchian.enabled = true;
        config.strategy.donchian.interval = "7m".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_required_bars() {
        let donchian = DonchianConfig {
            consolidation_bars: 15,
            donchian_length: 15,
            donchian_offset: 1,
            atr_length: 7,
            ..DonchianConfig::default()
        };
        assert_eq!(donchian.required_bars(), 15 + 15 + 1 + 7 + 45);
        assert_eq!(donchian.history_limit(), 15 + 15 + 7 + 10);
    }

    #[test]
    fn test_redis_connection_url() {
        let mut redis = RedisConfig {
            url: "localhost:6379".to_string(),
            ..RedisConfig::default()
        };
        assert_eq!(redis.connection_url(), "redis://localhost:6379");

        redis.db = 2;
        assert_eq!(redis.connection_url(), "redis://localhost:6379/2");

        redis.password = "secret".to_string();
        assert_eq!(redis.connection_url(), "redis://:secret@localhost:6379/2");
    }
}
