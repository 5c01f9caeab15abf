use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppError, Result};

/// OKX REST API 通用响应信封
///
/// 所有行情接口返回 `{"code":"0","msg":"","data":[...]}`，
/// code 非 "0" 表示接口层错误。
#[derive(Debug, Clone, Deserialize)]
pub struct OkxEnvelope<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Vec<T>,
}

impl<T> OkxEnvelope<T> {
    /// 校验接口返回码，错误时携带 code/msg
    pub fn into_data(self) -> Result<Vec<T>> {
        if self.code != "0" {
            return Err(AppError::ApiError(format!(
                "OKX API返回错误: code={}, msg={}",
                self.code, self.msg
            )));
        }
        Ok(self.data)
    }
}

/// 单个价格观测点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// 价格预警事件
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub symbol: String,
    pub current_price: f64,
    pub past_price: f64,
    pub change_percent: f64,
    pub alert_time: DateTime<Utc>,
    pub monitor_period: Duration,
}

/// 已完结的K线（OHLCV）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub interval: String,
    /// 开盘时间（毫秒时间戳）
    pub open_time_ms: i64,
    /// 收盘时间 = 开盘时间 + 周期
    pub close_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// 从OKX行情数组行解析K线
    ///
    /// 现货K线行格式: [ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]，
    /// 指数/标记价格行缺少成交量字段，只有 [ts, o, h, l, c, confirm]。
    /// 成交量仅在行携带时解析，否则记 0。
    pub fn from_okx_row(symbol: &str, interval: &str, row: &[String]) -> Result<Self> {
        if row.len() < 5 {
            return Err(AppError::ParseError(format!(
                "K线数据格式不正确: {} 字段不足", symbol
            )));
        }

        let open_time_ms: i64 = row[0]
            .parse()
            .map_err(|e| AppError::ParseError(format!("解析时间戳失败: {}", e)))?;
        let open: f64 = row[1]
            .parse()
            .map_err(|e| AppError::ParseError(format!("解析开盘价失败: {}", e)))?;
        let high: f64 = row[2]
            .parse()
            .map_err(|e| AppError::ParseError(format!("解析最高价失败: {}", e)))?;
        let low: f64 = row[3]
            .parse()
            .map_err(|e| AppError::ParseError(format!("解析最低价失败: {}", e)))?;
        let close: f64 = row[4]
            .parse()
            .map_err(|e| AppError::ParseError(format!("解析收盘价失败: {}", e)))?;

        // 行尾是confirm标志，中间第6列（如果有）才是成交量
        let volume = if row.len() >= 7 {
            row[5].parse().unwrap_or(0.0)
        } else {
            0.0
        };

        let period_ms = interval_to_milliseconds(interval);

        Ok(Self {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            open_time_ms,
            close_time_ms: open_time_ms + period_ms,
            open,
            high,
            low,
            close,
            volume,
        })
    }

    /// confirm字段为 "1" 表示K线已完结
    pub fn row_is_confirmed(row: &[String]) -> bool {
        row.last().map(|s| s == "1").unwrap_or(false)
    }
}

/// 交易信号方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    Long,
    Short,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Long => "LONG",
            SignalType::Short => "SHORT",
        }
    }
}

/// 唐奇安通道突破信号
#[derive(Debug, Clone)]
pub struct TradingSignal {
    pub symbol: String,
    pub signal_type: SignalType,
    /// 触发K线的收盘价
    pub price: f64,
    pub volume: f64,
    pub volume_ratio: f64,
    pub donchian_upper: f64,
    pub donchian_lower: f64,
    pub atr_value: f64,
    pub atr_slope: f64,
    pub consolidation_bars: usize,
    /// 突破幅度（收盘价越过通道边界的距离）
    pub breakout_amplitude: f64,
    /// 信号强度 0-100
    pub strength: f64,
    /// 触发时间 = K线收盘时间（毫秒）
    pub trigger_time_ms: i64,
    /// K线开盘时间（毫秒）
    pub kline_time_ms: i64,
}

/// 唐奇安通道
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DonchianChannel {
    pub upper: f64,
    pub lower: f64,
    pub middle: f64,
}

impl DonchianChannel {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// ATR计算结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtrData {
    pub value: f64,
    /// 最近45个ATR值的线性回归斜率
    pub slope: f64,
}

/// 将时间间隔转换为毫秒数
/// 例如: "1m" -> 60000, "15m" -> 900000, "1H" -> 3600000
pub fn interval_to_milliseconds(interval: &str) -> i64 {
    let last_char = interval.chars().last().unwrap_or('m');
    let value: i64 = interval[..interval.len().saturating_sub(1)]
        .parse()
        .unwrap_or(1);

    match last_char {
        'm' => value * 60 * 1000,
        'H' | 'h' => value * 60 * 60 * 1000,
        'D' | 'd' => value * 24 * 60 * 60 * 1000,
        'W' | 'w' => value * 7 * 24 * 60 * 60 * 1000,
        _ => value * 60 * 1000,
    }
}

/// 时间间隔对应的Duration
pub fn interval_to_duration(interval: &str) -> Duration {
    Duration::from_millis(interval_to_milliseconds(interval) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_to_milliseconds() {
        assert_eq!(interval_to_milliseconds("1m"), 60_000);
        assert_eq!(interval_to_milliseconds("15m"), 900_000);
        assert_eq!(interval_to_milliseconds("1H"), 3_600_000);
        assert_eq!(interval_to_milliseconds("4h"), 14_400_000);
        assert_eq!(interval_to_milliseconds("1D"), 86_400_000);
    }

    #[test]
    fn test_candle_from_spot_row() {
        let row: Vec<String> = ["1700000000000", "100.1", "101.2", "99.8", "100.9", "523.4", "52743.1", "52743.1", "1"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let candle = Candle::from_okx_row("BTC-USDT", "15m", &row).unwrap();
        assert_eq!(candle.open_time_ms, 1_700_000_000_000);
        assert_eq!(candle.close_time_ms, 1_700_000_000_000 + 900_000);
        assert_eq!(candle.volume, 523.4);
        assert!(Candle::row_is_confirmed(&row));
    }

    #[test]
    fn test_candle_from_index_row_without_volume() {
        // 指数K线行没有成交量列，confirm紧跟在收盘价后
        let row: Vec<String> = ["1700000000000", "100.0", "101.0", "99.0", "100.5", "0"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let candle = Candle::from_okx_row("BTC-USDT", "5m", &row).unwrap();
        assert_eq!(candle.volume, 0.0);
        assert!(!Candle::row_is_confirmed(&row));
    }

    #[test]
    fn test_candle_row_too_short() {
        let row: Vec<String> = ["1700000000000", "100.0"].iter().map(|s| s.to_string()).collect();
        assert!(Candle::from_okx_row("BTC-USDT", "1m", &row).is_err());
    }

    #[test]
    fn test_envelope_error_code() {
        let env: OkxEnvelope<Vec<String>> = OkxEnvelope {
            code: "50011".to_string(),
            msg: "rate limit".to_string(),
            data: vec![],
        };
        assert!(env.into_data().is_err());
    }
}
