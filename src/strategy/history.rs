use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::NetworkConfig;
use crate::error::{AppError, Result};
use crate::models::{Candle, OkxEnvelope};
use crate::sentry::fetcher::{build_http_client, OKX_REST_ENDPOINT};

/// 相邻品种请求之间的限速间隔（接口限速10次/2s）
const PER_SYMBOL_PAUSE: Duration = Duration::from_millis(200);

/// 历史K线获取器
///
/// 策略启动前的一次性引导：为每个品种拉取最近N根已完结K线。
/// 使用携带成交量的现货K线接口；接口按从新到旧返回，
/// 入缓冲区前反转为从旧到新。
pub struct HistoryFetcher {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HistoryFetcher {
    pub fn new(network: &NetworkConfig) -> Result<Self> {
        Ok(Self {
            http_client: build_http_client(network)?,
            endpoint: OKX_REST_ENDPOINT.to_string(),
        })
    }

    /// 拉取单个品种的历史K线（从旧到新排序）
    pub async fn fetch_history(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v5/market/candles?instId={}&bar={}&limit={}",
            self.endpoint, symbol, interval, limit
        );

        info!(symbol, interval, limit, "📊 获取历史K线数据");

        let response = self
            .http_client
            .get(&url)
            .header("User-Agent", "okx-sentry/0.3")
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::ApiError(format!(
                "HTTP响应错误: {}",
                response.status()
            )));
        }

        let envelope: OkxEnvelope<Vec<String>> = response.json().await?;
        let rows = envelope.into_data()?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in &rows {
            match Candle::from_okx_row(symbol, interval, row) {
                Ok(candle) => candles.push(candle),
                Err(e) => {
                    debug!(symbol, "解析历史K线数据失败: {}", e);
                }
            }
        }

        // 接口从新到旧，反转为从旧到新
        candles.reverse();

        info!(
            symbol,
            requested = limit,
            received = candles.len(),
            "✅ 历史K线数据获取完成"
        );

        Ok(candles)
    }

    /// 批量拉取多个品种，单品种失败记日志后继续
    pub async fn fetch_all(
        &self,
        symbols: &[String],
        interval: &str,
        limit: usize,
    ) -> HashMap<String, Vec<Candle>> {
        let mut result = HashMap::new();

        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(PER_SYMBOL_PAUSE).await;
            }

            match self.fetch_history(symbol, interval, limit).await {
                Ok(candles) => {
                    if candles.is_empty() {
                        warn!(symbol = %symbol, "⚠️ 历史数据为空");
                    }
                    result.insert(symbol.clone(), candles);
                }
                Err(e) => {
                    error!(symbol = %symbol, "获取历史K线失败: {}", e);
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_reversed_to_oldest_first() {
        // 模拟接口从新到旧的返回顺序
        let raw = r#"{
            "code": "0",
            "msg": "",
            "data": [
                ["1700001800000", "101.0", "102.0", "100.5", "101.5", "20.0", "2030", "2030", "1"],
                ["1700000900000", "100.5", "101.5", "100.0", "101.0", "15.0", "1515", "1515", "1"],
                ["1700000000000", "100.0", "101.0", "99.5", "100.5", "10.0", "1005", "1005", "1"]
            ]
        }"#;

        let envelope: OkxEnvelope<Vec<String>> = serde_json::from_str(raw).unwrap();
        let rows = envelope.into_data().unwrap();

        let mut candles: Vec<Candle> = rows
            .iter()
            .map(|row| Candle::from_okx_row("BTC-USDT", "15m", row).unwrap())
            .collect();
        candles.reverse();

        assert_eq!(candles.len(), 3);
        assert!(candles.windows(2).all(|w| w[0].open_time_ms < w[1].open_time_ms));
        assert_eq!(candles[0].open_time_ms, 1_700_000_000_000);
        // 现货接口携带成交量
        assert_eq!(candles[0].volume, 10.0);
    }

    #[test]
    fn test_empty_data_yields_empty_vec() {
        let raw = r#"{"code": "0", "msg": "", "data": []}"#;
        let envelope: OkxEnvelope<Vec<String>> = serde_json::from_str(raw).unwrap();
        assert!(envelope.into_data().unwrap().is_empty());
    }
}
