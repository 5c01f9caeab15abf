use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{FetchConfig, NetworkConfig};
use crate::error::{AppError, Result};
use crate::models::OkxEnvelope;
use crate::sentry::store::PriceStore;

/// OKX REST 基础地址
pub const OKX_REST_ENDPOINT: &str = "https://www.okx.com";

/// 报价货币后缀，预警管线只关注该计价的现货对
const QUOTE_SUFFIX: &str = "-USDT";

/// 单次拉取的最大尝试次数
const MAX_ATTEMPTS: u32 = 3;

/// 现货ticker条目（接口返回全部为字符串）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ticker {
    #[serde(rename = "instId")]
    pub inst_id: String,
    pub last: String,
    #[serde(default, rename = "open24h")]
    pub open_24h: String,
    #[serde(default, rename = "high24h")]
    pub high_24h: String,
    #[serde(default, rename = "low24h")]
    pub low_24h: String,
    #[serde(default, rename = "vol24h")]
    pub vol_24h: String,
    #[serde(default, rename = "volCcy24h")]
    pub vol_ccy_24h: String,
    #[serde(default)]
    pub ts: String,
}

/// 行情拉取器：周期性拉取全量现货ticker并写入价格存储
pub struct TickerFetcher {
    store: Arc<PriceStore>,
    http_client: reqwest::Client,
    endpoint: String,
    interval: Duration,
}

impl TickerFetcher {
    pub fn new(
        store: Arc<PriceStore>,
        network: &NetworkConfig,
        fetch: &FetchConfig,
    ) -> Result<Self> {
        Ok(Self {
            store,
            http_client: build_http_client(network)?,
            endpoint: OKX_REST_ENDPOINT.to_string(),
            interval: fetch.interval(),
        })
    }

    /// 拉取循环：立即执行一次，之后按配置周期执行，收到关停信号退出
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("🚀 行情拉取器启动，开始获取OKX现货数据");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("📴 行情拉取器已停止");
                    return;
                }
                _ = ticker.tick() => {
                    self.fetch_and_store().await;
                }
            }
        }
    }

    /// 单次拉取：失败重试耗尽后记日志等待下个周期，循环永不终止
    pub async fn fetch_and_store(&self) {
        let tickers = match self.get_tickers().await {
            Ok(tickers) => tickers,
            Err(e) => {
                error!("❌ 获取市场数据失败: {}", e);
                return;
            }
        };

        let total = tickers.len();
        let mut stored = 0;
        let now = Utc::now();

        for ticker in tickers {
            match ticker.last.parse::<f64>() {
                Ok(price) if price > 0.0 => {
                    self.store.put(&ticker.inst_id, price, now);
                    stored += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(inst_id = %ticker.inst_id, "解析价格失败: {}", e);
                }
            }
        }

        info!(total, stored, "✅ 获取到交易对数据");
    }

    /// 拉取全量现货ticker，保留USDT交易对，最多重试3次（线性退避1s/2s）
    async fn get_tickers(&self) -> Result<Vec<Ticker>> {
        let url = format!("{}/api/v5/market/tickers?instType=SPOT", self.endpoint);

        let mut last_err = AppError::ApiError("未发起请求".to_string());

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                warn!(attempt, "🔄 重试获取ticker数据");
                tokio::time::sleep(Duration::from_secs((attempt - 1) as u64)).await;
            }

            match self.try_get_tickers(&url).await {
                Ok(tickers) => {
                    debug!(
                        usdt_pairs = tickers.len(),
                        "📊 已筛选出{}计价交易对", QUOTE_SUFFIX
                    );
                    return Ok(tickers);
                }
                Err(e) => {
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    async fn try_get_tickers(&self, url: &str) -> Result<Vec<Ticker>> {
        let response = self.http_client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::ApiError(format!(
                "HTTP状态码错误: {}",
                response.status()
            )));
        }

        let envelope: OkxEnvelope<Ticker> = response.json().await?;
        let tickers = envelope.into_data()?;

        Ok(tickers
            .into_iter()
            .filter(|t| t.inst_id.ends_with(QUOTE_SUFFIX))
            .collect())
    }
}

/// 构建出站HTTP客户端：默认30秒超时，支持可选代理，TLS校验保持开启
pub fn build_http_client(network: &NetworkConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(network.timeout())
        .connect_timeout(Duration::from_secs(10));

    if !network.proxy.is_empty() {
        match reqwest::Proxy::all(&network.proxy) {
            Ok(proxy) => {
                info!("✅ 已配置HTTP代理: {}", network.proxy);
                builder = builder.proxy(proxy);
            }
            Err(e) => {
                warn!("⚠️ 代理地址格式错误，将直连: {} - {}", network.proxy, e);
            }
        }
    }

    builder
        .build()
        .map_err(|e| AppError::ApiError(format!("创建HTTP客户端失败: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_deserialization() {
        let raw = r#"{
            "code": "0",
            "msg": "",
            "data": [
                {"instId": "BTC-USDT", "last": "43521.1", "open24h": "43000", "high24h": "44000", "low24h": "42800", "vol24h": "1000", "volCcy24h": "43000000", "ts": "1700000000000"},
                {"instId": "BTC-USDC", "last": "43520.0", "ts": "1700000000000"},
                {"instId": "ETH-BTC", "last": "0.054", "ts": "1700000000000"}
            ]
        }"#;

        let envelope: OkxEnvelope<Ticker> = serde_json::from_str(raw).unwrap();
        let tickers = envelope.into_data().unwrap();
        assert_eq!(tickers.len(), 3);

        let usdt: Vec<&Ticker> = tickers
            .iter()
            .filter(|t| t.inst_id.ends_with(QUOTE_SUFFIX))
            .collect();
        assert_eq!(usdt.len(), 1);
        assert_eq!(usdt[0].last.parse::<f64>().unwrap(), 43521.1);
    }

    #[test]
    fn test_error_envelope() {
        let raw = r#"{"code": "50013", "msg": "system busy", "data": []}"#;
        let envelope: OkxEnvelope<Ticker> = serde_json::from_str(raw).unwrap();
        assert!(envelope.into_data().is_err());
    }

    #[test]
    fn test_build_client_with_bad_proxy_falls_back() {
        let network = NetworkConfig {
            proxy: "::not-a-proxy::".to_string(),
            timeout: 30,
        };
        // 代理解析失败时退化为直连而不是报错
        assert!(build_http_client(&network).is_ok());
    }
}
