use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::strategy::db::SignalStore;

/// 性能报告输出间隔
const REPORT_INTERVAL: Duration = Duration::from_secs(300);

/// 近期信号的回看条数
const RECENT_LIMIT: usize = 100;

/// 策略性能报告器
///
/// 每5分钟从信号存储汇总各品种的信号统计并输出日志。
pub struct PerformanceReporter {
    store: Arc<dyn SignalStore>,
    symbols: Vec<String>,
}

impl PerformanceReporter {
    pub fn new(store: Arc<dyn SignalStore>, symbols: Vec<String>) -> Self {
        Self { store, symbols }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("📊 启动策略性能监控器");

        let mut ticker = tokio::time::interval(REPORT_INTERVAL);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("🛑 停止策略性能监控器");
                    return;
                }
                _ = ticker.tick() => {
                    self.report().await;
                }
            }
        }
    }

    async fn report(&self) {
        for symbol in &self.symbols {
            let store = self.store.clone();
            let symbol_owned = symbol.clone();

            let result = tokio::task::spawn_blocking(move || {
                let signals = store.recent_signals(&symbol_owned, RECENT_LIMIT)?;
                let daily = store.daily_stats(&symbol_owned, 1)?;
                Ok::<_, crate::error::AppError>((signals, daily))
            })
            .await;

            let (signals, daily) = match result {
                Ok(Ok(data)) => data,
                Ok(Err(e)) => {
                    warn!(symbol = %symbol, "获取交易信号失败: {}", e);
                    continue;
                }
                Err(e) => {
                    warn!(symbol = %symbol, "性能统计任务异常: {}", e);
                    continue;
                }
            };

            if signals.is_empty() {
                continue;
            }

            let long = signals.iter().filter(|s| s.signal_type == "LONG").count();
            let short = signals.iter().filter(|s| s.signal_type == "SHORT").count();
            let avg_strength =
                signals.iter().map(|s| s.strength).sum::<f64>() / signals.len() as f64;
            let latest = &signals[0];

            info!(
                symbol = %symbol,
                total_signals = signals.len(),
                long_signals = long,
                short_signals = short,
                avg_strength,
                last_signal_type = %latest.signal_type,
                last_signal_price = latest.price,
                today_signals = daily.first().map(|d| d.total_signals).unwrap_or(0),
                "📊 交易对性能"
            );
        }
    }
}
