use chrono::{DateTime, DurationRound, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::sentry::analyzer::AlarmAnalyzer;
use crate::sentry::fetcher::TickerFetcher;
use crate::sentry::store::PriceStore;

/// 预警管线调度器
///
/// 后台运行行情拉取器，并在整点对齐的监控周期边界上触发分析。
/// 单次分析超时跑过边界时，下个边界从当前时间重新计算，
/// 不会积压补跑。
pub struct AlarmScheduler {
    fetcher: Arc<TickerFetcher>,
    analyzer: Arc<AlarmAnalyzer>,
    store: Arc<PriceStore>,
    monitor_period: Duration,
}

impl AlarmScheduler {
    pub fn new(
        fetcher: Arc<TickerFetcher>,
        analyzer: Arc<AlarmAnalyzer>,
        store: Arc<PriceStore>,
        monitor_period: Duration,
    ) -> Self {
        Self {
            fetcher,
            analyzer,
            store,
            monitor_period,
        }
    }

    /// 调度主循环
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!("🚀 调度器启动中...");

        let fetcher = self.fetcher.clone();
        let fetcher_shutdown = shutdown.clone();
        tokio::spawn(async move {
            fetcher.run(fetcher_shutdown).await;
        });

        let mut shutdown = shutdown;

        loop {
            let boundary = next_boundary(Utc::now(), self.monitor_period);
            let wait = (boundary - Utc::now())
                .to_std()
                .unwrap_or(Duration::from_secs(0));

            info!(
                "⏳ 下次分析时间: {}",
                boundary.format("%Y-%m-%d %H:%M:%S")
            );

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("📴 调度器已停止");
                    return;
                }
                _ = tokio::time::sleep(wait) => {
                    self.run_analysis().await;
                }
            }
        }
    }

    async fn run_analysis(&self) {
        let stats = self.store.stats().await;
        info!(
            mem_symbols = stats.mem_symbols,
            redis_enabled = stats.redis_enabled,
            redis_keys = ?stats.redis_keys,
            "📊 存储状态"
        );

        self.analyzer.clone().analyze_all().await;
    }
}

/// 计算下一个对齐到监控周期整数倍的墙钟时刻
///
/// 以小时起点为基准，下一边界 = 小时起点 + (已过周期数 + 1) × 周期，
/// 越过小时自然滚入下一小时。
pub fn next_boundary(now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    let period_secs = period.as_secs().max(1) as i64;

    let hour_start = match now.duration_trunc(chrono::Duration::hours(1)) {
        Ok(t) => t,
        Err(e) => {
            warn!("时间对齐计算失败: {}", e);
            return now + chrono::Duration::seconds(period_secs);
        }
    };

    let elapsed = (now - hour_start).num_seconds();
    let next_multiple = (elapsed / period_secs + 1) * period_secs;

    hour_start + chrono::Duration::seconds(next_multiple)
}
