use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::models::AlertEvent;
use crate::notifier::Notifier;
use crate::sentry::store::PriceStore;

/// 预警历史的保留时长（秒），超过后从台账清除
const LEDGER_RETENTION_SECS: i64 = 3600;

/// 预警去重台账
///
/// symbol → 上次预警时间。距上次预警超过冷却期才允许再次预警，
/// 每次写入顺带清理一小时前的旧条目。
#[derive(Debug, Default)]
pub struct DedupLedger {
    history: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否允许该品种预警
    pub fn should_alert(&self, symbol: &str, cooldown: Duration, now: DateTime<Utc>) -> bool {
        let history = self.history.lock().unwrap();
        match history.get(symbol) {
            Some(last) => {
                let cooldown = ChronoDuration::from_std(cooldown).unwrap_or(ChronoDuration::minutes(5));
                now - *last > cooldown
            }
            None => true,
        }
    }

    /// 记录一次预警并清理过期条目
    pub fn record(&self, symbol: &str, now: DateTime<Utc>) {
        let mut history = self.history.lock().unwrap();
        history.insert(symbol.to_string(), now);

        let cutoff = now - ChronoDuration::seconds(LEDGER_RETENTION_SECS);
        history.retain(|_, t| *t >= cutoff);
    }

    pub fn len(&self) -> usize {
        self.history.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.lock().unwrap().is_empty()
    }
}

/// 价格异动分析引擎
///
/// 每次调度：快照全部品种，并发做阈值检查，聚合成一批预警发出。
/// 批量发送失败时逐条降级发送。
pub struct AlarmAnalyzer {
    store: Arc<PriceStore>,
    notifier: Arc<dyn Notifier>,
    threshold: f64,
    monitor_period: Duration,
    ledger: DedupLedger,
}

impl AlarmAnalyzer {
    pub fn new(
        store: Arc<PriceStore>,
        notifier: Arc<dyn Notifier>,
        threshold: f64,
        monitor_period: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            threshold,
            monitor_period,
            ledger: DedupLedger::new(),
        }
    }

    /// 分析所有品种并发出聚合预警
    pub async fn analyze_all(self: Arc<Self>) {
        let symbols = self.store.symbols();
        if symbols.is_empty() {
            return;
        }

        info!("开始分析 {} 个交易对的价格变化...", symbols.len());

        let tasks: Vec<_> = symbols
            .into_iter()
            .map(|symbol| {
                let analyzer = self.clone();
                tokio::spawn(async move { analyzer.check_symbol(&symbol) })
            })
            .collect();

        let mut alerts = Vec::new();
        for result in join_all(tasks).await {
            match result {
                Ok(Some(alert)) => alerts.push(alert),
                Ok(None) => {}
                Err(e) => error!("分析任务异常退出: {}", e),
            }
        }

        if alerts.is_empty() {
            info!("✅ 分析完成，暂无异常波动");
            return;
        }

        info!("✅ 分析完成，触发 {} 个预警", alerts.len());

        if let Err(e) = self.notifier.send_batch_alerts(&alerts).await {
            warn!("❌ 批量预警发送失败: {}，逐条降级发送", e);
            for alert in &alerts {
                if let Err(e) = self.notifier.send_alert(alert).await {
                    error!(symbol = %alert.symbol, "❌ 发送预警失败: {}", e);
                }
            }
        }
    }

    /// 检查单个品种，命中阈值且通过去重时产出预警并登记台账
    pub fn check_symbol(&self, symbol: &str) -> Option<AlertEvent> {
        let (latest, past) = self.store.pair(symbol);
        let (latest, past) = (latest?, past?);

        let change_percent = (latest.price - past.price) / past.price * 100.0;

        // 严格大于阈值才触发，恰好等于不触发
        if change_percent.abs() <= self.threshold {
            return None;
        }

        let now = Utc::now();
        if !self.ledger.should_alert(symbol, self.monitor_period, now) {
            return None;
        }

        self.ledger.record(symbol, now);

        Some(AlertEvent {
            symbol: symbol.to_string(),
            current_price: latest.price,
            past_price: past.price,
            change_percent,
            alert_time: now,
            monitor_period: self.monitor_period,
        })
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_cooldown() {
        let ledger = DedupLedger::new();
        let now = Utc::now();
        let cooldown = Duration::from_secs(300);

        assert!(ledger.should_alert("BTC-USDT", cooldown, now));
        ledger.record("BTC-USDT", now);

        // 冷却期内拒绝
        assert!(!ledger.should_alert(
            "BTC-USDT",
            cooldown,
            now + ChronoDuration::seconds(60)
        ));
        // 恰好等于冷却期仍拒绝（需要严格超过）
        assert!(!ledger.should_alert(
            "BTC-USDT",
            cooldown,
            now + ChronoDuration::seconds(300)
        ));
        // 超过冷却期放行
        assert!(ledger.should_alert(
            "BTC-USDT",
            cooldown,
            now + ChronoDuration::seconds(330)
        ));
        // 其他品种不受影响
        assert!(ledger.should_alert("ETH-USDT", cooldown, now));
    }

    #[test]
    fn test_ledger_prunes_stale_entries() {
        let ledger = DedupLedger::new();
        let now = Utc::now();

        ledger.record("OLD-USDT", now - ChronoDuration::hours(2));
        assert_eq!(ledger.len(), 1);

        // 新写入触发机会式清理
        ledger.record("NEW-USDT", now);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.should_alert("OLD-USDT", Duration::from_secs(300), now));
    }
}
