//! 价格预警管线场景测试
//!
//! 覆盖：预警正路径、冷却去重、批量排序、阈值边界、数据不足。

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use okx_sentry::error::{AppError, Result};
use okx_sentry::models::AlertEvent;
use okx_sentry::notifier::{split_and_sort, Notifier};
use okx_sentry::sentry::{AlarmAnalyzer, PriceStore};

/// 记录型通知器：捕获发送内容，可配置批量发送失败
#[derive(Default)]
struct RecordingNotifier {
    singles: Mutex<Vec<AlertEvent>>,
    batches: Mutex<Vec<Vec<AlertEvent>>>,
    fail_batch: AtomicBool,
}

impl RecordingNotifier {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    fn single_count(&self) -> usize {
        self.singles.lock().unwrap().len()
    }

    fn last_batch(&self) -> Vec<AlertEvent> {
        self.batches.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_alert(&self, alert: &AlertEvent) -> Result<()> {
        self.singles.lock().unwrap().push(alert.clone());
        Ok(())
    }

    async fn send_batch_alerts(&self, alerts: &[AlertEvent]) -> Result<()> {
        if self.fail_batch.load(Ordering::Relaxed) {
            return Err(AppError::NotifyError("模拟批量发送失败".to_string()));
        }
        self.batches.lock().unwrap().push(alerts.to_vec());
        Ok(())
    }
}

fn make_store() -> Arc<PriceStore> {
    Arc::new(PriceStore::new(
        Duration::from_secs(300),
        Duration::from_secs(60),
    ))
}

/// 场景1：5分钟内上涨3.5%，阈值3.0 → 恰好一条预警
#[tokio::test]
async fn test_alarm_happy_path() {
    let store = make_store();
    let notifier = RecordingNotifier::new();
    let analyzer = Arc::new(AlarmAnalyzer::new(
        store.clone(),
        notifier.clone(),
        3.0,
        Duration::from_secs(300),
    ));

    let now = Utc::now();
    store.put("BTC-USDT", 100.0, now - ChronoDuration::seconds(300));
    store.put("BTC-USDT", 100.0, now - ChronoDuration::seconds(240));
    store.put("BTC-USDT", 100.0, now - ChronoDuration::seconds(60));
    store.put("BTC-USDT", 103.5, now);

    analyzer.clone().analyze_all().await;

    assert_eq!(notifier.batch_count(), 1);
    let batch = notifier.last_batch();
    assert_eq!(batch.len(), 1, "应恰好产生一条预警");

    let alert = &batch[0];
    assert_eq!(alert.symbol, "BTC-USDT");
    assert_eq!(alert.past_price, 100.0);
    assert_eq!(alert.current_price, 103.5);
    assert!((alert.change_percent - 3.5).abs() < 1e-9);
}

/// 场景2：冷却期内不重复预警，冷却期过后恢复
#[tokio::test]
async fn test_dedup_within_cooldown() {
    let store = make_store();
    let notifier = RecordingNotifier::new();
    let analyzer = Arc::new(AlarmAnalyzer::new(
        store.clone(),
        notifier.clone(),
        3.0,
        Duration::from_secs(300),
    ));

    let now = Utc::now();
    store.put("BTC-USDT", 100.0, now - ChronoDuration::seconds(300));
    store.put("BTC-USDT", 107.0, now);

    // 1分钟前刚预警过 → 冷却期内拒绝
    analyzer.ledger().record("BTC-USDT", now - ChronoDuration::seconds(60));
    assert!(analyzer.check_symbol("BTC-USDT").is_none());

    // 5分30秒前预警过 → 超过冷却期恢复预警
    analyzer.ledger().record("BTC-USDT", now - ChronoDuration::seconds(330));
    let alert = analyzer.check_symbol("BTC-USDT");
    assert!(alert.is_some());
    assert!((alert.unwrap().change_percent - 7.0).abs() < 1e-9);
}

/// 场景3：批量预警的分组排序（C+5, A+1 | D−4, B−2）
#[tokio::test]
async fn test_batch_ordering() {
    let store = make_store();
    let notifier = RecordingNotifier::new();
    let analyzer = Arc::new(AlarmAnalyzer::new(
        store.clone(),
        notifier.clone(),
        0.5,
        Duration::from_secs(300),
    ));

    let now = Utc::now();
    let seeds = [
        ("A-USDT", 101.0),
        ("B-USDT", 98.0),
        ("C-USDT", 105.0),
        ("D-USDT", 96.0),
    ];
    for (symbol, current) in seeds {
        store.put(symbol, 100.0, now - ChronoDuration::seconds(300));
        store.put(symbol, current, now);
    }

    analyzer.clone().analyze_all().await;

    assert_eq!(notifier.batch_count(), 1);
    let batch = notifier.last_batch();
    assert_eq!(batch.len(), 4);

    let (risers, fallers) = split_and_sort(&batch);
    let riser_symbols: Vec<&str> = risers.iter().map(|a| a.symbol.as_str()).collect();
    let faller_symbols: Vec<&str> = fallers.iter().map(|a| a.symbol.as_str()).collect();
    assert_eq!(riser_symbols, vec!["C-USDT", "A-USDT"]);
    assert_eq!(faller_symbols, vec!["D-USDT", "B-USDT"]);
}

/// 批量发送失败时逐条降级
#[tokio::test]
async fn test_batch_failure_falls_back_to_singles() {
    let store = make_store();
    let notifier = RecordingNotifier::new();
    notifier.fail_batch.store(true, Ordering::Relaxed);

    let analyzer = Arc::new(AlarmAnalyzer::new(
        store.clone(),
        notifier.clone(),
        0.5,
        Duration::from_secs(300),
    ));

    let now = Utc::now();
    for (symbol, current) in [("A-USDT", 105.0), ("B-USDT", 94.0)] {
        store.put(symbol, 100.0, now - ChronoDuration::seconds(300));
        store.put(symbol, current, now);
    }

    analyzer.clone().analyze_all().await;

    assert_eq!(notifier.batch_count(), 0);
    assert_eq!(notifier.single_count(), 2);
}

/// 阈值边界：恰好等于阈值不预警，严格大于才预警
#[tokio::test]
async fn test_exact_threshold_does_not_alert() {
    let store = make_store();
    let notifier = RecordingNotifier::new();
    let analyzer = Arc::new(AlarmAnalyzer::new(
        store.clone(),
        notifier.clone(),
        3.0,
        Duration::from_secs(300),
    ));

    let now = Utc::now();
    store.put("EQ-USDT", 100.0, now - ChronoDuration::seconds(300));
    store.put("EQ-USDT", 103.0, now);
    assert!(analyzer.check_symbol("EQ-USDT").is_none(), "恰好3.0%不应触发");

    store.put("GT-USDT", 100.0, now - ChronoDuration::seconds(300));
    store.put("GT-USDT", 103.1, now);
    assert!(analyzer.check_symbol("GT-USDT").is_some(), "3.1%应触发");
}

/// 跌幅同样按绝对值判断
#[tokio::test]
async fn test_negative_change_alerts() {
    let store = make_store();
    let notifier = RecordingNotifier::new();
    let analyzer = Arc::new(AlarmAnalyzer::new(
        store.clone(),
        notifier.clone(),
        3.0,
        Duration::from_secs(300),
    ));

    let now = Utc::now();
    store.put("DN-USDT", 100.0, now - ChronoDuration::seconds(300));
    store.put("DN-USDT", 95.0, now);

    let alert = analyzer.check_symbol("DN-USDT").expect("下跌5%应触发");
    assert!((alert.change_percent + 5.0).abs() < 1e-9);
}

/// 不变式7：窗口内没有足够老的观测点时past为空，不产生预警
#[tokio::test]
async fn test_insufficient_history_no_alert() {
    let store = make_store();
    let notifier = RecordingNotifier::new();
    let analyzer = Arc::new(AlarmAnalyzer::new(
        store.clone(),
        notifier.clone(),
        3.0,
        Duration::from_secs(300),
    ));

    // 最老的点只有2分钟历史：5分钟近邻查找超出2×采样间隔容差
    let now = Utc::now();
    store.put("NEW-USDT", 100.0, now - ChronoDuration::seconds(120));
    store.put("NEW-USDT", 110.0, now);

    assert!(analyzer.check_symbol("NEW-USDT").is_none());

    analyzer.clone().analyze_all().await;
    assert_eq!(notifier.batch_count(), 0);
    assert_eq!(notifier.single_count(), 0);
}

/// 并发写入不丢失观测：不变式1
#[tokio::test]
async fn test_concurrent_puts_do_not_lose_observations() {
    let store = make_store();
    let now = Utc::now();

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let symbol = format!("S{}-USDT", i);
            for j in 0..50 {
                store.put(&symbol, 100.0 + j as f64, now + ChronoDuration::milliseconds(j));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.symbols().len(), 8);
    for i in 0..8 {
        let (latest, _) = store.pair(&format!("S{}-USDT", i));
        assert_eq!(latest.unwrap().price, 149.0);
    }
}
