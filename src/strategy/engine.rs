use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{DonchianConfig, NetworkConfig};
use crate::error::Result;
use crate::models::{Candle, TradingSignal};
use crate::strategy::buffer::CandleBufferMap;
use crate::strategy::db::SignalStore;
use crate::strategy::history::HistoryFetcher;
use crate::strategy::signal::SignalDetector;
use crate::strategy::stream::{CandleStreamClient, StreamConfig};

/// K线处理通道容量
const KLINE_CHANNEL_CAPACITY: usize = 10_000;
/// 信号通道容量
const SIGNAL_CHANNEL_CAPACITY: usize = 1_000;
/// 工作池大小
const WORKER_COUNT: usize = 5;
/// K线尾部定期持久化间隔
const PERSIST_INTERVAL: Duration = Duration::from_secs(30);
/// 每品种定期持久化的尾部K线数
const PERSIST_TAIL: usize = 5;
/// 吞吐统计日志间隔
const STATS_INTERVAL: Duration = Duration::from_secs(60);
/// 停止时等待任务退出的宽限期
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// 引擎吞吐统计
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub processed_candles: u64,
    pub detected_signals: u64,
    pub dropped_candles: u64,
    pub dropped_signals: u64,
    pub buffer_sizes: HashMap<String, usize>,
    pub ws_connected: bool,
}

/// 唐奇安通道策略引擎
///
/// 持有K线流、历史引导、缓冲区、检测器与信号存储。
/// 数据通路：流 → 收集器 → 有界K线通道 → 工作池 → 检测 →
/// 有界信号通道 → 持久化消费者。所有通道满时丢新数据并告警，
/// 实时行情场景下新鲜度优先于完整性。
pub struct DonchianEngine {
    config: DonchianConfig,
    stream: CandleStreamClient,
    history: HistoryFetcher,
    detector: Arc<SignalDetector>,
    store: Arc<dyn SignalStore>,
    buffers: Arc<CandleBufferMap>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: TokioMutex<Vec<JoinHandle<()>>>,

    processed: Arc<AtomicU64>,
    detected: Arc<AtomicU64>,
    dropped_candles: Arc<AtomicU64>,
    dropped_signals: Arc<AtomicU64>,
}

impl DonchianEngine {
    pub fn new(
        config: DonchianConfig,
        network: &NetworkConfig,
        store: Arc<dyn SignalStore>,
    ) -> Result<Self> {
        let stream = CandleStreamClient::new(
            StreamConfig::default(),
            config.symbols.clone(),
            config.interval.clone(),
        );
        let history = HistoryFetcher::new(network)?;
        let detector = Arc::new(SignalDetector::new(config.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            stream,
            history,
            detector,
            store,
            buffers: Arc::new(CandleBufferMap::new()),
            shutdown_tx,
            shutdown_rx,
            tasks: TokioMutex::new(Vec::new()),
            processed: Arc::new(AtomicU64::new(0)),
            detected: Arc::new(AtomicU64::new(0)),
            dropped_candles: Arc::new(AtomicU64::new(0)),
            dropped_signals: Arc::new(AtomicU64::new(0)),
        })
    }

    /// 启动策略引擎
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            info!("🚫 唐奇安通道策略未启用");
            return Ok(());
        }

        info!(
            symbols = ?self.config.symbols,
            interval = %self.config.interval,
            "🚀 启动唐奇安通道策略引擎"
        );

        self.initialize_history().await;

        let stream_rx = self.stream.start(self.shutdown_rx.clone());

        let (kline_tx, kline_rx) = mpsc::channel::<Candle>(KLINE_CHANNEL_CAPACITY);
        let (signal_tx, signal_rx) = mpsc::channel::<TradingSignal>(SIGNAL_CHANNEL_CAPACITY);

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_collector(stream_rx, kline_tx));
        tasks.extend(self.spawn_workers(kline_rx, signal_tx));
        tasks.push(self.spawn_signal_consumer(signal_rx));
        tasks.push(self.spawn_persister());
        tasks.push(self.spawn_stats_reporter());
        drop(tasks);

        info!("✅ 唐奇安通道策略引擎启动成功");
        Ok(())
    }

    /// 初始化历史K线：填充缓冲区并分片落库，单品种失败不阻断
    async fn initialize_history(&self) {
        let limit = self.config.history_limit();
        info!(
            limit,
            symbols = ?self.config.symbols,
            "📚 开始初始化历史K线数据"
        );

        let history = self
            .history
            .fetch_all(&self.config.symbols, &self.config.interval, limit)
            .await;

        let mut total = 0;
        for (symbol, candles) in history {
            if candles.is_empty() {
                continue;
            }
            total += candles.len();

            self.buffers.seed(&symbol, candles.clone());

            let store = self.store.clone();
            let result =
                tokio::task::spawn_blocking(move || store.batch_save_candles(&candles)).await;
            match result {
                Ok(Err(e)) => error!(symbol = %symbol, "批量保存历史K线失败: {}", e),
                Err(e) => error!(symbol = %symbol, "持久化任务异常: {}", e),
                _ => {}
            }
        }

        info!(total_klines = total, "🎉 历史K线数据初始化完成");
    }

    /// 收集器：把流输出转入处理通道，满则丢弃
    fn spawn_collector(
        &self,
        mut stream_rx: mpsc::Receiver<Candle>,
        kline_tx: mpsc::Sender<Candle>,
    ) -> JoinHandle<()> {
        let mut shutdown = self.shutdown_rx.clone();
        let dropped = self.dropped_candles.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    candle = stream_rx.recv() => {
                        let Some(candle) = candle else { return };
                        if let Err(mpsc::error::TrySendError::Full(candle)) = kline_tx.try_send(candle) {
                            dropped.fetch_add(1, Ordering::Relaxed);
                            warn!(symbol = %candle.symbol, "K线处理通道满，丢弃数据");
                        }
                    }
                }
            }
        })
    }

    /// 工作池：共享一个接收端，逐根K线做缓冲追加与信号检测
    fn spawn_workers(
        &self,
        kline_rx: mpsc::Receiver<Candle>,
        signal_tx: mpsc::Sender<TradingSignal>,
    ) -> Vec<JoinHandle<()>> {
        let kline_rx = Arc::new(TokioMutex::new(kline_rx));

        (0..WORKER_COUNT)
            .map(|worker_id| {
                let kline_rx = kline_rx.clone();
                let signal_tx = signal_tx.clone();
                let buffers = self.buffers.clone();
                let detector = self.detector.clone();
                let processed = self.processed.clone();
                let detected = self.detected.clone();
                let dropped_signals = self.dropped_signals.clone();
                let mut shutdown = self.shutdown_rx.clone();

                tokio::spawn(async move {
                    debug!(worker_id, "启动K线处理器");

                    loop {
                        let candle = {
                            let mut rx = kline_rx.lock().await;
                            tokio::select! {
                                _ = shutdown.changed() => return,
                                candle = rx.recv() => candle,
                            }
                        };

                        let Some(candle) = candle else { return };

                        process_candle(
                            worker_id,
                            candle,
                            &buffers,
                            &detector,
                            &signal_tx,
                            &processed,
                            &detected,
                            &dropped_signals,
                        );
                    }
                })
            })
            .collect()
    }

    /// 信号消费者：异步落库并更新日聚合
    fn spawn_signal_consumer(
        &self,
        mut signal_rx: mpsc::Receiver<TradingSignal>,
    ) -> JoinHandle<()> {
        let store = self.store.clone();
        let mut shutdown = self.shutdown_rx.clone();

        tokio::spawn(async move {
            loop {
                let signal = tokio::select! {
                    _ = shutdown.changed() => return,
                    signal = signal_rx.recv() => signal,
                };
                let Some(signal) = signal else { return };

                info!(
                    symbol = %signal.symbol,
                    signal_type = signal.signal_type.as_str(),
                    price = signal.price,
                    strength = signal.strength,
                    "📊 处理交易信号"
                );

                let store = store.clone();
                tokio::spawn(async move {
                    let symbol = signal.symbol.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        store.save_signal(&signal)?;
                        store.update_daily_stats(
                            &signal.symbol,
                            signal.signal_type,
                            signal.strength,
                        )
                    })
                    .await;

                    match result {
                        Ok(Err(e)) => error!(symbol = %symbol, "保存交易信号失败: {}", e),
                        Err(e) => error!(symbol = %symbol, "信号持久化任务异常: {}", e),
                        _ => {}
                    }
                });
            }
        })
    }

    /// 定期把每个品种的尾部K线落库
    fn spawn_persister(&self) -> JoinHandle<()> {
        let buffers = self.buffers.clone();
        let store = self.store.clone();
        let mut shutdown = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PERSIST_INTERVAL);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => {
                        let tail = buffers.trailing(PERSIST_TAIL);
                        if tail.is_empty() {
                            continue;
                        }

                        let store = store.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            store.batch_save_candles(&tail)
                        }).await;

                        match result {
                            Ok(Err(e)) => debug!("保存K线数据失败: {}", e),
                            Err(e) => error!("K线持久化任务异常: {}", e),
                            _ => {}
                        }
                    }
                }
            }
        })
    }

    /// 每分钟输出吞吐统计
    fn spawn_stats_reporter(&self) -> JoinHandle<()> {
        let processed = self.processed.clone();
        let detected = self.detected.clone();
        let dropped_candles = self.dropped_candles.clone();
        let dropped_signals = self.dropped_signals.clone();
        let buffers = self.buffers.clone();
        let connected = self.stream.connected_flag();
        let mut shutdown = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATS_INTERVAL);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => {
                        info!(
                            processed_klines = processed.load(Ordering::Relaxed),
                            detected_signals = detected.load(Ordering::Relaxed),
                            dropped_candles = dropped_candles.load(Ordering::Relaxed),
                            dropped_signals = dropped_signals.load(Ordering::Relaxed),
                            buffer_sizes = ?buffers.sizes(),
                            ws_connected = connected.load(Ordering::Relaxed),
                            "📈 策略引擎性能统计"
                        );
                    }
                }
            }
        })
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            processed_candles: self.processed.load(Ordering::Relaxed),
            detected_signals: self.detected.load(Ordering::Relaxed),
            dropped_candles: self.dropped_candles.load(Ordering::Relaxed),
            dropped_signals: self.dropped_signals.load(Ordering::Relaxed),
            buffer_sizes: self.buffers.sizes(),
            ws_connected: self.stream.is_connected(),
        }
    }

    pub fn store(&self) -> Arc<dyn SignalStore> {
        self.store.clone()
    }

    /// 停止引擎：30秒宽限期内等待任务退出，超时强制关闭
    pub async fn stop(&self) {
        info!("🛑 停止唐奇安通道策略引擎");

        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        let drain = futures_util::future::join_all(tasks);

        match tokio::time::timeout(SHUTDOWN_GRACE, drain).await {
            Ok(_) => info!("✅ 所有工作任务已停止"),
            Err(_) => warn!("⚠️ 停止超时，强制退出"),
        }

        info!("✅ 唐奇安通道策略引擎已停止");
    }
}

/// 单根K线的处理：追加缓冲 → 快照 → 检测 → 非阻塞发射信号
#[allow(clippy::too_many_arguments)]
fn process_candle(
    worker_id: usize,
    candle: Candle,
    buffers: &CandleBufferMap,
    detector: &SignalDetector,
    signal_tx: &mpsc::Sender<TradingSignal>,
    processed: &AtomicU64,
    detected: &AtomicU64,
    dropped_signals: &AtomicU64,
) {
    let symbol = candle.symbol.clone();
    buffers.append(candle);
    processed.fetch_add(1, Ordering::Relaxed);

    let candles = buffers.snapshot(&symbol);
    if candles.len() < detector.required_bars() {
        debug!(
            symbol = %symbol,
            available = candles.len(),
            required = detector.required_bars(),
            "历史数据不足，跳过分析"
        );
        return;
    }

    if let Some(signal) = detector.detect(&symbol, &candles) {
        match signal_tx.try_send(signal) {
            Ok(()) => {
                detected.fetch_add(1, Ordering::Relaxed);
                debug!(symbol = %symbol, worker_id, "🎯 信号已进入处理通道");
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                dropped_signals.fetch_add(1, Ordering::Relaxed);
                warn!(symbol = %symbol, "信号处理通道满，丢弃信号");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
