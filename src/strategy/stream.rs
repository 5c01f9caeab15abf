use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use crate::models::{interval_to_duration, Candle};

/// OKX业务线WebSocket地址（K线频道挂在business线上）
pub const OKX_WS_ENDPOINT: &str = "wss://ws.okx.com:8443/ws/v5/business";

/// K线流客户端配置
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub endpoint: String,
    pub ping_interval: Duration,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: OKX_WS_ENDPOINT.to_string(),
            ping_interval: Duration::from_secs(20),
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            channel_capacity: 1000,
        }
    }
}

/// 推送消息信封
#[derive(Debug, Deserialize)]
struct WsPush {
    arg: WsArg,
    #[serde(default)]
    data: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct WsArg {
    channel: String,
    #[serde(rename = "instId")]
    inst_id: String,
}

/// 订阅/错误等事件消息
#[derive(Debug, Deserialize)]
struct WsEvent {
    event: String,
    #[serde(default)]
    msg: String,
}

/// K线流客户端
///
/// 一条持久连接订阅全部品种的K线频道。读取线程只负责把已完结
/// （confirm=1）的K线写入 latest_closed 缓存；独立的发射定时器
/// 每个K线周期把缓存内容灌入有界输出通道。这把交易所的推送节奏
/// 与下游处理解耦，保证每品种每周期至多一根K线进入引擎。
pub struct CandleStreamClient {
    config: StreamConfig,
    symbols: Vec<String>,
    interval: String,
    latest_closed: Arc<Mutex<HashMap<String, Candle>>>,
    connected: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl CandleStreamClient {
    pub fn new(config: StreamConfig, symbols: Vec<String>, interval: String) -> Self {
        Self {
            config,
            symbols,
            interval,
            latest_closed: Arc::new(Mutex::new(HashMap::new())),
            connected: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// K线频道名，如 candle15m
    pub fn channel_name(interval: &str) -> String {
        format!("candle{}", interval)
    }

    /// 构造订阅消息：一条消息枚举全部 (channel, instId)
    pub fn subscribe_message(symbols: &[String], interval: &str) -> String {
        let args: Vec<serde_json::Value> = symbols
            .iter()
            .map(|symbol| {
                json!({
                    "channel": Self::channel_name(interval),
                    "instId": symbol,
                })
            })
            .collect();

        json!({
            "op": "subscribe",
            "args": args,
        })
        .to_string()
    }

    /// 启动读取与发射任务，返回已完结K线的有界输出通道
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> mpsc::Receiver<Candle> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        let connection = ConnectionTask {
            config: self.config.clone(),
            symbols: self.symbols.clone(),
            interval: self.interval.clone(),
            latest_closed: self.latest_closed.clone(),
            connected: self.connected.clone(),
        };
        let conn_shutdown = shutdown.clone();
        tokio::spawn(async move {
            connection.run(conn_shutdown).await;
        });

        let latest = self.latest_closed.clone();
        let dropped = self.dropped.clone();
        let tick = interval_to_duration(&self.interval);
        let mut emit_shutdown = shutdown;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // 首个tick立即完成，跳过以对齐周期节奏
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = emit_shutdown.changed() => return,
                    _ = ticker.tick() => {
                        emit_latest(&latest, &tx, &dropped);
                    }
                }
            }
        });

        rx
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// 连接状态标志的共享句柄，供统计任务读取
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    /// 因输出通道满而被丢弃的K线数量
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 解析推送文本并缓存其中已完结的K线，返回缓存条数
    pub fn handle_message(
        text: &str,
        interval: &str,
        latest_closed: &Mutex<HashMap<String, Candle>>,
    ) -> usize {
        // 订阅回执与错误事件不携带行情数据
        if let Ok(event) = serde_json::from_str::<WsEvent>(text) {
            if event.event == "error" {
                warn!("WebSocket错误事件: {}", event.msg);
            } else {
                debug!(event = %event.event, "收到事件消息");
            }
            return 0;
        }

        let push: WsPush = match serde_json::from_str(text) {
            Ok(push) => push,
            Err(e) => {
                debug!("解析K线推送失败: {}", e);
                return 0;
            }
        };

        if !push.arg.channel.starts_with("candle") {
            return 0;
        }

        let mut cached = 0;
        for row in &push.data {
            // 只有已完结的K线才推进状态
            if !Candle::row_is_confirmed(row) {
                continue;
            }

            match Candle::from_okx_row(&push.arg.inst_id, interval, row) {
                Ok(candle) => {
                    debug!(
                        symbol = %candle.symbol,
                        open_time = candle.open_time_ms,
                        close = candle.close,
                        "💾 缓存完结K线"
                    );
                    latest_closed
                        .lock()
                        .unwrap()
                        .insert(candle.symbol.clone(), candle);
                    cached += 1;
                }
                Err(e) => {
                    debug!("解析K线数据失败: {}", e);
                }
            }
        }

        cached
    }
}

/// 把缓存中每个品种的最新完结K线灌入输出通道
fn emit_latest(
    latest: &Mutex<HashMap<String, Candle>>,
    tx: &mpsc::Sender<Candle>,
    dropped: &AtomicU64,
) {
    let snapshot: Vec<Candle> = latest.lock().unwrap().values().cloned().collect();
    let mut emitted = 0;

    for candle in snapshot {
        let symbol = candle.symbol.clone();
        match tx.try_send(candle) {
            Ok(()) => emitted += 1,
            Err(mpsc::error::TrySendError::Full(_)) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                warn!(symbol = %symbol, "K线输出通道满，丢弃数据");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return,
        }
    }

    if emitted > 0 {
        debug!(emitted, "✅ 定时发射K线完成");
    }
}

/// 连接监督任务：连接 → 订阅 → 读循环，失败后固定间隔重连
struct ConnectionTask {
    config: StreamConfig,
    symbols: Vec<String>,
    interval: String,
    latest_closed: Arc<Mutex<HashMap<String, Candle>>>,
    connected: Arc<AtomicBool>,
}

impl ConnectionTask {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut attempts: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return;
            }

            match self.connect_and_read(&mut shutdown).await {
                SessionEnd::Shutdown => return,
                SessionEnd::Disconnected { subscribed } => {
                    self.connected.store(false, Ordering::Relaxed);

                    // 成功订阅过的会话把重连计数清零
                    if subscribed {
                        attempts = 0;
                    }
                    attempts += 1;

                    if attempts > self.config.max_reconnect_attempts {
                        error!(
                            max_attempts = self.config.max_reconnect_attempts,
                            "达到最大重连次数，停止重连"
                        );
                        return;
                    }

                    info!(
                        attempt = attempts,
                        max_attempts = self.config.max_reconnect_attempts,
                        "🔄 将在{}秒后重连WebSocket",
                        self.config.reconnect_interval.as_secs()
                    );

                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = tokio::time::sleep(self.config.reconnect_interval) => {}
                    }
                }
            }
        }
    }

    /// 单次连接会话，返回结束原因
    async fn connect_and_read(&self, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        let (ws_stream, _) = match connect_async(&self.config.endpoint).await {
            Ok(ok) => ok,
            Err(e) => {
                error!("WebSocket连接失败: {}", e);
                return SessionEnd::Disconnected { subscribed: false };
            }
        };

        info!(endpoint = %self.config.endpoint, "🔗 WebSocket连接建立成功");

        let (mut write, mut read) = ws_stream.split();

        // 每次（重）连后都重新发送订阅，覆盖存量的 (symbols, interval)
        let subscribe = CandleStreamClient::subscribe_message(&self.symbols, &self.interval);
        if let Err(e) = write.send(Message::Text(subscribe)).await {
            error!("发送订阅消息失败: {}", e);
            return SessionEnd::Disconnected { subscribed: false };
        }

        info!(
            symbols = ?self.symbols,
            channel = %CandleStreamClient::channel_name(&self.interval),
            "📡 已发送K线订阅请求"
        );

        self.connected.store(true, Ordering::Relaxed);

        let mut ping_timer = tokio::time::interval(self.config.ping_interval);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_timer.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
                _ = ping_timer.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        error!("发送心跳失败: {}", e);
                        return SessionEnd::Disconnected { subscribed: true };
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            CandleStreamClient::handle_message(&text, &self.interval, &self.latest_closed);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if write.send(Message::Pong(data)).await.is_err() {
                                return SessionEnd::Disconnected { subscribed: true };
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            info!("收到关闭消息: {:?}", frame);
                            return SessionEnd::Disconnected { subscribed: true };
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("WebSocket读取消息失败: {}", e);
                            return SessionEnd::Disconnected { subscribed: true };
                        }
                        None => {
                            warn!("WebSocket连接已断开");
                            return SessionEnd::Disconnected { subscribed: true };
                        }
                    }
                }
            }
        }
    }
}

enum SessionEnd {
    Shutdown,
    Disconnected { subscribed: bool },
}
