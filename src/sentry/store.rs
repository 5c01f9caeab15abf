use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RedisConfig;
use crate::models::PricePoint;

/// Redis镜像key的过期与清理窗口
const MIRROR_RETENTION: Duration = Duration::from_secs(600);
/// Redis单次操作超时
const MIRROR_OP_TIMEOUT: Duration = Duration::from_secs(3);
/// 初始化连通性探测超时
const MIRROR_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// 单个品种的滑动窗口
///
/// 按时间戳单调递增保存观测点；比队尾更老的写入直接忽略，
/// 超过最大视野的旧数据在写入时惰性裁剪。
#[derive(Debug)]
pub struct PriceWindow {
    points: VecDeque<PricePoint>,
    max_age: ChronoDuration,
}

impl PriceWindow {
    pub fn new(max_age: Duration) -> Self {
        Self {
            points: VecDeque::with_capacity(16),
            max_age: ChronoDuration::from_std(max_age).unwrap_or(ChronoDuration::minutes(10)),
        }
    }

    /// 追加观测点并裁剪过期数据，返回是否被接受
    pub fn push(&mut self, point: PricePoint) -> bool {
        if let Some(back) = self.points.back() {
            if point.timestamp < back.timestamp {
                return false;
            }
        }

        self.points.push_back(point);

        let cutoff = Utc::now() - self.max_age;
        while let Some(front) = self.points.front() {
            if front.timestamp >= cutoff {
                break;
            }
            self.points.pop_front();
        }

        true
    }

    pub fn latest(&self) -> Option<PricePoint> {
        self.points.back().copied()
    }

    /// 距目标时间最近的观测点
    ///
    /// 最小时间差超过容差（两倍采样间隔）视为数据不足返回None；
    /// 少于两个点时无法区分"最新"和"过去"，同样返回None。
    pub fn nearest_around(
        &self,
        target: DateTime<Utc>,
        tolerance: ChronoDuration,
    ) -> Option<PricePoint> {
        if self.points.len() < 2 {
            return None;
        }

        let mut closest: Option<PricePoint> = None;
        let mut min_diff = ChronoDuration::MAX;

        for point in &self.points {
            let diff = (target - point.timestamp).abs();
            if diff < min_diff {
                min_diff = diff;
                closest = Some(*point);
            }
        }

        if min_diff > tolerance {
            return None;
        }

        closest
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// 存储状态统计
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub mem_symbols: usize,
    pub redis_enabled: bool,
    pub redis_keys: Option<usize>,
}

/// 价格滑动窗口存储
///
/// 内存为权威存储；配置了Redis且探测成功时，每次写入会异步镜像
/// 一份到有序集合，失败只记日志不重试。
pub struct PriceStore {
    windows: RwLock<HashMap<String, Arc<Mutex<PriceWindow>>>>,
    monitor_period: ChronoDuration,
    /// 采样容差 = 两倍拉取间隔
    sample_tolerance: ChronoDuration,
    window_age: Duration,
    mirror: Option<RedisMirror>,
}

impl PriceStore {
    /// 纯内存模式
    pub fn new(monitor_period: Duration, fetch_interval: Duration) -> Self {
        // 窗口多留两个采样间隔的尾巴，保证视野边缘的近邻查找仍可命中
        let window_age = monitor_period + fetch_interval * 2;

        Self {
            windows: RwLock::new(HashMap::new()),
            monitor_period: ChronoDuration::from_std(monitor_period)
                .unwrap_or(ChronoDuration::minutes(5)),
            sample_tolerance: ChronoDuration::from_std(fetch_interval * 2)
                .unwrap_or(ChronoDuration::minutes(2)),
            window_age,
            mirror: None,
        }
    }

    /// 带Redis镜像模式：探测失败时退回纯内存
    pub async fn with_redis(
        monitor_period: Duration,
        fetch_interval: Duration,
        redis_config: &RedisConfig,
    ) -> Self {
        let mut store = Self::new(monitor_period, fetch_interval);

        if redis_config.url.is_empty() {
            info!("🔧 未配置Redis，使用纯内存模式");
            return store;
        }

        match RedisMirror::connect(redis_config).await {
            Ok(mirror) => {
                info!("✅ Redis连接成功");
                store.mirror = Some(mirror);
            }
            Err(e) => {
                warn!("⚠️ Redis连接失败，使用纯内存模式: {}", e);
            }
        }

        store
    }

    /// 写入一次观测
    pub fn put(&self, symbol: &str, price: f64, timestamp: DateTime<Utc>) {
        let window = self.window_for(symbol);
        let point = PricePoint { price, timestamp };

        let accepted = window.lock().unwrap().push(point);
        if !accepted {
            debug!(symbol, "忽略乱序观测点");
            return;
        }

        if let Some(mirror) = &self.mirror {
            let mirror = mirror.clone();
            let symbol = symbol.to_string();
            tokio::spawn(async move {
                if let Err(e) = mirror.backup(&symbol, &point).await {
                    warn!(symbol = %symbol, "Redis备份失败: {}", e);
                }
            });
        }
    }

    /// 返回 (最新观测, monitor_period前的观测)
    ///
    /// 任一侧缺失时对应返回None，数据完全为空时返回(None, None)。
    pub fn pair(&self, symbol: &str) -> (Option<PricePoint>, Option<PricePoint>) {
        let windows = self.windows.read().unwrap();
        let Some(window) = windows.get(symbol) else {
            return (None, None);
        };

        let window = window.lock().unwrap();
        let Some(latest) = window.latest() else {
            return (None, None);
        };

        let target = Utc::now() - self.monitor_period;
        let past = window.nearest_around(target, self.sample_tolerance);

        (Some(latest), past)
    }

    /// 当前已知的所有品种
    pub fn symbols(&self) -> Vec<String> {
        let windows = self.windows.read().unwrap();
        windows.keys().cloned().collect()
    }

    /// 存储状态（Redis key数量只在镜像可用时统计）
    pub async fn stats(&self) -> StoreStats {
        let mem_symbols = self.windows.read().unwrap().len();

        let redis_keys = match &self.mirror {
            Some(mirror) => mirror.key_count().await.ok(),
            None => None,
        };

        StoreStats {
            mem_symbols,
            redis_enabled: self.mirror.is_some(),
            redis_keys,
        }
    }

    pub fn redis_enabled(&self) -> bool {
        self.mirror.is_some()
    }

    fn window_for(&self, symbol: &str) -> Arc<Mutex<PriceWindow>> {
        {
            let windows = self.windows.read().unwrap();
            if let Some(window) = windows.get(symbol) {
                return window.clone();
            }
        }

        let mut windows = self.windows.write().unwrap();
        windows
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PriceWindow::new(self.window_age))))
            .clone()
    }
}

/// Redis二级存储镜像
#[derive(Clone)]
struct RedisMirror {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisMirror {
    async fn connect(config: &RedisConfig) -> crate::error::Result<Self> {
        let client = redis::Client::open(config.connection_url())?;

        let mut conn = tokio::time::timeout(
            MIRROR_PING_TIMEOUT,
            client.get_multiplexed_tokio_connection(),
        )
        .await
        .map_err(|_| crate::error::AppError::ApiError("Redis连接超时".to_string()))??;

        let pong: String = tokio::time::timeout(
            MIRROR_PING_TIMEOUT,
            redis::cmd("PING").query_async(&mut conn),
        )
        .await
        .map_err(|_| crate::error::AppError::ApiError("Redis PING超时".to_string()))??;

        if pong != "PONG" {
            return Err(crate::error::AppError::ApiError(format!(
                "Redis PING响应异常: {}",
                pong
            )));
        }

        Ok(Self { conn })
    }

    /// 镜像一个观测点：zadd + 10分钟过期 + 清理旧成员
    async fn backup(&self, symbol: &str, point: &PricePoint) -> crate::error::Result<()> {
        let key = format!("price:{}", symbol);
        let member = serde_json::to_string(point)?;
        let score = point.timestamp.timestamp();

        let mut conn = self.conn.clone();
        let retention_secs = MIRROR_RETENTION.as_secs() as i64;

        tokio::time::timeout(MIRROR_OP_TIMEOUT, async {
            let _: i64 = conn.zadd(&key, member, score).await?;
            let _: bool = conn.expire(&key, retention_secs).await?;

            let cutoff = Utc::now().timestamp() - retention_secs;
            let _: i64 = conn.zrembyscore(&key, 0, cutoff).await?;

            Ok::<(), redis::RedisError>(())
        })
        .await
        .map_err(|_| crate::error::AppError::ApiError("Redis操作超时".to_string()))??;

        Ok(())
    }

    async fn key_count(&self) -> crate::error::Result<usize> {
        let mut conn = self.conn.clone();

        let keys: Vec<String> =
            tokio::time::timeout(MIRROR_OP_TIMEOUT, conn.keys("price:*"))
                .await
                .map_err(|_| crate::error::AppError::ApiError("Redis操作超时".to_string()))??;

        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(price: f64, offset_secs: i64) -> PricePoint {
        PricePoint {
            price,
            timestamp: Utc::now() + ChronoDuration::seconds(offset_secs),
        }
    }

    #[test]
    fn test_window_monotone_insert() {
        let mut window = PriceWindow::new(Duration::from_secs(600));
        assert!(window.push(point(100.0, -120)));
        assert!(window.push(point(101.0, -60)));
        // 乱序写入被忽略
        assert!(!window.push(point(99.0, -180)));
        assert_eq!(window.len(), 2);
        assert_eq!(window.latest().unwrap().price, 101.0);
    }

    #[test]
    fn test_window_trims_old_points() {
        let mut window = PriceWindow::new(Duration::from_secs(300));
        window.push(point(100.0, -600));
        window.push(point(101.0, -30));
        // 10分钟前的点在5分钟视野外，写入时被裁掉
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_nearest_around_tolerance() {
        let mut window = PriceWindow::new(Duration::from_secs(600));
        window.push(point(100.0, -300));
        window.push(point(103.0, 0));

        let target = Utc::now() - ChronoDuration::seconds(300);

        // 2分钟容差内命中
        let found = window.nearest_around(target, ChronoDuration::seconds(120));
        assert_eq!(found.unwrap().price, 100.0);

        // 容差过小则数据不足
        let target_far = Utc::now() - ChronoDuration::seconds(500);
        assert!(window
            .nearest_around(target_far, ChronoDuration::seconds(120))
            .is_none());
    }

    #[test]
    fn test_nearest_requires_two_points() {
        let mut window = PriceWindow::new(Duration::from_secs(600));
        window.push(point(100.0, 0));
        assert!(window
            .nearest_around(Utc::now(), ChronoDuration::seconds(120))
            .is_none());
    }

    #[test]
    fn test_store_pair_and_symbols() {
        let store = PriceStore::new(Duration::from_secs(300), Duration::from_secs(60));

        store.put("BTC-USDT", 100.0, Utc::now() - ChronoDuration::seconds(300));
        store.put("BTC-USDT", 103.5, Utc::now());

        let (latest, past) = store.pair("BTC-USDT");
        assert_eq!(latest.unwrap().price, 103.5);
        assert_eq!(past.unwrap().price, 100.0);

        assert_eq!(store.symbols(), vec!["BTC-USDT".to_string()]);
        assert!(!store.redis_enabled());
    }

    #[test]
    fn test_store_pair_unknown_symbol() {
        let store = PriceStore::new(Duration::from_secs(300), Duration::from_secs(60));
        let (latest, past) = store.pair("NOPE-USDT");
        assert!(latest.is_none());
        assert!(past.is_none());
    }

    #[test]
    fn test_store_insufficient_history() {
        let store = PriceStore::new(Duration::from_secs(300), Duration::from_secs(60));

        // 只有近2分钟的数据：最新存在，5分钟前的近邻超出容差
        store.put("ETH-USDT", 200.0, Utc::now() - ChronoDuration::seconds(120));
        store.put("ETH-USDT", 201.0, Utc::now());

        let (latest, past) = store.pair("ETH-USDT");
        assert!(latest.is_some());
        assert!(past.is_none());
    }
}
