use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use tracing::debug;

use crate::models::Candle;

/// 每个品种保留的最大K线数量
pub const MAX_BUFFER: usize = 200;

/// 按品种分桶的K线环形缓冲区
///
/// 按开盘时间递增追加；相同开盘时间覆盖队尾（交易所重推完结K线），
/// 乱序到达直接丢弃。工作池中任意worker都可能写任意品种，
/// 因此整体加锁。
#[derive(Debug, Default)]
pub struct CandleBufferMap {
    inner: RwLock<HashMap<String, VecDeque<Candle>>>,
}

impl CandleBufferMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用历史数据初始化一个品种的缓冲区
    pub fn seed(&self, symbol: &str, candles: Vec<Candle>) {
        let mut map = self.inner.write().unwrap();
        let buffer = map.entry(symbol.to_string()).or_default();
        for candle in candles {
            push_candle(buffer, candle);
        }
    }

    /// 追加一根K线，返回是否被接受
    pub fn append(&self, candle: Candle) -> bool {
        let mut map = self.inner.write().unwrap();
        let buffer = map.entry(candle.symbol.clone()).or_default();
        push_candle(buffer, candle)
    }

    /// 返回一个品种当前K线序列的副本（开盘时间升序）
    pub fn snapshot(&self, symbol: &str) -> Vec<Candle> {
        let map = self.inner.read().unwrap();
        map.get(symbol)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 每个品种的尾部count根K线，供定期持久化使用
    pub fn trailing(&self, count: usize) -> Vec<Candle> {
        let map = self.inner.read().unwrap();
        let mut result = Vec::new();
        for buffer in map.values() {
            let start = buffer.len().saturating_sub(count);
            result.extend(buffer.iter().skip(start).cloned());
        }
        result
    }

    pub fn len(&self, symbol: &str) -> usize {
        let map = self.inner.read().unwrap();
        map.get(symbol).map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }

    /// 各品种的缓冲区大小统计
    pub fn sizes(&self) -> HashMap<String, usize> {
        let map = self.inner.read().unwrap();
        map.iter().map(|(k, v)| (k.clone(), v.len())).collect()
    }
}

fn push_candle(buffer: &mut VecDeque<Candle>, candle: Candle) -> bool {
    if let Some(back) = buffer.back() {
        if candle.open_time_ms < back.open_time_ms {
            debug!(
                symbol = %candle.symbol,
                open_time = candle.open_time_ms,
                back_time = back.open_time_ms,
                "丢弃乱序K线"
            );
            return false;
        }

        if candle.open_time_ms == back.open_time_ms {
            *buffer.back_mut().unwrap() = candle;
            return true;
        }
    }

    buffer.push_back(candle);
    while buffer.len() > MAX_BUFFER {
        buffer.pop_front();
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time_ms: i64, close: f64) -> Candle {
        Candle {
            symbol: "BTC-USDT".to_string(),
            interval: "15m".to_string(),
            open_time_ms,
            close_time_ms: open_time_ms + 900_000,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn test_append_in_order() {
        let buffers = CandleBufferMap::new();
        assert!(buffers.append(candle(1000, 100.0)));
        assert!(buffers.append(candle(2000, 101.0)));
        assert_eq!(buffers.len("BTC-USDT"), 2);
    }

    #[test]
    fn test_duplicate_open_time_overwrites() {
        let buffers = CandleBufferMap::new();
        buffers.append(candle(1000, 100.0));
        assert!(buffers.append(candle(1000, 105.0)));

        let snapshot = buffers.snapshot("BTC-USDT");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].close, 105.0);
    }

    #[test]
    fn test_out_of_order_dropped() {
        let buffers = CandleBufferMap::new();
        buffers.append(candle(2000, 100.0));
        assert!(!buffers.append(candle(1000, 99.0)));
        assert_eq!(buffers.len("BTC-USDT"), 1);
    }

    #[test]
    fn test_eviction_beyond_max() {
        let buffers = CandleBufferMap::new();
        for i in 0..(MAX_BUFFER as i64 + 50) {
            buffers.append(candle(i * 1000, 100.0));
        }

        let snapshot = buffers.snapshot("BTC-USDT");
        assert_eq!(snapshot.len(), MAX_BUFFER);
        // 队头被淘汰，最老的是第50根
        assert_eq!(snapshot[0].open_time_ms, 50 * 1000);
    }

    #[test]
    fn test_trailing() {
        let buffers = CandleBufferMap::new();
        for i in 0..10 {
            buffers.append(candle(i * 1000, 100.0 + i as f64));
        }

        let tail = buffers.trailing(5);
        assert_eq!(tail.len(), 5);
        assert!(tail.iter().all(|c| c.open_time_ms >= 5000));
    }

    #[test]
    fn test_snapshot_unknown_symbol() {
        let buffers = CandleBufferMap::new();
        assert!(buffers.snapshot("ETH-USDT").is_empty());
    }
}
