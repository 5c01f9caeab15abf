use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::models::{Candle, SignalType, TradingSignal};

/// 信号存储接口
///
/// 引擎只依赖该接口，不关心底层持久化技术。
pub trait SignalStore: Send + Sync {
    fn save_signal(&self, signal: &TradingSignal) -> Result<()>;
    fn update_daily_stats(&self, symbol: &str, signal_type: SignalType, strength: f64)
        -> Result<()>;
    fn save_candle(&self, candle: &Candle) -> Result<()>;
    fn batch_save_candles(&self, candles: &[Candle]) -> Result<usize>;
    fn recent_signals(&self, symbol: &str, limit: usize) -> Result<Vec<StoredSignal>>;
    fn daily_stats(&self, symbol: &str, days: u32) -> Result<Vec<DailyStats>>;
}

/// 已落库的信号记录
#[derive(Debug, Clone)]
pub struct StoredSignal {
    pub symbol: String,
    pub signal_type: String,
    pub price: f64,
    pub volume: f64,
    pub volume_ratio: f64,
    pub strength: f64,
    pub trigger_time_ms: i64,
}

/// 按日聚合的信号统计
#[derive(Debug, Clone)]
pub struct DailyStats {
    pub symbol: String,
    /// UTC日期，YYYY-MM-DD
    pub date: String,
    pub total_signals: i64,
    pub long_signals: i64,
    pub short_signals: i64,
    pub avg_strength: f64,
}

/// 批量写入的分片大小
const BATCH_CHUNK: usize = 100;

/// SQLite信号存储
pub struct SqliteSignalStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteSignalStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| AppError::DatabaseError(format!("创建数据库连接池失败: {}", e)))?;

        let store = Self { pool };
        store.init_schema()?;

        info!(path = %path.display(), "✅ 信号数据库初始化完成");
        Ok(store)
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| AppError::DatabaseError(format!("获取数据库连接失败: {}", e)))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                signal_type TEXT NOT NULL,
                price REAL NOT NULL,
                volume REAL NOT NULL,
                volume_ratio REAL,
                donchian_upper REAL,
                donchian_lower REAL,
                atr_value REAL,
                atr_slope REAL,
                consolidation_bars INTEGER,
                breakout_amplitude REAL,
                strength REAL,
                trigger_time INTEGER NOT NULL,
                kline_time INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(symbol, trigger_time, signal_type)
            );
            CREATE INDEX IF NOT EXISTS idx_signals_symbol_time ON signals(symbol, trigger_time);

            CREATE TABLE IF NOT EXISTS candles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                open_time INTEGER NOT NULL,
                close_time INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(symbol, open_time, interval)
            );
            CREATE INDEX IF NOT EXISTS idx_candles_symbol_time ON candles(symbol, open_time);

            CREATE TABLE IF NOT EXISTS signal_daily_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                date TEXT NOT NULL,
                total_signals INTEGER NOT NULL DEFAULT 0,
                long_signals INTEGER NOT NULL DEFAULT 0,
                short_signals INTEGER NOT NULL DEFAULT 0,
                avg_strength REAL,
                updated_at INTEGER NOT NULL,
                UNIQUE(symbol, date)
            );",
        )?;

        Ok(())
    }
}

impl SignalStore for SqliteSignalStore {
    fn save_signal(&self, signal: &TradingSignal) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO signals (
                symbol, signal_type, price, volume, volume_ratio,
                donchian_upper, donchian_lower, atr_value, atr_slope,
                consolidation_bars, breakout_amplitude, strength,
                trigger_time, kline_time, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(symbol, trigger_time, signal_type) DO UPDATE SET
                price = excluded.price,
                volume = excluded.volume,
                volume_ratio = excluded.volume_ratio,
                strength = excluded.strength",
            params![
                signal.symbol,
                signal.signal_type.as_str(),
                signal.price,
                signal.volume,
                signal.volume_ratio,
                signal.donchian_upper,
                signal.donchian_lower,
                signal.atr_value,
                signal.atr_slope,
                signal.consolidation_bars as i64,
                signal.breakout_amplitude,
                signal.strength,
                signal.trigger_time_ms,
                signal.kline_time_ms,
                Utc::now().timestamp_millis(),
            ],
        )?;

        Ok(())
    }

    fn update_daily_stats(
        &self,
        symbol: &str,
        signal_type: SignalType,
        strength: f64,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let now_ms = Utc::now().timestamp_millis();

        let tx = conn.transaction()?;

        let existing: Option<(i64, i64, i64, Option<f64>)> = tx
            .query_row(
                "SELECT total_signals, long_signals, short_signals, avg_strength
                 FROM signal_daily_stats WHERE symbol = ?1 AND date = ?2",
                params![symbol, date],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match existing {
            None => {
                let (long, short) = match signal_type {
                    SignalType::Long => (1, 0),
                    SignalType::Short => (0, 1),
                };
                tx.execute(
                    "INSERT INTO signal_daily_stats
                     (symbol, date, total_signals, long_signals, short_signals, avg_strength, updated_at)
                     VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6)",
                    params![symbol, date, long, short, strength, now_ms],
                )?;
            }
            Some((total, long, short, avg)) => {
                let (long, short) = match signal_type {
                    SignalType::Long => (long + 1, short),
                    SignalType::Short => (long, short + 1),
                };
                // 平均强度的滚动更新
                let new_avg = match avg {
                    Some(avg) => (avg * total as f64 + strength) / (total + 1) as f64,
                    None => strength,
                };
                tx.execute(
                    "UPDATE signal_daily_stats SET
                        total_signals = ?1, long_signals = ?2, short_signals = ?3,
                        avg_strength = ?4, updated_at = ?5
                     WHERE symbol = ?6 AND date = ?7",
                    params![total + 1, long, short, new_avg, now_ms, symbol, date],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn save_candle(&self, candle: &Candle) -> Result<()> {
        let conn = self.conn()?;
        insert_candle(&conn, candle)?;
        Ok(())
    }

    fn batch_save_candles(&self, candles: &[Candle]) -> Result<usize> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let mut count = 0;

        // 分片提交，避免单个事务过大
        for chunk in candles.chunks(BATCH_CHUNK) {
            let tx = conn.transaction()?;
            for candle in chunk {
                insert_candle(&tx, candle)?;
                count += 1;
            }
            tx.commit()?;
        }

        debug!(count, "✅ 批量保存K线数据完成");
        Ok(count)
    }

    fn recent_signals(&self, symbol: &str, limit: usize) -> Result<Vec<StoredSignal>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT symbol, signal_type, price, volume, volume_ratio, strength, trigger_time
             FROM signals WHERE symbol = ?1
             ORDER BY trigger_time DESC LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![symbol, limit as i64], |row| {
            Ok(StoredSignal {
                symbol: row.get(0)?,
                signal_type: row.get(1)?,
                price: row.get(2)?,
                volume: row.get(3)?,
                volume_ratio: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                strength: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                trigger_time_ms: row.get(6)?,
            })
        })?;

        let mut signals = Vec::new();
        for row in rows {
            signals.push(row?);
        }
        Ok(signals)
    }

    fn daily_stats(&self, symbol: &str, days: u32) -> Result<Vec<DailyStats>> {
        let conn = self.conn()?;

        let cutoff = (Utc::now() - chrono::Duration::days(days as i64))
            .format("%Y-%m-%d")
            .to_string();

        let mut stmt = conn.prepare(
            "SELECT symbol, date, total_signals, long_signals, short_signals, avg_strength
             FROM signal_daily_stats WHERE symbol = ?1 AND date >= ?2
             ORDER BY date DESC",
        )?;

        let rows = stmt.query_map(params![symbol, cutoff], |row| {
            Ok(DailyStats {
                symbol: row.get(0)?,
                date: row.get(1)?,
                total_signals: row.get(2)?,
                long_signals: row.get(3)?,
                short_signals: row.get(4)?,
                avg_strength: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
            })
        })?;

        let mut stats = Vec::new();
        for row in rows {
            stats.push(row?);
        }
        Ok(stats)
    }
}

fn insert_candle(conn: &rusqlite::Connection, candle: &Candle) -> Result<()> {
    conn.execute(
        "INSERT INTO candles (
            symbol, interval, open_time, close_time, open, high, low, close, volume, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(symbol, open_time, interval) DO UPDATE SET
            close_time = excluded.close_time,
            open = excluded.open,
            high = excluded.high,
            low = excluded.low,
            close = excluded.close,
            volume = excluded.volume",
        params![
            candle.symbol,
            candle.interval,
            candle.open_time_ms,
            candle.close_time_ms,
            candle.open,
            candle.high,
            candle.low,
            candle.close,
            candle.volume,
            Utc::now().timestamp_millis(),
        ],
    )?;
    Ok(())
}
