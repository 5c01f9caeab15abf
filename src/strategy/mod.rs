// 唐奇安通道突破策略管线
pub mod buffer;
pub mod db;
pub mod engine;
pub mod history;
pub mod indicators;
pub mod perf;
pub mod signal;
pub mod stream;

pub use buffer::{CandleBufferMap, MAX_BUFFER};
pub use db::{DailyStats, SignalStore, SqliteSignalStore, StoredSignal};
pub use engine::{DonchianEngine, EngineStats};
pub use history::HistoryFetcher;
pub use perf::PerformanceReporter;
pub use signal::SignalDetector;
pub use stream::{CandleStreamClient, StreamConfig, OKX_WS_ENDPOINT};
