use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::notifier::select_notifier;
use crate::sentry::{AlarmAnalyzer, AlarmScheduler, PriceStore, TickerFetcher};
use crate::strategy::{DonchianEngine, PerformanceReporter, SqliteSignalStore};

/// 关停宽限期
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// 应用程序管理器
///
/// 两条管线（价格预警、突破策略）挂在同一个关停信号根上，
/// 彼此独立：任一条启动失败或中途退出都不影响另一条。
pub struct App {
    config: Config,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl App {
    pub fn new(config: Config) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            shutdown_tx,
            shutdown_rx,
            handles: Vec::new(),
        }
    }

    /// 启动已启用的管线
    pub async fn start(&mut self) {
        info!("🚀 OKX Market Sentry 启动中...");

        if self.config.alert.threshold > 0.0 {
            let config = self.config.clone();
            let shutdown = self.shutdown_rx.clone();
            self.handles.push(tokio::spawn(async move {
                run_alarm_pipeline(config, shutdown).await;
            }));
        } else {
            info!("🚫 预警阈值未配置，价格预警管线未启用");
        }

        if self.config.strategy.donchian.enabled {
            let config = self.config.clone();
            let shutdown = self.shutdown_rx.clone();
            self.handles.push(tokio::spawn(async move {
                run_strategy_pipeline(config, shutdown).await;
            }));
        }

        info!("✅ OKX Market Sentry 已启动");
    }

    /// 优雅停止：广播关停信号并等待所有管线退出
    pub async fn stop(&mut self) {
        info!("🛑 收到停止信号，正在优雅关闭...");

        let _ = self.shutdown_tx.send(true);

        let drain = futures_util::future::join_all(self.handles.drain(..));
        match tokio::time::timeout(SHUTDOWN_GRACE, drain).await {
            Ok(_) => info!("✅ OKX Market Sentry 已安全关闭"),
            Err(_) => warn!("⚠️ 强制关闭超时"),
        }
    }
}

/// 价格预警管线：存储 + 拉取器 + 分析器 + 对齐调度器
async fn run_alarm_pipeline(config: Config, shutdown: watch::Receiver<bool>) {
    info!("📊 启动价格预警管线");

    let store = Arc::new(
        PriceStore::with_redis(
            config.alert.monitor_period(),
            config.fetch.interval(),
            &config.redis,
        )
        .await,
    );

    let notifier = select_notifier(&config);

    let fetcher = match TickerFetcher::new(store.clone(), &config.network, &config.fetch) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            error!("❌ 创建行情拉取器失败: {}", e);
            return;
        }
    };

    let analyzer = Arc::new(AlarmAnalyzer::new(
        store.clone(),
        notifier,
        config.alert.threshold,
        config.alert.monitor_period(),
    ));

    let scheduler = AlarmScheduler::new(fetcher, analyzer, store, config.alert.monitor_period());
    scheduler.run(shutdown).await;
}

/// 突破策略管线：信号存储 + 引擎 + 性能报告器
async fn run_strategy_pipeline(config: Config, mut shutdown: watch::Receiver<bool>) {
    info!("📈 启动唐奇安通道策略引擎");

    let store: Arc<dyn crate::strategy::SignalStore> =
        match SqliteSignalStore::new(&config.database.path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("❌ 初始化信号数据库失败: {}", e);
                return;
            }
        };

    let engine = match DonchianEngine::new(
        config.strategy.donchian.clone(),
        &config.network,
        store.clone(),
    ) {
        Ok(engine) => engine,
        Err(e) => {
            error!("❌ 创建唐奇安策略引擎失败: {}", e);
            return;
        }
    };

    if let Err(e) = engine.start().await {
        error!("❌ 启动唐奇安策略引擎失败: {}", e);
        return;
    }

    let reporter = PerformanceReporter::new(store, config.strategy.donchian.symbols.clone());
    let reporter_shutdown = shutdown.clone();
    let reporter_handle = tokio::spawn(async move {
        reporter.run(reporter_shutdown).await;
    });

    // 等待关停信号后按序停止
    let _ = shutdown.changed().await;

    engine.stop().await;
    let _ = reporter_handle.await;
}
