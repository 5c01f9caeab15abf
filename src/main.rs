// OKX市场哨兵主程序
use okx_sentry::app::App;
use okx_sentry::config::Config;
use okx_sentry::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());

    let config = if std::path::Path::new(&config_path).exists() {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    init_logging(&config.log.level);

    if !std::path::Path::new(&config_path).exists() {
        warn!("配置文件 {} 不存在，使用默认配置", config_path);
    }

    let mut app = App::new(config);
    app.start().await;

    tokio::signal::ctrl_c()
        .await
        .map_err(okx_sentry::AppError::IoError)?;

    app.stop().await;

    info!("进程退出");
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
