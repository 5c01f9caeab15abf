// 通知模块 - 预警消息的格式化与分发
//
// 三种后端按优先级选择：钉钉(加签webhook) > PushPlus(令牌推送) > 控制台。
// 远端后端发送失败时一律降级为控制台输出，错误不向上游传播。
mod console;
mod dingtalk;
mod pushplus;

pub use console::ConsoleNotifier;
pub use dingtalk::DingTalkNotifier;
pub use pushplus::PushPlusNotifier;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::models::AlertEvent;

/// 通知接口
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(&self, alert: &AlertEvent) -> Result<()>;
    async fn send_batch_alerts(&self, alerts: &[AlertEvent]) -> Result<()>;
}

/// 根据配置选择通知后端（优先级：钉钉 > PushPlus > 控制台）
pub fn select_notifier(config: &Config) -> Arc<dyn Notifier> {
    if !config.dingtalk.webhook_url.is_empty() {
        info!("✅ 已配置钉钉通知服务");
        return Arc::new(DingTalkNotifier::new(
            config.dingtalk.webhook_url.clone(),
            config.dingtalk.secret.clone(),
        ));
    }

    if !config.pushplus.user_token.is_empty() {
        info!("✅ 已配置PushPlus通知服务");
        return Arc::new(PushPlusNotifier::new(
            config.pushplus.user_token.clone(),
            config.pushplus.to.clone(),
        ));
    }

    info!("🔧 未配置远端通知后端，使用控制台输出模式");
    Arc::new(ConsoleNotifier::new())
}

/// 远端后端单个分组渲染的行数上限
pub(crate) const REMOTE_GROUP_LIMIT: usize = 10;

/// 将一批预警拆分为上涨/下跌两组并排序
///
/// 上涨按涨幅降序，下跌按带符号百分比升序（跌得最多的在前）。
pub fn split_and_sort(alerts: &[AlertEvent]) -> (Vec<AlertEvent>, Vec<AlertEvent>) {
    let mut risers: Vec<AlertEvent> = alerts
        .iter()
        .filter(|a| a.change_percent > 0.0)
        .cloned()
        .collect();
    let mut fallers: Vec<AlertEvent> = alerts
        .iter()
        .filter(|a| a.change_percent <= 0.0)
        .cloned()
        .collect();

    risers.sort_by(|a, b| b.change_percent.partial_cmp(&a.change_percent).unwrap());
    fallers.sort_by(|a, b| a.change_percent.partial_cmp(&b.change_percent).unwrap());

    (risers, fallers)
}

/// 格式化监控周期为中文描述
pub(crate) fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.0}秒", secs)
    } else if secs < 3600.0 {
        format!("{:.0}分钟", secs / 60.0)
    } else if secs < 86400.0 {
        format!("{:.1}小时", secs / 3600.0)
    } else {
        format!("{:.1}天", secs / 86400.0)
    }
}

/// 根据交易对生成行情页链接（BTC-USDT → BTCUSDT）
pub(crate) fn trading_url(symbol: &str) -> String {
    format!("https://www.okx.com/trade-spot/{}", symbol.to_lowercase())
}
