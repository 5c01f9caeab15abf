use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use super::{format_duration, split_and_sort, trading_url, ConsoleNotifier, Notifier, REMOTE_GROUP_LIMIT};
use crate::error::{AppError, Result};
use crate::models::AlertEvent;

const PUSHPLUS_ENDPOINT: &str = "http://www.pushplus.plus/send";

/// PushPlus令牌推送通知器
pub struct PushPlusNotifier {
    user_token: String,
    /// 好友令牌，多人用逗号分隔
    to: String,
    http_client: reqwest::Client,
    fallback: ConsoleNotifier,
}

#[derive(Serialize)]
struct PushPlusRequest {
    token: String,
    title: String,
    content: String,
    template: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    to: String,
}

#[derive(Deserialize)]
struct PushPlusResponse {
    code: i64,
    #[serde(default)]
    msg: String,
}

impl PushPlusNotifier {
    pub fn new(user_token: String, to: String) -> Self {
        Self {
            user_token,
            to,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            fallback: ConsoleNotifier::new(),
        }
    }

    async fn send_message(&self, title: String, content: String) -> Result<()> {
        let request = PushPlusRequest {
            token: self.user_token.clone(),
            title,
            content,
            template: "html",
            to: self.to.clone(),
        };

        let response: PushPlusResponse = self
            .http_client
            .post(PUSHPLUS_ENDPOINT)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if response.code != 200 {
            return Err(AppError::NotifyError(format!(
                "PushPlus API错误 [{}]: {}",
                response.code, response.msg
            )));
        }

        Ok(())
    }

    fn build_html(&self, alert: &AlertEvent) -> String {
        let (arrow, color, change_text) = if alert.change_percent >= 0.0 {
            ("📈", "#00C851", "上涨")
        } else {
            ("📉", "#FF4444", "下跌")
        };

        format!(
            r#"<div style="border: 2px solid {color}; border-radius: 10px; padding: 20px;">
    <h2 style="color: {color}; text-align: center;">{arrow} 价格预警触发</h2>
    <div style="background-color: white; padding: 15px; border-radius: 8px;">
        <p><strong>交易对:</strong> <a href="{url}" target="_blank">{symbol}</a></p>
        <p><strong>当前价格:</strong> ${current:.6}</p>
        <p><strong>{period}前价格:</strong> ${past:.6}</p>
        <p><strong>价格变化:</strong> <span style="color: {color}; font-weight: bold;">{change:+.2}%</span></p>
        <p><strong>预警时间:</strong> {time}</p>
    </div>
    <div style="background-color: {color}; color: white; padding: 10px; border-radius: 8px; text-align: center;">
        <strong>💡 该交易对出现显著{change_text}，请关注市场动向！</strong>
    </div>
</div>"#,
            color = color,
            arrow = arrow,
            url = trading_url(&alert.symbol),
            symbol = alert.symbol,
            current = alert.current_price,
            period = format_duration(alert.monitor_period),
            past = alert.past_price,
            change = alert.change_percent,
            time = alert.alert_time.format("%Y-%m-%d %H:%M:%S"),
            change_text = change_text,
        )
    }

    fn build_batch_html(&self, alerts: &[AlertEvent]) -> String {
        let (risers, fallers) = split_and_sort(alerts);

        let mut content = format!(
            r#"<div style="border: 2px solid #FF6B6B; border-radius: 10px; padding: 20px;">
    <h2 style="color: #FF6B6B; text-align: center;">🚨 批量价格预警触发</h2>
    <p>📈 上涨币种: <span style="color: #00C851; font-weight: bold;">{}个</span></p>
    <p>📉 下跌币种: <span style="color: #FF4444; font-weight: bold;">{}个</span></p>
    <p>🕐 预警时间: {}</p>"#,
            risers.len(),
            fallers.len(),
            alerts[0].alert_time.format("%Y-%m-%d %H:%M:%S")
        );

        if !risers.is_empty() {
            content.push_str(&render_group_table(
                &risers,
                "📈 上涨币种 (按涨幅排序)",
                "#00C851",
                true,
            ));
        }

        if !fallers.is_empty() {
            content.push_str(&render_group_table(
                &fallers,
                "📉 下跌币种 (按跌幅排序)",
                "#FF4444",
                false,
            ));
        }

        content.push_str("\n</div>");
        content
    }
}

fn render_group_table(alerts: &[AlertEvent], title: &str, color: &str, riser: bool) -> String {
    let mut html = format!(
        r#"
    <h3 style="color: {};">{}:</h3>
    <table style="width: 100%; border-collapse: collapse;">
        <tr><th style="text-align: left;">币种</th><th style="text-align: right;">当前价格</th><th style="text-align: right;">变化</th></tr>"#,
        color, title
    );

    for alert in alerts.iter().take(REMOTE_GROUP_LIMIT) {
        let change = if riser {
            format!("+{:.2}%", alert.change_percent)
        } else {
            format!("{:.2}%", alert.change_percent)
        };
        html.push_str(&format!(
            r#"
        <tr>
            <td><a href="{}" target="_blank">{}</a></td>
            <td style="text-align: right;">${:.6}</td>
            <td style="text-align: right; color: {}; font-weight: bold;">{}</td>
        </tr>"#,
            trading_url(&alert.symbol),
            alert.symbol,
            alert.current_price,
            color,
            change
        ));
    }

    if alerts.len() > REMOTE_GROUP_LIMIT {
        html.push_str(&format!(
            r#"
        <tr><td colspan="3" style="text-align: center; color: #666;">... 还有{}个币种</td></tr>"#,
            alerts.len() - REMOTE_GROUP_LIMIT
        ));
    }

    html.push_str("\n    </table>");
    html
}

#[async_trait]
impl Notifier for PushPlusNotifier {
    async fn send_alert(&self, alert: &AlertEvent) -> Result<()> {
        let title = format!("📈 OKX价格预警 - {}", alert.symbol);
        let content = self.build_html(alert);

        if let Err(e) = self.send_message(title, content).await {
            warn!("❌ PushPlus发送失败: {}，降级为控制台输出", e);
            return self.fallback.send_alert(alert).await;
        }

        info!(
            "✅ PushPlus通知已发送: {} 变化 {:+.2}%",
            alert.symbol, alert.change_percent
        );
        Ok(())
    }

    async fn send_batch_alerts(&self, alerts: &[AlertEvent]) -> Result<()> {
        if alerts.is_empty() {
            return Ok(());
        }
        if alerts.len() == 1 {
            return self.send_alert(&alerts[0]).await;
        }

        let title = format!("📊 OKX批量价格预警 - {}个币种", alerts.len());
        let content = self.build_batch_html(alerts);

        if let Err(e) = self.send_message(title, content).await {
            warn!("❌ PushPlus批量发送失败: {}，降级为控制台输出", e);
            return self.fallback.send_batch_alerts(alerts).await;
        }

        info!("✅ PushPlus批量通知已发送: {}个币种预警", alerts.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_batch_html_caps_rows() {
        let notifier = PushPlusNotifier::new("tok".to_string(), String::new());

        let alerts: Vec<AlertEvent> = (0..13)
            .map(|i| AlertEvent {
                symbol: format!("S{}-USDT", i),
                current_price: 100.0,
                past_price: 95.0,
                change_percent: 4.0 + i as f64,
                alert_time: Utc::now(),
                monitor_period: Duration::from_secs(300),
            })
            .collect();

        let html = notifier.build_batch_html(&alerts);
        assert!(html.contains("还有3个币种"));
    }

    #[test]
    fn test_request_omits_empty_to() {
        let request = PushPlusRequest {
            token: "tok".to_string(),
            title: "t".to_string(),
            content: "c".to_string(),
            template: "html",
            to: String::new(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("\"to\""));
    }
}
