use async_trait::async_trait;
use base64::prelude::*;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{info, warn};
use url::form_urlencoded;

use super::{format_duration, split_and_sort, trading_url, ConsoleNotifier, Notifier, REMOTE_GROUP_LIMIT};
use crate::error::{AppError, Result};
use crate::models::AlertEvent;

type HmacSha256 = Hmac<Sha256>;

/// 钉钉加签webhook通知器
pub struct DingTalkNotifier {
    webhook_url: String,
    secret: String,
    http_client: reqwest::Client,
    fallback: ConsoleNotifier,
}

#[derive(Serialize)]
struct DingTalkMessage {
    msgtype: &'static str,
    markdown: DingTalkMarkdown,
    at: DingTalkAt,
}

#[derive(Serialize)]
struct DingTalkMarkdown {
    title: String,
    text: String,
}

#[derive(Serialize)]
struct DingTalkAt {
    #[serde(rename = "isAtAll")]
    is_at_all: bool,
}

#[derive(Deserialize)]
struct DingTalkResponse {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

impl DingTalkNotifier {
    pub fn new(webhook_url: String, secret: String) -> Self {
        if secret.is_empty() {
            warn!("⚠️ 钉钉通知已配置，但未设置secret（建议配置加签验证）");
        }

        Self {
            webhook_url,
            secret,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            fallback: ConsoleNotifier::new(),
        }
    }

    /// 加签: base64(HMAC-SHA256(secret, "<毫秒时间戳>\n<secret>"))，再URL编码
    pub fn sign(secret: &str, timestamp_ms: i64) -> Result<String> {
        let string_to_sign = format!("{}\n{}", timestamp_ms, secret);

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::NotifyError(format!("初始化签名失败: {}", e)))?;
        mac.update(string_to_sign.as_bytes());

        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());
        Ok(form_urlencoded::byte_serialize(signature.as_bytes()).collect())
    }

    /// 带timestamp和sign查询参数的完整webhook地址
    fn signed_url(&self, timestamp_ms: i64) -> Result<String> {
        if self.secret.is_empty() {
            return Ok(self.webhook_url.clone());
        }

        let signature = Self::sign(&self.secret, timestamp_ms)?;
        let separator = if self.webhook_url.contains('?') { "&" } else { "?" };

        Ok(format!(
            "{}{}timestamp={}&sign={}",
            self.webhook_url, separator, timestamp_ms, signature
        ))
    }

    async fn send_message(&self, title: String, text: String) -> Result<()> {
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let url = self.signed_url(timestamp_ms)?;

        let message = DingTalkMessage {
            msgtype: "markdown",
            markdown: DingTalkMarkdown { title, text },
            at: DingTalkAt { is_at_all: false },
        };

        let response: DingTalkResponse = self
            .http_client
            .post(&url)
            .json(&message)
            .send()
            .await?
            .json()
            .await?;

        if response.errcode != 0 {
            return Err(AppError::NotifyError(format!(
                "钉钉API错误 [{}]: {}",
                response.errcode, response.errmsg
            )));
        }

        Ok(())
    }

    fn build_markdown(&self, alert: &AlertEvent) -> String {
        let (arrow, color, change_text) = if alert.change_percent >= 0.0 {
            ("📈", "green", "上涨")
        } else {
            ("📉", "red", "下跌")
        };

        format!(
            "## {arrow} 价格预警触发\n\n\
             **交易对**: [{symbol}]({url})  \n\
             **当前价格**: ${current:.6}  \n\
             **{period}前价格**: ${past:.6}  \n\
             **价格变化**: <font color=\"{color}\">{change:+.2}%</font>  \n\
             **预警时间**: {time}  \n\n\
             > {arrow} 该交易对出现显著{change_text}，请关注市场动向！",
            arrow = arrow,
            symbol = alert.symbol,
            url = trading_url(&alert.symbol),
            current = alert.current_price,
            period = format_duration(alert.monitor_period),
            past = alert.past_price,
            color = color,
            change = alert.change_percent,
            time = alert.alert_time.format("%Y-%m-%d %H:%M:%S"),
            change_text = change_text,
        )
    }

    fn build_batch_markdown(&self, alerts: &[AlertEvent]) -> String {
        let (risers, fallers) = split_and_sort(alerts);

        let mut content = format!(
            "## 🚨 批量价格预警触发\n\n\
             **预警统计**:  \n\
             📈 上涨币种: <font color=\"green\">{}个</font>  \n\
             📉 下跌币种: <font color=\"red\">{}个</font>  \n\
             🕐 预警时间: {}  \n\n",
            risers.len(),
            fallers.len(),
            alerts[0].alert_time.format("%Y-%m-%d %H:%M:%S")
        );

        if !risers.is_empty() {
            content.push_str("**📈 上涨币种**:\n");
            for alert in risers.iter().take(REMOTE_GROUP_LIMIT) {
                content.push_str(&format!(
                    "- 📈 **[{}]({})**: ${:.6} (<font color=\"green\">+{:.2}%</font>)\n",
                    alert.symbol,
                    trading_url(&alert.symbol),
                    alert.current_price,
                    alert.change_percent
                ));
            }
            if risers.len() > REMOTE_GROUP_LIMIT {
                content.push_str(&format!(
                    "- ... 还有{}个上涨币种\n",
                    risers.len() - REMOTE_GROUP_LIMIT
                ));
            }
            content.push('\n');
        }

        if !fallers.is_empty() {
            content.push_str("**📉 下跌币种**:\n");
            for alert in fallers.iter().take(REMOTE_GROUP_LIMIT) {
                content.push_str(&format!(
                    "- 📉 **[{}]({})**: ${:.6} (<font color=\"red\">{:.2}%</font>)\n",
                    alert.symbol,
                    trading_url(&alert.symbol),
                    alert.current_price,
                    alert.change_percent
                ));
            }
            if fallers.len() > REMOTE_GROUP_LIMIT {
                content.push_str(&format!(
                    "- ... 还有{}个下跌币种\n",
                    fallers.len() - REMOTE_GROUP_LIMIT
                ));
            }
        }

        content.push_str("\n> ⚠️ 多个交易对同时出现显著波动，请密切关注市场动向！");
        content
    }
}

#[async_trait]
impl Notifier for DingTalkNotifier {
    async fn send_alert(&self, alert: &AlertEvent) -> Result<()> {
        let title = format!("📈 OKX价格预警 - {}", alert.symbol);
        let text = self.build_markdown(alert);

        if let Err(e) = self.send_message(title, text).await {
            warn!("❌ 钉钉发送失败: {}，降级为控制台输出", e);
            return self.fallback.send_alert(alert).await;
        }

        info!(
            "✅ 钉钉通知已发送: {} 变化 {:+.2}%",
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
        let text = self.build_batch_markdown(alerts);

        if let Err(e) = self.send_message(title, text).await {
            warn!("❌ 钉钉批量发送失败: {}，降级为控制台输出", e);
            return self.fallback.send_batch_alerts(alerts).await;
        }

        info!("✅ 钉钉批量通知已发送: {}个币种预警", alerts.len());
        Ok(())
    }
}
