use async_trait::async_trait;

use super::{format_duration, split_and_sort, Notifier};
use crate::error::Result;
use crate::models::AlertEvent;

/// 单条预警框宽度
const SINGLE_WIDTH: usize = 60;
/// 批量预警框宽度
const BATCH_WIDTH: usize = 80;

/// 控制台通知器
///
/// 兜底后端，同时也是远端后端失败时的降级目标。
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self
    }

    fn print_alert(&self, alert: &AlertEvent) {
        let arrow = if alert.change_percent >= 0.0 { "📈" } else { "📉" };

        println!();
        println!("╔{}╗", "═".repeat(SINGLE_WIDTH));
        print_row(&format!("{} 🚨 价格预警触发！", arrow), SINGLE_WIDTH);
        print_row("", SINGLE_WIDTH);
        print_row(&format!("交易对: {}", alert.symbol), SINGLE_WIDTH);
        print_row(&format!("当前价格: ${:.6}", alert.current_price), SINGLE_WIDTH);
        print_row(
            &format!(
                "{}前价格: ${:.6}",
                format_duration(alert.monitor_period),
                alert.past_price
            ),
            SINGLE_WIDTH,
        );

        if alert.change_percent > 0.0 {
            print_row(&format!("涨幅: +{:.2}%", alert.change_percent), SINGLE_WIDTH);
        } else {
            print_row(&format!("跌幅: {:.2}%", alert.change_percent), SINGLE_WIDTH);
        }

        print_row(
            &format!("预警时间: {}", alert.alert_time.format("%Y-%m-%d %H:%M:%S")),
            SINGLE_WIDTH,
        );
        print_row("", SINGLE_WIDTH);

        if alert.change_percent > 0.0 {
            print_row("💡 该交易对出现显著上涨，请关注市场动向！", SINGLE_WIDTH);
        } else {
            print_row("💡 该交易对出现显著下跌，请关注风险控制！", SINGLE_WIDTH);
        }

        println!("╚{}╝", "═".repeat(SINGLE_WIDTH));
        println!();
    }

    fn print_batch(&self, alerts: &[AlertEvent]) {
        let (risers, fallers) = split_and_sort(alerts);

        println!();
        println!("╔{}╗", "═".repeat(BATCH_WIDTH));
        print_row(
            &format!("🚨 批量价格预警触发！- {}个币种", alerts.len()),
            BATCH_WIDTH,
        );
        print_row(
            &format!("📈 上涨: {}个  📉 下跌: {}个", risers.len(), fallers.len()),
            BATCH_WIDTH,
        );
        print_row("", BATCH_WIDTH);

        if !risers.is_empty() {
            print_row("📈 上涨币种 (按涨幅排序):", BATCH_WIDTH);
            for (i, alert) in risers.iter().enumerate() {
                print_row(
                    &format!(
                        "  {}. 📈 {}: ${:.6} (+{:.2}%)",
                        i + 1,
                        alert.symbol,
                        alert.current_price,
                        alert.change_percent
                    ),
                    BATCH_WIDTH,
                );
            }
            print_row("", BATCH_WIDTH);
        }

        if !fallers.is_empty() {
            print_row("📉 下跌币种 (按跌幅排序):", BATCH_WIDTH);
            for (i, alert) in fallers.iter().enumerate() {
                print_row(
                    &format!(
                        "  {}. 📉 {}: ${:.6} ({:.2}%)",
                        i + 1,
                        alert.symbol,
                        alert.current_price,
                        alert.change_percent
                    ),
                    BATCH_WIDTH,
                );
            }
            print_row("", BATCH_WIDTH);
        }

        print_row(
            &format!("预警时间: {}", alerts[0].alert_time.format("%Y-%m-%d %H:%M:%S")),
            BATCH_WIDTH,
        );
        print_row("", BATCH_WIDTH);
        print_row("💡 多个交易对同时出现显著波动，请密切关注市场动向！", BATCH_WIDTH);
        println!("╚{}╝", "═".repeat(BATCH_WIDTH));
        println!();
    }
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// 按Unicode字符数而非字节数计算填充，避免中文字符把边框撑歪
fn pad_content(content: &str, total_width: usize) -> String {
    let char_count = content.chars().count();
    let padding = total_width.saturating_sub(char_count + 2);
    format!(" {}{}", content, " ".repeat(padding.saturating_sub(1)))
}

fn print_row(content: &str, width: usize) {
    println!("║{}║", pad_content(content, width));
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send_alert(&self, alert: &AlertEvent) -> Result<()> {
        self.print_alert(alert);
        Ok(())
    }

    async fn send_batch_alerts(&self, alerts: &[AlertEvent]) -> Result<()> {
        if alerts.is_empty() {
            return Ok(());
        }
        if alerts.len() == 1 {
            return self.send_alert(&alerts[0]).await;
        }
        self.print_batch(alerts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_counts_codepoints_not_bytes() {
        // "交易对" 是9字节3字符，按字符数填充
        let padded = pad_content("交易对", 20);
        assert_eq!(padded.chars().count(), 18);

        let ascii = pad_content("abc", 20);
        assert_eq!(ascii.chars().count(), 18);
    }

    #[test]
    fn test_pad_never_negative() {
        let long = "x".repeat(100);
        let padded = pad_content(&long, 20);
        // 超长内容不填充也不崩
        assert!(padded.chars().count() >= 100);
    }
}
