use tracing::{debug, info};

use crate::config::DonchianConfig;
use crate::models::{AtrData, Candle, DonchianChannel, SignalType, TradingSignal};
use crate::strategy::indicators::{AtrCalculator, DonchianCalculator};

/// 唐奇安通道突破信号检测器
///
/// 对最新K线做确定性的短路门控：数据量 → 盘整 → ATR下降 →
/// 通道 → 突破方向 → 成交量确认 → 强度阈值。任何一道门
/// 不通过都返回None，属于正常路径而非错误。
pub struct SignalDetector {
    donchian: DonchianCalculator,
    atr: AtrCalculator,
    config: DonchianConfig,
}

impl SignalDetector {
    pub fn new(config: DonchianConfig) -> Self {
        Self {
            donchian: DonchianCalculator::new(config.donchian_length, config.donchian_offset),
            atr: AtrCalculator::new(config.atr_length),
            config,
        }
    }

    pub fn required_bars(&self) -> usize {
        self.config.required_bars()
    }

    /// 检测交易信号
    pub fn detect(&self, symbol: &str, candles: &[Candle]) -> Option<TradingSignal> {
        // 1. 数据量
        if candles.len() < self.required_bars() {
            return None;
        }

        // 2. 盘整阶段
        if !self
            .donchian
            .is_consolidating(candles, self.config.consolidation_bars)
        {
            debug!(symbol, "未检测到盘整状态");
            return None;
        }

        // 3. ATR可算且呈下降趋势
        let atr = self.atr.calculate(candles)?;
        if !self.atr.is_decreasing(&atr, candles) {
            debug!(symbol, atr_value = atr.value, atr_slope = atr.slope, "ATR未呈下降趋势");
            return None;
        }

        // 4. 唐奇安通道
        let channel = self.donchian.calculate(candles)?;

        // 5. 突破方向
        let direction = self.donchian.breakout(candles, &channel)?;

        let latest = &candles[candles.len() - 1];
        let previous = &candles[candles.len() - 2];

        // 6. 成交量确认
        if latest.volume < previous.volume * self.config.volume_multiplier {
            debug!(
                symbol,
                volume = latest.volume,
                prev_volume = previous.volume,
                "成交量未达到确认倍数"
            );
            return None;
        }

        // 7. 信号强度
        let strength = self.strength(latest, previous, &channel, &atr, candles);
        if strength < self.config.min_signal_strength {
            debug!(
                symbol,
                strength,
                min_required = self.config.min_signal_strength,
                "信号强度不足"
            );
            return None;
        }

        let breakout_amplitude = match direction {
            SignalType::Long => latest.close - channel.upper,
            SignalType::Short => channel.lower - latest.close,
        };

        let signal = TradingSignal {
            symbol: symbol.to_string(),
            signal_type: direction,
            price: latest.close,
            volume: latest.volume,
            volume_ratio: if previous.volume > 0.0 {
                latest.volume / previous.volume
            } else {
                0.0
            },
            donchian_upper: channel.upper,
            donchian_lower: channel.lower,
            atr_value: atr.value,
            atr_slope: atr.slope,
            consolidation_bars: self.config.consolidation_bars,
            breakout_amplitude,
            strength,
            trigger_time_ms: latest.close_time_ms,
            kline_time_ms: latest.open_time_ms,
        };

        info!(
            symbol,
            signal_type = signal.signal_type.as_str(),
            price = signal.price,
            volume_ratio = signal.volume_ratio,
            strength = signal.strength,
            "🎯 检测到交易信号"
        );

        Some(signal)
    }

    /// 信号强度（0-100的加权和）
    ///
    /// 突破幅度0.30 + 成交量0.25 + ATR趋势0.20 + K线形态0.15 + 通道位置0.10
    fn strength(
        &self,
        latest: &Candle,
        previous: &Candle,
        channel: &DonchianChannel,
        atr: &AtrData,
        candles: &[Candle],
    ) -> f64 {
        let mut strength = 0.0;
        strength += self.breakout_strength(latest, channel) * 0.30;
        strength += self.volume_strength(latest, previous) * 0.25;
        strength += self.atr_strength(atr, candles) * 0.20;
        strength += self.candle_strength(latest) * 0.15;
        strength += self.position_strength(latest, channel) * 0.10;
        strength
    }

    /// 突破距离相对于通道宽度的比例，封顶100
    fn breakout_strength(&self, candle: &Candle, channel: &DonchianChannel) -> f64 {
        if channel.upper == channel.lower {
            return 0.0;
        }

        let distance = if candle.close > channel.upper {
            candle.close - channel.upper
        } else if candle.close < channel.lower {
            channel.lower - candle.close
        } else {
            return 0.0;
        };

        (distance / channel.width() * 100.0).min(100.0)
    }

    /// 成交量倍数阶梯打分（阶梯以配置倍数为基准）
    fn volume_strength(&self, current: &Candle, previous: &Candle) -> f64 {
        if previous.volume == 0.0 {
            return 0.0;
        }

        let ratio = current.volume / previous.volume;
        let base = self.config.volume_multiplier;

        if ratio >= base * 2.0 {
            100.0
        } else if ratio >= base {
            80.0
        } else if ratio >= base * 0.8 {
            60.0
        } else if ratio >= base * 0.6 {
            40.0
        } else {
            20.0
        }
    }

    /// 斜率部分最高50分（负斜率放大1000倍），百分位部分(100-p)/2
    fn atr_strength(&self, atr: &AtrData, candles: &[Candle]) -> f64 {
        let slope_strength = if atr.slope < 0.0 {
            ((-atr.slope) * 1000.0).min(50.0)
        } else {
            0.0
        };

        let percentile = self.atr.percentile(atr.value, candles);
        slope_strength + (100.0 - percentile) / 2.0
    }

    /// 实体占整根K线的比例
    fn candle_strength(&self, candle: &Candle) -> f64 {
        if candle.high == candle.low {
            return 0.0;
        }
        (candle.close - candle.open).abs() / (candle.high - candle.low) * 100.0
    }

    /// 收盘价在通道中的越界程度
    fn position_strength(&self, candle: &Candle, channel: &DonchianChannel) -> f64 {
        let position = self.donchian.position(candle.close, channel);

        if candle.close > channel.upper {
            (position - 1.0) * 200.0
        } else if candle.close < channel.lower {
            (0.0 - position) * 200.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DonchianConfig {
        DonchianConfig {
            enabled: true,
            symbols: vec!["BTC-USDT".to_string()],
            interval: "15m".to_string(),
            donchian_length: 15,
            donchian_offset: 1,
            atr_length: 7,
            consolidation_bars: 15,
            volume_multiplier: 1.5,
            min_signal_strength: 0.3,
        }
    }

    fn candle(i: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            symbol: "BTC-USDT".to_string(),
            interval: "15m".to_string(),
            open_time_ms: i * 900_000,
            close_time_ms: (i + 1) * 900_000,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// 波幅收敛的盘整序列，最后留出突破空间
    fn consolidating_series(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let r = 2.0 - 1.7 * (i as f64) / (n as f64);
                candle(i as i64, 100.0, 100.0 + r, 100.0 - r, 100.0, 1000.0)
            })
            .collect()
    }

    #[test]
    fn test_insufficient_bars_yields_none() {
        let detector = SignalDetector::new(config());
        assert_eq!(detector.required_bars(), 83);

        let candles = consolidating_series(50);
        assert!(detector.detect("BTC-USDT", &candles).is_none());
    }

    #[test]
    fn test_long_breakout_signal() {
        let detector = SignalDetector::new(config());
        let mut candles = consolidating_series(90);

        // 阳线放量突破上轨：上轨来自前15根（不含最新），约100.45以内
        let upper = candles[90 - 16..90 - 1]
            .iter()
            .map(|c| c.high)
            .fold(f64::MIN, f64::max);
        let close = upper + 0.3;
        candles.push(candle(90, 100.0, close + 0.1, 99.9, close, 2000.0));

        let signal = detector.detect("BTC-USDT", &candles).expect("应产生LONG信号");
        assert_eq!(signal.signal_type, SignalType::Long);
        assert_eq!(signal.price, close);
        assert!(signal.strength >= 0.3);
        assert!((signal.volume_ratio - 2.0).abs() < 1e-9);
        assert!(signal.breakout_amplitude > 0.0);
    }

    #[test]
    fn test_volume_gate_blocks_weak_breakout() {
        let detector = SignalDetector::new(config());
        let mut candles = consolidating_series(90);

        let upper = candles[90 - 16..90 - 1]
            .iter()
            .map(|c| c.high)
            .fold(f64::MIN, f64::max);
        let close = upper + 0.3;
        // 成交量1200 < 1.5 × 1000 → 被成交量门拦下
        candles.push(candle(90, 100.0, close + 0.1, 99.9, close, 1200.0));

        assert!(detector.detect("BTC-USDT", &candles).is_none());
    }

    #[test]
    fn test_no_breakout_no_signal() {
        let detector = SignalDetector::new(config());
        let mut candles = consolidating_series(90);
        // 收盘仍在通道内
        candles.push(candle(90, 100.0, 100.4, 99.8, 100.1, 2000.0));
        assert!(detector.detect("BTC-USDT", &candles).is_none());
    }

    #[test]
    fn test_short_breakout_signal() {
        let detector = SignalDetector::new(config());
        let mut candles = consolidating_series(90);

        let lower = candles[90 - 16..90 - 1]
            .iter()
            .map(|c| c.low)
            .fold(f64::MAX, f64::min);
        let close = lower - 0.3;
        candles.push(candle(90, 100.0, 100.1, close - 0.1, close, 2000.0));

        let signal = detector.detect("BTC-USDT", &candles).expect("应产生SHORT信号");
        assert_eq!(signal.signal_type, SignalType::Short);
    }

    #[test]
    fn test_volume_strength_steps() {
        let detector = SignalDetector::new(config());
        let prev = candle(0, 100.0, 101.0, 99.0, 100.0, 1000.0);

        let cases = [
            (3000.0, 100.0), // ≥ 2×1.5
            (1500.0, 80.0),  // ≥ 1.5
            (1200.0, 60.0),  // ≥ 0.8×1.5
            (900.0, 40.0),   // ≥ 0.6×1.5
            (500.0, 20.0),
        ];
        for (volume, expected) in cases {
            let curr = candle(1, 100.0, 101.0, 99.0, 100.5, volume);
            assert_eq!(detector.volume_strength(&curr, &prev), expected);
        }

        let zero_prev = candle(0, 100.0, 101.0, 99.0, 100.0, 0.0);
        let curr = candle(1, 100.0, 101.0, 99.0, 100.5, 1000.0);
        assert_eq!(detector.volume_strength(&curr, &zero_prev), 0.0);
    }

    #[test]
    fn test_candle_strength_body_ratio() {
        let detector = SignalDetector::new(config());
        // 实体1.0，全幅2.0 → 50分
        let c = candle(0, 100.0, 101.5, 99.5, 101.0, 1000.0);
        assert!((detector.candle_strength(&c) - 50.0).abs() < 1e-9);

        // 十字星
        let doji = candle(0, 100.0, 100.0, 100.0, 100.0, 1000.0);
        assert_eq!(detector.candle_strength(&doji), 0.0);
    }
}
