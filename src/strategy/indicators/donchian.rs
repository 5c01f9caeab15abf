use crate::models::{Candle, DonchianChannel, SignalType};

/// 唐奇安通道计算器
#[derive(Debug, Clone)]
pub struct DonchianCalculator {
    length: usize,
    offset: usize,
}

impl DonchianCalculator {
    pub fn new(length: usize, offset: usize) -> Self {
        Self { length, offset }
    }

    /// 计算唐奇安通道
    ///
    /// 计算窗口为 [n-length-offset, n-offset)，offset大于0时排除最近的K线，
    /// 数据不足时返回None。
    pub fn calculate(&self, candles: &[Candle]) -> Option<DonchianChannel> {
        let n = candles.len();
        if n < self.length + self.offset {
            return None;
        }

        let start = n - self.length - self.offset;
        let end = n - self.offset;

        let window = &candles[start..end];
        let upper = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let lower = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);

        Some(DonchianChannel {
            upper,
            lower,
            middle: (upper + lower) / 2.0,
        })
    }

    /// 检查最新K线是否突破通道
    ///
    /// 阳线收于上轨之上为做多突破，阴线收于下轨之下为做空突破。
    pub fn breakout(&self, candles: &[Candle], channel: &DonchianChannel) -> Option<SignalType> {
        let latest = candles.last()?;

        if latest.close > channel.upper && latest.close > latest.open {
            return Some(SignalType::Long);
        }

        if latest.close < channel.lower && latest.close < latest.open {
            return Some(SignalType::Short);
        }

        None
    }

    /// 检测盘整状态：最近bars根K线的价格区间不超过均值的5%
    pub fn is_consolidating(&self, candles: &[Candle], bars: usize) -> bool {
        if candles.len() < bars {
            return false;
        }

        let window = &candles[candles.len() - bars..];
        let highest = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);

        let range = highest - lowest;
        let avg = (highest + lowest) / 2.0;

        range <= avg * 0.05
    }

    /// 当前价格在通道中的位置，不截断
    ///
    /// 0 = 下轨, 1 = 上轨；突破时越界，由信号强度的位置因子使用。
    pub fn position(&self, price: f64, channel: &DonchianChannel) -> f64 {
        if channel.upper == channel.lower {
            return 0.5;
        }
        (price - channel.lower) / (channel.upper - channel.lower)
    }
}
