use crate::models::{AtrData, Candle};

/// ATR趋势窗口：回看45根K线，每根算出一个ATR值
const ATR_TREND_WINDOW: usize = 45;

/// 斜率计算至少需要的ATR点数
const MIN_SLOPE_POINTS: usize = 10;

/// ATR指标计算器
#[derive(Debug, Clone)]
pub struct AtrCalculator {
    length: usize,
}

impl AtrCalculator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    /// 计算当前ATR值与趋势斜率，数据不足时返回None
    pub fn calculate(&self, candles: &[Candle]) -> Option<AtrData> {
        if candles.len() < self.length + 1 {
            return None;
        }

        let tr_values = true_range_series(candles);
        if tr_values.len() < self.length {
            return None;
        }

        let value = sma(&tr_values[tr_values.len() - self.length..]);
        let slope = self.slope(candles);

        Some(AtrData { value, slope })
    }

    /// 最近45个ATR值的最小二乘斜率，x取1..45
    ///
    /// 每个历史位置都用自己的length窗口重算ATR，与参考公式逐值一致。
    /// 少于10个点时返回0。
    pub fn slope(&self, candles: &[Candle]) -> f64 {
        let atr_values = self.trailing_atr_values(candles);
        if atr_values.len() < MIN_SLOPE_POINTS {
            return 0.0;
        }
        linear_regression_slope(&atr_values)
    }

    /// 当前ATR在45个历史ATR中的百分位（严格小于当前值的占比，0-100）
    ///
    /// 历史不足时返回50。
    pub fn percentile(&self, current_atr: f64, candles: &[Candle]) -> f64 {
        let atr_values = self.trailing_atr_values(candles);
        if atr_values.is_empty() {
            return 50.0;
        }

        let below = atr_values.iter().filter(|&&v| v < current_atr).count();
        below as f64 / atr_values.len() as f64 * 100.0
    }

    /// ATR下降判定：斜率为负，或当前ATR不高于45窗口的25%分位元素
    pub fn is_decreasing(&self, atr: &AtrData, candles: &[Candle]) -> bool {
        if atr.slope < 0.0 {
            return true;
        }
        self.is_in_lowest_quartile(atr.value, candles)
    }

    fn is_in_lowest_quartile(&self, current_atr: f64, candles: &[Candle]) -> bool {
        let atr_values = self.trailing_atr_values(candles);
        if atr_values.len() < 4 {
            return false;
        }

        let mut sorted = atr_values;
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let index = ((sorted.len() as f64) * 0.25) as usize;
        let index = index.min(sorted.len() - 1);

        current_atr <= sorted[index]
    }

    /// 回看45根K线，逐根计算length窗口的ATR值
    fn trailing_atr_values(&self, candles: &[Candle]) -> Vec<f64> {
        let n = candles.len();
        if n < ATR_TREND_WINDOW + self.length {
            return Vec::new();
        }

        let mut atr_values = Vec::with_capacity(ATR_TREND_WINDOW);
        for i in (n - ATR_TREND_WINDOW)..n {
            if i < self.length {
                continue;
            }

            let tr_values = true_range_series(&candles[i - self.length..=i]);
            if tr_values.len() >= self.length {
                atr_values.push(sma(&tr_values[tr_values.len() - self.length..]));
            }
        }

        atr_values
    }
}

/// 真实波幅序列: TR_i = max(H-L, |H-prevClose|, |L-prevClose|)
fn true_range_series(candles: &[Candle]) -> Vec<f64> {
    if candles.len() < 2 {
        return Vec::new();
    }

    candles
        .windows(2)
        .map(|pair| {
            let prev = &pair[0];
            let curr = &pair[1];
            let hl = curr.high - curr.low;
            let hc = (curr.high - prev.close).abs();
            let lc = (curr.low - prev.close).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

fn sma(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// 最小二乘斜率 = (n·∑xy − ∑x·∑y) / (n·∑x² − (∑x)²)，x取1..n
fn linear_regression_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if n < 2.0 {
        return 0.0;
    }

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;

    for (i, &y) in values.iter().enumerate() {
        let x = (i + 1) as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator == 0.0 {
        return 0.0;
    }

    (n * sum_xy - sum_x * sum_y) / denominator
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "BTC-USDT".to_string(),
            interval: "15m".to_string(),
            open_time_ms: 0,
            close_time_ms: 900_000,
            open: close,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    /// 波幅线性递减的序列，ATR趋势必然向下
    fn shrinking_series(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let r = 3.0 - 2.5 * (i as f64) / (n as f64);
                candle(100.0 + r, 100.0 - r, 100.0)
            })
            .collect()
    }

    #[test]
    fn test_true_range_uses_prev_close() {
        // 跳空高开：TR由|H-prevClose|主导
        let candles = vec![candle(101.0, 99.0, 100.0), candle(106.0, 104.0, 105.0)];
        let trs = true_range_series(&candles);
        assert_eq!(trs.len(), 1);
        assert_eq!(trs[0], 6.0);
    }

    #[test]
    fn test_atr_insufficient_data() {
        let calc = AtrCalculator::new(7);
        assert!(calc.calculate(&shrinking_series(7)).is_none());
        assert!(calc.calculate(&shrinking_series(8)).is_some());
    }

    #[test]
    fn test_atr_value_is_sma_of_tr() {
        let calc = AtrCalculator::new(3);
        // 固定2.0波幅，无跳空 → ATR = 4.0 (高低差)
        let candles: Vec<Candle> = (0..5).map(|_| candle(102.0, 98.0, 100.0)).collect();
        let atr = calc.calculate(&candles).unwrap();
        assert!((atr.value - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_slope_negative_on_shrinking_volatility() {
        let calc = AtrCalculator::new(7);
        let candles = shrinking_series(60);
        let atr = calc.calculate(&candles).unwrap();
        assert!(atr.slope < 0.0, "波幅收敛时斜率应为负: {}", atr.slope);
        assert!(calc.is_decreasing(&atr, &candles));
    }

    #[test]
    fn test_slope_zero_when_history_short() {
        let calc = AtrCalculator::new(7);
        // 不足45+length根，趋势窗口为空 → 斜率0
        assert_eq!(calc.slope(&shrinking_series(30)), 0.0);
    }

    #[test]
    fn test_decreasing_gate_at_exact_quartile() {
        let calc = AtrCalculator::new(7);
        // 恒定波幅：斜率≈0，所有ATR相等，当前值等于25%分位元素 → 门通过
        let candles: Vec<Candle> = (0..60).map(|_| candle(102.0, 98.0, 100.0)).collect();
        let atr = calc.calculate(&candles).unwrap();
        assert!(atr.slope.abs() < 1e-9);
        assert!(calc.is_decreasing(&atr, &candles));
    }

    #[test]
    fn test_percentile_bounds() {
        let calc = AtrCalculator::new(7);
        let candles = shrinking_series(60);
        let atr = calc.calculate(&candles).unwrap();
        let p = calc.percentile(atr.value, &candles);
        assert!((0.0..=100.0).contains(&p));
        // 波幅递减时当前ATR处于低位
        assert!(p < 50.0, "递减序列的当前ATR百分位应偏低: {}", p);
    }

    #[test]
    fn test_linear_regression_slope() {
        // y = 2x → 斜率2
        let values: Vec<f64> = (1..=20).map(|x| 2.0 * x as f64).collect();
        assert!((linear_regression_slope(&values) - 2.0).abs() < 1e-9);
    }
}
