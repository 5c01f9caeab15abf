// 技术指标模块
pub mod atr;
pub mod donchian;

pub use atr::AtrCalculator;
pub use donchian::DonchianCalculator;
