/// Portfolio ledger, archival and fee schedule
use crate::config::Config;
use crate::types::Side;

pub mod archive;
pub mod ledger;

pub use archive::{ArchiveRecord, ArchiveWriter, RestorationFile};
pub use ledger::{EntryContext, Portfolio, SellContext};

/// Paper/backtest fee schedule: flat per-trade charge plus a slippage
/// percentage applied to the fill price
#[derive(Debug, Clone)]
pub struct FeeModel {
    flat: f64,
    slippage_pct: f64,
}

impl FeeModel {
    pub fn from_config(config: &Config) -> Self {
        FeeModel { flat: config.fees_flat, slippage_pct: config.fees_slippage_pct }
    }

    pub fn fees(&self, _shares: i64, _price: f64) -> f64 {
        self.flat
    }

    /// Simulated fill: buys pay up, sells receive less
    pub fn fill_price(&self, side: Side, quote_price: f64) -> f64 {
        let slip = quote_price * self.slippage_pct / 100.0;
        match side {
            Side::Buy => quote_price + slip,
            Side::Sell => quote_price - slip,
        }
    }
}
