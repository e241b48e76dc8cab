/// Option chain assembly
use chrono::NaiveDate;

use crate::types::{Instrument, OptionType, Quote, Underlying};

pub mod chain;
pub mod history;

pub use chain::ChainBuilder;
pub use history::PriceHistory;

/// One leg of a strike pair with its latest quote (None when the bulk
/// fetch had nothing for it)
#[derive(Debug, Clone)]
pub struct OptionContract {
    pub instrument: Instrument,
    pub quote: Option<Quote>,
}

impl OptionContract {
    pub fn last_price(&self) -> Option<f64> {
        self.quote.as_ref().map(|q| q.last_price)
    }

    pub fn is_stale(&self) -> bool {
        self.quote.as_ref().map(|q| q.stale).unwrap_or(true)
    }
}

/// CE/PE pair at one strike
#[derive(Debug, Clone)]
pub struct StrikePair {
    pub strike: f64,
    pub call: OptionContract,
    pub put: OptionContract,
}

/// Rebuilt every iteration; never persisted
#[derive(Debug, Clone)]
pub struct OptionChain {
    pub underlying: Underlying,
    pub expiry: NaiveDate,
    pub spot_price: f64,
    /// Sorted ascending by strike
    pub strikes: Vec<StrikePair>,
}

impl OptionChain {
    /// ATM strike minimises |strike - spot|; on a tie the lower strike wins
    pub fn atm_strike(&self) -> f64 {
        let mut best = self.strikes[0].strike;
        let mut best_dist = (best - self.spot_price).abs();
        for pair in &self.strikes[1..] {
            let dist = (pair.strike - self.spot_price).abs();
            if dist < best_dist {
                best = pair.strike;
                best_dist = dist;
            }
        }
        best
    }

    pub fn atm_pair(&self) -> &StrikePair {
        let atm = self.atm_strike();
        self.strikes
            .iter()
            .find(|p| p.strike == atm)
            .expect("atm strike comes from the strike list")
    }

    pub fn contract_at(&self, strike: f64, option_type: OptionType) -> Option<&OptionContract> {
        self.strikes.iter().find(|p| p.strike == strike).map(|p| match option_type {
            OptionType::CE => &p.call,
            OptionType::PE => &p.put,
        })
    }
}
