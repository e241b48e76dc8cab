/// Option chain construction from the combined instrument set
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::broker::BrokerClient;
use crate::config::Config;
use crate::error::{Result, TradingError};
use crate::market::{OptionChain, OptionContract, StrikePair};
use crate::types::{ExpiryCadence, Instrument, OptionType, Underlying};

pub struct ChainBuilder {
    client: Arc<BrokerClient>,
    config: Arc<Config>,
}

impl ChainBuilder {
    pub fn new(client: Arc<BrokerClient>, config: Arc<Config>) -> Self {
        ChainBuilder { client, config }
    }

    /// Assemble the chain for an underlying. With no explicit expiry the
    /// nearest future one is chosen by the underlying's cadence.
    pub async fn build(
        &self,
        underlying: Underlying,
        expiry: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<OptionChain> {
        let params = self.config.underlying_params(underlying);
        let instruments = self.client.get_combined_instruments().await?;

        let options: Vec<&Instrument> = instruments
            .iter()
            .filter(|i| {
                i.is_option()
                    && i.exchange == underlying.exchange()
                    && i.name == underlying.as_str()
            })
            .collect();

        let expiry = match expiry {
            Some(date) => date,
            None => select_expiry(&options, today, params.expiry_cadence).ok_or_else(|| {
                TradingError::ChainTooSparse(format!(
                    "{}: no future expiry on or after {}",
                    underlying.as_str(),
                    today
                ))
            })?,
        };

        // Spot quote drives strike retention and ATM resolution
        let spot_symbol = underlying.as_str().to_string();
        let spot_quotes = self.client.get_quotes(std::slice::from_ref(&spot_symbol), false).await?;
        let spot_price = spot_quotes
            .get(&spot_symbol)
            .map(|q| q.last_price)
            .ok_or_else(|| TradingError::SpotUnavailable(spot_symbol.clone()))?;

        let half_width = self.config.strike_half_width as f64 * params.strike_step;

        // Group by strike, keeping only strikes inside the retention band.
        // Strike keys are scaled to paise so f64 strikes hash stably.
        let mut by_strike: BTreeMap<i64, (Option<&Instrument>, Option<&Instrument>)> =
            BTreeMap::new();
        for inst in options {
            if inst.expiry != Some(expiry) {
                continue;
            }
            let strike = match inst.strike {
                Some(s) if (s - spot_price).abs() <= half_width => s,
                _ => continue,
            };
            let entry = by_strike.entry((strike * 100.0).round() as i64).or_default();
            match inst.option_type {
                Some(OptionType::CE) => entry.0 = Some(inst),
                Some(OptionType::PE) => entry.1 = Some(inst),
                None => {}
            }
        }

        // Pair legs; strikes missing either side are dropped
        let paired: Vec<(f64, &Instrument, &Instrument)> = by_strike
            .into_values()
            .filter_map(|(ce, pe)| match (ce, pe) {
                (Some(ce), Some(pe)) => Some((ce.strike.unwrap_or(0.0), ce, pe)),
                _ => None,
            })
            .collect();

        if paired.len() < self.config.min_paired_strikes {
            return Err(TradingError::ChainTooSparse(format!(
                "{} {}: {} paired strikes, need {}",
                underlying.as_str(),
                expiry,
                paired.len(),
                self.config.min_paired_strikes
            )));
        }

        // One bulk quote call for every retained leg
        let symbols: Vec<String> = paired
            .iter()
            .flat_map(|(_, ce, pe)| [ce.symbol.clone(), pe.symbol.clone()])
            .collect();
        let quotes = self.client.get_quotes(&symbols, false).await?;

        let strikes: Vec<StrikePair> = paired
            .into_iter()
            .map(|(strike, ce, pe)| StrikePair {
                strike,
                call: OptionContract {
                    instrument: ce.clone(),
                    quote: quotes.get(&ce.symbol).cloned(),
                },
                put: OptionContract {
                    instrument: pe.clone(),
                    quote: quotes.get(&pe.symbol).cloned(),
                },
            })
            .collect();

        debug!(
            "Chain built: {} {} with {} strikes around spot {:.2}",
            underlying.as_str(),
            expiry,
            strikes.len(),
            spot_price
        );

        Ok(OptionChain { underlying, expiry, spot_price, strikes })
    }
}

/// Nearest future expiry by cadence. Weekly picks the earliest listed
/// expiry; monthly picks the last expiry of the earliest month, which is
/// the monthly contract when weeklies are listed alongside it.
fn select_expiry(
    options: &[&Instrument],
    today: NaiveDate,
    cadence: ExpiryCadence,
) -> Option<NaiveDate> {
    let mut expiries: Vec<NaiveDate> = options
        .iter()
        .filter_map(|i| i.expiry)
        .filter(|e| *e >= today)
        .collect();
    expiries.sort();
    expiries.dedup();

    match cadence {
        ExpiryCadence::Weekly => expiries.first().copied(),
        ExpiryCadence::Monthly => {
            let first = expiries.first().copied()?;
            let month = (chrono::Datelike::year(&first), chrono::Datelike::month(&first));
            expiries
                .iter()
                .filter(|e| (chrono::Datelike::year(*e), chrono::Datelike::month(*e)) == month)
                .max()
                .copied()
        }
    }
}
