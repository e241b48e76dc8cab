/// Day-closing archival: primary + verified backup, restoration file and
/// per-iteration checkpoint. All writes are temp-then-rename.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Asia::Kolkata;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Result, TradingError};
use crate::types::{round_currency, PortfolioCounters, PortfolioSnapshot, Trade, TradingMode};
use crate::utils::trade_checksum;

pub const DATA_FORMAT_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub trading_day: NaiveDate,
    pub trading_mode: String,
    pub export_timestamp: String,
    pub system_version: String,
    pub data_format_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    pub total_trades: usize,
    pub buy_trades: usize,
    pub sell_trades: usize,
    pub closed_trades: usize,
    pub open_trades: usize,
    pub total_pnl: f64,
    pub total_fees: f64,
    pub net_pnl: f64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate_pct: f64,
    pub symbols_traded: Vec<String>,
    pub unique_symbols_count: usize,
    pub sector_distribution: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioStateRecord {
    pub opening_cash: f64,
    pub closing_cash: f64,
    pub counters: PortfolioCounters,
    pub active_positions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedPosition {
    pub symbol: String,
    pub shares: i64,
    pub entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub sector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPositionsRecord {
    pub captured_at: String,
    pub positions: Vec<ArchivedPosition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataIntegrity {
    pub trade_count: usize,
    /// 64-bit hash over concatenated trade ids, hex encoded
    pub checksum: String,
    pub first_trade_timestamp: Option<String>,
    pub last_trade_timestamp: Option<String>,
    pub last_trade_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub metadata: ArchiveMetadata,
    pub daily_summary: DailySummary,
    pub portfolio_state: PortfolioStateRecord,
    pub trades: Vec<Trade>,
    pub open_positions: OpenPositionsRecord,
    pub data_integrity: DataIntegrity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoredPosition {
    #[serde(flatten)]
    pub position: crate::types::Position,
    pub current_price: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorationFile {
    pub saved_at: String,
    pub target_date: NaiveDate,
    pub total_positions: usize,
    pub total_value: f64,
    pub total_unrealized_pnl: f64,
    pub positions: HashMap<String, RestoredPosition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub mode: TradingMode,
    pub iteration: u64,
    pub trading_day: NaiveDate,
    pub last_update: String,
    pub portfolio: PortfolioSnapshot,
    pub total_value: f64,
}

fn ist_string(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Kolkata).to_rfc3339()
}

/// Atomic file write: temp in the same directory, then rename
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| TradingError::ArchiveWriteFailed(format!("{}: no parent", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub struct ArchiveWriter {
    archive_dir: PathBuf,
    backup_dir: PathBuf,
    saved_trades_dir: PathBuf,
    data_dir: PathBuf,
}

impl ArchiveWriter {
    pub fn from_config(config: &Config) -> Self {
        ArchiveWriter {
            archive_dir: PathBuf::from(&config.archive_dir),
            backup_dir: PathBuf::from(&config.archive_backup_dir),
            saved_trades_dir: PathBuf::from(&config.saved_trades_dir),
            data_dir: PathBuf::from(&config.data_dir),
        }
    }

    fn file_name(day: NaiveDate, mode: TradingMode) -> String {
        format!("trades_{}_{}.json", day, mode.as_str())
    }

    fn dated_path(root: &Path, day: NaiveDate, mode: TradingMode) -> PathBuf {
        root.join(format!("{:04}", day.year()))
            .join(format!("{:02}", day.month()))
            .join(Self::file_name(day, mode))
    }

    pub fn archive_path(&self, day: NaiveDate, mode: TradingMode) -> PathBuf {
        Self::dated_path(&self.archive_dir, day, mode)
    }

    pub fn backup_path(&self, day: NaiveDate, mode: TradingMode) -> PathBuf {
        Self::dated_path(&self.backup_dir, day, mode)
    }

    fn marker_path(&self, day: NaiveDate, mode: TradingMode) -> PathBuf {
        self.data_dir
            .join("archive_markers")
            .join(format!("{}_{}.done", day, mode.as_str()))
    }

    pub fn already_archived(&self, day: NaiveDate, mode: TradingMode) -> bool {
        self.marker_path(day, mode).exists()
    }

    /// Assemble the archive record from a closing snapshot
    pub fn build_record(
        snapshot: &PortfolioSnapshot,
        trades: &[Trade],
        prices: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> ArchiveRecord {
        let buy_trades = trades.iter().filter(|t| t.side == crate::types::Side::Buy).count();
        let sell_trades = trades.len() - buy_trades;

        let total_pnl: f64 = trades.iter().filter_map(|t| t.pnl).sum();
        let total_fees: f64 = trades.iter().map(|t| t.fees).sum();
        let buy_fees: f64 = trades
            .iter()
            .filter(|t| t.side == crate::types::Side::Buy)
            .map(|t| t.fees)
            .sum();

        let mut symbols_traded: Vec<String> = Vec::new();
        for trade in trades {
            if !symbols_traded.contains(&trade.symbol) {
                symbols_traded.push(trade.symbol.clone());
            }
        }

        let mut sector_distribution: HashMap<String, u64> = HashMap::new();
        for trade in trades {
            *sector_distribution.entry(trade.sector.clone()).or_insert(0) += 1;
        }

        let closed = snapshot.counters.winning_trades + snapshot.counters.losing_trades;
        let win_rate_pct = if closed > 0 {
            snapshot.counters.winning_trades as f64 / closed as f64 * 100.0
        } else {
            0.0
        };

        let positions: Vec<ArchivedPosition> = snapshot
            .positions
            .iter()
            .map(|p| {
                let current = prices.get(&p.symbol).copied().unwrap_or(p.entry_price);
                ArchivedPosition {
                    symbol: p.symbol.clone(),
                    shares: p.shares,
                    entry_price: round_currency(p.entry_price),
                    current_price: round_currency(current),
                    unrealized_pnl: round_currency(p.unrealized_pnl(current)),
                    sector: p.sector.clone(),
                }
            })
            .collect();

        let trade_ids: Vec<String> = trades.iter().map(|t| t.trade_id.clone()).collect();

        ArchiveRecord {
            metadata: ArchiveMetadata {
                trading_day: snapshot.trading_day,
                trading_mode: snapshot.mode.as_str().to_string(),
                export_timestamp: ist_string(now),
                system_version: env!("CARGO_PKG_VERSION").to_string(),
                data_format_version: DATA_FORMAT_VERSION.to_string(),
            },
            daily_summary: DailySummary {
                total_trades: trades.len(),
                buy_trades,
                sell_trades,
                closed_trades: sell_trades,
                open_trades: snapshot.positions.len(),
                total_pnl: round_currency(total_pnl),
                total_fees: round_currency(total_fees),
                net_pnl: round_currency(total_pnl - buy_fees),
                winning_trades: snapshot.counters.winning_trades,
                losing_trades: snapshot.counters.losing_trades,
                win_rate_pct,
                unique_symbols_count: symbols_traded.len(),
                symbols_traded,
                sector_distribution,
            },
            portfolio_state: PortfolioStateRecord {
                opening_cash: round_currency(snapshot.initial_cash),
                closing_cash: round_currency(snapshot.cash),
                counters: snapshot.counters.clone(),
                active_positions: snapshot.positions.len(),
            },
            trades: trades.to_vec(),
            open_positions: OpenPositionsRecord { captured_at: ist_string(now), positions },
            data_integrity: DataIntegrity {
                trade_count: trade_ids.len(),
                checksum: format!("{:016x}", trade_checksum(&trade_ids)),
                first_trade_timestamp: trades.first().map(|t| ist_string(t.timestamp)),
                last_trade_timestamp: trades.last().map(|t| ist_string(t.timestamp)),
                last_trade_id: trade_ids.last().cloned(),
            },
        }
    }

    /// Recompute the integrity block and compare. A mismatch means the
    /// file is corrupt.
    pub fn verify_record(record: &ArchiveRecord) -> Result<()> {
        if record.data_integrity.trade_count != record.trades.len() {
            return Err(TradingError::ChecksumMismatch(format!(
                "trade_count {} != {} trades",
                record.data_integrity.trade_count,
                record.trades.len()
            )));
        }

        let ids: Vec<String> = record.trades.iter().map(|t| t.trade_id.clone()).collect();
        let recomputed = format!("{:016x}", trade_checksum(&ids));
        if recomputed != record.data_integrity.checksum {
            return Err(TradingError::ChecksumMismatch(format!(
                "checksum {} != recorded {}",
                recomputed, record.data_integrity.checksum
            )));
        }

        Ok(())
    }

    /// Write primary, verify by re-reading, then write the backup copy and
    /// the idempotency marker. A second call for the same (day, mode) is a
    /// no-op.
    pub fn write_archive(&self, record: &ArchiveRecord) -> Result<PathBuf> {
        let day = record.metadata.trading_day;
        let mode = match record.metadata.trading_mode.as_str() {
            "live" => TradingMode::Live,
            "backtest" => TradingMode::Backtest,
            _ => TradingMode::Paper,
        };

        let primary = self.archive_path(day, mode);
        if self.already_archived(day, mode) {
            info!("Archive for {} {} already written, skipping", day, mode.as_str());
            return Ok(primary);
        }

        let json = serde_json::to_string_pretty(record)?;

        write_atomic(&primary, &json)
            .map_err(|e| TradingError::ArchiveWriteFailed(format!("primary: {}", e)))?;

        // Verify the primary by reading it back before the backup is cut
        let reread: ArchiveRecord = serde_json::from_str(&std::fs::read_to_string(&primary)?)?;
        Self::verify_record(&reread)?;

        let backup = self.backup_path(day, mode);
        write_atomic(&backup, &json)
            .map_err(|e| TradingError::ArchiveWriteFailed(format!("backup: {}", e)))?;

        let marker = self.marker_path(day, mode);
        write_atomic(&marker, &format!("{}\n", record.metadata.export_timestamp))
            .map_err(|e| TradingError::ArchiveWriteFailed(format!("marker: {}", e)))?;

        info!(
            "📦 Archived {} trades for {} {} -> {}",
            record.trades.len(),
            day,
            mode.as_str(),
            primary.display()
        );

        Ok(primary)
    }

    fn load_verified(path: &Path) -> Result<ArchiveRecord> {
        let record: ArchiveRecord = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        Self::verify_record(&record)?;
        Ok(record)
    }

    /// Read an archive, falling back to the backup copy when the primary
    /// is missing or corrupt
    pub fn load_archive(&self, day: NaiveDate, mode: TradingMode) -> Result<ArchiveRecord> {
        match Self::load_verified(&self.archive_path(day, mode)) {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(
                    "Primary archive for {} {} unreadable ({}), trying backup",
                    day,
                    mode.as_str(),
                    e
                );
                Self::load_verified(&self.backup_path(day, mode))
            }
        }
    }

    fn restoration_path(&self, date: NaiveDate) -> PathBuf {
        self.saved_trades_dir.join(format!("fno_positions_{}.json", date))
    }

    /// Next-day restoration file: held option positions with their closing
    /// values
    pub fn write_restoration(
        &self,
        snapshot: &PortfolioSnapshot,
        prices: &HashMap<String, f64>,
        target_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let mut positions = HashMap::new();
        let mut total_value = 0.0;
        let mut total_unrealized = 0.0;

        for position in &snapshot.positions {
            let current = prices.get(&position.symbol).copied().unwrap_or(position.entry_price);
            let unrealized = position.unrealized_pnl(current);
            total_value += current * position.shares as f64;
            total_unrealized += unrealized;
            positions.insert(
                position.symbol.clone(),
                RestoredPosition {
                    position: position.clone(),
                    current_price: round_currency(current),
                    unrealized_pnl: round_currency(unrealized),
                },
            );
        }

        let file = RestorationFile {
            saved_at: ist_string(now),
            target_date,
            total_positions: positions.len(),
            total_value: round_currency(total_value),
            total_unrealized_pnl: round_currency(total_unrealized),
            positions,
        };

        let path = self.restoration_path(target_date);
        write_atomic(&path, &serde_json::to_string_pretty(&file)?)?;
        info!("💾 Saved {} positions for {}", file.total_positions, target_date);
        Ok(path)
    }

    pub fn load_restoration(&self, date: NaiveDate) -> Result<RestorationFile> {
        let path = self.restoration_path(date);
        let file: RestorationFile = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        Ok(file)
    }

    /// Drop the idempotency marker so `--force-archive` can re-run a day
    pub fn clear_marker(&self, day: NaiveDate, mode: TradingMode) {
        let _ = std::fs::remove_file(self.marker_path(day, mode));
    }

    pub fn load_checkpoint(&self) -> Result<Checkpoint> {
        let path = self.data_dir.join("state.json");
        let checkpoint: Checkpoint = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        Ok(checkpoint)
    }

    /// Per-iteration state checkpoint
    pub fn write_checkpoint(
        &self,
        iteration: u64,
        snapshot: &PortfolioSnapshot,
        total_value: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let checkpoint = Checkpoint {
            mode: snapshot.mode,
            iteration,
            trading_day: snapshot.trading_day,
            last_update: ist_string(now),
            portfolio: snapshot.clone(),
            total_value: round_currency(total_value),
        };

        write_atomic(&self.data_dir.join("state.json"), &serde_json::to_string_pretty(&checkpoint)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::ledger::{EntryContext, Portfolio, SellContext};
    use chrono::TimeZone;

    fn test_writer(name: &str) -> ArchiveWriter {
        let root = std::env::temp_dir().join(format!("optra-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        ArchiveWriter {
            archive_dir: root.join("trade_archives"),
            backup_dir: root.join("trade_archives_backup"),
            saved_trades_dir: root.join("saved_trades"),
            data_dir: root.join("data"),
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 2).unwrap()
    }

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 2, 6, minute, 0).unwrap()
    }

    async fn seeded_portfolio() -> Portfolio {
        let portfolio = Portfolio::new(TradingMode::Paper, day(), 1_000_000.0);
        let entry = |m: u32, stop: f64| EntryContext {
            sector: "NIFTY".to_string(),
            confidence: 0.7,
            strategy: "momentum".to_string(),
            stop_loss: stop,
            take_profit: stop * 1.5,
            expiry: None,
            lot_size: 50,
            bar_ts: t(m),
            at: t(m),
        };

        portfolio.buy("NIFTY26FEB24500CE", 50, 100.0, 20.0, entry(0, 90.0)).await.unwrap();
        portfolio.buy("NIFTY26FEB24600CE", 50, 80.0, 20.0, entry(1, 70.0)).await.unwrap();
        portfolio
            .sell(
                "NIFTY26FEB24500CE",
                50,
                110.0,
                20.0,
                SellContext { bar_ts: t(5), at: t(5) },
                false,
            )
            .await
            .unwrap();
        portfolio
    }

    #[tokio::test]
    async fn test_archive_round_trip() {
        let writer = test_writer("roundtrip");
        let portfolio = seeded_portfolio().await;
        let snapshot = portfolio.snapshot().await;
        let trades = portfolio.all_trades().await;
        let prices = HashMap::from([("NIFTY26FEB24600CE".to_string(), 85.0)]);

        let record = ArchiveWriter::build_record(&snapshot, &trades, &prices, t(30));
        writer.write_archive(&record).unwrap();

        let loaded = writer.load_archive(day(), TradingMode::Paper).unwrap();
        assert_eq!(loaded.data_integrity.trade_count, 3);
        assert_eq!(loaded.trades.len(), 3);
        assert_eq!(loaded.daily_summary.buy_trades, 2);
        assert_eq!(loaded.daily_summary.sell_trades, 1);
        assert_eq!(loaded.daily_summary.open_trades, 1);
        assert_eq!(loaded.portfolio_state.closing_cash, snapshot.cash);
        ArchiveWriter::verify_record(&loaded).unwrap();

        // Replaying the archived trades reproduces closing cash
        let replayed = Portfolio::replay(loaded.portfolio_state.opening_cash, &loaded.trades);
        assert!((replayed - loaded.portfolio_state.closing_cash).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_archival_idempotent() {
        let writer = test_writer("idempotent");
        let portfolio = seeded_portfolio().await;
        let snapshot = portfolio.snapshot().await;
        let trades = portfolio.all_trades().await;
        let record = ArchiveWriter::build_record(&snapshot, &trades, &HashMap::new(), t(30));

        writer.write_archive(&record).unwrap();
        assert!(writer.already_archived(day(), TradingMode::Paper));

        // Second call is a no-op; exactly one archive and one backup exist
        writer.write_archive(&record).unwrap();
        assert!(writer.archive_path(day(), TradingMode::Paper).exists());
        assert!(writer.backup_path(day(), TradingMode::Paper).exists());

        let archive_files = std::fs::read_dir(
            writer.archive_path(day(), TradingMode::Paper).parent().unwrap(),
        )
        .unwrap()
        .count();
        assert_eq!(archive_files, 1);
    }

    #[tokio::test]
    async fn test_corrupt_primary_falls_back_to_backup() {
        let writer = test_writer("fallback");
        let portfolio = seeded_portfolio().await;
        let snapshot = portfolio.snapshot().await;
        let trades = portfolio.all_trades().await;
        let record = ArchiveWriter::build_record(&snapshot, &trades, &HashMap::new(), t(30));
        writer.write_archive(&record).unwrap();

        // Corrupt the primary: drop a trade but keep the integrity block
        let primary = writer.archive_path(day(), TradingMode::Paper);
        let mut tampered: ArchiveRecord =
            serde_json::from_str(&std::fs::read_to_string(&primary).unwrap()).unwrap();
        tampered.trades.pop();
        std::fs::write(&primary, serde_json::to_string_pretty(&tampered).unwrap()).unwrap();

        let loaded = writer.load_archive(day(), TradingMode::Paper).unwrap();
        assert_eq!(loaded.trades.len(), 3);
    }

    #[tokio::test]
    async fn test_tampered_trade_ids_fail_checksum() {
        let portfolio = seeded_portfolio().await;
        let snapshot = portfolio.snapshot().await;
        let trades = portfolio.all_trades().await;
        let mut record = ArchiveWriter::build_record(&snapshot, &trades, &HashMap::new(), t(30));

        record.trades[0].trade_id = "2026-02-02-paper-9999".to_string();
        assert!(matches!(
            ArchiveWriter::verify_record(&record),
            Err(TradingError::ChecksumMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_restoration_round_trip() {
        let writer = test_writer("restore");
        let portfolio = seeded_portfolio().await;
        let snapshot = portfolio.snapshot().await;
        let prices = HashMap::from([("NIFTY26FEB24600CE".to_string(), 95.0)]);
        let target = NaiveDate::from_ymd_opt(2026, 2, 3).unwrap();

        writer.write_restoration(&snapshot, &prices, target, t(30)).unwrap();
        let restored = writer.load_restoration(target).unwrap();

        assert_eq!(restored.total_positions, 1);
        assert_eq!(restored.target_date, target);
        let pos = &restored.positions["NIFTY26FEB24600CE"];
        assert_eq!(pos.current_price, 95.0);
        assert_eq!(pos.unrealized_pnl, (95.0 - 80.0) * 50.0);
    }

    #[tokio::test]
    async fn test_checkpoint_written_atomically() {
        let writer = test_writer("checkpoint");
        let portfolio = seeded_portfolio().await;
        let snapshot = portfolio.snapshot().await;

        writer.write_checkpoint(42, &snapshot, 1_000_500.0, t(30)).unwrap();

        let path = writer.data_dir.join("state.json");
        let checkpoint: Checkpoint =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(checkpoint.iteration, 42);
        assert_eq!(checkpoint.total_value, 1_000_500.0);
        assert!(!path.with_extension("tmp").exists());
    }
}
