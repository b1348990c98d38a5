//! Ledger sink
//!
//! Durable append-only CSV records of opens, partial credits, and closes,
//! plus the balance time series. The balance ledger serializes the
//! read-last-balance-then-append sequence behind a single lock so concurrent
//! closes cannot lose updates.

mod store;

pub use store::OpenPositionsStore;

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock as AsyncRwLock};
use tracing::info;

/// Completion-record schema version. Single source of truth for the close
/// row layout; bump when columns change.
pub const CLOSE_SCHEMA_VERSION: u32 = 1;

/// Record written when a position opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRecord {
    pub timestamp: i64,
    pub position_id: String,
    pub symbol: String,
    pub side: String,
    pub entry_price: f64,
    pub stop_level: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub tp3: f64,
    pub atr: f64,
    pub strategy: String,
    pub confidence: f64,
}

/// Record written when a non-terminal rung credits the balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialCreditRecord {
    pub timestamp: i64,
    pub position_id: String,
    pub symbol: String,
    /// Rung index (0-based)
    pub rung: usize,
    pub level_price: f64,
    /// Fraction of the rung's PnL credited
    pub credit_fraction: f64,
    pub credited_pnl_pct: f64,
    pub balance_after: f64,
}

/// Completion record written when a position closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseRecord {
    pub schema_version: u32,
    pub timestamp: i64,
    pub position_id: String,
    pub symbol: String,
    pub side: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub exit_reason: String,
    /// Comma-joined rung labels, e.g. "TP1,TP2"
    pub tp_hits: String,
    pub realized_pnl_pct: f64,
    pub duration_secs: i64,
    pub balance_after: f64,
    pub strategy: String,
}

/// Balance snapshot row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub timestamp: i64,
    pub balance: f64,
}

fn create_writer(dir: &Path, filename: &str) -> Result<csv::Writer<File>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(filename);
    let file_has_data = path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    Ok(WriterBuilder::new()
        .has_headers(!file_has_data)
        .from_writer(file))
}

struct JournalWriters {
    open: AsyncRwLock<csv::Writer<File>>,
    partial: AsyncRwLock<csv::Writer<File>>,
    close: AsyncRwLock<csv::Writer<File>>,
}

/// CSV journal for position lifecycle records, one dated file per record
/// kind per day. Built disabled when CSV persistence is turned off, in
/// which case every log call is a no-op.
pub struct TradeJournal {
    writers: Option<JournalWriters>,
}

impl TradeJournal {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let today = Utc::now().format("%Y-%m-%d");
        let open = create_writer(&data_dir.join("trades"), &format!("trades_{}.csv", today))?;
        let partial = create_writer(
            &data_dir.join("partials"),
            &format!("partials_{}.csv", today),
        )?;
        let close = create_writer(&data_dir.join("journal"), &format!("journal_{}.csv", today))?;

        Ok(Self {
            writers: Some(JournalWriters {
                open: AsyncRwLock::new(open),
                partial: AsyncRwLock::new(partial),
                close: AsyncRwLock::new(close),
            }),
        })
    }

    /// Journal that accepts every record and writes nothing.
    pub fn disabled() -> Self {
        Self { writers: None }
    }

    pub async fn log_open(&self, record: OpenRecord) -> Result<()> {
        let Some(writers) = &self.writers else {
            return Ok(());
        };
        let mut writer = writers.open.write().await;
        writer
            .serialize(&record)
            .context("Failed to write open record")?;
        writer.flush().context("Failed to flush open writer")?;
        Ok(())
    }

    pub async fn log_partial(&self, record: PartialCreditRecord) -> Result<()> {
        let Some(writers) = &self.writers else {
            return Ok(());
        };
        let mut writer = writers.partial.write().await;
        writer
            .serialize(&record)
            .context("Failed to write partial credit record")?;
        writer.flush().context("Failed to flush partial writer")?;
        Ok(())
    }

    pub async fn log_close(&self, record: CloseRecord) -> Result<()> {
        let Some(writers) = &self.writers else {
            return Ok(());
        };
        let mut writer = writers.close.write().await;
        writer
            .serialize(&record)
            .context("Failed to write close record")?;
        writer.flush().context("Failed to flush close writer")?;
        Ok(())
    }
}

struct BalanceState {
    current: f64,
    writer: csv::Writer<File>,
}

/// Balance time series with atomic read-then-append updates.
pub struct BalanceLedger {
    state: Mutex<BalanceState>,
}

impl BalanceLedger {
    /// Open the balance history, resuming from the last persisted row or
    /// falling back to `initial_balance`.
    pub fn open(data_dir: &Path, initial_balance: f64) -> Result<Self> {
        let dir = data_dir.join("balance");
        let path = dir.join("balance_history.csv");
        let current = Self::load_last_balance(&path).unwrap_or(initial_balance);

        let writer = create_writer(&dir, "balance_history.csv")?;
        info!(balance = current, "💰 Balance ledger opened");

        Ok(Self {
            state: Mutex::new(BalanceState { current, writer }),
        })
    }

    /// Most recent balance from the history file, if any data rows exist.
    fn load_last_balance(path: &PathBuf) -> Option<f64> {
        let content = fs::read_to_string(path).ok()?;
        content
            .lines()
            .filter(|line| line.contains(',') && !line.to_lowercase().starts_with("timestamp"))
            .last()
            .and_then(|line| line.rsplit(',').next())
            .and_then(|v| v.trim().parse::<f64>().ok())
    }

    pub async fn current(&self) -> f64 {
        self.state.lock().await.current
    }

    /// Apply a percentage return to the balance and append the snapshot.
    /// The read-compute-append sequence holds one lock, so concurrent
    /// closes serialize instead of losing updates.
    pub async fn apply_pnl_pct(&self, pnl_pct: f64) -> Result<(f64, f64)> {
        let mut state = self.state.lock().await;
        let previous = state.current;
        let next = previous * (1.0 + pnl_pct / 100.0);
        state.current = next;

        let record = BalanceRecord {
            timestamp: Utc::now().timestamp_millis(),
            balance: next,
        };
        state
            .writer
            .serialize(&record)
            .context("Failed to write balance record")?;
        state.writer.flush().context("Failed to flush balance writer")?;

        Ok((previous, next))
    }
}
