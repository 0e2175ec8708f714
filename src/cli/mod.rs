pub mod add;
pub mod delete;
pub mod init;
pub mod list;
pub mod members;
pub mod scan;
pub mod status;
pub mod summary;
pub mod sync;

use clap::{Parser, Subcommand};

use crate::error::{KakeiboError, Result};
use crate::models::{Member, Record};
use crate::ocr::GeminiScanner;
use crate::remote::{HttpRemote, RemoteStore, SimulatedRemote};
use crate::settings::Settings;
use crate::storage::SqliteStorage;
use crate::store::RecordStore;

pub(crate) fn open_store(settings: &Settings) -> Result<RecordStore<SqliteStorage>> {
    let db_path = settings.db_path();
    if !db_path.exists() {
        return Err(KakeiboError::Settings(format!(
            "No ledger found at {}\nRun `kakeibo init` to create one.",
            db_path.display()
        )));
    }
    RecordStore::open(SqliteStorage::open(&db_path)?)
}

pub(crate) fn build_remote(settings: &Settings) -> Result<Box<dyn RemoteStore>> {
    match settings.remote_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => Ok(Box::new(HttpRemote::new(url, settings.remote_token())?)),
        None => Ok(Box::new(SimulatedRemote::new(settings.simulated_success_rate))),
    }
}

/// `None` when no API key is configured.
pub(crate) fn build_scanner(settings: &Settings) -> Result<Option<GeminiScanner>> {
    match settings.ocr_api_key() {
        Some(key) => Ok(Some(GeminiScanner::new(&settings.ocr_endpoint, &settings.ocr_model, &key)?)),
        None => Ok(None),
    }
}

/// The acting member: explicit flag, then the configured default.
pub(crate) fn current_member(flag: Option<&str>, settings: &Settings) -> Result<&'static Member> {
    Member::resolve(flag.unwrap_or(&settings.default_member))
}

/// Find a record by full id or unique id prefix.
pub(crate) fn resolve_record(records: &[Record], raw: &str) -> Result<Record> {
    if let Some(exact) = records.iter().find(|r| r.id == raw) {
        return Ok(exact.clone());
    }
    let matches: Vec<&Record> = records.iter().filter(|r| r.id.starts_with(raw)).collect();
    match matches.as_slice() {
        [one] => Ok((*one).clone()),
        [] => Err(KakeiboError::NotFound(raw.to_string())),
        _ => Err(KakeiboError::InvalidInput(format!(
            "ID prefix {raw} matches {} records; use more characters",
            matches.len()
        ))),
    }
}

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[derive(Parser)]
#[command(name = "kakeibo", about = "Household expense ledger with receipt scanning and background sync.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up kakeibo: choose a data directory and initialize the ledger.
    Init {
        /// Path for kakeibo data (default: ~/Documents/kakeibo)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Record an expense, optionally prefilled from a receipt photo.
    Add {
        /// Amount in yen, e.g. 1200 or 1,200
        #[arg(long)]
        amount: Option<String>,
        /// Category label or key (food, daily, transport, social, housing, entertainment, beauty, other)
        #[arg(long)]
        category: Option<String>,
        /// Member id or name (default: settings default_member)
        #[arg(long)]
        member: Option<String>,
        /// Free-text description
        #[arg(long)]
        description: Option<String>,
        /// Store name
        #[arg(long)]
        merchant: Option<String>,
        /// Date: YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Receipt image to attach and scan
        #[arg(long)]
        receipt: Option<String>,
        /// Save locally without attempting a sync
        #[arg(long = "no-sync")]
        no_sync: bool,
    },
    /// Scan a receipt image and print the extracted fields.
    Scan {
        /// Path to a receipt photo (JPEG, PNG, WebP or HEIC)
        image: String,
    },
    /// List recorded expenses, newest first.
    List {
        /// Month filter: YYYY-MM
        #[arg(long)]
        month: Option<String>,
        /// Only this member's expenses
        #[arg(long)]
        member: Option<String>,
    },
    /// Delete an expense. Synced expenses are also deleted remotely on the next sync.
    Delete {
        /// Record ID or unique prefix (shown in `kakeibo list`)
        id: String,
    },
    /// Push pending expenses and deletions to the remote store.
    Sync,
    /// Spending totals by category and member.
    Summary {
        /// Month filter: YYYY-MM
        #[arg(long)]
        month: Option<String>,
    },
    /// Show the household members.
    Members,
    /// Show ledger location, counts and sync state.
    Status,
}
