use crate::error::Result;
use crate::fmt::{format_bytes, timestamp};
use crate::settings::load_settings;

pub fn run() -> Result<()> {
    let settings = load_settings();
    let db_path = settings.db_path();

    println!("Data dir:   {}", settings.data_dir);
    println!("Database:   {}", db_path.display());
    println!(
        "Remote:     {}",
        settings.remote_url.as_deref().unwrap_or("(simulated)")
    );
    println!(
        "OCR:        {}",
        if settings.ocr_api_key().is_some() { settings.ocr_model.as_str() } else { "(no API key)" }
    );

    if !db_path.exists() {
        println!();
        println!("Ledger not found. Run `kakeibo init` to set up.");
        return Ok(());
    }

    let size = std::fs::metadata(&db_path)?.len();
    println!("DB size:    {}", format_bytes(size));

    let store = super::open_store(&settings)?;
    let records = store.list()?;
    let pending = records.iter().filter(|r| !r.is_synced()).count();
    let tombstones = store.tombstones()?.len();
    let status = store.sync_status()?;

    println!();
    println!("Expenses:         {}", records.len());
    println!("Pending sync:     {pending}");
    println!("Pending deletes:  {tombstones}");
    println!("Connected:        {}", if status.connected { "yes" } else { "no" });
    println!(
        "Last sync:        {}",
        status.last_sync.map(timestamp).unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}
