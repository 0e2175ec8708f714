use std::path::PathBuf;

use colored::Colorize;

use super::{build_remote, build_scanner, current_member, open_store, short_id};
use crate::draft::{parse_amount, parse_date, RecordDraft};
use crate::error::Result;
use crate::fmt::yen;
use crate::models::Category;
use crate::ocr::ReceiptScanner;
use crate::settings::{load_settings, Settings};
use crate::storage::SqliteStorage;
use crate::store::RecordStore;
use crate::sync::SyncEngine;

pub struct AddArgs {
    pub amount: Option<String>,
    pub category: Option<String>,
    pub member: Option<String>,
    pub description: Option<String>,
    pub merchant: Option<String>,
    pub date: Option<String>,
    pub receipt: Option<String>,
    pub no_sync: bool,
}

pub fn run(args: AddArgs) -> Result<()> {
    let settings = load_settings();
    let store = open_store(&settings)?;
    let owner = current_member(args.member.as_deref(), &settings)?;

    let mut draft = RecordDraft::new(chrono::Local::now().date_naive());

    if let Some(path) = &args.receipt {
        let bytes = std::fs::read(PathBuf::from(path))?;
        match build_scanner(&settings)? {
            Some(scanner) => {
                println!("Scanning receipt...");
                if draft.apply_ocr(scanner.extract(&bytes).as_ref()) {
                    println!("Receipt scanned; explicit flags override scanned values.");
                } else {
                    println!("Could not read the receipt; using the values you entered.");
                }
            }
            None => println!("No GEMINI_API_KEY set; attaching the receipt without scanning."),
        }
        draft.receipt = Some(bytes);
    }

    if let Some(raw) = &args.amount {
        draft.amount = Some(parse_amount(raw)?);
    }
    if let Some(raw) = &args.category {
        draft.category = raw.parse::<Category>()?;
    }
    if let Some(raw) = &args.date {
        draft.date = parse_date(raw)?;
    }
    if let Some(merchant) = args.merchant {
        draft.merchant = Some(merchant);
    }
    if let Some(description) = args.description {
        draft.description = description;
    }

    let record = draft.into_record(owner)?;
    let id = record.id.clone();
    let summary = format!(
        "{} {} {} ({})",
        record.date,
        yen(record.amount),
        record.category,
        record.owner_name
    );
    store.insert(record)?;
    println!("Saved {}: {summary}", short_id(&id));

    if args.no_sync {
        return Ok(());
    }

    // The record is saved at this point; nothing below may report failure.
    let synced = match sync_now(&store, &settings, &id) {
        Ok(synced) => synced,
        Err(e) => {
            tracing::warn!(error = %e, "sync after add failed");
            false
        }
    };
    if synced {
        println!("{}", "Synced".green());
    } else {
        println!(
            "{}",
            "Saved offline; will sync later (run `kakeibo sync`).".yellow()
        );
    }
    Ok(())
}

fn sync_now(store: &RecordStore<SqliteStorage>, settings: &Settings, id: &str) -> Result<bool> {
    let engine = SyncEngine::new(store, build_remote(settings)?);
    engine.reconcile()?;
    Ok(store.get(id)?.is_some_and(|r| r.is_synced()))
}
