use colored::Colorize;
use comfy_table::{Cell, Table};

use super::{open_store, short_id};
use crate::error::Result;
use crate::fmt::yen;
use crate::models::Member;
use crate::reports::{in_month, parse_month, total_spend};
use crate::settings::load_settings;

pub fn run(month: Option<String>, member: Option<String>) -> Result<()> {
    let settings = load_settings();
    let store = open_store(&settings)?;
    let mut records = store.list()?;

    if let Some(m) = &month {
        let (year, month) = parse_month(m)?;
        records = in_month(&records, year, month);
    }
    if let Some(raw) = &member {
        let owner = Member::resolve(raw)?;
        records.retain(|r| r.owner_id == owner.id);
    }

    if records.is_empty() {
        println!("No expenses recorded.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Amount", "Category", "Member", "Description", "Store", "Sync"]);
    for r in &records {
        let sync = if r.is_synced() {
            "synced".green().to_string()
        } else {
            "pending".yellow().to_string()
        };
        table.add_row(vec![
            Cell::new(short_id(&r.id)),
            Cell::new(r.date),
            Cell::new(yen(r.amount)),
            Cell::new(r.category),
            Cell::new(&r.owner_name),
            Cell::new(&r.description),
            Cell::new(r.merchant_name.as_deref().unwrap_or_default()),
            Cell::new(sync),
        ]);
    }
    println!("Expenses\n{table}");
    println!("{} expenses, total {}", records.len(), yen(total_spend(&records)));
    Ok(())
}
