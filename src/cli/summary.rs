use comfy_table::{Cell, Table};

use super::open_store;
use crate::error::Result;
use crate::fmt::yen;
use crate::reports::{in_month, parse_month, summarize};
use crate::settings::load_settings;

pub fn run(month: Option<String>) -> Result<()> {
    let settings = load_settings();
    let store = open_store(&settings)?;
    let mut records = store.list()?;
    let mut period = "all time".to_string();
    if let Some(m) = &month {
        let (year, month) = parse_month(m)?;
        records = in_month(&records, year, month);
        period = format!("{year:04}-{month:02}");
    }

    let summary = summarize(&records);
    println!("Total spend ({period}): {} across {} expenses", yen(summary.total), summary.count);

    let mut by_member = Table::new();
    by_member.set_header(vec!["Member", "Total"]);
    for (member, total) in &summary.by_member {
        by_member.add_row(vec![Cell::new(member.name), Cell::new(yen(*total))]);
    }
    println!("\nBy member\n{by_member}");

    if summary.by_category.is_empty() {
        println!("\nNo spending by category yet.");
        return Ok(());
    }
    let mut by_category = Table::new();
    by_category.set_header(vec!["Category", "Total", "Share"]);
    for (category, total) in &summary.by_category {
        let share = *total as f64 / summary.total as f64 * 100.0;
        by_category.add_row(vec![
            Cell::new(category),
            Cell::new(yen(*total)),
            Cell::new(format!("{share:.1}%")),
        ]);
    }
    println!("\nBy category\n{by_category}");
    Ok(())
}
