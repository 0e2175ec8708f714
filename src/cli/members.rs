use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::models::MEMBERS;
use crate::settings::load_settings;

pub fn run() -> Result<()> {
    let settings = load_settings();
    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Color", ""]);
    for m in MEMBERS {
        let marker = if m.id == settings.default_member { "default" } else { "" };
        table.add_row(vec![Cell::new(m.id), Cell::new(m.name), Cell::new(m.color), Cell::new(marker)]);
    }
    println!("Members\n{table}");
    Ok(())
}
