use super::{open_store, resolve_record, short_id};
use crate::error::Result;
use crate::fmt::yen;
use crate::settings::load_settings;

pub fn run(id: &str) -> Result<()> {
    let settings = load_settings();
    let store = open_store(&settings)?;
    let target = resolve_record(&store.list()?, id)?;

    let removed = store.remove(&target.id)?;
    println!(
        "Deleted {}: {} {} {}",
        short_id(&removed.id),
        removed.date,
        yen(removed.amount),
        removed.category
    );
    if removed.is_synced() {
        println!("The remote copy will be deleted on the next sync.");
    }
    Ok(())
}
