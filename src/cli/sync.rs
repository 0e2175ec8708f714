use colored::Colorize;

use super::{build_remote, open_store};
use crate::error::Result;
use crate::settings::load_settings;
use crate::sync::SyncEngine;

pub fn run() -> Result<()> {
    let settings = load_settings();
    let store = open_store(&settings)?;
    let engine = SyncEngine::new(&store, build_remote(&settings)?);
    let report = engine.reconcile_report()?;

    println!("{} synced, {} still pending", report.confirmed, report.failed);
    if report.deleted > 0 || report.delete_failed > 0 {
        println!("{} remote deletes, {} queued", report.deleted, report.delete_failed);
    }
    if report.connected {
        println!("{}", "Remote: connected".green());
    } else {
        println!("{}", "Remote: disconnected (changes are kept locally)".red());
    }
    Ok(())
}
