mod cli;
mod db;
mod draft;
mod error;
mod fmt;
mod models;
mod ocr;
mod remote;
mod reports;
mod settings;
mod storage;
mod store;
mod sync;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{add::AddArgs, Cli, Commands};

fn init_tracing() {
    let filter = EnvFilter::try_from_env("KAKEIBO_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Add {
            amount,
            category,
            member,
            description,
            merchant,
            date,
            receipt,
            no_sync,
        } => cli::add::run(AddArgs {
            amount,
            category,
            member,
            description,
            merchant,
            date,
            receipt,
            no_sync,
        }),
        Commands::Scan { image } => cli::scan::run(&image),
        Commands::List { month, member } => cli::list::run(month, member),
        Commands::Delete { id } => cli::delete::run(&id),
        Commands::Sync => cli::sync::run(),
        Commands::Summary { month } => cli::summary::run(month),
        Commands::Members => cli::members::run(),
        Commands::Status => cli::status::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
