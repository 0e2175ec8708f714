use std::path::PathBuf;

use super::build_scanner;
use crate::error::{KakeiboError, Result};
use crate::fmt::yen;
use crate::ocr::ReceiptScanner;
use crate::settings::load_settings;

pub fn run(image: &str) -> Result<()> {
    let settings = load_settings();
    let scanner = build_scanner(&settings)?.ok_or_else(|| {
        KakeiboError::Settings("Set GEMINI_API_KEY to enable receipt scanning.".to_string())
    })?;
    let bytes = std::fs::read(PathBuf::from(image))?;

    let Some(fields) = scanner.extract(&bytes) else {
        println!("No data could be extracted from {image}; enter the expense manually.");
        return Ok(());
    };

    let unset = "(not recognized)";
    println!("Merchant:    {}", if fields.merchant_name.is_empty() { unset } else { fields.merchant_name.as_str() });
    println!("Amount:      {}", fields.amount.map(yen).unwrap_or_else(|| unset.to_string()));
    println!("Date:        {}", fields.date.map(|d| d.to_string()).unwrap_or_else(|| unset.to_string()));
    println!(
        "Category:    {}",
        fields.category.map(|c| c.label().to_string()).unwrap_or_else(|| unset.to_string())
    );
    println!("Confidence:  {:.0}%", fields.confidence * 100.0);
    Ok(())
}
