use base64::Engine;
use chrono::NaiveDate;

use crate::error::{KakeiboError, Result};
use crate::models::{Category, Member, Record};
use crate::ocr::OcrFields;

/// Entry form state before it becomes a record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDraft {
    pub amount: Option<u64>,
    pub description: String,
    pub category: Category,
    pub merchant: Option<String>,
    pub date: NaiveDate,
    pub receipt: Option<Vec<u8>>,
}

impl RecordDraft {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            amount: None,
            description: String::new(),
            category: Category::default(),
            merchant: None,
            date: today,
            receipt: None,
        }
    }

    /// Copy scan results onto the form. `None` leaves every field as it was.
    /// Returns whether anything was applied.
    pub fn apply_ocr(&mut self, fields: Option<&OcrFields>) -> bool {
        let Some(fields) = fields else {
            return false;
        };
        if let Some(amount) = fields.amount {
            self.amount = Some(amount);
        }
        if !fields.merchant_name.is_empty() {
            self.merchant = Some(fields.merchant_name.clone());
            if self.description.is_empty() {
                self.description = format!("Scanned: {}", fields.merchant_name);
            }
        }
        if let Some(date) = fields.date {
            self.date = date;
        }
        if let Some(category) = fields.category {
            self.category = category;
        }
        true
    }

    pub fn into_record(self, owner: &Member) -> Result<Record> {
        let amount = self
            .amount
            .ok_or_else(|| KakeiboError::InvalidInput("an amount is required".to_string()))?;
        let mut record = Record::new(owner, self.date, amount, self.category);
        record.description = self.description;
        record.merchant_name = self.merchant.filter(|m| !m.trim().is_empty());
        record.receipt_image = self
            .receipt
            .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes));
        Ok(record)
    }
}

/// Parse a user-typed amount in yen. Accepts `1,200` and `¥1200`.
pub fn parse_amount(raw: &str) -> Result<u64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '¥' | '￥'))
        .collect();
    cleaned
        .parse::<u64>()
        .map_err(|_| KakeiboError::InvalidInput(format!("amount must be a whole number of yen: {raw}")))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| KakeiboError::InvalidInput(format!("date must be YYYY-MM-DD: {raw}")))
}
