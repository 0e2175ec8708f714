use chrono::Datelike;

use crate::error::{KakeiboError, Result};
use crate::models::{Category, Member, Record, MEMBERS};

// ---------------------------------------------------------------------------
// Period filter
// ---------------------------------------------------------------------------

/// Parse `YYYY-MM` into (year, month).
pub fn parse_month(raw: &str) -> Result<(i32, u32)> {
    let invalid = || KakeiboError::InvalidInput(format!("month must be YYYY-MM: {raw}"));
    let (y, m) = raw.trim().split_once('-').ok_or_else(invalid)?;
    let year: i32 = y.parse().map_err(|_| invalid())?;
    let month: u32 = m.parse().map_err(|_| invalid())?;
    if !(1..=12).contains(&month) {
        return Err(invalid());
    }
    Ok((year, month))
}

pub fn in_month(records: &[Record], year: i32, month: u32) -> Vec<Record> {
    records
        .iter()
        .filter(|r| r.date.year() == year && r.date.month() == month)
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Totals
// ---------------------------------------------------------------------------

pub struct Summary {
    pub total: u64,
    pub count: usize,
    pub by_category: Vec<(Category, u64)>,
    pub by_member: Vec<(&'static Member, u64)>,
}

pub fn total_spend(records: &[Record]) -> u64 {
    records.iter().map(|r| r.amount).sum()
}

/// Category totals in the fixed category order, zero totals omitted.
pub fn by_category(records: &[Record]) -> Vec<(Category, u64)> {
    Category::ALL
        .into_iter()
        .map(|cat| {
            let total: u64 = records.iter().filter(|r| r.category == cat).map(|r| r.amount).sum();
            (cat, total)
        })
        .filter(|(_, total)| *total > 0)
        .collect()
}

/// Totals for every roster member, including members with nothing spent.
pub fn by_member(records: &[Record]) -> Vec<(&'static Member, u64)> {
    MEMBERS
        .iter()
        .map(|m| {
            let total: u64 = records.iter().filter(|r| r.owner_id == m.id).map(|r| r.amount).sum();
            (m, total)
        })
        .collect()
}

pub fn summarize(records: &[Record]) -> Summary {
    Summary {
        total: total_spend(records),
        count: records.len(),
        by_category: by_category(records),
        by_member: by_member(records),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rec(owner: &str, amount: u64, category: Category, date: (i32, u32, u32)) -> Record {
        let date = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
        Record::new(Member::resolve(owner).unwrap(), date, amount, category)
    }

    fn seed() -> Vec<Record> {
        vec![
            rec("user-1", 1200, Category::Food, (2025, 1, 5)),
            rec("user-2", 800, Category::Food, (2025, 1, 20)),
            rec("user-2", 3000, Category::Beauty, (2025, 2, 1)),
            rec("user-3", 9000, Category::Housing, (2025, 1, 25)),
        ]
    }

    #[test]
    fn test_total_spend() {
        assert_eq!(total_spend(&seed()), 14000);
        assert_eq!(total_spend(&[]), 0);
    }

    #[test]
    fn test_by_category_fixed_order_without_zeros() {
        let totals = by_category(&seed());
        assert_eq!(
            totals,
            vec![
                (Category::Food, 2000),
                (Category::Housing, 9000),
                (Category::Beauty, 3000),
            ]
        );
    }

    #[test]
    fn test_by_member_includes_everyone() {
        let records = vec![rec("user-2", 500, Category::Other, (2025, 3, 3))];
        let totals: Vec<(&str, u64)> = by_member(&records).into_iter().map(|(m, t)| (m.id, t)).collect();
        assert_eq!(totals, vec![("user-1", 0), ("user-2", 500), ("user-3", 0)]);
    }

    #[test]
    fn test_month_filter() {
        let jan = in_month(&seed(), 2025, 1);
        assert_eq!(jan.len(), 3);
        let summary = summarize(&jan);
        assert_eq!(summary.total, 11000);
        assert_eq!(summary.count, 3);
    }

    #[test]
    fn test_parse_month() {
        assert_eq!(parse_month("2025-03").unwrap(), (2025, 3));
        assert!(parse_month("2025-13").is_err());
        assert!(parse_month("March").is_err());
    }
}
