use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::KakeiboError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Category {
    #[default]
    #[serde(rename = "食費")]
    Food,
    #[serde(rename = "日用品")]
    DailyGoods,
    #[serde(rename = "交通費")]
    Transport,
    #[serde(rename = "交際費")]
    Social,
    #[serde(rename = "住居・光熱費")]
    Housing,
    #[serde(rename = "エンタメ")]
    Entertainment,
    #[serde(rename = "美容・衣服")]
    Beauty,
    #[serde(rename = "その他")]
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Food,
        Category::DailyGoods,
        Category::Transport,
        Category::Social,
        Category::Housing,
        Category::Entertainment,
        Category::Beauty,
        Category::Other,
    ];

    /// Display label; also the persisted and wire form.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Food => "食費",
            Self::DailyGoods => "日用品",
            Self::Transport => "交通費",
            Self::Social => "交際費",
            Self::Housing => "住居・光熱費",
            Self::Entertainment => "エンタメ",
            Self::Beauty => "美容・衣服",
            Self::Other => "その他",
        }
    }

    /// ASCII key accepted on the command line.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Food => "food",
            Self::DailyGoods => "daily",
            Self::Transport => "transport",
            Self::Social => "social",
            Self::Housing => "housing",
            Self::Entertainment => "entertainment",
            Self::Beauty => "beauty",
            Self::Other => "other",
        }
    }

    /// Match against the fixed set by label or key. Anything else is `None`.
    pub fn lookup(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label() == raw || c.key().eq_ignore_ascii_case(raw))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = KakeiboError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::lookup(s).ok_or_else(|| KakeiboError::UnknownCategory(s.to_string()))
    }
}

/// A household participant. The roster is fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub id: &'static str,
    pub name: &'static str,
    pub color: &'static str,
}

pub const MEMBERS: &[Member] = &[
    Member { id: "user-1", name: "パパ", color: "#3b82f6" },
    Member { id: "user-2", name: "ママ", color: "#ec4899" },
    Member { id: "user-3", name: "共通", color: "#10b981" },
];

impl Member {
    /// Resolve a member by id or display name.
    pub fn resolve(raw: &str) -> Result<&'static Member, KakeiboError> {
        let raw = raw.trim();
        MEMBERS
            .iter()
            .find(|m| m.id == raw || m.name == raw)
            .ok_or_else(|| KakeiboError::UnknownMember(raw.to_string()))
    }

    pub fn default_member() -> &'static Member {
        &MEMBERS[0]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Pending,
    Synced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub date: NaiveDate,
    /// Minor currency units (yen).
    pub amount: u64,
    pub category: Category,
    pub owner_id: String,
    pub owner_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,
    /// Base64-encoded receipt image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_image: Option<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
    #[serde(default)]
    pub sync_state: SyncState,
}

impl Record {
    pub fn new(owner: &Member, date: NaiveDate, amount: u64, category: Category) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            date,
            amount,
            category,
            owner_id: owner.id.to_string(),
            owner_name: owner.name.to_string(),
            description: String::new(),
            merchant_name: None,
            receipt_image: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            sync_state: SyncState::Pending,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.sync_state == SyncState::Synced
    }
}

/// A local deletion that still has to reach the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub id: String,
    pub deleted_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub connected: bool,
    #[serde(default)]
    pub last_sync: Option<i64>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            connected: true,
            last_sync: None,
        }
    }
}
