use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::money::Money;
use super::text::truncate_graphemes;

/// Title used when nothing better can be inferred.
pub const TITLE_PLACEHOLDER: &str = "Unknown";
/// Category used when the caller supplied no usable candidates.
pub const UNCATEGORIZED: &str = "Uncategorized";
pub const MAX_TITLE_GRAPHEMES: usize = 64;

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub price: Money,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub category: String,
}

impl TransactionItem {
    pub fn new(title: impl Into<String>, price: Money, category: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            price,
            quantity: 1,
            category: category.into(),
        }
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity.max(1);
        self
    }
}

/// A structured purchase record built from one receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub title: String,
    /// Serialized as `YYYY-MM-DD`.
    pub date: NaiveDate,
    #[serde(default)]
    pub items: Vec<TransactionItem>,
}

impl Transaction {
    /// Repair a transaction that came from an untrusted collaborator so that
    /// titles and categories are non-empty and titles fit the length cap.
    pub fn conform(mut self) -> Self {
        self.title = conform_title(&self.title);
        for item in &mut self.items {
            item.title = conform_title(&item.title);
            item.quantity = item.quantity.max(1);
            if item.category.trim().is_empty() {
                item.category = UNCATEGORIZED.to_string();
            }
        }
        self
    }
}

fn conform_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        TITLE_PLACEHOLDER.to_string()
    } else {
        truncate_graphemes(trimmed, MAX_TITLE_GRAPHEMES)
    }
}
