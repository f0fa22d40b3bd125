pub mod money;
pub mod text;
pub mod transaction;

pub use money::Money;
pub use text::truncate_graphemes;
pub use transaction::{
    Transaction, TransactionItem, MAX_TITLE_GRAPHEMES, TITLE_PLACEHOLDER, UNCATEGORIZED,
};
