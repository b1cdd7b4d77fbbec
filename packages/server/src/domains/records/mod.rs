mod loader;
mod record;

pub use loader::{parse_export_csv, upsert_rows, LoadSummary, ParsedRow};
pub use record::PurchaseRecord;
