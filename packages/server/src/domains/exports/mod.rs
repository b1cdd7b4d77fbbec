mod export_file;
mod pipeline;

pub use export_file::ExportFile;
pub use pipeline::{ensure_period_export, ExportOutcome};
