mod run;

pub use run::{run_document_job, DocumentRunReport};
