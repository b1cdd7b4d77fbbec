mod evidence;

pub use evidence::{AttemptUpdate, Evidence, EvidenceKind, EvidenceStatus, Progress};
