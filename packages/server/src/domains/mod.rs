pub mod accounts;
pub mod documents;
pub mod evidence;
pub mod exports;
pub mod jobs;
pub mod notifications;
pub mod records;
