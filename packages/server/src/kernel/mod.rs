pub mod deps;
pub mod portal_client;
pub mod scheduled_tasks;
pub mod session_store;
pub mod traits;

pub use deps::ServerDeps;
