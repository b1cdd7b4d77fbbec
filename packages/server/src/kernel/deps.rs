//! Shared dependency container handed to job executors.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::kernel::session_store::SessionStore;
use crate::kernel::traits::DriverFactory;

#[derive(Clone)]
pub struct ServerDeps {
    pub pool: PgPool,
    pub config: Config,
    pub sessions: SessionStore,
    pub drivers: Arc<dyn DriverFactory>,
    pub sire: Arc<sire_client::SireClient>,
}

impl ServerDeps {
    pub fn new(
        pool: PgPool,
        config: Config,
        drivers: Arc<dyn DriverFactory>,
        sire: Arc<sire_client::SireClient>,
    ) -> Self {
        let sessions = SessionStore::new(&config.sessions_dir);
        Self {
            pool,
            config,
            sessions,
            drivers,
            sire,
        }
    }
}
