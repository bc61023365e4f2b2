use std::sync::Arc;

use super::{
    config::Config,
    database::{Database, DatabaseError},
};

pub struct State {
    pub config: Config,
    pub database: Database,
}

impl State {
    pub async fn new(config: Config) -> Result<Arc<Self>, DatabaseError> {
        let database = Database::open(&config.db_file).await?;

        Ok(Arc::new(Self { config, database }))
    }
}
