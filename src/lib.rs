use log::info;
use postgres::{Client, NoTls};
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;

pub mod auth;
pub mod config;
pub mod error;
pub mod import;
pub mod intensity;
pub mod models;
pub mod routes;
pub mod store;
pub mod views;

pub use crate::config::Config;
pub use crate::error::Error;
pub use crate::intensity::Intensity;
pub use crate::store::{MemoryStore, PgStore, Store};

pub type DbPool = Pool<PostgresConnectionManager<NoTls>>;

pub fn establish_connection(config: &Config) -> Result<Client, Error> {
    Ok(Client::connect(config.database_url()?, NoTls)?)
}

pub fn create_db_pool(config: &Config) -> Result<DbPool, Error> {
    let pg_config = config.database_url()?.parse::<postgres::Config>()?;
    let manager = PostgresConnectionManager::new(pg_config, NoTls);
    Ok(Pool::builder().max_size(config.pool_size).build(manager)?)
}

pub fn create_db(db: &mut Client) -> Result<(), Error> {
    db.batch_execute(store::pg::CREATE_SCHEMA)?;
    info!("schema created");
    Ok(())
}

pub fn empty_db(db: &mut Client) -> Result<(), Error> {
    db.batch_execute(store::pg::DROP_SCHEMA)?;
    info!("schema dropped");
    Ok(())
}
