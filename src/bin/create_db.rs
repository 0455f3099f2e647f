use std::process;

use traffic_monitor::{create_db, establish_connection, Config};

fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let result = Config::from_env()
        .map_err(traffic_monitor::Error::from)
        .and_then(|config| establish_connection(&config))
        .and_then(|mut db| create_db(&mut db));
    if let Err(err) = result {
        eprintln!("Failed to create DB: {}", err);
        process::exit(1);
    }
}
