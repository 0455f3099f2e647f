use std::env;
use std::io;
use std::process;
use std::sync::Arc;

use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use getopts::Options;
use log::{error, info};

use traffic_monitor::auth::generate_token;
use traffic_monitor::{create_db_pool, routes, Config, MemoryStore, PgStore, Store};

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn to_io<E: std::error::Error + Send + Sync + 'static>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("m", "memory", "serve from an in-memory store (data is lost on exit)");
    opts.optflag("h", "help", "print this help menu");
    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            print_usage(&program, opts);
            process::exit(2);
        }
    };
    if matches.opt_present("h") {
        print_usage(&program, opts);
        return Ok(());
    }

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let store: Arc<dyn Store> = if matches.opt_present("m") {
        let store = MemoryStore::new();
        let token = generate_token();
        store.create_user("admin", true, &token).map_err(to_io)?;
        info!("in-memory store; admin token: {}", token);
        Arc::new(store)
    } else {
        Arc::new(PgStore::new(create_db_pool(&config).map_err(to_io)?))
    };
    let store = web::Data::from(store);

    info!("listening on http://{}", config.bind_address);
    info!("API docs at http://{}{}", config.bind_address, routes::DOCS_PATH);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(store.clone())
            .configure(routes::configure)
    })
    .bind(&config.bind_address)?
    .run()
    .await
}
