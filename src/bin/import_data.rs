use getopts::Options;
use std::env;
use std::process;

use chrono::Utc;

use traffic_monitor::import::{import_path, DEFAULT_PATH};
use traffic_monitor::{create_db_pool, Config, PgStore};

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optopt("f", "file", &format!("CSV file (default {})", DEFAULT_PATH), "FILE");
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
        return;
    }
    let file = matches.opt_str("f").unwrap_or_else(|| DEFAULT_PATH.to_string());

    let store = match Config::from_env()
        .map_err(traffic_monitor::Error::from)
        .and_then(|config| create_db_pool(&config))
    {
        Ok(pool) => PgStore::new(pool),
        Err(err) => {
            eprintln!("Failed to connect: {}", err);
            process::exit(1);
        }
    };

    match import_path(&store, &file, Utc::now()) {
        Ok(summary) => {
            println!("Segments created: {}", summary.segments_created);
            println!("Readings created: {}", summary.readings_created);
            println!("Errors: {}", summary.errors);
        }
        Err(err) => {
            eprintln!("Import aborted: {}", err);
            process::exit(1);
        }
    }
}
