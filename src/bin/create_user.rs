use getopts::Options;
use std::env;
use std::process;

use traffic_monitor::auth::generate_token;
use traffic_monitor::{create_db_pool, Config, PgStore, Store};

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optopt("n", "name", "user name", "NAME");
    opts.optflag("a", "admin", "allow the user to create, update and delete data");
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
    let name = match matches.opt_str("n") {
        Some(name) => name,
        None => {
            print_usage(&program, opts);
            process::exit(2);
        }
    };
    let is_admin = matches.opt_present("a");

    let token = generate_token();
    let result = Config::from_env()
        .map_err(traffic_monitor::Error::from)
        .and_then(|config| create_db_pool(&config))
        .and_then(|pool| PgStore::new(pool).create_user(&name, is_admin, &token));
    match result {
        Ok(user) => {
            println!("Created user {} with ID {} (admin: {})", user.username, user.id, user.is_admin);
            println!("Token: {}", token);
        }
        Err(err) => {
            eprintln!("Failed to create user: {}", err);
            process::exit(1);
        }
    }
}
