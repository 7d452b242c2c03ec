use cli::cli::{Cli, Command, DbSettings, Settings};
use diesel::{Connection, PgConnection};
use slog as log;
use structopt::StructOpt;

fn main() {
    let cli = Cli::from_args();

    let result = match &cli.command {
        Command::Serve => {
            let settings = cli.load::<Settings>().expect("Failed to load settings.");
            let logger = utils::xlogging::init_log(&settings.logging).expect("Failed to initialize logging.");
            let result = cli::serve(settings, logger.clone());
            if let Err(err) = &result {
                log::crit!(logger, "lnhub stopped: {}", err);
            }
            result.map_err(|err| err.to_string())
        }
        Command::Db { action, migrations } => {
            let settings = cli.load::<DbSettings>().expect("Failed to load settings.");
            let migrations = migrations.clone().unwrap_or_else(models::migrations_dir);
            PgConnection::establish(&settings.psql_url)
                .map_err(|err| err.to_string())
                .and_then(|conn| action.execute(&conn, &migrations).map_err(|err| err.to_string()))
                .map(|lines| lines.iter().for_each(|line| println!("{}", line)))
        }
    };

    if let Err(err) = result {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}
