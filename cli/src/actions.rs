use diesel::PgConnection;
use models::error::ModelError;
use std::path::Path;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
pub enum DbAction {
    /// Applies every pending migration.
    Up,
    /// Reverts the latest applied migration.
    Down,
    /// Lists migrations and whether they are applied.
    Status,
    /// Drops every table. Needs `--yes`.
    Drop {
        #[structopt(long = "yes")]
        yes: bool,
    },
}

impl DbAction {
    /// Runs the action and returns the lines to report.
    pub fn execute(&self, conn: &PgConnection, migrations: &Path) -> Result<Vec<String>, ModelError> {
        match self {
            Self::Up => {
                models::init(conn)?;
                Ok(vec!["Migrations are up to date".to_string()])
            }
            Self::Down => {
                let version = models::revert_latest(conn, migrations)?;
                Ok(vec![format!("Reverted migration {}", version)])
            }
            Self::Status => Ok(format_status(&models::status(conn, migrations)?)),
            Self::Drop { yes: false } => Ok(vec!["Refusing to drop the database without --yes".to_string()]),
            Self::Drop { yes: true } => {
                models::drop_all(conn)?;
                Ok(vec!["Dropped every table".to_string()])
            }
        }
    }
}

fn format_status(migrations: &[(String, bool)]) -> Vec<String> {
    if migrations.is_empty() {
        return vec!["No migrations found".to_string()];
    }
    migrations
        .iter()
        .map(|(version, applied)| format!("[{}] {}", if *applied { "X" } else { " " }, version))
        .collect()
}
