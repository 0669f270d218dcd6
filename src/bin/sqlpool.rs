use std::path::PathBuf;
use std::process::ExitCode;

use broker_sql_pool::prelude::*;
use clap::Parser;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run SQL statements through a pool of connection workers")]
struct Args {
    /// JSON database configuration; overrides the connection flags below
    #[arg(long)]
    config: Option<PathBuf>,
    /// SQLite database file
    #[arg(long, default_value = "sqlpool.db")]
    db: String,
    #[arg(long, value_enum, default_value = "sqlite")]
    db_type: DatabaseType,
    #[arg(long, default_value_t = 1)]
    connections: usize,
    #[arg(long, default_value_t = 1)]
    queries_per_transaction: u32,
    /// Print pool statistics as JSON before exiting
    #[arg(long)]
    stats: bool,
    #[arg(long)]
    verbose: bool,
    /// Statements to run, in order. SELECTs print their rows.
    statements: Vec<String>,
}

impl Args {
    fn database_config(&self) -> Result<DatabaseConfig, SqlPoolError> {
        match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|err| {
                    SqlPoolError::ConfigError(format!("cannot read {}: {err}", path.display()))
                })?;
                DatabaseConfig::from_json_str(&json)
            }
            None => DatabaseConfig::builder(self.db.clone())
                .db_type(self.db_type)
                .connections(self.connections)
                .queries_per_transaction(self.queries_per_transaction)
                .finish(),
        }
    }
}

async fn print_rows(dispatcher: &Dispatcher, thread: usize) -> Result<(), SqlPoolError> {
    let mut result = dispatcher.get_result(thread).await?;
    let header: Vec<&str> = (0..result.columns_count())
        .filter_map(|idx| result.column_name(idx))
        .collect();
    println!("{}", header.join("\t"));
    while dispatcher.fetch_row(&mut result).await? {
        let values = (0..result.columns_count())
            .map(|idx| result.value_as_str(idx))
            .collect::<Result<Vec<_>, _>>()?;
        println!("{}", values.join("\t"));
    }
    Ok(())
}

async fn run(args: &Args, dispatcher: &Dispatcher) -> Result<(), SqlPoolError> {
    for sql in &args.statements {
        // Each statement waits for the previous one, whichever worker ran it.
        let thread = dispatcher.run_query_sync(sql, "statement failed", None).await?;
        if sql.trim_start().to_ascii_uppercase().starts_with("SELECT") {
            print_rows(dispatcher, thread).await?;
        } else {
            let affected = dispatcher.get_affected_rows(thread, None).await?;
            tracing::info!(worker = thread, "{affected} rows affected");
        }
    }
    dispatcher.commit().await?;
    dispatcher.check_errors()?;

    if args.stats {
        let stats = serde_json::to_string_pretty(&dispatcher.stats())
            .unwrap_or_else(|_| "{}".to_string());
        println!("{stats}");
    }
    Ok(())
}

async fn execute(args: &Args) -> Result<(), SqlPoolError> {
    let config = args.database_config()?;
    let dispatcher = Dispatcher::connect(config, SqliteConnector).await?;
    let outcome = run(args, &dispatcher).await;
    dispatcher.finish();
    outcome
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    match execute(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
