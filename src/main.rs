use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use lms_server::{config::Config, db, server, utils::init_log};

#[derive(Debug, Parser)]
#[command(author, version, about = "Role-based learning-management server")]
struct Cli {
    /// Path to TOML config file
    #[arg(short, long, default_value = "lms.toml")]
    config: PathBuf,

    /// Override the configured host
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Override the configured port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the configured database file
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Cli::parse();
    let mut config = Config::load_or_default(&args.config)?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database = database;
    }
    let _guard = init_log(config.log_dir.clone());

    if let Some(parent) = config.database.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = db::connect(&format!("sqlite://{}?mode=rwc", config.database.display())).await?;
    db::migrate(&db).await?;

    let app = server::build(db, config.session_days).await?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("listening on http://{addr}");
    tracing::info!("Swagger UI available at http://{addr}/swagger-ui");
    axum_server::bind(addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
