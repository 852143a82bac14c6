use std::path::PathBuf;

use clap::Parser;
use lms_server::{db, user};

/// Create the admin account, or reset its password if it already exists.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short, long, default_value = "database/lms.db")]
    database: PathBuf,

    #[arg(long, default_value = "Administrator")]
    name: String,

    #[arg(long)]
    email: String,

    #[arg(long)]
    password: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    if let Some(parent) = args.database.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = db::connect(&format!("sqlite://{}?mode=rwc", args.database.display())).await?;
    db::migrate(&db).await?;
    let admin = user::create_or_update_admin(&db, args.name, args.email, args.password).await?;
    println!("Admin account ready: {} <{}>", admin.name, admin.email);
    Ok(())
}
