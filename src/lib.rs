pub mod auth;
pub mod blog;
pub mod config;
pub mod logging;
pub mod model;
pub mod search;
pub mod storage;
pub mod web;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::info;

use blog::Blog;
use config::Config;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "personal-blog",
    version,
    about = "Personal blog with optional full-text search over posts"
)]
pub struct Cli {
    /// TOML config file (defaults to <data-dir>/blog.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database (overrides DATABASE_PATH)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Data directory for the database, index and uploads
    #[arg(long, global = true, env = "BLOG_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Listen address (overrides BIND_ADDR)
        #[arg(long)]
        bind: Option<std::net::SocketAddr>,
    },
    /// Rebuild the search index from the database
    Reindex {
        /// Index collection to rebuild
        #[arg(long, default_value = search::searchable::POST_COLLECTION)]
        collection: String,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "personal-blog", &mut std::io::stdout());
            Ok(())
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(())
        }
        Commands::Serve { bind } => {
            let mut config = load_config(cli.config, cli.db, cli.data_dir)?;
            if let Some(addr) = bind {
                config.bind_addr = addr;
            }
            let _log_guard = logging::init(config.log_dir.as_deref())?;
            run_serve(config).await
        }
        Commands::Reindex { collection } => {
            if collection != search::searchable::POST_COLLECTION {
                bail!("unknown collection `{collection}` (only `post` is indexed)");
            }
            let config = load_config(cli.config, cli.db, cli.data_dir)?;
            let _log_guard = logging::init(config.log_dir.as_deref())?;
            run_reindex(config).await
        }
    }
}

fn load_config(
    config_path: Option<PathBuf>,
    db_override: Option<PathBuf>,
    data_dir: Option<PathBuf>,
) -> Result<Config> {
    let mut config = Config::load(config_path.as_deref(), data_dir)?;
    if let Some(db) = db_override {
        config.database_path = db;
    }
    Ok(config)
}

async fn run_serve(config: Config) -> Result<()> {
    let addr = config.bind_addr;
    let blog = tokio::task::spawn_blocking(move || Blog::from_config(&config)).await??;
    let blog = Arc::new(blog);
    web::serve(Arc::clone(&blog), addr).await?;

    // The index client may own a blocking HTTP client; drop it off the runtime.
    tokio::task::spawn_blocking(move || {
        blog.shutdown();
        drop(blog);
    })
    .await?;
    Ok(())
}

async fn run_reindex(config: Config) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let storage = storage::SqliteStorage::open(&config.database_path)?;
        let client = search::client_from_config(&config)?;
        let count = search::sync::reindex_posts(&storage, &client)?;
        info!(documents = count, "reindexed posts");
        println!("reindexed {count} posts");
        Ok(())
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reindex_defaults_to_posts() {
        let cli = Cli::try_parse_from(["personal-blog", "reindex"]).unwrap();
        match cli.command {
            Commands::Reindex { collection } => assert_eq!(collection, "post"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn serve_accepts_bind_and_global_flags() {
        let cli = Cli::try_parse_from([
            "personal-blog",
            "serve",
            "--bind",
            "0.0.0.0:8080",
            "--db",
            "/tmp/blog.db",
        ])
        .unwrap();
        assert_eq!(cli.db.as_deref(), Some(std::path::Path::new("/tmp/blog.db")));
        let Commands::Serve { bind } = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(bind.unwrap().port(), 8080);
    }
}
