use std::{path::PathBuf, time::Duration};

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use server_api::{auth::JwtKeys, events, ApiContext, ChatLimits};
use shared::domain::{EventId, UserId};
use storage::{open_store, Backend, StoreConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Relational store. Takes precedence over --document-path.
    #[arg(long)]
    database_url: Option<String>,
    /// JSON snapshot for the document store.
    #[arg(long)]
    document_path: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Applies pending migrations to the relational store.
    Migrate,
    CreateUser {
        username: String,
    },
    CreateEvent {
        creator_user_id: i64,
        title: String,
    },
    /// Joins the event and provisions its group chat.
    JoinEvent {
        event_id: i64,
        user_id: i64,
    },
    /// Mints a development token.
    IssueToken {
        user_id: i64,
        #[arg(long)]
        secret: String,
        #[arg(long, default_value_t = 86_400)]
        ttl_secs: u64,
    },
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        match &self.database_url {
            Some(database_url) => StoreConfig::Relational {
                database_url: database_url.clone(),
                max_connections: 1,
            },
            None => StoreConfig::Document {
                snapshot_path: self.document_path.clone(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    if let Command::IssueToken {
        user_id,
        secret,
        ttl_secs,
    } = &cli.command
    {
        if secret.trim().is_empty() {
            bail!("--secret must not be empty");
        }
        let token = JwtKeys::new(secret).issue(UserId(*user_id), Duration::from_secs(*ttl_secs))?;
        println!("{token}");
        return Ok(());
    }

    if cli.database_url.is_none() && cli.document_path.is_none() {
        bail!("pass --database-url or --document-path");
    }
    let handles = open_store(&cli.store_config()).await?;
    let store = handles.chats.clone();

    match cli.command {
        Command::Migrate => {
            if store.backend() == Backend::Document {
                println!("document store needs no migrations");
            } else {
                println!("migrations applied");
            }
        }
        Command::CreateUser { username } => {
            let user_id = store.create_user(&username).await?;
            println!("created user_id={user_id}");
        }
        Command::CreateEvent {
            creator_user_id,
            title,
        } => {
            let creator = UserId(creator_user_id);
            if !store.user_exists(creator).await? {
                bail!("user {creator} does not exist");
            }
            let event_id = store.create_event(creator, &title).await?;
            println!("created event_id={event_id}");
        }
        Command::JoinEvent { event_id, user_id } => {
            let ctx = ApiContext::new(handles, ChatLimits::default());
            let chat_id = events::join_event(&ctx, UserId(user_id), EventId(event_id))
                .await
                .map_err(|err| anyhow!(err.message))?;
            println!("joined event_id={event_id} group_chat_id={chat_id}");
        }
        Command::IssueToken { .. } => {}
    }

    Ok(())
}
