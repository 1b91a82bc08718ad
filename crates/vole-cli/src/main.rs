//! # vole
//!
//! Operator CLI for a local Vole store. It drives the same store
//! operations the HTTP layer uses, so a store can be inspected and
//! populated from a terminal.
//!
//! Configuration comes from the `VOLE_*` environment variables (see
//! `vole_store::config`); logging honours `RUST_LOG`.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vole_store::{Store, StoreConfig, User};

#[derive(Parser, Debug)]
#[command(name = "vole")]
#[command(about = "Inspect and populate a local Vole store", long_about = None)]
struct Args {
    /// Store root directory (overrides VOLE_DIR)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all known users
    Users,
    /// Show the local operator
    MyUser,
    /// Create or update a user from a container payload and make it my user
    CreateUser {
        /// `{"user": {...}}` JSON, or `-` to read stdin
        json: String,
    },
    /// List posts, newest first
    Posts {
        /// User id, or `my_user`; omit for every user's posts
        #[arg(short, long)]
        user: Option<String>,
        /// Only posts older than this post id
        #[arg(short, long)]
        before: Option<String>,
        /// Page size (defaults to VOLE_PAGE_SIZE)
        #[arg(short, long)]
        limit: Option<i64>,
    },
    /// Save a post for my user from a container payload
    Post {
        /// `{"post": {...}}` JSON, or `-` to read stdin
        json: String,
    },
    /// Delete one of my user's posts
    DeletePost { id: String },
    /// Stage a file for attachment and print its hash
    Stage { path: PathBuf },
    /// List staged uploads not yet committed
    Staged,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vole_store=debug")),
        )
        .init();

    let args = Args::parse();

    let mut config = StoreConfig::from_env()?;
    if let Some(dir) = args.dir {
        config.root = dir;
    }
    let page_size = config.page_size;
    info!(root = %config.root.display(), version = %config.version, "Loaded configuration");

    let store = Store::open(config).context("opening store")?;

    match args.command {
        Command::Users => {
            let my_id = store.my_user_id()?;
            println!("{}", store.get_users()?.to_json(my_id.as_deref())?);
        }
        Command::MyUser => {
            let mine = store.my_user_collection()?;
            let my_id = mine.items().first().map(|u| u.id.clone());
            println!("{}", mine.to_json(my_id.as_deref())?);
        }
        Command::CreateUser { json } => {
            let payload = read_payload(&json)?;
            let user = store.new_user_from_container_json(&payload)?;
            store.save_user(&user)?;
            store.set_my_user(&user)?;
            println!("{}", user.container(true).to_json()?);
        }
        Command::Posts {
            user,
            before,
            limit,
        } => {
            let posts = match user.as_deref() {
                None => store.get_all_posts()?,
                Some(id) => store.get_posts(&resolve_user(&store, id)?)?,
            };
            let page = posts
                .before_id(before.as_deref())
                .limit(Some(limit.unwrap_or(page_size as i64)));
            println!("{}", page.to_json()?);
        }
        Command::Post { json } => {
            let payload = read_payload(&json)?;
            let me = store.get_my_user().context("no my user; run create-user first")?;
            let mut post = store.new_post_from_container_json(&me, &payload)?;
            store.save_post(&mut post)?;
            println!("{}", post.container().to_json()?);
        }
        Command::DeletePost { id } => {
            let me = store.get_my_user().context("no my user; run create-user first")?;
            let deleted = store.delete_post(&me, &id)?;
            info!(post_id = %id, deleted, "delete-post done");
            println!("OK");
        }
        Command::Stage { path } => {
            let file =
                File::open(&path).with_context(|| format!("opening {}", path.display()))?;
            let staged = store.files().stage(file)?;
            println!(
                "{}",
                serde_json::json!({ "hash": staged.hash, "size": staged.size })
            );
        }
        Command::Staged => {
            for hash in store.files().staged_hashes()? {
                println!("{hash}");
            }
        }
    }

    Ok(())
}

fn resolve_user(store: &Store, id: &str) -> anyhow::Result<User> {
    let user = if id == "my_user" {
        store.get_my_user()
    } else {
        store.get_user_by_id(id)
    };
    user.with_context(|| format!("user {id} not found"))
}

fn read_payload(arg: &str) -> anyhow::Result<Vec<u8>> {
    if arg != "-" {
        return Ok(arg.as_bytes().to_vec());
    }
    let mut buf = Vec::new();
    io::stdin().read_to_end(&mut buf)?;
    if buf.is_empty() {
        bail!("empty payload on stdin");
    }
    Ok(buf)
}
