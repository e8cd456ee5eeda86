//! # juristi-sync
//!
//! Command-line front end for the synchronization client. Configuration comes
//! from `juristi.toml`, `.env` and `JURISTI_*` environment variables.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `juristi-sync login <user>` | Sign in (password from `JURISTI_PASSWORD` or `--password`) |
//! | `juristi-sync watch <case>` | Follow live document progress for a case |
//! | `juristi-sync chat <case> "<question>"` | Ask the case assistant and stream the answer |
//! | `juristi-sync upload <case> <file>` | Upload a document with progress |
//! | `juristi-sync documents <case>` | List case documents |
//! | `juristi-sync delete <case> <doc>...` | Delete one or more documents |
//! | `juristi-sync rename <case> <doc> <name>` | Rename a document |
//! | `juristi-sync calendar list` | Calendar events |
//! | `juristi-sync laws search "<query>"` | Search the law library |
//! | `juristi-sync me` | Show the signed-in profile |

mod cli;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let config = juristi_sync::config::load()?;
    juristi_sync::logging::init(config.log_format);
    cli::run(args, config).await
}
