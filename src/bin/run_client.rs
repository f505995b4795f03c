use clap::{Parser, Subcommand};
use serde_json::Value;

use todo_sync::client::Client;
use todo_sync::db::Batches;
use todo_sync::{logging, Collection, Error, Reply};

/// Talk to a running to-do server
#[derive(Parser, Debug)]
#[command(name = "run_client")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8124")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the full store as JSON
    Transfer,

    /// Upsert items; each collection takes a JSON array
    Add {
        /// Revision the change is based on
        #[arg(short, long)]
        revision: u64,

        #[arg(long)]
        projects: Option<String>,

        #[arg(long)]
        tasks: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long)]
        alarms: Option<String>,
    },

    /// Ask the server to delete (it answers UNSUPPORTED)
    Delete {
        #[arg(short, long)]
        revision: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    logging::init("warn")?;

    let mut client = Client::connect(cli.addr.as_str()).await?;

    let reply = match cli.command {
        Commands::Transfer => Reply::Snapshot(client.transfer().await?),
        Commands::Add {
            revision,
            projects,
            tasks,
            notes,
            alarms,
        } => {
            let mut batches = Batches::default();
            for (collection, arg) in [
                (Collection::Projects, projects),
                (Collection::Tasks, tasks),
                (Collection::Notes, notes),
                (Collection::Alarms, alarms),
            ] {
                if let Some(json) = arg {
                    batches.set(collection, parse_batch(collection, &json)?);
                }
            }

            client.add(revision, batches).await?
        }
        Commands::Delete { revision } => client.delete(revision, vec![]).await?,
    };

    println!("{}", reply);

    Ok(())
}

fn parse_batch(collection: Collection, json: &str) -> Result<Vec<Value>, Error> {
    match serde_json::from_str(json)? {
        Value::Array(items) => Ok(items),
        _ => Err(format!("--{} expects a JSON array", collection).into()),
    }
}
