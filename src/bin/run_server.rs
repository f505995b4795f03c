use clap::Parser;
use tokio::signal;
use tracing::error;

use todo_sync::config::ServerConfig;
use todo_sync::{logging, server, Db, Error};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = ServerConfig::parse();

    logging::init("info")?;

    let listeners = match config.bind().await {
        Ok(listeners) => listeners,
        Err(err) => {
            error!(port = config.port, %err, "could not bind any interface");
            return Err(err.into());
        }
    };

    server::run(listeners, Db::new(), signal::ctrl_c()).await;

    Ok(())
}
