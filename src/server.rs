use std::future::Future;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use crate::cmd;
use crate::connection::Connection;
use crate::db::Db;
use crate::frame;
use crate::reply::Reply;

#[derive(Debug)]
struct Listener {
    listener: TcpListener,
    db: Db,
}

#[derive(Debug)]
struct Handler {
    connection: Connection,
    db: Db,
}

/// Serve every listener against one shared `db` until `shutdown` resolves.
///
/// Connections already accepted keep running on their own tasks.
pub async fn run(listeners: Vec<TcpListener>, db: Db, shutdown: impl Future) {
    let mut accept_loops = JoinSet::new();

    for listener in listeners {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "listening");
        }

        let mut server = Listener {
            listener,
            db: db.clone(),
        };
        accept_loops.spawn(async move { server.run().await });
    }

    // select gives running tasks an opportunity to finish their execution
    tokio::select! {
        _ = async {
            while let Some(res) = accept_loops.join_next().await {
                match res {
                    Ok(Err(err)) => error!(%err, "failed to accept"),
                    Err(err) => error!(%err, "accept loop panicked"),
                    Ok(Ok(())) => {}
                }
            }
        } => {
            warn!("no listener left");
        }
        _ = shutdown => {
            info!("shutting down");
        }
    }
}

impl Listener {
    /// Accept forever, one task per connection.
    async fn run(&mut self) -> Result<(), crate::Error> {
        loop {
            let (socket, peer) = self.accept().await?;

            let mut handler = Handler {
                connection: Connection::new(socket),
                db: self.db.clone(),
            };

            let span = info_span!("connection", %peer);

            tokio::spawn(
                async move {
                    info!("connected");

                    match handler.run().await {
                        Ok(()) => info!("disconnected"),
                        Err(err) => warn!(%err, "connection closed with error"),
                    }
                }
                .instrument(span),
            );
        }
    }

    async fn accept(&mut self) -> Result<(TcpStream, SocketAddr), crate::Error> {
        Ok(self.listener.accept().await?)
    }
}

impl Handler {
    /// Serve requests until the peer closes its side of the stream.
    async fn run(&mut self) -> Result<(), crate::Error> {
        loop {
            let reply = match self.connection.read_frame().await {
                // The store lock is taken and released inside dispatch, never
                // held across the write below.
                Ok(Some(request)) => cmd::dispatch(&request, &self.db),
                Ok(None) => break,
                Err(err @ frame::Error::TooLarge { .. }) => {
                    warn!(%err, "request dropped");
                    Reply::Error(err.to_string())
                }
                Err(err) => return Err(err.into()),
            };

            self.connection.write_reply(&reply).await?;
        }

        self.connection.shutdown().await?;

        Ok(())
    }
}
