use serde_json::Value;
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::cmd::{Add, Command, Delete, Transfer};
use crate::connection::Connection;
use crate::db::{Batches, Collection, Snapshot};
use crate::frame::Frame;
use crate::reply::Reply;

/// Async client for the to-do server. One request is in flight at a time.
pub struct Client {
    connection: Connection,
}

impl Client {
    pub async fn connect<T: ToSocketAddrs>(addr: T) -> Result<Client, crate::Error> {
        let socket = TcpStream::connect(addr).await?;
        let connection = Connection::new(socket);

        Ok(Client { connection })
    }

    pub async fn transfer(&mut self) -> Result<Snapshot, crate::Error> {
        match self.request(Command::Transfer(Transfer::new())).await? {
            Reply::Snapshot(snapshot) => Ok(snapshot),
            other => Err(format!("unexpected reply to transfer: {}", other).into()),
        }
    }

    /// Returns the server's reply as is; `OUT_OF_DATE` and `ERROR` are
    /// answers here, not failures.
    pub async fn add(&mut self, revision: u64, batches: Batches) -> Result<Reply, crate::Error> {
        self.request(Command::Add(Add::new(revision, batches))).await
    }

    pub async fn delete(
        &mut self,
        revision: u64,
        targets: Vec<(Collection, Value)>,
    ) -> Result<Reply, crate::Error> {
        let delete = targets
            .into_iter()
            .fold(Delete::new(revision), |delete, (collection, value)| {
                delete.target(collection, value)
            });

        self.request(Command::Delete(delete)).await
    }

    /// Send an arbitrary request line, for payloads the typed helpers
    /// cannot express.
    pub async fn send_raw(&mut self, request: &str) -> Result<Reply, crate::Error> {
        let frame = Frame::new(request.as_bytes().to_vec());
        self.connection.write_frame(&frame).await?;

        self.read_response().await
    }

    async fn request(&mut self, cmd: Command) -> Result<Reply, crate::Error> {
        let frame = cmd.into_frame();
        self.connection.write_frame(&frame).await?;

        self.read_response().await
    }

    async fn read_response(&mut self) -> Result<Reply, crate::Error> {
        match self.connection.read_frame().await? {
            Some(frame) => Reply::parse(frame.payload()),
            None => Err("connection reset by server".into()),
        }
    }
}
