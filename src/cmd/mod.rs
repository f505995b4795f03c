use serde_json::{json, Map, Value};
use tracing::{info, warn};

mod parse;

use crate::db::{Batches, Collection, Db};
use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::reply::Reply;
use parse::Parse;

#[derive(Debug)]
pub enum Command {
    Transfer(Transfer),
    Add(Add),
    Delete(Delete),
}

#[derive(Debug, Default)]
pub struct Transfer;

#[derive(Debug)]
pub struct Add {
    pub revision: Option<u64>,
    pub batches: Batches,
}

/// Deleting is not implemented; the collection fields are carried along
/// only so the request can be logged and re-encoded.
#[derive(Debug)]
pub struct Delete {
    pub revision: Option<u64>,
    pub targets: Map<String, Value>,
}

/// Decode one frame and run it against `db`.
///
/// Every `ProtocolError` ends here as a reply, so the caller only ever sees
/// something to write back.
pub fn dispatch(frame: &Frame, db: &Db) -> Reply {
    match Command::from_frame(frame) {
        Ok(cmd) => {
            info!(action = cmd.name(), "request");
            cmd.apply(db)
        }
        Err(err) => {
            warn!(%err, "request rejected");
            Reply::from(err)
        }
    }
}

impl Command {
    pub fn from_frame(frame: &Frame) -> Result<Command, ProtocolError> {
        let parse = Parse::new(frame)?;

        let action = parse.action()?;

        let command = match action.as_str() {
            "transfer" => Command::Transfer(Transfer::parse_frames(&parse)?),
            "add" => Command::Add(Add::parse_frames(&parse)?),
            "delete" => Command::Delete(Delete::parse_frames(&parse)?),
            _ => return Err(ProtocolError::UnhandledAction(action)),
        };

        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Transfer(_) => "transfer",
            Command::Add(_) => "add",
            Command::Delete(_) => "delete",
        }
    }

    pub fn apply(self, db: &Db) -> Reply {
        match self {
            Command::Transfer(cmd) => cmd.apply(db),
            Command::Add(cmd) => cmd.apply(db),
            Command::Delete(cmd) => cmd.apply(db),
        }
    }

    pub fn into_frame(self) -> Frame {
        match self {
            Command::Transfer(cmd) => cmd.into_frame(),
            Command::Add(cmd) => cmd.into_frame(),
            Command::Delete(cmd) => cmd.into_frame(),
        }
    }
}

impl Transfer {
    pub fn new() -> Transfer {
        Transfer
    }

    pub fn into_frame(self) -> Frame {
        encode(json!({ "action": "transfer" }))
    }

    pub(crate) fn parse_frames(_parse: &Parse) -> Result<Transfer, ProtocolError> {
        Ok(Transfer)
    }

    /// Whatever revision the client holds, it gets the whole store.
    pub fn apply(self, db: &Db) -> Reply {
        Reply::Snapshot(db.snapshot())
    }
}

impl Add {
    pub fn new(revision: u64, batches: Batches) -> Add {
        Add {
            revision: Some(revision),
            batches,
        }
    }

    pub fn into_frame(self) -> Frame {
        let mut request = Map::new();
        request.insert("action".into(), json!("add"));
        if let Some(revision) = self.revision {
            request.insert("revision".into(), json!(revision));
        }
        for collection in Collection::ALL {
            if let Some(batch) = self.batches.get(collection) {
                request.insert(collection.name().into(), batch.clone());
            }
        }

        encode(Value::Object(request))
    }

    pub(crate) fn parse_frames(parse: &Parse) -> Result<Add, ProtocolError> {
        Ok(Add {
            revision: parse.revision(),
            batches: parse.batches(),
        })
    }

    pub fn apply(self, db: &Db) -> Reply {
        match db.add(self.revision, &self.batches) {
            Ok(revision) => {
                info!(revision, "OK");
                Reply::Ok(revision)
            }
            Err(err) => {
                log_rejection(&err);
                Reply::from(err)
            }
        }
    }
}

impl Delete {
    pub fn new(revision: u64) -> Delete {
        Delete {
            revision: Some(revision),
            targets: Map::new(),
        }
    }

    pub fn target(mut self, collection: Collection, value: Value) -> Delete {
        self.targets.insert(collection.name().into(), value);
        self
    }

    pub fn into_frame(self) -> Frame {
        let mut request = self.targets;
        request.insert("action".into(), json!("delete"));
        if let Some(revision) = self.revision {
            request.insert("revision".into(), json!(revision));
        }

        encode(Value::Object(request))
    }

    pub(crate) fn parse_frames(parse: &Parse) -> Result<Delete, ProtocolError> {
        Ok(Delete {
            revision: parse.revision(),
            targets: parse.targets(),
        })
    }

    pub fn apply(self, db: &Db) -> Reply {
        let err = match db.delete(self.revision) {
            Ok(()) => ProtocolError::Unsupported,
            Err(err) => err,
        };

        log_rejection(&err);
        Reply::from(err)
    }
}

fn log_rejection(err: &ProtocolError) {
    match err {
        ProtocolError::RevisionMismatch { submitted, current } => {
            info!(?submitted, current, "OUT_OF_DATE");
        }
        ProtocolError::Unsupported => info!("UNSUPPORTED"),
        other => warn!(err = %other, "request failed"),
    }
}

fn encode(request: Value) -> Frame {
    Frame::new(request.to_string().into_bytes())
}
