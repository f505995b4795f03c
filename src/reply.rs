use std::fmt;

use atoi::atoi;

use crate::db::Snapshot;
use crate::error::ProtocolError;

/// What the server writes back for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `OK <revision>`
    Ok(u64),
    /// `OUT_OF_DATE`
    OutOfDate,
    /// `UNSUPPORTED`
    Unsupported,
    /// `ERROR <message>`
    Error(String),
    /// Transfer result, serialized as one JSON object.
    Snapshot(Snapshot),
}

impl Reply {
    /// Text of the reply without the line terminator.
    pub fn to_text(&self) -> String {
        match self {
            Reply::Ok(revision) => format!("OK {}", revision),
            Reply::OutOfDate => "OUT_OF_DATE".to_string(),
            Reply::Unsupported => "UNSUPPORTED".to_string(),
            // Messages can quote client input; keep them on one line.
            Reply::Error(message) => format!("ERROR {}", message.replace(['\r', '\n'], " ")),
            Reply::Snapshot(snapshot) => match serde_json::to_string(snapshot) {
                Ok(json) => json,
                Err(err) => format!("ERROR could not encode snapshot: {}", err),
            },
        }
    }

    /// Client side of `to_text`.
    pub fn parse(line: &[u8]) -> Result<Reply, crate::Error> {
        let line = line.trim_ascii();

        match line {
            b"OUT_OF_DATE" => return Ok(Reply::OutOfDate),
            b"UNSUPPORTED" => return Ok(Reply::Unsupported),
            _ => {}
        }

        if let Some(digits) = line.strip_prefix(b"OK ") {
            return atoi::<u64>(digits)
                .map(Reply::Ok)
                .ok_or_else(|| "protocol error; invalid revision in OK reply".into());
        }

        if let Some(message) = line.strip_prefix(b"ERROR ") {
            return Ok(Reply::Error(String::from_utf8_lossy(message).into_owned()));
        }

        if line.first() == Some(&b'{') {
            let snapshot: Snapshot = serde_json::from_slice(line)?;
            return Ok(Reply::Snapshot(snapshot));
        }

        Err(format!(
            "protocol error; unexpected reply `{}`",
            String::from_utf8_lossy(line)
        )
        .into())
    }
}

impl From<ProtocolError> for Reply {
    fn from(src: ProtocolError) -> Reply {
        match src {
            ProtocolError::RevisionMismatch { .. } => Reply::OutOfDate,
            ProtocolError::Unsupported => Reply::Unsupported,
            other => Reply::Error(other.to_string()),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}
