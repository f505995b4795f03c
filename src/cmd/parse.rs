use serde_json::{Map, Value};

use crate::db::{Batches, Collection};
use crate::error::ProtocolError;
use crate::frame::Frame;

/// Field access over one decoded request object.
#[derive(Debug)]
pub(crate) struct Parse {
    fields: Map<String, Value>,
}

impl Parse {
    pub(crate) fn new(frame: &Frame) -> Result<Parse, ProtocolError> {
        match serde_json::from_slice::<Value>(frame.payload())? {
            Value::Object(fields) => Ok(Parse { fields }),
            other => Err(ProtocolError::Decode(format!(
                "expected a JSON object, got `{}`",
                other
            ))),
        }
    }

    /// The `action` field, lowercased.
    pub(crate) fn action(&self) -> Result<String, ProtocolError> {
        match self.fields.get("action") {
            None | Some(Value::Null) => Err(ProtocolError::MissingAction),
            Some(Value::String(action)) => Ok(action.to_lowercase()),
            Some(other) => Err(ProtocolError::Decode(format!(
                "action must be a string, got `{}`",
                other
            ))),
        }
    }

    /// The submitted revision, if it is a non-negative integer. Anything
    /// else is treated as no revision at all, which never matches the store.
    pub(crate) fn revision(&self) -> Option<u64> {
        let number = match self.fields.get("revision")? {
            Value::Number(number) => number,
            _ => return None,
        };

        if let Some(revision) = number.as_u64() {
            return Some(revision);
        }

        // `1.0` is the same revision as `1`.
        number
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f < u64::MAX as f64)
            .map(|f| f as u64)
    }

    /// Collection fields as submitted. Their shape is checked only after the
    /// revision gate, so a stale request is never answered with a decode error.
    pub(crate) fn batches(&self) -> Batches {
        let mut batches = Batches::default();

        for collection in Collection::ALL {
            if let Some(value) = self.fields.get(collection.name()) {
                batches.set_raw(collection, value.clone());
            }
        }

        batches
    }

    /// Raw collection fields, uninterpreted.
    pub(crate) fn targets(&self) -> Map<String, Value> {
        Collection::ALL
            .iter()
            .filter_map(|collection| {
                self.fields
                    .get(collection.name())
                    .map(|value| (collection.name().to_string(), value.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(request: &str) -> Parse {
        Parse::new(&Frame::new(request.as_bytes().to_vec())).unwrap()
    }

    #[test]
    fn revision_accepts_integral_numbers_only() {
        assert_eq!(parse(r#"{"revision":3}"#).revision(), Some(3));
        assert_eq!(parse(r#"{"revision":3.0}"#).revision(), Some(3));
        assert_eq!(parse(r#"{"revision":3.5}"#).revision(), None);
        assert_eq!(parse(r#"{"revision":"3"}"#).revision(), None);
        assert_eq!(parse(r#"{}"#).revision(), None);
    }

    #[test]
    fn revision_out_of_range_does_not_saturate() {
        assert_eq!(parse(r#"{"revision":18446744073709551616}"#).revision(), None);
        assert_eq!(parse(r#"{"revision":18446744073709551616.0}"#).revision(), None);
        assert_eq!(
            parse(r#"{"revision":18446744073709551615}"#).revision(),
            Some(u64::MAX)
        );
    }

    #[test]
    fn batches_keep_fields_as_submitted() {
        let batches = parse(r#"{"projects":{"id":"p1"},"tasks":[],"notes":null}"#).batches();

        assert_eq!(batches.get(Collection::Projects), Some(&serde_json::json!({"id": "p1"})));
        assert_eq!(batches.get(Collection::Tasks), Some(&serde_json::json!([])));
        assert_eq!(batches.get(Collection::Notes), Some(&Value::Null));
        assert_eq!(batches.get(Collection::Alarms), None);
    }
}
