use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ProtocolError;

/// Shared handle to the store.
///
/// Cloning is cheap and every clone points at the same `DataStore`. All
/// request-level operations take the lock once and finish their whole job
/// before releasing it, so a request touching several collections is never
/// interleaved with another connection's request.
#[derive(Debug, Clone, Default)]
pub struct Db {
    store: Arc<Mutex<DataStore>>,
}

#[derive(Debug, Default)]
pub struct DataStore {
    revision: u64,
    projects: BTreeMap<ItemId, Item>,
    tasks: BTreeMap<ItemId, Item>,
    notes: BTreeMap<ItemId, Item>,
    alarms: BTreeMap<ItemId, Item>,
}

/// Full copy of the store, as returned by `transfer`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub revision: u64,
    pub projects: BTreeMap<ItemId, Item>,
    pub tasks: BTreeMap<ItemId, Item>,
    pub notes: BTreeMap<ItemId, Item>,
    pub alarms: BTreeMap<ItemId, Item>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Projects,
    Tasks,
    Notes,
    Alarms,
}

/// Key of an item inside its collection.
///
/// String identifiers key by their text, numbers by their integer text when
/// integral, anything else by its compact JSON text, so `2`, `2.0` and `"2"`
/// address the same item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

/// A project, task, note or alarm.
///
/// Only `id` is interpreted; the remaining fields are carried as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Value,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// The per-collection fields of one add request, as submitted. `None` means
/// the field was not present; the shape is only checked at commit time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batches {
    pub projects: Option<Value>,
    pub tasks: Option<Value>,
    pub notes: Option<Value>,
    pub alarms: Option<Value>,
}

impl Db {
    pub fn new() -> Db {
        Db::default()
    }

    /// A poisoned lock is still usable: `apply_batch` validates a whole batch
    /// before its first write, so a panic can never leave a half-applied batch.
    fn lock(&self) -> MutexGuard<'_, DataStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_revision(&self) -> u64 {
        self.lock().revision
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }

    pub fn get(&self, collection: Collection, id: &ItemId) -> Option<Item> {
        self.lock().get(collection, id).cloned()
    }

    /// Gate on `revision`, then commit every submitted collection in the
    /// order projects, tasks, notes, alarms.
    ///
    /// The revision is checked before the payload is looked at, so a stale
    /// request is `RevisionMismatch` whatever it carries. Returns the revision
    /// after the last commit. When a collection fails (not an array, or an
    /// item without `id`) the collections before it stay committed.
    pub fn add(&self, revision: Option<u64>, batches: &Batches) -> Result<u64, ProtocolError> {
        let mut store = self.lock();

        store.check_revision(revision)?;

        for collection in Collection::ALL {
            match batches.get(collection) {
                None | Some(Value::Null) => {}
                Some(Value::Array(batch)) => {
                    store.apply_batch(collection, batch)?;
                }
                Some(other) => {
                    return Err(ProtocolError::Decode(format!(
                        "{} must be an array, got `{}`",
                        collection, other
                    )))
                }
            }
        }

        Ok(store.revision)
    }

    /// Deleting is not implemented. A current revision is answered with
    /// `Unsupported`, a stale one with `RevisionMismatch`; nothing is removed.
    pub fn delete(&self, revision: Option<u64>) -> Result<(), ProtocolError> {
        let store = self.lock();

        store.check_revision(revision)?;

        Err(ProtocolError::Unsupported)
    }
}

impl DataStore {
    pub fn new() -> DataStore {
        DataStore::default()
    }

    pub fn current_revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            revision: self.revision,
            projects: self.projects.clone(),
            tasks: self.tasks.clone(),
            notes: self.notes.clone(),
            alarms: self.alarms.clone(),
        }
    }

    pub fn get(&self, collection: Collection, id: &ItemId) -> Option<&Item> {
        self.collection(collection).get(id)
    }

    pub fn check_revision(&self, submitted: Option<u64>) -> Result<(), ProtocolError> {
        if submitted == Some(self.revision) {
            return Ok(());
        }

        Err(ProtocolError::RevisionMismatch {
            submitted,
            current: self.revision,
        })
    }

    /// Validate and commit one collection's batch.
    ///
    /// An empty batch is skipped and returns `Ok(false)`. Otherwise every
    /// element must carry an identifier before anything is written; then the
    /// revision advances by one and the items are upserted in array order.
    pub fn apply_batch(
        &mut self,
        collection: Collection,
        batch: &[Value],
    ) -> Result<bool, ProtocolError> {
        if batch.is_empty() {
            return Ok(false);
        }

        let mut items = Vec::with_capacity(batch.len());

        for (index, value) in batch.iter().enumerate() {
            match Item::from_value(value) {
                Some(entry) => items.push(entry),
                None => {
                    return Err(ProtocolError::InvalidItem {
                        collection,
                        index,
                        batch: Value::Array(batch.to_vec()),
                    })
                }
            }
        }

        self.revision += 1;

        let target = self.collection_mut(collection);
        for (id, item) in items {
            target.insert(id, item);
        }

        debug!(%collection, count = batch.len(), revision = self.revision, "batch committed");

        Ok(true)
    }

    fn collection(&self, collection: Collection) -> &BTreeMap<ItemId, Item> {
        match collection {
            Collection::Projects => &self.projects,
            Collection::Tasks => &self.tasks,
            Collection::Notes => &self.notes,
            Collection::Alarms => &self.alarms,
        }
    }

    fn collection_mut(&mut self, collection: Collection) -> &mut BTreeMap<ItemId, Item> {
        match collection {
            Collection::Projects => &mut self.projects,
            Collection::Tasks => &mut self.tasks,
            Collection::Notes => &mut self.notes,
            Collection::Alarms => &mut self.alarms,
        }
    }
}

impl Snapshot {
    pub fn collection(&self, collection: Collection) -> &BTreeMap<ItemId, Item> {
        match collection {
            Collection::Projects => &self.projects,
            Collection::Tasks => &self.tasks,
            Collection::Notes => &self.notes,
            Collection::Alarms => &self.alarms,
        }
    }
}

impl Collection {
    /// Commit order of an add request.
    pub const ALL: [Collection; 4] = [
        Collection::Projects,
        Collection::Tasks,
        Collection::Notes,
        Collection::Alarms,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Projects => "projects",
            Collection::Tasks => "tasks",
            Collection::Notes => "notes",
            Collection::Alarms => "alarms",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ItemId {
    /// Property-key text of an identifier: strings as is, integral numbers
    /// without a fraction (`2.0` keys as `2`), anything else as compact JSON.
    pub fn from_value(value: &Value) -> ItemId {
        match value {
            Value::String(string) => ItemId(string.clone()),
            Value::Number(number) if number.is_f64() => {
                let f = number.as_f64().unwrap_or_default();
                if f == 0.0 {
                    ItemId("0".to_string())
                } else if f.fract() == 0.0 && f.abs() < 1e21 {
                    ItemId(format!("{:.0}", f))
                } else {
                    ItemId(number.to_string())
                }
            }
            other => ItemId(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ItemId {
    fn from(src: &str) -> ItemId {
        ItemId(src.to_string())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Item {
    /// Split a submitted element into its key and stored form. Elements that
    /// are not objects, or have no `id` field, yield `None`; `"id": null` is
    /// an identifier like any other.
    pub fn from_value(value: &Value) -> Option<(ItemId, Item)> {
        let object = value.as_object()?;
        let id = object.get("id")?;
        let key = ItemId::from_value(id);

        let fields = object
            .iter()
            .filter(|(name, _)| name.as_str() != "id")
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Some((
            key,
            Item {
                id: id.clone(),
                fields,
            },
        ))
    }
}

impl Batches {
    pub fn get(&self, collection: Collection) -> Option<&Value> {
        let batch = match collection {
            Collection::Projects => &self.projects,
            Collection::Tasks => &self.tasks,
            Collection::Notes => &self.notes,
            Collection::Alarms => &self.alarms,
        };

        batch.as_ref()
    }

    pub fn set(&mut self, collection: Collection, batch: Vec<Value>) {
        self.set_raw(collection, Value::Array(batch));
    }

    /// Store a field exactly as received, array or not.
    pub fn set_raw(&mut self, collection: Collection, value: Value) {
        let slot = match collection {
            Collection::Projects => &mut self.projects,
            Collection::Tasks => &mut self.tasks,
            Collection::Notes => &mut self.notes,
            Collection::Alarms => &mut self.alarms,
        };

        *slot = Some(value);
    }

    pub fn with(mut self, collection: Collection, batch: Vec<Value>) -> Batches {
        self.set(collection, batch);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(value: Value) -> Vec<Value> {
        match value {
            Value::Array(items) => items,
            other => panic!("not an array: {other}"),
        }
    }

    #[test]
    fn new_store_is_empty_at_revision_zero() {
        let db = Db::new();
        let snapshot = db.snapshot();

        assert_eq!(snapshot.revision, 0);
        assert!(snapshot.projects.is_empty());
        assert!(snapshot.tasks.is_empty());
        assert!(snapshot.notes.is_empty());
        assert!(snapshot.alarms.is_empty());
    }

    #[test]
    fn each_non_empty_collection_advances_revision() {
        let db = Db::new();
        let batches = Batches::default()
            .with(Collection::Projects, batch(json!([{"id": "p1"}, {"id": "p2"}])))
            .with(Collection::Notes, batch(json!([{"id": "n1", "text": "hi"}])))
            .with(Collection::Alarms, batch(json!([{"id": "a1"}])))
            .with(Collection::Tasks, vec![]);

        assert_eq!(db.add(Some(0), &batches), Ok(3));
        assert_eq!(db.current_revision(), 3);

        for (collection, id) in [
            (Collection::Projects, "p1"),
            (Collection::Projects, "p2"),
            (Collection::Notes, "n1"),
            (Collection::Alarms, "a1"),
        ] {
            assert!(db.get(collection, &ItemId::from(id)).is_some(), "{collection} {id}");
        }
    }

    #[test]
    fn add_without_collections_keeps_revision() {
        let db = Db::new();

        assert_eq!(db.add(Some(0), &Batches::default()), Ok(0));
        assert_eq!(db.current_revision(), 0);
    }

    #[test]
    fn stale_revision_is_rejected_without_mutation() {
        let db = Db::new();
        let batches = Batches::default().with(Collection::Projects, batch(json!([{"id": "p1"}])));

        assert_eq!(db.add(Some(0), &batches), Ok(1));

        let before = db.snapshot();
        let stale = Batches::default().with(Collection::Tasks, batch(json!([{"id": "t1"}])));

        for revision in [Some(0), Some(2), None] {
            assert_eq!(
                db.add(revision, &stale),
                Err(ProtocolError::RevisionMismatch {
                    submitted: revision,
                    current: 1
                })
            );
        }

        assert_eq!(db.snapshot(), before);
    }

    #[test]
    fn invalid_item_leaves_its_collection_untouched() {
        let mut store = DataStore::new();
        let submitted = json!([{"id": "p1", "name": "X"}, {"name": "no id"}]);

        let err = store
            .apply_batch(Collection::Projects, &batch(submitted.clone()))
            .unwrap_err();

        assert_eq!(
            err,
            ProtocolError::InvalidItem {
                collection: Collection::Projects,
                index: 1,
                batch: submitted,
            }
        );
        assert_eq!(store.current_revision(), 0);
        assert!(store.get(Collection::Projects, &ItemId::from("p1")).is_none());
    }

    #[test]
    fn earlier_collections_stay_committed_when_a_later_one_fails() {
        let db = Db::new();
        let batches = Batches::default()
            .with(Collection::Projects, batch(json!([{"id": "p1"}])))
            .with(Collection::Tasks, batch(json!([{"id": "t1"}])))
            .with(Collection::Notes, batch(json!([{"id": "n1"}, {"text": "x"}])))
            .with(Collection::Alarms, batch(json!([{"id": "a1"}])));

        let err = db.add(Some(0), &batches).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidItem {
                collection: Collection::Notes,
                index: 1,
                ..
            }
        ));

        let snapshot = db.snapshot();
        assert_eq!(snapshot.revision, 2);
        assert_eq!(snapshot.projects.len(), 1);
        assert_eq!(snapshot.tasks.len(), 1);
        assert!(snapshot.notes.is_empty());
        assert!(snapshot.alarms.is_empty());
    }

    #[test]
    fn non_object_elements_have_no_identifier() {
        let mut store = DataStore::new();

        for submitted in [json!([{"name": "x"}]), json!(["p1"]), json!([42])] {
            let err = store
                .apply_batch(Collection::Tasks, &batch(submitted))
                .unwrap_err();
            assert!(matches!(err, ProtocolError::InvalidItem { index: 0, .. }));
        }

        assert_eq!(store.current_revision(), 0);
    }

    #[test]
    fn null_id_is_an_identifier() {
        let mut store = DataStore::new();

        assert_eq!(
            store.apply_batch(Collection::Projects, &batch(json!([{"id": null, "n": 1}]))),
            Ok(true)
        );

        let item = store.get(Collection::Projects, &ItemId::from("null")).unwrap();
        assert_eq!(item.id, Value::Null);
        assert_eq!(item.fields["n"], json!(1));
    }

    #[test]
    fn integral_float_ids_key_like_integers() {
        assert_eq!(ItemId::from_value(&json!(2.0)), ItemId::from("2"));
        assert_eq!(ItemId::from_value(&json!(2)), ItemId::from("2"));
        assert_eq!(ItemId::from_value(&json!(-0.0)), ItemId::from("0"));
        assert_eq!(ItemId::from_value(&json!(2.5)), ItemId::from("2.5"));
        assert_eq!(ItemId::from_value(&json!(true)), ItemId::from("true"));
    }

    #[test]
    fn stale_add_is_rejected_before_payload_shape_is_checked() {
        let db = Db::new();
        let mut malformed = Batches::default();
        malformed.set_raw(Collection::Projects, json!({"id": "p2"}));

        assert!(matches!(
            db.add(Some(1), &malformed),
            Err(ProtocolError::RevisionMismatch { submitted: Some(1), current: 0 })
        ));
        assert_eq!(db.current_revision(), 0);
    }

    #[test]
    fn non_array_collection_fails_after_earlier_commits() {
        let db = Db::new();
        let mut batches = Batches::default().with(Collection::Projects, batch(json!([{"id": "p1"}])));
        batches.set_raw(Collection::Tasks, json!("x"));
        batches.set_raw(Collection::Notes, Value::Null);

        let err = db.add(Some(0), &batches).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Decode("tasks must be an array, got `\"x\"`".into())
        );

        let snapshot = db.snapshot();
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.projects.len(), 1);
    }

    #[test]
    fn readding_an_id_overwrites_in_place() {
        let db = Db::new();
        let first = Batches::default().with(Collection::Projects, batch(json!([{"id": "p1", "name": "X"}])));
        let second = Batches::default().with(Collection::Projects, batch(json!([{"id": "p1", "name": "Y"}])));

        assert_eq!(db.add(Some(0), &first), Ok(1));
        assert_eq!(db.add(Some(1), &second), Ok(2));

        let snapshot = db.snapshot();
        assert_eq!(snapshot.projects.len(), 1);
        assert_eq!(snapshot.projects[&ItemId::from("p1")].fields["name"], json!("Y"));
    }

    #[test]
    fn duplicate_ids_in_one_batch_keep_the_last() {
        let mut store = DataStore::new();
        let submitted = json!([{"id": "a", "n": 1}, {"id": "a", "n": 2}]);

        assert_eq!(store.apply_batch(Collection::Alarms, &batch(submitted)), Ok(true));
        assert_eq!(store.current_revision(), 1);

        let item = store.get(Collection::Alarms, &ItemId::from("a")).unwrap();
        assert_eq!(item.fields["n"], json!(2));
    }

    #[test]
    fn numeric_and_string_ids_share_a_key() {
        let mut store = DataStore::new();

        store
            .apply_batch(Collection::Tasks, &batch(json!([{"id": 2, "item": "x"}])))
            .unwrap();
        store
            .apply_batch(Collection::Tasks, &batch(json!([{"id": "2", "item": "y"}])))
            .unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.tasks[&ItemId::from("2")].id, json!("2"));
    }

    #[test]
    fn delete_never_removes() {
        let db = Db::new();
        let batches = Batches::default().with(Collection::Projects, batch(json!([{"id": "p1"}])));
        db.add(Some(0), &batches).unwrap();

        assert_eq!(db.delete(Some(1)), Err(ProtocolError::Unsupported));
        assert!(matches!(
            db.delete(Some(0)),
            Err(ProtocolError::RevisionMismatch { .. })
        ));
        assert_eq!(db.current_revision(), 1);
        assert!(db.get(Collection::Projects, &ItemId::from("p1")).is_some());
    }

    #[test]
    fn item_serializes_as_submitted() {
        let (_, item) = Item::from_value(&json!({"id": "p1", "name": "X"})).unwrap();

        assert_eq!(serde_json::to_value(&item).unwrap(), json!({"id": "p1", "name": "X"}));
    }
}
