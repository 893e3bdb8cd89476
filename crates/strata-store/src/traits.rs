use strata_fsck::ObjectChecker;
use strata_types::{ObjectId, ObjectKind};

use crate::error::{StoreError, StoreResult};
use crate::object::{InsertResult, RawObject};

/// Content-addressed object database.
///
/// All implementations must satisfy these invariants:
/// - Objects are immutable once written. The same kind and data always
///   produce the same id.
/// - An object becomes visible only once it is completely written.
/// - Concurrent reads and inserts are safe, including inserts of the same
///   object from several writers.
pub trait ObjectDatabase: Send + Sync {
    /// Check whether an object exists.
    fn has(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Read an object by id.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    /// Returns `Err` on I/O failure or data corruption.
    fn read(&self, id: &ObjectId) -> StoreResult<Option<RawObject>>;

    /// Store an object and report its id and what happened.
    fn insert(&self, kind: ObjectKind, data: &[u8]) -> StoreResult<(ObjectId, InsertResult)>;

    /// Validate the object with `checker` (when given), then store it.
    ///
    /// A rejected object is never written.
    fn insert_checked(
        &self,
        checker: Option<&ObjectChecker>,
        kind: ObjectKind,
        data: &[u8],
    ) -> StoreResult<(ObjectId, InsertResult)> {
        if let Some(checker) = checker {
            let id = ObjectId::hash_object(kind, data);
            checker.check(Some(&id), kind, data)?;
        }
        self.insert(kind, data)
    }

    /// Read an object that must exist.
    fn read_required(&self, id: &ObjectId) -> StoreResult<RawObject> {
        self.read(id)?.ok_or(StoreError::NotFound(*id))
    }
}
