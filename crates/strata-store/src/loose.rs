use std::collections::HashSet;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use strata_fs::file_utils::{self, RenameOptions, RetryPolicy};
use strata_types::{ObjectId, ObjectKind};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::object::{self, InsertResult, RawObject};
use crate::traits::ObjectDatabase;

/// Path of the alternates list, relative to an objects directory.
pub const ALTERNATES_FILE: &str = "info/alternates";

const TEMP_PREFIX: &str = "noz";

/// A git `objects/` directory holding zlib-compressed loose objects.
///
/// Each object lives at `objects/xx/<remaining 38 hex digits>`. Lookups
/// that miss here fall through to the alternate directories, in order.
#[derive(Debug)]
pub struct LooseObjectDirectory {
    objects: PathBuf,
    alternates: Vec<LooseObjectDirectory>,
    fsync: bool,
    retry: RetryPolicy,
}

impl LooseObjectDirectory {
    /// A directory without alternates.
    pub fn new(objects: impl Into<PathBuf>) -> Self {
        Self {
            objects: objects.into(),
            alternates: Vec::new(),
            fsync: false,
            retry: RetryPolicy::default(),
        }
    }

    /// Open `objects` together with `extra` alternates and every directory
    /// listed (transitively) in `info/alternates` files.
    pub fn open(objects: impl Into<PathBuf>, extra: &[PathBuf]) -> StoreResult<Self> {
        let mut seen = HashSet::new();
        Self::open_inner(objects.into(), extra, &mut seen)
    }

    fn open_inner(objects: PathBuf, extra: &[PathBuf], seen: &mut HashSet<PathBuf>) -> StoreResult<Self> {
        seen.insert(identity(&objects));

        let mut candidates: Vec<PathBuf> = extra.to_vec();
        candidates.extend(read_alternates(&objects)?);

        let mut alternates = Vec::new();
        for dir in candidates {
            if !seen.insert(identity(&dir)) {
                debug!(dir = %dir.display(), "alternate already visited");
                continue;
            }
            match fs::metadata(&dir) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => return Err(StoreError::BadAlternate { path: dir }),
                Err(_) => {
                    warn!(dir = %dir.display(), "alternate object directory missing");
                    continue;
                }
            }
            alternates.push(Self::open_inner(dir, &[], seen)?);
        }

        Ok(Self {
            objects,
            alternates,
            fsync: false,
            retry: RetryPolicy::default(),
        })
    }

    /// Flush each new object file to disk before it is moved into place.
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects
    }

    pub fn alternates(&self) -> &[LooseObjectDirectory] {
        &self.alternates
    }

    /// Where the loose file for `id` lives in this directory.
    pub fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.objects.join(&hex[..2]).join(&hex[2..])
    }

    /// Whether `id` is stored in this directory, ignoring alternates.
    pub fn has_loose(&self, id: &ObjectId) -> bool {
        self.object_path(id).is_file()
    }

    fn read_loose(&self, id: &ObjectId) -> StoreResult<Option<RawObject>> {
        let path = self.object_path(id);
        let compressed = match read_retrying_stale(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut raw = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut raw)
            .map_err(|e| StoreError::CorruptObject {
                id: *id,
                reason: format!("cannot inflate: {e}"),
            })?;
        let obj = object::decode(&raw).map_err(|reason| StoreError::CorruptObject { id: *id, reason })?;

        let computed = obj.id();
        if computed != *id {
            return Err(StoreError::HashMismatch { id: *id, computed });
        }
        Ok(Some(obj))
    }

    fn write_temp(&self, kind: ObjectKind, data: &[u8]) -> StoreResult<tempfile::TempPath> {
        let tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.objects)?;
        let mut encoder = ZlibEncoder::new(tmp.as_file(), Compression::default());
        encoder.write_all(&object::header(kind, data.len()))?;
        encoder.write_all(data)?;
        encoder.finish()?;
        if self.fsync {
            tmp.as_file().sync_all()?;
        }
        Ok(tmp.into_temp_path())
    }
}

impl ObjectDatabase for LooseObjectDirectory {
    fn has(&self, id: &ObjectId) -> StoreResult<bool> {
        if self.has_loose(id) {
            return Ok(true);
        }
        for alt in &self.alternates {
            if alt.has(id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn read(&self, id: &ObjectId) -> StoreResult<Option<RawObject>> {
        if let Some(obj) = self.read_loose(id)? {
            return Ok(Some(obj));
        }
        for alt in &self.alternates {
            if let Some(obj) = alt.read(id)? {
                return Ok(Some(obj));
            }
        }
        Ok(None)
    }

    fn insert(&self, kind: ObjectKind, data: &[u8]) -> StoreResult<(ObjectId, InsertResult)> {
        let id = ObjectId::hash_object(kind, data);
        if self.has(&id)? {
            debug!(%id, "object already present");
            return Ok((id, InsertResult::ExistsLoose));
        }

        let tmp = self.write_temp(kind, data)?;
        let dst = self.object_path(&id);
        if let Some(fan_out) = dst.parent() {
            file_utils::mkdir(fan_out, true)?;
        }

        let options = RenameOptions {
            atomic: true,
            retry: self.retry,
        };
        match file_utils::rename(&tmp, &dst, options) {
            Ok(()) => {
                debug!(%id, %kind, size = data.len(), "inserted loose object");
                Ok((id, InsertResult::Inserted))
            }
            Err(_) if dst.is_file() => Ok((id, InsertResult::ExistsLoose)),
            Err(e) => {
                warn!(%id, error = %e, "cannot move object into place");
                Ok((id, InsertResult::Failure))
            }
        }
    }
}

/// Canonical form of a directory, used to detect alternate cycles.
fn identity(dir: &Path) -> PathBuf {
    fs::canonicalize(dir).unwrap_or_else(|_| file_utils::normalize(&file_utils::absolute(dir)))
}

fn read_alternates(objects: &Path) -> StoreResult<Vec<PathBuf>> {
    let path = objects.join(ALTERNATES_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let p = Path::new(line);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                file_utils::normalize(&objects.join(p))
            }
        })
        .collect())
}

/// NFS may report a stale handle for a file replaced under us; a second
/// open sees the new file.
fn read_retrying_stale(path: &Path) -> io::Result<Vec<u8>> {
    match fs::read(path) {
        Err(e) if file_utils::is_stale_file_handle(&e) => {
            debug!(path = %path.display(), "stale file handle, retrying read");
            fs::read(path)
        }
        other => other,
    }
}
