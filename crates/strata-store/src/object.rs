use strata_types::{ObjectId, ObjectKind};

/// An object as stored: its kind and uncompressed content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawObject {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

impl RawObject {
    pub fn new(kind: ObjectKind, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    /// The id this object hashes to.
    pub fn id(&self) -> ObjectId {
        ObjectId::hash_object(self.kind, &self.data)
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Outcome of inserting an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertResult {
    /// The object was written by this call.
    Inserted,
    /// The object was already present as a loose object.
    ExistsLoose,
    /// The object could not be moved into place.
    Failure,
}

/// Canonical encoding: `"<kind> <len>\0"` followed by the content.
pub(crate) fn encode(kind: ObjectKind, data: &[u8]) -> Vec<u8> {
    let mut out = header(kind, data.len());
    out.extend_from_slice(data);
    out
}

pub(crate) fn header(kind: ObjectKind, len: usize) -> Vec<u8> {
    format!("{} {}\0", kind.as_str(), len).into_bytes()
}

/// Split an inflated loose object into kind and content.
pub(crate) fn decode(raw: &[u8]) -> Result<RawObject, String> {
    let nul = raw
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| "missing header terminator".to_string())?;
    let header = std::str::from_utf8(&raw[..nul]).map_err(|_| "header is not UTF-8".to_string())?;
    let (kind, len) = header
        .split_once(' ')
        .ok_or_else(|| format!("malformed header {header:?}"))?;
    let kind: ObjectKind = kind.parse().map_err(|_| format!("unknown kind {kind:?}"))?;
    let len: usize = len.parse().map_err(|_| format!("bad length {len:?}"))?;
    let data = &raw[nul + 1..];
    if data.len() != len {
        return Err(format!("header says {len} bytes, found {}", data.len()));
    }
    Ok(RawObject::new(kind, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_writes_git_header() {
        assert_eq!(encode(ObjectKind::Blob, b"hello\n"), b"blob 6\0hello\n".to_vec());
        assert_eq!(header(ObjectKind::Tree, 0), b"tree 0\0".to_vec());
    }

    #[test]
    fn decode_checks_length() {
        let obj = decode(b"commit 3\0abc").unwrap();
        assert_eq!(obj.kind, ObjectKind::Commit);
        assert_eq!(obj.data, b"abc");
        assert!(decode(b"commit 4\0abc").is_err());
    }

    #[test]
    fn decode_rejects_bad_headers() {
        assert!(decode(b"blob 3abc").is_err());
        assert!(decode(b"widget 3\0abc").is_err());
        assert!(decode(b"blob x\0abc").is_err());
        assert!(decode(b"blob\0").is_err());
    }

    #[test]
    fn id_matches_git() {
        let obj = RawObject::new(ObjectKind::Blob, b"hello\n".to_vec());
        assert_eq!(obj.id().to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
        assert_eq!(obj.size(), 6);
    }
}
