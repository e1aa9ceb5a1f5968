//! File-backed local cache of client DID documents.
//!
//! Sign-in persists the presented document under
//! `<data_dir>/localdoc/<method-specific-id>` so later verification never
//! needs remote resolution. The server's own document is answered from
//! memory, and unknown key-embedding DIDs fall back to a document derived
//! from the key in the identifier.

use std::fs;
use std::path::{Path, PathBuf};

use crate::did::{Did, DidDocument, Resolver};

const LOCALDOC_DIR: &str = "localdoc";

#[derive(Debug)]
pub enum DocCacheError {
    Io(std::io::Error),
    Serialize(crate::did::DidError),
}

impl std::fmt::Display for DocCacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocCacheError::Io(e) => write!(f, "document cache io error: {e}"),
            DocCacheError::Serialize(e) => write!(f, "document cache serialization error: {e}"),
        }
    }
}

impl std::error::Error for DocCacheError {}

impl From<std::io::Error> for DocCacheError {
    fn from(e: std::io::Error) -> Self {
        DocCacheError::Io(e)
    }
}

pub struct DocCache {
    dir: PathBuf,
    own: Option<(Did, DidDocument)>,
}

impl DocCache {
    pub fn new(data_dir: &Path) -> Self {
        DocCache {
            dir: data_dir.join(LOCALDOC_DIR),
            own: None,
        }
    }

    /// Register the server's own document, answered without touching disk.
    pub fn set_own(&mut self, did: Did, doc: DidDocument) {
        self.own = Some((did, doc));
    }

    fn doc_path(&self, did: &Did) -> PathBuf {
        self.dir.join(did.method_specific_id())
    }

    pub fn save(&self, did: &Did, doc: &DidDocument) -> Result<(), DocCacheError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.doc_path(did);
        vlogd!("doccache: saving document for {did} to {}", path.display());
        let json = doc.to_json().map_err(DocCacheError::Serialize)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(&self, did: &Did) -> Option<DidDocument> {
        if let Some((own_did, own_doc)) = &self.own {
            if own_did == did {
                return Some(own_doc.clone());
            }
        }
        let path = self.doc_path(did);
        let json = fs::read_to_string(&path).ok()?;
        match DidDocument::from_json(&json) {
            Ok(doc) => {
                vlogd!("doccache: loaded document for {did} from {}", path.display());
                Some(doc)
            }
            Err(e) => {
                vlogw!("doccache: unreadable document at {}: {e}", path.display());
                None
            }
        }
    }
}

impl Resolver for DocCache {
    fn resolve(&self, did: &Did) -> Option<DidDocument> {
        self.load(did)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::did::Keypair;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn test_dir() -> PathBuf {
        let pid = std::process::id();
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("volary-doccache-{pid}-{ts}"))
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = test_dir();
        let cache = DocCache::new(&dir);
        let keypair = Keypair::generate();
        let did = keypair.did();
        let doc = DidDocument::new_signed(&keypair, u64::MAX);

        assert!(cache.load(&did).is_none());
        cache.save(&did, &doc).unwrap();
        assert_eq!(cache.load(&did), Some(doc));
    }

    #[test]
    fn own_document_served_from_memory() {
        let dir = test_dir();
        let mut cache = DocCache::new(&dir);
        let keypair = Keypair::generate();
        let did = keypair.did();
        let doc = DidDocument::new_signed(&keypair, u64::MAX);
        cache.set_own(did.clone(), doc.clone());

        // never written to disk, still resolvable
        assert_eq!(cache.load(&did), Some(doc));
    }
}
