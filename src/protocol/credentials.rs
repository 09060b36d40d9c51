//! Credential Store
//!
//! Opaque per-session credential storage handed to the protocol client factory.
//! The orchestrator only seeds it (optional pre-supplied blob) and purges it on
//! teardown; the client library owns the content format.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config::{credentials_dir, OrchestratorConfig, StorageError};

/// File name of the credential object inside a session directory
const CREDENTIALS_FILE: &str = "creds.json";

/// Credential store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage capability for one session's credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Human-readable location, for logs
    fn location(&self) -> String;

    /// Replace the stored credential object
    async fn write(&self, credentials: &[u8]) -> Result<(), StoreError>;

    /// Read the stored credential object, if any
    async fn read(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Remove everything stored for the session
    async fn purge(&self) -> Result<(), StoreError>;
}

/// Hands out one credential store per session id
pub trait CredentialStoreProvider: Send + Sync {
    fn open(&self, session_id: &str) -> Arc<dyn CredentialStore>;
}

/// Decode a pre-supplied credential blob
///
/// The blob must be standard base64 wrapping a serialized JSON object.
/// Returns the decoded bytes to be stored verbatim.
pub fn decode_credential_blob(blob: &str) -> Result<Vec<u8>, String> {
    let trimmed: String = blob.chars().filter(|c| !c.is_whitespace()).collect();
    if trimmed.is_empty() {
        return Err("credential blob is empty".to_string());
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(trimmed.as_bytes())
        .map_err(|e| format!("not valid base64: {}", e))?;

    match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(serde_json::Value::Object(_)) => Ok(bytes),
        Ok(_) => Err("credential blob is not a JSON object".to_string()),
        Err(e) => Err(format!("credential blob is not valid JSON: {}", e)),
    }
}

// ============================================================================
// Filesystem store
// ============================================================================

/// `<root>/<session id>/creds.json`
pub struct FsCredentialStore {
    dir: PathBuf,
}

impl FsCredentialStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn file(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }
}

impl fmt::Debug for FsCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsCredentialStore")
            .field("dir", &self.dir)
            .finish()
    }
}

#[async_trait]
impl CredentialStore for FsCredentialStore {
    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    async fn write(&self, credentials: &[u8]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;

        // Write to temp file first, then rename (atomic write)
        let target = self.file();
        let temp_path = target.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(credentials).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &target).await?;
        Ok(())
    }

    async fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.file()).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn purge(&self) -> Result<(), StoreError> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

/// Provider rooted at a credentials directory
pub struct FsCredentialStoreProvider {
    root: PathBuf,
}

impl FsCredentialStoreProvider {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Root from `credentials_dir`, falling back to `~/.subbot/sessions`
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self, StorageError> {
        let root = match &config.credentials_dir {
            Some(dir) => dir.clone(),
            None => credentials_dir()?,
        };
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

impl CredentialStoreProvider for FsCredentialStoreProvider {
    fn open(&self, session_id: &str) -> Arc<dyn CredentialStore> {
        Arc::new(FsCredentialStore::new(self.root.join(session_id)))
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Volatile store, shared by all sessions of one provider
#[derive(Default)]
pub struct MemoryCredentialStore {
    session_id: String,
    slots: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    fn location(&self) -> String {
        format!("memory://{}", self.session_id)
    }

    async fn write(&self, credentials: &[u8]) -> Result<(), StoreError> {
        self.slots
            .lock()
            .insert(self.session_id.clone(), credentials.to_vec());
        Ok(())
    }

    async fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.slots.lock().get(&self.session_id).cloned())
    }

    async fn purge(&self) -> Result<(), StoreError> {
        self.slots.lock().remove(&self.session_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCredentialStoreProvider {
    slots: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryCredentialStoreProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored credentials of a session
    pub fn get(&self, session_id: &str) -> Option<Vec<u8>> {
        self.slots.lock().get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl CredentialStoreProvider for MemoryCredentialStoreProvider {
    fn open(&self, session_id: &str) -> Arc<dyn CredentialStore> {
        Arc::new(MemoryCredentialStore {
            session_id: session_id.to_string(),
            slots: self.slots.clone(),
        })
    }
}
