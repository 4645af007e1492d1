//! Content-addressed artifact storage.
//!
//! Every artifact lives at `artifact://{app}/{user}/{session}/{filename}?version={N}`.
//! Saving a new version never overwrites an old one — versions are
//! append-only, letting a client hold a stable reference to bytes it has
//! already seen even while newer versions are written. A metadata sidecar is
//! stored alongside each version's bytes under the filename suffixed
//! `.metadata`, following the same one-file-per-record layout as
//! [`crate::server::file_task_store`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{A2AError, A2AResult};

/// A parsed `artifact://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactUri {
    pub app: String,
    pub user: String,
    pub session: String,
    pub filename: String,
    pub version: u32,
}

impl ArtifactUri {
    pub fn new(
        app: impl Into<String>,
        user: impl Into<String>,
        session: impl Into<String>,
        filename: impl Into<String>,
        version: u32,
    ) -> Self {
        Self {
            app: app.into(),
            user: user.into(),
            session: session.into(),
            filename: filename.into(),
            version,
        }
    }

    /// Parses `artifact://{app}/{user}/{session}/{filename}?version={N}`.
    pub fn parse(uri: &str) -> A2AResult<Self> {
        let rest = uri
            .strip_prefix("artifact://")
            .ok_or_else(|| A2AError::invalid_params(format!("not an artifact URI: {uri}")))?;

        let (path_part, query_part) = match rest.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (rest, None),
        };

        let segments: Vec<&str> = path_part.split('/').collect();
        let [app, user, session, filename] = segments.as_slice() else {
            return Err(A2AError::invalid_params(format!(
                "malformed artifact URI path: {path_part}"
            )));
        };

        let version = query_part
            .and_then(|q| q.strip_prefix("version="))
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| {
                A2AError::invalid_params(format!("artifact URI missing ?version=N: {uri}"))
            })?;

        Ok(Self {
            app: app.to_string(),
            user: user.to_string(),
            session: session.to_string(),
            filename: filename.to_string(),
            version,
        })
    }
}

impl std::fmt::Display for ArtifactUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "artifact://{}/{}/{}/{}?version={}",
            self.app, self.user, self.session, self.filename, self.version
        )
    }
}

/// Metadata recorded alongside a saved artifact version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub description: Option<String>,
    pub mime_type: Option<String>,
    /// Set when this artifact's bytes were lifted out of an inline FilePart
    /// by the proxy; names the artifact it was rewritten from, if any.
    pub proxied_from_artifact_id: Option<String>,
    /// Set true when a share was created while this artifact was part of
    /// the session, letting cleanup reason about exposure.
    pub shared_publicly: bool,
    #[serde(flatten)]
    pub extra: Value,
}

/// A listing entry — metadata without the bytes.
#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    pub uri: ArtifactUri,
    pub size_bytes: usize,
    pub metadata: ArtifactMetadata,
}

/// Persistence seam for artifact bytes + metadata.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Saves `bytes` as the next version of `(app, user, session, filename)`
    /// and returns the resulting URI.
    async fn save(
        &self,
        app: &str,
        user: &str,
        session: &str,
        filename: &str,
        bytes: Vec<u8>,
        metadata: ArtifactMetadata,
    ) -> A2AResult<ArtifactUri>;

    async fn load(&self, uri: &ArtifactUri) -> A2AResult<Vec<u8>>;

    async fn load_metadata(&self, uri: &ArtifactUri) -> A2AResult<ArtifactMetadata>;

    /// Lists the latest version of every filename under `(app, user, session)`.
    async fn list(&self, app: &str, user: &str, session: &str) -> A2AResult<Vec<ArtifactInfo>>;

    /// Deletes a specific version, or every version of `filename` if `version`
    /// is `None`.
    async fn delete(
        &self,
        app: &str,
        user: &str,
        session: &str,
        filename: &str,
        version: Option<u32>,
    ) -> A2AResult<()>;

    async fn latest_version(
        &self,
        app: &str,
        user: &str,
        session: &str,
        filename: &str,
    ) -> A2AResult<Option<u32>>;

    /// Marks every version of every artifact under `(app, user, session)` as
    /// shared publicly — called when a share link is created for that
    /// session, so cleanup can reason about what has ever been exposed.
    async fn set_shared_publicly(&self, app: &str, user: &str, session: &str) -> A2AResult<()>;
}

fn key(app: &str, user: &str, session: &str, filename: &str) -> String {
    format!("{app}\0{user}\0{session}\0{filename}")
}

#[derive(Default)]
struct StoredVersions {
    versions: HashMap<u32, (Vec<u8>, ArtifactMetadata)>,
}

/// Dependency-free [`ArtifactStore`] backed by an in-process map. Used by
/// tests and by deployments without a shared filesystem.
#[derive(Default)]
pub struct InMemoryArtifactStore {
    state: RwLock<HashMap<String, StoredVersions>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn save(
        &self,
        app: &str,
        user: &str,
        session: &str,
        filename: &str,
        bytes: Vec<u8>,
        metadata: ArtifactMetadata,
    ) -> A2AResult<ArtifactUri> {
        let k = key(app, user, session, filename);
        let mut state = self.state.write().await;
        let entry = state.entry(k).or_default();
        let version = entry.versions.keys().max().copied().unwrap_or(0) + 1;
        entry.versions.insert(version, (bytes, metadata));
        debug!(app, user, session, filename, version, "artifact saved");
        Ok(ArtifactUri::new(app, user, session, filename, version))
    }

    async fn load(&self, uri: &ArtifactUri) -> A2AResult<Vec<u8>> {
        let k = key(&uri.app, &uri.user, &uri.session, &uri.filename);
        let state = self.state.read().await;
        state
            .get(&k)
            .and_then(|v| v.versions.get(&uri.version))
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| A2AError::not_found(format!("artifact {uri}")))
    }

    async fn load_metadata(&self, uri: &ArtifactUri) -> A2AResult<ArtifactMetadata> {
        let k = key(&uri.app, &uri.user, &uri.session, &uri.filename);
        let state = self.state.read().await;
        state
            .get(&k)
            .and_then(|v| v.versions.get(&uri.version))
            .map(|(_, meta)| meta.clone())
            .ok_or_else(|| A2AError::not_found(format!("artifact {uri}")))
    }

    async fn list(&self, app: &str, user: &str, session: &str) -> A2AResult<Vec<ArtifactInfo>> {
        let prefix = format!("{app}\0{user}\0{session}\0");
        let state = self.state.read().await;
        let mut out = Vec::new();
        for (k, versions) in state.iter() {
            if let Some(filename) = k.strip_prefix(&prefix) {
                if let Some((&version, (bytes, metadata))) =
                    versions.versions.iter().max_by_key(|(v, _)| **v)
                {
                    out.push(ArtifactInfo {
                        uri: ArtifactUri::new(app, user, session, filename, version),
                        size_bytes: bytes.len(),
                        metadata: metadata.clone(),
                    });
                }
            }
        }
        out.sort_by(|a, b| a.uri.filename.cmp(&b.uri.filename));
        Ok(out)
    }

    async fn delete(
        &self,
        app: &str,
        user: &str,
        session: &str,
        filename: &str,
        version: Option<u32>,
    ) -> A2AResult<()> {
        let k = key(app, user, session, filename);
        let mut state = self.state.write().await;
        match state.get_mut(&k) {
            Some(entry) => {
                match version {
                    Some(v) => {
                        entry.versions.remove(&v);
                    }
                    None => {
                        entry.versions.clear();
                    }
                }
                if entry.versions.is_empty() {
                    state.remove(&k);
                }
                Ok(())
            }
            None => Err(A2AError::not_found(format!(
                "artifact {app}/{user}/{session}/{filename}"
            ))),
        }
    }

    async fn latest_version(
        &self,
        app: &str,
        user: &str,
        session: &str,
        filename: &str,
    ) -> A2AResult<Option<u32>> {
        let k = key(app, user, session, filename);
        let state = self.state.read().await;
        Ok(state.get(&k).and_then(|v| v.versions.keys().max().copied()))
    }

    async fn set_shared_publicly(&self, app: &str, user: &str, session: &str) -> A2AResult<()> {
        let prefix = format!("{app}\0{user}\0{session}\0");
        let mut state = self.state.write().await;
        for (k, versions) in state.iter_mut() {
            if k.starts_with(&prefix) {
                for (_, metadata) in versions.versions.values_mut() {
                    metadata.shared_publicly = true;
                }
            }
        }
        Ok(())
    }
}

/// Disk-backed [`ArtifactStore`]. Bytes live at
/// `{root}/{app}/{user}/{session}/{filename}.v{N}`; metadata sidecars at the
/// same path with a `.metadata` suffix.
pub struct FileArtifactStore {
    root: PathBuf,
    // Guards concurrent save()s racing on the same (app,user,session,filename)
    // version counter.
    lock: Arc<RwLock<()>>,
}

impl FileArtifactStore {
    pub async fn new(root: PathBuf) -> A2AResult<Self> {
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            lock: Arc::new(RwLock::new(())),
        })
    }

    fn dir(&self, app: &str, user: &str, session: &str) -> PathBuf {
        self.root.join(app).join(user).join(session)
    }

    fn bytes_path(&self, uri: &ArtifactUri) -> PathBuf {
        self.dir(&uri.app, &uri.user, &uri.session)
            .join(format!("{}.v{}", uri.filename, uri.version))
    }

    fn metadata_path(&self, uri: &ArtifactUri) -> PathBuf {
        self.dir(&uri.app, &uri.user, &uri.session)
            .join(format!("{}.v{}.metadata", uri.filename, uri.version))
    }

    async fn existing_versions(&self, app: &str, user: &str, session: &str, filename: &str) -> Vec<u32> {
        let dir = self.dir(app, user, session);
        let Ok(mut entries) = fs::read_dir(&dir).await else {
            return Vec::new();
        };
        let prefix = format!("{filename}.v");
        let mut versions = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(suffix) = name.strip_prefix(&prefix) {
                if suffix.ends_with(".metadata") {
                    continue;
                }
                if let Ok(v) = suffix.parse::<u32>() {
                    versions.push(v);
                }
            }
        }
        versions
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn save(
        &self,
        app: &str,
        user: &str,
        session: &str,
        filename: &str,
        bytes: Vec<u8>,
        metadata: ArtifactMetadata,
    ) -> A2AResult<ArtifactUri> {
        let _guard = self.lock.write().await;
        let dir = self.dir(app, user, session);
        fs::create_dir_all(&dir).await?;

        let existing = self.existing_versions(app, user, session, filename).await;
        let version = existing.into_iter().max().unwrap_or(0) + 1;
        let uri = ArtifactUri::new(app, user, session, filename, version);

        fs::write(self.bytes_path(&uri), &bytes).await?;
        let metadata_json = serde_json::to_vec_pretty(&metadata)?;
        fs::write(self.metadata_path(&uri), metadata_json).await?;

        debug!(app, user, session, filename, version, "artifact saved to disk");
        Ok(uri)
    }

    async fn load(&self, uri: &ArtifactUri) -> A2AResult<Vec<u8>> {
        fs::read(self.bytes_path(uri)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                A2AError::not_found(format!("artifact {uri}"))
            } else {
                A2AError::from(e)
            }
        })
    }

    async fn load_metadata(&self, uri: &ArtifactUri) -> A2AResult<ArtifactMetadata> {
        let raw = fs::read(self.metadata_path(uri)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                A2AError::not_found(format!("artifact {uri}"))
            } else {
                A2AError::from(e)
            }
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn list(&self, app: &str, user: &str, session: &str) -> A2AResult<Vec<ArtifactInfo>> {
        let dir = self.dir(app, user, session);
        let Ok(mut entries) = fs::read_dir(&dir).await else {
            return Ok(Vec::new());
        };

        let mut latest: HashMap<String, u32> = HashMap::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".metadata") {
                continue;
            }
            if let Some((filename, version_str)) = name.rsplit_once(".v") {
                if let Ok(version) = version_str.parse::<u32>() {
                    let slot = latest.entry(filename.to_string()).or_insert(0);
                    if version > *slot {
                        *slot = version;
                    }
                }
            }
        }

        let mut out = Vec::new();
        for (filename, version) in latest {
            let uri = ArtifactUri::new(app, user, session, &filename, version);
            let size_bytes = fs::metadata(self.bytes_path(&uri))
                .await
                .map(|m| m.len() as usize)
                .unwrap_or(0);
            let metadata = self.load_metadata(&uri).await.unwrap_or_else(|e| {
                warn!(filename, error = %e, "artifact metadata missing or corrupt");
                ArtifactMetadata::default()
            });
            out.push(ArtifactInfo {
                uri,
                size_bytes,
                metadata,
            });
        }
        out.sort_by(|a, b| a.uri.filename.cmp(&b.uri.filename));
        Ok(out)
    }

    async fn delete(
        &self,
        app: &str,
        user: &str,
        session: &str,
        filename: &str,
        version: Option<u32>,
    ) -> A2AResult<()> {
        let versions = match version {
            Some(v) => vec![v],
            None => self.existing_versions(app, user, session, filename).await,
        };
        if versions.is_empty() {
            return Err(A2AError::not_found(format!(
                "artifact {app}/{user}/{session}/{filename}"
            )));
        }
        for v in versions {
            let uri = ArtifactUri::new(app, user, session, filename, v);
            let _ = fs::remove_file(self.bytes_path(&uri)).await;
            let _ = fs::remove_file(self.metadata_path(&uri)).await;
        }
        Ok(())
    }

    async fn latest_version(
        &self,
        app: &str,
        user: &str,
        session: &str,
        filename: &str,
    ) -> A2AResult<Option<u32>> {
        Ok(self
            .existing_versions(app, user, session, filename)
            .await
            .into_iter()
            .max())
    }

    async fn set_shared_publicly(&self, app: &str, user: &str, session: &str) -> A2AResult<()> {
        let dir = self.dir(app, user, session);
        let Ok(mut entries) = fs::read_dir(&dir).await else {
            return Ok(());
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if !name.to_string_lossy().ends_with(".metadata") {
                continue;
            }
            let path = entry.path();
            let raw = fs::read(&path).await?;
            let mut metadata: ArtifactMetadata = serde_json::from_slice(&raw)?;
            metadata.shared_publicly = true;
            fs::write(&path, serde_json::to_vec_pretty(&metadata)?).await?;
        }
        Ok(())
    }
}
