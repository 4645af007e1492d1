//! Share-link subsystem: public/authenticated/domain-restricted read-only
//! views of a session, plus anonymized identifiers in the shared view.
//!
//! A self-contained piece of the gateway's REST surface, sitting alongside
//! task and artifact CRUD.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::artifact_store::ArtifactStore;
use crate::error::{A2AError, A2AResult};

const NANOID_ALPHABET: &[u8] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const SHARE_ID_LEN: usize = 21;
const MAX_DOMAIN_LABEL_LEN: usize = 63;
const MAX_DOMAIN_LEN: usize = 253;

/// Generates a URL-safe share id with the same alphabet and length (126
/// bits of entropy) as a typical nanoid-based id. Draws randomness from
/// two v4 UUIDs (32 bytes) rather than pulling in a dedicated RNG crate,
/// since `uuid`'s `v4` feature is already in the dependency tree.
pub fn generate_share_id() -> String {
    let mut bytes = [0u8; 32];
    bytes[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    bytes[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    bytes[..SHARE_ID_LEN]
        .iter()
        .map(|b| NANOID_ALPHABET[*b as usize % NANOID_ALPHABET.len()] as char)
        .collect()
}

/// Validates a bare domain string (no `@`, no scheme) against RFC 1035
/// label rules.
pub fn validate_domain(domain: &str) -> bool {
    if domain.is_empty() || !domain.contains('.') {
        return false;
    }
    if domain.starts_with('@') || domain.starts_with('.') || domain.ends_with('.') {
        return false;
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    labels.iter().all(|label| is_valid_label(label))
}

fn is_valid_label(label: &str) -> bool {
    if label.is_empty() || label.len() > MAX_DOMAIN_LABEL_LEN {
        return false;
    }
    let bytes = label.as_bytes();
    let first_ok = bytes[0].is_ascii_alphanumeric();
    let last_ok = bytes[bytes.len() - 1].is_ascii_alphanumeric();
    let body_ok = bytes
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b'-');
    first_ok && last_ok && body_ok
}

/// Extracts and lowercases the domain portion of an email address,
/// validating it along the way. Returns `None` for anything malformed.
pub fn extract_email_domain(email: &str) -> Option<String> {
    let (_, domain) = email.split_once('@')?;
    let domain = domain.to_lowercase();
    let domain = domain.trim().to_string();
    validate_domain(&domain).then_some(domain)
}

/// Normalizes and validates a list of allowed domains: case-folds, trims
/// whitespace, rejects duplicates and rejects more than 10 entries (one
/// share's configured access list).
pub fn validate_domains_list(domains: &[String]) -> A2AResult<Vec<String>> {
    if domains.is_empty() {
        return Ok(Vec::new());
    }
    if domains.len() > 10 {
        return Err(A2AError::invalid_request("maximum 10 domains allowed per share link"));
    }

    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(domains.len());
    for domain in domains {
        let lower = domain.to_lowercase();
        let lower = lower.trim().to_string();
        if !validate_domain(&lower) {
            return Err(A2AError::invalid_request(format!(
                "invalid domain format: {domain}"
            )));
        }
        if !seen.insert(lower.clone()) {
            return Err(A2AError::invalid_request(format!("duplicate domain: {domain}")));
        }
        normalized.push(lower);
    }
    Ok(normalized)
}

/// Deterministic, stable anonymization of an identifier for a shared view —
/// the same id always anonymizes to the same value so repeated views of one
/// shared session stay internally consistent without revealing the real id.
pub fn anonymize_id(original_id: &str, prefix: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(original_id.as_bytes());
    let digest = hasher.finalize();
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    format!("{prefix}_{}", &hex[..16])
}

/// Builds the externally visible share URL, using the hash-router format
/// a typical hash-router frontend expects.
pub fn build_share_url(base_url: &str, share_id: &str) -> String {
    format!("{}/#/share/{}", base_url.trim_end_matches('/'), share_id)
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Which of the three access modes a share link grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    Public,
    Authenticated,
    DomainRestricted,
}

/// Why an access check succeeded or failed — surfaced back to callers so a
/// gateway can return a precise 401/403.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    AllowPublic,
    AllowAuthenticated,
    AllowDomainMatch,
    RejectAuthenticationRequired,
    RejectInvalidEmail,
    RejectDomainMismatch,
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        matches!(
            self,
            AccessDecision::AllowPublic
                | AccessDecision::AllowAuthenticated
                | AccessDecision::AllowDomainMatch
        )
    }
}

/// A created share link: owner, target session, and its access policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareLink {
    pub share_id: String,
    pub owner_user_id: String,
    pub session_id: String,
    pub title: Option<String>,
    pub require_authentication: bool,
    pub allowed_domains: Vec<String>,
    pub created_at_epoch: u64,
    pub deleted: bool,
}

impl ShareLink {
    pub fn access_mode(&self) -> AccessMode {
        if !self.require_authentication {
            AccessMode::Public
        } else if self.allowed_domains.is_empty() {
            AccessMode::Authenticated
        } else {
            AccessMode::DomainRestricted
        }
    }

    /// Decides whether a (possibly anonymous) caller may view this share.
    pub fn decide_access(&self, user_id: Option<&str>, user_email: Option<&str>) -> AccessDecision {
        if !self.require_authentication {
            return AccessDecision::AllowPublic;
        }
        if user_id.is_none() {
            return AccessDecision::RejectAuthenticationRequired;
        }
        if self.allowed_domains.is_empty() {
            return AccessDecision::AllowAuthenticated;
        }

        let Some(email) = user_email else {
            return AccessDecision::RejectInvalidEmail;
        };
        let Some(domain) = extract_email_domain(email) else {
            return AccessDecision::RejectInvalidEmail;
        };
        if self.allowed_domains.iter().any(|d| d == &domain) {
            AccessDecision::AllowDomainMatch
        } else {
            AccessDecision::RejectDomainMismatch
        }
    }

    pub fn can_be_modified_by(&self, user_id: &str) -> bool {
        self.owner_user_id == user_id && !self.deleted
    }
}

/// Request to create a new share link.
#[derive(Debug, Clone)]
pub struct CreateShareLinkRequest {
    pub owner_user_id: String,
    pub session_id: String,
    /// App name under which the session's artifacts are stored — needed to
    /// look them up in the artifact store at share-creation time.
    pub app_name: String,
    pub title: Option<String>,
    pub require_authentication: bool,
    pub allowed_domains: Vec<String>,
}

/// Tracks one artifact that was exposed when a share link was created, so
/// cleanup can reason about what has ever been made public for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedArtifact {
    pub share_id: String,
    pub artifact_uri: String,
    pub artifact_version: u32,
    pub is_public: bool,
}

/// An anonymized, read-only view of a shared session — user/session
/// identifiers are hashed, message content is preserved verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedSessionView {
    pub share_id: String,
    pub title: String,
    pub created_at_epoch: u64,
    pub access_mode: AccessMode,
    pub anonymized_session_id: String,
    pub anonymized_user_id: String,
}

/// Persistence seam for share links. The in-memory implementation is good
/// enough for tests and single-process deployments; a production deployment
/// backs this with the same database the event buffer and task store use.
#[async_trait]
pub trait ShareLinkStore: Send + Sync {
    async fn insert(&self, link: ShareLink) -> A2AResult<()>;
    async fn get(&self, share_id: &str) -> A2AResult<Option<ShareLink>>;
    async fn list_for_user(&self, owner_user_id: &str) -> A2AResult<Vec<ShareLink>>;
    async fn soft_delete(&self, share_id: &str, owner_user_id: &str) -> A2AResult<bool>;

    /// Finds a non-deleted share that already covers `session_id`, if any —
    /// share creation is idempotent per session.
    async fn find_active_for_session(&self, session_id: &str) -> A2AResult<Option<ShareLink>>;

    async fn insert_shared_artifacts(&self, artifacts: Vec<SharedArtifact>) -> A2AResult<()>;

    async fn shared_artifacts_for_share(&self, share_id: &str) -> A2AResult<Vec<SharedArtifact>>;
}

#[derive(Default)]
pub struct InMemoryShareLinkStore {
    links: RwLock<HashMap<String, ShareLink>>,
    shared_artifacts: RwLock<Vec<SharedArtifact>>,
}

impl InMemoryShareLinkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShareLinkStore for InMemoryShareLinkStore {
    async fn insert(&self, link: ShareLink) -> A2AResult<()> {
        let mut links = self.links.write().await;
        links.insert(link.share_id.clone(), link);
        Ok(())
    }

    async fn get(&self, share_id: &str) -> A2AResult<Option<ShareLink>> {
        Ok(self.links.read().await.get(share_id).cloned())
    }

    async fn list_for_user(&self, owner_user_id: &str) -> A2AResult<Vec<ShareLink>> {
        Ok(self
            .links
            .read()
            .await
            .values()
            .filter(|l| l.owner_user_id == owner_user_id && !l.deleted)
            .cloned()
            .collect())
    }

    async fn soft_delete(&self, share_id: &str, owner_user_id: &str) -> A2AResult<bool> {
        let mut links = self.links.write().await;
        match links.get_mut(share_id) {
            Some(link) if link.can_be_modified_by(owner_user_id) => {
                link.deleted = true;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn find_active_for_session(&self, session_id: &str) -> A2AResult<Option<ShareLink>> {
        Ok(self
            .links
            .read()
            .await
            .values()
            .find(|l| l.session_id == session_id && !l.deleted)
            .cloned())
    }

    async fn insert_shared_artifacts(&self, artifacts: Vec<SharedArtifact>) -> A2AResult<()> {
        self.shared_artifacts.write().await.extend(artifacts);
        Ok(())
    }

    async fn shared_artifacts_for_share(&self, share_id: &str) -> A2AResult<Vec<SharedArtifact>> {
        Ok(self
            .shared_artifacts
            .read()
            .await
            .iter()
            .filter(|a| a.share_id == share_id)
            .cloned()
            .collect())
    }
}

/// Orchestrates share-link creation, lookup, and access-controlled viewing
/// on top of a [`ShareLinkStore`].
pub struct ShareLinkService<S: ShareLinkStore> {
    store: S,
    artifact_store: Arc<dyn ArtifactStore>,
    max_domains: usize,
}

impl<S: ShareLinkStore> ShareLinkService<S> {
    pub fn new(store: S, artifact_store: Arc<dyn ArtifactStore>, max_domains: usize) -> Self {
        Self {
            store,
            artifact_store,
            max_domains,
        }
    }

    /// Creates a share link for `request.session_id`, or returns the
    /// existing non-deleted share for that session if one already exists —
    /// share creation is idempotent per session. On first creation, every
    /// artifact currently in the session is marked shared publicly and
    /// recorded as a [`SharedArtifact`].
    pub async fn create(&self, request: CreateShareLinkRequest) -> A2AResult<ShareLink> {
        if let Some(existing) = self.store.find_active_for_session(&request.session_id).await? {
            return Ok(existing);
        }

        if !request.require_authentication && !request.allowed_domains.is_empty() {
            return Err(A2AError::invalid_request(
                "allowed_domains requires require_authentication to be enabled",
            ));
        }
        if request.allowed_domains.len() > self.max_domains {
            return Err(A2AError::invalid_request(format!(
                "maximum {} domains allowed per share link",
                self.max_domains
            )));
        }
        let allowed_domains = validate_domains_list(&request.allowed_domains)?;

        let link = ShareLink {
            share_id: generate_share_id(),
            owner_user_id: request.owner_user_id.clone(),
            session_id: request.session_id.clone(),
            title: request.title,
            require_authentication: request.require_authentication,
            allowed_domains,
            created_at_epoch: now_epoch(),
            deleted: false,
        };
        self.store.insert(link.clone()).await?;

        self.artifact_store
            .set_shared_publicly(&request.app_name, &request.owner_user_id, &request.session_id)
            .await?;
        let artifacts = self
            .artifact_store
            .list(&request.app_name, &request.owner_user_id, &request.session_id)
            .await?;
        if !artifacts.is_empty() {
            let shared = artifacts
                .into_iter()
                .map(|info| SharedArtifact {
                    share_id: link.share_id.clone(),
                    artifact_uri: info.uri.to_string(),
                    artifact_version: info.uri.version,
                    is_public: !link.require_authentication,
                })
                .collect();
            self.store.insert_shared_artifacts(shared).await?;
        }

        Ok(link)
    }

    pub async fn get(&self, share_id: &str) -> A2AResult<ShareLink> {
        self.store
            .get(share_id)
            .await?
            .filter(|link| !link.deleted)
            .ok_or_else(|| A2AError::not_found(format!("share link {share_id} not found")))
    }

    pub async fn list_for_user(&self, owner_user_id: &str) -> A2AResult<Vec<ShareLink>> {
        self.store.list_for_user(owner_user_id).await
    }

    pub async fn delete(&self, share_id: &str, owner_user_id: &str) -> A2AResult<()> {
        let link = self.get(share_id).await?;
        if !link.can_be_modified_by(owner_user_id) {
            return Err(A2AError::Authorization(
                "not authorized to delete this share link".to_string(),
            ));
        }
        self.store.soft_delete(share_id, owner_user_id).await?;
        Ok(())
    }

    /// Resolves the anonymized, access-checked view of a shared session.
    pub async fn shared_session_view(
        &self,
        share_id: &str,
        user_id: Option<&str>,
        user_email: Option<&str>,
    ) -> A2AResult<SharedSessionView> {
        let link = self.get(share_id).await?;
        let decision = link.decide_access(user_id, user_email);
        if !decision.is_allowed() {
            return Err(A2AError::Authorization(match decision {
                AccessDecision::RejectAuthenticationRequired => {
                    "authentication required to view this shared session".to_string()
                }
                AccessDecision::RejectDomainMismatch => format!(
                    "access restricted to users from: {}",
                    link.allowed_domains.join(", ")
                ),
                _ => "access denied".to_string(),
            }));
        }

        Ok(SharedSessionView {
            share_id: link.share_id.clone(),
            title: link.title.clone().unwrap_or_else(|| "Untitled".to_string()),
            created_at_epoch: link.created_at_epoch,
            access_mode: link.access_mode(),
            anonymized_session_id: anonymize_id(&link.session_id, "session"),
            anonymized_user_id: "anonymous".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact_store::{ArtifactMetadata, InMemoryArtifactStore};

    fn request(require_auth: bool, domains: &[&str]) -> CreateShareLinkRequest {
        CreateShareLinkRequest {
            owner_user_id: "owner-1".to_string(),
            session_id: "session-1".to_string(),
            app_name: "billing".to_string(),
            title: Some("My chat".to_string()),
            require_authentication: require_auth,
            allowed_domains: domains.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn service() -> ShareLinkService<InMemoryShareLinkStore> {
        ShareLinkService::new(
            InMemoryShareLinkStore::new(),
            Arc::new(InMemoryArtifactStore::new()),
            10,
        )
    }

    #[test]
    fn domain_validation_rejects_malformed_input() {
        assert!(validate_domain("example.com"));
        assert!(!validate_domain("@example.com"));
        assert!(!validate_domain(".example.com"));
        assert!(!validate_domain("example.com."));
        assert!(!validate_domain("no-dot"));
        assert!(!validate_domain(""));
    }

    #[test]
    fn domains_list_normalizes_case_and_whitespace() {
        let domains = vec![" Example.COM ".to_string(), "other.org".to_string()];
        let normalized = validate_domains_list(&domains).unwrap();
        assert_eq!(normalized, vec!["example.com".to_string(), "other.org".to_string()]);
    }

    #[test]
    fn domains_list_rejects_duplicates_and_overflow() {
        let dup = vec!["a.com".to_string(), "A.com".to_string()];
        assert!(validate_domains_list(&dup).is_err());

        let too_many: Vec<String> = (0..11).map(|i| format!("d{i}.com")).collect();
        assert!(validate_domains_list(&too_many).is_err());
    }

    #[test]
    fn anonymize_id_is_stable_and_prefixed() {
        let a = anonymize_id("user-42", "session");
        let b = anonymize_id("user-42", "session");
        assert_eq!(a, b);
        assert!(a.starts_with("session_"));
    }

    #[tokio::test]
    async fn public_share_allows_anyone() {
        let svc = service();
        let link = svc.create(request(false, &[])).await.unwrap();
        let view = svc.shared_session_view(&link.share_id, None, None).await.unwrap();
        assert_eq!(view.access_mode, AccessMode::Public);
        assert_eq!(view.anonymized_user_id, "anonymous");
    }

    #[tokio::test]
    async fn authenticated_share_rejects_anonymous_caller() {
        let svc = service();
        let link = svc.create(request(true, &[])).await.unwrap();
        let result = svc.shared_session_view(&link.share_id, None, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn domain_restricted_share_allows_matching_domain_only() {
        let svc = service();
        let link = svc.create(request(true, &["acme.com"])).await.unwrap();

        let denied = svc
            .shared_session_view(&link.share_id, Some("u1"), Some("user@other.com"))
            .await;
        assert!(denied.is_err());

        let allowed = svc
            .shared_session_view(&link.share_id, Some("u1"), Some("user@acme.com"))
            .await
            .unwrap();
        assert_eq!(allowed.access_mode, AccessMode::DomainRestricted);
    }

    #[tokio::test]
    async fn only_owner_can_delete_share_link() {
        let svc = service();
        let link = svc.create(request(false, &[])).await.unwrap();
        let err = svc.delete(&link.share_id, "not-the-owner").await;
        assert!(err.is_err());
        svc.delete(&link.share_id, "owner-1").await.unwrap();
        assert!(svc.get(&link.share_id).await.is_err());
    }

    #[test]
    fn build_share_url_uses_hash_router_format() {
        let url = build_share_url("https://app.example.com/", "abc123");
        assert_eq!(url, "https://app.example.com/#/share/abc123");
    }

    #[tokio::test]
    async fn create_is_idempotent_per_session() {
        let svc = service();
        let first = svc.create(request(false, &[])).await.unwrap();
        let second = svc.create(request(false, &[])).await.unwrap();
        assert_eq!(first.share_id, second.share_id);
    }

    #[tokio::test]
    async fn create_rejects_domains_without_authentication() {
        let svc = service();
        let err = svc.create(request(false, &["acme.com"])).await.unwrap_err();
        assert!(matches!(err, A2AError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn create_marks_session_artifacts_shared_and_records_them() {
        let artifact_store = Arc::new(InMemoryArtifactStore::new());
        artifact_store
            .save(
                "billing",
                "owner-1",
                "session-1",
                "report.pdf",
                b"bytes".to_vec(),
                ArtifactMetadata::default(),
            )
            .await
            .unwrap();

        let svc = ShareLinkService::new(InMemoryShareLinkStore::new(), artifact_store.clone(), 10);
        let link = svc.create(request(false, &[])).await.unwrap();

        let metadata = artifact_store
            .load_metadata(&crate::artifact_store::ArtifactUri::new(
                "billing",
                "owner-1",
                "session-1",
                "report.pdf",
                1,
            ))
            .await
            .unwrap();
        assert!(metadata.shared_publicly);

        let shared = svc.store.shared_artifacts_for_share(&link.share_id).await.unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].artifact_version, 1);
        assert!(shared[0].is_public);
    }
}
