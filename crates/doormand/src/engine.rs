use crate::config::Config;
use doorman_core::{
    AuditEntry, AuditLog, AuditOrder, AuditRecord, Compatibility, EmbeddingProvider,
    EnrollmentGuard, ExtractionError, GalleryIndex, GalleryStore, Identity, IdentityPatch,
    MatchEngine, MatchPolicy, MatchResult, MetricError, RawIdentityRecord, StoreError,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Metric(#[from] MetricError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("face already registered as '{name}' ({id})")]
    DuplicateIdentity { id: String, name: String, similarity: f32 },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Matching parameters the worker runs with.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub recognition: MatchPolicy,
    pub registration_threshold: f32,
    pub compatibility: Compatibility,
    pub queue: usize,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            recognition: config.recognition_policy(),
            registration_threshold: config.registration_threshold,
            compatibility: config.compatibility(),
            queue: config.engine_queue,
        }
    }
}

/// Outcome of a recognition attempt. Both variants have been audited.
#[derive(Debug, Clone)]
pub enum Recognition {
    Decided {
        result: MatchResult,
        identity: Option<Identity>,
    },
    /// The image could not be turned into a single embedding.
    Rejected(ExtractionError),
}

#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Caller-chosen id; generated when absent.
    pub id: Option<String>,
}

/// Result of comparing two images with each other.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub verified: bool,
    pub distance: f32,
    pub threshold: f32,
    /// `(1 - distance)` as a percentage, two decimals.
    pub similarity: f32,
    pub confidence: f32,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Recognize {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Recognition, EngineError>>,
    },
    Register {
        image: Vec<u8>,
        registration: Registration,
        reply: oneshot::Sender<Result<Identity, EngineError>>,
    },
    Verify {
        first: Vec<u8>,
        second: Vec<u8>,
        reply: oneshot::Sender<Result<Verification, EngineError>>,
    },
    ListIdentities {
        reply: oneshot::Sender<Result<Vec<RawIdentityRecord>, EngineError>>,
    },
    GetIdentity {
        id: String,
        reply: oneshot::Sender<Result<RawIdentityRecord, EngineError>>,
    },
    UpdateIdentity {
        id: String,
        patch: IdentityPatch,
        reply: oneshot::Sender<Result<RawIdentityRecord, EngineError>>,
    },
    RemoveIdentity {
        id: String,
        reply: oneshot::Sender<Result<RawIdentityRecord, EngineError>>,
    },
    ListLogs {
        limit: usize,
        order: AuditOrder,
        reply: oneshot::Sender<Result<Vec<AuditEntry>, EngineError>>,
    },
    ClearLogs {
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Extract, match against the active gallery and audit the decision.
    pub async fn recognize(&self, image: Vec<u8>) -> Result<Recognition, EngineError> {
        self.call(|reply| EngineRequest::Recognize { image, reply }).await
    }

    /// Extract, reject duplicates and store a new identity.
    pub async fn register(&self, image: Vec<u8>, registration: Registration) -> Result<Identity, EngineError> {
        self.call(|reply| EngineRequest::Register {
            image,
            registration,
            reply,
        })
        .await
    }

    /// Compare the faces in two images.
    pub async fn verify(&self, first: Vec<u8>, second: Vec<u8>) -> Result<Verification, EngineError> {
        self.call(|reply| EngineRequest::Verify { first, second, reply })
            .await
    }

    pub async fn list_identities(&self) -> Result<Vec<RawIdentityRecord>, EngineError> {
        self.call(|reply| EngineRequest::ListIdentities { reply }).await
    }

    pub async fn get_identity(&self, id: String) -> Result<RawIdentityRecord, EngineError> {
        self.call(|reply| EngineRequest::GetIdentity { id, reply }).await
    }

    pub async fn update_identity(&self, id: String, patch: IdentityPatch) -> Result<RawIdentityRecord, EngineError> {
        self.call(|reply| EngineRequest::UpdateIdentity { id, patch, reply })
            .await
    }

    pub async fn remove_identity(&self, id: String) -> Result<RawIdentityRecord, EngineError> {
        self.call(|reply| EngineRequest::RemoveIdentity { id, reply }).await
    }

    pub async fn list_logs(&self, limit: usize, order: AuditOrder) -> Result<Vec<AuditEntry>, EngineError> {
        self.call(|reply| EngineRequest::ListLogs { limit, order, reply })
            .await
    }

    pub async fn clear_logs(&self) -> Result<usize, EngineError> {
        self.call(|reply| EngineRequest::ClearLogs { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Reads the gallery once before starting so an unreachable store fails
/// at startup instead of on the first request.
pub fn spawn_engine(
    provider: Arc<dyn EmbeddingProvider>,
    gallery: Arc<dyn GalleryStore>,
    audit: Arc<dyn AuditLog>,
    settings: EngineSettings,
) -> Result<EngineHandle, EngineError> {
    let records = gallery.get_all()?;
    let index = GalleryIndex::build(records, &settings.compatibility);
    tracing::info!(
        enrolled = index.stats().accepted,
        inactive = index.stats().inactive,
        skipped = index.stats().malformed + index.stats().incompatible,
        model = provider.model(),
        metric = %settings.recognition.metric,
        threshold = settings.recognition.threshold,
        "gallery loaded"
    );

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(settings.queue.max(1));
    let worker = Worker::new(provider, gallery, audit, settings);

    std::thread::Builder::new()
        .name("doorman-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                worker.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// Owns the collaborators and runs every request synchronously.
struct Worker {
    provider: Arc<dyn EmbeddingProvider>,
    gallery: Arc<dyn GalleryStore>,
    audit: Arc<dyn AuditLog>,
    matcher: MatchEngine,
    guard: EnrollmentGuard,
    settings: EngineSettings,
}

impl Worker {
    fn new(
        provider: Arc<dyn EmbeddingProvider>,
        gallery: Arc<dyn GalleryStore>,
        audit: Arc<dyn AuditLog>,
        settings: EngineSettings,
    ) -> Self {
        let policy = settings.recognition;
        Self {
            provider,
            gallery,
            audit,
            matcher: MatchEngine::new(policy),
            guard: EnrollmentGuard::new(policy.metric, settings.registration_threshold, policy.confidence),
            settings,
        }
    }

    fn handle(&self, req: EngineRequest) {
        match req {
            EngineRequest::Recognize { image, reply } => {
                let _ = reply.send(self.recognize(&image));
            }
            EngineRequest::Register {
                image,
                registration,
                reply,
            } => {
                let _ = reply.send(self.register(&image, registration));
            }
            EngineRequest::Verify { first, second, reply } => {
                let _ = reply.send(self.verify(&first, &second));
            }
            EngineRequest::ListIdentities { reply } => {
                let _ = reply.send(self.gallery.get_all().map_err(EngineError::from));
            }
            EngineRequest::GetIdentity { id, reply } => {
                let _ = reply.send(self.get_identity(&id));
            }
            EngineRequest::UpdateIdentity { id, patch, reply } => {
                let _ = reply.send(self.update_identity(&id, &patch));
            }
            EngineRequest::RemoveIdentity { id, reply } => {
                let result = self.gallery.delete(&id).map_err(EngineError::from);
                if result.is_ok() {
                    tracing::info!(identity = %id, "identity removed");
                }
                let _ = reply.send(result);
            }
            EngineRequest::ListLogs { limit, order, reply } => {
                let _ = reply.send(self.audit.list(limit, order).map_err(EngineError::from));
            }
            EngineRequest::ClearLogs { reply } => {
                let _ = reply.send(self.audit.clear().map_err(EngineError::from));
            }
        }
    }

    fn load_index(&self) -> Result<GalleryIndex, StoreError> {
        let records = self.gallery.get_all()?;
        Ok(GalleryIndex::build(records, &self.settings.compatibility))
    }

    fn append_audit(&self, record: AuditRecord) -> Result<String, StoreError> {
        self.audit.record(record).inspect_err(|e| {
            tracing::error!(error = %e, "failed to append audit record");
        })
    }

    fn recognize(&self, image: &[u8]) -> Result<Recognition, EngineError> {
        let query = match self.provider.extract(image) {
            Ok(embedding) => embedding,
            Err(err) => {
                tracing::info!(authorized = false, reason = %err.reason(), "recognition rejected");
                self.append_audit(AuditRecord::denied(err.reason()))?;
                return Ok(Recognition::Rejected(err));
            }
        };

        let index = match self.load_index() {
            Ok(index) => index,
            Err(err) => {
                tracing::error!(error = %err, "gallery unavailable during recognition");
                // Best effort: the audit log usually shares the failing store.
                self.append_audit(AuditRecord::denied("store unavailable")).ok();
                return Err(err.into());
            }
        };

        let report = match self.matcher.identify(&query, &index) {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(error = %err, "query embedding rejected by matcher");
                self.append_audit(AuditRecord::denied(err.to_string()))?;
                return Err(err.into());
            }
        };

        let result = report.result;
        let identity = result
            .identity_id
            .as_deref()
            .and_then(|id| index.lookup(id))
            .cloned();
        let log_id = self.append_audit(AuditRecord::from_match(&result, identity.as_ref()))?;

        tracing::info!(
            authorized = result.matched,
            identity = result.identity_id.as_deref().unwrap_or("unknown"),
            distance = result.distance,
            confidence = result.confidence,
            compared = report.compared,
            skipped = report.skipped.len(),
            log_id = %log_id,
            "recognition decided"
        );

        Ok(Recognition::Decided { result, identity })
    }

    fn register(&self, image: &[u8], registration: Registration) -> Result<Identity, EngineError> {
        let name = registration.name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidRequest("name is required".into()));
        }
        let requested_id = registration
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let embedding = self.provider.extract(image)?;
        let index = self.load_index()?;

        let check = self.guard.check_duplicate(&embedding, &index)?;
        if let Some(conflict) = check.conflict {
            tracing::info!(
                existing = %conflict.identity_id,
                distance = conflict.distance,
                "registration rejected as duplicate"
            );
            return Err(EngineError::DuplicateIdentity {
                id: conflict.identity_id,
                name: conflict.identity_name,
                similarity: conflict.similarity,
            });
        }

        let id = requested_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("user_{}", uuid::Uuid::new_v4().simple()));
        let identity = Identity::enroll(id, name, embedding, self.provider.model())
            .with_contact(registration.email, registration.phone);
        self.gallery.put(&identity)?;

        tracing::info!(
            identity = %identity.id,
            name = %identity.name,
            dim = identity.embedding.len(),
            "identity registered"
        );
        Ok(identity)
    }

    fn verify(&self, first: &[u8], second: &[u8]) -> Result<Verification, EngineError> {
        let a = self.provider.extract(first)?;
        let b = self.provider.extract(second)?;

        let policy = &self.settings.recognition;
        policy.metric.check(&a)?;
        policy.metric.check(&b)?;
        let distance = policy.metric.distance(&a, &b)?;
        let verified = distance < policy.threshold;
        let similarity = ((1.0 - distance) * 100.0 * 100.0).round() / 100.0;

        tracing::info!(verified, distance, "verification decided");
        Ok(Verification {
            verified,
            distance,
            threshold: policy.threshold,
            similarity,
            confidence: policy.confidence.score(distance, policy.threshold),
        })
    }

    fn get_identity(&self, id: &str) -> Result<RawIdentityRecord, EngineError> {
        self.gallery
            .get(id)?
            .ok_or_else(|| StoreError::IdentityNotFound(id.to_string()).into())
    }

    fn update_identity(&self, id: &str, patch: &IdentityPatch) -> Result<RawIdentityRecord, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::InvalidRequest("no fields to update".into()));
        }
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(EngineError::InvalidRequest("name cannot be empty".into()));
            }
        }
        self.gallery.patch(id, patch)?;
        tracing::info!(identity = %id, status = ?patch.status, "identity updated");
        self.get_identity(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doorman_core::{
        ConfidenceModel, DistanceMetric, Embedding, IdentityStatus, MemoryAuditLog, MemoryGalleryStore,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Maps image bytes to scripted extraction results.
    struct ScriptedProvider {
        faces: HashMap<Vec<u8>, Result<Vec<f32>, ExtractionError>>,
    }

    impl ScriptedProvider {
        fn new(entries: Vec<(&str, Result<Vec<f32>, ExtractionError>)>) -> Self {
            Self {
                faces: entries.into_iter().map(|(k, v)| (k.as_bytes().to_vec(), v)).collect(),
            }
        }
    }

    impl EmbeddingProvider for ScriptedProvider {
        fn extract(&self, image: &[u8]) -> Result<Embedding, ExtractionError> {
            match self.faces.get(image) {
                Some(Ok(values)) => Ok(Embedding::new(values.clone())?),
                Some(Err(err)) => Err(err.clone()),
                None => Err(ExtractionError::NoFaceDetected),
            }
        }

        fn model(&self) -> &str {
            "Facenet512"
        }
    }

    struct Fixture {
        worker: Worker,
        gallery: Arc<MemoryGalleryStore>,
        audit: Arc<MemoryAuditLog>,
    }

    fn fixture(settings: EngineSettings) -> Fixture {
        let provider = ScriptedProvider::new(vec![
            ("alice", Ok(vec![1.0, 0.0])),
            ("alice-again", Ok(vec![0.99, 0.05])),
            ("bob", Ok(vec![0.0, 1.0])),
            ("stranger", Ok(vec![-1.0, 0.2])),
            ("blank", Ok(vec![0.0, 0.0])),
            ("crowd", Err(ExtractionError::MultipleFacesDetected)),
        ]);
        let gallery = Arc::new(MemoryGalleryStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        Fixture {
            worker: Worker::new(Arc::new(provider), gallery.clone(), audit.clone(), settings),
            gallery,
            audit,
        }
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            recognition: MatchPolicy::default(),
            registration_threshold: 0.40,
            compatibility: Compatibility {
                provider_model: Some("Facenet512".into()),
                dimension: None,
            },
            queue: 4,
        }
    }

    fn register(f: &Fixture, image: &[u8], name: &str) -> Result<Identity, EngineError> {
        f.worker.register(
            image,
            Registration {
                name: name.into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_recognize_registered_identity() {
        let f = fixture(settings());
        let alice = register(&f, b"alice", "Alice").unwrap();
        assert!(alice.id.starts_with("user_"));
        assert_eq!(alice.id.len(), "user_".len() + 32);

        match f.worker.recognize(b"alice-again").unwrap() {
            Recognition::Decided { result, identity } => {
                assert!(result.matched);
                assert_eq!(identity.unwrap().name, "Alice");
                assert!(result.confidence > 0.9);
            }
            other => panic!("unexpected {other:?}"),
        }

        let logs = f.audit.list(10, AuditOrder::NewestFirst).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].record.authorized);
        assert_eq!(logs[0].record.identity_id, alice.id);
    }

    #[test]
    fn test_recognize_empty_gallery_is_audited() {
        let f = fixture(settings());
        match f.worker.recognize(b"alice").unwrap() {
            Recognition::Decided { result, identity } => {
                assert!(!result.matched);
                assert!(identity.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        let logs = f.audit.list(10, AuditOrder::NewestFirst).unwrap();
        assert_eq!(logs[0].record.reason.as_deref(), Some("no registered identities"));
    }

    #[test]
    fn test_recognize_extraction_failure_is_audited() {
        let f = fixture(settings());
        register(&f, b"alice", "Alice").unwrap();
        match f.worker.recognize(b"crowd").unwrap() {
            Recognition::Rejected(err) => assert_eq!(err, ExtractionError::MultipleFacesDetected),
            other => panic!("unexpected {other:?}"),
        }
        let logs = f.audit.list(10, AuditOrder::NewestFirst).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].record.authorized);
        assert_eq!(logs[0].record.reason.as_deref(), Some("multiple faces"));
    }

    #[test]
    fn test_recognize_unknown_face() {
        let f = fixture(settings());
        register(&f, b"alice", "Alice").unwrap();
        register(&f, b"bob", "Bob").unwrap();
        let Recognition::Decided { result, .. } = f.worker.recognize(b"stranger").unwrap() else {
            panic!("expected a decision");
        };
        assert!(!result.matched);
        assert_eq!(result.confidence, 0.0);
        let logs = f.audit.list(1, AuditOrder::NewestFirst).unwrap();
        assert_eq!(logs[0].record.reason.as_deref(), Some("below threshold"));
        assert_eq!(logs[0].record.identity_id, "unknown");
    }

    #[test]
    fn test_recognize_degenerate_query_errors_and_audits() {
        let f = fixture(settings());
        register(&f, b"alice", "Alice").unwrap();
        let err = f.worker.recognize(b"blank").unwrap_err();
        assert!(matches!(err, EngineError::Metric(MetricError::DegenerateVector)));
        assert_eq!(f.audit.len(), 1);
    }

    #[test]
    fn test_min_confidence_gate() {
        let mut s = settings();
        s.recognition.min_confidence = Some(0.999);
        let f = fixture(s);
        register(&f, b"alice", "Alice").unwrap();
        let Recognition::Decided { result, .. } = f.worker.recognize(b"alice-again").unwrap() else {
            panic!("expected a decision");
        };
        assert!(!result.matched);
        let logs = f.audit.list(1, AuditOrder::NewestFirst).unwrap();
        assert_eq!(logs[0].record.reason.as_deref(), Some("confidence below minimum"));
    }

    #[test]
    fn test_register_rejects_duplicate_face() {
        let f = fixture(settings());
        let alice = register(&f, b"alice", "Alice").unwrap();
        match register(&f, b"alice-again", "Alice Twin") {
            Err(EngineError::DuplicateIdentity { id, name, similarity }) => {
                assert_eq!(id, alice.id);
                assert_eq!(name, "Alice");
                assert!(similarity > 0.9);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(f.gallery.get_all().unwrap().len(), 1);
        // Registration is never audited
        assert!(f.audit.is_empty());
    }

    #[test]
    fn test_register_after_deactivation() {
        let f = fixture(settings());
        let alice = register(&f, b"alice", "Alice").unwrap();
        let patch = IdentityPatch {
            status: Some(IdentityStatus::Inactive),
            ..Default::default()
        };
        f.worker.update_identity(&alice.id, &patch).unwrap();
        // An inactive identity no longer blocks re-enrollment
        let again = register(&f, b"alice-again", "Alice").unwrap();
        assert_ne!(again.id, alice.id);
    }

    #[test]
    fn test_register_with_chosen_id() {
        let f = fixture(settings());
        let identity = f
            .worker
            .register(
                b"bob",
                Registration {
                    name: "Bob".into(),
                    email: Some("bob@example.com".into()),
                    phone: Some(String::new()),
                    id: Some("bob-01".into()),
                },
            )
            .unwrap();
        assert_eq!(identity.id, "bob-01");
        assert_eq!(identity.email.as_deref(), Some("bob@example.com"));
        assert_eq!(identity.phone, None);
        assert_eq!(identity.provider_model, "Facenet512");

        let clash = f.worker.register(
            b"alice",
            Registration {
                name: "Alice".into(),
                id: Some("bob-01".into()),
                ..Default::default()
            },
        );
        assert!(matches!(clash, Err(EngineError::Store(StoreError::IdentityExists(_)))));
    }

    #[test]
    fn test_register_requires_name_and_face() {
        let f = fixture(settings());
        assert!(matches!(register(&f, b"alice", "  "), Err(EngineError::InvalidRequest(_))));
        assert!(matches!(
            register(&f, b"nothing", "Nobody"),
            Err(EngineError::Extraction(ExtractionError::NoFaceDetected))
        ));
    }

    #[test]
    fn test_verify_same_and_different() {
        let f = fixture(settings());
        let same = f.worker.verify(b"alice", b"alice-again").unwrap();
        assert!(same.verified);
        assert!(same.similarity > 99.0 && same.similarity <= 100.0);

        let different = f.worker.verify(b"alice", b"bob").unwrap();
        assert!(!different.verified);
        assert!((different.distance - 1.0).abs() < 1e-6);
        assert!((different.similarity - 0.0).abs() < 1e-4);
        assert!(f.audit.is_empty());
    }

    #[test]
    fn test_verify_under_euclidean_with_sigmoid() {
        let mut s = settings();
        s.recognition = MatchPolicy {
            metric: DistanceMetric::Euclidean,
            threshold: 0.6,
            confidence: ConfidenceModel::SigmoidTail,
            min_confidence: None,
        };
        let f = fixture(s);
        let result = f.worker.verify(b"alice", b"bob").unwrap();
        assert!(!result.verified);
        assert!((result.distance - 2.0f32.sqrt()).abs() < 1e-5);
        assert!(result.confidence < 0.5);
    }

    #[test]
    fn test_update_identity_validation() {
        let f = fixture(settings());
        let alice = register(&f, b"alice", "Alice").unwrap();
        assert!(matches!(
            f.worker.update_identity(&alice.id, &IdentityPatch::default()),
            Err(EngineError::InvalidRequest(_))
        ));
        let rename = IdentityPatch {
            name: Some("Alice B".into()),
            ..Default::default()
        };
        let updated = f.worker.update_identity(&alice.id, &rename).unwrap();
        assert_eq!(updated.name.as_deref(), Some("Alice B"));
        assert!(matches!(
            f.worker.update_identity("ghost", &rename),
            Err(EngineError::Store(StoreError::IdentityNotFound(_)))
        ));
    }

    #[test]
    fn test_register_validates_candidate_on_empty_gallery() {
        let f = fixture(settings());
        assert!(matches!(
            register(&f, b"blank", "Blank"),
            Err(EngineError::Metric(MetricError::DegenerateVector))
        ));

        let mut pinned = settings();
        pinned.compatibility.dimension = Some(3);
        let p = fixture(pinned);
        assert!(matches!(
            register(&p, b"alice", "Alice"),
            Err(EngineError::Metric(MetricError::DimensionMismatch { expected: 3, actual: 2 }))
        ));

        assert!(f.gallery.get_all().unwrap().is_empty());
        assert!(p.gallery.get_all().unwrap().is_empty());
    }

    /// Gallery store that can be switched off mid-test.
    #[derive(Default)]
    struct SwitchableGallery {
        inner: MemoryGalleryStore,
        down: AtomicBool,
    }

    impl SwitchableGallery {
        fn check(&self) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("database is locked".into()))
            } else {
                Ok(())
            }
        }
    }

    impl GalleryStore for SwitchableGallery {
        fn get_all(&self) -> Result<Vec<RawIdentityRecord>, StoreError> {
            self.check()?;
            self.inner.get_all()
        }

        fn get(&self, id: &str) -> Result<Option<RawIdentityRecord>, StoreError> {
            self.check()?;
            self.inner.get(id)
        }

        fn put(&self, identity: &Identity) -> Result<(), StoreError> {
            self.check()?;
            self.inner.put(identity)
        }

        fn patch(&self, id: &str, patch: &IdentityPatch) -> Result<(), StoreError> {
            self.check()?;
            self.inner.patch(id, patch)
        }

        fn delete(&self, id: &str) -> Result<RawIdentityRecord, StoreError> {
            self.check()?;
            self.inner.delete(id)
        }
    }

    /// Audit log whose appends always fail.
    struct BrokenAudit;

    impl AuditLog for BrokenAudit {
        fn record(&self, _record: AuditRecord) -> Result<String, StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }

        fn list(&self, _limit: usize, _order: AuditOrder) -> Result<Vec<AuditEntry>, StoreError> {
            Ok(Vec::new())
        }

        fn clear(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    fn alice_provider() -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider::new(vec![("alice", Ok(vec![1.0, 0.0]))]))
    }

    #[test]
    fn test_recognize_fails_when_gallery_unavailable() {
        let gallery = Arc::new(SwitchableGallery::default());
        let audit = Arc::new(MemoryAuditLog::new());
        let worker = Worker::new(alice_provider(), gallery.clone(), audit.clone(), settings());
        worker
            .register(
                b"alice",
                Registration {
                    name: "Alice".into(),
                    ..Default::default()
                },
            )
            .unwrap();

        gallery.down.store(true, Ordering::SeqCst);
        let err = worker.recognize(b"alice").unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::Unavailable(_))));
        assert_eq!(
            crate::error::ApiError::from(err).status_code(),
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        );

        let logs = audit.list(10, AuditOrder::NewestFirst).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].record.authorized);
        assert_eq!(logs[0].record.reason.as_deref(), Some("store unavailable"));
    }

    #[test]
    fn test_recognize_never_grants_without_audit_record() {
        let gallery = Arc::new(MemoryGalleryStore::new());
        let worker = Worker::new(alice_provider(), gallery, Arc::new(BrokenAudit), settings());
        // Registration does not touch the audit log
        worker
            .register(
                b"alice",
                Registration {
                    name: "Alice".into(),
                    ..Default::default()
                },
            )
            .unwrap();

        let err = worker.recognize(b"alice").unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::Unavailable(_))));
        assert_eq!(
            crate::error::ApiError::from(err).status_code(),
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        );
        // Extraction failures are refused the same way
        assert!(matches!(
            worker.recognize(b"nobody"),
            Err(EngineError::Store(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let provider = Arc::new(ScriptedProvider::new(vec![("alice", Ok(vec![1.0, 0.0]))]));
        let gallery = Arc::new(MemoryGalleryStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let handle = spawn_engine(provider, gallery, audit.clone(), settings()).unwrap();

        let identity = handle
            .register(
                b"alice".to_vec(),
                Registration {
                    name: "Alice".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let listed = handle.list_identities().await.unwrap();
        assert_eq!(listed.len(), 1);

        let recognition = handle.recognize(b"alice".to_vec()).await.unwrap();
        assert!(matches!(recognition, Recognition::Decided { ref result, .. } if result.matched));
        assert_eq!(handle.list_logs(50, AuditOrder::NewestFirst).await.unwrap().len(), 1);

        handle.remove_identity(identity.id.clone()).await.unwrap();
        assert!(handle.get_identity(identity.id).await.is_err());
        assert_eq!(handle.clear_logs().await.unwrap(), 1);
        assert!(audit.is_empty());
    }
}
