//! Request-scoped snapshot of the enrolled, active identities.

use crate::types::{Identity, IdentityStatus, RawIdentityRecord, RecordRejection};
use std::collections::HashMap;

/// What a gallery entry must look like to be matched under the current
/// configuration. `None` fields accept anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compatibility {
    pub provider_model: Option<String>,
    pub dimension: Option<usize>,
}

impl Compatibility {
    fn check(&self, identity: &Identity) -> Result<(), RecordRejection> {
        if let Some(expected) = &self.provider_model {
            if &identity.provider_model != expected {
                return Err(RecordRejection::IncompatibleModel {
                    expected: expected.clone(),
                    found: identity.provider_model.clone(),
                });
            }
        }
        if let Some(expected) = self.dimension {
            if identity.embedding.len() != expected {
                return Err(RecordRejection::IncompatibleDimension {
                    expected,
                    found: identity.embedding.len(),
                });
            }
        }
        Ok(())
    }
}

/// Counts of what happened to the raw records during a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub accepted: usize,
    pub inactive: usize,
    pub malformed: usize,
    pub incompatible: usize,
    pub duplicate_ids: usize,
}

/// Immutable id → identity view used for one decision.
///
/// Entries keep the store's order, which is also the matcher's tie-break
/// order. Later store mutations are invisible until the next build.
#[derive(Debug, Clone, Default)]
pub struct GalleryIndex {
    entries: Vec<Identity>,
    positions: HashMap<String, usize>,
    dimension: Option<usize>,
    stats: BuildStats,
}

impl GalleryIndex {
    /// Filter raw store records down to active, well-formed, compatible
    /// identities. Rejected records are counted and skipped, never fatal.
    pub fn build<I>(records: I, compat: &Compatibility) -> Self
    where
        I: IntoIterator<Item = RawIdentityRecord>,
    {
        let mut index = Self {
            dimension: compat.dimension,
            ..Self::default()
        };

        for raw in records {
            let id = raw.id.clone();
            match index.admit(raw, compat) {
                Ok(identity) => {
                    index.positions.insert(identity.id.clone(), index.entries.len());
                    index.entries.push(identity);
                    index.stats.accepted += 1;
                }
                Err(RecordRejection::Inactive) => index.stats.inactive += 1,
                Err(RecordRejection::DuplicateId) => {
                    tracing::warn!(identity = %id, "duplicate id in gallery store; keeping first");
                    index.stats.duplicate_ids += 1;
                }
                Err(rejection) if rejection.is_malformed() => {
                    tracing::warn!(identity = %id, reason = %rejection, "skipping malformed gallery record");
                    index.stats.malformed += 1;
                }
                Err(rejection) => {
                    tracing::debug!(identity = %id, reason = %rejection, "skipping incompatible gallery record");
                    index.stats.incompatible += 1;
                }
            }
        }

        tracing::debug!(
            accepted = index.stats.accepted,
            inactive = index.stats.inactive,
            malformed = index.stats.malformed,
            incompatible = index.stats.incompatible,
            duplicate_ids = index.stats.duplicate_ids,
            "gallery index built"
        );

        index
    }

    fn admit(&self, raw: RawIdentityRecord, compat: &Compatibility) -> Result<Identity, RecordRejection> {
        if self.positions.contains_key(&raw.id) {
            return Err(RecordRejection::DuplicateId);
        }
        // Anything not explicitly active is filtered before validation.
        if raw.status.as_deref() != Some(IdentityStatus::Active.as_str()) {
            return Err(RecordRejection::Inactive);
        }
        let identity = Identity::from_raw(raw)?;
        compat.check(&identity)?;
        Ok(identity)
    }

    pub fn lookup(&self, id: &str) -> Option<&Identity> {
        self.positions.get(id).map(|&i| &self.entries[i])
    }

    /// Entries in store order.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = (&str, &Identity)> + '_ {
        self.entries.iter().map(|identity| (identity.id.as_str(), identity))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Required embedding length, when the configuration pins one.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn stats(&self) -> BuildStats {
        self.stats
    }
}
