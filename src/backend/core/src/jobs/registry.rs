//! Job type registry.
//!
//! Submissions carry a registered type name; the registry maps it to a
//! factory that builds the job instance with the caller-assigned identity
//! already injected. Unknown type names are rejected synchronously at
//! submission, and a type registered for one kind cannot be submitted as
//! the other.

use dashmap::DashMap;
use std::sync::Arc;

use crate::error::{ForemanError, Result};
use crate::jobs::job::{JobIdentity, JobKind, OneTimeJob, RepetitiveJob};

type OneTimeFactory = Arc<dyn Fn(JobIdentity) -> Arc<dyn OneTimeJob> + Send + Sync>;
type RepetitiveFactory = Arc<dyn Fn(JobIdentity) -> Arc<dyn RepetitiveJob> + Send + Sync>;

#[derive(Clone)]
enum JobFactory {
    OneTime(OneTimeFactory),
    Repetitive(RepetitiveFactory),
}

/// Registry of instantiable job types.
#[derive(Default)]
pub struct JobRegistry {
    factories: DashMap<String, JobFactory>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Create a registry with the built-in job types registered.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::jobs::builtin::register_builtins(&registry);
        registry
    }

    /// Register a one-time job type.
    pub fn register_one_time<F, J>(&self, job_type: impl Into<String>, factory: F)
    where
        F: Fn(JobIdentity) -> J + Send + Sync + 'static,
        J: OneTimeJob + 'static,
    {
        self.factories.insert(
            job_type.into(),
            JobFactory::OneTime(Arc::new(move |identity| Arc::new(factory(identity)))),
        );
    }

    /// Register a repetitive job type.
    pub fn register_repetitive<F, J>(&self, job_type: impl Into<String>, factory: F)
    where
        F: Fn(JobIdentity) -> J + Send + Sync + 'static,
        J: RepetitiveJob + 'static,
    {
        self.factories.insert(
            job_type.into(),
            JobFactory::Repetitive(Arc::new(move |identity| Arc::new(factory(identity)))),
        );
    }

    /// Check whether a type name is registered.
    pub fn contains(&self, job_type: &str) -> bool {
        self.factories.contains_key(job_type)
    }

    /// The kind a type name is registered as.
    pub fn kind_of(&self, job_type: &str) -> Option<JobKind> {
        self.factories.get(job_type).map(|entry| match entry.value() {
            JobFactory::OneTime(_) => JobKind::OneTime,
            JobFactory::Repetitive(_) => JobKind::Repetitive,
        })
    }

    /// Instantiate a one-time job with the given identity.
    pub fn instantiate_one_time(
        &self,
        job_type: &str,
        identity: JobIdentity,
    ) -> Result<Arc<dyn OneTimeJob>> {
        match self.factories.get(job_type).map(|e| e.value().clone()) {
            Some(JobFactory::OneTime(factory)) => Ok(factory(identity)),
            Some(JobFactory::Repetitive(_)) => Err(ForemanError::validation(format!(
                "Job type is registered as repetitive, not one-time: {}",
                job_type
            ))),
            None => Err(ForemanError::job_type_unknown(job_type)),
        }
    }

    /// Instantiate a repetitive job with the given identity.
    pub fn instantiate_repetitive(
        &self,
        job_type: &str,
        identity: JobIdentity,
    ) -> Result<Arc<dyn RepetitiveJob>> {
        match self.factories.get(job_type).map(|e| e.value().clone()) {
            Some(JobFactory::Repetitive(factory)) => Ok(factory(identity)),
            Some(JobFactory::OneTime(_)) => Err(ForemanError::validation(format!(
                "Job type is registered as one-time, not repetitive: {}",
                job_type
            ))),
            None => Err(ForemanError::job_type_unknown(job_type)),
        }
    }

    /// Registered type names, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
