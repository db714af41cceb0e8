//! System Registry - catalogue of available prediction systems + metadata.
//!
//! # Purpose
//! The pipeline consumes prediction systems only through the uniform
//! [`PredictionSystem`] contract. `SystemRegistry` is the catalogue behind
//! it: each entry pairs
//!
//! - [`SystemMeta`] - static metadata (name, version, description, and the
//!   explicit complement pairing), and
//! - a [`SystemFactory`] - a `Send + Sync` closure producing a fresh
//!   `Box<dyn PredictionSystem>` on demand.
//!
//! The registry is populated once at process start from statically known
//! factories; adding a system is a deploy-time action, never a runtime code
//! mutation. It is pure lookup and holds no historical data.
//!
//! # Pairing
//! A system may declare itself the complement of another (e.g. a
//! least-frequent variant of a most-frequent system). The pairing is a
//! first-class field on `SystemMeta`; promotion follows
//! [`SystemRegistry::promotion_group`] rather than any name convention.

use ddk_schemas::Draw;

mod builtins;

pub use builtins::{default_registry, ColdGap, HotFrequency, UniformFloor};

// ---------------------------------------------------------------------------
// Prediction contract
// ---------------------------------------------------------------------------

/// A named, pluggable function from history to a ranked shortlist.
///
/// `history` is chronological and contains only draws the prediction is
/// allowed to see - the backfill engine guarantees every draw in it is
/// strictly earlier than the draw being predicted. Implementations may hold
/// private caches but must not depend on call order for correctness.
pub trait PredictionSystem: Send + Sync {
    /// The registry name this instance answers to.
    fn name(&self) -> &str;

    /// Produce a ranked shortlist of candidate values (best guess first).
    fn predict(&self, history: &[Draw]) -> anyhow::Result<Vec<u8>>;
}

/// A thread-safe factory closure producing a fresh system instance.
///
/// Each instantiation is independent; internal caches must not leak across
/// backfill runs.
pub type SystemFactory = Box<dyn Fn() -> Box<dyn PredictionSystem> + Send + Sync>;

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Static metadata for a registered system, queryable without instantiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemMeta {
    /// Unique registry key. Non-empty.
    pub name: String,
    /// Semver-style version string; not validated beyond non-empty.
    pub version: String,
    /// Human-readable description.
    pub description: String,
    /// Name of the system this one is the complement of, if any. The named
    /// system must already be registered.
    pub complement_of: Option<String>,
}

impl SystemMeta {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            complement_of: None,
        }
    }

    /// Declare this system the complement of `base`.
    pub fn complement_of(mut self, base: impl Into<String>) -> Self {
        self.complement_of = Some(base.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by [`SystemRegistry`] operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// A system with the given name is already registered.
    DuplicateName { name: String },
    /// No system with the given name is registered.
    UnknownSystem { name: String },
    /// The system name is empty or contains only whitespace.
    EmptyName,
    /// `complement_of` names a system that is not registered.
    UnknownComplement { name: String, complement: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateName { name } => write!(f, "system '{name}' is already registered"),
            Self::UnknownSystem { name } => write!(f, "no system named '{name}' is registered"),
            Self::EmptyName => write!(f, "system name must not be empty"),
            Self::UnknownComplement { name, complement } => write!(
                f,
                "system '{name}' declares complement '{complement}', which is not registered"
            ),
        }
    }
}

impl std::error::Error for RegistryError {}

// ---------------------------------------------------------------------------
// SystemRegistry
// ---------------------------------------------------------------------------

struct RegistryEntry {
    meta: SystemMeta,
    factory: SystemFactory,
}

/// Catalogue of available prediction systems and their factories.
///
/// Insertion order is preserved in `list()` output. Names are compared
/// case-sensitively.
pub struct SystemRegistry {
    entries: Vec<RegistryEntry>,
}

impl SystemRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a system by metadata and factory closure.
    ///
    /// # Errors
    /// - [`RegistryError::EmptyName`] if `meta.name` is empty/whitespace.
    /// - [`RegistryError::DuplicateName`] on a repeated name.
    /// - [`RegistryError::UnknownComplement`] if the declared complement is
    ///   not yet registered - register the base system first.
    pub fn register<F>(&mut self, meta: SystemMeta, factory: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn PredictionSystem> + Send + Sync + 'static,
    {
        if meta.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.contains(&meta.name) {
            return Err(RegistryError::DuplicateName {
                name: meta.name.clone(),
            });
        }
        if let Some(complement) = &meta.complement_of {
            if !self.contains(complement) {
                return Err(RegistryError::UnknownComplement {
                    name: meta.name.clone(),
                    complement: complement.clone(),
                });
            }
        }
        self.entries.push(RegistryEntry {
            meta,
            factory: Box::new(factory),
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.meta.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Metadata for all registered systems in insertion order.
    pub fn list(&self) -> Vec<&SystemMeta> {
        self.entries.iter().map(|e| &e.meta).collect()
    }

    /// Registered systems whose names are absent from `known` - used to
    /// report systems that have no ranking row yet.
    pub fn list_unregistered<'a>(&'a self, known: &[String]) -> Vec<&'a SystemMeta> {
        self.entries
            .iter()
            .map(|e| &e.meta)
            .filter(|m| !known.iter().any(|k| k == &m.name))
            .collect()
    }

    /// Look up metadata by name.
    pub fn lookup(&self, name: &str) -> Result<&SystemMeta, RegistryError> {
        self.entries
            .iter()
            .find(|e| e.meta.name == name)
            .map(|e| &e.meta)
            .ok_or_else(|| RegistryError::UnknownSystem {
                name: name.to_string(),
            })
    }

    /// Instantiate a system by name using its registered factory.
    ///
    /// Each call produces a fresh instance - internal predictor state must
    /// not leak across runs.
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn PredictionSystem>, RegistryError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.meta.name == name)
            .ok_or_else(|| RegistryError::UnknownSystem {
                name: name.to_string(),
            })?;
        Ok((entry.factory)())
    }

    /// The set of systems a promotion of `name` must carry together: the
    /// system itself, the system it complements (if any), and every system
    /// declaring `name` as its complement. Order: `name` first, then the
    /// rest in registration order.
    pub fn promotion_group(&self, name: &str) -> Result<Vec<String>, RegistryError> {
        let meta = self.lookup(name)?;
        let mut group = vec![meta.name.clone()];
        if let Some(base) = &meta.complement_of {
            if !group.contains(base) {
                group.push(base.clone());
            }
        }
        for e in &self.entries {
            if e.meta.complement_of.as_deref() == Some(name) && !group.contains(&e.meta.name) {
                group.push(e.meta.name.clone());
            }
        }
        Ok(group)
    }
}

impl Default for SystemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
