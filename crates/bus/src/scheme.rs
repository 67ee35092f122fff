//! Registry of message types known to the bus.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use thiserror::Error;

use crate::message::{Contract, TypeKey};

/// Errors raised by the scheme registry.
#[derive(Debug, Error)]
pub enum SchemeError {
    /// The type key has not been registered.
    #[error("Type {0} is not registered in the scheme")]
    UnknownType(TypeKey),

    /// Building a sample object for the type failed.
    #[error("Sample object for {kind} could not be built: {reason}")]
    Sample { kind: TypeKey, reason: String },
}

/// Description of a registered message type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    /// The registered key.
    pub kind: TypeKey,
    /// A sample instance of the type, as JSON.
    pub sample: serde_json::Value,
}

/// Resolves type keys to known message types.
pub trait SchemeRegistry: Send + Sync {
    /// Resolves a type key, failing if the type was never registered.
    fn resolve(&self, kind: &TypeKey) -> Result<TypeDescriptor, SchemeError>;

    /// Returns true if the key is registered.
    fn is_known(&self, kind: &TypeKey) -> bool {
        self.resolve(kind).is_ok()
    }
}

/// In-memory scheme registry.
#[derive(Debug, Default)]
pub struct KnownTypesRegistry {
    types: RwLock<HashMap<TypeKey, TypeDescriptor>>,
}

impl KnownTypesRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a contract type, using its `Default` value as the sample.
    pub fn register<T: Contract + Default>(&self) -> Result<(), SchemeError> {
        self.register_sample(T::type_key(), &T::default())
    }

    /// Registers a type key with an explicit sample value.
    pub fn register_sample<T: Serialize>(
        &self,
        kind: TypeKey,
        sample: &T,
    ) -> Result<(), SchemeError> {
        let sample = serde_json::to_value(sample).map_err(|e| SchemeError::Sample {
            kind: kind.clone(),
            reason: e.to_string(),
        })?;
        self.insert(TypeDescriptor { kind, sample });
        Ok(())
    }

    /// Registers a bare type key with a `null` sample.
    pub fn register_key(&self, kind: impl Into<TypeKey>) {
        self.insert(TypeDescriptor {
            kind: kind.into(),
            sample: serde_json::Value::Null,
        });
    }

    /// Returns the number of registered types.
    pub fn len(&self) -> usize {
        self.types.read().map(|t| t.len()).unwrap_or_default()
    }

    /// Returns true if no type is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, descriptor: TypeDescriptor) {
        let mut types = self.types.write().unwrap_or_else(|e| e.into_inner());
        types.insert(descriptor.kind.clone(), descriptor);
    }
}

impl SchemeRegistry for KnownTypesRegistry {
    fn resolve(&self, kind: &TypeKey) -> Result<TypeDescriptor, SchemeError> {
        let types = self.types.read().unwrap_or_else(|e| e.into_inner());
        types
            .get(kind)
            .cloned()
            .ok_or_else(|| SchemeError::UnknownType(kind.clone()))
    }
}
