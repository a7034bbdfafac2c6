//! Result conversion: raw BSON records to domain values.
//!
//! A [`ConverterService`] picks a converter for each conversion in this order:
//!
//! 1. the converter the query names (`converter` / `method` attributes), which must be
//!    registered for the requested type
//! 2. a converter registered for the requested type
//! 3. the default converter, if one is configured
//!
//! and fails with `NoConverterFound` otherwise.

use crate::query::ConverterRef;
use bson::Document as BsonDocument;
use mingo_common::{MingoError, Result};
use serde::de::DeserializeOwned;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Converts one raw record into a `T`
pub trait Converter<T>: Send + Sync {
    fn convert(&self, record: BsonDocument) -> Result<T>;
}

impl<T, F> Converter<T> for F
where
    F: Fn(BsonDocument) -> Result<T> + Send + Sync,
{
    fn convert(&self, record: BsonDocument) -> Result<T> {
        self(record)
    }
}

/// Fallback converter used when nothing more specific is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultConverter {
    /// `bson::from_document` through the type's `Deserialize` impl
    #[default]
    Serde,
}

impl DefaultConverter {
    /// Parse `defaultConverter@class`: `default` / `serde`, or `none` to disable
    pub fn from_config(class: &str) -> Result<Option<Self>> {
        match class.trim() {
            "default" | "serde" => Ok(Some(DefaultConverter::Serde)),
            "none" => Ok(None),
            other => Err(MingoError::Parse(format!("unknown default converter '{}'", other))),
        }
    }

    pub fn convert<T: DeserializeOwned>(&self, record: BsonDocument) -> Result<T> {
        match self {
            DefaultConverter::Serde => bson::from_document(record)
                .map_err(|e| MingoError::Deserialization(format!("{}: {}", type_name::<T>(), e))),
        }
    }
}

/// Type-erased `Arc<dyn Converter<T>>`
type Erased = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NamedKey {
    name: String,
    method: Option<String>,
}

/// Registry of converters
#[derive(Clone, Default)]
pub struct ConverterService {
    by_type: HashMap<TypeId, Erased>,
    named: HashMap<NamedKey, Erased>,
    default: Option<DefaultConverter>,
}

impl fmt::Debug for ConverterService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterService")
            .field("typed", &self.by_type.len())
            .field("named", &self.named.keys().collect::<Vec<_>>())
            .field("default", &self.default)
            .finish()
    }
}

impl ConverterService {
    /// Empty registry with the serde default converter
    pub fn new() -> Self {
        Self {
            default: Some(DefaultConverter::Serde),
            ..Self::default()
        }
    }

    /// Empty registry without a default converter
    pub fn without_default() -> Self {
        Self::default()
    }

    pub fn set_default(&mut self, default: Option<DefaultConverter>) -> &mut Self {
        self.default = default;
        self
    }

    pub fn default_converter(&self) -> Option<DefaultConverter> {
        self.default
    }

    /// Register the converter used for `T` when a query names none
    pub fn register<T: 'static>(&mut self, converter: impl Converter<T> + 'static) -> &mut Self {
        let converter: Arc<dyn Converter<T>> = Arc::new(converter);
        self.by_type.insert(TypeId::of::<T>(), Arc::new(converter));
        self
    }

    /// Register a converter queries can name with `converter="name"`
    pub fn register_named<T: 'static>(
        &mut self,
        name: impl Into<String>,
        converter: impl Converter<T> + 'static,
    ) -> &mut Self {
        self.insert_named(
            NamedKey {
                name: name.into(),
                method: None,
            },
            converter,
        )
    }

    /// Register a converter queries can name with `converter="name" method="method"`
    pub fn register_method<T: 'static>(
        &mut self,
        name: impl Into<String>,
        method: impl Into<String>,
        converter: impl Converter<T> + 'static,
    ) -> &mut Self {
        self.insert_named(
            NamedKey {
                name: name.into(),
                method: Some(method.into()),
            },
            converter,
        )
    }

    fn insert_named<T: 'static>(&mut self, key: NamedKey, converter: impl Converter<T> + 'static) -> &mut Self {
        let converter: Arc<dyn Converter<T>> = Arc::new(converter);
        self.named.insert(key, Arc::new(converter));
        self
    }

    pub fn has_named(&self, reference: &ConverterRef) -> bool {
        self.named.contains_key(&NamedKey {
            name: reference.name.clone(),
            method: reference.method.clone(),
        })
    }

    fn lookup_named<T: 'static>(&self, reference: &ConverterRef) -> Result<Arc<dyn Converter<T>>> {
        let key = NamedKey {
            name: reference.name.clone(),
            method: reference.method.clone(),
        };
        let erased = self.named.get(&key).ok_or_else(|| {
            MingoError::NoConverterFound(format!("no converter registered as '{}'", reference))
        })?;
        erased
            .downcast_ref::<Arc<dyn Converter<T>>>()
            .cloned()
            .ok_or_else(|| {
                MingoError::NoConverterFound(format!(
                    "converter '{}' does not produce {}",
                    reference,
                    type_name::<T>()
                ))
            })
    }

    fn lookup_typed<T: 'static>(&self) -> Option<Arc<dyn Converter<T>>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|erased| erased.downcast_ref::<Arc<dyn Converter<T>>>())
            .cloned()
    }

    /// Resolve the conversion for `T` once, for use over many records
    pub fn resolve<T>(&self, reference: Option<&ConverterRef>) -> Result<Resolved<T>>
    where
        T: DeserializeOwned + 'static,
    {
        if let Some(reference) = reference {
            return self.lookup_named(reference).map(Resolved::Registered);
        }
        if let Some(converter) = self.lookup_typed() {
            return Ok(Resolved::Registered(converter));
        }
        match self.default {
            Some(default) => Ok(Resolved::Default(default)),
            None => Err(MingoError::NoConverterFound(format!(
                "no converter for {} and no default converter configured",
                type_name::<T>()
            ))),
        }
    }

    /// Convert one record
    pub fn convert<T>(&self, record: BsonDocument, reference: Option<&ConverterRef>) -> Result<T>
    where
        T: DeserializeOwned + 'static,
    {
        self.resolve(reference)?.convert(record)
    }
}

/// The converter chosen for one result type
pub enum Resolved<T> {
    Registered(Arc<dyn Converter<T>>),
    Default(DefaultConverter),
}

impl<T: DeserializeOwned> Resolved<T> {
    pub fn convert(&self, record: BsonDocument) -> Result<T> {
        match self {
            Resolved::Registered(converter) => converter.convert(record),
            Resolved::Default(default) => default.convert(record),
        }
    }
}
