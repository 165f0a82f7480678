//! Serializer registry.
//!
//! Typed payloads are dispatched through an explicit tag map: each
//! registered serializer binds one non-zero type tag to one Rust type, with
//! an encoder and a decoder. Typed scans filter on the registered tag set
//! for a type; nothing is inferred from payload contents.
//!
//! Tag 0 is reserved for raw byte records and cannot be registered.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::header::RAW_TYPE_TAG;
use crate::record::Record;

/// Encoder/decoder for one registered payload type.
///
/// Implementations are registered under a stable, non-zero tag that is
/// written into every frame carrying this type. Decoding a frame written by
/// an earlier run requires registering the same tag again.
pub trait Serializer: Send + Sync + 'static {
    /// The non-zero tag written into frames carrying this type.
    fn type_tag(&self) -> u64;

    /// The concrete Rust type this serializer produces and consumes.
    fn type_id(&self) -> TypeId;

    /// Diagnostic name of the payload type.
    fn type_name(&self) -> &'static str;

    fn encode(&self, value: &dyn Any) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Any + Send>>;
}

/// Maps type tags to serializers and Rust types to their tag sets.
#[derive(Default)]
pub struct SerializerRegistry {
    by_tag: HashMap<u64, Arc<dyn Serializer>>,
    tags_by_type: HashMap<TypeId, Vec<u64>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a serializer under its tag.
    ///
    /// Rejects tag 0 (reserved for raw records) and tags that are already
    /// bound.
    pub fn register(&mut self, serializer: Arc<dyn Serializer>) -> Result<()> {
        let tag = serializer.type_tag();
        if tag == RAW_TYPE_TAG {
            return Err(Error::InvalidArgument("type tag 0 is reserved for raw records"));
        }
        if self.by_tag.contains_key(&tag) {
            return Err(Error::InvalidArgument("type tag already registered"));
        }
        self.tags_by_type
            .entry(Serializer::type_id(&*serializer))
            .or_default()
            .push(tag);
        self.by_tag.insert(tag, serializer);
        Ok(())
    }

    pub fn by_tag(&self, tag: u64) -> Option<&Arc<dyn Serializer>> {
        self.by_tag.get(&tag)
    }

    /// All tags registered for a Rust type. Empty when none are.
    pub fn tags_for(&self, type_id: TypeId) -> &[u64] {
        self.tags_by_type
            .get(&type_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Encode a value through its registered serializer.
    ///
    /// Fails with `NoEncoder` when `T` is not registered.
    pub fn encode_value<T: 'static>(&self, value: &T) -> Result<(u64, Vec<u8>)> {
        let tag = *self
            .tags_for(TypeId::of::<T>())
            .first()
            .ok_or(Error::NoEncoder(std::any::type_name::<T>()))?;
        let serializer = self.by_tag.get(&tag).expect("tag maps are consistent");
        Ok((tag, serializer.encode(value)?))
    }

    /// Decode a payload written under `tag` into `T`.
    ///
    /// Fails with `NoDecoder` when the tag is unregistered or registered to
    /// a different type.
    pub fn decode_value<T: 'static>(&self, tag: u64, bytes: &[u8]) -> Result<T> {
        let serializer = self.by_tag.get(&tag).ok_or(Error::NoDecoder(tag))?;
        let value = serializer.decode(bytes)?;
        value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| Error::NoDecoder(tag))
    }

    /// Decode a record's payload into `T`.
    pub fn decode_record<T: 'static>(&self, record: &Record) -> Result<T> {
        self.decode_value(record.type_tag, &record.payload)
    }
}

/// JSON-backed serializer for any serde type.
#[cfg(feature = "json")]
pub struct JsonSerializer<T> {
    tag: u64,
    _marker: std::marker::PhantomData<fn() -> T>,
}

#[cfg(feature = "json")]
impl<T> JsonSerializer<T> {
    pub fn new(tag: u64) -> Self {
        Self {
            tag,
            _marker: std::marker::PhantomData,
        }
    }
}

#[cfg(feature = "json")]
impl<T> Serializer for JsonSerializer<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + 'static,
{
    fn type_tag(&self) -> u64 {
        self.tag
    }

    fn type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn encode(&self, value: &dyn Any) -> Result<Vec<u8>> {
        let value = value
            .downcast_ref::<T>()
            .ok_or(Error::NoEncoder(std::any::type_name::<T>()))?;
        serde_json::to_vec(value).map_err(|_| Error::InvalidArgument("value not representable as json"))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Any + Send>> {
        let value: T =
            serde_json::from_slice(bytes).map_err(|_| Error::Corrupt("invalid json payload"))?;
        Ok(Box::new(value))
    }
}
