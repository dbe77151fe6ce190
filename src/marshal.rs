//! # Resource Marshaling
//!
//! The store treats resource bodies as opaque bytes; the [`Marshaler`]
//! turns a [`Resource`] into those bytes and back. Every spec stored in
//! the resources table and every `spec_before`/`spec_after` column in the
//! event journal goes through this trait.

use crate::error::Result;
use crate::resource::Resource;

/// Opaque byte-level resource codec.
///
/// Implementations must round-trip: `unmarshal(marshal(r)) == r`. The
/// store never inspects the produced bytes.
pub trait Marshaler: Send + Sync {
    /// Encodes a resource, metadata included.
    fn marshal_resource(&self, resource: &Resource) -> Result<Vec<u8>>;

    /// Decodes a resource previously produced by [`marshal_resource`].
    ///
    /// [`marshal_resource`]: Marshaler::marshal_resource
    fn unmarshal_resource(&self, data: &[u8]) -> Result<Resource>;
}

/// JSON implementation of [`Marshaler`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaler;

impl Marshaler for JsonMarshaler {
    fn marshal_resource(&self, resource: &Resource) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(resource)?)
    }

    fn unmarshal_resource(&self, data: &[u8]) -> Result<Resource> {
        Ok(serde_json::from_slice(data)?)
    }
}
