//! Scene elements and the per-message dependency registry.
//!
//! Every element (geometry, material, texture, image) gets a unique id when
//! it is constructed. Lowering an element writes its record into a
//! [`Registry`] and returns the id so the parent can link to it.
//!
//! Elements reference each other through `Arc`s along a fixed chain
//! (material -> texture -> image), so the reference graph cannot contain a
//! cycle or a self-reference.

use std::{collections::HashSet, fmt};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::{
    buffer::EncodeError,
    geometry::GeometryDoc,
    material::{ImageDoc, MaterialDoc, TextureDoc},
};

/// Opaque element id, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(Uuid);

impl ElementId {
    pub fn new_unique() -> Self {
        ElementId(Uuid::new_v4())
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

// Always a string on the wire, whatever the format's human-readable flag says.
impl Serialize for ElementId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ElementId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Uuid::parse_str(&s).map(ElementId).map_err(de::Error::custom)
    }
}

/// Records written by one object's lowering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Records {
    pub geometries: Vec<GeometryDoc>,
    pub materials: Vec<MaterialDoc>,
    pub textures: Vec<TextureDoc>,
    pub images: Vec<ImageDoc>,
}

/// Deduplicating dependency registry.
///
/// One registry spans a whole message. A record is inserted only the first
/// time its id is seen; later references just link to the id.
#[derive(Debug, Default)]
pub struct Registry {
    seen: HashSet<ElementId>,
    pending: Records,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.seen.contains(&id)
    }

    /// Marks `id` as registered. Returns `false` if it already was.
    pub(crate) fn claim(&mut self, id: ElementId) -> bool {
        self.seen.insert(id)
    }

    pub(crate) fn push_geometry(&mut self, doc: GeometryDoc) {
        self.pending.geometries.push(doc);
    }

    pub(crate) fn push_material(&mut self, doc: MaterialDoc) {
        self.pending.materials.push(doc);
    }

    pub(crate) fn push_texture(&mut self, doc: TextureDoc) {
        self.pending.textures.push(doc);
    }

    pub(crate) fn push_image(&mut self, doc: ImageDoc) {
        self.pending.images.push(doc);
    }

    /// Moves out records written since the last call. Seen ids are kept.
    pub fn take_records(&mut self) -> Records {
        std::mem::take(&mut self.pending)
    }

    /// Number of distinct elements registered so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// An element that can be lowered into a registry.
pub trait SceneElement {
    fn id(&self) -> ElementId;

    /// Writes this element (and its dependencies) into `registry` unless it
    /// is already there, and returns its id.
    fn lower(&self, registry: &mut Registry) -> Result<ElementId, EncodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let ids: HashSet<ElementId> = (0..1000).map(|_| ElementId::new_unique()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn id_serializes_as_uuid_string() {
        let id = ElementId::new_unique();
        let bytes = rmp_serde::to_vec(&id).unwrap();
        let s: String = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(s, id.to_string());
        assert_eq!(s.len(), 36);
        let back: ElementId = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn claim_is_insert_if_absent() {
        let mut registry = Registry::new();
        let id = ElementId::new_unique();
        assert!(registry.claim(id));
        assert!(!registry.claim(id));
        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);
    }
}
