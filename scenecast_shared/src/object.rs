//! Renderable objects: one geometry plus one material.

use std::sync::Arc;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    buffer::{EncodeError, NumericArray},
    element::{ElementId, Registry, SceneElement},
    geometry::{Geometry, GeometryDoc},
    material::{ImageDoc, Material, MaterialDoc, TextureDoc},
};

/// Version of the object JSON format the renderer's loader expects.
pub const OBJECT_FORMAT_VERSION: f64 = 4.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Mesh,
    Points,
}

impl ObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Mesh => "Mesh",
            ObjectType::Points => "Points",
        }
    }
}

impl Serialize for ObjectType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ObjectType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match String::deserialize(deserializer)?.as_str() {
            "Mesh" => Ok(ObjectType::Mesh),
            "Points" => Ok(ObjectType::Points),
            other => Err(de::Error::unknown_variant(other, &["Mesh", "Points"])),
        }
    }
}

/// A geometry drawn with a material.
#[derive(Debug, PartialEq)]
pub struct Object {
    id: ElementId,
    object_type: ObjectType,
    geometry: Arc<Geometry>,
    material: Arc<Material>,
}

/// A clone is a new object sharing the same geometry and material.
impl Clone for Object {
    fn clone(&self) -> Self {
        Self::new(
            self.object_type,
            Arc::clone(&self.geometry),
            Arc::clone(&self.material),
        )
    }
}

impl Object {
    pub fn new(
        object_type: ObjectType,
        geometry: impl Into<Arc<Geometry>>,
        material: impl Into<Arc<Material>>,
    ) -> Self {
        Self {
            id: ElementId::new_unique(),
            object_type,
            geometry: geometry.into(),
            material: material.into(),
        }
    }

    pub fn mesh(geometry: impl Into<Arc<Geometry>>, material: impl Into<Arc<Material>>) -> Self {
        Self::new(ObjectType::Mesh, geometry, material)
    }

    pub fn points(
        geometry: impl Into<Arc<Geometry>>,
        material: impl Into<Arc<Material>>,
    ) -> Self {
        Self::new(ObjectType::Points, geometry, material)
    }

    /// Points object from 3 x N positions and optional 3 x N colors.
    pub fn point_cloud(position: NumericArray, color: Option<NumericArray>, size: f32) -> Self {
        Self::points(
            Geometry::points(position, color),
            Material::points(size, 0xffffff),
        )
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn geometry(&self) -> &Arc<Geometry> {
        &self.geometry
    }

    pub fn material(&self) -> &Arc<Material> {
        &self.material
    }

    /// Lowers into a fresh registry, so the document carries every record
    /// it references.
    pub fn lower(&self) -> Result<ObjectDoc, EncodeError> {
        self.lower_with(&mut Registry::new())
    }

    /// Lowers into a shared registry. Records already present in `registry`
    /// are referenced by id only.
    pub fn lower_with(&self, registry: &mut Registry) -> Result<ObjectDoc, EncodeError> {
        let geometry = self.geometry.lower(registry)?;
        let material = self.material.lower(registry)?;
        let records = registry.take_records();
        Ok(ObjectDoc {
            metadata: ObjectMetadata::default(),
            geometries: records.geometries,
            materials: records.materials,
            textures: records.textures,
            images: records.images,
            object: ObjectNode {
                uuid: self.id,
                object_type: self.object_type,
                geometry,
                material,
            },
        })
    }
}

/// A bare geometry becomes a mesh with the default material.
impl From<Geometry> for Object {
    fn from(geometry: Geometry) -> Self {
        Object::mesh(geometry, Material::default())
    }
}

impl From<Arc<Geometry>> for Object {
    fn from(geometry: Arc<Geometry>) -> Self {
        Object::mesh(geometry, Material::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub version: f64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Default for ObjectMetadata {
    fn default() -> Self {
        Self {
            version: OBJECT_FORMAT_VERSION,
            kind: "Object".to_string(),
        }
    }
}

/// Serialized object, in the renderer's object-loader layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDoc {
    pub metadata: ObjectMetadata,
    pub geometries: Vec<GeometryDoc>,
    pub materials: Vec<MaterialDoc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub textures: Vec<TextureDoc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageDoc>,
    pub object: ObjectNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectNode {
    pub uuid: ElementId,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub geometry: ElementId,
    pub material: ElementId,
}
