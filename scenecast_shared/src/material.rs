//! Materials, textures and images.
//!
//! A material may reference a texture, and a texture references an image.
//! References are shared (`Arc`), not owned: the same texture can back any
//! number of materials.
//!
//! Materials and textures carry a free-form property map that is written
//! into their record next to the typed fields (e.g. `opacity`, `transparent`,
//! `wireframe`). Typed fields win over a property with the same key.

use std::{fs, path::Path, sync::Arc};

use anyhow::Context;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{
    buffer::EncodeError,
    element::{ElementId, Registry, SceneElement},
};

/// `THREE.ClampToEdgeWrapping`.
pub const CLAMP_TO_EDGE_WRAPPING: u32 = 1001;

/// `THREE.VertexColors`.
const VERTEX_COLORS: u32 = 2;

/// Extra record properties, passed through to the renderer as-is.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Copy of `properties` without the keys the typed record already sets.
fn extra_properties(properties: &Properties, taken: &[&str]) -> Properties {
    properties
        .iter()
        .filter(|(k, _)| !taken.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Image element. Only PNG is supported.
#[derive(Debug, PartialEq)]
pub struct Image {
    id: ElementId,
    png: Vec<u8>,
}

impl Image {
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            id: ElementId::new_unique(),
            png: data,
        }
    }

    pub fn png_from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).with_context(|| format!("read image {}", path.display()))?;
        Ok(Self::png(data))
    }

    fn data_url(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.png)
        )
    }
}

/// A clone is a new element with the same content and a fresh id.
impl Clone for Image {
    fn clone(&self) -> Self {
        Self::png(self.png.clone())
    }
}

impl SceneElement for Image {
    fn id(&self) -> ElementId {
        self.id
    }

    fn lower(&self, registry: &mut Registry) -> Result<ElementId, EncodeError> {
        if registry.claim(self.id) {
            registry.push_image(ImageDoc {
                uuid: self.id,
                url: self.data_url(),
            });
        }
        Ok(self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextureKind {
    /// Image texture with wrap modes and repeat counts.
    Image {
        image: Arc<Image>,
        wrap: [u32; 2],
        repeat: [u32; 2],
    },
    /// Any other renderer texture, described by its properties.
    Generic { image: Option<Arc<Image>> },
}

/// Texture element.
#[derive(Debug, PartialEq)]
pub struct Texture {
    id: ElementId,
    kind: TextureKind,
    properties: Properties,
}

impl Texture {
    pub fn new(kind: TextureKind, properties: Properties) -> Self {
        Self {
            id: ElementId::new_unique(),
            kind,
            properties,
        }
    }

    pub fn from_image(image: impl Into<Arc<Image>>) -> Self {
        Self::new(
            TextureKind::Image {
                image: image.into(),
                wrap: [CLAMP_TO_EDGE_WRAPPING; 2],
                repeat: [1, 1],
            },
            Properties::new(),
        )
    }

    pub fn generic(image: Option<Arc<Image>>, properties: Properties) -> Self {
        Self::new(TextureKind::Generic { image }, properties)
    }

    /// No effect on generic textures; set `wrap` as a property there.
    pub fn with_wrap(mut self, value: [u32; 2]) -> Self {
        if let TextureKind::Image { wrap, .. } = &mut self.kind {
            *wrap = value;
        }
        self
    }

    pub fn with_repeat(mut self, value: [u32; 2]) -> Self {
        if let TextureKind::Image { repeat, .. } = &mut self.kind {
            *repeat = value;
        }
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn image(&self) -> Option<&Arc<Image>> {
        match &self.kind {
            TextureKind::Image { image, .. } => Some(image),
            TextureKind::Generic { image } => image.as_ref(),
        }
    }

    pub fn variant(&self) -> &TextureKind {
        &self.kind
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl Clone for Texture {
    fn clone(&self) -> Self {
        Self::new(self.kind.clone(), self.properties.clone())
    }
}

impl SceneElement for Texture {
    fn id(&self) -> ElementId {
        self.id
    }

    fn lower(&self, registry: &mut Registry) -> Result<ElementId, EncodeError> {
        if registry.contains(self.id) {
            return Ok(self.id);
        }
        let image = self.image().map(|i| i.lower(registry)).transpose()?;
        let doc = match &self.kind {
            TextureKind::Image { wrap, repeat, .. } => TextureDoc {
                uuid: self.id,
                wrap: Some(*wrap),
                repeat: Some(*repeat),
                image,
                properties: extra_properties(
                    &self.properties,
                    &["uuid", "wrap", "repeat", "image"],
                ),
            },
            TextureKind::Generic { .. } => {
                let taken: &[&str] = if image.is_some() {
                    &["uuid", "image"]
                } else {
                    &["uuid"]
                };
                TextureDoc {
                    uuid: self.id,
                    wrap: None,
                    repeat: None,
                    image,
                    properties: extra_properties(&self.properties, taken),
                }
            }
        };
        registry.claim(self.id);
        registry.push_texture(doc);
        Ok(self.id)
    }
}

/// Shading model of a mesh material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shading {
    Basic,
    Phong,
    Lambert,
    Toon,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MaterialKind {
    Mesh {
        shading: Shading,
        color: u32,
        reflectivity: f32,
        map: Option<Arc<Texture>>,
    },
    Points {
        size: f32,
        color: u32,
    },
    /// Any renderer material type, e.g. `LineBasicMaterial`, described by
    /// its properties.
    Generic {
        type_name: String,
        map: Option<Arc<Texture>>,
    },
}

/// Material element.
#[derive(Debug, PartialEq)]
pub struct Material {
    id: ElementId,
    kind: MaterialKind,
    properties: Properties,
}

impl Material {
    pub fn new(kind: MaterialKind) -> Self {
        Self {
            id: ElementId::new_unique(),
            kind,
            properties: Properties::new(),
        }
    }

    pub fn mesh(shading: Shading, color: u32) -> Self {
        Self::new(MaterialKind::Mesh {
            shading,
            color,
            reflectivity: 0.5,
            map: None,
        })
    }

    pub fn basic(color: u32) -> Self {
        Self::mesh(Shading::Basic, color)
    }

    pub fn phong(color: u32) -> Self {
        Self::mesh(Shading::Phong, color)
    }

    pub fn lambert(color: u32) -> Self {
        Self::mesh(Shading::Lambert, color)
    }

    pub fn toon(color: u32) -> Self {
        Self::mesh(Shading::Toon, color)
    }

    pub fn points(size: f32, color: u32) -> Self {
        Self::new(MaterialKind::Points { size, color })
    }

    pub fn generic(type_name: impl Into<String>, properties: Properties) -> Self {
        Self {
            properties,
            ..Self::new(MaterialKind::Generic {
                type_name: type_name.into(),
                map: None,
            })
        }
    }

    /// Attaches a texture map. No effect on points materials.
    pub fn with_map(mut self, texture: impl Into<Arc<Texture>>) -> Self {
        match &mut self.kind {
            MaterialKind::Mesh { map, .. } | MaterialKind::Generic { map, .. } => {
                *map = Some(texture.into())
            }
            MaterialKind::Points { .. } => {}
        }
        self
    }

    pub fn with_reflectivity(mut self, value: f32) -> Self {
        if let MaterialKind::Mesh { reflectivity, .. } = &mut self.kind {
            *reflectivity = value;
        }
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn variant(&self) -> &MaterialKind {
        &self.kind
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::phong(0xffffff)
    }
}

/// A clone is a new element: same kind and properties, fresh id. Textures
/// stay shared.
impl Clone for Material {
    fn clone(&self) -> Self {
        Self {
            properties: self.properties.clone(),
            ..Self::new(self.kind.clone())
        }
    }
}

impl SceneElement for Material {
    fn id(&self) -> ElementId {
        self.id
    }

    fn lower(&self, registry: &mut Registry) -> Result<ElementId, EncodeError> {
        if registry.contains(self.id) {
            return Ok(self.id);
        }
        let uuid = self.id;
        let doc = match &self.kind {
            MaterialKind::Mesh {
                shading,
                color,
                reflectivity,
                map,
            } => {
                let map = map.as_ref().map(|t| t.lower(registry)).transpose()?;
                let body = MeshMaterialDoc {
                    uuid,
                    color: *color,
                    reflectivity: *reflectivity,
                    properties: extra_properties(
                        &self.properties,
                        &["uuid", "type", "color", "reflectivity", "map"],
                    ),
                    map,
                };
                match shading {
                    Shading::Basic => MaterialDoc::MeshBasic(body),
                    Shading::Phong => MaterialDoc::MeshPhong(body),
                    Shading::Lambert => MaterialDoc::MeshLambert(body),
                    Shading::Toon => MaterialDoc::MeshToon(body),
                }
            }
            MaterialKind::Points { size, color } => MaterialDoc::Points(PointsMaterialDoc {
                uuid,
                color: *color,
                size: *size,
                vertex_colors: VERTEX_COLORS,
                properties: extra_properties(
                    &self.properties,
                    &["uuid", "type", "color", "size", "vertexColors"],
                ),
            }),
            MaterialKind::Generic { type_name, map } => {
                let map = map.as_ref().map(|t| t.lower(registry)).transpose()?;
                let taken: &[&str] = if map.is_some() {
                    &["uuid", "type", "map"]
                } else {
                    &["uuid", "type"]
                };
                MaterialDoc::Generic(GenericMaterialDoc {
                    type_name: type_name.clone(),
                    uuid,
                    map,
                    properties: extra_properties(&self.properties, taken),
                })
            }
        };
        registry.claim(self.id);
        registry.push_material(doc);
        Ok(self.id)
    }
}

/// Serialized material record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MaterialDoc {
    #[serde(rename = "MeshBasicMaterial")]
    MeshBasic(MeshMaterialDoc),
    #[serde(rename = "MeshPhongMaterial")]
    MeshPhong(MeshMaterialDoc),
    #[serde(rename = "MeshLambertMaterial")]
    MeshLambert(MeshMaterialDoc),
    #[serde(rename = "MeshToonMaterial")]
    MeshToon(MeshMaterialDoc),
    #[serde(rename = "PointsMaterial")]
    Points(PointsMaterialDoc),
    /// Carries its own `type`.
    #[serde(untagged)]
    Generic(GenericMaterialDoc),
}

impl MaterialDoc {
    pub fn uuid(&self) -> ElementId {
        match self {
            MaterialDoc::MeshBasic(m)
            | MaterialDoc::MeshPhong(m)
            | MaterialDoc::MeshLambert(m)
            | MaterialDoc::MeshToon(m) => m.uuid,
            MaterialDoc::Points(p) => p.uuid,
            MaterialDoc::Generic(g) => g.uuid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshMaterialDoc {
    pub uuid: ElementId,
    pub color: u32,
    pub reflectivity: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<ElementId>,
    #[serde(flatten)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsMaterialDoc {
    pub uuid: ElementId,
    pub color: u32,
    pub size: f32,
    #[serde(rename = "vertexColors")]
    pub vertex_colors: u32,
    #[serde(flatten)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericMaterialDoc {
    #[serde(rename = "type")]
    pub type_name: String,
    pub uuid: ElementId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<ElementId>,
    #[serde(flatten)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureDoc {
    pub uuid: ElementId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ElementId>,
    #[serde(flatten)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDoc {
    pub uuid: ElementId,
    pub url: String,
}
