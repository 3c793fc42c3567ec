//! Geometry elements.

use std::{fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    buffer::{pack_array, BufferAttribute, EncodeError, NumericArray},
    element::{ElementId, Registry, SceneElement},
};

/// Text mesh formats the renderer can parse from a pass-through payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFileFormat {
    Obj,
    Dae,
}

impl MeshFileFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            MeshFileFormat::Obj => "obj",
            MeshFileFormat::Dae => "dae",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "obj" => Some(MeshFileFormat::Obj),
            "dae" => Some(MeshFileFormat::Dae),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeometryKind {
    /// Axis-aligned box, lengths along x, y, z.
    Box { lengths: [f32; 3] },
    /// Point positions (3 x N) with optional per-point colors (3 x N).
    Points {
        position: NumericArray,
        color: Option<NumericArray>,
    },
    /// An external mesh file embedded verbatim.
    MeshFile {
        format: MeshFileFormat,
        contents: String,
    },
}

/// Geometry element.
#[derive(Debug, PartialEq)]
pub struct Geometry {
    id: ElementId,
    kind: GeometryKind,
}

/// A clone is a new element with the same content and a fresh id.
impl Clone for Geometry {
    fn clone(&self) -> Self {
        Self::new(self.kind.clone())
    }
}

impl Geometry {
    pub fn new(kind: GeometryKind) -> Self {
        Self {
            id: ElementId::new_unique(),
            kind,
        }
    }

    pub fn cuboid(lengths: [f32; 3]) -> Self {
        Self::new(GeometryKind::Box { lengths })
    }

    pub fn points(position: NumericArray, color: Option<NumericArray>) -> Self {
        Self::new(GeometryKind::Points { position, color })
    }

    pub fn mesh_file(format: MeshFileFormat, contents: impl Into<String>) -> Self {
        Self::new(GeometryKind::MeshFile {
            format,
            contents: contents.into(),
        })
    }

    /// Reads a mesh file; the format comes from the file extension.
    pub fn mesh_file_from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(MeshFileFormat::from_extension)
            .with_context(|| format!("unknown mesh format for {}", path.display()))?;
        let contents =
            fs::read_to_string(path).with_context(|| format!("read mesh {}", path.display()))?;
        Ok(Self::mesh_file(format, contents))
    }

    pub fn variant(&self) -> &GeometryKind {
        &self.kind
    }

    fn to_doc(&self) -> Result<GeometryDoc, EncodeError> {
        let uuid = self.id;
        Ok(match &self.kind {
            GeometryKind::Box { lengths } => GeometryDoc::Box {
                uuid,
                width: lengths[0],
                height: lengths[1],
                depth: lengths[2],
            },
            GeometryKind::Points { position, color } => GeometryDoc::Buffer {
                uuid,
                data: BufferGeometryData {
                    attributes: BufferAttributes {
                        position: pack_array(position)?,
                        color: color.as_ref().map(pack_array).transpose()?,
                    },
                },
            },
            GeometryKind::MeshFile { format, contents } => GeometryDoc::MeshFile {
                uuid,
                format: format.as_str().to_string(),
                data: contents.clone(),
            },
        })
    }
}

impl SceneElement for Geometry {
    fn id(&self) -> ElementId {
        self.id
    }

    fn lower(&self, registry: &mut Registry) -> Result<ElementId, EncodeError> {
        if registry.contains(self.id) {
            return Ok(self.id);
        }
        let doc = self.to_doc()?;
        registry.claim(self.id);
        registry.push_geometry(doc);
        Ok(self.id)
    }
}

/// Serialized geometry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeometryDoc {
    #[serde(rename = "BoxGeometry")]
    Box {
        uuid: ElementId,
        width: f32,
        height: f32,
        depth: f32,
    },
    #[serde(rename = "BufferGeometry")]
    Buffer {
        uuid: ElementId,
        data: BufferGeometryData,
    },
    #[serde(rename = "_meshfile")]
    MeshFile {
        uuid: ElementId,
        format: String,
        data: String,
    },
}

impl GeometryDoc {
    pub fn uuid(&self) -> ElementId {
        match self {
            GeometryDoc::Box { uuid, .. }
            | GeometryDoc::Buffer { uuid, .. }
            | GeometryDoc::MeshFile { uuid, .. } => *uuid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferGeometryData {
    pub attributes: BufferAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferAttributes {
    pub position: BufferAttribute,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<BufferAttribute>,
}
