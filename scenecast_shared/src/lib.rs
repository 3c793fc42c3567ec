//! `scenecast_shared`
//!
//! Everything a producer needs to describe scene updates:
//! - Scene elements (geometry, material, texture, image) and objects
//! - Typed numeric buffers and their wire encoding
//! - Addressed commands batched into messages
//! - The MessagePack codec
//!
//! Design goals:
//! - Pure and I/O-free apart from the file-loading helpers.
//! - Deterministic lowering: the same message always yields the same document
//!   (element ids aside, which are fixed at construction).
//! - No `unsafe`.

pub mod buffer;
pub mod commands;
pub mod config;
pub mod element;
pub mod geometry;
pub mod material;
pub mod math;
pub mod net;
pub mod object;
pub mod path;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::buffer::{ArrayData, EncodeError, NumericArray};
    pub use crate::commands::{Command, Message};
    pub use crate::config::PoolConfig;
    pub use crate::element::{ElementId, SceneElement};
    pub use crate::geometry::{Geometry, MeshFileFormat};
    pub use crate::material::{Image, Material, Properties, Shading, Texture};
    pub use crate::math::{Quat, Vec3};
    pub use crate::net::pack_message;
    pub use crate::object::Object;
    pub use crate::path::ScenePath;
}
