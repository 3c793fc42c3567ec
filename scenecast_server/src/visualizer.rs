//! Path-scoped producer handle.
//!
//! A [`Visualizer`] pairs a pool with a scene path. Every call builds one
//! message addressed at that path, packs it and broadcasts it, blocking until
//! the pass is over.

use std::sync::Arc;

use anyhow::Context;
use scenecast_shared::{
    commands::{Command, Message},
    math::{Quat, Vec3},
    net::pack_message,
    object::Object,
    path::ScenePath,
};
use tracing::debug;

use crate::pool::{BroadcastPool, PassReport};

/// Root segment every visualizer path starts under.
pub const DEFAULT_ROOT: &str = "scenecast";

#[derive(Clone)]
pub struct Visualizer {
    pool: Arc<BroadcastPool>,
    path: ScenePath,
}

impl Visualizer {
    pub fn new(pool: impl Into<Arc<BroadcastPool>>) -> Self {
        Self {
            pool: pool.into(),
            path: ScenePath::from([DEFAULT_ROOT]),
        }
    }

    /// Handle for a descendant path. `rel` is split on `/` and appended.
    pub fn at(&self, rel: &str) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            path: self.path.join(&ScenePath::parse(rel)),
        }
    }

    pub fn path(&self) -> &ScenePath {
        &self.path
    }

    pub fn pool(&self) -> &Arc<BroadcastPool> {
        &self.pool
    }

    pub fn ws_url(&self) -> String {
        self.pool.ws_url()
    }

    /// Packs `commands` as one message and broadcasts it.
    pub fn send(&self, commands: Vec<Command>) -> anyhow::Result<PassReport> {
        let message = Message::new(commands);
        let payload = pack_message(&message)
            .with_context(|| format!("pack message for {}", self.path))?;
        debug!(path = %self.path, commands = message.len(), bytes = payload.len(), "Submitting");
        Ok(self.pool.submit(payload))
    }

    pub fn set_object(&self, object: impl Into<Object>) -> anyhow::Result<PassReport> {
        self.send(vec![Command::set_object(object, self.path.clone())])
    }

    /// `None` keeps the origin / identity rotation.
    pub fn set_transform(
        &self,
        position: Option<Vec3>,
        quaternion: Option<Quat>,
    ) -> anyhow::Result<PassReport> {
        self.send(vec![Command::set_transform(
            position.unwrap_or(Vec3::ZERO),
            quaternion.unwrap_or(Quat::IDENTITY),
            self.path.clone(),
        )])
    }

    pub fn delete(&self) -> anyhow::Result<PassReport> {
        self.send(vec![Command::delete(self.path.clone())])
    }
}
