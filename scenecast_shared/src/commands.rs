//! Scene-graph commands.
//!
//! A [`Message`] is an ordered batch of commands; the receiver applies the
//! commands of one message in order, as a unit. `SetObject` replaces
//! whatever occupied the path, `Delete` removes it.
//!
//! Paths are not validated here. The empty path addresses the root.

use serde::{Deserialize, Serialize};

use crate::{
    buffer::EncodeError,
    element::Registry,
    math::{Quat, Vec3},
    object::{Object, ObjectDoc},
    path::ScenePath,
};

/// A single scene update.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetObject {
        object: Object,
        path: ScenePath,
    },
    SetTransform {
        position: Vec3,
        quaternion: Quat,
        path: ScenePath,
    },
    Delete {
        path: ScenePath,
    },
}

impl Command {
    pub fn set_object(object: impl Into<Object>, path: impl Into<ScenePath>) -> Self {
        Command::SetObject {
            object: object.into(),
            path: path.into(),
        }
    }

    pub fn set_transform(
        position: impl Into<Vec3>,
        quaternion: impl Into<Quat>,
        path: impl Into<ScenePath>,
    ) -> Self {
        Command::SetTransform {
            position: position.into(),
            quaternion: quaternion.into(),
            path: path.into(),
        }
    }

    pub fn delete(path: impl Into<ScenePath>) -> Self {
        Command::Delete { path: path.into() }
    }

    pub fn path(&self) -> &ScenePath {
        match self {
            Command::SetObject { path, .. }
            | Command::SetTransform { path, .. }
            | Command::Delete { path } => path,
        }
    }

    /// Lowers this command on its own; the result is self-contained.
    pub fn lower(&self) -> Result<CommandDoc, EncodeError> {
        self.lower_with(&mut Registry::new())
    }

    pub fn lower_with(&self, registry: &mut Registry) -> Result<CommandDoc, EncodeError> {
        Ok(match self {
            Command::SetObject { object, path } => CommandDoc::SetObject {
                path: path.clone(),
                object: object.lower_with(registry)?,
            },
            Command::SetTransform {
                position,
                quaternion,
                path,
            } => CommandDoc::SetTransform {
                path: path.clone(),
                position: position.to_array(),
                quaternion: quaternion.to_array(),
            },
            Command::Delete { path } => CommandDoc::Delete { path: path.clone() },
        })
    }
}

/// An ordered batch of commands; the unit of transmission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    commands: Vec<Command>,
}

impl Message {
    pub fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Lowers every command in order through one shared registry, so each
    /// element record appears once per message.
    pub fn lower(&self) -> Result<MessageDoc, EncodeError> {
        let mut registry = Registry::new();
        let commands = self
            .commands
            .iter()
            .map(|c| c.lower_with(&mut registry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MessageDoc { commands })
    }
}

impl From<Vec<Command>> for Message {
    fn from(commands: Vec<Command>) -> Self {
        Self::new(commands)
    }
}

impl FromIterator<Command> for Message {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Serialized command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandDoc {
    SetObject {
        path: ScenePath,
        object: ObjectDoc,
    },
    SetTransform {
        path: ScenePath,
        position: [f32; 3],
        quaternion: [f32; 4],
    },
    Delete {
        path: ScenePath,
    },
}

impl CommandDoc {
    pub fn path(&self) -> &ScenePath {
        match self {
            CommandDoc::SetObject { path, .. }
            | CommandDoc::SetTransform { path, .. }
            | CommandDoc::Delete { path } => path,
        }
    }
}

/// Serialized message: `{"commands": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDoc {
    pub commands: Vec<CommandDoc>,
}
