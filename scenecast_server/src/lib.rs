//! `scenecast_server`
//!
//! Producer-side transport:
//! - `BroadcastPool`: websocket listener plus live connection set, fanning
//!   each submitted message out to every renderer attached at the time
//! - `Visualizer`: path-scoped handle that packs commands and submits them
//!
//! Networking model:
//! - One websocket endpoint per pool, binary frames only
//! - Renderers only receive; anything they send is discarded

pub mod pool;
pub mod visualizer;

pub use pool::{BroadcastPool, PassReport, PoolError};
pub use visualizer::Visualizer;
