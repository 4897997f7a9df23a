//! Serializable types that cross the engine boundary.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them to a UI or log them as JSON lines.

pub mod events;
