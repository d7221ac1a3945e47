//! CLI commands.

pub mod ask;
pub mod explain;
pub mod model;
pub mod provider;
pub mod token;
