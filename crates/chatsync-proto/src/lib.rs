//! Types and plumbing shared by the chatsync engine and daemon: the data
//! model and wire protocol, configuration, platform paths, catalog formats
//! and the published session snapshot.

pub mod catalog;
pub mod config;
pub mod platform;
pub mod protocol;
pub mod state;
