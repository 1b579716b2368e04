#![warn(missing_docs)]

//! KeelFS metadata authority: consensus-replicated hierarchical namespace,
//! block placement, datanode liveness, and image checkpointing.

pub mod arena;
pub mod blocks;
pub mod checkpoint;
pub mod config;
pub mod consensus;
pub mod datanode;
pub mod dispatch;
pub mod image;
pub mod inode;
pub mod namespace;
pub mod ops;
pub mod pathkey;
pub mod permission;
pub mod server;
pub mod service;
pub mod statemachine;
pub mod timer;
pub mod types;

pub use config::NamenodeConfig;
pub use server::Namenode;
pub use types::{NnError, Status};
