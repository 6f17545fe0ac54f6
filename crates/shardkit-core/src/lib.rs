//! Shardkit Core - identifiers and settings shared by the shardkit crates
//!
//! This crate provides the shard naming model (`ShardGroupName`,
//! `ShardName`, `ShardKey`) and the process-level `ShardingConfig`.

pub mod config;
pub mod shard;

pub use config::{ShardingConfig, DEFAULT_ENVIRONMENT, DEFAULT_SHARDS_CONFIG_FILE};
pub use shard::{normalize, ShardGroupName, ShardKey, ShardName, ShardPart, KEY_SEPARATOR};
