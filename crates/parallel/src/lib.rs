//! # PixClass Parallel
//!
//! Tiling and thread-pool strategy for tiled inference.
//!
//! This crate provides:
//! - `TileGrid`: tile decomposition aligned to a classifier's input size
//! - `TileId`: the identity a tile is computed and cached under
//! - `ProcessingMode`: how many workers compute tiles

pub mod strategy;
pub mod tiled;

pub use strategy::{num_cpus, ProcessingMode};
pub use tiled::{TileGrid, TileId, TileIterator};
