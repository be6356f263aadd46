//! Common utilities and data structures shared by the tilenav crates

mod bounds;
mod codec;
mod math;

pub use bounds::BoundingBox;
pub use codec::{ByteReader, ByteWriter};
pub use math::{calc_grid_size, ilog2, next_power_of_two};

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("out of slots: {0}")]
    OutOfSlots(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("tile build failed: {0}")]
    Build(String),

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("wrong magic number")]
    WrongMagic,

    #[error("unsupported format version {0}")]
    WrongVersion(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tilenav operations
pub type Result<T> = std::result::Result<T, Error>;
