//! Local storage for mirrored sample series.
pub mod buffer;

pub use buffer::Buffer;
