//! Named, append-only sample series.
//!
//! A [`Buffer`] is the unit of storage on both sides of the connection: the device
//! reports one per requested buffer name, and an [`Experiment`](crate::experiment::Experiment)
//! keeps one per registered name. Buffers handed out to callers are always independent
//! copies; nothing outside the experiment ever sees its internal storage.

use serde::{Deserialize, Serialize};

/// A named sequence of `f64` samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buffer {
    name: String,
    data: Vec<f64>,
}

impl Buffer {
    /// Create a buffer holding `data`.
    pub fn new(name: impl Into<String>, data: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Create an empty buffer.
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// Buffer name (identity within an experiment).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All samples, oldest first.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Consume the buffer and return its samples.
    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Number of samples.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// `true` if the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Most recent sample, if any.
    pub fn last(&self) -> Option<f64> {
        self.data.last().copied()
    }

    /// Add new samples to the end of the buffer.
    pub fn append(&mut self, new_data: &[f64]) {
        self.data.extend_from_slice(new_data);
    }

    /// Drop every sample, keeping the name.
    pub fn reset(&mut self) {
        self.data.clear();
    }

    /// Copy of this buffer holding only the samples from `start_index` on.
    ///
    /// An index at or past the end yields an empty buffer with the same name.
    pub fn copy_from(&self, start_index: usize) -> Buffer {
        let tail = self.data.get(start_index..).unwrap_or(&[]);
        Buffer::new(self.name.clone(), tail.to_vec())
    }

    /// Find a buffer by name in a list.
    pub fn find_by_name<'a>(buffers: &'a [Buffer], name: &str) -> Option<&'a Buffer> {
        buffers.iter().find(|buffer| buffer.name == name)
    }
}
