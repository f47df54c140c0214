//! Mirrored buffers and per-buffer read cursors.
//!
//! `BufferState` is plain data; [`Experiment`](super::Experiment) keeps it behind one mutex
//! and every poller merge and reader call goes through that lock.

use crate::connection::{DataRequest, RequestBuilder};
use crate::data::Buffer;
use crate::error::{SyncError, SyncResult};
use tracing::{debug, warn};

/// Selects a registered buffer by name or by registration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRef<'a> {
    /// Buffer name
    Name(&'a str),
    /// Registration index
    Index(usize),
}

impl<'a> From<&'a str> for BufferRef<'a> {
    fn from(name: &'a str) -> Self {
        BufferRef::Name(name)
    }
}

impl<'a> From<&'a String> for BufferRef<'a> {
    fn from(name: &'a String) -> Self {
        BufferRef::Name(name.as_str())
    }
}

impl From<usize> for BufferRef<'_> {
    fn from(index: usize) -> Self {
        BufferRef::Index(index)
    }
}

#[derive(Debug)]
pub(crate) struct BufferState {
    buffers: Vec<Buffer>,
    // Index of the next sample to hand out on an incremental read; None = nothing read yet.
    last_read: Vec<Option<usize>>,
    continuous_index: Option<usize>,
    last_continuous_value: Option<f64>,
}

impl BufferState {
    pub(crate) fn new(names: &[String], continuous_index: Option<usize>) -> Self {
        Self {
            buffers: names.iter().map(Buffer::empty).collect(),
            last_read: vec![None; names.len()],
            continuous_index,
            last_continuous_value: None,
        }
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.buffers.iter().map(|b| b.name().to_string()).collect()
    }

    pub(crate) fn continuous_index(&self) -> Option<usize> {
        self.continuous_index
    }

    pub(crate) fn last_continuous_value(&self) -> Option<f64> {
        self.last_continuous_value
    }

    pub(crate) fn forget_continuous_value(&mut self) {
        self.last_continuous_value = None;
    }

    /// Polls replace whole buffers when there is no continuous buffer to offset from.
    pub(crate) fn is_full_update(&self) -> bool {
        self.continuous_index.is_none()
    }

    pub(crate) fn index_of(&self, buffer: BufferRef<'_>) -> SyncResult<usize> {
        match buffer {
            BufferRef::Index(index) if index < self.buffers.len() => Ok(index),
            BufferRef::Index(index) => Err(SyncError::BufferIndexOutOfRange {
                index,
                len: self.buffers.len(),
            }),
            BufferRef::Name(name) => self
                .buffers
                .iter()
                .position(|b| b.name() == name)
                .ok_or_else(|| SyncError::BufferNotFound(name.to_string())),
        }
    }

    pub(crate) fn cursor(&self, index: usize) -> Option<usize> {
        self.last_read[index]
    }

    /// Request for everything newer than the last synchronized continuous value.
    ///
    /// Until a continuous value is known (or without a continuous buffer) every offset is
    /// left unset and the device resends the full series.
    pub(crate) fn request_for_new_data(&self) -> SyncResult<DataRequest> {
        let mut builder = RequestBuilder::new();
        for (index, buffer) in self.buffers.iter().enumerate() {
            builder.set_buffer(index, buffer.name());
        }

        if let (Some(continuous), Some(value)) = (self.continuous_index, self.last_continuous_value)
        {
            for index in 0..self.buffers.len() {
                builder.set_offset_to_buffer(index, continuous, value);
            }
            // the reference buffer itself takes a plain numeric offset
            builder.set_offset(continuous, value);
        }

        builder.build()
    }

    /// Merge one poll's buffers: append with a continuous buffer, replace without.
    pub(crate) fn merge(&mut self, incoming: Vec<Buffer>) {
        let replace = self.is_full_update();

        for buffer in incoming {
            let Some(index) = self.buffers.iter().position(|b| b.name() == buffer.name()) else {
                warn!(
                    buffer = buffer.name(),
                    samples = buffer.size(),
                    "Ignoring samples for unregistered buffer"
                );
                continue;
            };

            if replace {
                let len = buffer.size();
                self.buffers[index] = buffer;
                if let Some(cursor) = self.last_read[index] {
                    self.last_read[index] = Some(cursor.min(len));
                }
            } else {
                if Some(index) == self.continuous_index {
                    // NaN (a null sample) cannot be sent back as an offset
                    let newest = buffer.data().iter().rev().copied().find(|v| v.is_finite());
                    if let Some(newest) = newest {
                        self.last_continuous_value = Some(newest);
                    }
                }
                self.buffers[index].append(buffer.data());
            }
        }

        debug!(
            mode = if replace { "replace" } else { "append" },
            last_continuous_value = ?self.last_continuous_value,
            "Merged new data"
        );
    }

    /// Copy of every buffer; marks everything as read.
    pub(crate) fn all_data(&mut self) -> Vec<Buffer> {
        (0..self.buffers.len())
            .map(|index| self.buffer_data(index))
            .collect()
    }

    /// Copy of one buffer; marks it as read.
    pub(crate) fn buffer_data(&mut self, index: usize) -> Buffer {
        let buffer = &self.buffers[index];
        self.last_read[index] = Some(buffer.size());
        buffer.clone()
    }

    /// Unread tail of every buffer.
    pub(crate) fn new_data(&mut self) -> Vec<Buffer> {
        (0..self.buffers.len())
            .map(|index| self.new_buffer_data(index))
            .collect()
    }

    /// Unread tail of one buffer.
    ///
    /// The cursor moves to the last sample, not past it, so the most recent sample is
    /// delivered again by the next incremental read.
    pub(crate) fn new_buffer_data(&mut self, index: usize) -> Buffer {
        let buffer = &self.buffers[index];
        let start = self.last_read[index].unwrap_or(0);
        let tail = buffer.copy_from(start);
        self.last_read[index] = buffer.size().checked_sub(1);
        tail
    }

    /// Empty one buffer and reset its cursor. The continuous value is kept so the next
    /// poll stays incremental.
    pub(crate) fn clear_buffer(&mut self, index: usize) {
        self.buffers[index].reset();
        self.last_read[index] = None;
    }

    pub(crate) fn clear_all(&mut self) {
        for index in 0..self.buffers.len() {
            self.clear_buffer(index);
        }
    }
}
