//! Data requests: which part of every remote buffer to fetch.
//!
//! The device's `/get` endpoint takes one `buffer=offset` pair per buffer. The offset is
//! either `full` (resend everything), a number (resend from that value of the continuous
//! reference buffer), or `value|other_buffer` (resend everything newer than `value` in
//! `other_buffer`). [`RequestBuilder`] collects these by index and resolves buffer-relative
//! offsets only when [`RequestBuilder::build`] is called, so the order of the setter calls
//! never matters.

use crate::error::{SyncError, SyncResult};
use std::fmt;

/// Offset token that asks the device for a complete resend.
pub const FULL_UPDATE: &str = "full";

/// Offset of one entry in a [`RequestBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub enum OffsetSpec {
    /// Passed through verbatim.
    Literal(String),
    /// A value of the continuous reference buffer.
    Numeric(f64),
    /// Newer than `value` in the buffer registered at index `reference`.
    RelativeToBuffer {
        /// Index of the buffer the value refers to.
        reference: usize,
        /// Last value seen in the referenced buffer.
        value: f64,
    },
}

/// Render a numeric offset the way the device parses it.
pub(crate) fn format_offset(value: f64) -> String {
    value.to_string()
}

/// An immutable `/get` query: equal-length lists of buffer names and offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    buffers: Vec<String>,
    offsets: Vec<String>,
}

impl DataRequest {
    /// Create a request. Missing offsets (`None`) become [`FULL_UPDATE`].
    ///
    /// Fails with [`SyncError::RequestShapeMismatch`] if the lists differ in length.
    pub fn new(buffers: Vec<String>, offsets: Vec<Option<String>>) -> SyncResult<Self> {
        if buffers.len() != offsets.len() {
            return Err(SyncError::RequestShapeMismatch {
                buffers: buffers.len(),
                offsets: offsets.len(),
            });
        }

        let offsets = offsets
            .into_iter()
            .map(|offset| offset.unwrap_or_else(|| FULL_UPDATE.to_string()))
            .collect();

        Ok(Self { buffers, offsets })
    }

    /// Requested buffer names, in request order.
    pub fn buffers(&self) -> &[String] {
        &self.buffers
    }

    /// Offsets, parallel to [`DataRequest::buffers`].
    pub fn offsets(&self) -> &[String] {
        &self.offsets
    }

    /// `(buffer, offset)` pairs in request order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.buffers
            .iter()
            .zip(self.offsets.iter())
            .map(|(buffer, offset)| (buffer.as_str(), offset.as_str()))
    }

    /// Unescaped textual form, e.g. `x=0&y=full&t=42|time`.
    pub fn as_query_string(&self) -> String {
        self.entries()
            .map(|(buffer, offset)| format!("{buffer}={offset}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl fmt::Display for DataRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_query_string())
    }
}

/// Index-keyed builder for [`DataRequest`].
///
/// Setting the buffer name and the offset for an index are independent calls. When an
/// index receives both [`set_offset`](Self::set_offset) and
/// [`set_offset_to_buffer`](Self::set_offset_to_buffer), the last call wins.
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    buffers: Vec<Option<String>>,
    offsets: Vec<Option<OffsetSpec>>,
}

impl RequestBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the buffer name at `index`.
    pub fn set_buffer(&mut self, index: usize, name: impl Into<String>) -> &mut Self {
        ensure_slot(&mut self.buffers, index);
        self.buffers[index] = Some(name.into());
        self
    }

    /// Set a numeric offset at `index`.
    pub fn set_offset(&mut self, index: usize, value: f64) -> &mut Self {
        self.set_offset_spec(index, OffsetSpec::Numeric(value))
    }

    /// Set a verbatim offset token at `index` (e.g. [`FULL_UPDATE`]).
    pub fn set_offset_text(&mut self, index: usize, text: impl Into<String>) -> &mut Self {
        self.set_offset_spec(index, OffsetSpec::Literal(text.into()))
    }

    /// Make the offset at `index` relative to the buffer at `reference_index`.
    ///
    /// The reference is resolved to `value|name` at build time, so the referenced buffer
    /// may be named later.
    pub fn set_offset_to_buffer(
        &mut self,
        index: usize,
        reference_index: usize,
        value: f64,
    ) -> &mut Self {
        self.set_offset_spec(
            index,
            OffsetSpec::RelativeToBuffer {
                reference: reference_index,
                value,
            },
        )
    }

    /// Replace whatever offset `index` holds.
    pub fn set_offset_spec(&mut self, index: usize, spec: OffsetSpec) -> &mut Self {
        ensure_slot(&mut self.offsets, index);
        self.offsets[index] = Some(spec);
        self
    }

    /// Resolve every offset and produce the request.
    ///
    /// Unset offsets become [`FULL_UPDATE`]. Every index that carries an offset, and every
    /// index referenced by a buffer-relative offset, needs a buffer name.
    ///
    /// # Errors
    ///
    /// [`SyncError::MissingBufferName`] if such an index has no buffer name, and
    /// [`SyncError::RequestShapeMismatch`] if the resolved lists differ in length.
    pub fn build(&self) -> SyncResult<DataRequest> {
        let len = self.buffers.len().max(self.offsets.len());

        let mut names = Vec::with_capacity(len);
        for index in 0..len {
            names.push(self.buffer_name(index)?.to_string());
        }

        let mut offsets = Vec::with_capacity(len);
        for index in 0..len {
            let resolved = match self.offsets.get(index).and_then(Option::as_ref) {
                None => None,
                Some(OffsetSpec::Literal(text)) => Some(text.clone()),
                Some(OffsetSpec::Numeric(value)) => Some(format_offset(*value)),
                Some(OffsetSpec::RelativeToBuffer { reference, value }) => Some(format!(
                    "{}|{}",
                    format_offset(*value),
                    self.buffer_name(*reference)?
                )),
            };
            offsets.push(resolved);
        }

        DataRequest::new(names, offsets)
    }

    /// Forget everything so the builder can be reused.
    pub fn reset(&mut self) {
        self.buffers.clear();
        self.offsets.clear();
    }

    fn buffer_name(&self, index: usize) -> SyncResult<&str> {
        self.buffers
            .get(index)
            .and_then(Option::as_deref)
            .ok_or(SyncError::MissingBufferName { index })
    }
}

fn ensure_slot<T>(list: &mut Vec<Option<T>>, index: usize) {
    if index >= list.len() {
        list.resize_with(index + 1, || None);
    }
}
