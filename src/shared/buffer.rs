// This is free and unencumbered software released into the public domain.

//! Reusable heap buffers for the capture loop.
//!
//! Both buffers grow on demand and never shrink, so a steady stream of
//! similarly sized frames allocates only on the first iteration (or when a
//! frame is larger than any seen before).

/// Growable byte buffer whose capacity is monotonically non-decreasing.
#[derive(Debug, Default)]
pub struct GrowBuffer {
    data: Vec<u8>,
}

impl GrowBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make at least `len` bytes addressable and return them.
    ///
    /// Previously written bytes are not preserved across a regrow.
    pub fn ensure(&mut self, len: usize) -> &mut [u8] {
        if len > self.data.len() {
            #[cfg(feature = "tracing")]
            asimov_module::tracing::debug!(
                target: "asimov_timelapse_module",
                from = self.data.len(),
                to = len,
                "growing buffer"
            );
            self.data = vec![0u8; len];
        }
        &mut self.data[..len]
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Memory for the outgoing HTTP request, headers included.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    inner: GrowBuffer,
}

impl MessageBuffer {
    /// Room reserved for the request line, headers, and multipart framing.
    pub const OVERHEAD: usize = 1024;

    pub fn new() -> Self {
        Self::default()
    }

    /// Resize for a payload of `payload` bytes wrapped in `framing` bytes of
    /// request line, headers, and multipart boundaries.
    ///
    /// The overhead is `OVERHEAD` or `framing`, whichever is larger. When the
    /// current capacity cannot take `payload + overhead`, the buffer is
    /// regrown to twice the payload plus overhead.
    pub fn reserve_payload(&mut self, payload: usize, framing: usize) -> &mut [u8] {
        let overhead = framing.max(Self::OVERHEAD);
        if self.inner.capacity() < payload + overhead {
            self.inner.ensure(2 * payload + overhead);
        }
        self.inner.as_mut_slice()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.inner.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.inner.as_mut_slice()
    }
}
