//! Shared-ownership device buffer
//!
//! Cloning a [`DeviceBuffer`] adds a holder; dropping one removes it. When the
//! last holder goes, the block is handed back to the context's allocator
//! under its tag and stays warm for the next request with the same role.

use std::fmt;
use std::mem;
use std::sync::Arc;

use crate::backend::ComputeBackend;
use crate::context::{ContextInner, DeviceContext};
use crate::error::{StatError, StatResult};
use crate::memory::{MemorySpace, Tag};

struct BufferInner<B: ComputeBackend> {
    handle: B::Buffer,
    size: usize,
    tag: Tag,
    ctx: Arc<ContextInner<B>>,
}

impl<B: ComputeBackend> Drop for BufferInner<B> {
    fn drop(&mut self) {
        let mut guard = self.ctx.lock_state_for_drop();
        let state = &mut *guard;
        state.memory.record_free(MemorySpace::Device, self.size);
        if let Err(e) = state
            .allocator
            .free(&mut state.backend, self.handle.clone(), self.size, self.tag)
        {
            tracing::error!(
                "DeviceBuffer: returning {} byte '{}' block failed: {}",
                self.size,
                self.tag,
                e
            );
        }
    }
}

/// Reference-counted handle to one allocator-issued block
pub struct DeviceBuffer<B: ComputeBackend> {
    inner: Arc<BufferInner<B>>,
}

impl<B: ComputeBackend> Clone for DeviceBuffer<B> {
    fn clone(&self) -> Self {
        DeviceBuffer {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: ComputeBackend> fmt::Debug for DeviceBuffer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("handle", &self.inner.handle)
            .field("size", &self.inner.size)
            .field("tag", &self.inner.tag)
            .field("refcount", &self.refcount())
            .finish()
    }
}

impl<B: ComputeBackend> DeviceBuffer<B> {
    /// Allocate at least `size` bytes for `tag` with a single holder
    pub fn new(ctx: &DeviceContext<B>, size: usize, tag: Tag) -> StatResult<Self> {
        let mut guard = ctx.lock_state()?;
        let state = &mut *guard;
        let (block_size, handle) = state.allocator.alloc(&mut state.backend, size, tag)?;
        state.memory.record_alloc(MemorySpace::Device, block_size);
        drop(guard);

        Ok(DeviceBuffer {
            inner: Arc::new(BufferInner {
                handle,
                size: block_size,
                tag,
                ctx: Arc::clone(ctx.inner()),
            }),
        })
    }

    /// Replace the slot's content with a fresh allocation.
    ///
    /// The previous content is released first, so its block can satisfy the
    /// new request when the tags match.
    ///
    /// # Panics
    ///
    /// If `size` is negative.
    pub fn alloc_into(
        slot: &mut Option<Self>,
        ctx: &DeviceContext<B>,
        size: i64,
        tag: Tag,
    ) -> StatResult<()> {
        assert!(size >= 0, "negative device allocation size {} for '{}'", size, tag);
        Self::unref(slot);
        *slot = Some(Self::new(ctx, size as usize, tag)?);
        Ok(())
    }

    /// Make `lhs` share `rhs`, releasing whatever `lhs` held
    pub fn assign(lhs: &mut Option<Self>, rhs: &Self) {
        Self::unref(lhs);
        *lhs = Some(rhs.clone());
    }

    /// Drop the slot's holder; an empty slot is left alone
    pub fn unref(slot: &mut Option<Self>) {
        drop(slot.take());
    }

    /// Block size in bytes (may exceed the requested size on reuse)
    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn tag(&self) -> Tag {
        self.inner.tag
    }

    /// Number of live holders
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Driver handle, valid while `self` is alive
    pub fn handle(&self) -> &B::Buffer {
        &self.inner.handle
    }

    /// True when both buffers share one block
    pub fn same_storage(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Context the block was allocated from
    pub fn context(&self) -> DeviceContext<B> {
        DeviceContext::from_inner(Arc::clone(&self.inner.ctx))
    }

    pub(crate) fn belongs_to(&self, ctx: &DeviceContext<B>) -> bool {
        Arc::ptr_eq(&self.inner.ctx, ctx.inner())
    }

    /// Upload `data` starting at element `offset`
    pub fn write_f64s(&self, offset: usize, data: &[f64]) -> StatResult<()> {
        let byte_offset = self.check_range(offset, data.len())?;
        let mut state = self.inner.ctx.lock_state()?;
        state
            .backend
            .write(&self.inner.handle, byte_offset, bytemuck::cast_slice(data))?;
        Ok(())
    }

    /// Blocking readback of `out.len()` elements starting at element `offset`.
    ///
    /// The host staging copy is counted in the `Host` space while it is live.
    pub fn read_f64s(&self, offset: usize, out: &mut [f64]) -> StatResult<()> {
        let byte_offset = self.check_range(offset, out.len())?;
        let bytes = mem::size_of_val(out);
        let mut guard = self.inner.ctx.lock_state()?;
        let state = &mut *guard;

        state.memory.record_alloc(MemorySpace::Host, bytes);
        let result = state.backend.read(
            &self.inner.handle,
            byte_offset,
            bytemuck::cast_slice_mut(out),
        );
        state.memory.record_free(MemorySpace::Host, bytes);

        result.map_err(|e| {
            tracing::error!("DeviceBuffer: readback of {} bytes failed: {}", bytes, e);
            StatError::from(e)
        })
    }

    fn check_range(&self, offset: usize, count: usize) -> StatResult<usize> {
        let elem = mem::size_of::<f64>();
        let end = offset
            .checked_add(count)
            .and_then(|end| end.checked_mul(elem))
            .ok_or_else(|| StatError::OutOfBounds(format!("range {}+{} overflows", offset, count)))?;
        if end > self.inner.size {
            return Err(StatError::OutOfBounds(format!(
                "elements {}..{} exceed {} byte '{}' buffer",
                offset,
                offset + count,
                self.inner.size,
                self.inner.tag
            )));
        }
        Ok(offset * elem)
    }
}
