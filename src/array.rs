//! Device-resident one-dimensional `f64` arrays

use crate::backend::ComputeBackend;
use crate::context::DeviceContext;
use crate::error::{StatError, StatResult};
use crate::memory::{DeviceBuffer, Tag};

/// A [`DeviceBuffer`] holding `len` consecutive `f64`s
#[derive(Debug)]
pub struct DeviceArray<B: ComputeBackend> {
    buffer: DeviceBuffer<B>,
    len: usize,
}

impl<B: ComputeBackend> Clone for DeviceArray<B> {
    fn clone(&self) -> Self {
        DeviceArray {
            buffer: self.buffer.clone(),
            len: self.len,
        }
    }
}

impl<B: ComputeBackend> DeviceArray<B> {
    /// Upload `data` under [`Tag::INPUT`]
    pub fn from_host(ctx: &DeviceContext<B>, data: &[f64]) -> StatResult<Self> {
        Self::from_host_tagged(ctx, data, Tag::INPUT)
    }

    /// Upload `data` under a caller-chosen tag
    pub fn from_host_tagged(ctx: &DeviceContext<B>, data: &[f64], tag: Tag) -> StatResult<Self> {
        let buffer = ctx.alloc(std::mem::size_of_val(data), tag)?;
        if !data.is_empty() {
            buffer.write_f64s(0, data)?;
        }
        tracing::trace!("DeviceArray: uploaded {} elements under '{}'", data.len(), tag);
        Ok(DeviceArray {
            buffer,
            len: data.len(),
        })
    }

    /// View the first `len` elements of an existing buffer
    pub fn from_buffer(buffer: DeviceBuffer<B>, len: usize) -> StatResult<Self> {
        let needed = len
            .checked_mul(std::mem::size_of::<f64>())
            .ok_or_else(|| StatError::OutOfBounds(format!("{} elements overflow", len)))?;
        if needed > buffer.size() {
            return Err(StatError::OutOfBounds(format!(
                "{} elements need {} bytes, buffer has {}",
                len,
                needed,
                buffer.size()
            )));
        }
        Ok(DeviceArray { buffer, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn buffer(&self) -> &DeviceBuffer<B> {
        &self.buffer
    }

    /// Blocking readback of the whole array
    pub fn to_host(&self) -> StatResult<Vec<f64>> {
        let mut out = vec![0.0; self.len];
        if self.len > 0 {
            self.buffer.read_f64s(0, &mut out)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SimBackend, SimConfig};

    fn context() -> DeviceContext<SimBackend> {
        DeviceContext::new(SimBackend::new(SimConfig::default()))
    }

    #[test]
    fn test_upload_and_readback() {
        let ctx = context();
        let array = DeviceArray::from_host(&ctx, &[1.0, 2.5, -3.0]).unwrap();
        assert_eq!(array.len(), 3);
        assert_eq!(array.buffer().tag(), Tag::INPUT);
        assert_eq!(array.to_host().unwrap(), vec![1.0, 2.5, -3.0]);
    }

    #[test]
    fn test_empty_array() {
        let ctx = context();
        let array = DeviceArray::from_host(&ctx, &[]).unwrap();
        assert!(array.is_empty());
        assert!(array.to_host().unwrap().is_empty());
    }

    #[test]
    fn test_from_buffer_checks_size() {
        let ctx = context();
        let buffer = ctx.alloc(16, Tag::SCRATCH).unwrap();
        assert!(DeviceArray::from_buffer(buffer.clone(), 2).is_ok());
        let err = DeviceArray::from_buffer(buffer, 3).unwrap_err();
        assert!(matches!(err, StatError::OutOfBounds(_)));
    }
}
