//! Two-region byte buffer with an explicit swap.
//!
//! One region is readable (the last swapped-in fill), the other receives writes. The decode
//! worker only touches the write region and the feed worker only reads the active one; the
//! swap is the single handoff between them.

use crate::error::{PlayerError, Result};

/// Default capacity of each region.
pub const DEFAULT_CAPACITY: usize = 4 * 1024 * 1024;

#[derive(Debug)]
pub struct DoubleBuffer {
    regions: [Box<[u8]>; 2],
    active: usize,
    size: usize,
    write_size: usize,
}

impl DoubleBuffer {
    /// Allocate two regions of `capacity` bytes each.
    pub fn new(capacity: usize) -> Self {
        Self {
            regions: [
                vec![0u8; capacity].into_boxed_slice(),
                vec![0u8; capacity].into_boxed_slice(),
            ],
            active: 0,
            size: 0,
            write_size: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.regions[0].len()
    }

    /// Remaining room in the write region.
    pub fn free_bytes(&self) -> usize {
        self.capacity() - self.write_size
    }

    /// Bytes written to the write region since the last swap.
    pub fn write_size(&self) -> usize {
        self.write_size
    }

    /// Append `data` to the write region.
    ///
    /// Fails without writing anything when `data` does not fit.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let free = self.free_bytes();
        if data.len() > free {
            return Err(PlayerError::BufferOverflow {
                requested: data.len(),
                free,
            });
        }
        let start = self.write_size;
        let end = start + data.len();
        self.regions[1 - self.active][start..end].copy_from_slice(data);
        self.write_size = end;
        Ok(())
    }

    /// Promote the write region to active and start an empty write region.
    pub fn switch_buffers(&mut self) {
        self.size = self.write_size;
        self.write_size = 0;
        self.active = 1 - self.active;
    }

    /// Valid bytes of the active region.
    pub fn bytes(&self) -> &[u8] {
        &self.regions[self.active][..self.size]
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Forget the contents of both regions.
    pub fn reset(&mut self) {
        self.size = 0;
        self.write_size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_exposes_exactly_the_written_bytes() {
        let mut buf = DoubleBuffer::new(8);
        buf.write(&[1, 2, 3]).unwrap();
        buf.write(&[4]).unwrap();
        assert_eq!(buf.size(), 0);

        buf.switch_buffers();
        assert_eq!(buf.bytes(), &[1, 2, 3, 4]);
        assert_eq!(buf.free_bytes(), 8);
        assert_eq!(buf.write_size(), 0);
    }

    #[test]
    fn writes_after_swap_do_not_touch_the_readable_region() {
        let mut buf = DoubleBuffer::new(4);
        buf.write(&[1, 1, 1, 1]).unwrap();
        buf.switch_buffers();
        buf.write(&[2, 2]).unwrap();
        assert_eq!(buf.bytes(), &[1, 1, 1, 1]);

        buf.switch_buffers();
        assert_eq!(buf.bytes(), &[2, 2]);
    }

    #[test]
    fn overflowing_write_fails_without_partial_write() {
        let mut buf = DoubleBuffer::new(4);
        buf.write(&[7, 7, 7]).unwrap();
        let err = buf.write(&[8, 8]).unwrap_err();
        assert!(matches!(
            err,
            PlayerError::BufferOverflow {
                requested: 2,
                free: 1
            }
        ));
        assert_eq!(buf.write_size(), 3);

        buf.switch_buffers();
        assert_eq!(buf.bytes(), &[7, 7, 7]);
    }

    #[test]
    fn write_larger_than_capacity_always_fails() {
        let mut buf = DoubleBuffer::new(2);
        assert!(buf.write(&[0, 0, 0]).is_err());
        assert_eq!(buf.free_bytes(), 2);
    }

    #[test]
    fn double_swap_without_writes_leaves_nothing_readable() {
        let mut buf = DoubleBuffer::new(4);
        buf.write(&[5]).unwrap();
        buf.switch_buffers();
        buf.switch_buffers();
        assert!(buf.bytes().is_empty());
    }

    #[test]
    fn reset_clears_both_regions() {
        let mut buf = DoubleBuffer::new(4);
        buf.write(&[1, 2]).unwrap();
        buf.switch_buffers();
        buf.write(&[3]).unwrap();
        buf.reset();
        assert_eq!(buf.size(), 0);
        assert_eq!(buf.free_bytes(), 4);
    }
}
