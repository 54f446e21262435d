/// First-fit offset allocator over a fixed capacity.
///
/// Free ranges are kept sorted by offset and coalesced on release, so
/// fragmentation stays bounded under the allocate/free churn of a streaming
/// arena. All sizes and offsets are in bytes.
#[derive(Debug)]
pub struct RangeAllocator {
    capacity: u64,
    // sorted by offset, non-overlapping, non-adjacent
    free: Vec<(u64, u64)>,
}

impl RangeAllocator {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            free: vec![(0, capacity)],
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Largest single allocation that could currently succeed (unaligned).
    pub fn max_allocatable(&self) -> u64 {
        self.free.iter().map(|&(_, size)| size).max().unwrap_or(0)
    }

    pub fn free_space(&self) -> u64 {
        self.free.iter().map(|&(_, size)| size).sum()
    }

    /// First-fit allocation of `size` bytes at a multiple of `alignment`.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<u64> {
        assert!(alignment.is_power_of_two());
        if size == 0 {
            return None;
        }
        for i in 0..self.free.len() {
            let (offset, range_size) = self.free[i];
            let aligned = (offset + alignment - 1) & !(alignment - 1);
            let padding = aligned - offset;
            if range_size < padding + size {
                continue;
            }
            let remainder = range_size - padding - size;
            self.free.remove(i);
            if remainder > 0 {
                self.free.insert(i, (aligned + size, remainder));
            }
            if padding > 0 {
                self.free.insert(i, (offset, padding));
            }
            return Some(aligned);
        }
        None
    }

    /// Returns a range to the pool, merging with neighbours.
    pub fn release(&mut self, offset: u64, size: u64) {
        debug_assert!(offset + size <= self.capacity);
        if size == 0 {
            return;
        }
        let i = self.free.partition_point(|&(o, _)| o < offset);
        debug_assert!(i == 0 || {
            let (prev_off, prev_size) = self.free[i - 1];
            prev_off + prev_size <= offset
        });
        let mut merged = (offset, size);
        // merge with successor
        if i < self.free.len() && merged.0 + merged.1 == self.free[i].0 {
            merged.1 += self.free[i].1;
            self.free.remove(i);
        }
        // merge with predecessor
        if i > 0 && self.free[i - 1].0 + self.free[i - 1].1 == merged.0 {
            self.free[i - 1].1 += merged.1;
        } else {
            self.free.insert(i, merged);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_first_fit_with_alignment() {
        let mut alloc = RangeAllocator::new(256);
        assert_eq!(alloc.allocate(10, 1), Some(0));
        assert_eq!(alloc.allocate(16, 64), Some(64));
        // the gap between 10 and 64 is reusable
        assert_eq!(alloc.allocate(32, 2), Some(10));
    }

    #[test]
    fn release_coalesces() {
        let mut alloc = RangeAllocator::new(128);
        let a = alloc.allocate(32, 1).unwrap();
        let b = alloc.allocate(32, 1).unwrap();
        let c = alloc.allocate(32, 1).unwrap();
        alloc.release(a, 32);
        alloc.release(c, 32);
        alloc.release(b, 32);
        assert_eq!(alloc.free_space(), 128);
        assert_eq!(alloc.max_allocatable(), 128);
        assert_eq!(alloc.allocate(128, 1), Some(0));
    }

    #[test]
    fn debug_format_names_the_type() {
        let alloc = RangeAllocator::new(16);
        assert!(format!("{alloc:?}").contains("RangeAllocator"));
    }

    #[test]
    fn oversized_request_fails() {
        let mut alloc = RangeAllocator::new(64);
        assert_eq!(alloc.allocate(65, 1), None);
        assert_eq!(alloc.allocate(64, 1), Some(0));
        assert_eq!(alloc.allocate(1, 1), None);
    }
}
