/// Hands out reusable `u32` ids in O(1), optionally bounded by a capacity.
///
/// Released ids are recycled before new ones are minted, so the live id range
/// stays dense under churn.
#[derive(Debug)]
pub struct IndexPool {
    released: Vec<u32>,
    next: u32,
    capacity: Option<u32>,
}

impl IndexPool {
    pub fn new() -> Self {
        Self {
            released: Vec::new(),
            next: 0,
            capacity: None,
        }
    }

    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            released: Vec::new(),
            next: 0,
            capacity: Some(capacity),
        }
    }

    /// Returns `None` only for bounded pools that are fully live.
    pub fn acquire(&mut self) -> Option<u32> {
        if let Some(index) = self.released.pop() {
            return Some(index);
        }
        if let Some(capacity) = self.capacity {
            if self.next >= capacity {
                return None;
            }
        }
        let index = self.next;
        self.next += 1;
        Some(index)
    }

    pub fn release(&mut self, index: u32) {
        debug_assert!(index < self.next);
        self.released.push(index);
    }

    /// Number of ids currently live (acquired and not released).
    pub fn live(&self) -> u32 {
        self.next - self.released.len() as u32
    }
}

impl Default for IndexPool {
    fn default() -> Self {
        Self::new()
    }
}
