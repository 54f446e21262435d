mod index_pool;
mod range_alloc;

pub use index_pool::IndexPool;
pub use range_alloc::RangeAllocator;
