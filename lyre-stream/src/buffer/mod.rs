//! Byte buffering: ring buffers and the global pool that backs them

pub mod pool;
pub mod ring_buffer;

pub use pool::{BufferPool, PoolStats};
pub use ring_buffer::RingBuffer;
