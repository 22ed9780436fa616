pub mod metrics;
pub mod tick;

pub use metrics::{allocated_bytes, CountingAllocator, MetricsSnapshot, TickMetrics};
pub use tick::{TickEngine, WorldCommand};
