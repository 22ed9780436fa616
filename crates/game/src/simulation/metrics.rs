use std::alloc::{GlobalAlloc, Layout, System};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

const SAMPLE_WINDOW: usize = 1024;

/// System allocator wrapper that keeps a live byte count, so the tick loop
/// can report heap pressure without a profiler attached. Binaries opt in:
///
/// ```ignore
/// #[global_allocator]
/// static ALLOC: riftline::simulation::CountingAllocator = CountingAllocator;
/// ```
pub struct CountingAllocator;

static ALLOCATED: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            ALLOCATED.fetch_add(layout.size(), Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        ALLOCATED.fetch_sub(layout.size(), Ordering::Relaxed);
    }
}

/// Live heap bytes, or 0 when the counting allocator is not registered.
pub fn allocated_bytes() -> usize {
    ALLOCATED.load(Ordering::Relaxed)
}

/// Sliding-window timing statistics for the tick loop. Durations and
/// inter-tick intervals are recorded in milliseconds; percentiles are
/// computed over the most recent `SAMPLE_WINDOW` ticks.
#[derive(Debug)]
pub struct TickMetrics {
    period_ms: f64,
    budget_ms: f64,
    durations: VecDeque<f64>,
    jitters: VecDeque<f64>,
    budget_overruns: u64,
    ticks: u64,
    max_jitter: f64,
    heap_samples: VecDeque<f64>,
    heap_max: u64,
}

impl TickMetrics {
    pub fn new(period_ms: f64, budget_ms: f64) -> Self {
        Self {
            period_ms,
            budget_ms,
            durations: VecDeque::with_capacity(SAMPLE_WINDOW),
            jitters: VecDeque::with_capacity(SAMPLE_WINDOW),
            budget_overruns: 0,
            ticks: 0,
            max_jitter: 0.0,
            heap_samples: VecDeque::with_capacity(SAMPLE_WINDOW),
            heap_max: 0,
        }
    }

    pub fn record_tick(&mut self, duration_ms: f64) {
        push_sample(&mut self.durations, duration_ms);
        self.ticks += 1;
        if duration_ms > self.budget_ms {
            self.budget_overruns += 1;
        }
    }

    /// `interval_ms` is the wall-clock gap between consecutive tick starts;
    /// jitter is its deviation from the configured period.
    pub fn record_interval(&mut self, interval_ms: f64) {
        let jitter = (interval_ms - self.period_ms).abs();
        push_sample(&mut self.jitters, jitter);
        if jitter > self.max_jitter {
            self.max_jitter = jitter;
        }
    }

    pub fn record_heap(&mut self, bytes: u64) {
        push_sample(&mut self.heap_samples, bytes as f64);
        if bytes > self.heap_max {
            self.heap_max = bytes;
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn budget_overruns(&self) -> u64 {
        self.budget_overruns
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut sorted: Vec<f64> = self.durations.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let avg = mean(&sorted);
        let std_dev = if sorted.len() > 1 {
            let var = sorted.iter().map(|d| (d - avg).powi(2)).sum::<f64>() / sorted.len() as f64;
            var.sqrt()
        } else {
            0.0
        };

        MetricsSnapshot {
            ticks: self.ticks,
            min_tick_ms: sorted.first().copied().unwrap_or(0.0),
            avg_tick_ms: avg,
            p95_tick_ms: percentile(&sorted, 0.95),
            p99_tick_ms: percentile(&sorted, 0.99),
            max_tick_ms: sorted.last().copied().unwrap_or(0.0),
            std_dev_tick_ms: std_dev,
            budget_overruns: self.budget_overruns,
            utilization_percent: if self.period_ms > 0.0 {
                avg / self.period_ms * 100.0
            } else {
                0.0
            },
            avg_inter_tick_jitter_ms: mean(&self.jitters.iter().copied().collect::<Vec<_>>()),
            max_jitter_ms: self.max_jitter,
            heap_current_bytes: self.heap_samples.back().copied().unwrap_or(0.0) as u64,
            heap_avg_bytes: mean(&self.heap_samples.iter().copied().collect::<Vec<_>>()) as u64,
            heap_max_bytes: self.heap_max,
        }
    }
}

fn push_sample(window: &mut VecDeque<f64>, sample: f64) {
    if window.len() >= SAMPLE_WINDOW {
        window.pop_front();
    }
    window.push_back(sample);
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

/// Nearest-rank percentile over an ascending slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((sorted.len() as f64 * q).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

/// Point-in-time view of the tick loop, cheap to clone across threads for
/// scraping or the ops console.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub min_tick_ms: f64,
    pub avg_tick_ms: f64,
    pub p95_tick_ms: f64,
    pub p99_tick_ms: f64,
    pub max_tick_ms: f64,
    pub std_dev_tick_ms: f64,
    pub budget_overruns: u64,
    pub utilization_percent: f64,
    pub avg_inter_tick_jitter_ms: f64,
    pub max_jitter_ms: f64,
    pub heap_current_bytes: u64,
    pub heap_avg_bytes: u64,
    pub heap_max_bytes: u64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ticks={} avg={:.3}ms p95={:.3}ms p99={:.3}ms max={:.3}ms overruns={} util={:.1}% jitter={:.3}ms heap={}B",
            self.ticks,
            self.avg_tick_ms,
            self.p95_tick_ms,
            self.p99_tick_ms,
            self.max_tick_ms,
            self.budget_overruns,
            self.utilization_percent,
            self.avg_inter_tick_jitter_ms,
            self.heap_current_bytes,
        )
    }
}
