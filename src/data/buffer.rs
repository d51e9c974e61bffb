//! Bounded time-series buffer feeding the charts.

use std::collections::VecDeque;

use crate::model::{CtgDataPoint, DataType};

/// Default number of points kept across all channels.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Append-only window over the most recent data points.
///
/// Both channels share one window: once `capacity` is exceeded the oldest
/// points are dropped, whatever their channel. Points keep arrival order.
///
/// Every appended point gets a sequence number, counted from zero over the
/// buffer's lifetime. [`since`](Self::since) uses it to hand out only the
/// points a reader has not seen yet.
#[derive(Debug, Clone)]
pub struct TimeSeriesBuffer {
    points: VecDeque<CtgDataPoint>,
    capacity: usize,
    appended: u64,
}

impl Default for TimeSeriesBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TimeSeriesBuffer {
    /// Create an empty buffer holding at most `capacity` points.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
            appended: 0,
        }
    }

    /// Append a point, evicting from the front while over capacity.
    pub fn append(&mut self, point: CtgDataPoint) {
        self.points.push_back(point);
        self.appended += 1;
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    /// Remove every point. Sequence numbers keep counting.
    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All points in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &CtgDataPoint> {
        self.points.iter()
    }

    /// Points of one channel, ordered by ingestion timestamp.
    ///
    /// The sort is stable, so points sharing a timestamp keep arrival order.
    /// Sentinel values are kept so that charts can draw gaps.
    pub fn filter_by_type(&self, data_type: &DataType) -> Vec<CtgDataPoint> {
        let mut series: Vec<CtgDataPoint> = self
            .points
            .iter()
            .filter(|p| &p.data_type == data_type)
            .cloned()
            .collect();
        series.sort_by_key(|p| p.timestamp_ms);
        series
    }

    /// Most recent reading of a channel that is not the loss sentinel.
    pub fn last_valid(&self, data_type: &DataType) -> Option<f64> {
        self.points
            .iter()
            .rev()
            .find(|p| &p.data_type == data_type && !p.is_signal_lost())
            .map(|p| p.value)
    }

    /// Sequence number the next appended point will get.
    pub fn next_seq(&self) -> u64 {
        self.appended
    }

    /// Points with sequence number `seq` or later, in arrival order, plus the
    /// cursor to pass on the next call.
    ///
    /// Points evicted or cleared before the call are skipped.
    pub fn since(&self, seq: u64) -> (Vec<CtgDataPoint>, u64) {
        let held = self.points.len() as u64;
        let first = self.appended - held;
        let skip = seq.saturating_sub(first).min(held) as usize;
        let points = self.points.iter().skip(skip).cloned().collect();
        (points, self.appended)
    }
}
