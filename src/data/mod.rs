//! Buffered time-series data and small parsing helpers.
//!
//! ## Submodules
//!
//! - [`buffer`]: capacity-bounded [`TimeSeriesBuffer`] of [`CtgDataPoint`](crate::model::CtgDataPoint)s
//! - [`duration`]: parsing and formatting of duration strings (e.g., "300s", "500ms")
//!
//! ## Data Flow
//!
//! ```text
//! StreamMessage (type = data)
//!        │
//!        ▼
//! CtgDataPoint::from_message()
//!        │
//!        ▼
//! TimeSeriesBuffer::append()  ──▶ filter_by_type() / last_valid() ──▶ charts
//! ```

pub mod buffer;
pub mod duration;

pub use buffer::{TimeSeriesBuffer, DEFAULT_CAPACITY};
