//! Polling and notification engine.
//!
//! - `filter` decides which cards a destination cares about
//! - `throttle` decides when a destination is due
//! - `render` turns cards into message text
//! - `poll` runs cycles over the registered lists
//! - `scheduler` runs `poll` on a timer

pub mod filter;
pub mod poll;
pub mod render;
pub mod scheduler;
pub mod throttle;

pub use filter::{CardFilter, FieldCriterion, FilterCriteria, LabelMatch};
pub use poll::{CycleReport, PollEngine};
pub use render::MessageRenderer;
pub use scheduler::PollScheduler;
pub use throttle::{ThrottleKey, ThrottleTracker};
