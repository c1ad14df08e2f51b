pub mod alarm;
pub mod retry;

pub use alarm::{Alarm, AlarmKind, AlarmReporter};
pub use retry::{RetryConfig, RetryError, RetryPolicy};
