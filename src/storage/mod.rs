pub mod logs;

pub use logs::{LogRotator, RotationOutcome, MIN_RETAINED_LOGS};
