mod countdown;

pub use countdown::{CountdownTimers, Started, TimeoutSink, TimerHandle, TimerKey};
