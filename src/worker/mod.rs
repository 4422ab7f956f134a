// src/worker/mod.rs
//! Background machinery: the batching drain thread and the repeating timer

pub mod batch;
pub mod timer;

pub use batch::{BatchWorker, FlushFn, QueueStats};
pub use timer::RepeatingTimer;
