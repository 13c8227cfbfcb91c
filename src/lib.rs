//! Time-boxed task engine: conflict checks on write, a periodic scan that
//! expires and auto-starts tasks, and the single active countdown with
//! Pomodoro work/break cycling.

pub mod application;
pub mod domain;
pub mod infrastructure;
