pub mod active_session;
pub mod bootstrap;
pub mod clock;
pub mod commands;
pub mod scheduler;
