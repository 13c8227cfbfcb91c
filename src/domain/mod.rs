pub mod conflict;
pub mod decomposition;
pub mod models;
pub mod session;
