pub mod core;
pub mod filters;
pub mod reports;
pub mod setup;
