pub mod api;
pub mod config;
pub mod control;
pub mod history;
pub mod polling;
pub mod projection;
pub mod schedule;
pub mod sensors;
pub mod standards;
pub mod store;
