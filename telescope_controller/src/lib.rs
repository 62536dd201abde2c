pub mod config;
pub mod controller;
pub mod coordinates;
pub mod drive;
pub mod logging;
pub mod models;
pub mod report;
pub mod state_monitor;
pub mod tracker;
