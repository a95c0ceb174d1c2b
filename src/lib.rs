pub mod agent;
pub mod atom;
pub mod collector;
pub mod config;
pub mod delta;
pub mod export;
pub mod scheduler;
pub mod sink;
pub mod uevent;
