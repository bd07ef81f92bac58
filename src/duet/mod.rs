// src/duet/mod.rs

pub mod agent;
pub mod client_wrapper;
pub mod clients;
pub mod completion;
pub mod config;
pub mod event;
pub mod orchestrator;
pub mod registry;
pub mod session_state;
