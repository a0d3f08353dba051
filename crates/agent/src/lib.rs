//! Podscope agent: the long-running monitor with its HTTP surface

pub mod api;
pub mod config;
