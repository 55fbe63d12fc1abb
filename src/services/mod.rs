//! Core services for scanning, selection, orchestration and event delivery

pub mod orchestrate;
pub mod scan;
pub mod select;
pub mod sink;
