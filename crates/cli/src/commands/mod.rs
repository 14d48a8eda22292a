//! CLI Commands

pub mod check;
pub mod config;
pub mod run;
pub mod upload;
pub mod upload_report;
