#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod backend;
pub mod batch;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod paths;
pub mod polling;
pub mod progress;
pub mod repository;
pub mod uptime;
pub mod vm;
