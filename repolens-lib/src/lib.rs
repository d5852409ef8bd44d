#![doc(hidden)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Core library for repolens
//!
//! This library consolidates all functionality for the repolens tool, which crawls every
//! repository of a GitHub account and aggregates quality and activity metrics.
//!
//! # Module Organization
//!
//! - [`commands`]: Command-line interface and orchestration
//! - [`pipeline`]: The crawl-and-aggregate pipeline (rate governor, checkpoints, worker pool)
//! - [`github`]: GitHub implementations of the listing, analysis, and quota capabilities

pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

#[cfg(any(debug_assertions, test))]
pub mod commands;
#[cfg(not(any(debug_assertions, test)))]
mod commands;

pub mod github;
pub mod pipeline;

pub use crate::commands::{Host, run};
