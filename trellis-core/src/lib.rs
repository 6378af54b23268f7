//! Trellis Core
//!
//! Core library for declaring a resource graph wired together by deferred
//! values, and planning and applying it through a provider

pub mod config;
pub mod differ;
pub mod effect;
pub mod graph;
pub mod interpreter;
pub mod output;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod stack;
