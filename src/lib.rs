pub mod archive;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod fetch;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod plan;
pub mod regions;
pub mod tools;
