pub mod cancel;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod job_spec;
pub mod pool;
pub mod profile;
pub mod report;
pub mod telemetry;
pub mod util;
