//! Data consumed and produced by the shell: pipeline descriptions and jobs.

pub mod job;
pub mod pipeline;
