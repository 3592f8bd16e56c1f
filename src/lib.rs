pub mod archive;
pub mod buffer;
pub mod cli;
pub mod config;
pub mod ingress;
pub mod parameters;
pub mod pipeline;
pub mod schema;
pub mod storage;
pub mod transform;
pub mod writer;
