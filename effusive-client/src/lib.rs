//! effusive client library
//!
//! Talks to effusive-server: keeps the local reference-audio catalog,
//! uploads what the server lacks, streams generations and writes the
//! resulting repetitions to disk.

pub mod assembler;
pub mod catalog;
pub mod client;
pub mod context;
pub mod output;
pub mod worker;

pub use assembler::StreamAssembler;
pub use catalog::{RefAudioCatalog, RefAudioFilter};
pub use client::ServerClient;
pub use context::ClientContext;
pub use output::OutputWriter;
pub use worker::{InferenceWorker, WorkerEvent};
