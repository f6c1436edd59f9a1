//! amem - Adaptive Retrieval Memory
//!
//! An in-process retrieval engine for agent tools. Text is stored per
//! workspace, split into overlapping content-addressed chunks and embedded
//! deterministically. Queries run filtered kNN with MMR diversity selection,
//! and results are reweighted by a self-organizing concept hierarchy and by
//! feedback (votes, dwell time, click rank) logged for similar past queries.

pub mod chunking;
pub mod cli;
pub mod concepts;
pub mod config;
pub mod embedding;
pub mod error;
pub mod retrieval;
pub mod storage;
pub mod workspace;

pub use error::{AmemError, Result};
pub use retrieval::{Hit, SearchOptions};
pub use storage::Usefulness;
pub use workspace::{EngineConfig, Workspace, WorkspaceRegistry};
