//! # corpusd
//!
//! A durable document-ingestion queue with hybrid retrieval.
//!
//! corpusd accepts document ingestion requests into a SQLite-backed job
//! queue, processes them with a pool of shard-rotating workers through a
//! parse/index stage pipeline, and answers queries by fanning out to a
//! vector store and an optional keyword store and merging the hits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌──────────────┐   ┌───────────────────┐
//! │ enqueue │──▶│ job queue     │──▶│ workers (sharded)  │
//! │  (CLI)  │   │ SQLite (WAL) │   │ parse→vec→keyword  │
//! └─────────┘   └──────────────┘   └───┬───────────┬───┘
//!                                      ▼           ▼
//!                              ┌───────────┐ ┌───────────┐
//!                              │  vector    │ │  keyword   │
//!                              │  store     │ │  store     │
//!                              └─────┬─────┘ └─────┬─────┘
//!                                    └──── merge ───┘
//!                                          ▼
//!                                     retrieve (CLI)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! corpusd init                          # create database
//! corpusd enqueue ./doc.txt --kb docs   # queue a document
//! corpusd worker --ordinal 0            # run one worker
//! corpusd retrieve "failover runbook" --kb docs
//! corpusd jobs                          # inspect recent jobs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`queue`] | Durable job queue over SQLite |
//! | [`shard`] | Time-rotating worker shard assignment |
//! | [`chunk`] | Text chunking |
//! | [`parser`] | Document parsing seam |
//! | [`pipeline`] | Per-job stage pipeline |
//! | [`worker`] | Poll-claim-process worker loop |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`stores`] | Vector and keyword store seams |
//! | [`retriever`] | Hybrid retrieval fan-out and merge |
//! | [`timing`] | Per-job and per-query phase timing |
//! | [`error`] | Stage error taxonomy |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod retriever;
pub mod shard;
pub mod stores;
pub mod timing;
pub mod worker;
