//! # policywatch
//!
//! A Terms of Service monitoring service that tracks changes in legal
//! documents published at external URLs and produces AI-generated summaries
//! of what changed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌─────────┐   ┌───────────────┐
//! │  Fetch   │──▶│ Normalize │──▶│  Hash   │──▶│ Version Store │
//! │ reqwest  │   │  + strip  │   │ 3 levels│   │ current/last/ │
//! └──────────┘   └───────────┘   └─────────┘   │ prev + dates  │
//!                                              └───────┬───────┘
//!                                                      ▼
//!                                    ┌─────────┐   ┌────────────┐
//!                                    │   AI    │◀──│  Lineage   │
//!                                    │ compare │   │  Tracker   │
//!                                    └────┬────┘   └────────────┘
//!                                         ▼
//!                                    ┌──────────┐
//!                                    │Diff Store│
//!                                    └──────────┘
//! ```
//!
//! Change detection runs at two sensitivities: a *structural* hash (layout
//! noise removed) decides whether a new dated snapshot is minted, and a
//! coarser *fingerprint* hash (dates, versions, and copyright years also
//! removed) decides whether the expensive AI summary is generated. A
//! document that is merely re-dated rolls a snapshot but never reaches the
//! AI step.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | Blob storage trait + in-memory backend |
//! | [`store_local`] | Local-filesystem backend |
//! | [`store_s3`] | S3-compatible backend (SigV4) |
//! | [`hasher`] | Three-level content hashing |
//! | [`normalize`] | Boilerplate stripping and date masking |
//! | [`fetch`] | Page fetching with retry and extraction |
//! | [`versions`] | Pointer-based version store |
//! | [`lineage`] | Diff gating and artifact persistence |
//! | [`ai`] | AI comparison providers |
//! | [`pipeline`] | Batch orchestration |
//! | [`server`] | HTTP API |

pub mod ai;
pub mod config;
pub mod fetch;
pub mod hasher;
pub mod lineage;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod server;
pub mod store;
pub mod store_local;
pub mod store_s3;
pub mod versions;
