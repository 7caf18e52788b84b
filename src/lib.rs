//! # Hubgraph
//!
//! A hub-and-spoke relationship engine with incremental one-way sync.
//!
//! Relationships are modeled as *hubs*: plain grouping keys shared by two
//! or more connection rows, one per entity endpoint. The engine enforces
//! the single structural invariant (a hub holds 0 or ≥2 connections),
//! derives connections from entity metadata, and answers grouped and
//! filtered views over the graph. A sync worker walks an append-only
//! change log and pushes whitelisted records to a peer instance over HTTP.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐      ┌────────────┐      ┌───────────┐
//! │ Relationship  │─────▶│   Store    │─────▶│  SQLite   │
//! │    Engine     │      │  (trait)   │      │ / memory  │
//! └───────┬───────┘      └─────┬──────┘      └───────────┘
//!         │                    │ change log
//!         ▼                    ▼
//!   ┌──────────┐      ┌───────────────┐      ┌──────────┐
//!   │  Search  │      │  Sync worker  │─────▶│ peer API │
//!   │ (trait)  │      │ filter+push   │ HTTP │ /api/sync│
//!   └──────────┘      └───────────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hubgraph init                 # create database
//! hubgraph sync                 # one sync pass against the stored target
//! hubgraph watch                # sync continuously until interrupted
//! hubgraph status               # watermark and settings overview
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`engine`] | Relationship engine (hub invariant, grouping, search) |
//! | [`search`] | Full-text search collaborator |
//! | [`sync`] | Change-log dispatcher, whitelist filter, HTTP transport |
//! | [`store`] | Storage abstraction with SQLite and in-memory backends |
//! | [`error`] | Typed failures recovered by downcast |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod migrate;
pub mod models;
pub mod search;
pub mod store;
pub mod sync;
