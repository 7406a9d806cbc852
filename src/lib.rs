//! # plansync
//!
//! Keeps a tree of markdown task files and a SQLite project database in
//! step with each other.
//!
//! Task documents live under a documentation root laid out as
//! `E##-epic/E##-F##-feature/[tasks|prps]/*.md`. A sync run discovers them
//! through configurable filename patterns, assigns a `T-E##-F##-###` key to
//! every file that lacks one (writing it into the YAML frontmatter), extracts
//! title and description, and imports or reconciles the matching task rows.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │  scanner   │──▶│  patterns  │──▶│    keygen    │──▶│  SQLite  │
//! │ walk + cut │   │ name match │   │ path_infer + │   │  tasks   │
//! └────────────┘   └────────────┘   │ frontmatter  │   └────▲─────┘
//!                                   └──────┬───────┘        │
//!                                          ▼                │
//!                                   ┌──────────────┐        │
//!                                   │   extract +  │────────┘
//!                                   │   conflict   │
//!                                   └──────┬───────┘
//!                                          ▼
//!                                   ┌──────────────┐
//!                                   │  ScanReport  │
//!                                   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! plansync init                                  # create database
//! plansync epic add E04 --title "Search"
//! plansync feature add E04-F02 --title "Cache"
//! plansync sync --dry-run                        # preview
//! plansync sync --json                           # import and print report
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`patterns`] | Filename pattern registry and validation |
//! | [`scanner`] | Markdown discovery and incremental filter |
//! | [`path_infer`] | Epic/feature resolution from folder names |
//! | [`discovery`] | Epic/feature folder discovery and `epic-index.md` titles |
//! | [`frontmatter`] | Frontmatter parsing and in-place key writes |
//! | [`fileops`] | Atomic file replacement |
//! | [`extract`] | Title and description strategies |
//! | [`keygen`] | Task key allocation |
//! | [`conflict`] | File vs. database reconciliation |
//! | [`sync`] | The sync engine |
//! | [`report`] | Structured run report |
//! | [`store`] | Data-access traits and the in-memory store |
//! | [`sqlite_store`] | SQLite store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod conflict;
pub mod db;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod fileops;
pub mod frontmatter;
pub mod keygen;
pub mod migrate;
pub mod models;
pub mod path_infer;
pub mod patterns;
pub mod progress;
pub mod report;
pub mod scanner;
pub mod sqlite_store;
pub mod store;
pub mod sync;
