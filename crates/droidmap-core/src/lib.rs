//! Core types and logic for droidmap.
//!
//! This crate holds the synchronous half of Android app exploration: turning
//! UI-tree dumps into comparable pages and recording how pages connect. The
//! async device plumbing and the exploration loop live in `droidmap-cli`.
//!
//! # Modules
//!
//! - [`elements`]: UI-tree parsing, importance scoring and element matching
//! - [`page`]: Captured screen state and content hashing
//! - [`recognize`]: Page signatures, duplicate lookup, categories, assistance detection
//! - [`operation`]: Append-only action log records
//! - [`graph`]: Page/transition graph with reachability, cycles and coverage
//! - [`catalogue`]: Per-session context owning pages, log and graph
//! - [`report`]: Coverage report and Mermaid/DOT export
//! - [`error`]: Error records with actionable suggestions
//!
//! # Element Scoring
//!
//! Elements are ranked by a heuristic importance score. Anything scoring
//! at least 2.0 is treated as interactive and gets acted on, highest first:
//!
//! | Signal | Weight |
//! |--------|--------|
//! | Non-empty text | 3.0 (+1.0 over 10 chars) |
//! | Resource id | 2.5 |
//! | Content description | 2.0 |
//! | Clickable / editable | 1.5 each |
//! | Class hint (`button`, `text`, `edit`, ...) | 0.5 each |
//! | Area between 1000 and 10000 px² | 0.5 |

pub mod catalogue;
pub mod elements;
pub mod error;
pub mod graph;
pub mod operation;
pub mod page;
pub mod recognize;
pub mod report;
