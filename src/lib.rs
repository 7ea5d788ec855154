//! URL archiver library.
//!
//! Archives web pages and videos into local artifacts, tracks each
//! submission through QUEUED, RUNNING, DONE and ERROR, and keeps a
//! full-text search index in step with the archive records.

#![allow(clippy::needless_raw_string_hashes)]

pub mod archiver;
pub mod capture;
pub mod config;
pub mod constants;
pub mod db;
pub mod queue;
pub mod service;
pub mod web;
