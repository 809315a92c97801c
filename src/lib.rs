// src/lib.rs

//! slotwatch: availability watcher library.
//!
//! Tracks subjects (tutors with public schedule pages), sweeps their pages on
//! a fixed period, and pushes a notification whenever the number of open
//! slots rises.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
