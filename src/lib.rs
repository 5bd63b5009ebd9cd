// src/lib.rs

//! Keyword digest library: fetch new subreddit posts on a cron schedule and
//! email them as a digest.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod trigger;
pub mod utils;
