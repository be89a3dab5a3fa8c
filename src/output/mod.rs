//! Output module for crawl summaries
//!
//! This module handles:
//! - Aggregating a job's `CrawlResult`s into a `CrawlSummary`
//! - Printing the summary with proxy and fallback statistics

mod summary;

pub use summary::{print_summary, CrawlSummary};
