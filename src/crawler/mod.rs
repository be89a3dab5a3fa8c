//! Crawler module
//!
//! This module contains the breadth-first crawl engine and its collaborators:
//! - Crawl jobs, scopes and per-URL results
//! - The `FetchClient` transport seam and its reqwest implementation
//! - HTML link extraction
//! - The per-domain fetch gate that enforces crawl delays

mod engine;
mod fetcher;
mod job;
mod parser;
mod scheduler;

pub use engine::{CrawlEngine, EngineSettings};
pub use fetcher::{
    build_http_client, FetchClient, FetchError, FetchRequest, FetchResponse, ReqwestFetchClient,
};
pub use job::{CrawlJob, CrawlResult, CrawlScope};
pub use parser::{extract_links, parse_page, ParsedPage};
pub use scheduler::{DomainGate, GatePermit};
