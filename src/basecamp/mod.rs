//! Basecamp 3 API access and the resource crawler

pub mod client;
pub mod crawl;
pub mod link;
pub mod types;

pub use client::{
    get_all_pages, get_with_retry, parse_next_link, ApiResponse, ApiTransport, BasecampClient,
    RetryPolicy, API_BASE,
};
pub use crawl::{find_enabled_integration, CrawlOptions, Crawler};
pub use link::{parse_todo_url, TodoLink};
pub use types::*;
