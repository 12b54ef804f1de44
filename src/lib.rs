pub mod auto;
pub mod core;
pub mod discovery;
pub mod extract;
pub mod fetch;
pub mod net;
pub mod pipeline;
pub mod sites;
pub mod storage;

// --- Primary exports ---
pub use auto::runner::AutoCrawler;
pub use auto::scheduler::{compute_deficits, plan_round, PlanParams, RoundPlan};
pub use auto::state::AutoState;
pub use core::config::{load_config, CrawlerConfig};
pub use core::types;
pub use core::types::{Candidate, Document, FetchResult, PipelineStats};
pub use pipeline::{Pipeline, PipelineOptions};
