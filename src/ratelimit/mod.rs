//! Token-bucket rate limiting and bucket state management.

mod bucket;
mod limiter;
mod pool;
mod registry;
mod rules;

pub use bucket::{Bucket, Resync};
pub use limiter::{RateLimiter, DEFAULT_SHARDS};
pub use pool::{BucketId, BucketPool};
pub use registry::{BucketList, Registry};
pub use rules::{Rule, RuleSet};
