//! PostgreSQL implementations of the store traits.

mod batch_repo;
mod job_repo;
mod rate_limit_repo;

pub use batch_repo::PgBatchRepository;
pub use job_repo::PgJobRepository;
pub use rate_limit_repo::PgUsageRepository;

use crate::db::AsyncDbPool;

/// All repositories over one pool. Cloning is cheap; the pool is `Arc` inside.
#[derive(Clone)]
pub struct Repositories {
    pub jobs: PgJobRepository,
    pub batches: PgBatchRepository,
    pub usage: PgUsageRepository,
}

impl Repositories {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self {
            jobs: PgJobRepository::new(pool.clone()),
            batches: PgBatchRepository::new(pool.clone()),
            usage: PgUsageRepository::new(pool),
        }
    }
}
