use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::info;

use crate::model::*;

use super::{Engine, EngineError, IsolationLevel};

/// Result of reading one partition's schedule twice inside a single
/// transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhantomProbe {
    pub isolation: IsolationLevel,
    pub first_count: usize,
    pub second_count: usize,
}

impl PhantomProbe {
    /// Rows appeared or vanished between the two reads.
    pub fn phantom_observed(&self) -> bool {
        self.first_count != self.second_count
    }
}

impl Engine {
    /// Count schedule entries for `(resource_id, date)`, wait `pause`, count
    /// again in the same transaction. Under `ReadCommitted` a booking
    /// committed during the pause shows up in the second count; under
    /// `Serializable` both counts match.
    pub async fn probe_phantom_reads(
        &self,
        resource_id: ResourceId,
        date: NaiveDate,
        isolation: IsolationLevel,
        pause: Duration,
    ) -> Result<PhantomProbe, EngineError> {
        self.probe_phantom_reads_with(resource_id, date, isolation, tokio::time::sleep(pause))
            .await
    }

    /// Like `probe_phantom_reads`, but runs `between` instead of sleeping, so
    /// callers can interleave a concurrent write deterministically.
    pub async fn probe_phantom_reads_with<F>(
        &self,
        resource_id: ResourceId,
        date: NaiveDate,
        isolation: IsolationLevel,
        between: F,
    ) -> Result<PhantomProbe, EngineError>
    where
        F: Future<Output = ()>,
    {
        let key = DayKey::new(resource_id, date);
        let mut tx = self.begin(isolation);
        let first_count = tx.read_day(key).await?.entry_count();
        between.await;
        let second_count = tx.read_day(key).await?.entry_count();
        tx.commit().await?;

        let probe = PhantomProbe {
            isolation,
            first_count,
            second_count,
        };
        info!(
            isolation = isolation.as_str(),
            first_count,
            second_count,
            phantom = probe.phantom_observed(),
            "phantom read probe"
        );
        Ok(probe)
    }
}
