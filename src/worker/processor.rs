use crate::error::Result;
use crate::store::{JobUnit, WorkItem};

/// Group used when a processor has no costly state to switch.
pub const DEFAULT_GROUP: &str = "default";

/// The unit of work performed per manifest item.
///
/// Jobs are grouped by [`group_key`](ItemProcessor::group_key) so expensive
/// state (a loaded model, a GPU context) is set up once per group with
/// [`prepare`](ItemProcessor::prepare) and torn down with
/// [`release`](ItemProcessor::release).
///
/// An item counts as done only when `process` returns `Ok` and the item's
/// completion marker exists afterwards.
#[allow(async_fn_in_trait)]
pub trait ItemProcessor {
    fn group_key(&self, _job: &JobUnit) -> String {
        DEFAULT_GROUP.to_string()
    }

    async fn prepare(&mut self, _group: &str) -> Result<()> {
        Ok(())
    }

    async fn process(&mut self, job: &JobUnit, item: &WorkItem) -> Result<()>;

    async fn release(&mut self, _group: &str) {}
}
