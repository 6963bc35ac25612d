//! Friend and follower ID collection, and edge emission.

use std::collections::HashSet;
use std::time::Duration;

use tracing::debug;

use crate::api::RemoteApi;
use crate::api::types::UserRef;
use crate::client::{RateLimitedClient, Sleeper};
use crate::error::ApiResult;
use crate::model::{RelationKind, Relationship, TaskId};
use crate::paginate::CursorPages;
use crate::storage::{RecordSink, persist};

#[derive(Debug, Clone)]
pub struct RelationCollector {
    task_id: TaskId,
    store_retries: u32,
    page_delay: Duration,
}

impl RelationCollector {
    pub const fn new(task_id: TaskId, store_retries: u32, page_delay: Duration) -> Self {
        Self {
            task_id,
            store_retries,
            page_delay,
        }
    }

    /// Every friend or follower ID of `user`.
    ///
    /// The remote cursor cannot be resumed, so a transient failure restarts
    /// the walk from the first page. IDs gathered by earlier attempts are
    /// kept; the set absorbs the overlap.
    ///
    /// # Errors
    ///
    /// Returns the permanent error, or [`crate::error::ApiError::Exhausted`]
    /// once the retry budget is spent.
    pub fn collect_ids<A: RemoteApi, S: Sleeper>(
        &self,
        client: &mut RateLimitedClient<A, S>,
        user: &UserRef,
        kind: RelationKind,
    ) -> ApiResult<HashSet<i64>> {
        let label = format!("{} of {user}", kind.plural());
        let mut ids = HashSet::new();
        let mut pages = 0_usize;

        client.with_retry(&label, |c| {
            for page in CursorPages::new(|cursor| c.ids_page(kind, user, cursor)) {
                ids.extend(page?);
                pages += 1;
                c.pause(self.page_delay);
            }
            Ok(())
        })?;

        debug!(user = %user, kind = %kind, ids = ids.len(), pages, "Collected IDs");
        Ok(ids)
    }

    /// Persist one `user → id` edge per ID, never a self edge. Returns the
    /// number of edges written.
    pub fn build_edges<'a, K: RecordSink + ?Sized>(
        &self,
        sink: &mut K,
        user_id: i64,
        ids: impl IntoIterator<Item = &'a i64>,
        kind: RelationKind,
    ) -> usize {
        let mut written = 0;
        for &to_user_id in ids {
            if to_user_id == user_id {
                continue;
            }
            let edge = Relationship {
                from_user_id: user_id,
                to_user_id,
                kind,
                task_id: self.task_id.clone(),
            };
            let label = format!("{kind} edge {user_id} -> {to_user_id}");
            if persist(sink, self.store_retries, &label, |s| s.save_relationship(&edge)) {
                written += 1;
            }
        }
        written
    }
}
