//! Turning names and ID batches into persisted profile snapshots.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::api::{LOOKUP_BATCH_SIZE, RemoteApi};
use crate::client::{RateLimitedClient, Sleeper};
use crate::error::{ApiError, ApiResult};
use crate::model::{TaskId, UserProfile};
use crate::paginate::paginate;
use crate::storage::{RecordSink, persist};

/// Key under which a screen name is looked up: NFKC, lowercased, no `@`.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_start_matches('@')
        .nfkc()
        .collect::<String>()
        .to_lowercase()
}

/// Why a resolved ego was kept out of the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    /// More followers than the caller's ceiling.
    FollowerCeiling,
    Protected,
}

/// Outcome of resolving one ego name.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(UserProfile),
    Excluded {
        profile: UserProfile,
        reason: Exclusion,
    },
    Failed(ApiError),
}

/// Every profile resolved in a run, each user once, in discovery order.
#[derive(Debug, Default)]
pub struct Population {
    order: Vec<i64>,
    members: HashMap<i64, UserProfile>,
}

impl Population {
    /// Add a member; a user already present keeps its first snapshot.
    pub fn insert(&mut self, profile: UserProfile) -> bool {
        if self.members.contains_key(&profile.user_id) {
            return false;
        }
        self.order.push(profile.user_id);
        self.members.insert(profile.user_id, profile);
        true
    }

    #[must_use]
    pub fn contains(&self, user_id: i64) -> bool {
        self.members.contains_key(&user_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserProfile> {
        self.order.iter().filter_map(|id| self.members.get(id))
    }

    /// `(Σ friends_count, Σ followers_count)` over all members.
    #[must_use]
    pub fn totals(&self) -> (i64, i64) {
        self.iter().fold((0, 0), |(friends, followers), p| {
            (
                friends.saturating_add(p.friends_count),
                followers.saturating_add(p.followers_count),
            )
        })
    }
}

/// Resolves ego names and hydrates neighbor IDs into profiles.
#[derive(Debug, Clone)]
pub struct ProfileResolver {
    task_id: TaskId,
    store_retries: u32,
}

impl ProfileResolver {
    pub const fn new(task_id: TaskId, store_retries: u32) -> Self {
        Self {
            task_id,
            store_retries,
        }
    }

    /// Look up one ego and apply the exclusion policy.
    ///
    /// Resolved and excluded profiles are both persisted; only
    /// [`Resolution::Resolved`] profiles become egos.
    pub fn resolve_ego<A, S, K>(
        &self,
        client: &mut RateLimitedClient<A, S>,
        sink: &mut K,
        name: &str,
        max_followers: i64,
    ) -> Resolution
    where
        A: RemoteApi,
        S: Sleeper,
        K: RecordSink + ?Sized,
    {
        let label = format!("resolve @{name}");
        let remote = match client.with_retry(&label, |c| c.get_user(name)) {
            Ok(user) => user,
            Err(err) => {
                warn!(user = name, task = %self.task_id, error = %err, "Ego lookup failed, dropping name");
                return Resolution::Failed(err);
            }
        };

        let mut profile = UserProfile::from_remote(&remote, &self.task_id);
        let reason = if profile.followers_count > max_followers {
            profile.exceeds_follower_ceiling = true;
            Some(Exclusion::FollowerCeiling)
        } else if profile.is_protected {
            Some(Exclusion::Protected)
        } else {
            None
        };

        persist(sink, self.store_retries, &format_args!("user {}", profile.user_id), |s| {
            s.save_user(&profile)
        });

        match reason {
            Some(reason) => {
                info!(
                    user = name,
                    followers = profile.followers_count,
                    max_followers,
                    ?reason,
                    "Ego excluded"
                );
                Resolution::Excluded { profile, reason }
            }
            None => {
                debug!(user = name, user_id = profile.user_id, "Ego resolved");
                Resolution::Resolved(profile)
            }
        }
    }

    /// Resolve up to [`LOOKUP_BATCH_SIZE`] IDs, persist each profile and add
    /// it to the population. Returns the number of profiles received.
    ///
    /// # Errors
    ///
    /// Returns the lookup error once the retry budget is spent.
    pub fn hydrate_batch<A, S, K>(
        &self,
        client: &mut RateLimitedClient<A, S>,
        sink: &mut K,
        ids: &[i64],
        population: &mut Population,
    ) -> ApiResult<usize>
    where
        A: RemoteApi,
        S: Sleeper,
        K: RecordSink + ?Sized,
    {
        debug_assert!(ids.len() <= LOOKUP_BATCH_SIZE);
        let label = format!("lookup {} users", ids.len());
        let users = client.with_retry(&label, |c| c.lookup_user_ids(ids))?;

        for remote in &users {
            let profile = UserProfile::from_remote(remote, &self.task_id);
            persist(sink, self.store_retries, &format_args!("user {}", profile.user_id), |s| {
                s.save_user(&profile)
            });
            population.insert(profile);
        }
        Ok(users.len())
    }

    /// Hydrate any number of IDs, batch by batch. A failed batch is logged and
    /// skipped. Returns the number of profiles received.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Fatal`] at once; no further batch is attempted.
    pub fn hydrate_all<A, S, K>(
        &self,
        client: &mut RateLimitedClient<A, S>,
        sink: &mut K,
        ids: &[i64],
        population: &mut Population,
    ) -> ApiResult<usize>
    where
        A: RemoteApi,
        S: Sleeper,
        K: RecordSink + ?Sized,
    {
        let mut hydrated = 0;
        for batch in paginate(ids.iter().copied(), LOOKUP_BATCH_SIZE) {
            match self.hydrate_batch(client, sink, &batch, population) {
                Ok(n) => hydrated += n,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!(
                    task = %self.task_id,
                    first_id = batch[0],
                    batch = batch.len(),
                    error = %err,
                    "Abandoning user lookup batch"
                ),
            }
        }
        Ok(hydrated)
    }
}

/// Whether a screen name exists (case-insensitive).
///
/// # Errors
///
/// Returns errors other than `NotFound` once the retry budget is spent.
pub fn user_exists<A: RemoteApi, S: Sleeper>(
    client: &mut RateLimitedClient<A, S>,
    screen_name: &str,
) -> ApiResult<bool> {
    let wanted = normalize_name(screen_name);
    match client.with_retry(&format!("check @{screen_name}"), |c| c.get_user(screen_name)) {
        Ok(user) => Ok(normalize_name(&user.screen_name) == wanted),
        Err(ApiError::NotFound { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}

/// IDs for a list of screen names, looked up 100 at a time. Unknown names are
/// left out.
///
/// # Errors
///
/// Returns the lookup error of the first batch that exhausts its retries.
pub fn ids_for_names<A: RemoteApi, S: Sleeper>(
    client: &mut RateLimitedClient<A, S>,
    names: &[String],
) -> ApiResult<Vec<i64>> {
    let mut ids = Vec::with_capacity(names.len());
    for batch in paginate(names.iter().cloned(), LOOKUP_BATCH_SIZE) {
        let label = format!("lookup {} names", batch.len());
        let users = client.with_retry(&label, |c| c.lookup_screen_names(&batch))?;
        ids.extend(users.into_iter().map(|u| u.id));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RetryPolicy;
    use crate::mock::{MockApi, RecordingSleeper};
    use crate::storage::Storage;
    use std::time::Duration;

    fn client(api: MockApi) -> RateLimitedClient<MockApi, RecordingSleeper> {
        RateLimitedClient::with_sleeper(
            api,
            RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_secs(1),
            },
            RecordingSleeper::default(),
        )
    }

    fn resolver() -> ProfileResolver {
        ProfileResolver::new(TaskId::new("t1"), 1)
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name(" @Alice "), "alice");
        // Fullwidth letters fold to ASCII under NFKC.
        assert_eq!(normalize_name("ＢＯＢ"), "bob");
    }

    #[test]
    fn test_follower_ceiling_boundary() {
        let mut client = client(
            MockApi::new()
                .with_user(1, "equal", 10, 1000)
                .with_user(2, "over", 10, 1001),
        );
        let mut storage = Storage::open_memory().unwrap();

        let equal = resolver().resolve_ego(&mut client, &mut storage, "equal", 1000);
        assert!(matches!(equal, Resolution::Resolved(_)));

        match resolver().resolve_ego(&mut client, &mut storage, "over", 1000) {
            Resolution::Excluded { profile, reason } => {
                assert_eq!(reason, Exclusion::FollowerCeiling);
                assert!(profile.exceeds_follower_ceiling);
            }
            other => panic!("expected exclusion, got {other:?}"),
        }

        let users = storage.users_for_task(&TaskId::new("t1")).unwrap();
        assert_eq!(users.len(), 2);
        assert!(users[1].exceeds_follower_ceiling);
    }

    #[test]
    fn test_protected_ego_is_excluded_but_persisted() {
        let mut client = client(MockApi::new().with_protected_user(3, "carol", 1, 1));
        let mut storage = Storage::open_memory().unwrap();

        let result = resolver().resolve_ego(&mut client, &mut storage, "carol", 1_000_000);
        assert!(matches!(
            result,
            Resolution::Excluded {
                reason: Exclusion::Protected,
                ..
            }
        ));
        assert_eq!(storage.users_for_task(&TaskId::new("t1")).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_ego_fails_without_retry() {
        let mut client = client(MockApi::new());
        let mut storage = Storage::open_memory().unwrap();

        let result = resolver().resolve_ego(&mut client, &mut storage, "ghost", 10);
        assert!(matches!(result, Resolution::Failed(ApiError::NotFound { .. })));
        assert_eq!(client.api().calls_to("users/show"), 1);
        assert!(storage.users_for_task(&TaskId::new("t1")).unwrap().is_empty());
    }

    #[test]
    fn test_hydrate_all_batches_by_hundred() {
        let mut api = MockApi::new();
        for id in 1..=250 {
            api = api.with_user(id, &format!("user{id}"), 1, 1);
        }
        let mut client = client(api);
        let mut storage = Storage::open_memory().unwrap();
        let mut population = Population::default();

        let ids: Vec<i64> = (1..=250).collect();
        let hydrated = resolver()
            .hydrate_all(&mut client, &mut storage, &ids, &mut population)
            .unwrap();

        assert_eq!(hydrated, 250);
        assert_eq!(population.len(), 250);
        assert_eq!(client.api().calls_for("users/lookup", "100"), 2);
        assert_eq!(client.api().calls_for("users/lookup", "50"), 1);
    }

    #[test]
    fn test_hydrate_all_skips_failed_batch() {
        let mut api = MockApi::new();
        for id in 1..=150 {
            api = api.with_user(id, &format!("user{id}"), 1, 1);
        }
        api.fail_next("users/lookup:100", ApiError::permanent("Not authorized."));
        let mut client = client(api);
        let mut storage = Storage::open_memory().unwrap();
        let mut population = Population::default();

        let ids: Vec<i64> = (1..=150).collect();
        let hydrated = resolver()
            .hydrate_all(&mut client, &mut storage, &ids, &mut population)
            .unwrap();
        assert_eq!(hydrated, 50);
    }

    #[test]
    fn test_hydrate_all_stops_on_fatal() {
        let mut api = MockApi::new();
        for id in 1..=250 {
            api = api.with_user(id, &format!("user{id}"), 1, 1);
        }
        api.fail_next("users/lookup", ApiError::fatal("Invalid or expired token"));
        let mut client = client(api);
        let mut storage = Storage::open_memory().unwrap();
        let mut population = Population::default();

        let ids: Vec<i64> = (1..=250).collect();
        let result = resolver().hydrate_all(&mut client, &mut storage, &ids, &mut population);

        assert!(matches!(result, Err(ApiError::Fatal { .. })));
        assert_eq!(client.api().calls_to("users/lookup"), 1);
        assert!(population.is_empty());
    }

    #[test]
    fn test_population_keeps_first_snapshot() {
        let mut population = Population::default();
        let task = TaskId::new("t1");
        let mut profile = UserProfile::from_remote(
            &crate::api::types::RemoteUser {
                id: 1,
                friends_count: 5,
                followers_count: 7,
                ..Default::default()
            },
            &task,
        );
        assert!(population.insert(profile.clone()));
        profile.friends_count = 500;
        assert!(!population.insert(profile));
        assert_eq!(population.totals(), (5, 7));
    }

    #[test]
    fn test_user_exists_and_ids_for_names() {
        let mut client = client(
            MockApi::new()
                .with_user(1, "Alice", 1, 1)
                .with_user(2, "bob", 1, 1),
        );
        assert!(user_exists(&mut client, "alice").unwrap());
        assert!(!user_exists(&mut client, "nobody").unwrap());

        let names = vec!["ALICE".to_string(), "ghost".to_string(), "bob".to_string()];
        assert_eq!(ids_for_names(&mut client, &names).unwrap(), vec![1, 2]);
    }
}
