//! Ego-network orchestration.
//!
//! A run walks through up to five phases, each logged through an
//! [`OperationGuard`]:
//!
//! 1. resolve the ego names into the active set,
//! 2. collect and hydrate friends,
//! 3. collect and hydrate followers,
//! 4. record list memberships and subscriptions,
//! 5. expand every population member into the induced relationship graph.
//!
//! Failures never end a run. Each abandoned sub-operation is logged and
//! listed in the returned [`NetworkReport`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::RemoteApi;
use crate::api::types::{ListSummary, UserRef};
use crate::client::{RateLimitedClient, Sleeper};
use crate::config::ThrottleConfig;
use crate::error::ApiResult;
use crate::log_progress;
use crate::logging::OperationGuard;
use crate::model::{ListInfo, ListRole, RelationKind, TaskId, UserProfile};
use crate::paginate::CursorPages;
use crate::profiles::{Exclusion, Population, ProfileResolver, Resolution, normalize_name};
use crate::relations::RelationCollector;
use crate::storage::{RecordSink, persist};

/// What one network run collects.
#[derive(Debug, Clone)]
pub struct NetworkOptions {
    pub task_id: TaskId,
    pub collect_friends: bool,
    pub collect_followers: bool,
    pub collect_list_memberships: bool,
    pub collect_list_subscriptions: bool,
    /// Replace ego edges by the induced graph over the whole population.
    pub build_full_relationship_graph: bool,
    /// Egos with more followers than this are not expanded.
    pub max_followers: i64,
}

impl NetworkOptions {
    pub fn new(task_id: TaskId, max_followers: i64) -> Self {
        Self {
            task_id,
            collect_friends: false,
            collect_followers: false,
            collect_list_memberships: false,
            collect_list_subscriptions: false,
            build_full_relationship_graph: false,
            max_followers,
        }
    }
}

/// Resolved egos keyed by normalized screen name, in resolution order.
#[derive(Debug, Default)]
pub struct ActiveEgos {
    order: Vec<String>,
    by_name: HashMap<String, UserProfile>,
}

impl ActiveEgos {
    /// Add an ego; a name already present keeps its profile.
    pub fn insert(&mut self, profile: UserProfile) -> bool {
        let key = normalize_name(&profile.screen_name);
        if self.by_name.contains_key(&key) {
            return false;
        }
        self.order.push(key.clone());
        self.by_name.insert(key, profile);
        true
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&UserProfile> {
        self.by_name.get(&normalize_name(name))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(&normalize_name(name))
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
        self.order.iter().filter_map(|key| self.by_name.get(key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedEgo {
    pub screen_name: String,
    pub reason: Exclusion,
}

/// Summary of one network run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkReport {
    pub task_id: String,
    pub egos: Vec<String>,
    pub excluded: Vec<ExcludedEgo>,
    pub unresolved: Vec<String>,
    pub population: usize,
    pub friend_edges: usize,
    pub follower_edges: usize,
    pub lists: usize,
    /// Direction of the full-graph pass, when one ran.
    pub graph_direction: Option<RelationKind>,
    /// Sub-operations given up on, with the reason.
    pub abandoned: Vec<String>,
}

impl NetworkReport {
    fn add_edges(&mut self, kind: RelationKind, count: usize) {
        match kind {
            RelationKind::Friend => self.friend_edges += count,
            RelationKind::Follower => self.follower_edges += count,
        }
    }
}

/// Pick the cheaper direction for the full-graph pass; ties go to friends.
#[must_use]
pub const fn graph_direction(total_friends: i64, total_followers: i64) -> RelationKind {
    if total_friends <= total_followers {
        RelationKind::Friend
    } else {
        RelationKind::Follower
    }
}

pub struct EgoNetworkBuilder<A, S, K> {
    client: RateLimitedClient<A, S>,
    sink: K,
    throttle: ThrottleConfig,
    store_retries: u32,
}

impl<A: RemoteApi, S: Sleeper, K: RecordSink> EgoNetworkBuilder<A, S, K> {
    pub const fn new(
        client: RateLimitedClient<A, S>,
        sink: K,
        throttle: ThrottleConfig,
        store_retries: u32,
    ) -> Self {
        Self {
            client,
            sink,
            throttle,
            store_retries,
        }
    }

    pub const fn client(&self) -> &RateLimitedClient<A, S> {
        &self.client
    }

    pub const fn sink(&self) -> &K {
        &self.sink
    }

    /// Collect the ego network of `names`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ApiError::Fatal`] as soon as any call reports it; records
    /// written up to that point stay stored. Every other failure is recorded
    /// in the report and the run continues.
    pub fn run(&mut self, names: &[String], options: &NetworkOptions) -> ApiResult<NetworkReport> {
        let task = options.task_id.as_str();
        let resolver = ProfileResolver::new(options.task_id.clone(), self.store_retries);
        let relations = RelationCollector::new(
            options.task_id.clone(),
            self.store_retries,
            self.throttle.page_delay(),
        );
        let mut report = NetworkReport {
            task_id: task.to_string(),
            ..NetworkReport::default()
        };
        let mut population = Population::default();

        let egos = OperationGuard::new("resolve egos", task).finish(self.resolve_egos(
            &resolver,
            names,
            options,
            &mut population,
            &mut report,
        ))?;
        info!(task, active = egos.len(), "Ego set ready");

        for (enabled, kind) in [
            (options.collect_friends, RelationKind::Friend),
            (options.collect_followers, RelationKind::Follower),
        ] {
            if !enabled {
                continue;
            }
            let guard = OperationGuard::new(format!("collect {}", kind.plural()), task);
            let expanded = egos.iter().try_for_each(|ego| {
                self.expand_ego(
                    &resolver,
                    &relations,
                    ego,
                    kind,
                    options,
                    &mut population,
                    &mut report,
                )
            });
            guard.finish(expanded)?;
        }

        let mut known_lists = HashSet::new();
        for (enabled, role) in [
            (options.collect_list_memberships, ListRole::Member),
            (options.collect_list_subscriptions, ListRole::Subscriber),
        ] {
            if !enabled {
                continue;
            }
            let guard = OperationGuard::new(format!("collect list {role:?}s").to_lowercase(), task);
            let collected = egos.iter().try_for_each(|ego| {
                self.collect_lists(ego, role, &options.task_id, &mut known_lists, &mut report)
            });
            guard.finish(collected)?;
        }

        if options.build_full_relationship_graph {
            // Only the per-member delay applies in this pass.
            let graph_relations =
                RelationCollector::new(options.task_id.clone(), self.store_retries, Duration::ZERO);
            let guard = OperationGuard::new("full relationship graph", task);
            guard.finish(self.full_graph(&graph_relations, &population, &mut report))?;
        }

        report.population = population.len();
        Ok(report)
    }

    fn resolve_egos(
        &mut self,
        resolver: &ProfileResolver,
        names: &[String],
        options: &NetworkOptions,
        population: &mut Population,
        report: &mut NetworkReport,
    ) -> ApiResult<ActiveEgos> {
        let mut egos = ActiveEgos::default();
        let mut seen = HashSet::new();

        for name in names {
            let key = normalize_name(name);
            if key.is_empty() || !seen.insert(key.clone()) {
                continue;
            }
            match resolver.resolve_ego(&mut self.client, &mut self.sink, &key, options.max_followers) {
                Resolution::Resolved(profile) => {
                    report.egos.push(profile.screen_name.clone());
                    population.insert(profile.clone());
                    egos.insert(profile);
                }
                Resolution::Excluded { profile, reason } => {
                    report.excluded.push(ExcludedEgo {
                        screen_name: profile.screen_name,
                        reason,
                    });
                }
                Resolution::Failed(err) if err.is_fatal() => return Err(err),
                Resolution::Failed(err) => {
                    report.unresolved.push(key.clone());
                    report.abandoned.push(format!("resolve @{key}: {err}"));
                }
            }
        }
        Ok(egos)
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_ego(
        &mut self,
        resolver: &ProfileResolver,
        relations: &RelationCollector,
        ego: &UserProfile,
        kind: RelationKind,
        options: &NetworkOptions,
        population: &mut Population,
        report: &mut NetworkReport,
    ) -> ApiResult<()> {
        let user = UserRef::Id(ego.user_id);
        let ids = match relations.collect_ids(&mut self.client, &user, kind) {
            Ok(ids) => ids,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(user = %ego.screen_name, kind = %kind, error = %err, "Abandoning ID collection");
                report
                    .abandoned
                    .push(format!("{} of @{}: {err}", kind.plural(), ego.screen_name));
                return Ok(());
            }
        };

        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        let hydrated = resolver.hydrate_all(&mut self.client, &mut self.sink, &ids, population)?;
        info!(
            user = %ego.screen_name,
            kind = %kind,
            ids = ids.len(),
            hydrated,
            "Neighbors hydrated"
        );

        // The full-graph pass writes its own edges.
        if !options.build_full_relationship_graph {
            let written = relations.build_edges(&mut self.sink, ego.user_id, &ids, kind);
            report.add_edges(kind, written);
        }
        Ok(())
    }

    fn collect_lists(
        &mut self,
        ego: &UserProfile,
        role: ListRole,
        task_id: &TaskId,
        known_lists: &mut HashSet<i64>,
        report: &mut NetworkReport,
    ) -> ApiResult<()> {
        let user = UserRef::Id(ego.user_id);
        let label = format!("lists ({role:?}) of @{}", ego.screen_name).to_lowercase();
        let delay = self.throttle.page_delay();

        let mut lists: Vec<ListSummary> = Vec::new();
        let mut seen = HashSet::new();
        let fetched: ApiResult<()> = self.client.with_retry(&label, |c| {
            for page in CursorPages::new(|cursor| c.lists_page(role, &user, cursor)) {
                for list in page? {
                    if seen.insert(list.id) {
                        lists.push(list);
                    }
                }
                c.pause(delay);
            }
            Ok(())
        });
        match fetched {
            Ok(()) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(user = %ego.screen_name, error = %err, "Abandoning list collection");
                report.abandoned.push(format!("{label}: {err}"));
                return Ok(());
            }
        }

        let mut recorded = 0;
        for list in lists {
            let record = format!("list {} ({role:?} @{})", list.full_name, ego.screen_name);
            let saved = if known_lists.contains(&list.id) {
                persist(&mut self.sink, self.store_retries, &record, |s| match role {
                    ListRole::Member => s.add_list_member(list.id, ego.user_id, task_id),
                    ListRole::Subscriber => s.add_list_subscriber(list.id, ego.user_id, task_id),
                })
            } else {
                let (members, subscribers) = match role {
                    ListRole::Member => (vec![ego.user_id], Vec::new()),
                    ListRole::Subscriber => (Vec::new(), vec![ego.user_id]),
                };
                let info = ListInfo {
                    list_id: list.id,
                    name: list.name,
                    full_name: list.full_name,
                    members,
                    subscribers,
                    task_id: task_id.clone(),
                };
                let saved = persist(&mut self.sink, self.store_retries, &record, |s| s.upsert_list(&info));
                if saved {
                    known_lists.insert(info.list_id);
                }
                saved
            };
            if saved {
                recorded += 1;
            }
        }
        report.lists += recorded;
        debug!(user = %ego.screen_name, ?role, lists = recorded, "Lists recorded");
        Ok(())
    }

    fn full_graph(
        &mut self,
        relations: &RelationCollector,
        population: &Population,
        report: &mut NetworkReport,
    ) -> ApiResult<()> {
        let members: Vec<&UserProfile> = population.iter().filter(|p| !p.is_protected).collect();
        if members.is_empty() {
            debug!(population = population.len(), "Nothing to expand");
            return Ok(());
        }

        let (total_friends, total_followers) = population.totals();
        let kind = graph_direction(total_friends, total_followers);
        report.graph_direction = Some(kind);
        info!(
            total_friends,
            total_followers,
            direction = kind.plural(),
            members = members.len(),
            "Expanding population"
        );

        let delay = self.throttle.graph_member_delay();
        for (index, member) in members.iter().enumerate() {
            self.client.pause(delay);

            let user = UserRef::Id(member.user_id);
            match relations.collect_ids(&mut self.client, &user, kind) {
                Ok(ids) => {
                    let mut inside: Vec<i64> = ids
                        .into_iter()
                        .filter(|id| *id != member.user_id && population.contains(*id))
                        .collect();
                    inside.sort_unstable();
                    let written = relations.build_edges(&mut self.sink, member.user_id, &inside, kind);
                    report.add_edges(kind, written);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(user = %member.screen_name, error = %err, "Abandoning member expansion");
                    report
                        .abandoned
                        .push(format!("{} of @{}: {err}", kind.plural(), member.screen_name));
                }
            }
            log_progress!(index + 1, members.len(), "Full-graph progress");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::RemoteUser;
    use crate::client::RetryPolicy;
    use crate::error::{ApiError, StoreResult};
    use crate::mock::{self, MockApi, RecordingSleeper};
    use crate::model::{Relationship, Tweet};
    use crate::storage::Storage;

    fn builder(api: MockApi) -> EgoNetworkBuilder<MockApi, RecordingSleeper, Storage> {
        let client = RateLimitedClient::with_sleeper(
            api,
            RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_secs(1),
            },
            RecordingSleeper::default(),
        );
        EgoNetworkBuilder::new(
            client,
            Storage::open_memory().unwrap(),
            ThrottleConfig::none(),
            1,
        )
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_graph_direction_ties_go_to_friends() {
        assert_eq!(graph_direction(500, 700), RelationKind::Friend);
        assert_eq!(graph_direction(700, 700), RelationKind::Friend);
        assert_eq!(graph_direction(701, 700), RelationKind::Follower);
    }

    #[test]
    fn test_active_egos_keyed_by_normalized_name() {
        let task = TaskId::new("t1");
        let mut egos = ActiveEgos::default();
        let profile = |id, name: &str| {
            UserProfile::from_remote(
                &RemoteUser {
                    id,
                    screen_name: name.to_string(),
                    ..RemoteUser::default()
                },
                &task,
            )
        };
        assert!(egos.insert(profile(1, "Alice")));
        assert!(!egos.insert(profile(1, "alice")));
        assert!(egos.insert(profile(2, "bob")));

        assert!(egos.contains("@ALICE"));
        assert_eq!(egos.get("Bob").map(|p| p.user_id), Some(2));
        let order: Vec<i64> = egos.iter().map(|p| p.user_id).collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn test_duplicate_names_resolve_once() {
        let mut builder = builder(MockApi::new().with_user(1, "alice", 0, 0));
        let options = NetworkOptions::new(TaskId::new("t1"), 1000);

        let report = builder
            .run(&names(&["alice", "@Alice", " ALICE "]), &options)
            .unwrap();
        assert_eq!(report.egos, vec!["alice"]);
        assert_eq!(builder.client().api().calls_to("users/show"), 1);
    }

    #[test]
    fn test_unresolved_and_excluded_egos_are_reported() {
        let api = MockApi::new()
            .with_user(1, "alice", 10, 10)
            .with_user(2, "celeb", 10, 5000)
            .with_protected_user(3, "carol", 1, 1)
            .with_friends(1, vec![vec![]]);
        let mut builder = builder(api);
        let mut options = NetworkOptions::new(TaskId::new("t1"), 1000);
        options.collect_friends = true;

        let report = builder.run(&names(&["alice", "celeb", "carol", "ghost"]), &options).unwrap();

        assert_eq!(report.egos, vec!["alice"]);
        assert_eq!(report.unresolved, vec!["ghost"]);
        let reasons: Vec<Exclusion> = report.excluded.iter().map(|e| e.reason).collect();
        assert_eq!(reasons, vec![Exclusion::FollowerCeiling, Exclusion::Protected]);
        // Excluded egos are never expanded.
        assert_eq!(builder.client().api().calls_for("friends/ids", "2"), 0);
        assert_eq!(builder.client().api().calls_for("friends/ids", "3"), 0);
    }

    #[test]
    fn test_list_memberships_and_subscriptions() {
        let api = MockApi::new()
            .with_user(1, "alice", 0, 0)
            .with_user(2, "bob", 0, 0)
            .with_memberships(1, vec![vec![mock::list(100, "x", "rust")], vec![mock::list(101, "x", "go")]])
            .with_memberships(2, vec![vec![mock::list(100, "x", "rust")]])
            .with_subscriptions(2, vec![vec![mock::list(200, "y", "news")]]);
        let mut builder = builder(api);
        let mut options = NetworkOptions::new(TaskId::new("t1"), 1000);
        options.collect_list_memberships = true;
        options.collect_list_subscriptions = true;

        let report = builder.run(&names(&["alice", "bob"]), &options).unwrap();
        assert_eq!(report.lists, 4);

        let task = TaskId::new("t1");
        let storage = builder.sink();
        assert_eq!(storage.list_members(100, &task).unwrap(), vec![1, 2]);
        assert_eq!(storage.list_members(101, &task).unwrap(), vec![1]);
        assert_eq!(storage.list_subscribers(200, &task).unwrap(), vec![2]);
        assert_eq!(storage.lists_for_task(&task).unwrap().len(), 3);
    }

    #[test]
    fn test_follower_edges_when_only_followers_collected() {
        let api = MockApi::new()
            .with_user(1, "alice", 0, 2)
            .with_user(10, "f1", 0, 0)
            .with_user(11, "f2", 0, 0)
            .with_followers(1, vec![vec![10, 11]]);
        let mut builder = builder(api);
        let mut options = NetworkOptions::new(TaskId::new("t1"), 1000);
        options.collect_followers = true;

        let report = builder.run(&names(&["alice"]), &options).unwrap();
        assert_eq!(report.follower_edges, 2);
        assert_eq!(report.friend_edges, 0);
        assert_eq!(report.population, 3);
    }

    #[test]
    fn test_full_graph_keeps_edges_inside_population() {
        let api = MockApi::new()
            .with_user(1, "alice", 2, 10)
            .with_user(2, "bob", 2, 10)
            .with_friends(1, vec![vec![2, 99]])
            .with_friends(2, vec![vec![1, 2]]);
        let mut builder = builder(api);
        let mut options = NetworkOptions::new(TaskId::new("t1"), 1000);
        options.build_full_relationship_graph = true;

        let report = builder.run(&names(&["alice", "bob"]), &options).unwrap();
        assert_eq!(report.graph_direction, Some(RelationKind::Friend));
        assert_eq!(report.friend_edges, 2);

        let edges = builder.sink().relationships_for_task(&TaskId::new("t1")).unwrap();
        let pairs: HashSet<(i64, i64)> = edges.iter().map(|e| (e.from_user_id, e.to_user_id)).collect();
        assert_eq!(pairs, HashSet::from([(1, 2), (2, 1)]));
    }

    #[test]
    fn test_full_graph_follower_branch_labels_follower_edges() {
        let api = MockApi::new()
            .with_user(1, "alice", 900, 10)
            .with_user(2, "bob", 900, 10)
            .with_followers(1, vec![vec![2]])
            .with_followers(2, vec![vec![1]]);
        let mut builder = builder(api);
        let mut options = NetworkOptions::new(TaskId::new("t1"), 1000);
        options.build_full_relationship_graph = true;

        let report = builder.run(&names(&["alice", "bob"]), &options).unwrap();
        assert_eq!(report.graph_direction, Some(RelationKind::Follower));
        assert_eq!(report.follower_edges, 2);
        assert_eq!(builder.client().api().calls_to("friends/ids"), 0);
    }

    #[test]
    fn test_full_graph_member_failure_is_scoped() {
        let api = MockApi::new()
            .with_user(1, "alice", 1, 10)
            .with_user(2, "bob", 1, 10)
            .with_friends(2, vec![vec![1]]);
        api.fail_next("friends/ids:1", ApiError::classify("Not authorized."));
        let mut builder = builder(api);
        let mut options = NetworkOptions::new(TaskId::new("t1"), 1000);
        options.build_full_relationship_graph = true;

        let report = builder.run(&names(&["alice", "bob"]), &options).unwrap();
        assert_eq!(report.friend_edges, 1);
        assert_eq!(report.abandoned.len(), 1);
        assert!(report.abandoned[0].contains("@alice"));
    }

    #[test]
    fn test_full_graph_empty_population_makes_no_calls() {
        let mut builder = builder(MockApi::new());
        let mut options = NetworkOptions::new(TaskId::new("t1"), 1000);
        options.build_full_relationship_graph = true;

        let report = builder.run(&[], &options).unwrap();
        assert_eq!(report.graph_direction, None);
        assert!(builder.client().api().calls().is_empty());
        assert!(builder.client().sleeper().slept().is_empty());
    }

    #[test]
    fn test_full_graph_waits_before_each_member() {
        let api = MockApi::new()
            .with_user(1, "alice", 0, 0)
            .with_user(2, "bob", 0, 0);
        let client = RateLimitedClient::with_sleeper(api, RetryPolicy::default(), RecordingSleeper::default());
        let throttle = ThrottleConfig {
            graph_member_delay_ms: 20_000,
            ..ThrottleConfig::none()
        };
        let mut builder = EgoNetworkBuilder::new(client, Storage::open_memory().unwrap(), throttle, 1);
        let mut options = NetworkOptions::new(TaskId::new("t1"), 1000);
        options.build_full_relationship_graph = true;

        builder.run(&names(&["alice", "bob"]), &options).unwrap();
        assert_eq!(
            builder.client().sleeper().slept(),
            vec![Duration::from_secs(20); 2]
        );
    }

    #[derive(Default)]
    struct ListCalls {
        upserts: usize,
        members: usize,
        subscribers: usize,
    }

    /// Counts list writes on their way into an in-memory store.
    struct CountingSink {
        inner: Storage,
        calls: ListCalls,
    }

    impl RecordSink for CountingSink {
        fn save_user(&mut self, user: &UserProfile) -> StoreResult<()> {
            self.inner.save_user(user)
        }

        fn save_relationship(&mut self, relationship: &Relationship) -> StoreResult<()> {
            self.inner.save_relationship(relationship)
        }

        fn upsert_list(&mut self, list: &ListInfo) -> StoreResult<()> {
            self.calls.upserts += 1;
            self.inner.upsert_list(list)
        }

        fn add_list_member(&mut self, list_id: i64, user_id: i64, task_id: &TaskId) -> StoreResult<()> {
            self.calls.members += 1;
            self.inner.add_list_member(list_id, user_id, task_id)
        }

        fn add_list_subscriber(&mut self, list_id: i64, user_id: i64, task_id: &TaskId) -> StoreResult<()> {
            self.calls.subscribers += 1;
            self.inner.add_list_subscriber(list_id, user_id, task_id)
        }

        fn save_tweet(&mut self, tweet: &Tweet) -> StoreResult<()> {
            self.inner.save_tweet(tweet)
        }

        fn reconnect(&mut self) -> StoreResult<()> {
            self.inner.reconnect()
        }
    }

    #[test]
    fn test_fatal_error_on_first_ego_stops_the_run() {
        let api = MockApi::new()
            .with_user(1, "alice", 1, 1)
            .with_user(2, "bob", 1, 1)
            .with_friends(1, vec![vec![2]])
            .with_friends(2, vec![vec![1]]);
        api.fail_next("users/show:alice", ApiError::fatal("Invalid or expired token (code 89)"));
        let mut builder = builder(api);
        let mut options = NetworkOptions::new(TaskId::new("t1"), 1000);
        options.collect_friends = true;

        let err = builder.run(&names(&["alice", "bob"]), &options).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(builder.client().api().calls(), vec!["users/show:alice"]);
        assert!(builder.sink().users_for_task(&TaskId::new("t1")).unwrap().is_empty());
    }

    #[test]
    fn test_fatal_error_during_expansion_stops_the_run() {
        let api = MockApi::new()
            .with_user(1, "alice", 1, 1)
            .with_user(2, "bob", 1, 1)
            .with_friends(1, vec![vec![2]])
            .with_friends(2, vec![vec![1]]);
        api.fail_next("friends/ids:1", ApiError::fatal("Could not authenticate you (code 32)"));
        let mut builder = builder(api);
        let mut options = NetworkOptions::new(TaskId::new("t1"), 1000);
        options.collect_friends = true;
        options.collect_list_memberships = true;

        let err = builder.run(&names(&["alice", "bob"]), &options).unwrap_err();
        assert!(err.is_fatal());
        let api = builder.client().api();
        assert_eq!(api.calls_for("friends/ids", "2"), 0);
        assert_eq!(api.calls_to("lists/memberships"), 0);
    }

    #[test]
    fn test_lists_seen_again_get_members_added() {
        let api = MockApi::new()
            .with_user(1, "alice", 0, 0)
            .with_user(2, "bob", 0, 0)
            .with_memberships(1, vec![vec![mock::list(100, "x", "rust")]])
            .with_memberships(2, vec![vec![mock::list(100, "x", "rust")]])
            .with_subscriptions(1, vec![vec![mock::list(100, "x", "rust")]])
            .with_subscriptions(2, vec![vec![mock::list(200, "y", "news")]]);
        let client = RateLimitedClient::with_sleeper(api, RetryPolicy::default(), RecordingSleeper::default());
        let sink = CountingSink {
            inner: Storage::open_memory().unwrap(),
            calls: ListCalls::default(),
        };
        let mut builder = EgoNetworkBuilder::new(client, sink, ThrottleConfig::none(), 1);
        let mut options = NetworkOptions::new(TaskId::new("t1"), 1000);
        options.collect_list_memberships = true;
        options.collect_list_subscriptions = true;

        let report = builder.run(&names(&["alice", "bob"]), &options).unwrap();
        assert_eq!(report.lists, 4);

        let calls = &builder.sink().calls;
        assert_eq!(calls.upserts, 2);
        assert_eq!(calls.members, 1);
        assert_eq!(calls.subscribers, 1);

        let task = TaskId::new("t1");
        let storage = &builder.sink().inner;
        assert_eq!(storage.list_members(100, &task).unwrap(), vec![1, 2]);
        assert_eq!(storage.list_subscribers(100, &task).unwrap(), vec![1]);
        assert_eq!(storage.list_subscribers(200, &task).unwrap(), vec![2]);
    }

    #[test]
    fn test_full_graph_skips_page_delay() {
        let api = MockApi::new()
            .with_user(1, "alice", 3, 0)
            .with_user(2, "bob", 3, 0)
            .with_friends(1, vec![vec![2], vec![7], vec![8]])
            .with_friends(2, vec![vec![1], vec![9]]);
        let client = RateLimitedClient::with_sleeper(api, RetryPolicy::default(), RecordingSleeper::default());
        let throttle = ThrottleConfig {
            page_delay_ms: 60_000,
            graph_member_delay_ms: 20_000,
            ..ThrottleConfig::none()
        };
        let mut builder = EgoNetworkBuilder::new(client, Storage::open_memory().unwrap(), throttle, 1);
        let mut options = NetworkOptions::new(TaskId::new("t1"), 1000);
        options.build_full_relationship_graph = true;

        let report = builder.run(&names(&["alice", "bob"]), &options).unwrap();
        assert_eq!(report.friend_edges, 2);
        assert_eq!(builder.client().api().calls_to("friends/ids"), 5);
        assert_eq!(
            builder.client().sleeper().slept(),
            vec![Duration::from_secs(20); 2]
        );
    }
}
