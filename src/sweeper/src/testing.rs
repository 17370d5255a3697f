//! Scripted in-memory [`NamespaceStore`] for tests.
//!
//! Keeps objects and folders in ordered maps, records every call, and lets a
//! test queue failures per operation, cap listing pages to mimic an
//! eventually consistent store, slow deletes down to observe concurrency, or
//! simulate a concurrent writer replacing an object.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::namespace::{Container, ContainerId, ContainerRef, ObjectRef};
use crate::store::{NamespaceStore, StoreResult};

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    ListObjects { prefix: String },
    DeleteObject { key: String, generation: String },
    ListSubContainers { prefix: String },
    DeleteSubContainer { name: String },
    GetContainer { path: String },
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, u64>,
    folders: BTreeMap<String, u64>,
    next_generation: u64,
    calls: Vec<StoreCall>,
    list_objects_failures: VecDeque<StoreError>,
    list_objects_always: Option<StoreError>,
    list_folders_failures: VecDeque<StoreError>,
    object_delete_failures: HashMap<String, VecDeque<StoreError>>,
    folder_delete_failures: HashMap<String, VecDeque<StoreError>>,
    folder_delete_always: HashMap<String, StoreError>,
    rewrite_on_delete: HashSet<String>,
    hidden_reads: usize,
    list_page_limit: Option<usize>,
    delete_latency: Duration,
}

/// In-memory store with fault injection and call recording.
pub struct ScriptedStore {
    store_id: String,
    state: Mutex<State>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedStore {
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            state: Mutex::new(State {
                next_generation: 1,
                ..Default::default()
            }),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_store(&self, store_id: &str) -> StoreResult<()> {
        if store_id == self.store_id {
            Ok(())
        } else {
            Err(StoreError::Fatal(format!("unknown bucket {store_id}")))
        }
    }

    /// Put an object and return its generation.
    pub fn add_object(&self, key: &str) -> String {
        let mut state = self.state();
        let generation = state.next_generation;
        state.next_generation += 1;
        state.objects.insert(key.to_string(), generation);
        generation.to_string()
    }

    pub fn add_folder(&self, name: &str) {
        self.state().folders.insert(name.to_string(), 1);
    }

    pub fn object_keys(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    pub fn folder_names(&self) -> Vec<String> {
        self.state().folders.keys().cloned().collect()
    }

    pub fn generation_of(&self, key: &str) -> Option<String> {
        self.state().objects.get(key).map(|g| g.to_string())
    }

    /// Listings return at most `limit` objects per call.
    pub fn set_list_page_limit(&self, limit: usize) {
        self.state().list_page_limit = Some(limit);
    }

    /// Every object delete sleeps this long while counted as in flight.
    pub fn set_delete_latency(&self, latency: Duration) {
        self.state().delete_latency = latency;
    }

    pub fn fail_next_list_objects(&self, err: StoreError) {
        self.state().list_objects_failures.push_back(err);
    }

    pub fn fail_list_objects_always(&self, err: StoreError) {
        self.state().list_objects_always = Some(err);
    }

    pub fn fail_next_list_sub_containers(&self, err: StoreError) {
        self.state().list_folders_failures.push_back(err);
    }

    pub fn fail_next_object_delete(&self, key: &str, err: StoreError) {
        self.state()
            .object_delete_failures
            .entry(key.to_string())
            .or_default()
            .push_back(err);
    }

    pub fn fail_next_folder_delete(&self, name: &str, err: StoreError) {
        self.state()
            .folder_delete_failures
            .entry(name.to_string())
            .or_default()
            .push_back(err);
    }

    pub fn fail_folder_delete_always(&self, name: &str, err: StoreError) {
        self.state()
            .folder_delete_always
            .insert(name.to_string(), err);
    }

    /// The first delete of `key` finds that a concurrent writer has just
    /// replaced it with a newer generation.
    pub fn rewrite_before_first_delete(&self, key: &str) {
        self.state().rewrite_on_delete.insert(key.to_string());
    }

    /// The next `count` folder reads answer not found.
    pub fn hide_next_reads(&self, count: usize) {
        self.state().hidden_reads = count;
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    pub fn list_objects_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, StoreCall::ListObjects { .. }))
    }

    pub fn object_delete_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, StoreCall::DeleteObject { .. }))
    }

    pub fn folder_delete_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, StoreCall::DeleteSubContainer { .. }))
    }

    /// Folder names in the order deletes were issued.
    pub fn folder_delete_order(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                StoreCall::DeleteSubContainer { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Highest number of object deletes observed in flight at once.
    pub fn max_concurrent_deletes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn count_calls(&self, pred: impl Fn(&StoreCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    fn delete_object_now(&self, key: &str, generation: &str) -> StoreResult<()> {
        let mut state = self.state();

        if let Some(err) = state
            .object_delete_failures
            .get_mut(key)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        if state.rewrite_on_delete.remove(key) && state.objects.contains_key(key) {
            let newer = state.next_generation;
            state.next_generation += 1;
            state.objects.insert(key.to_string(), newer);
        }

        let current = state.objects.get(key).copied();
        match current {
            None => Err(StoreError::NotFound(key.to_string())),
            Some(current) if current.to_string() != generation => Err(StoreError::Conflict(
                format!("generation mismatch for {key}: have {current}, asked {generation}"),
            )),
            Some(_) => {
                state.objects.remove(key);
                Ok(())
            }
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl NamespaceStore for ScriptedStore {
    async fn list_objects(&self, store_id: &str, prefix: &str) -> StoreResult<Vec<ObjectRef>> {
        let mut state = self.state();
        state.calls.push(StoreCall::ListObjects {
            prefix: prefix.to_string(),
        });
        self.check_store(store_id)?;

        if let Some(err) = state.list_objects_failures.pop_front() {
            return Err(err);
        }
        if let Some(err) = &state.list_objects_always {
            return Err(err.clone());
        }

        let limit = state.list_page_limit.unwrap_or(usize::MAX);
        Ok(state
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(limit)
            .map(|(key, generation)| ObjectRef::new(key.clone(), generation.to_string()))
            .collect())
    }

    async fn delete_object(&self, store_id: &str, key: &str, generation: &str) -> StoreResult<()> {
        let latency = {
            let mut state = self.state();
            state.calls.push(StoreCall::DeleteObject {
                key: key.to_string(),
                generation: generation.to_string(),
            });
            state.delete_latency
        };
        self.check_store(store_id)?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.delete_object_now(key, generation)
    }

    async fn list_sub_containers(
        &self,
        store_id: &str,
        prefix: &str,
    ) -> StoreResult<Vec<ContainerRef>> {
        let mut state = self.state();
        state.calls.push(StoreCall::ListSubContainers {
            prefix: prefix.to_string(),
        });
        self.check_store(store_id)?;

        if let Some(err) = state.list_folders_failures.pop_front() {
            return Err(err);
        }

        Ok(state
            .folders
            .keys()
            .filter(|name| name.starts_with(prefix))
            .map(|name| ContainerRef::new(name.clone()))
            .collect())
    }

    async fn delete_sub_container(&self, store_id: &str, name: &str) -> StoreResult<()> {
        let mut state = self.state();
        state.calls.push(StoreCall::DeleteSubContainer {
            name: name.to_string(),
        });
        self.check_store(store_id)?;

        if let Some(err) = state
            .folder_delete_failures
            .get_mut(name)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        if let Some(err) = state.folder_delete_always.get(name) {
            return Err(err.clone());
        }

        if !state.folders.contains_key(name) {
            return Err(StoreError::NotFound(name.to_string()));
        }

        let has_objects = state.objects.keys().any(|k| k.starts_with(name));
        let has_children = state
            .folders
            .keys()
            .any(|f| f.as_str() != name && f.starts_with(name));
        if has_objects || has_children {
            return Err(StoreError::Conflict(format!("folder {name} is not empty")));
        }

        state.folders.remove(name);
        Ok(())
    }

    async fn get_container(&self, id: &ContainerId) -> StoreResult<Container> {
        let mut state = self.state();
        state.calls.push(StoreCall::GetContainer {
            path: id.path.clone(),
        });
        self.check_store(&id.store_id)?;

        if state.hidden_reads > 0 {
            state.hidden_reads -= 1;
            return Err(StoreError::NotFound(id.path.clone()));
        }

        let metageneration = *state
            .folders
            .get(&id.path)
            .ok_or_else(|| StoreError::NotFound(id.path.clone()))?;

        let now = Utc::now();
        Ok(Container {
            id: id.clone(),
            create_time: now,
            update_time: now,
            metageneration,
            force_destroy: false,
        })
    }
}
