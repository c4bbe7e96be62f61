//! In-memory storage engine.
//!
//! All state lives in one [`Tables`] value behind an `RwLock`. A
//! transaction is tracked per thread; its working copy is cloned from the
//! committed tables on the first write and swapped in on commit. Writes
//! outside a transaction apply to a clone that replaces the committed
//! tables only if the whole write succeeds.
//!
//! Writers are serialized through a single writer slot. A transaction takes
//! the slot before cloning and keeps it until commit or rollback, so no
//! other commit can land between its clone and its swap. Readers never wait
//! for the slot and see the last committed tables.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Condvar, Mutex, MutexGuard, RwLock};
use std::thread::{self, ThreadId};

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use carrel_core::path::{self, is_descendant, is_root, normalize, rebase, versioned};
use carrel_core::{
    properties, Activity, Association, Comment, ConfigError, Content, LogFilter, Rating,
    RegistryError, RegistryResult, Resource, ResourcePath, StorageError, TaggedResourcePath,
    Tagging, ValidationError, ROOT_PATH,
};

use crate::StorageEngine;

// ============================================================================
// TABLES
// ============================================================================

#[derive(Debug, Clone)]
struct Snapshot {
    number: u64,
    resource: Resource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DumpEntry {
    /// Path relative to the dumped root; empty for the root itself
    relative_path: String,
    resource: Resource,
}

#[derive(Debug, Clone)]
struct Tables {
    resources: BTreeMap<String, Resource>,
    snapshots: BTreeMap<String, Vec<Snapshot>>,
    associations: Vec<Association>,
    taggings: Vec<Tagging>,
    comments: BTreeMap<u64, Comment>,
    next_comment_id: u64,
    ratings: BTreeMap<(String, String), Rating>,
    logs: Vec<Activity>,
}

impl Tables {
    fn new() -> Self {
        let mut resources = BTreeMap::new();
        resources.insert(ROOT_PATH.to_string(), Resource::collection(ROOT_PATH));
        Self {
            resources,
            snapshots: BTreeMap::new(),
            associations: Vec::new(),
            taggings: Vec::new(),
            comments: BTreeMap::new(),
            next_comment_id: 0,
            ratings: BTreeMap::new(),
            logs: Vec::new(),
        }
    }

    fn resolve(&self, raw: &str) -> Option<Resource> {
        let rp = ResourcePath::parse(raw);
        if rp.is_current_version() {
            return self.resources.get(rp.path()).cloned();
        }
        let number = rp.version()?;
        self.snapshots
            .get(rp.path())?
            .iter()
            .find(|s| s.number == number)
            .map(|s| {
                let mut resource = s.resource.clone();
                resource.path = rp.path_with_version();
                resource
            })
    }

    fn require(&self, path: &str) -> RegistryResult<&Resource> {
        self.resources
            .get(path)
            .ok_or_else(|| RegistryError::not_found(path))
    }

    fn subtree_paths(&self, root: &str) -> Vec<String> {
        self.resources
            .keys()
            .filter(|p| p.as_str() == root || is_descendant(p, root))
            .cloned()
            .collect()
    }

    fn link_child(&mut self, child: &str) {
        if let Some(parent) = path::parent(child) {
            if let Some(Content::Children(children)) =
                self.resources.get_mut(&parent).map(|r| &mut r.content)
            {
                if !children.iter().any(|c| c == child) {
                    children.push(child.to_string());
                }
            }
            if let Some(parent) = self.resources.get_mut(&parent) {
                parent.child_count = parent.children().map_or(0, <[String]>::len);
            }
        }
    }

    fn unlink_child(&mut self, child: &str) {
        if let Some(parent) = path::parent(child) {
            if let Some(parent) = self.resources.get_mut(&parent) {
                if let Content::Children(children) = &mut parent.content {
                    children.retain(|c| c != child);
                }
                parent.child_count = parent.children().map_or(0, <[String]>::len);
            }
        }
    }

    fn ensure_ancestors(&mut self, path: &str) -> RegistryResult<()> {
        let mut chain = path::ancestors(path);
        chain.reverse();
        for ancestor in chain {
            match self.resources.get(&ancestor) {
                Some(existing) if !existing.is_collection() => {
                    return Err(ValidationError::InvalidPath {
                        path: path.to_string(),
                        reason: format!("{} is not a collection", ancestor),
                    }
                    .into());
                }
                Some(_) => {}
                None => {
                    let mut collection = Resource::collection(ancestor.clone());
                    collection.version_number = 1;
                    self.resources.insert(ancestor.clone(), collection);
                    self.link_child(&ancestor);
                }
            }
        }
        Ok(())
    }

    fn put(&mut self, raw: &str, resource: &Resource) -> RegistryResult<String> {
        let path = normalize(ResourcePath::parse(raw).path());
        self.ensure_ancestors(&path)?;

        let mut stored = resource.clone();
        stored.path = path.clone();
        stored.last_modified = Utc::now();

        match self.resources.get(&path) {
            Some(existing) => {
                if existing.is_collection() && !stored.is_collection() {
                    return Err(ValidationError::InvalidPath {
                        path,
                        reason: "cannot replace a collection with a resource".to_string(),
                    }
                    .into());
                }
                stored.uuid = existing.uuid;
                stored.created_at = existing.created_at;
                stored.author = existing.author.clone();
                stored.version_number = existing.version_number + 1;
                if let (Content::Children(children), true) =
                    (&existing.content, stored.is_collection())
                {
                    stored.content = Content::Children(children.clone());
                }
            }
            None => {
                stored.version_number = 1;
                if stored.is_collection() {
                    stored.content = Content::Children(Vec::new());
                }
            }
        }
        stored.child_count = stored.children().map_or(0, <[String]>::len);
        self.resources.insert(path.clone(), stored);
        self.link_child(&path);
        Ok(path)
    }

    fn remove_subtree(&mut self, root: &str) {
        for p in self.subtree_paths(root) {
            self.resources.remove(&p);
            self.snapshots.remove(&p);
        }
        let gone = |p: &str| p == root || is_descendant(p, root);
        self.taggings.retain(|t| !gone(&t.path));
        self.comments.retain(|_, c| !gone(&c.resource_path));
        self.ratings.retain(|(p, _), _| !gone(p));
        self.associations
            .retain(|a| !gone(&a.source) && !gone(&a.destination));
        self.unlink_child(root);
    }

    fn delete(&mut self, raw: &str) -> RegistryResult<()> {
        let path = normalize(raw);
        if is_root(&path) {
            return Err(ValidationError::InvalidPath {
                path,
                reason: "the root collection cannot be deleted".to_string(),
            }
            .into());
        }
        self.require(&path)?;
        self.remove_subtree(&path);
        Ok(())
    }

    fn check_relocation(&self, from: &str, to: &str) -> RegistryResult<()> {
        if is_root(from) {
            return Err(ValidationError::InvalidPath {
                path: from.to_string(),
                reason: "the root collection cannot be relocated".to_string(),
            }
            .into());
        }
        if from == to || is_descendant(to, from) {
            return Err(ValidationError::InvalidPath {
                path: to.to_string(),
                reason: format!("target is inside {}", from),
            }
            .into());
        }
        self.require(from)?;
        Ok(())
    }

    /// Subtree of `from` re-addressed under `to`, fresh children lists.
    fn relocated(&self, from: &str, to: &str) -> Vec<Resource> {
        self.subtree_paths(from)
            .into_iter()
            .filter_map(|p| self.resources.get(&p).cloned())
            .map(|mut r| {
                r.path = rebase(&r.path, from, to).unwrap_or(r.path);
                if let Content::Children(children) = &mut r.content {
                    for child in children.iter_mut() {
                        if let Some(moved) = rebase(child, from, to) {
                            *child = moved;
                        }
                    }
                }
                r
            })
            .collect()
    }

    fn move_resource(&mut self, current: &str, new: &str) -> RegistryResult<String> {
        let from = normalize(current);
        let to = normalize(new);
        self.check_relocation(&from, &to)?;
        if self.resources.contains_key(&to) {
            return Err(ValidationError::InvalidPath {
                path: to,
                reason: "target already exists".to_string(),
            }
            .into());
        }
        self.ensure_ancestors(&to)?;

        let moved = self.relocated(&from, &to);
        let mut snapshots = Vec::new();
        for p in self.subtree_paths(&from) {
            self.resources.remove(&p);
            if let (Some(s), Some(np)) = (self.snapshots.remove(&p), rebase(&p, &from, &to)) {
                snapshots.push((np, s));
            }
        }
        self.unlink_child(&from);
        for r in moved {
            self.resources.insert(r.path.clone(), r);
        }
        self.snapshots.extend(snapshots);
        self.link_child(&to);

        for t in self.taggings.iter_mut() {
            if let Some(np) = rebase(&t.path, &from, &to) {
                t.path = np;
            }
        }
        for c in self.comments.values_mut() {
            if let Some(np) = rebase(&c.resource_path, &from, &to) {
                c.resource_path = np;
            }
        }
        let ratings = std::mem::take(&mut self.ratings);
        self.ratings = ratings
            .into_iter()
            .map(|((p, u), mut r)| {
                let np = rebase(&p, &from, &to).unwrap_or(p);
                r.path = np.clone();
                ((np, u), r)
            })
            .collect();
        for a in self.associations.iter_mut() {
            if let Some(np) = rebase(&a.source, &from, &to) {
                a.source = np;
            }
            if let Some(np) = rebase(&a.destination, &from, &to) {
                a.destination = np;
            }
        }
        Ok(to)
    }

    fn copy(&mut self, source: &str, target: &str) -> RegistryResult<String> {
        let from = normalize(source);
        let to = normalize(target);
        self.check_relocation(&from, &to)?;
        if self.resources.contains_key(&to) {
            self.remove_subtree(&to);
        }
        self.ensure_ancestors(&to)?;
        let now = Utc::now();
        for mut r in self.relocated(&from, &to) {
            r.uuid = Uuid::now_v7();
            r.created_at = now;
            r.last_modified = now;
            r.version_number = 1;
            self.resources.insert(r.path.clone(), r);
        }
        self.link_child(&to);
        Ok(to)
    }

    fn create_snapshot(&mut self, raw: &str) -> RegistryResult<u64> {
        let path = normalize(raw);
        let resource = self.require(&path)?.clone();
        let history = self.snapshots.entry(path).or_default();
        let number = history.last().map_or(1, |s| s.number + 1);
        history.push(Snapshot { number, resource });
        Ok(number)
    }

    fn dump(&self, raw: &str) -> RegistryResult<Vec<u8>> {
        let root = normalize(raw);
        self.require(&root)?;
        let skipped: Vec<String> = self
            .subtree_paths(&root)
            .into_iter()
            .filter(|p| {
                p != &root
                    && self
                        .resources
                        .get(p)
                        .is_some_and(|r| r.has_property(properties::NON_RECURSIVE))
            })
            .collect();
        let entries: Vec<DumpEntry> = self
            .subtree_paths(&root)
            .into_iter()
            .filter(|p| !skipped.iter().any(|s| is_descendant(p, s)))
            .filter_map(|p| self.resources.get(&p).cloned())
            .map(|resource| DumpEntry {
                relative_path: relative_to(&resource.path, &root),
                resource,
            })
            .collect();
        serde_json::to_vec(&entries).map_err(|e| {
            StorageError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn restore(&mut self, raw: &str, dump: &[u8]) -> RegistryResult<()> {
        let root = normalize(raw);
        let entries: Vec<DumpEntry> = serde_json::from_slice(dump).map_err(|e| {
            RegistryError::from(StorageError::Serialization {
                reason: e.to_string(),
            })
        })?;
        for entry in entries {
            let target = if entry.relative_path.is_empty() {
                root.clone()
            } else if is_root(&root) {
                entry.relative_path.clone()
            } else {
                format!("{}{}", root, entry.relative_path)
            };
            self.put(&target, &entry.resource)?;
        }
        Ok(())
    }
}

fn relative_to(path: &str, root: &str) -> String {
    if path == root {
        String::new()
    } else if is_root(root) {
        path.to_string()
    } else {
        path[root.len()..].to_string()
    }
}

fn strip_content(mut resource: Resource) -> Resource {
    resource.content = match resource.content {
        Content::Bytes(_) => Content::Bytes(Vec::new()),
        Content::Children(_) => Content::Children(Vec::new()),
    };
    resource
}

// ============================================================================
// IN-MEMORY STORAGE
// ============================================================================

/// Per-thread transaction; `None` until the first write.
type Working = Option<Tables>;

/// Storage engine keeping everything in process memory.
pub struct InMemoryStorage {
    committed: RwLock<Tables>,
    transactions: Mutex<HashMap<ThreadId, Working>>,
    /// Thread currently allowed to write
    writer: Mutex<Option<ThreadId>>,
    writer_released: Condvar,
    no_cache: Vec<Regex>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Create an empty store holding only the root collection.
    pub fn new() -> Self {
        Self {
            committed: RwLock::new(Tables::new()),
            transactions: Mutex::new(HashMap::new()),
            writer: Mutex::new(None),
            writer_released: Condvar::new(),
            no_cache: Vec::new(),
        }
    }

    /// Exclude paths matching any of the given regular expressions from caching.
    pub fn with_no_cache_paths<S: AsRef<str>>(mut self, patterns: &[S]) -> RegistryResult<Self> {
        for pattern in patterns {
            let regex = Regex::new(pattern.as_ref()).map_err(|e| {
                RegistryError::from(ConfigError::InvalidValue {
                    field: "no_cache_paths".to_string(),
                    value: pattern.as_ref().to_string(),
                    reason: e.to_string(),
                })
            })?;
            self.no_cache.push(regex);
        }
        Ok(self)
    }

    /// True when the calling thread has an open transaction.
    pub fn in_transaction(&self) -> bool {
        self.lock_transactions()
            .map(|t| t.contains_key(&thread::current().id()))
            .unwrap_or(false)
    }

    fn lock_transactions(&self) -> RegistryResult<MutexGuard<'_, HashMap<ThreadId, Working>>> {
        self.transactions
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> RegistryResult<R> {
        let transactions = self.lock_transactions()?;
        if let Some(Some(working)) = transactions.get(&thread::current().id()) {
            return Ok(f(working));
        }
        drop(transactions);
        let committed = self
            .committed
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(f(&committed))
    }

    /// Block until the writer slot is free or already held by this thread.
    fn acquire_writer(&self) -> RegistryResult<()> {
        let me = thread::current().id();
        let mut owner = self
            .writer
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        while matches!(*owner, Some(id) if id != me) {
            owner = self
                .writer_released
                .wait(owner)
                .map_err(|_| StorageError::LockPoisoned)?;
        }
        *owner = Some(me);
        Ok(())
    }

    /// Free the writer slot if this thread holds it.
    fn release_writer(&self) -> RegistryResult<()> {
        let mut owner = self
            .writer
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        if *owner == Some(thread::current().id()) {
            *owner = None;
            self.writer_released.notify_all();
        }
        Ok(())
    }

    fn write<R>(&self, f: impl FnOnce(&mut Tables) -> RegistryResult<R>) -> RegistryResult<R> {
        let id = thread::current().id();
        // None: no transaction; Some(false): transaction without a working copy yet
        let state = self.lock_transactions()?.get(&id).map(Option::is_some);
        match state {
            None => {
                self.acquire_writer()?;
                let result = self.write_committed(f);
                self.release_writer()?;
                return result;
            }
            Some(false) => {
                // The transactions lock is not held while waiting for the slot.
                self.acquire_writer()?;
                let copy = self
                    .committed
                    .read()
                    .map_err(|_| StorageError::LockPoisoned)?
                    .clone();
                if let Some(working) = self.lock_transactions()?.get_mut(&id) {
                    working.get_or_insert(copy);
                }
            }
            Some(true) => {}
        }

        let mut transactions = self.lock_transactions()?;
        match transactions.get_mut(&id).and_then(Option::as_mut) {
            Some(tables) => f(tables),
            None => Err(StorageError::NoActiveTransaction.into()),
        }
    }

    fn write_committed<R>(
        &self,
        f: impl FnOnce(&mut Tables) -> RegistryResult<R>,
    ) -> RegistryResult<R> {
        let mut committed = self
            .committed
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut next = committed.clone();
        let result = f(&mut next)?;
        *committed = next;
        Ok(result)
    }
}

impl StorageEngine for InMemoryStorage {
    // === Resource Operations ===

    fn get(&self, path: &str) -> RegistryResult<Option<Resource>> {
        self.read(|t| t.resolve(path))
    }

    fn get_collection(
        &self,
        path: &str,
        start: usize,
        page_size: usize,
    ) -> RegistryResult<Option<Resource>> {
        self.read(|t| {
            t.resolve(path).map(|mut r| {
                if let Content::Children(children) = &mut r.content {
                    let total = children.len();
                    let from = start.min(total);
                    let to = from.saturating_add(page_size).min(total);
                    *children = children[from..to].to_vec();
                    r.child_count = total;
                }
                r
            })
        })
    }

    fn exists(&self, path: &str) -> RegistryResult<bool> {
        self.read(|t| t.resolve(path).is_some())
    }

    fn get_meta_data(&self, path: &str) -> RegistryResult<Option<Resource>> {
        self.read(|t| t.resolve(path).map(strip_content))
    }

    fn put(&self, path: &str, resource: &Resource) -> RegistryResult<String> {
        self.write(|t| t.put(path, resource))
    }

    fn import(&self, path: &str, source_url: &str, resource: &Resource) -> RegistryResult<String> {
        let mut imported = resource.clone();
        imported.set_property(properties::IMPORT_SOURCE, source_url);
        self.write(|t| t.put(path, &imported))
    }

    fn delete(&self, path: &str) -> RegistryResult<()> {
        self.write(|t| t.delete(path))
    }

    fn rename(&self, current_path: &str, new_name: &str) -> RegistryResult<String> {
        let current = normalize(current_path);
        let target = if new_name.starts_with('/') {
            normalize(new_name)
        } else {
            let parent = path::parent(&current).unwrap_or_else(|| ROOT_PATH.to_string());
            path::join(&parent, new_name)
        };
        self.write(|t| t.move_resource(&current, &target))
    }

    fn move_resource(&self, current_path: &str, new_path: &str) -> RegistryResult<String> {
        self.write(|t| t.move_resource(current_path, new_path))
    }

    fn copy(&self, source_path: &str, target_path: &str) -> RegistryResult<String> {
        self.write(|t| t.copy(source_path, target_path))
    }

    // === Version Operations ===

    fn create_snapshot(&self, path: &str) -> RegistryResult<u64> {
        self.write(|t| t.create_snapshot(path))
    }

    fn list_versions(&self, path: &str) -> RegistryResult<Vec<String>> {
        let path = normalize(path);
        self.read(|t| {
            if !t.resources.contains_key(&path) && !t.snapshots.contains_key(&path) {
                return Err(RegistryError::not_found(path.clone()));
            }
            Ok(t.snapshots
                .get(&path)
                .map(|h| h.iter().map(|s| versioned(&path, s.number)).collect::<Vec<_>>())
                .unwrap_or_default())
        })?
    }

    fn restore_version(&self, versioned_path: &str) -> RegistryResult<()> {
        let rp = ResourcePath::parse(versioned_path);
        let number = rp.version().ok_or_else(|| ValidationError::InvalidPath {
            path: versioned_path.to_string(),
            reason: "no version given".to_string(),
        })?;
        self.write(|t| {
            let snapshot = t
                .snapshots
                .get(rp.path())
                .and_then(|h| h.iter().find(|s| s.number == number))
                .map(|s| s.resource.clone())
                .ok_or_else(|| RegistryError::not_found(versioned_path))?;
            t.put(rp.path(), &snapshot).map(|_| ())
        })
    }

    fn remove_version_history(&self, path: &str, snapshot_id: u64) -> RegistryResult<bool> {
        let path = normalize(path);
        self.write(|t| {
            let Some(history) = t.snapshots.get_mut(&path) else {
                return Ok(false);
            };
            let before = history.len();
            history.retain(|s| s.number != snapshot_id);
            Ok(history.len() != before)
        })
    }

    // === Association Operations ===

    fn add_association(&self, association: &Association) -> RegistryResult<()> {
        self.write(|t| {
            if !t.associations.contains(association) {
                t.associations.push(association.clone());
            }
            Ok(())
        })
    }

    fn remove_association(&self, association: &Association) -> RegistryResult<()> {
        self.write(|t| {
            t.associations.retain(|a| a != association);
            Ok(())
        })
    }

    fn associations(&self, path: &str) -> RegistryResult<Vec<Association>> {
        self.read(|t| {
            t.associations
                .iter()
                .filter(|a| a.involves(path))
                .cloned()
                .collect()
        })
    }

    // === Tag Operations ===

    fn add_tagging(&self, tagging: &Tagging) -> RegistryResult<()> {
        self.write(|t| {
            t.require(&tagging.path)?;
            let duplicate = t.taggings.iter().any(|x| {
                x.path == tagging.path && x.name == tagging.name && x.user == tagging.user
            });
            if !duplicate {
                t.taggings.push(tagging.clone());
            }
            Ok(())
        })
    }

    fn taggings(&self, path: &str) -> RegistryResult<Vec<Tagging>> {
        self.read(|t| t.taggings.iter().filter(|x| x.path == path).cloned().collect())
    }

    fn remove_taggings(&self, path: &str, tag: &str, user: Option<&str>) -> RegistryResult<usize> {
        self.write(|t| {
            let before = t.taggings.len();
            t.taggings.retain(|x| {
                !(x.path == path && x.name == tag && user.map_or(true, |u| x.user == u))
            });
            Ok(before - t.taggings.len())
        })
    }

    fn paths_with_tag(&self, tag: &str) -> RegistryResult<Vec<TaggedResourcePath>> {
        self.read(|t| {
            let mut by_path: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
            for x in t.taggings.iter().filter(|x| x.name == tag) {
                *by_path
                    .entry(x.path.clone())
                    .or_default()
                    .entry(x.name.clone())
                    .or_default() += 1;
            }
            by_path
                .into_iter()
                .map(|(path, tag_counts)| TaggedResourcePath { path, tag_counts })
                .collect()
        })
    }

    // === Comment Operations ===

    fn add_comment(&self, path: &str, user: &str, text: &str) -> RegistryResult<Comment> {
        self.write(|t| {
            t.require(path)?;
            t.next_comment_id += 1;
            let now = Utc::now();
            let comment = Comment {
                id: t.next_comment_id,
                resource_path: path.to_string(),
                text: text.to_string(),
                user: user.to_string(),
                created_at: now,
                last_modified: now,
            };
            t.comments.insert(comment.id, comment.clone());
            Ok(comment)
        })
    }

    fn get_comment(&self, id: u64) -> RegistryResult<Option<Comment>> {
        self.read(|t| t.comments.get(&id).cloned())
    }

    fn update_comment(&self, id: u64, text: &str) -> RegistryResult<()> {
        self.write(|t| {
            let comment = t
                .comments
                .get_mut(&id)
                .ok_or_else(|| RegistryError::not_found(format!("comment {}", id)))?;
            comment.text = text.to_string();
            comment.last_modified = Utc::now();
            Ok(())
        })
    }

    fn remove_comment(&self, id: u64) -> RegistryResult<()> {
        self.write(|t| {
            t.comments
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| RegistryError::not_found(format!("comment {}", id)))
        })
    }

    fn comments(&self, path: &str) -> RegistryResult<Vec<Comment>> {
        self.read(|t| {
            t.comments
                .values()
                .filter(|c| c.resource_path == path)
                .cloned()
                .collect()
        })
    }

    // === Rating Operations ===

    fn rating(&self, path: &str, user: &str) -> RegistryResult<Option<u8>> {
        self.read(|t| {
            t.ratings
                .get(&(path.to_string(), user.to_string()))
                .map(|r| r.rating)
        })
    }

    fn set_rating(&self, path: &str, user: &str, rating: u8) -> RegistryResult<()> {
        self.write(|t| {
            t.require(path)?;
            t.ratings.insert(
                (path.to_string(), user.to_string()),
                Rating {
                    path: path.to_string(),
                    user: user.to_string(),
                    rating,
                    rated_at: Utc::now(),
                },
            );
            Ok(())
        })
    }

    fn remove_rating(&self, path: &str, user: &str) -> RegistryResult<()> {
        self.write(|t| {
            t.ratings.remove(&(path.to_string(), user.to_string()));
            Ok(())
        })
    }

    fn ratings(&self, path: &str) -> RegistryResult<Vec<Rating>> {
        self.read(|t| {
            t.ratings
                .values()
                .filter(|r| r.path == path)
                .cloned()
                .collect()
        })
    }

    // === Activity Log ===

    fn add_log(&self, activity: &Activity) -> RegistryResult<()> {
        self.write(|t| {
            t.logs.push(activity.clone());
            Ok(())
        })
    }

    fn logs(&self, filter: &LogFilter) -> RegistryResult<Vec<Activity>> {
        self.read(|t| {
            let mut logs: Vec<Activity> =
                t.logs.iter().filter(|a| filter.matches(a)).cloned().collect();
            logs.sort_by_key(|a| a.at);
            if filter.recent_first {
                logs.reverse();
            }
            logs
        })
    }

    // === Dump / Restore ===

    fn dump(&self, path: &str) -> RegistryResult<Vec<u8>> {
        self.read(|t| t.dump(path))?
    }

    fn restore(&self, path: &str, dump: &[u8]) -> RegistryResult<()> {
        self.write(|t| t.restore(path, dump))
    }

    // === Transactions ===

    fn begin_transaction(&self) -> RegistryResult<()> {
        let mut transactions = self.lock_transactions()?;
        let id = thread::current().id();
        if transactions.contains_key(&id) {
            return Err(StorageError::TransactionAlreadyActive.into());
        }
        transactions.insert(id, None);
        tracing::trace!("transaction begun");
        Ok(())
    }

    fn commit_transaction(&self) -> RegistryResult<()> {
        let working = self
            .lock_transactions()?
            .remove(&thread::current().id())
            .ok_or(StorageError::NoActiveTransaction)?;
        if let Some(tables) = working {
            let swapped: RegistryResult<()> = self
                .committed
                .write()
                .map(|mut committed| *committed = tables)
                .map_err(|_| StorageError::LockPoisoned.into());
            self.release_writer()?;
            swapped?;
        }
        tracing::trace!("transaction committed");
        Ok(())
    }

    fn rollback_transaction(&self) -> RegistryResult<()> {
        self.lock_transactions()?
            .remove(&thread::current().id())
            .ok_or(StorageError::NoActiveTransaction)?;
        self.release_writer()?;
        tracing::trace!("transaction rolled back");
        Ok(())
    }

    // === Caching ===

    fn is_no_cache_path(&self, path: &str) -> bool {
        self.no_cache.iter().any(|r| r.is_match(path))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn text(path: &str, body: &str) -> Resource {
        Resource::new(path).with_content(body)
    }

    #[test]
    fn test_root_exists() {
        let s = InMemoryStorage::new();
        assert!(s.exists("/").unwrap());
        assert!(s.get("/").unwrap().unwrap().is_collection());
    }

    #[test]
    fn test_put_get_creates_ancestors() {
        let s = InMemoryStorage::new();
        let stored = s.put("/a/b/c", &text("/ignored", "x")).unwrap();
        assert_eq!(stored, "/a/b/c");

        let c = s.get("/a/b/c").unwrap().unwrap();
        assert_eq!(c.path, "/a/b/c");
        assert_eq!(c.bytes(), Some(&b"x"[..]));
        assert_eq!(c.version_number, 1);

        let b = s.get("/a/b").unwrap().unwrap();
        assert_eq!(b.children().unwrap(), &["/a/b/c".to_string()]);
        let root = s.get("/").unwrap().unwrap();
        assert_eq!(root.children().unwrap(), &["/a".to_string()]);
    }

    #[test]
    fn test_put_update_preserves_identity() {
        let s = InMemoryStorage::new();
        s.put("/a", &text("/a", "1").with_author("alice")).unwrap();
        let first = s.get("/a").unwrap().unwrap();
        s.put("/a", &text("/a", "2").with_author("bob")).unwrap();
        let second = s.get("/a").unwrap().unwrap();
        assert_eq!(first.uuid, second.uuid);
        assert_eq!(second.author, "alice");
        assert_eq!(second.version_number, 2);
        assert_eq!(second.bytes(), Some(&b"2"[..]));
    }

    #[test]
    fn test_put_under_non_collection_fails() {
        let s = InMemoryStorage::new();
        s.put("/file", &text("/file", "x")).unwrap();
        let err = s.put("/file/child", &text("/file/child", "y")).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInput(_)));
    }

    #[test]
    fn test_get_collection_pages() {
        let s = InMemoryStorage::new();
        for i in 0..5 {
            s.put(&format!("/c/r{}", i), &text("", "x")).unwrap();
        }
        let page = s.get_collection("/c", 1, 2).unwrap().unwrap();
        assert_eq!(page.children().unwrap(), &["/c/r1".to_string(), "/c/r2".to_string()]);
        assert_eq!(page.child_count, 5);

        let past_end = s.get_collection("/c", 10, 2).unwrap().unwrap();
        assert!(past_end.children().unwrap().is_empty());
    }

    #[test]
    fn test_meta_data_has_no_content() {
        let s = InMemoryStorage::new();
        s.put("/a", &text("/a", "payload")).unwrap();
        let meta = s.get_meta_data("/a").unwrap().unwrap();
        assert_eq!(meta.bytes(), Some(&b""[..]));
    }

    #[test]
    fn test_delete_cascades() {
        let s = InMemoryStorage::new();
        s.put("/a/b", &text("/a/b", "x")).unwrap();
        s.add_comment("/a/b", "u", "hi").unwrap();
        s.delete("/a").unwrap();
        assert!(!s.exists("/a").unwrap());
        assert!(!s.exists("/a/b").unwrap());
        assert!(s.comments("/a/b").unwrap().is_empty());
        assert!(s.get("/").unwrap().unwrap().children().unwrap().is_empty());
        assert!(s.delete("/a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_move_relocates_subtree() {
        let s = InMemoryStorage::new();
        s.put("/src/x", &text("/src/x", "x")).unwrap();
        s.set_rating("/src/x", "u", 4).unwrap();
        let moved = s.move_resource("/src", "/dst/inner").unwrap();
        assert_eq!(moved, "/dst/inner");
        assert!(!s.exists("/src").unwrap());
        assert!(s.exists("/dst/inner/x").unwrap());
        assert_eq!(s.rating("/dst/inner/x", "u").unwrap(), Some(4));
        let inner = s.get("/dst/inner").unwrap().unwrap();
        assert_eq!(inner.children().unwrap(), &["/dst/inner/x".to_string()]);
    }

    #[test]
    fn test_move_into_itself_fails() {
        let s = InMemoryStorage::new();
        s.put("/a/b", &text("/a/b", "x")).unwrap();
        assert!(s.move_resource("/a", "/a/b/c").is_err());
    }

    #[test]
    fn test_rename_within_parent() {
        let s = InMemoryStorage::new();
        s.put("/p/old", &text("/p/old", "x")).unwrap();
        assert_eq!(s.rename("/p/old", "new").unwrap(), "/p/new");
        assert!(s.exists("/p/new").unwrap());
    }

    #[test]
    fn test_copy_keeps_source() {
        let s = InMemoryStorage::new();
        s.put("/a/x", &text("/a/x", "x")).unwrap();
        s.copy("/a", "/b").unwrap();
        assert!(s.exists("/a/x").unwrap());
        let copied = s.get("/b/x").unwrap().unwrap();
        assert_ne!(copied.uuid, s.get("/a/x").unwrap().unwrap().uuid);
    }

    #[test]
    fn test_snapshots_and_restore() {
        let s = InMemoryStorage::new();
        s.put("/v", &text("/v", "one")).unwrap();
        assert_eq!(s.create_snapshot("/v").unwrap(), 1);
        s.put("/v", &text("/v", "two")).unwrap();
        assert_eq!(s.create_snapshot("/v").unwrap(), 2);

        assert_eq!(
            s.list_versions("/v").unwrap(),
            vec!["/v;version:1".to_string(), "/v;version:2".to_string()]
        );
        let old = s.get("/v;version:1").unwrap().unwrap();
        assert_eq!(old.bytes(), Some(&b"one"[..]));
        assert_eq!(old.path, "/v;version:1");

        s.restore_version("/v;version:1").unwrap();
        assert_eq!(s.get("/v").unwrap().unwrap().bytes(), Some(&b"one"[..]));

        assert!(s.remove_version_history("/v", 1).unwrap());
        assert!(!s.remove_version_history("/v", 1).unwrap());
        assert!(s.get("/v;version:1").unwrap().is_none());
    }

    #[test]
    fn test_rollback_discards_writes() {
        let s = InMemoryStorage::new();
        s.begin_transaction().unwrap();
        s.put("/t", &text("/t", "x")).unwrap();
        assert!(s.exists("/t").unwrap());
        s.rollback_transaction().unwrap();
        assert!(!s.exists("/t").unwrap());
        assert!(!s.in_transaction());
    }

    #[test]
    fn test_commit_publishes_writes() {
        let s = InMemoryStorage::new();
        s.begin_transaction().unwrap();
        s.put("/t", &text("/t", "x")).unwrap();
        s.commit_transaction().unwrap();
        assert!(s.exists("/t").unwrap());
    }

    #[test]
    fn test_transactions_do_not_nest() {
        let s = InMemoryStorage::new();
        s.begin_transaction().unwrap();
        assert!(matches!(
            s.begin_transaction(),
            Err(RegistryError::Storage(StorageError::TransactionAlreadyActive))
        ));
        s.commit_transaction().unwrap();
        assert!(matches!(
            s.commit_transaction(),
            Err(RegistryError::Storage(StorageError::NoActiveTransaction))
        ));
    }

    #[test]
    fn test_uncommitted_writes_invisible_to_other_threads() {
        let s = std::sync::Arc::new(InMemoryStorage::new());
        s.begin_transaction().unwrap();
        s.put("/pending", &text("/pending", "x")).unwrap();

        let other = std::sync::Arc::clone(&s);
        let seen = std::thread::spawn(move || other.exists("/pending").unwrap())
            .join()
            .unwrap();
        assert!(!seen);
        s.commit_transaction().unwrap();
    }

    #[test]
    fn test_concurrent_transactions_do_not_lose_writes() {
        let s = std::sync::Arc::new(InMemoryStorage::new());
        s.begin_transaction().unwrap();
        s.put("/a", &text("/a", "a")).unwrap();

        let other = std::sync::Arc::clone(&s);
        let (started, ready) = std::sync::mpsc::channel();
        let writer = std::thread::spawn(move || {
            other.begin_transaction().unwrap();
            started.send(()).unwrap();
            // Waits for the first transaction to finish
            other.put("/b", &text("/b", "b")).unwrap();
            other.commit_transaction().unwrap();
        });
        ready.recv().unwrap();
        s.commit_transaction().unwrap();
        writer.join().unwrap();

        assert!(s.exists("/a").unwrap());
        assert!(s.exists("/b").unwrap());
        let root = s.get("/").unwrap().unwrap();
        assert_eq!(root.children().unwrap(), &["/a".to_string(), "/b".to_string()][..]);
    }

    #[test]
    fn test_rollback_releases_the_writer() {
        let s = std::sync::Arc::new(InMemoryStorage::new());
        s.begin_transaction().unwrap();
        s.put("/discarded", &text("/discarded", "x")).unwrap();

        let other = std::sync::Arc::clone(&s);
        let writer = std::thread::spawn(move || other.put("/kept", &text("/kept", "y")).unwrap());
        s.rollback_transaction().unwrap();
        writer.join().unwrap();

        assert!(s.exists("/kept").unwrap());
        assert!(!s.exists("/discarded").unwrap());
    }

    #[test]
    fn test_parallel_writers_all_land() {
        let s = std::sync::Arc::new(InMemoryStorage::new());
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let s = std::sync::Arc::clone(&s);
                std::thread::spawn(move || {
                    let p = format!("/w/{}", i);
                    if i % 2 == 0 {
                        s.begin_transaction().unwrap();
                        s.put(&p, &text(&p, "t")).unwrap();
                        s.commit_transaction().unwrap();
                    } else {
                        s.put(&p, &text(&p, "a")).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        let listed = s.get("/w").unwrap().unwrap();
        assert_eq!(listed.children().unwrap().len(), 8);
        for i in 0..8 {
            assert!(s.exists(&format!("/w/{}", i)).unwrap());
        }
    }

    #[test]
    fn test_readers_do_not_wait_for_an_open_writer() {
        let s = std::sync::Arc::new(InMemoryStorage::new());
        s.put("/r", &text("/r", "old")).unwrap();
        s.begin_transaction().unwrap();
        s.put("/r", &text("/r", "new")).unwrap();

        let other = std::sync::Arc::clone(&s);
        let seen = std::thread::spawn(move || other.get("/r").unwrap().unwrap())
            .join()
            .unwrap();
        assert_eq!(seen.bytes(), Some(&b"old"[..]));
        s.commit_transaction().unwrap();
        assert_eq!(s.get("/r").unwrap().unwrap().bytes(), Some(&b"new"[..]));
    }

    #[test]
    fn test_failed_autocommit_write_leaves_no_trace() {
        let s = InMemoryStorage::new();
        s.put("/file", &text("/file", "x")).unwrap();
        assert!(s.put("/file/a/b", &text("", "y")).is_err());
        assert!(!s.exists("/file/a").unwrap());
    }

    #[test]
    fn test_tags() {
        let s = InMemoryStorage::new();
        s.put("/r", &text("/r", "x")).unwrap();
        let tagging = |user: &str| Tagging {
            path: "/r".to_string(),
            name: "blue".to_string(),
            user: user.to_string(),
            tagged_at: Utc::now(),
        };
        s.add_tagging(&tagging("a")).unwrap();
        s.add_tagging(&tagging("a")).unwrap();
        s.add_tagging(&tagging("b")).unwrap();
        assert_eq!(s.taggings("/r").unwrap().len(), 2);

        let paths = s.paths_with_tag("blue").unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].tag_counts.get("blue"), Some(&2));

        assert_eq!(s.remove_taggings("/r", "blue", Some("a")).unwrap(), 1);
        assert_eq!(s.remove_taggings("/r", "blue", None).unwrap(), 1);
    }

    #[test]
    fn test_comments() {
        let s = InMemoryStorage::new();
        s.put("/r", &text("/r", "x")).unwrap();
        let c = s.add_comment("/r", "u", "first").unwrap();
        s.update_comment(c.id, "edited").unwrap();
        assert_eq!(s.get_comment(c.id).unwrap().unwrap().text, "edited");
        s.remove_comment(c.id).unwrap();
        assert!(s.remove_comment(c.id).unwrap_err().is_not_found());
        assert!(s.add_comment("/missing", "u", "x").unwrap_err().is_not_found());
    }

    #[test]
    fn test_dump_and_restore() {
        let s = InMemoryStorage::new();
        s.put("/src/a", &text("/src/a", "A")).unwrap();
        s.put("/src/sub/b", &text("/src/sub/b", "B")).unwrap();
        let dump = s.dump("/src").unwrap();

        s.restore("/dst", &dump).unwrap();
        assert_eq!(s.get("/dst/a").unwrap().unwrap().bytes(), Some(&b"A"[..]));
        assert_eq!(s.get("/dst/sub/b").unwrap().unwrap().bytes(), Some(&b"B"[..]));

        assert!(s.restore("/x", b"not json").is_err());
    }

    #[test]
    fn test_no_cache_paths() {
        let s = InMemoryStorage::new()
            .with_no_cache_paths(&["^/volatile(/.*)?$"])
            .unwrap();
        assert!(s.is_no_cache_path("/volatile/x"));
        assert!(!s.is_no_cache_path("/stable"));
        assert!(InMemoryStorage::new().with_no_cache_paths(&["("]).is_err());
    }

    #[test]
    fn test_logs_filter_and_order() {
        let s = InMemoryStorage::new();
        for (i, path) in ["/a", "/b", "/a"].iter().enumerate() {
            s.add_log(&Activity {
                user: "u".to_string(),
                path: path.to_string(),
                kind: carrel_core::ActivityKind::Add,
                at: Utc::now() + chrono::Duration::seconds(i as i64),
                detail: Some(i.to_string()),
            })
            .unwrap();
        }
        let mut filter = LogFilter::for_path("/a");
        assert_eq!(s.logs(&filter).unwrap().len(), 2);
        filter.recent_first = true;
        assert_eq!(s.logs(&filter).unwrap()[0].detail.as_deref(), Some("2"));
    }
}
