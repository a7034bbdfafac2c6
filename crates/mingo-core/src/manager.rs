//! Registry of loaded queries

use crate::parser::load_query_set;
use crate::query::{QueryDefinition, QuerySet};
use mingo_common::{MingoError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Quiet period before reloading, so one save that fires several events reloads once
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Immutable view of the registry
#[derive(Debug, Default)]
struct Registry {
    queries: HashMap<String, Arc<QueryDefinition>>,
    sets: Vec<Arc<QuerySet>>,
}

impl Registry {
    /// A copy of this registry with `set` added, replacing any set loaded from `replacing`
    fn with_set(&self, set: QuerySet, replacing: Option<&Path>) -> Result<Registry> {
        let mut queries: HashMap<_, _> = self
            .queries
            .iter()
            .filter(|(_, q)| replacing != Some(q.source.as_path()))
            .map(|(name, q)| (name.clone(), Arc::clone(q)))
            .collect();

        for query in &set.queries {
            if let Some(existing) = queries.get(&query.name) {
                return Err(MingoError::DuplicateQueryName(format!(
                    "'{}' in {} is already registered from {}",
                    query.name,
                    set.path.display(),
                    existing.source.display()
                )));
            }
            queries.insert(query.name.clone(), Arc::clone(query));
        }

        let mut sets: Vec<_> = self
            .sets
            .iter()
            .filter(|s| replacing != Some(s.path.as_path()))
            .cloned()
            .collect();
        sets.push(Arc::new(set));

        Ok(Registry { queries, sets })
    }
}

struct WatchState {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

/// Name → definition registry.
///
/// Lookups read an immutable snapshot; registration builds a new snapshot and swaps it
/// in, so a reader sees either all of a set's queries or none of them.
pub struct QueryManager {
    registry: RwLock<Arc<Registry>>,
    watch: Mutex<Option<WatchState>>,
}

impl std::fmt::Debug for QueryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryManager")
            .field("queries", &self.len())
            .field("watching", &self.is_watching())
            .finish()
    }
}

impl Default for QueryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryManager {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Arc::new(Registry::default())),
            watch: Mutex::new(None),
        }
    }

    fn snapshot(&self) -> Arc<Registry> {
        Arc::clone(&self.registry.read())
    }

    /// Register every query of `set`.
    ///
    /// # Errors
    /// `DuplicateQueryName` if any name is already registered; nothing from the set is
    /// registered in that case.
    pub fn register(&self, set: QuerySet) -> Result<()> {
        let path = set.path.clone();
        let count = set.len();
        let mut registry = self.registry.write();
        let next = registry.with_set(set, None)?;
        *registry = Arc::new(next);
        info!(path = %path.display(), queries = count, "query set registered");
        Ok(())
    }

    /// Load a query-set file and register it
    pub fn register_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.register(load_query_set(path)?)
    }

    /// Re-read a registered query-set file and atomically replace its queries.
    ///
    /// On any error the previously registered queries stay in place.
    pub fn reload(&self, path: &Path) -> Result<usize> {
        let set = load_query_set(path)?;
        let count = set.len();
        let mut registry = self.registry.write();
        if !registry.sets.iter().any(|s| s.path == path) {
            return Err(MingoError::Validation(format!(
                "{} is not a registered query set",
                path.display()
            )));
        }
        let next = registry.with_set(set, Some(path))?;
        *registry = Arc::new(next);
        info!(path = %path.display(), queries = count, "query set reloaded");
        Ok(count)
    }

    /// # Errors
    /// `UnknownQuery` if no query has this name
    pub fn lookup(&self, name: &str) -> Result<Arc<QueryDefinition>> {
        self.registry
            .read()
            .queries
            .get(name)
            .cloned()
            .ok_or_else(|| MingoError::UnknownQuery(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.read().queries.contains_key(name)
    }

    /// Registered query names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.snapshot().queries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.registry.read().queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered query sets in registration order
    pub fn query_sets(&self) -> Vec<Arc<QuerySet>> {
        self.snapshot().sets.clone()
    }

    pub fn is_watching(&self) -> bool {
        self.watch.lock().is_some()
    }

    /// Reload query sets when their files change. Must be called within a tokio runtime.
    pub fn watch(self: &Arc<Self>) -> Result<()> {
        let mut watch = self.watch.lock();
        if watch.is_some() {
            return Ok(());
        }

        // Canonical path of each file → path it was registered under
        let mut files = HashMap::new();
        let mut dirs = HashSet::new();
        for set in self.query_sets() {
            let canonical = set.path.canonicalize().map_err(|e| {
                MingoError::Validation(format!("cannot watch {}: {}", set.path.display(), e))
            })?;
            if let Some(dir) = canonical.parent() {
                dirs.insert(dir.to_path_buf());
            }
            files.insert(canonical, set.path.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    for path in event.paths {
                        let _ = tx.send(path);
                    }
                }
            }
        })
        .map_err(|e| MingoError::Internal(format!("cannot create file watcher: {}", e)))?;

        // Watch directories: editors often replace a file instead of writing it in place
        for dir in &dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|e| MingoError::Internal(format!("cannot watch {}: {}", dir.display(), e)))?;
        }

        let watched = files.len();
        let task = tokio::spawn(reload_loop(Arc::downgrade(self), rx, files));
        info!(files = watched, "watching query sets for changes");
        *watch = Some(WatchState {
            _watcher: watcher,
            task,
        });
        Ok(())
    }

    /// Stop watching files. Idempotent.
    pub fn shutdown(&self) {
        if let Some(state) = self.watch.lock().take() {
            state.task.abort();
            debug!("query set watcher stopped");
        }
    }
}

async fn reload_loop(
    manager: Weak<QueryManager>,
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    files: HashMap<PathBuf, PathBuf>,
) {
    while let Some(first) = rx.recv().await {
        tokio::time::sleep(RELOAD_DEBOUNCE).await;
        let mut changed = HashSet::from([first]);
        while let Ok(path) = rx.try_recv() {
            changed.insert(path);
        }

        let Some(current) = manager.upgrade() else {
            return;
        };
        let mut reloaded = HashSet::new();
        for path in changed {
            let canonical = path.canonicalize().unwrap_or(path);
            let Some(registered) = files.get(&canonical) else {
                continue;
            };
            if !reloaded.insert(registered.clone()) {
                continue;
            }
            if let Err(e) = current.reload(registered) {
                warn!(path = %registered.display(), error = %e, "query set reload rejected, keeping previous definitions");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query_set;

    fn set(path: &str, xml: &str) -> QuerySet {
        parse_query_set(xml, Path::new(path)).unwrap()
    }

    fn users() -> QuerySet {
        set(
            "users.xml",
            r#"<querySet collection="users">
                <query name="findUser" converter="userConverter">{ "email": "${email}" }</query>
                <query name="users.byAge" type="aggregation">[ { "$match": {} } ]</query>
            </querySet>"#,
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let manager = QueryManager::new();
        manager.register(users()).unwrap();

        let query = manager.lookup("findUser").unwrap();
        assert_eq!(query.collection, "users");
        assert_eq!(manager.names(), vec!["findUser".to_string(), "users.byAge".to_string()]);
        assert_eq!(manager.query_sets().len(), 1);
    }

    #[test]
    fn test_unknown_query() {
        let manager = QueryManager::new();
        assert!(matches!(manager.lookup("nope"), Err(MingoError::UnknownQuery(_))));
    }

    #[test]
    fn test_duplicate_is_all_or_nothing() {
        let manager = QueryManager::new();
        manager.register(users()).unwrap();

        let other = set(
            "other.xml",
            r#"<querySet collection="orders">
                <query name="orders.open">{}</query>
                <query name="findUser">{}</query>
            </querySet>"#,
        );
        let err = manager.register(other).unwrap_err();
        assert!(matches!(err, MingoError::DuplicateQueryName(_)));
        assert!(!manager.contains("orders.open"));
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.query_sets().len(), 1);
    }

    fn write(dir: &Path, name: &str, queries: &[&str]) -> PathBuf {
        let body: String = queries
            .iter()
            .map(|name| format!(r#"<query name="{}">{{ "n": "{}" }}</query>"#, name, name))
            .collect();
        let path = dir.join(name);
        std::fs::write(&path, format!(r#"<querySet collection="c">{}</querySet>"#, body)).unwrap();
        path
    }

    #[test]
    fn test_reload_replaces_the_whole_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "users.xml", &["a", "b"]);
        let manager = QueryManager::new();
        manager.register_file(&path).unwrap();
        let old_b = manager.lookup("b").unwrap();

        write(dir.path(), "users.xml", &["b", "c"]);
        assert_eq!(manager.reload(&path).unwrap(), 2);

        assert_eq!(manager.names(), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(manager.query_sets().len(), 1);
        // Readers holding the previous definition keep it
        assert_eq!(old_b.name, "b");
        assert!(!Arc::ptr_eq(&old_b, &manager.lookup("b").unwrap()));
    }

    #[test]
    fn test_rejected_reload_keeps_previous_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let users = write(dir.path(), "users.xml", &["a", "b"]);
        let orders = write(dir.path(), "orders.xml", &["x"]);
        let manager = QueryManager::new();
        manager.register_file(&users).unwrap();
        manager.register_file(&orders).unwrap();

        std::fs::write(&users, "<querySet collection=\"c\"><query name=\"a\">").unwrap();
        assert!(matches!(manager.reload(&users), Err(MingoError::Parse(_))));
        assert_eq!(manager.names(), vec!["a", "b", "x"]);

        write(dir.path(), "users.xml", &["a", "x"]);
        assert!(matches!(manager.reload(&users), Err(MingoError::DuplicateQueryName(_))));
        assert_eq!(manager.names(), vec!["a", "b", "x"]);
        assert_eq!(manager.lookup("x").unwrap().source, orders);
    }

    #[test]
    fn test_reload_of_unregistered_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "users.xml", &["a"]);
        let manager = QueryManager::new();
        assert!(matches!(manager.reload(&path), Err(MingoError::Validation(_))));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_watched_file_edit_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "users.xml", &["a"]);
        let manager = Arc::new(QueryManager::new());
        manager.register_file(&path).unwrap();
        manager.watch().unwrap();
        assert!(manager.is_watching());

        write(dir.path(), "users.xml", &["a", "b"]);
        for _ in 0..50 {
            if manager.contains("b") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(manager.contains("b"));

        // A broken edit is ignored
        std::fs::write(&path, "not xml").unwrap();
        tokio::time::sleep(RELOAD_DEBOUNCE * 5).await;
        assert_eq!(manager.names(), vec!["a", "b"]);

        manager.shutdown();
        assert!(!manager.is_watching());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let manager = QueryManager::new();
        manager.shutdown();
        manager.shutdown();
        assert!(!manager.is_watching());
    }
}
