//! Background index of the packages and types that completion and class-path
//! resolution can see. A worker thread rebuilds it from the platform catalog
//! and the class-path directories whenever the class path changes.

use kulla_compiler::platform::{PACKAGES, platform_classes};
use kulla_compiler::types::simple_name;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Type file extensions recognized on the class path.
const TYPE_FILE_EXTENSIONS: &[&str] = &["java", "class"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSnapshot {
    packages: BTreeSet<String>,
    types: BTreeSet<String>,
    /// Types found on the class path, a subset of `types`.
    external: BTreeSet<String>,
    fingerprint: String,
}

impl IndexSnapshot {
    /// Catalog of platform packages and types only.
    pub fn platform() -> Self {
        let mut snapshot = Self::default();
        for package in PACKAGES {
            snapshot.add_package(package);
        }
        for class in platform_classes() {
            snapshot.types.insert(class.name.to_string());
        }
        snapshot
    }

    fn with_class_path(listing: Vec<String>, fingerprint: String) -> Self {
        let mut snapshot = Self::platform();
        for name in listing {
            if let Some((package, _)) = name.rsplit_once('.') {
                snapshot.add_package(package);
            }
            snapshot.types.insert(name.clone());
            snapshot.external.insert(name);
        }
        snapshot.fingerprint = fingerprint;
        snapshot
    }

    fn add_package(&mut self, package: &str) {
        let mut prefix = String::new();
        for part in package.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(part);
            self.packages.insert(prefix.clone());
        }
    }

    pub fn has_package(&self, name: &str) -> bool {
        self.packages.contains(name)
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.types.contains(name)
    }

    /// Qualified type found on the class path rather than in the catalog.
    pub fn has_external_type(&self, name: &str) -> bool {
        self.external.contains(name)
    }

    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(String::as_str)
    }

    /// Simple names of the packages directly inside `parent`, or the
    /// top-level packages when `parent` is empty.
    pub fn subpackages<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.packages.iter().filter_map(move |package| {
            let rest = if parent.is_empty() {
                package.as_str()
            } else {
                package.strip_prefix(parent)?.strip_prefix('.')?
            };
            (!rest.contains('.')).then_some(rest)
        })
    }

    /// Simple names of the types declared directly in `package`.
    pub fn types_in<'a>(&'a self, package: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.types.iter().filter_map(move |name| {
            let (pkg, simple) = name.rsplit_once('.')?;
            (pkg == package).then_some(simple)
        })
    }

    /// Qualified names of every type with this simple name.
    pub fn types_named(&self, simple: &str) -> Vec<String> {
        self.types
            .iter()
            .filter(|name| simple_name(name) == simple)
            .cloned()
            .collect()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

enum Message {
    Rebuild { class_path: Vec<PathBuf>, generation: u64 },
    Shutdown,
}

#[derive(Debug)]
struct IndexState {
    snapshot: Arc<IndexSnapshot>,
    requested: u64,
    completed: u64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<IndexState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the index worker. Dropping it shuts the worker down.
pub struct ClassIndex {
    sender: Sender<Message>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ClassIndex {
    /// Starts the worker and schedules a first build over `class_path`.
    pub fn spawn(class_path: Vec<PathBuf>) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(IndexState {
                snapshot: Arc::new(IndexSnapshot::platform()),
                requested: 0,
                completed: 0,
            }),
            changed: Condvar::new(),
        });
        let (sender, receiver) = mpsc::channel();
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("kulla-index".to_string())
            .spawn(move || index_worker(receiver, worker_shared))?;
        let index = Self {
            sender,
            shared,
            worker: Some(worker),
        };
        if !class_path.is_empty() {
            index.rebuild(class_path);
        }
        Ok(index)
    }

    /// Marks the index stale and asks the worker to rescan.
    pub fn rebuild(&self, class_path: Vec<PathBuf>) {
        let generation = {
            let mut state = self.shared.lock();
            state.requested += 1;
            state.requested
        };
        debug!(generation, entries = class_path.len(), "index rebuild requested");
        if self
            .sender
            .send(Message::Rebuild {
                class_path,
                generation,
            })
            .is_err()
        {
            warn!("index worker is gone; keeping the last snapshot");
            let mut state = self.shared.lock();
            state.completed = state.requested;
            self.shared.changed.notify_all();
        }
    }

    /// Latest snapshot and whether every requested rebuild has finished.
    pub fn snapshot(&self) -> (Arc<IndexSnapshot>, bool) {
        let state = self.shared.lock();
        (state.snapshot.clone(), state.completed >= state.requested)
    }

    pub fn is_up_to_date(&self) -> bool {
        self.snapshot().1
    }

    /// Blocks until pending rebuilds finish or `timeout` passes. Returns
    /// whether the index is up to date.
    pub fn wait_up_to_date(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while state.completed < state.requested {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.shared.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

impl Drop for ClassIndex {
    fn drop(&mut self) {
        let _ = self.sender.send(Message::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("index worker panicked");
            }
        }
    }
}

fn index_worker(receiver: Receiver<Message>, shared: Arc<Shared>) {
    while let Ok(message) = receiver.recv() {
        let Message::Rebuild {
            mut class_path,
            mut generation,
        } = message
        else {
            break;
        };
        // Later requests supersede queued ones.
        let mut shutdown = false;
        while let Ok(next) = receiver.try_recv() {
            match next {
                Message::Rebuild {
                    class_path: path,
                    generation: gen_,
                } => {
                    class_path = path;
                    generation = gen_;
                }
                Message::Shutdown => {
                    shutdown = true;
                    break;
                }
            }
        }
        if shutdown {
            break;
        }
        let listing = list_class_path(&class_path);
        let fingerprint = fingerprint(&listing);
        let mut state = shared.lock();
        if state.snapshot.fingerprint() == fingerprint {
            trace!(generation, "class path unchanged");
        } else {
            debug!(generation, types = listing.len(), "index rebuilt");
            state.snapshot = Arc::new(IndexSnapshot::with_class_path(listing, fingerprint));
        }
        state.completed = state.completed.max(generation);
        shared.changed.notify_all();
    }
    debug!("index worker finished");
}

/// Qualified type names found under the class-path directories, sorted.
pub(crate) fn list_class_path(class_path: &[PathBuf]) -> Vec<String> {
    let mut names = BTreeSet::new();
    for root in class_path {
        if let Err(err) = scan_dir(root, root, &mut names) {
            warn!(path = %root.display(), %err, "skipping class path entry");
        }
    }
    names.into_iter().collect()
}

fn scan_dir(root: &Path, dir: &Path, names: &mut BTreeSet<String>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            scan_dir(root, &path, names)?;
            continue;
        }
        let is_type_file = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| TYPE_FILE_EXTENSIONS.contains(&ext));
        if !is_type_file {
            continue;
        }
        let Ok(relative) = path.with_extension("").strip_prefix(root).map(Path::to_path_buf) else {
            continue;
        };
        let parts: Option<Vec<&str>> = relative.iter().map(|part| part.to_str()).collect();
        if let Some(parts) = parts {
            // Nested class files such as `Outer$Inner.class` are not types
            // users can name directly.
            if parts.iter().all(|p| !p.is_empty() && !p.contains('$')) {
                names.insert(parts.join("."));
            }
        }
    }
    Ok(())
}

/// Content hash of a class-path listing; equal listings skip the rebuild.
pub(crate) fn fingerprint(listing: &[String]) -> String {
    let mut hasher = Sha256::new();
    for name in listing {
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::{ClassIndex, IndexSnapshot, fingerprint, list_class_path};
    use std::fs;
    use std::time::Duration;

    #[test]
    fn platform_snapshot_knows_the_catalog() {
        let snapshot = IndexSnapshot::platform();
        assert!(snapshot.has_package("java"));
        assert!(snapshot.has_package("java.util"));
        assert!(snapshot.has_type("java.lang.String"));
        let under_java: Vec<&str> = snapshot.subpackages("java").collect();
        assert!(under_java.contains(&"util"));
        assert!(under_java.contains(&"lang"));
        assert!(!snapshot.has_external_type("java.lang.String"));
    }

    #[test]
    fn class_path_directories_list_types() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        fs::create_dir_all(dir.path().join("org/demo")).expect("package dirs should be created");
        fs::write(dir.path().join("org/demo/Widget.java"), "class Widget {}").expect("write");
        fs::write(dir.path().join("org/demo/Widget$Part.class"), "").expect("write");
        fs::write(dir.path().join("org/demo/notes.txt"), "").expect("write");
        let listing = list_class_path(&[dir.path().to_path_buf()]);
        assert_eq!(listing, ["org.demo.Widget"]);
    }

    #[test]
    fn fingerprint_tracks_the_listing() {
        let a = fingerprint(&["p.A".to_string()]);
        let b = fingerprint(&["p.B".to_string()]);
        assert_ne!(a, b);
        assert_eq!(a, fingerprint(&["p.A".to_string()]));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn rebuild_publishes_a_new_snapshot() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        fs::create_dir_all(dir.path().join("acme")).expect("package dir should be created");
        fs::write(dir.path().join("acme/Rocket.class"), "").expect("write");
        let index = ClassIndex::spawn(Vec::new()).expect("index should start");
        assert!(index.is_up_to_date());
        index.rebuild(vec![dir.path().to_path_buf()]);
        assert!(index.wait_up_to_date(Duration::from_secs(10)));
        let (snapshot, up_to_date) = index.snapshot();
        assert!(up_to_date);
        assert!(snapshot.has_external_type("acme.Rocket"));
        assert!(snapshot.has_package("acme"));
        assert_eq!(snapshot.types_named("Rocket"), ["acme.Rocket"]);
    }
}
