//! Module catalog - in-memory registry of every known module descriptor

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use crate::application::errors::ModuleError;
use crate::domain::entities::{ModuleDescriptor, SearchCriteria};
use crate::infrastructure::plugins::metadata;

/// Files that may sit in the module root without being modules
const IGNORED_FILES: [&str; 3] = ["README.md", "LICENSE", metadata::METADATA_FILE];

/// Catalog shared between the lifecycle controller and the install engine
pub type SharedCatalog = Arc<RwLock<ModuleCatalog>>;

/// Ordered set of descriptors, unique on `pack`
#[derive(Debug)]
pub struct ModuleCatalog {
    root: PathBuf,
    exclusion_prefix: String,
    modules: Vec<ModuleDescriptor>,
}

impl ModuleCatalog {
    pub fn new(root: impl Into<PathBuf>, exclusion_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            exclusion_prefix: exclusion_prefix.into(),
            modules: Vec::new(),
        }
    }

    /// Wrap into the shared handle passed to the controllers
    pub fn shared(self) -> SharedCatalog {
        Arc::new(RwLock::new(self))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a module-root entry is skipped by discovery
    pub fn is_excluded(&self, file_name: &str) -> bool {
        file_name.starts_with(&self.exclusion_prefix) || file_name.starts_with('.')
    }

    /// Read every module under the root without touching the catalog
    pub fn scan(&self) -> Result<Vec<ModuleDescriptor>, ModuleError> {
        let mut found = Vec::new();

        if !self.root.exists() {
            tracing::warn!("Module directory does not exist: {}", self.root.display());
            return Ok(found);
        }

        let mut entries: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            match entry {
                Ok(e) => entries.push(e.path()),
                Err(e) => tracing::warn!("Failed to read directory entry: {}", e),
            }
        }
        entries.sort();

        let mut seen = HashSet::new();
        for path in entries {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if self.is_excluded(file_name) {
                tracing::debug!("Skipping excluded entry {}", file_name);
                continue;
            }
            let is_dir = path.is_dir();
            if !is_dir && (metadata::is_sidecar(file_name) || IGNORED_FILES.contains(&file_name)) {
                continue;
            }

            let descriptor = metadata::read_or_synthesize(&path, is_dir);
            if !seen.insert(descriptor.pack.clone()) {
                tracing::warn!("Duplicate pack {} at {}, ignoring", descriptor.pack, path.display());
                continue;
            }
            found.push(descriptor);
        }

        Ok(found)
    }

    /// Rebuild the catalog from disk, then reorder
    pub fn discover(&mut self) -> Result<&[ModuleDescriptor], ModuleError> {
        let found = self.scan()?;
        tracing::debug!("Discovered {} modules under {}", found.len(), self.root.display());
        self.replace(found);
        Ok(&self.modules)
    }

    /// Replace the whole catalog, keeping the first descriptor per pack
    pub fn replace(&mut self, modules: Vec<ModuleDescriptor>) {
        let mut seen = HashSet::new();
        self.modules = modules
            .into_iter()
            .filter(|m| seen.insert(m.pack.clone()))
            .collect();
        self.reorder();
    }

    /// Align `loaded` with the runtime's live state, then reorder
    pub fn reconcile(&mut self, is_live: impl Fn(&str) -> bool) {
        for module in &mut self.modules {
            module.loaded = is_live(&module.pack);
        }
        self.reorder();
    }

    /// Dependency-first partition: packs referenced by other modules, then
    /// the remaining loaded ones, then the unloaded ones; each part sorted
    /// by pack. Only direct references count.
    pub fn reorder(&mut self) {
        let referenced: HashSet<String> = self
            .modules
            .iter()
            .flat_map(|m| {
                m.dependency_list()
                    .iter()
                    .filter(move |dep| **dep != m.pack)
                    .cloned()
            })
            .collect();

        let mut dependencies = Vec::new();
        let mut common = Vec::new();
        let mut unloaded = Vec::new();
        for module in std::mem::take(&mut self.modules) {
            if referenced.contains(&module.pack) {
                dependencies.push(module);
            } else if !module.loaded {
                unloaded.push(module);
            } else {
                common.push(module);
            }
        }
        for part in [&mut dependencies, &mut common, &mut unloaded] {
            part.sort_by(|a, b| a.pack.cmp(&b.pack));
        }

        self.modules = dependencies;
        self.modules.append(&mut common);
        self.modules.append(&mut unloaded);
    }

    /// Criteria search. `match_any` unions the per-criterion matches,
    /// otherwise each criterion filters the previous result.
    pub fn search(&self, match_any: bool, criteria: &SearchCriteria) -> Result<Vec<ModuleDescriptor>, ModuleError> {
        let predicates = predicates(criteria);
        if predicates.is_empty() {
            return Err(ModuleError::EmptySearch);
        }

        let found = if match_any {
            self.modules
                .iter()
                .filter(|m| predicates.iter().any(|p| p(m)))
                .cloned()
                .collect()
        } else {
            let mut remaining: Vec<&ModuleDescriptor> = self.modules.iter().collect();
            for predicate in &predicates {
                remaining.retain(|m| predicate(m));
            }
            remaining.into_iter().cloned().collect()
        };
        Ok(found)
    }

    /// First module whose name or pack matches
    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        let index = self.position(name)?;
        self.modules.get(index)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ModuleDescriptor> {
        let index = self.position(name)?;
        self.modules.get_mut(index)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.modules
            .iter()
            .position(|m| text_matches(&m.name, name) || text_matches(&m.pack, name))
    }

    /// Insert, replacing any descriptor with the same pack
    pub fn add(&mut self, descriptor: ModuleDescriptor) {
        match self.modules.iter_mut().find(|m| m.pack == descriptor.pack) {
            Some(existing) => *existing = descriptor,
            None => self.modules.push(descriptor),
        }
    }

    /// Remove by pack; absent packs are a no-op
    pub fn remove(&mut self, pack: &str) -> Option<ModuleDescriptor> {
        let index = self.modules.iter().position(|m| m.pack == pack)?;
        Some(self.modules.remove(index))
    }

    /// Record a pack's runtime state; false when the pack is unknown
    pub fn set_loaded(&mut self, pack: &str, loaded: bool) -> bool {
        match self.modules.iter_mut().find(|m| m.pack == pack) {
            Some(module) => {
                module.loaded = loaded;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, pack: &str) -> bool {
        self.modules.iter().any(|m| m.pack == pack)
    }

    pub fn all(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Case-insensitive match on the full value or on everything after its
/// first dot (`module.help_desk` answers to `help_desk`)
fn text_matches(value: &str, query: &str) -> bool {
    let query = query.to_lowercase();
    if value.to_lowercase() == query {
        return true;
    }
    value
        .split_once('.')
        .map(|(_, rest)| rest.to_lowercase() == query)
        .unwrap_or(false)
}

type Predicate<'a> = Box<dyn Fn(&ModuleDescriptor) -> bool + 'a>;

fn predicates(criteria: &SearchCriteria) -> Vec<Predicate<'_>> {
    let mut predicates: Vec<Predicate<'_>> = Vec::new();
    if let Some(name) = &criteria.name {
        predicates.push(Box::new(move |m: &ModuleDescriptor| text_matches(&m.name, name)));
    }
    if let Some(pack) = &criteria.pack {
        predicates.push(Box::new(move |m: &ModuleDescriptor| text_matches(&m.pack, pack)));
    }
    if let Some(version) = &criteria.version {
        predicates.push(Box::new(move |m: &ModuleDescriptor| m.version == *version));
    }
    if let Some(author) = &criteria.author {
        let author = author.to_lowercase();
        predicates.push(Box::new(move |m: &ModuleDescriptor| m.authors.iter().any(|a| a.to_lowercase() == author)));
    }
    if let Some(remote) = criteria.has_remote_dependencies {
        predicates.push(Box::new(move |m: &ModuleDescriptor| m.has_remote_dependencies == remote));
    }
    if let Some(category) = criteria.category {
        predicates.push(Box::new(move |m: &ModuleDescriptor| m.category == category));
    }
    if let Some(dependency) = &criteria.dependency {
        predicates.push(Box::new(move |m: &ModuleDescriptor| {
            m.dependency_list().iter().any(|d| text_matches(d, dependency))
        }));
    }
    if let Some(loaded) = criteria.loaded {
        predicates.push(Box::new(move |m: &ModuleDescriptor| m.loaded == loaded));
    }
    predicates
}
