use super::compound_id;
use super::entry::{Metadata, MoveMode, ObjectType, RegistryEntry, ShardEntry};
use super::layout::{self, FileKind, Layout};
use super::transfer::{self, Transfer};
use crate::formats::ShardLocation;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Catalog format version for compatibility checking
pub const CATALOG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogData {
    version: u32,
    next_revision: u64,
    entries: Vec<RegistryEntry>,
}

/// A source file that passed extension and companion checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSource {
    pub kind: FileKind,
    pub path: PathBuf,
    pub index: Option<PathBuf>,
    /// Extra companions transferred alongside (`.gzi`, sidecar JSON).
    pub companions: Vec<PathBuf>,
}

/// One shard of a new object: its source plus what inspection found in it.
#[derive(Debug, Clone)]
pub struct ShardSource {
    pub source: ValidatedSource,
    pub reference_names: Vec<String>,
}

/// A child registered atomically with its parent.
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub object_type: ObjectType,
    pub name: String,
    pub metadata: Metadata,
    /// Reuse the parent's shard list (annotation sets, references).
    pub share_shards: bool,
}

/// A JSON document the store writes under the root as part of registration.
#[derive(Debug, Clone)]
pub struct Document {
    pub relative_path: String,
    pub contents: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct AddRequest {
    pub object_type: ObjectType,
    pub parent_id: Option<String>,
    pub name: String,
    pub move_mode: MoveMode,
    /// Directory (relative to the root) receiving the transferred files.
    pub destination: String,
    pub shards: Vec<ShardSource>,
    pub metadata: Metadata,
    pub children: Vec<ChildSpec>,
    pub documents: Vec<Document>,
}

impl AddRequest {
    pub fn new(object_type: ObjectType, name: impl Into<String>, destination: String) -> Self {
        Self {
            object_type,
            parent_id: None,
            name: name.into(),
            move_mode: MoveMode::default(),
            destination,
            shards: Vec::new(),
            metadata: Metadata::new(),
            children: Vec::new(),
            documents: Vec::new(),
        }
    }
}

/// The persistent catalog of logical objects and their physical locations.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    layout: Layout,
    data: CatalogData,
}

impl RegistryStore {
    /// Create an empty repository at `root`.
    pub fn initialize(root: impl AsRef<Path>) -> Result<Self> {
        let layout = Layout::new(root.as_ref());
        if layout.catalog_path().exists() {
            return Err(Error::AlreadyExists(format!(
                "{} is already a repository",
                root.as_ref().display()
            )));
        }

        fs::create_dir_all(layout.root())?;
        for dir in [
            layout::REFERENCE_SETS_DIR,
            layout::DATASETS_DIR,
            layout::ONTOLOGIES_DIR,
        ] {
            fs::create_dir_all(layout.root().join(dir))?;
        }

        let store = Self {
            layout,
            data: CatalogData {
                version: CATALOG_VERSION,
                next_revision: 1,
                entries: Vec::new(),
            },
        };
        store.persist()?;
        tracing::info!("initialized repository at {}", root.as_ref().display());
        Ok(store)
    }

    /// Load the catalog of an existing repository.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let layout = Layout::new(root.as_ref());
        let path = layout.catalog_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "no repository at {}",
                    root.as_ref().display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let data: CatalogData = serde_json::from_str(&content).map_err(|e| {
            Error::InvalidFormat(format!("corrupt catalog {}: {}", path.display(), e))
        })?;
        if data.version != CATALOG_VERSION {
            return Err(Error::InvalidFormat(format!(
                "catalog version {} is not supported (expected {})",
                data.version, CATALOG_VERSION
            )));
        }

        let store = Self { layout, data };
        store.validate_structure()?;
        tracing::debug!(
            "loaded {} registry entries from {}",
            store.data.entries.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// All entries in registration order.
    pub fn entries(&self) -> &[RegistryEntry] {
        &self.data.entries
    }

    pub fn get(&self, id: &str) -> Result<&RegistryEntry> {
        self.data
            .entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::NotFound(format!("no object with id {:?}", id)))
    }

    /// Fetch an entry, treating an entry of the wrong type as missing.
    pub fn get_typed(&self, id: &str, object_type: ObjectType) -> Result<&RegistryEntry> {
        match self.get(id) {
            Ok(entry) if entry.object_type == object_type => Ok(entry),
            _ => Err(Error::NotFound(format!(
                "no {} with id {:?}",
                object_type, id
            ))),
        }
    }

    pub fn find(
        &self,
        object_type: ObjectType,
        parent_id: Option<&str>,
        name: &str,
    ) -> Option<&RegistryEntry> {
        self.data.entries.iter().find(|e| {
            e.object_type == object_type && e.parent_id.as_deref() == parent_id && e.name == name
        })
    }

    /// Like [`find`](Self::find) but failing with `NotFound`.
    pub fn lookup(
        &self,
        object_type: ObjectType,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<&RegistryEntry> {
        self.find(object_type, parent_id, name)
            .ok_or_else(|| Error::NotFound(format!("no {} named {:?}", object_type, name)))
    }

    /// Entries of one type under one parent, in registration order.
    pub fn list_objects(
        &self,
        object_type: ObjectType,
        parent_id: Option<&str>,
    ) -> Vec<&RegistryEntry> {
        self.data
            .entries
            .iter()
            .filter(|e| e.object_type == object_type && e.parent_id.as_deref() == parent_id)
            .collect()
    }

    pub fn children(&self, id: &str) -> Vec<&RegistryEntry> {
        self.data
            .entries
            .iter()
            .filter(|e| e.parent_id.as_deref() == Some(id))
            .collect()
    }

    /// Id an entry of this type, name and parent would get.
    pub fn id_for(&self, object_type: ObjectType, parent_id: Option<&str>, name: &str) -> Result<String> {
        let mut parts = vec![object_type.tag().to_string()];
        if let Some(parent_id) = parent_id {
            parts.extend(compound_id::decode(parent_id)?.into_iter().skip(1));
        }
        parts.push(name.to_string());
        Ok(compound_id::encode(&parts))
    }

    /// Resolve a catalog-relative path under the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        self.layout.resolve(relative)
    }

    /// Absolute locations of an entry's shards, in shard order.
    pub fn shard_locations(&self, entry: &RegistryEntry) -> Result<Vec<ShardLocation>> {
        entry
            .shards
            .iter()
            .enumerate()
            .map(|(index, shard)| {
                Ok(ShardLocation {
                    index,
                    path: self.resolve(&shard.relative_path)?,
                    index_path: shard
                        .index_relative_path
                        .as_deref()
                        .map(|p| self.resolve(p))
                        .transpose()?,
                })
            })
            .collect()
    }

    /// Check a source file's extension and locate its required companions.
    pub fn validate_source(&self, path: &Path, kind: FileKind) -> Result<ValidatedSource> {
        if kind.stem(path).is_none() {
            return Err(Error::InvalidFormat(format!(
                "{} does not have a {} extension",
                path.display(),
                kind.extensions().join(" or ")
            )));
        }
        if !path.is_file() {
            return Err(Error::NotFound(format!("{} does not exist", path.display())));
        }

        let index = if kind.index_extensions().is_empty() {
            None
        } else {
            Some(layout::find_index(path, kind).ok_or_else(|| {
                Error::InvalidFormat(format!(
                    "{} has no .{} index",
                    path.display(),
                    kind.index_extensions().join(" or .")
                ))
            })?)
        };

        let mut companions = Vec::new();
        if kind == FileKind::Fasta {
            // the indexed BGZF reader cannot seek without the block index
            let gzi = layout::find_gzi(path).ok_or_else(|| {
                Error::InvalidFormat(format!("{} has no .gzi index", path.display()))
            })?;
            companions.push(gzi);
        }
        if kind.requires_sidecar() {
            let sidecar = layout::sidecar_path(path, kind)
                .filter(|p| p.is_file())
                .ok_or_else(|| {
                    Error::InvalidFormat(format!(
                        "{} has no sidecar metadata JSON",
                        path.display()
                    ))
                })?;
            companions.push(sidecar);
        }

        Ok(ValidatedSource {
            kind,
            path: path.to_path_buf(),
            index,
            companions,
        })
    }

    /// Register a new object (and its children) in one all-or-nothing step.
    pub fn add_object(&mut self, request: AddRequest) -> Result<RegistryEntry> {
        layout::validate_name(&request.name)?;
        self.check_parent(request.object_type, request.parent_id.as_deref())?;
        if self
            .find(request.object_type, request.parent_id.as_deref(), &request.name)
            .is_some()
        {
            return Err(Error::DuplicateName(format!(
                "a {} named {:?} already exists",
                request.object_type, request.name
            )));
        }
        let mut child_names = HashSet::new();
        for child in &request.children {
            if !child_names.insert((child.object_type, child.name.as_str())) {
                return Err(Error::DuplicateName(format!(
                    "{} {:?} appears twice",
                    child.object_type, child.name
                )));
            }
        }
        let destination = self.resolve(&request.destination)?;

        let mut transfers: Vec<Transfer> = Vec::new();
        let mut created: Vec<PathBuf> = Vec::new();
        let outcome = self.transfer_all(&request, &destination, &mut transfers, &mut created);
        let (shards, mut managed) = match outcome {
            Ok(done) => done,
            Err(e) => {
                transfer::rollback(&transfers);
                remove_created(&created);
                return Err(e);
            }
        };

        let before = self.data.clone();
        let id = self.id_for(request.object_type, request.parent_id.as_deref(), &request.name)?;
        if created.first() == Some(&destination) {
            managed.insert(0, request.destination.clone());
        }
        let relative_path = match shards.as_slice() {
            [single] => single.relative_path.clone(),
            _ => request.destination.clone(),
        };
        let entry = RegistryEntry {
            id: id.clone(),
            object_type: request.object_type,
            parent_id: request.parent_id.clone(),
            name: request.name.clone(),
            relative_path: relative_path.clone(),
            revision: self.next_revision(),
            move_mode: (!request.shards.is_empty()).then_some(request.move_mode),
            shards: shards.clone(),
            managed_paths: managed,
            metadata: request.metadata.clone(),
        };
        self.data.entries.push(entry.clone());

        for child in &request.children {
            let child_id = self.id_for(child.object_type, Some(&id), &child.name)?;
            let revision = self.next_revision();
            self.data.entries.push(RegistryEntry {
                id: child_id,
                object_type: child.object_type,
                parent_id: Some(id.clone()),
                name: child.name.clone(),
                relative_path: relative_path.clone(),
                revision,
                move_mode: None,
                shards: if child.share_shards { shards.clone() } else { Vec::new() },
                managed_paths: Vec::new(),
                metadata: child.metadata.clone(),
            });
        }

        if let Err(e) = self.persist() {
            self.data = before;
            transfer::rollback(&transfers);
            remove_created(&created);
            return Err(e);
        }

        tracing::info!(
            "registered {} {:?} ({} shards, {} children)",
            request.object_type,
            request.name,
            entry.shards.len(),
            request.children.len()
        );
        Ok(entry)
    }

    /// Remove an object, its descendants and their managed files.
    pub fn remove_object(
        &mut self,
        object_type: ObjectType,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<Vec<RegistryEntry>> {
        let root_id = self.lookup(object_type, parent_id, name)?.id.clone();

        let mut doomed = vec![root_id];
        let mut cursor = 0;
        while cursor < doomed.len() {
            let id = doomed[cursor].clone();
            doomed.extend(self.children(&id).into_iter().map(|c| c.id.clone()));
            cursor += 1;
        }

        let before = self.data.clone();
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.data.entries)
            .into_iter()
            .partition(|e| doomed.contains(&e.id));
        self.data.entries = kept;
        if let Err(e) = self.persist() {
            self.data = before;
            return Err(e);
        }

        // Deepest entries first so files go before their directories.
        for entry in removed.iter().rev() {
            for relative in entry.managed_paths.iter().rev() {
                self.delete_managed(relative)?;
            }
        }

        tracing::info!(
            "removed {} {:?} and {} descendants",
            object_type,
            name,
            removed.len() - 1
        );
        Ok(removed)
    }

    /// Delete the whole repository tree.
    pub fn destroy(self) -> Result<()> {
        if !self.layout.catalog_path().exists() {
            return Err(Error::NotFound(format!(
                "no repository at {}",
                self.root().display()
            )));
        }
        fs::remove_dir_all(self.root())?;
        tracing::info!("destroyed repository at {}", self.root().display());
        Ok(())
    }

    fn next_revision(&mut self) -> u64 {
        let revision = self.data.next_revision;
        self.data.next_revision += 1;
        revision
    }

    fn check_parent(&self, object_type: ObjectType, parent_id: Option<&str>) -> Result<()> {
        match (object_type.parent_type(), parent_id) {
            (None, None) => Ok(()),
            (Some(expected), Some(parent_id)) => self.get_typed(parent_id, expected).map(|_| ()),
            (None, Some(_)) => Err(Error::InvalidInput(format!(
                "a {} cannot have a parent",
                object_type
            ))),
            (Some(expected), None) => Err(Error::InvalidInput(format!(
                "a {} must belong to a {}",
                object_type, expected
            ))),
        }
    }

    fn transfer_all(
        &self,
        request: &AddRequest,
        destination: &Path,
        transfers: &mut Vec<Transfer>,
        created: &mut Vec<PathBuf>,
    ) -> Result<(Vec<ShardEntry>, Vec<String>)> {
        if !destination.exists() {
            fs::create_dir_all(destination)?;
            created.push(destination.to_path_buf());
        }

        let mut shards = Vec::with_capacity(request.shards.len());
        let mut managed = Vec::new();
        for shard in &request.shards {
            let source = &shard.source;
            let relative_path = self.bring_in(request, &source.path, transfers, &mut managed)?;
            let index_relative_path = source
                .index
                .as_deref()
                .map(|index| self.bring_in(request, index, transfers, &mut managed))
                .transpose()?;
            for companion in &source.companions {
                self.bring_in(request, companion, transfers, &mut managed)?;
            }
            shards.push(ShardEntry {
                relative_path,
                index_relative_path,
                reference_names: shard.reference_names.clone(),
            });
        }

        for document in &request.documents {
            let path = self.resolve(&document.relative_path)?;
            if path.exists() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("{} already exists", path.display()),
                )));
            }
            let json = serde_json::to_vec_pretty(&document.contents)
                .map_err(|e| Error::Internal(format!("failed to encode document: {}", e)))?;
            fs::write(&path, json)?;
            created.push(path);
            managed.push(document.relative_path.clone());
        }

        Ok((shards, managed))
    }

    fn bring_in(
        &self,
        request: &AddRequest,
        source: &Path,
        transfers: &mut Vec<Transfer>,
        managed: &mut Vec<String>,
    ) -> Result<String> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidInput(format!("bad file name {}", source.display())))?;
        let relative = format!("{}/{}", request.destination, file_name);
        let target = self.resolve(&relative)?;
        transfers.push(transfer::transfer(source, &target, request.move_mode)?);
        managed.push(relative.clone());
        Ok(relative)
    }

    fn delete_managed(&self, relative: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("{} already gone", path.display());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let path = self.layout.catalog_path();
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(&self.data)
            .map_err(|e| Error::Internal(format!("failed to encode catalog: {}", e)))?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Reject catalogs whose entries break the structural invariants.
    fn validate_structure(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for entry in &self.data.entries {
            if !ids.insert(entry.id.as_str()) {
                return Err(Error::InvalidFormat(format!("duplicate id {:?}", entry.id)));
            }
            if !names.insert((entry.object_type, entry.parent_id.as_deref(), entry.name.as_str())) {
                return Err(Error::InvalidFormat(format!(
                    "duplicate {} name {:?}",
                    entry.object_type, entry.name
                )));
            }
            self.resolve(&entry.relative_path)?;
            for shard in &entry.shards {
                self.resolve(&shard.relative_path)?;
                if let Some(index) = &shard.index_relative_path {
                    self.resolve(index)?;
                }
            }
        }
        Ok(())
    }
}

fn remove_created(created: &[PathBuf]) {
    for path in created.iter().rev() {
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        if let Err(e) = result {
            tracing::error!("failed to clean up {}: {}", path.display(), e);
        }
    }
}
