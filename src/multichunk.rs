// SPDX-License-Identifier: MIT
//! The chunk store: a lazily-materialized, dirty-tracking container of one
//! page's named binary chunks
//!
//! A [`Multichunk`] is created per page, mutated as layers are produced,
//! serialized once (idempotently) through the external assembler, and
//! discarded after its bytes reach the final output. Opening an existing
//! container enumerates its chunks without extracting them; re-derivation
//! happens in one batched extractor launch on first access.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tempfile::TempPath;
use tracing::debug;

use crate::chunks::{ChunkKind, INFO_TAG};
use crate::ipc::{IpcError, Subprocess};
use crate::proxy::{CompletionGate, Deferred};
use crate::temporary;

/// Errors from chunk store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("width, height and dpi must all be positive before serialization")]
    InvalidGeometry,

    #[error("cannot serialize a container with no chunks")]
    NoChunks,

    #[error("chunk {0} is not present in this store")]
    MissingChunk(ChunkKind),

    #[error("unrecognized container directory listing: {0}")]
    BadDump(String),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pattern of the page-metadata record in a directory listing,
/// e.g. `INFO [10] DjVu 69x42, v24, 100 dpi`.
static INFO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)x(\d+).*?\b(\d+)\s+dpi").expect("hard-coded pattern"));

/// Explicit store lifecycle state.
///
/// `SavedPristine` and `LoadedUnmaterialized` both mean the backing
/// container reflects the in-memory state; the latter additionally means
/// nothing has been extracted yet, only enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreState {
    Empty,
    Modified,
    SavedPristine,
    LoadedUnmaterialized,
}

#[derive(Debug)]
enum ContainerHandle {
    Temp(TempPath),
    External(PathBuf),
}

impl ContainerHandle {
    fn as_path(&self) -> &Path {
        match self {
            ContainerHandle::Temp(path) => path,
            ContainerHandle::External(path) => path,
        }
    }
}

/// A chunk value supplied by the caller
#[derive(Debug)]
pub enum ChunkSource {
    /// Inline scalar passed verbatim to the assembler (e.g. the page name
    /// of a shared dictionary for an `INCL` chunk).
    Inline(String),

    /// Already-materialized bytes at a caller-owned path.
    Path(PathBuf),

    /// Already-materialized bytes in a temporary file the store takes over.
    Temp(TempPath),

    /// Bytes not yet produced by an external computation.
    Deferred(Deferred<TempPath>),
}

#[derive(Debug)]
enum Chunk {
    Inline(String),
    File(PathBuf),
    Temp(TempPath),
    Deferred(Deferred<TempPath>),
    NotYetExtracted,
}

impl From<ChunkSource> for Chunk {
    fn from(source: ChunkSource) -> Self {
        match source {
            ChunkSource::Inline(value) => Chunk::Inline(value),
            ChunkSource::Path(path) => Chunk::File(path),
            ChunkSource::Temp(path) => Chunk::Temp(path),
            ChunkSource::Deferred(deferred) => Chunk::Deferred(deferred),
        }
    }
}

/// A materialized chunk value handed back by [`Multichunk::get`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkData {
    Inline(String),
    Path(PathBuf),
}

/// Named-chunk container for one page
#[derive(Debug)]
pub struct Multichunk {
    width: u32,
    height: u32,
    dpi: u32,
    chunks: BTreeMap<ChunkKind, Chunk>,
    raw_image: Option<TempPath>,
    state: StoreState,
    backing: Option<ContainerHandle>,
}

impl Multichunk {
    /// Create an empty store for a page of the given geometry.
    pub fn new(width: u32, height: u32, dpi: u32) -> Self {
        Self {
            width,
            height,
            dpi,
            chunks: BTreeMap::new(),
            raw_image: None,
            state: StoreState::Empty,
            backing: None,
        }
    }

    /// Open an existing container, enumerating its chunks without
    /// extracting them.
    ///
    /// Runs the external directory dumper; the resulting store is pristine
    /// but every chunk is unmaterialized until first read.
    pub fn load(container: &Path) -> Result<Self, StoreError> {
        let argv = ["djvudump".to_string(), container.display().to_string()];
        let mut process = Subprocess::with(&argv, |command| {
            command.stdout(Stdio::piped());
        })?;
        let mut dump = String::new();
        process
            .stdout()
            .expect("stdout was piped")
            .read_to_string(&mut dump)?;
        process.wait()?;
        Self::from_dump(&dump, container)
    }

    fn from_dump(dump: &str, container: &Path) -> Result<Self, StoreError> {
        let mut lines = dump.lines();
        let header = lines
            .next()
            .ok_or_else(|| StoreError::BadDump("empty directory listing".to_string()))?;
        if !header.contains("FORM:DJVU") {
            return Err(StoreError::BadDump(format!(
                "not a single-page container: {}",
                header.trim()
            )));
        }
        let mut geometry = None;
        let mut chunks = BTreeMap::new();
        for line in lines {
            let line = line.trim_start();
            let Some(tag) = line.get(..4) else { continue };
            if tag == INFO_TAG {
                let captures = INFO_RE.captures(line).ok_or_else(|| {
                    StoreError::BadDump(format!("unparsable INFO record: {}", line))
                })?;
                let number = |index: usize| {
                    captures[index]
                        .parse::<u32>()
                        .map_err(|_| StoreError::BadDump(format!("unparsable INFO record: {}", line)))
                };
                geometry = Some((number(1)?, number(2)?, number(3)?));
            } else if let Some(kind) = ChunkKind::from_name(tag) {
                chunks.insert(kind, Chunk::NotYetExtracted);
            }
        }
        let (width, height, dpi) =
            geometry.ok_or_else(|| StoreError::BadDump("no INFO record".to_string()))?;
        Ok(Self {
            width,
            height,
            dpi,
            chunks,
            raw_image: None,
            state: StoreState::LoadedUnmaterialized,
            backing: Some(ContainerHandle::External(container.to_path_buf())),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    /// Whether the backing container already reflects the in-memory state.
    pub fn is_pristine(&self) -> bool {
        matches!(self.state, StoreState::SavedPristine | StoreState::LoadedUnmaterialized)
    }

    pub fn contains(&self, kind: ChunkKind) -> bool {
        self.chunks.contains_key(&kind)
    }

    /// Chunk kinds currently present, in canonical order.
    pub fn kinds(&self) -> Vec<ChunkKind> {
        self.chunks.keys().copied().collect()
    }

    /// Kinds whose in-memory value is stale relative to the backing
    /// container and must be re-derived before being read.
    pub fn dirty_kinds(&self) -> Vec<ChunkKind> {
        self.chunks
            .iter()
            .filter(|(_, chunk)| matches!(chunk, Chunk::NotYetExtracted))
            .map(|(&kind, _)| kind)
            .collect()
    }

    /// Store a chunk value.
    ///
    /// The new value supersedes whatever the backing container held: the
    /// kind is no longer dirty, and the whole store is no longer pristine.
    pub fn set(&mut self, kind: ChunkKind, source: ChunkSource) {
        self.chunks.insert(kind, source.into());
        self.state = StoreState::Modified;
    }

    /// Accept a raw page image in the intermediate pixel format the
    /// external photo encoder expects (PPM).
    ///
    /// The image is a transient pseudo-chunk: the assembler converts it
    /// into the sampled-color chunk, and [`save`](Multichunk::save) clears
    /// it afterwards.
    pub fn set_raw_image(&mut self, ppm: &[u8]) -> Result<(), StoreError> {
        let staged = temporary::path(".ppm")?;
        std::fs::write(&staged, ppm)?;
        self.raw_image = Some(staged);
        self.state = StoreState::Modified;
        Ok(())
    }

    /// Read a chunk value, re-deriving it from the backing container first
    /// if it is dirty.
    ///
    /// All currently-dirty chunks are extracted in one external launch;
    /// each becomes a deferred value keyed to that single invocation.
    pub fn get(&mut self, kind: ChunkKind) -> Result<ChunkData, StoreError> {
        if !self.chunks.contains_key(&kind) {
            return Err(StoreError::MissingChunk(kind));
        }
        if matches!(self.chunks[&kind], Chunk::NotYetExtracted) {
            if self.state == StoreState::Modified {
                self.save()?;
            }
            self.extract_unmaterialized()?;
        }
        match self.chunks.get_mut(&kind).expect("presence checked above") {
            Chunk::Inline(value) => Ok(ChunkData::Inline(value.clone())),
            Chunk::File(path) => Ok(ChunkData::Path(path.clone())),
            Chunk::Temp(path) => Ok(ChunkData::Path(path.to_path_buf())),
            Chunk::Deferred(deferred) => Ok(ChunkData::Path(deferred.get()?.to_path_buf())),
            Chunk::NotYetExtracted => unreachable!("extracted above"),
        }
    }

    /// Serialize the store into a single-page container.
    ///
    /// A no-op returning the existing container when the store is
    /// pristine. Contract violations (zero geometry, zero chunks) are
    /// reported before any external process is launched.
    pub fn save(&mut self) -> Result<&Path, StoreError> {
        if self.is_pristine() {
            return Ok(self
                .backing
                .as_ref()
                .expect("a pristine store always has a backing container")
                .as_path());
        }
        if self.width == 0 || self.height == 0 || self.dpi == 0 {
            return Err(StoreError::InvalidGeometry);
        }
        if self.chunks.is_empty() && self.raw_image.is_none() {
            return Err(StoreError::NoChunks);
        }
        // Stale chunks carried over from a loaded container must be
        // materialized before the old backing is replaced.
        self.extract_unmaterialized()?;

        let workdir = temporary::directory()?;
        let result = workdir.path().join("result.djvu");
        let mut argv = vec![
            "djvumake".to_string(),
            result.display().to_string(),
            format!("INFO={},{},{}", self.width, self.height, self.dpi),
        ];
        let mut entries: Vec<(&ChunkKind, &mut Chunk)> = self.chunks.iter_mut().collect();
        entries.sort_by_key(|(kind, _)| (kind.assembly_order(), **kind));
        for (kind, chunk) in entries {
            let value = match chunk {
                Chunk::Inline(value) => value.clone(),
                Chunk::File(path) => path.display().to_string(),
                Chunk::Temp(path) => path.display().to_string(),
                Chunk::Deferred(deferred) => deferred.get()?.display().to_string(),
                Chunk::NotYetExtracted => unreachable!("materialized above"),
            };
            argv.push(format!("{}={}", kind.name(), value));
        }
        if let Some(image) = &self.raw_image {
            argv.push(format!("PPM={}", image.display()));
        }
        Subprocess::new(&argv)?.wait()?;

        // Capture the produced container as a hard-linked temporary file,
        // outliving the scratch directory.
        let target = temporary::path(".djvu")?;
        std::fs::remove_file(&target)?;
        std::fs::hard_link(&result, &target)?;
        debug!(container = %target.display(), "assembled page container");

        self.raw_image = None;
        self.backing = Some(ContainerHandle::Temp(target));
        self.state = StoreState::SavedPristine;
        Ok(self
            .backing
            .as_ref()
            .expect("backing was just set")
            .as_path())
    }

    /// Re-derive every dirty chunk from the backing container with a
    /// single extractor launch, then release the backing container.
    fn extract_unmaterialized(&mut self) -> Result<(), StoreError> {
        let dirty = self.dirty_kinds();
        if dirty.is_empty() {
            return Ok(());
        }
        let backing = self
            .backing
            .take()
            .expect("unmaterialized chunks imply a backing container");
        let mut argv = vec![
            "djvuextract".to_string(),
            backing.as_path().display().to_string(),
        ];
        let mut outputs = Vec::new();
        for kind in &dirty {
            let out = temporary::path(&format!(".{}", kind.name().to_ascii_lowercase()))?;
            argv.push(format!("{}={}", kind.name(), out.display()));
            outputs.push(out);
        }
        let process = Subprocess::new(&argv)?;
        // The backing container must stay alive until the one shared
        // extraction has been waited on; afterwards it is unnecessary.
        let keep_alive = match backing {
            ContainerHandle::Temp(path) => vec![path],
            ContainerHandle::External(_) => Vec::new(),
        };
        let gate = CompletionGate::new(process, keep_alive);
        for (kind, out) in dirty.into_iter().zip(outputs) {
            self.chunks.insert(kind, Chunk::Deferred(Deferred::with_gate(out, gate.clone())));
        }
        // With the backing gone, a later save must reassemble.
        self.state = StoreState::Modified;
        Ok(())
    }
}
