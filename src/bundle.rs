// SPDX-License-Identifier: MIT
//! Multi-page bundling
//!
//! Ordinary documents are bundled by handing every per-page container to
//! the external concatenator. Pages that reference an externally-shared
//! dictionary cannot be expressed that way: the dictionary is a cross-page
//! relationship, and the concatenator works a page at a time. For those,
//! [`IndirectIndex`] serializes the multi-page directory structure by hand
//! and the external converter folds it into the final bundled document.
//!
//! Indirect index layout (all integers big-endian):
//!
//! ```text
//! offset 0:  8 bytes  magic "AT&TFORM"
//! offset 8:  4 bytes  length placeholder A (patched)
//! offset 12: 4 bytes  "DJVM"
//! offset 16: 4 bytes  "DIRM"
//! offset 20: 4 bytes  length placeholder B (patched)
//! offset 24: 1 byte   version = 1
//! offset 25: 2 bytes  page count N
//! --- compressed body ---
//!   N x 3 bytes   page size (0 = unknown/overflow)
//!   N x 1 byte    flag (1 = standalone page, 0 = dictionary-only component)
//!   N x variable  NUL-terminated page identifier, in page order
//! ```

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tempfile::{Builder, TempDir, TempPath};
use tracing::info;

use crate::chunks::IFF_EXT;
use crate::ipc::{IpcError, Subprocess};
use crate::page_id::{validate_page_id, PageIdError};
use crate::proxy::Deferred;
use crate::temporary;

/// Version byte of the indirect multi-page directory.
const DIRM_VERSION: u8 = 1;

/// Page sizes at or above this cannot be represented in the 3-byte size
/// field and are recorded as the "unknown" sentinel 0.
const PAGE_SIZE_LIMIT: u64 = 1 << 24;

/// Errors from multi-page bundling
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("cannot bundle zero components")]
    EmptyBundle,

    #[error("too many pages for a multi-page directory: {0}")]
    TooManyPages(usize),

    #[error("duplicate page identifier: {0}")]
    DuplicatePageId(String),

    #[error("component has no file name: {0}")]
    BadComponent(PathBuf),

    #[error("pages-per-dict must be positive")]
    InvalidOptions,

    #[error(transparent)]
    PageId(#[from] PageIdError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Hand-rolled serializer for the indirect multi-page directory
#[derive(Debug, Default)]
pub struct IndirectIndex {
    entries: Vec<IndexEntry>,
}

#[derive(Debug)]
struct IndexEntry {
    page_id: String,
    size: u64,
}

impl IndirectIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a component, in page order. Components named `*.iff` are
    /// flagged as dictionary-only.
    pub fn push(&mut self, page_id: impl Into<String>, size: u64) {
        self.entries.push(IndexEntry { page_id: page_id.into(), size });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The three record groups of the directory body, uncompressed.
    fn records(&self) -> Vec<u8> {
        let mut records = Vec::new();
        for entry in &self.entries {
            // Saturate, not truncate: 0 is a valid "unknown" sentinel.
            let size = if entry.size >= PAGE_SIZE_LIMIT { 0 } else { entry.size as u32 };
            records.extend_from_slice(&size.to_be_bytes()[1..]);
        }
        for entry in &self.entries {
            records.push(u8::from(!entry.page_id.ends_with(IFF_EXT)));
        }
        for entry in &self.entries {
            records.extend_from_slice(entry.page_id.as_bytes());
            records.push(0);
        }
        records
    }

    /// Serialize the directory, compressing the body with `compress`
    /// (the external general-purpose byte compressor in production).
    ///
    /// The two forward-reference length fields are back-patched once the
    /// variable-length body is known.
    pub fn serialize<F>(&self, compress: F) -> Result<Vec<u8>, BundleError>
    where
        F: FnOnce(&[u8]) -> Result<Vec<u8>, IpcError>,
    {
        if self.entries.is_empty() {
            return Err(BundleError::EmptyBundle);
        }
        let count = u16::try_from(self.entries.len())
            .map_err(|_| BundleError::TooManyPages(self.entries.len()))?;
        let mut buffer = Vec::new();
        buffer.extend_from_slice(b"AT&TFORM");
        buffer.extend_from_slice(&[0; 4]);
        buffer.extend_from_slice(b"DJVM");
        buffer.extend_from_slice(b"DIRM");
        buffer.extend_from_slice(&[0; 4]);
        buffer.push(DIRM_VERSION);
        buffer.extend_from_slice(&count.to_be_bytes());
        let compressed = compress(&self.records())?;
        buffer.extend_from_slice(&compressed);
        patch_length(&mut buffer, 8);
        patch_length(&mut buffer, 20);
        Ok(buffer)
    }
}

/// Overwrite the 4-zero-byte placeholder at `offset` with the big-endian
/// byte count from just after the field to the end of the buffer.
fn patch_length(buffer: &mut [u8], offset: usize) {
    debug_assert!(buffer[offset..offset + 4].iter().all(|&byte| byte == 0));
    let length = (buffer.len() - offset - 4) as u32;
    buffer[offset..offset + 4].copy_from_slice(&length.to_be_bytes());
}

/// Compress through the external general-purpose byte compressor.
fn bzz_compress(records: &[u8]) -> Result<Vec<u8>, IpcError> {
    let mut process = Subprocess::with(&["bzz", "-e", "-", "-"], |command| {
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
    })?;
    let mut stdin = process.stdin().expect("stdin was piped");
    stdin.write_all(records)?;
    drop(stdin);
    let mut compressed = Vec::new();
    process
        .stdout()
        .expect("stdout was piped")
        .read_to_end(&mut compressed)?;
    process.wait()?;
    Ok(compressed)
}

#[cfg(unix)]
fn stage_link(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(not(unix))]
fn stage_link(original: &Path, link: &Path) -> io::Result<()> {
    std::fs::copy(original, link).map(|_| ())
}

fn component_page_id(component: &Path) -> Result<String, BundleError> {
    component
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| BundleError::BadComponent(component.to_path_buf()))
}

/// Bundle per-page containers into one multi-page document.
///
/// Components that include a shared-dictionary (`.iff`) part go through
/// the indirect index; plain pages are concatenated directly and the
/// result is deferred until the concatenator finishes.
pub fn bundle_djvu(components: &[PathBuf]) -> Result<Deferred<TempPath>, BundleError> {
    if components.is_empty() {
        return Err(BundleError::EmptyBundle);
    }
    let has_dictionary = components.iter().any(|component| {
        component
            .file_name()
            .map(|name| name.to_string_lossy().ends_with(IFF_EXT))
            .unwrap_or(false)
    });
    if has_dictionary {
        return Ok(Deferred::ready(bundle_via_indirect(components)?));
    }
    let out = temporary::path(".djvu")?;
    let mut argv = vec!["djvm".to_string(), "-c".to_string(), out.display().to_string()];
    argv.extend(components.iter().map(|component| component.display().to_string()));
    let process = Subprocess::new(&argv)?;
    Ok(Deferred::new(out, process, Vec::new()))
}

/// Bundle components through a hand-built indirect index.
///
/// All-or-nothing: any failure aborts the whole bundle, and the private
/// staging directory is removed on every exit path.
pub fn bundle_via_indirect(components: &[PathBuf]) -> Result<TempPath, BundleError> {
    if components.is_empty() {
        return Err(BundleError::EmptyBundle);
    }
    let staging = temporary::directory()?;
    let mut index = IndirectIndex::new();
    let mut seen = HashSet::new();
    for component in components {
        let page_id = component_page_id(component)?;
        if !seen.insert(page_id.clone()) {
            return Err(BundleError::DuplicatePageId(page_id));
        }
        let size = std::fs::metadata(component)?.len();
        stage_link(&std::fs::canonicalize(component)?, &staging.path().join(&page_id))?;
        index.push(page_id, size);
    }
    info!(pages = index.len(), "bundling via indirect multi-page index");
    let serialized = index.serialize(bzz_compress)?;
    let index_path = Builder::new()
        .prefix("__index__.")
        .suffix(".djvu")
        .tempfile_in(staging.path())?
        .into_temp_path();
    std::fs::write(&index_path, &serialized)?;
    let out = temporary::path(".djvu")?;
    let argv = [
        "djvmcvt".to_string(),
        "-b".to_string(),
        index_path.display().to_string(),
        out.display().to_string(),
    ];
    Subprocess::new(&argv)?.wait()?;
    Ok(out)
}

/// Tuning of the external shared-dictionary builder
#[derive(Debug, Clone)]
pub struct SharedDictOptions {
    /// Pages sharing one dictionary.
    pub pages_per_dict: u32,

    /// Shape-substitution aggression passed to the builder.
    pub aggression: u32,
}

impl Default for SharedDictOptions {
    fn default() -> Self {
        Self { pages_per_dict: 10, aggression: 100 }
    }
}

/// One page's outputs from the shared-dictionary builder
#[derive(Debug, Clone)]
pub struct SharedDictPage {
    pub page_id: String,
    /// Re-encoded bitonal page component.
    pub page: PathBuf,
    /// Dictionary component this page must reference via an `INCL` chunk.
    pub dictionary: PathBuf,
    /// Page identifier of that dictionary (`*.iff`).
    pub dictionary_id: String,
}

/// Outputs of one shared-dictionary build, alive as long as this value
#[derive(Debug)]
pub struct SharedDictionaries {
    pub pages: Vec<SharedDictPage>,
    staging: TempDir,
}

impl SharedDictionaries {
    /// The private directory holding every output component.
    pub fn directory(&self) -> &Path {
        self.staging.path()
    }

    /// Component paths in bundling order: each dictionary immediately
    /// before the pages that reference it.
    pub fn component_paths(&self) -> Vec<PathBuf> {
        let mut components = Vec::new();
        let mut last_dictionary: Option<&str> = None;
        for page in &self.pages {
            if last_dictionary != Some(page.dictionary_id.as_str()) {
                components.push(page.dictionary.clone());
                last_dictionary = Some(&page.dictionary_id);
            }
            components.push(page.page.clone());
        }
        components
    }
}

/// Run the external shared-dictionary builder over saved per-page
/// bitonal containers.
///
/// Inputs are staged under a private directory as symlinks named by their
/// validated page identifiers; colliding identifiers are a caller error
/// and are rejected before staging. The builder's scratch index is
/// removed; the returned value owns the output directory.
pub fn build_shared_dictionaries(
    pages: &[(String, PathBuf)],
    options: &SharedDictOptions,
) -> Result<SharedDictionaries, BundleError> {
    if pages.is_empty() {
        return Err(BundleError::EmptyBundle);
    }
    if options.pages_per_dict == 0 {
        return Err(BundleError::InvalidOptions);
    }
    let staging_in = temporary::directory()?;
    let mut seen = HashSet::new();
    for (page_id, container) in pages {
        validate_page_id(page_id)?;
        if !seen.insert(page_id.as_str()) {
            return Err(BundleError::DuplicatePageId(page_id.clone()));
        }
        stage_link(&std::fs::canonicalize(container)?, &staging_in.path().join(page_id))?;
    }

    let staging_out = temporary::directory()?;
    info!(
        pages = pages.len(),
        pages_per_dict = options.pages_per_dict,
        "creating shared dictionaries"
    );
    let index_path = Builder::new()
        .prefix("__index__.")
        .suffix(".djvu")
        .tempfile_in(staging_out.path())?
        .into_temp_path();
    let index_name = index_path
        .file_name()
        .expect("temporary files have a file name")
        .to_string_lossy()
        .into_owned();
    let mut argv = vec![
        "minidjvu".to_string(),
        "--indirect".to_string(),
        "--aggression".to_string(),
        options.aggression.to_string(),
        "--pages-per-dict".to_string(),
        options.pages_per_dict.to_string(),
    ];
    argv.extend(pages.iter().map(|(page_id, _)| staging_in.path().join(page_id).display().to_string()));
    argv.push(index_name);
    let working_directory = staging_out.path().to_path_buf();
    Subprocess::with(&argv, move |command| {
        command.current_dir(working_directory);
    })?
    .wait()?;
    drop(index_path); // scratch index, not part of the output

    let mut result = Vec::new();
    let mut dictionary: Option<(String, PathBuf)> = None;
    for (page_number, (page_id, _)) in pages.iter().enumerate() {
        if page_number % options.pages_per_dict as usize == 0 {
            let dictionary_id = replace_ext(page_id, "iff");
            let path = staging_out.path().join(&dictionary_id);
            dictionary = Some((dictionary_id, path));
        }
        let (dictionary_id, dictionary_path) =
            dictionary.clone().expect("dictionary set on the first page");
        result.push(SharedDictPage {
            page_id: page_id.clone(),
            page: staging_out.path().join(page_id),
            dictionary: dictionary_path,
            dictionary_id,
        });
    }
    Ok(SharedDictionaries { pages: result, staging: staging_out })
}

fn replace_ext(filename: &str, extension: &str) -> String {
    let stem = filename.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(filename);
    format!("{}.{}", stem, extension)
}
