// SPDX-License-Identifier: MIT
//! # DjVu Assembler
//!
//! A chunk-based assembly engine for DjVu page documents. Single-page
//! containers are built out of independently produced binary chunks, and
//! many such pages are bundled into a multi-page archive, either by
//! straightforward concatenation or through a hand-rolled indirect index
//! when pages share an external dictionary.
//!
//! This crate does not reimplement any image codec. The byte-level
//! encoders and the container tools are the external DjVuLibre programs
//! (`cjb2`, `c44`, `djvumake`, `djvudump`, `djvuextract`, `djvm`,
//! `djvmcvt`, `bzz`) plus `minidjvu` for shared dictionaries; this crate
//! owns the orchestration: chunk bookkeeping, temporary-file lifetimes,
//! and the binary directory structure the tools cannot produce themselves.
//!
//! ## Components
//!
//! - [`Multichunk`]: the per-page chunk store. Chunks are set
//!   incrementally, serialized on demand, and re-derived lazily from an
//!   existing container with one batched extractor launch.
//! - [`Deferred`]: a value produced by an asynchronous external
//!   computation; first access waits for the process, exactly once, and
//!   temporary inputs live until then.
//! - [`Subprocess`]/[`require`]: external tool launches with a sanitized
//!   environment and exit/signal classification.
//! - [`IndirectIndex`]/[`bundle_djvu`]: multi-page bundling, including the
//!   manually serialized indirect directory.
//! - [`validate_page_id`]: the strict grammar for page identifiers used
//!   as component file names and directory entries.
//!
//! ## Indirect directory format
//!
//! ```text
//! Indirect multi-page directory (all integers big-endian)
//! =======================================================
//!
//! Header (27 bytes):
//! - Magic: "AT&TFORM" (8 bytes)
//! - Length A: patched to bytes remaining after this field (4 bytes)
//! - "DJVM" (4 bytes)
//! - "DIRM" (4 bytes)
//! - Length B: patched to bytes remaining after this field (4 bytes)
//! - Version: 1 (1 byte)
//! - Page count: N (2 bytes)
//!
//! Body (BZZ-compressed):
//! - N x 3-byte page size (0 = unknown/overflow)
//! - N x 1-byte flag (1 = page, 0 = dictionary-only component)
//! - N x NUL-terminated page identifier
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use djvu_assembler::{ChunkKind, ChunkSource, Multichunk, bitonal_to_djvu, require};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! require(&["cjb2", "djvumake"])?;
//!
//! let mask = std::fs::read("page.pbm")?;
//! let sjbz_page = bitonal_to_djvu(&mask, 0)?;
//!
//! let mut page = Multichunk::new(2550, 3300, 300);
//! page.set(ChunkKind::Sjbz, ChunkSource::Deferred(sjbz_page));
//! let container = page.save()?;
//! std::fs::copy(container, "page.djvu")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! Per-page work is independent: distinct pages may run in parallel as
//! long as each owns its own store and temporary namespace. A single
//! [`Multichunk`] is not designed for concurrent access.

pub mod bundle;
pub mod chunks;
pub mod codec;
pub mod ipc;
pub mod multichunk;
pub mod page_id;
pub mod proxy;
pub mod temporary;

// Re-export main types
pub use bundle::{
    build_shared_dictionaries, bundle_djvu, bundle_via_indirect, BundleError, IndirectIndex,
    SharedDictOptions, SharedDictPage, SharedDictionaries,
};
pub use chunks::{ChunkKind, DJVU_EXT, IFF_EXT};
pub use codec::{bitonal_to_djvu, iw44_chunk, photo_to_djvu, Crcb, PhotoOptions};
pub use ipc::{require, IpcError, Subprocess};
pub use multichunk::{ChunkData, ChunkSource, Multichunk, StoreError};
pub use page_id::{validate_page_id, PageIdError};
pub use proxy::{CompletionGate, Deferred};
