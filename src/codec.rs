// SPDX-License-Identifier: MIT
//! Wrappers for the external layer encoders
//!
//! The byte-level codecs are not reimplemented here; each function stages
//! its input in a temporary file, launches the corresponding DjVuLibre
//! encoder, and returns a [`Deferred`] output path whose first access
//! waits for the encoder. Temporary inputs stay alive until then.

use tempfile::TempPath;

use crate::ipc::{IpcError, Subprocess};
use crate::proxy::Deferred;
use crate::temporary;

pub const DPI_MIN: u32 = 72;
pub const DPI_DEFAULT: u32 = 300;
pub const DPI_MAX: u32 = 6000;

pub const LOSS_LEVEL_MIN: u32 = 0;
pub const LOSS_LEVEL_DEFAULT: u32 = 100;
pub const LOSS_LEVEL_MAX: u32 = 200;

pub const SUBSAMPLE_MIN: u32 = 1;
pub const SUBSAMPLE_DEFAULT: u32 = 3;
pub const SUBSAMPLE_MAX: u32 = 12;

/// Default IW44 slice schedule for the photo encoder.
pub const IW44_SLICES_DEFAULT: [u32; 3] = [74, 89, 99];

/// Chrominance encoding mode of the photo encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crcb {
    Full,
    Normal,
    Half,
    None,
}

impl Crcb {
    fn as_flag(self) -> &'static str {
        match self {
            Crcb::Full => "-crcbfull",
            Crcb::Normal => "-crcbnormal",
            Crcb::Half => "-crcbhalf",
            Crcb::None => "-crcbnone",
        }
    }
}

/// Tuning knobs of the photo encoder
#[derive(Debug, Clone)]
pub struct PhotoOptions {
    pub dpi: u32,
    pub slices: Vec<u32>,
    pub gamma: f64,
    pub crcb: Crcb,
}

impl Default for PhotoOptions {
    fn default() -> Self {
        Self {
            dpi: 100,
            slices: IW44_SLICES_DEFAULT.to_vec(),
            gamma: 2.2,
            crcb: Crcb::Normal,
        }
    }
}

fn stage(bytes: &[u8], suffix: &str) -> Result<TempPath, IpcError> {
    let staged = temporary::path(suffix)?;
    std::fs::write(&staged, bytes)?;
    Ok(staged)
}

/// Encode a bi-level PBM image into a single-page bitonal container.
///
/// `loss_level` 0 is lossless; higher values let the JB2 encoder
/// substitute similar shapes.
pub fn bitonal_to_djvu(pbm: &[u8], loss_level: u32) -> Result<Deferred<TempPath>, IpcError> {
    let pbm_file = stage(pbm, ".pbm")?;
    let djvu_file = temporary::path(".djvu")?;
    let argv = [
        "cjb2".to_string(),
        "-losslevel".to_string(),
        loss_level.to_string(),
        pbm_file.display().to_string(),
        djvu_file.display().to_string(),
    ];
    let process = Subprocess::new(&argv)?;
    Ok(Deferred::new(djvu_file, process, vec![pbm_file]))
}

/// Encode a PPM image into a single-page photo (IW44) container,
/// optionally masked by a bi-level PBM foreground mask.
pub fn photo_to_djvu(
    ppm: &[u8],
    mask_pbm: Option<&[u8]>,
    options: &PhotoOptions,
) -> Result<Deferred<TempPath>, IpcError> {
    let ppm_file = stage(ppm, ".ppm")?;
    let djvu_file = temporary::path(".djvu")?;
    let slices = options
        .slices
        .iter()
        .map(|slice| slice.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let mut argv = vec![
        "c44".to_string(),
        "-dpi".to_string(),
        options.dpi.to_string(),
        "-slice".to_string(),
        slices,
        "-gamma".to_string(),
        format!("{:.1}", options.gamma),
        options.crcb.as_flag().to_string(),
    ];
    let mut temporaries = vec![ppm_file];
    if let Some(mask) = mask_pbm {
        let pbm_file = stage(mask, ".pbm")?;
        argv.push("-mask".to_string());
        argv.push(pbm_file.display().to_string());
        temporaries.push(pbm_file);
    }
    argv.push(temporaries[0].display().to_string());
    argv.push(djvu_file.display().to_string());
    let process = Subprocess::new(&argv)?;
    Ok(Deferred::new(djvu_file, process, temporaries))
}

/// Extract the raw IW44 chunk stream out of a photo container.
///
/// Takes ownership of the container file; it stays alive until the
/// extractor has finished.
pub fn iw44_chunk(djvu_file: TempPath) -> Result<Deferred<TempPath>, IpcError> {
    let iw44_file = temporary::path(".iw44")?;
    let argv = [
        "djvuextract".to_string(),
        djvu_file.display().to_string(),
        format!("BG44={}", iw44_file.display()),
    ];
    let process = Subprocess::new(&argv)?;
    Ok(Deferred::new(iw44_file, process, vec![djvu_file]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::require;

    // A 4x4 all-white bi-level image.
    const TINY_PBM: &[u8] = b"P4\n4 4\n\x00\x00\x00\x00";

    // A 4x4 gray photo image.
    fn tiny_ppm() -> Vec<u8> {
        let mut pixels = b"P6\n4 4\n255\n".to_vec();
        pixels.extend([0x80u8; 48]);
        pixels
    }

    #[test]
    fn test_photo_options_defaults() {
        let options = PhotoOptions::default();
        assert_eq!(options.dpi, 100);
        assert_eq!(options.slices, IW44_SLICES_DEFAULT);
        assert_eq!(options.crcb, Crcb::Normal);
    }

    #[test]
    fn test_crcb_flags() {
        assert_eq!(Crcb::Full.as_flag(), "-crcbfull");
        assert_eq!(Crcb::None.as_flag(), "-crcbnone");
    }

    #[test]
    fn test_bitonal_to_djvu() {
        if require(&["cjb2"]).is_err() {
            eprintln!("cjb2 not installed; skipping");
            return;
        }
        let mut encoded = bitonal_to_djvu(TINY_PBM, 0).unwrap();
        let path = encoded.get().unwrap();
        let bytes = std::fs::read(path).unwrap();
        assert!(bytes.starts_with(b"AT&TFORM"));
    }

    #[test]
    fn test_photo_to_djvu() {
        if require(&["c44"]).is_err() {
            eprintln!("c44 not installed; skipping");
            return;
        }
        let mut encoded = photo_to_djvu(&tiny_ppm(), None, &PhotoOptions::default()).unwrap();
        let path = encoded.get().unwrap();
        let bytes = std::fs::read(path).unwrap();
        assert!(bytes.starts_with(b"AT&TFORM"));
    }

    #[test]
    fn test_iw44_chunk() {
        if require(&["c44", "djvuextract"]).is_err() {
            eprintln!("DjVuLibre not installed; skipping");
            return;
        }
        let photo = photo_to_djvu(&tiny_ppm(), None, &PhotoOptions::default()).unwrap();
        let mut iw44 = iw44_chunk(photo.into_inner().unwrap()).unwrap();
        let path = iw44.get().unwrap();
        assert!(std::fs::metadata(path).unwrap().len() > 0);
    }
}
