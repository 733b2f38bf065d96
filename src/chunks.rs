// SPDX-License-Identifier: MIT
//! Chunk kinds of a single-page DjVu container
//!
//! The set is closed and versioned: these are the chunk tags `djvumake`
//! accepts and `djvudump` reports. Names are matched case-insensitively on
//! input and always emitted in their canonical mixed-case form.

/// File extension of a single-page container.
pub const DJVU_EXT: &str = ".djvu";

/// File extension of a shared-dictionary-only component.
pub const IFF_EXT: &str = ".iff";

/// Tag of the page-metadata record in a container directory listing.
pub const INFO_TAG: &str = "INFO";

/// Named binary chunk kinds in a page container
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChunkKind {
    /// Bitonal (JB2) foreground mask layer
    Sjbz,

    /// Alternate bitonal (MMR/G4) mask layer
    Smmr,

    /// Background photo layer, IW44 codec
    Bg44,

    /// Background photo layer, JPEG codec
    Bgjp,

    /// Background photo layer, JPEG-2000 codec
    Bg2k,

    /// Foreground color zones
    Fgbz,

    /// Foreground photo layer, IW44 codec
    Fg44,

    /// Foreground photo layer, JPEG codec
    Fgjp,

    /// Foreground photo layer, JPEG-2000 codec
    Fg2k,

    /// Reference to an externally-shared dictionary
    Incl,

    /// Shared JB2 dictionary itself
    Djbz,
}

impl ChunkKind {
    /// All chunk kinds.
    pub fn all() -> &'static [ChunkKind] {
        &[
            ChunkKind::Sjbz,
            ChunkKind::Smmr,
            ChunkKind::Bg44,
            ChunkKind::Bgjp,
            ChunkKind::Bg2k,
            ChunkKind::Fgbz,
            ChunkKind::Fg44,
            ChunkKind::Fgjp,
            ChunkKind::Fg2k,
            ChunkKind::Incl,
            ChunkKind::Djbz,
        ]
    }

    /// Canonical on-disk chunk tag.
    pub fn name(&self) -> &'static str {
        match self {
            ChunkKind::Sjbz => "Sjbz",
            ChunkKind::Smmr => "Smmr",
            ChunkKind::Bg44 => "BG44",
            ChunkKind::Bgjp => "BGjp",
            ChunkKind::Bg2k => "BG2k",
            ChunkKind::Fgbz => "FGbz",
            ChunkKind::Fg44 => "FG44",
            ChunkKind::Fgjp => "FGjp",
            ChunkKind::Fg2k => "FG2k",
            ChunkKind::Incl => "INCL",
            ChunkKind::Djbz => "Djbz",
        }
    }

    /// Parse a chunk tag, case-insensitively.
    pub fn from_name(name: &str) -> Option<ChunkKind> {
        ChunkKind::all()
            .iter()
            .copied()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    /// Position of this kind in the assembler's argument order.
    ///
    /// The assembler requires the dictionary reference before the bitonal
    /// layer, and the bitonal layer before everything else.
    pub fn assembly_order(&self) -> u8 {
        match self {
            ChunkKind::Incl => 0,
            ChunkKind::Sjbz | ChunkKind::Smmr => 1,
            _ => 2,
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_names_round_trip() {
        for &kind in ChunkKind::all() {
            assert_eq!(ChunkKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_from_name_case_insensitive() {
        assert_eq!(ChunkKind::from_name("sjbz"), Some(ChunkKind::Sjbz));
        assert_eq!(ChunkKind::from_name("BG44"), Some(ChunkKind::Bg44));
        assert_eq!(ChunkKind::from_name("bg44"), Some(ChunkKind::Bg44));
        assert_eq!(ChunkKind::from_name("incl"), Some(ChunkKind::Incl));
    }

    #[test]
    fn test_from_name_rejects_unknown() {
        assert_eq!(ChunkKind::from_name("INFO"), None);
        assert_eq!(ChunkKind::from_name("TXTz"), None);
        assert_eq!(ChunkKind::from_name(""), None);
    }

    #[test]
    fn test_assembly_order() {
        assert!(ChunkKind::Incl.assembly_order() < ChunkKind::Sjbz.assembly_order());
        assert!(ChunkKind::Sjbz.assembly_order() < ChunkKind::Bg44.assembly_order());
        assert_eq!(ChunkKind::Sjbz.assembly_order(), ChunkKind::Smmr.assembly_order());
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(ChunkKind::Bgjp.to_string(), "BGjp");
        assert_eq!(ChunkKind::Djbz.to_string(), "Djbz");
    }
}
