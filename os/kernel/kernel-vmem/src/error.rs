use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Errors of translation-map operations on existing mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TmapError {
    /// No valid translation exists for the address.
    #[error("no translation for {va}")]
    NotMapped { va: VirtualAddress },

    /// The address must be page aligned.
    #[error("address {va} is not page aligned")]
    Unaligned { va: VirtualAddress },

    /// The requested protection grants no access; a leaf needs at least one
    /// of read, write or execute.
    #[error("protection grants no access")]
    NoAccess,

    /// The walk reached an entry this map does not handle, such as a
    /// superpage leaf above the last level.
    #[error("unsupported entry translating {va} at level {level}")]
    Unsupported { va: VirtualAddress, level: u8 },
}

/// Errors of [`TranslationMap::map`](crate::TranslationMap::map).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("mapping {va} to {pa}: addresses must be page aligned")]
    Unaligned { va: VirtualAddress, pa: PhysicalAddress },

    #[error("protection grants no access")]
    NoAccess,
}

impl From<MapError> for TmapError {
    fn from(value: MapError) -> Self {
        match value {
            MapError::Unaligned { va, .. } => Self::Unaligned { va },
            MapError::NoAccess => Self::NoAccess,
        }
    }
}
