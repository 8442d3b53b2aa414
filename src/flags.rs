// This module encapsulates the bitflags API
// so that we don't leak details that may
// affect semver later on.

use bitflags::bitflags;

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
    struct NodeBitFlags: u32 {
        const EMPTY = 0;
        const IS_SAMPLE = 1 << 1;
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
    struct SimplifyBitFlags: u32 {
        const EMPTY = 0;
        const FILTER_SITES = 1 << 1;
    }
}

/// Per-node attributes stored in the node table.
#[repr(transparent)]
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct NodeFlags(NodeBitFlags);

impl NodeFlags {
    pub fn sample() -> Self {
        Self(NodeBitFlags::IS_SAMPLE)
    }

    pub fn is_sample(&self) -> bool {
        self.0.contains(NodeBitFlags::IS_SAMPLE)
    }

    pub fn with_sample(self) -> Self {
        Self(self.0 | NodeBitFlags::IS_SAMPLE)
    }

    pub fn without_sample(self) -> Self {
        Self(self.0 & !NodeBitFlags::IS_SAMPLE)
    }
}

#[repr(transparent)]
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct SimplifyOptions(SimplifyBitFlags);

impl SimplifyOptions {
    /// Drop output sites that end up carrying no mutations.
    pub fn with_filter_sites(self) -> Self {
        Self(self.0 | SimplifyBitFlags::FILTER_SITES)
    }

    pub fn filter_sites(&self) -> bool {
        self.0.contains(SimplifyBitFlags::FILTER_SITES)
    }
}

#[cfg(test)]
mod test_flags {
    use super::NodeFlags;
    use super::SimplifyOptions;

    #[test]
    fn test_sample_flag() {
        let flags = NodeFlags::default();
        assert!(!flags.is_sample());
        assert!(flags.with_sample().is_sample());
        assert!(!flags.with_sample().without_sample().is_sample());
        assert_eq!(NodeFlags::default().with_sample(), NodeFlags::sample());
    }

    #[test]
    fn test_filter_sites() {
        let options = SimplifyOptions::default();
        assert!(!options.filter_sites());
        assert!(options.with_filter_sites().filter_sites());
    }
}
