use bitflags::bitflags;

bitflags! {
    /// Optional behaviours of the structuring engine
    pub struct StructureFlags: u32 {
        /// Let the reducer copy small nodes into every predecessor
        ///
        /// This makes more shapes recognisable (and so fewer methods fall back to the dispatch
        /// loop), at the cost of bigger code.
        const ALLOW_DUPLICATION = 0x0001;

        /// Keep references distinct from `i32` when comparing stacks
        const STRICT_REFERENCES = 0x0002;

        /// Re-verify the whole graph after every change (slow, for debugging)
        const VALIDATE_STEPS = 0x0004;

        /// Annotate generated code with comments explaining where it came from
        const COMMENTS = 0x0008;
    }
}

pub struct Settings {
    /// Optional behaviours
    pub flags: StructureFlags,

    /// Return nodes with fewer instructions than this get duplicated into their predecessors
    ///
    /// Comments don't count and bodies containing nested blocks are never duplicated.
    pub small_return_limit: usize,

    /// Fingerprints longer than this get truncated and suffixed with a hash
    pub max_fingerprint_len: usize,
}

impl Settings {
    pub fn new() -> Settings {
        Settings {
            flags: StructureFlags::empty(),
            small_return_limit: 3,
            max_fingerprint_len: 80,
        }
    }

    pub fn allow_duplication(&self) -> bool {
        self.flags.contains(StructureFlags::ALLOW_DUPLICATION)
    }

    pub fn strict_references(&self) -> bool {
        self.flags.contains(StructureFlags::STRICT_REFERENCES)
    }

    pub fn validate_steps(&self) -> bool {
        self.flags.contains(StructureFlags::VALIDATE_STEPS)
    }

    pub fn comments(&self) -> bool {
        self.flags.contains(StructureFlags::COMMENTS)
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}
