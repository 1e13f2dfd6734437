bitflags::bitflags! {
    /// How a subresource is accessed by a pass, or the state it is left in.
    ///
    /// The empty set is the unknown state: the graph has no knowledge of previous contents.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct Access: u32 {
        const CPU_READ = 1 << 0;
        const PRESENT = 1 << 1;
        const INDIRECT_ARGS = 1 << 2;
        const VERTEX_OR_INDEX_BUFFER = 1 << 3;
        const SRV_COMPUTE = 1 << 4;
        const SRV_GRAPHICS = 1 << 5;
        const COPY_SRC = 1 << 6;
        const RESOLVE_SRC = 1 << 7;
        const DSV_READ = 1 << 8;

        const UAV_COMPUTE = 1 << 9;
        const UAV_GRAPHICS = 1 << 10;
        const RTV = 1 << 11;
        const COPY_DEST = 1 << 12;
        const RESOLVE_DST = 1 << 13;
        const DSV_WRITE = 1 << 14;

        /// Contents are undefined, used when transient memory is acquired or released.
        const DISCARD = 1 << 15;

        const SRV_MASK = Self::SRV_COMPUTE.bits() | Self::SRV_GRAPHICS.bits();
        const UAV_MASK = Self::UAV_COMPUTE.bits() | Self::UAV_GRAPHICS.bits();

        /// Reads which can not be combined with any write.
        const READ_ONLY_EXCLUSIVE = Self::CPU_READ.bits()
            | Self::PRESENT.bits()
            | Self::INDIRECT_ARGS.bits()
            | Self::VERTEX_OR_INDEX_BUFFER.bits()
            | Self::SRV_MASK.bits()
            | Self::COPY_SRC.bits()
            | Self::RESOLVE_SRC.bits();

        const READ_ONLY = Self::READ_ONLY_EXCLUSIVE.bits() | Self::DSV_READ.bits();

        const WRITABLE = Self::UAV_MASK.bits()
            | Self::RTV.bits()
            | Self::COPY_DEST.bits()
            | Self::RESOLVE_DST.bits()
            | Self::DSV_WRITE.bits();
    }
}

impl Access {
    pub const UNKNOWN: Access = Access::empty();

    #[inline]
    pub fn is_writable(self) -> bool {
        self.intersects(Self::WRITABLE)
    }
    /// A known state with no write in it.
    #[inline]
    pub fn is_read_only(self) -> bool {
        !self.is_empty() && Self::READ_ONLY.contains(self)
    }
    #[inline]
    pub fn is_uav(self) -> bool {
        self.intersects(Self::UAV_MASK)
    }
    /// Exclusive reads and writes can't be held at the same time.
    pub fn is_valid(self) -> bool {
        !(self.intersects(Self::READ_ONLY_EXCLUSIVE) && self.is_writable())
    }
    /// Whether a single pass may access the same subresource both ways.
    pub fn conflicts_with(self, other: Access) -> bool {
        !(self | other).is_valid()
    }
    /// Accumulates two accesses of one pass, a write subsumes the exclusive reads.
    pub fn merge_valid(self, other: Access) -> Access {
        let union = self | other;
        if union.is_writable() {
            union.difference(Self::READ_ONLY_EXCLUSIVE)
        } else {
            union
        }
    }
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        self.iter_names().map(|(name, _)| name)
    }
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "UNKNOWN");
        }
        let mut first = true;
        for name in self.names() {
            if !first {
                write!(f, " | ")?;
            }
            write!(f, "{name}")?;
            first = false;
        }
        Ok(())
    }
}
