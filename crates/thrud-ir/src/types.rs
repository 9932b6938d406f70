//! Value types and address spaces.

/// Memory address space of a pointer or global.
///
/// Numbering follows the OpenCL convention used by GPU compilers.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum AddressSpace {
    /// Per-thread private memory.
    Private,
    /// Device-wide global memory. The only cached space the reuse analysis models.
    Global,
    /// Read-only constant memory.
    Constant,
    /// Work-group shared (local) memory.
    Local,
}

impl AddressSpace {
    /// Numeric address-space id.
    pub fn id(self) -> u32 {
        match self {
            Self::Private => 0,
            Self::Global => 1,
            Self::Constant => 2,
            Self::Local => 3,
        }
    }

    /// Text-format keyword.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Global => "global",
            Self::Constant => "constant",
            Self::Local => "local",
        }
    }

    /// Parses a text-format keyword.
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "private" => Some(Self::Private),
            "global" => Some(Self::Global),
            "constant" => Some(Self::Constant),
            "local" => Some(Self::Local),
            _ => None,
        }
    }
}

/// The type of an SSA value.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Type {
    /// No value (stores, branches, void calls).
    Void,
    /// Integer of the given bit width (`i1` for booleans).
    Int(u16),
    /// Floating point of the given bit width.
    Float(u16),
    /// Pointer into an address space.
    Ptr(AddressSpace),
}

impl Type {
    pub const BOOL: Self = Self::Int(1);
    pub const I32: Self = Self::Int(32);
    pub const I64: Self = Self::Int(64);

    /// Returns `true` for pointer types.
    pub fn is_pointer(self) -> bool {
        matches!(self, Self::Ptr(_))
    }

    /// Address space of a pointer type.
    pub fn address_space(self) -> Option<AddressSpace> {
        match self {
            Self::Ptr(space) => Some(space),
            _ => None,
        }
    }

    /// Size in bytes of a value of this type (pointers are 8 bytes).
    pub fn size_bytes(self) -> u32 {
        match self {
            Self::Void => 0,
            Self::Int(bits) | Self::Float(bits) => u32::from(bits).div_ceil(8),
            Self::Ptr(_) => 8,
        }
    }
}
