//! Module-scope variables.

use crate::types::{AddressSpace, Type};

/// A module-scope array variable (e.g. a work-group shared tile).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalVariable {
    pub name: String,
    pub space: AddressSpace,
    /// Element type of the array.
    pub elem: Type,
    /// Number of elements.
    pub count: u32,
    pub constant: bool,
}

impl GlobalVariable {
    /// Creates a mutable array global.
    pub fn new(name: impl Into<String>, space: AddressSpace, elem: Type, count: u32) -> Self {
        Self {
            name: name.into(),
            space,
            elem,
            count,
            constant: false,
        }
    }

    /// Returns `true` if the variable lives in work-group shared memory.
    pub fn is_shared(&self) -> bool {
        self.space == AddressSpace::Local
    }

    /// Total size in bytes.
    pub fn size_bytes(&self) -> u64 {
        u64::from(self.elem.size_bytes()) * u64::from(self.count)
    }
}
