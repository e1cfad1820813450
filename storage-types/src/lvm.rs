//! LVM sizing defaults
//!
//! Defaults used when physical volumes and volume groups are described
//! without explicit extent geometry.

use crate::Size;

/// Default physical extent size for new volume groups
pub const LVM_PE_SIZE: Size = Size::mib(4);

/// Default offset of the first physical extent on a new physical volume
pub const LVM_PE_START: Size = Size::mib(1);

/// Number of whole extents of `pe_size` that fit in `size`
pub fn extent_count(size: Size, pe_size: Size) -> u64 {
    if pe_size.bytes() == 0 {
        0
    } else {
        size.bytes() / pe_size.bytes()
    }
}
