/// Page shift value (12 bits) for 4KB pages
pub const PAGE_SHIFT: usize = 12;
/// Standard page size (4096 bytes), used as the fallback step of a region walk
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
