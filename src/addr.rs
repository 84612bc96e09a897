//! ```text
//! golem address spaces
//! --------------------
//!
//! Three disjoint flat address spaces, each page-structured with a
//! configurable page shift:
//!
//!  * virtual  (56 bits) - logical operand addresses handed out by the
//!    placement stage while the DSL executes. Nothing at this level is a
//!    machine address; one address unit is one protocol wire.
//!  * physical (40 bits) - page-frame addresses of the memory that is
//!    resident while the engine runs.
//!  * storage  (48 bits) - page-frame addresses on the swap device.
//!
//! The all-ones value of each width is reserved as the invalid sentinel.
//! ```

pub type VirtAddr = u64;
pub type PhysAddr = u64;
pub type StorageAddr = u64;

pub type VirtPageNumber = u64;
pub type PhysPageNumber = u64;
pub type StoragePageNumber = u64;

pub type InstructionNumber = u64;

pub type PageShift = u8;
pub type PageSize = u64;

pub type WorkerId = u32;
pub type PartyId = u32;

pub const VIRTUAL_ADDRESS_BITS: u32 = 56;
pub const PHYSICAL_ADDRESS_BITS: u32 = 40;
pub const STORAGE_ADDRESS_BITS: u32 = 48;
pub const INSTRUCTION_NUMBER_BITS: u32 = 48;

pub const INVALID_VADDR: VirtAddr = (1u64 << VIRTUAL_ADDRESS_BITS) - 1;
pub const INVALID_PADDR: PhysAddr = (1u64 << PHYSICAL_ADDRESS_BITS) - 1;
pub const INVALID_SADDR: StorageAddr = (1u64 << STORAGE_ADDRESS_BITS) - 1;
pub const INVALID_INSTR: InstructionNumber = (1u64 << INSTRUCTION_NUMBER_BITS) - 1;

/// Party index used, by convention, for the evaluator in garbled-circuit
/// style protocols.
pub const EVALUATOR_PARTY_ID: PartyId = 0;
pub const GARBLER_PARTY_ID: PartyId = 1;


pub const fn pg_size(shift: PageShift) -> PageSize {
    1u64 << shift
}

pub const fn pg_mask(shift: PageShift) -> PageSize {
    pg_size(shift) - 1
}

pub const fn pg_addr(
    page_number: u64,
    shift: PageShift,
) -> u64 {
    page_number << shift
}

pub const fn pg_num(
    addr: u64,
    shift: PageShift,
) -> u64 {
    addr >> shift
}

pub const fn pg_offset(
    addr: u64,
    shift: PageShift,
) -> u64 {
    addr & pg_mask(shift)
}

pub const fn pg_next(
    addr: u64,
    shift: PageShift,
) -> u64 {
    (pg_num(addr, shift) + 1) << shift
}

pub const fn pg_base(
    addr: u64,
    shift: PageShift,
) -> u64 {
    pg_num(addr, shift) << shift
}

pub const fn pg_round_up(
    addr: u64,
    shift: PageShift,
) -> u64 {
    pg_next(addr.wrapping_sub(1), shift)
}

pub const fn pg_round_down(
    addr: u64,
    shift: PageShift,
) -> u64 {
    pg_base(addr, shift)
}

/// Replaces the page number of `addr` with `num`, preserving the offset.
pub const fn pg_set_num(
    addr: u64,
    num: u64,
    shift: PageShift,
) -> u64 {
    (num << shift) | pg_offset(addr, shift)
}
