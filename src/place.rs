//! Placement: the memory allocator for the virtual operand address space.
//!
//! The binned placer keeps, for every distinct allocation width, a heap of
//! partially-filled pages keyed by their free-slot count. Allocations go to
//! the page with the fewest free slots, which concentrates live operands on
//! few pages and keeps the working set small.

use std::collections::HashMap;

use crate::{
    addr::{
        pg_addr,
        pg_next,
        pg_num,
        pg_offset,
        pg_size,
        PageShift,
        VirtAddr,
        VirtPageNumber,
    },
    error::Error,
    prioqueue::PriorityQueue,
};

pub type AllocationSize = u64;


/// The logical type of an operand to place. The protocol plugin maps a
/// (width-or-level, type) pair to its footprint in the virtual space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum OperandType {
    Ciphertext = 0,
    Plaintext = 1,
    DenormalizedCiphertext = 2,
}

impl OperandType {
    pub fn name(self) -> &'static str {
        match self {
            OperandType::Ciphertext => "Ciphertext",
            OperandType::Plaintext => "Plaintext",
            OperandType::DenormalizedCiphertext => "DenormalizedCiphertext",
        }
    }
}


pub trait Placer {
    /// Places an operand of `width` address units, returning its address and
    /// whether it landed on a page with no other live placements.
    fn allocate(
        &mut self,
        width: AllocationSize,
    ) -> Result<(VirtAddr, bool), Error>;

    /// Releases a placement so the space can be handed out again.
    fn deallocate(
        &mut self,
        addr: VirtAddr,
        width: AllocationSize,
    );

    /// Number of pages of the virtual space used so far.
    fn num_pages(&self) -> VirtPageNumber;
}


/// Bump allocator baseline: never reclaims space, never splits an operand
/// across a page boundary.
pub struct SimplePlacer {
    next_free_address: VirtAddr,
    page_shift:        PageShift,
}

impl SimplePlacer {
    pub fn new(page_shift: PageShift) -> Self {
        Self {
            next_free_address: 0,
            page_shift,
        }
    }
}

impl Placer for SimplePlacer {
    fn allocate(
        &mut self,
        width: AllocationSize,
    ) -> Result<(VirtAddr, bool), Error> {
        debug_assert!(width != 0);
        if width > pg_size(self.page_shift) {
            return Err(oversized(width));
        }

        let addr = if pg_num(self.next_free_address, self.page_shift)
            == pg_num(self.next_free_address + width - 1, self.page_shift)
        {
            self.next_free_address
        } else {
            pg_next(self.next_free_address, self.page_shift)
        };
        self.next_free_address = addr + width;
        let fresh_page = pg_offset(addr, self.page_shift) == 0;
        Ok((addr, fresh_page))
    }

    fn deallocate(
        &mut self,
        _addr: VirtAddr,
        _width: AllocationSize,
    ) {
        // Free space is never reclaimed.
    }

    fn num_pages(&self) -> VirtPageNumber {
        let mut num_pages = pg_num(self.next_free_address, self.page_shift);
        if pg_offset(self.next_free_address, self.page_shift) != 0 {
            num_pages += 1;
        }
        num_pages
    }
}


struct PageInfo {
    reusable_slots:   Vec<VirtAddr>,
    next_free_offset: u64,
}

struct SizeClass {
    unfilled_pages:        PriorityQueue<u64, VirtPageNumber>,
    page_info:             HashMap<VirtPageNumber, PageInfo>,
    fresh_page_free_slots: u64,
}

impl SizeClass {
    fn new(
        page_shift: PageShift,
        width: AllocationSize,
    ) -> Self {
        Self {
            unfilled_pages:        PriorityQueue::new(),
            page_info:             HashMap::new(),
            fresh_page_free_slots: pg_size(page_shift) / width,
        }
    }
}


/// The placement policy used by the default planning pipeline: equal-width
/// binning with partial-page priority.
pub struct BinnedPlacer {
    classes:    HashMap<AllocationSize, SizeClass>,
    next_page:  VirtPageNumber,
    page_shift: PageShift,
}

impl BinnedPlacer {
    pub fn new(page_shift: PageShift) -> Self {
        Self {
            classes: HashMap::new(),
            next_page: 0,
            page_shift,
        }
    }
}

fn oversized(width: AllocationSize) -> Error {
    Error::PlacementRefused {
        protocol: "placer",
        width,
        operand:  "allocation wider than one page",
    }
}

impl Placer for BinnedPlacer {
    fn allocate(
        &mut self,
        width: AllocationSize,
    ) -> Result<(VirtAddr, bool), Error> {
        debug_assert!(width != 0);
        if width > pg_size(self.page_shift) {
            return Err(oversized(width));
        }

        let page_shift = self.page_shift;
        let class = self
            .classes
            .entry(width)
            .or_insert_with(|| SizeClass::new(page_shift, width));

        if class.unfilled_pages.is_empty() {
            let page = self.next_page;
            self.next_page += 1;

            let info = PageInfo {
                reusable_slots:   Vec::new(),
                next_free_offset: width,
            };
            let num_free_slots = class.fresh_page_free_slots - 1;
            class.page_info.insert(page, info);
            if num_free_slots > 0 {
                class.unfilled_pages.insert(num_free_slots, page);
            }

            Ok((pg_addr(page, page_shift), true))
        } else {
            // Fill the page that is closest to full.
            let &(num_free_slots, page) = class.unfilled_pages.min().expect("heap is non-empty");
            let info = class.page_info.get_mut(&page).expect("page has an info entry");

            let result = match info.reusable_slots.pop() {
                Some(slot) => slot,
                None => {
                    let addr = pg_addr(page, page_shift) + info.next_free_offset;
                    info.next_free_offset += width;
                    debug_assert!(info.next_free_offset <= pg_size(page_shift));
                    addr
                }
            };

            if num_free_slots == 1 {
                class.unfilled_pages.remove_min();
            } else {
                class.unfilled_pages.decrease_key(num_free_slots - 1, page);
            }

            Ok((result, false))
        }
    }

    fn deallocate(
        &mut self,
        addr: VirtAddr,
        width: AllocationSize,
    ) {
        let page_shift = self.page_shift;
        let class = self
            .classes
            .entry(width)
            .or_insert_with(|| SizeClass::new(page_shift, width));
        let page = pg_num(addr, page_shift);

        if !class.unfilled_pages.contains(&page) {
            // The page was completely full. A page entry is dropped only
            // once the page is empty and at least one other partial page of
            // this width remains in the heap.
            let num_free_slots = 1;
            if num_free_slots == class.fresh_page_free_slots && class.unfilled_pages.len() > 0 {
                class.page_info.remove(&page);
            } else {
                class.unfilled_pages.insert(num_free_slots, page);
                class
                    .page_info
                    .get_mut(&page)
                    .expect("freed address belongs to a placed page")
                    .reusable_slots
                    .push(addr);
            }
            return;
        }

        let num_free_slots = class.unfilled_pages.get_key(&page).expect("page is in the heap") + 1;
        if num_free_slots == class.fresh_page_free_slots && class.unfilled_pages.len() > 1 {
            class.unfilled_pages.erase(&page);
            class.page_info.remove(&page);
        } else {
            class.unfilled_pages.increase_key(num_free_slots, page);
            class
                .page_info
                .get_mut(&page)
                .expect("freed address belongs to a placed page")
                .reusable_slots
                .push(addr);
        }
    }

    fn num_pages(&self) -> VirtPageNumber {
        self.next_page
    }
}
