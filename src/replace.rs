//! Replacement: Belady's MIN applied offline.
//!
//! Reads the virtual bytecode alongside its annotations and rewrites every
//! instruction into physical-frame terms, inlining synchronous swap-out and
//! swap-in directives wherever the frame budget forces an eviction. Because
//! every page's next use is known exactly, the evicted page is always the
//! one whose next use lies farthest in the future.

use std::collections::HashMap;

use crate::{
    addr::{
        InstructionNumber,
        PageShift,
        PhysPageNumber,
        StoragePageNumber,
        VirtPageNumber,
        INVALID_INSTR,
    },
    annotate::AnnotationFileReader,
    deps::log::debug,
    error::Error,
    fmt::Hex,
    instr::{
        Instruction,
        MAX_INSTRUCTION_PAGES,
    },
    opcode::{
        OpCode,
        FLAG_OUTPUT_PAGE_FIRST_USE,
    },
    prioqueue::PriorityQueue,
    progfile::{
        PhysProgramWriter,
        ProgramFileHeader,
        VirtProgramReader,
    },
};


/// Heap key for resident pages: orders by next use, farthest first, so the
/// heap minimum is always the page MIN wants to evict.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    derive_more::From,
    derive_more::Into,
)]
pub struct BeladyScore(pub InstructionNumber);

impl PartialOrd for BeladyScore {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BeladyScore {
    fn cmp(
        &self,
        other: &Self,
    ) -> std::cmp::Ordering {
        other.0.cmp(&self.0)
    }
}


/// Both slots stay populated across a swap-out so the later swap-in knows
/// where the page went.
struct PageTableEntry {
    resident: bool,
    ppn:      PhysPageNumber,
    spn:      StoragePageNumber,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReplacementStats {
    pub num_swapouts:       u64,
    pub num_swapins:        u64,
    pub num_storage_frames: StoragePageNumber,
}


pub struct BeladyAllocator {
    phys_prog:           PhysProgramWriter,
    virt_prog:           VirtProgramReader,
    annotations:         AnnotationFileReader,
    page_shift:          PageShift,
    num_page_frames:     PhysPageNumber,
    free_page_frames:    Vec<PhysPageNumber>,
    free_storage_frames: Vec<StoragePageNumber>,
    next_storage_frame:  StoragePageNumber,
    page_table:          HashMap<VirtPageNumber, PageTableEntry>,
    next_use_heap:       PriorityQueue<BeladyScore, VirtPageNumber>,
    num_swapouts:        u64,
    num_swapins:         u64,
}

impl BeladyAllocator {
    pub fn new(
        output_file: &std::path::Path,
        virtual_program_file: &std::path::Path,
        annotations_file: &std::path::Path,
        num_page_frames: PhysPageNumber,
    ) -> Result<Self, Error> {
        let virt_prog = VirtProgramReader::open(virtual_program_file, true)?;
        let page_shift = virt_prog.header().page_shift;

        let mut free_page_frames: Vec<PhysPageNumber> = (0..num_page_frames).collect();
        free_page_frames.reverse();

        Ok(Self {
            phys_prog: PhysProgramWriter::create(output_file, page_shift, false)?,
            virt_prog,
            annotations: AnnotationFileReader::open(annotations_file)?,
            page_shift,
            num_page_frames,
            free_page_frames,
            free_storage_frames: Vec::new(),
            next_storage_frame: 0,
            page_table: HashMap::new(),
            next_use_heap: PriorityQueue::new(),
            num_swapouts: 0,
            num_swapins: 0,
        })
    }

    fn emit_swapout(
        &mut self,
        primary: PhysPageNumber,
    ) -> Result<StoragePageNumber, Error> {
        let secondary = match self.free_storage_frames.pop() {
            Some(frame) => frame,
            None => {
                let frame = self.next_storage_frame;
                self.next_storage_frame += 1;
                frame
            }
        };

        let mut swap = Instruction::default();
        swap.set_opcode(OpCode::IssueSwapOut);
        swap.output = primary;
        swap.storage = secondary;
        self.phys_prog.append(&swap)?;
        self.num_swapouts += 1;

        Ok(secondary)
    }

    fn emit_swapin(
        &mut self,
        secondary: StoragePageNumber,
        primary: PhysPageNumber,
    ) -> Result<(), Error> {
        let mut swap = Instruction::default();
        swap.set_opcode(OpCode::IssueSwapIn);
        swap.output = primary;
        swap.storage = secondary;
        self.phys_prog.append(&swap)?;
        self.num_swapins += 1;

        self.free_storage_frames.push(secondary);
        Ok(())
    }

    /// Runs the translation over the whole virtual bytecode.
    pub fn allocate(&mut self) -> Result<(), Error> {
        let num_instructions = self.virt_prog.header().num_instructions;
        let mut vpns = [0u64; MAX_INSTRUCTION_PAGES];
        let mut ppns = [0u64; MAX_INSTRUCTION_PAGES];
        let mut just_swapped_in = [false; MAX_INSTRUCTION_PAGES];

        for i in 0..num_instructions {
            let current = self.virt_prog.next_instruction()?;
            let annotation = self.annotations.next_annotation()?;

            let num_pages = current.store_page_numbers(self.page_shift, &mut vpns);
            debug_assert_eq!(num_pages, annotation.num_pages as usize);

            for j in 0..num_pages {
                let vpn = vpns[j];

                if self.page_table.get(&vpn).map(|pte| pte.resident).unwrap_or(false) {
                    just_swapped_in[j] = false;
                    ppns[j] = self.page_table[&vpn].ppn;
                    continue;
                }

                just_swapped_in[j] = true;
                let ppn = match self.free_page_frames.pop() {
                    Some(frame) => frame,
                    None => {
                        // Evict the resident page whose next use is farthest.
                        // That page cannot be one of this instruction's own
                        // pages: those all have this instruction as their
                        // key, while everything else in the heap keys on
                        // some later instruction.
                        let (score, evict_vpn) =
                            self.next_use_heap.remove_min().ok_or(Error::PagingInfeasible {
                                instruction: i,
                                num_frames:  self.num_page_frames,
                            })?;
                        let frame = {
                            let evicted = self
                                .page_table
                                .get(&evict_vpn)
                                .expect("evicted page has a page-table entry");
                            debug_assert!(evicted.resident);
                            evicted.ppn
                        };
                        if score.0 == INVALID_INSTR {
                            // Its next use is "never": the page dies here.
                            self.page_table.remove(&evict_vpn);
                        } else {
                            let spn = self.emit_swapout(frame)?;
                            let evicted = self
                                .page_table
                                .get_mut(&evict_vpn)
                                .expect("evicted page still has an entry");
                            evicted.resident = false;
                            evicted.spn = spn;
                        }
                        frame
                    }
                };

                if self.page_table.contains_key(&vpn) {
                    let spn = {
                        let pte = self.page_table.get_mut(&vpn).expect("entry was just checked");
                        debug_assert!(!pte.resident);
                        pte.resident = true;
                        pte.ppn = ppn;
                        pte.spn
                    };
                    self.emit_swapin(spn, ppn)?;
                } else {
                    // First touch of this page: the output page of an
                    // instruction flagged as a first use, so there is
                    // nothing to fetch.
                    debug_assert!(
                        j == 0 && (current.flags & FLAG_OUTPUT_PAGE_FIRST_USE) != 0,
                        "page {:?} appears without a first-use flag",
                        Hex(&vpn)
                    );
                    self.page_table.insert(
                        vpn,
                        PageTableEntry {
                            resident: true,
                            ppn,
                            spn: 0,
                        },
                    );
                }
                ppns[j] = ppn;
            }

            for j in 0..num_pages {
                let next_use: BeladyScore = annotation.next_use[j].into();
                if just_swapped_in[j] {
                    self.next_use_heap.insert(next_use, vpns[j]);
                } else {
                    self.next_use_heap.decrease_key(next_use, vpns[j]);
                }
            }

            let phys = current.restore_page_numbers(self.page_shift, &ppns[..num_pages.max(1)]);
            self.phys_prog.append(&phys)?;
        }

        Ok(())
    }

    pub fn num_swapouts(&self) -> u64 {
        self.num_swapouts
    }

    pub fn num_swapins(&self) -> u64 {
        self.num_swapins
    }

    pub fn num_storage_frames(&self) -> StoragePageNumber {
        self.next_storage_frame
    }

    /// Closes the physical bytecode, recording the frame budget and storage
    /// footprint in its header.
    pub fn finish(mut self) -> Result<(ProgramFileHeader, ReplacementStats), Error> {
        let stats = ReplacementStats {
            num_swapouts:       self.num_swapouts,
            num_swapins:        self.num_swapins,
            num_storage_frames: self.next_storage_frame,
        };
        debug!(
            "replacement finished: {} swapouts, {} swapins, {} storage frames",
            stats.num_swapouts, stats.num_swapins, stats.num_storage_frames
        );

        self.phys_prog.set_page_count(self.num_page_frames);
        self.phys_prog.set_swap_page_count(self.next_storage_frame);
        self.phys_prog.set_page_shift(self.page_shift);
        let header = self.phys_prog.finish()?;
        Ok((header, stats))
    }
}


#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        addr::pg_addr,
        annotate::annotate_program,
        instr::{
            PhysSpace,
            VirtSpace,
        },
        progfile::{
            PhysProgramReader,
            VirtProgramWriter,
        },
    };

    fn scratch(tag: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("golem-replace-{}-{}", tag, std::process::id()));
        path
    }

    const SHIFT: PageShift = 4;

    fn touch_first(
        writer: &mut VirtProgramWriter,
        page: u64,
    ) {
        let mut instr = Instruction::default();
        instr.set_opcode(OpCode::Input);
        instr.width = 16;
        instr.flags = FLAG_OUTPUT_PAGE_FIRST_USE;
        instr.output = pg_addr(page, SHIFT);
        writer.append(&instr).unwrap();
    }

    fn touch_again(
        writer: &mut VirtProgramWriter,
        page: u64,
    ) {
        let mut instr = Instruction::default();
        instr.set_opcode(OpCode::Output);
        instr.width = 16;
        instr.output = pg_addr(page, SHIFT);
        writer.append(&instr).unwrap();
    }

    // Builds the classic reference stream [A B C D A E D C B A] (pages
    // 0..=4, first touches create the page) and plans it with three frames.
    fn plan_reference_stream(tag: &str) -> (std::path::PathBuf, ReplacementStats, Vec<std::path::PathBuf>) {
        let prog = scratch(&format!("{}-prog", tag));
        let ann = scratch(&format!("{}-ann", tag));
        let rev = scratch(&format!("{}-revann", tag));
        let rep = scratch(&format!("{}-repprog", tag));

        let mut writer = VirtProgramWriter::create(&prog, SHIFT, true).unwrap();
        for page in 0..4u64 {
            touch_first(&mut writer, page); // A B C D
        }
        touch_again(&mut writer, 0); // A
        touch_first(&mut writer, 4); // E
        touch_again(&mut writer, 3); // D
        touch_again(&mut writer, 2); // C
        touch_again(&mut writer, 1); // B
        touch_again(&mut writer, 0); // A
        writer.set_page_count(5);
        writer.finish().unwrap();

        annotate_program(&ann, &rev, &prog, SHIFT).unwrap();

        let mut allocator = BeladyAllocator::new(&rep, &prog, &ann, 3).unwrap();
        allocator.allocate().unwrap();
        let (_, stats) = allocator.finish().unwrap();

        (rep.clone(), stats, vec![prog, ann, rep])
    }

    #[test]
    fn min_reaches_the_lower_bound() {
        let (rep, stats, files) = plan_reference_stream("bound");

        // Two frames must be vacated before page E exists, and every page
        // other than E is touched again afterwards, so two resurrections is
        // the MIN lower bound.
        assert_eq!(stats.num_swapouts, 2);
        assert_eq!(stats.num_swapins, 2);
        assert_eq!(stats.num_storage_frames, 2);

        let mut reader = PhysProgramReader::open(&rep, false).unwrap();
        let header = *reader.header();
        assert_eq!(header.num_pages, 3);
        assert_eq!(header.num_swap_pages, 2);

        // B (frame 1) is evicted when D arrives: its next use is farthest.
        let mut swapouts = Vec::new();
        let mut swapins = Vec::new();
        for _ in 0..header.num_instructions {
            let instr = reader.next_instruction().unwrap();
            match instr.opcode() {
                OpCode::IssueSwapOut => swapouts.push((instr.output, instr.storage)),
                OpCode::IssueSwapIn => swapins.push((instr.storage, instr.output)),
                _ => {}
            }
        }
        assert_eq!(swapouts[0].0, 1, "the first eviction must be B's frame");
        // The resurrections read back, in order, what B and A wrote out.
        assert_eq!(swapins[0].0, swapouts[0].1);
        assert_eq!(swapins[1].0, swapouts[1].1);

        for file in files {
            std::fs::remove_file(file).unwrap();
        }
    }

    // Forward simulation of the emitted physical bytecode: honoring every
    // swap directive, no instruction may ever reference a frame that does
    // not hold the page the virtual instruction expects.
    #[test]
    fn emitted_bytecode_is_feasible() {
        let (rep, _, files) = plan_reference_stream("feasible");
        let prog = &files[0];

        let mut virt = crate::progfile::VirtProgramReader::open(prog, true).unwrap();
        let mut phys = PhysProgramReader::open(&rep, false).unwrap();
        let num_phys = phys.header().num_instructions;

        let mut frame_holds: HashMap<PhysPageNumber, VirtPageNumber> = HashMap::new();
        let mut storage_holds: HashMap<StoragePageNumber, VirtPageNumber> = HashMap::new();
        let mut vpns = [0u64; MAX_INSTRUCTION_PAGES];
        let mut ppns = [0u64; MAX_INSTRUCTION_PAGES];

        for _ in 0..num_phys {
            let instr = phys.next_instruction().unwrap();
            match instr.opcode() {
                OpCode::IssueSwapOut => {
                    let vpn = frame_holds[&instr.output];
                    storage_holds.insert(instr.storage, vpn);
                }
                OpCode::IssueSwapIn => {
                    let vpn = storage_holds.remove(&instr.storage).expect("swap-in of a stored page");
                    frame_holds.insert(instr.output, vpn);
                }
                _ => {
                    let original = virt.next_instruction().unwrap();
                    let n = original.store_page_numbers(SHIFT, &mut vpns);
                    let n_phys = instr.store_page_numbers(SHIFT, &mut ppns);
                    assert_eq!(n, n_phys);
                    for j in 0..n {
                        if j == 0 && original.flags & FLAG_OUTPUT_PAGE_FIRST_USE != 0 {
                            frame_holds.insert(ppns[0], vpns[0]);
                        } else {
                            assert_eq!(
                                frame_holds.get(&ppns[j]),
                                Some(&vpns[j]),
                                "frame {} does not hold page {}",
                                ppns[j],
                                vpns[j]
                            );
                        }
                    }
                }
            }
        }

        for file in files {
            std::fs::remove_file(file).unwrap();
        }
    }

    #[test]
    fn infeasible_budget_is_fatal() {
        let prog = scratch("tight-prog");
        let ann = scratch("tight-ann");
        let rev = scratch("tight-revann");
        let rep = scratch("tight-repprog");

        // A three-address instruction needs three simultaneous frames.
        let mut writer = VirtProgramWriter::create(&prog, SHIFT, true).unwrap();
        touch_first(&mut writer, 0);
        touch_first(&mut writer, 1);
        let mut instr = Instruction::default();
        instr.set_opcode(OpCode::BitAnd);
        instr.width = 16;
        instr.flags = FLAG_OUTPUT_PAGE_FIRST_USE;
        instr.output = pg_addr(2, SHIFT);
        instr.input1 = pg_addr(0, SHIFT);
        instr.input2 = pg_addr(1, SHIFT);
        writer.append(&instr).unwrap();
        writer.set_page_count(3);
        writer.finish().unwrap();

        annotate_program(&ann, &rev, &prog, SHIFT).unwrap();

        let mut allocator = BeladyAllocator::new(&rep, &prog, &ann, 2).unwrap();
        let err = allocator.allocate().unwrap_err();
        match err {
            Error::PagingInfeasible { num_frames, .. } => assert_eq!(num_frames, 2),
            other => panic!("unexpected error: {:?}", other),
        }

        for file in [prog, ann, rep].iter() {
            let _ = std::fs::remove_file(file);
        }
    }
}
