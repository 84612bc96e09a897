//! Scheduling: turning synchronous swaps into overlapped issue/finish pairs.
//!
//! The backdating scheduler runs two cursors over the physical bytecode,
//! the leading cursor `lookahead` instructions ahead of the trailing one.
//! A swap-in seen at the leading edge is issued immediately into a frame
//! borrowed from the prefetch buffer; when the trailing cursor reaches the
//! original position, the transfer is finished and the page is copied into
//! its intended frame. Swap-outs are issued at their original position but
//! finished up to `lookahead` instructions later, or earlier if something
//! references the source frame or the storage slot in the meantime.
//!
//! When a swap-in's storage slot was written by a swap-out that is still
//! inside the window, the page never needs to touch the device at all: the
//! swap-out is replaced by a copy into a staging frame and the swap-in by a
//! copy out of it.

use std::collections::HashMap;

use crate::{
    addr::{
        InstructionNumber,
        PageShift,
        PhysPageNumber,
        StoragePageNumber,
    },
    deps::log::debug,
    error::Error,
    instr::{
        Instruction,
        MAX_INSTRUCTION_PAGES,
    },
    opcode::OpCode,
    prioqueue::PriorityQueue,
    progfile::{
        PhysProgramReader,
        PhysProgramWriter,
        ProgramFileHeader,
    },
};


macro_rules! warn_once {
    ($name:ident; $($arg:tt)+) => {{
        use $crate::deps::lazy_static::lazy_static;
        use $crate::deps::log::warn;

        lazy_static! {
            static ref $name: ::std::sync::Once = ::std::sync::Once::new();
        }

        (&*($name)).call_once(|| {
            warn!("[WARN_ONCE] {}", format_args!($($arg)*))
        })
    }};
}


#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct SchedulingStats {
    pub num_allocation_failures: u64,
    pub num_synchronous_swapins: u64,
    pub num_elided_swaps:        u64,
}


fn swap_instruction(
    op: OpCode,
    memory: PhysPageNumber,
    storage: StoragePageNumber,
) -> Instruction {
    let mut instr = Instruction::default();
    instr.set_opcode(op);
    instr.output = memory;
    instr.storage = storage;
    instr
}

fn swap_finish_instruction(
    op: OpCode,
    memory: PhysPageNumber,
) -> Instruction {
    let mut instr = Instruction::default();
    instr.set_opcode(op);
    instr.output = memory;
    instr
}


/// Baseline scheduler: every swap directive becomes an adjacent
/// issue/finish pair, so the engine stalls on each transfer. Used as the
/// behavioral control for the backdating scheduler.
pub struct NopScheduler {
    input:  PhysProgramReader,
    output: PhysProgramWriter,
}

impl NopScheduler {
    pub fn new(
        input_file: &std::path::Path,
        output_file: &std::path::Path,
    ) -> Result<Self, Error> {
        let input = PhysProgramReader::open(input_file, false)?;
        let header = *input.header();
        let mut output = PhysProgramWriter::create(output_file, header.page_shift, false)?;
        output.set_page_count(header.num_pages);
        output.set_swap_page_count(header.num_swap_pages);
        output.set_concurrent_swaps(1);

        Ok(Self { input, output })
    }

    pub fn schedule(&mut self) -> Result<(), Error> {
        let num_instructions = self.input.header().num_instructions;
        for _ in 0..num_instructions {
            let instr = self.input.next_instruction()?;
            self.output.append(&instr)?;
            match instr.opcode() {
                OpCode::IssueSwapIn => {
                    self.output
                        .append(&swap_finish_instruction(OpCode::FinishSwapIn, instr.output))?;
                }
                OpCode::IssueSwapOut => {
                    self.output
                        .append(&swap_finish_instruction(OpCode::FinishSwapOut, instr.output))?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Result<ProgramFileHeader, Error> {
        self.output.finish()
    }
}


pub struct BackdatingScheduler {
    input:     PhysProgramReader,
    readahead: PhysProgramReader,
    output:    PhysProgramWriter,

    page_shift:           PageShift,
    lookahead:            InstructionNumber,
    prefetch_buffer_size: u64,

    free_pages: Vec<PhysPageNumber>,

    // Swap-ins already issued into a prefetch frame, keyed by the position
    // of the original swap-in instruction. Storage slots recur within one
    // window when the replacement stage reuses a freed slot, so pairing is
    // keyed by instruction number, which cannot repeat.
    backdated_swapins: HashMap<InstructionNumber, PhysPageNumber>,
    // Issued swap-outs awaiting their finish, keyed by storage slot, with
    // the finish deadline and the source frame; the queue orders them by
    // deadline and the frame map supports forced finishes.
    in_flight_swapouts:      HashMap<StoragePageNumber, (InstructionNumber, PhysPageNumber)>,
    in_flight_swapout_queue: PriorityQueue<InstructionNumber, StoragePageNumber>,
    swapout_by_frame:        HashMap<PhysPageNumber, StoragePageNumber>,

    // Swap-outs seen by the leading cursor but not yet issued, keyed by
    // storage slot: candidates for elision.
    latest_swapout_in_gap: HashMap<StoragePageNumber, (InstructionNumber, PhysPageNumber)>,
    // Swap-out instructions that will be replaced by a copy into a staging
    // frame, and swap-in instructions that will be served from one; both
    // keyed by instruction number.
    scheduled_swapout_elisions: HashMap<InstructionNumber, PhysPageNumber>,
    elided_swapins:             HashMap<InstructionNumber, PhysPageNumber>,

    stats: SchedulingStats,
}

impl BackdatingScheduler {
    pub fn new(
        input_file: &std::path::Path,
        output_file: &std::path::Path,
        lookahead: InstructionNumber,
        prefetch_buffer_size: u64,
    ) -> Result<Self, Error> {
        let input = PhysProgramReader::open(input_file, false)?;
        let readahead = PhysProgramReader::open(input_file, false)?;
        let header = *input.header();

        let mut output = PhysProgramWriter::create(output_file, header.page_shift, false)?;
        output.set_page_count(header.num_pages + prefetch_buffer_size);
        output.set_swap_page_count(header.num_swap_pages);
        output.set_concurrent_swaps(prefetch_buffer_size as u32 + 1);

        // Prefetch frames sit just past the frames the replacement stage
        // planned with.
        let mut free_pages: Vec<PhysPageNumber> =
            (header.num_pages..header.num_pages + prefetch_buffer_size).collect();
        free_pages.reverse();

        Ok(Self {
            input,
            readahead,
            output,
            page_shift: header.page_shift,
            lookahead,
            prefetch_buffer_size,
            free_pages,
            backdated_swapins: HashMap::new(),
            in_flight_swapouts: HashMap::new(),
            in_flight_swapout_queue: PriorityQueue::new(),
            swapout_by_frame: HashMap::new(),
            latest_swapout_in_gap: HashMap::new(),
            scheduled_swapout_elisions: HashMap::new(),
            elided_swapins: HashMap::new(),
            stats: SchedulingStats::default(),
        })
    }

    pub fn stats(&self) -> &SchedulingStats {
        &self.stats
    }

    fn allocate_page_frame(&mut self) -> Option<PhysPageNumber> {
        self.free_pages.pop()
    }

    fn deallocate_page_frame(
        &mut self,
        ppn: PhysPageNumber,
    ) {
        self.free_pages.push(ppn);
    }

    fn emit_finish_swapout(
        &mut self,
        storage: StoragePageNumber,
    ) -> Result<(), Error> {
        let (_, ppn) = self
            .in_flight_swapouts
            .remove(&storage)
            .expect("finish of a swap-out that is in flight");
        self.swapout_by_frame.remove(&ppn);
        self.in_flight_swapout_queue.erase(&storage);
        self.output
            .append(&swap_finish_instruction(OpCode::FinishSwapOut, ppn))
    }

    /// Completes a pending swap-out whose destination is `storage`, if any;
    /// required before the slot can be read back or overwritten.
    fn force_finish_swapout_to_storage(
        &mut self,
        storage: StoragePageNumber,
    ) -> Result<(), Error> {
        if self.in_flight_swapouts.contains_key(&storage) {
            self.emit_finish_swapout(storage)?;
        }
        Ok(())
    }

    /// Completes a pending swap-out whose source is `frame`, if any;
    /// required before anything writes the frame.
    fn force_finish_swapout_on_frame(
        &mut self,
        frame: PhysPageNumber,
    ) -> Result<(), Error> {
        if let Some(&storage) = self.swapout_by_frame.get(&frame) {
            self.emit_finish_swapout(storage)?;
        }
        Ok(())
    }

    /// Keeps the number of in-flight transfers within the prefetch budget
    /// plus one by finishing the oldest swap-outs first. The limit matches
    /// the max_concurrent_swaps value written into the program header.
    fn make_room_for_swap(&mut self) -> Result<(), Error> {
        let limit = self.prefetch_buffer_size as usize + 1;
        while self.backdated_swapins.len() + self.in_flight_swapouts.len() >= limit {
            match self.in_flight_swapout_queue.min().map(|&(_, s)| s) {
                Some(storage) => self.emit_finish_swapout(storage)?,
                None => break,
            }
        }
        Ok(())
    }

    fn process_gap_increase(
        &mut self,
        instr: &Instruction,
        inum: InstructionNumber,
    ) -> Result<(), Error> {
        match instr.opcode() {
            OpCode::IssueSwapIn => {
                let storage = instr.storage;
                if let Some(&(swapout_inum, _)) = self.latest_swapout_in_gap.get(&storage) {
                    // The data this swap-in wants has not reached the device
                    // yet; stage it in memory instead of going to disk.
                    match self.allocate_page_frame() {
                        Some(frame) => {
                            self.scheduled_swapout_elisions.insert(swapout_inum, frame);
                            self.elided_swapins.insert(inum, frame);
                            self.latest_swapout_in_gap.remove(&storage);
                            self.stats.num_elided_swaps += 1;
                        }
                        None => {
                            warn_once!(PREFETCH_BUFFER_EXHAUSTED;
                                "prefetch buffer exhausted; some swaps will run synchronously"
                            );
                            self.stats.num_allocation_failures += 1;
                        }
                    }
                } else {
                    match self.allocate_page_frame() {
                        Some(frame) => {
                            self.force_finish_swapout_to_storage(storage)?;
                            self.make_room_for_swap()?;
                            self.output.append(&swap_instruction(
                                OpCode::IssueSwapIn,
                                frame,
                                storage,
                            ))?;
                            self.backdated_swapins.insert(inum, frame);
                        }
                        None => {
                            warn_once!(PREFETCH_BUFFER_EXHAUSTED;
                                "prefetch buffer exhausted; some swaps will run synchronously"
                            );
                            self.stats.num_allocation_failures += 1;
                        }
                    }
                }
            }
            OpCode::IssueSwapOut => {
                self.latest_swapout_in_gap
                    .insert(instr.storage, (inum, instr.output));
            }
            _ => {}
        }
        Ok(())
    }

    fn process_gap_decrease(
        &mut self,
        instr: &Instruction,
        inum: InstructionNumber,
    ) -> Result<(), Error> {
        // Swap-outs whose deadline has arrived are finished before anything
        // else at this position.
        while let Some(&(deadline, storage)) = self.in_flight_swapout_queue.min() {
            if deadline > inum {
                break;
            }
            self.emit_finish_swapout(storage)?;
        }

        match instr.opcode() {
            OpCode::IssueSwapIn => {
                let storage = instr.storage;
                let target = instr.output;
                if let Some(staging) = self.elided_swapins.remove(&inum) {
                    self.force_finish_swapout_on_frame(target)?;
                    self.output
                        .append(&swap_instruction(OpCode::CopySwap, target, staging))?;
                    self.deallocate_page_frame(staging);
                } else if let Some(prefetched) = self.backdated_swapins.remove(&inum) {
                    self.force_finish_swapout_on_frame(target)?;
                    self.output
                        .append(&swap_finish_instruction(OpCode::FinishSwapIn, prefetched))?;
                    self.output
                        .append(&swap_instruction(OpCode::CopySwap, target, prefetched))?;
                    self.deallocate_page_frame(prefetched);
                } else {
                    // Prefetching failed; fall back to a synchronous swap.
                    self.force_finish_swapout_on_frame(target)?;
                    self.force_finish_swapout_to_storage(storage)?;
                    self.make_room_for_swap()?;
                    self.output
                        .append(&swap_instruction(OpCode::IssueSwapIn, target, storage))?;
                    self.output
                        .append(&swap_finish_instruction(OpCode::FinishSwapIn, target))?;
                    self.stats.num_synchronous_swapins += 1;
                }
            }
            OpCode::IssueSwapOut => {
                let storage = instr.storage;
                let source = instr.output;
                if let Some(&(entered, _)) = self.latest_swapout_in_gap.get(&storage) {
                    if entered == inum {
                        self.latest_swapout_in_gap.remove(&storage);
                    }
                }

                if let Some(staging) = self.scheduled_swapout_elisions.remove(&inum) {
                    // The page is needed again before it would come back
                    // from the device; park it in the staging frame.
                    self.output
                        .append(&swap_instruction(OpCode::CopySwap, staging, source))?;
                } else {
                    self.force_finish_swapout_to_storage(storage)?;
                    self.make_room_for_swap()?;
                    self.output
                        .append(&swap_instruction(OpCode::IssueSwapOut, source, storage))?;
                    let deadline = inum + self.lookahead;
                    self.in_flight_swapouts.insert(storage, (deadline, source));
                    self.swapout_by_frame.insert(source, storage);
                    self.in_flight_swapout_queue.insert(deadline, storage);
                }
            }
            _ => {
                // No instruction may touch a frame whose eviction write is
                // still in flight.
                let mut pages = [0u64; MAX_INSTRUCTION_PAGES];
                let num_pages = instr.store_page_numbers(self.page_shift, &mut pages);
                for page in pages.iter().take(num_pages) {
                    self.force_finish_swapout_on_frame(*page)?;
                }
                self.output.append(instr)?;
            }
        }
        Ok(())
    }

    pub fn schedule(&mut self) -> Result<(), Error> {
        let num_instructions = self.input.header().num_instructions;
        let gap = self.lookahead;

        let mut primed = 0;
        while primed < gap.min(num_instructions) {
            let instr = self.readahead.next_instruction()?;
            self.process_gap_increase(&instr, primed)?;
            primed += 1;
        }

        for inum in 0..num_instructions {
            if inum + gap < num_instructions {
                let instr = self.readahead.next_instruction()?;
                self.process_gap_increase(&instr, inum + gap)?;
            }
            let instr = self.input.next_instruction()?;
            self.process_gap_decrease(&instr, inum)?;
        }

        while let Some(&(_, storage)) = self.in_flight_swapout_queue.min() {
            self.emit_finish_swapout(storage)?;
        }
        debug_assert!(self.backdated_swapins.is_empty());
        debug_assert!(self.elided_swapins.is_empty());
        debug_assert!(self.scheduled_swapout_elisions.is_empty());

        debug!(
            "scheduling finished: {} allocation failures, {} synchronous swapins, {} elisions",
            self.stats.num_allocation_failures,
            self.stats.num_synchronous_swapins,
            self.stats.num_elided_swaps
        );
        Ok(())
    }

    pub fn finish(self) -> Result<(ProgramFileHeader, SchedulingStats), Error> {
        let stats = self.stats;
        let header = self.output.finish()?;
        Ok((header, stats))
    }
}


#[cfg(test)]
mod tests {
    use std::collections::{
        HashMap,
        HashSet,
    };

    use super::*;
    use crate::addr::pg_addr;

    const SHIFT: PageShift = 4;

    fn scratch(tag: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("golem-schedule-{}-{}", tag, std::process::id()));
        path
    }

    fn compute_on(frame: PhysPageNumber) -> Instruction {
        let mut instr = Instruction::default();
        instr.set_opcode(OpCode::Output);
        instr.width = 16;
        instr.output = pg_addr(frame, SHIFT);
        instr
    }

    fn write_phys_program(
        path: &std::path::Path,
        num_pages: u64,
        num_swap_pages: u64,
        instructions: &[Instruction],
    ) {
        let mut writer = PhysProgramWriter::create(path, SHIFT, false).unwrap();
        for instr in instructions {
            writer.append(instr).unwrap();
        }
        writer.set_page_count(num_pages);
        writer.set_swap_page_count(num_swap_pages);
        writer.finish().unwrap();
    }

    fn read_all(path: &std::path::Path) -> (ProgramFileHeader, Vec<Instruction>) {
        let mut reader = PhysProgramReader::open(path, false).unwrap();
        let header = *reader.header();
        let mut instructions = Vec::new();
        for _ in 0..header.num_instructions {
            instructions.push(reader.next_instruction().unwrap());
        }
        (header, instructions)
    }

    // Checks the pairing discipline of the scheduled stream: every finish
    // has exactly one earlier unconsumed issue for the same frame, nothing
    // touches a frame between its issue and finish, and the in-flight count
    // never exceeds the prefetch budget plus one.
    fn check_schedule_invariants(
        memprog: &[Instruction],
        max_in_flight: usize,
    ) {
        let mut in_flight: HashMap<PhysPageNumber, OpCode> = HashMap::new();
        let mut peak = 0usize;
        let mut pages = [0u64; MAX_INSTRUCTION_PAGES];

        for instr in memprog {
            match instr.opcode() {
                OpCode::IssueSwapIn | OpCode::IssueSwapOut => {
                    assert!(
                        in_flight.insert(instr.output, instr.opcode()).is_none(),
                        "frame {} has two overlapping swaps",
                        instr.output
                    );
                    peak = peak.max(in_flight.len());
                }
                OpCode::FinishSwapIn => {
                    assert_eq!(in_flight.remove(&instr.output), Some(OpCode::IssueSwapIn));
                }
                OpCode::FinishSwapOut => {
                    assert_eq!(in_flight.remove(&instr.output), Some(OpCode::IssueSwapOut));
                }
                OpCode::CopySwap => {
                    assert!(!in_flight.contains_key(&instr.output), "copy into a busy frame");
                }
                _ => {
                    let num_pages = instr.store_page_numbers(SHIFT, &mut pages);
                    for page in pages.iter().take(num_pages) {
                        // A frame being read from the device must not be
                        // touched; a frame draining to the device may be
                        // read but this schedule never relies on that.
                        assert!(
                            in_flight.get(page) != Some(&OpCode::IssueSwapIn),
                            "instruction touches frame {} mid swap-in",
                            page
                        );
                    }
                }
            }
        }
        assert!(in_flight.is_empty(), "unfinished swaps at end of program");
        assert!(peak <= max_in_flight, "{} swaps in flight, budget is {}", peak, max_in_flight);
    }

    // Lookahead 2, one prefetch frame: the first swap-in issues up front,
    // the second issues two instructions before its data is needed.
    #[test]
    fn swapins_are_backdated() {
        let input = scratch("backdate-in");
        let output = scratch("backdate-out");

        write_phys_program(
            &input,
            2,
            2,
            &[
                swap_instruction(OpCode::IssueSwapIn, 1, 0),
                compute_on(1),
                compute_on(1),
                swap_instruction(OpCode::IssueSwapIn, 1, 1),
            ],
        );

        let mut scheduler = BackdatingScheduler::new(&input, &output, 2, 1).unwrap();
        scheduler.schedule().unwrap();
        let (header, stats) = scheduler.finish().unwrap();
        assert_eq!(stats.num_synchronous_swapins, 0);
        assert_eq!(header.num_pages, 3);
        assert_eq!(header.max_concurrent_swaps, 2);

        let (_, memprog) = read_all(&output);
        let ops: Vec<OpCode> = memprog.iter().map(|i| i.opcode()).collect();
        assert_eq!(
            ops,
            vec![
                OpCode::IssueSwapIn,  // first transfer starts immediately
                OpCode::FinishSwapIn,
                OpCode::CopySwap,
                OpCode::IssueSwapIn,  // second transfer, two instructions early
                OpCode::Output,
                OpCode::Output,
                OpCode::FinishSwapIn,
                OpCode::CopySwap,
            ]
        );
        // Both transfers land in the single prefetch frame (frame 2).
        assert_eq!(memprog[0].output, 2);
        assert_eq!(memprog[3].output, 2);

        check_schedule_invariants(&memprog, 2);
        std::fs::remove_file(&input).unwrap();
        std::fs::remove_file(&output).unwrap();
    }

    // A swap-out followed shortly by a swap-in of the same storage slot
    // never touches the device: both become in-memory copies.
    #[test]
    fn near_swaps_are_elided() {
        let input = scratch("elide-in");
        let output = scratch("elide-out");

        write_phys_program(
            &input,
            2,
            1,
            &[
                swap_instruction(OpCode::IssueSwapOut, 0, 0),
                compute_on(1),
                swap_instruction(OpCode::IssueSwapIn, 0, 0),
                compute_on(0),
            ],
        );

        let mut scheduler = BackdatingScheduler::new(&input, &output, 4, 2).unwrap();
        scheduler.schedule().unwrap();
        let (_, stats) = scheduler.finish().unwrap();
        assert_eq!(stats.num_elided_swaps, 1);

        let (_, memprog) = read_all(&output);
        let ops: HashSet<OpCode> = memprog.iter().map(|i| i.opcode()).collect();
        assert!(!ops.contains(&OpCode::IssueSwapOut));
        assert!(!ops.contains(&OpCode::IssueSwapIn));
        let copies = memprog.iter().filter(|i| i.opcode() == OpCode::CopySwap).count();
        assert_eq!(copies, 2);

        check_schedule_invariants(&memprog, 3);
        std::fs::remove_file(&input).unwrap();
        std::fs::remove_file(&output).unwrap();
    }

    // With an empty prefetch buffer every swap-in stays synchronous and is
    // counted as such.
    #[test]
    fn exhausted_buffer_falls_back_to_synchronous() {
        let input = scratch("sync-in");
        let output = scratch("sync-out");

        write_phys_program(
            &input,
            1,
            2,
            &[
                swap_instruction(OpCode::IssueSwapIn, 0, 0),
                compute_on(0),
                swap_instruction(OpCode::IssueSwapOut, 0, 1),
                swap_instruction(OpCode::IssueSwapIn, 0, 0),
            ],
        );

        let mut scheduler = BackdatingScheduler::new(&input, &output, 3, 0).unwrap();
        scheduler.schedule().unwrap();
        let (_, stats) = scheduler.finish().unwrap();
        assert_eq!(stats.num_synchronous_swapins, 2);
        assert!(stats.num_allocation_failures >= 2);

        let (_, memprog) = read_all(&output);
        check_schedule_invariants(&memprog, 1);
        std::fs::remove_file(&input).unwrap();
        std::fs::remove_file(&output).unwrap();
    }

    // A longer random-ish plan keeps the concurrency bound and pairing
    // discipline with a mix of hits, misses and elisions.
    #[test]
    fn mixed_plan_respects_bounds() {
        let input = scratch("mixed-in");
        let output = scratch("mixed-out");

        let mut instructions = Vec::new();
        for round in 0..40u64 {
            let frame = round % 3;
            let slot = round % 4;
            instructions.push(swap_instruction(OpCode::IssueSwapOut, frame, slot));
            instructions.push(compute_on((frame + 1) % 3));
            instructions.push(swap_instruction(OpCode::IssueSwapIn, frame, slot));
            instructions.push(compute_on(frame));
        }

        write_phys_program(&input, 3, 4, &instructions);

        let mut scheduler = BackdatingScheduler::new(&input, &output, 6, 2).unwrap();
        scheduler.schedule().unwrap();
        let (header, _) = scheduler.finish().unwrap();

        let (_, memprog) = read_all(&output);
        check_schedule_invariants(&memprog, header.max_concurrent_swaps as usize);
        std::fs::remove_file(&input).unwrap();
        std::fs::remove_file(&output).unwrap();
    }

    #[test]
    fn nop_scheduler_pairs_every_swap() {
        let input = scratch("nop-in");
        let output = scratch("nop-out");

        write_phys_program(
            &input,
            2,
            1,
            &[
                swap_instruction(OpCode::IssueSwapOut, 0, 0),
                compute_on(1),
                swap_instruction(OpCode::IssueSwapIn, 0, 0),
            ],
        );

        let mut scheduler = NopScheduler::new(&input, &output).unwrap();
        scheduler.schedule().unwrap();
        scheduler.finish().unwrap();

        let (header, memprog) = read_all(&output);
        assert_eq!(header.max_concurrent_swaps, 1);
        let ops: Vec<OpCode> = memprog.iter().map(|i| i.opcode()).collect();
        assert_eq!(
            ops,
            vec![
                OpCode::IssueSwapOut,
                OpCode::FinishSwapOut,
                OpCode::Output,
                OpCode::IssueSwapIn,
                OpCode::FinishSwapIn,
            ]
        );
        check_schedule_invariants(&memprog, 1);
        std::fs::remove_file(&input).unwrap();
        std::fs::remove_file(&output).unwrap();
    }
}
