//! The online interpreter for memory programs.
//!
//! One thread walks the packed instructions in program order, dispatching
//! wire operations to the protocol backend, page transfers to the swap
//! context, and messaging to the peer channels. The only blocking points
//! are the finish directives: finish-swap drains transfer completions until
//! the named frame appears, and finish-receive waits on the channel's
//! condition variable. Issue directives and buffered sends never block.
//!
//! Addresses in physical bytecode are in wire units; the engine scales by
//! the backend's wire size when touching memory or the device.

use std::{
    collections::HashSet,
    path::Path,
    time::Instant,
};

use crate::{
    addr::{
        pg_addr,
        pg_size,
        PageShift,
        PhysPageNumber,
        StoragePageNumber,
        WorkerId,
    },
    cluster::ClusterNetwork,
    deps::log::{
        debug,
        info,
    },
    error::Error,
    instr::Instruction,
    mmapfile::MmapFile,
    opcode::{
        OpCode,
        FLAG_EVALUATOR_INPUT,
    },
    progfile::{
        PhysProgramReader,
        ProgramFileHeader,
    },
    protocol::Protocol,
    stats::StreamStats,
    aio::SwapContext,
};


pub struct Engine<P: Protocol> {
    input:      PhysProgramReader,
    memory:     MmapFile,
    page_shift: PageShift,
    wire_bytes: usize,
    num_wires:  u64,

    swap:            SwapContext,
    in_flight_swaps: HashSet<PhysPageNumber>,

    cluster:  ClusterNetwork,
    protocol: P,

    swap_in_stats:      StreamStats,
    swap_out_stats:     StreamStats,
    swap_blocked_stats: StreamStats,
    timer:              Option<Instant>,
}

impl<P: Protocol> Engine<P> {
    pub fn new(
        memory_program: &Path,
        storage_path: &Path,
        cluster: ClusterNetwork,
        protocol: P,
    ) -> Result<Self, Error> {
        let input = PhysProgramReader::open(memory_program, false)?;
        let header = *input.header();

        let wire_bytes = std::mem::size_of::<P::Wire>();
        let page_bytes = pg_size(header.page_shift) as usize * wire_bytes;
        let num_wires = pg_addr(header.num_pages, header.page_shift);
        let memory = MmapFile::anonymous(num_wires as usize * wire_bytes)?;

        let required = header.num_swap_pages * page_bytes as u64;
        let device = if storage_path.starts_with("/dev/") {
            let (device, length) = crate::io::open_swap_device(storage_path)?;
            if length < required {
                return Err(Error::Config {
                    path:   storage_path.display().to_string(),
                    reason: format!("device holds {} bytes, plan needs {}", length, required),
                });
            }
            device
        } else {
            crate::io::create_swap_file(storage_path, required.max(page_bytes as u64))?
        };

        debug!(
            "engine memory: {} pages of {} wires, {} swap pages, {} concurrent swaps",
            header.num_pages,
            pg_size(header.page_shift),
            header.num_swap_pages,
            header.max_concurrent_swaps
        );

        Ok(Self {
            input,
            memory,
            page_shift: header.page_shift,
            wire_bytes,
            num_wires,
            swap: SwapContext::new(device, header.max_concurrent_swaps),
            in_flight_swaps: HashSet::new(),
            cluster,
            protocol,
            swap_in_stats: StreamStats::new("swap-in issue (ns)"),
            swap_out_stats: StreamStats::new("swap-out issue (ns)"),
            swap_blocked_stats: StreamStats::new("swap blocked (ns)"),
            timer: None,
        })
    }

    pub fn header(&self) -> &ProgramFileHeader {
        self.input.header()
    }

    fn page_bytes(&self) -> usize {
        pg_size(self.page_shift) as usize * self.wire_bytes
    }

    fn page_ptr(
        &self,
        ppn: PhysPageNumber,
    ) -> *mut u8 {
        debug_assert!(pg_addr(ppn + 1, self.page_shift) <= self.num_wires);
        unsafe {
            self.memory
                .as_nonnull()
                .as_ptr()
                .add(pg_addr(ppn, self.page_shift) as usize * self.wire_bytes)
        }
    }

    // The planner places every instruction's output disjoint from its
    // inputs, which is what makes carving one mutable and several shared
    // wire slices out of the same frame memory sound.

    unsafe fn wires<'a>(
        &self,
        addr: u64,
        count: usize,
    ) -> &'a [P::Wire] {
        debug_assert!(addr + count as u64 <= self.num_wires);
        let base = self.memory.as_nonnull().as_ptr() as *const P::Wire;
        std::slice::from_raw_parts(base.add(addr as usize), count)
    }

    unsafe fn wires_mut<'a>(
        &self,
        addr: u64,
        count: usize,
    ) -> &'a mut [P::Wire] {
        debug_assert!(addr + count as u64 <= self.num_wires);
        let base = self.memory.as_nonnull().as_ptr() as *mut P::Wire;
        std::slice::from_raw_parts_mut(base.add(addr as usize), count)
    }

    fn storage_offset(
        &self,
        spn: StoragePageNumber,
    ) -> u64 {
        pg_addr(spn, self.page_shift) * self.wire_bytes as u64
    }

    fn execute_issue_swap_in(
        &mut self,
        instr: &Instruction,
    ) -> Result<(), Error> {
        let start = Instant::now();
        debug_assert!(!self.in_flight_swaps.contains(&instr.output));
        self.swap.submit_read(
            instr.output,
            self.page_ptr(instr.output),
            self.page_bytes(),
            self.storage_offset(instr.storage),
        )?;
        self.in_flight_swaps.insert(instr.output);
        self.swap_in_stats.event(start.elapsed().as_nanos() as u64);
        Ok(())
    }

    fn execute_issue_swap_out(
        &mut self,
        instr: &Instruction,
    ) -> Result<(), Error> {
        let start = Instant::now();
        debug_assert!(!self.in_flight_swaps.contains(&instr.output));
        self.swap.submit_write(
            instr.output,
            self.page_ptr(instr.output),
            self.page_bytes(),
            self.storage_offset(instr.storage),
        )?;
        self.in_flight_swaps.insert(instr.output);
        self.swap_out_stats.event(start.elapsed().as_nanos() as u64);
        Ok(())
    }

    /// Drains completions until the transfer on `ppn` has finished.
    fn wait_for_finish_swap(
        &mut self,
        ppn: PhysPageNumber,
    ) -> Result<(), Error> {
        if !self.in_flight_swaps.contains(&ppn) {
            return Ok(());
        }

        let start = Instant::now();
        loop {
            let completion = self.swap.next_completion()?;
            let found = self.in_flight_swaps.remove(&completion.ppn);
            debug_assert!(found, "completion for a transfer that was never issued");
            if let Err(reason) = completion.result {
                return Err(Error::Swap {
                    ppn: completion.ppn,
                    reason,
                });
            }
            if completion.ppn == ppn {
                break;
            }
        }
        self.swap_blocked_stats.event(start.elapsed().as_nanos() as u64);
        Ok(())
    }

    fn execute_copy_swap(
        &mut self,
        instr: &Instruction,
    ) {
        // memory field is the destination frame, storage field the source.
        let to = self.page_ptr(instr.output);
        let from = self.page_ptr(instr.storage);
        unsafe {
            std::ptr::copy_nonoverlapping(from, to, self.page_bytes());
        }
    }

    fn execute_public_constant(
        &mut self,
        instr: &Instruction,
    ) {
        let output = unsafe { self.wires_mut(instr.output, instr.width as usize) };
        let mut constant = instr.constant;
        for wire in output.iter_mut() {
            if constant & 0x1 == 0 {
                self.protocol.zero(wire);
            } else {
                self.protocol.one(wire);
            }
            constant >>= 1;
        }
    }

    fn execute_instruction(
        &mut self,
        instr: &Instruction,
    ) -> Result<(), Error> {
        let width = instr.width as usize;
        match instr.opcode() {
            OpCode::IssueSwapIn => self.execute_issue_swap_in(instr)?,
            OpCode::IssueSwapOut => self.execute_issue_swap_out(instr)?,
            OpCode::FinishSwapIn | OpCode::FinishSwapOut => {
                self.wait_for_finish_swap(instr.output)?;
            }
            OpCode::CopySwap => self.execute_copy_swap(instr),

            OpCode::NetworkPostReceive => {
                let into = unsafe {
                    self.memory
                        .as_nonnull()
                        .as_ptr()
                        .add(instr.output as usize * self.wire_bytes)
                };
                let length = width * self.wire_bytes;
                let channel = self.cluster.contact_worker(instr.constant as WorkerId)?;
                channel.post_receive(into, length)?;
            }
            OpCode::NetworkFinishReceive => {
                self.cluster
                    .contact_worker(instr.data as WorkerId)?
                    .wait_until_reads_finished()?;
            }
            OpCode::NetworkBufferSend => {
                let bytes = unsafe {
                    std::slice::from_raw_parts(
                        (self.memory.as_nonnull().as_ptr() as *const u8)
                            .add(instr.output as usize * self.wire_bytes),
                        width * self.wire_bytes,
                    )
                };
                self.cluster
                    .contact_worker(instr.constant as WorkerId)?
                    .buffer_send(bytes)?;
            }
            OpCode::NetworkFinishSend => {
                self.cluster.contact_worker(instr.data as WorkerId)?.flush()?;
            }

            OpCode::Input => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let evaluator = instr.flags & FLAG_EVALUATOR_INPUT != 0;
                self.protocol.input(output, evaluator)?;
            }
            OpCode::Output => {
                let data = unsafe { self.wires(instr.output, width) };
                self.protocol.output(data)?;
            }
            OpCode::PublicConstant => self.execute_public_constant(instr),

            OpCode::Copy => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input = unsafe { self.wires(instr.input1, width) };
                self.protocol.op_copy(output, input);
            }
            OpCode::IntAdd => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input1 = unsafe { self.wires(instr.input1, width) };
                let input2 = unsafe { self.wires(instr.input2, width) };
                self.protocol.op_add(output, input1, input2);
            }
            OpCode::IntSub => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input1 = unsafe { self.wires(instr.input1, width) };
                let input2 = unsafe { self.wires(instr.input2, width) };
                self.protocol.op_sub(output, input1, input2);
            }
            OpCode::IntIncrement => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input = unsafe { self.wires(instr.input1, width) };
                self.protocol.op_increment(output, input);
            }
            OpCode::IntDecrement => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input = unsafe { self.wires(instr.input1, width) };
                self.protocol.op_decrement(output, input);
            }
            OpCode::IntMultiply => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input1 = unsafe { self.wires(instr.input1, width) };
                let input2 = unsafe { self.wires(instr.input2, width) };
                self.protocol.op_multiply(output, input1, input2);
            }
            OpCode::IntLess => {
                let output = unsafe { self.wires_mut(instr.output, 1) };
                let input1 = unsafe { self.wires(instr.input1, width) };
                let input2 = unsafe { self.wires(instr.input2, width) };
                self.protocol.op_less(&mut output[0], input1, input2);
            }
            OpCode::Equal => {
                let output = unsafe { self.wires_mut(instr.output, 1) };
                let input1 = unsafe { self.wires(instr.input1, width) };
                let input2 = unsafe { self.wires(instr.input2, width) };
                self.protocol.op_equal(&mut output[0], input1, input2);
            }
            OpCode::IsZero => {
                let output = unsafe { self.wires_mut(instr.output, 1) };
                let input = unsafe { self.wires(instr.input1, width) };
                self.protocol.op_is_zero(&mut output[0], input);
            }
            OpCode::NonZero => {
                let output = unsafe { self.wires_mut(instr.output, 1) };
                let input = unsafe { self.wires(instr.input1, width) };
                self.protocol.op_non_zero(&mut output[0], input);
            }
            OpCode::BitNot => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input = unsafe { self.wires(instr.input1, width) };
                self.protocol.op_not(output, input);
            }
            OpCode::BitAnd => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input1 = unsafe { self.wires(instr.input1, width) };
                let input2 = unsafe { self.wires(instr.input2, width) };
                self.protocol.op_and(output, input1, input2);
            }
            OpCode::BitOr => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input1 = unsafe { self.wires(instr.input1, width) };
                let input2 = unsafe { self.wires(instr.input2, width) };
                self.protocol.op_or(output, input1, input2);
            }
            OpCode::BitXor => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input1 = unsafe { self.wires(instr.input1, width) };
                let input2 = unsafe { self.wires(instr.input2, width) };
                self.protocol.op_xor(output, input1, input2);
            }
            OpCode::ValueSelect => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input1 = unsafe { self.wires(instr.input1, width) };
                let input2 = unsafe { self.wires(instr.input2, width) };
                let selector = unsafe { self.wires(instr.input3, 1) };
                self.protocol.op_select(output, input1, input2, &selector[0]);
            }

            OpCode::SwitchLevel => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input = unsafe { self.wires(instr.input1, width) };
                self.protocol.op_switch_level(output, input)?;
            }
            OpCode::Renormalize => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input = unsafe { self.wires(instr.input1, width) };
                self.protocol.op_renormalize(output, input)?;
            }
            OpCode::Encode => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                self.protocol.op_encode(output, instr.constant, instr.width)?;
            }
            OpCode::AddPlaintext => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input1 = unsafe { self.wires(instr.input1, width) };
                let input2 = unsafe { self.wires(instr.input2, width) };
                self.protocol.op_add_plaintext(output, input1, input2)?;
            }
            OpCode::MultiplyPlaintext => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input1 = unsafe { self.wires(instr.input1, width) };
                let input2 = unsafe { self.wires(instr.input2, width) };
                self.protocol.op_multiply_plaintext(output, input1, input2)?;
            }
            OpCode::MultiplyRaw => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input1 = unsafe { self.wires(instr.input1, width) };
                let input2 = unsafe { self.wires(instr.input2, width) };
                self.protocol.op_multiply_raw(output, input1, input2)?;
            }
            OpCode::MultiplyPlaintextRaw => {
                let output = unsafe { self.wires_mut(instr.output, width) };
                let input1 = unsafe { self.wires(instr.input1, width) };
                let input2 = unsafe { self.wires(instr.input2, width) };
                self.protocol.op_multiply_plaintext_raw(output, input1, input2)?;
            }

            OpCode::PrintStats => {
                println!("{}", self.swap_in_stats);
                println!("{}", self.swap_out_stats);
                println!("{}", self.swap_blocked_stats);
                self.protocol.print_stats();
            }
            OpCode::StartTimer => {
                self.timer = Some(Instant::now());
            }
            OpCode::StopTimer => {
                if let Some(started) = self.timer {
                    println!("Timer: {} ns", started.elapsed().as_nanos());
                }
            }

            OpCode::IntAddWithCarry | OpCode::Undefined => {
                return Err(Error::Protocol {
                    reason: format!("{} is not executable", instr.opcode()),
                });
            }
        }
        Ok(())
    }

    /// Interprets the whole memory program.
    pub fn execute_program(&mut self) -> Result<(), Error> {
        let num_instructions = self.input.header().num_instructions;
        info!("executing {} instructions", num_instructions);
        for _ in 0..num_instructions {
            let instr = self.input.next_instruction()?;
            self.execute_instruction(&instr)?;
        }
        Ok(())
    }

    /// Tears down the engine, handing back the protocol backend so its
    /// output streams can be finalized.
    pub fn into_protocol(self) -> P {
        self.protocol
    }
}
