//! The program writer that the DSL drives during the placement stage: it
//! owns the placer and the virtual bytecode writer, allocates output
//! operands as instructions are committed, and stamps the first-use flag
//! that the later stages depend on.

use std::path::Path;

use crate::{
    addr::{
        PageShift,
        VirtAddr,
        WorkerId,
        INVALID_VADDR,
    },
    error::Error,
    instr::Instruction,
    opcode::{
        OpCode,
        FLAG_OUTPUT_PAGE_FIRST_USE,
    },
    place::{
        AllocationSize,
        BinnedPlacer,
        OperandType,
        Placer,
    },
    progfile::{
        ProgramFileHeader,
        VirtProgramWriter,
    },
    protocol::PlacementPlugin,
};


pub struct Program<P: Placer = BinnedPlacer> {
    writer:        VirtProgramWriter,
    current:       Instruction,
    placer:        P,
    sizer:         PlacementPlugin,
    protocol_name: &'static str,
    page_shift:    PageShift,
}

impl Program<BinnedPlacer> {
    pub fn create<Q: AsRef<Path>>(
        path: Q,
        page_shift: PageShift,
        sizer: PlacementPlugin,
        protocol_name: &'static str,
    ) -> Result<Self, Error> {
        Self::with_placer(path, page_shift, BinnedPlacer::new(page_shift), sizer, protocol_name)
    }
}

impl<P: Placer> Program<P> {
    pub fn with_placer<Q: AsRef<Path>>(
        path: Q,
        page_shift: PageShift,
        placer: P,
        sizer: PlacementPlugin,
        protocol_name: &'static str,
    ) -> Result<Self, Error> {
        Ok(Self {
            writer: VirtProgramWriter::create(path, page_shift, true)?,
            current: Instruction::default(),
            placer,
            sizer,
            protocol_name,
            page_shift,
        })
    }

    pub fn page_shift(&self) -> PageShift {
        self.page_shift
    }

    pub fn num_instructions(&self) -> u64 {
        self.writer.num_instructions()
    }

    /// A cleared buffer for the next instruction. The caller fills it in and
    /// then calls `commit_instruction`.
    pub fn instruction(&mut self) -> &mut Instruction {
        self.current.clear();
        &mut self.current
    }

    /// Commits the current instruction. When `output_width` is nonzero, an
    /// output operand of that many address units is placed first and the
    /// instruction's output field (and, on a fresh page, its first-use flag)
    /// is populated. Returns the instruction's output address.
    pub fn commit_instruction(
        &mut self,
        output_width: AllocationSize,
    ) -> Result<VirtAddr, Error> {
        if output_width != 0 {
            let (addr, fresh_page) = self.placer.allocate(output_width)?;
            self.current.output = addr;
            if fresh_page {
                self.current.flags |= FLAG_OUTPUT_PAGE_FIRST_USE;
            }
        }
        debug_assert!(self.current.output != INVALID_VADDR);
        self.writer.append(&self.current)?;
        Ok(self.current.output)
    }

    /// Returns previously placed memory to the placer for reuse.
    pub fn recycle(
        &mut self,
        addr: VirtAddr,
        width: AllocationSize,
    ) {
        self.placer.deallocate(addr, width);
    }

    /// Footprint of a logical operand under the target protocol. A refusal
    /// by the sizing plugin is a fatal planning error.
    pub fn operand_size(
        &self,
        logical_width: u64,
        operand: OperandType,
    ) -> Result<AllocationSize, Error> {
        (self.sizer)(logical_width, operand).ok_or(Error::PlacementRefused {
            protocol: self.protocol_name,
            width:    logical_width,
            operand:  operand.name(),
        })
    }

    fn append_control(
        &mut self,
        op: OpCode,
        data: u32,
    ) -> Result<(), Error> {
        let mut instr = Instruction::default();
        instr.set_opcode(op);
        instr.data = data;
        self.writer.append(&instr)
    }

    /// Post an asynchronous receive of `width` wires from `from` into the
    /// memory at `addr`.
    pub fn post_receive(
        &mut self,
        from: WorkerId,
        addr: VirtAddr,
        width: crate::instr::BitWidth,
    ) -> Result<(), Error> {
        let mut instr = Instruction::default();
        instr.set_opcode(OpCode::NetworkPostReceive);
        instr.width = width;
        instr.output = addr;
        instr.constant = from as u64;
        self.writer.append(&instr)
    }

    /// Buffer `width` wires starting at `addr` for sending to `to`.
    pub fn buffer_send(
        &mut self,
        to: WorkerId,
        addr: VirtAddr,
        width: crate::instr::BitWidth,
    ) -> Result<(), Error> {
        let mut instr = Instruction::default();
        instr.set_opcode(OpCode::NetworkBufferSend);
        instr.width = width;
        instr.output = addr;
        instr.constant = to as u64;
        self.writer.append(&instr)
    }

    /// Flush any buffered sends to the given worker.
    pub fn finish_send(
        &mut self,
        to: WorkerId,
    ) -> Result<(), Error> {
        self.append_control(OpCode::NetworkFinishSend, to)
    }

    /// Wait for all posted receives from the given worker.
    pub fn finish_receive(
        &mut self,
        from: WorkerId,
    ) -> Result<(), Error> {
        self.append_control(OpCode::NetworkFinishReceive, from)
    }

    pub fn print_stats(&mut self) -> Result<(), Error> {
        self.append_control(OpCode::PrintStats, 0)
    }

    pub fn start_timer(&mut self) -> Result<(), Error> {
        self.append_control(OpCode::StartTimer, 0)
    }

    pub fn stop_timer(&mut self) -> Result<(), Error> {
        self.append_control(OpCode::StopTimer, 0)
    }

    /// Records the placer's page count in the header and closes the file.
    pub fn finish(mut self) -> Result<ProgramFileHeader, Error> {
        self.writer.set_page_count(self.placer.num_pages());
        self.writer.finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        progfile::VirtProgramReader,
        protocol::plaintext_operand_size,
    };

    fn scratch(tag: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("golem-program-{}-{}", tag, std::process::id()));
        path
    }

    #[test]
    fn commit_places_outputs_and_flags_fresh_pages() {
        let path = scratch("commit");
        let mut program =
            Program::create(&path, 6, plaintext_operand_size, "plaintext").unwrap();

        let instr = program.instruction();
        instr.set_opcode(OpCode::Input);
        instr.width = 16;
        let first = program.commit_instruction(16).unwrap();

        let instr = program.instruction();
        instr.set_opcode(OpCode::Input);
        instr.width = 16;
        let second = program.commit_instruction(16).unwrap();

        assert_ne!(first, second);
        let header = program.finish().unwrap();
        assert_eq!(header.num_instructions, 2);
        assert_eq!(header.num_pages, 1);

        let mut reader = VirtProgramReader::open(&path, true).unwrap();
        let a = reader.next_instruction().unwrap();
        let b = reader.next_instruction().unwrap();
        assert!(a.flags & FLAG_OUTPUT_PAGE_FIRST_USE != 0);
        assert!(b.flags & FLAG_OUTPUT_PAGE_FIRST_USE == 0);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn refusal_is_fatal() {
        let path = scratch("refusal");
        let program = Program::create(&path, 6, plaintext_operand_size, "plaintext").unwrap();
        let err = program
            .operand_size(8, OperandType::DenormalizedCiphertext)
            .unwrap_err();
        match err {
            Error::PlacementRefused { protocol, .. } => assert_eq!(protocol, "plaintext"),
            other => panic!("unexpected error: {:?}", other),
        }
        drop(program);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn network_data_movement_names_the_peer() {
        let path = scratch("network");
        let mut program =
            Program::create(&path, 6, plaintext_operand_size, "plaintext").unwrap();

        let instr = program.instruction();
        instr.set_opcode(OpCode::Input);
        instr.width = 16;
        let addr = program.commit_instruction(16).unwrap();

        program.buffer_send(2, addr, 16).unwrap();
        program.post_receive(5, addr, 16).unwrap();
        program.finish().unwrap();

        let mut reader = VirtProgramReader::open(&path, true).unwrap();
        reader.next_instruction().unwrap();
        let send = reader.next_instruction().unwrap();
        assert_eq!(send.opcode(), OpCode::NetworkBufferSend);
        assert_eq!(send.constant, 2);
        assert_eq!(send.output, addr);
        let receive = reader.next_instruction().unwrap();
        assert_eq!(receive.opcode(), OpCode::NetworkPostReceive);
        assert_eq!(receive.constant, 5);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn control_instructions_have_opaque_payloads() {
        let path = scratch("control");
        let mut program =
            Program::create(&path, 6, plaintext_operand_size, "plaintext").unwrap();
        program.start_timer().unwrap();
        program.finish_send(3).unwrap();
        program.finish_receive(7).unwrap();
        program.stop_timer().unwrap();
        program.finish().unwrap();

        let mut reader = VirtProgramReader::open(&path, true).unwrap();
        assert_eq!(reader.next_instruction().unwrap().opcode(), OpCode::StartTimer);
        let send = reader.next_instruction().unwrap();
        assert_eq!(send.opcode(), OpCode::NetworkFinishSend);
        assert_eq!(send.data, 3);
        let receive = reader.next_instruction().unwrap();
        assert_eq!(receive.opcode(), OpCode::NetworkFinishReceive);
        assert_eq!(receive.data, 7);
        std::fs::remove_file(&path).unwrap();
    }
}
