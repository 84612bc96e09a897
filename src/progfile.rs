//! Reading and writing bytecode files (program files).
//!
//! Every bytecode starts with the same fixed header; the body is a packed
//! sequence of variable-size instructions. Virtual bytecode carries trailing
//! size markers so the annotation stage can iterate it in reverse; physical
//! bytecode and memory programs do not.

use std::{
    fs::{
        File,
        OpenOptions,
    },
    io::{
        Read,
        Write,
    },
    marker::PhantomData,
    os::unix::fs::FileExt,
    path::Path,
};

use crate::{
    addr::{
        InstructionNumber,
        PageShift,
    },
    deps::log::debug,
    error::Error,
    instr::{
        max_packed_size,
        AddressSpace,
        Instruction,
        PhysSpace,
        VirtSpace,
    },
    streams::{
        BufferedReader,
        BufferedWriter,
        ReverseFileReader,
        DEFAULT_BUFFER_SIZE,
    },
};

pub const PROGRAM_HEADER_BYTES: usize = 29;


/// Metadata at the start of every bytecode file: instruction count, page
/// count, swap-page count, maximum concurrent swaps, page shift.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramFileHeader {
    pub num_instructions:     InstructionNumber,
    pub num_pages:            u64,
    pub num_swap_pages:       u64,
    pub max_concurrent_swaps: u32,
    pub page_shift:           PageShift,
}

impl ProgramFileHeader {
    pub fn encode(&self) -> [u8; PROGRAM_HEADER_BYTES] {
        let mut bytes = [0u8; PROGRAM_HEADER_BYTES];
        bytes[0..8].copy_from_slice(&self.num_instructions.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.num_pages.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.num_swap_pages.to_le_bytes());
        bytes[24..28].copy_from_slice(&self.max_concurrent_swaps.to_le_bytes());
        bytes[28] = self.page_shift;
        bytes
    }

    pub fn decode(bytes: &[u8; PROGRAM_HEADER_BYTES]) -> Self {
        let mut u64_at = |at: usize| {
            let mut field = [0u8; 8];
            field.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(field)
        };
        let num_instructions = u64_at(0);
        let num_pages = u64_at(8);
        let num_swap_pages = u64_at(16);
        let mut u32_field = [0u8; 4];
        u32_field.copy_from_slice(&bytes[24..28]);

        Self {
            num_instructions,
            num_pages,
            num_swap_pages,
            max_concurrent_swaps: u32::from_le_bytes(u32_field),
            page_shift: bytes[28],
        }
    }
}


pub struct ProgramFileWriter<S: AddressSpace> {
    writer:            BufferedWriter<File>,
    instruction_count: InstructionNumber,
    page_count:        u64,
    swap_page_count:   u64,
    concurrent_swaps:  u32,
    page_shift:        PageShift,
    _space:            PhantomData<S>,
}

pub type VirtProgramWriter = ProgramFileWriter<VirtSpace>;
pub type PhysProgramWriter = ProgramFileWriter<PhysSpace>;

impl<S: AddressSpace> ProgramFileWriter<S> {
    /// Creates a program file at `path`, reserving space for the header
    /// which is filled in by `finish`.
    pub fn create<P: AsRef<Path>>(
        path: P,
        page_shift: PageShift,
        backwards_readable: bool,
    ) -> Result<Self, Error> {
        debug!("creating program file: {:?}", path.as_ref());
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.write_all(&[0u8; PROGRAM_HEADER_BYTES])?;

        Ok(Self {
            writer: BufferedWriter::new(file, DEFAULT_BUFFER_SIZE, backwards_readable),
            instruction_count: 0,
            page_count: 0,
            swap_page_count: 0,
            concurrent_swaps: 1,
            page_shift,
            _space: PhantomData,
        })
    }

    pub fn num_instructions(&self) -> InstructionNumber {
        self.instruction_count
    }

    pub fn set_page_count(
        &mut self,
        num_pages: u64,
    ) {
        self.page_count = num_pages;
    }

    pub fn set_swap_page_count(
        &mut self,
        num_swap_pages: u64,
    ) {
        self.swap_page_count = num_swap_pages;
    }

    pub fn set_concurrent_swaps(
        &mut self,
        max_concurrent_swaps: u32,
    ) {
        self.concurrent_swaps = max_concurrent_swaps;
    }

    pub fn set_page_shift(
        &mut self,
        page_shift: PageShift,
    ) {
        self.page_shift = page_shift;
    }

    pub fn append(
        &mut self,
        instruction: &Instruction,
    ) -> Result<(), Error> {
        let region = self.writer.start_write(max_packed_size::<S>())?;
        let written = instruction.pack::<S>(region);
        self.writer.finish_write(written);
        self.instruction_count += 1;
        Ok(())
    }

    /// Flushes the body and rewrites the header at the front of the file.
    pub fn finish(self) -> Result<ProgramFileHeader, Error> {
        let header = ProgramFileHeader {
            num_instructions:     self.instruction_count,
            num_pages:            self.page_count,
            num_swap_pages:       self.swap_page_count,
            max_concurrent_swaps: self.concurrent_swaps,
            page_shift:           self.page_shift,
        };

        let file = self.writer.into_inner()?;
        file.write_all_at(&header.encode(), 0)?;
        Ok(header)
    }
}


pub struct ProgramFileReader<S: AddressSpace> {
    reader: BufferedReader<File>,
    header: ProgramFileHeader,
    _space: PhantomData<S>,
}

pub type VirtProgramReader = ProgramFileReader<VirtSpace>;
pub type PhysProgramReader = ProgramFileReader<PhysSpace>;

impl<S: AddressSpace> ProgramFileReader<S> {
    pub fn open<P: AsRef<Path>>(
        path: P,
        backwards_readable: bool,
    ) -> Result<Self, Error> {
        debug!("opening program file: {:?}", path.as_ref());
        let mut file = File::open(path.as_ref())?;
        let mut header_bytes = [0u8; PROGRAM_HEADER_BYTES];
        file.read_exact(&mut header_bytes)?;

        Ok(Self {
            reader: BufferedReader::new(file, DEFAULT_BUFFER_SIZE, backwards_readable),
            header: ProgramFileHeader::decode(&header_bytes),
            _space: PhantomData,
        })
    }

    pub fn header(&self) -> &ProgramFileHeader {
        &self.header
    }

    pub fn next_instruction(&mut self) -> Result<Instruction, Error> {
        let buf = self.reader.start_read(max_packed_size::<S>())?;
        let (instruction, size) = Instruction::unpack::<S>(buf)?;
        self.reader.finish_read(size);
        Ok(instruction)
    }
}


/// Iterates a backwards-readable program file from the last instruction to
/// the first.
pub struct ProgramReverseFileReader<S: AddressSpace> {
    reader: ReverseFileReader,
    header: ProgramFileHeader,
    _space: PhantomData<S>,
}

pub type VirtProgramReverseReader = ProgramReverseFileReader<VirtSpace>;

impl<S: AddressSpace> ProgramReverseFileReader<S> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        debug!("opening program file for reverse reading: {:?}", path.as_ref());
        let file = File::open(path.as_ref())?;
        let mut header_bytes = [0u8; PROGRAM_HEADER_BYTES];
        file.read_exact_at(&mut header_bytes, 0)?;

        Ok(Self {
            reader: ReverseFileReader::new(file, PROGRAM_HEADER_BYTES as u64, DEFAULT_BUFFER_SIZE)?,
            header: ProgramFileHeader::decode(&header_bytes),
            _space: PhantomData,
        })
    }

    pub fn header(&self) -> &ProgramFileHeader {
        &self.header
    }

    pub fn read_instruction(&mut self) -> Result<Instruction, Error> {
        let record = self.reader.read_record()?;
        let (instruction, size) = Instruction::unpack::<S>(record)?;
        debug_assert_eq!(size, record.len());
        Ok(instruction)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::OpCode;

    fn scratch_path(tag: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("golem-progfile-{}-{}", tag, std::process::id()));
        path
    }

    fn sample_instruction(i: u64) -> Instruction {
        let mut instr = Instruction::default();
        instr.set_opcode(OpCode::BitXor);
        instr.width = 8;
        instr.output = i * 64;
        instr.input1 = i * 64 + 8;
        instr.input2 = i * 64 + 16;
        instr
    }

    #[test]
    fn header_encode_round_trip() {
        let header = ProgramFileHeader {
            num_instructions:     123_456,
            num_pages:            789,
            num_swap_pages:       1011,
            max_concurrent_swaps: 17,
            page_shift:           14,
        };
        assert_eq!(ProgramFileHeader::decode(&header.encode()), header);
    }

    #[test]
    fn write_read_forward_and_reverse() {
        let path = scratch_path("virt");
        let count = 100u64;

        let mut writer = VirtProgramWriter::create(&path, 6, true).unwrap();
        for i in 0..count {
            writer.append(&sample_instruction(i)).unwrap();
        }
        writer.set_page_count(42);
        let header = writer.finish().unwrap();
        assert_eq!(header.num_instructions, count);
        assert_eq!(header.num_pages, 42);

        let mut reader = VirtProgramReader::open(&path, true).unwrap();
        assert_eq!(*reader.header(), header);
        for i in 0..count {
            assert_eq!(reader.next_instruction().unwrap(), sample_instruction(i));
        }

        let mut reverse = VirtProgramReverseReader::open(&path).unwrap();
        for i in (0..count).rev() {
            assert_eq!(reverse.read_instruction().unwrap(), sample_instruction(i));
        }

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn physical_files_have_no_markers() {
        let path = scratch_path("phys");
        let mut writer = PhysProgramWriter::create(&path, 6, false).unwrap();
        let mut swap = Instruction::default();
        swap.set_opcode(OpCode::IssueSwapIn);
        swap.output = 3;
        swap.storage = 9;
        writer.append(&swap).unwrap();
        writer.finish().unwrap();

        let expected = PROGRAM_HEADER_BYTES + crate::instr::packed_size::<PhysSpace>(
            crate::opcode::InstructionFormat::Swap,
        );
        assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, expected);

        let mut reader = PhysProgramReader::open(&path, false).unwrap();
        assert_eq!(reader.next_instruction().unwrap(), swap);
        std::fs::remove_file(&path).unwrap();
    }
}
