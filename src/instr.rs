//! Instruction encoding for golem's bytecodes.
//!
//! Instructions are serialized as a two-byte header (opcode, flags) followed
//! by a format-dependent payload. Address fields occupy exactly the number of
//! bytes implied by the address space the bytecode targets: 56-bit addresses
//! in virtual bytecode, 40-bit memory and 48-bit storage addresses in
//! physical bytecode. All multi-byte fields are little-endian.

use std::fmt;
use std::io;

use crate::{
    addr::{
        pg_num,
        pg_set_num,
        PageShift,
    },
    opcode::{
        InstructionFormat,
        OpCode,
    },
};

pub type BitWidth = u16;

/// Upper bound on the number of distinct pages one instruction can touch
/// (one output plus up to three inputs, with one slot of slack).
pub const MAX_INSTRUCTION_PAGES: usize = 5;


/// Address-field widths for one of the two bytecode dialects.
pub trait AddressSpace {
    /// Bytes used to encode a memory address.
    const ADDR_BYTES: usize;
    /// Bytes used to encode a storage (swap device) address.
    const STORAGE_BYTES: usize;
}

/// 56-bit addresses; swap directives never appear, so the storage width
/// mirrors the address width.
pub enum VirtSpace {}

/// 40-bit memory addresses and 48-bit storage addresses.
pub enum PhysSpace {}

impl AddressSpace for VirtSpace {
    const ADDR_BYTES: usize = 7;
    const STORAGE_BYTES: usize = 7;
}

impl AddressSpace for PhysSpace {
    const ADDR_BYTES: usize = 5;
    const STORAGE_BYTES: usize = 6;
}


/// Logical instruction record. This is the working representation used by
/// the planner stages and the engine; `pack`/`unpack` translate between this
/// and the serialized form.
///
/// Field use depends on the instruction format: `output` holds the output
/// address for argument-bearing formats and the memory page number for the
/// swap formats; `storage` holds the storage page number for the swap format;
/// `data` holds the opaque payload of control instructions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Instruction {
    pub operation: u8,
    pub flags:     u8,
    pub width:     BitWidth,
    pub output:    u64,
    pub input1:    u64,
    pub input2:    u64,
    pub input3:    u64,
    pub constant:  u64,
    pub storage:   u64,
    pub data:      u32,
}

const HEADER_BYTES: usize = 2;
const WIDTH_BYTES: usize = 2;
const CONSTANT_BYTES: usize = 8;
const CONTROL_BYTES: usize = 4;


fn write_uint(
    buf: &mut [u8],
    value: u64,
    nbytes: usize,
) {
    buf[..nbytes].copy_from_slice(&value.to_le_bytes()[..nbytes]);
}

fn read_uint(
    buf: &[u8],
    nbytes: usize,
) -> u64 {
    let mut bytes = [0u8; 8];
    bytes[..nbytes].copy_from_slice(&buf[..nbytes]);
    u64::from_le_bytes(bytes)
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "truncated instruction record")
}


/// Size, in bytes, of an encoded instruction of the given format in the
/// given address space.
pub fn packed_size<S: AddressSpace>(format: InstructionFormat) -> usize {
    let a = S::ADDR_BYTES;
    HEADER_BYTES
        + match format {
            InstructionFormat::NoArgs => WIDTH_BYTES + a,
            InstructionFormat::OneArg => WIDTH_BYTES + 2 * a,
            InstructionFormat::TwoArgs => WIDTH_BYTES + 3 * a,
            InstructionFormat::ThreeArgs => WIDTH_BYTES + 4 * a,
            InstructionFormat::Constant => WIDTH_BYTES + a + CONSTANT_BYTES,
            InstructionFormat::Swap => a + S::STORAGE_BYTES,
            InstructionFormat::SwapFinish => a,
            InstructionFormat::Control => CONTROL_BYTES,
        }
}

/// Size of the largest instruction encoding in the given address space; the
/// streaming readers and writers reserve this much per record.
pub fn max_packed_size<S: AddressSpace>() -> usize {
    packed_size::<S>(InstructionFormat::ThreeArgs)
}

impl Instruction {
    pub fn opcode(&self) -> OpCode {
        // The operation byte is only ever set from an OpCode, so decoding
        // cannot fail here.
        OpCode::from_byte(self.operation).unwrap_or(OpCode::Undefined)
    }

    pub fn set_opcode(
        &mut self,
        op: OpCode,
    ) {
        self.operation = op as u8;
    }

    pub fn clear(&mut self) {
        *self = Instruction::default();
    }

    pub fn packed_size<S: AddressSpace>(&self) -> usize {
        packed_size::<S>(self.opcode().info().format())
    }

    /// Serializes this instruction into `buf`, returning the number of bytes
    /// written. `buf` must be at least `self.packed_size::<S>()` bytes.
    pub fn pack<S: AddressSpace>(
        &self,
        buf: &mut [u8],
    ) -> usize {
        let format = self.opcode().info().format();
        let a = S::ADDR_BYTES;

        buf[0] = self.operation;
        buf[1] = self.flags;
        let mut at = HEADER_BYTES;

        match format {
            InstructionFormat::NoArgs
            | InstructionFormat::OneArg
            | InstructionFormat::TwoArgs
            | InstructionFormat::ThreeArgs => {
                write_uint(&mut buf[at..], self.width as u64, WIDTH_BYTES);
                at += WIDTH_BYTES;
                write_uint(&mut buf[at..], self.output, a);
                at += a;
                let inputs = [self.input1, self.input2, self.input3];
                for input in inputs.iter().take(format.num_args()) {
                    write_uint(&mut buf[at..], *input, a);
                    at += a;
                }
            }
            InstructionFormat::Constant => {
                write_uint(&mut buf[at..], self.width as u64, WIDTH_BYTES);
                at += WIDTH_BYTES;
                write_uint(&mut buf[at..], self.output, a);
                at += a;
                write_uint(&mut buf[at..], self.constant, CONSTANT_BYTES);
                at += CONSTANT_BYTES;
            }
            InstructionFormat::Swap => {
                write_uint(&mut buf[at..], self.output, a);
                at += a;
                write_uint(&mut buf[at..], self.storage, S::STORAGE_BYTES);
                at += S::STORAGE_BYTES;
            }
            InstructionFormat::SwapFinish => {
                write_uint(&mut buf[at..], self.output, a);
                at += a;
            }
            InstructionFormat::Control => {
                write_uint(&mut buf[at..], self.data as u64, CONTROL_BYTES);
                at += CONTROL_BYTES;
            }
        }

        at
    }

    /// Deserializes one instruction from the front of `buf`, returning the
    /// instruction and the number of bytes consumed.
    pub fn unpack<S: AddressSpace>(buf: &[u8]) -> io::Result<(Instruction, usize)> {
        if buf.len() < HEADER_BYTES {
            return Err(truncated());
        }

        let op = OpCode::from_byte(buf[0]).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown opcode byte {:#04x}", buf[0]),
            )
        })?;

        let format = op.info().format();
        let size = packed_size::<S>(format);
        if buf.len() < size {
            return Err(truncated());
        }

        let a = S::ADDR_BYTES;
        let mut instr = Instruction {
            operation: buf[0],
            flags: buf[1],
            ..Instruction::default()
        };
        let mut at = HEADER_BYTES;

        match format {
            InstructionFormat::NoArgs
            | InstructionFormat::OneArg
            | InstructionFormat::TwoArgs
            | InstructionFormat::ThreeArgs => {
                instr.width = read_uint(&buf[at..], WIDTH_BYTES) as BitWidth;
                at += WIDTH_BYTES;
                instr.output = read_uint(&buf[at..], a);
                at += a;
                let num_args = format.num_args();
                if num_args > 0 {
                    instr.input1 = read_uint(&buf[at..], a);
                    at += a;
                }
                if num_args > 1 {
                    instr.input2 = read_uint(&buf[at..], a);
                    at += a;
                }
                if num_args > 2 {
                    instr.input3 = read_uint(&buf[at..], a);
                    at += a;
                }
            }
            InstructionFormat::Constant => {
                instr.width = read_uint(&buf[at..], WIDTH_BYTES) as BitWidth;
                at += WIDTH_BYTES;
                instr.output = read_uint(&buf[at..], a);
                at += a;
                instr.constant = read_uint(&buf[at..], CONSTANT_BYTES);
                at += CONSTANT_BYTES;
            }
            InstructionFormat::Swap => {
                instr.output = read_uint(&buf[at..], a);
                at += a;
                instr.storage = read_uint(&buf[at..], S::STORAGE_BYTES);
                at += S::STORAGE_BYTES;
            }
            InstructionFormat::SwapFinish => {
                instr.output = read_uint(&buf[at..], a);
                at += a;
            }
            InstructionFormat::Control => {
                instr.data = read_uint(&buf[at..], CONTROL_BYTES) as u32;
                at += CONTROL_BYTES;
            }
        }

        debug_assert_eq!(at, size);
        Ok((instr, size))
    }

    /// Collects the distinct page numbers referenced by this instruction's
    /// address operands: the output page first, then input pages in
    /// declaration order, skipping any that repeat an earlier entry. Returns
    /// the number of pages stored. Formats without translatable addresses
    /// store nothing.
    pub fn store_page_numbers(
        &self,
        page_shift: PageShift,
        into: &mut [u64; MAX_INSTRUCTION_PAGES],
    ) -> usize {
        let format = self.opcode().info().format();
        if !format.has_addresses() {
            return 0;
        }

        let num_args = format.num_args();
        let mut num_pages = 0;

        let output_pn = pg_num(self.output, page_shift);
        into[num_pages] = output_pn;
        num_pages += 1;

        let inputs = [self.input1, self.input2, self.input3];
        for input in inputs.iter().take(num_args) {
            let pn = pg_num(*input, page_shift);
            if !into[..num_pages].contains(&pn) {
                into[num_pages] = pn;
                num_pages += 1;
            }
        }

        num_pages
    }

    /// Builds the translated counterpart of this instruction: page numbers
    /// come from `from` (in the same dedup order produced by
    /// `store_page_numbers`), page offsets come from this instruction.
    ///
    /// Must not be called on swap-format instructions; they are introduced
    /// after translation and never translated themselves.
    pub fn restore_page_numbers(
        &self,
        page_shift: PageShift,
        from: &[u64],
    ) -> Instruction {
        let format = self.opcode().info().format();
        let mut restored = Instruction {
            operation: self.operation,
            flags: self.flags,
            width: self.width,
            ..Instruction::default()
        };

        match format {
            InstructionFormat::NoArgs
            | InstructionFormat::OneArg
            | InstructionFormat::TwoArgs
            | InstructionFormat::ThreeArgs
            | InstructionFormat::Constant => {
                let num_args = format.num_args();
                let mut num_pages = 0;

                let output_pn = pg_num(self.output, page_shift);
                let output_new = from[num_pages];
                num_pages += 1;
                restored.output = pg_set_num(self.output, output_new, page_shift);

                let inputs = [self.input1, self.input2, self.input3];
                let mut seen = [(output_pn, output_new); 4];
                let mut num_seen = 1;
                let mut translated = [0u64; 3];
                for (j, input) in inputs.iter().take(num_args).enumerate() {
                    let pn = pg_num(*input, page_shift);
                    let new_pn = match seen[..num_seen].iter().find(|(old, _)| *old == pn) {
                        Some((_, new)) => *new,
                        None => {
                            let new = from[num_pages];
                            num_pages += 1;
                            seen[num_seen] = (pn, new);
                            num_seen += 1;
                            new
                        }
                    };
                    translated[j] = pg_set_num(*input, new_pn, page_shift);
                }
                restored.input1 = translated[0];
                restored.input2 = translated[1];
                restored.input3 = translated[2];

                if format.uses_constant() {
                    restored.constant = self.constant;
                }
            }
            InstructionFormat::Control => {
                restored.data = self.data;
            }
            InstructionFormat::Swap | InstructionFormat::SwapFinish => {
                unreachable!("swap instructions are not address-translated");
            }
        }

        restored
    }
}

impl fmt::Display for Instruction {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        let op = self.opcode();
        write!(f, "{}", op.name())?;
        match op.info().format() {
            InstructionFormat::NoArgs => write!(f, "<{}>({})", self.width, self.output),
            InstructionFormat::OneArg => {
                write!(f, "<{}>({}, {})", self.width, self.output, self.input1)
            }
            InstructionFormat::TwoArgs => {
                write!(
                    f,
                    "<{}>({}, {}, {})",
                    self.width, self.output, self.input1, self.input2
                )
            }
            InstructionFormat::ThreeArgs => {
                write!(
                    f,
                    "<{}>({}, {}, {}, {})",
                    self.width, self.output, self.input1, self.input2, self.input3
                )
            }
            InstructionFormat::Constant => write!(f, "({}, {})", self.output, self.constant),
            InstructionFormat::Swap => write!(f, "({}, {})", self.output, self.storage),
            InstructionFormat::SwapFinish => write!(f, "({})", self.output),
            InstructionFormat::Control => write!(f, "({})", self.data),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{
        INVALID_PADDR,
        INVALID_SADDR,
        INVALID_VADDR,
    };

    // Small deterministic generator so the round-trip test sweeps many field
    // values without pulling in an RNG dependency.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            self.0
        }
    }

    fn arbitrary_instruction(
        op: OpCode,
        gen: &mut Lcg,
        addr_mask: u64,
        storage_mask: u64,
    ) -> Instruction {
        let mut instr = Instruction::default();
        instr.set_opcode(op);
        instr.flags = (gen.next() & 0xff) as u8;
        instr.width = (gen.next() & 0xffff) as BitWidth;
        instr.output = gen.next() & addr_mask;
        instr.input1 = gen.next() & addr_mask;
        instr.input2 = gen.next() & addr_mask;
        instr.input3 = gen.next() & addr_mask;
        instr.constant = gen.next();
        instr.storage = gen.next() & storage_mask;
        instr.data = gen.next() as u32;
        instr
    }

    fn normalize(
        mut instr: Instruction,
        format: InstructionFormat,
    ) -> Instruction {
        // Zero the fields the format does not encode, so that the comparison
        // after a round trip is meaningful.
        match format {
            InstructionFormat::NoArgs => {
                instr.input1 = 0;
                instr.input2 = 0;
                instr.input3 = 0;
                instr.constant = 0;
                instr.storage = 0;
                instr.data = 0;
            }
            InstructionFormat::OneArg => {
                instr.input2 = 0;
                instr.input3 = 0;
                instr.constant = 0;
                instr.storage = 0;
                instr.data = 0;
            }
            InstructionFormat::TwoArgs => {
                instr.input3 = 0;
                instr.constant = 0;
                instr.storage = 0;
                instr.data = 0;
            }
            InstructionFormat::ThreeArgs => {
                instr.constant = 0;
                instr.storage = 0;
                instr.data = 0;
            }
            InstructionFormat::Constant => {
                instr.input1 = 0;
                instr.input2 = 0;
                instr.input3 = 0;
                instr.storage = 0;
                instr.data = 0;
            }
            InstructionFormat::Swap => {
                instr.width = 0;
                instr.input1 = 0;
                instr.input2 = 0;
                instr.input3 = 0;
                instr.constant = 0;
                instr.data = 0;
            }
            InstructionFormat::SwapFinish => {
                instr.width = 0;
                instr.input1 = 0;
                instr.input2 = 0;
                instr.input3 = 0;
                instr.constant = 0;
                instr.storage = 0;
                instr.data = 0;
            }
            InstructionFormat::Control => {
                instr.width = 0;
                instr.output = 0;
                instr.input1 = 0;
                instr.input2 = 0;
                instr.input3 = 0;
                instr.constant = 0;
                instr.storage = 0;
            }
        }
        instr
    }

    fn round_trip_space<S: AddressSpace>(
        addr_mask: u64,
        storage_mask: u64,
    ) {
        let mut gen = Lcg(0x5eed);
        let mut buf = [0u8; 64];
        for op in OpCode::all().iter().copied() {
            if op == OpCode::Undefined {
                continue;
            }
            for _ in 0..32 {
                let format = op.info().format();
                let original =
                    normalize(arbitrary_instruction(op, &mut gen, addr_mask, storage_mask), format);
                let written = original.pack::<S>(&mut buf);
                assert_eq!(written, packed_size::<S>(format), "packed size mismatch for {}", op);

                let (decoded, consumed) = Instruction::unpack::<S>(&buf[..written]).unwrap();
                assert_eq!(consumed, written);
                assert_eq!(decoded, original, "round trip mismatch for {}", op);
            }
        }
    }

    #[test]
    fn round_trip_virtual() {
        round_trip_space::<VirtSpace>(INVALID_VADDR, INVALID_VADDR);
    }

    #[test]
    fn round_trip_physical() {
        round_trip_space::<PhysSpace>(INVALID_PADDR, INVALID_SADDR);
    }

    #[test]
    fn unpack_rejects_garbage() {
        let buf = [0xfeu8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(Instruction::unpack::<VirtSpace>(&buf).is_err());
        assert!(Instruction::unpack::<VirtSpace>(&buf[..1]).is_err());
    }

    #[test]
    fn store_page_numbers_dedups_in_order() {
        let shift: PageShift = 6;
        let mut instr = Instruction::default();
        instr.set_opcode(OpCode::ValueSelect);
        instr.output = 64 * 3 + 5;
        instr.input1 = 64 * 7;
        instr.input2 = 64 * 3 + 9; // same page as the output
        instr.input3 = 64 * 7 + 1; // same page as input1

        let mut pages = [0u64; MAX_INSTRUCTION_PAGES];
        let n = instr.store_page_numbers(shift, &mut pages);
        assert_eq!(n, 2);
        assert_eq!(&pages[..n], &[3, 7]);
    }

    #[test]
    fn swap_formats_store_nothing() {
        let mut instr = Instruction::default();
        instr.set_opcode(OpCode::IssueSwapIn);
        instr.output = 10;
        instr.storage = 20;
        let mut pages = [0u64; MAX_INSTRUCTION_PAGES];
        assert_eq!(instr.store_page_numbers(12, &mut pages), 0);
    }

    #[test]
    fn restore_follows_dedup_order() {
        let shift: PageShift = 6;
        let mut instr = Instruction::default();
        instr.set_opcode(OpCode::ValueSelect);
        instr.width = 8;
        instr.output = 64 * 3 + 5;
        instr.input1 = 64 * 7 + 2;
        instr.input2 = 64 * 3 + 9;
        instr.input3 = 64 * 9;

        let mut pages = [0u64; MAX_INSTRUCTION_PAGES];
        let n = instr.store_page_numbers(shift, &mut pages);
        assert_eq!(n, 3);

        let frames = [100u64, 200, 300];
        let restored = instr.restore_page_numbers(shift, &frames[..]);
        assert_eq!(restored.output, 64 * 100 + 5);
        assert_eq!(restored.input1, 64 * 200 + 2);
        assert_eq!(restored.input2, 64 * 100 + 9);
        assert_eq!(restored.input3, 64 * 300);
        assert_eq!(restored.width, 8);
    }
}
