//! A small typed front-end over the program writer: secret little-endian
//! integers whose operations emit virtual bytecode. Each value owns one
//! placement in the virtual address space and must be recycled (or emitted
//! as an output) when it goes out of use.
//!
//! The program writer is threaded through every operation explicitly; there
//! is no ambient "current program".

use crate::{
    addr::VirtAddr,
    error::Error,
    instr::BitWidth,
    opcode::{
        OpCode,
        FLAG_EVALUATOR_INPUT,
    },
    place::{
        OperandType,
        Placer,
    },
    program::Program,
};


#[derive(Copy, Clone, Debug)]
pub struct SecretInt {
    addr:  VirtAddr,
    width: BitWidth,
}

impl SecretInt {
    pub fn addr(&self) -> VirtAddr {
        self.addr
    }

    pub fn width(&self) -> BitWidth {
        self.width
    }

    /// Reads one party's next `width`-bit input value.
    pub fn input<P: Placer>(
        program: &mut Program<P>,
        width: BitWidth,
        evaluator: bool,
    ) -> Result<Self, Error> {
        let alloc = program.operand_size(width as u64, OperandType::Ciphertext)?;
        let instr = program.instruction();
        instr.set_opcode(OpCode::Input);
        instr.width = width;
        if evaluator {
            instr.flags |= FLAG_EVALUATOR_INPUT;
        }
        let addr = program.commit_instruction(alloc)?;
        Ok(Self { addr, width })
    }

    /// A public constant known to every party.
    pub fn constant<P: Placer>(
        program: &mut Program<P>,
        width: BitWidth,
        value: u64,
    ) -> Result<Self, Error> {
        let alloc = program.operand_size(width as u64, OperandType::Ciphertext)?;
        let instr = program.instruction();
        instr.set_opcode(OpCode::PublicConstant);
        instr.width = width;
        instr.constant = value;
        let addr = program.commit_instruction(alloc)?;
        Ok(Self { addr, width })
    }

    fn unary_op<P: Placer>(
        program: &mut Program<P>,
        op: OpCode,
        input: &SecretInt,
    ) -> Result<Self, Error> {
        let info = op.info();
        let width = input.width;
        let out_bits = if info.single_bit_output() { 1 } else { width };
        let alloc = program.operand_size(out_bits as u64, OperandType::Ciphertext)?;

        let instr = program.instruction();
        instr.set_opcode(op);
        instr.width = width;
        instr.input1 = input.addr;
        let addr = program.commit_instruction(alloc)?;
        Ok(Self {
            addr,
            width: out_bits,
        })
    }

    fn binary_op<P: Placer>(
        program: &mut Program<P>,
        op: OpCode,
        input1: &SecretInt,
        input2: &SecretInt,
    ) -> Result<Self, Error> {
        debug_assert_eq!(input1.width, input2.width, "operand widths must agree");
        let info = op.info();
        let width = input1.width;
        let out_bits = if info.single_bit_output() { 1 } else { width };
        let alloc = program.operand_size(out_bits as u64, OperandType::Ciphertext)?;

        let instr = program.instruction();
        instr.set_opcode(op);
        instr.width = width;
        instr.input1 = input1.addr;
        instr.input2 = input2.addr;
        let addr = program.commit_instruction(alloc)?;
        Ok(Self {
            addr,
            width: out_bits,
        })
    }

    pub fn add<P: Placer>(
        program: &mut Program<P>,
        a: &SecretInt,
        b: &SecretInt,
    ) -> Result<Self, Error> {
        Self::binary_op(program, OpCode::IntAdd, a, b)
    }

    pub fn sub<P: Placer>(
        program: &mut Program<P>,
        a: &SecretInt,
        b: &SecretInt,
    ) -> Result<Self, Error> {
        Self::binary_op(program, OpCode::IntSub, a, b)
    }

    pub fn multiply<P: Placer>(
        program: &mut Program<P>,
        a: &SecretInt,
        b: &SecretInt,
    ) -> Result<Self, Error> {
        Self::binary_op(program, OpCode::IntMultiply, a, b)
    }

    pub fn bit_and<P: Placer>(
        program: &mut Program<P>,
        a: &SecretInt,
        b: &SecretInt,
    ) -> Result<Self, Error> {
        Self::binary_op(program, OpCode::BitAnd, a, b)
    }

    pub fn bit_or<P: Placer>(
        program: &mut Program<P>,
        a: &SecretInt,
        b: &SecretInt,
    ) -> Result<Self, Error> {
        Self::binary_op(program, OpCode::BitOr, a, b)
    }

    pub fn bit_xor<P: Placer>(
        program: &mut Program<P>,
        a: &SecretInt,
        b: &SecretInt,
    ) -> Result<Self, Error> {
        Self::binary_op(program, OpCode::BitXor, a, b)
    }

    pub fn bit_not<P: Placer>(
        program: &mut Program<P>,
        input: &SecretInt,
    ) -> Result<Self, Error> {
        Self::unary_op(program, OpCode::BitNot, input)
    }

    pub fn copy<P: Placer>(
        program: &mut Program<P>,
        input: &SecretInt,
    ) -> Result<Self, Error> {
        Self::unary_op(program, OpCode::Copy, input)
    }

    /// Single-bit result of the unsigned comparison `a < b`.
    pub fn less<P: Placer>(
        program: &mut Program<P>,
        a: &SecretInt,
        b: &SecretInt,
    ) -> Result<Self, Error> {
        Self::binary_op(program, OpCode::IntLess, a, b)
    }

    pub fn equal<P: Placer>(
        program: &mut Program<P>,
        a: &SecretInt,
        b: &SecretInt,
    ) -> Result<Self, Error> {
        Self::binary_op(program, OpCode::Equal, a, b)
    }

    pub fn is_zero<P: Placer>(
        program: &mut Program<P>,
        input: &SecretInt,
    ) -> Result<Self, Error> {
        Self::unary_op(program, OpCode::IsZero, input)
    }

    pub fn non_zero<P: Placer>(
        program: &mut Program<P>,
        input: &SecretInt,
    ) -> Result<Self, Error> {
        Self::unary_op(program, OpCode::NonZero, input)
    }

    /// `selector ? a : b`, element-wise over `a.width` bits.
    pub fn select<P: Placer>(
        program: &mut Program<P>,
        selector: &SecretInt,
        a: &SecretInt,
        b: &SecretInt,
    ) -> Result<Self, Error> {
        debug_assert_eq!(a.width, b.width);
        debug_assert_eq!(selector.width, 1);
        let alloc = program.operand_size(a.width as u64, OperandType::Ciphertext)?;

        let instr = program.instruction();
        instr.set_opcode(OpCode::ValueSelect);
        instr.width = a.width;
        instr.input1 = a.addr;
        instr.input2 = b.addr;
        instr.input3 = selector.addr;
        let addr = program.commit_instruction(alloc)?;
        Ok(Self {
            addr,
            width: a.width,
        })
    }

    /// Reveals this value in the protocol's output stream. The placement is
    /// not recycled; call `recycle` afterwards if the value is dead.
    pub fn output<P: Placer>(
        &self,
        program: &mut Program<P>,
    ) -> Result<(), Error> {
        let instr = program.instruction();
        instr.set_opcode(OpCode::Output);
        instr.width = self.width;
        instr.output = self.addr;
        program.commit_instruction(0)?;
        Ok(())
    }

    /// Returns this value's placement for reuse; the value must not be used
    /// afterwards.
    pub fn recycle<P: Placer>(
        self,
        program: &mut Program<P>,
    ) -> Result<(), Error> {
        let alloc = program.operand_size(self.width as u64, OperandType::Ciphertext)?;
        program.recycle(self.addr, alloc);
        Ok(())
    }
}
