//! The closed set of operations appearing in golem bytecodes, and the
//! per-operation metadata (instruction format, output behavior) that the
//! codec and the planner stages consult.

use std::str::FromStr;

use crate::error::Error;


/// Flags stored in the instruction encoding. The lower nybble is reserved
/// for the planner; the upper nybble survives planning unchanged.
pub const FLAG_INPUT1_CONSTANT: u8 = 0x01;
pub const FLAG_INPUT2_CONSTANT: u8 = 0x02;
pub const FLAG_INPUT3_CONSTANT: u8 = 0x04;
pub const FLAG_OUTPUT_PAGE_FIRST_USE: u8 = 0x08;
pub const FLAG_EVALUATOR_INPUT: u8 = 0x10;
pub const FLAG_NOT_NORMALIZED: u8 = 0x20;


#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Undefined = 0,
    PrintStats,
    StartTimer,
    StopTimer,
    IssueSwapIn,
    IssueSwapOut,
    FinishSwapIn,
    FinishSwapOut,
    CopySwap,
    NetworkPostReceive,
    NetworkFinishReceive,
    NetworkBufferSend,
    NetworkFinishSend,
    Input,
    Output,
    PublicConstant,
    Copy,
    IntAdd,
    IntAddWithCarry,
    IntIncrement,
    IntSub,
    IntDecrement,
    IntMultiply,
    IntLess,
    Equal,
    IsZero,
    NonZero,
    BitNot,
    BitAnd,
    BitOr,
    BitXor,
    ValueSelect,
    SwitchLevel,
    AddPlaintext,
    MultiplyPlaintext,
    MultiplyRaw,
    MultiplyPlaintextRaw,
    Renormalize,
    Encode,
}

const ALL_OPCODES: [OpCode; 39] = [
    OpCode::Undefined,
    OpCode::PrintStats,
    OpCode::StartTimer,
    OpCode::StopTimer,
    OpCode::IssueSwapIn,
    OpCode::IssueSwapOut,
    OpCode::FinishSwapIn,
    OpCode::FinishSwapOut,
    OpCode::CopySwap,
    OpCode::NetworkPostReceive,
    OpCode::NetworkFinishReceive,
    OpCode::NetworkBufferSend,
    OpCode::NetworkFinishSend,
    OpCode::Input,
    OpCode::Output,
    OpCode::PublicConstant,
    OpCode::Copy,
    OpCode::IntAdd,
    OpCode::IntAddWithCarry,
    OpCode::IntIncrement,
    OpCode::IntSub,
    OpCode::IntDecrement,
    OpCode::IntMultiply,
    OpCode::IntLess,
    OpCode::Equal,
    OpCode::IsZero,
    OpCode::NonZero,
    OpCode::BitNot,
    OpCode::BitAnd,
    OpCode::BitOr,
    OpCode::BitXor,
    OpCode::ValueSelect,
    OpCode::SwitchLevel,
    OpCode::AddPlaintext,
    OpCode::MultiplyPlaintext,
    OpCode::MultiplyRaw,
    OpCode::MultiplyPlaintextRaw,
    OpCode::Renormalize,
    OpCode::Encode,
];

impl OpCode {
    pub fn from_byte(value: u8) -> Option<OpCode> {
        ALL_OPCODES.get(value as usize).copied()
    }

    pub fn all() -> &'static [OpCode] {
        &ALL_OPCODES[..]
    }

    pub fn name(self) -> &'static str {
        match self {
            OpCode::Undefined => "Undefined",
            OpCode::PrintStats => "PrintStats",
            OpCode::StartTimer => "StartTimer",
            OpCode::StopTimer => "StopTimer",
            OpCode::IssueSwapIn => "IssueSwapIn",
            OpCode::IssueSwapOut => "IssueSwapOut",
            OpCode::FinishSwapIn => "FinishSwapIn",
            OpCode::FinishSwapOut => "FinishSwapOut",
            OpCode::CopySwap => "CopySwap",
            OpCode::NetworkPostReceive => "NetworkPostReceive",
            OpCode::NetworkFinishReceive => "NetworkFinishReceive",
            OpCode::NetworkBufferSend => "NetworkBufferSend",
            OpCode::NetworkFinishSend => "NetworkFinishSend",
            OpCode::Input => "Input",
            OpCode::Output => "Output",
            OpCode::PublicConstant => "PublicConstant",
            OpCode::Copy => "Copy",
            OpCode::IntAdd => "IntAdd",
            OpCode::IntAddWithCarry => "IntAddWithCarry",
            OpCode::IntIncrement => "IntIncrement",
            OpCode::IntSub => "IntSub",
            OpCode::IntDecrement => "IntDecrement",
            OpCode::IntMultiply => "IntMultiply",
            OpCode::IntLess => "IntLess",
            OpCode::Equal => "Equal",
            OpCode::IsZero => "IsZero",
            OpCode::NonZero => "NonZero",
            OpCode::BitNot => "BitNot",
            OpCode::BitAnd => "BitAnd",
            OpCode::BitOr => "BitOr",
            OpCode::BitXor => "BitXor",
            OpCode::ValueSelect => "ValueSelect",
            OpCode::SwitchLevel => "SwitchLevel",
            OpCode::AddPlaintext => "AddPlaintext",
            OpCode::MultiplyPlaintext => "MultiplyPlaintext",
            OpCode::MultiplyRaw => "MultiplyRaw",
            OpCode::MultiplyPlaintextRaw => "MultiplyPlaintextRaw",
            OpCode::Renormalize => "Renormalize",
            OpCode::Encode => "Encode",
        }
    }

    pub fn info(self) -> OpInfo {
        let (format, single_bit, has_output) = match self {
            OpCode::PrintStats | OpCode::StartTimer | OpCode::StopTimer => {
                (InstructionFormat::Control, false, false)
            }
            OpCode::Input => (InstructionFormat::NoArgs, false, true),
            OpCode::Output => (InstructionFormat::NoArgs, false, false),
            OpCode::IssueSwapIn => (InstructionFormat::Swap, false, true),
            OpCode::IssueSwapOut | OpCode::CopySwap => (InstructionFormat::Swap, false, false),
            OpCode::FinishSwapIn | OpCode::FinishSwapOut => {
                (InstructionFormat::SwapFinish, false, false)
            }
            OpCode::NetworkPostReceive => (InstructionFormat::Constant, false, true),
            OpCode::NetworkFinishReceive => (InstructionFormat::Control, false, false),
            OpCode::NetworkBufferSend => (InstructionFormat::Constant, false, false),
            OpCode::NetworkFinishSend => (InstructionFormat::Control, false, false),
            OpCode::PublicConstant | OpCode::Encode => (InstructionFormat::Constant, false, true),
            OpCode::Copy => (InstructionFormat::OneArg, false, true),
            OpCode::IntAdd
            | OpCode::IntAddWithCarry
            | OpCode::IntSub
            | OpCode::IntMultiply
            | OpCode::BitAnd
            | OpCode::BitOr
            | OpCode::BitXor
            | OpCode::AddPlaintext
            | OpCode::MultiplyPlaintext
            | OpCode::MultiplyRaw
            | OpCode::MultiplyPlaintextRaw => (InstructionFormat::TwoArgs, false, true),
            OpCode::IntIncrement
            | OpCode::IntDecrement
            | OpCode::BitNot
            | OpCode::SwitchLevel
            | OpCode::Renormalize => (InstructionFormat::OneArg, false, true),
            OpCode::IntLess | OpCode::Equal => (InstructionFormat::TwoArgs, true, true),
            OpCode::IsZero | OpCode::NonZero => (InstructionFormat::OneArg, true, true),
            OpCode::ValueSelect => (InstructionFormat::ThreeArgs, false, true),
            OpCode::Undefined => (InstructionFormat::NoArgs, false, false),
        };

        OpInfo {
            format,
            single_bit,
            has_output,
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}


/// The eight layouts by which encoded bytes are interpreted as an
/// instruction. Every opcode maps deterministically to exactly one format.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum InstructionFormat {
    NoArgs = 0,
    OneArg = 1,
    TwoArgs = 2,
    ThreeArgs = 3,
    Constant = 4,
    Swap = 5,
    SwapFinish = 6,
    Control = 7,
}

impl InstructionFormat {
    /// Number of input arguments (excluding the output) that require address
    /// translation.
    pub const fn num_args(self) -> usize {
        match self {
            InstructionFormat::NoArgs => 0,
            InstructionFormat::OneArg => 1,
            InstructionFormat::TwoArgs => 2,
            InstructionFormat::ThreeArgs => 3,
            InstructionFormat::Constant
            | InstructionFormat::Swap
            | InstructionFormat::SwapFinish
            | InstructionFormat::Control => 0,
        }
    }

    pub const fn uses_constant(self) -> bool {
        matches!(self, InstructionFormat::Constant)
    }

    /// True for the formats whose operands carry translatable addresses.
    pub const fn has_addresses(self) -> bool {
        !matches!(
            self,
            InstructionFormat::Swap | InstructionFormat::SwapFinish | InstructionFormat::Control
        )
    }
}


#[derive(Copy, Clone, Debug)]
pub struct OpInfo {
    format:     InstructionFormat,
    single_bit: bool,
    has_output: bool,
}

impl OpInfo {
    pub const fn format(&self) -> InstructionFormat {
        self.format
    }

    pub const fn num_args(&self) -> usize {
        self.format.num_args()
    }

    pub const fn uses_constant(&self) -> bool {
        self.format.uses_constant()
    }

    /// True if the operation writes a single logical bit regardless of the
    /// width specified in the instruction.
    pub const fn single_bit_output(&self) -> bool {
        self.single_bit
    }

    /// True if the operation writes data in the golem address space.
    pub const fn has_variable_output(&self) -> bool {
        self.has_output
    }
}


impl FromStr for OpCode {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ALL_OPCODES
            .iter()
            .copied()
            .find(|op| op.name().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| {
                Error::Parse {
                    value:    value.to_string(),
                    typename: std::any::type_name::<OpCode>(),
                    reason:   "value was not the name of any opcode".to_string(),
                }
            })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_round_trip() {
        for (i, op) in OpCode::all().iter().enumerate() {
            assert_eq!(OpCode::from_byte(i as u8), Some(*op));
            assert_eq!(*op as u8, i as u8);
        }
        assert_eq!(OpCode::from_byte(ALL_OPCODES.len() as u8), None);
        assert_eq!(OpCode::from_byte(0xff), None);
    }

    #[test]
    fn formats_are_deterministic() {
        assert_eq!(OpCode::BitAnd.info().format(), InstructionFormat::TwoArgs);
        assert_eq!(OpCode::ValueSelect.info().format(), InstructionFormat::ThreeArgs);
        assert_eq!(OpCode::IssueSwapIn.info().format(), InstructionFormat::Swap);
        assert_eq!(OpCode::FinishSwapOut.info().format(), InstructionFormat::SwapFinish);
        assert_eq!(OpCode::StartTimer.info().format(), InstructionFormat::Control);
        assert_eq!(OpCode::PublicConstant.info().format(), InstructionFormat::Constant);
        assert_eq!(OpCode::Input.info().format(), InstructionFormat::NoArgs);
    }

    #[test]
    fn single_bit_ops() {
        assert!(OpCode::IntLess.info().single_bit_output());
        assert!(OpCode::Equal.info().single_bit_output());
        assert!(OpCode::IsZero.info().single_bit_output());
        assert!(OpCode::NonZero.info().single_bit_output());
        assert!(!OpCode::IntAdd.info().single_bit_output());
    }

    #[test]
    fn parse_from_str() {
        assert_eq!("bitxor".parse::<OpCode>().unwrap(), OpCode::BitXor);
        assert!("NotAnOpcode".parse::<OpCode>().is_err());
    }
}
