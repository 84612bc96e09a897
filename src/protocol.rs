//! The capability set the engine requires of a cryptographic backend, the
//! sizing function the placement stage requires, and the plaintext backend
//! used for functional testing of plans.
//!
//! Every operation receives slices of the backend's wire type carved out of
//! the engine's physical-frame memory; the width of an operation is the
//! length of its slices. Integer operations produce exactly as many result
//! bits as their inputs carry; no operation widens its result.

use std::{
    fs::File,
    io::{
        BufReader,
        BufWriter,
        Read,
        Write,
    },
    path::Path,
};

use crate::{
    deps::log::debug,
    error::Error,
    place::{
        AllocationSize,
        OperandType,
    },
};


/// Sizing half of a protocol plugin: maps a (width-or-level, operand type)
/// pair to its footprint in the operand address spaces, in wires. `None`
/// means the plugin refuses the combination, which is fatal at plan time.
pub type PlacementPlugin = fn(u64, OperandType) -> Option<AllocationSize>;


/// Execution half of a protocol plugin.
pub trait Protocol {
    /// Fixed-size representation of one secure bit or one secure arithmetic
    /// slot in physical memory.
    type Wire: Copy + Default + Send + 'static;

    fn name(&self) -> &'static str;

    /// Reads one party's next input into `data`; `evaluator` selects whose
    /// input stream is consumed.
    fn input(
        &mut self,
        data: &mut [Self::Wire],
        evaluator: bool,
    ) -> Result<(), Error>;

    fn output(
        &mut self,
        data: &[Self::Wire],
    ) -> Result<(), Error>;

    fn zero(
        &self,
        out: &mut Self::Wire,
    );

    fn one(
        &self,
        out: &mut Self::Wire,
    );

    fn op_copy(
        &mut self,
        out: &mut [Self::Wire],
        input: &[Self::Wire],
    );

    fn op_not(
        &mut self,
        out: &mut [Self::Wire],
        input: &[Self::Wire],
    );

    fn op_and(
        &mut self,
        out: &mut [Self::Wire],
        input1: &[Self::Wire],
        input2: &[Self::Wire],
    );

    fn op_or(
        &mut self,
        out: &mut [Self::Wire],
        input1: &[Self::Wire],
        input2: &[Self::Wire],
    );

    fn op_xor(
        &mut self,
        out: &mut [Self::Wire],
        input1: &[Self::Wire],
        input2: &[Self::Wire],
    );

    fn op_xnor(
        &mut self,
        out: &mut [Self::Wire],
        input1: &[Self::Wire],
        input2: &[Self::Wire],
    );

    /// Two's-complement addition over little-endian bit vectors; the final
    /// carry is discarded.
    fn op_add(
        &mut self,
        out: &mut [Self::Wire],
        input1: &[Self::Wire],
        input2: &[Self::Wire],
    );

    fn op_sub(
        &mut self,
        out: &mut [Self::Wire],
        input1: &[Self::Wire],
        input2: &[Self::Wire],
    );

    fn op_increment(
        &mut self,
        out: &mut [Self::Wire],
        input: &[Self::Wire],
    );

    fn op_decrement(
        &mut self,
        out: &mut [Self::Wire],
        input: &[Self::Wire],
    );

    /// Product modulo `2^width`.
    fn op_multiply(
        &mut self,
        out: &mut [Self::Wire],
        input1: &[Self::Wire],
        input2: &[Self::Wire],
    );

    /// Unsigned comparison; writes one result wire.
    fn op_less(
        &mut self,
        out: &mut Self::Wire,
        input1: &[Self::Wire],
        input2: &[Self::Wire],
    );

    fn op_equal(
        &mut self,
        out: &mut Self::Wire,
        input1: &[Self::Wire],
        input2: &[Self::Wire],
    );

    /// AND-reduction of the negated input bits: the result wire is 1 iff
    /// every input bit is 0.
    fn op_is_zero(
        &mut self,
        out: &mut Self::Wire,
        input: &[Self::Wire],
    );

    /// Strict complement of `op_is_zero`.
    fn op_non_zero(
        &mut self,
        out: &mut Self::Wire,
        input: &[Self::Wire],
    );

    /// `out[i] = selector ? input1[i] : input2[i]`.
    fn op_select(
        &mut self,
        out: &mut [Self::Wire],
        input1: &[Self::Wire],
        input2: &[Self::Wire],
        selector: &Self::Wire,
    );

    // Levelled homomorphic encryption surface. Backends for bit-oriented
    // protocols refuse these with a protocol error.

    fn op_encode(
        &mut self,
        out: &mut [Self::Wire],
        constant: u64,
        level: u16,
    ) -> Result<(), Error>;

    fn op_renormalize(
        &mut self,
        out: &mut [Self::Wire],
        input: &[Self::Wire],
    ) -> Result<(), Error>;

    fn op_switch_level(
        &mut self,
        out: &mut [Self::Wire],
        input: &[Self::Wire],
    ) -> Result<(), Error>;

    fn op_add_plaintext(
        &mut self,
        out: &mut [Self::Wire],
        input1: &[Self::Wire],
        input2: &[Self::Wire],
    ) -> Result<(), Error>;

    fn op_multiply_plaintext(
        &mut self,
        out: &mut [Self::Wire],
        input1: &[Self::Wire],
        input2: &[Self::Wire],
    ) -> Result<(), Error>;

    fn op_multiply_raw(
        &mut self,
        out: &mut [Self::Wire],
        input1: &[Self::Wire],
        input2: &[Self::Wire],
    ) -> Result<(), Error>;

    fn op_multiply_plaintext_raw(
        &mut self,
        out: &mut [Self::Wire],
        input1: &[Self::Wire],
        input2: &[Self::Wire],
    ) -> Result<(), Error>;

    fn print_stats(&self) {}
}


fn unsupported(op: &str) -> Error {
    Error::Protocol {
        reason: format!("{} is not supported by the plaintext backend", op),
    }
}


/// Single-bit-at-a-time reader over a packed binary input file.
pub struct BitFileReader {
    reader:    BufReader<File>,
    current:   u8,
    bits_left: u8,
}

impl BitFileReader {
    pub fn open(path: &Path) -> Result<Self, Error> {
        Ok(Self {
            reader:    crate::io::new_buffered_file_reader(path)?,
            current:   0,
            bits_left: 0,
        })
    }

    pub fn read1(&mut self) -> Result<u8, Error> {
        if self.bits_left == 0 {
            let mut byte = [0u8; 1];
            self.reader.read_exact(&mut byte)?;
            self.current = byte[0];
            self.bits_left = 8;
        }
        let bit = self.current & 0x1;
        self.current >>= 1;
        self.bits_left -= 1;
        Ok(bit)
    }
}


/// Single-bit-at-a-time writer producing a packed binary output file.
pub struct BitFileWriter {
    writer:  BufWriter<File>,
    current: u8,
    nbits:   u8,
}

impl BitFileWriter {
    pub fn create(path: &Path) -> Result<Self, Error> {
        debug!("creating output file: {:?}", path);
        Ok(Self {
            writer:  BufWriter::new(File::create(path)?),
            current: 0,
            nbits:   0,
        })
    }

    pub fn write1(
        &mut self,
        bit: u8,
    ) -> Result<(), Error> {
        self.current |= (bit & 0x1) << self.nbits;
        self.nbits += 1;
        if self.nbits == 8 {
            self.writer.write_all(&[self.current])?;
            self.current = 0;
            self.nbits = 0;
        }
        Ok(())
    }

    /// Pads the final partial byte with zeros and flushes.
    pub fn finish(mut self) -> Result<(), Error> {
        if self.nbits != 0 {
            self.writer.write_all(&[self.current])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}


fn bits_to_value(bits: &[u128]) -> u128 {
    debug_assert!(bits.len() <= 128);
    let mut value = 0u128;
    for (i, bit) in bits.iter().enumerate() {
        value |= (bit & 0x1) << i;
    }
    value
}

fn value_to_bits(
    mut value: u128,
    out: &mut [u128],
) {
    for bit in out.iter_mut() {
        *bit = value & 0x1;
        value >>= 1;
    }
}


/// Protocol backend that computes directly on cleartext bits. One wire is a
/// 128-bit word holding 0 or 1; widths up to 128 bits are supported.
pub struct PlaintextProtocol {
    garbler_input:   BitFileReader,
    evaluator_input: BitFileReader,
    output:          BitFileWriter,
}

impl PlaintextProtocol {
    pub fn new(
        garbler_input_file: &Path,
        evaluator_input_file: &Path,
        output_file: &Path,
    ) -> Result<Self, Error> {
        Ok(Self {
            garbler_input:   BitFileReader::open(garbler_input_file)?,
            evaluator_input: BitFileReader::open(evaluator_input_file)?,
            output:          BitFileWriter::create(output_file)?,
        })
    }

    pub fn finish(self) -> Result<(), Error> {
        self.output.finish()
    }
}

/// Sizing function for the plaintext backend: one wire per logical bit,
/// regardless of level. Denormalized ciphertexts do not exist here.
pub fn plaintext_operand_size(
    logical_width: u64,
    operand: OperandType,
) -> Option<AllocationSize> {
    match operand {
        OperandType::Ciphertext | OperandType::Plaintext => Some(logical_width),
        OperandType::DenormalizedCiphertext => None,
    }
}

impl Protocol for PlaintextProtocol {
    type Wire = u128;

    fn name(&self) -> &'static str {
        "plaintext"
    }

    fn input(
        &mut self,
        data: &mut [u128],
        evaluator: bool,
    ) -> Result<(), Error> {
        let reader = if evaluator { &mut self.evaluator_input } else { &mut self.garbler_input };
        for wire in data.iter_mut() {
            *wire = reader.read1()? as u128;
        }
        Ok(())
    }

    fn output(
        &mut self,
        data: &[u128],
    ) -> Result<(), Error> {
        for wire in data.iter() {
            self.output.write1((*wire & 0x1) as u8)?;
        }
        Ok(())
    }

    fn zero(
        &self,
        out: &mut u128,
    ) {
        *out = 0;
    }

    fn one(
        &self,
        out: &mut u128,
    ) {
        *out = 1;
    }

    fn op_copy(
        &mut self,
        out: &mut [u128],
        input: &[u128],
    ) {
        out.copy_from_slice(input);
    }

    fn op_not(
        &mut self,
        out: &mut [u128],
        input: &[u128],
    ) {
        for (o, i) in out.iter_mut().zip(input.iter()) {
            *o = (!i) & 0x1;
        }
    }

    fn op_and(
        &mut self,
        out: &mut [u128],
        input1: &[u128],
        input2: &[u128],
    ) {
        for ((o, a), b) in out.iter_mut().zip(input1.iter()).zip(input2.iter()) {
            *o = a & b;
        }
    }

    fn op_or(
        &mut self,
        out: &mut [u128],
        input1: &[u128],
        input2: &[u128],
    ) {
        for ((o, a), b) in out.iter_mut().zip(input1.iter()).zip(input2.iter()) {
            *o = (a | b) & 0x1;
        }
    }

    fn op_xor(
        &mut self,
        out: &mut [u128],
        input1: &[u128],
        input2: &[u128],
    ) {
        for ((o, a), b) in out.iter_mut().zip(input1.iter()).zip(input2.iter()) {
            *o = (a ^ b) & 0x1;
        }
    }

    fn op_xnor(
        &mut self,
        out: &mut [u128],
        input1: &[u128],
        input2: &[u128],
    ) {
        for ((o, a), b) in out.iter_mut().zip(input1.iter()).zip(input2.iter()) {
            *o = (!(a ^ b)) & 0x1;
        }
    }

    fn op_add(
        &mut self,
        out: &mut [u128],
        input1: &[u128],
        input2: &[u128],
    ) {
        let sum = bits_to_value(input1).wrapping_add(bits_to_value(input2));
        value_to_bits(sum, out);
    }

    fn op_sub(
        &mut self,
        out: &mut [u128],
        input1: &[u128],
        input2: &[u128],
    ) {
        let difference = bits_to_value(input1).wrapping_sub(bits_to_value(input2));
        value_to_bits(difference, out);
    }

    fn op_increment(
        &mut self,
        out: &mut [u128],
        input: &[u128],
    ) {
        value_to_bits(bits_to_value(input).wrapping_add(1), out);
    }

    fn op_decrement(
        &mut self,
        out: &mut [u128],
        input: &[u128],
    ) {
        value_to_bits(bits_to_value(input).wrapping_sub(1), out);
    }

    fn op_multiply(
        &mut self,
        out: &mut [u128],
        input1: &[u128],
        input2: &[u128],
    ) {
        let product = bits_to_value(input1).wrapping_mul(bits_to_value(input2));
        value_to_bits(product, out);
    }

    fn op_less(
        &mut self,
        out: &mut u128,
        input1: &[u128],
        input2: &[u128],
    ) {
        *out = (bits_to_value(input1) < bits_to_value(input2)) as u128;
    }

    fn op_equal(
        &mut self,
        out: &mut u128,
        input1: &[u128],
        input2: &[u128],
    ) {
        *out = (bits_to_value(input1) == bits_to_value(input2)) as u128;
    }

    fn op_is_zero(
        &mut self,
        out: &mut u128,
        input: &[u128],
    ) {
        *out = (bits_to_value(input) == 0) as u128;
    }

    fn op_non_zero(
        &mut self,
        out: &mut u128,
        input: &[u128],
    ) {
        *out = (bits_to_value(input) != 0) as u128;
    }

    fn op_select(
        &mut self,
        out: &mut [u128],
        input1: &[u128],
        input2: &[u128],
        selector: &u128,
    ) {
        let chosen = if selector & 0x1 != 0 { input1 } else { input2 };
        out.copy_from_slice(chosen);
    }

    fn op_encode(
        &mut self,
        _out: &mut [u128],
        _constant: u64,
        _level: u16,
    ) -> Result<(), Error> {
        Err(unsupported("Encode"))
    }

    fn op_renormalize(
        &mut self,
        _out: &mut [u128],
        _input: &[u128],
    ) -> Result<(), Error> {
        Err(unsupported("Renormalize"))
    }

    fn op_switch_level(
        &mut self,
        _out: &mut [u128],
        _input: &[u128],
    ) -> Result<(), Error> {
        Err(unsupported("SwitchLevel"))
    }

    fn op_add_plaintext(
        &mut self,
        out: &mut [u128],
        input1: &[u128],
        input2: &[u128],
    ) -> Result<(), Error> {
        self.op_add(out, input1, input2);
        Ok(())
    }

    fn op_multiply_plaintext(
        &mut self,
        out: &mut [u128],
        input1: &[u128],
        input2: &[u128],
    ) -> Result<(), Error> {
        self.op_multiply(out, input1, input2);
        Ok(())
    }

    fn op_multiply_raw(
        &mut self,
        _out: &mut [u128],
        _input1: &[u128],
        _input2: &[u128],
    ) -> Result<(), Error> {
        Err(unsupported("MultiplyRaw"))
    }

    fn op_multiply_plaintext_raw(
        &mut self,
        _out: &mut [u128],
        _input1: &[u128],
        _input2: &[u128],
    ) -> Result<(), Error> {
        Err(unsupported("MultiplyPlaintextRaw"))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(tag: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("golem-protocol-{}-{}", tag, std::process::id()));
        path
    }

    fn empty_file(path: &std::path::Path) {
        std::fs::write(path, b"").unwrap();
    }

    fn test_protocol(tag: &str) -> (PlaintextProtocol, Vec<std::path::PathBuf>) {
        let g = scratch(&format!("{}-g", tag));
        let e = scratch(&format!("{}-e", tag));
        let o = scratch(&format!("{}-o", tag));
        empty_file(&g);
        empty_file(&e);
        let protocol = PlaintextProtocol::new(&g, &e, &o).unwrap();
        (protocol, vec![g, e, o])
    }

    fn cleanup(paths: Vec<std::path::PathBuf>) {
        for path in paths {
            let _ = std::fs::remove_file(path);
        }
    }

    #[test]
    fn bit_files_round_trip() {
        let path = scratch("bits");
        let bits: Vec<u8> = (0..19).map(|i| (i % 3 == 0) as u8).collect();

        let mut writer = BitFileWriter::create(&path).unwrap();
        for bit in &bits {
            writer.write1(*bit).unwrap();
        }
        writer.finish().unwrap();

        let mut reader = BitFileReader::open(&path).unwrap();
        for bit in &bits {
            assert_eq!(reader.read1().unwrap(), *bit);
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn arithmetic_discards_final_carry() {
        let (mut p, files) = test_protocol("arith");
        let a = [1u128, 1, 1, 1]; // 15
        let b = [1u128, 0, 0, 0]; // 1
        let mut out = [0u128; 4];

        p.op_add(&mut out, &a, &b);
        assert_eq!(bits_to_value(&out), 0, "15 + 1 wraps to 0 in four bits");

        p.op_sub(&mut out, &b, &a);
        assert_eq!(bits_to_value(&out), 2, "1 - 15 wraps to 2 in four bits");

        p.op_multiply(&mut out, &a, &a);
        assert_eq!(bits_to_value(&out), (15 * 15) % 16);
        cleanup(files);
    }

    #[test]
    fn zero_tests_are_strict_complements() {
        let (mut p, files) = test_protocol("zero");
        let zero = [0u128; 5];
        let nonzero = [0u128, 0, 1, 0, 0];

        let mut is_zero = 0u128;
        let mut non_zero = 0u128;
        for input in [&zero[..], &nonzero[..]].iter() {
            p.op_is_zero(&mut is_zero, input);
            p.op_non_zero(&mut non_zero, input);
            assert_eq!(is_zero ^ non_zero, 1, "IsZero and NonZero must complement");
        }
        cleanup(files);
    }

    #[test]
    fn comparisons_and_select() {
        let (mut p, files) = test_protocol("cmp");
        let mut a = [0u128; 8];
        let mut b = [0u128; 8];
        value_to_bits(99, &mut a);
        value_to_bits(140, &mut b);

        let mut less = 0u128;
        p.op_less(&mut less, &a, &b);
        assert_eq!(less, 1);
        p.op_less(&mut less, &b, &a);
        assert_eq!(less, 0);

        let mut eq = 0u128;
        p.op_equal(&mut eq, &a, &a);
        assert_eq!(eq, 1);

        let mut out = [0u128; 8];
        p.op_select(&mut out, &a, &b, &1);
        assert_eq!(bits_to_value(&out), 99);
        p.op_select(&mut out, &a, &b, &0);
        assert_eq!(bits_to_value(&out), 140);
        cleanup(files);
    }

    #[test]
    fn he_surface_is_refused() {
        let (mut p, files) = test_protocol("he");
        let mut out = [0u128; 4];
        assert!(p.op_encode(&mut out, 7, 2).is_err());
        assert!(p.op_renormalize(&mut out, &[0u128; 4]).is_err());
        assert!(p.op_switch_level(&mut out, &[0u128; 4]).is_err());
        cleanup(files);
    }

    #[test]
    fn sizing_refuses_denormalized() {
        assert_eq!(plaintext_operand_size(32, OperandType::Ciphertext), Some(32));
        assert_eq!(plaintext_operand_size(32, OperandType::Plaintext), Some(32));
        assert_eq!(plaintext_operand_size(32, OperandType::DenormalizedCiphertext), None);
    }
}
