//! The annotation reverse pass.
//!
//! Belady's MIN needs, for every instruction, the index of the next
//! instruction touching each of its pages. That is computed by walking the
//! virtual bytecode from its last instruction to its first while maintaining
//! a map from page number to the earliest later use seen so far. The records
//! come out in reverse order; a final pass over memory-mapped files rewrites
//! them into forward order for sequential consumption by the replacement
//! stage.
//!
//! An annotation record is a one-byte page count followed by that many
//! 48-bit next-use instruction numbers: the page order matches
//! `Instruction::store_page_numbers` (output first, then inputs, deduped),
//! and the all-ones value means "never used again".

use std::{
    collections::HashMap,
    fs::File,
    path::Path,
};

use crate::{
    addr::{
        pg_num,
        InstructionNumber,
        PageShift,
        VirtPageNumber,
        INVALID_INSTR,
    },
    deps::log::debug,
    error::Error,
    instr::MAX_INSTRUCTION_PAGES,
    mmapfile::MmapFile,
    opcode::FLAG_OUTPUT_PAGE_FIRST_USE,
    progfile::VirtProgramReverseReader,
    streams::{
        BufferedReader,
        BufferedWriter,
        DEFAULT_BUFFER_SIZE,
    },
};

const NEXT_USE_BYTES: usize = 6;
pub const MAX_ANNOTATION_BYTES: usize = 1 + MAX_INSTRUCTION_PAGES * NEXT_USE_BYTES;


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    pub num_pages: u8,
    pub next_use:  [InstructionNumber; MAX_INSTRUCTION_PAGES],
}

impl Default for Annotation {
    fn default() -> Self {
        Self {
            num_pages: 0,
            next_use:  [INVALID_INSTR; MAX_INSTRUCTION_PAGES],
        }
    }
}

impl Annotation {
    pub fn encoded_size(&self) -> usize {
        1 + self.num_pages as usize * NEXT_USE_BYTES
    }

    pub fn encode(
        &self,
        buf: &mut [u8],
    ) -> usize {
        buf[0] = self.num_pages;
        let mut at = 1;
        for slot in self.next_use.iter().take(self.num_pages as usize) {
            buf[at..at + NEXT_USE_BYTES].copy_from_slice(&slot.to_le_bytes()[..NEXT_USE_BYTES]);
            at += NEXT_USE_BYTES;
        }
        at
    }

    pub fn decode(buf: &[u8]) -> std::io::Result<(Annotation, usize)> {
        if buf.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated annotation record",
            ));
        }
        let num_pages = buf[0];
        let size = 1 + num_pages as usize * NEXT_USE_BYTES;
        if num_pages as usize > MAX_INSTRUCTION_PAGES || buf.len() < size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "malformed annotation record",
            ));
        }

        let mut annotation = Annotation {
            num_pages,
            ..Annotation::default()
        };
        let mut at = 1;
        for slot in annotation.next_use.iter_mut().take(num_pages as usize) {
            let mut bytes = [0u8; 8];
            bytes[..NEXT_USE_BYTES].copy_from_slice(&buf[at..at + NEXT_USE_BYTES]);
            *slot = u64::from_le_bytes(bytes);
            at += NEXT_USE_BYTES;
        }
        Ok((annotation, size))
    }
}


/// Sequential reader of a forward-ordered annotation file.
pub struct AnnotationFileReader {
    reader: BufferedReader<File>,
}

impl AnnotationFileReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path.as_ref())?;
        Ok(Self {
            reader: BufferedReader::new(file, DEFAULT_BUFFER_SIZE, false),
        })
    }

    pub fn next_annotation(&mut self) -> Result<Annotation, Error> {
        let buf = self.reader.start_read(MAX_ANNOTATION_BYTES)?;
        let (annotation, size) = Annotation::decode(buf)?;
        self.reader.finish_read(size);
        Ok(annotation)
    }
}


/// Walks the virtual bytecode backwards and writes one annotation per
/// instruction, in reverse order, to `reverse_annotations`. Returns the
/// maximum number of simultaneously live pages, which is the least frame
/// budget for which replacement can possibly succeed.
pub fn reverse_annotate_program(
    reverse_annotations: &Path,
    program: &Path,
    page_shift: PageShift,
) -> Result<u64, Error> {
    let mut reverse_prog = VirtProgramReverseReader::open(program)?;
    let num_instructions = reverse_prog.header().num_instructions;

    let output_file = File::create(reverse_annotations)?;
    let mut output = BufferedWriter::new(output_file, DEFAULT_BUFFER_SIZE, false);

    let mut next_access: HashMap<VirtPageNumber, InstructionNumber> = HashMap::new();
    let mut max_working_set: u64 = 0;
    let mut pages = [0u64; MAX_INSTRUCTION_PAGES];
    let mut encode_buf = [0u8; MAX_ANNOTATION_BYTES];

    let mut inum = num_instructions;
    while inum != 0 {
        inum -= 1;
        let instruction = reverse_prog.read_instruction()?;

        let mut annotation = Annotation::default();
        annotation.num_pages = instruction.store_page_numbers(page_shift, &mut pages) as u8;
        for (slot, page) in annotation
            .next_use
            .iter_mut()
            .zip(pages.iter())
            .take(annotation.num_pages as usize)
        {
            match next_access.get_mut(page) {
                None => {
                    next_access.insert(*page, inum);
                    *slot = INVALID_INSTR;
                }
                Some(later_use) => {
                    *slot = *later_use;
                    *later_use = inum;
                }
            }
        }

        let size = annotation.encode(&mut encode_buf);
        let region = output.start_write(size)?;
        region.copy_from_slice(&encode_buf[..size]);
        output.finish_write(size);

        max_working_set = max_working_set.max(next_access.len() as u64);

        // An output page written for the first time here is not live before
        // this instruction.
        if instruction.flags & FLAG_OUTPUT_PAGE_FIRST_USE != 0 {
            next_access.remove(&pg_num(instruction.output, page_shift));
        }
    }

    output.into_inner()?;
    debug!(
        "annotated {} instructions, max working set {} pages",
        num_instructions, max_working_set
    );
    Ok(max_working_set)
}

/// Rewrites a reverse-ordered annotation file into forward order. Record
/// sizes are readable from the front of each record, so a forward scan of
/// the reverse file can place each record back-to-front in the output.
pub fn unreverse_annotations(
    annotations: &Path,
    reverse_annotations: &Path,
) -> Result<(), Error> {
    if std::fs::metadata(reverse_annotations)?.len() == 0 {
        std::fs::write(annotations, b"")?;
        return Ok(());
    }

    let source_map = MmapFile::open_readonly(reverse_annotations)?;
    let source = source_map.as_ref();
    let mut target_map = MmapFile::create(annotations, source.len())?;
    let target = target_map.as_mut();

    let mut from = 0usize;
    let mut to = target.len();
    while from != source.len() {
        let (_, size) = Annotation::decode(&source[from..])?;
        to -= size;
        target[to..to + size].copy_from_slice(&source[from..from + size]);
        from += size;
    }
    debug_assert_eq!(to, 0);
    Ok(())
}

/// Runs the full annotation pass for `program`, producing `annotations` and
/// cleaning up the reverse-ordered scratch file.
pub fn annotate_program(
    annotations: &Path,
    reverse_annotations: &Path,
    program: &Path,
    page_shift: PageShift,
) -> Result<u64, Error> {
    let max_working_set = reverse_annotate_program(reverse_annotations, program, page_shift)?;
    unreverse_annotations(annotations, reverse_annotations)?;
    std::fs::remove_file(reverse_annotations)?;
    Ok(max_working_set)
}
