//! SPIR-V instruction words: a builder for emission and a forward reader
//! used by tests and tooling.
use std::convert::TryInto;
use std::fmt;

use anyhow::bail;
use num_traits::FromPrimitive;
use spirv::Op;

use crate::error::{anyhow, Result};

/// One finished instruction: a header word `(opcode | word_count << 16)`
/// followed by its operand words.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    words: Vec<u32>,
}

impl Instruction {
    pub fn opcode(&self) -> u32 {
        self.words[0] & 0xFFFF
    }
    pub fn op(&self) -> Option<Op> {
        Op::from_u32(self.opcode())
    }
    /// Word count including the header word.
    pub fn word_count(&self) -> usize {
        self.words.len()
    }
    pub fn words(&self) -> &[u32] {
        &self.words
    }
    pub fn into_words(self) -> Vec<u32> {
        self.words
    }
}

pub struct InstructionBuilder {
    words: Vec<u32>,
}

impl InstructionBuilder {
    pub fn new(op: Op) -> InstructionBuilder {
        InstructionBuilder {
            words: vec![(op as u32) & 0xFFFF],
        }
    }
    pub fn push(mut self, x: u32) -> Self {
        self.words.push(x);
        self
    }
    pub fn push_list(mut self, x: &[u32]) -> Self {
        self.words.extend_from_slice(x);
        self
    }
    /// Append a NUL-terminated string padded to a word boundary, packed
    /// little-endian as the SPIR-V spec requires.
    pub fn push_str(mut self, x: &str) -> Self {
        let mut bytes = x.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        for chunk in bytes.chunks_exact(4) {
            self.words.push(u32::from_le_bytes(chunk.try_into().unwrap()));
        }
        self
    }
    pub fn build(mut self) -> Instruction {
        self.words[0] |= (self.words.len() as u32) << 16;
        Instruction { words: self.words }
    }
}

/// Borrowed view of one instruction inside a word stream.
#[derive(Clone, Copy)]
pub struct InstrRef<'a> {
    words: &'a [u32],
}

impl<'a> InstrRef<'a> {
    pub fn opcode(&self) -> u32 {
        self.words[0] & 0xFFFF
    }
    pub fn op(&self) -> Option<Op> {
        Op::from_u32(self.opcode())
    }
    pub fn word_count(&self) -> usize {
        self.words.len()
    }
    /// Operand words, header excluded.
    pub fn operands(&self) -> &'a [u32] {
        &self.words[1..]
    }
}

impl<'a> fmt::Debug for InstrRef<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?} {:?}", self.op(), &self.words[1..])
    }
}

/// Forward iterator over the instructions of a module body.
pub struct Instrs<'a> {
    rest: &'a [u32],
}

impl<'a> Instrs<'a> {
    pub fn new(words: &'a [u32]) -> Instrs<'a> {
        Instrs { rest: words }
    }
}

impl<'a> Iterator for Instrs<'a> {
    type Item = Result<InstrRef<'a>>;
    fn next(&mut self) -> Option<Self::Item> {
        let head = *self.rest.first()?;
        let len = (head >> 16) as usize;
        if len == 0 {
            self.rest = &[];
            return Some(Err(anyhow!("instruction length is zero")));
        }
        if len > self.rest.len() {
            self.rest = &[];
            return Some(Err(anyhow!("instruction is truncated")));
        }
        let instr = InstrRef {
            words: &self.rest[..len],
        };
        self.rest = &self.rest[len..];
        Some(Ok(instr))
    }
}

/// Decode a NUL-terminated packed string starting at `words[0]`. Returns the
/// string and the number of words it occupied.
pub fn decode_str(words: &[u32]) -> Result<(String, usize)> {
    let mut bytes = Vec::new();
    for (i, word) in words.iter().enumerate() {
        for &b in word.to_le_bytes().iter() {
            if b == 0 {
                let s = String::from_utf8(bytes)
                    .map_err(|_| anyhow!("string is not valid UTF-8"))?;
                return Ok((s, i + 1));
            }
            bytes.push(b);
        }
    }
    bail!("string is not NUL-terminated");
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_header_word() {
        let instr = InstructionBuilder::new(Op::TypeInt).push(1).push(32).push(0).build();
        assert_eq!(instr.words()[0], ((4u32) << 16) | (Op::TypeInt as u32));
        assert_eq!(instr.word_count(), 4);
        assert_eq!(instr.op(), Some(Op::TypeInt));
    }

    #[test]
    fn test_push_str_pads_to_word_boundary() {
        // "main" occupies exactly one word of text so the NUL needs a second.
        let instr = InstructionBuilder::new(Op::Name).push(1).push_str("main").build();
        assert_eq!(instr.word_count(), 4);
        let (s, n) = decode_str(&instr.words()[2..]).unwrap();
        assert_eq!(s, "main");
        assert_eq!(n, 2);

        let instr = InstructionBuilder::new(Op::Name).push(1).push_str("abc").build();
        assert_eq!(instr.word_count(), 3);
        let (s, _) = decode_str(&instr.words()[2..]).unwrap();
        assert_eq!(s, "abc");
    }

    #[test]
    fn test_instrs_walks_stream() {
        let a = InstructionBuilder::new(Op::TypeVoid).push(1).build();
        let b = InstructionBuilder::new(Op::TypeBool).push(2).build();
        let mut words = a.into_words();
        words.extend(b.into_words());
        let ops = Instrs::new(&words)
            .map(|i| i.unwrap().op().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ops, [Op::TypeVoid, Op::TypeBool]);
    }
}
