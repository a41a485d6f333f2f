//! Low-level SPIR-V decoding: bytes to header + self-delimiting instructions.
//!
//! This layer is purely syntactic: it splits the word stream on the
//! word-count field and peels off the result ids each opcode's layout
//! declares, but never interprets operands. Anything past a structural
//! violation is unreachable, so every error here aborts the whole decode.

use super::{HEADER_LEN, Id, Inst, MAGIC, Op};
use crate::Error;
use smallvec::SmallVec;

/// An in-progress decode of a SPIR-V module: validated header, plus an
/// iterator over the remaining instructions.
#[derive(Debug)]
pub struct ModuleParser {
    /// `[magic, version, generator, bound, reserved schema]`.
    pub header: [u32; HEADER_LEN],

    words: Vec<u32>,
    /// Next undecoded word in `words` (the header is not re-yielded).
    cursor: usize,
    /// Running instruction index, for error reporting only.
    inst_index: usize,
}

impl ModuleParser {
    /// Decode from raw bytes. The byte length must be a multiple of 4; words
    /// are taken little-endian, with the magic number checked against a
    /// byte-swapped encoding so the mistake is reported as endianness rather
    /// than garbage.
    pub fn read_from_spv_bytes(spv_bytes: &[u8]) -> Result<Self, Error> {
        if spv_bytes.len() % 4 != 0 {
            return Err(Error::malformed(format!(
                "byte length {} is not a multiple of the word size",
                spv_bytes.len()
            )));
        }
        let words = spv_bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
            .collect();
        Self::read_from_spv_words(words)
    }

    /// Decode from a word vector (e.g. front-end output already in memory).
    pub fn read_from_spv_words(words: Vec<u32>) -> Result<Self, Error> {
        if words.len() < HEADER_LEN {
            return Err(Error::malformed(format!(
                "module has {} words, header alone needs {HEADER_LEN}",
                words.len()
            )));
        }
        let header: [u32; HEADER_LEN] = words[..HEADER_LEN].try_into().unwrap();
        let [magic, version, _generator, bound, schema] = header;

        if magic != MAGIC {
            return Err(if magic == MAGIC.swap_bytes() {
                Error::malformed("wrong endianness (byte-swapped magic number)")
            } else {
                Error::malformed(format!("invalid magic number {magic:#010x}"))
            });
        }
        // Version is encoded as 0x00MMmm00 (major byte 2, minor byte 1).
        let [lo, minor, major, hi] = version.to_le_bytes();
        if lo != 0 || hi != 0 || major == 0 {
            return Err(Error::malformed(format!(
                "malformed version word {version:#010x}"
            )));
        }
        let _ = (major, minor);
        if bound == 0 {
            return Err(Error::malformed("id bound of zero"));
        }
        if schema != 0 {
            return Err(Error::malformed(format!(
                "unsupported instruction schema {schema}"
            )));
        }

        Ok(Self { header, words, cursor: HEADER_LEN, inst_index: 0 })
    }

    fn next_inst(&mut self) -> Result<Inst, Error> {
        let index = self.inst_index;
        let malformed =
            |reason: String| Error::malformed(format!("instruction #{index}: {reason}"));

        let opcode_word = self.words[self.cursor];
        let word_count = (opcode_word >> 16) as usize;
        let opcode = Op(opcode_word as u16);
        if word_count == 0 {
            return Err(malformed(format!("{opcode:?} has word count zero")));
        }
        if self.cursor + word_count > self.words.len() {
            return Err(malformed(format!(
                "{opcode:?} claims {word_count} words but only {} remain",
                self.words.len() - self.cursor
            )));
        }
        let mut rest = &self.words[self.cursor + 1..self.cursor + word_count];
        self.cursor += word_count;
        self.inst_index += 1;

        let (has_result_type, has_result) = opcode.result_layout();
        let mut take_id = |what: &str| -> Result<Id, Error> {
            let (&word, tail) = rest
                .split_first()
                .ok_or_else(|| malformed(format!("{opcode:?} too short for its {what}")))?;
            rest = tail;
            Id::new(word).ok_or_else(|| malformed(format!("{opcode:?} has {what} zero")))
        };
        let result_type_id =
            if has_result_type { Some(take_id("result type")?) } else { None };
        let result_id = if has_result { Some(take_id("result id")?) } else { None };

        Ok(Inst {
            opcode,
            result_type_id,
            result_id,
            operands: SmallVec::from_slice(rest),
        })
    }
}

impl Iterator for ModuleParser {
    type Item = Result<Inst, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.words.len() {
            return None;
        }
        Some(self.next_inst())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> [u32; HEADER_LEN] {
        [MAGIC, 0x0001_0000, 0, 8, 0]
    }

    #[test]
    fn rejects_bad_magic_and_endianness() {
        let mut words = header().to_vec();
        words[0] = 0xdead_beef;
        assert!(matches!(
            ModuleParser::read_from_spv_words(words),
            Err(Error::MalformedModule { .. })
        ));

        let mut swapped = header().to_vec();
        swapped[0] = MAGIC.swap_bytes();
        let err = ModuleParser::read_from_spv_words(swapped).unwrap_err();
        assert!(err.to_string().contains("endianness"));
    }

    #[test]
    fn rejects_nonzero_schema() {
        let mut words = header().to_vec();
        words[4] = 1;
        assert!(ModuleParser::read_from_spv_words(words).is_err());
    }

    #[test]
    fn splits_result_ids_per_layout() {
        let mut words = header().to_vec();
        // %1 = OpTypeFloat 32
        words.extend([(3 << 16) | u32::from(Op::TYPE_FLOAT.0), 1, 32]);
        // %3 = OpConstant %1 0x3f800000
        words.extend([(4 << 16) | u32::from(Op::CONSTANT.0), 1, 3, 0x3f80_0000]);

        let insts: Vec<Inst> = ModuleParser::read_from_spv_words(words)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(insts.len(), 2);
        assert_eq!(insts[0].result_id, Id::new(1));
        assert_eq!(insts[0].result_type_id, None);
        assert_eq!(insts[0].operands.as_slice(), [32]);
        assert_eq!(insts[1].result_type_id, Id::new(1));
        assert_eq!(insts[1].result_id, Id::new(3));
        assert_eq!(insts[1].operands.as_slice(), [0x3f80_0000]);
    }

    #[test]
    fn rejects_truncated_instruction() {
        let mut words = header().to_vec();
        words.push((4 << 16) | u32::from(Op::CONSTANT.0));
        words.push(1);
        let err: Result<Vec<Inst>, Error> =
            ModuleParser::read_from_spv_words(words).unwrap().collect();
        assert!(matches!(err, Err(Error::MalformedModule { .. })));
    }

    #[test]
    fn rejects_zero_word_count() {
        let mut words = header().to_vec();
        words.push(u32::from(Op::NOP.0));
        let err: Result<Vec<Inst>, Error> =
            ModuleParser::read_from_spv_words(words).unwrap().collect();
        assert!(matches!(err, Err(Error::MalformedModule { .. })));
    }
}
