//! Low-level SPIR-V encoding, the inverse of [`super::read`]: instructions
//! back into a self-delimited word stream. Feeding back the decoded header
//! and instruction sequence unchanged reproduces the input bytes exactly,
//! which is what the passthrough target relies on.

use super::{HEADER_LEN, Inst};
use crate::Error;

#[derive(Clone)]
pub struct ModuleEmitter {
    pub words: Vec<u32>,
}

impl ModuleEmitter {
    pub fn with_header(header: [u32; HEADER_LEN]) -> Self {
        Self { words: header.into_iter().collect() }
    }

    pub fn push_inst(&mut self, inst: &Inst) -> Result<(), Error> {
        let word_count = inst.word_count();
        let opcode_word = u32::try_from(word_count)
            .ok()
            .filter(|c| *c <= u32::from(u16::MAX))
            .map(|c| (c << 16) | u32::from(inst.opcode.0))
            .ok_or_else(|| {
                Error::malformed(format!(
                    "{:?} needs {word_count} words, more than the word count field can hold",
                    inst.opcode
                ))
            })?;
        self.words.reserve(word_count);
        self.words.push(opcode_word);
        self.words
            .extend(inst.result_type_id.map(|id| id.get()));
        self.words.extend(inst.result_id.map(|id| id.get()));
        self.words.extend_from_slice(&inst.operands);
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice::<u32, u8>(&self.words).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spv::{MAGIC, read::ModuleParser};

    #[test]
    fn decode_encode_is_identity() {
        let mut words = vec![MAGIC, 0x0001_0300, 0x0008_0001, 12, 0];
        // OpCapability Shader; %1 = OpTypeVoid; an opcode this crate does not
        // interpret (kept raw) to cover the unknown-layout path.
        words.extend([
            (2 << 16) | 17,
            1,
            (2 << 16) | 19,
            1,
            (3 << 16) | 400,
            7,
            9,
        ]);

        let parser = ModuleParser::read_from_spv_words(words.clone()).unwrap();
        let mut emitter = ModuleEmitter::with_header(parser.header);
        for inst in parser {
            emitter.push_inst(&inst.unwrap()).unwrap();
        }
        assert_eq!(emitter.words, words);
        assert_eq!(emitter.to_bytes().len(), words.len() * 4);
    }
}
