//! SPIR-V word-level definitions: ids, opcodes, instruction layout, and
//! literal-string packing. Everything here is purely syntactic; semantic
//! interpretation lives in [`crate::Module`].

pub mod read;
pub mod write;

use crate::Error;
use smallvec::SmallVec;
use std::num::NonZeroU32;

/// A SPIR-V id: an opaque integer naming any module entity. Zero is not a
/// valid id, which `NonZeroU32` encodes for free.
pub type Id = NonZeroU32;

/// The fixed magic number at word 0 of every SPIR-V module.
pub const MAGIC: u32 = 0x0723_0203;

/// The module header is five words: magic, version, generator, id bound,
/// reserved instruction schema (must be zero).
pub const HEADER_LEN: usize = 5;

/// A SPIR-V opcode (the high 16 bits of an instruction's first word).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Op(pub u16);

#[allow(missing_docs)]
impl Op {
    pub const NOP: Op = Op(0);
    pub const UNDEF: Op = Op(1);
    pub const SOURCE_CONTINUED: Op = Op(2);
    pub const SOURCE: Op = Op(3);
    pub const SOURCE_EXTENSION: Op = Op(4);
    pub const NAME: Op = Op(5);
    pub const MEMBER_NAME: Op = Op(6);
    pub const STRING: Op = Op(7);
    pub const LINE: Op = Op(8);
    pub const EXTENSION: Op = Op(10);
    pub const EXT_INST_IMPORT: Op = Op(11);
    pub const EXT_INST: Op = Op(12);
    pub const MEMORY_MODEL: Op = Op(14);
    pub const ENTRY_POINT: Op = Op(15);
    pub const EXECUTION_MODE: Op = Op(16);
    pub const CAPABILITY: Op = Op(17);

    pub const TYPE_VOID: Op = Op(19);
    pub const TYPE_BOOL: Op = Op(20);
    pub const TYPE_INT: Op = Op(21);
    pub const TYPE_FLOAT: Op = Op(22);
    pub const TYPE_VECTOR: Op = Op(23);
    pub const TYPE_MATRIX: Op = Op(24);
    pub const TYPE_IMAGE: Op = Op(25);
    pub const TYPE_SAMPLER: Op = Op(26);
    pub const TYPE_SAMPLED_IMAGE: Op = Op(27);
    pub const TYPE_ARRAY: Op = Op(28);
    pub const TYPE_RUNTIME_ARRAY: Op = Op(29);
    pub const TYPE_STRUCT: Op = Op(30);
    pub const TYPE_POINTER: Op = Op(32);
    pub const TYPE_FUNCTION: Op = Op(33);

    pub const CONSTANT_TRUE: Op = Op(41);
    pub const CONSTANT_FALSE: Op = Op(42);
    pub const CONSTANT: Op = Op(43);
    pub const CONSTANT_COMPOSITE: Op = Op(44);
    pub const CONSTANT_NULL: Op = Op(46);

    pub const FUNCTION: Op = Op(54);
    pub const FUNCTION_PARAMETER: Op = Op(55);
    pub const FUNCTION_END: Op = Op(56);
    pub const FUNCTION_CALL: Op = Op(57);

    pub const VARIABLE: Op = Op(59);
    pub const LOAD: Op = Op(61);
    pub const STORE: Op = Op(62);
    pub const ACCESS_CHAIN: Op = Op(65);
    pub const IN_BOUNDS_ACCESS_CHAIN: Op = Op(66);

    pub const DECORATE: Op = Op(71);
    pub const MEMBER_DECORATE: Op = Op(72);
    pub const DECORATION_GROUP: Op = Op(73);
    pub const GROUP_DECORATE: Op = Op(74);
    pub const GROUP_MEMBER_DECORATE: Op = Op(75);

    pub const VECTOR_SHUFFLE: Op = Op(79);
    pub const COMPOSITE_CONSTRUCT: Op = Op(80);
    pub const COMPOSITE_EXTRACT: Op = Op(81);
    pub const COMPOSITE_INSERT: Op = Op(82);
    pub const COPY_OBJECT: Op = Op(83);
    pub const TRANSPOSE: Op = Op(84);

    pub const SAMPLED_IMAGE: Op = Op(86);
    pub const IMAGE_SAMPLE_IMPLICIT_LOD: Op = Op(87);
    pub const IMAGE_SAMPLE_EXPLICIT_LOD: Op = Op(88);
    pub const IMAGE: Op = Op(100);

    pub const CONVERT_F_TO_U: Op = Op(109);
    pub const CONVERT_F_TO_S: Op = Op(110);
    pub const CONVERT_S_TO_F: Op = Op(111);
    pub const CONVERT_U_TO_F: Op = Op(112);
    pub const BITCAST: Op = Op(124);

    pub const S_NEGATE: Op = Op(126);
    pub const F_NEGATE: Op = Op(127);
    pub const I_ADD: Op = Op(128);
    pub const F_ADD: Op = Op(129);
    pub const I_SUB: Op = Op(130);
    pub const F_SUB: Op = Op(131);
    pub const I_MUL: Op = Op(132);
    pub const F_MUL: Op = Op(133);
    pub const U_DIV: Op = Op(134);
    pub const S_DIV: Op = Op(135);
    pub const F_DIV: Op = Op(136);
    pub const U_MOD: Op = Op(137);
    pub const S_REM: Op = Op(138);
    pub const S_MOD: Op = Op(139);
    pub const F_REM: Op = Op(140);
    pub const F_MOD: Op = Op(141);
    pub const VECTOR_TIMES_SCALAR: Op = Op(142);
    pub const MATRIX_TIMES_SCALAR: Op = Op(143);
    pub const VECTOR_TIMES_MATRIX: Op = Op(144);
    pub const MATRIX_TIMES_VECTOR: Op = Op(145);
    pub const MATRIX_TIMES_MATRIX: Op = Op(146);
    pub const OUTER_PRODUCT: Op = Op(147);
    pub const DOT: Op = Op(148);

    pub const LOGICAL_EQUAL: Op = Op(164);
    pub const LOGICAL_NOT_EQUAL: Op = Op(165);
    pub const LOGICAL_OR: Op = Op(166);
    pub const LOGICAL_AND: Op = Op(167);
    pub const LOGICAL_NOT: Op = Op(168);
    pub const SELECT: Op = Op(169);
    pub const I_EQUAL: Op = Op(170);
    pub const I_NOT_EQUAL: Op = Op(171);
    pub const U_GREATER_THAN: Op = Op(172);
    pub const S_GREATER_THAN: Op = Op(173);
    pub const U_GREATER_THAN_EQUAL: Op = Op(174);
    pub const S_GREATER_THAN_EQUAL: Op = Op(175);
    pub const U_LESS_THAN: Op = Op(176);
    pub const S_LESS_THAN: Op = Op(177);
    pub const U_LESS_THAN_EQUAL: Op = Op(178);
    pub const S_LESS_THAN_EQUAL: Op = Op(179);
    pub const F_ORD_EQUAL: Op = Op(180);
    pub const F_ORD_NOT_EQUAL: Op = Op(182);
    pub const F_ORD_LESS_THAN: Op = Op(184);
    pub const F_ORD_GREATER_THAN: Op = Op(186);
    pub const F_ORD_LESS_THAN_EQUAL: Op = Op(188);
    pub const F_ORD_GREATER_THAN_EQUAL: Op = Op(190);

    pub const PHI: Op = Op(245);
    pub const LOOP_MERGE: Op = Op(246);
    pub const SELECTION_MERGE: Op = Op(247);
    pub const LABEL: Op = Op(248);
    pub const BRANCH: Op = Op(249);
    pub const BRANCH_CONDITIONAL: Op = Op(250);
    pub const SWITCH: Op = Op(251);
    pub const KILL: Op = Op(252);
    pub const RETURN: Op = Op(253);
    pub const RETURN_VALUE: Op = Op(254);
    pub const UNREACHABLE: Op = Op(255);

    pub const NO_LINE: Op = Op(317);
    pub const MODULE_PROCESSED: Op = Op(330);

    /// Whether this opcode's first operand words are a result-type id and a
    /// result id, per the SPIR-V instruction layout.
    ///
    /// Opcodes outside the engine's supported set report `(false, false)`:
    /// their words stay raw in [`Inst::operands`], which is still exact for
    /// re-encoding, and any result they would define simply never enters the
    /// id tables (a later reference then fails closed as `UnresolvedId`).
    pub fn result_layout(self) -> (bool, bool) {
        match self {
            // Result id only.
            Op::STRING
            | Op::EXT_INST_IMPORT
            | Op::TYPE_VOID
            | Op::TYPE_BOOL
            | Op::TYPE_INT
            | Op::TYPE_FLOAT
            | Op::TYPE_VECTOR
            | Op::TYPE_MATRIX
            | Op::TYPE_IMAGE
            | Op::TYPE_SAMPLER
            | Op::TYPE_SAMPLED_IMAGE
            | Op::TYPE_ARRAY
            | Op::TYPE_RUNTIME_ARRAY
            | Op::TYPE_STRUCT
            | Op::TYPE_POINTER
            | Op::TYPE_FUNCTION
            | Op::DECORATION_GROUP
            | Op::LABEL => (false, true),

            // Result type id, then result id.
            Op::UNDEF
            | Op::EXT_INST
            | Op::CONSTANT_TRUE
            | Op::CONSTANT_FALSE
            | Op::CONSTANT
            | Op::CONSTANT_COMPOSITE
            | Op::CONSTANT_NULL
            | Op::FUNCTION
            | Op::FUNCTION_PARAMETER
            | Op::FUNCTION_CALL
            | Op::VARIABLE
            | Op::LOAD
            | Op::ACCESS_CHAIN
            | Op::IN_BOUNDS_ACCESS_CHAIN
            | Op::VECTOR_SHUFFLE
            | Op::COMPOSITE_CONSTRUCT
            | Op::COMPOSITE_EXTRACT
            | Op::COMPOSITE_INSERT
            | Op::COPY_OBJECT
            | Op::TRANSPOSE
            | Op::SAMPLED_IMAGE
            | Op::IMAGE_SAMPLE_IMPLICIT_LOD
            | Op::IMAGE_SAMPLE_EXPLICIT_LOD
            | Op::IMAGE
            | Op::CONVERT_F_TO_U
            | Op::CONVERT_F_TO_S
            | Op::CONVERT_S_TO_F
            | Op::CONVERT_U_TO_F
            | Op::BITCAST
            | Op::SELECT
            | Op::PHI => (true, true),

            Op(o)
                if (Op::S_NEGATE.0..=Op::DOT.0).contains(&o)
                    || (Op::LOGICAL_EQUAL.0..=Op::F_ORD_GREATER_THAN_EQUAL.0).contains(&o) =>
            {
                (true, true)
            }

            _ => (false, false),
        }
    }
}

/// Decoration numbers the builder recognizes (`OpDecorate` operand 1).
pub mod decoration {
    pub const BLOCK: u32 = 2;
    pub const BUFFER_BLOCK: u32 = 3;
    pub const ROW_MAJOR: u32 = 4;
    pub const COL_MAJOR: u32 = 5;
    pub const ARRAY_STRIDE: u32 = 6;
    pub const MATRIX_STRIDE: u32 = 7;
    pub const BUILT_IN: u32 = 11;
    pub const NO_PERSPECTIVE: u32 = 13;
    pub const FLAT: u32 = 14;
    pub const LOCATION: u32 = 30;
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
    pub const OFFSET: u32 = 35;
}

/// GLSL.std.450 extended-instruction numbers the emitters lower.
pub mod glsl450 {
    pub const F_ABS: u32 = 4;
    pub const FLOOR: u32 = 8;
    pub const CEIL: u32 = 9;
    pub const FRACT: u32 = 10;
    pub const SIN: u32 = 13;
    pub const COS: u32 = 14;
    pub const TAN: u32 = 15;
    pub const POW: u32 = 26;
    pub const EXP: u32 = 27;
    pub const LOG: u32 = 28;
    pub const EXP2: u32 = 29;
    pub const LOG2: u32 = 30;
    pub const SQRT: u32 = 31;
    pub const INVERSE_SQRT: u32 = 32;
    pub const F_MIN: u32 = 37;
    pub const F_MAX: u32 = 40;
    pub const F_CLAMP: u32 = 43;
    pub const F_MIX: u32 = 46;
    pub const STEP: u32 = 48;
    pub const SMOOTH_STEP: u32 = 49;
    pub const FMA: u32 = 50;
    pub const LENGTH: u32 = 66;
    pub const DISTANCE: u32 = 67;
    pub const CROSS: u32 = 68;
    pub const NORMALIZE: u32 = 69;
    pub const REFLECT: u32 = 71;
}

/// One decoded instruction: opcode, the result ids its layout declares, and
/// the remaining operand words, still uninterpreted. Immutable once decoded.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Inst {
    pub opcode: Op,
    pub result_type_id: Option<Id>,
    pub result_id: Option<Id>,
    pub operands: SmallVec<[u32; 4]>,
}

impl Inst {
    /// Total encoded size in words (the value of the word-count field).
    pub fn word_count(&self) -> usize {
        1 + usize::from(self.result_type_id.is_some())
            + usize::from(self.result_id.is_some())
            + self.operands.len()
    }

    /// Operand word `idx` as an id, failing on zero.
    pub fn id_operand(&self, idx: usize) -> Result<Id, Error> {
        self.operands
            .get(idx)
            .copied()
            .and_then(Id::new)
            .ok_or_else(|| {
                Error::malformed(format!(
                    "in {:?}: operand {idx} is not a valid id",
                    self.opcode
                ))
            })
    }
}

/// Decode a NUL-terminated literal string packed little-endian into
/// consecutive words (the tail of `OpName`, `OpString`, `OpEntryPoint`, ...).
pub fn extract_literal_string(words: &[u32]) -> Result<String, Error> {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for &word in words {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                return String::from_utf8(bytes)
                    .map_err(|_| Error::malformed("literal string is not UTF-8"));
            }
            bytes.push(byte);
        }
    }
    Err(Error::malformed("literal string missing NUL terminator"))
}

/// Encode a literal string as NUL-terminated little-endian words.
pub fn encode_literal_string(s: &str) -> SmallVec<[u32; 4]> {
    let bytes = s.as_bytes();
    // `+ 1` for the NUL terminator, which must always be present.
    let mut words = SmallVec::with_capacity(bytes.len() / 4 + 1);
    for chunk in bytes.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        words.push(u32::from_le_bytes(word));
    }
    if bytes.len() % 4 == 0 {
        words.push(0);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_string_round_trip() {
        for s in ["", "a", "main", "tex0", "projection_matrix"] {
            let words = encode_literal_string(s);
            // NUL terminator always present, even on word-aligned lengths.
            assert_eq!(words.len(), s.len() / 4 + 1);
            assert_eq!(extract_literal_string(&words).unwrap(), s);
        }
    }

    #[test]
    fn literal_string_requires_terminator() {
        assert!(extract_literal_string(&[u32::from_le_bytes(*b"abcd")]).is_err());
    }

    #[test]
    fn result_layout_matches_instruction_shapes() {
        assert_eq!(Op::TYPE_FLOAT.result_layout(), (false, true));
        assert_eq!(Op::CONSTANT.result_layout(), (true, true));
        assert_eq!(Op::F_ADD.result_layout(), (true, true));
        assert_eq!(Op::DOT.result_layout(), (true, true));
        assert_eq!(Op::STORE.result_layout(), (false, false));
        assert_eq!(Op::BRANCH.result_layout(), (false, false));
        assert_eq!(Op::DECORATE.result_layout(), (false, false));
    }
}
