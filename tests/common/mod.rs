//! Hand-assembled SPIR-V word streams shared by the integration tests.
//!
//! Instructions are written directly as words so the tests exercise the
//! real decode path instead of a builder that could mask encoding bugs.

use spvtrans::spv::{self, MAGIC, Op};

pub fn raw(op: Op, words: &[u32]) -> Vec<u32> {
    let mut v = vec![((words.len() as u32 + 1) << 16) | u32::from(op.0)];
    v.extend_from_slice(words);
    v
}

pub fn str_words(s: &str) -> Vec<u32> {
    spv::encode_literal_string(s).to_vec()
}

pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn entry_point(model: u32, func: u32, interface: &[u32]) -> Vec<u32> {
    let mut ep = vec![model, func];
    ep.extend(str_words("main"));
    ep.extend_from_slice(interface);
    raw(Op::ENTRY_POINT, &ep)
}

fn name(id: u32, s: &str) -> Vec<u32> {
    let mut w = vec![id];
    w.extend(str_words(s));
    raw(Op::NAME, &w)
}

fn member_name(id: u32, member: u32, s: &str) -> Vec<u32> {
    let mut w = vec![id, member];
    w.extend(str_words(s));
    raw(Op::MEMBER_NAME, &w)
}

/// A model-view-projection vertex shader:
///
/// ```glsl
/// uniform Transform { mat4 mvp; };
/// in vec4 position;
/// in vec2 texcoord;
/// out vec2 v_texcoord;
/// void main() {
///     gl_Position = mvp * position;
///     v_texcoord = texcoord;
/// }
/// ```
pub fn mvp_vertex() -> Vec<u32> {
    use spvtrans::spv::decoration as dec;

    let mut w = vec![MAGIC, 0x0001_0000, 0, 32, 0];
    w.extend(entry_point(0, 21, &[17, 18, 19, 20]));

    w.extend(name(7, "Transform"));
    w.extend(member_name(7, 0, "mvp"));
    w.extend(name(17, "position"));
    w.extend(name(18, "texcoord"));
    w.extend(name(19, "v_texcoord"));

    w.extend(raw(Op::DECORATE, &[7, dec::BLOCK]));
    w.extend(raw(Op::MEMBER_DECORATE, &[7, 0, dec::OFFSET, 0]));
    w.extend(raw(Op::DECORATE, &[16, dec::DESCRIPTOR_SET, 0]));
    w.extend(raw(Op::DECORATE, &[16, dec::BINDING, 0]));
    w.extend(raw(Op::DECORATE, &[17, dec::LOCATION, 0]));
    w.extend(raw(Op::DECORATE, &[18, dec::LOCATION, 1]));
    w.extend(raw(Op::DECORATE, &[19, dec::LOCATION, 0]));
    w.extend(raw(Op::DECORATE, &[20, dec::BUILT_IN, 0]));

    w.extend(raw(Op::TYPE_VOID, &[1]));
    w.extend(raw(Op::TYPE_FUNCTION, &[2, 1]));
    w.extend(raw(Op::TYPE_FLOAT, &[3, 32]));
    w.extend(raw(Op::TYPE_VECTOR, &[4, 3, 4]));
    w.extend(raw(Op::TYPE_VECTOR, &[5, 3, 2]));
    w.extend(raw(Op::TYPE_MATRIX, &[6, 4, 4]));
    w.extend(raw(Op::TYPE_STRUCT, &[7, 6]));
    w.extend(raw(Op::TYPE_POINTER, &[8, 2, 7]));
    w.extend(raw(Op::TYPE_POINTER, &[9, 1, 4]));
    w.extend(raw(Op::TYPE_POINTER, &[10, 1, 5]));
    w.extend(raw(Op::TYPE_POINTER, &[11, 3, 5]));
    w.extend(raw(Op::TYPE_POINTER, &[12, 3, 4]));
    w.extend(raw(Op::TYPE_INT, &[13, 32, 0]));
    w.extend(raw(Op::CONSTANT, &[13, 14, 0]));
    w.extend(raw(Op::TYPE_POINTER, &[15, 2, 6]));
    w.extend(raw(Op::VARIABLE, &[8, 16, 2]));
    w.extend(raw(Op::VARIABLE, &[9, 17, 1]));
    w.extend(raw(Op::VARIABLE, &[10, 18, 1]));
    w.extend(raw(Op::VARIABLE, &[11, 19, 3]));
    w.extend(raw(Op::VARIABLE, &[12, 20, 3]));

    w.extend(raw(Op::FUNCTION, &[1, 21, 0, 2]));
    w.extend(raw(Op::LABEL, &[22]));
    w.extend(raw(Op::ACCESS_CHAIN, &[15, 23, 16, 14]));
    w.extend(raw(Op::LOAD, &[6, 24, 23]));
    w.extend(raw(Op::LOAD, &[4, 25, 17]));
    w.extend(raw(Op::MATRIX_TIMES_VECTOR, &[4, 26, 24, 25]));
    w.extend(raw(Op::STORE, &[20, 26]));
    w.extend(raw(Op::LOAD, &[5, 27, 18]));
    w.extend(raw(Op::STORE, &[19, 27]));
    w.extend(raw(Op::RETURN, &[]));
    w.extend(raw(Op::FUNCTION_END, &[]));
    w
}

/// A fragment shader whose body is a (vacuous) merge-marked loop followed by
/// a solid-color store. Targets with iteration reconstruct the loop; the
/// branch-free bytecode target must refuse it.
pub fn looping_fragment() -> Vec<u32> {
    use spvtrans::spv::decoration as dec;

    let mut w = vec![MAGIC, 0x0001_0000, 0, 32, 0];
    w.extend(entry_point(4, 9, &[8]));
    w.extend(name(8, "frag_color"));
    w.extend(raw(Op::DECORATE, &[8, dec::LOCATION, 0]));

    w.extend(raw(Op::TYPE_VOID, &[1]));
    w.extend(raw(Op::TYPE_FUNCTION, &[2, 1]));
    w.extend(raw(Op::TYPE_BOOL, &[3]));
    w.extend(raw(Op::CONSTANT_TRUE, &[3, 4]));
    w.extend(raw(Op::TYPE_FLOAT, &[5, 32]));
    w.extend(raw(Op::TYPE_VECTOR, &[6, 5, 4]));
    w.extend(raw(Op::TYPE_POINTER, &[7, 3, 6]));
    w.extend(raw(Op::VARIABLE, &[7, 8, 3]));
    w.extend(raw(Op::CONSTANT, &[5, 15, 1.0f32.to_bits()]));
    w.extend(raw(Op::CONSTANT_COMPOSITE, &[6, 16, 15, 15, 15, 15]));

    w.extend(raw(Op::FUNCTION, &[1, 9, 0, 2]));
    w.extend(raw(Op::LABEL, &[10]));
    w.extend(raw(Op::BRANCH, &[11]));
    w.extend(raw(Op::LABEL, &[11]));
    w.extend(raw(Op::LOOP_MERGE, &[14, 13, 0]));
    w.extend(raw(Op::BRANCH_CONDITIONAL, &[4, 12, 14]));
    w.extend(raw(Op::LABEL, &[12]));
    w.extend(raw(Op::BRANCH, &[13]));
    w.extend(raw(Op::LABEL, &[13]));
    w.extend(raw(Op::BRANCH, &[11]));
    w.extend(raw(Op::LABEL, &[14]));
    w.extend(raw(Op::STORE, &[8, 16]));
    w.extend(raw(Op::RETURN, &[]));
    w.extend(raw(Op::FUNCTION_END, &[]));
    w
}

/// A textured fragment shader: one combined image sampler, one varying, one
/// color output.
pub fn textured_fragment() -> Vec<u32> {
    use spvtrans::spv::decoration as dec;

    let mut w = vec![MAGIC, 0x0001_0000, 0, 32, 0];
    w.extend(entry_point(4, 14, &[12, 13]));
    w.extend(name(11, "tex"));
    w.extend(name(12, "uv"));
    w.extend(name(13, "frag_color"));
    w.extend(raw(Op::DECORATE, &[11, dec::DESCRIPTOR_SET, 0]));
    w.extend(raw(Op::DECORATE, &[11, dec::BINDING, 0]));
    w.extend(raw(Op::DECORATE, &[12, dec::LOCATION, 0]));
    w.extend(raw(Op::DECORATE, &[13, dec::LOCATION, 0]));

    w.extend(raw(Op::TYPE_VOID, &[1]));
    w.extend(raw(Op::TYPE_FUNCTION, &[2, 1]));
    w.extend(raw(Op::TYPE_FLOAT, &[3, 32]));
    w.extend(raw(Op::TYPE_VECTOR, &[4, 3, 4]));
    w.extend(raw(Op::TYPE_VECTOR, &[5, 3, 2]));
    w.extend(raw(Op::TYPE_IMAGE, &[6, 3, 1, 0, 0, 0, 1, 0]));
    w.extend(raw(Op::TYPE_SAMPLED_IMAGE, &[7, 6]));
    w.extend(raw(Op::TYPE_POINTER, &[8, 0, 7]));
    w.extend(raw(Op::TYPE_POINTER, &[9, 1, 5]));
    w.extend(raw(Op::TYPE_POINTER, &[10, 3, 4]));
    w.extend(raw(Op::VARIABLE, &[8, 11, 0]));
    w.extend(raw(Op::VARIABLE, &[9, 12, 1]));
    w.extend(raw(Op::VARIABLE, &[10, 13, 3]));

    w.extend(raw(Op::FUNCTION, &[1, 14, 0, 2]));
    w.extend(raw(Op::LABEL, &[15]));
    w.extend(raw(Op::LOAD, &[7, 16, 11]));
    w.extend(raw(Op::LOAD, &[5, 17, 12]));
    w.extend(raw(Op::IMAGE_SAMPLE_IMPLICIT_LOD, &[4, 18, 16, 17]));
    w.extend(raw(Op::STORE, &[13, 18]));
    w.extend(raw(Op::RETURN, &[]));
    w.extend(raw(Op::FUNCTION_END, &[]));
    w
}
