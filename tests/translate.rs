//! End-to-end translation tests: hand-assembled SPIR-V in, target shader
//! text or bytecode out.

mod common;

use std::rc::Rc;

use common::{looping_fragment, mvp_vertex, textured_fragment, words_to_bytes};
use spvtrans::emit::{Dialect, Output, System, Target, emit};
use spvtrans::{Context, Error, Module};

fn module(words: Vec<u32>) -> Module {
    Module::read_from_spv_words(Rc::new(Context::new()), words).unwrap()
}

fn text(module: &Module, target: &Target) -> String {
    let emitted = emit(module, target).unwrap();
    emitted.output.as_text().expect("text target").to_owned()
}

#[test]
fn mvp_vertex_to_desktop_glsl() {
    let m = module(mvp_vertex());
    let glsl = text(&m, &Target::new(Dialect::Glsl, System::Windows));
    assert!(glsl.starts_with("#version 330\n"), "{glsl}");
    assert!(glsl.contains("uniform mat4 mvp;"), "{glsl}");
    assert!(glsl.contains("in vec4 position;"), "{glsl}");
    assert!(glsl.contains("in vec2 texcoord;"), "{glsl}");
    assert!(glsl.contains("out vec2 v_texcoord;"), "{glsl}");
    assert!(glsl.contains("void main()"), "{glsl}");
    assert!(glsl.contains("mvp * position"), "{glsl}");
    assert!(glsl.contains("gl_Position = "), "{glsl}");
    assert!(glsl.contains("v_texcoord = texcoord;"), "{glsl}");
}

#[test]
fn mvp_vertex_to_es_glsl_uses_legacy_keywords() {
    let m = module(mvp_vertex());
    let essl = text(&m, &Target::new(Dialect::Essl, System::Android));
    assert!(essl.starts_with("#version 100\n"), "{essl}");
    assert!(essl.contains("precision"), "{essl}");
    assert!(essl.contains("attribute vec4 position;"), "{essl}");
    assert!(essl.contains("varying vec2 v_texcoord;"), "{essl}");
    assert!(!essl.contains("layout("), "{essl}");
}

#[test]
fn mvp_vertex_to_hlsl_11() {
    let m = module(mvp_vertex());
    let hlsl = text(&m, &Target::new(Dialect::Hlsl, System::Windows));
    assert!(hlsl.contains("cbuffer Transform"), "{hlsl}");
    assert!(hlsl.contains("packoffset(c0.x)"), "{hlsl}");
    assert!(hlsl.contains("SV_Position"), "{hlsl}");
    assert!(hlsl.contains("mul("), "{hlsl}");
    assert!(hlsl.contains("struct Input"), "{hlsl}");
    assert!(hlsl.contains("struct Output"), "{hlsl}");
}

#[test]
fn mvp_vertex_to_msl() {
    let m = module(mvp_vertex());
    let msl = text(&m, &Target::new(Dialect::Msl, System::MacOs));
    assert!(msl.contains("#include <metal_stdlib>"), "{msl}");
    assert!(msl.contains("struct Transform"), "{msl}");
    assert!(msl.contains("float4x4 mvp;"), "{msl}");
    assert!(msl.contains("vertex StageOut main0("), "{msl}");
    assert!(msl.contains("[[buffer(0)]]"), "{msl}");
    assert!(msl.contains("[[position]]"), "{msl}");
    assert!(msl.contains("[[stage_in]]"), "{msl}");
}

#[test]
fn mvp_vertex_to_js() {
    let m = module(mvp_vertex());
    let js = text(&m, &Target::new(Dialect::Js, System::Html5));
    assert!(js.contains("function main(input, uniforms, output)"), "{js}");
    assert!(js.contains("_mat_mul_vec(uniforms.mvp, input.position)"), "{js}");
    assert!(js.contains("output.gl_Position = "), "{js}");
    assert!(js.contains("output.v_texcoord = input.texcoord"), "{js}");
}

#[test]
fn mvp_vertex_to_agal_bytecode() {
    let m = module(mvp_vertex());
    let emitted = emit(&m, &Target::new(Dialect::Agal, System::Flash)).unwrap();
    let Output::Binary(bytes) = &emitted.output else {
        panic!("agal must emit bytecode");
    };
    assert_eq!(bytes[0], 0xa0);
    assert_eq!(&bytes[1..5], &1u32.to_le_bytes());
    assert_eq!(bytes[5], 0xa1);
    assert_eq!(bytes[6], 0, "vertex program marker");
    assert_eq!((bytes.len() - 7) % 24, 0, "whole 24-byte tokens");
    let opcodes: Vec<u32> = bytes[7..]
        .chunks(24)
        .map(|t| u32::from_le_bytes(t[..4].try_into().unwrap()))
        .collect();
    // m44 for the matrix product, then the two output movs.
    assert_eq!(opcodes, [24, 0, 0]);
    assert_eq!(emitted.bindings.get("mvp"), Some(&0));
    assert_eq!(emitted.bindings.get("position"), Some(&0));
    assert_eq!(emitted.bindings.get("texcoord"), Some(&1));
}

#[test]
fn emission_is_deterministic() {
    let m = module(mvp_vertex());
    let target = Target::new(Dialect::Glsl, System::Windows);
    let first = emit(&m, &target).unwrap();
    let second = emit(&m, &target).unwrap();
    assert_eq!(first.output, second.output);
    assert_eq!(first.bindings_json(), second.bindings_json());
}

#[test]
fn spirv_passthrough_is_byte_identical() {
    for words in [mvp_vertex(), looping_fragment(), textured_fragment()] {
        let bytes = words_to_bytes(&words);
        let m = Module::read_from_spv_bytes(Rc::new(Context::new()), &bytes).unwrap();
        let emitted = emit(&m, &Target::new(Dialect::SpirV, System::Unknown)).unwrap();
        assert_eq!(emitted.output, Output::Binary(bytes));
    }
}

#[test]
fn loop_reconstructs_on_text_targets() {
    let m = module(looping_fragment());
    let glsl = text(&m, &Target::new(Dialect::Glsl, System::Windows));
    assert!(glsl.contains("while (true) {"), "{glsl}");
    assert!(glsl.contains("break;"), "{glsl}");
    assert!(glsl.contains("frag_color = vec4(1.0, 1.0, 1.0, 1.0);"), "{glsl}");
    let js = text(&m, &Target::new(Dialect::Js, System::Html5));
    assert!(js.contains("while (true) {"), "{js}");
}

#[test]
fn loop_is_rejected_by_agal() {
    // The control flow is perfectly structured; the target simply cannot
    // iterate, so the failure is a target capability, not a CFG defect.
    let m = module(looping_fragment());
    let err = emit(&m, &Target::new(Dialect::Agal, System::Flash)).unwrap_err();
    assert!(
        matches!(err, Error::UnsupportedFeature { .. }),
        "expected a target-capability rejection, got {err:?}"
    );
}

#[test]
fn textured_fragment_samples_per_dialect() {
    let m = module(textured_fragment());

    let glsl = text(&m, &Target::new(Dialect::Glsl, System::Windows));
    assert!(glsl.contains("uniform sampler2D tex;"), "{glsl}");
    assert!(glsl.contains("texture(tex, uv)"), "{glsl}");

    let essl = text(&m, &Target::new(Dialect::Essl, System::Android));
    assert!(essl.contains("texture2D(tex, uv)"), "{essl}");
    assert!(essl.contains("gl_FragColor = "), "{essl}");

    let hlsl11 = text(&m, &Target::new(Dialect::Hlsl, System::Windows));
    assert!(hlsl11.contains("Texture2D tex"), "{hlsl11}");
    assert!(hlsl11.contains(".Sample("), "{hlsl11}");

    let hlsl9 = text(&m, &Target::new(Dialect::Hlsl, System::Windows).with_version(9));
    assert!(hlsl9.contains("tex2D("), "{hlsl9}");

    let msl = text(&m, &Target::new(Dialect::Msl, System::Ios));
    assert!(msl.contains("texture2d<float> tex [[texture(0)]]"), "{msl}");
    assert!(msl.contains(".sample("), "{msl}");

    let js = text(&m, &Target::new(Dialect::Js, System::Html5));
    assert!(js.contains("_texture2D(uniforms.tex, input.uv)"), "{js}");
}

#[test]
fn textured_fragment_to_agal_uses_tex_token() {
    let m = module(textured_fragment());
    let emitted = emit(&m, &Target::new(Dialect::Agal, System::Flash)).unwrap();
    let Output::Binary(bytes) = &emitted.output else {
        panic!("agal must emit bytecode");
    };
    assert_eq!(bytes[6], 1, "fragment program marker");
    let opcodes: Vec<u32> = bytes[7..]
        .chunks(24)
        .map(|t| u32::from_le_bytes(t[..4].try_into().unwrap()))
        .collect();
    assert!(opcodes.contains(&40), "expected a tex token, got {opcodes:?}");
    assert_eq!(emitted.bindings.get("tex"), Some(&0));
}

#[test]
fn dangling_operand_id_fails_validation() {
    use common::{raw, str_words};
    use spvtrans::spv::{MAGIC, Op};

    let mut w = vec![MAGIC, 0x0001_0000, 0, 16, 0];
    let mut ep = vec![4u32, 4];
    ep.extend(str_words("main"));
    w.extend(raw(Op::ENTRY_POINT, &ep));
    w.extend(raw(Op::TYPE_VOID, &[1]));
    w.extend(raw(Op::TYPE_FUNCTION, &[2, 1]));
    w.extend(raw(Op::TYPE_FLOAT, &[3, 32]));
    w.extend(raw(Op::FUNCTION, &[1, 4, 0, 2]));
    w.extend(raw(Op::LABEL, &[5]));
    w.extend(raw(Op::LOAD, &[3, 6, 99]));
    w.extend(raw(Op::RETURN, &[]));
    w.extend(raw(Op::FUNCTION_END, &[]));

    let err = Module::read_from_spv_words(Rc::new(Context::new()), w).unwrap_err();
    assert!(
        matches!(err, Error::UnresolvedId { id: 99, .. }),
        "expected an unresolved id, got {err:?}"
    );
}
