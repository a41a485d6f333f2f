//! Reflection-lister tests: the `varlist` target and its serializable
//! records.

mod common;

use std::rc::Rc;

use common::{mvp_vertex, textured_fragment};
use spvtrans::emit::varlist::{self, VarKind};
use spvtrans::emit::{Dialect, System, Target, emit};
use spvtrans::{Context, Module};

fn module(words: Vec<u32>) -> Module {
    Module::read_from_spv_words(Rc::new(Context::new()), words).unwrap()
}

#[test]
fn vertex_interface_in_declaration_order() {
    let m = module(mvp_vertex());
    let vars = varlist::reflect(&m).unwrap();
    let summary: Vec<(&str, &str, VarKind, u32)> = vars
        .iter()
        .map(|v| (v.name.as_str(), v.ty.as_str(), v.kind, v.slot))
        .collect();
    assert_eq!(
        summary,
        [
            ("mvp", "mat4", VarKind::Uniform, 0),
            ("position", "vec4", VarKind::Attribute, 0),
            ("texcoord", "vec2", VarKind::Attribute, 1),
            ("v_texcoord", "vec2", VarKind::Varying, 0),
        ]
    );
}

#[test]
fn builtin_outputs_are_not_reflected() {
    let m = module(mvp_vertex());
    let vars = varlist::reflect(&m).unwrap();
    assert!(vars.iter().all(|v| v.name != "gl_Position"));
}

#[test]
fn fragment_interface_includes_the_sampler() {
    let m = module(textured_fragment());
    let vars = varlist::reflect(&m).unwrap();
    let summary: Vec<(&str, &str, VarKind, u32)> = vars
        .iter()
        .map(|v| (v.name.as_str(), v.ty.as_str(), v.kind, v.slot))
        .collect();
    assert_eq!(
        summary,
        [
            ("tex", "sampler2D", VarKind::Texture, 0),
            ("uv", "vec2", VarKind::Varying, 0),
            ("frag_color", "vec4", VarKind::Output, 1),
        ]
    );
}

#[test]
fn varlist_target_emits_one_line_per_variable() {
    let m = module(textured_fragment());
    let emitted = emit(&m, &Target::new(Dialect::VarList, System::Unknown)).unwrap();
    let text = emitted.output.as_text().unwrap();
    assert_eq!(
        text,
        "texture sampler2D tex 0\nvarying vec2 uv 0\nout vec4 frag_color 1\n"
    );
    assert_eq!(emitted.bindings.get("tex"), Some(&0));
    assert_eq!(emitted.bindings.get("frag_color"), Some(&1));
}

#[test]
fn interface_vars_serialize_for_host_tooling() {
    let m = module(mvp_vertex());
    let vars = varlist::reflect(&m).unwrap();
    let json = serde_json::to_string(&vars).unwrap();
    assert!(json.contains(r#""kind":"attribute""#), "{json}");
    assert!(json.contains(r#""name":"mvp""#), "{json}");
}
