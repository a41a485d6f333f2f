//! The emitters: one per target dialect, dispatched through [`emit`].
//!
//! Everything an emitter produces travels in [`Emitted`]: the output itself
//! (text or bytecode), the name-to-slot binding map the host runtime needs to
//! feed resources, and any non-fatal diagnostics. Fatal conditions come back
//! as [`Error`] with no partial output.

pub mod agal;
pub mod glsl;
pub mod hlsl;
pub mod js;
pub mod msl;
pub mod spirv;
pub mod varlist;

use crate::spv::Inst;
use crate::{Block, BuiltIn, Diag, Error, FxIndexMap, FxIndexSet, Module, Stage};
use lazy_static::lazy_static;
use rustc_hash::FxHashSet;

/// The shader languages and encodings this engine can emit.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Dialect {
    /// Re-encoded SPIR-V, byte-identical to the input.
    SpirV,
    /// Desktop GLSL source text.
    Glsl,
    /// OpenGL ES GLSL source text.
    Essl,
    /// Direct3D HLSL source text.
    Hlsl,
    /// Metal shading language source text.
    Msl,
    /// Flash AGAL shader bytecode.
    Agal,
    /// JavaScript emulation source.
    Js,
    /// Interface-variable reflection listing.
    VarList,
}

/// The platform the emitted shader will run on. Only consulted for version
/// defaults and the odd platform-specific spelling.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum System {
    Windows,
    MacOs,
    Linux,
    Ios,
    Android,
    Html5,
    Flash,
    Unity,
    Unknown,
}

impl System {
    pub fn from_tag(tag: &str) -> System {
        match tag {
            "windows" => System::Windows,
            "osx" => System::MacOs,
            "linux" => System::Linux,
            "ios" => System::Ios,
            "android" => System::Android,
            "html5" => System::Html5,
            "flash" => System::Flash,
            "unity" => System::Unity,
            _ => System::Unknown,
        }
    }
}

/// A fully resolved emission target: dialect plus language version.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Target {
    pub dialect: Dialect,
    pub system: System,
    /// Language version in the dialect's own numbering (GLSL `330`,
    /// ES `100`, HLSL shader model `9`/`11`). Zero for versionless outputs.
    pub version: u32,
    pub es: bool,
}

impl Target {
    /// A target with the conventional default version for `system`:
    /// desktop GLSL 330 (110 on Linux, whose baseline GL drivers are
    /// assumed old), ES 100, shader model 11, AGAL 100.
    pub fn new(dialect: Dialect, system: System) -> Target {
        let (version, es) = match dialect {
            Dialect::Glsl => (if system == System::Linux { 110 } else { 330 }, false),
            Dialect::Essl => (100, true),
            Dialect::Hlsl => (11, false),
            Dialect::Agal => (100, true),
            Dialect::SpirV | Dialect::Msl | Dialect::Js | Dialect::VarList => (0, false),
        };
        Target { dialect, system, version, es }
    }

    pub fn with_version(mut self, version: u32) -> Target {
        self.version = version;
        self
    }

    /// Short tag for diagnostics and error messages.
    pub fn name(&self) -> String {
        let base = match self.dialect {
            Dialect::SpirV => "spirv",
            Dialect::Glsl => "glsl",
            Dialect::Essl => "essl",
            Dialect::Hlsl => "hlsl",
            Dialect::Msl => "msl",
            Dialect::Agal => "agal",
            Dialect::Js => "js",
            Dialect::VarList => "varlist",
        };
        if self.version == 0 { base.to_owned() } else { format!("{base}-{}", self.version) }
    }
}

/// Emitter output payload.
#[derive(Clone, PartialEq, Eq, Debug, derive_more::From)]
pub enum Output {
    Text(String),
    Binary(Vec<u8>),
}

impl Output {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Output::Text(s) => Some(s),
            Output::Binary(_) => None,
        }
    }
}

/// Everything one emission produces.
#[derive(Debug)]
pub struct Emitted {
    pub output: Output,
    /// Resource and attribute name to slot index, in assignment order.
    pub bindings: FxIndexMap<String, u32>,
    pub diags: Vec<Diag>,
}

impl Emitted {
    pub fn bindings_json(&self) -> String {
        // Only strings and integers go in, so serialization cannot fail.
        serde_json::to_string(&self.bindings).unwrap()
    }
}

/// Emit `module` for `target`. The module is read-only; emitting the same
/// module for several targets in sequence is the expected usage.
pub fn emit(module: &Module, target: &Target) -> Result<Emitted, Error> {
    match target.dialect {
        Dialect::SpirV => spirv::emit(module),
        Dialect::Glsl | Dialect::Essl => glsl::emit(module, target),
        Dialect::Hlsl => hlsl::emit(module, target),
        Dialect::Msl => msl::emit(module, target),
        Dialect::Agal => agal::emit(module, target),
        Dialect::Js => js::emit(module, target),
        Dialect::VarList => varlist::emit(module, target),
    }
}

lazy_static! {
    static ref GLSL_RESERVED: FxHashSet<&'static str> = [
        "attribute", "const", "uniform", "varying", "layout", "centroid", "flat", "smooth",
        "break", "continue", "do", "for", "while", "switch", "case", "default", "if", "else",
        "in", "out", "inout", "float", "int", "void", "bool", "true", "false", "invariant",
        "discard", "return", "mat2", "mat3", "mat4", "vec2", "vec3", "vec4", "ivec2", "ivec3",
        "ivec4", "bvec2", "bvec3", "bvec4", "uint", "uvec2", "uvec3", "uvec4", "lowp",
        "mediump", "highp", "precision", "sampler2D", "sampler3D", "samplerCube", "struct",
        "input", "output", "texture", "filter", "sample", "main",
    ]
    .into_iter()
    .collect();
    static ref HLSL_RESERVED: FxHashSet<&'static str> = [
        "cbuffer", "tbuffer", "float", "float2", "float3", "float4", "float4x4", "float3x3",
        "int", "uint", "bool", "void", "true", "false", "if", "else", "for", "while", "do",
        "switch", "case", "default", "break", "continue", "return", "discard", "struct",
        "register", "packoffset", "sampler", "SamplerState", "Texture2D", "TextureCube",
        "in", "out", "inout", "static", "const", "row_major", "column_major", "matrix",
        "vector", "pass", "technique", "texture", "main",
    ]
    .into_iter()
    .collect();
    static ref MSL_RESERVED: FxHashSet<&'static str> = [
        "float", "float2", "float3", "float4", "float4x4", "float3x3", "int", "uint", "bool",
        "void", "true", "false", "if", "else", "for", "while", "do", "switch", "case",
        "default", "break", "continue", "return", "struct", "constant", "device", "thread",
        "kernel", "vertex", "fragment", "texture2d", "sampler", "using", "namespace", "main",
        "in", "out", "inout", "template", "class", "const",
    ]
    .into_iter()
    .collect();
    static ref JS_RESERVED: FxHashSet<&'static str> = [
        "var", "let", "const", "function", "return", "if", "else", "for", "while", "do",
        "switch", "case", "default", "break", "continue", "new", "delete", "typeof",
        "instanceof", "in", "of", "this", "null", "undefined", "true", "false", "class",
        "export", "import", "void", "with", "yield", "throw", "try", "catch", "finally",
        "arguments", "eval", "main",
    ]
    .into_iter()
    .collect();
}

/// Produces identifiers valid in the target language, collision-free for the
/// lifetime of one emission. Debug names from the module are preferred and
/// deduplicated with stable `_<n>` suffixes in first-come order, so repeated
/// runs over the same module yield identical text.
pub struct Namer {
    reserved: &'static FxHashSet<&'static str>,
    taken: FxIndexSet<String>,
}

impl Namer {
    pub fn new(dialect: Dialect) -> Namer {
        let reserved: &'static FxHashSet<&'static str> = match dialect {
            Dialect::Glsl | Dialect::Essl | Dialect::Agal | Dialect::VarList => &GLSL_RESERVED,
            Dialect::Hlsl => &HLSL_RESERVED,
            Dialect::Msl => &MSL_RESERVED,
            Dialect::Js | Dialect::SpirV => &JS_RESERVED,
        };
        Namer { reserved, taken: FxIndexSet::default() }
    }

    /// Claim a unique identifier as close to `desired` as the language
    /// allows.
    pub fn claim(&mut self, desired: &str) -> String {
        let mut base: String = desired
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if base.is_empty() || base.as_bytes()[0].is_ascii_digit() {
            base.insert(0, '_');
        }
        if self.reserved.contains(base.as_str()) || base.starts_with("gl_") {
            base.insert(0, '_');
        }
        if self.taken.insert(base.clone()) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}_{n}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Register classes for slot assignment. Which classes a dialect
/// distinguishes varies (HLSL keeps constant buffers, textures and samplers
/// in separate `b`/`t`/`s` files, GL numbers everything per kind), but the
/// rule is uniform: slots go up from zero per class, in declaration order.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RegisterClass {
    ConstantBuffer,
    Uniform,
    Texture,
    Sampler,
    Attribute,
    Varying,
}

#[derive(Default)]
pub struct Bindings {
    assigned: FxIndexMap<String, u32>,
    next: FxIndexMap<RegisterClass, u32>,
}

impl Bindings {
    pub fn assign(&mut self, class: RegisterClass, name: &str) -> u32 {
        let next = self.next.entry(class).or_insert(0);
        let slot = *next;
        *next += 1;
        self.assigned.insert(name.to_owned(), slot);
        slot
    }

    pub fn into_map(self) -> FxIndexMap<String, u32> {
        self.assigned
    }
}

/// GL-family spelling of a built-in (the `gl_*` pseudo-variables). `None`
/// for built-ins the stage does not surface in this family.
pub fn gl_builtin_spelling(stage: Stage, builtin: BuiltIn) -> Option<&'static str> {
    Some(match (stage, builtin) {
        (Stage::Vertex, BuiltIn::Position) => "gl_Position",
        (Stage::Vertex, BuiltIn::PointSize) => "gl_PointSize",
        (Stage::Vertex, BuiltIn::VertexId | BuiltIn::VertexIndex) => "gl_VertexID",
        (Stage::Vertex, BuiltIn::InstanceId | BuiltIn::InstanceIndex) => "gl_InstanceID",
        (Stage::Fragment, BuiltIn::FragCoord) => "gl_FragCoord",
        (Stage::Fragment, BuiltIn::PointCoord) => "gl_PointCoord",
        (Stage::Fragment, BuiltIn::FrontFacing) => "gl_FrontFacing",
        (Stage::Fragment, BuiltIn::FragDepth) => "gl_FragDepth",
        (Stage::Compute, BuiltIn::NumWorkgroups) => "gl_NumWorkGroups",
        (Stage::Compute, BuiltIn::WorkgroupId) => "gl_WorkGroupID",
        (Stage::Compute, BuiltIn::LocalInvocationId) => "gl_LocalInvocationID",
        (Stage::Compute, BuiltIn::GlobalInvocationId) => "gl_GlobalInvocationID",
        (Stage::Compute, BuiltIn::LocalInvocationIndex) => "gl_LocalInvocationIndex",
        _ => return None,
    })
}

/// HLSL semantic string for a built-in. Shader model 9 keeps the legacy
/// `POSITION`/`VPOS` spellings; model 10+ uses system-value semantics.
pub fn hlsl_builtin_semantic(stage: Stage, builtin: BuiltIn, version: u32) -> Option<&'static str> {
    let legacy = version < 10;
    Some(match (stage, builtin) {
        (Stage::Vertex, BuiltIn::Position) => {
            if legacy { "POSITION" } else { "SV_Position" }
        }
        (Stage::Vertex, BuiltIn::PointSize) => "PSIZE",
        (Stage::Vertex, BuiltIn::VertexId | BuiltIn::VertexIndex) => "SV_VertexID",
        (Stage::Vertex, BuiltIn::InstanceId | BuiltIn::InstanceIndex) => "SV_InstanceID",
        (Stage::Fragment, BuiltIn::FragCoord) => {
            if legacy { "VPOS" } else { "SV_Position" }
        }
        (Stage::Fragment, BuiltIn::FrontFacing) => {
            if legacy { "VFACE" } else { "SV_IsFrontFace" }
        }
        (Stage::Fragment, BuiltIn::FragDepth) => {
            if legacy { "DEPTH" } else { "SV_Depth" }
        }
        (Stage::Compute, BuiltIn::NumWorkgroups) => "SV_GroupCount",
        (Stage::Compute, BuiltIn::WorkgroupId) => "SV_GroupID",
        (Stage::Compute, BuiltIn::LocalInvocationId) => "SV_GroupThreadID",
        (Stage::Compute, BuiltIn::GlobalInvocationId) => "SV_DispatchThreadID",
        (Stage::Compute, BuiltIn::LocalInvocationIndex) => "SV_GroupIndex",
        _ => return None,
    })
}

/// MSL attribute for a built-in, spelled without the `[[ ]]` brackets.
pub fn msl_builtin_attribute(stage: Stage, builtin: BuiltIn) -> Option<&'static str> {
    Some(match (stage, builtin) {
        (Stage::Vertex, BuiltIn::Position) => "position",
        (Stage::Vertex, BuiltIn::PointSize) => "point_size",
        (Stage::Vertex, BuiltIn::VertexId | BuiltIn::VertexIndex) => "vertex_id",
        (Stage::Vertex, BuiltIn::InstanceId | BuiltIn::InstanceIndex) => "instance_id",
        (Stage::Fragment, BuiltIn::FragCoord) => "position",
        (Stage::Fragment, BuiltIn::PointCoord) => "point_coord",
        (Stage::Fragment, BuiltIn::FrontFacing) => "front_facing",
        (Stage::Fragment, BuiltIn::FragDepth) => "depth(any)",
        (Stage::Compute, BuiltIn::NumWorkgroups) => "threadgroups_per_grid",
        (Stage::Compute, BuiltIn::WorkgroupId) => "threadgroup_position_in_grid",
        (Stage::Compute, BuiltIn::LocalInvocationId) => "thread_position_in_threadgroup",
        (Stage::Compute, BuiltIn::GlobalInvocationId) => "thread_position_in_grid",
        (Stage::Compute, BuiltIn::LocalInvocationIndex) => "thread_index_in_threadgroup",
        _ => return None,
    })
}

/// Format a float literal so it parses as a float in every C-like target
/// (a trailing `.0` where `{}` would print an integer).
pub fn fmt_float(v: f64) -> String {
    if v.is_finite() && v == v.trunc() && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

/// The straight-line instructions of a block: everything except merge
/// markers and the terminator.
pub(crate) fn block_body<'a>(
    module: &'a Module,
    block: &Block,
) -> impl Iterator<Item = &'a Inst> + 'a {
    use crate::spv::Op;
    module.insts[block.insts.clone()].iter().filter(|i| {
        !crate::module::is_terminator_op(i.opcode)
            && !matches!(i.opcode, Op::SELECTION_MERGE | Op::LOOP_MERGE | Op::LINE | Op::NO_LINE)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namer_dedupes_and_avoids_keywords() {
        let mut namer = Namer::new(Dialect::Glsl);
        assert_eq!(namer.claim("color"), "color");
        assert_eq!(namer.claim("color"), "color_2");
        assert_eq!(namer.claim("color"), "color_3");
        assert_eq!(namer.claim("float"), "_float");
        assert_eq!(namer.claim("gl_thing"), "_gl_thing");
        assert_eq!(namer.claim("2fast"), "_2fast");
        assert_eq!(namer.claim("a-b"), "a_b");
    }

    #[test]
    fn bindings_count_per_class_in_order() {
        let mut b = Bindings::default();
        assert_eq!(b.assign(RegisterClass::Uniform, "projection"), 0);
        assert_eq!(b.assign(RegisterClass::Texture, "tex"), 0);
        assert_eq!(b.assign(RegisterClass::Uniform, "model"), 1);
        let map = b.into_map();
        assert_eq!(
            map.into_iter().collect::<Vec<_>>(),
            [
                ("projection".to_owned(), 0),
                ("tex".to_owned(), 0),
                ("model".to_owned(), 1)
            ]
        );
    }

    #[test]
    fn gl_spellings_cover_every_stage_builtin() {
        // Every non-`Other` built-in must be spellable in the stage that
        // produces it; the GL and HLSL tables are the two emitters consult.
        let vertex = [
            BuiltIn::Position,
            BuiltIn::PointSize,
            BuiltIn::VertexId,
            BuiltIn::VertexIndex,
            BuiltIn::InstanceId,
            BuiltIn::InstanceIndex,
        ];
        let fragment = [BuiltIn::FragCoord, BuiltIn::FrontFacing, BuiltIn::FragDepth];
        let compute = [
            BuiltIn::NumWorkgroups,
            BuiltIn::WorkgroupId,
            BuiltIn::LocalInvocationId,
            BuiltIn::GlobalInvocationId,
            BuiltIn::LocalInvocationIndex,
        ];
        for b in vertex {
            assert!(gl_builtin_spelling(Stage::Vertex, b).is_some(), "{b:?}");
            assert!(hlsl_builtin_semantic(Stage::Vertex, b, 11).is_some(), "{b:?}");
            assert!(hlsl_builtin_semantic(Stage::Vertex, b, 9).is_some(), "{b:?}");
            assert!(msl_builtin_attribute(Stage::Vertex, b).is_some(), "{b:?}");
        }
        for b in fragment {
            assert!(gl_builtin_spelling(Stage::Fragment, b).is_some(), "{b:?}");
            assert!(hlsl_builtin_semantic(Stage::Fragment, b, 11).is_some(), "{b:?}");
            assert!(msl_builtin_attribute(Stage::Fragment, b).is_some(), "{b:?}");
        }
        for b in compute {
            assert!(gl_builtin_spelling(Stage::Compute, b).is_some(), "{b:?}");
            assert!(hlsl_builtin_semantic(Stage::Compute, b, 11).is_some(), "{b:?}");
            assert!(msl_builtin_attribute(Stage::Compute, b).is_some(), "{b:?}");
        }
    }

    #[test]
    fn version_defaults_follow_system() {
        assert_eq!(Target::new(Dialect::Glsl, System::Windows).version, 330);
        assert_eq!(Target::new(Dialect::Glsl, System::Linux).version, 110);
        let essl = Target::new(Dialect::Essl, System::Android);
        assert_eq!((essl.version, essl.es), (100, true));
        assert_eq!(Target::new(Dialect::Hlsl, System::Windows).version, 11);
        assert_eq!(
            Target::new(Dialect::Hlsl, System::Windows).with_version(9).version,
            9
        );
        assert_eq!(Target::new(Dialect::Agal, System::Flash).name(), "agal-100");
    }

    #[test]
    fn float_literals_stay_floats() {
        assert_eq!(fmt_float(1.0), "1.0");
        assert_eq!(fmt_float(0.5), "0.5");
        assert_eq!(fmt_float(-2.0), "-2.0");
    }
}
