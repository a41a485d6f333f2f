//! **`spvtrans`** consumes SPIR-V bytecode produced by an external GLSL
//! front end and re-emits semantically equivalent shader code in a chosen
//! target dialect, so that one shader source can run across heterogeneous
//! graphics back ends.
//!
//! #### Notable types/modules
//!
//! ##### IR data types
//! * [`Context`]: handles interning ([`Type`]s and strings)
//! * [`Module`]: id-keyed tables for types, constants, variables and functions,
//!   built once from a decoded instruction stream and immutable afterwards
//!
//! ##### Pipeline stages
//! * [`spv::read`]/[`spv::write`]: SPIR-V word-stream decoding/encoding
//! * [`Module::build`](Module::build): instruction stream -> IR tables
//! * [`cf::structurize`]: structured control-tree reconstruction
//! * [`emit`](mod@emit): the target emitters (text dialects, bytecode, reflection)

// BEGIN - Embark standard lints v6 for Rust 1.55+
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::flat_map_option,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::from_iter_instead_of_collect,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_digit_groups,
    clippy::large_stack_arrays,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_same_arms,
    clippy::match_wild_err_arm,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::missing_enforced_import_renames,
    clippy::mut_mut,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::needless_for_each,
    clippy::option_option,
    clippy::path_buf_push_overwrite,
    clippy::ptr_as_ptr,
    clippy::rc_mutex,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::single_match_else,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v6 for Rust 1.55+
// crate-specific exceptions:
#![allow(
    // NOTE: ignored for readability (`match` used when `if let` is too long).
    clippy::single_match_else,

    // NOTE: ignored because it's misguided to suggest `let mut s = ...;`
    // and `s.push_str(...);` when `+` is equivalent and does not require `let`.
    clippy::string_add,
)]
#![forbid(unsafe_code)]

pub mod cf;
mod context;
pub mod emit;
mod module;
pub mod spv;

use smallvec::SmallVec;

// HACK: work around the lack of `FxIndex{Map,Set}` type aliases elsewhere.
#[doc(hidden)]
pub type FxIndexMap<K, V> =
    indexmap::IndexMap<K, V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;
#[doc(hidden)]
pub type FxIndexSet<V> = indexmap::IndexSet<V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;

pub use context::{Context, InternInCx, InternedStr, Type};
pub use module::Module;

use spv::Id;

/// Shading stage a module was compiled for, carried alongside the module from
/// decode time through emission (drives built-in naming and entry-point
/// wrapping per target).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, serde::Serialize)]
pub enum Stage {
    Vertex,
    TessControl,
    TessEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Vertex,
        Stage::TessControl,
        Stage::TessEvaluation,
        Stage::Geometry,
        Stage::Fragment,
        Stage::Compute,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Vertex => "vertex",
            Stage::TessControl => "tess-control",
            Stage::TessEvaluation => "tess-evaluation",
            Stage::Geometry => "geometry",
            Stage::Fragment => "fragment",
            Stage::Compute => "compute",
        }
    }

    /// The SPIR-V `ExecutionModel` operand of `OpEntryPoint`.
    pub fn from_execution_model(model: u32) -> Option<Stage> {
        Some(match model {
            0 => Stage::Vertex,
            1 => Stage::TessControl,
            2 => Stage::TessEvaluation,
            3 => Stage::Geometry,
            4 => Stage::Fragment,
            5 => Stage::Compute,
            _ => return None,
        })
    }
}

/// Definition of an interned [`Type`]: a tagged variant over every type shape
/// the engine understands, interned by structural identity so that two decoded
/// type instructions describing the same shape resolve to one handle.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypeKind {
    Void,
    Bool,
    Int {
        width: u32,
        signed: bool,
    },
    Float {
        width: u32,
    },
    Vector {
        elem: Type,
        count: u32,
    },
    /// `count` columns, each of type `column` (always a `Vector`).
    Matrix {
        column: Type,
        count: u32,
    },
    /// `length: None` is a runtime array (`OpTypeRuntimeArray`).
    Array {
        elem: Type,
        length: Option<u32>,
    },
    /// Member names come from `OpMemberName` debug info but are part of the
    /// emitter-visible identity (they appear in emitted declarations).
    Struct {
        members: SmallVec<[StructMember; 4]>,
    },
    Pointer {
        storage: StorageClass,
        pointee: Type,
    },
    Image {
        sampled_elem: Type,
        dim: ImageDim,
        arrayed: bool,
        depth: bool,
    },
    Sampler,
    SampledImage {
        image: Type,
    },
    Function {
        ret: Type,
        params: SmallVec<[Type; 4]>,
    },
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct StructMember {
    pub name: Option<InternedStr>,
    pub ty: Type,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ImageDim {
    Dim1D,
    Dim2D,
    Dim3D,
    Cube,
}

impl ImageDim {
    pub fn from_word(word: u32) -> Option<ImageDim> {
        Some(match word {
            0 => ImageDim::Dim1D,
            1 => ImageDim::Dim2D,
            2 => ImageDim::Dim3D,
            3 => ImageDim::Cube,
            _ => return None,
        })
    }
}

/// SPIR-V storage class of a pointer type or variable.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum StorageClass {
    UniformConstant,
    Input,
    Uniform,
    Output,
    Workgroup,
    Private,
    Function,
    PushConstant,
    Other(u32),
}

impl StorageClass {
    pub fn from_word(word: u32) -> StorageClass {
        match word {
            0 => StorageClass::UniformConstant,
            1 => StorageClass::Input,
            2 => StorageClass::Uniform,
            3 => StorageClass::Output,
            4 => StorageClass::Workgroup,
            6 => StorageClass::Private,
            7 => StorageClass::Function,
            9 => StorageClass::PushConstant,
            _ => StorageClass::Other(word),
        }
    }

    /// Interface storage classes are the ones reflected by the variable
    /// lister and assigned slots/semantics by emitters.
    pub fn is_interface(self) -> bool {
        matches!(
            self,
            StorageClass::Input
                | StorageClass::Output
                | StorageClass::Uniform
                | StorageClass::UniformConstant
                | StorageClass::PushConstant
        )
    }
}

/// A variable whose meaning is fixed by the shading-stage contract rather
/// than user-named (SPIR-V `BuiltIn` decoration operand).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, serde::Serialize)]
pub enum BuiltIn {
    Position,
    PointSize,
    VertexId,
    InstanceId,
    VertexIndex,
    InstanceIndex,
    FragCoord,
    PointCoord,
    FrontFacing,
    FragDepth,
    NumWorkgroups,
    WorkgroupId,
    LocalInvocationId,
    GlobalInvocationId,
    LocalInvocationIndex,
    Other(u32),
}

impl BuiltIn {
    pub fn from_word(word: u32) -> BuiltIn {
        match word {
            0 => BuiltIn::Position,
            1 => BuiltIn::PointSize,
            5 => BuiltIn::VertexId,
            6 => BuiltIn::InstanceId,
            15 => BuiltIn::FragCoord,
            16 => BuiltIn::PointCoord,
            17 => BuiltIn::FrontFacing,
            22 => BuiltIn::FragDepth,
            24 => BuiltIn::NumWorkgroups,
            26 => BuiltIn::WorkgroupId,
            27 => BuiltIn::LocalInvocationId,
            28 => BuiltIn::GlobalInvocationId,
            29 => BuiltIn::LocalInvocationIndex,
            42 => BuiltIn::VertexIndex,
            43 => BuiltIn::InstanceIndex,
            _ => BuiltIn::Other(word),
        }
    }
}

/// One decoration record; `member: Some(idx)` for `OpMemberDecorate`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Decoration {
    pub member: Option<u32>,
    pub kind: DecorationKind,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum DecorationKind {
    Block,
    BufferBlock,
    RowMajor,
    ColMajor,
    ArrayStride(u32),
    MatrixStride(u32),
    BuiltIn(BuiltIn),
    NoPerspective,
    Flat,
    Location(u32),
    Binding(u32),
    DescriptorSet(u32),
    Offset(u32),
    Other {
        decoration: u32,
        operands: SmallVec<[u32; 2]>,
    },
}

/// A constant owned by the [`Module`]: its interned type plus literal value
/// (scalar, or composite of constant ids for aggregates).
#[derive(Clone, PartialEq, Debug)]
pub struct Constant {
    pub ty: Type,
    pub value: ConstValue,
}

#[derive(Clone, PartialEq, Debug)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Composite(SmallVec<[Id; 4]>),
    Null,
}

/// A module-scope variable: the join point between SPIR-V's register-like
/// model and a target language's named-variable model. `ty` is always a
/// pointer type; `type_id` keeps the original id for decoration lookups.
#[derive(Clone, Debug)]
pub struct Variable {
    pub id: Id,
    pub type_id: Id,
    pub ty: Type,
    pub storage: StorageClass,
    pub initializer: Option<Id>,
}

/// A function: return type, parameters, and its basic blocks in declaration
/// order (the block arena that [`cf`] trees index into).
#[derive(Clone, Debug)]
pub struct Function {
    pub id: Id,
    pub ret: Type,
    pub params: SmallVec<[(Id, Type); 2]>,
    pub blocks: Vec<Block>,
}

impl Function {
    /// Index of the block labelled `label` in `blocks`.
    pub fn block_index(&self, label: Id) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }
}

/// A basic block: label, plus a range into the module's decoded instruction
/// sequence. The last instruction in the range is the sole terminator.
#[derive(Clone, Debug)]
pub struct Block {
    pub label: Id,
    /// `insts.start..insts.end` indices into [`Module::insts`].
    pub insts: std::ops::Range<usize>,
}

/// Fatal pipeline errors. Non-fatal conditions travel as [`Diag`]s on
/// emitter output instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad header, truncated instruction, inconsistent word count. Aborts the
    /// whole pipeline; no partial output.
    #[error("malformed SPIR-V module: {reason}")]
    MalformedModule { reason: String },

    /// An operand declared as an id reference has no definition anywhere in
    /// the module; indicates a front-end or decoder bug.
    #[error("unresolved id %{id} (instruction #{inst_index})")]
    UnresolvedId { id: u32, inst_index: usize },

    /// The selected target needs a structured control tree, but the function's
    /// CFG has an unmarked conditional or a back-edge outside a recognized
    /// loop construct. Targets that emit raw blocks proceed without one.
    #[error("function %{func}: reducible control flow required: {reason}")]
    ReducibleCfgRequired { func: u32, reason: String },

    /// No valid lowering exists on the selected target (e.g. a loop on a
    /// target with no iteration primitive).
    #[error("{stage} shader, target {target}: unsupported feature: {reason}")]
    UnsupportedFeature {
        stage: &'static str,
        target: String,
        reason: String,
    },
}

impl Error {
    pub(crate) fn malformed(reason: impl Into<String>) -> Error {
        Error::MalformedModule { reason: reason.into() }
    }

    pub(crate) fn unsupported(
        stage: Stage,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Error {
        Error::UnsupportedFeature {
            stage: stage.name(),
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// A non-fatal diagnostic produced during emission and recorded alongside
/// best-effort output (e.g. a feature the target can only approximate).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Diag {
    pub level: DiagLevel,
    pub message: String,
}

impl Diag {
    pub fn warn(message: impl Into<String>) -> Diag {
        Diag { level: DiagLevel::Warning, message: message.into() }
    }

    pub fn err(message: impl Into<String>) -> Diag {
        Diag { level: DiagLevel::Error, message: message.into() }
    }
}

/// The "severity" level of a [`Diag`]nostic.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DiagLevel {
    Warning,
    Error,
}
