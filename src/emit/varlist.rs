//! Interface-variable reflection: the "target" that emits no shader at all,
//! just the module's external surface. Hosts use it to set up vertex layouts
//! and uniform upload without parsing generated source.
//!
//! Only the variable and decoration tables are consulted; the function
//! bodies are never touched, so this works even for modules whose control
//! flow other targets reject.

use super::{Bindings, Emitted, Output, RegisterClass, Target};
use crate::spv::Id;
use crate::{Error, Module, Stage, StorageClass, TypeKind};
use itertools::Itertools as _;

/// One reflected interface variable.
#[derive(Clone, PartialEq, Eq, Debug, serde::Serialize)]
pub struct InterfaceVar {
    pub name: String,
    pub ty: String,
    pub kind: VarKind,
    pub slot: u32,
}

/// How the host feeds the variable, which is stage-dependent: a vertex input
/// is an attribute, a fragment input a varying.
#[derive(Copy, Clone, PartialEq, Eq, Debug, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VarKind {
    Attribute,
    Varying,
    Output,
    Uniform,
    Texture,
}

impl VarKind {
    pub fn keyword(self) -> &'static str {
        match self {
            VarKind::Attribute => "attribute",
            VarKind::Varying => "varying",
            VarKind::Output => "out",
            VarKind::Uniform => "uniform",
            VarKind::Texture => "texture",
        }
    }

    fn register_class(self) -> RegisterClass {
        match self {
            VarKind::Attribute => RegisterClass::Attribute,
            VarKind::Varying | VarKind::Output => RegisterClass::Varying,
            VarKind::Uniform => RegisterClass::Uniform,
            VarKind::Texture => RegisterClass::Texture,
        }
    }
}

/// Reflect every interface variable of `module`, in declaration order, with
/// uniform blocks flattened into their members (matching the text emitters'
/// declarations). Slots count up from zero per [`VarKind`] register class.
pub fn reflect(module: &Module) -> Result<Vec<InterfaceVar>, Error> {
    let cx = &module.cx;
    let mut bindings = Bindings::default();
    let mut vars = Vec::new();
    let mut push = |name: String, ty: String, kind: VarKind, bindings: &mut Bindings| {
        let slot = bindings.assign(kind.register_class(), &name);
        vars.push(InterfaceVar { name, ty, kind, slot });
    };

    for (&id, var) in &module.vars {
        if !var.storage.is_interface() || module.builtin(id).is_some() {
            continue;
        }
        let pointee_id = module
            .pointee_type_id(var.type_id)
            .ok_or_else(|| Error::malformed(format!("variable %{id} has a non-pointer type")))?;
        let pointee = module
            .type_of(pointee_id)
            .ok_or(Error::UnresolvedId { id: pointee_id.get(), inst_index: 0 })?;
        // Built-in blocks (`gl_PerVertex`) are not host-fed.
        if module.member_builtin(pointee_id, 0).is_some() {
            continue;
        }

        let kind = match (var.storage, module.stage) {
            (StorageClass::Input, Stage::Vertex) => VarKind::Attribute,
            (StorageClass::Input, _) => VarKind::Varying,
            (StorageClass::Output, Stage::Fragment) => VarKind::Output,
            (StorageClass::Output, _) => VarKind::Varying,
            (StorageClass::UniformConstant, _) => {
                match cx[pointee] {
                    TypeKind::Image { .. } | TypeKind::SampledImage { .. } => VarKind::Texture,
                    _ => VarKind::Uniform,
                }
            }
            _ => VarKind::Uniform,
        };

        if kind == VarKind::Uniform {
            if let TypeKind::Struct { members } = &cx[pointee] {
                for (i, member) in members.iter().enumerate() {
                    let name = member
                        .name
                        .map(|n| cx[n].to_owned())
                        .unwrap_or_else(|| format!("u{i}"));
                    push(name, type_string(module, member.ty), kind, &mut bindings);
                }
                continue;
            }
        }
        let name = module
            .name_of(id)
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| fallback_name(kind, id));
        push(name, type_string(module, pointee), kind, &mut bindings);
    }
    Ok(vars)
}

fn fallback_name(kind: VarKind, id: Id) -> String {
    format!("{}{id}", kind.keyword())
}

fn type_string(module: &Module, ty: crate::Type) -> String {
    let cx = &module.cx;
    if let TypeKind::Array { elem, length } = cx[ty] {
        let elem = super::glsl::type_name(cx, elem).unwrap_or_else(|| "?".to_owned());
        return match length {
            Some(n) => format!("{elem}[{n}]"),
            None => format!("{elem}[]"),
        };
    }
    super::glsl::type_name(cx, ty).unwrap_or_else(|| "?".to_owned())
}

pub fn emit(module: &Module, _target: &Target) -> Result<Emitted, Error> {
    let vars = reflect(module)?;
    let text = vars
        .iter()
        .map(|v| format!("{} {} {} {}", v.kind.keyword(), v.ty, v.name, v.slot))
        .join("\n");
    let bindings = vars.iter().map(|v| (v.name.clone(), v.slot)).collect();
    Ok(Emitted {
        output: Output::Text(if text.is_empty() { text } else { text + "\n" }),
        bindings,
        diags: Vec::new(),
    })
}
