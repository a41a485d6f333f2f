//! JavaScript emulation emission.
//!
//! Shader values become plain numbers and arrays (vectors are flat arrays,
//! matrices arrays of column arrays), and each module becomes one script:
//! a small helper preamble followed by `function main(input, uniforms,
//! output)`. The host fills `input` and `uniforms` keyed by the names in the
//! binding map and reads results off `output`; built-ins keep their `gl_*`
//! spellings as properties. Software rasterizers drive this directly, so
//! everything stays componentwise and allocation-light.

use super::{
    Bindings, Emitted, Namer, Output, RegisterClass, Target, block_body, fmt_float,
    gl_builtin_spelling,
};
use crate::cf::{self, Node, Region};
use crate::spv::{Id, Inst, Op, glsl450};
use crate::{
    ConstValue, Context, Diag, Error, Function, FxIndexMap, Module, StorageClass, Type, TypeKind,
};

pub fn emit(module: &Module, target: &Target) -> Result<Emitted, Error> {
    Emitter::new(module, target).run()
}

/// Componentwise helpers every emitted script carries. `_vop`/`_map` accept
/// scalars as length-free broadcasts so one helper serves all shapes.
const PRELUDE: &str = r#""use strict";

function _map(a, f) { return Array.isArray(a) ? a.map(f) : f(a); }
function _vop(a, b, f) {
	if (Array.isArray(a) || Array.isArray(b)) {
		var v = Array.isArray(a) ? a : b;
		var r = new Array(v.length);
		for (var i = 0; i < v.length; i++) {
			r[i] = f(Array.isArray(a) ? a[i] : a, Array.isArray(b) ? b[i] : b);
		}
		return r;
	}
	return f(a, b);
}
function _add(a, b) { return _vop(a, b, function (x, y) { return x + y; }); }
function _sub(a, b) { return _vop(a, b, function (x, y) { return x - y; }); }
function _mul(a, b) { return _vop(a, b, function (x, y) { return x * y; }); }
function _div(a, b) { return _vop(a, b, function (x, y) { return x / y; }); }
function _mod(a, b) { return _vop(a, b, function (x, y) { return x - y * Math.floor(x / y); }); }
function _scale(a, s) { return _map(a, function (x) { return x * s; }); }
function _dot(a, b) {
	var s = 0;
	for (var i = 0; i < a.length; i++) s += a[i] * b[i];
	return s;
}
function _mat_mul_vec(m, v) {
	var rows = m[0].length, r = new Array(rows);
	for (var i = 0; i < rows; i++) {
		var s = 0;
		for (var c = 0; c < m.length; c++) s += m[c][i] * v[c];
		r[i] = s;
	}
	return r;
}
function _vec_mul_mat(v, m) {
	var r = new Array(m.length);
	for (var c = 0; c < m.length; c++) r[c] = _dot(v, m[c]);
	return r;
}
function _mat_mul_mat(a, b) {
	var r = new Array(b.length);
	for (var c = 0; c < b.length; c++) r[c] = _mat_mul_vec(a, b[c]);
	return r;
}
function _transpose(m) {
	var rows = m[0].length, r = new Array(rows);
	for (var i = 0; i < rows; i++) {
		r[i] = new Array(m.length);
		for (var c = 0; c < m.length; c++) r[i][c] = m[c][i];
	}
	return r;
}
function _length(v) { return Math.sqrt(_dot(v, v)); }
function _distance(a, b) { return _length(_sub(a, b)); }
function _normalize(v) { return _scale(v, 1 / _length(v)); }
function _cross(a, b) {
	return [
		a[1] * b[2] - a[2] * b[1],
		a[2] * b[0] - a[0] * b[2],
		a[0] * b[1] - a[1] * b[0],
	];
}
function _reflect(i, n) { return _sub(i, _scale(n, 2 * _dot(n, i))); }
function _fract(x) { return _map(x, function (v) { return v - Math.floor(v); }); }
function _clamp(x, lo, hi) {
	if (Array.isArray(x)) {
		var r = new Array(x.length);
		for (var i = 0; i < x.length; i++) {
			r[i] = Math.min(Math.max(x[i], Array.isArray(lo) ? lo[i] : lo), Array.isArray(hi) ? hi[i] : hi);
		}
		return r;
	}
	return Math.min(Math.max(x, lo), hi);
}
function _mix(a, b, t) {
	if (Array.isArray(a)) {
		var r = new Array(a.length);
		for (var i = 0; i < a.length; i++) {
			r[i] = a[i] + (Array.isArray(t) ? t[i] : t) * (b[i] - a[i]);
		}
		return r;
	}
	return a + t * (b - a);
}
function _step(e, x) { return _vop(e, x, function (a, b) { return b < a ? 0.0 : 1.0; }); }
function _smoothstep(e0, e1, x) {
	var t = _clamp(_div(_sub(x, e0), _sub(e1, e0)), 0.0, 1.0);
	return _mul(_mul(t, t), _sub(3.0, _scale(t, 2)));
}
function _texture2D(tex, uv) { return tex.sample(uv[0], uv[1]); }
"#;

struct Emitter<'a> {
    m: &'a Module,
    t: &'a Target,
    namer: Namer,
    bindings: Bindings,
    diags: Vec<Diag>,
    names: FxIndexMap<Id, String>,
    ptr_pointee: FxIndexMap<Id, Type>,
    block_members: FxIndexMap<(Id, u32), String>,
    func_names: FxIndexMap<Id, String>,
    phi_assigns: FxIndexMap<Id, Vec<(Id, Id)>>,
    private_vars: Vec<(Id, Type)>,
    out: String,
    indent: usize,
}

impl<'a> Emitter<'a> {
    fn new(m: &'a Module, t: &'a Target) -> Self {
        Emitter {
            m,
            t,
            namer: Namer::new(t.dialect),
            bindings: Bindings::default(),
            diags: Vec::new(),
            names: FxIndexMap::default(),
            ptr_pointee: FxIndexMap::default(),
            block_members: FxIndexMap::default(),
            func_names: FxIndexMap::default(),
            phi_assigns: FxIndexMap::default(),
            private_vars: Vec::new(),
            out: String::new(),
            indent: 0,
        }
    }

    fn cx(&self) -> &Context {
        &self.m.cx
    }

    fn unsupported(&self, reason: impl Into<String>) -> Error {
        Error::unsupported(self.m.stage, self.t.name(), reason)
    }

    fn line(&mut self, s: impl AsRef<str>) {
        for _ in 0..self.indent {
            self.out.push('\t');
        }
        self.out.push_str(s.as_ref());
        self.out.push('\n');
    }

    fn open(&mut self, s: impl AsRef<str>) {
        self.line(s);
        self.indent += 1;
    }

    fn close(&mut self) {
        self.indent -= 1;
        self.line("}");
    }

    fn is_scalar(&self, ty: Type) -> bool {
        matches!(
            self.cx()[ty],
            TypeKind::Bool | TypeKind::Int { .. } | TypeKind::Float { .. }
        )
    }

    /// A freshly zeroed value of `ty`, spelled as a literal.
    fn zero(&self, ty: Type) -> Result<String, Error> {
        Ok(match &self.cx()[ty] {
            TypeKind::Bool => "false".to_owned(),
            TypeKind::Int { .. } => "0".to_owned(),
            TypeKind::Float { .. } => "0.0".to_owned(),
            TypeKind::Vector { elem, count } => {
                let z = self.zero(*elem)?;
                format!("[{}]", vec![z; *count as usize].join(", "))
            }
            TypeKind::Matrix { column, count } => {
                let z = self.zero(*column)?;
                format!("[{}]", vec![z; *count as usize].join(", "))
            }
            TypeKind::Array { elem, length: Some(n) } => {
                let z = self.zero(*elem)?;
                format!("[{}]", vec![z; *n as usize].join(", "))
            }
            TypeKind::Struct { members } => {
                let parts: Vec<String> =
                    members.iter().map(|m| self.zero(m.ty)).collect::<Result<_, _>>()?;
                format!("[{}]", parts.join(", "))
            }
            other => return Err(self.unsupported(format!("zero value for {other:?}"))),
        })
    }

    fn claim_name(&mut self, id: Id, fallback: &str) -> String {
        let desired = self.m.name_of(id).filter(|n| !n.is_empty()).unwrap_or(fallback);
        let name = self.namer.claim(desired);
        self.names.insert(id, name.clone());
        name
    }

    fn val(&self, id: Id) -> Result<String, Error> {
        if let Some(name) = self.names.get(&id) {
            return Ok(name.clone());
        }
        self.const_expr(id)
            .ok_or_else(|| self.unsupported(format!("value %{id} has no expressible form")))
    }

    fn const_expr(&self, id: Id) -> Option<String> {
        let c = self.m.consts.get(&id)?;
        Some(match &c.value {
            ConstValue::Bool(b) => b.to_string(),
            ConstValue::Int(v) => v.to_string(),
            ConstValue::Uint(v) => v.to_string(),
            ConstValue::Float(v) => fmt_float(*v),
            ConstValue::Composite(parts) => {
                let args: Vec<String> =
                    parts.iter().map(|&p| self.val(p)).collect::<Result<_, _>>().ok()?;
                format!("[{}]", args.join(", "))
            }
            ConstValue::Null => self.zero(c.ty).ok()?,
        })
    }

    fn run(mut self) -> Result<Emitted, Error> {
        self.out.push_str(PRELUDE);
        self.out.push('\n');
        self.globals()?;
        self.functions()?;
        Ok(Emitted {
            output: Output::Text(self.out),
            bindings: self.bindings.into_map(),
            diags: self.diags,
        })
    }

    fn globals(&mut self) -> Result<(), Error> {
        for (id, type_id, storage) in self
            .m
            .vars
            .values()
            .map(|v| (v.id, v.type_id, v.storage))
            .collect::<Vec<_>>()
        {
            let pointee_id = self.m.pointee_type_id(type_id).ok_or_else(|| {
                Error::malformed(format!("variable %{id} has a non-pointer type"))
            })?;
            let pointee = self
                .m
                .type_of(pointee_id)
                .ok_or(Error::UnresolvedId { id: pointee_id.get(), inst_index: 0 })?;
            self.ptr_pointee.insert(id, pointee);

            match storage {
                StorageClass::Uniform | StorageClass::PushConstant => {
                    let TypeKind::Struct { members } = self.cx()[pointee].clone() else {
                        return Err(self.unsupported("non-struct uniform variable"));
                    };
                    for (i, member) in members.iter().enumerate() {
                        let mname = member
                            .name
                            .map(|n| self.cx()[n].to_owned())
                            .unwrap_or_else(|| format!("u{i}"));
                        self.bindings.assign(RegisterClass::Uniform, &mname);
                        self.block_members
                            .insert((id, i as u32), format!("uniforms.{mname}"));
                    }
                }
                StorageClass::UniformConstant => {
                    let name = self
                        .m
                        .name_of(id)
                        .filter(|n| !n.is_empty())
                        .unwrap_or("tex")
                        .to_owned();
                    self.bindings.assign(RegisterClass::Texture, &name);
                    self.names.insert(id, format!("uniforms.{name}"));
                }
                StorageClass::Input => {
                    let expr = match self.m.builtin(id) {
                        Some(b) => {
                            let gl = gl_builtin_spelling(self.m.stage, b).ok_or_else(|| {
                                self.unsupported(format!("built-in {b:?} in this stage"))
                            })?;
                            format!("input.{gl}")
                        }
                        None => {
                            let name = self
                                .m
                                .name_of(id)
                                .filter(|n| !n.is_empty())
                                .unwrap_or("input_var")
                                .to_owned();
                            let class = match self.m.stage {
                                crate::Stage::Vertex => RegisterClass::Attribute,
                                _ => RegisterClass::Varying,
                            };
                            self.bindings.assign(class, &name);
                            format!("input.{name}")
                        }
                    };
                    self.names.insert(id, expr);
                }
                StorageClass::Output => {
                    if matches!(self.cx()[pointee], TypeKind::Struct { .. })
                        && self.m.member_builtin(pointee_id, 0).is_some()
                    {
                        let TypeKind::Struct { members } = self.cx()[pointee].clone() else {
                            unreachable!()
                        };
                        for i in 0..members.len() as u32 {
                            let Some(b) = self.m.member_builtin(pointee_id, i) else {
                                continue;
                            };
                            let gl = gl_builtin_spelling(self.m.stage, b).ok_or_else(|| {
                                self.unsupported(format!("built-in {b:?} in this stage"))
                            })?;
                            self.block_members.insert((id, i), format!("output.{gl}"));
                        }
                        continue;
                    }
                    let expr = match self.m.builtin(id) {
                        Some(b) => {
                            let gl = gl_builtin_spelling(self.m.stage, b).ok_or_else(|| {
                                self.unsupported(format!("built-in {b:?} in this stage"))
                            })?;
                            format!("output.{gl}")
                        }
                        None => {
                            let name = self
                                .m
                                .name_of(id)
                                .filter(|n| !n.is_empty())
                                .unwrap_or("output_var")
                                .to_owned();
                            self.bindings.assign(RegisterClass::Varying, &name);
                            format!("output.{name}")
                        }
                    };
                    self.names.insert(id, expr);
                }
                StorageClass::Private => {
                    self.claim_name(id, "global");
                    self.private_vars.push((id, pointee));
                }
                other => {
                    return Err(self.unsupported(format!("{other:?} storage at module scope")));
                }
            }
        }
        Ok(())
    }

    fn functions(&mut self) -> Result<(), Error> {
        for &id in self.m.funcs.keys() {
            let name = if id == self.m.entry_point {
                "main".to_owned()
            } else {
                let desired = self.m.name_of(id).unwrap_or("fn").to_owned();
                self.namer.claim(&desired)
            };
            self.func_names.insert(id, name);
        }
        for func in self.m.funcs.values() {
            self.function(func)?;
        }
        Ok(())
    }

    fn function(&mut self, func: &Function) -> Result<(), Error> {
        let tree = cf::structurize(self.m, func)?;
        let is_entry = func.id == self.m.entry_point;

        let mut params = Vec::new();
        for &(id, ty) in &func.params {
            let name = self.claim_name(id, "arg");
            if let Some(pointee) = self.pointee(ty) {
                self.ptr_pointee.insert(id, pointee);
                if self.is_scalar(pointee) {
                    // Numbers pass by value; writes through the pointer
                    // would be lost at the call boundary.
                    self.diags.push(Diag::warn(format!(
                        "scalar reference parameter {name} passes by value in JavaScript"
                    )));
                }
            }
            params.push(name);
        }
        if is_entry {
            self.open("function main(input, uniforms, output) {");
            for (id, ty) in self.private_vars.clone() {
                let name = self.names[&id].clone();
                let z = self.zero(ty)?;
                self.line(format!("var {name} = {z};"));
            }
        } else {
            let fname = self.func_names[&func.id].clone();
            self.open(format!("function {fname}({}) {{", params.join(", ")));
        }
        self.hoist_phis(func)?;
        self.region(func, &tree)?;
        self.close();
        self.line("");
        Ok(())
    }

    fn pointee(&self, ty: Type) -> Option<Type> {
        match self.cx()[ty] {
            TypeKind::Pointer { pointee, .. } => Some(pointee),
            _ => None,
        }
    }

    fn hoist_phis(&mut self, func: &Function) -> Result<(), Error> {
        self.phi_assigns.clear();
        for block in &func.blocks {
            for inst in self.m.insts[block.insts.clone()].iter() {
                if inst.opcode != Op::PHI {
                    continue;
                }
                let id = inst.result_id.unwrap();
                let name = self.claim_name(id, &format!("phi{id}"));
                self.line(format!("var {name};"));
                for pair in inst.operands.chunks(2) {
                    let &[value, pred] = pair else {
                        return Err(Error::malformed("odd OpPhi operand list"));
                    };
                    let value = Id::new(value).ok_or_else(|| Error::malformed("zero phi value"))?;
                    let pred = Id::new(pred).ok_or_else(|| Error::malformed("zero phi label"))?;
                    self.phi_assigns.entry(pred).or_default().push((id, value));
                }
            }
        }
        Ok(())
    }

    fn block_stmts(&mut self, func: &Function, index: usize) -> Result<(), Error> {
        let block = &func.blocks[index];
        let insts: Vec<Inst> = block_body(self.m, block).cloned().collect();
        for inst in &insts {
            self.stmt(inst)?;
        }
        if let Some(assigns) = self.phi_assigns.get(&block.label).cloned() {
            for (phi, value) in assigns {
                let lhs = self.val(phi)?;
                let rhs = self.val(value)?;
                self.line(format!("{lhs} = {rhs};"));
            }
        }
        Ok(())
    }

    fn region(&mut self, func: &Function, region: &Region) -> Result<(), Error> {
        for node in &region.nodes {
            match node {
                Node::Block { index } => self.block_stmts(func, *index)?,
                Node::If { cond, then_region, else_region } => {
                    let c = self.val(*cond)?;
                    self.open(format!("if ({c}) {{"));
                    self.region(func, then_region)?;
                    if else_region.nodes.is_empty() {
                        self.close();
                    } else {
                        self.indent -= 1;
                        self.line("} else {");
                        self.indent += 1;
                        self.region(func, else_region)?;
                        self.close();
                    }
                }
                Node::Switch { selector, cases, default } => {
                    if cases.is_empty() {
                        self.region(func, default)?;
                        continue;
                    }
                    let sel = self.val(*selector)?;
                    for (i, (literal, case)) in cases.iter().enumerate() {
                        let kw = if i == 0 { "if" } else { "} else if" };
                        if i > 0 {
                            self.indent -= 1;
                        }
                        self.open(format!("{kw} ({sel} === {}) {{", *literal as i32));
                        self.region(func, case)?;
                    }
                    self.indent -= 1;
                    self.line("} else {");
                    self.indent += 1;
                    self.region(func, default)?;
                    self.close();
                }
                Node::Loop { pre, cond, body, post } => {
                    self.open("while (true) {");
                    for &index in pre {
                        self.block_stmts(func, index)?;
                    }
                    let c = self.val(*cond)?;
                    self.line(format!("if (!({c})) break;"));
                    self.region(func, body)?;
                    if let Some(index) = post {
                        self.block_stmts(func, *index)?;
                    }
                    self.close();
                }
                Node::Break => self.line("break;"),
                Node::Continue => self.line("continue;"),
                Node::Return { value } => match value {
                    Some(v) => {
                        let e = self.val(*v)?;
                        self.line(format!("return {e};"));
                    }
                    None => {
                        if self.indent > 1 {
                            self.line("return;");
                        }
                    }
                },
                Node::Discard => {
                    self.line("output.discarded = true;");
                    self.line("return;");
                }
            }
        }
        Ok(())
    }

    fn temp(&mut self, inst: &Inst, expr: String) {
        let id = inst.result_id.unwrap();
        let fallback = format!("t{id}");
        let name = self.claim_name(id, &fallback);
        self.line(format!("var {name} = {expr};"));
    }

    fn stmt(&mut self, inst: &Inst) -> Result<(), Error> {
        let op = inst.opcode;
        match op {
            Op::VARIABLE => {
                let id = inst.result_id.unwrap();
                let pointee = self
                    .m
                    .result_type(inst)
                    .and_then(|t| match self.cx()[t] {
                        TypeKind::Pointer { pointee, .. } => Some(pointee),
                        _ => None,
                    })
                    .ok_or_else(|| Error::malformed("OpVariable with a non-pointer type"))?;
                let name = self.claim_name(id, &format!("v{id}"));
                self.ptr_pointee.insert(id, pointee);
                let init = match inst.operands.get(1).copied().and_then(Id::new) {
                    Some(init) => self.val(init)?,
                    None => self.zero(pointee)?,
                };
                self.line(format!("var {name} = {init};"));
            }
            Op::LOAD | Op::COPY_OBJECT | Op::IMAGE | Op::SAMPLED_IMAGE => {
                let expr = self.val(inst.id_operand(0)?)?;
                self.names.insert(inst.result_id.unwrap(), expr);
            }
            Op::STORE => {
                let lhs = self.val(inst.id_operand(0)?)?;
                let rhs = self.val(inst.id_operand(1)?)?;
                // Whole-array stores copy, so later writes through other
                // pointers to the same variable stay visible.
                match self.m.value_type(inst.id_operand(1)?) {
                    Some(t) if !self.is_scalar(t) => {
                        self.line(format!("{lhs} = {rhs}.slice();"));
                    }
                    _ => self.line(format!("{lhs} = {rhs};")),
                }
            }
            Op::ACCESS_CHAIN | Op::IN_BOUNDS_ACCESS_CHAIN => self.access_chain(inst)?,
            Op::PHI => {}

            Op::COMPOSITE_CONSTRUCT => {
                let ty = self
                    .m
                    .result_type(inst)
                    .ok_or_else(|| self.unsupported("construct with unresolved type"))?;
                let mut args = Vec::new();
                for i in 0..inst.operands.len() {
                    args.push(self.val(inst.id_operand(i)?)?);
                }
                let all_scalar_args = inst.operands.iter().enumerate().all(|(i, _)| {
                    inst.id_operand(i)
                        .ok()
                        .and_then(|a| self.m.value_type(a))
                        .is_some_and(|t| self.is_scalar(t))
                });
                let expr = match self.cx()[ty] {
                    // vec4(v3, w) splices the vector argument flat.
                    TypeKind::Vector { .. } if !all_scalar_args => {
                        format!("[].concat({})", args.join(", "))
                    }
                    _ => format!("[{}]", args.join(", ")),
                };
                self.temp(inst, expr);
            }
            Op::COMPOSITE_EXTRACT => {
                let mut expr = self.val(inst.id_operand(0)?)?;
                for &i in &inst.operands[1..] {
                    expr.push_str(&format!("[{i}]"));
                }
                self.names.insert(inst.result_id.unwrap(), expr);
            }
            Op::VECTOR_SHUFFLE => {
                let a_id = inst.id_operand(0)?;
                let a = self.val(a_id)?;
                let b = self.val(inst.id_operand(1)?)?;
                let a_len = match self.m.value_type(a_id).map(|t| self.cx()[t].clone()) {
                    Some(TypeKind::Vector { count, .. }) => count,
                    _ => return Err(self.unsupported("shuffle of a non-vector")),
                };
                let parts: Vec<String> = inst.operands[2..]
                    .iter()
                    .map(|&c| {
                        if c < a_len {
                            format!("{a}[{c}]")
                        } else {
                            format!("{b}[{}]", c - a_len)
                        }
                    })
                    .collect();
                self.temp(inst, format!("[{}]", parts.join(", ")));
            }

            Op::IMAGE_SAMPLE_IMPLICIT_LOD | Op::IMAGE_SAMPLE_EXPLICIT_LOD => {
                let tex = self.val(inst.id_operand(0)?)?;
                let coord = self.val(inst.id_operand(1)?)?;
                if op == Op::IMAGE_SAMPLE_EXPLICIT_LOD {
                    self.diags
                        .push(Diag::warn("explicit lod ignored; sampling mip level 0"));
                }
                self.temp(inst, format!("_texture2D({tex}, {coord})"));
            }

            Op::CONVERT_F_TO_S | Op::CONVERT_F_TO_U => {
                let x = self.val(inst.id_operand(0)?)?;
                self.temp(inst, format!("_map({x}, Math.trunc)"));
            }
            Op::CONVERT_S_TO_F | Op::CONVERT_U_TO_F => {
                // Everything is a double already.
                let expr = self.val(inst.id_operand(0)?)?;
                self.names.insert(inst.result_id.unwrap(), expr);
            }

            Op::S_NEGATE | Op::F_NEGATE => {
                let operand = inst.id_operand(0)?;
                let x = self.val(operand)?;
                let expr = match self.m.value_type(operand) {
                    Some(t) if self.is_scalar(t) => format!("(-{x})"),
                    _ => format!("_scale({x}, -1)"),
                };
                self.names.insert(inst.result_id.unwrap(), expr);
            }
            Op::LOGICAL_NOT => {
                let x = self.val(inst.id_operand(0)?)?;
                self.names.insert(inst.result_id.unwrap(), format!("(!{x})"));
            }
            Op::SELECT => {
                let c = self.val(inst.id_operand(0)?)?;
                let a = self.val(inst.id_operand(1)?)?;
                let b = self.val(inst.id_operand(2)?)?;
                self.temp(inst, format!("({c} ? {a} : {b})"));
            }
            Op::DOT => {
                let [a, b] = self.two(inst)?;
                self.temp(inst, format!("_dot({a}, {b})"));
            }
            Op::TRANSPOSE => {
                let x = self.val(inst.id_operand(0)?)?;
                self.temp(inst, format!("_transpose({x})"));
            }
            Op::MATRIX_TIMES_VECTOR => {
                let [m, v] = self.two(inst)?;
                self.temp(inst, format!("_mat_mul_vec({m}, {v})"));
            }
            Op::VECTOR_TIMES_MATRIX => {
                let [v, m] = self.two(inst)?;
                self.temp(inst, format!("_vec_mul_mat({v}, {m})"));
            }
            Op::MATRIX_TIMES_MATRIX => {
                let [a, b] = self.two(inst)?;
                self.temp(inst, format!("_mat_mul_mat({a}, {b})"));
            }
            Op::VECTOR_TIMES_SCALAR | Op::MATRIX_TIMES_SCALAR => {
                let [a, s] = self.two(inst)?;
                self.temp(inst, format!("_scale({a}, {s})"));
            }
            Op::F_REM | Op::F_MOD | Op::U_MOD | Op::S_MOD => {
                let [a, b] = self.two(inst)?;
                self.temp(inst, format!("_mod({a}, {b})"));
            }

            Op::FUNCTION_CALL => {
                let callee = inst.id_operand(0)?;
                let fname = self
                    .func_names
                    .get(&callee)
                    .cloned()
                    .ok_or(Error::UnresolvedId { id: callee.get(), inst_index: 0 })?;
                let mut args = Vec::new();
                for i in 1..inst.operands.len() {
                    args.push(self.val(inst.id_operand(i)?)?);
                }
                let call = format!("{fname}({})", args.join(", "));
                match self.m.result_type(inst).map(|t| &self.cx()[t]) {
                    Some(TypeKind::Void) => self.line(format!("{call};")),
                    _ => self.temp(inst, call),
                }
            }

            Op::EXT_INST => self.ext_inst(inst)?,

            _ => {
                let result_scalar = self
                    .m
                    .result_type(inst)
                    .is_some_and(|t| self.is_scalar(t));
                if let Some(sym) = scalar_op_symbol(op) {
                    let [a, b] = self.two(inst)?;
                    if result_scalar {
                        self.temp(inst, format!("{a} {sym} {b}"));
                    } else {
                        self.temp(
                            inst,
                            format!(
                                "_vop({a}, {b}, function (x, y) {{ return x {sym} y; }})"
                            ),
                        );
                    }
                } else {
                    return Err(self.unsupported(format!("instruction {op:?}")));
                }
            }
        }
        Ok(())
    }

    fn two(&self, inst: &Inst) -> Result<[String; 2], Error> {
        Ok([self.val(inst.id_operand(0)?)?, self.val(inst.id_operand(1)?)?])
    }

    fn access_chain(&mut self, inst: &Inst) -> Result<(), Error> {
        let base = inst.id_operand(0)?;
        let result = inst.result_id.unwrap();
        let mut next_index = 1;

        let (mut expr, mut ty): (String, Type);
        if self.block_members.keys().any(|&(v, _)| v == base) {
            let member = inst
                .id_operand(1)
                .ok()
                .and_then(|id| self.m.const_u32(id))
                .ok_or_else(|| self.unsupported("dynamic index into a block"))?;
            expr = self
                .block_members
                .get(&(base, member))
                .cloned()
                .ok_or_else(|| Error::malformed("block member out of range"))?;
            ty = self.member_type(base, member)?;
            next_index = 2;
        } else {
            expr = self.val(base)?;
            ty = self
                .ptr_pointee
                .get(&base)
                .copied()
                .ok_or_else(|| self.unsupported("access chain into a non-pointer value"))?;
        }

        for i in next_index..inst.operands.len() {
            let index_id = inst.id_operand(i)?;
            match self.cx()[ty].clone() {
                TypeKind::Struct { members } => {
                    let member = self
                        .m
                        .const_u32(index_id)
                        .ok_or_else(|| Error::malformed("dynamic struct index"))?;
                    let m = members
                        .get(member as usize)
                        .ok_or_else(|| Error::malformed("struct member out of range"))?;
                    expr.push_str(&format!("[{member}]"));
                    ty = m.ty;
                }
                TypeKind::Vector { elem, .. }
                | TypeKind::Matrix { column: elem, .. }
                | TypeKind::Array { elem, .. } => {
                    let e = self.val(index_id)?;
                    expr.push_str(&format!("[{e}]"));
                    ty = elem;
                }
                other => return Err(self.unsupported(format!("indexing into {other:?}"))),
            }
        }

        self.names.insert(result, expr);
        self.ptr_pointee.insert(result, ty);
        Ok(())
    }

    fn member_type(&self, var: Id, member: u32) -> Result<Type, Error> {
        let pointee = self
            .ptr_pointee
            .get(&var)
            .copied()
            .ok_or_else(|| self.unsupported("member access into a non-pointer value"))?;
        match &self.cx()[pointee] {
            TypeKind::Struct { members } => members
                .get(member as usize)
                .map(|m| m.ty)
                .ok_or_else(|| Error::malformed("struct member out of range")),
            _ => Err(Error::malformed("member access into a non-struct")),
        }
    }

    fn ext_inst(&mut self, inst: &Inst) -> Result<(), Error> {
        let set = inst.id_operand(0)?;
        if Some(set) != self.m.glsl_std_450 {
            let name = self.m.ext_imports.get(&set).map_or("?", String::as_str);
            return Err(self.unsupported(format!("extended instruction set {name}")));
        }
        let number = inst.operands[1];
        let mut args = Vec::new();
        for i in 2..inst.operands.len() {
            args.push(self.val(inst.id_operand(i)?)?);
        }
        let expr = match number {
            glsl450::F_ABS => format!("_map({}, Math.abs)", args[0]),
            glsl450::FLOOR => format!("_map({}, Math.floor)", args[0]),
            glsl450::CEIL => format!("_map({}, Math.ceil)", args[0]),
            glsl450::FRACT => format!("_fract({})", args[0]),
            glsl450::SIN => format!("_map({}, Math.sin)", args[0]),
            glsl450::COS => format!("_map({}, Math.cos)", args[0]),
            glsl450::TAN => format!("_map({}, Math.tan)", args[0]),
            glsl450::EXP => format!("_map({}, Math.exp)", args[0]),
            glsl450::LOG => format!("_map({}, Math.log)", args[0]),
            glsl450::EXP2 => {
                format!("_map({}, function (v) {{ return Math.pow(2, v); }})", args[0])
            }
            glsl450::LOG2 => format!("_map({}, Math.log2)", args[0]),
            glsl450::SQRT => format!("_map({}, Math.sqrt)", args[0]),
            glsl450::INVERSE_SQRT => {
                format!("_map({}, function (v) {{ return 1 / Math.sqrt(v); }})", args[0])
            }
            glsl450::POW => format!("_vop({}, {}, Math.pow)", args[0], args[1]),
            glsl450::F_MIN => format!("_vop({}, {}, Math.min)", args[0], args[1]),
            glsl450::F_MAX => format!("_vop({}, {}, Math.max)", args[0], args[1]),
            glsl450::F_CLAMP => format!("_clamp({}, {}, {})", args[0], args[1], args[2]),
            glsl450::F_MIX => format!("_mix({}, {}, {})", args[0], args[1], args[2]),
            glsl450::STEP => format!("_step({}, {})", args[0], args[1]),
            glsl450::SMOOTH_STEP => {
                format!("_smoothstep({}, {}, {})", args[0], args[1], args[2])
            }
            glsl450::FMA => {
                format!("_add(_mul({}, {}), {})", args[0], args[1], args[2])
            }
            glsl450::LENGTH => format!("_length({})", args[0]),
            glsl450::DISTANCE => format!("_distance({}, {})", args[0], args[1]),
            glsl450::CROSS => format!("_cross({}, {})", args[0], args[1]),
            glsl450::NORMALIZE => format!("_normalize({})", args[0]),
            glsl450::REFLECT => format!("_reflect({}, {})", args[0], args[1]),
            other => {
                return Err(self.unsupported(format!("GLSL.std.450 instruction {other}")));
            }
        };
        self.temp(inst, expr);
        Ok(())
    }
}

/// The componentwise symbol for an arithmetic or comparison opcode. Applied
/// directly for scalars and through `_vop` for vectors.
fn scalar_op_symbol(op: Op) -> Option<&'static str> {
    Some(match op {
        Op::I_ADD | Op::F_ADD => "+",
        Op::I_SUB | Op::F_SUB => "-",
        Op::I_MUL | Op::F_MUL => "*",
        Op::U_DIV | Op::S_DIV | Op::F_DIV => "/",
        Op::S_REM => "%",
        Op::LOGICAL_AND => "&&",
        Op::LOGICAL_OR => "||",
        Op::I_EQUAL | Op::F_ORD_EQUAL | Op::LOGICAL_EQUAL => "===",
        Op::I_NOT_EQUAL | Op::F_ORD_NOT_EQUAL | Op::LOGICAL_NOT_EQUAL => "!==",
        Op::U_LESS_THAN | Op::S_LESS_THAN | Op::F_ORD_LESS_THAN => "<",
        Op::U_LESS_THAN_EQUAL | Op::S_LESS_THAN_EQUAL | Op::F_ORD_LESS_THAN_EQUAL => "<=",
        Op::U_GREATER_THAN | Op::S_GREATER_THAN | Op::F_ORD_GREATER_THAN => ">",
        Op::U_GREATER_THAN_EQUAL | Op::S_GREATER_THAN_EQUAL | Op::F_ORD_GREATER_THAN_EQUAL => {
            ">="
        }
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stage;
    use crate::emit::Dialect;

    #[test]
    fn prelude_defines_every_helper_the_emitter_calls() {
        for helper in [
            "_map", "_vop", "_add", "_sub", "_mul", "_div", "_mod", "_scale", "_dot",
            "_mat_mul_vec", "_vec_mul_mat", "_mat_mul_mat", "_transpose", "_length",
            "_distance", "_normalize", "_cross", "_reflect", "_fract", "_clamp", "_mix",
            "_step", "_smoothstep", "_texture2D",
        ] {
            assert!(
                PRELUDE.contains(&format!("function {helper}(")),
                "missing helper {helper}"
            );
        }
    }

    #[test]
    fn namer_never_hands_out_the_entry_name() {
        let mut namer = Namer::new(Dialect::Js);
        assert_eq!(namer.claim("main"), "_main");
    }

    #[test]
    fn gl_spellings_back_the_io_properties() {
        assert_eq!(
            gl_builtin_spelling(Stage::Vertex, crate::BuiltIn::Position),
            Some("gl_Position")
        );
        assert_eq!(
            gl_builtin_spelling(Stage::Fragment, crate::BuiltIn::FragCoord),
            Some("gl_FragCoord")
        );
    }
}
