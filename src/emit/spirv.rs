//! Passthrough target: the module re-encoded as SPIR-V.
//!
//! The decoded header and instruction sequence are kept verbatim by the
//! builder, so re-encoding them reproduces the input bytes exactly. No
//! structured control tree is needed and none is built.

use super::{Emitted, Output};
use crate::spv::write::ModuleEmitter;
use crate::{Error, FxIndexMap, Module};

pub fn emit(module: &Module) -> Result<Emitted, Error> {
    let mut emitter = ModuleEmitter::with_header(module.header);
    for inst in &module.insts {
        emitter.push_inst(inst)?;
    }
    Ok(Emitted {
        output: Output::Binary(emitter.to_bytes()),
        bindings: FxIndexMap::default(),
        diags: Vec::new(),
    })
}
