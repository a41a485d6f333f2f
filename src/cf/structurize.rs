//! Reconstruction of structured control flow from basic blocks.
//!
//! The front ends this engine accepts record their source-level structure as
//! `OpSelectionMerge`/`OpLoopMerge` markers, so no general-purpose CFG
//! analysis happens here: the structurizer follows the markers, claims each
//! block for exactly one tree position, and refuses anything the markers do
//! not explain (an unmarked conditional, a stray back-edge, a branch that
//! crosses construct boundaries). The refusal is [`Error::ReducibleCfgRequired`],
//! which only targets needing the tree treat as fatal.

use super::{Node, Region};
use crate::spv::{Id, Inst, Op};
use crate::{Error, Function, Module};
use smallvec::{SmallVec, smallvec};

/// Build the structured control tree of `func`. On success every reachable
/// block of the function sits in exactly one [`Node::Block`] leaf (or in a
/// loop's `pre`/`post` slots).
pub fn structurize(module: &Module, func: &Function) -> Result<Region, Error> {
    let entry = func
        .blocks
        .first()
        .ok_or_else(|| Error::malformed(format!("function %{} has no blocks", func.id)))?
        .label;
    let mut s = Structurizer {
        module,
        func,
        claimed: vec![false; func.blocks.len()],
    };
    s.region(entry, &[])
}

/// What leaving the current construct through a given label means.
#[derive(Copy, Clone)]
enum Exit {
    /// The merge of the innermost selection: the region simply ends there.
    Merge,
    /// The merge of the innermost loop.
    Break,
    /// The continue target of the innermost loop.
    Continue,
}

struct Structurizer<'a> {
    module: &'a Module,
    func: &'a Function,
    claimed: Vec<bool>,
}

impl Structurizer<'_> {
    fn fail(&self, reason: impl Into<String>) -> Error {
        Error::ReducibleCfgRequired {
            func: self.func.id.get(),
            reason: reason.into(),
        }
    }

    fn block_index(&self, label: Id) -> Result<usize, Error> {
        self.func
            .block_index(label)
            .ok_or_else(|| Error::malformed(format!("branch to %{label}, which labels no block")))
    }

    fn claim(&mut self, index: usize) -> Result<(), Error> {
        if std::mem::replace(&mut self.claimed[index], true) {
            let label = self.func.blocks[index].label;
            return Err(self.fail(format!("block %{label} is reachable on two structured paths")));
        }
        Ok(())
    }

    fn terminator(&self, index: usize) -> &Inst {
        let range = &self.func.blocks[index].insts;
        &self.module.insts[range.end - 1]
    }

    /// The `OpSelectionMerge`/`OpLoopMerge` immediately before the
    /// terminator, if any.
    fn merge_marker(&self, index: usize) -> Option<&Inst> {
        let range = &self.func.blocks[index].insts;
        (range.len() >= 2)
            .then(|| &self.module.insts[range.end - 2])
            .filter(|i| matches!(i.opcode, Op::SELECTION_MERGE | Op::LOOP_MERGE))
    }

    /// Straight-line instruction count (everything but marker + terminator).
    fn body_len(&self, index: usize) -> usize {
        let range = &self.func.blocks[index].insts;
        range.len() - 1 - usize::from(self.merge_marker(index).is_some())
    }

    /// Structurize from `label` until a scope exit or a function exit.
    fn region(&mut self, mut label: Id, scopes: &[(Id, Exit)]) -> Result<Region, Error> {
        let mut region = Region::default();
        loop {
            match scopes.iter().rev().find(|(l, _)| *l == label) {
                Some(&(_, Exit::Merge)) => return Ok(region),
                Some(&(_, Exit::Break)) => {
                    region.push(Node::Break);
                    return Ok(region);
                }
                Some(&(_, Exit::Continue)) => {
                    region.push(Node::Continue);
                    return Ok(region);
                }
                None => {}
            }

            let index = self.block_index(label)?;
            self.claim(index)?;

            if let Some(marker) = self.merge_marker(index) {
                if marker.opcode == Op::LOOP_MERGE {
                    let merge = marker.id_operand(0)?;
                    let cont = marker.id_operand(1)?;
                    let node = self.loop_node(index, label, merge, cont)?;
                    region.push(node);
                    label = merge;
                    continue;
                }
            }

            region.push(Node::Block { index });
            let term = self.terminator(index).clone();
            match term.opcode {
                Op::RETURN => {
                    region.push(Node::Return { value: None });
                    return Ok(region);
                }
                Op::RETURN_VALUE => {
                    region.push(Node::Return { value: Some(term.id_operand(0)?) });
                    return Ok(region);
                }
                Op::KILL => {
                    region.push(Node::Discard);
                    return Ok(region);
                }
                Op::UNREACHABLE => return Ok(region),
                Op::BRANCH => label = term.id_operand(0)?,
                Op::BRANCH_CONDITIONAL => {
                    let cond = term.id_operand(0)?;
                    let then_label = term.id_operand(1)?;
                    let else_label = term.id_operand(2)?;
                    if then_label == else_label {
                        label = then_label;
                        continue;
                    }
                    let merge = match self.merge_marker(index) {
                        Some(m) if m.opcode == Op::SELECTION_MERGE => m.id_operand(0)?,
                        _ => {
                            return Err(self.fail(format!(
                                "conditional branch in %{label} carries no selection merge"
                            )));
                        }
                    };
                    let inner: SmallVec<[(Id, Exit); 4]> = scopes
                        .iter()
                        .copied()
                        .chain([(merge, Exit::Merge)])
                        .collect();
                    region.push(Node::If {
                        cond,
                        then_region: self.region(then_label, &inner)?,
                        else_region: self.region(else_label, &inner)?,
                    });
                    label = merge;
                }
                Op::SWITCH => {
                    let merge = match self.merge_marker(index) {
                        Some(m) if m.opcode == Op::SELECTION_MERGE => m.id_operand(0)?,
                        _ => {
                            return Err(self.fail(format!(
                                "switch in %{label} carries no selection merge"
                            )));
                        }
                    };
                    let selector = term.id_operand(0)?;
                    let default_label = term.id_operand(1)?;
                    let inner: SmallVec<[(Id, Exit); 4]> = scopes
                        .iter()
                        .copied()
                        .chain([(merge, Exit::Merge)])
                        .collect();
                    let mut cases = SmallVec::new();
                    for pair in term.operands[2..].chunks(2) {
                        let &[literal, target] = pair else {
                            return Err(Error::malformed("odd OpSwitch case list"));
                        };
                        let target = Id::new(target)
                            .ok_or_else(|| Error::malformed("zero OpSwitch case target"))?;
                        cases.push((literal, self.region(target, &inner)?));
                    }
                    region.push(Node::Switch {
                        selector,
                        cases,
                        default: self.region(default_label, &inner)?,
                    });
                    label = merge;
                }
                op => {
                    return Err(Error::malformed(format!(
                        "block %{label} ends in non-terminator {op:?}"
                    )));
                }
            }
        }
    }

    /// A loop headed at `header`. Two marker shapes are accepted, both of
    /// which GLSL front ends produce:
    ///
    /// * the header itself ends `OpBranchConditional %c %body %merge`
    /// * the header branches to a straight-line "check" block that does
    ///   (`for`/`while` with separate condition evaluation)
    ///
    /// The continue target, when distinct from the header, must be
    /// straight-line code branching back to the header.
    fn loop_node(
        &mut self,
        header: usize,
        header_label: Id,
        merge: Id,
        cont: Id,
    ) -> Result<Node, Error> {
        let mut pre: SmallVec<[usize; 2]> = smallvec![header];
        let mut term = self.terminator(header).clone();
        if term.opcode == Op::BRANCH {
            let check = self.block_index(term.id_operand(0)?)?;
            self.claim(check)?;
            if self.merge_marker(check).is_some() {
                return Err(self.fail("loop condition block carries its own merge"));
            }
            pre.push(check);
            term = self.terminator(check).clone();
        }
        if term.opcode != Op::BRANCH_CONDITIONAL {
            return Err(self.fail(format!(
                "loop at %{header_label} has no conditional exit to its merge"
            )));
        }
        let cond = term.id_operand(0)?;
        let body_label = term.id_operand(1)?;
        if term.id_operand(2)? != merge {
            return Err(self.fail(format!(
                "loop at %{header_label} does not exit through its false edge"
            )));
        }

        // Inside the body the outer scope stack is dropped on purpose: a
        // branch that leaves the loop other than through merge or continue
        // has no structured meaning and must fail.
        let scopes = [(merge, Exit::Break), (cont, Exit::Continue)];
        let mut body = self.region(body_label, &scopes)?;
        // A trailing `Continue` is the ordinary end of an iteration.
        if body.nodes.last() == Some(&Node::Continue) {
            body.nodes.pop();
        }

        let post = if cont == header_label {
            None
        } else {
            let cont_index = self.block_index(cont)?;
            self.claim(cont_index)?;
            let cont_term = self.terminator(cont_index);
            if !(cont_term.opcode == Op::BRANCH && cont_term.id_operand(0)? == header_label) {
                return Err(self.fail(format!(
                    "continue target %{cont} does not branch back to its loop header"
                )));
            }
            // `continue` inside the body would skip a continue block with
            // real work in it, so only allow the combination when the block
            // is empty.
            if self.body_len(cont_index) > 0 && body.contains_continue() {
                return Err(self.fail(format!(
                    "continue into non-empty continue block %{cont}"
                )));
            }
            (self.body_len(cont_index) > 0).then_some(cont_index)
        };

        Ok(Node::Loop { pre, cond, body, post })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;
    use crate::spv::MAGIC;
    use std::rc::Rc;

    fn raw(op: Op, words: &[u32]) -> Vec<u32> {
        let mut v = vec![((words.len() as u32 + 1) << 16) | u32::from(op.0)];
        v.extend_from_slice(words);
        v
    }

    fn module_with_body(bound: u32, body: impl FnOnce(&mut Vec<u32>)) -> Module {
        let mut w = vec![MAGIC, 0x0001_0000, 0, bound, 0];
        let mut ep = vec![4u32, 100];
        ep.extend(crate::spv::encode_literal_string("main"));
        w.extend(raw(Op::ENTRY_POINT, &ep));
        w.extend(raw(Op::TYPE_VOID, &[1]));
        w.extend(raw(Op::TYPE_FUNCTION, &[2, 1]));
        w.extend(raw(Op::TYPE_BOOL, &[3]));
        w.extend(raw(Op::CONSTANT_TRUE, &[3, 4]));
        w.extend(raw(Op::FUNCTION, &[1, 100, 0, 2]));
        body(&mut w);
        w.extend(raw(Op::FUNCTION_END, &[]));
        Module::read_from_spv_words(Rc::new(Context::new()), w).unwrap()
    }

    fn tree(m: &Module) -> Result<Region, Error> {
        structurize(m, &m.funcs[&m.entry_point])
    }

    #[test]
    fn if_else_reconstructs() {
        let m = module_with_body(120, |w| {
            w.extend(raw(Op::LABEL, &[101]));
            w.extend(raw(Op::SELECTION_MERGE, &[104, 0]));
            w.extend(raw(Op::BRANCH_CONDITIONAL, &[4, 102, 103]));
            w.extend(raw(Op::LABEL, &[102]));
            w.extend(raw(Op::BRANCH, &[104]));
            w.extend(raw(Op::LABEL, &[103]));
            w.extend(raw(Op::BRANCH, &[104]));
            w.extend(raw(Op::LABEL, &[104]));
            w.extend(raw(Op::RETURN, &[]));
        });
        let region = tree(&m).unwrap();
        // entry block, the If, merge block, Return.
        assert_eq!(region.nodes.len(), 4);
        let Node::If { cond, then_region, else_region } = &region.nodes[1] else {
            panic!("expected If, got {:?}", region.nodes[1]);
        };
        assert_eq!(cond.get(), 4);
        assert_eq!(then_region.nodes.as_slice(), [Node::Block { index: 1 }]);
        assert_eq!(else_region.nodes.as_slice(), [Node::Block { index: 2 }]);
        assert!(!region.contains_loop());
    }

    #[test]
    fn unmarked_conditional_is_rejected() {
        let m = module_with_body(120, |w| {
            w.extend(raw(Op::LABEL, &[101]));
            w.extend(raw(Op::BRANCH_CONDITIONAL, &[4, 102, 103]));
            w.extend(raw(Op::LABEL, &[102]));
            w.extend(raw(Op::RETURN, &[]));
            w.extend(raw(Op::LABEL, &[103]));
            w.extend(raw(Op::RETURN, &[]));
        });
        assert!(matches!(
            tree(&m),
            Err(Error::ReducibleCfgRequired { func: 100, .. })
        ));
    }

    #[test]
    fn unmarked_back_edge_is_rejected() {
        let m = module_with_body(120, |w| {
            w.extend(raw(Op::LABEL, &[101]));
            w.extend(raw(Op::BRANCH, &[102]));
            w.extend(raw(Op::LABEL, &[102]));
            w.extend(raw(Op::BRANCH, &[101]));
        });
        assert!(matches!(tree(&m), Err(Error::ReducibleCfgRequired { .. })));
    }

    #[test]
    fn while_loop_reconstructs() {
        // header %101 (LoopMerge %105 %104) -> check in header via
        // conditional; body %102 -> continue %104 -> header.
        let m = module_with_body(120, |w| {
            w.extend(raw(Op::LABEL, &[99]));
            w.extend(raw(Op::BRANCH, &[101]));
            w.extend(raw(Op::LABEL, &[101]));
            w.extend(raw(Op::LOOP_MERGE, &[105, 104, 0]));
            w.extend(raw(Op::BRANCH_CONDITIONAL, &[4, 102, 105]));
            w.extend(raw(Op::LABEL, &[102]));
            w.extend(raw(Op::BRANCH, &[104]));
            w.extend(raw(Op::LABEL, &[104]));
            w.extend(raw(Op::BRANCH, &[101]));
            w.extend(raw(Op::LABEL, &[105]));
            w.extend(raw(Op::RETURN, &[]));
        });
        let region = tree(&m).unwrap();
        let Some(Node::Loop { pre, cond, body, post }) =
            region.nodes.iter().find(|n| matches!(n, Node::Loop { .. }))
        else {
            panic!("no loop in {region:?}");
        };
        assert_eq!(pre.as_slice(), [1]);
        assert_eq!(cond.get(), 4);
        assert_eq!(body.nodes.as_slice(), [Node::Block { index: 2 }]);
        assert_eq!(*post, None);
        assert!(region.contains_loop());
    }

    #[test]
    fn loop_with_separate_check_block() {
        let m = module_with_body(130, |w| {
            w.extend(raw(Op::LABEL, &[101]));
            w.extend(raw(Op::LOOP_MERGE, &[106, 105, 0]));
            w.extend(raw(Op::BRANCH, &[102]));
            w.extend(raw(Op::LABEL, &[102]));
            w.extend(raw(Op::BRANCH_CONDITIONAL, &[4, 103, 106]));
            w.extend(raw(Op::LABEL, &[103]));
            w.extend(raw(Op::BRANCH, &[105]));
            w.extend(raw(Op::LABEL, &[105]));
            w.extend(raw(Op::BRANCH, &[101]));
            w.extend(raw(Op::LABEL, &[106]));
            w.extend(raw(Op::RETURN, &[]));
        });
        let region = tree(&m).unwrap();
        let Node::Loop { pre, .. } = &region.nodes[0] else {
            panic!("expected loop first, got {:?}", region.nodes[0]);
        };
        assert_eq!(pre.as_slice(), [0, 1]);
    }
}
