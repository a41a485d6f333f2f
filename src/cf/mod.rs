//! Structured control flow: the owned tree that emitters walk, plus its
//! reconstruction from a function's basic blocks.

pub mod structurize;

pub use structurize::structurize;

use crate::spv::Id;
use smallvec::SmallVec;

/// An ordered run of [`Node`]s executed one after another.
///
/// `nodes` is a plain `Vec`: nodes hold child regions by value, so inline
/// storage here would make the two types mutually infinite-sized.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Region {
    pub nodes: Vec<Node>,
}

impl Region {
    pub fn push(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn contains_loop(&self) -> bool {
        self.nodes.iter().any(Node::contains_loop)
    }

    /// Whether this region has a `Continue` binding to the *enclosing* loop
    /// (nested loops rebind their own).
    fn contains_continue(&self) -> bool {
        self.nodes.iter().any(|n| match n {
            Node::Continue => true,
            Node::If { then_region, else_region, .. } => {
                then_region.contains_continue() || else_region.contains_continue()
            }
            Node::Switch { cases, default, .. } => {
                cases.iter().any(|(_, r)| r.contains_continue()) || default.contains_continue()
            }
            Node::Loop { .. }
            | Node::Block { .. }
            | Node::Return { .. }
            | Node::Discard
            | Node::Break => false,
        })
    }
}

/// One structured construct. `Block` leaves carry indices into the owning
/// [`crate::Function`]'s block arena; each block appears in exactly one leaf
/// across the whole tree.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Node {
    /// Straight-line code: the instructions of one basic block, minus its
    /// merge marker and terminator (the structure itself expresses those).
    Block { index: usize },

    /// Two-way selection. `cond` is the boolean value id tested by the
    /// original `OpBranchConditional`.
    If {
        cond: Id,
        then_region: Region,
        else_region: Region,
    },

    /// Multi-way selection on an integer `selector`; each case literal gets
    /// its own region. Emitters without a native construct lower this to
    /// chained two-way selections.
    Switch {
        selector: Id,
        cases: SmallVec<[(u32, Region); 4]>,
        default: Region,
    },

    /// A loop. Per iteration: the straight-line code of the `pre` blocks
    /// runs, `cond` is tested (false exits the loop), then `body`, then the
    /// `post` block's code (a `for` increment, when the front end emitted
    /// one), then back to the top.
    Loop {
        pre: SmallVec<[usize; 2]>,
        cond: Id,
        body: Region,
        post: Option<usize>,
    },

    /// Exit the innermost enclosing loop.
    Break,
    /// Skip to the next iteration of the innermost enclosing loop.
    Continue,

    /// Function exit with an optional return value id.
    Return { value: Option<Id> },

    /// Fragment discard (`OpKill`).
    Discard,
}

impl Node {
    /// Whether any node in this subtree is a [`Node::Loop`]. Targets with no
    /// iteration primitive probe this before committing to emission.
    pub fn contains_loop(&self) -> bool {
        match self {
            Node::If { then_region, else_region, .. } => {
                then_region.contains_loop() || else_region.contains_loop()
            }
            Node::Switch { cases, default, .. } => {
                cases.iter().any(|(_, r)| r.contains_loop()) || default.contains_loop()
            }
            Node::Loop { .. } => true,
            Node::Block { .. }
            | Node::Return { .. }
            | Node::Discard
            | Node::Break
            | Node::Continue => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Node, Region};
    use crate::spv::Id;

    #[test]
    fn nested_regions_build_by_value() {
        let cond = Id::new(1).unwrap();
        let mut body = Region::default();
        body.push(Node::If {
            cond,
            then_region: Region { nodes: vec![Node::Break] },
            else_region: Region::default(),
        });
        let mut tree = Region::default();
        tree.push(Node::Block { index: 0 });
        tree.push(Node::Loop { pre: smallvec::smallvec![1], cond, body, post: None });
        assert!(tree.contains_loop());
        assert!(!tree.nodes[0].contains_loop());
    }
}
