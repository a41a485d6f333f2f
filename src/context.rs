//! [`Context`](Context) and interning: structural identity for types and
//! strings, with cheap `u32` index handles.

use crate::TypeKind;
use elsa::FrozenIndexSet;
use std::ops::Index;

/// Maximum number of distinct interned entries per interner; a shader module
/// that exceeds this is unreasonable and fails loudly rather than wrapping.
const MAX_INTERNED: usize = u32::MAX as usize;

/// Interned handle for a [`TypeKind`]: two decoded type instructions
/// describing the same structural shape resolve to one `Type`, so emitter
/// type-name caches can key on the handle alone.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Type(u32);

/// Interned handle for a [`str`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct InternedStr(u32);

/// Shared interning context: everything in it is append-only, so interning
/// only needs `&self` and handles stay valid for the context's lifetime.
///
/// Notable choices:
/// * interners are push-only ([`FrozenIndexSet`]) so a [`crate::Module`] can
///   hold `Rc<Context>` and still be read while new shapes get interned
/// * `Context: !Sync` by construction; concurrent pipeline runs each build
///   their own context (and module), never sharing one across threads
#[derive(Default)]
pub struct Context {
    types: FrozenIndexSet<Box<TypeKind>>,
    strs: FrozenIndexSet<Box<str>>,
}

// Opaque: the interners expose no cheap shared-borrow view of their
// contents, and a `Module` dump wants its tables, not the arena.
impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern<T: InternInCx>(&self, value: T) -> T::Handle {
        value.intern_in_cx(self)
    }
}

/// Dispatch helper for [`Context::intern`], so both [`TypeKind`]s and strings
/// go through one entry point (mirroring how handles are looked up via
/// `cx[handle]` for both).
pub trait InternInCx {
    type Handle;

    fn intern_in_cx(self, cx: &Context) -> Self::Handle;
}

impl InternInCx for TypeKind {
    type Handle = Type;

    fn intern_in_cx(self, cx: &Context) -> Type {
        let (idx, _) = cx.types.insert_full(Box::new(self));
        assert!(idx < MAX_INTERNED);
        Type(idx as u32)
    }
}

impl InternInCx for &'_ str {
    type Handle = InternedStr;

    fn intern_in_cx(self, cx: &Context) -> InternedStr {
        let (idx, _) = cx.strs.insert_full(self.into());
        assert!(idx < MAX_INTERNED);
        InternedStr(idx as u32)
    }
}

impl InternInCx for String {
    type Handle = InternedStr;

    fn intern_in_cx(self, cx: &Context) -> InternedStr {
        let (idx, _) = cx.strs.insert_full(self.into_boxed_str());
        assert!(idx < MAX_INTERNED);
        InternedStr(idx as u32)
    }
}

impl Index<Type> for Context {
    type Output = TypeKind;

    fn index(&self, ty: Type) -> &TypeKind {
        self.types.get_index(ty.0 as usize).unwrap()
    }
}

impl Index<InternedStr> for Context {
    type Output = str;

    fn index(&self, s: InternedStr) -> &str {
        self.strs.get_index(s.0 as usize).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structurally_equal_types_share_a_handle() {
        let cx = Context::new();
        let f32_a = cx.intern(TypeKind::Float { width: 32 });
        let f32_b = cx.intern(TypeKind::Float { width: 32 });
        assert_eq!(f32_a, f32_b);

        let v4_a = cx.intern(TypeKind::Vector { elem: f32_a, count: 4 });
        let v4_b = cx.intern(TypeKind::Vector { elem: f32_b, count: 4 });
        assert_eq!(v4_a, v4_b);
        assert_ne!(f32_a, v4_a);
    }

    #[test]
    fn interned_strings_round_trip() {
        let cx = Context::new();
        let a = cx.intern("projection");
        let b = cx.intern("projection".to_string());
        assert_eq!(a, b);
        assert_eq!(&cx[a], "projection");
    }
}
