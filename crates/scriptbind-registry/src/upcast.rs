//! Upcast chain.
//!
//! A handle stores a type-erased pointer to the object it was pushed as.
//! When native code asks for a base type instead, the pointer must be moved
//! to the base sub-object, which generally lives at a different address for
//! every base but the first. Each exported base relationship installs an
//! [`UpcastLink`] from derived to base; [`UpcastChain::resolve`] composes the
//! links along the unique path between two classes.
//!
//! Uses `petgraph::DiGraph` with:
//! - Nodes: mutable [`NativeTypeId`]s of exported classes
//! - Edges: derived → base links
//!
//! More than one path between two classes is reported as
//! [`BridgeError::AmbiguousUpcast`].

use std::cell::RefCell;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

use petgraph::algo::all_simple_paths;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;
use scriptbind_core::{BridgeError, NativeTypeId, Result};

type Adjust = dyn Fn(NonNull<()>) -> NonNull<()>;

/// A derived → base edge with its pointer adjustment.
#[derive(Clone)]
pub struct UpcastLink {
    derived: NativeTypeId,
    base: NativeTypeId,
    adjust: Rc<Adjust>,
}

impl UpcastLink {
    /// Build a link from a projection of `D` onto its `B` sub-object.
    pub fn new<D: 'static, B: 'static>(
        derived_name: &'static str,
        base_name: &'static str,
        project: impl Fn(&D) -> &B + 'static,
    ) -> Self {
        let adjust = move |ptr: NonNull<()>| {
            // SAFETY: `apply` requires `ptr` to point to a live `D`.
            let derived = unsafe { ptr.cast::<D>().as_ref() };
            NonNull::from(project(derived)).cast::<()>()
        };
        Self {
            derived: NativeTypeId::named::<D>(derived_name),
            base: NativeTypeId::named::<B>(base_name),
            adjust: Rc::new(adjust),
        }
    }

    pub fn derived(&self) -> NativeTypeId {
        self.derived
    }

    pub fn base(&self) -> NativeTypeId {
        self.base
    }

    /// Move a derived pointer to its base sub-object.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live value of the derived type.
    pub unsafe fn apply(&self, ptr: NonNull<()>) -> NonNull<()> {
        (self.adjust)(ptr)
    }
}

impl fmt::Debug for UpcastLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UpcastLink({} -> {})", self.derived, self.base)
    }
}

/// The composed adjustment between two classes.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    links: Rc<[UpcastLink]>,
}

impl Resolution {
    /// Resolution between a class and itself.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn is_identity(&self) -> bool {
        self.links.is_empty()
    }

    /// Number of links traversed.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Apply every link in order.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live value of the class the resolution starts
    /// from.
    pub unsafe fn apply(&self, ptr: NonNull<()>) -> NonNull<()> {
        self.links.iter().fold(ptr, |ptr, link| {
            // SAFETY: each link yields a pointer to a live value of the next
            // link's derived type.
            unsafe { link.apply(ptr) }
        })
    }
}

/// Every base relationship registered with one engine.
#[derive(Default)]
pub struct UpcastChain {
    graph: DiGraph<NativeTypeId, UpcastLink>,
    nodes: FxHashMap<NativeTypeId, NodeIndex>,
    cache: RefCell<FxHashMap<(NativeTypeId, NativeTypeId), Resolution>>,
}

impl UpcastChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, id: NativeTypeId) -> NodeIndex {
        let id = id.as_mutable();
        *self
            .nodes
            .entry(id)
            .or_insert_with(|| self.graph.add_node(id))
    }

    /// Install a derived → base link.
    pub fn register(&mut self, link: UpcastLink) -> Result<()> {
        if link.derived.same_type(&link.base) {
            return Err(BridgeError::runtime(format!(
                "{} cannot be its own base",
                link.derived
            )));
        }
        let from = self.node(link.derived);
        let to = self.node(link.base);
        if self.graph.find_edge(from, to).is_some() {
            return Err(BridgeError::AlreadyExported {
                what: format!("base {} of {}", link.base, link.derived),
            });
        }

        log::debug!("registered upcast {} -> {}", link.derived, link.base);
        self.graph.add_edge(from, to, link);
        self.cache.borrow_mut().clear();
        Ok(())
    }

    /// Whether `base` is reachable from `derived`.
    pub fn is_ancestor(&self, derived: NativeTypeId, base: NativeTypeId) -> bool {
        match (
            self.nodes.get(&derived.as_mutable()),
            self.nodes.get(&base.as_mutable()),
        ) {
            (Some(&from), Some(&to)) => petgraph::algo::has_path_connecting(&self.graph, from, to, None),
            _ => false,
        }
    }

    /// Number of registered links.
    pub fn len(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.edge_count() == 0
    }

    /// Find the adjustment from `derived` to `base`.
    ///
    /// Const flags are ignored; the caller enforces const rules.
    pub fn resolve(&self, derived: NativeTypeId, base: NativeTypeId) -> Result<Resolution> {
        let derived = derived.as_mutable();
        let base = base.as_mutable();
        if derived == base {
            return Ok(Resolution::identity());
        }
        if let Some(hit) = self.cache.borrow().get(&(derived, base)) {
            return Ok(hit.clone());
        }

        let not_registered = || BridgeError::NotRegistered {
            from: derived.name(),
            to: base.name(),
        };
        let from = *self.nodes.get(&derived).ok_or_else(not_registered)?;
        let to = *self.nodes.get(&base).ok_or_else(not_registered)?;

        let paths: Vec<Vec<NodeIndex>> =
            all_simple_paths::<Vec<_>, _>(&self.graph, from, to, 0, None).collect();
        let path = match paths.as_slice() {
            [] => return Err(not_registered()),
            [path] => path,
            _ => {
                return Err(BridgeError::AmbiguousUpcast {
                    from: derived.name(),
                    to: base.name(),
                    paths: paths.len(),
                });
            }
        };

        let links: Vec<UpcastLink> = path
            .windows(2)
            .filter_map(|pair| self.graph.find_edge(pair[0], pair[1]))
            .map(|edge| self.graph[edge].clone())
            .collect();
        let resolution = Resolution {
            links: links.into(),
        };
        self.cache
            .borrow_mut()
            .insert((derived, base), resolution.clone());
        Ok(resolution)
    }
}

impl fmt::Debug for UpcastChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpcastChain")
            .field("classes", &self.graph.node_count())
            .field("links", &self.graph.edge_count())
            .field("cached", &self.cache.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Left {
        left: i32,
    }
    struct Right {
        right: i32,
    }
    struct Both {
        _pad: u64,
        left: Left,
        right: Right,
    }
    struct Top {
        both: Both,
    }

    fn both() -> Both {
        Both {
            _pad: 0,
            left: Left { left: 1 },
            right: Right { right: 2 },
        }
    }

    fn chain() -> UpcastChain {
        let mut chain = UpcastChain::new();
        chain
            .register(UpcastLink::new("Both", "Left", |b: &Both| &b.left))
            .unwrap();
        chain
            .register(UpcastLink::new("Both", "Right", |b: &Both| &b.right))
            .unwrap();
        chain
    }

    #[test]
    fn resolves_each_base_at_its_own_offset() {
        let chain = chain();
        let value = both();
        let ptr = NonNull::from(&value).cast::<()>();

        let left = chain
            .resolve(NativeTypeId::of::<Both>(), NativeTypeId::of::<Left>())
            .unwrap();
        let right = chain
            .resolve(NativeTypeId::of::<Both>(), NativeTypeId::of_const::<Right>())
            .unwrap();

        let left = unsafe { left.apply(ptr).cast::<Left>().as_ref() };
        let right = unsafe { right.apply(ptr).cast::<Right>().as_ref() };
        assert!(std::ptr::eq(left, &value.left));
        assert!(std::ptr::eq(right, &value.right));
        assert_eq!(right.right, 2);
    }

    #[test]
    fn resolves_transitively() {
        let mut chain = chain();
        chain
            .register(UpcastLink::new("Top", "Both", |t: &Top| &t.both))
            .unwrap();
        let top = Top { both: both() };

        let resolution = chain
            .resolve(NativeTypeId::of::<Top>(), NativeTypeId::of::<Left>())
            .unwrap();
        assert_eq!(resolution.len(), 2);
        let left = unsafe {
            resolution
                .apply(NonNull::from(&top).cast())
                .cast::<Left>()
                .as_ref()
        };
        assert_eq!(left.left, 1);
        assert!(chain.is_ancestor(NativeTypeId::of::<Top>(), NativeTypeId::of::<Right>()));
        assert!(!chain.is_ancestor(NativeTypeId::of::<Left>(), NativeTypeId::of::<Top>()));
    }

    #[test]
    fn same_class_is_identity() {
        let chain = UpcastChain::new();
        let resolution = chain
            .resolve(NativeTypeId::of::<Both>(), NativeTypeId::of_const::<Both>())
            .unwrap();
        assert!(resolution.is_identity());
    }

    #[test]
    fn unrelated_classes_are_not_registered() {
        let chain = chain();
        assert!(matches!(
            chain.resolve(NativeTypeId::of::<Left>(), NativeTypeId::of::<Right>()),
            Err(BridgeError::NotRegistered { .. })
        ));
        assert!(matches!(
            chain.resolve(NativeTypeId::of::<Top>(), NativeTypeId::of::<Left>()),
            Err(BridgeError::NotRegistered { .. })
        ));
    }

    #[test]
    fn diamond_is_ambiguous() {
        struct Root;
        struct A {
            root: Root,
        }
        struct B {
            root: Root,
        }
        struct D {
            a: A,
            b: B,
        }

        let mut chain = UpcastChain::new();
        chain.register(UpcastLink::new("A", "Root", |a: &A| &a.root)).unwrap();
        chain.register(UpcastLink::new("B", "Root", |b: &B| &b.root)).unwrap();
        chain.register(UpcastLink::new("D", "A", |d: &D| &d.a)).unwrap();
        chain.register(UpcastLink::new("D", "B", |d: &D| &d.b)).unwrap();

        assert_eq!(
            chain
                .resolve(NativeTypeId::of::<D>(), NativeTypeId::of::<Root>())
                .unwrap_err(),
            BridgeError::AmbiguousUpcast {
                from: std::any::type_name::<D>(),
                to: std::any::type_name::<Root>(),
                paths: 2,
            }
        );
        assert!(chain.resolve(NativeTypeId::of::<D>(), NativeTypeId::of::<A>()).is_ok());
    }

    #[test]
    fn duplicate_link_is_rejected() {
        let mut chain = chain();
        let err = chain
            .register(UpcastLink::new("Both", "Left", |b: &Both| &b.left))
            .unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyExported { .. }));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn registering_clears_cache() {
        let mut chain = chain();
        assert!(chain.resolve(NativeTypeId::of::<Top>(), NativeTypeId::of::<Left>()).is_err());
        chain.register(UpcastLink::new("Top", "Both", |t: &Top| &t.both)).unwrap();
        assert!(chain.resolve(NativeTypeId::of::<Top>(), NativeTypeId::of::<Left>()).is_ok());
    }
}
