//! Response convergence predicates
//!
//! A request is answered by whichever provider fragment "converges" on the
//! element the request was about. Fragments are judged by the paths of the
//! elements they carry, not by the local cache, so an unrelated unsolicited
//! update can never resolve a pending request.

use emberplus_types::{Addressing, Element, ElementId, EmberPath, Tree};

/// What a pending request is waiting to see in a response fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Top-level directory: any direct Root child will do
    Root,
    /// Matrix operation: the fragment must carry the matrix itself
    Matrix(EmberPath),
    /// Everything else: the element itself or any direct child of it
    Element(EmberPath),
}

impl Scope {
    pub fn converged(&self, fragment: &Tree) -> bool {
        let paths = fragment_paths(fragment);
        match self {
            Scope::Root => !paths.is_empty(),
            Scope::Matrix(path) => paths.iter().any(|p| p == path),
            // The whole fragment must be about the element: itself, its
            // direct children, or the ancestor markers of the provider's
            // branch envelope. Anything deeper is concurrent fan-out and
            // must not resolve the pending request.
            Scope::Element(path) => {
                !paths.is_empty()
                    && paths
                        .iter()
                        .all(|p| p == path || p.is_direct_child_of(path) || p.is_prefix_of(path))
                    && paths
                        .iter()
                        .any(|p| p == path || p.is_direct_child_of(path))
            }
        }
    }
}

/// Absolute paths of every element in a decoded fragment. Qualified
/// elements restart the accumulated path; commands carry none.
pub fn fragment_paths(fragment: &Tree) -> Vec<EmberPath> {
    let mut paths = Vec::new();
    walk(fragment, fragment.root(), EmberPath::root(), &mut paths);
    paths
}

fn walk(fragment: &Tree, id: ElementId, base: EmberPath, paths: &mut Vec<EmberPath>) {
    for child in fragment.children(id) {
        let Some(element) = fragment.element(*child) else {
            continue;
        };
        if matches!(element, Element::Command(_)) {
            continue;
        }
        let own = match element.addressing() {
            Some(Addressing::Path(path)) => path.clone(),
            Some(Addressing::Number(number)) => base.child(*number),
            None => base.clone(),
        };
        paths.push(own.clone());
        walk(fragment, *child, own, paths);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberplus_types::{Node, NodeContents, Parameter, ParameterContents};

    fn path(s: &str) -> EmberPath {
        s.parse().unwrap()
    }

    fn fragment_with_child(parent: &str, child_number: u32) -> Tree {
        let mut tree = Tree::new();
        let root = tree.root();
        let node = tree
            .insert(root, Element::Node(Node::qualified(path(parent))))
            .unwrap();
        tree.insert(
            node,
            Element::Parameter(Parameter::numbered(
                child_number,
                ParameterContents::default(),
            )),
        )
        .unwrap();
        tree
    }

    #[test]
    fn test_root_scope_needs_a_top_level_element() {
        assert!(!Scope::Root.converged(&Tree::new()));

        let mut tree = Tree::new();
        let root = tree.root();
        tree.insert(
            root,
            Element::Node(Node::numbered(0, NodeContents::default())),
        )
        .unwrap();
        assert!(Scope::Root.converged(&tree));
    }

    #[test]
    fn test_element_scope_accepts_self_and_direct_children() {
        let scope = Scope::Element(path("0.1"));
        assert!(scope.converged(&fragment_with_child("0.1", 3)));

        // The parent alone is not convergence
        let mut parent_only = Tree::new();
        let root = parent_only.root();
        parent_only
            .insert(root, Element::Node(Node::qualified(path("0"))))
            .unwrap();
        assert!(!scope.converged(&parent_only));

        // A grandchild without the element itself is not convergence either
        assert!(!scope.converged(&fragment_with_child("0.1.3", 0)));
    }

    #[test]
    fn test_deep_fan_out_does_not_converge_element_scope() {
        // A concurrent update for a deeper branch: markers 0 and 0.3 plus
        // parameter 0.3.7. It mentions the element and one direct child,
        // but carries deeper traffic, so a pending request for 0 must keep
        // waiting.
        let mut fan_out = Tree::new();
        let root = fan_out.root();
        let outer = fan_out
            .insert(root, Element::Node(Node::numbered(0, NodeContents::default())))
            .unwrap();
        let inner = fan_out
            .insert(outer, Element::Node(Node::numbered(3, NodeContents::default())))
            .unwrap();
        fan_out
            .insert(
                inner,
                Element::Parameter(Parameter::numbered(7, ParameterContents::default())),
            )
            .unwrap();
        assert!(!Scope::Element(path("0")).converged(&fan_out));

        // The direct listing of 0 still converges
        let mut listing = Tree::new();
        let root = listing.root();
        let outer = listing
            .insert(root, Element::Node(Node::numbered(0, NodeContents::default())))
            .unwrap();
        listing
            .insert(
                outer,
                Element::Parameter(Parameter::numbered(3, ParameterContents::default())),
            )
            .unwrap();
        assert!(Scope::Element(path("0")).converged(&listing));
    }

    #[test]
    fn test_matrix_scope_requires_exact_path() {
        let scope = Scope::Matrix(path("1"));
        let mut tree = Tree::new();
        let root = tree.root();
        tree.insert(
            root,
            Element::Matrix(emberplus_types::Matrix::minimal(Addressing::Path(path(
                "1",
            )))),
        )
        .unwrap();
        assert!(scope.converged(&tree));
        assert!(!scope.converged(&fragment_with_child("2", 0)));
    }
}
