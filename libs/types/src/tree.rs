//! Arena-backed element tree
//!
//! Both the persistent local tree and decoded wire fragments use the same
//! [`Tree`] type: a slot arena addressed by [`ElementId`] handles. Parent
//! links are back-handles into the arena, never owning pointers, so the
//! containment graph has no reference cycles to manage.

use crate::element::{Addressing, Element};
use crate::error::{EmberError, EmberResult};
use crate::path::EmberPath;

/// Handle to an element inside a [`Tree`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(u32);

impl ElementId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct Slot {
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    element: Element,
}

/// An element tree rooted at a contents-free Root element
#[derive(Debug, Clone)]
pub struct Tree {
    slots: Vec<Option<Slot>>,
    free: Vec<ElementId>,
    root: ElementId,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        let root_slot = Slot {
            parent: None,
            children: Vec::new(),
            element: Element::Root,
        };
        Self {
            slots: vec![Some(root_slot)],
            free: Vec::new(),
            root: ElementId(0),
        }
    }

    /// A tree holding a single element directly under Root (the shape of a
    /// qualified request envelope)
    pub fn singleton(element: Element) -> EmberResult<(Tree, ElementId)> {
        let mut tree = Tree::new();
        let root = tree.root();
        let id = tree.insert(root, element)?;
        Ok((tree, id))
    }

    pub fn root(&self) -> ElementId {
        self.root
    }

    fn slot(&self, id: ElementId) -> Option<&Slot> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: ElementId) -> Option<&mut Slot> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.slot(id).map(|slot| &slot.element)
    }

    pub fn element_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.slot_mut(id).map(|slot| &mut slot.element)
    }

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.slot(id).and_then(|slot| slot.parent)
    }

    pub fn children(&self, id: ElementId) -> &[ElementId] {
        self.slot(id).map(|slot| slot.children.as_slice()).unwrap_or(&[])
    }

    /// Attach `element` as a child of `parent`. Sibling numbers (and
    /// qualified paths under Root) must be unique.
    pub fn insert(&mut self, parent: ElementId, element: Element) -> EmberResult<ElementId> {
        if self.slot(parent).is_none() {
            return Err(EmberError::InvalidEmberNode("stale parent handle".into()));
        }
        if let Some(addressing) = element.addressing() {
            let duplicate = match addressing {
                Addressing::Number(n) => self.child_by_number(parent, *n).is_some(),
                Addressing::Path(path) => self.child_by_qualified_path(parent, path).is_some(),
            };
            if duplicate {
                return Err(EmberError::InvalidEmberNode(format!(
                    "duplicate sibling {addressing:?} under parent"
                )));
            }
        }

        let slot = Slot {
            parent: Some(parent),
            children: Vec::new(),
            element,
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id.index()] = Some(slot);
                id
            }
            None => {
                let id = ElementId(self.slots.len() as u32);
                self.slots.push(Some(slot));
                id
            }
        };
        if let Some(parent_slot) = self.slot_mut(parent) {
            parent_slot.children.push(id);
        }
        Ok(id)
    }

    /// Drop an element and its whole subtree from its parent's child list
    pub fn remove(&mut self, id: ElementId) {
        if id == self.root {
            return;
        }
        if let Some(parent) = self.parent(id) {
            if let Some(parent_slot) = self.slot_mut(parent) {
                parent_slot.children.retain(|child| *child != id);
            }
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(slot) = self.slots.get_mut(current.index()).and_then(Option::take) {
                stack.extend(slot.children);
                self.free.push(current);
            }
        }
    }

    /// Absolute path of an element: derived from the parent chain for
    /// numbered elements, stored directly for qualified ones.
    pub fn path_of(&self, id: ElementId) -> EmberPath {
        let mut segments: Vec<u32> = Vec::new();
        let mut current = Some(id);
        while let Some(cursor) = current {
            let Some(slot) = self.slot(cursor) else { break };
            match &slot.element {
                Element::Root => break,
                element => match element.addressing() {
                    Some(Addressing::Path(path)) => {
                        let mut numbers = path.numbers().to_vec();
                        segments.reverse();
                        numbers.extend(segments);
                        return EmberPath::new(numbers);
                    }
                    _ => {
                        if let Some(number) = element.number() {
                            segments.push(number);
                        }
                    }
                },
            }
            current = slot.parent;
        }
        segments.reverse();
        EmberPath::new(segments)
    }

    pub fn child_by_number(&self, parent: ElementId, number: u32) -> Option<ElementId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|child| self.element(*child).and_then(Element::number) == Some(number))
    }

    fn child_by_qualified_path(&self, parent: ElementId, path: &EmberPath) -> Option<ElementId> {
        self.children(parent).iter().copied().find(|child| {
            self.element(*child).and_then(Element::qualified_path) == Some(path)
        })
    }

    /// Direct child whose contents identifier matches
    pub fn child_by_identifier(&self, parent: ElementId, identifier: &str) -> Option<ElementId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|child| self.element(*child).and_then(Element::identifier) == Some(identifier))
    }

    /// Resolve a path relative to `from`.
    ///
    /// Returns `from` itself when the path equals its own path, `None` when
    /// the request is a strict ancestor or when any intermediate hop is
    /// missing. A missing hop is not an error: the caller decides whether to
    /// fetch more directory data. From the Root, a whole-path qualified child
    /// lookup is attempted before numeric descent.
    pub fn element_by_path(&self, from: ElementId, path: &EmberPath) -> Option<ElementId> {
        let own = self.path_of(from);
        if own == *path {
            return Some(from);
        }
        // Strict ancestor request: shorter than our own path
        if path.is_prefix_of(&own) {
            return None;
        }

        if from == self.root {
            if let Some(id) = self.child_by_qualified_path(self.root, path) {
                return Some(id);
            }
        }

        let remaining = path.strip_prefix(&own)?;
        let mut cursor = from;
        for number in remaining {
            cursor = self.child_by_number(cursor, *number)?;
        }
        Some(cursor)
    }

    /// Resolve an absolute path from the Root
    pub fn lookup(&self, path: &EmberPath) -> Option<ElementId> {
        self.element_by_path(self.root, path)
    }

    /// Shallow-merge a fragment element into the element at `id`
    pub fn update_element(&mut self, id: ElementId, fragment: &Element) -> EmberResult<bool> {
        let slot = self
            .slot_mut(id)
            .ok_or_else(|| EmberError::InvalidEmberNode("stale element handle".into()))?;
        slot.element.update(fragment)
    }

    /// Deep-merge a decoded fragment tree into this tree.
    ///
    /// Numbered fragment elements descend from the merge point by sibling
    /// number, inserted when absent. Qualified elements are resolved by their
    /// absolute path; unresolvable qualified elements attach directly under
    /// Root, keyed by their full path. Returns the elements that were touched
    /// along with a changed flag for each.
    pub fn merge_fragment(&mut self, fragment: &Tree) -> EmberResult<Vec<(ElementId, bool)>> {
        let mut touched = Vec::new();
        let fragment_children: Vec<ElementId> = fragment.children(fragment.root()).to_vec();
        for child in fragment_children {
            self.merge_fragment_element(fragment, child, self.root, &mut touched)?;
        }
        Ok(touched)
    }

    fn merge_fragment_element(
        &mut self,
        fragment: &Tree,
        fragment_id: ElementId,
        local_parent: ElementId,
        touched: &mut Vec<(ElementId, bool)>,
    ) -> EmberResult<()> {
        let Some(element) = fragment.element(fragment_id) else {
            return Ok(());
        };
        // Commands only appear in requests; a fragment merge never stores them
        if element.is_command() {
            return Ok(());
        }

        let local_id = match element.addressing() {
            Some(Addressing::Path(path)) => match self.lookup(path) {
                Some(id) => {
                    let changed = self.update_element(id, element)?;
                    touched.push((id, changed));
                    id
                }
                None => {
                    let id = self.insert(self.root, element.clone())?;
                    touched.push((id, true));
                    id
                }
            },
            Some(Addressing::Number(number)) => {
                match self.child_by_number(local_parent, *number) {
                    Some(id) => {
                        let changed = self.update_element(id, element)?;
                        touched.push((id, changed));
                        id
                    }
                    None => {
                        let id = self.insert(local_parent, element.clone())?;
                        touched.push((id, true));
                        id
                    }
                }
            }
            None => local_parent,
        };

        let fragment_children: Vec<ElementId> = fragment.children(fragment_id).to_vec();
        for child in fragment_children {
            self.merge_fragment_element(fragment, child, local_id, touched)?;
        }
        Ok(())
    }

    /// Build a minimal Root→…→element envelope with `child` attached under
    /// the element at `id`. Ancestors are contents-free markers; a qualified
    /// ancestor short-circuits the chain to the Root.
    pub fn branch_with_child(&self, id: ElementId, child: Element) -> EmberResult<Tree> {
        self.build_branch(id, Some(child), None)
    }

    /// Build a minimal envelope with `payload` standing in for the element at
    /// `id` itself (used for value writes and connection requests).
    pub fn branch_with_payload(&self, id: ElementId, payload: Element) -> EmberResult<Tree> {
        self.build_branch(id, None, Some(payload))
    }

    fn build_branch(
        &self,
        id: ElementId,
        child: Option<Element>,
        payload: Option<Element>,
    ) -> EmberResult<Tree> {
        // Chain from the element up to the Root, stopping early at a
        // qualified ancestor (it attaches directly under Root).
        let mut chain: Vec<ElementId> = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(element) = self.element(current) else {
                return Err(EmberError::InvalidEmberNode("stale element handle".into()));
            };
            if element.is_root() {
                break;
            }
            chain.push(current);
            if element.is_qualified() {
                break;
            }
            cursor = self.parent(current);
        }
        chain.reverse();

        let mut branch = Tree::new();
        let mut parent = branch.root();
        for (position, current) in chain.iter().enumerate() {
            let last = position == chain.len() - 1;
            let element = if last {
                match &payload {
                    Some(payload) => payload.clone(),
                    None => self.element(*current).map(Element::minimal).ok_or_else(|| {
                        EmberError::InvalidEmberNode("stale element handle".into())
                    })?,
                }
            } else {
                self.element(*current)
                    .map(Element::minimal)
                    .ok_or_else(|| EmberError::InvalidEmberNode("stale element handle".into()))?
            };
            parent = branch.insert(parent, element)?;
        }
        if let Some(child) = child {
            branch.insert(parent, child)?;
        }
        Ok(branch)
    }
}
