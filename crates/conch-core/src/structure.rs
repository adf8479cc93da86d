//! Object structures (hidden classes)
//!
//! A structure is the ordered list of an object's property names and packed
//! descriptors; the values live in the object itself. Structures reached by
//! the same sequence of additions are shared through a transition tree:
//! each structure caches its children weakly, keyed by the added name and
//! descriptor, and children hold their parent strongly.
//!
//! Deleting a property or changing a property's attributes leaves the tree:
//! the object gets a private *dictionary* structure that is edited in place
//! from then on. Large structures leave the tree too and get a name map for
//! lookups.
//!
//! Every string name stored in a structure is atomic, so names stay alive
//! through the context's string table; symbol names are kept alive by the
//! objects using the structure.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use conch_gc::GcHeader;
use rustc_hash::FxHashMap;

use crate::property_descriptor::StructurePropertyDescriptor;
use crate::property_name::PropertyName;

/// Number of properties past which a structure leaves the transition tree
/// and builds a name map.
pub const FAST_ACCESS_MIN_SIZE: usize = 96;

/// One property of a structure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StructureItem {
    /// Property name
    pub name: PropertyName,
    /// Packed attributes
    pub descriptor: StructurePropertyDescriptor,
}

type TransitionKey = (PropertyName, StructurePropertyDescriptor);

/// Shared layout of an object's named properties.
pub struct ObjectStructure {
    /// Structure this one was transitioned from; keeps the path alive
    parent: Option<Rc<ObjectStructure>>,
    /// Properties in definition order
    items: Vec<StructureItem>,
    /// Name to slot index, built for large structures
    property_map: Option<FxHashMap<PropertyName, usize>>,
    /// Children reached by adding one property
    transitions: RefCell<FxHashMap<TransitionKey, Weak<ObjectStructure>>>,
    /// Private to one object and edited in place
    is_dictionary: bool,
    /// Some name is an array index
    has_index_property_name: bool,
}

impl ObjectStructure {
    /// The empty root structure
    pub fn root() -> Rc<Self> {
        Rc::new(Self::with_items(None, Vec::new(), false))
    }

    fn with_items(parent: Option<Rc<ObjectStructure>>, items: Vec<StructureItem>, is_dictionary: bool) -> Self {
        let has_index_property_name = items.iter().any(|item| item.name.as_index().is_some());
        let property_map = (items.len() > FAST_ACCESS_MIN_SIZE).then(|| build_map(&items));
        Self {
            parent,
            items,
            property_map,
            transitions: RefCell::new(FxHashMap::default()),
            is_dictionary,
            has_index_property_name,
        }
    }

    /// Number of properties
    #[inline]
    pub fn property_count(&self) -> usize {
        self.items.len()
    }

    /// Whether this structure is private to one object
    #[inline]
    pub fn is_dictionary(&self) -> bool {
        self.is_dictionary
    }

    /// Whether some property name is an array index
    #[inline]
    pub fn has_index_property_name(&self) -> bool {
        self.has_index_property_name
    }

    /// Properties in definition order
    #[inline]
    pub fn items(&self) -> &[StructureItem] {
        &self.items
    }

    /// Property at slot `index`
    #[inline]
    pub fn item(&self, index: usize) -> &StructureItem {
        &self.items[index]
    }

    /// Slot index of `name`
    pub fn find_property(&self, name: &PropertyName) -> Option<usize> {
        match &self.property_map {
            Some(map) => map.get(name).copied(),
            None => self.items.iter().position(|item| item.name == *name),
        }
    }

    /// Append `name`, moving `this` to the resulting structure.
    ///
    /// The caller guarantees `name` is not present and that string names are
    /// atomic.
    pub fn add_property(
        this: &mut Rc<Self>,
        name: PropertyName,
        descriptor: StructurePropertyDescriptor,
    ) {
        debug_assert!(!matches!(name, PropertyName::String(_)), "structure names must be atomic");
        debug_assert!(this.find_property(&name).is_none());
        let item = StructureItem { name, descriptor };

        if this.is_dictionary {
            Self::edit_dictionary(this, |structure| {
                if let Some(map) = &mut structure.property_map {
                    map.insert(name, structure.items.len());
                }
                structure.has_index_property_name |= name.as_index().is_some();
                structure.items.push(item);
                if structure.property_map.is_none() && structure.items.len() > FAST_ACCESS_MIN_SIZE {
                    structure.property_map = Some(build_map(&structure.items));
                }
            });
            return;
        }

        if this.items.len() >= FAST_ACCESS_MIN_SIZE {
            let mut items = this.items.clone();
            items.push(item);
            tracing::debug!(
                target: "conch::core",
                properties = items.len(),
                "structure left transition tree: too many properties"
            );
            *this = Rc::new(Self::with_items(None, items, true));
            return;
        }

        let key = (name, descriptor);
        let cached = this.transitions.borrow().get(&key).and_then(Weak::upgrade);
        if let Some(existing) = cached {
            *this = existing;
            return;
        }

        let mut items = this.items.clone();
        items.push(item);
        let child = Rc::new(Self::with_items(Some(Rc::clone(this)), items, false));
        {
            let mut transitions = this.transitions.borrow_mut();
            transitions.retain(|_, weak| weak.strong_count() > 0);
            transitions.insert(key, Rc::downgrade(&child));
        }
        *this = child;
    }

    /// Remove the property at slot `index`; slots after it shift down by one.
    pub fn remove_property(this: &mut Rc<Self>, index: usize) {
        Self::edit_dictionary(this, |structure| {
            structure.items.remove(index);
            structure.has_index_property_name =
                structure.items.iter().any(|item| item.name.as_index().is_some());
            if structure.property_map.is_some() {
                structure.property_map = Some(build_map(&structure.items));
            }
        });
    }

    /// Replace the descriptor at slot `index`.
    pub fn replace_descriptor(this: &mut Rc<Self>, index: usize, descriptor: StructurePropertyDescriptor) {
        if this.items[index].descriptor == descriptor {
            return;
        }
        Self::edit_dictionary(this, |structure| {
            structure.items[index].descriptor = descriptor;
        });
    }

    /// Give the owner a private dictionary copy of this structure.
    pub fn convert_to_dictionary(this: &mut Rc<Self>) {
        Self::edit_dictionary(this, |_| {});
    }

    fn edit_dictionary(this: &mut Rc<Self>, edit: impl FnOnce(&mut ObjectStructure)) {
        if this.is_dictionary
            && let Some(structure) = Rc::get_mut(this)
        {
            edit(structure);
            return;
        }
        tracing::debug!(
            target: "conch::core",
            properties = this.items.len(),
            "structure converted to dictionary"
        );
        let mut structure = Self::with_items(None, this.items.clone(), true);
        edit(&mut structure);
        *this = Rc::new(structure);
    }

    /// Report every cell referenced by a property name
    pub fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        for item in &self.items {
            if let Some(ptr) = item.name.traced_pointer() {
                tracer(ptr);
            }
        }
    }

    /// Number of live cached transitions
    pub fn transition_count(&self) -> usize {
        self.transitions
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Structure this one was transitioned from
    pub fn parent(&self) -> Option<&Rc<ObjectStructure>> {
        self.parent.as_ref()
    }
}

fn build_map(items: &[StructureItem]) -> FxHashMap<PropertyName, usize> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| (item.name, index))
        .collect()
}

impl std::fmt::Debug for ObjectStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStructure")
            .field("property_count", &self.property_count())
            .field("is_dictionary", &self.is_dictionary)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property_descriptor::PropertyAttributes;

    fn name(i: u32) -> PropertyName {
        PropertyName::Index(i)
    }

    fn with(base: &Rc<ObjectStructure>, i: u32, desc: StructurePropertyDescriptor) -> Rc<ObjectStructure> {
        let mut s = Rc::clone(base);
        ObjectStructure::add_property(&mut s, name(i), desc);
        s
    }

    #[test]
    fn test_transitions_are_shared() {
        let root = ObjectStructure::root();
        let desc = StructurePropertyDescriptor::default_data();
        let a = with(&root, 1, desc);
        let b = with(&root, 1, desc);
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(root.transition_count(), 1);
        assert!(a.has_index_property_name());
        assert!(!root.has_index_property_name());
        assert!(a.parent().is_some_and(|p| Rc::ptr_eq(p, &root)));

        let frozen = StructurePropertyDescriptor::data(PropertyAttributes::frozen());
        let c = with(&root, 1, frozen);
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(root.transition_count(), 2);
    }

    #[test]
    fn test_dead_transitions_are_not_reused() {
        let root = ObjectStructure::root();
        let desc = StructurePropertyDescriptor::default_data();
        drop(with(&root, 7, desc));
        assert_eq!(root.transition_count(), 0);
        let again = with(&root, 7, desc);
        assert_eq!(again.find_property(&name(7)), Some(0));
    }

    #[test]
    fn test_remove_makes_private_dictionary() {
        let desc = StructurePropertyDescriptor::default_data();
        let mut s = ObjectStructure::root();
        for i in 0..3 {
            ObjectStructure::add_property(&mut s, name(i), desc);
        }
        let shared = Rc::clone(&s);
        ObjectStructure::remove_property(&mut s, 1);
        assert!(s.is_dictionary());
        assert!(!Rc::ptr_eq(&s, &shared));
        assert_eq!(s.find_property(&name(2)), Some(1));
        assert_eq!(shared.property_count(), 3);

        // A dictionary with one owner is edited in place
        let address = Rc::as_ptr(&s);
        ObjectStructure::add_property(&mut s, name(9), desc);
        assert_eq!(Rc::as_ptr(&s), address);
        assert_eq!(s.property_count(), 3);
    }

    #[test]
    fn test_large_structures_use_a_map() {
        let desc = StructurePropertyDescriptor::default_data();
        let mut s = ObjectStructure::root();
        for i in 0..(FAST_ACCESS_MIN_SIZE as u32 + 4) {
            ObjectStructure::add_property(&mut s, name(i), desc);
        }
        assert!(s.is_dictionary());
        assert_eq!(
            s.find_property(&name(FAST_ACCESS_MIN_SIZE as u32 + 2)),
            Some(FAST_ACCESS_MIN_SIZE + 2)
        );
        ObjectStructure::remove_property(&mut s, 0);
        assert_eq!(s.find_property(&name(1)), Some(0));
    }
}
