//! The DAP data model: atomic variables, containers and the dataset root.
//!
//! Every node knows its `id`, the dot-joined path of quoted names from the dataset root (the
//! root's own name is excluded). Ids are re-derived by [DapNode::reparent] whenever a node is
//! inserted into a container, so they always match the node's position in the tree.

use crate::array::DapArray;
use crate::client::proxy::{ArrayProxy, SequenceProxy};
use crate::error::DapError;
use crate::models::{element_count, DType, Slice};
use crate::types::{AttrValue, Attributes, DValue};

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Quote a variable name into its wire-safe form.
///
/// Letters, digits and `_!~*'-"%` are kept. Everything else is percent-encoded, including `.`
/// so that quoted names can be joined into ids unambiguously.
pub fn quote(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"_!~*'-\"%".contains(&byte) {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Reverse [quote]. Invalid percent-encoded UTF-8 is returned unchanged.
pub fn unquote(key: &str) -> String {
    urlencoding::decode(key)
        .map(|name| name.into_owned())
        .unwrap_or_else(|_| key.to_string())
}

/// Join a parent id and a child key.
fn join_id(parent_id: &str, key: &str) -> String {
    if parent_id.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent_id, key)
    }
}

/// One value in a sequence record.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Value of an atomic field
    Atom(DValue),
    /// Values of a structure field, in member order
    Struct(Vec<Value>),
    /// Records of a nested sequence
    Seq(Vec<Record>),
}

impl Value {
    pub fn as_atom(&self) -> Option<&DValue> {
        match self {
            Value::Atom(value) => Some(value),
            _ => None,
        }
    }
}

/// A sequence record: one value per member of the sequence, in member order.
pub type Record = Vec<Value>;

/// Rearrange a record laid out for `from` into the member order of `to`.
///
/// `to` holds a subset of the members of `from`, possibly reordered. Nested structures and
/// sequences are rearranged recursively.
pub fn remap_record(
    record: &[Value],
    from: &Container,
    to: &Container,
) -> Result<Record, DapError> {
    to.members()
        .iter()
        .map(|member| {
            let index = from
                .member_index(member.key())
                .ok_or_else(|| DapError::UnknownVariable(member.id().to_string()))?;
            let value = record.get(index).ok_or_else(|| DapError::ShapeMismatch {
                id: from.id().to_string(),
                expected: from.len(),
                found: record.len(),
            })?;
            let source = &from.members()[index];
            let remapped = match (value, source.container(), member.container()) {
                (Value::Seq(records), Some(source), Some(target)) => Value::Seq(
                    records
                        .iter()
                        .map(|inner| remap_record(inner, source, target))
                        .collect::<Result<Vec<Record>, DapError>>()?,
                ),
                (Value::Struct(values), Some(source), Some(target)) => {
                    Value::Struct(remap_record(values, source, target)?)
                }
                (value, _, _) => value.clone(),
            };
            Ok(remapped)
        })
        .collect()
}

/// Data of an atomic variable.
#[derive(Clone, Debug, Default)]
pub enum VarData {
    /// Dataless skeleton, as produced by the metadata parsers
    #[default]
    None,
    /// Materialized array
    Array(DapArray),
    /// Lazy handle to an array on a remote server
    Remote(ArrayProxy),
}

/// Data of a sequence.
#[derive(Clone, Debug, Default)]
pub enum SequenceData {
    /// Dataless skeleton
    #[default]
    None,
    /// Materialized records, shared between shallow clones
    Records(Arc<Vec<Record>>),
    /// Lazy handle to a record stream on a remote server
    Remote(SequenceProxy),
}

/// An atomic variable: a typed scalar or n-dimensional array.
#[derive(Clone, Debug)]
pub struct BaseType {
    name: String,
    key: String,
    id: String,
    /// Data type
    pub dtype: DType,
    /// Shape of the array. Empty for scalars.
    pub shape: Vec<usize>,
    /// Dimension names. Either empty or one per dimension; anonymous dimensions are empty
    /// strings.
    pub dims: Vec<String>,
    pub attributes: Attributes,
    pub data: VarData,
}

impl BaseType {
    /// Return a new, dataless BaseType.
    pub fn new(name: &str, dtype: DType, shape: Vec<usize>) -> Self {
        let key = quote(name);
        BaseType {
            name: name.to_string(),
            id: key.clone(),
            key,
            dtype,
            shape,
            dims: vec![],
            attributes: Attributes::new(),
            data: VarData::None,
        }
    }

    pub fn with_dims(mut self, dims: Vec<String>) -> Self {
        self.dims = dims;
        self
    }

    /// Attach a materialized array. The declared shape follows the array.
    pub fn with_data(mut self, data: DapArray) -> Self {
        self.shape = data.shape().to_vec();
        self.data = VarData::Array(data);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The quoted name, used as the key in the parent container.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of elements of the declared shape.
    pub fn element_count(&self) -> Result<usize, DapError> {
        element_count(&self.shape).ok_or_else(|| DapError::TooManyElements(self.id.clone()))
    }

    pub fn get_attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// Materialize the data of this variable.
    ///
    /// Remote data is fetched once per call; the proxy keeps no state.
    pub fn array(&self) -> Result<DapArray, DapError> {
        let array = match &self.data {
            VarData::Array(array) => array.clone(),
            VarData::Remote(proxy) => proxy.fetch()?,
            VarData::None => return Err(DapError::MissingData(self.id.clone())),
        };
        if !array.matches(self.dtype) {
            return Err(DapError::DTypeMismatch {
                id: self.id.clone(),
                declared: self.dtype,
                found: format!("{:?}", array.element_type()),
            });
        }
        Ok(array)
    }

    /// Slice this variable, keeping every dimension.
    ///
    /// Materialized data is sliced as a view sharing the original buffer. Remote data composes
    /// the slice into the proxy without fetching.
    pub fn slice(&self, slices: &[Slice]) -> Result<BaseType, DapError> {
        if slices.len() > self.shape.len() {
            return Err(DapError::InvalidHyperslab(format!(
                "{} slices for {} with {} dimensions",
                slices.len(),
                self.id,
                self.shape.len()
            )));
        }
        let mut out = self.clone();
        out.shape = self
            .shape
            .iter()
            .enumerate()
            .map(|(axis, length)| slices.get(axis).map_or(*length, |s| s.len(*length)))
            .collect();
        out.data = match &self.data {
            VarData::None => VarData::None,
            VarData::Array(array) => VarData::Array(array.slice(slices)?),
            VarData::Remote(proxy) => VarData::Remote(proxy.slice(slices)),
        };
        Ok(out)
    }

    fn reparent(&mut self, parent_id: &str) {
        self.id = join_id(parent_id, &self.key);
    }

    fn clone_deep(&self) -> BaseType {
        let mut out = self.clone();
        if let VarData::Array(array) = &self.data {
            out.data = VarData::Array(array.deep_copy());
        }
        out
    }
}

/// An ordered, named collection of child nodes.
///
/// A child's key is always its quoted name. Inserting a child with an existing key replaces the
/// prior child in place. `visible_keys` selects and orders the children returned by
/// [Container::children] without copying them.
#[derive(Clone, Debug)]
pub struct Container {
    name: String,
    key: String,
    id: String,
    pub attributes: Attributes,
    members: Vec<DapNode>,
    visible_keys: Vec<String>,
}

impl Container {
    /// Return a new, empty Container.
    pub fn new(name: &str) -> Self {
        let key = quote(name);
        Container {
            name: name.to_string(),
            id: key.clone(),
            key,
            attributes: Attributes::new(),
            members: vec![],
            visible_keys: vec![],
        }
    }

    /// A container with the same name, id and attributes as this one, but no children.
    pub fn empty_like(&self) -> Self {
        Container {
            name: self.name.clone(),
            key: self.key.clone(),
            id: self.id.clone(),
            attributes: self.attributes.clone(),
            members: vec![],
            visible_keys: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get_attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// Insert a child, re-deriving ids for its whole subtree.
    pub fn insert(&mut self, mut node: DapNode) {
        node.reparent(&self.id);
        match self.member_index(node.key()) {
            Some(index) => self.members[index] = node,
            None => {
                self.visible_keys.push(node.key().to_string());
                self.members.push(node);
            }
        }
    }

    /// Builder form of [Container::insert].
    pub fn with(mut self, node: impl Into<DapNode>) -> Self {
        self.insert(node.into());
        self
    }

    /// Remove a child by name or key.
    pub fn remove(&mut self, name: &str) -> Option<DapNode> {
        let index = self.position(name)?;
        let node = self.members.remove(index);
        self.visible_keys.retain(|key| key != node.key());
        Some(node)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.members
            .iter()
            .position(|child| child.key() == name || child.name() == name)
    }

    /// Position of a child among all members, by key.
    pub fn member_index(&self, key: &str) -> Option<usize> {
        self.members.iter().position(|child| child.key() == key)
    }

    /// Look up a child by quoted key or raw name.
    pub fn get(&self, name: &str) -> Option<&DapNode> {
        self.position(name).map(|index| &self.members[index])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DapNode> {
        self.position(name).map(move |index| &mut self.members[index])
    }

    /// Look up a descendant by its id relative to this container.
    pub fn find(&self, id: &str) -> Option<&DapNode> {
        let mut segments = id.split('.');
        let mut node = self.get(segments.next()?)?;
        for segment in segments {
            node = node.container()?.get(segment)?;
        }
        Some(node)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut DapNode> {
        let mut segments = id.split('.');
        let mut node = self.get_mut(segments.next()?)?;
        for segment in segments {
            node = node.container_mut()?.get_mut(segment)?;
        }
        Some(node)
    }

    /// Visible children, in visible order.
    pub fn children(&self) -> impl Iterator<Item = &DapNode> {
        self.visible_keys
            .iter()
            .filter_map(move |key| self.member_index(key).map(|index| &self.members[index]))
    }

    /// All children, in member order.
    pub fn members(&self) -> &[DapNode] {
        &self.members
    }

    pub fn members_mut(&mut self) -> &mut [DapNode] {
        &mut self.members
    }

    pub fn visible_keys(&self) -> &[String] {
        &self.visible_keys
    }

    /// Select and reorder the visible children. Every key must name a member.
    pub fn set_visible_keys(&mut self, keys: Vec<String>) -> Result<(), DapError> {
        if let Some(missing) = keys.iter().find(|key| self.member_index(key).is_none()) {
            return Err(DapError::UnknownVariable(join_id(&self.id, missing)));
        }
        self.visible_keys = keys;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn reparent(&mut self, parent_id: &str) {
        self.id = join_id(parent_id, &self.key);
        self.reparent_children();
    }

    fn reparent_children(&mut self) {
        let id = self.id.clone();
        for child in self.members.iter_mut() {
            child.reparent(&id);
        }
    }

    fn clone_deep(&self) -> Container {
        let mut out = self.empty_like();
        out.members = self.members.iter().map(DapNode::clone_deep).collect();
        out.visible_keys = self.visible_keys.clone();
        out
    }
}

/// A record stream: a container whose data is a sequence of records of unknown length.
#[derive(Clone, Debug)]
pub struct Sequence {
    pub container: Container,
    pub data: SequenceData,
}

impl Sequence {
    pub fn new(name: &str) -> Self {
        Sequence {
            container: Container::new(name),
            data: SequenceData::None,
        }
    }

    /// Builder form of [Container::insert].
    pub fn with(mut self, node: impl Into<DapNode>) -> Self {
        self.container.insert(node.into());
        self
    }

    /// Attach materialized records, in member order.
    pub fn with_records(mut self, records: Vec<Record>) -> Self {
        self.data = SequenceData::Records(Arc::new(records));
        self
    }

    /// Materialize the records of this sequence, in member order.
    pub fn records(&self) -> Result<Vec<Record>, DapError> {
        match &self.data {
            SequenceData::Records(records) => Ok(records.as_ref().clone()),
            SequenceData::Remote(proxy) => proxy.records()?.collect(),
            SequenceData::None => Err(DapError::MissingData(self.container.id.clone())),
        }
    }
}

impl Deref for Sequence {
    type Target = Container;

    fn deref(&self) -> &Container {
        &self.container
    }
}

impl DerefMut for Sequence {
    fn deref_mut(&mut self) -> &mut Container {
        &mut self.container
    }
}

/// A DAP4 group: a container that also declares dimensions for its descendants.
#[derive(Clone, Debug)]
pub struct Group {
    pub container: Container,
    /// Declared dimensions as `(name, size)`
    pub dimensions: Vec<(String, usize)>,
}

impl Group {
    pub fn new(name: &str) -> Self {
        Group {
            container: Container::new(name),
            dimensions: vec![],
        }
    }
}

impl Deref for Group {
    type Target = Container;

    fn deref(&self) -> &Container {
        &self.container
    }
}

impl DerefMut for Group {
    fn deref_mut(&mut self) -> &mut Container {
        &mut self.container
    }
}

/// A node of the DAP data model.
#[derive(Clone, Debug)]
pub enum DapNode {
    Base(BaseType),
    Structure(Container),
    Sequence(Sequence),
    /// DAP2 grid. The first member is the array, the remaining members are its maps.
    Grid(Container),
    Group(Group),
}

impl DapNode {
    pub fn name(&self) -> &str {
        match self {
            DapNode::Base(var) => var.name(),
            node => node.container().map_or("", Container::name),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            DapNode::Base(var) => var.key(),
            node => node.container().map_or("", Container::key),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            DapNode::Base(var) => var.id(),
            node => node.container().map_or("", Container::id),
        }
    }

    /// Name of the node kind, as used in DDS declarations.
    pub fn kind(&self) -> &'static str {
        match self {
            DapNode::Base(_) => "BaseType",
            DapNode::Structure(_) => "Structure",
            DapNode::Sequence(_) => "Sequence",
            DapNode::Grid(_) => "Grid",
            DapNode::Group(_) => "Group",
        }
    }

    pub fn attributes(&self) -> &Attributes {
        match self {
            DapNode::Base(var) => &var.attributes,
            DapNode::Structure(c) | DapNode::Grid(c) => &c.attributes,
            DapNode::Sequence(seq) => &seq.container.attributes,
            DapNode::Group(group) => &group.container.attributes,
        }
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        match self {
            DapNode::Base(var) => &mut var.attributes,
            DapNode::Structure(c) | DapNode::Grid(c) => &mut c.attributes,
            DapNode::Sequence(seq) => &mut seq.container.attributes,
            DapNode::Group(group) => &mut group.container.attributes,
        }
    }

    pub fn get_attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes().get(name)
    }

    /// The children of a container node.
    pub fn container(&self) -> Option<&Container> {
        match self {
            DapNode::Base(_) => None,
            DapNode::Structure(c) | DapNode::Grid(c) => Some(c),
            DapNode::Sequence(seq) => Some(&seq.container),
            DapNode::Group(group) => Some(&group.container),
        }
    }

    pub fn container_mut(&mut self) -> Option<&mut Container> {
        match self {
            DapNode::Base(_) => None,
            DapNode::Structure(c) | DapNode::Grid(c) => Some(c),
            DapNode::Sequence(seq) => Some(&mut seq.container),
            DapNode::Group(group) => Some(&mut group.container),
        }
    }

    /// Rewrite the id of this node and every descendant for a new parent.
    pub fn reparent(&mut self, parent_id: &str) {
        match self {
            DapNode::Base(var) => var.reparent(parent_id),
            DapNode::Sequence(seq) => seq.container.reparent(parent_id),
            node => {
                if let Some(container) = node.container_mut() {
                    container.reparent(parent_id);
                }
            }
        }
    }

    /// New container nodes sharing the same data buffers.
    ///
    /// Views of the result alias the source data; mutation of atomic data goes through
    /// copy-on-write and leaves the source intact.
    pub fn clone_structure(&self) -> DapNode {
        self.clone()
    }

    /// New container nodes and new data buffers.
    pub fn clone_deep(&self) -> DapNode {
        match self {
            DapNode::Base(var) => DapNode::Base(var.clone_deep()),
            DapNode::Structure(c) => DapNode::Structure(c.clone_deep()),
            DapNode::Grid(c) => DapNode::Grid(c.clone_deep()),
            DapNode::Sequence(seq) => DapNode::Sequence(Sequence {
                container: seq.container.clone_deep(),
                data: match &seq.data {
                    SequenceData::Records(records) => {
                        SequenceData::Records(Arc::new(records.as_ref().clone()))
                    }
                    data => data.clone(),
                },
            }),
            DapNode::Group(group) => DapNode::Group(Group {
                container: group.container.clone_deep(),
                dimensions: group.dimensions.clone(),
            }),
        }
    }
}

impl From<BaseType> for DapNode {
    fn from(var: BaseType) -> Self {
        DapNode::Base(var)
    }
}

impl From<Sequence> for DapNode {
    fn from(seq: Sequence) -> Self {
        DapNode::Sequence(seq)
    }
}

impl From<Group> for DapNode {
    fn from(group: Group) -> Self {
        DapNode::Group(group)
    }
}

/// Build a structure node.
pub fn structure(container: Container) -> DapNode {
    DapNode::Structure(container)
}

/// Build a grid node from its array and maps.
pub fn grid(name: &str, array: BaseType, maps: Vec<BaseType>) -> DapNode {
    let mut container = Container::new(name);
    container.insert(array.into());
    for map in maps {
        container.insert(map.into());
    }
    DapNode::Grid(container)
}

/// The root of a DAP data model.
///
/// The dataset name is not part of any id.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub container: Container,
    /// Dimensions declared at the root, for DAP4 datasets
    pub dimensions: Vec<(String, usize)>,
}

impl Dataset {
    pub fn new(name: &str) -> Self {
        let mut container = Container::new(name);
        container.id = String::new();
        Dataset {
            container,
            dimensions: vec![],
        }
    }

    /// Builder form of [Container::insert].
    pub fn with(mut self, node: impl Into<DapNode>) -> Self {
        self.container.insert(node.into());
        self
    }

    /// All nodes in preorder: each parent before its children.
    pub fn walk(&self) -> Vec<&DapNode> {
        fn visit<'a>(container: &'a Container, out: &mut Vec<&'a DapNode>) {
            for child in container.members() {
                out.push(child);
                if let Some(inner) = child.container() {
                    visit(inner, out);
                }
            }
        }
        let mut out = vec![];
        visit(&self.container, &mut out);
        out
    }

    /// A dataset with new container nodes sharing the same data buffers.
    pub fn clone_structure(&self) -> Dataset {
        self.clone()
    }

    /// A dataset with new container nodes and new data buffers.
    pub fn clone_deep(&self) -> Dataset {
        Dataset {
            container: self.container.clone_deep(),
            dimensions: self.dimensions.clone(),
        }
    }
}

impl Deref for Dataset {
    type Target = Container;

    fn deref(&self) -> &Container {
        &self.container
    }
}

impl DerefMut for Dataset {
    fn deref_mut(&mut self) -> &mut Container {
        &mut self.container
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn quote_names() {
        assert_eq!("a", quote("a"));
        assert_eq!("a%2Eb", quote("a.b"));
        assert_eq!("sea%20surface", quote("sea surface"));
        assert_eq!("x-1_y~", quote("x-1_y~"));
        assert_eq!("a.b", unquote("a%2Eb"));
        assert_eq!("sea surface", unquote(&quote("sea surface")));
    }

    #[test]
    fn ids_follow_tree_position() {
        let dataset = test_utils::simple_dataset();
        assert_eq!("a", dataset.get("a").unwrap().id());
        assert_eq!("s.x", dataset.find("s.x").unwrap().id());
        assert_eq!("s.y", dataset.find("s.y").unwrap().id());
    }

    #[test]
    fn reparent_rewrites_subtree() {
        let inner = Container::new("inner").with(BaseType::new("x", DType::Int32, vec![]));
        let outer = Container::new("outer").with(structure(inner));
        let dataset = Dataset::new("ds").with(structure(outer));
        assert_eq!("outer.inner.x", dataset.find("outer.inner.x").unwrap().id());
    }

    #[test]
    fn quoted_names_in_ids() {
        let inner = Container::new("a.b").with(BaseType::new("c d", DType::Int32, vec![]));
        let dataset = Dataset::new("ds").with(structure(inner));
        let node = dataset.find("a%2Eb.c%20d").unwrap();
        assert_eq!("a%2Eb.c%20d", node.id());
        assert_eq!("c d", node.name());
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut container = Container::new("c")
            .with(BaseType::new("a", DType::Int32, vec![]))
            .with(BaseType::new("b", DType::Int32, vec![]));
        container.insert(BaseType::new("a", DType::Float64, vec![2]).into());
        let keys: Vec<&str> = container.children().map(DapNode::key).collect();
        assert_eq!(vec!["a", "b"], keys);
        match container.get("a").unwrap() {
            DapNode::Base(var) => assert_eq!(DType::Float64, var.dtype),
            node => panic!("unexpected node {:?}", node),
        }
    }

    #[test]
    fn visible_keys_select_and_reorder() {
        let mut container = Container::new("c")
            .with(BaseType::new("a", DType::Int32, vec![]))
            .with(BaseType::new("b", DType::Int32, vec![]))
            .with(BaseType::new("c", DType::Int32, vec![]));
        container
            .set_visible_keys(vec!["c".to_string(), "a".to_string()])
            .unwrap();
        let keys: Vec<&str> = container.children().map(DapNode::key).collect();
        assert_eq!(vec!["c", "a"], keys);
        assert_eq!(3, container.members().len());
        assert!(container.set_visible_keys(vec!["z".to_string()]).is_err());
    }

    #[test]
    fn remove_child() {
        let mut container = Container::new("c")
            .with(BaseType::new("a", DType::Int32, vec![]))
            .with(BaseType::new("b", DType::Int32, vec![]));
        assert!(container.remove("a").is_some());
        assert_eq!(vec!["b".to_string()], container.visible_keys());
        assert!(container.remove("a").is_none());
    }

    #[test]
    fn walk_is_preorder() {
        let dataset = test_utils::simple_dataset();
        let ids: Vec<&str> = dataset.walk().into_iter().map(DapNode::id).collect();
        assert_eq!(vec!["a", "b", "c", "s", "s.x", "s.y"], ids);
    }

    #[test]
    fn base_slice_is_view() {
        let dataset = test_utils::simple_dataset();
        let var = match dataset.get("a").unwrap() {
            DapNode::Base(var) => var,
            node => panic!("unexpected node {:?}", node),
        };
        let sliced = var.slice(&[Slice::new(1, Some(4), 2)]).unwrap();
        assert_eq!(vec![2], sliced.shape);
        assert_eq!(Some(vec![1, 3]), sliced.array().unwrap().elements::<i32>());
        assert_eq!(vec![5], var.shape);
    }

    #[test]
    fn base_slice_too_many_dimensions() {
        let var = BaseType::new("a", DType::Int32, vec![3]);
        assert!(var.slice(&[Slice::full(), Slice::full()]).is_err());
    }

    #[test]
    fn missing_data() {
        let var = BaseType::new("a", DType::Int32, vec![3]);
        match var.array().unwrap_err() {
            DapError::MissingData(id) => assert_eq!("a", id),
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn dtype_mismatch() {
        let mut var = BaseType::new("a", DType::Int32, vec![]);
        var.data = VarData::Array(DapArray::from_vec(&[], vec![1.0_f64]).unwrap());
        match var.array().unwrap_err() {
            DapError::DTypeMismatch { id, declared, .. } => {
                assert_eq!("a", id);
                assert_eq!(DType::Int32, declared);
            }
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn clone_deep_copies_records() {
        let dataset = test_utils::sequence_dataset();
        let deep = dataset.clone_deep();
        let shallow = dataset.clone_structure();
        let records = |ds: &Dataset| match ds.get("cast").unwrap() {
            DapNode::Sequence(Sequence {
                data: SequenceData::Records(records),
                ..
            }) => records.clone(),
            node => panic!("unexpected node {:?}", node),
        };
        assert!(Arc::ptr_eq(&records(&dataset), &records(&shallow)));
        assert!(!Arc::ptr_eq(&records(&dataset), &records(&deep)));
        assert_eq!(records(&dataset), records(&deep));
    }

    #[test]
    fn get_attribute() {
        let mut var = BaseType::new("a", DType::Int32, vec![]);
        var.attributes.insert("units", DValue::Str("m".to_string()));
        assert_eq!(
            Some(&AttrValue::Scalar(DValue::Str("m".to_string()))),
            var.get_attribute("units")
        );
        assert_eq!(None, var.get_attribute("long_name"));
    }

    #[test]
    fn remap_record_reorders_and_drops() {
        let from = Container::new("seq")
            .with(BaseType::new("a", DType::Int32, vec![]))
            .with(BaseType::new("b", DType::Int32, vec![]))
            .with(BaseType::new("c", DType::Int32, vec![]));
        let to = Container::new("seq")
            .with(BaseType::new("c", DType::Int32, vec![]))
            .with(BaseType::new("a", DType::Int32, vec![]));
        let record = vec![
            test_utils::int(1),
            test_utils::int(2),
            test_utils::int(3),
        ];
        assert_eq!(
            vec![test_utils::int(3), test_utils::int(1)],
            remap_record(&record, &from, &to).unwrap()
        );
        assert!(remap_record(&record[..1], &from, &to).is_err());
    }
}
