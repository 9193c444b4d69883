//! The devicetree object model.
//!
//! Nodes live in an arena owned by [`DeviceTree`] and are addressed by
//! [`NodeId`]. [`Node`] and [`Property`] are cheap borrowed views for reading;
//! structural changes go through `&mut DeviceTree`.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;

use crate::{
    error::{bail, Result},
    options::ParseOptions,
    property::{Property, PropertyData, PropertyId},
};

/// Handle to a node in a [`DeviceTree`].
///
/// Handles stay valid for the lifetime of the tree, including after the node
/// is moved. A deleted node keeps its handle but is no longer reachable from
/// the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// A `/memreserve/` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemReserve {
    pub labels: Vec<String>,
    pub address: u64,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct NodeData {
    pub(crate) name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: IndexMap<String, NodeId>,
    pub(crate) props: IndexMap<String, PropertyData>,
    pub(crate) labels: Vec<String>,
    pub(crate) omit_if_no_ref: bool,
    pub(crate) is_referenced: bool,
    pub(crate) attached: bool,
}

impl NodeData {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            parent,
            children: IndexMap::new(),
            props: IndexMap::new(),
            labels: Vec::new(),
            omit_if_no_ref: false,
            is_referenced: false,
            attached: true,
        }
    }
}

/// A parsed devicetree.
///
/// Cloning a tree produces an independent deep copy.
#[derive(Debug, Clone)]
pub struct DeviceTree {
    pub(crate) nodes: Vec<NodeData>,
    pub(crate) root: NodeId,
    pub(crate) alias2node: IndexMap<String, NodeId>,
    pub(crate) label2node: IndexMap<String, NodeId>,
    pub(crate) label2prop: IndexMap<String, PropertyId>,
    pub(crate) label2prop_offset: IndexMap<String, (PropertyId, usize)>,
    pub(crate) phandle2node: IndexMap<u32, NodeId>,
    pub(crate) memreserves: Vec<MemReserve>,
    filename: PathBuf,
    include_path: Vec<PathBuf>,
}

impl DeviceTree {
    /// Parses the DTS file at `path`, searching `include_path` for
    /// `/include/` and `/incbin/` files.
    pub fn parse_file<I, P>(path: impl AsRef<Path>, include_path: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        ParseOptions::new()
            .include_path(include_path)
            .parse_file(path)
    }

    pub(crate) fn new(filename: PathBuf, include_path: Vec<PathBuf>) -> Self {
        Self {
            nodes: vec![NodeData::new("/".to_string(), None)],
            root: NodeId(0),
            alias2node: IndexMap::new(),
            label2node: IndexMap::new(),
            label2prop: IndexMap::new(),
            label2prop_offset: IndexMap::new(),
            phandle2node: IndexMap::new(),
            memreserves: Vec::new(),
            filename,
            include_path,
        }
    }

    pub fn root(&self) -> Node<'_> {
        self.node(self.root)
    }

    /// Returns a view of the node with handle `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this tree.
    pub fn node(&self, id: NodeId) -> Node<'_> {
        assert!(id.0 < self.nodes.len(), "{id:?} does not belong to this tree");
        Node { dt: self, id }
    }

    /// The file the tree was parsed from.
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn include_path(&self) -> &[PathBuf] {
        &self.include_path
    }

    pub fn memreserves(&self) -> &[MemReserve] {
        &self.memreserves
    }

    /// Aliases from the `/aliases` node.
    pub fn alias2node(&self) -> &IndexMap<String, NodeId> {
        &self.alias2node
    }

    pub fn label2node(&self) -> &IndexMap<String, NodeId> {
        &self.label2node
    }

    pub fn label2prop(&self) -> &IndexMap<String, PropertyId> {
        &self.label2prop
    }

    /// Labels inside property values, with their byte offset into the value.
    pub fn label2prop_offset(&self) -> &IndexMap<String, (PropertyId, usize)> {
        &self.label2prop_offset
    }

    pub fn phandle2node(&self) -> &IndexMap<u32, NodeId> {
        &self.phandle2node
    }

    pub fn property(&self, id: &PropertyId) -> Option<Property<'_>> {
        self.node(id.node).prop(&id.name)
    }

    /// Looks up a node by path.
    ///
    /// Paths starting with `/` are resolved from the root. Otherwise the first
    /// component names an alias, and the rest of the path is resolved from the
    /// aliased node. Empty components are ignored.
    pub fn get_node(&self, path: &str) -> Result<Node<'_>> {
        if path.starts_with('/') {
            return self
                .root_and_path_to_node(self.root, path, path)
                .map(|id| self.node(id));
        }

        let (alias, rest) = path.split_once('/').unwrap_or((path, ""));
        let Some(&start) = self.alias2node.get(alias) else {
            bail!("no alias '{alias}' found -- did you forget the leading '/' in the node path?");
        };

        self.root_and_path_to_node(start, rest, path)
            .map(|id| self.node(id))
    }

    pub fn has_node(&self, path: &str) -> bool {
        self.get_node(path).is_ok()
    }

    /// Iterates over all nodes in pre-order, starting at the root.
    pub fn iter(&self) -> NodeIter<'_> {
        self.root().iter()
    }

    /// Moves `node` to `new_path`, which may also rename it.
    ///
    /// The parent of `new_path` must already exist and `new_path` itself must
    /// not. The node is appended after its new siblings.
    pub fn move_node(&mut self, node: NodeId, new_path: &str) -> Result<()> {
        let old_path = self.path(node);

        if node == self.root {
            bail!("the root node can't be moved");
        }
        if self.has_node(new_path) {
            bail!("can't move '{old_path}' to '{new_path}': destination node exists");
        }
        if !new_path.starts_with('/') {
            bail!("path '{new_path}' doesn't start with '/'");
        }
        if let Some(c) = new_path.chars().find(|&c| c != '/' && !is_node_name_char(c)) {
            bail!("new path '{new_path}': bad character '{c}'");
        }

        let (parent_path, new_name) = new_path.rsplit_once('/').unwrap_or(("", new_path));
        let parent_path = if parent_path.is_empty() { "/" } else { parent_path };

        if new_name.is_empty() {
            bail!("can't move '{old_path}' to '{new_path}': empty node name");
        }
        let new_parent = match self.get_node(parent_path) {
            Ok(parent) => parent.id(),
            Err(_) => bail!(
                "can't move '{old_path}' to '{new_path}': parent node '{parent_path}' doesn't exist"
            ),
        };
        if self.node(node).iter().any(|n| n.id() == new_parent) {
            bail!("can't move '{old_path}' to '{new_path}': destination is inside the node being moved");
        }

        self.detach(node);

        let data = self.data_mut(node);
        data.name = new_name.to_string();
        data.parent = Some(new_parent);
        self.data_mut(new_parent)
            .children
            .insert(new_name.to_string(), node);
        self.set_attached(node, true);

        Ok(())
    }

    /// Deletes `node` and its subtree. Deleting the root removes all of its
    /// properties and children instead.
    pub fn delete_node(&mut self, node: NodeId) {
        if node == self.root {
            let children: Vec<NodeId> = self.data(node).children.values().copied().collect();
            for child in children {
                self.set_attached(child, false);
            }

            let root = self.data_mut(node);
            root.children.clear();
            root.props.clear();
            return;
        }

        self.detach(node);
        self.set_attached(node, false);
    }

    pub(crate) fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }

    pub(crate) fn data_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.0]
    }

    /// Creates a child of `parent` named `name`.
    pub(crate) fn add_node(&mut self, parent: NodeId, name: String) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData::new(name.clone(), Some(parent)));
        self.data_mut(parent).children.insert(name, id);
        id
    }

    pub(crate) fn path(&self, id: NodeId) -> String {
        let mut components = Vec::new();
        let mut cur = id;
        while let Some(parent) = self.data(cur).parent {
            components.push(self.data(cur).name.as_str());
            cur = parent;
        }

        if components.is_empty() {
            return "/".to_string();
        }

        components
            .iter()
            .rev()
            .fold(String::new(), |path, name| path + "/" + name)
    }

    /// Node handles in pre-order, starting at the root.
    pub(crate) fn node_ids(&self) -> Vec<NodeId> {
        self.iter().map(|n| n.id()).collect()
    }

    /// Resolves a `&label` or `&{/path}` reference (given without the `&`).
    pub(crate) fn ref2node(&self, reference: &str) -> Result<NodeId> {
        if let Some(path) = reference.strip_prefix('{') {
            let path = path.strip_suffix('}').unwrap_or(path);
            if !path.starts_with('/') {
                bail!("node path '{path}' does not start with '/'");
            }
            return self.root_and_path_to_node(self.root, path, path);
        }

        match self.iter().find(|n| n.labels().iter().any(|l| l == reference)) {
            Some(node) => Ok(node.id()),
            None => bail!("undefined node label '{reference}'"),
        }
    }

    fn root_and_path_to_node(&self, start: NodeId, path: &str, full_path: &str) -> Result<NodeId> {
        let mut node = start;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            match self.data(node).children.get(component) {
                Some(&child) => node = child,
                None => bail!("component '{component}' in path '{full_path}' does not exist"),
            }
        }

        Ok(node)
    }

    /// Unlinks `node` from its parent, if it is still linked there.
    fn detach(&mut self, node: NodeId) {
        let data = self.data(node);
        let Some(parent) = data.parent else {
            return;
        };

        let name = data.name.clone();
        let children = &mut self.data_mut(parent).children;
        if children.get(&name) == Some(&node) {
            children.shift_remove(&name);
        }
    }

    fn set_attached(&mut self, node: NodeId, attached: bool) {
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let data = self.data_mut(id);
            data.attached = attached;
            stack.extend(data.children.values().copied());
        }
    }
}

impl fmt::Display for DeviceTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("/dts-v1/;\n\n")?;

        for reserve in &self.memreserves {
            for label in &reserve.labels {
                write!(f, "{label}: ")?;
            }
            writeln!(f, "/memreserve/ {:#018x} {:#018x};", reserve.address, reserve.size)?;
        }
        if !self.memreserves.is_empty() {
            f.write_str("\n")?;
        }

        self.root().render(f, 0)
    }
}

/// Returns whether `c` may appear in a node name.
pub(crate) fn is_node_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ",._+@-".contains(c)
}

/// A borrowed view of a node.
#[derive(Clone, Copy)]
pub struct Node<'dt> {
    dt: &'dt DeviceTree,
    id: NodeId,
}

impl<'dt> Node<'dt> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &'dt DeviceTree {
        self.dt
    }

    /// The node name, including any unit address. The root is named `/`.
    pub fn name(&self) -> &'dt str {
        &self.data().name
    }

    /// The part of the name after `@`, if any.
    pub fn unit_addr(&self) -> &'dt str {
        self.name().split_once('@').map_or("", |(_, addr)| addr)
    }

    pub fn path(&self) -> String {
        self.dt.path(self.id)
    }

    pub fn parent(&self) -> Option<Node<'dt>> {
        self.data().parent.map(|id| self.dt.node(id))
    }

    pub fn children(&self) -> impl Iterator<Item = Node<'dt>> + 'dt {
        let dt = self.dt;
        self.data().children.values().map(move |&id| dt.node(id))
    }

    pub fn child(&self, name: &str) -> Option<Node<'dt>> {
        self.data().children.get(name).map(|&id| self.dt.node(id))
    }

    pub fn props(&self) -> impl Iterator<Item = Property<'dt>> + 'dt {
        let node = *self;
        self.data()
            .props
            .values()
            .map(move |data| Property::new(node, data))
    }

    pub fn prop(&self, name: &str) -> Option<Property<'dt>> {
        self.data()
            .props
            .get(name)
            .map(|data| Property::new(*self, data))
    }

    pub fn labels(&self) -> &'dt [String] {
        &self.data().labels
    }

    /// Iterates over this node and its descendants in pre-order.
    pub fn iter(&self) -> NodeIter<'dt> {
        NodeIter {
            dt: self.dt,
            stack: vec![self.id],
        }
    }

    fn data(&self) -> &'dt NodeData {
        self.dt.data(self.id)
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "\t".repeat(depth);

        f.write_str(&indent)?;
        for label in self.labels() {
            write!(f, "{label}: ")?;
        }
        writeln!(f, "{} {{", self.name())?;

        for prop in self.props() {
            writeln!(f, "{indent}\t{prop}")?;
        }
        for child in self.children() {
            child.render(f, depth + 1)?;
            f.write_str("\n")?;
        }

        write!(f, "{indent}}};")
    }
}

impl PartialEq for Node<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.dt, other.dt) && self.id == other.id
    }
}

impl Eq for Node<'_> {}

impl fmt::Display for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Node {} in '{}'>", self.path(), self.dt.filename.display())
    }
}

/// Pre-order iterator over a subtree.
pub struct NodeIter<'dt> {
    dt: &'dt DeviceTree,
    stack: Vec<NodeId>,
}

impl<'dt> Iterator for NodeIter<'dt> {
    type Item = Node<'dt>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.dt.data(id).children.values().rev().copied());
        Some(self.dt.node(id))
    }
}

impl<'dt> IntoIterator for &'dt DeviceTree {
    type Item = Node<'dt>;
    type IntoIter = NodeIter<'dt>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::from_str;

    const SOURCE: &str = indoc! {r#"
        /dts-v1/;

        / {
            aliases {
                ser = &uart;
            };
            soc {
                uart: serial@1000 {
                    port { };
                };
                i2c@2000 { };
            };
            cpus { };
        };
    "#};

    #[test]
    fn paths_and_names() {
        let dt = from_str(SOURCE).unwrap();

        let uart = dt.get_node("/soc/serial@1000").unwrap();
        assert_eq!("serial@1000", uart.name());
        assert_eq!("1000", uart.unit_addr());
        assert_eq!("/soc/serial@1000", uart.path());
        assert_eq!("/soc", uart.parent().unwrap().path());
        assert_eq!("", dt.get_node("/cpus").unwrap().unit_addr());
        assert_eq!("/", dt.root().path());
        assert_eq!(None, dt.root().parent());
    }

    #[test]
    fn lookups() {
        let dt = from_str(SOURCE).unwrap();

        for (path, exp) in [
            ("/", "/"),
            ("//soc//serial@1000/", "/soc/serial@1000"),
            ("ser", "/soc/serial@1000"),
            ("ser/port", "/soc/serial@1000/port"),
        ] {
            assert_eq!(exp, dt.get_node(path).unwrap().path());
        }

        for (path, msg) in [
            (
                "/soc/nope",
                "component 'nope' in path '/soc/nope' does not exist",
            ),
            (
                "soc",
                "no alias 'soc' found -- did you forget the leading '/' in the node path?",
            ),
            (
                "ser/nope",
                "component 'nope' in path 'ser/nope' does not exist",
            ),
        ] {
            assert_eq!(msg, dt.get_node(path).unwrap_err().to_string());
            assert!(!dt.has_node(path));
        }
    }

    #[test]
    fn iteration_order() {
        let dt = from_str(SOURCE).unwrap();

        let paths: Vec<String> = dt.iter().map(|n| n.path()).collect();
        assert_eq!(
            vec![
                "/",
                "/aliases",
                "/soc",
                "/soc/serial@1000",
                "/soc/serial@1000/port",
                "/soc/i2c@2000",
                "/cpus",
            ],
            paths
        );

        let soc = dt.get_node("/soc").unwrap();
        assert_eq!(4, soc.iter().count());
    }

    #[test]
    fn move_nodes() {
        let mut dt = from_str(SOURCE).unwrap();
        let uart = dt.get_node("/soc/serial@1000").unwrap().id();

        dt.move_node(uart, "/cpus/serial@3000").unwrap();

        let moved = dt.node(uart);
        assert_eq!("/cpus/serial@3000", moved.path());
        assert_eq!("serial@3000", moved.name());
        assert!(!dt.has_node("/soc/serial@1000"));
        assert!(dt.has_node("/cpus/serial@3000/port"));
        assert_eq!(uart, dt.get_node("ser").unwrap().id());

        // Appended after existing siblings
        dt.move_node(dt.get_node("/soc/i2c@2000").unwrap().id(), "/i2c@2000")
            .unwrap();
        let names: Vec<&str> = dt.root().children().map(|n| n.name()).collect();
        assert_eq!(vec!["aliases", "soc", "cpus", "i2c@2000"], names);
    }

    #[test]
    fn move_errors() {
        let mut dt = from_str(SOURCE).unwrap();
        let uart = dt.get_node("/soc/serial@1000").unwrap().id();
        let root = dt.root().id();
        let soc = dt.get_node("/soc").unwrap().id();

        for (node, path, msg) in [
            (root, "/foo", "the root node can't be moved"),
            (
                uart,
                "/cpus",
                "can't move '/soc/serial@1000' to '/cpus': destination node exists",
            ),
            (uart, "cpus/x", "path 'cpus/x' doesn't start with '/'"),
            (uart, "/a b", "new path '/a b': bad character ' '"),
            (
                uart,
                "/none/uart",
                "can't move '/soc/serial@1000' to '/none/uart': parent node '/none' doesn't exist",
            ),
            (
                soc,
                "/soc/serial@1000/soc",
                "can't move '/soc' to '/soc/serial@1000/soc': destination is inside the node being moved",
            ),
        ] {
            assert_eq!(msg, dt.move_node(node, path).unwrap_err().to_string());
        }
    }

    #[test]
    fn delete_nodes() {
        let mut dt = from_str(SOURCE).unwrap();
        let soc = dt.get_node("/soc").unwrap().id();

        dt.delete_node(soc);
        assert!(!dt.has_node("/soc"));
        assert!(!dt.has_node("/soc/serial@1000/port"));
        assert_eq!(3, dt.iter().count());

        dt.delete_node(dt.root().id());
        assert_eq!(1, dt.iter().count());
        assert_eq!("/dts-v1/;\n\n/ {\n};", dt.to_string());
    }

    #[test]
    fn deep_copy() {
        let dt = from_str(SOURCE).unwrap();
        let mut copy = dt.clone();

        let soc = copy.get_node("/soc").unwrap().id();
        copy.delete_node(soc);

        assert!(dt.has_node("/soc/serial@1000"));
        assert!(!copy.has_node("/soc/serial@1000"));
        assert_eq!(dt.alias2node(), copy.alias2node());
    }
}
