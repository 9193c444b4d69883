//! Passes run over a freshly parsed tree.
//!
//! Parsing only records references; these passes resolve them. They run in a
//! fixed order: phandle registration, reference resolution (which may
//! allocate phandles), alias registration, `/omit-if-no-ref/` pruning and
//! finally label registration.

use indexmap::IndexMap;
use log::debug;

use crate::{
    error::{bail, Error, Result},
    parser::push_unique,
    property::{MarkerKind, PropertyData, PropertyId},
    tree::{DeviceTree, NodeId},
};

/// Where a label was found.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LabelSite {
    Node(NodeId),
    Property(PropertyId),
    Value(PropertyId, usize),
}

impl DeviceTree {
    pub(crate) fn fixup(&mut self, force: bool) -> Result<()> {
        self.register_phandles()?;
        self.fixup_props()?;
        self.register_aliases(force)?;
        self.remove_unreferenced();
        self.register_labels()
    }

    /// Validates `phandle` properties and records them in `phandle2node`.
    fn register_phandles(&mut self) -> Result<()> {
        for id in self.node_ids() {
            let Some(prop) = self.data(id).props.get("phandle") else {
                continue;
            };
            let path = self.path(id);

            let Ok(bytes) = <[u8; 4]>::try_from(prop.value.as_slice()) else {
                bail!("{path}: bad phandle length ({}), expected 4 bytes", prop.value.len());
            };

            // `phandle = <&self>` is allocated like any other reference.
            let mut self_ref = false;
            for marker in &prop.markers {
                if let MarkerKind::RefPhandle(reference) = &marker.kind {
                    if self.ref2node(reference)? != id {
                        bail!("{path}: phandle refers to another node");
                    }
                    self_ref = true;
                }
            }
            if self_ref {
                continue;
            }

            let phandle = u32::from_be_bytes(bytes);
            if phandle == 0 || phandle == u32::MAX {
                bail!("{path}: bad value {phandle:#010x} for phandle");
            }
            if let Some(&other) = self.phandle2node.get(&phandle) {
                bail!(
                    "{path}: duplicated phandle {phandle:#x} (seen before at {})",
                    self.path(other)
                );
            }

            self.phandle2node.insert(phandle, id);
        }

        Ok(())
    }

    /// Replaces path and phandle references with their values. Marker offsets
    /// are moved to match the rewritten value.
    fn fixup_props(&mut self) -> Result<()> {
        for id in self.node_ids() {
            let names: Vec<String> = self.data(id).props.keys().cloned().collect();

            for name in names {
                let Some(prop) = self.data(id).props.get(&name) else {
                    continue;
                };
                let value = prop.value.clone();
                let mut markers = prop.markers.clone();

                let mut res = Vec::with_capacity(value.len());
                let mut label_offsets = Vec::new();
                let mut prev = 0;

                for marker in &mut markers {
                    let mut pos = marker.offset;
                    res.extend_from_slice(&value[prev..pos]);
                    marker.offset = res.len();

                    match &marker.kind {
                        MarkerKind::RefLabel(label) => {
                            push_unique(&mut label_offsets, (label.clone(), res.len()));
                        }
                        MarkerKind::RefPath(reference) | MarkerKind::RefPhandle(reference) => {
                            let target = self
                                .ref2node(reference)
                                .map_err(|e| Error::msg(format!("{}: {e}", self.path(id))))?;
                            self.data_mut(target).is_referenced = true;

                            if let MarkerKind::RefPath(_) = marker.kind {
                                res.extend_from_slice(self.path(target).as_bytes());
                                res.push(0);
                            } else {
                                res.extend_from_slice(&self.node_phandle(target));
                                pos += 4;
                            }
                        }
                        _ => {}
                    }

                    prev = pos;
                }
                res.extend_from_slice(&value[prev..]);

                if let Some(prop) = self.data_mut(id).props.get_mut(&name) {
                    prop.value = res;
                    prop.markers = markers;
                    prop.label_offsets = label_offsets;
                }
            }
        }

        Ok(())
    }

    /// Returns the phandle of `node`, allocating the lowest free one if the
    /// node has none yet.
    fn node_phandle(&mut self, node: NodeId) -> [u8; 4] {
        if let Some(prop) = self.data(node).props.get("phandle") {
            if let Ok(bytes) = <[u8; 4]>::try_from(prop.value.as_slice()) {
                if bytes != [0; 4] {
                    return bytes;
                }
            }
        }

        let phandle = (1..=u32::MAX)
            .find(|p| !self.phandle2node.contains_key(p))
            .unwrap_or(u32::MAX);
        self.phandle2node.insert(phandle, node);
        debug!("allocated phandle {phandle:#x} for {}", self.path(node));

        let bytes = phandle.to_be_bytes();
        let prop = self
            .data_mut(node)
            .props
            .entry("phandle".to_string())
            .or_insert_with(|| {
                let mut prop = PropertyData::new("phandle".to_string());
                prop.add_marker(MarkerKind::Uint32);
                prop
            });
        prop.value = bytes.to_vec();

        bytes
    }

    /// Fills `alias2node` from the properties of `/aliases`.
    fn register_aliases(&mut self, force: bool) -> Result<()> {
        let mut alias2node = IndexMap::new();

        if let Some(aliases) = self.root().child("aliases") {
            for prop in aliases.props() {
                let name = prop.name();
                if !name
                    .bytes()
                    .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase() || c == b'-')
                {
                    bail!(
                        "/aliases: alias property name '{name}' should include only characters from [0-9a-z-]"
                    );
                }

                match prop.to_path() {
                    Ok(node) => {
                        alias2node.insert(name.to_string(), node.id());
                    }
                    Err(e) if force => debug!("ignoring alias '{name}': {e}"),
                    Err(e) => return Err(e),
                }
            }
        }

        self.alias2node = alias2node;
        Ok(())
    }

    /// Deletes `/omit-if-no-ref/` nodes that nothing references.
    fn remove_unreferenced(&mut self) {
        for id in self.node_ids() {
            let data = self.data(id);
            if data.attached && data.omit_if_no_ref && !data.is_referenced {
                debug!("omitting unreferenced node {}", self.path(id));
                self.delete_node(id);
            }
        }

        let nodes = &self.nodes;
        self.phandle2node.retain(|_, id| nodes[id.0].attached);
        self.alias2node.retain(|_, id| nodes[id.0].attached);
    }

    /// Builds the label maps, failing if a label is used in more than one
    /// place. The places are listed in document order, not sorted.
    fn register_labels(&mut self) -> Result<()> {
        let mut sites: IndexMap<String, Vec<LabelSite>> = IndexMap::new();

        for id in self.node_ids() {
            let data = &mut self.nodes[id.0];

            for label in &data.labels {
                push_unique(sites.entry(label.clone()).or_default(), LabelSite::Node(id));
                self.label2node.insert(label.clone(), id);
            }

            for prop in data.props.values_mut() {
                let prop_id = PropertyId {
                    node: id,
                    name: prop.name.clone(),
                };

                for label in &prop.labels {
                    push_unique(
                        sites.entry(label.clone()).or_default(),
                        LabelSite::Property(prop_id.clone()),
                    );
                    self.label2prop.insert(label.clone(), prop_id.clone());
                }

                prop.offset_labels.clear();
                for (label, offset) in &prop.label_offsets {
                    push_unique(
                        sites.entry(label.clone()).or_default(),
                        LabelSite::Value(prop_id.clone(), *offset),
                    );
                    self.label2prop_offset
                        .insert(label.clone(), (prop_id.clone(), *offset));
                    prop.offset_labels.insert(label.clone(), *offset);
                }
            }
        }

        for (label, sites) in &sites {
            if sites.len() < 2 {
                continue;
            }

            let places: Vec<String> = sites
                .iter()
                .map(|site| match site {
                    LabelSite::Node(id) => format!("on {}", self.path(*id)),
                    LabelSite::Property(prop) => {
                        format!("on property '{}' of node {}", prop.name, self.path(prop.node))
                    }
                    LabelSite::Value(prop, _) => format!(
                        "in the value of property '{}' of node {}",
                        prop.name,
                        self.path(prop.node)
                    ),
                })
                .collect();

            bail!("Label '{label}' appears {}", places.join(" and "));
        }

        Ok(())
    }
}
