use std::{collections::HashSet, path::PathBuf};

use log::debug;

use crate::{
    error::{Error, Result},
    lexer::{Lexer, Punct, Token},
    options::ParseOptions,
    property::{MarkerKind, PropertyData},
    tree::{is_node_name_char, DeviceTree, MemReserve, NodeId},
};

/// Recursive-descent parser building a [`DeviceTree`] from a token stream.
pub(crate) struct Parser {
    pub(crate) lexer: Lexer,
    saved: Option<Token>,
    dt: DeviceTree,
    force: bool,
    root_defined: bool,
}

impl Parser {
    pub(crate) fn new(options: &ParseOptions, path: PathBuf, contents: Vec<u8>) -> Self {
        Self {
            lexer: Lexer::new(path.clone(), contents, options.include_path.clone()),
            saved: None,
            dt: DeviceTree::new(path, options.include_path.clone()),
            force: options.force,
            root_defined: false,
        }
    }

    /// Parses the whole input and runs the post-parse passes.
    pub(crate) fn parse(mut self) -> Result<DeviceTree> {
        self.parse_header()?;
        self.parse_memreserves()?;
        self.parse_dt()?;

        let mut dt = self.dt;
        dt.fixup(self.force)?;

        debug!(
            "parsed {}: {} nodes, {} phandles, {} labels",
            dt.filename().display(),
            dt.iter().count(),
            dt.phandle2node.len(),
            dt.label2node.len() + dt.label2prop.len() + dt.label2prop_offset.len(),
        );

        Ok(dt)
    }

    /* === Token stream === */

    pub(crate) fn peek(&mut self) -> Result<&Token> {
        let token = match self.saved.take() {
            Some(token) => token,
            None => self.lexer.next_token()?,
        };
        Ok(self.saved.insert(token))
    }

    pub(crate) fn next(&mut self) -> Result<Token> {
        match self.saved.take() {
            Some(token) => Ok(token),
            None => self.lexer.next_token(),
        }
    }

    /// Consumes the next token if it is `punct`.
    pub(crate) fn check(&mut self, punct: Punct) -> Result<bool> {
        if self.peek()?.is_punct(punct) {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(crate) fn expect(&mut self, punct: Punct) -> Result<()> {
        let token = self.next()?;
        if token.is_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', not '{token}'", punct.as_str())))
        }
    }

    fn error(&self, msg: impl std::fmt::Display) -> Error {
        self.lexer.error(msg)
    }

    /* === Top level === */

    /// Parses one or more `/dts-v1/;` at the start of the input.
    fn parse_header(&mut self) -> Result<()> {
        let mut has_dts_v1 = false;

        while *self.peek()? == Token::DtsV1 {
            has_dts_v1 = true;
            self.next()?;
            self.expect(Punct::Semi)?;

            if *self.peek()? == Token::Plugin {
                return Err(self.error("/plugin/ is not supported"));
            }
        }

        if !has_dts_v1 {
            return Err(self.error("expected '/dts-v1/;' at start of file"));
        }
        Ok(())
    }

    /// Parses `[label: ...] /memreserve/ <address> <size>;` entries.
    fn parse_memreserves(&mut self) -> Result<()> {
        loop {
            let mut labels = Vec::new();
            while let Token::Label(label) = self.peek()? {
                let label = label.clone();
                self.next()?;
                push_unique(&mut labels, label);
            }

            if *self.peek()? == Token::MemReserve {
                self.next()?;
                let address = self.eval_u64()?;
                let size = self.eval_u64()?;
                self.dt.memreserves.push(MemReserve {
                    labels,
                    address,
                    size,
                });
                self.expect(Punct::Semi)?;
            } else if !labels.is_empty() {
                return Err(self.error("expected /memreserve/ after labels at beginning of file"));
            } else {
                return Ok(());
            }
        }
    }

    /// Parses the root node and top-level node references until end of input.
    fn parse_dt(&mut self) -> Result<()> {
        loop {
            match self.next()? {
                Token::Punct(Punct::Slash) => {
                    self.root_defined = true;
                    self.parse_node(self.dt.root)?;
                }
                Token::Label(label) => {
                    let Token::Ref(reference) = self.next()? else {
                        return Err(self.error("expected label reference (&foo)"));
                    };
                    let node = self.ref2node(&reference)?;
                    self.parse_node(node)?;
                    push_unique(&mut self.dt.data_mut(node).labels, label);
                }
                Token::Ref(reference) => {
                    let node = self.ref2node(&reference)?;
                    self.parse_node(node)?;
                }
                Token::DeleteNode => {
                    let node = self.next_ref2node()?;
                    self.dt.delete_node(node);
                    self.expect(Punct::Semi)?;
                }
                Token::OmitIfNoRef => {
                    let node = self.next_ref2node()?;
                    self.dt.data_mut(node).omit_if_no_ref = true;
                    self.expect(Punct::Semi)?;
                }
                Token::Eof => {
                    if !self.root_defined {
                        return Err(self.error("no root node defined"));
                    }
                    return Ok(());
                }
                _ => return Err(self.error("expected '/' or label reference (&foo)")),
            }
        }
    }

    /* === Nodes === */

    /// Parses `{ ... };` into `node`, merging with what it already contains.
    fn parse_node(&mut self, node: NodeId) -> Result<()> {
        self.expect(Punct::LBrace)?;

        let mut declared = HashSet::new();

        loop {
            let (labels, omit_if_no_ref) = self.parse_propnode_labels()?;

            match self.next()? {
                Token::PropNodeName(name) if self.peek()?.is_punct(Punct::LBrace) => {
                    // Children from earlier blocks merge; only one created
                    // in this block can be a duplicate.
                    let child = match self.dt.data(node).children.get(&name) {
                        Some(&child) if declared.contains(&name) => {
                            return Err(self.error(format!("{}: duplicate node name", self.dt.path(child))));
                        }
                        Some(&child) => child,
                        None => {
                            let child = self.add_child(node, &name)?;
                            declared.insert(name);
                            child
                        }
                    };

                    let data = self.dt.data_mut(child);
                    for label in labels {
                        push_unique(&mut data.labels, label);
                    }
                    if omit_if_no_ref {
                        data.omit_if_no_ref = true;
                    }

                    self.parse_node(child)?;
                }
                Token::PropNodeName(name) => {
                    if omit_if_no_ref {
                        return Err(self.error("/omit-if-no-ref/ can only be used on nodes"));
                    }
                    if name.contains('@') {
                        return Err(self.error("'@' is only allowed in node names"));
                    }

                    self.dt
                        .data_mut(node)
                        .props
                        .entry(name.clone())
                        .or_insert_with(|| PropertyData::new(name.clone()));

                    if self.check(Punct::Assign)? {
                        self.parse_assignment(node, &name)?;
                    } else if !self.check(Punct::Semi)? {
                        return Err(self.error("expected '{', '=', or ';'"));
                    }

                    if let Some(prop) = self.dt.data_mut(node).props.get_mut(&name) {
                        for label in labels {
                            push_unique(&mut prop.labels, label);
                        }
                    }
                }
                Token::DeleteNode => {
                    let Token::PropNodeName(name) = self.next()? else {
                        return Err(self.error("expected node name"));
                    };
                    if let Some(&child) = self.dt.data(node).children.get(&name) {
                        self.dt.delete_node(child);
                    }
                    declared.remove(&name);
                    self.expect(Punct::Semi)?;
                }
                Token::DeleteProperty => {
                    let Token::PropNodeName(name) = self.next()? else {
                        return Err(self.error("expected property name"));
                    };
                    self.dt.data_mut(node).props.shift_remove(&name);
                    self.expect(Punct::Semi)?;
                }
                Token::Punct(Punct::RBrace) => {
                    self.expect(Punct::Semi)?;
                    return Ok(());
                }
                _ => return Err(self.error("expected node name, property name, or '}'")),
            }
        }
    }

    /// Parses the labels and `/omit-if-no-ref/`s in front of a node or
    /// property.
    fn parse_propnode_labels(&mut self) -> Result<(Vec<String>, bool)> {
        let mut labels = Vec::new();
        let mut omit_if_no_ref = false;

        loop {
            match self.peek()? {
                Token::Label(label) => {
                    let label = label.clone();
                    push_unique(&mut labels, label);
                }
                Token::OmitIfNoRef => omit_if_no_ref = true,
                Token::PropNodeName(_) => return Ok((labels, omit_if_no_ref)),
                _ if labels.is_empty() && !omit_if_no_ref => return Ok((labels, omit_if_no_ref)),
                _ => return Err(self.error("expected node or property name")),
            }
            self.next()?;
        }
    }

    /// Creates `name` under `parent`, checking that it is a valid node name.
    fn add_child(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        if name.matches('@').count() > 1 {
            return Err(self.error("multiple '@' in node name"));
        }
        if let Some(c) = name.chars().find(|&c| !is_node_name_char(c)) {
            let path = match self.dt.path(parent).as_str() {
                "/" => format!("/{name}"),
                parent => format!("{parent}/{name}"),
            };
            return Err(self.error(format!("{path}: bad character '{c}' in node name")));
        }

        Ok(self.dt.add_node(parent, name.to_string()))
    }

    /* === Property values === */

    /// Parses the right-hand side of `name = ...;`, replacing the old value.
    fn parse_assignment(&mut self, node: NodeId, name: &str) -> Result<()> {
        let mut prop = PropertyData::new(name.to_string());

        loop {
            self.parse_value_labels(&mut prop)?;

            match self.next()? {
                Token::Punct(Punct::Lt) => self.parse_cells(&mut prop, 4)?,
                Token::Bits => {
                    let bits = match self.next()? {
                        Token::Num(n @ (8 | 16 | 32 | 64)) => n,
                        Token::Num(_) => return Err(self.error("expected 8, 16, 32, or 64")),
                        _ => return Err(self.error("expected number")),
                    };
                    self.expect(Punct::Lt)?;
                    self.parse_cells(&mut prop, bits as usize / 8)?;
                }
                Token::Punct(Punct::LBracket) => self.parse_bytes(&mut prop)?,
                Token::Str(s) => {
                    prop.add_marker(MarkerKind::String);
                    prop.value.extend_from_slice(&s);
                    prop.value.push(0);
                }
                Token::Ref(reference) => prop.add_marker(MarkerKind::RefPath(reference)),
                Token::IncBin => self.parse_incbin(&mut prop)?,
                _ => return Err(self.error("malformed value")),
            }

            self.parse_value_labels(&mut prop)?;

            match self.next()? {
                Token::Punct(Punct::Semi) => break,
                Token::Punct(Punct::Comma) => continue,
                _ => return Err(self.error("expected ';' or ','")),
            }
        }

        if let Some(data) = self.dt.data_mut(node).props.get_mut(name) {
            data.value = prop.value;
            data.markers = prop.markers;
        }
        Ok(())
    }

    /// Parses `label:`s inside a value.
    fn parse_value_labels(&mut self, prop: &mut PropertyData) -> Result<()> {
        while let Token::Label(label) = self.peek()? {
            let label = label.clone();
            self.next()?;
            prop.add_marker(MarkerKind::RefLabel(label));
        }
        Ok(())
    }

    /// Parses the cells of `< ... >` after the `<`, each `size` bytes wide.
    fn parse_cells(&mut self, prop: &mut PropertyData, size: usize) -> Result<()> {
        prop.add_marker(match size {
            1 => MarkerKind::Uint8Cells,
            2 => MarkerKind::Uint16,
            4 => MarkerKind::Uint32,
            _ => MarkerKind::Uint64,
        });

        loop {
            match self.peek()? {
                Token::Ref(reference) => {
                    let reference = reference.clone();
                    self.next()?;
                    if size != 4 {
                        return Err(self.error(
                            "phandle references are only allowed in arrays with 32-bit elements",
                        ));
                    }
                    prop.add_marker(MarkerKind::RefPhandle(reference));
                }
                Token::Label(label) => {
                    let label = label.clone();
                    self.next()?;
                    prop.add_marker(MarkerKind::RefLabel(label));
                }
                Token::Punct(Punct::Gt) => {
                    self.next()?;
                    return Ok(());
                }
                _ => {
                    let num = self.eval_prim()?;
                    let bits = 8 * size as u32;
                    // Accept both the unsigned and the signed range
                    if num < -(1i128 << (bits - 1)) || num >= 1i128 << bits {
                        return Err(self.error(format!("{num} does not fit in {bits} bits")));
                    }
                    let bytes = (num as u128).to_be_bytes();
                    prop.value.extend_from_slice(&bytes[bytes.len() - size..]);
                }
            }
        }
    }

    /// Parses the bytes of `[ ... ]` after the `[`.
    fn parse_bytes(&mut self, prop: &mut PropertyData) -> Result<()> {
        prop.add_marker(MarkerKind::Uint8);

        loop {
            match self.next()? {
                Token::Byte(b) => prop.value.push(b),
                Token::Label(label) => prop.add_marker(MarkerKind::RefLabel(label)),
                Token::Punct(Punct::RBracket) => return Ok(()),
                _ => return Err(self.error("expected two-digit byte or ']'")),
            }
        }
    }

    /// Parses `("file")` or `("file", offset, size)` after `/incbin/` and
    /// appends the file contents.
    fn parse_incbin(&mut self, prop: &mut PropertyData) -> Result<()> {
        prop.add_marker(MarkerKind::Uint8);
        self.expect(Punct::LParen)?;

        let Token::Str(filename) = self.next()? else {
            return Err(self.error("expected quoted filename"));
        };
        let filename = String::from_utf8(filename)
            .map_err(|_| self.error("filename is not valid UTF-8"))?;

        let range = match self.next()? {
            Token::Punct(Punct::Comma) => {
                let offset = self.eval_prim()?;
                self.expect(Punct::Comma)?;
                let size = self.eval_prim()?;
                self.expect(Punct::RParen)?;
                Some((offset, size))
            }
            Token::Punct(Punct::RParen) => None,
            _ => return Err(self.error("expected ',' or ')'")),
        };

        let (path, contents) = self.lexer.open(&filename)?;
        debug!("/incbin/ {} ({} bytes)", path.display(), contents.len());

        let data = match range {
            None => &contents[..],
            Some((offset, size)) => {
                let start = usize::try_from(offset).map_err(|_| {
                    self.error(format!("could not read '{filename}': invalid offset {offset}"))
                })?;
                let start = start.min(contents.len());
                // A negative size reads to the end of the file
                let end = usize::try_from(size)
                    .map_or(contents.len(), |size| start.saturating_add(size))
                    .min(contents.len());
                &contents[start..end]
            }
        };
        prop.value.extend_from_slice(data);

        Ok(())
    }

    /* === Utility functions === */

    fn eval_u64(&mut self) -> Result<u64> {
        let num = self.eval_prim()?;
        u64::try_from(num).map_err(|_| self.error(format!("{num} does not fit in 64 bits")))
    }

    fn ref2node(&self, reference: &str) -> Result<NodeId> {
        self.dt.ref2node(reference).map_err(|e| self.error(e))
    }

    /// Parses a reference and resolves it to a node.
    fn next_ref2node(&mut self) -> Result<NodeId> {
        match self.next()? {
            Token::Ref(reference) => self.ref2node(&reference),
            _ => Err(self.error("expected label (&foo) or path (&{/foo/bar}) reference")),
        }
    }
}

/// Appends `item` unless it is already present.
pub(crate) fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}
