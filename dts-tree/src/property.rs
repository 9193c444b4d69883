//! Properties, their typed values, and how they are written back out.

use std::fmt::{self, Write};

use indexmap::IndexMap;

use crate::{
    error::{Error, Result},
    tree::{Node, NodeId},
};

/// Identifies a property by its node and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyId {
    pub node: NodeId,
    pub name: String,
}

/// The type of a property, derived from how its value was written.
///
/// | Type | Syntax |
/// |---|---|
/// | `Empty` | `foo;` |
/// | `Bytes` | `foo = [01 02];` or `foo = /incbin/("file");` |
/// | `Num` | `foo = <1>;` |
/// | `Nums` | `foo = <1 2>;`, `foo = <1>, <2>;` or `foo = < >;` |
/// | `String` | `foo = "bar";` |
/// | `Strings` | `foo = "bar", "baz";` |
/// | `Path` | `foo = &label;` |
/// | `Phandle` | `foo = <&label>;` |
/// | `Phandles` | `foo = <&a &b>;` |
/// | `PhandlesAndNums` | `foo = <&a 1 2 &b>;` |
/// | `Compound` | anything else, e.g. `foo = <1>, "bar";` |
///
/// `/bits/` arrays other than `/bits/ 32` are `Compound`, except that
/// `/bits/ 8` on its own is `Bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    Empty,
    Bytes,
    Num,
    Nums,
    String,
    Strings,
    Path,
    Phandle,
    Phandles,
    PhandlesAndNums,
    Compound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MarkerKind {
    /// `[ ... ]` or `/incbin/`
    Uint8,
    /// `/bits/ 8 < ... >`
    Uint8Cells,
    Uint16,
    Uint32,
    Uint64,
    String,
    /// `&ref` outside of `< >`, replaced by the path to the node.
    RefPath(String),
    /// `&ref` inside `< >`, replaced by the phandle of the node.
    RefPhandle(String),
    /// `label:` inside the value.
    RefLabel(String),
}

/// What [`PropertyType`] derivation sees of a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataKind {
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    String,
    Path,
    Phandle,
}

impl MarkerKind {
    fn data_kind(&self) -> Option<DataKind> {
        match self {
            MarkerKind::Uint8 | MarkerKind::Uint8Cells => Some(DataKind::Uint8),
            MarkerKind::Uint16 => Some(DataKind::Uint16),
            MarkerKind::Uint32 => Some(DataKind::Uint32),
            MarkerKind::Uint64 => Some(DataKind::Uint64),
            MarkerKind::String => Some(DataKind::String),
            MarkerKind::RefPath(_) => Some(DataKind::Path),
            MarkerKind::RefPhandle(_) => Some(DataKind::Phandle),
            MarkerKind::RefLabel(_) => None,
        }
    }

    /// The element size and brackets of array markers.
    fn array(&self) -> Option<(usize, &'static str, &'static str)> {
        match self {
            MarkerKind::Uint8 => Some((1, " [", " ]")),
            MarkerKind::Uint8Cells => Some((1, " /bits/ 8 <", " >")),
            MarkerKind::Uint16 => Some((2, " /bits/ 16 <", " >")),
            MarkerKind::Uint32 => Some((4, " <", " >")),
            MarkerKind::Uint64 => Some((8, " /bits/ 64 <", " >")),
            _ => None,
        }
    }
}

/// Marks where a piece of a value starts and what it was written as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Marker {
    pub(crate) offset: usize,
    pub(crate) kind: MarkerKind,
}

#[derive(Debug, Clone)]
pub(crate) struct PropertyData {
    pub(crate) name: String,
    pub(crate) value: Vec<u8>,
    pub(crate) labels: Vec<String>,
    pub(crate) offset_labels: IndexMap<String, usize>,
    /// Value labels in order of appearance, duplicates included.
    pub(crate) label_offsets: Vec<(String, usize)>,
    pub(crate) markers: Vec<Marker>,
}

impl PropertyData {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            value: Vec::new(),
            labels: Vec::new(),
            offset_labels: IndexMap::new(),
            label_offsets: Vec::new(),
            markers: Vec::new(),
        }
    }

    /// Records that a piece of kind `kind` starts at the current end of the
    /// value. Phandle references reserve four bytes for the phandle.
    pub(crate) fn add_marker(&mut self, kind: MarkerKind) {
        let phandle = matches!(kind, MarkerKind::RefPhandle(_));

        self.markers.push(Marker {
            offset: self.value.len(),
            kind,
        });
        if phandle {
            self.value.extend_from_slice(&[0; 4]);
        }
    }

    pub(crate) fn ty(&self) -> PropertyType {
        let kinds: Vec<DataKind> = self
            .markers
            .iter()
            .filter_map(|m| m.kind.data_kind())
            .collect();
        let all = |kind| kinds.iter().all(|k| *k == kind);
        let phandles = kinds.iter().filter(|k| **k == DataKind::Phandle).count();

        match kinds[..] {
            [] => PropertyType::Empty,
            [DataKind::Uint8] => PropertyType::Bytes,
            [DataKind::Uint32] if self.value.len() == 4 => PropertyType::Num,
            _ if all(DataKind::Uint32) => PropertyType::Nums,
            [DataKind::String] => PropertyType::String,
            _ if all(DataKind::String) => PropertyType::Strings,
            [DataKind::Path] => PropertyType::Path,
            [DataKind::Uint32, DataKind::Phandle] if self.value.len() == 4 => PropertyType::Phandle,
            _ if phandles > 0
                && kinds
                    .iter()
                    .all(|k| matches!(k, DataKind::Uint32 | DataKind::Phandle)) =>
            {
                if self.value.len() == 4 * phandles {
                    PropertyType::Phandles
                } else {
                    PropertyType::PhandlesAndNums
                }
            }
            _ => PropertyType::Compound,
        }
    }
}

/// A borrowed view of a property.
#[derive(Clone, Copy)]
pub struct Property<'dt> {
    node: Node<'dt>,
    data: &'dt PropertyData,
}

impl<'dt> Property<'dt> {
    pub(crate) fn new(node: Node<'dt>, data: &'dt PropertyData) -> Self {
        Self { node, data }
    }

    pub fn name(&self) -> &'dt str {
        &self.data.name
    }

    /// The node the property belongs to.
    pub fn node(&self) -> Node<'dt> {
        self.node
    }

    pub fn id(&self) -> PropertyId {
        PropertyId {
            node: self.node.id(),
            name: self.data.name.clone(),
        }
    }

    /// The raw value, with references already replaced by paths and
    /// phandles.
    pub fn value(&self) -> &'dt [u8] {
        &self.data.value
    }

    pub fn labels(&self) -> &'dt [String] {
        &self.data.labels
    }

    /// Labels inside the value, mapped to their byte offset into
    /// [`value`](Self::value).
    pub fn offset_labels(&self) -> &'dt IndexMap<String, usize> {
        &self.data.offset_labels
    }

    pub fn ty(&self) -> PropertyType {
        self.data.ty()
    }

    /// Returns the value of a `foo = <1>;` property.
    pub fn to_num(&self) -> Result<u32> {
        self.expect_type(&[PropertyType::Num], "'{} = < (number) >;'")?;
        Ok(be_u32(&self.data.value))
    }

    /// Like [`to_num`](Self::to_num), but interprets the value as signed.
    pub fn to_signed_num(&self) -> Result<i32> {
        self.to_num().map(|n| n as i32)
    }

    /// Returns the values of a `foo = <1 2 ...>;` property.
    pub fn to_nums(&self) -> Result<Vec<u32>> {
        self.expect_type(
            &[PropertyType::Num, PropertyType::Nums],
            "'{} = < (number) (number) ... >;'",
        )?;
        Ok(self.data.value.chunks(4).map(be_u32).collect())
    }

    pub fn to_signed_nums(&self) -> Result<Vec<i32>> {
        Ok(self.to_nums()?.into_iter().map(|n| n as i32).collect())
    }

    /// Returns the value of a `foo = [01 02 ...];` property.
    pub fn to_bytes(&self) -> Result<&'dt [u8]> {
        self.expect_type(&[PropertyType::Bytes], "'{} = [ (byte) (byte) ... ];'")?;
        Ok(&self.data.value)
    }

    /// Returns the value of a `foo = "bar";` property.
    pub fn to_str(&self) -> Result<&'dt str> {
        self.expect_type(&[PropertyType::String], "'{} = \"string\";'")?;
        self.utf8().map(|s| s.strip_suffix('\0').unwrap_or(s))
    }

    /// Returns the values of a `foo = "bar", "baz", ...;` property.
    pub fn to_strings(&self) -> Result<Vec<&'dt str>> {
        self.expect_type(
            &[PropertyType::String, PropertyType::Strings],
            "'{} = \"string\", \"string\", ... ;'",
        )?;

        let s = self.utf8()?;
        Ok(s.strip_suffix('\0').unwrap_or(s).split('\0').collect())
    }

    /// Returns the node a `foo = <&bar>;` property points to.
    pub fn to_node(&self) -> Result<Node<'dt>> {
        self.expect_type(&[PropertyType::Phandle], "'{} = < &foo >;'")?;
        self.phandle_node(be_u32(&self.data.value))
    }

    /// Returns the nodes a `foo = <&bar &baz ...>;` property points to. An
    /// empty `foo = < >;` gives no nodes.
    pub fn to_nodes(&self) -> Result<Vec<Node<'dt>>> {
        let ty = self.ty();
        if !(matches!(ty, PropertyType::Phandle | PropertyType::Phandles)
            || ty == PropertyType::Nums && self.data.value.is_empty())
        {
            return Err(self.type_error("'{} = < &foo &bar ... >;'"));
        }

        self.data
            .value
            .chunks(4)
            .map(|phandle| self.phandle_node(be_u32(phandle)))
            .collect()
    }

    /// Returns the node a `foo = &bar;` or `foo = "/path/to/bar";` property
    /// points to.
    pub fn to_path(&self) -> Result<Node<'dt>> {
        self.expect_type(
            &[PropertyType::Path, PropertyType::String],
            "either '{} = &foo' or '{} = \"/path/to/node\"'",
        )?;

        let s = self.utf8()?;
        let path = s.strip_suffix('\0').unwrap_or(s);
        self.node.tree().get_node(path).map_err(|_| {
            Error::msg(format!(
                "property '{}' on {} in {} points to the non-existent node \"{path}\"",
                self.name(),
                self.node.path(),
                self.node.tree().filename().display(),
            ))
        })
    }

    fn expect_type(&self, accepted: &[PropertyType], example: &str) -> Result<()> {
        if accepted.contains(&self.ty()) {
            Ok(())
        } else {
            Err(self.type_error(example))
        }
    }

    /// `example` is the expected syntax, with `{}` standing for the name.
    fn type_error(&self, example: &str) -> Error {
        Error::msg(format!(
            "expected property '{}' on {} in {} to be assigned with {}, not '{self}'",
            self.name(),
            self.node.path(),
            self.node.tree().filename().display(),
            example.replace("{}", self.name()),
        ))
    }

    fn utf8(&self) -> Result<&'dt str> {
        std::str::from_utf8(&self.data.value).map_err(|_| {
            Error::msg(format!(
                "value of property '{}' ({}) on {} in {} is not valid UTF-8",
                self.name(),
                bytes_repr(&self.data.value),
                self.node.path(),
                self.node.tree().filename().display(),
            ))
        })
    }

    fn phandle_node(&self, phandle: u32) -> Result<Node<'dt>> {
        let dt = self.node.tree();
        match dt.phandle2node().get(&phandle) {
            Some(&id) => Ok(dt.node(id)),
            None => Err(Error::msg(format!(
                "property '{}' on {} in {} refers to the unknown phandle {phandle:#x}",
                self.name(),
                self.node.path(),
                dt.filename().display(),
            ))),
        }
    }
}

impl fmt::Display for Property<'_> {
    /// Writes the property as DTS, e.g. `lbl: foo = < 0x1 &bar >, "baz";`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data;

        for label in &data.labels {
            write!(f, "{label}: ")?;
        }
        f.write_str(&data.name)?;

        if data.markers.is_empty() {
            return f.write_str(";");
        }
        f.write_str(" =")?;

        let value = &data.value[..];
        // Element size and closing bracket of the array being written
        let mut open: Option<(usize, &str)> = None;
        let mut first = true;

        for (i, marker) in data.markers.iter().enumerate() {
            let end = data.markers.get(i + 1).map_or(value.len(), |m| m.offset);
            let mut pos = marker.offset;

            match &marker.kind {
                MarkerKind::RefLabel(label) => write!(f, " {label}:")?,
                MarkerKind::RefPhandle(reference) => {
                    write!(f, " &{reference}")?;
                    pos += 4;
                }
                kind => {
                    if let Some((_, close)) = open.take() {
                        f.write_str(close)?;
                    }
                    if !first {
                        f.write_str(",")?;
                    }
                    first = false;

                    match kind {
                        MarkerKind::String => {
                            let s = &value[pos..end.max(pos + 1) - 1];
                            write!(f, " \"{}\"", escape(s))?;
                            continue;
                        }
                        MarkerKind::RefPath(reference) => {
                            write!(f, " &{reference}")?;
                            continue;
                        }
                        _ => {}
                    }

                    if let Some((size, bracket, close)) = kind.array() {
                        f.write_str(bracket)?;
                        open = Some((size, close));
                    }
                }
            }

            if let Some((size, close)) = open {
                let bytes = close == " ]";
                for elem in value[pos.min(end)..end].chunks(size) {
                    if bytes {
                        write!(f, " {:02X}", elem[0])?;
                    } else {
                        write!(f, " {:#x}", be_uint(elem))?;
                    }
                }
            }
        }

        if let Some((_, close)) = open {
            f.write_str(close)?;
        }
        f.write_str(";")
    }
}

impl fmt::Debug for Property<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Property '{}' at '{}' in '{}'>",
            self.name(),
            self.node.path(),
            self.node.tree().filename().display()
        )
    }
}

/// Escapes `s` for use inside a DTS string literal. Bytes that are not valid
/// UTF-8 become `\xNN`.
pub(crate) fn escape(s: &[u8]) -> String {
    let mut out = String::with_capacity(s.len());

    for chunk in s.utf8_chunks() {
        for c in chunk.valid().chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\x07' => out.push_str("\\a"),
                '\x08' => out.push_str("\\b"),
                '\t' => out.push_str("\\t"),
                '\n' => out.push_str("\\n"),
                '\x0b' => out.push_str("\\v"),
                '\x0c' => out.push_str("\\f"),
                '\r' => out.push_str("\\r"),
                c => out.push(c),
            }
        }
        for b in chunk.invalid() {
            let _ = write!(out, "\\x{b:02x}");
        }
    }

    out
}

/// Formats `bytes` the way it is shown in error messages, e.g. `b'ab\x00'`.
pub(crate) fn bytes_repr(bytes: &[u8]) -> String {
    let mut out = String::from("b'");
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(char::from(b)),
            _ => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push('\'');
    out
}

/// Big-endian decoding of up to eight bytes.
pub(crate) fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0, |acc, &b| (acc << 8) | u64::from(b))
}

fn be_u32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0, |acc, &b| (acc << 8) | u32::from(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::from_str;

    fn dts(props: &str) -> String {
        format!("/dts-v1/;\n/ {{\n\tn: node {{ }};\n{props}\n}};")
    }

    #[test]
    fn types() {
        for (prop, exp) in [
            ("a;", PropertyType::Empty),
            ("a = [];", PropertyType::Bytes),
            ("a = [01 02];", PropertyType::Bytes),
            ("a = /bits/ 8 <1 2>;", PropertyType::Bytes),
            ("a = [01], [02];", PropertyType::Compound),
            ("a = <1>;", PropertyType::Num),
            ("a = <>;", PropertyType::Nums),
            ("a = <1 2>;", PropertyType::Nums),
            ("a = <1>, <2>;", PropertyType::Nums),
            ("a = \"s\";", PropertyType::String),
            ("a = \"s\", \"t\";", PropertyType::Strings),
            ("a = &n;", PropertyType::Path),
            ("a = <&n>;", PropertyType::Phandle),
            ("a = <&n &n>;", PropertyType::Phandles),
            ("a = <&n>, <&n>;", PropertyType::Phandles),
            ("a = <&n 1>;", PropertyType::PhandlesAndNums),
            ("a = <1 &n>;", PropertyType::PhandlesAndNums),
            ("a = /bits/ 16 <1>;", PropertyType::Compound),
            ("a = /bits/ 64 <1>;", PropertyType::Compound),
            ("a = <1>, \"s\";", PropertyType::Compound),
            ("a = &n, &n;", PropertyType::Compound),
            ("a = l1: <1> l2:;", PropertyType::Num),
        ] {
            let dt = from_str(&dts(prop)).unwrap();
            assert_eq!(exp, dt.root().prop("a").unwrap().ty(), "{prop}");
        }
    }

    #[test]
    fn accessors() {
        let dt = from_str(&dts(concat!(
            "num = <0xfffffffe>;\n",
            "nums = <1 2>, <3>;\n",
            "bytes = [de ad];\n",
            "str = \"hello\";\n",
            "strs = \"a\", \"\", \"b\";\n",
            "path = &n;\n",
            "strpath = \"/node\";\n",
            "ph = <&n>;\n",
            "phs = <&n &n>;\n",
            "empty = < >;\n",
        )))
        .unwrap();
        let root = dt.root();
        let prop = |name| root.prop(name).unwrap();
        let node = dt.get_node("/node").unwrap();

        assert_eq!(0xffff_fffe, prop("num").to_num().unwrap());
        assert_eq!(-2, prop("num").to_signed_num().unwrap());
        assert_eq!(vec![0xffff_fffe], prop("num").to_nums().unwrap());
        assert_eq!(vec![1, 2, 3], prop("nums").to_nums().unwrap());
        assert_eq!(&[0xde, 0xad], prop("bytes").to_bytes().unwrap());
        assert_eq!("hello", prop("str").to_str().unwrap());
        assert_eq!(vec!["hello"], prop("str").to_strings().unwrap());
        assert_eq!(vec!["a", "", "b"], prop("strs").to_strings().unwrap());
        assert_eq!(node, prop("path").to_path().unwrap());
        assert_eq!(node, prop("strpath").to_path().unwrap());
        assert_eq!(node, prop("ph").to_node().unwrap());
        assert_eq!(vec![node, node], prop("phs").to_nodes().unwrap());
        assert_eq!(vec![node], prop("ph").to_nodes().unwrap());
        assert!(prop("empty").to_nodes().unwrap().is_empty());
    }

    #[test]
    fn accessor_errors() {
        let dt = from_str(&dts(concat!(
            "str = \"hello\";\n",
            "num = <1>;\n",
            "bad = [ff 00];\n",
            "nowhere = \"/nope\";\n",
            "bytes = [ff];\n",
        )))
        .unwrap();
        let root = dt.root();
        let prop = |name| root.prop(name).unwrap();

        assert_eq!(
            "expected property 'str' on / in <string> to be assigned with \
             'str = < (number) >;', not 'str = \"hello\";'",
            prop("str").to_num().unwrap_err().to_string()
        );
        assert_eq!(
            "expected property 'num' on / in <string> to be assigned with \
             'num = \"string\", \"string\", ... ;', not 'num = < 0x1 >;'",
            prop("num").to_strings().unwrap_err().to_string()
        );
        assert_eq!(
            "expected property 'num' on / in <string> to be assigned with \
             either 'num = &foo' or 'num = \"/path/to/node\"', not 'num = < 0x1 >;'",
            prop("num").to_path().unwrap_err().to_string()
        );
        assert_eq!(
            "expected property 'str' on / in <string> to be assigned with \
             'str = < &foo &bar ... >;', not 'str = \"hello\";'",
            prop("str").to_nodes().unwrap_err().to_string()
        );
        assert_eq!(
            "property 'nowhere' on / in <string> points to the non-existent node \"/nope\"",
            prop("nowhere").to_path().unwrap_err().to_string()
        );
        assert!(prop("bytes").to_str().is_err());
        assert!(prop("num").to_bytes().is_err());
    }

    #[test]
    fn invalid_utf8() {
        let dt = from_str(&dts("s = \"\\xff\";")).unwrap();

        assert_eq!(
            "value of property 's' (b'\\xff\\x00') on / in <string> is not valid UTF-8",
            dt.root().prop("s").unwrap().to_str().unwrap_err().to_string()
        );
    }

    #[test]
    fn rendering() {
        for (input, exp) in [
            ("a;", "a;"),
            ("a = <1 0x20>;", "a = < 0x1 0x20 >;"),
            ("a = [0a ff];", "a = [ 0A FF ];"),
            ("a = [];", "a = [ ];"),
            ("a = < >;", "a = < >;"),
            ("a = /bits/ 8 <10 255>;", "a = /bits/ 8 < 0xa 0xff >;"),
            ("a = /bits/ 16 <1>;", "a = /bits/ 16 < 0x1 >;"),
            ("a = /bits/ 64 <(-1)>;", "a = /bits/ 64 < 0xffffffffffffffff >;"),
            ("a = \"x\", \"y\";", "a = \"x\", \"y\";"),
            ("a = \"tab\\there \\\"q\\\" \\\\\";", "a = \"tab\\there \\\"q\\\" \\\\\";"),
            ("a = \"\\xff\\x7f\";", "a = \"\\xff\x7f\";"),
            ("a = &n;", "a = &n;"),
            ("a = <&n 2>, &n;", "a = < &n 0x2 >, &n;"),
            ("a = <&{/node}>;", "a = < &{/node} >;"),
            ("a = l1: <1 l2: 2> l3:, \"s\";", "a = l1: < 0x1 l2: 0x2 l3: >, \"s\";"),
            ("l: a = <1>;", "l: a = < 0x1 >;"),
            ("a = <1>, [02], \"s\";", "a = < 0x1 >, [ 02 ], \"s\";"),
        ] {
            let dt = from_str(&dts(input)).unwrap();
            assert_eq!(exp, dt.root().prop("a").unwrap().to_string(), "{input}");
        }
    }

    #[test]
    fn escapes() {
        assert_eq!(r#"\a\b\t\n\v\f\r\\\""#, escape(b"\x07\x08\t\n\x0b\x0c\r\\\""));
        assert_eq!(r"ok\xfe\xff", escape(b"ok\xfe\xff"));
        assert_eq!("ünï", escape("ünï".as_bytes()));
    }
}
