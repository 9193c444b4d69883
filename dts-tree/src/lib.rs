//! Parser and object model for devicetree source (`.dts`) files.
//!
//! A file is parsed into a [`DeviceTree`], which can be queried, modified and
//! written back out as DTS through its `Display` implementation:
//!
//! ```no_run
//! use dts_tree::DeviceTree;
//!
//! let dt = DeviceTree::parse_file("board.dts", ["include"])?;
//!
//! let uart = dt.get_node("serial0")?;
//! let reg = uart.prop("reg").map(|p| p.to_nums()).transpose()?;
//! println!("{} at {:?}", uart.path(), reg);
//!
//! print!("{dt}");
//! # Ok::<(), dts_tree::Error>(())
//! ```
//!
//! Besides the usual syntax, `/include/`, `/incbin/`, `/delete-node/`,
//! `/delete-property/`, `/omit-if-no-ref/` and `#line` directives are
//! handled. References to nodes are resolved after parsing, allocating
//! phandles for nodes that need one.

mod error;
mod expr;
mod fixup;
mod lexer;
mod options;
mod parser;
mod property;
mod tree;


pub use error::{Error, Result};
pub use options::ParseOptions;
pub use property::{Property, PropertyId, PropertyType};
pub use tree::{DeviceTree, MemReserve, Node, NodeId, NodeIter};

use error::bail;
use property::{be_uint, bytes_repr};

/// Parse a devicetree from a string.
///
/// Errors refer to the source as `<string>`, and relative includes are looked
/// up in the current directory.
pub fn from_str(s: &str) -> Result<DeviceTree> {
    ParseOptions::new().parse_str("<string>", s)
}

/// Decodes `data` as a big-endian unsigned number.
///
/// If `length` is given, `data` must be exactly that many bytes long.
pub fn to_num(data: &[u8], length: Option<usize>) -> Result<u64> {
    if let Some(length) = length {
        check_length(length)?;
        if data.len() != length {
            bail!(
                "{} is {} bytes long, expected {length}",
                bytes_repr(data),
                data.len()
            );
        }
    }
    check_width(data)?;

    Ok(be_uint(data))
}

/// Like [`to_num`], but interprets `data` as two's complement.
pub fn to_signed_num(data: &[u8], length: Option<usize>) -> Result<i64> {
    let n = to_num(data, length)?;
    Ok(sign_extend(n, data.len()))
}

/// Decodes `data` as consecutive big-endian unsigned numbers, each `length`
/// bytes long.
pub fn to_nums(data: &[u8], length: usize) -> Result<Vec<u64>> {
    check_length(length)?;
    if data.len() % length != 0 {
        bail!(
            "{} is {} bytes long, expected a length that's a multiple of {length}",
            bytes_repr(data),
            data.len()
        );
    }

    data.chunks(length).map(|chunk| to_num(chunk, None)).collect()
}

/// Like [`to_nums`], but interprets each number as two's complement.
pub fn to_signed_nums(data: &[u8], length: usize) -> Result<Vec<i64>> {
    Ok(to_nums(data, length)?
        .into_iter()
        .map(|n| sign_extend(n, length))
        .collect())
}

fn check_length(length: usize) -> Result<()> {
    if length < 1 {
        bail!("'length' must be greater than zero, was {length}");
    }
    Ok(())
}

fn check_width(data: &[u8]) -> Result<()> {
    if data.len() > 8 {
        bail!(
            "{} is {} bytes long, which does not fit in 64 bits",
            bytes_repr(data),
            data.len()
        );
    }
    Ok(())
}

fn sign_extend(n: u64, len: usize) -> i64 {
    match len {
        0 => 0,
        1..=7 => {
            let shift = 64 - 8 * len as u32;
            ((n << shift) as i64) >> shift
        }
        _ => n as i64,
    }
}

#[cfg(test)]
mod helper_tests {
    use super::*;

    #[test]
    fn numbers() {
        assert_eq!(0x1234, to_num(&[0x12, 0x34], None).unwrap());
        assert_eq!(0x1234, to_num(&[0x12, 0x34], Some(2)).unwrap());
        assert_eq!(-2, to_signed_num(&[0xff, 0xfe], None).unwrap());
        assert_eq!(-1, to_signed_num(&[0xff; 8], Some(8)).unwrap());
        assert_eq!(0, to_num(&[], None).unwrap());

        assert_eq!(vec![1, 2], to_nums(&[0, 0, 0, 1, 0, 0, 0, 2], 4).unwrap());
        assert_eq!(vec![-1, 1], to_signed_nums(&[0xff, 0x01], 1).unwrap());
    }

    #[test]
    fn number_errors() {
        assert_eq!(
            "b'\\x01\\x02' is 2 bytes long, expected 4",
            to_num(&[1, 2], Some(4)).unwrap_err().to_string()
        );
        assert_eq!(
            "'length' must be greater than zero, was 0",
            to_num(&[1, 2], Some(0)).unwrap_err().to_string()
        );
        assert_eq!(
            "b'\\x01\\x02\\x03' is 3 bytes long, expected a length that's a multiple of 2",
            to_nums(&[1, 2, 3], 2).unwrap_err().to_string()
        );
        assert!(to_num(&[0; 9], None).is_err());
    }
}
