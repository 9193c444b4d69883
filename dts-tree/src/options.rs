use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use log::info;

use crate::{
    error::{Error, Result},
    parser::Parser,
    tree::DeviceTree,
};

/// Settings for parsing devicetree source.
///
/// ```no_run
/// use dts_tree::ParseOptions;
///
/// let dt = ParseOptions::new()
///     .include_dir("include")
///     .force(true)
///     .parse_file("board.dts")?;
/// # Ok::<(), dts_tree::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub(crate) include_path: Vec<PathBuf>,
    pub(crate) force: bool,
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the directories searched for `/include/` and `/incbin/`
    /// files. They are tried in order, after the directory of the including
    /// file.
    pub fn include_path<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.include_path = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// Appends a directory to the include path.
    pub fn include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_path.push(dir.into());
        self
    }

    /// Skips `/aliases` properties that cannot be resolved instead of failing.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Parses the file at `path`. A path of `-` reads standard input.
    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<DeviceTree> {
        let path = path.as_ref();

        let contents = if path == Path::new("-") {
            let mut contents = Vec::new();
            io::stdin()
                .lock()
                .read_to_end(&mut contents)
                .map(|_| contents)
        } else {
            fs::read(path)
        }
        .map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        info!("parsing {}", path.display());
        Parser::new(self, path.to_path_buf(), contents).parse()
    }

    /// Parses `source`, reporting errors against `name`. Relative includes
    /// are looked up next to `name`.
    pub fn parse_str(&self, name: impl AsRef<Path>, source: &str) -> Result<DeviceTree> {
        Parser::new(self, name.as_ref().to_path_buf(), source.as_bytes().to_vec()).parse()
    }
}
