//! Extensions applied to every connection opened through a registry.

use std::path::Path;

use crate::config::OpenOptions;
use crate::connection::Connection;
use crate::error::DbResult;

type Extension = Box<dyn Fn(&Connection) -> DbResult<()> + Send + Sync>;

/// An ordered list of extension entry points.
///
/// Every connection opened with [`open`](Self::open) runs each entry in
/// registration order before it is returned. Entries are owned by the
/// registry and dropped once, on [`clear`](Self::clear) or when the registry
/// is dropped.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Extension>,
}

impl ExtensionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry point, typically one that registers functions,
    /// collations or modules.
    pub fn register<F>(&mut self, extension: F)
    where
        F: Fn(&Connection) -> DbResult<()> + Send + Sync + 'static,
    {
        self.extensions.push(Box::new(extension));
    }

    /// Opens a connection and applies every extension to it.
    ///
    /// The first failing extension aborts the open; the connection is
    /// closed and its error returned.
    pub fn open(&self, path: impl AsRef<Path>, options: &OpenOptions) -> DbResult<Connection> {
        let conn = Connection::open_with(path, options)?;
        self.apply(&conn)?;
        Ok(conn)
    }

    /// Applies every extension to an already open connection.
    pub fn apply(&self, conn: &Connection) -> DbResult<()> {
        for extension in &self.extensions {
            extension(conn)?;
        }
        tracing::debug!(count = self.extensions.len(), "applied extensions");
        Ok(())
    }

    /// Drops every registered extension.
    pub fn clear(&mut self) {
        self.extensions.clear();
    }

    /// Number of registered extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("len", &self.extensions.len())
            .finish()
    }
}
