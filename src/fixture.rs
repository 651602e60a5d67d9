//! Fixture store
//!
//! A read-only directory of files that requests are resolved against, plus
//! the `keys/` subdirectory holding the TLS material for both ends of a
//! scenario.
//!
//! `..` components are folded lexically; a path whose `..` climbs above the
//! root is rejected before the filesystem is consulted.

use crate::http::tls::{TlsConfig, TlsError};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Subdirectory of the fixture root holding TLS material
pub const KEYS_DIR: &str = "keys";

pub const SERVER_KEY_FILE: &str = "server-key.pem";
pub const SERVER_CERT_FILE: &str = "server-cert.pem";
pub const CA_CERT_FILE: &str = "ca-cert.pem";

/// Why a request path has no file to serve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReason {
    /// Nothing exists at the path
    Absent,
    /// The path names a directory
    Directory,
    /// The path exists but is neither a file nor a directory
    NotRegular,
    /// The path tries to leave the fixture root
    Rejected,
}

/// Result of resolving a request path against the store
#[derive(Debug)]
pub enum Lookup {
    /// A regular file, with its size at lookup time
    Found { path: PathBuf, len: u64 },
    Missing(MissingReason),
    /// The status check itself failed for a reason other than absence
    Failed(io::Error),
}

impl Lookup {
    /// HTTP status to answer with
    ///
    /// Filesystem failures count as "not found" unless `strict` is set, in
    /// which case they are internal errors.
    pub fn status(&self, strict: bool) -> u16 {
        match self {
            Lookup::Found { .. } => 200,
            Lookup::Missing(_) => 404,
            Lookup::Failed(_) if strict => 500,
            Lookup::Failed(_) => 404,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found { .. })
    }
}

/// Read-only fixture directory
#[derive(Debug, Clone)]
pub struct FixtureStore {
    root: PathBuf,
    strip_query: bool,
}

impl FixtureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FixtureStore {
            root: root.into(),
            strip_query: false,
        }
    }

    /// Drop a `?query` suffix before resolving
    ///
    /// Off by default: `/a.js?v=2` then names a file called `a.js?v=2`.
    pub fn strip_query(mut self, strip: bool) -> Self {
        self.strip_query = strip;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.root.join(KEYS_DIR)
    }

    /// Map a request path (`:path` pseudo-header) to a location under the root
    ///
    /// The leading `/` is stripped and `.`/`..` are folded without touching
    /// the filesystem, so `/nested/../a.js` is `a.js`. Returns `None` when a
    /// `..` would climb above the root.
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let path = if self.strip_query {
            request_path
                .split_once('?')
                .map_or(request_path, |(path, _)| path)
        } else {
            request_path
        };
        let relative = path.trim_start_matches('/');

        let mut parts = Vec::new();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    parts.pop()?;
                }
                Component::RootDir | Component::Prefix(_) => return None,
            }
        }

        let mut resolved = self.root.clone();
        resolved.extend(parts);
        Some(resolved)
    }

    /// Resolve a request path and check what is there
    pub fn lookup(&self, request_path: &str) -> Lookup {
        let Some(path) = self.resolve(request_path) else {
            return Lookup::Missing(MissingReason::Rejected);
        };

        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Lookup::Found {
                path,
                len: meta.len(),
            },
            Ok(meta) if meta.is_dir() => Lookup::Missing(MissingReason::Directory),
            Ok(_) => Lookup::Missing(MissingReason::NotRegular),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Lookup::Missing(MissingReason::Absent)
            }
            Err(e) => Lookup::Failed(e),
        }
    }

    /// Read a fixture file's full contents
    pub fn read(&self, request_path: &str) -> io::Result<Vec<u8>> {
        match self.lookup(request_path) {
            Lookup::Found { path, .. } => fs::read(path),
            Lookup::Failed(e) => Err(e),
            Lookup::Missing(reason) => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: {:?}", request_path, reason),
            )),
        }
    }

    /// Load the TLS material from `keys/` under the default file names
    pub fn tls_materials(&self) -> Result<TlsMaterials, TlsError> {
        TlsMaterials::load(
            self.keys_dir(),
            SERVER_KEY_FILE,
            SERVER_CERT_FILE,
            CA_CERT_FILE,
        )
    }
}

/// Server key, server certificate and CA certificate, as raw PEM bytes
#[derive(Clone)]
pub struct TlsMaterials {
    pub key: Vec<u8>,
    pub cert: Vec<u8>,
    pub ca: Vec<u8>,
}

impl TlsMaterials {
    pub fn load(
        dir: impl AsRef<Path>,
        key: &str,
        cert: &str,
        ca: &str,
    ) -> Result<Self, TlsError> {
        let dir = dir.as_ref();
        let read = |name: &str| {
            fs::read(dir.join(name)).map_err(|e| {
                TlsError::Certificate(format!("{}: {}", dir.join(name).display(), e))
            })
        };

        Ok(TlsMaterials {
            key: read(key)?,
            cert: read(cert)?,
            ca: read(ca)?,
        })
    }

    /// Server-side configuration offering `h2` only
    pub fn server_config(&self) -> Result<TlsConfig, TlsError> {
        TlsConfig::server()?
            .identity_pem(&self.cert, &self.key)?
            .alpn(&["h2"])?
            .build()
    }

    /// Client-side configuration trusting the CA and expecting `servername`
    pub fn client_config(&self, servername: &str) -> Result<TlsConfig, TlsError> {
        TlsConfig::client()?
            .ca_pem(&self.ca)?
            .servername(servername)
            .alpn(&["h2"])?
            .build()
    }
}

impl std::fmt::Debug for TlsMaterials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterials")
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .field("cert", &format_args!("<{} bytes>", self.cert.len()))
            .field("ca", &format_args!("<{} bytes>", self.ca.len()))
            .finish()
    }
}
