//! In-process isolation boundary around a decoding backend
//!
//! [`Sandbox`] forwards every [`TiffApi`] call to the backend it owns, but
//! only lets the backend open files its [`SandboxPolicy`] allows, and turns a
//! backend panic into a [`TransportError`] instead of unwinding into the
//! caller. After a panic the backend state is not trusted again and every
//! later call fails with [`TransportError::Terminated`].

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Component, Path, PathBuf};

use log::{trace, warn};

use crate::api::{Handle, TiffApi, TransportError};

/// Files and directories a sandboxed backend may open
#[derive(Debug, Clone, Default)]
pub struct SandboxPolicy {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl SandboxPolicy {
    /// A policy that allows nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy for a sandbox constructed around a single file
    pub fn for_file(path: impl Into<PathBuf>) -> Self {
        Self::new().allow_file(path)
    }

    /// Allow opening exactly this file
    pub fn allow_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Allow opening any file below this directory
    pub fn allow_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.dirs.push(path.into());
        self
    }

    /// Returns true if `path` may be opened.
    ///
    /// Only absolute paths without `..` components are considered, since
    /// prefix matching cannot tell where those end up.
    pub fn permits(&self, path: &Path) -> bool {
        if !path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
            return false;
        }
        self.files.iter().any(|f| f == path) || self.dirs.iter().any(|d| path.starts_with(d))
    }
}

/// Isolation boundary owning a backend
#[derive(Debug)]
pub struct Sandbox<B> {
    backend: B,
    policy: SandboxPolicy,
    terminated: bool,
}

impl<B: TiffApi> Sandbox<B> {
    pub fn new(backend: B, policy: SandboxPolicy) -> Self {
        Self {
            backend,
            policy,
            terminated: false,
        }
    }

    /// Returns true once a backend call has panicked
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Tear down the boundary and hand back the backend
    pub fn into_inner(self) -> B {
        self.backend
    }

    /// Run one proxied call with panic containment
    fn call<T>(
        &mut self,
        name: &'static str,
        f: impl FnOnce(&mut B) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        if self.terminated {
            return Err(TransportError::Terminated);
        }
        trace!("sandbox call: {name}");
        let backend = &mut self.backend;
        match catch_unwind(AssertUnwindSafe(|| f(backend))) {
            Ok(result) => result,
            Err(payload) => {
                self.terminated = true;
                let message = panic_message(payload.as_ref());
                warn!("backend panicked in {name}: {message}");
                Err(TransportError::BackendPanicked {
                    call: name,
                    message,
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<B: TiffApi> TiffApi for Sandbox<B> {
    fn open(&mut self, path: &Path, mode: &str) -> Result<Handle, TransportError> {
        if !self.policy.permits(path) {
            return Err(TransportError::PathDenied(path.to_path_buf()));
        }
        self.call("open", |b| b.open(path, mode))
    }

    fn close(&mut self, handle: Handle) -> Result<bool, TransportError> {
        self.call("close", |b| b.close(handle))
    }

    fn get_field_pair(
        &mut self,
        handle: Handle,
        tag: u32,
    ) -> Result<Option<(u16, u16)>, TransportError> {
        self.call("get_field_pair", |b| b.get_field_pair(handle, tag))
    }

    fn tile_size(&mut self, handle: Handle) -> Result<i64, TransportError> {
        self.call("tile_size", |b| b.tile_size(handle))
    }

    fn set_field_u32(
        &mut self,
        handle: Handle,
        tag: u32,
        value: u32,
    ) -> Result<bool, TransportError> {
        self.call("set_field_u32", |b| b.set_field_u32(handle, tag, value))
    }

    fn read_encoded_tile(
        &mut self,
        handle: Handle,
        tile: u32,
        buf: &mut [u8],
    ) -> Result<i64, TransportError> {
        self.call("read_encoded_tile", |b| b.read_encoded_tile(handle, tile, buf))
    }

    fn read_rgba_tile(
        &mut self,
        handle: Handle,
        x: u32,
        y: u32,
        buf: &mut [u32],
    ) -> Result<bool, TransportError> {
        self.call("read_rgba_tile", |b| b.read_rgba_tile(handle, x, y, buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend that opens anything and panics on tile size queries
    struct Fragile {
        opened: Vec<PathBuf>,
    }

    impl TiffApi for Fragile {
        fn open(&mut self, path: &Path, _mode: &str) -> Result<Handle, TransportError> {
            self.opened.push(path.to_path_buf());
            Ok(Handle(self.opened.len() as u64))
        }
        fn close(&mut self, _handle: Handle) -> Result<bool, TransportError> {
            Ok(true)
        }
        fn get_field_pair(
            &mut self,
            _handle: Handle,
            _tag: u32,
        ) -> Result<Option<(u16, u16)>, TransportError> {
            Ok(Some((2, 2)))
        }
        fn tile_size(&mut self, _handle: Handle) -> Result<i64, TransportError> {
            panic!("corrupt codec state");
        }
        fn set_field_u32(
            &mut self,
            _handle: Handle,
            _tag: u32,
            _value: u32,
        ) -> Result<bool, TransportError> {
            Ok(true)
        }
        fn read_encoded_tile(
            &mut self,
            _handle: Handle,
            _tile: u32,
            _buf: &mut [u8],
        ) -> Result<i64, TransportError> {
            Ok(-1)
        }
        fn read_rgba_tile(
            &mut self,
            _handle: Handle,
            _x: u32,
            _y: u32,
            _buf: &mut [u32],
        ) -> Result<bool, TransportError> {
            Ok(false)
        }
    }

    fn sandbox(policy: SandboxPolicy) -> Sandbox<Fragile> {
        Sandbox::new(Fragile { opened: Vec::new() }, policy)
    }

    #[test]
    fn test_policy_file_and_dir() {
        let policy = SandboxPolicy::for_file("/img/a.tiff").allow_dir("/data");
        assert!(policy.permits(Path::new("/img/a.tiff")));
        assert!(!policy.permits(Path::new("/img/b.tiff")));
        assert!(policy.permits(Path::new("/data/deep/c.tiff")));
        assert!(!policy.permits(Path::new("/database/c.tiff")));
        assert!(!SandboxPolicy::new().permits(Path::new("/img/a.tiff")));
    }

    #[test]
    fn test_policy_rejects_parent_components() {
        let policy = SandboxPolicy::new().allow_dir("/project");
        assert!(!policy.permits(Path::new("/project/../etc/passwd")));
        assert!(!policy.permits(Path::new("/project/test/../../etc/passwd")));
        assert!(policy.permits(Path::new("/project/test/images/a.tiff")));

        let policy = SandboxPolicy::for_file("/img/../img/a.tiff");
        assert!(!policy.permits(Path::new("/img/../img/a.tiff")));
    }

    #[test]
    fn test_policy_rejects_relative_paths() {
        let policy = SandboxPolicy::new()
            .allow_dir("project")
            .allow_file("a.tiff");
        assert!(!policy.permits(Path::new("project/x.tiff")));
        assert!(!policy.permits(Path::new("a.tiff")));
        assert!(!policy.permits(Path::new("./a.tiff")));
    }

    #[test]
    fn test_traversal_never_reaches_backend() {
        let mut sb = sandbox(SandboxPolicy::new().allow_dir("/project"));
        let path = Path::new("/project/../etc/passwd");
        assert_eq!(
            sb.open(path, "r"),
            Err(TransportError::PathDenied(path.to_path_buf()))
        );
        assert!(!sb.is_terminated());
        assert!(sb.into_inner().opened.is_empty());
    }

    #[test]
    fn test_denied_open_never_reaches_backend() {
        let mut sb = sandbox(SandboxPolicy::for_file("/img/a.tiff"));
        let err = sb.open(Path::new("/etc/passwd"), "r").unwrap_err();
        assert_eq!(err, TransportError::PathDenied(PathBuf::from("/etc/passwd")));
        assert!(sb.into_inner().opened.is_empty());
    }

    #[test]
    fn test_panic_becomes_transport_error_and_terminates() {
        let mut sb = sandbox(SandboxPolicy::for_file("/img/a.tiff"));
        let h = sb.open(Path::new("/img/a.tiff"), "r").unwrap();
        assert_eq!(h, Handle(1));

        let err = sb.tile_size(h).unwrap_err();
        assert_eq!(
            err,
            TransportError::BackendPanicked {
                call: "tile_size",
                message: "corrupt codec state".to_string(),
            }
        );
        assert!(sb.is_terminated());
        assert_eq!(sb.close(h), Err(TransportError::Terminated));
    }
}
