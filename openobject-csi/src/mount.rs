//! Mount table inspection for publish/unpublish idempotency.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

const DEFAULT_MOUNTS_FILE: &str = "/proc/self/mounts";
const TARGET_DIR_MODE: u32 = 0o750;

#[async_trait]
pub trait MountTable: Send + Sync {
    /// Whether `path` is currently a mount point.
    async fn is_mount_point(&self, path: &Path) -> io::Result<bool>;

    /// Create `path` if it is missing, then report whether it is already
    /// a mount point.
    async fn prepare_target(&self, path: &Path) -> io::Result<bool> {
        if tokio::fs::try_exists(path).await? {
            return self.is_mount_point(path).await;
        }
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true).mode(TARGET_DIR_MODE);
        builder.create(path).await?;
        Ok(false)
    }
}

/// Reads the kernel mount table.
#[derive(Debug, Clone)]
pub struct ProcMounts {
    mounts_file: PathBuf,
}

impl Default for ProcMounts {
    fn default() -> Self {
        Self::new(DEFAULT_MOUNTS_FILE)
    }
}

impl ProcMounts {
    pub fn new(mounts_file: impl Into<PathBuf>) -> Self {
        Self {
            mounts_file: mounts_file.into(),
        }
    }
}

#[async_trait]
impl MountTable for ProcMounts {
    async fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
        let contents = tokio::fs::read_to_string(&self.mounts_file).await?;
        let wanted = path.to_string_lossy();
        let wanted = wanted.trim_end_matches('/');
        // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>
        Ok(contents.lines().any(|line| {
            line.split_whitespace()
                .nth(1)
                .is_some_and(|mount_point| unescape_octal(mount_point) == wanted)
        }))
    }
}

/// Apply the kernel's mount table escapes to `field`, the inverse of
/// [`unescape_octal`].
pub(crate) fn escape_octal(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\134"),
            ' ' => out.push_str("\\040"),
            '\t' => out.push_str("\\011"),
            '\n' => out.push_str("\\012"),
            c => out.push(c),
        }
    }
    out
}

/// Undo the `\040`-style escapes the kernel applies to whitespace and
/// backslashes in mount table fields.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            out.push(value as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
