//! s3fs mounts issued through the connector.
//!
//! Every command built here runs on the host through the [`Bridge`]. Paths
//! in command text are host paths. The plugin itself reaches the host
//! filesystem through `host_root`.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use openobject_connector::Bridge;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::mount::escape_octal;
use crate::records::validate_volume_id;

/// Filesystem type s3fs mounts show up as in the mount table.
pub const S3FS_FSTYPE: &str = "fuse.s3fs";
/// Host file listing active mounts.
const MOUNTS_FILE: &str = "/proc/mounts";
const PASSWD_DIR: &str = "passwd";
const PASSWD_MODE: u32 = 0o600;

/// Quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Parameters for a single s3fs mount.
#[derive(Debug, Clone)]
pub struct S3fsMount<'a> {
    pub volume_id: &'a str,
    pub bucket: &'a str,
    pub unit: &'a str,
    pub endpoint: &'a str,
    pub target: &'a Path,
    pub readonly: bool,
    pub flags: &'a [String],
}

pub struct Mounter {
    bridge: Arc<dyn Bridge>,
    host_root: PathBuf,
    config_dir: PathBuf,
}

impl Mounter {
    pub fn new(bridge: Arc<dyn Bridge>, host_root: PathBuf, config_dir: PathBuf) -> Self {
        Self {
            bridge,
            host_root,
            config_dir,
        }
    }

    /// Password file location as seen from the host.
    pub fn passwd_path(&self, volume_id: &str) -> PathBuf {
        self.config_dir.join(PASSWD_DIR).join(volume_id)
    }

    /// Password file location as seen from this process.
    fn local_passwd_path(&self, volume_id: &str) -> PathBuf {
        let host_path = self.passwd_path(volume_id);
        let relative = host_path.strip_prefix("/").unwrap_or(&host_path);
        self.host_root.join(relative)
    }

    pub async fn write_credentials(&self, volume_id: &str, passwd_line: &str) -> Result<()> {
        validate_volume_id(volume_id)?;
        let path = self.local_passwd_path(volume_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(PASSWD_MODE)
            .open(&path)
            .await?;
        // mode() only applies on creation.
        file.set_permissions(std::fs::Permissions::from_mode(PASSWD_MODE))
            .await?;
        file.write_all(passwd_line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn remove_credentials(&self, volume_id: &str) -> Result<()> {
        validate_volume_id(volume_id)?;
        match tokio::fs::remove_file(self.local_passwd_path(volume_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn mount_command(&self, mount: &S3fsMount<'_>) -> String {
        let mut cmd = format!(
            "s3fs {} {} -o passwd_file={} -o url={} -o use_path_request_style \
             -o allow_other -o mp_umask=000",
            shell_quote(&format!("{}:/{}", mount.bucket, mount.unit)),
            shell_quote(&mount.target.to_string_lossy()),
            shell_quote(&self.passwd_path(mount.volume_id).to_string_lossy()),
            shell_quote(mount.endpoint),
        );
        if mount.readonly {
            cmd.push_str(" -o ro");
        }
        for flag in mount.flags {
            cmd.push_str(" -o ");
            cmd.push_str(&shell_quote(flag));
        }
        cmd
    }

    pub async fn mount(&self, mount: &S3fsMount<'_>) -> Result<()> {
        let target = mount.target.to_string_lossy();
        self.exec("create mount target", &target, format!("mkdir -p {}", shell_quote(&target)))
            .await?;
        self.exec("mount", &target, self.mount_command(mount)).await?;
        info!(
            volume_id = mount.volume_id,
            unit = mount.unit,
            target = %target,
            "mounted storage unit"
        );
        Ok(())
    }

    /// Whether the host reports an s3fs mount at `target`.
    ///
    /// Any bridge failure (including grep finding nothing) counts as not
    /// mounted.
    pub async fn is_mounted(&self, target: &Path) -> bool {
        let needle = format!(" {} {S3FS_FSTYPE} ", escape_octal(&target.to_string_lossy()));
        let cmd = format!("grep -cF {} {MOUNTS_FILE}", shell_quote(&needle));
        match self.bridge.exec(&cmd).await {
            Ok(out) => out.trim().parse::<u64>().is_ok_and(|count| count > 0),
            Err(e) => {
                debug!(target = %target.display(), error = %e, "mount check failed");
                false
            }
        }
    }

    pub async fn unmount(&self, target: &Path) -> Result<()> {
        let target = target.to_string_lossy();
        self.exec("unmount", &target, format!("umount {}", shell_quote(&target)))
            .await?;
        info!(target = %target, "unmounted");
        Ok(())
    }

    async fn exec(&self, operation: &'static str, target: &str, cmd: String) -> Result<String> {
        debug!(command = %cmd, "sending to connector");
        self.bridge
            .exec(&cmd)
            .await
            .map_err(|source| Error::Bridge {
                operation,
                target: target.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::FakeBridge;
    use tempfile::TempDir;

    fn mounter(bridge: Arc<FakeBridge>, temp: &TempDir) -> Mounter {
        Mounter::new(
            bridge,
            temp.path().to_path_buf(),
            PathBuf::from("/etc/open-object"),
        )
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/plain"), "'/plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn mount_command_keeps_credentials_out_of_the_command() {
        let temp = TempDir::new().unwrap();
        let mounter = mounter(Arc::new(FakeBridge::new()), &temp);
        let flags = vec!["uid=1000".to_string()];
        let cmd = mounter.mount_command(&S3fsMount {
            volume_id: "vol-a",
            bucket: "volumes",
            unit: "vol-a",
            endpoint: "http://10.0.0.7:9000",
            target: Path::new("/var/lib/kubelet/pods/p/mount"),
            readonly: true,
            flags: &flags,
        });

        assert_eq!(
            cmd,
            "s3fs 'volumes:/vol-a' '/var/lib/kubelet/pods/p/mount' \
             -o passwd_file='/etc/open-object/passwd/vol-a' -o url='http://10.0.0.7:9000' \
             -o use_path_request_style -o allow_other -o mp_umask=000 -o ro -o 'uid=1000'"
        );
    }

    #[tokio::test]
    async fn credentials_file_is_private_and_removable() {
        let temp = TempDir::new().unwrap();
        let mounter = mounter(Arc::new(FakeBridge::new()), &temp);

        mounter.write_credentials("vol-a", "AK:SK\n").await.unwrap();

        let path = temp.path().join("etc/open-object/passwd/vol-a");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "AK:SK\n");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        mounter.remove_credentials("vol-a").await.unwrap();
        assert!(!path.exists());
        mounter.remove_credentials("vol-a").await.unwrap();
    }

    #[tokio::test]
    async fn credentials_reject_path_like_volume_ids() {
        let temp = TempDir::new().unwrap();
        let mounter = mounter(Arc::new(FakeBridge::new()), &temp);
        assert!(matches!(
            mounter.write_credentials("../x", "AK:SK\n").await,
            Err(Error::InvalidVolumeId(_))
        ));
    }

    #[tokio::test]
    async fn is_mounted_follows_grep_count() {
        let temp = TempDir::new().unwrap();
        let bridge = Arc::new(FakeBridge::new());
        let mounter = mounter(bridge.clone(), &temp);
        let target = Path::new("/mnt/t");

        assert!(!mounter.is_mounted(target).await);
        bridge.set_s3fs_mounted(true);
        assert!(mounter.is_mounted(target).await);

        assert_eq!(
            bridge.commands()[0],
            "grep -cF ' /mnt/t fuse.s3fs ' /proc/mounts"
        );
    }

    #[tokio::test]
    async fn is_mounted_matches_kernel_escaped_paths() {
        let temp = TempDir::new().unwrap();
        let bridge = Arc::new(FakeBridge::new());
        let mounter = mounter(bridge.clone(), &temp);

        mounter.is_mounted(Path::new("/mnt/a b\\c\td")).await;

        assert_eq!(
            bridge.commands()[0],
            r"grep -cF ' /mnt/a\040b\134c\011d fuse.s3fs ' /proc/mounts"
        );
    }

    #[tokio::test]
    async fn unmount_failure_carries_daemon_text() {
        let temp = TempDir::new().unwrap();
        let bridge = Arc::new(FakeBridge::new());
        bridge.fail_commands_starting_with("umount");
        let mounter = mounter(bridge, &temp);

        let err = mounter.unmount(Path::new("/mnt/t")).await.unwrap_err();
        assert!(
            err.to_string()
                .contains("Fail: umount '/mnt/t', error: exit status 32")
        );
    }
}
