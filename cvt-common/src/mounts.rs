//! NFS mount inspection for execute nodes.

use tracing::debug;

use crate::errors::{CheckError, CheckResult};
use crate::exec::{CommandRunner, CommandSpec};

/// `mount -l -t nfs`: only NFS mounts, with labels.
pub fn nfs_mount_command() -> CommandSpec {
    CommandSpec::new("mount").args(["-l", "-t", "nfs"])
}

/// Required mount points that do not show up as `<mount> type nfs`.
///
/// Order follows `required`.
pub fn missing_nfs_mounts<'a, S: AsRef<str>>(mount_output: &str, required: &'a [S]) -> Vec<&'a str> {
    required
        .iter()
        .map(AsRef::as_ref)
        .filter(|mount| !mount_output.contains(&format!("{mount} type nfs")))
        .collect()
}

/// Run `mount` and fail on the first required mount that is not NFS.
pub fn check_nfs_mounts<R, S>(runner: &R, required: &[S]) -> CheckResult<()>
where
    R: CommandRunner + ?Sized,
    S: AsRef<str>,
{
    let output = runner.check(&nfs_mount_command())?.stdout;
    let missing = missing_nfs_mounts(&output, required);
    debug!(required = required.len(), missing = ?missing, "Inspected NFS mounts");
    match missing.first() {
        Some(mount) => Err(CheckError::MountMissing {
            mount: (*mount).to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTS: &str = "\
10.0.0.4:/mnt/exports/shared on /shared type nfs (rw,relatime,vers=3,rsize=65536)
10.0.0.4:/mnt/exports/sched on /sched type nfs (rw,relatime,vers=3,rsize=65536)
";

    #[test]
    fn test_all_present() {
        assert!(missing_nfs_mounts(MOUNTS, &["/shared", "/sched"]).is_empty());
    }

    #[test]
    fn test_reports_exactly_the_absent_mounts() {
        let output = "10.0.0.4:/mnt/exports/shared on /shared type nfs (rw)\n";
        assert_eq!(
            missing_nfs_mounts(output, &["/shared", "/sched", "/scratch"]),
            vec!["/sched", "/scratch"]
        );
    }

    #[test]
    fn test_non_nfs_mount_does_not_count() {
        let output = "/dev/sdb1 on /shared type ext4 (rw)\n";
        assert_eq!(missing_nfs_mounts(output, &["/shared"]), vec!["/shared"]);
    }

    #[test]
    fn test_empty_output_misses_everything() {
        let required = vec!["/shared".to_string(), "/sched".to_string()];
        assert_eq!(missing_nfs_mounts("", &required), vec!["/shared", "/sched"]);
    }
}
