//! Execute-node suite: shared storage is mounted and the node has joined
//! the pool.

use cvt_common::harness::{Check, CheckHarness, HarnessConfig, HarnessResult, Suite};
use cvt_common::mounts::check_nfs_mounts;
use cvt_common::scheduler::wait_for_node_registration;
use cvt_common::{ClusterConfig, CommandRunner, Platform};

pub fn suite<'a, R>(config: &'a ClusterConfig, platform: Platform, runner: R) -> Suite<'a, R>
where
    R: CommandRunner + Clone + 'a,
{
    Suite::with_runner("execute", HarnessConfig::from(config), runner)
        .check(
            Check::new("nfs_mounts_present", move |h| {
                check_nfs_mounts(h, &config.mounts.required)?;
                Ok(())
            })
            .skip_if(
                !platform.is_posix(),
                "This check only runs on linux execute nodes",
            ),
        )
        .check(Check::new("node_registered_with_scheduler", move |h| {
            node_registered(h, config, platform)
        }))
}

/// Registration can lag node boot by a few minutes, hence the long wait.
fn node_registered<R: CommandRunner>(
    h: &CheckHarness<R>,
    config: &ClusterConfig,
    platform: Platform,
) -> HarnessResult<()> {
    let hostname = platform.hostname(h)?;
    h.logger
        .info(format!("Looking for {hostname} in the scheduler's node list"));
    wait_for_node_registration(
        h,
        &platform.status_command(config),
        &hostname,
        config.timeouts.node_registration,
        config.timeouts.poll_interval,
    )?;
    Ok(())
}
