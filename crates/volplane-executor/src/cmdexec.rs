//! Storage node command executor.
//!
//! Turns node, device, brick, volume, snapshot and block-volume intents into command
//! batches and runs them through a [`RemoteCommandTransport`]. Every batch
//! holds the target host's admission slot while it runs.

use crate::cli_output::{
    self, BlockVolumeInfo, BrickHealStatus, DeviceInfo, SnapshotInfo, VolumeInfo,
};
use crate::error::ExecError;
use crate::planner::{BrickLocation, CommandPlanner, VolumeRequest};
use crate::throttle::HostThrottle;
use crate::transport::RemoteCommandTransport;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Logical volume layout for one brick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrickRequest {
    pub vg_name: String,
    pub lv_name: String,
    pub tp_name: String,
    pub size_kb: u64,
    pub tp_size_kb: u64,
    pub pool_metadata_size_kb: u64,
    /// Brick directory; its parent is the filesystem mount point
    pub path: String,
}

impl BrickRequest {
    #[must_use]
    pub fn mount_point(&self) -> &str {
        self.path
            .strip_suffix("/brick")
            .unwrap_or(self.path.as_str())
    }

    #[must_use]
    pub fn device_path(&self) -> String {
        format!("/dev/mapper/{}-{}", self.vg_name, self.lv_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockVolumeRequest {
    pub name: String,
    /// Gluster volume holding the block file
    pub hosting_volume: String,
    pub size_gb: u64,
    pub hacount: u32,
    /// Storage hostnames exporting the target
    pub block_hosts: Vec<String>,
    pub auth: bool,
}

pub struct CmdExecutor {
    transport: Arc<dyn RemoteCommandTransport>,
    throttle: HostThrottle,
    planner: CommandPlanner,
    fstab: String,
}

impl CmdExecutor {
    pub fn new(transport: Arc<dyn RemoteCommandTransport>, fstab: impl Into<String>) -> Self {
        let planner = CommandPlanner::new(transport.gluster_cli_timeout());
        Self {
            transport,
            throttle: HostThrottle::new(),
            planner,
            fstab: fstab.into(),
        }
    }

    #[must_use]
    pub const fn planner(&self) -> &CommandPlanner {
        &self.planner
    }

    /// Run a batch on `host` while holding its admission slot
    pub async fn execute(&self, host: &str, commands: Vec<String>) -> Result<Vec<String>, ExecError> {
        let _slot = self.throttle.acquire(host).await;
        debug!("Running {} commands on {}", commands.len(), host);
        self.transport
            .exec_commands(host, &commands, self.transport.command_timeout())
            .await
    }

    /// Run each command as its own batch, ignoring command failures.
    /// Only an unreachable host is reported.
    async fn execute_tolerant(&self, host: &str, commands: Vec<String>) -> Result<(), ExecError> {
        for command in commands {
            match self.execute(host, vec![command]).await {
                Ok(_) => {}
                Err(e) if e.is_unreachable() => return Err(e),
                Err(e) => debug!("Ignoring failure on {}: {}", host, e),
            }
        }
        Ok(())
    }

    async fn execute_one(&self, host: &str, command: String) -> Result<String, ExecError> {
        let mut out = self.execute(host, vec![command]).await?;
        Ok(out.pop().unwrap_or_default())
    }

    // Peers

    pub async fn glusterd_check(&self, host: &str) -> Result<(), ExecError> {
        self.execute(host, vec!["systemctl status glusterd".to_string()])
            .await
            .map(|_| ())
    }

    /// Add `new_node` to the trusted pool from `exec_host`
    pub async fn peer_attach(&self, exec_host: &str, new_node: &str) -> Result<(), ExecError> {
        let mut commands = vec![self.planner.peer_attach_command(new_node)];
        let limit = self.transport.snapshot_limit();
        if limit > 0 {
            commands.push(self.planner.snapshot_limit_command(limit));
        }
        self.execute(exec_host, commands).await?;
        info!("Attached peer {} from {}", new_node, exec_host);
        Ok(())
    }

    pub async fn peer_detach(&self, exec_host: &str, node: &str) -> Result<(), ExecError> {
        self.execute(exec_host, vec![self.planner.peer_detach_command(node)])
            .await?;
        info!("Detached peer {} from {}", node, exec_host);
        Ok(())
    }

    // Devices

    /// Create a physical volume and volume group on `device`
    pub async fn device_setup(
        &self,
        host: &str,
        device: &str,
        vg_name: &str,
    ) -> Result<DeviceInfo, ExecError> {
        let commands = vec![
            format!("pvcreate -qq --metadatasize=128M --dataalignment=256K '{device}'"),
            format!("vgcreate -qq --physicalextentsize=4M --autobackup=n {vg_name} {device}"),
        ];
        self.execute(host, commands).await?;

        match self.device_info(host, vg_name).await {
            Ok(info) => Ok(info),
            Err(e) => {
                if let Err(teardown) = self.device_teardown(host, device, vg_name).await {
                    error!("Unable to tear down {} on {}: {}", device, host, teardown);
                }
                Err(e)
            }
        }
    }

    pub async fn device_info(&self, host: &str, vg_name: &str) -> Result<DeviceInfo, ExecError> {
        let out = self
            .execute_one(host, format!("vgdisplay -c {vg_name}"))
            .await?;
        cli_output::parse_vgdisplay(&out).map_err(|e| ExecError::parse(host, e))
    }

    /// Remove the volume group and physical volume; missing ones are ignored
    pub async fn device_teardown(
        &self,
        host: &str,
        device: &str,
        vg_name: &str,
    ) -> Result<(), ExecError> {
        self.execute_tolerant(
            host,
            vec![
                format!("vgremove -qq {vg_name}"),
                format!("pvremove -qq '{device}'"),
            ],
        )
        .await
    }

    // Bricks

    /// Create a thin LV, format it and mount it at the brick path
    pub async fn brick_create(&self, host: &str, brick: &BrickRequest) -> Result<(), ExecError> {
        let mount_point = brick.mount_point();
        let device_path = brick.device_path();
        let commands = vec![
            format!("mkdir -p {mount_point}"),
            format!(
                "lvcreate -qq --autobackup=n --poolmetadatasize {}K --chunksize 256K --size {}K --thin {}/{} --virtualsize {}K --name {}",
                brick.pool_metadata_size_kb,
                brick.tp_size_kb,
                brick.vg_name,
                brick.tp_name,
                brick.size_kb,
                brick.lv_name
            ),
            format!("mkfs.xfs -i size=512 -n size=8192 {device_path}"),
            format!(
                "awk \"BEGIN {{print \\\"{device_path} {mount_point} xfs rw,inode64,noatime,nouuid 1 2\\\" >> \\\"{}\\\"}}\"",
                self.fstab
            ),
            format!("mount -o rw,inode64,noatime,nouuid {device_path} {mount_point}"),
            format!("mkdir {}", brick.path),
        ];

        if let Err(e) = self.execute(host, commands).await {
            warn!("Brick creation failed on {}, cleaning up: {}", host, e);
            if let Err(cleanup) = self.brick_destroy(host, brick).await {
                error!("Unable to clean up brick {} on {}: {}", brick.lv_name, host, cleanup);
            }
            return Err(e);
        }
        debug!("Created brick {} on {}", brick.path, host);
        Ok(())
    }

    /// Unmount and remove a brick; pieces already gone are ignored
    pub async fn brick_destroy(&self, host: &str, brick: &BrickRequest) -> Result<(), ExecError> {
        let mount_point = brick.mount_point();
        self.execute_tolerant(
            host,
            vec![
                format!("umount {mount_point}"),
                format!("lvremove --autobackup=n -f {}/{}", brick.vg_name, brick.lv_name),
                format!("lvremove --autobackup=n -f {}/{}", brick.vg_name, brick.tp_name),
                format!("sed -i.save \"\\#{mount_point} #d\" {}", self.fstab),
                format!("rmdir {mount_point}"),
            ],
        )
        .await
    }

    // Volumes

    /// Create and start a volume. On failure the partially created volume
    /// is destroyed before the original error is returned.
    pub async fn volume_create(&self, host: &str, request: &VolumeRequest) -> Result<(), ExecError> {
        let commands = self.planner.create_commands(request)?;
        info!(
            "Creating volume {} ({}) with {} bricks",
            request.name,
            request.durability,
            request.bricks.len()
        );
        if let Err(e) = self.execute(host, commands).await {
            warn!(
                "Creation of volume {} failed, destroying partial volume: {}",
                request.name, e
            );
            if let Err(cleanup) = self.volume_destroy(host, &request.name).await {
                error!("Unable to destroy partial volume {}: {}", request.name, cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Add `request.bricks` to an existing volume
    pub async fn volume_expand(&self, host: &str, request: &VolumeRequest) -> Result<(), ExecError> {
        let commands = self
            .planner
            .expand_commands(request, self.transport.rebalance_on_expansion())?;
        self.execute(host, commands).await?;
        info!(
            "Expanded volume {} by {} bricks",
            request.name,
            request.bricks.len()
        );
        Ok(())
    }

    /// Put `new` in the place of `old` within its redundancy set
    pub async fn volume_replace_brick(
        &self,
        host: &str,
        volume: &str,
        old: &BrickLocation,
        new: &BrickLocation,
    ) -> Result<(), ExecError> {
        let command = self.planner.replace_brick_command(volume, old, new);
        self.execute(host, vec![command]).await?;
        info!(
            "Replaced brick {} of volume {} with {}",
            old.name(),
            volume,
            new.name()
        );
        Ok(())
    }

    /// Stop and delete a volume. A volume that no longer exists counts as
    /// destroyed.
    pub async fn volume_destroy(&self, host: &str, name: &str) -> Result<(), ExecError> {
        if let Err(e) = self.execute(host, vec![self.planner.stop_command(name)]).await {
            if e.is_unreachable() {
                return Err(e);
            }
            warn!("Unable to stop volume {}: {}", name, e);
        }

        match self.execute(host, vec![self.planner.delete_command(name)]).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_missing_object() => {
                debug!("Volume {} already gone", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Refuse deletion of volumes that still have snapshots. A volume the
    /// node no longer knows has none, so an interrupted delete can run
    /// again.
    pub async fn volume_destroy_check(&self, host: &str, name: &str) -> Result<(), ExecError> {
        let count = match self
            .execute_one(host, self.planner.snapshot_list_command(name))
            .await
            .and_then(|out| {
                cli_output::parse_snapshot_count(&out).map_err(|e| ExecError::parse(host, e))
            }) {
            Ok(count) => count,
            Err(e) if e.is_missing_object() => {
                debug!("Volume {} already gone, no snapshots to check", name);
                0
            }
            Err(e) => return Err(e),
        };
        if count > 0 {
            return Err(ExecError::Refused(format!(
                "volume {name} has {count} snapshots"
            )));
        }
        Ok(())
    }

    pub async fn volume_info(&self, host: &str, name: &str) -> Result<VolumeInfo, ExecError> {
        let out = self.execute_one(host, self.planner.info_command(name)).await?;
        cli_output::parse_volume_info(&out).map_err(|e| ExecError::parse(host, e))
    }

    /// Whether the volume is known to the storage cluster
    pub async fn volume_exists(&self, host: &str, name: &str) -> Result<bool, ExecError> {
        match self.volume_info(host, name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_missing_object() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Self-heal state of every brick of a volume
    pub async fn heal_info(&self, host: &str, name: &str) -> Result<Vec<BrickHealStatus>, ExecError> {
        let out = self
            .execute_one(host, self.planner.heal_info_command(name))
            .await?;
        cli_output::parse_heal_info(&out).map_err(|e| ExecError::parse(host, e))
    }

    // Snapshots

    /// Run one gluster XML command and check its status
    async fn execute_cli(&self, host: &str, command: String) -> Result<String, ExecError> {
        let out = self.execute_one(host, command).await?;
        cli_output::parse_cli_status(&out).map_err(|e| ExecError::parse(host, e))?;
        Ok(out)
    }

    pub async fn snapshot_create(
        &self,
        host: &str,
        volume: &str,
        snapshot: &str,
        description: &str,
    ) -> Result<(), ExecError> {
        info!("Creating snapshot {} of volume {}", snapshot, volume);
        self.execute_cli(
            host,
            self.planner
                .snapshot_create_command(volume, snapshot, description),
        )
        .await?;
        Ok(())
    }

    pub async fn snapshot_info(&self, host: &str, snapshot: &str) -> Result<SnapshotInfo, ExecError> {
        let out = self
            .execute_one(host, self.planner.snapshot_info_command(snapshot))
            .await?;
        cli_output::parse_snapshot_info(&out).map_err(|e| ExecError::parse(host, e))
    }

    /// Whether the snapshot is known to the storage cluster
    pub async fn snapshot_exists(&self, host: &str, snapshot: &str) -> Result<bool, ExecError> {
        match self.snapshot_info(host, snapshot).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_missing_object() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete a snapshot; one that is already gone counts as deleted
    pub async fn snapshot_destroy(&self, host: &str, snapshot: &str) -> Result<(), ExecError> {
        match self
            .execute_cli(host, self.planner.snapshot_delete_command(snapshot))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_missing_object() => {
                debug!("Snapshot {} already gone", snapshot);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Deactivate a snapshot. A missing or inactive snapshot is not an error.
    pub async fn snapshot_deactivate(&self, host: &str, snapshot: &str) -> Result<(), ExecError> {
        match self
            .execute_cli(host, self.planner.snapshot_deactivate_command(snapshot))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_missing_object() || e.mentions_any(&["not activated", "already deactivated"]) => {
                debug!("Snapshot {} is not active", snapshot);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Clone a snapshot into a new started volume.
    ///
    /// The snapshot is activated for the clone and deactivated again
    /// afterwards. A clone that cannot be started is destroyed before the
    /// original error is returned.
    pub async fn snapshot_clone(&self, host: &str, snapshot: &str, clone: &str) -> Result<(), ExecError> {
        match self
            .execute_cli(host, self.planner.snapshot_activate_command(snapshot))
            .await
        {
            Ok(_) => {}
            Err(e) if e.mentions_any(&["already activated"]) => {}
            Err(e) => return Err(e),
        }

        info!("Cloning snapshot {} into volume {}", snapshot, clone);
        let mut result = self
            .execute_cli(host, self.planner.snapshot_clone_command(clone, snapshot))
            .await
            .map(|_| ());
        if result.is_ok() {
            result = self
                .execute(host, vec![self.planner.start_command(clone)])
                .await
                .map(|_| ());
            if let Err(e) = &result {
                warn!("Unable to start clone {}, destroying it: {}", clone, e);
                if let Err(cleanup) = self.volume_destroy(host, clone).await {
                    error!("Unable to destroy clone {}: {}", clone, cleanup);
                }
            }
        }

        if let Err(e) = self.snapshot_deactivate(host, snapshot).await {
            warn!("Unable to deactivate snapshot {}: {}", snapshot, e);
        }
        result
    }

    // Block volumes

    /// Create a block volume. On failure the block volume is deleted before
    /// the original error is returned.
    pub async fn block_volume_create(
        &self,
        host: &str,
        request: &BlockVolumeRequest,
    ) -> Result<BlockVolumeInfo, ExecError> {
        if request.block_hosts.is_empty() {
            return Err(ExecError::InvalidRequest(
                "block volume needs at least one host".into(),
            ));
        }
        let auth = if request.auth { "enable" } else { "disable" };
        let command = format!(
            "gluster-block create {}/{} ha {} auth {} prealloc full {} {}GiB --json",
            request.hosting_volume,
            request.name,
            request.hacount,
            auth,
            request.block_hosts.join(","),
            request.size_gb
        );

        let result = match self.execute_one(host, command).await {
            Ok(out) => cli_output::parse_block_create(&out).map_err(|e| ExecError::parse(host, e)),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(
                "Creation of block volume {} failed, deleting: {}",
                request.name, e
            );
            if let Err(cleanup) = self
                .block_volume_destroy(host, &request.hosting_volume, &request.name)
                .await
            {
                error!(
                    "Unable to delete partial block volume {}: {}",
                    request.name, cleanup
                );
            }
        }
        result
    }

    /// Grow a block volume to `size_gb`. Repeating the call with the same
    /// size is harmless.
    pub async fn block_volume_expand(
        &self,
        host: &str,
        hosting_volume: &str,
        name: &str,
        size_gb: u64,
    ) -> Result<(), ExecError> {
        let command = format!("gluster-block modify {hosting_volume}/{name} size {size_gb}GiB --json");
        let result = match self.execute_one(host, command).await {
            Ok(out) => cli_output::parse_block_modify(&out).map_err(|e| ExecError::parse(host, e)),
            Err(e) => Err(e),
        };
        match result {
            Err(e) if e.mentions_any(&["same as current size"]) => {
                debug!("Block volume {} already has {} GiB", name, size_gb);
                Ok(())
            }
            other => other,
        }
    }

    /// Delete a block volume; one that is already gone counts as deleted
    pub async fn block_volume_destroy(
        &self,
        host: &str,
        hosting_volume: &str,
        name: &str,
    ) -> Result<(), ExecError> {
        let command = format!("gluster-block delete {hosting_volume}/{name} --json");
        match self.execute(host, vec![command]).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_missing_object() => {
                debug!("Block volume {} already gone", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
