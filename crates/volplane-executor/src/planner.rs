//! Command planning for gluster volumes.
//!
//! A volume can have many more bricks than fit on one command line, so it
//! is created with a single redundancy set and grown with `add-brick`
//! commands that each name at most `max_sets_per_command` sets.

use crate::error::ExecError;
use volplane_common::DurabilityPolicy;

/// A brick as the gluster CLI names it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrickLocation {
    /// Storage hostname of the node
    pub host: String,
    pub path: String,
}

impl BrickLocation {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }

    /// `host:path`, as gluster names the brick
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}:{}", self.host, self.path)
    }
}

/// Everything needed to create or expand a gluster volume
#[derive(Debug, Clone)]
pub struct VolumeRequest {
    pub name: String,
    pub durability: DurabilityPolicy,
    pub bricks: Vec<BrickLocation>,
    /// `key value` pairs passed to `volume set`
    pub options: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CommandPlanner {
    cli_timeout: u32,
}

impl CommandPlanner {
    #[must_use]
    pub const fn new(cli_timeout: u32) -> Self {
        Self { cli_timeout }
    }

    fn gluster(&self) -> String {
        format!("gluster --mode=script --timeout={}", self.cli_timeout)
    }

    fn check_bricks(request: &VolumeRequest) -> Result<usize, ExecError> {
        if request.name.is_empty() {
            return Err(ExecError::InvalidRequest("volume name is required".into()));
        }
        let set_size = request.durability.set_size();
        if set_size == 0 || request.bricks.is_empty() || request.bricks.len() % set_size != 0 {
            return Err(ExecError::InvalidRequest(format!(
                "{} bricks do not form whole sets of {} for {}",
                request.bricks.len(),
                set_size,
                request.durability
            )));
        }
        Ok(set_size)
    }

    /// Full sequence to bring up a new volume: create with the first set,
    /// add the remaining sets, apply options, start.
    pub fn create_commands(&self, request: &VolumeRequest) -> Result<Vec<String>, ExecError> {
        let set_size = Self::check_bricks(request)?;

        let mut cmd = format!("{} volume create {} ", self.gluster(), request.name);
        match request.durability {
            DurabilityPolicy::None => {}
            DurabilityPolicy::Replica { replica } => {
                cmd.push_str(&format!("replica {replica} "));
            }
            DurabilityPolicy::Dispersion { data, redundancy } => {
                cmd.push_str(&format!("disperse-data {data} redundancy {redundancy} "));
            }
        }
        for brick in &request.bricks[..set_size] {
            cmd.push_str(&format!("{}:{} ", brick.host, brick.path));
        }

        let mut commands = vec![cmd.trim_end().to_string()];
        commands.extend(self.add_brick_commands(
            &request.name,
            &request.bricks[set_size..],
            set_size,
            request.durability.max_sets_per_command(),
        ));
        commands.extend(self.option_commands(&request.name, &request.options));
        commands.push(self.start_command(&request.name));
        Ok(commands)
    }

    /// Commands adding `request.bricks` to an existing volume
    pub fn expand_commands(
        &self,
        request: &VolumeRequest,
        rebalance: bool,
    ) -> Result<Vec<String>, ExecError> {
        let set_size = Self::check_bricks(request)?;
        let mut commands = self.add_brick_commands(
            &request.name,
            &request.bricks,
            set_size,
            request.durability.max_sets_per_command(),
        );
        if rebalance {
            commands.push(self.rebalance_command(&request.name));
        }
        Ok(commands)
    }

    /// Pack `bricks` into `add-brick` commands of at most `max_sets` sets
    /// each, keeping input order.
    #[must_use]
    pub fn add_brick_commands(
        &self,
        name: &str,
        bricks: &[BrickLocation],
        set_size: usize,
        max_sets: usize,
    ) -> Vec<String> {
        let per_command = (set_size * max_sets).max(1);
        bricks
            .chunks(per_command)
            .map(|chunk| {
                let names: Vec<String> = chunk
                    .iter()
                    .map(|b| format!("{}:{}", b.host, b.path))
                    .collect();
                format!("{} volume add-brick {} {}", self.gluster(), name, names.join(" "))
            })
            .collect()
    }

    #[must_use]
    pub fn option_commands(&self, name: &str, options: &[String]) -> Vec<String> {
        options
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(|o| format!("{} volume set {} {}", self.gluster(), name, o))
            .collect()
    }

    #[must_use]
    pub fn start_command(&self, name: &str) -> String {
        format!("{} volume start {}", self.gluster(), name)
    }

    #[must_use]
    pub fn stop_command(&self, name: &str) -> String {
        format!("{} volume stop {} force", self.gluster(), name)
    }

    #[must_use]
    pub fn delete_command(&self, name: &str) -> String {
        format!("{} volume delete {}", self.gluster(), name)
    }

    #[must_use]
    pub fn rebalance_command(&self, name: &str) -> String {
        format!("{} volume rebalance {} start", self.gluster(), name)
    }

    #[must_use]
    pub fn info_command(&self, name: &str) -> String {
        format!("{} volume info {} --xml", self.gluster(), name)
    }

    #[must_use]
    pub fn snapshot_list_command(&self, name: &str) -> String {
        format!("{} snapshot list {} --xml", self.gluster(), name)
    }

    /// Cluster-wide snapshot hard limit
    #[must_use]
    pub fn snapshot_limit_command(&self, limit: u32) -> String {
        format!("{} snapshot config snap-max-hard-limit {}", self.gluster(), limit)
    }

    /// Snapshot `volume` as `snapshot`, without the timestamp suffix gluster
    /// appends by default
    #[must_use]
    pub fn snapshot_create_command(&self, volume: &str, snapshot: &str, description: &str) -> String {
        let mut cmd = format!(
            "{} snapshot create {} {} no-timestamp",
            self.gluster(),
            snapshot,
            volume
        );
        if !description.is_empty() {
            cmd.push_str(&format!(" description {}", shell_quote(description)));
        }
        cmd.push_str(" --xml");
        cmd
    }

    #[must_use]
    pub fn snapshot_activate_command(&self, snapshot: &str) -> String {
        format!("{} snapshot activate {} --xml", self.gluster(), snapshot)
    }

    #[must_use]
    pub fn snapshot_deactivate_command(&self, snapshot: &str) -> String {
        format!("{} snapshot deactivate {} --xml", self.gluster(), snapshot)
    }

    #[must_use]
    pub fn snapshot_clone_command(&self, clone: &str, snapshot: &str) -> String {
        format!("{} snapshot clone {} {} --xml", self.gluster(), clone, snapshot)
    }

    #[must_use]
    pub fn snapshot_delete_command(&self, snapshot: &str) -> String {
        format!("{} snapshot delete {} --xml", self.gluster(), snapshot)
    }

    #[must_use]
    pub fn snapshot_info_command(&self, snapshot: &str) -> String {
        format!("{} snapshot info {} --xml", self.gluster(), snapshot)
    }

    /// Swap `old` for `new` in `volume`. Self-heal repopulates the new
    /// brick from the rest of its set.
    #[must_use]
    pub fn replace_brick_command(
        &self,
        volume: &str,
        old: &BrickLocation,
        new: &BrickLocation,
    ) -> String {
        format!(
            "{} volume replace-brick {} {} {} commit force",
            self.gluster(),
            volume,
            old.name(),
            new.name()
        )
    }

    #[must_use]
    pub fn heal_info_command(&self, volume: &str) -> String {
        format!("{} volume heal {} info --xml", self.gluster(), volume)
    }

    /// Command adding `node` to the trusted storage pool
    #[must_use]
    pub fn peer_attach_command(&self, node: &str) -> String {
        format!("{} peer probe {}", self.gluster(), node)
    }

    #[must_use]
    pub fn peer_detach_command(&self, node: &str) -> String {
        format!("{} peer detach {}", self.gluster(), node)
    }
}

/// Single-quote `value` for the remote shell
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
