//! Persistent log of region control commands.
//!
//! Commands are persisted before dispatch so an in-flight command survives a
//! process restart, and `add` rejecting duplicate ids is the deduplication
//! point for coordinator re-sends.

use std::sync::Arc;

use anyhow::Context;
use dashmap::DashMap;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use crate::command::{CommandId, CommandStatus, RegionCommand};
use crate::error::{ControlError, Result};
use crate::keys;
use crate::region::RegionId;

pub struct CommandLog {
    keyspace: Arc<Keyspace>,
    partition: PartitionHandle,
    commands: DashMap<CommandId, RegionCommand>,
}

impl CommandLog {
    /// Open the log and rehydrate all command records from disk.
    pub fn open(keyspace: Arc<Keyspace>) -> anyhow::Result<Self> {
        let partition = keyspace
            .open_partition(
                keys::CONTROL_META_PARTITION,
                PartitionCreateOptions::default(),
            )
            .context("open control meta partition")?;

        let commands = DashMap::new();
        for item in partition.prefix(keys::COMMAND_PREFIX) {
            let (key, value) = item.context("scan command records")?;
            let Some(command_id) = keys::parse_id(&key, keys::COMMAND_PREFIX) else {
                continue;
            };
            let command: RegionCommand =
                serde_json::from_slice(&value).context("decode command record")?;
            commands.insert(command_id, command);
        }

        tracing::debug!(commands = commands.len(), "command log rehydrated");

        Ok(Self {
            keyspace,
            partition,
            commands,
        })
    }

    pub fn is_exist(&self, command_id: CommandId) -> bool {
        self.commands.contains_key(&command_id)
    }

    /// Insert a command record. A duplicate id is rejected; this is where
    /// coordinator re-sends are shed.
    pub fn add(&self, command: RegionCommand) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.commands.entry(command.id) {
            Entry::Occupied(_) => {
                tracing::warn!(command_id = command.id, "region command already exists");
                Err(ControlError::RegionRepeatCommand(command.id))
            }
            Entry::Vacant(slot) => {
                self.persist(&command)?;
                slot.insert(command);
                Ok(())
            }
        }
    }

    /// Move a command to its terminal status. A command that already reached
    /// a terminal status is left untouched.
    pub fn update_status(&self, command_id: CommandId, status: CommandStatus) -> Result<()> {
        let snapshot = {
            let mut entry = self
                .commands
                .get_mut(&command_id)
                .ok_or_else(|| ControlError::internal(format!("command {command_id} not found")))?;
            if entry.status.is_terminal() {
                if entry.status != status {
                    tracing::warn!(
                        command_id,
                        current = ?entry.status,
                        requested = ?status,
                        "ignoring status change on terminal command"
                    );
                }
                return Ok(());
            }
            entry.status = status;
            entry.clone()
        };
        self.persist(&snapshot)
    }

    pub fn get(&self, command_id: CommandId) -> Option<RegionCommand> {
        self.commands.get(&command_id).map(|c| c.clone())
    }

    /// Commands with the given status, ascending by id.
    pub fn by_status(&self, status: CommandStatus) -> Vec<RegionCommand> {
        let mut commands: Vec<RegionCommand> = self
            .commands
            .iter()
            .filter(|c| c.status == status)
            .map(|c| c.clone())
            .collect();
        commands.sort_by_key(|c| c.id);
        commands
    }

    /// Commands targeting the given region, ascending by id.
    pub fn by_region(&self, region_id: RegionId) -> Vec<RegionCommand> {
        let mut commands: Vec<RegionCommand> = self
            .commands
            .iter()
            .filter(|c| c.region_id == region_id)
            .map(|c| c.clone())
            .collect();
        commands.sort_by_key(|c| c.id);
        commands
    }

    /// Every command on record, ascending by id.
    pub fn all(&self) -> Vec<RegionCommand> {
        let mut commands: Vec<RegionCommand> =
            self.commands.iter().map(|c| c.clone()).collect();
        commands.sort_by_key(|c| c.id);
        commands
    }

    fn persist(&self, command: &RegionCommand) -> Result<()> {
        let value = serde_json::to_vec(command).context("encode command record")?;
        self.partition
            .insert(keys::command_key(command.id).as_bytes(), value)
            .context("write command record")?;
        self.keyspace
            .persist(PersistMode::Buffer)
            .context("persist command log")?;
        Ok(())
    }
}
