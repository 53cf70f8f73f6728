//! Command registry - merges core and plugin commands into one tree

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::application::errors::{BotError, PluginError, PluginResult};
use crate::domain::entities::{
    CommandDescriptor, CommandOwner, PublishedCommand, PublishedGroup,
};
use crate::domain::traits::CommandTransport;

/// Where a resolved command goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub owner: CommandOwner,
    pub autocomplete: bool,
}

/// Result of resolving a command name (and group) against the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResolution {
    Found(RouteTarget),
    /// Top-level name owns groups but the requested group has no owner
    UnknownGroup { parent: String, group: Option<String> },
    NotFound,
}

/// Immutable lookup tables; a new one is built on every registry change
#[derive(Debug, Default)]
pub struct RoutingTable {
    version: u64,
    standalone: HashMap<String, RouteTarget>,
    by_group: HashMap<(String, String), RouteTarget>,
    by_parent_command: HashMap<String, Vec<String>>,
}

impl RoutingTable {
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Groups currently routable under a parent command
    pub fn groups_of(&self, parent: &str) -> &[String] {
        self.by_parent_command
            .get(parent)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn resolve(&self, command: &str, group: Option<&str>) -> CommandResolution {
        if self.by_parent_command.contains_key(command) {
            return match group.and_then(|g| self.by_group.get(&(command.to_string(), g.to_string()))) {
                Some(target) => CommandResolution::Found(target.clone()),
                None => CommandResolution::UnknownGroup {
                    parent: command.to_string(),
                    group: group.map(str::to_string),
                },
            };
        }
        match self.standalone.get(command) {
            Some(target) => CommandResolution::Found(target.clone()),
            None => CommandResolution::NotFound,
        }
    }

    pub fn len(&self) -> usize {
        self.standalone.len() + self.by_group.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct PluginCommands {
    plugin: String,
    commands: Vec<CommandDescriptor>,
    enabled: bool,
}

/// Registry for core and plugin commands
///
/// Registration is the only place collisions are detected: a second owner for
/// a standalone name or a `(parent, group)` pair is rejected immediately.
pub struct CommandRegistry {
    core: Mutex<Vec<CommandDescriptor>>,
    plugins: Mutex<Vec<PluginCommands>>,
    snapshot: RwLock<Arc<RoutingTable>>,
    version: AtomicU64,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            core: Mutex::new(Vec::new()),
            plugins: Mutex::new(Vec::new()),
            snapshot: RwLock::new(Arc::new(RoutingTable::default())),
            version: AtomicU64::new(0),
        }
    }

    /// Register a core-defined command
    pub fn register_core(&self, command: CommandDescriptor) -> PluginResult<()> {
        command.validate().map_err(PluginError::InvalidName)?;
        let command = command.owned_by(CommandOwner::Core);
        {
            let mut core = self.lock_core()?;
            let plugins = self.lock_plugins()?;
            let existing = existing_commands(&core, &plugins, None);
            check_batch(&existing, std::slice::from_ref(&command), "core")?;
            core.push(command);
            self.rebuild(&core, &plugins);
        }
        Ok(())
    }

    /// Validate and commit a plugin's commands in one step.
    ///
    /// Nothing is committed when any command collides.
    pub fn register(
        &self,
        plugin: &str,
        commands: Vec<CommandDescriptor>,
        enabled: bool,
    ) -> PluginResult<()> {
        let core = self.lock_core()?;
        let mut plugins = self.lock_plugins()?;

        // Replacing our own registration only needs to clear everyone else
        let existing = existing_commands(&core, &plugins, Some(plugin));
        check_batch(&existing, &commands, plugin)?;

        plugins.retain(|p| p.plugin != plugin);
        tracing::debug!(plugin = %plugin, count = commands.len(), "Registered commands");
        plugins.push(PluginCommands {
            plugin: plugin.to_string(),
            commands,
            enabled,
        });
        self.rebuild(&core, &plugins);
        Ok(())
    }

    /// Remove a plugin's commands; returns what was removed
    pub fn unregister(&self, plugin: &str) -> Vec<CommandDescriptor> {
        let (Ok(core), Ok(mut plugins)) = (self.core.lock(), self.plugins.lock()) else {
            return Vec::new();
        };
        let Some(pos) = plugins.iter().position(|p| p.plugin == plugin) else {
            return Vec::new();
        };
        let removed = plugins.remove(pos);
        self.rebuild(&core, &plugins);
        removed.commands
    }

    /// Toggle routing visibility without dropping the registration.
    /// Returns `false` if the plugin has no registration.
    pub fn set_enabled(&self, plugin: &str, enabled: bool) -> bool {
        let (Ok(core), Ok(mut plugins)) = (self.core.lock(), self.plugins.lock()) else {
            return false;
        };
        let Some(entry) = plugins.iter_mut().find(|p| p.plugin == plugin) else {
            return false;
        };
        entry.enabled = enabled;
        self.rebuild(&core, &plugins);
        true
    }

    /// Current routing table. Callers keep one consistent version for the
    /// whole interaction even if the registry changes meanwhile.
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.snapshot
            .read()
            .map(|s| Arc::clone(&s))
            .unwrap_or_default()
    }

    /// Registered commands of a plugin, enabled or not
    pub fn commands_of(&self, plugin: &str) -> Vec<CommandDescriptor> {
        self.plugins
            .lock()
            .ok()
            .and_then(|p| p.iter().find(|p| p.plugin == plugin).map(|p| p.commands.clone()))
            .unwrap_or_default()
    }

    pub fn is_registered(&self, plugin: &str) -> bool {
        self.plugins
            .lock()
            .map(|p| p.iter().any(|p| p.plugin == plugin))
            .unwrap_or(false)
    }

    /// Compose the complete command tree: core commands, plugin standalone
    /// commands, and one top-level command per shared parent with its groups.
    pub fn compose_tree(&self) -> Vec<PublishedCommand> {
        let (Ok(core), Ok(plugins)) = (self.core.lock(), self.plugins.lock()) else {
            return Vec::new();
        };

        let mut tree: Vec<PublishedCommand> = Vec::new();
        let mut parents: HashMap<String, usize> = HashMap::new();

        let all = core.iter().chain(plugins.iter().flat_map(|p| p.commands.iter()));
        for cmd in all {
            match &cmd.parent_command {
                None => tree.push(PublishedCommand {
                    name: cmd.name.clone(),
                    description: cmd.description.clone(),
                    options: cmd.options.clone(),
                    subcommands: cmd.subcommands.clone(),
                    groups: Vec::new(),
                }),
                Some(parent) => {
                    let idx = *parents.entry(parent.clone()).or_insert_with(|| {
                        tree.push(PublishedCommand {
                            name: parent.clone(),
                            description: String::new(),
                            options: Vec::new(),
                            subcommands: Vec::new(),
                            groups: Vec::new(),
                        });
                        tree.len() - 1
                    });
                    let top = &mut tree[idx];
                    if top.description.is_empty() {
                        if let Some(desc) = &cmd.parent_description {
                            top.description = desc.clone();
                        }
                    }
                    top.groups.push(PublishedGroup {
                        name: cmd.name.clone(),
                        description: cmd.description.clone(),
                        subcommands: cmd.subcommands.clone(),
                    });
                }
            }
        }

        for top in tree.iter_mut().filter(|t| t.description.is_empty()) {
            top.description = format!("{} commands", top.name);
        }
        tree
    }

    /// Bulk-replace the transport's command tree with the full composed tree
    pub async fn publish(&self, transport: &dyn CommandTransport) -> Result<usize, BotError> {
        let tree = self.compose_tree();
        transport.register_commands(&tree).await?;
        tracing::info!(commands = tree.len(), "Published command tree");
        Ok(tree.len())
    }

    fn lock_core(&self) -> PluginResult<std::sync::MutexGuard<'_, Vec<CommandDescriptor>>> {
        self.core
            .lock()
            .map_err(|_| PluginError::Handler("command registry lock poisoned".to_string()))
    }

    fn lock_plugins(&self) -> PluginResult<std::sync::MutexGuard<'_, Vec<PluginCommands>>> {
        self.plugins
            .lock()
            .map_err(|_| PluginError::Handler("command registry lock poisoned".to_string()))
    }

    fn rebuild(&self, core: &[CommandDescriptor], plugins: &[PluginCommands]) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let mut table = RoutingTable {
            version,
            ..Default::default()
        };

        let routable = core
            .iter()
            .chain(plugins.iter().filter(|p| p.enabled).flat_map(|p| p.commands.iter()));
        for cmd in routable {
            let target = RouteTarget {
                owner: cmd.owner.clone(),
                autocomplete: cmd.has_autocomplete(),
            };
            match &cmd.parent_command {
                None => {
                    table.standalone.insert(cmd.name.clone(), target);
                }
                Some(parent) => {
                    table
                        .by_parent_command
                        .entry(parent.clone())
                        .or_default()
                        .push(cmd.name.clone());
                    table.by_group.insert((parent.clone(), cmd.name.clone()), target);
                }
            }
        }

        if let Ok(mut snapshot) = self.snapshot.write() {
            *snapshot = Arc::new(table);
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn existing_commands(
    core: &[CommandDescriptor],
    plugins: &[PluginCommands],
    skip: Option<&str>,
) -> Vec<CommandDescriptor> {
    core.iter()
        .cloned()
        .chain(
            plugins
                .iter()
                .filter(|p| Some(p.plugin.as_str()) != skip)
                .flat_map(|p| p.commands.iter().cloned()),
        )
        .collect()
}

/// Check `incoming` against `existing` and against itself
fn check_batch(existing: &[CommandDescriptor], incoming: &[CommandDescriptor], claimant: &str) -> PluginResult<()> {
    let mut seen: Vec<&CommandDescriptor> = existing.iter().collect();
    for cmd in incoming {
        if let Some(owner) = seen.iter().find(|e| collides(e, cmd)) {
            return Err(PluginError::RegistrationConflict {
                what: cmd.registration_key(),
                existing: owner.owner.to_string(),
                incoming: claimant.to_string(),
            });
        }
        seen.push(cmd);
    }
    Ok(())
}

fn collides(a: &CommandDescriptor, b: &CommandDescriptor) -> bool {
    match (&a.parent_command, &b.parent_command) {
        (None, None) => a.name == b.name,
        (Some(pa), Some(pb)) => pa == pb && a.name == b.name,
        // A standalone command cannot share its name with a group parent
        (None, Some(parent)) => &a.name == parent,
        (Some(parent), None) => &b.name == parent,
    }
}
