//! CLI command namespace.
//!
//! The host hands the loader a [`CommandTree`] already holding its built-in
//! subcommands. [`CommandRegistrar`] snapshots those as `built-in`, lets each
//! plugin append to the tree, and rejects any new command name or alias that
//! collides with an existing name or alias.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{PluginError, PluginResult};
use crate::plugin::{ExtensionPlugin, Owner, PluginId};
use crate::shutdown::contain_hook;

/// Handler for a plugin-contributed subcommand. Receives the trailing
/// arguments after the command name.
pub type CommandHandler = Arc<dyn Fn(&[String]) -> PluginResult<()> + Send + Sync>;

/// One subcommand in the host command tree.
#[derive(Clone)]
pub struct CommandSpec {
    /// Command name (`stencil <name>`).
    pub name: String,
    /// One-line help text.
    pub about: String,
    /// Alternative names.
    pub aliases: Vec<String>,
    /// Handler; `None` for built-ins the host dispatches itself.
    pub handler: Option<CommandHandler>,
}

impl CommandSpec {
    /// Create a command with no aliases and no handler.
    #[must_use]
    pub fn new(name: impl Into<String>, about: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            about: about.into(),
            aliases: Vec::new(),
            handler: None,
        }
    }

    /// Add an alias.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Set the handler.
    #[must_use]
    pub fn handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&[String]) -> PluginResult<()> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(f));
        self
    }

    /// Run the handler with the given arguments.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::CommandFailed`] if there is no handler or it fails.
    pub fn run(&self, args: &[String]) -> PluginResult<()> {
        let handler = self.handler.as_ref().ok_or_else(|| PluginError::CommandFailed {
            command: self.name.clone(),
            message: "command has no handler".into(),
        })?;
        handler(args).map_err(|e| match e {
            PluginError::CommandFailed { .. } => e,
            other => PluginError::CommandFailed {
                command: self.name.clone(),
                message: other.to_string(),
            },
        })
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// Ordered list of subcommands under the host binary.
#[derive(Debug, Clone, Default)]
pub struct CommandTree {
    commands: Vec<CommandSpec>,
}

impl CommandTree {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command. No conflict checks happen here.
    pub fn add_command(&mut self, command: CommandSpec) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// All commands in insertion order.
    #[must_use]
    pub fn commands(&self) -> &[CommandSpec] {
        &self.commands
    }

    /// Find a command by name or alias.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&CommandSpec> {
        self.commands
            .iter()
            .find(|c| c.name == name || c.aliases.iter().any(|a| a == name))
    }

    /// Number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the tree is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.commands.truncate(len);
    }
}

/// Tracks ownership of command names and aliases.
#[derive(Debug, Default)]
pub struct CommandRegistrar {
    names: HashMap<String, Owner>,
    aliases: HashMap<String, Owner>,
    initialized: bool,
}

impl CommandRegistrar {
    /// Create an uninitialized registrar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the built-in commands and aliases of `tree`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LoaderContract`] if called more than once.
    pub fn initialize(&mut self, tree: &CommandTree) -> PluginResult<()> {
        if self.initialized {
            return Err(PluginError::LoaderContract(
                "command registrar initialized twice".into(),
            ));
        }
        for command in tree.commands() {
            self.names.insert(command.name.clone(), Owner::BuiltIn);
            for alias in &command.aliases {
                self.aliases.insert(alias.clone(), Owner::BuiltIn);
            }
        }
        self.initialized = true;
        debug!(
            commands = self.names.len(),
            aliases = self.aliases.len(),
            "Snapshotted built-in commands"
        );
        Ok(())
    }

    /// Whether [`initialize`](Self::initialize) has run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Let a plugin add its commands to `tree` and claim them.
    ///
    /// The plugin's callback runs first; the commands it appended are then
    /// checked as a batch. On any conflict, error or panic nothing is claimed
    /// and the tree is restored to its previous length. Returns the number of
    /// commands added.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::CommandConflict`] naming the contested name and
    /// its owner, any error from the plugin callback, [`PluginError::Panicked`]
    /// if the callback panics, or [`PluginError::LoaderContract`] if the
    /// registrar was never initialized.
    pub fn register(
        &mut self,
        plugin_id: &PluginId,
        plugin: &dyn ExtensionPlugin,
        tree: &mut CommandTree,
    ) -> PluginResult<usize> {
        if !self.initialized {
            return Err(PluginError::LoaderContract(
                "command registrar used before initialize()".into(),
            ));
        }

        let before = tree.len();
        let outcome = contain_hook(plugin_id.as_str(), "register_commands", || {
            plugin.register_commands(tree)
        })
        .and_then(std::convert::identity);
        if let Err(e) = outcome {
            tree.truncate(before);
            return Err(e);
        }

        let added = tree.commands().get(before..).unwrap_or_default();
        if added.is_empty() {
            warn!(plugin_id = %plugin_id, "Plugin command hook added no commands");
            return Ok(0);
        }

        let owner = Owner::Plugin(plugin_id.clone());
        let mut pending: HashMap<&str, &'static str> = HashMap::new();
        let mut conflict = None;

        'outer: for command in added {
            let keys = std::iter::once(("command", command.name.as_str()))
                .chain(command.aliases.iter().map(|a| ("alias", a.as_str())));
            for (kind, key) in keys {
                if let Some(existing) = self.claimed(key) {
                    conflict = Some((kind, key.to_string(), existing.to_string()));
                    break 'outer;
                }
                if pending.insert(key, kind).is_some() {
                    conflict = Some((kind, key.to_string(), owner.to_string()));
                    break 'outer;
                }
            }
        }

        if let Some((kind, name, existing)) = conflict {
            tree.truncate(before);
            return Err(PluginError::CommandConflict {
                kind,
                name,
                requested_by: plugin_id.to_string(),
                owner: existing,
            });
        }

        let count = added.len();
        for command in added {
            debug!(plugin_id = %plugin_id, command = %command.name, "Registered plugin command");
            self.names.insert(command.name.clone(), owner.clone());
            for alias in &command.aliases {
                self.aliases.insert(alias.clone(), owner.clone());
            }
        }
        Ok(count)
    }

    /// Owner of a command name or alias.
    #[must_use]
    pub fn owner_of(&self, name: &str) -> Option<&Owner> {
        self.claimed(name)
    }

    /// Claimed command names (aliases excluded) with their owners, sorted by name.
    #[must_use]
    pub fn commands(&self) -> Vec<(&str, &Owner)> {
        let mut out: Vec<_> = self.names.iter().map(|(n, o)| (n.as_str(), o)).collect();
        out.sort_unstable_by_key(|(n, _)| *n);
        out
    }

    fn claimed(&self, key: &str) -> Option<&Owner> {
        self.names.get(key).or_else(|| self.aliases.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginMetadata;

    struct CommandPlugin {
        meta: PluginMetadata,
        commands: Vec<CommandSpec>,
    }

    impl CommandPlugin {
        fn new(id: &str, commands: Vec<CommandSpec>) -> Self {
            Self {
                meta: PluginMetadata::new(id, id, "1.0.0"),
                commands,
            }
        }
    }

    #[async_trait::async_trait]
    impl ExtensionPlugin for CommandPlugin {
        fn metadata(&self) -> &PluginMetadata {
            &self.meta
        }

        fn registers_commands(&self) -> bool {
            true
        }

        fn register_commands(&self, tree: &mut CommandTree) -> PluginResult<()> {
            for c in &self.commands {
                tree.add_command(c.clone());
            }
            Ok(())
        }
    }

    /// Appends a command, then panics before returning.
    struct HalfwayPanic(PluginMetadata);

    #[async_trait::async_trait]
    impl ExtensionPlugin for HalfwayPanic {
        fn metadata(&self) -> &PluginMetadata {
            &self.0
        }

        fn register_commands(&self, tree: &mut CommandTree) -> PluginResult<()> {
            tree.add_command(CommandSpec::new("half", "Half done"));
            panic!("command table corrupted")
        }
    }

    fn base_tree() -> CommandTree {
        let mut tree = CommandTree::new();
        tree.add_command(CommandSpec::new("validate", "Validate templates").alias("check"))
            .add_command(CommandSpec::new("templates", "List templates"));
        tree
    }

    fn id(s: &str) -> PluginId {
        PluginId::from_static(s)
    }

    #[test]
    fn builtin_name_conflict_names_builtin_owner() {
        let mut tree = base_tree();
        let mut registrar = CommandRegistrar::new();
        registrar.initialize(&tree).unwrap();

        let plugin = CommandPlugin::new("p", vec![CommandSpec::new("validate", "mine")]);
        let err = registrar.register(&id("p"), &plugin, &mut tree).unwrap_err();
        match err {
            PluginError::CommandConflict {
                kind, name, owner, requested_by,
            } => {
                assert_eq!(kind, "command");
                assert_eq!(name, "validate");
                assert_eq!(owner, "built-in");
                assert_eq!(requested_by, "p");
            },
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn alias_conflicts_with_other_plugin_command() {
        let mut tree = base_tree();
        let mut registrar = CommandRegistrar::new();
        registrar.initialize(&tree).unwrap();

        let a = CommandPlugin::new("a", vec![CommandSpec::new("deploy", "Deploy")]);
        assert_eq!(registrar.register(&id("a"), &a, &mut tree).unwrap(), 1);

        let b = CommandPlugin::new(
            "b",
            vec![
                CommandSpec::new("ship", "Ship"),
                CommandSpec::new("release", "Release").alias("deploy"),
            ],
        );
        let err = registrar.register(&id("b"), &b, &mut tree).unwrap_err();
        assert!(matches!(
            err,
            PluginError::CommandConflict { kind: "alias", ref owner, .. } if owner == "a"
        ));
        // Neither of b's commands is claimed or left in the tree.
        assert!(registrar.owner_of("ship").is_none());
        assert!(tree.find("ship").is_none());
        assert_eq!(registrar.owner_of("deploy"), Some(&Owner::Plugin(id("a"))));
    }

    #[test]
    fn alias_conflicts_with_builtin_alias() {
        let mut tree = base_tree();
        let mut registrar = CommandRegistrar::new();
        registrar.initialize(&tree).unwrap();

        let p = CommandPlugin::new("p", vec![CommandSpec::new("lint", "Lint").alias("check")]);
        let err = registrar.register(&id("p"), &p, &mut tree).unwrap_err();
        assert!(err.to_string().contains("alias 'check'"));
    }

    #[test]
    fn duplicate_within_one_plugin_is_rejected() {
        let mut tree = base_tree();
        let mut registrar = CommandRegistrar::new();
        registrar.initialize(&tree).unwrap();

        let p = CommandPlugin::new(
            "p",
            vec![CommandSpec::new("gen", "A"), CommandSpec::new("other", "B").alias("gen")],
        );
        assert!(registrar.register(&id("p"), &p, &mut tree).is_err());
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn zero_commands_is_not_an_error() {
        let mut tree = base_tree();
        let mut registrar = CommandRegistrar::new();
        registrar.initialize(&tree).unwrap();

        let p = CommandPlugin::new("p", vec![]);
        assert_eq!(registrar.register(&id("p"), &p, &mut tree).unwrap(), 0);
        assert!(registrar.commands().iter().all(|(_, o)| **o == Owner::BuiltIn));
    }

    #[test]
    fn panicking_callback_leaves_tree_untouched() {
        let mut tree = base_tree();
        let mut registrar = CommandRegistrar::new();
        registrar.initialize(&tree).unwrap();

        let p = HalfwayPanic(PluginMetadata::new("p", "p", "1.0.0"));
        let err = registrar.register(&id("p"), &p, &mut tree).unwrap_err();
        assert!(matches!(
            err,
            PluginError::Panicked { ref plugin, hook: "register_commands", ref message }
                if plugin == "p" && message == "command table corrupted"
        ));
        assert_eq!(tree.len(), 2);
        assert!(tree.find("half").is_none());
        assert!(registrar.owner_of("half").is_none());

        let next = CommandPlugin::new("q", vec![CommandSpec::new("half", "Mine now")]);
        assert_eq!(registrar.register(&id("q"), &next, &mut tree).unwrap(), 1);
    }

    #[test]
    fn claimed_commands_listed_by_name() {
        let mut tree = base_tree();
        let mut registrar = CommandRegistrar::new();
        registrar.initialize(&tree).unwrap();
        let p = CommandPlugin::new("p", vec![CommandSpec::new("aaa", "first").alias("a")]);
        registrar.register(&id("p"), &p, &mut tree).unwrap();

        let listed = registrar.commands();
        assert_eq!(listed[0], ("aaa", &Owner::Plugin(id("p"))));
        assert!(listed.iter().all(|(n, _)| *n != "a"));
    }

    #[test]
    fn initialize_is_once_only() {
        let tree = base_tree();
        let mut registrar = CommandRegistrar::new();
        let mut scratch = tree.clone();
        let p = CommandPlugin::new("p", vec![]);
        assert!(matches!(
            registrar.register(&id("p"), &p, &mut scratch),
            Err(PluginError::LoaderContract(_))
        ));
        registrar.initialize(&tree).unwrap();
        assert!(registrar.initialize(&tree).is_err());
        assert_eq!(registrar.owner_of("check"), Some(&Owner::BuiltIn));
    }

    #[test]
    fn command_run_wraps_errors() {
        let spec = CommandSpec::new("boom", "fails").handler(|_| Err(PluginError::hook("nope")));
        let err = spec.run(&[]).unwrap_err();
        assert_eq!(err.to_string(), "command 'boom' failed: nope");
        assert!(CommandSpec::new("bare", "").run(&[]).is_err());
    }
}
