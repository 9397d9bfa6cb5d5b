//! Module service - the command-level façade over the module manager

use std::sync::Arc;
use crate::application::messaging::parser::ModuleCommand;
use crate::application::modules::{InstallEngine, LifecycleController};
use crate::domain::entities::{ModuleDescriptor, ModuleVerb, SearchCriteria};
use crate::domain::traits::{HubClient, SwitchStore};

const REPORT_SEPARATOR: &str = "\n===============\n";

/// Executes parsed module commands and renders the chat reply
pub struct ModuleService {
    lifecycle: Arc<LifecycleController>,
    installer: Arc<InstallEngine>,
    hub: Arc<dyn HubClient>,
    switches: Arc<dyn SwitchStore>,
    hub_enabled: bool,
}

impl ModuleService {
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        installer: Arc<InstallEngine>,
        hub: Arc<dyn HubClient>,
        switches: Arc<dyn SwitchStore>,
        hub_enabled: bool,
    ) -> Self {
        Self {
            lifecycle,
            installer,
            hub,
            switches,
            hub_enabled,
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    /// Run one command issued from `group` (`None` for a direct chat)
    pub async fn execute(&self, command: &ModuleCommand, group: Option<&str>) -> String {
        if command.verb.needs_hub() && !self.hub_enabled {
            return "Hub service is not enabled".to_string();
        }
        tracing::info!("Module command {} {:?}", command.verb.name(), command.args);

        match command.verb {
            ModuleVerb::Install => {
                if command.args.is_empty() {
                    return usage(command.verb);
                }
                self.install_many(&command.args, command.upgrade).await
            }
            ModuleVerb::Upgrade if command.args.is_empty() => self.upgrade_all(command.force).await,
            ModuleVerb::Upgrade => self.install_many(&command.args, true).await,
            ModuleVerb::Search => {
                self.search_hub(command.args.first().map(String::as_str), command).await
            }
            ModuleVerb::List => self.lifecycle.list(group).await,
            ModuleVerb::Enable => self.switch(&command.args, group, true).await,
            ModuleVerb::Disable => self.switch(&command.args, group, false).await,
            ModuleVerb::Uninstall | ModuleVerb::Load | ModuleVerb::Unload | ModuleVerb::Reload => {
                if command.args.is_empty() {
                    return usage(command.verb);
                }
                let mut replies = Vec::with_capacity(command.args.len());
                for name in &command.args {
                    let reply = match command.verb {
                        ModuleVerb::Uninstall => self.lifecycle.uninstall(name).await,
                        ModuleVerb::Load => self.lifecycle.load(name).await,
                        ModuleVerb::Unload => self.lifecycle.unload(name).await,
                        _ => self.lifecycle.reload(name).await,
                    };
                    replies.push(reply);
                }
                replies.join(REPORT_SEPARATOR)
            }
        }
    }

    /// Install each name in turn, one report per name
    pub async fn install_many(&self, names: &[String], upgrade: bool) -> String {
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            let report = self.installer.install(name, upgrade, "", false).await;
            reports.push(report.render());
        }
        reports.join(REPORT_SEPARATOR)
    }

    /// Upgrade every catalogued module whose hub version differs, or all of
    /// them when forced
    pub async fn upgrade_all(&self, force: bool) -> String {
        if let Err(e) = self.lifecycle.refresh().await {
            return format!("Error while reading installed modules:\n{}", e);
        }
        let installed: Vec<ModuleDescriptor> = self.lifecycle.catalog().read().await.all().to_vec();

        let mut reports = Vec::new();
        for local in installed {
            let remote = match self.hub.search(&SearchCriteria::by_pack(local.pack.clone())).await {
                Ok(found) => found.into_iter().find(|m| m.pack == local.pack),
                Err(e) => {
                    tracing::warn!("Hub lookup of {} failed: {}", local.pack, e);
                    continue;
                }
            };
            let Some(remote) = remote else {
                continue;
            };
            if remote.version == local.version && !force {
                continue;
            }
            tracing::info!("Upgrading {} {} -> {}", local.pack, local.version, remote.version);
            let report = self.installer.install(&local.pack, true, &remote.version, false).await;
            reports.push(report.render());
        }

        if reports.is_empty() {
            return "No updates available".to_string();
        }
        reports.join(REPORT_SEPARATOR)
    }

    /// Query the hub; no criteria at all lists everything it has
    pub async fn search_hub(&self, name: Option<&str>, command: &ModuleCommand) -> String {
        let mut criteria = SearchCriteria {
            name: name.map(str::to_string),
            category: command.category,
            author: command.author.clone(),
            ..SearchCriteria::default()
        };
        if criteria.is_empty() {
            criteria.name = Some("*".to_string());
        }

        match self.hub.search(&criteria).await {
            Ok(found) if found.is_empty() => "No matching module found".to_string(),
            Ok(found) => {
                let mut sections = vec![format!("Found {} modules", found.len())];
                sections.extend(found.iter().enumerate().map(|(i, m)| m.details(i + 1)));
                sections.join(REPORT_SEPARATOR)
            }
            Err(e) => {
                tracing::error!("Hub search failed: {}", e);
                format!("Error while searching the hub:\n{}", e)
            }
        }
    }

    /// Set the per-group switch of each named module
    pub async fn switch(&self, names: &[String], group: Option<&str>, value: bool) -> String {
        let action = if value { "Enabled" } else { "Disabled" };
        if names.is_empty() {
            return usage(if value { ModuleVerb::Enable } else { ModuleVerb::Disable });
        }
        if let Err(e) = self.lifecycle.refresh().await {
            return format!("Error while reading installed modules:\n{}", e);
        }

        let mut changed = 0;
        let mut rejected = Vec::new();
        for name in names {
            let descriptor = self.lifecycle.catalog().read().await.get(name).cloned();
            let Some(descriptor) = descriptor else {
                rejected.push(name.clone());
                continue;
            };
            if descriptor.pack == self.lifecycle.manager_pack() || descriptor.pinned_switch.is_some() {
                rejected.push(name.clone());
                continue;
            }
            match self.switches.update(&descriptor.pack, group, value).await {
                Ok(()) => changed += 1,
                Err(e) => {
                    tracing::error!("Failed to store switch of {}: {}", descriptor.pack, e);
                    rejected.push(name.clone());
                }
            }
        }

        let mut reply = format!("{} {} modules", action, changed);
        if !rejected.is_empty() {
            reply.push_str(&format!("\nCould not change: {}", rejected.join(", ")));
        }
        reply
    }
}

fn usage(verb: ModuleVerb) -> String {
    match verb {
        ModuleVerb::Install => "Usage: install <name>... [-u]".to_string(),
        ModuleVerb::Upgrade => "Usage: upgrade [name]... [-f]".to_string(),
        ModuleVerb::Search => "Usage: search [name] [-c category] [-a author]".to_string(),
        ModuleVerb::List => "Usage: list".to_string(),
        other => format!("Usage: {} <name>...", other.name()),
    }
}

/// Overview of every verb
pub fn help() -> String {
    ModuleVerb::ALL
        .iter()
        .map(|verb| usage(*verb))
        .collect::<Vec<_>>()
        .join("\n")
}
