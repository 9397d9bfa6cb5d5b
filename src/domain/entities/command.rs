use super::UserPerm;

/// Verbs understood by the module manager command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleVerb {
    Install,
    Uninstall,
    Load,
    Reload,
    Unload,
    Search,
    Upgrade,
    List,
    Enable,
    Disable,
}

impl ModuleVerb {
    pub const ALL: [ModuleVerb; 10] = [
        ModuleVerb::Install,
        ModuleVerb::Uninstall,
        ModuleVerb::Load,
        ModuleVerb::Reload,
        ModuleVerb::Unload,
        ModuleVerb::Search,
        ModuleVerb::Upgrade,
        ModuleVerb::List,
        ModuleVerb::Enable,
        ModuleVerb::Disable,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModuleVerb::Install => "install",
            ModuleVerb::Uninstall => "uninstall",
            ModuleVerb::Load => "load",
            ModuleVerb::Reload => "reload",
            ModuleVerb::Unload => "unload",
            ModuleVerb::Search => "search",
            ModuleVerb::Upgrade => "upgrade",
            ModuleVerb::List => "list",
            ModuleVerb::Enable => "enable",
            ModuleVerb::Disable => "disable",
        }
    }

    /// Localized spellings accepted besides the English name
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            ModuleVerb::Install => &["安装"],
            ModuleVerb::Uninstall => &["删除"],
            ModuleVerb::Load => &["加载"],
            ModuleVerb::Reload => &["重载"],
            ModuleVerb::Unload => &["卸载"],
            ModuleVerb::Search => &["搜索"],
            ModuleVerb::Upgrade => &["升级"],
            ModuleVerb::List => &["列表", "枚举"],
            ModuleVerb::Enable => &["开启", "打开"],
            ModuleVerb::Disable => &["禁用", "关闭"],
        }
    }

    /// Minimum tier allowed to issue this verb
    pub fn required_permission(&self) -> UserPerm {
        match self {
            ModuleVerb::List | ModuleVerb::Enable | ModuleVerb::Disable => UserPerm::Administrator,
            _ => UserPerm::BotOwner,
        }
    }

    /// Verbs that talk to the hub
    pub fn needs_hub(&self) -> bool {
        matches!(self, ModuleVerb::Install | ModuleVerb::Search | ModuleVerb::Upgrade)
    }

    pub fn matches(&self, input: &str) -> bool {
        let input_lower = input.to_lowercase();
        self.name() == input_lower || self.aliases().iter().any(|a| *a == input)
    }

    pub fn parse(input: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.matches(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names_and_aliases() {
        assert_eq!(ModuleVerb::parse("install"), Some(ModuleVerb::Install));
        assert_eq!(ModuleVerb::parse("RELOAD"), Some(ModuleVerb::Reload));
        assert_eq!(ModuleVerb::parse("枚举"), Some(ModuleVerb::List));
        assert_eq!(ModuleVerb::parse("关闭"), Some(ModuleVerb::Disable));
        assert_eq!(ModuleVerb::parse("frobnicate"), None);
    }

    #[test]
    fn test_permission_tiers() {
        assert_eq!(ModuleVerb::Install.required_permission(), UserPerm::BotOwner);
        assert_eq!(ModuleVerb::Unload.required_permission(), UserPerm::BotOwner);
        assert_eq!(ModuleVerb::List.required_permission(), UserPerm::Administrator);
        assert_eq!(ModuleVerb::Disable.required_permission(), UserPerm::Administrator);
    }
}
