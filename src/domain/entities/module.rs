use serde::{Deserialize, Serialize};

/// Broad grouping used in listings and hub searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Utility,
    Entertainment,
    Dependency,
    #[serde(alias = "misc")]
    Miscellaneous,
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Utility => "utility",
            Category::Entertainment => "entertainment",
            Category::Dependency => "dependency",
            Category::Miscellaneous => "miscellaneous",
        }
    }

    /// Label shown to chat users
    pub fn label(&self) -> &str {
        match self {
            Category::Utility => "Utility",
            Category::Entertainment => "Entertainment",
            Category::Dependency => "Dependency",
            Category::Miscellaneous => "Miscellaneous",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "utility" => Some(Category::Utility),
            "entertainment" => Some(Category::Entertainment),
            "dependency" => Some(Category::Dependency),
            "misc" | "miscellaneous" => Some(Category::Miscellaneous),
            _ => None,
        }
    }
}

/// Metadata record describing one module.
///
/// Serialized field names follow the sidecar `metadata.json` layout, which
/// is shared with the hub.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    #[serde(default = "unknown")]
    pub name: String,

    /// Unique dotted identifier, e.g. `module.help_desk`
    pub pack: String,

    #[serde(default = "unknown")]
    pub version: String,

    #[serde(default, rename = "author")]
    pub authors: Vec<String>,

    /// True when a requirements sidecar lists third-party packages
    #[serde(default, alias = "pypi")]
    pub has_remote_dependencies: bool,

    #[serde(default)]
    pub category: Category,

    #[serde(default)]
    pub description: String,

    #[serde(default, rename = "dependency")]
    pub dependencies: Option<Vec<String>>,

    #[serde(default = "enabled")]
    pub loaded: bool,

    #[serde(default)]
    pub hidden: bool,

    /// When set, runtime toggling of `loaded` is rejected
    #[serde(default, rename = "overrideLoad")]
    pub pinned_load: Option<bool>,

    /// When set, per-group enable/disable is rejected
    #[serde(default, rename = "overrideSwitch")]
    pub pinned_switch: Option<bool>,
}

fn unknown() -> String {
    "Unknown".to_string()
}

fn enabled() -> bool {
    true
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>, pack: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pack: pack.into(),
            version: unknown(),
            authors: Vec::new(),
            has_remote_dependencies: false,
            category: Category::default(),
            description: String::new(),
            dependencies: None,
            loaded: true,
            hidden: false,
            pinned_load: None,
            pinned_switch: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = Some(dependencies);
        self
    }

    pub fn with_loaded(mut self, loaded: bool) -> Self {
        self.loaded = loaded;
        self
    }

    pub fn with_pinned_load(mut self, pinned: bool) -> Self {
        self.pinned_load = Some(pinned);
        self
    }

    pub fn with_pinned_switch(mut self, pinned: bool) -> Self {
        self.pinned_switch = Some(pinned);
        self
    }

    /// Declared module dependencies, empty when none
    pub fn dependency_list(&self) -> &[String] {
        self.dependencies.as_deref().unwrap_or(&[])
    }

    /// Checks the invariants deserialization alone cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.pack.trim().is_empty() {
            return Err("pack must not be empty".to_string());
        }
        if self.pack.chars().any(char::is_whitespace) {
            return Err(format!("pack '{}' contains whitespace", self.pack));
        }
        if self.pack.starts_with('.') || self.pack.ends_with('.') {
            return Err(format!("pack '{}' is not a dotted identifier", self.pack));
        }
        Ok(())
    }

    /// Multi-line summary used by listings and hub search replies
    pub fn details(&self, index: usize) -> String {
        let dependencies = match self.dependency_list() {
            [] => "None".to_string(),
            deps => deps.join(", "),
        };
        format!(
            "{}. {}\n - Pack: {}\n - Version: {}\n - Authors: {}\n - Category: {}\n - Description: {}\n - Dependencies: {}",
            index,
            self.name,
            self.pack,
            self.version,
            self.authors.join(", "),
            self.category.label(),
            self.description,
            dependencies,
        )
    }
}

/// Optional filters for catalog and hub searches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    pub name: Option<String>,
    pub pack: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
    pub has_remote_dependencies: Option<bool>,
    pub category: Option<Category>,
    pub dependency: Option<String>,
    pub loaded: Option<bool>,
}

impl SearchCriteria {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn by_pack(pack: impl Into<String>) -> Self {
        Self {
            pack: Some(pack.into()),
            ..Self::default()
        }
    }

    /// Name or pack, the lookup shorthand used by `get`
    pub fn by_identifier(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            name: Some(value.clone()),
            pack: Some(value),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.pack.is_none()
            && self.version.is_none()
            && self.author.is_none()
            && self.has_remote_dependencies.is_none()
            && self.category.is_none()
            && self.dependency.is_none()
            && self.loaded.is_none()
    }
}
