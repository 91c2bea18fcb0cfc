use super::PermissionError;
use std::fmt;

/// Which permission record a capability is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    System,
    Account,
    Cookbook,
    App,
}

impl Shape {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Account => "account",
            Self::Cookbook => "cookbook",
            Self::App => "app",
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ViewCookbooks,
    ViewApps,
    CreateCookbook,
    CreateApp,
    EditApp,
    AdministerAccount,
    EditCookbook,
    SharedApp,
    IndividualApp,
    AclApp,
    AdministerSystem,
}

impl Capability {
    pub const ALL: [Capability; 11] = [
        Self::ViewCookbooks,
        Self::ViewApps,
        Self::CreateCookbook,
        Self::CreateApp,
        Self::EditApp,
        Self::AdministerAccount,
        Self::EditCookbook,
        Self::SharedApp,
        Self::IndividualApp,
        Self::AclApp,
        Self::AdministerSystem,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ViewCookbooks => "view_cookbook",
            Self::ViewApps => "view_app",
            Self::CreateCookbook => "create_cookbook",
            Self::CreateApp => "create_app",
            Self::EditApp => "edit_app",
            Self::AdministerAccount => "admin_account",
            Self::EditCookbook => "edit_cookbook",
            Self::SharedApp => "shared_app",
            Self::IndividualApp => "individual_app",
            Self::AclApp => "acl_app",
            Self::AdministerSystem => "admin_system",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, PermissionError> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|cap| cap.as_str() == normalized)
            .ok_or_else(|| PermissionError::UnknownCapability(raw.to_string()))
    }

    pub fn shape(self) -> Shape {
        match self {
            Self::ViewCookbooks
            | Self::ViewApps
            | Self::CreateCookbook
            | Self::CreateApp
            | Self::EditApp
            | Self::AdministerAccount => Shape::Account,
            Self::EditCookbook => Shape::Cookbook,
            Self::SharedApp | Self::IndividualApp | Self::AclApp => Shape::App,
            Self::AdministerSystem => Shape::System,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemGrant {
    pub can_administer: bool,
    pub is_owner: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountGrant {
    pub can_administer: bool,
    pub can_create_apps: bool,
    pub can_view_apps: bool,
    pub can_create_cookbooks: bool,
    pub can_view_cookbooks: bool,
    pub is_owner: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CookbookGrant {
    /// Stored with the record only. Viewing is checked through the account's
    /// `view_cookbooks` capability, so `allows` never reads it.
    pub can_view: bool,
    pub can_edit: bool,
    pub is_owner: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppGrant {
    pub can_shared: bool,
    pub can_individual: bool,
    pub can_administer: bool,
    pub is_owner: bool,
}

// Ownership only counts where a capability's own rule names it.

impl SystemGrant {
    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::AdministerSystem => self.can_administer || self.is_owner,
            _ => false,
        }
    }
}

impl AccountGrant {
    pub fn allows(&self, capability: Capability) -> bool {
        let admin = self.can_administer || self.is_owner;
        match capability {
            Capability::ViewCookbooks => self.can_view_cookbooks || admin,
            Capability::ViewApps => self.can_view_apps || admin,
            Capability::CreateCookbook => self.can_create_cookbooks || admin,
            Capability::CreateApp => self.can_create_apps || admin,
            Capability::EditApp | Capability::AdministerAccount => admin,
            _ => false,
        }
    }
}

impl CookbookGrant {
    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::EditCookbook => self.can_edit || self.is_owner,
            _ => false,
        }
    }
}

impl AppGrant {
    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::SharedApp => self.can_shared,
            Capability::IndividualApp => self.can_individual,
            Capability::AclApp => self.can_administer || self.is_owner,
            _ => false,
        }
    }
}

// `grant` sets the flag `allows` reads for a capability of the record's shape
// and ignores capabilities of other shapes.

impl SystemGrant {
    pub fn grant(&mut self, capability: Capability) {
        if capability == Capability::AdministerSystem {
            self.can_administer = true;
        }
    }
}

impl AccountGrant {
    pub fn grant(&mut self, capability: Capability) {
        match capability {
            Capability::ViewCookbooks => self.can_view_cookbooks = true,
            Capability::ViewApps => self.can_view_apps = true,
            Capability::CreateCookbook => self.can_create_cookbooks = true,
            Capability::CreateApp => self.can_create_apps = true,
            Capability::EditApp | Capability::AdministerAccount => self.can_administer = true,
            _ => {}
        }
    }
}

impl CookbookGrant {
    pub fn grant(&mut self, capability: Capability) {
        if capability == Capability::EditCookbook {
            self.can_edit = true;
        }
    }
}

impl AppGrant {
    pub fn grant(&mut self, capability: Capability) {
        match capability {
            Capability::SharedApp => self.can_shared = true,
            Capability::IndividualApp => self.can_individual = true,
            Capability::AclApp => self.can_administer = true,
            _ => {}
        }
    }
}
