//! Role selection: a GPIO read at boot picks Server or Client, latched
//! until reboot.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Reads the boot-time role pin. A pull-down input: high reads `Server`,
/// low reads `Client`.
pub trait RoleSelector {
    fn read_role(&self) -> Role;
}

/// Real hardware would sample a GPIO here; this crate names the interface
/// and ships a selector driven by a fixed value so a host build can choose
/// the role from configuration or a CLI flag instead.
pub struct FixedRoleSelector(pub Role);

impl RoleSelector for FixedRoleSelector {
    fn read_role(&self) -> Role {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_high_selects_server() {
        let selector = FixedRoleSelector(Role::Server);
        assert_eq!(selector.read_role(), Role::Server);
    }

    #[test]
    fn toggle_low_selects_client() {
        let selector = FixedRoleSelector(Role::Client);
        assert_eq!(selector.read_role(), Role::Client);
    }
}
