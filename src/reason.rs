use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Why a start, reload or stop of the filtering service was requested.
///
/// The set is closed: consumers match exhaustively so a new trigger type
/// cannot be silently ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    // Lifecycle
    #[serde(rename = "ui")]
    UI,
    Prepared,
    Receiver,
    CallState,
    Foreground,
    Background,

    // Connectivity
    InteractiveStateChanged,
    LinkPropertiesChanged,
    DataConnectionStateChanged,
    ConnectivityChanged,
    ConnectedStateChanged,
    UnmeteredStateChanged,
    GenerationChanged,
    IdleStateChanged,
    NetworkAvailable,
    NetworkLost,

    // Rules and data
    HostsFileDownload,
    PackageAdded,
    PackageDeleted,
    PermissionGranted,
    HostsImport,
    ChangedNotify,
    ChangedFilter,
    AllowHost,
    BlockHost,
    ResetHost,
    RuleChanged,
    Import,

    // Operational
    Tile,
    Widget,
    Notification,
    Lockdown,
    Pull,
    Forwarding,
    DnsCleanup,
    DnsClear,
    /// A setting changed; the subject names the preference.
    Changed(String),
    /// A shortcut for the given package was launched.
    LaunchShortcut(String),
    SwitchOff,
}

/// Coarse grouping of reasons, used for coalescing diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Lifecycle,
    Connectivity,
    RuleData,
    Operational,
}

/// What the producer asks of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Start,
    Reload,
    Stop,
}

/// User-facing triggers may extend an open debounce window; background
/// triggers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Background,
    User,
}

/// Every parameterless reason, in declaration order.
pub const SIMPLE_REASONS: &[Reason] = &[
    Reason::UI,
    Reason::Prepared,
    Reason::Receiver,
    Reason::CallState,
    Reason::Foreground,
    Reason::Background,
    Reason::InteractiveStateChanged,
    Reason::LinkPropertiesChanged,
    Reason::DataConnectionStateChanged,
    Reason::ConnectivityChanged,
    Reason::ConnectedStateChanged,
    Reason::UnmeteredStateChanged,
    Reason::GenerationChanged,
    Reason::IdleStateChanged,
    Reason::NetworkAvailable,
    Reason::NetworkLost,
    Reason::HostsFileDownload,
    Reason::PackageAdded,
    Reason::PackageDeleted,
    Reason::PermissionGranted,
    Reason::HostsImport,
    Reason::ChangedNotify,
    Reason::ChangedFilter,
    Reason::AllowHost,
    Reason::BlockHost,
    Reason::ResetHost,
    Reason::RuleChanged,
    Reason::Import,
    Reason::Tile,
    Reason::Widget,
    Reason::Notification,
    Reason::Lockdown,
    Reason::Pull,
    Reason::Forwarding,
    Reason::DnsCleanup,
    Reason::DnsClear,
    Reason::SwitchOff,
];

impl Reason {
    /// Human-readable label for logs.
    pub fn describe(&self) -> String {
        match self {
            Reason::Changed(subject) => format!("changed {}", subject),
            Reason::LaunchShortcut(package) => format!("shortcut launch {}", package),
            other => other.label().to_string(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Reason::UI => "UI",
            Reason::Prepared => "prepared",
            Reason::Receiver => "receiver",
            Reason::CallState => "call state",
            Reason::Foreground => "foreground",
            Reason::Background => "background",
            Reason::InteractiveStateChanged => "interactive state changed",
            Reason::LinkPropertiesChanged => "link properties changed",
            Reason::DataConnectionStateChanged => "data connection state changed",
            Reason::ConnectivityChanged => "connectivity changed",
            Reason::ConnectedStateChanged => "connected state changed",
            Reason::UnmeteredStateChanged => "unmetered state changed",
            Reason::GenerationChanged => "generation changed",
            Reason::IdleStateChanged => "idle state changed",
            Reason::NetworkAvailable => "network available",
            Reason::NetworkLost => "network lost",
            Reason::HostsFileDownload => "hosts file download",
            Reason::PackageAdded => "package added",
            Reason::PackageDeleted => "package deleted",
            Reason::PermissionGranted => "permission granted",
            Reason::HostsImport => "hosts import",
            Reason::ChangedNotify => "changed notify",
            Reason::ChangedFilter => "changed filter",
            Reason::AllowHost => "allow host",
            Reason::BlockHost => "block host",
            Reason::ResetHost => "reset host",
            Reason::RuleChanged => "rule changed",
            Reason::Import => "import",
            Reason::Tile => "tile",
            Reason::Widget => "widget",
            Reason::Notification => "notification",
            Reason::Lockdown => "lockdown",
            Reason::Pull => "pull",
            Reason::Forwarding => "forwarding",
            Reason::DnsCleanup => "DNS cleanup",
            Reason::DnsClear => "DNS cleared",
            Reason::Changed(_) => "changed",
            Reason::LaunchShortcut(_) => "shortcut launch",
            Reason::SwitchOff => "switch off",
        }
    }

    /// Machine name, matching the serde representation.
    pub fn name(&self) -> &'static str {
        match self {
            Reason::UI => "ui",
            Reason::Prepared => "prepared",
            Reason::Receiver => "receiver",
            Reason::CallState => "call_state",
            Reason::Foreground => "foreground",
            Reason::Background => "background",
            Reason::InteractiveStateChanged => "interactive_state_changed",
            Reason::LinkPropertiesChanged => "link_properties_changed",
            Reason::DataConnectionStateChanged => "data_connection_state_changed",
            Reason::ConnectivityChanged => "connectivity_changed",
            Reason::ConnectedStateChanged => "connected_state_changed",
            Reason::UnmeteredStateChanged => "unmetered_state_changed",
            Reason::GenerationChanged => "generation_changed",
            Reason::IdleStateChanged => "idle_state_changed",
            Reason::NetworkAvailable => "network_available",
            Reason::NetworkLost => "network_lost",
            Reason::HostsFileDownload => "hosts_file_download",
            Reason::PackageAdded => "package_added",
            Reason::PackageDeleted => "package_deleted",
            Reason::PermissionGranted => "permission_granted",
            Reason::HostsImport => "hosts_import",
            Reason::ChangedNotify => "changed_notify",
            Reason::ChangedFilter => "changed_filter",
            Reason::AllowHost => "allow_host",
            Reason::BlockHost => "block_host",
            Reason::ResetHost => "reset_host",
            Reason::RuleChanged => "rule_changed",
            Reason::Import => "import",
            Reason::Tile => "tile",
            Reason::Widget => "widget",
            Reason::Notification => "notification",
            Reason::Lockdown => "lockdown",
            Reason::Pull => "pull",
            Reason::Forwarding => "forwarding",
            Reason::DnsCleanup => "dns_cleanup",
            Reason::DnsClear => "dns_clear",
            Reason::Changed(_) => "changed",
            Reason::LaunchShortcut(_) => "launch_shortcut",
            Reason::SwitchOff => "switch_off",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Reason::UI
            | Reason::Prepared
            | Reason::Receiver
            | Reason::CallState
            | Reason::Foreground
            | Reason::Background => Category::Lifecycle,

            Reason::InteractiveStateChanged
            | Reason::LinkPropertiesChanged
            | Reason::DataConnectionStateChanged
            | Reason::ConnectivityChanged
            | Reason::ConnectedStateChanged
            | Reason::UnmeteredStateChanged
            | Reason::GenerationChanged
            | Reason::IdleStateChanged
            | Reason::NetworkAvailable
            | Reason::NetworkLost => Category::Connectivity,

            Reason::HostsFileDownload
            | Reason::PackageAdded
            | Reason::PackageDeleted
            | Reason::PermissionGranted
            | Reason::HostsImport
            | Reason::ChangedNotify
            | Reason::ChangedFilter
            | Reason::AllowHost
            | Reason::BlockHost
            | Reason::ResetHost
            | Reason::RuleChanged
            | Reason::Import => Category::RuleData,

            Reason::Tile
            | Reason::Widget
            | Reason::Notification
            | Reason::Lockdown
            | Reason::Pull
            | Reason::Forwarding
            | Reason::DnsCleanup
            | Reason::DnsClear
            | Reason::Changed(_)
            | Reason::LaunchShortcut(_)
            | Reason::SwitchOff => Category::Operational,
        }
    }

    /// Command implied by the reason when the producer does not give one.
    pub fn default_command(&self) -> Command {
        match self {
            Reason::SwitchOff | Reason::Import => Command::Stop,
            Reason::UI | Reason::Prepared | Reason::Receiver => Command::Start,
            _ => Command::Reload,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            Reason::UI
            | Reason::Tile
            | Reason::Widget
            | Reason::Notification
            | Reason::Pull
            | Reason::LaunchShortcut(_) => Priority::User,
            _ => Priority::Background,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Error returned when a reason name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reason: {0}")]
pub struct UnknownReason(pub String);

impl FromStr for Reason {
    type Err = UnknownReason;

    /// Accepts machine names (`rule_changed`) and the parameterised forms
    /// `changed:<subject>` and `launch_shortcut:<package>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((kind, arg)) = s.split_once(':') {
            let arg = arg.trim();
            if arg.is_empty() {
                return Err(UnknownReason(s.to_string()));
            }
            return match kind.trim().to_ascii_lowercase().as_str() {
                "changed" => Ok(Reason::Changed(arg.to_string())),
                "launch_shortcut" => Ok(Reason::LaunchShortcut(arg.to_string())),
                _ => Err(UnknownReason(s.to_string())),
            };
        }

        let lowered = s.to_ascii_lowercase();
        SIMPLE_REASONS
            .iter()
            .find(|reason| reason.name() == lowered)
            .cloned()
            .ok_or_else(|| UnknownReason(s.to_string()))
    }
}

impl FromStr for Command {
    type Err = UnknownReason;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "reload" => Ok(Command::Reload),
            "stop" => Ok(Command::Stop),
            other => Err(UnknownReason(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reasons() {
        assert_eq!(Reason::SwitchOff.default_command(), Command::Stop);
        assert_eq!(Reason::Import.default_command(), Command::Stop);
        assert_eq!(Reason::UI.default_command(), Command::Start);
        assert_eq!(Reason::RuleChanged.default_command(), Command::Reload);
        assert_eq!(
            Reason::Changed("filter_udp".into()).default_command(),
            Command::Reload
        );
    }

    #[test]
    fn test_describe() {
        assert_eq!(Reason::SwitchOff.describe(), "switch off");
        assert_eq!(Reason::DnsClear.describe(), "DNS cleared");
        assert_eq!(
            Reason::Changed("whitelist_wifi".into()).describe(),
            "changed whitelist_wifi"
        );
        assert_eq!(
            Reason::LaunchShortcut("org.example".into()).to_string(),
            "shortcut launch org.example"
        );
    }

    #[test]
    fn test_equality_includes_subject() {
        assert_eq!(Reason::Changed("a".into()), Reason::Changed("a".into()));
        assert_ne!(Reason::Changed("a".into()), Reason::Changed("b".into()));
        assert_ne!(Reason::PackageAdded, Reason::PackageDeleted);
    }

    #[test]
    fn test_categories() {
        assert_eq!(Reason::UI.category(), Category::Lifecycle);
        assert_eq!(Reason::NetworkLost.category(), Category::Connectivity);
        assert_eq!(Reason::UnmeteredStateChanged.category(), Category::Connectivity);
        assert_eq!(Reason::PackageAdded.category(), Category::RuleData);
        assert_eq!(Reason::DnsCleanup.category(), Category::Operational);
    }

    #[test]
    fn test_priority() {
        assert_eq!(Reason::UI.priority(), Priority::User);
        assert_eq!(Reason::Tile.priority(), Priority::User);
        assert_eq!(Reason::ConnectivityChanged.priority(), Priority::Background);
        assert!(Priority::User > Priority::Background);
    }

    #[test]
    fn test_parse_every_simple_reason_by_name() {
        for reason in SIMPLE_REASONS {
            assert_eq!(&reason.name().parse::<Reason>().unwrap(), reason);
        }
    }

    #[test]
    fn test_parse_parameterised_reasons() {
        assert_eq!(
            "changed:log_app".parse::<Reason>().unwrap(),
            Reason::Changed("log_app".into())
        );
        assert_eq!(
            "launch_shortcut:org.example".parse::<Reason>().unwrap(),
            Reason::LaunchShortcut("org.example".into())
        );
        assert!("changed:".parse::<Reason>().is_err());
        assert!("bogus".parse::<Reason>().is_err());
        assert_eq!("STOP".parse::<Command>().unwrap(), Command::Stop);
    }

    #[test]
    fn test_serde_names_match() {
        let json = serde_json::to_string(&Reason::PackageAdded).unwrap();
        assert_eq!(json, "\"package_added\"");
        let json = serde_json::to_string(&Reason::UI).unwrap();
        assert_eq!(json, "\"ui\"");
        let back: Reason = serde_json::from_str("{\"changed\":\"theme\"}").unwrap();
        assert_eq!(back, Reason::Changed("theme".into()));
    }
}
