use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a setup-handler category (adapter, protocol, service, client).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(Uuid);

impl ClassId {
    /// Network adapters.
    pub const NET: ClassId = ClassId(Uuid::from_u128(0x4d36e972_e325_11ce_bfc1_08002be10318));
    /// Network clients.
    pub const NET_CLIENT: ClassId =
        ClassId(Uuid::from_u128(0x4d36e973_e325_11ce_bfc1_08002be10318));
    /// Network services.
    pub const NET_SERVICE: ClassId =
        ClassId(Uuid::from_u128(0x4d36e974_e325_11ce_bfc1_08002be10318));
    /// Network transports (protocols).
    pub const NET_TRANS: ClassId = ClassId(Uuid::from_u128(0x4d36e975_e325_11ce_bfc1_08002be10318));

    pub const BUILTIN: [ClassId; 4] = [
        ClassId::NET,
        ClassId::NET_CLIENT,
        ClassId::NET_SERVICE,
        ClassId::NET_TRANS,
    ];

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short alias for built-in classes.
    pub fn alias(&self) -> Option<&'static str> {
        const ALIASES: [&str; 4] = ["adapter", "client", "service", "protocol"];
        ClassId::BUILTIN
            .iter()
            .position(|c| c == self)
            .map(|i| ALIASES[i])
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.hyphenated())
    }
}

impl FromStr for ClassId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adapter" | "net" => return Ok(ClassId::NET),
            "client" => return Ok(ClassId::NET_CLIENT),
            "service" => return Ok(ClassId::NET_SERVICE),
            "protocol" | "transport" => return Ok(ClassId::NET_TRANS),
            _ => {}
        }
        let trimmed = s.trim_start_matches('{').trim_end_matches('}');
        Uuid::parse_str(trimmed)
            .map(ClassId)
            .map_err(|e| format!("invalid class id '{s}': {e}"))
    }
}

/// Who authorized a configuration change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OboActor {
    User,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OboToken {
    pub actor: OboActor,
}

impl OboToken {
    pub const fn user() -> Self {
        Self {
            actor: OboActor::User,
        }
    }
}

/// Unattended-setup answer file passed to class installers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerFile {
    pub path: PathBuf,
    pub section: String,
}

/// A component to install. `inf_path`, when present, is staged into the
/// system package store before the configuration store is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDescriptor {
    pub component_id: String,
    pub class_id: ClassId,
    pub inf_path: Option<PathBuf>,
}

impl ComponentDescriptor {
    pub fn new(component_id: impl Into<String>, class_id: ClassId) -> Self {
        Self {
            component_id: component_id.into(),
            class_id,
            inf_path: None,
        }
    }

    #[must_use]
    pub fn with_inf(mut self, inf_path: impl Into<PathBuf>) -> Self {
        self.inf_path = Some(inf_path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_id_parses_aliases() {
        assert_eq!("adapter".parse::<ClassId>().unwrap(), ClassId::NET);
        assert_eq!("Protocol".parse::<ClassId>().unwrap(), ClassId::NET_TRANS);
        assert_eq!("service".parse::<ClassId>().unwrap(), ClassId::NET_SERVICE);
    }

    #[test]
    fn class_id_parses_braced_and_bare_uuid() {
        let braced: ClassId = "{4D36E972-E325-11CE-BFC1-08002BE10318}".parse().unwrap();
        let bare: ClassId = "4d36e972-e325-11ce-bfc1-08002be10318".parse().unwrap();
        assert_eq!(braced, ClassId::NET);
        assert_eq!(bare, ClassId::NET);
    }

    #[test]
    fn class_id_rejects_garbage() {
        let err = "not-a-class".parse::<ClassId>().unwrap_err();
        assert!(err.contains("not-a-class"));
    }

    #[test]
    fn class_id_display_is_braced() {
        assert_eq!(
            ClassId::NET_TRANS.to_string(),
            "{4d36e975-e325-11ce-bfc1-08002be10318}"
        );
        assert_eq!(ClassId::NET_TRANS.alias(), Some("protocol"));
    }

    #[test]
    fn descriptor_builder() {
        let d = ComponentDescriptor::new("ms_tap", ClassId::NET).with_inf("/tmp/tap.inf");
        assert_eq!(d.component_id, "ms_tap");
        assert_eq!(d.inf_path.as_deref(), Some(std::path::Path::new("/tmp/tap.inf")));
    }

    #[test]
    fn obo_token_is_user() {
        assert_eq!(OboToken::user().actor, OboActor::User);
    }
}
