use serde::{Deserialize, Serialize};

/// Advertising platform account an audience can be synced to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cabinet {
    Yandex,
    Facebook,
    Google,
}

impl Cabinet {
    pub const ALL: [Cabinet; 3] = [Cabinet::Yandex, Cabinet::Facebook, Cabinet::Google];

    /// Parse a `cabinet_name` from the wire. Exact, lowercase match only.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "yandex" => Some(Cabinet::Yandex),
            "facebook" => Some(Cabinet::Facebook),
            "google" => Some(Cabinet::Google),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Cabinet::Yandex => "yandex",
            Cabinet::Facebook => "facebook",
            Cabinet::Google => "google",
        }
    }
}

impl core::fmt::Display for Cabinet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
