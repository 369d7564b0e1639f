//! Aufbewahrungs-Richtlinie pro Session
//!
//! Wird lokal gespeichert und ueber eine verschluesselte Steuernachricht mit
//! der Gegenseite synchronisiert.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Wie lange Nachrichten einer Session aufbewahrt werden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Nichts persistieren; im Speicher nur bis zum naechsten Aufraeumen
    NeverStore,
    /// Persistieren mit fester Lebensdauer ab Nachrichten-Zeitstempel
    Ttl { seconds: u64 },
    /// Persistieren bis der Benutzer die Session loescht
    Forever,
}

impl RetentionPolicy {
    pub const EINE_STUNDE: Self = Self::Ttl { seconds: 60 * 60 };
    pub const EIN_TAG: Self = Self::Ttl {
        seconds: 24 * 60 * 60,
    };
    pub const EINE_WOCHE: Self = Self::Ttl {
        seconds: 7 * 24 * 60 * 60,
    };

    /// Ob Nachrichten unter dieser Richtlinie auf Disk landen
    pub fn persistiert(&self) -> bool {
        !matches!(self, Self::NeverStore)
    }

    /// Ablaufzeitpunkt einer Nachricht mit dem gegebenen Zeitstempel
    ///
    /// `None` bedeutet: laeuft nie ab.
    pub fn ablauf_fuer(&self, zeitstempel: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::NeverStore => Some(zeitstempel),
            Self::Ttl { seconds } => {
                let sekunden = i64::try_from(*seconds).unwrap_or(i64::MAX);
                Some(
                    zeitstempel
                        .checked_add_signed(Duration::seconds(sekunden))
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                )
            }
            Self::Forever => None,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::EIN_TAG
    }
}

impl std::fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NeverStore => write!(f, "never_store"),
            Self::Ttl { seconds } => write!(f, "ttl:{seconds}s"),
            Self::Forever => write!(f, "forever"),
        }
    }
}
