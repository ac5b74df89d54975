/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Session settings in the QuickFIX ini format.
//!
//! A settings file has at most one `[DEFAULT]` section and any number of
//! `[SESSION]` sections. Every session inherits each default key it does not
//! override. Lines starting with `#` or `;` are comments.
//!
//! ```text
//! [DEFAULT]
//! ConnectionType=initiator
//! HeartBtInt=30
//!
//! [SESSION]
//! BeginString=FIX.4.4
//! SenderCompID=CLIENT
//! TargetCompID=EXEC
//! ```

use chrono::{NaiveTime, Weekday};
use fixgate_core::error::ConfigError;
use fixgate_core::session_id::SessionId;
use std::collections::BTreeMap;
use std::path::Path;

/// Recognized setting keys.
pub mod keys {
    pub const BEGIN_STRING: &str = "BeginString";
    pub const SENDER_COMP_ID: &str = "SenderCompID";
    pub const TARGET_COMP_ID: &str = "TargetCompID";
    pub const SESSION_QUALIFIER: &str = "SessionQualifier";
    pub const CONNECTION_TYPE: &str = "ConnectionType";
    pub const SOCKET_ACCEPT_PORT: &str = "SocketAcceptPort";
    pub const SOCKET_ACCEPT_ADDRESS: &str = "SocketAcceptAddress";
    pub const SOCKET_CONNECT_HOST: &str = "SocketConnectHost";
    pub const SOCKET_CONNECT_PORT: &str = "SocketConnectPort";
    pub const RECONNECT_INTERVAL: &str = "ReconnectInterval";
    pub const HEART_BT_INT: &str = "HeartBtInt";
    pub const LOGON_TIMEOUT: &str = "LogonTimeout";
    pub const LOGOUT_TIMEOUT: &str = "LogoutTimeout";
    pub const TEST_REQUEST_DELAY_MULTIPLIER: &str = "TestRequestDelayMultiplier";
    pub const START_TIME: &str = "StartTime";
    pub const END_TIME: &str = "EndTime";
    pub const START_DAY: &str = "StartDay";
    pub const END_DAY: &str = "EndDay";
    pub const USE_LOCAL_TIME: &str = "UseLocalTime";
    pub const NON_STOP_SESSION: &str = "NonStopSession";
    pub const RESET_ON_LOGON: &str = "ResetOnLogon";
    pub const RESET_ON_LOGOUT: &str = "ResetOnLogout";
    pub const RESET_ON_DISCONNECT: &str = "ResetOnDisconnect";
    pub const REFRESH_ON_LOGON: &str = "RefreshOnLogon";
    pub const SEND_RESET_SEQ_NUM_FLAG: &str = "SendResetSeqNumFlag";
    pub const PERSIST_MESSAGES: &str = "PersistMessages";
    pub const CHECK_COMP_ID: &str = "CheckCompID";
    pub const CHECK_LATENCY: &str = "CheckLatency";
    pub const MAX_LATENCY: &str = "MaxLatency";
    pub const VALIDATE_LENGTH_AND_CHECKSUM: &str = "ValidateLengthAndChecksum";
    pub const VALIDATE_FIELDS_OUT_OF_ORDER: &str = "ValidateFieldsOutOfOrder";
    pub const VALIDATE_FIELDS_HAVE_VALUES: &str = "ValidateFieldsHaveValues";
    pub const SEND_REDUNDANT_RESEND_REQUESTS: &str = "SendRedundantResendRequests";
    pub const USE_DATA_DICTIONARY: &str = "UseDataDictionary";
    pub const DATA_DICTIONARY: &str = "DataDictionary";
    pub const FILE_STORE_PATH: &str = "FileStorePath";
    pub const FILE_LOG_PATH: &str = "FileLogPath";
    pub const RESEND_QUEUE_SIZE: &str = "ResendQueueSize";
    pub const RESEND_QUEUE_OVERFLOW: &str = "ResendQueueOverflow";
    pub const SENDER_SUB_ID: &str = "SenderSubID";
    pub const TARGET_SUB_ID: &str = "TargetSubID";
    pub const SENDER_LOCATION_ID: &str = "SenderLocationID";
    pub const TARGET_LOCATION_ID: &str = "TargetLocationID";
    pub const DEFAULT_APPL_VER_ID: &str = "DefaultApplVerID";
    pub const MAX_MESSAGE_SIZE: &str = "MaxMessageSize";
}

const DEFAULT_SECTION: &str = "DEFAULT";
const SESSION_SECTION: &str = "SESSION";

/// One section of key/value settings with typed getters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsSection {
    /// Section label used in error messages.
    name: String,
    values: BTreeMap<String, String>,
}

impl SettingsSection {
    /// Creates an empty section.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    /// Returns the section label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets a value, replacing any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Builder form of [`SettingsSection::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Returns true if the key is present.
    #[inline]
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Iterates over all key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns a string value.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingSetting` if the key is absent.
    pub fn get_string(&self, key: &str) -> Result<&str, ConfigError> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingSetting {
                section: self.name.clone(),
                key: key.to_string(),
            })
    }

    /// Returns an integer value.
    ///
    /// # Errors
    /// Returns `MissingSetting` if absent, `InvalidValue` if not an integer.
    pub fn get_int(&self, key: &str) -> Result<i64, ConfigError> {
        let value = self.get_string(key)?;
        value
            .trim()
            .parse()
            .map_err(|_| invalid(key, value, "expected an integer"))
    }

    /// Returns a floating point value.
    ///
    /// # Errors
    /// Returns `MissingSetting` if absent, `InvalidValue` if not a number.
    pub fn get_double(&self, key: &str) -> Result<f64, ConfigError> {
        let value = self.get_string(key)?;
        value
            .trim()
            .parse()
            .map_err(|_| invalid(key, value, "expected a number"))
    }

    /// Returns a `Y`/`N` flag.
    ///
    /// # Errors
    /// Returns `MissingSetting` if absent, `InvalidValue` for anything but
    /// `Y` or `N`.
    pub fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        let value = self.get_string(key)?;
        match value.trim() {
            "Y" | "y" => Ok(true),
            "N" | "n" => Ok(false),
            _ => Err(invalid(key, value, "expected Y or N")),
        }
    }

    /// Returns a day of week.
    ///
    /// Full English names and two-letter prefixes (`su`, `mo`, ...) are
    /// accepted in any case.
    ///
    /// # Errors
    /// Returns `MissingSetting` if absent, `InvalidValue` for an unknown day.
    pub fn get_day(&self, key: &str) -> Result<Weekday, ConfigError> {
        let value = self.get_string(key)?;
        parse_day(value).ok_or_else(|| invalid(key, value, "expected a day of week"))
    }

    /// Returns a `HH:MM:SS` time of day.
    ///
    /// # Errors
    /// Returns `MissingSetting` if absent, `InvalidValue` if malformed.
    pub fn get_time(&self, key: &str) -> Result<NaiveTime, ConfigError> {
        let value = self.get_string(key)?;
        NaiveTime::parse_from_str(value.trim(), "%H:%M:%S")
            .map_err(|_| invalid(key, value, "expected HH:MM:SS"))
    }

    /// Returns `default` when the key is absent, else the flag value.
    ///
    /// # Errors
    /// Returns `InvalidValue` if present but not `Y` or `N`.
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        if self.has(key) {
            self.get_bool(key)
        } else {
            Ok(default)
        }
    }

    /// Returns the string value if present.
    #[must_use]
    pub fn get_optional(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Builds the session identity from BeginString, SenderCompID,
    /// TargetCompID and SessionQualifier.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingSetting` if one of the three required
    /// keys is absent.
    pub fn session_id(&self) -> Result<SessionId, ConfigError> {
        let id = SessionId::new(
            self.get_string(keys::BEGIN_STRING)?,
            self.get_string(keys::SENDER_COMP_ID)?,
            self.get_string(keys::TARGET_COMP_ID)?,
        );
        Ok(match self.get_optional(keys::SESSION_QUALIFIER) {
            Some(qualifier) if !qualifier.is_empty() => id.with_qualifier(qualifier),
            _ => id,
        })
    }

    fn inherit(&mut self, defaults: &Self) {
        for (key, value) in &defaults.values {
            self.values
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_day(value: &str) -> Option<Weekday> {
    const DAYS: [(&str, Weekday); 7] = [
        ("sunday", Weekday::Sun),
        ("monday", Weekday::Mon),
        ("tuesday", Weekday::Tue),
        ("wednesday", Weekday::Wed),
        ("thursday", Weekday::Thu),
        ("friday", Weekday::Fri),
        ("saturday", Weekday::Sat),
    ];
    let value = value.trim().to_ascii_lowercase();
    if value.len() < 2 {
        return None;
    }
    DAYS.iter()
        .find(|(name, _)| name.starts_with(value.as_str()))
        .map(|(_, day)| *day)
}

/// Parsed settings: defaults plus one section per session.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    defaults: SettingsSection,
    sessions: BTreeMap<SessionId, SettingsSection>,
}

impl SessionSettings {
    /// Creates empty settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            defaults: SettingsSection::new(DEFAULT_SECTION),
            sessions: BTreeMap::new(),
        }
    }

    /// Reads and parses a settings file.
    ///
    /// # Errors
    /// Returns `ConfigError::Io` if the file cannot be read, otherwise the
    /// errors of [`SessionSettings::parse`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parses settings text.
    ///
    /// # Errors
    /// - `ConfigError::Parse` for malformed lines, unknown section names, a
    ///   second `[DEFAULT]` or a setting before any section
    /// - `ConfigError::MissingSetting` for a session without its identity keys
    /// - `ConfigError::DuplicateSession` when two sections share an id
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut defaults: Option<SettingsSection> = None;
        let mut sessions: Vec<SettingsSection> = Vec::new();
        // true while the most recent header was [DEFAULT]
        let mut in_default = false;
        let mut seen_section = false;

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            let number = index + 1;
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                seen_section = true;
                match name.trim().to_ascii_uppercase().as_str() {
                    DEFAULT_SECTION => {
                        if defaults.is_some() {
                            return Err(ConfigError::Parse {
                                line: number,
                                reason: "duplicate [DEFAULT] section".to_string(),
                            });
                        }
                        defaults = Some(SettingsSection::new(DEFAULT_SECTION));
                        in_default = true;
                    }
                    SESSION_SECTION => {
                        sessions.push(SettingsSection::new(SESSION_SECTION));
                        in_default = false;
                    }
                    other => {
                        return Err(ConfigError::Parse {
                            line: number,
                            reason: format!("unknown section [{other}]"),
                        });
                    }
                }
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Parse {
                    line: number,
                    reason: "expected key=value".to_string(),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::Parse {
                    line: number,
                    reason: "empty key".to_string(),
                });
            }
            let section = match (seen_section, in_default) {
                (false, _) => None,
                (true, true) => defaults.as_mut(),
                (true, false) => sessions.last_mut(),
            };
            let Some(section) = section else {
                return Err(ConfigError::Parse {
                    line: number,
                    reason: "setting outside of a section".to_string(),
                });
            };
            section.set(key, value.trim());
        }

        let mut settings = Self::new();
        if let Some(defaults) = defaults {
            settings.defaults = defaults;
        }
        for section in sessions {
            settings.add_session(section)?;
        }
        Ok(settings)
    }

    /// Adds a session section, filling unset keys from the defaults.
    ///
    /// # Returns
    /// The session id described by the section.
    ///
    /// # Errors
    /// Returns `MissingSetting` for absent identity keys and
    /// `DuplicateSession` if the id is already present.
    pub fn add_session(&mut self, mut section: SettingsSection) -> Result<SessionId, ConfigError> {
        section.inherit(&self.defaults);
        let id = section.session_id()?;
        if self.sessions.contains_key(&id) {
            return Err(ConfigError::DuplicateSession(id.to_string()));
        }
        section.name = id.to_string();
        self.sessions.insert(id.clone(), section);
        Ok(id)
    }

    /// Returns the `[DEFAULT]` section.
    #[must_use]
    pub const fn defaults(&self) -> &SettingsSection {
        &self.defaults
    }

    /// Replaces the `[DEFAULT]` section. Sessions added afterwards inherit it.
    pub fn set_defaults(&mut self, mut defaults: SettingsSection) {
        defaults.name = DEFAULT_SECTION.to_string();
        self.defaults = defaults;
    }

    /// Returns the merged section of a session.
    #[must_use]
    pub fn get(&self, session_id: &SessionId) -> Option<&SettingsSection> {
        self.sessions.get(session_id)
    }

    /// Iterates over the configured session ids in order.
    pub fn session_ids(&self) -> impl Iterator<Item = &SessionId> {
        self.sessions.keys()
    }

    /// Iterates over sessions and their merged sections.
    pub fn sessions(&self) -> impl Iterator<Item = (&SessionId, &SettingsSection)> {
        self.sessions.iter()
    }

    /// Returns the number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no session is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
