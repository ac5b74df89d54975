/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Session configuration.
//!
//! [`SessionConfig`] is the typed form of one settings section. It is built
//! with [`SessionConfig::from_settings`], which validates every value before
//! any connection is attempted, or programmatically with [`SessionConfig::new`]
//! and the `with_*` setters.

use crate::schedule::SessionSchedule;
use crate::settings::{SettingsSection, keys};
use fixgate_core::error::ConfigError;
use fixgate_core::session_id::SessionId;
use fixgate_core::types::CompId;
use fixgate_dictionary::Dictionary;
use fixgate_tagvalue::DecodeOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Which side opens the TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Listens for incoming connections.
    Acceptor,
    /// Connects out to the counterparty.
    Initiator,
}

impl ConnectionType {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "acceptor" => Ok(Self::Acceptor),
            "initiator" => Ok(Self::Initiator),
            _ => Err(ConfigError::InvalidValue {
                key: keys::CONNECTION_TYPE.to_string(),
                value: value.to_string(),
                reason: "expected acceptor or initiator".to_string(),
            }),
        }
    }
}

/// What to do when the resend queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResendOverflow {
    /// Discard the newest message; its seqnum is requested again later.
    #[default]
    Drop,
    /// Log out and disconnect.
    Disconnect,
}

impl ResendOverflow {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "disconnect" => Ok(Self::Disconnect),
            _ => Err(ConfigError::InvalidValue {
                key: keys::RESEND_QUEUE_OVERFLOW.to_string(),
                value: value.to_string(),
                reason: "expected drop or disconnect".to_string(),
            }),
        }
    }
}

/// Configuration for a FIX session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sender CompID (tag 49).
    pub sender_comp_id: CompId,
    /// Target CompID (tag 56).
    pub target_comp_id: CompId,
    /// FIX version BeginString (e.g., "FIX.4.4").
    pub begin_string: String,
    /// Optional qualifier distinguishing sessions with the same CompIDs.
    pub session_qualifier: Option<String>,
    /// Acceptor or initiator.
    pub connection_type: ConnectionType,
    /// Listen address for acceptors.
    pub socket_accept_address: Option<String>,
    /// Listen port for acceptors.
    pub socket_accept_port: Option<u16>,
    /// Counterparty host for initiators.
    pub socket_connect_host: Option<String>,
    /// Counterparty port for initiators.
    pub socket_connect_port: Option<u16>,
    /// Delay between connection attempts.
    pub reconnect_interval: Duration,
    /// Heartbeat interval; zero disables heartbeats.
    pub heartbeat_interval: Duration,
    /// Logon timeout duration.
    pub logon_timeout: Duration,
    /// Logout timeout duration.
    pub logout_timeout: Duration,
    /// Fraction of the heartbeat interval used as test request tolerance.
    pub test_request_delay_multiplier: f64,
    /// When the session may be logged on.
    pub schedule: SessionSchedule,
    /// Whether to reset sequence numbers on logon.
    pub reset_on_logon: bool,
    /// Whether to reset sequence numbers on logout.
    pub reset_on_logout: bool,
    /// Whether to reset sequence numbers on disconnect.
    pub reset_on_disconnect: bool,
    /// Reload the store before processing a logon.
    pub refresh_on_logon: bool,
    /// Send ResetSeqNumFlag=Y on the initiator's logon.
    pub send_reset_seq_num_flag: bool,
    /// Keep sent application messages for resend.
    pub persist_messages: bool,
    /// Verify that inbound CompIDs match the session.
    pub check_comp_id: bool,
    /// Verify that inbound SendingTime is within `max_latency`.
    pub check_latency: bool,
    /// Largest accepted SendingTime skew.
    pub max_latency: Duration,
    /// Whether to validate incoming message checksums.
    pub validate_checksum: bool,
    /// Whether to validate incoming message length.
    pub validate_length: bool,
    /// Reject misplaced header and trailer fields.
    pub validate_fields_out_of_order: bool,
    /// Reject fields without a value.
    pub validate_fields_have_values: bool,
    /// Send a ResendRequest for every gap even if one is pending.
    pub send_redundant_resend_requests: bool,
    /// Dictionary used for validation and group parsing.
    pub data_dictionary: Option<Arc<Dictionary>>,
    /// Directory of the file store.
    pub file_store_path: Option<PathBuf>,
    /// Directory of the file log.
    pub file_log_path: Option<PathBuf>,
    /// Maximum number of buffered out-of-order messages.
    pub resend_queue_size: usize,
    /// Policy when the resend queue is full.
    pub resend_queue_overflow: ResendOverflow,
    /// Maximum message size in bytes, 0 for no limit.
    pub max_message_size: usize,
    /// Optional sender sub ID (tag 50).
    pub sender_sub_id: Option<String>,
    /// Optional target sub ID (tag 57).
    pub target_sub_id: Option<String>,
    /// Optional sender location ID (tag 142).
    pub sender_location_id: Option<String>,
    /// Optional target location ID (tag 143).
    pub target_location_id: Option<String>,
    /// DefaultApplVerID (tag 1137) sent on FIXT logons.
    pub default_appl_ver_id: Option<String>,
}

impl SessionConfig {
    /// Creates a new session configuration with required fields.
    ///
    /// # Arguments
    /// * `sender_comp_id` - The sender CompID
    /// * `target_comp_id` - The target CompID
    /// * `begin_string` - The FIX version string
    #[must_use]
    pub fn new(
        sender_comp_id: CompId,
        target_comp_id: CompId,
        begin_string: impl Into<String>,
    ) -> Self {
        Self {
            sender_comp_id,
            target_comp_id,
            begin_string: begin_string.into(),
            session_qualifier: None,
            connection_type: ConnectionType::Initiator,
            socket_accept_address: None,
            socket_accept_port: None,
            socket_connect_host: None,
            socket_connect_port: None,
            reconnect_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            logon_timeout: Duration::from_secs(10),
            logout_timeout: Duration::from_secs(2),
            test_request_delay_multiplier: 0.5,
            schedule: SessionSchedule::non_stop(),
            reset_on_logon: false,
            reset_on_logout: false,
            reset_on_disconnect: false,
            refresh_on_logon: false,
            send_reset_seq_num_flag: false,
            persist_messages: true,
            check_comp_id: true,
            check_latency: true,
            max_latency: Duration::from_secs(120),
            validate_checksum: true,
            validate_length: true,
            validate_fields_out_of_order: true,
            validate_fields_have_values: true,
            send_redundant_resend_requests: false,
            data_dictionary: None,
            file_store_path: None,
            file_log_path: None,
            resend_queue_size: 10_000,
            resend_queue_overflow: ResendOverflow::Drop,
            max_message_size: 1024 * 1024, // 1MB
            sender_sub_id: None,
            target_sub_id: None,
            sender_location_id: None,
            target_location_id: None,
            default_appl_ver_id: None,
        }
    }

    /// Converts a merged settings section into a typed configuration.
    ///
    /// # Errors
    /// - `ConfigError::MissingSetting` for absent identity keys, an absent
    ///   ConnectionType, initiators without HeartBtInt, SocketConnectHost or
    ///   SocketConnectPort, and acceptors without SocketAcceptPort
    /// - `ConfigError::InvalidValue` for malformed values
    /// - `ConfigError::Dictionary` when the configured DataDictionary does
    ///   not load
    pub fn from_settings(section: &SettingsSection) -> Result<Self, ConfigError> {
        let session_id = section.session_id()?;
        let mut config = Self::new(
            comp_id(keys::SENDER_COMP_ID, &session_id.sender_comp_id)?,
            comp_id(keys::TARGET_COMP_ID, &session_id.target_comp_id)?,
            session_id.begin_string.clone(),
        );
        config.session_qualifier = session_id.session_qualifier;
        config.connection_type = ConnectionType::parse(section.get_string(keys::CONNECTION_TYPE)?)?;

        match config.connection_type {
            ConnectionType::Initiator => {
                config.heartbeat_interval = seconds(section, keys::HEART_BT_INT)?;
                config.socket_connect_host = Some(section.get_string(keys::SOCKET_CONNECT_HOST)?.to_string());
                config.socket_connect_port = Some(port(section, keys::SOCKET_CONNECT_PORT)?);
            }
            ConnectionType::Acceptor => {
                config.socket_accept_port = Some(port(section, keys::SOCKET_ACCEPT_PORT)?);
                if section.has(keys::HEART_BT_INT) {
                    config.heartbeat_interval = seconds(section, keys::HEART_BT_INT)?;
                }
            }
        }
        config.socket_accept_address = section.get_optional(keys::SOCKET_ACCEPT_ADDRESS).map(str::to_string);

        if section.has(keys::RECONNECT_INTERVAL) {
            config.reconnect_interval = seconds(section, keys::RECONNECT_INTERVAL)?;
        }
        if section.has(keys::LOGON_TIMEOUT) {
            config.logon_timeout = seconds(section, keys::LOGON_TIMEOUT)?;
        }
        if section.has(keys::LOGOUT_TIMEOUT) {
            config.logout_timeout = seconds(section, keys::LOGOUT_TIMEOUT)?;
        }
        if section.has(keys::MAX_LATENCY) {
            config.max_latency = seconds(section, keys::MAX_LATENCY)?;
        }
        if section.has(keys::TEST_REQUEST_DELAY_MULTIPLIER) {
            let multiplier = section.get_double(keys::TEST_REQUEST_DELAY_MULTIPLIER)?;
            if !multiplier.is_finite() || multiplier <= 0.0 {
                return Err(invalid(
                    keys::TEST_REQUEST_DELAY_MULTIPLIER,
                    multiplier.to_string(),
                    "must be a positive number",
                ));
            }
            config.test_request_delay_multiplier = multiplier;
        }
        config.schedule = SessionSchedule::from_settings(section)?;

        config.reset_on_logon = section.get_bool_or(keys::RESET_ON_LOGON, false)?;
        config.reset_on_logout = section.get_bool_or(keys::RESET_ON_LOGOUT, false)?;
        config.reset_on_disconnect = section.get_bool_or(keys::RESET_ON_DISCONNECT, false)?;
        config.refresh_on_logon = section.get_bool_or(keys::REFRESH_ON_LOGON, false)?;
        config.send_reset_seq_num_flag = section.get_bool_or(keys::SEND_RESET_SEQ_NUM_FLAG, false)?;
        config.persist_messages = section.get_bool_or(keys::PERSIST_MESSAGES, true)?;
        config.check_comp_id = section.get_bool_or(keys::CHECK_COMP_ID, true)?;
        config.check_latency = section.get_bool_or(keys::CHECK_LATENCY, true)?;
        let validate_integrity = section.get_bool_or(keys::VALIDATE_LENGTH_AND_CHECKSUM, true)?;
        config.validate_checksum = validate_integrity;
        config.validate_length = validate_integrity;
        config.validate_fields_out_of_order = section.get_bool_or(keys::VALIDATE_FIELDS_OUT_OF_ORDER, true)?;
        config.validate_fields_have_values = section.get_bool_or(keys::VALIDATE_FIELDS_HAVE_VALUES, true)?;
        config.send_redundant_resend_requests =
            section.get_bool_or(keys::SEND_REDUNDANT_RESEND_REQUESTS, false)?;

        if section.get_bool_or(keys::USE_DATA_DICTIONARY, false)? {
            let path = section.get_string(keys::DATA_DICTIONARY)?;
            let dictionary = Dictionary::load(path)?;
            config.data_dictionary = Some(Arc::new(dictionary));
        }

        config.file_store_path = section.get_optional(keys::FILE_STORE_PATH).map(PathBuf::from);
        config.file_log_path = section.get_optional(keys::FILE_LOG_PATH).map(PathBuf::from);

        if section.has(keys::RESEND_QUEUE_SIZE) {
            config.resend_queue_size = count(section, keys::RESEND_QUEUE_SIZE)?;
        }
        if let Some(value) = section.get_optional(keys::RESEND_QUEUE_OVERFLOW) {
            config.resend_queue_overflow = ResendOverflow::parse(value)?;
        }
        if section.has(keys::MAX_MESSAGE_SIZE) {
            config.max_message_size = count(section, keys::MAX_MESSAGE_SIZE)?;
        }

        let optional = |key: &str| section.get_optional(key).map(str::to_string);
        config.sender_sub_id = optional(keys::SENDER_SUB_ID);
        config.target_sub_id = optional(keys::TARGET_SUB_ID);
        config.sender_location_id = optional(keys::SENDER_LOCATION_ID);
        config.target_location_id = optional(keys::TARGET_LOCATION_ID);
        config.default_appl_ver_id = optional(keys::DEFAULT_APPL_VER_ID);

        if config.session_id().is_fixt() && config.default_appl_ver_id.is_none() {
            return Err(ConfigError::MissingSetting {
                section: section.name().to_string(),
                key: keys::DEFAULT_APPL_VER_ID.to_string(),
            });
        }
        Ok(config)
    }

    /// Returns the identity of the session.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        let id = SessionId::new(
            self.begin_string.clone(),
            self.sender_comp_id.as_str(),
            self.target_comp_id.as_str(),
        );
        match &self.session_qualifier {
            Some(qualifier) => id.with_qualifier(qualifier.clone()),
            None => id,
        }
    }

    /// Returns the decoder options derived from the validation switches.
    #[must_use]
    pub const fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            validate_checksum: self.validate_checksum,
            validate_length: self.validate_length,
            validate_order: self.validate_fields_out_of_order,
            validate_values_present: self.validate_fields_have_values,
            max_message_size: self.max_message_size,
        }
    }

    /// Sets the connection type.
    #[must_use]
    pub const fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets whether to reset sequence numbers on logon.
    #[must_use]
    pub const fn with_reset_on_logon(mut self, reset: bool) -> Self {
        self.reset_on_logon = reset;
        self
    }

    /// Sets the maximum message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets the logon timeout.
    #[must_use]
    pub fn with_logon_timeout(mut self, timeout: Duration) -> Self {
        self.logon_timeout = timeout;
        self
    }

    /// Sets the logout timeout.
    #[must_use]
    pub fn with_logout_timeout(mut self, timeout: Duration) -> Self {
        self.logout_timeout = timeout;
        self
    }

    /// Sets the session schedule.
    #[must_use]
    pub const fn with_schedule(mut self, schedule: SessionSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Sets the resend queue bound and overflow policy.
    #[must_use]
    pub const fn with_resend_queue(mut self, size: usize, overflow: ResendOverflow) -> Self {
        self.resend_queue_size = size;
        self.resend_queue_overflow = overflow;
        self
    }

    /// Sets the data dictionary.
    #[must_use]
    pub fn with_data_dictionary(mut self, dictionary: Arc<Dictionary>) -> Self {
        self.data_dictionary = Some(dictionary);
        self
    }

    /// Sets the sender sub ID.
    #[must_use]
    pub fn with_sender_sub_id(mut self, sub_id: impl Into<String>) -> Self {
        self.sender_sub_id = Some(sub_id.into());
        self
    }

    /// Sets the target sub ID.
    #[must_use]
    pub fn with_target_sub_id(mut self, sub_id: impl Into<String>) -> Self {
        self.target_sub_id = Some(sub_id.into());
        self
    }

    /// Returns the heartbeat interval in seconds.
    #[must_use]
    pub fn heartbeat_interval_secs(&self) -> u64 {
        self.heartbeat_interval.as_secs()
    }
}

fn invalid(key: &str, value: String, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value,
        reason: reason.to_string(),
    }
}

fn comp_id(key: &str, value: &str) -> Result<CompId, ConfigError> {
    CompId::new(value).ok_or_else(|| invalid(key, value.to_string(), "longer than 32 characters"))
}

fn seconds(section: &SettingsSection, key: &str) -> Result<Duration, ConfigError> {
    let value = section.get_int(key)?;
    u64::try_from(value)
        .map(Duration::from_secs)
        .map_err(|_| invalid(key, value.to_string(), "must not be negative"))
}

fn count(section: &SettingsSection, key: &str) -> Result<usize, ConfigError> {
    let value = section.get_int(key)?;
    usize::try_from(value).map_err(|_| invalid(key, value.to_string(), "must not be negative"))
}

fn port(section: &SettingsSection, key: &str) -> Result<u16, ConfigError> {
    let value = section.get_int(key)?;
    u16::try_from(value).map_err(|_| invalid(key, value.to_string(), "not a TCP port"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initiator_section() -> SettingsSection {
        SettingsSection::new("FIX.4.4:CLIENT->EXEC")
            .with(keys::BEGIN_STRING, "FIX.4.4")
            .with(keys::SENDER_COMP_ID, "CLIENT")
            .with(keys::TARGET_COMP_ID, "EXEC")
            .with(keys::CONNECTION_TYPE, "initiator")
            .with(keys::HEART_BT_INT, "30")
            .with(keys::SOCKET_CONNECT_HOST, "127.0.0.1")
            .with(keys::SOCKET_CONNECT_PORT, "5001")
    }

    #[test]
    fn test_session_config_new() {
        let sender = CompId::new("SENDER").unwrap();
        let target = CompId::new("TARGET").unwrap();
        let config = SessionConfig::new(sender, target, "FIX.4.4");

        assert_eq!(config.sender_comp_id.as_str(), "SENDER");
        assert_eq!(config.target_comp_id.as_str(), "TARGET");
        assert_eq!(config.begin_string, "FIX.4.4");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.resend_queue_size, 10_000);
        assert_eq!(config.resend_queue_overflow, ResendOverflow::Drop);
        assert!((config.test_request_delay_multiplier - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_settings_initiator() {
        let section = initiator_section()
            .with(keys::RESET_ON_LOGON, "Y")
            .with(keys::VALIDATE_LENGTH_AND_CHECKSUM, "N")
            .with(keys::RESEND_QUEUE_SIZE, "16")
            .with(keys::RESEND_QUEUE_OVERFLOW, "disconnect")
            .with(keys::SENDER_SUB_ID, "DESK")
            .with(keys::SESSION_QUALIFIER, "primary")
            .with(keys::TEST_REQUEST_DELAY_MULTIPLIER, "1.5");
        let config = SessionConfig::from_settings(&section).unwrap();

        assert_eq!(config.connection_type, ConnectionType::Initiator);
        assert_eq!(config.socket_connect_host.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.socket_connect_port, Some(5001));
        assert!(config.reset_on_logon);
        assert!(!config.validate_checksum);
        assert!(!config.decode_options().validate_length);
        assert_eq!(config.resend_queue_size, 16);
        assert_eq!(config.resend_queue_overflow, ResendOverflow::Disconnect);
        assert_eq!(config.sender_sub_id.as_deref(), Some("DESK"));
        assert!((config.test_request_delay_multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(
            config.session_id(),
            SessionId::new("FIX.4.4", "CLIENT", "EXEC").with_qualifier("primary")
        );
    }

    #[test]
    fn test_initiator_requirements() {
        for key in [
            keys::HEART_BT_INT,
            keys::SOCKET_CONNECT_HOST,
            keys::SOCKET_CONNECT_PORT,
        ] {
            let mut section = SettingsSection::new("s");
            for (k, v) in initiator_section().iter().filter(|(k, _)| *k != key) {
                section.set(k, v);
            }
            assert!(
                matches!(
                    SessionConfig::from_settings(&section),
                    Err(ConfigError::MissingSetting { key: ref missing, .. }) if missing == key
                ),
                "{key}"
            );
        }
    }

    #[test]
    fn test_acceptor_requirements() {
        let section = SettingsSection::new("s")
            .with(keys::BEGIN_STRING, "FIX.4.2")
            .with(keys::SENDER_COMP_ID, "EXEC")
            .with(keys::TARGET_COMP_ID, "CLIENT")
            .with(keys::CONNECTION_TYPE, "acceptor");
        assert!(matches!(
            SessionConfig::from_settings(&section),
            Err(ConfigError::MissingSetting { ref key, .. }) if key == "SocketAcceptPort"
        ));

        let config =
            SessionConfig::from_settings(&section.with(keys::SOCKET_ACCEPT_PORT, "9880")).unwrap();
        assert_eq!(config.connection_type, ConnectionType::Acceptor);
        assert_eq!(config.socket_accept_port, Some(9880));
    }

    #[test]
    fn test_invalid_values() {
        let bad_type = initiator_section().with(keys::CONNECTION_TYPE, "both");
        assert!(matches!(
            SessionConfig::from_settings(&bad_type),
            Err(ConfigError::InvalidValue { .. })
        ));

        let bad_port = initiator_section().with(keys::SOCKET_CONNECT_PORT, "70000");
        assert!(matches!(
            SessionConfig::from_settings(&bad_port),
            Err(ConfigError::InvalidValue { .. })
        ));

        let bad_flag = initiator_section().with(keys::CHECK_COMP_ID, "yes");
        assert!(matches!(
            SessionConfig::from_settings(&bad_flag),
            Err(ConfigError::InvalidValue { .. })
        ));

        let bad_multiplier = initiator_section().with(keys::TEST_REQUEST_DELAY_MULTIPLIER, "0");
        assert!(SessionConfig::from_settings(&bad_multiplier).is_err());

        let long_id = initiator_section().with(keys::SENDER_COMP_ID, "X".repeat(40));
        assert!(SessionConfig::from_settings(&long_id).is_err());
    }

    #[test]
    fn test_data_dictionary_must_load() {
        let section = initiator_section()
            .with(keys::USE_DATA_DICTIONARY, "Y")
            .with(keys::DATA_DICTIONARY, "/nonexistent/FIX44.xml");
        assert!(matches!(
            SessionConfig::from_settings(&section),
            Err(ConfigError::Dictionary(_))
        ));
    }

    #[test]
    fn test_fixt_requires_default_appl_ver_id() {
        let section = initiator_section().with(keys::BEGIN_STRING, "FIXT.1.1");
        assert!(SessionConfig::from_settings(&section).is_err());
        let config =
            SessionConfig::from_settings(&section.with(keys::DEFAULT_APPL_VER_ID, "9")).unwrap();
        assert_eq!(config.default_appl_ver_id.as_deref(), Some("9"));
    }
}
