/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! The FIX session state machine.
//!
//! A [`Session`] owns everything that mutates for one counterparty
//! relationship: state, heartbeat timers, the resend queue and the store
//! handle. It performs no I/O of its own. Inbound frames are fed through
//! [`Session::next`], outbound bytes leave through the [`Responder`] of the
//! current connection, and time advances through [`Session::on_tick`].
//! Every entry point takes the current [`Instant`], so the whole protocol
//! can be driven deterministically in tests.

use crate::application::{Application, RejectReason};
use crate::config::{ConnectionType, SessionConfig};
use crate::heartbeat::{HeartbeatAction, HeartbeatManager, generate_test_req_id};
use crate::log::Log;
use crate::messages::{self, is_fix42_or_later};
use crate::reject::{BusinessRejectReason, SessionRejectReason};
use crate::responder::Responder;
use crate::sequence::{QueueOutcome, ResendQueue, SequenceResult, validate};
use crate::state::SessionState;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use fixgate_core::error::{DecodeError, Result, SessionError};
use fixgate_core::field::tags;
use fixgate_core::message::{Message, MsgType};
use fixgate_core::session_id::SessionId;
use fixgate_core::types::Timestamp;
use fixgate_store::MessageStore;
use fixgate_tagvalue::{DecodeOptions, decode, encode, peek_header};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One FIX session.
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    decode_options: DecodeOptions,
    state: SessionState,
    store: Arc<dyn MessageStore>,
    log: Arc<dyn Log>,
    application: Arc<dyn Application>,
    responder: Option<Arc<dyn Responder>>,
    heartbeat: HeartbeatManager,
    resend_queue: ResendQueue,
    /// Range of the ResendRequest still being answered.
    resend_range: Option<(u64, u64)>,
    logon_sent_at: Option<Instant>,
    logout_sent_at: Option<Instant>,
    connected_at: Option<Instant>,
    /// Our Logon carried ResetSeqNumFlag=Y.
    reset_sent: bool,
    enabled: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("connected", &self.responder.is_some())
            .field("resend_range", &self.resend_range)
            .field("queued", &self.resend_queue.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session and notifies the application.
    ///
    /// # Arguments
    /// * `config` - Typed session configuration
    /// * `store` - Message store holding the sequence numbers
    /// * `log` - Destination of traffic and events
    /// * `application` - Callback handler
    pub async fn new(
        config: SessionConfig,
        store: Arc<dyn MessageStore>,
        log: Arc<dyn Log>,
        application: Arc<dyn Application>,
    ) -> Self {
        let id = config.session_id();
        let now = Instant::now();
        let session = Self {
            decode_options: config.decode_options(),
            heartbeat: HeartbeatManager::new(
                config.heartbeat_interval,
                config.test_request_delay_multiplier,
                now,
            ),
            resend_queue: ResendQueue::new(config.resend_queue_size, config.resend_queue_overflow),
            id,
            config,
            state: SessionState::Disconnected,
            store,
            log,
            application,
            responder: None,
            resend_range: None,
            logon_sent_at: None,
            logout_sent_at: None,
            connected_at: None,
            reset_sent: false,
            enabled: true,
        };
        session.log.on_event("Created session");
        session.application.on_create(&session.id).await;
        session
    }

    /// Returns the session identity.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true while logged on.
    #[must_use]
    pub const fn is_logged_on(&self) -> bool {
        self.state.is_logged_on()
    }

    /// Returns true while a transport is attached.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.responder.is_some()
    }

    /// Returns false after a local logout until [`Session::logon`].
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the seqnum the next outbound message will carry.
    #[must_use]
    pub fn next_sender_seq_num(&self) -> u64 {
        self.store.next_sender_seq_num()
    }

    /// Returns the seqnum expected on the next inbound message.
    #[must_use]
    pub fn next_target_seq_num(&self) -> u64 {
        self.store.next_target_seq_num()
    }

    /// Returns true if `now` lies inside the configured schedule.
    #[must_use]
    pub fn is_session_time(&self, now: DateTime<Utc>) -> bool {
        self.config.schedule.is_session_time(now)
    }

    /// Returns the heartbeat interval in effect.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        self.heartbeat.interval()
    }

    /// Returns true for acceptor sessions.
    #[inline]
    fn is_acceptor(&self) -> bool {
        self.config.connection_type == ConnectionType::Acceptor
    }

    /// Allows logons again after [`Session::logout`].
    pub fn logon(&mut self) {
        self.enabled = true;
    }

    /// Attaches a new transport.
    ///
    /// Initiators send their Logon immediately when enabled; acceptors wait
    /// for the counterparty's for at most LogonTimeout.
    ///
    /// # Errors
    /// Returns `SessionError::InvalidState` if a transport is already
    /// attached, or a store error from a logon reset.
    pub async fn connect(&mut self, responder: Arc<dyn Responder>, now: Instant) -> Result<()> {
        if self.responder.is_some() {
            return Err(SessionError::InvalidState {
                expected: "not connected".to_owned(),
                current: "connected".to_owned(),
            }
            .into());
        }
        self.responder = Some(responder);
        self.connected_at = Some(now);
        self.heartbeat.set_interval(self.config.heartbeat_interval);
        self.heartbeat.reset(now);
        self.log.on_event("Connected");
        info!(session = %self.id, "connected");
        if !self.is_acceptor() && self.enabled {
            self.send_logon(now).await?;
        }
        Ok(())
    }

    /// Reports that the transport was closed by the peer or failed.
    ///
    /// # Errors
    /// Returns a store error when ResetOnDisconnect cannot reset the store.
    pub async fn disconnected(&mut self, now: Instant) -> Result<()> {
        self.disconnect("Connection closed", now).await
    }

    /// Processes one complete inbound frame.
    ///
    /// # Errors
    /// Returns store or encode errors; protocol problems are handled
    /// inside the session and never surface here.
    pub async fn next(&mut self, raw: &[u8], now: Instant) -> Result<()> {
        self.log.on_incoming(raw);
        self.heartbeat.on_message_received(now);
        let dictionary = self.config.data_dictionary.as_deref();
        let message = match decode(raw, dictionary, &self.decode_options) {
            Ok(message) => message,
            Err(error) => return self.on_invalid(raw, &error, now).await,
        };
        self.process(message, now).await?;
        self.drain_queue(now).await
    }

    /// Sends a message, assigning the next outbound seqnum.
    ///
    /// Application messages are persisted even when not logged on and reach
    /// the counterparty through a later resend.
    ///
    /// # Returns
    /// `false` if `to_app` suppressed the message.
    ///
    /// # Errors
    /// Returns encode or store errors.
    pub async fn send(&mut self, message: Message, now: Instant) -> Result<bool> {
        self.send_message(message, now).await
    }

    /// Starts a logout and disables the session until [`Session::logon`].
    ///
    /// # Errors
    /// Returns encode or store errors.
    pub async fn logout(&mut self, text: Option<&str>, now: Instant) -> Result<()> {
        self.enabled = false;
        match self.state {
            SessionState::LoggedOn => self.send_logout(text, now).await,
            SessionState::LogoutSent => Ok(()),
            _ if self.responder.is_some() => self.disconnect("Logout requested", now).await,
            _ => Ok(()),
        }
    }

    /// Evaluates schedule, timeouts and liveness.
    ///
    /// # Arguments
    /// * `now` - Monotonic time driving the timers
    /// * `wall` - UTC time used for the session schedule
    ///
    /// # Errors
    /// Returns encode or store errors.
    pub async fn on_tick(&mut self, now: Instant, wall: DateTime<Utc>) -> Result<()> {
        if !self.config.schedule.is_session_time(wall) {
            if self.state.is_logged_on() {
                self.log.on_event("Session end reached");
                self.send_logout(Some("Session end"), now).await?;
            } else if self.state != SessionState::LogoutSent && self.responder.is_some() {
                self.disconnect("Outside of session time", now).await?;
            }
        } else if !self
            .config
            .schedule
            .is_same_session(self.store.creation_time(), wall)
        {
            self.log.on_event("New session period, resetting sequence numbers");
            info!(session = %self.id, "session schedule reset");
            if self.state.is_logged_on() {
                self.send_message(messages::logout(Some("New session period")), now)
                    .await?;
            }
            self.disconnect("New session period", now).await?;
            self.store.reset(wall).await?;
            return Ok(());
        }

        match self.state {
            SessionState::LogonSent => {
                if elapsed(self.logon_sent_at, now, self.config.logon_timeout) {
                    self.disconnect("Timed out waiting for logon response", now)
                        .await?;
                }
            }
            SessionState::LogoutSent => {
                if elapsed(self.logout_sent_at, now, self.config.logout_timeout) {
                    self.disconnect("Timed out waiting for logout response", now)
                        .await?;
                }
            }
            SessionState::Disconnected => {
                if elapsed(self.connected_at, now, self.config.logon_timeout) {
                    self.disconnect("Timed out waiting for logon", now).await?;
                }
            }
            SessionState::LoggedOn => match self.heartbeat.check(now) {
                HeartbeatAction::None => {}
                HeartbeatAction::SendHeartbeat => {
                    self.send_message(messages::heartbeat(None), now).await?;
                }
                HeartbeatAction::SendTestRequest => {
                    let id = generate_test_req_id();
                    self.send_message(messages::test_request(&id), now).await?;
                    self.log.on_event(&format!("Sent test request {id}"));
                    self.heartbeat.on_test_request_sent(id, now);
                }
                HeartbeatAction::TimedOut => {
                    warn!(session = %self.id, "heartbeat timeout");
                    self.disconnect("Timed out waiting for heartbeat", now).await?;
                }
            },
            SessionState::LogonReceived => {}
        }
        Ok(())
    }

    async fn send_logon(&mut self, now: Instant) -> Result<()> {
        if self.config.refresh_on_logon {
            self.store.refresh().await?;
        }
        let reset = self.config.reset_on_logon || self.config.send_reset_seq_num_flag;
        if reset {
            self.store.reset(Utc::now()).await?;
        }
        self.reset_sent = reset;
        let logon = messages::logon(
            self.config.heartbeat_interval.as_secs(),
            reset,
            self.default_appl_ver_id(),
        );
        self.state = SessionState::LogonSent;
        self.logon_sent_at = Some(now);
        self.log.on_event("Initiated logon request");
        self.send_message(logon, now).await?;
        Ok(())
    }

    async fn send_logout(&mut self, text: Option<&str>, now: Instant) -> Result<()> {
        self.send_message(messages::logout(text), now).await?;
        self.state = SessionState::LogoutSent;
        self.logout_sent_at = Some(now);
        self.log.on_event("Initiated logout request");
        Ok(())
    }

    fn default_appl_ver_id(&self) -> Option<&str> {
        if self.id.is_fixt() {
            self.config.default_appl_ver_id.as_deref()
        } else {
            None
        }
    }

    /// Formats SendingTime with the precision the version allows.
    fn format_time(&self, time: Timestamp) -> String {
        if is_fix42_or_later(&self.config.begin_string) {
            time.format_millis().to_string()
        } else {
            time.format_seconds().to_string()
        }
    }

    fn fill_header(&self, message: &mut Message, seq_num: u64, sending_time: &str) {
        let config = &self.config;
        let header = message.header_mut();
        header.set_field(tags::BEGIN_STRING, config.begin_string.as_str());
        header.set_field(tags::SENDER_COMP_ID, config.sender_comp_id.as_str());
        header.set_field(tags::TARGET_COMP_ID, config.target_comp_id.as_str());
        for (tag, value) in [
            (tags::SENDER_SUB_ID, &config.sender_sub_id),
            (tags::TARGET_SUB_ID, &config.target_sub_id),
            (tags::SENDER_LOCATION_ID, &config.sender_location_id),
            (tags::TARGET_LOCATION_ID, &config.target_location_id),
        ] {
            if let Some(value) = value {
                header.set_field(tag, value.as_str());
            }
        }
        header.set_uint(tags::MSG_SEQ_NUM, seq_num);
        header.set_field(tags::SENDING_TIME, sending_time);
    }

    async fn send_message(&mut self, mut message: Message, now: Instant) -> Result<bool> {
        let seq_num = self.store.next_sender_seq_num();
        let sending_time = self.format_time(Timestamp::now());
        self.fill_header(&mut message, seq_num, &sending_time);

        let admin = message.is_admin();
        if admin {
            self.application.to_admin(&mut message, &self.id).await;
        } else if self
            .application
            .to_app(&mut message, &self.id)
            .await
            .is_err()
        {
            debug!(session = %self.id, seq_num, "outbound message suppressed by application");
            return Ok(false);
        }

        let raw = encode(&message)?.freeze();
        if self.config.persist_messages {
            self.store.set(seq_num, &raw).await?;
        }
        self.store.incr_next_sender_seq_num().await?;

        if admin || self.state.is_logged_on() {
            self.transmit(raw, now);
        } else {
            debug!(session = %self.id, seq_num, "not logged on, message stored for resend");
        }
        Ok(true)
    }

    fn transmit(&mut self, raw: Bytes, now: Instant) -> bool {
        let Some(responder) = &self.responder else {
            return false;
        };
        self.log.on_outgoing(&raw);
        let sent = responder.send(raw);
        self.heartbeat.on_message_sent(now);
        sent
    }

    async fn disconnect(&mut self, reason: &str, now: Instant) -> Result<()> {
        let was_logged_on = matches!(
            self.state,
            SessionState::LoggedOn | SessionState::LogoutSent
        );
        match self.responder.take() {
            Some(responder) => {
                responder.disconnect();
                self.log.on_event(&format!("Disconnecting: {reason}"));
                info!(session = %self.id, reason, "disconnected");
            }
            None if self.state == SessionState::Disconnected => return Ok(()),
            None => {}
        }

        self.state = SessionState::Disconnected;
        self.logon_sent_at = None;
        self.logout_sent_at = None;
        self.connected_at = None;
        self.resend_range = None;
        self.resend_queue.clear();
        self.reset_sent = false;
        self.heartbeat.reset(now);

        if was_logged_on {
            self.application.on_logout(&self.id).await;
        }
        if self.config.reset_on_disconnect {
            self.store.reset(Utc::now()).await?;
        }
        Ok(())
    }

    async fn logout_and_disconnect(&mut self, text: &str, now: Instant) -> Result<()> {
        self.log.on_event(text);
        warn!(session = %self.id, "{}", text);
        self.send_message(messages::logout(Some(text)), now).await?;
        self.disconnect(text, now).await
    }

    /// Handles a frame that failed to decode.
    async fn on_invalid(&mut self, raw: &[u8], error: &DecodeError, now: Instant) -> Result<()> {
        let reason = SessionRejectReason::from_decode_error(error);
        let header = peek_header(raw).ok();
        let (Some(reason), Some(header)) = (reason, header) else {
            self.log.on_event(&format!("Garbled message dropped: {error}"));
            warn!(session = %self.id, %error, "garbled message dropped");
            return Ok(());
        };

        if !matches!(
            self.state,
            SessionState::LoggedOn | SessionState::LogoutSent
        ) {
            self.log.on_event(&format!("Invalid message before logon: {error}"));
            return self.disconnect("Invalid message before logon", now).await;
        }

        let expected = self.store.next_target_seq_num();
        let Some(seq_num) = header.seq_num.filter(|seq| *seq == expected) else {
            debug!(session = %self.id, %error, "invalid message out of sequence ignored");
            return Ok(());
        };
        let text = error.to_string();
        self.log.on_event(&format!("Message {seq_num} Rejected: {text}"));
        let reject = messages::reject(
            &self.config.begin_string,
            seq_num,
            reason,
            error.ref_tag(),
            header.msg_type,
            Some(&text),
        );
        self.send_message(reject, now).await?;
        self.store.incr_next_target_seq_num().await?;
        Ok(())
    }

    async fn process(&mut self, message: Message, now: Instant) -> Result<()> {
        let begin_string = message.header().get_field(tags::BEGIN_STRING);
        if begin_string != Some(self.config.begin_string.as_str()) {
            let text = format!("Incorrect BeginString: {}", begin_string.unwrap_or_default());
            return self.logout_and_disconnect(&text, now).await;
        }
        let Some(msg_type) = message.msg_type() else {
            return self.disconnect("Message without MsgType", now).await;
        };

        let established = matches!(
            self.state,
            SessionState::LoggedOn | SessionState::LogoutSent
        );
        let allowed = established
            || msg_type == MsgType::Logon
            || (msg_type == MsgType::Logout && self.state == SessionState::LogonSent);
        if !allowed {
            self.log.on_event(&format!("Received {msg_type} before logon"));
            warn!(session = %self.id, %msg_type, "message before logon");
            return self.disconnect("Message before logon", now).await;
        }

        match msg_type {
            MsgType::Logon => self.on_logon(message, now).await,
            MsgType::Heartbeat => self.on_heartbeat(message, now).await,
            MsgType::TestRequest => self.on_test_request(message, now).await,
            MsgType::ResendRequest => self.on_resend_request(message, now).await,
            MsgType::Reject => self.on_reject(message, now).await,
            MsgType::SequenceReset => self.on_sequence_reset(message, now).await,
            MsgType::Logout => self.on_logout(message, now).await,
            _ => self.on_app(message, now).await,
        }
    }

    /// Runs the header checks shared by every message type.
    ///
    /// # Returns
    /// `true` if the message may be processed now; otherwise the session
    /// already reacted (queued, rejected or disconnected).
    async fn verify(
        &mut self,
        message: &Message,
        check_too_high: bool,
        check_too_low: bool,
        now: Instant,
    ) -> Result<bool> {
        let Some(seq_num) = message.seq_num() else {
            self.logout_and_disconnect("Received message without MsgSeqNum", now)
                .await?;
            return Ok(false);
        };

        if self.config.check_comp_id {
            let header = message.header();
            let sender = header.get_field(tags::SENDER_COMP_ID);
            let target = header.get_field(tags::TARGET_COMP_ID);
            if sender != Some(self.config.target_comp_id.as_str())
                || target != Some(self.config.sender_comp_id.as_str())
            {
                self.send_reject(message, SessionRejectReason::CompIdProblem, None, None, now)
                    .await?;
                self.logout_and_disconnect("CompID problem", now).await?;
                return Ok(false);
            }
        }

        if self.config.check_latency {
            let sending_time = message.header().get_field(tags::SENDING_TIME);
            match sending_time.map(Timestamp::parse) {
                None => {
                    self.reject_and_advance(
                        message,
                        SessionRejectReason::RequiredTagMissing,
                        Some(tags::SENDING_TIME),
                        now,
                    )
                    .await?;
                    return Ok(false);
                }
                Some(None) => {
                    self.reject_and_advance(
                        message,
                        SessionRejectReason::IncorrectDataFormat,
                        Some(tags::SENDING_TIME),
                        now,
                    )
                    .await?;
                    return Ok(false);
                }
                Some(Some(sent)) => {
                    let max = u64::try_from(self.config.max_latency.as_millis())
                        .unwrap_or(u64::MAX);
                    if Timestamp::now().abs_diff_millis(sent) > max {
                        self.send_reject(
                            message,
                            SessionRejectReason::SendingTimeAccuracyProblem,
                            None,
                            None,
                            now,
                        )
                        .await?;
                        self.logout_and_disconnect("SendingTime accuracy problem", now)
                            .await?;
                        return Ok(false);
                    }
                }
            }
        }

        let expected = self.store.next_target_seq_num();
        match validate(expected, seq_num) {
            SequenceResult::Gap { .. } if check_too_high => {
                self.on_target_too_high(message.clone(), seq_num, expected, now)
                    .await?;
                return Ok(false);
            }
            SequenceResult::TooLow { .. } if check_too_low => {
                self.on_target_too_low(message, seq_num, expected, now)
                    .await?;
                return Ok(false);
            }
            _ => {}
        }

        if let Some((begin, end)) = self.resend_range {
            if seq_num >= end {
                self.log.on_event(&format!(
                    "ResendRequest for messages FROM: {begin} TO: {end} has been satisfied."
                ));
                self.resend_range = None;
            }
        }
        Ok(true)
    }

    async fn on_target_too_high(
        &mut self,
        message: Message,
        seq_num: u64,
        expected: u64,
        now: Instant,
    ) -> Result<()> {
        self.log.on_event(&format!(
            "MsgSeqNum too high, expecting {expected} but received {seq_num}"
        ));
        warn!(session = %self.id, expected, received = seq_num, "sequence gap");
        match self.resend_queue.push(seq_num, message) {
            QueueOutcome::Queued => {}
            QueueOutcome::Dropped => {
                debug!(session = %self.id, seq_num, "resend queue full, message dropped");
            }
            QueueOutcome::Overflow => {
                return self.logout_and_disconnect("Resend queue overflow", now).await;
            }
        }
        self.request_resend(expected, seq_num - 1, now).await
    }

    async fn on_target_too_low(
        &mut self,
        message: &Message,
        seq_num: u64,
        expected: u64,
        now: Instant,
    ) -> Result<()> {
        if !message.is_poss_dup() {
            let text = format!("MsgSeqNum too low, expecting {expected} but received {seq_num}");
            return self.logout_and_disconnect(&text, now).await;
        }
        if message.msg_type() == Some(MsgType::SequenceReset) {
            return Ok(());
        }

        let header = message.header();
        let Some(orig) = header.get_field(tags::ORIG_SENDING_TIME) else {
            return self
                .send_reject(
                    message,
                    SessionRejectReason::RequiredTagMissing,
                    Some(tags::ORIG_SENDING_TIME),
                    None,
                    now,
                )
                .await;
        };
        let orig = Timestamp::parse(orig);
        let sending = header.get_field(tags::SENDING_TIME).and_then(Timestamp::parse);
        if let (Some(orig), Some(sending)) = (orig, sending) {
            if orig > sending {
                self.send_reject(
                    message,
                    SessionRejectReason::SendingTimeAccuracyProblem,
                    None,
                    None,
                    now,
                )
                .await?;
                return self
                    .logout_and_disconnect("SendingTime accuracy problem", now)
                    .await;
            }
        }
        debug!(session = %self.id, seq_num, "duplicate message ignored");
        Ok(())
    }

    async fn request_resend(&mut self, begin: u64, end: u64, now: Instant) -> Result<()> {
        if let Some((pending_begin, pending_end)) = self.resend_range {
            if !self.config.send_redundant_resend_requests && begin >= pending_begin {
                self.log.on_event(&format!(
                    "Already sent ResendRequest FROM: {pending_begin} TO: {pending_end}. \
                     Not sending another."
                ));
                return Ok(());
            }
        }
        self.resend_range = Some((begin, end));
        self.log
            .on_event(&format!("Sent ResendRequest FROM: {begin} TO: {end}"));
        self.send_message(messages::resend_request(begin, end), now)
            .await?;
        Ok(())
    }

    /// Processes buffered messages that became in order.
    async fn drain_queue(&mut self, now: Instant) -> Result<()> {
        while self.state.is_logged_on() {
            let expected = self.store.next_target_seq_num();
            let Some(message) = self.resend_queue.take(expected) else {
                break;
            };
            self.log
                .on_event(&format!("Processing queued message: {expected}"));
            match message.msg_type() {
                Some(MsgType::Logon | MsgType::ResendRequest) => {
                    self.store.incr_next_target_seq_num().await?;
                }
                _ => self.process(message, now).await?,
            }
        }

        let expected = self.store.next_target_seq_num();
        self.resend_queue.discard_below(expected);
        if self.state.is_logged_on() && self.resend_range.is_none() {
            if let Some(first) = self.resend_queue.first_seq_num() {
                if first > expected {
                    self.request_resend(expected, first - 1, now).await?;
                }
            }
        }
        Ok(())
    }

    async fn send_reject(
        &mut self,
        message: &Message,
        reason: SessionRejectReason,
        ref_tag: Option<u32>,
        text: Option<&str>,
        now: Instant,
    ) -> Result<()> {
        let ref_seq_num = message.seq_num().unwrap_or(0);
        let reject = messages::reject(
            &self.config.begin_string,
            ref_seq_num,
            reason,
            ref_tag,
            message.header().get_field(tags::MSG_TYPE),
            text,
        );
        self.log.on_event(&format!(
            "Message {ref_seq_num} Rejected: {}",
            text.unwrap_or(reason.text())
        ));
        self.send_message(reject, now).await?;
        Ok(())
    }

    /// Rejects a message and consumes its seqnum when it was the expected one.
    async fn reject_and_advance(
        &mut self,
        message: &Message,
        reason: SessionRejectReason,
        ref_tag: Option<u32>,
        now: Instant,
    ) -> Result<()> {
        self.send_reject(message, reason, ref_tag, None, now).await?;
        if message.seq_num() == Some(self.store.next_target_seq_num()) {
            self.store.incr_next_target_seq_num().await?;
        }
        Ok(())
    }

    async fn reject_from_application(
        &mut self,
        message: &Message,
        reason: RejectReason,
        now: Instant,
    ) -> Result<()> {
        warn!(session = %self.id, %reason, "message rejected by application");
        match reason {
            RejectReason::FieldNotFound { tag } => {
                self.send_reject(
                    message,
                    SessionRejectReason::RequiredTagMissing,
                    Some(tag),
                    None,
                    now,
                )
                .await
            }
            RejectReason::IncorrectTagValue { tag } => {
                self.send_reject(
                    message,
                    SessionRejectReason::ValueIsIncorrect,
                    Some(tag),
                    None,
                    now,
                )
                .await
            }
            RejectReason::IncorrectDataFormat { tag } => {
                self.send_reject(
                    message,
                    SessionRejectReason::IncorrectDataFormat,
                    Some(tag),
                    None,
                    now,
                )
                .await
            }
            RejectReason::UnsupportedMessageType => {
                if is_fix42_or_later(&self.config.begin_string) && !message.is_admin() {
                    let reject = messages::business_reject(
                        message.seq_num().unwrap_or(0),
                        message.header().get_field(tags::MSG_TYPE).unwrap_or_default(),
                        BusinessRejectReason::UnsupportedMessageType,
                        None,
                    );
                    self.send_message(reject, now).await?;
                    Ok(())
                } else {
                    self.send_reject(message, SessionRejectReason::InvalidMsgType, None, None, now)
                        .await
                }
            }
            RejectReason::RejectLogon { text } => self.logout_and_disconnect(&text, now).await,
        }
    }

    /// Passes an admin message to the application and answers a refusal.
    async fn deliver_admin(&mut self, message: &Message, now: Instant) -> Result<()> {
        match self.application.from_admin(message, &self.id).await {
            Ok(()) => Ok(()),
            Err(reason) => self.reject_from_application(message, reason, now).await,
        }
    }

    async fn on_logon(&mut self, message: Message, now: Instant) -> Result<()> {
        if self.state.is_logged_on() {
            self.log.on_event("Received Logon while already logged on");
            return self.disconnect("Duplicate Logon", now).await;
        }
        if !self.is_acceptor() && self.state != SessionState::LogonSent {
            self.log.on_event("Received logon response before sending request");
            return self.disconnect("Unexpected Logon", now).await;
        }
        if !self.config.schedule.is_session_time(Utc::now()) {
            self.log.on_event("Logon attempt not within session time");
            return self.disconnect("Logon outside session time", now).await;
        }
        if !self.enabled {
            self.log.on_event("Session is not enabled for logon");
            return self.logout_and_disconnect("Session is not enabled", now).await;
        }

        let reset_requested = message.body().flag(tags::RESET_SEQ_NUM_FLAG);
        if self.is_acceptor() {
            if self.config.refresh_on_logon {
                self.store.refresh().await?;
            }
            if self.config.reset_on_logon {
                self.store.reset(Utc::now()).await?;
            }
        }
        if reset_requested && !self.reset_sent {
            self.log
                .on_event("Logon contains ResetSeqNumFlag=Y, resetting sequence numbers to 1");
            self.store.reset(Utc::now()).await?;
        }

        if !self.verify(&message, false, true, now).await? {
            return Ok(());
        }

        if let Err(reason) = self.application.from_admin(&message, &self.id).await {
            let text = match reason {
                RejectReason::RejectLogon { text } => text,
                other => other.to_string(),
            };
            self.log.on_event(&format!("Logon rejected: {text}"));
            return self.logout_and_disconnect(&text, now).await;
        }

        match message.body().get::<u64>(tags::HEART_BT_INT) {
            Ok(interval) => self.heartbeat.set_interval(Duration::from_secs(interval)),
            Err(_) if self.is_acceptor() => {
                return self
                    .logout_and_disconnect("HeartBtInt missing or invalid on Logon", now)
                    .await;
            }
            Err(_) => {}
        }

        if self.is_acceptor() {
            self.state = SessionState::LogonReceived;
            self.log.on_event("Received logon request");
            let reply = messages::logon(
                self.heartbeat.interval().as_secs(),
                reset_requested,
                self.default_appl_ver_id(),
            );
            self.send_message(reply, now).await?;
            self.log.on_event("Responding to logon request");
        } else {
            self.log.on_event("Received logon response");
        }

        self.state = SessionState::LoggedOn;
        self.logon_sent_at = None;
        self.connected_at = None;
        self.reset_sent = false;
        info!(
            session = %self.id,
            heartbeat_interval = self.heartbeat.interval().as_secs(),
            "logged on"
        );
        self.application.on_logon(&self.id).await;

        let seq_num = message.seq_num().unwrap_or_default();
        let expected = self.store.next_target_seq_num();
        if seq_num > expected {
            self.on_target_too_high(message, seq_num, expected, now)
                .await
        } else {
            self.store.incr_next_target_seq_num().await?;
            Ok(())
        }
    }

    async fn on_heartbeat(&mut self, message: Message, now: Instant) -> Result<()> {
        if !self.verify(&message, true, true, now).await? {
            return Ok(());
        }
        self.deliver_admin(&message, now).await?;
        self.store.incr_next_target_seq_num().await?;
        Ok(())
    }

    async fn on_test_request(&mut self, message: Message, now: Instant) -> Result<()> {
        if !self.verify(&message, true, true, now).await? {
            return Ok(());
        }
        match message.get_field(tags::TEST_REQ_ID) {
            Some(test_req_id) => {
                self.deliver_admin(&message, now).await?;
                self.send_message(messages::heartbeat(Some(test_req_id)), now)
                    .await?;
            }
            None => {
                self.send_reject(
                    &message,
                    SessionRejectReason::RequiredTagMissing,
                    Some(tags::TEST_REQ_ID),
                    None,
                    now,
                )
                .await?;
            }
        }
        self.store.incr_next_target_seq_num().await?;
        Ok(())
    }

    async fn on_resend_request(&mut self, message: Message, now: Instant) -> Result<()> {
        if !self.verify(&message, false, false, now).await? {
            return Ok(());
        }
        let body = message.body();
        let range = (
            body.get::<u64>(tags::BEGIN_SEQ_NO),
            body.get::<u64>(tags::END_SEQ_NO),
        );
        let (Ok(begin), Ok(end)) = range else {
            let tag = if range.0.is_err() {
                tags::BEGIN_SEQ_NO
            } else {
                tags::END_SEQ_NO
            };
            return self
                .reject_and_advance(
                    &message,
                    SessionRejectReason::RequiredTagMissing,
                    Some(tag),
                    now,
                )
                .await;
        };

        self.deliver_admin(&message, now).await?;
        self.resend(begin, end, now).await?;

        let seq_num = message.seq_num().unwrap_or_default();
        let expected = self.store.next_target_seq_num();
        match validate(expected, seq_num) {
            SequenceResult::Ok => {
                self.store.incr_next_target_seq_num().await?;
                Ok(())
            }
            SequenceResult::Gap { .. } => {
                self.on_target_too_high(message, seq_num, expected, now)
                    .await
            }
            SequenceResult::TooLow { .. } => {
                self.on_target_too_low(&message, seq_num, expected, now)
                    .await
            }
        }
    }

    /// Replays stored messages `[begin, end]` to the counterparty.
    ///
    /// Admin messages, missing seqnums and messages vetoed by `to_app` are
    /// replaced by SequenceReset-GapFill messages. Nothing is persisted and
    /// no new seqnum is consumed.
    async fn resend(&mut self, begin: u64, end: u64, now: Instant) -> Result<()> {
        let last_sent = self.store.next_sender_seq_num().saturating_sub(1);
        let begin = begin.max(1);
        let end = if end == 0 || end > last_sent { last_sent } else { end };
        self.log
            .on_event(&format!("Received ResendRequest FROM: {begin} TO: {end}"));
        if begin > end {
            return Ok(());
        }

        let stored = self.store.get(begin, end).await?;
        let mut gap_begin: Option<u64> = None;
        let mut cursor = begin;
        for raw in stored {
            let Ok(mut message) = decode(&raw, None, &DecodeOptions::default()) else {
                continue;
            };
            let Some(seq_num) = message.seq_num() else {
                continue;
            };
            if seq_num < cursor || seq_num > end {
                continue;
            }
            if seq_num > cursor {
                gap_begin.get_or_insert(cursor);
            }
            cursor = seq_num + 1;

            if message.is_admin() {
                gap_begin.get_or_insert(seq_num);
                continue;
            }

            let sending_time = self.format_time(Timestamp::now());
            let header = message.header_mut();
            if let Some(original) = header.get_field(tags::SENDING_TIME).map(str::to_owned) {
                header.set_field(tags::ORIG_SENDING_TIME, original);
            }
            header.set_bool(tags::POSS_DUP_FLAG, true);
            header.set_field(tags::SENDING_TIME, sending_time);

            if self
                .application
                .to_app(&mut message, &self.id)
                .await
                .is_err()
            {
                gap_begin.get_or_insert(seq_num);
                continue;
            }
            if let Some(gap) = gap_begin.take() {
                self.send_gap_fill(gap, seq_num, now).await?;
            }
            let raw = encode(&message)?.freeze();
            self.log.on_event(&format!("Resending message: {seq_num}"));
            self.transmit(raw, now);
        }

        if cursor <= end {
            gap_begin.get_or_insert(cursor);
        }
        if let Some(gap) = gap_begin {
            self.send_gap_fill(gap, end + 1, now).await?;
        }
        Ok(())
    }

    async fn send_gap_fill(&mut self, begin: u64, new_seq_no: u64, now: Instant) -> Result<()> {
        let sending_time = self.format_time(Timestamp::now());
        let mut gap_fill = messages::sequence_reset(new_seq_no, true);
        self.fill_header(&mut gap_fill, begin, &sending_time);
        let header = gap_fill.header_mut();
        header.set_bool(tags::POSS_DUP_FLAG, true);
        header.set_field(tags::ORIG_SENDING_TIME, sending_time);
        self.application.to_admin(&mut gap_fill, &self.id).await;
        let raw = encode(&gap_fill)?.freeze();
        self.log.on_event(&format!(
            "Sent SequenceReset-GapFill FROM: {begin} TO: {new_seq_no}"
        ));
        self.transmit(raw, now);
        Ok(())
    }

    async fn on_sequence_reset(&mut self, message: Message, now: Instant) -> Result<()> {
        let gap_fill = message.body().flag(tags::GAP_FILL_FLAG);
        if !self.verify(&message, gap_fill, gap_fill, now).await? {
            return Ok(());
        }
        let Ok(new_seq_no) = message.body().get::<u64>(tags::NEW_SEQ_NO) else {
            return self
                .reject_and_advance(
                    &message,
                    SessionRejectReason::RequiredTagMissing,
                    Some(tags::NEW_SEQ_NO),
                    now,
                )
                .await;
        };
        self.deliver_admin(&message, now).await?;

        let expected = self.store.next_target_seq_num();
        self.log.on_event(&format!(
            "Received SequenceReset FROM: {expected} TO: {new_seq_no}"
        ));
        if new_seq_no > expected {
            self.store.set_next_target_seq_num(new_seq_no).await?;
            self.resend_queue.discard_below(new_seq_no);
            if self.resend_range.is_some_and(|(_, end)| new_seq_no > end) {
                self.resend_range = None;
            }
        } else if new_seq_no < expected {
            self.send_reject(
                &message,
                SessionRejectReason::ValueIsIncorrect,
                Some(tags::NEW_SEQ_NO),
                None,
                now,
            )
            .await?;
            if gap_fill && message.seq_num() == Some(expected) {
                self.store.incr_next_target_seq_num().await?;
            }
        }
        Ok(())
    }

    async fn on_reject(&mut self, message: Message, now: Instant) -> Result<()> {
        if !self.verify(&message, false, true, now).await? {
            return Ok(());
        }
        self.deliver_admin(&message, now).await?;
        self.store.incr_next_target_seq_num().await?;
        Ok(())
    }

    async fn on_logout(&mut self, message: Message, now: Instant) -> Result<()> {
        if !self.verify(&message, false, false, now).await? {
            return Ok(());
        }
        // A Logout cannot be rejected; a refusal is only recorded.
        if let Err(reason) = self.application.from_admin(&message, &self.id).await {
            self.log
                .on_event(&format!("Application refused logout ({reason}), logging out anyway"));
        }
        if self.state == SessionState::LogoutSent {
            self.log.on_event("Received logout response");
        } else {
            self.log.on_event("Received logout request");
            self.send_message(messages::logout(None), now).await?;
            self.log.on_event("Sent logout response");
        }
        if message.seq_num() == Some(self.store.next_target_seq_num()) {
            self.store.incr_next_target_seq_num().await?;
        }
        if self.config.reset_on_logout {
            self.store.reset(Utc::now()).await?;
        }
        self.disconnect("Logout", now).await
    }

    async fn on_app(&mut self, message: Message, now: Instant) -> Result<()> {
        if !self.verify(&message, true, true, now).await? {
            return Ok(());
        }
        if let Err(reason) = self.application.from_app(&message, &self.id).await {
            self.reject_from_application(&message, reason, now).await?;
        }
        self.store.incr_next_target_seq_num().await?;
        Ok(())
    }
}

fn elapsed(since: Option<Instant>, now: Instant, timeout: Duration) -> bool {
    since.is_some_and(|at| now.saturating_duration_since(at) >= timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Log;
    use async_trait::async_trait;
    use fixgate_core::types::CompId;
    use fixgate_store::MemoryStore;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockResponder {
        sent: Mutex<Vec<Bytes>>,
        disconnected: AtomicBool,
    }

    impl Responder for MockResponder {
        fn send(&self, message: Bytes) -> bool {
            self.sent.lock().push(message);
            true
        }

        fn disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    impl MockResponder {
        fn take(&self) -> Vec<Message> {
            self.sent
                .lock()
                .drain(..)
                .map(|raw| decode(&raw, None, &DecodeOptions::default()).unwrap())
                .collect()
        }

        fn is_disconnected(&self) -> bool {
            self.disconnected.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingApp {
        received: Mutex<Vec<u64>>,
        logons: AtomicUsize,
        logouts: AtomicUsize,
        app_reject: Mutex<Option<RejectReason>>,
        refuse_logon: Mutex<Option<String>>,
        refuse_logout: AtomicBool,
        veto_outbound: AtomicBool,
    }

    #[derive(Default)]
    struct EventLog {
        events: Mutex<Vec<String>>,
    }

    impl Log for EventLog {
        fn on_incoming(&self, _message: &[u8]) {}

        fn on_outgoing(&self, _message: &[u8]) {}

        fn on_event(&self, text: &str) {
            self.events.lock().push(text.to_owned());
        }
    }

    impl EventLog {
        fn contains(&self, needle: &str) -> bool {
            self.events.lock().iter().any(|event| event.contains(needle))
        }
    }

    #[async_trait]
    impl Application for RecordingApp {
        async fn on_logon(&self, _session_id: &SessionId) {
            self.logons.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_logout(&self, _session_id: &SessionId) {
            self.logouts.fetch_add(1, Ordering::SeqCst);
        }

        async fn from_admin(
            &self,
            message: &Message,
            _session_id: &SessionId,
        ) -> std::result::Result<(), RejectReason> {
            let refusal = self.refuse_logon.lock().clone();
            match refusal {
                Some(text) if message.msg_type() == Some(MsgType::Logon) => {
                    Err(RejectReason::RejectLogon { text })
                }
                _ if message.msg_type() == Some(MsgType::Logout)
                    && self.refuse_logout.load(Ordering::SeqCst) =>
                {
                    Err(RejectReason::UnsupportedMessageType)
                }
                _ => Ok(()),
            }
        }

        async fn to_app(
            &self,
            _message: &mut Message,
            _session_id: &SessionId,
        ) -> std::result::Result<(), crate::application::DoNotSend> {
            if self.veto_outbound.load(Ordering::SeqCst) {
                Err(crate::application::DoNotSend)
            } else {
                Ok(())
            }
        }

        async fn from_app(
            &self,
            message: &Message,
            _session_id: &SessionId,
        ) -> std::result::Result<(), RejectReason> {
            self.received.lock().push(message.seq_num().unwrap_or(0));
            let reject = self.app_reject.lock().clone();
            match reject {
                Some(reason) => Err(reason),
                None => Ok(()),
            }
        }
    }

    struct Harness {
        session: Session,
        responder: Arc<MockResponder>,
        app: Arc<RecordingApp>,
        store: Arc<MemoryStore>,
        log: Arc<EventLog>,
        t0: Instant,
    }

    fn config(connection_type: ConnectionType) -> SessionConfig {
        let (sender, target) = match connection_type {
            ConnectionType::Initiator => ("CLIENT", "EXEC"),
            ConnectionType::Acceptor => ("EXEC", "CLIENT"),
        };
        SessionConfig::new(
            CompId::new(sender).unwrap(),
            CompId::new(target).unwrap(),
            "FIX.4.4",
        )
        .with_connection_type(connection_type)
    }

    /// Stamps a counterparty header on a message.
    fn from_peer(mut message: Message, harness_config: &SessionConfig, seq_num: u64) -> Message {
        let header = message.header_mut();
        header.set_field(tags::BEGIN_STRING, "FIX.4.4");
        header.set_field(tags::SENDER_COMP_ID, harness_config.target_comp_id.as_str());
        header.set_field(tags::TARGET_COMP_ID, harness_config.sender_comp_id.as_str());
        header.set_uint(tags::MSG_SEQ_NUM, seq_num);
        header.set_field(tags::SENDING_TIME, Timestamp::now().format_millis().as_str());
        message
    }

    fn order() -> Message {
        Message::with_msg_type(&MsgType::NewOrderSingle).with_field(11, "ORD-1")
    }

    async fn harness(config: SessionConfig) -> Harness {
        let app = Arc::new(RecordingApp::default());
        let store = Arc::new(MemoryStore::new());
        let log = Arc::new(EventLog::default());
        let session = Session::new(config, store.clone(), log.clone(), app.clone()).await;
        Harness {
            session,
            responder: Arc::new(MockResponder::default()),
            app,
            store,
            log,
            t0: Instant::now(),
        }
    }

    impl Harness {
        async fn receive(&mut self, message: Message, seq_num: u64) {
            let message = from_peer(message, self.session.config(), seq_num);
            let raw = encode(&message).unwrap();
            self.session.next(&raw, self.t0).await.unwrap();
        }

        async fn receive_at(&mut self, message: Message, seq_num: u64, at: Instant) {
            let message = from_peer(message, self.session.config(), seq_num);
            let raw = encode(&message).unwrap();
            self.session.next(&raw, at).await.unwrap();
        }
    }

    async fn logged_on_initiator() -> Harness {
        let mut h = harness(config(ConnectionType::Initiator)).await;
        h.session.connect(h.responder.clone(), h.t0).await.unwrap();
        let sent = h.responder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type(), Some(MsgType::Logon));
        assert_eq!(h.session.state(), SessionState::LogonSent);

        h.receive(messages::logon(30, false, None), 1).await;
        assert_eq!(h.session.state(), SessionState::LoggedOn);
        h
    }

    fn count(messages: &[Message], msg_type: MsgType) -> usize {
        messages
            .iter()
            .filter(|m| m.msg_type() == Some(msg_type.clone()))
            .count()
    }

    #[tokio::test]
    async fn test_initiator_logon() {
        let h = logged_on_initiator().await;
        assert_eq!(h.app.logons.load(Ordering::SeqCst), 1);
        assert_eq!(h.session.next_sender_seq_num(), 2);
        assert_eq!(h.session.next_target_seq_num(), 2);
        assert_eq!(h.session.heartbeat_interval(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_acceptor_logon_reply() {
        let mut h = harness(config(ConnectionType::Acceptor)).await;
        h.session.connect(h.responder.clone(), h.t0).await.unwrap();
        assert!(h.responder.take().is_empty());

        h.receive(messages::logon(20, false, None), 1).await;
        assert!(h.session.is_logged_on());
        assert_eq!(h.session.heartbeat_interval(), Duration::from_secs(20));

        let sent = h.responder.take();
        assert_eq!(sent.len(), 1);
        let reply = &sent[0];
        assert_eq!(reply.msg_type(), Some(MsgType::Logon));
        assert_eq!(reply.get_field(tags::HEART_BT_INT), Some("20"));
        assert_eq!(reply.header().get_field(tags::SENDER_COMP_ID), Some("EXEC"));
        assert_eq!(reply.header().get_field(tags::TARGET_COMP_ID), Some("CLIENT"));
        assert_eq!(reply.seq_num(), Some(1));
    }

    #[tokio::test]
    async fn test_acceptor_rejects_logon() {
        let mut h = harness(config(ConnectionType::Acceptor)).await;
        *h.app.refuse_logon.lock() = Some("bad password".to_owned());
        h.session.connect(h.responder.clone(), h.t0).await.unwrap();

        h.receive(messages::logon(30, false, None), 1).await;

        let sent = h.responder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type(), Some(MsgType::Logout));
        assert_eq!(sent[0].get_field(tags::TEXT), Some("bad password"));
        assert!(h.responder.is_disconnected());
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.app.logons.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_message_before_logon_disconnects() {
        let mut h = harness(config(ConnectionType::Acceptor)).await;
        h.session.connect(h.responder.clone(), h.t0).await.unwrap();
        h.receive(order(), 1).await;
        assert!(h.responder.is_disconnected());
        assert!(h.app.received.lock().is_empty());
    }

    #[tokio::test]
    async fn test_in_order_messages_delivered_once() {
        let mut h = logged_on_initiator().await;
        for seq in 2..=4 {
            h.receive(order(), seq).await;
        }
        assert_eq!(*h.app.received.lock(), vec![2, 3, 4]);
        assert_eq!(h.session.next_target_seq_num(), 5);
        assert!(h.responder.take().is_empty());
    }

    #[tokio::test]
    async fn test_gap_requests_resend_once() {
        let mut h = logged_on_initiator().await;
        h.responder.take();
        h.receive(order(), 2).await;
        h.receive(order(), 5).await;
        h.receive(order(), 6).await;

        let sent = h.responder.take();
        assert_eq!(count(&sent, MsgType::ResendRequest), 1);
        let request = &sent[0];
        assert_eq!(request.get_field(tags::BEGIN_SEQ_NO), Some("3"));
        assert_eq!(request.get_field(tags::END_SEQ_NO), Some("4"));
        assert_eq!(*h.app.received.lock(), vec![2]);

        for seq in 3..=4 {
            let mut resent = order();
            resent.header_mut().set_bool(tags::POSS_DUP_FLAG, true);
            h.receive(resent, seq).await;
        }
        assert_eq!(*h.app.received.lock(), vec![2, 3, 4, 5, 6]);
        assert_eq!(h.session.next_target_seq_num(), 7);
        assert!(h.responder.take().is_empty());
    }

    #[tokio::test]
    async fn test_logon_seq_too_high_requests_resend() {
        let mut h = harness(config(ConnectionType::Initiator)).await;
        h.session.connect(h.responder.clone(), h.t0).await.unwrap();
        h.responder.take();

        h.receive(messages::logon(30, false, None), 3).await;
        assert!(h.session.is_logged_on());
        let sent = h.responder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get_field(tags::BEGIN_SEQ_NO), Some("1"));
        assert_eq!(sent[0].get_field(tags::END_SEQ_NO), Some("2"));

        h.receive(order(), 1).await;
        h.receive(order(), 2).await;
        // The queued Logon only consumes its seqnum.
        assert_eq!(h.session.next_target_seq_num(), 4);
        assert_eq!(*h.app.received.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_seq_too_low_logs_out() {
        let mut h = logged_on_initiator().await;
        h.receive(order(), 2).await;
        h.responder.take();

        h.receive(order(), 2).await;
        let sent = h.responder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type(), Some(MsgType::Logout));
        assert_eq!(
            sent[0].get_field(tags::TEXT),
            Some("MsgSeqNum too low, expecting 3 but received 2")
        );
        assert!(h.responder.is_disconnected());
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(*h.app.received.lock(), vec![2]);
        assert_eq!(h.app.logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poss_dup_too_low_is_ignored() {
        let mut h = logged_on_initiator().await;
        h.receive(order(), 2).await;

        let mut duplicate = order();
        let original = Timestamp::now().format_millis();
        duplicate.header_mut().set_bool(tags::POSS_DUP_FLAG, true);
        duplicate
            .header_mut()
            .set_field(tags::ORIG_SENDING_TIME, original.as_str());
        h.receive(duplicate, 2).await;

        assert!(h.session.is_logged_on());
        assert!(h.responder.take().is_empty());
        assert_eq!(*h.app.received.lock(), vec![2]);
    }

    #[tokio::test]
    async fn test_poss_dup_without_orig_sending_time_rejected() {
        let mut h = logged_on_initiator().await;
        h.receive(order(), 2).await;

        let mut duplicate = order();
        duplicate.header_mut().set_bool(tags::POSS_DUP_FLAG, true);
        h.receive(duplicate, 2).await;

        let sent = h.responder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type(), Some(MsgType::Reject));
        assert_eq!(sent[0].get_field(tags::REF_TAG_ID), Some("122"));
        assert_eq!(sent[0].get_field(tags::SESSION_REJECT_REASON), Some("1"));
        assert!(h.session.is_logged_on());
    }

    #[tokio::test]
    async fn test_comp_id_mismatch() {
        let mut h = logged_on_initiator().await;
        let mut message = from_peer(order(), h.session.config(), 2);
        message.header_mut().set_field(tags::SENDER_COMP_ID, "INTRUDER");
        let raw = encode(&message).unwrap();
        h.session.next(&raw, h.t0).await.unwrap();

        let sent = h.responder.take();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].msg_type(), Some(MsgType::Reject));
        assert_eq!(sent[0].get_field(tags::SESSION_REJECT_REASON), Some("9"));
        assert_eq!(sent[1].msg_type(), Some(MsgType::Logout));
        assert!(h.responder.is_disconnected());
    }

    #[tokio::test]
    async fn test_heartbeat_timeline() {
        let mut h = logged_on_initiator().await;
        h.responder.take();
        let wall = Utc::now();
        let at = |secs| h.t0 + Duration::from_secs(secs);

        h.session.on_tick(at(29), wall).await.unwrap();
        assert!(h.responder.take().is_empty());

        h.session.on_tick(at(30), wall).await.unwrap();
        let sent = h.responder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type(), Some(MsgType::Heartbeat));

        h.session.on_tick(at(45), wall).await.unwrap();
        let sent = h.responder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type(), Some(MsgType::TestRequest));
        assert!(sent[0].get_field(tags::TEST_REQ_ID).is_some());

        h.session.on_tick(at(59), wall).await.unwrap();
        assert!(h.session.is_logged_on());

        h.session.on_tick(at(60), wall).await.unwrap();
        assert!(h.responder.is_disconnected());
        assert_eq!(h.session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_inbound_traffic_defers_test_request() {
        let mut h = logged_on_initiator().await;
        h.responder.take();
        let wall = Utc::now();
        let later = h.t0 + Duration::from_secs(40);
        h.receive_at(messages::heartbeat(None), 2, later).await;

        h.session
            .on_tick(h.t0 + Duration::from_secs(50), wall)
            .await
            .unwrap();
        let sent = h.responder.take();
        assert_eq!(count(&sent, MsgType::TestRequest), 0);
        assert_eq!(count(&sent, MsgType::Heartbeat), 1);
    }

    #[tokio::test]
    async fn test_test_request_answered() {
        let mut h = logged_on_initiator().await;
        h.receive(messages::test_request("PING-1"), 2).await;
        let sent = h.responder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type(), Some(MsgType::Heartbeat));
        assert_eq!(sent[0].get_field(tags::TEST_REQ_ID), Some("PING-1"));
        assert_eq!(h.session.next_target_seq_num(), 3);
    }

    #[tokio::test]
    async fn test_resend_with_gap_fill() {
        let mut h = logged_on_initiator().await;
        assert!(h.session.send(order(), h.t0).await.unwrap());
        h.session
            .send(messages::heartbeat(None), h.t0)
            .await
            .unwrap();
        h.session.send(order(), h.t0).await.unwrap();
        h.responder.take();
        assert_eq!(h.session.next_sender_seq_num(), 5);

        h.receive(messages::resend_request(2, 0), 2).await;
        let sent = h.responder.take();
        assert_eq!(sent.len(), 3);

        assert_eq!(sent[0].msg_type(), Some(MsgType::NewOrderSingle));
        assert_eq!(sent[0].seq_num(), Some(2));
        assert!(sent[0].is_poss_dup());
        assert!(sent[0].header().has_field(tags::ORIG_SENDING_TIME));

        assert_eq!(sent[1].msg_type(), Some(MsgType::SequenceReset));
        assert_eq!(sent[1].seq_num(), Some(3));
        assert_eq!(sent[1].get_field(tags::GAP_FILL_FLAG), Some("Y"));
        assert_eq!(sent[1].get_field(tags::NEW_SEQ_NO), Some("4"));

        assert_eq!(sent[2].seq_num(), Some(4));
        assert!(sent[2].is_poss_dup());

        assert_eq!(h.session.next_sender_seq_num(), 5);
        assert_eq!(h.session.next_target_seq_num(), 3);
    }

    #[tokio::test]
    async fn test_resend_of_vetoed_message_becomes_gap_fill() {
        let mut h = logged_on_initiator().await;
        h.session.send(order(), h.t0).await.unwrap();
        h.responder.take();
        h.app.veto_outbound.store(true, Ordering::SeqCst);

        h.receive(messages::resend_request(1, 2), 2).await;
        let sent = h.responder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type(), Some(MsgType::SequenceReset));
        assert_eq!(sent[0].seq_num(), Some(1));
        assert_eq!(sent[0].get_field(tags::NEW_SEQ_NO), Some("3"));
    }

    #[tokio::test]
    async fn test_sequence_reset() {
        let mut h = logged_on_initiator().await;
        let mut gap_fill = messages::sequence_reset(10, true);
        gap_fill.header_mut().set_bool(tags::POSS_DUP_FLAG, true);
        h.receive(gap_fill, 2).await;
        assert_eq!(h.session.next_target_seq_num(), 10);

        h.receive(messages::sequence_reset(4, false), 10).await;
        let sent = h.responder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type(), Some(MsgType::Reject));
        assert_eq!(sent[0].get_field(tags::REF_TAG_ID), Some("36"));
        assert_eq!(sent[0].get_field(tags::SESSION_REJECT_REASON), Some("5"));

        h.receive(messages::sequence_reset(20, false), 99).await;
        assert_eq!(h.session.next_target_seq_num(), 20);
    }

    #[tokio::test]
    async fn test_application_rejects() {
        let mut h = logged_on_initiator().await;

        *h.app.app_reject.lock() = Some(RejectReason::FieldNotFound { tag: 55 });
        h.receive(order(), 2).await;
        let sent = h.responder.take();
        assert_eq!(sent[0].msg_type(), Some(MsgType::Reject));
        assert_eq!(sent[0].get_field(tags::REF_SEQ_NUM), Some("2"));
        assert_eq!(sent[0].get_field(tags::REF_TAG_ID), Some("55"));
        assert_eq!(sent[0].get_field(tags::SESSION_REJECT_REASON), Some("1"));

        *h.app.app_reject.lock() = Some(RejectReason::UnsupportedMessageType);
        h.receive(order(), 3).await;
        let sent = h.responder.take();
        assert_eq!(sent[0].msg_type(), Some(MsgType::BusinessMessageReject));
        assert_eq!(sent[0].get_field(tags::BUSINESS_REJECT_REASON), Some("3"));
        assert_eq!(sent[0].get_field(tags::REF_MSG_TYPE), Some("D"));

        assert!(h.session.is_logged_on());
        assert_eq!(h.session.next_target_seq_num(), 4);
    }

    #[tokio::test]
    async fn test_invalid_message_rejected() {
        let mut h = logged_on_initiator().await;
        let message = from_peer(order().with_field(tags::TEXT, ""), h.session.config(), 2);
        let raw = encode(&message).unwrap();
        h.session.next(&raw, h.t0).await.unwrap();

        let sent = h.responder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type(), Some(MsgType::Reject));
        assert_eq!(sent[0].get_field(tags::SESSION_REJECT_REASON), Some("4"));
        assert_eq!(sent[0].get_field(tags::REF_TAG_ID), Some("58"));
        assert_eq!(h.session.next_target_seq_num(), 3);
        assert!(h.app.received.lock().is_empty());
    }

    #[tokio::test]
    async fn test_garbled_message_dropped() {
        let mut h = logged_on_initiator().await;
        let message = from_peer(order(), h.session.config(), 2);
        let mut raw = encode(&message).unwrap().to_vec();
        let len = raw.len();
        raw[len - 2] = if raw[len - 2] == b'0' { b'1' } else { b'0' };
        h.session.next(&raw, h.t0).await.unwrap();

        assert!(h.responder.take().is_empty());
        assert!(h.session.is_logged_on());
        assert_eq!(h.session.next_target_seq_num(), 2);
    }

    #[tokio::test]
    async fn test_logout_handshake() {
        let mut h = logged_on_initiator().await;
        h.session.logout(Some("done"), h.t0).await.unwrap();
        assert_eq!(h.session.state(), SessionState::LogoutSent);
        assert!(!h.session.is_enabled());
        let sent = h.responder.take();
        assert_eq!(sent[0].get_field(tags::TEXT), Some("done"));

        h.receive(messages::logout(None), 2).await;
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert!(h.responder.take().is_empty());
        assert_eq!(h.app.logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_logout_timeout() {
        let mut h = logged_on_initiator().await;
        h.session.logout(None, h.t0).await.unwrap();
        h.session
            .on_tick(h.t0 + Duration::from_secs(2), Utc::now())
            .await
            .unwrap();
        assert!(h.responder.is_disconnected());
    }

    #[tokio::test]
    async fn test_peer_logout_is_answered() {
        let mut h = logged_on_initiator().await;
        h.receive(messages::logout(Some("bye")), 2).await;
        let sent = h.responder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type(), Some(MsgType::Logout));
        assert!(h.responder.is_disconnected());
    }

    #[tokio::test]
    async fn test_refused_peer_logout_still_completes() {
        let mut h = logged_on_initiator().await;
        h.app.refuse_logout.store(true, Ordering::SeqCst);
        h.receive(messages::logout(Some("bye")), 2).await;

        let sent = h.responder.take();
        assert_eq!(count(&sent, MsgType::Logout), 1);
        assert_eq!(count(&sent, MsgType::Reject), 0);
        assert!(h.responder.is_disconnected());
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.session.next_target_seq_num(), 3);
        assert!(h.log.contains("Application refused logout"));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_stored() {
        let mut h = harness(config(ConnectionType::Initiator)).await;
        assert!(h.session.send(order(), h.t0).await.unwrap());
        assert_eq!(h.session.next_sender_seq_num(), 2);
        assert_eq!(h.store.get(1, 1).await.unwrap().len(), 1);
        assert!(h.responder.take().is_empty());
    }

    #[tokio::test]
    async fn test_logon_timeout() {
        let mut h = harness(config(ConnectionType::Initiator)).await;
        h.session.connect(h.responder.clone(), h.t0).await.unwrap();
        h.session
            .on_tick(h.t0 + Duration::from_secs(10), Utc::now())
            .await
            .unwrap();
        assert!(h.responder.is_disconnected());
        assert!(!h.session.is_connected());
    }

    #[tokio::test]
    async fn test_second_connect_fails() {
        let mut h = harness(config(ConnectionType::Acceptor)).await;
        h.session.connect(h.responder.clone(), h.t0).await.unwrap();
        let again = h.session.connect(h.responder.clone(), h.t0).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_reset_on_logon() {
        let config = config(ConnectionType::Initiator).with_reset_on_logon(true);
        let mut h = harness(config).await;
        h.store.set_next_sender_seq_num(40).await.unwrap();
        h.store.set_next_target_seq_num(40).await.unwrap();

        h.session.connect(h.responder.clone(), h.t0).await.unwrap();
        let sent = h.responder.take();
        assert_eq!(sent[0].seq_num(), Some(1));
        assert_eq!(sent[0].get_field(tags::RESET_SEQ_NUM_FLAG), Some("Y"));

        h.receive(messages::logon(30, true, None), 1).await;
        assert!(h.session.is_logged_on());
        assert_eq!(h.session.next_sender_seq_num(), 2);
        assert_eq!(h.session.next_target_seq_num(), 2);
    }
}
