/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Builders for session-level messages.
//!
//! Only the body is filled in; the session completes the header
//! (BeginString, CompIDs, MsgSeqNum, SendingTime) when sending.

use crate::reject::{BusinessRejectReason, SessionRejectReason};
use fixgate_core::field::tags;
use fixgate_core::message::{Message, MsgType};

/// Returns true for FIX.4.2 and later, including FIXT.
///
/// Older versions have no RefTagID/RefMsgType/SessionRejectReason on
/// Reject and no BusinessMessageReject.
#[must_use]
pub fn is_fix42_or_later(begin_string: &str) -> bool {
    let Some(version) = begin_string.strip_prefix("FIX.") else {
        return begin_string.starts_with("FIXT");
    };
    let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    (major, minor) >= (4, 2)
}

/// Logon (A).
#[must_use]
pub fn logon(heart_bt_int: u64, reset_seq_num: bool, default_appl_ver_id: Option<&str>) -> Message {
    let mut message = Message::with_msg_type(&MsgType::Logon);
    let body = message.body_mut();
    body.set_uint(tags::ENCRYPT_METHOD, 0);
    body.set_uint(tags::HEART_BT_INT, heart_bt_int);
    if reset_seq_num {
        body.set_bool(tags::RESET_SEQ_NUM_FLAG, true);
    }
    if let Some(appl_ver_id) = default_appl_ver_id {
        body.set_field(tags::DEFAULT_APPL_VER_ID, appl_ver_id);
    }
    message
}

/// Logout (5) with an optional Text.
#[must_use]
pub fn logout(text: Option<&str>) -> Message {
    let mut message = Message::with_msg_type(&MsgType::Logout);
    if let Some(text) = text {
        message.set_field(tags::TEXT, text);
    }
    message
}

/// Heartbeat (0), echoing a TestReqID when answering a TestRequest.
#[must_use]
pub fn heartbeat(test_req_id: Option<&str>) -> Message {
    let mut message = Message::with_msg_type(&MsgType::Heartbeat);
    if let Some(id) = test_req_id {
        message.set_field(tags::TEST_REQ_ID, id);
    }
    message
}

/// TestRequest (1).
#[must_use]
pub fn test_request(test_req_id: &str) -> Message {
    Message::with_msg_type(&MsgType::TestRequest).with_field(tags::TEST_REQ_ID, test_req_id)
}

/// ResendRequest (2) for `[begin, end]`.
#[must_use]
pub fn resend_request(begin: u64, end: u64) -> Message {
    let mut message = Message::with_msg_type(&MsgType::ResendRequest);
    message.body_mut().set_uint(tags::BEGIN_SEQ_NO, begin);
    message.body_mut().set_uint(tags::END_SEQ_NO, end);
    message
}

/// SequenceReset (4); with `gap_fill` it replaces messages during a resend.
#[must_use]
pub fn sequence_reset(new_seq_no: u64, gap_fill: bool) -> Message {
    let mut message = Message::with_msg_type(&MsgType::SequenceReset);
    if gap_fill {
        message.body_mut().set_bool(tags::GAP_FILL_FLAG, true);
    }
    message.body_mut().set_uint(tags::NEW_SEQ_NO, new_seq_no);
    message
}

/// Session-level Reject (3) of the message `ref_seq_num`.
///
/// RefTagID, RefMsgType and SessionRejectReason are only written for
/// versions that define them; the reason text is used as Text otherwise.
#[must_use]
pub fn reject(
    begin_string: &str,
    ref_seq_num: u64,
    reason: SessionRejectReason,
    ref_tag: Option<u32>,
    ref_msg_type: Option<&str>,
    text: Option<&str>,
) -> Message {
    let mut message = Message::with_msg_type(&MsgType::Reject);
    let body = message.body_mut();
    body.set_uint(tags::REF_SEQ_NUM, ref_seq_num);
    if is_fix42_or_later(begin_string) {
        if let Some(tag) = ref_tag {
            body.set_uint(tags::REF_TAG_ID, u64::from(tag));
        }
        if let Some(msg_type) = ref_msg_type {
            body.set_field(tags::REF_MSG_TYPE, msg_type);
        }
        body.set_uint(tags::SESSION_REJECT_REASON, u64::from(reason.code()));
    }
    body.set_field(tags::TEXT, text.unwrap_or(reason.text()));
    message
}

/// BusinessMessageReject (j) of the message `ref_seq_num`.
#[must_use]
pub fn business_reject(
    ref_seq_num: u64,
    ref_msg_type: &str,
    reason: BusinessRejectReason,
    text: Option<&str>,
) -> Message {
    let mut message = Message::with_msg_type(&MsgType::BusinessMessageReject);
    let body = message.body_mut();
    body.set_uint(tags::REF_SEQ_NUM, ref_seq_num);
    body.set_field(tags::REF_MSG_TYPE, ref_msg_type);
    body.set_uint(tags::BUSINESS_REJECT_REASON, u64::from(reason.code()));
    body.set_field(tags::TEXT, text.unwrap_or(reason.text()));
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_fix42_or_later() {
        assert!(!is_fix42_or_later("FIX.4.0"));
        assert!(!is_fix42_or_later("FIX.4.1"));
        assert!(is_fix42_or_later("FIX.4.2"));
        assert!(is_fix42_or_later("FIX.4.4"));
        assert!(is_fix42_or_later("FIXT.1.1"));
    }

    #[test]
    fn test_logon_fields() {
        let message = logon(30, true, Some("9"));
        assert_eq!(message.msg_type(), Some(MsgType::Logon));
        assert_eq!(message.get_field(tags::HEART_BT_INT), Some("30"));
        assert_eq!(message.get_field(tags::ENCRYPT_METHOD), Some("0"));
        assert_eq!(message.get_field(tags::RESET_SEQ_NUM_FLAG), Some("Y"));
        assert_eq!(message.get_field(tags::DEFAULT_APPL_VER_ID), Some("9"));

        assert!(!logon(30, false, None).body().has_field(tags::RESET_SEQ_NUM_FLAG));
    }

    #[test]
    fn test_reject_by_version() {
        let modern = reject(
            "FIX.4.4",
            7,
            SessionRejectReason::RequiredTagMissing,
            Some(55),
            Some("D"),
            None,
        );
        assert_eq!(modern.get_field(tags::REF_SEQ_NUM), Some("7"));
        assert_eq!(modern.get_field(tags::REF_TAG_ID), Some("55"));
        assert_eq!(modern.get_field(tags::REF_MSG_TYPE), Some("D"));
        assert_eq!(modern.get_field(tags::SESSION_REJECT_REASON), Some("1"));
        assert_eq!(modern.get_field(tags::TEXT), Some("Required tag missing"));

        let legacy = reject(
            "FIX.4.1",
            7,
            SessionRejectReason::RequiredTagMissing,
            Some(55),
            None,
            Some("missing symbol"),
        );
        assert!(!legacy.body().has_field(tags::SESSION_REJECT_REASON));
        assert!(!legacy.body().has_field(tags::REF_TAG_ID));
        assert_eq!(legacy.get_field(tags::TEXT), Some("missing symbol"));
    }

    #[test]
    fn test_recovery_messages() {
        let request = resend_request(3, 4);
        assert_eq!(request.get_field(tags::BEGIN_SEQ_NO), Some("3"));
        assert_eq!(request.get_field(tags::END_SEQ_NO), Some("4"));

        let gap_fill = sequence_reset(10, true);
        assert_eq!(gap_fill.get_field(tags::GAP_FILL_FLAG), Some("Y"));
        assert_eq!(gap_fill.get_field(tags::NEW_SEQ_NO), Some("10"));
        assert!(!sequence_reset(10, false).body().has_field(tags::GAP_FILL_FLAG));

        let bmr = business_reject(4, "X", BusinessRejectReason::UnsupportedMessageType, None);
        assert_eq!(bmr.get_field(tags::BUSINESS_REJECT_REASON), Some("3"));
        assert_eq!(bmr.get_field(tags::TEXT), Some("Unsupported Message Type"));

        assert_eq!(heartbeat(Some("T1")).get_field(tags::TEST_REQ_ID), Some("T1"));
        assert_eq!(test_request("T2").get_field(tags::TEST_REQ_ID), Some("T2"));
        assert_eq!(logout(Some("bye")).get_field(tags::TEXT), Some("bye"));
    }
}
