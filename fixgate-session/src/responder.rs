/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Outbound side of a connection as seen by the session.

use bytes::Bytes;

/// Hands encoded messages to the transport of the current connection.
pub trait Responder: Send + Sync {
    /// Queues a complete message for writing.
    ///
    /// # Returns
    /// `false` if the connection is already gone.
    fn send(&self, message: Bytes) -> bool;

    /// Closes the connection after queued messages are flushed.
    fn disconnect(&self);
}
