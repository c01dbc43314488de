//! Error types for channel operations.
//!
//! Every fallible operation returns one of these by value; failed sends
//! hand the rejected message(s) back to the caller.

use core::fmt;

/// Error returned when [`Sender::send`](crate::Sender::send) fails due to
/// disconnection.
///
/// Contains the message that could not be sent, allowing recovery of the
/// value. [`Sender::send_batch`](crate::Sender::send_batch) uses the same
/// type with the unsent batch collected into a `Vec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Returns the message that could not be sent.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "receiver disconnected")
    }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {}

/// Error returned by [`Sender::try_send`](crate::Sender::try_send).
///
/// The channel is unbounded, so the only failure is a permanently gone
/// receiver; there is no transient `Full` case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The receiver has been dropped.
    ///
    /// The message is returned for cleanup. Terminal: no later call can
    /// succeed.
    Disconnected(T),
}

impl<T> TrySendError<T> {
    /// Returns the message that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Disconnected(value) => value,
        }
    }

    /// Returns `true` if this error is the `Disconnected` variant.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected(_) => write!(f, "receiver disconnected"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for TrySendError<T> {}

/// Error returned when [`Receiver::recv`](crate::Receiver::recv) fails due
/// to disconnection.
///
/// This error occurs when every sender has been dropped and no messages
/// remain in the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvError;

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all senders disconnected")
    }
}

impl std::error::Error for RecvError {}

/// Error returned by [`Receiver::try_recv`](crate::Receiver::try_recv).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// The channel is empty but at least one sender is still alive.
    ///
    /// Transient: a message may arrive later, so retrying (or escalating
    /// to [`Receiver::recv`](crate::Receiver::recv)) is safe.
    Empty,

    /// Every sender has been dropped and no messages remain.
    ///
    /// Terminal: no later call can succeed.
    Disconnected,
}

impl TryRecvError {
    /// Returns `true` if this error is the `Empty` variant.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns `true` if this error is the `Disconnected` variant.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "channel empty"),
            Self::Disconnected => write!(f, "all senders disconnected"),
        }
    }
}

impl std::error::Error for TryRecvError {}
