//! Request/reply on top of one-way publish and subscribe messaging
//!
//! Messaging systems which only offer topic based publishing and subscribing have no notion of
//! an answer to a message. This crate layers a correlation protocol over such a system so that
//! a caller can send a [`Command`](command::Command) and await the outcome of whatever handler
//! processed it, be it a typed result or an error.
//!
//! The modules form a chain of dependencies from the low-level [`message`] envelope and
//! [`transport`] traits, over [`marshal`]ing and the [`command`] pipeline, up to the
//! [`reply`] module which contains the actual correlation logic.

#![deny(missing_docs)]

pub mod constants;
pub mod command;
pub mod marshal;
pub mod message;
pub mod reply;
pub mod transport;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result with no value and a [`BoxedError`]
pub type EmptyResult = Result<(), BoxedError>;
