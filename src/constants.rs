//! Metadata keys shared by all parties of an exchange

/// Set on outgoing commands, holds the [`OperationId`](crate::reply::OperationId) of the exchange
pub const OPERATION_ID_METADATA_KEY: &str = "_replybus_operation_id";

/// Set on outgoing commands whose sender waits for a notification
pub const NOTIFY_WHEN_EXECUTED_METADATA_KEY: &str = "_replybus_notify_when_executed";

/// Value of [`NOTIFY_WHEN_EXECUTED_METADATA_KEY`] which enables notifications
pub const NOTIFY_WHEN_EXECUTED_VALUE: &str = "1";

/// Set on notifications, holds the operation id of the command that has been handled
pub const HANDLED_OPERATION_ID_METADATA_KEY: &str = "_replybus_handled_operation_id";

/// Set on outgoing commands by the [`PubSubCommandBus`](crate::command::PubSubCommandBus)
pub const COMMAND_NAME_METADATA_KEY: &str = "_replybus_command_name";
