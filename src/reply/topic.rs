//! Common strategies for deriving notification topics
//!
//! A dedicated topic per operation keeps unrelated notifications away from a listener, but
//! requires a transport which copes with a large number of short-lived topics. A shared topic
//! works with any transport, each listener then filters out the notifications of others.

use super::TopicParams;
use crate::BoxedError;

/// Derives a dedicated topic for every operation by appending the operation id to `prefix`
pub fn per_operation_topic(
    prefix: impl Into<String>,
) -> impl Fn(TopicParams<'_>) -> Result<String, BoxedError> + Send + Sync + 'static {
    let prefix = prefix.into();
    move |params| Ok(format!("{}.{}", prefix, params.operation_id))
}

/// Sends the notifications of all operations to the same topic
pub fn shared_topic(
    name: impl Into<String>,
) -> impl Fn(TopicParams<'_>) -> Result<String, BoxedError> + Send + Sync + 'static {
    let name = name.into();
    move |_| Ok(name.clone())
}
