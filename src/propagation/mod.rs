//! Causal context propagation across the pubsub boundary.
//!
//! Producers inject the current [`Context`]'s causal fields into the outgoing
//! message metadata; consumers extract them back before the handler runs.
//!
//! ## Metadata layout
//!
//! | key                | value                                   |
//! |--------------------|-----------------------------------------|
//! | `correlation_id`   | opaque correlation id                   |
//! | `traceparent`      | W3C `00-<trace id>-<span id>-<flags>`   |
//! | `baggage.<member>` | one entry per baggage member            |
//! | `name`             | payload type name (set by the marshaler)|

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::context::Context;
use crate::message::Metadata;

/// Metadata key holding the correlation id.
pub const CORRELATION_ID_KEY: &str = "correlation_id";
/// Metadata key holding the W3C trace parent.
pub const TRACEPARENT_KEY: &str = "traceparent";
/// Prefix of metadata keys holding baggage members.
pub const BAGGAGE_PREFIX: &str = "baggage.";
/// Metadata key holding the payload type name.
pub const NAME_KEY: &str = "name";

const TRACE_ID_LEN: usize = 32;
const SPAN_ID_LEN: usize = 16;

/// Errors parsing a `traceparent` header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceParentError {
    #[error("traceparent must have 4 dash-separated fields, got {0}")]
    FieldCount(usize),

    #[error("invalid traceparent version: {0}")]
    Version(String),

    #[error("invalid trace id: {0}")]
    TraceId(String),

    #[error("invalid span id: {0}")]
    SpanId(String),

    #[error("invalid trace flags: {0}")]
    Flags(String),
}

/// W3C trace context parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceParent {
    trace_id: String,
    span_id: String,
    flags: u8,
}

impl TraceParent {
    /// New sampled root: fresh trace id and span id.
    pub fn new_root() -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: new_span_id(),
            flags: 0x01,
        }
    }

    /// Same trace, new span.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            flags: self.flags,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn is_sampled(&self) -> bool {
        self.flags & 0x01 == 0x01
    }
}

fn new_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(SPAN_ID_LEN);
    id
}

fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn is_all_zero(s: &str) -> bool {
    s.bytes().all(|b| b == b'0')
}

impl FromStr for TraceParent {
    type Err = TraceParentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('-').collect();
        if parts.len() != 4 {
            return Err(TraceParentError::FieldCount(parts.len()));
        }
        let (version, trace_id, span_id, flags) = (parts[0], parts[1], parts[2], parts[3]);

        if !is_lower_hex(version, 2) || version == "ff" {
            return Err(TraceParentError::Version(version.to_string()));
        }
        if !is_lower_hex(trace_id, TRACE_ID_LEN) || is_all_zero(trace_id) {
            return Err(TraceParentError::TraceId(trace_id.to_string()));
        }
        if !is_lower_hex(span_id, SPAN_ID_LEN) || is_all_zero(span_id) {
            return Err(TraceParentError::SpanId(span_id.to_string()));
        }
        let flags = match u8::from_str_radix(flags, 16) {
            Ok(f) if flags.len() == 2 => f,
            _ => return Err(TraceParentError::Flags(flags.to_string())),
        };

        Ok(Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            flags,
        })
    }
}

impl fmt::Display for TraceParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "00-{}-{}-{:02x}", self.trace_id, self.span_id, self.flags)
    }
}

/// Ordered key/value baggage that travels with a causal chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baggage(BTreeMap<String, String>);

impl Baggage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Baggage {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Moves causal fields between a [`Context`] and message [`Metadata`].
///
/// Both directions are idempotent: applying them twice gives the same
/// result as applying them once.
#[derive(Debug, Clone, Copy, Default)]
pub struct Propagator;

impl Propagator {
    /// Write every causal field present in `ctx` into `metadata`.
    pub fn inject(&self, ctx: &Context, metadata: &mut Metadata) {
        if let Some(correlation_id) = ctx.correlation_id() {
            metadata.set(CORRELATION_ID_KEY, correlation_id);
        }
        if let Some(trace_parent) = ctx.trace_parent() {
            metadata.set(TRACEPARENT_KEY, trace_parent.to_string());
        }
        for (key, value) in ctx.baggage().iter() {
            metadata.set(format!("{BAGGAGE_PREFIX}{key}"), value);
        }
    }

    /// Copy of `ctx` with every causal field found in `metadata` applied.
    pub fn extract(&self, ctx: &Context, metadata: &Metadata) -> Context {
        let mut out = ctx.clone();

        if let Some(correlation_id) = metadata.get(CORRELATION_ID_KEY) {
            out = out.with_correlation_id(correlation_id);
        }
        if let Some(raw) = metadata.get(TRACEPARENT_KEY) {
            // Malformed parents are dropped rather than failing the message.
            if let Ok(trace_parent) = raw.parse::<TraceParent>() {
                out = out.with_trace_parent(trace_parent);
            }
        }
        for (key, value) in metadata.iter() {
            if let Some(member) = key.strip_prefix(BAGGAGE_PREFIX) {
                if !member.is_empty() {
                    out = out.with_baggage_item(member, value);
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests;
