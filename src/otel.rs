// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration for RabbitMQ
//!
//! Trace context travels in AMQP message headers. Publishers inject the current context
//! into outgoing headers; the consumer dispatch loop extracts it and opens a consumer
//! span around each handler call. Both are no-ops until the application installs a
//! global propagator and tracer provider.

use lapin::{
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::error;

/// Writes trace context entries into AMQP headers.
pub(crate) struct HeaderInjector<'a> {
    headers: &'a mut BTreeMap<ShortString, AMQPValue>,
}

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(
            key.to_lowercase().into(),
            AMQPValue::LongString(value.into()),
        );
    }
}

/// Reads trace context entries from AMQP headers.
pub(crate) struct HeaderExtractor<'a> {
    headers: &'a BTreeMap<ShortString, AMQPValue>,
}

impl Extractor for HeaderExtractor<'_> {
    /// Gets a trace context value from RabbitMQ message headers.
    ///
    /// Only long string headers are considered.
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|header_value| {
            if let AMQPValue::LongString(header_value) = header_value {
                std::str::from_utf8(header_value.as_bytes())
                    .map_err(|e| error!("Error decoding header value {:?}", e))
                    .ok()
            } else {
                None
            }
        })
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|header| header.as_str()).collect()
    }
}

/// Returns `properties` with the given context injected into its headers.
///
/// Existing headers are kept. When the propagator has nothing to inject, the
/// properties are returned untouched.
pub(crate) fn inject_context(ctx: &Context, properties: BasicProperties) -> BasicProperties {
    let mut headers = properties
        .headers()
        .as_ref()
        .map(|table| table.inner().clone())
        .unwrap_or_default();
    let before = headers.len();

    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(
            ctx,
            &mut HeaderInjector {
                headers: &mut headers,
            },
        )
    });

    if headers.len() == before {
        return properties;
    }

    properties.with_headers(FieldTable::from(headers))
}

/// Creates a new OpenTelemetry span for message processing.
///
/// This function extracts trace context from message properties and
/// creates a new consumer span for processing the message.
///
/// # Parameters
/// * `props` - RabbitMQ message properties containing headers
/// * `tracer` - OpenTelemetry tracer
/// * `name` - Name for the new span
///
/// # Returns
/// A tuple containing the extracted context and the new span
pub(crate) fn new_span(
    props: &BasicProperties,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let headers = props
        .headers()
        .as_ref()
        .map(|table| table.inner().clone())
        .unwrap_or_default();

    let ctx = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor { headers: &headers })
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}
