use super::*;

const SAMPLE: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

#[test]
fn test_traceparent_parse_and_display() {
    let tp: TraceParent = SAMPLE.parse().unwrap();
    assert_eq!(tp.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
    assert_eq!(tp.span_id(), "00f067aa0ba902b7");
    assert!(tp.is_sampled());
    assert_eq!(tp.to_string(), SAMPLE);
}

#[test]
fn test_traceparent_rejects_malformed() {
    assert_eq!(
        "garbage".parse::<TraceParent>(),
        Err(TraceParentError::FieldCount(1))
    );
    assert!(matches!(
        "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".parse::<TraceParent>(),
        Err(TraceParentError::Version(_))
    ));
    assert!(matches!(
        "00-00000000000000000000000000000000-00f067aa0ba902b7-01".parse::<TraceParent>(),
        Err(TraceParentError::TraceId(_))
    ));
    assert!(matches!(
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00F067AA0BA902B7-01".parse::<TraceParent>(),
        Err(TraceParentError::SpanId(_))
    ));
    assert!(matches!(
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-1".parse::<TraceParent>(),
        Err(TraceParentError::Flags(_))
    ));
}

#[test]
fn test_new_root_is_valid_and_child_keeps_trace() {
    let root = TraceParent::new_root();
    let reparsed: TraceParent = root.to_string().parse().unwrap();
    assert_eq!(reparsed, root);

    let child = root.child();
    assert_eq!(child.trace_id(), root.trace_id());
    assert_ne!(child.span_id(), root.span_id());
}

#[test]
fn test_inject_writes_all_fields() {
    let ctx = Context::new()
        .with_correlation_id("corr-42")
        .with_trace_parent(SAMPLE.parse().unwrap())
        .with_baggage_item("tenant", "acme")
        .with_baggage_item("user", "u-1");

    let mut metadata = Metadata::new();
    Propagator.inject(&ctx, &mut metadata);

    assert_eq!(metadata.get(CORRELATION_ID_KEY), Some("corr-42"));
    assert_eq!(metadata.get(TRACEPARENT_KEY), Some(SAMPLE));
    assert_eq!(metadata.get("baggage.tenant"), Some("acme"));
    assert_eq!(metadata.get("baggage.user"), Some("u-1"));
}

#[test]
fn test_inject_is_idempotent_and_leaves_absent_fields() {
    let ctx = Context::new().with_baggage_item("k", "v");
    let mut metadata: Metadata = [("name", "OrderPlaced")].into_iter().collect();

    Propagator.inject(&ctx, &mut metadata);
    let once = metadata.clone();
    Propagator.inject(&ctx, &mut metadata);

    assert_eq!(metadata, once);
    assert_eq!(metadata.get(CORRELATION_ID_KEY), None);
    assert_eq!(metadata.get(NAME_KEY), Some("OrderPlaced"));
}

#[test]
fn test_extract_round_trips_inject() {
    let ctx = Context::new()
        .with_correlation_id("corr-7")
        .with_trace_parent(TraceParent::new_root())
        .with_baggage_item("tenant", "acme");

    let mut metadata = Metadata::new();
    Propagator.inject(&ctx, &mut metadata);
    let extracted = Propagator.extract(&Context::new(), &metadata);

    assert_eq!(extracted.correlation_id(), ctx.correlation_id());
    assert_eq!(extracted.trace_parent(), ctx.trace_parent());
    assert_eq!(extracted.baggage(), ctx.baggage());

    let twice = Propagator.extract(&extracted, &metadata);
    assert_eq!(twice.correlation_id(), extracted.correlation_id());
    assert_eq!(twice.baggage(), extracted.baggage());
}

#[test]
fn test_extract_keeps_context_fields_missing_from_metadata() {
    let ctx = Context::new().with_correlation_id("from-ctx");
    let metadata: Metadata = [(TRACEPARENT_KEY, "not-a-traceparent")].into_iter().collect();

    let extracted = Propagator.extract(&ctx, &metadata);

    assert_eq!(extracted.correlation_id(), Some("from-ctx"));
    assert!(extracted.trace_parent().is_none());
}

#[test]
fn test_extract_preserves_cancellation() {
    let ctx = Context::new();
    let extracted = Propagator.extract(&ctx, &Metadata::new());

    ctx.cancel();
    assert!(extracted.is_cancelled());
}
