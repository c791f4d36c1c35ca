//! Route matcher: deterministic matching of events against a route set.
//!
//! Three stages — source id, event type, dot-path filter — applied in
//! that order. Pure and synchronous: same routes + same event always
//! yield the same ordered list, and events are never mutated.

use serde_json::Value;

use relay_core::config::RouteConfig;
use relay_core::event::Event;

/// Match `event` against `routes`, preserving definition order.
pub fn match_routes<'a>(routes: &'a [RouteConfig], event: &Event) -> Vec<&'a RouteConfig> {
    routes.iter().filter(|r| route_matches(r, event)).collect()
}

fn route_matches(route: &RouteConfig, event: &Event) -> bool {
    if route.when.source != event.source_id {
        return false;
    }
    if !route.when.events.contains(&event.event_type) {
        return false;
    }
    match &route.when.filter {
        None => true,
        Some(filter) => filter.iter().all(|(path, expected)| {
            match event.lookup_path(path) {
                // Missing path = non-match.
                None => false,
                Some(actual) => match expected {
                    Value::Array(options) => options.iter().any(|o| values_equal(o, actual)),
                    scalar => values_equal(scalar, actual),
                },
            }
        }),
    }
}

/// Scalar equality, with numbers compared by value so a YAML `1`
/// matches a payload `1.0`.
fn values_equal(expected: &Value, actual: &Value) -> bool {
    if expected == actual {
        return true;
    }
    match (expected.as_f64(), actual.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
