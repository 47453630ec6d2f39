//! Metrics instrumentation for the detour circuit relay.
//!
//! Thin wrappers over the `metrics` facade. Installing an exporter is the
//! host process's job; without one these calls are no-ops.

use metrics::{counter, gauge, histogram};

// ============================================================================
// Metric Names
// ============================================================================

/// Total relay requests received, labeled by message type.
pub const RELAY_REQUESTS_TOTAL: &str = "detour_relay_requests_total";
/// Total circuits spliced successfully.
pub const CIRCUITS_ESTABLISHED_TOTAL: &str = "detour_circuits_established_total";
/// Currently spliced circuits.
pub const CIRCUITS_ACTIVE: &str = "detour_circuits_active";
/// Circuit lifetime histogram (seconds).
pub const CIRCUIT_DURATION_SECONDS: &str = "detour_circuit_duration_seconds";
/// Total circuit failures, labeled by status class.
pub const CIRCUIT_ERRORS_TOTAL: &str = "detour_circuit_errors_total";
/// Total handler errors, labeled by error class.
pub const ERRORS_TOTAL: &str = "detour_errors_total";
/// Total undecodable or unexpected first frames.
pub const INVALID_MESSAGES_TOTAL: &str = "detour_invalid_messages_total";
/// Total bytes relayed through spliced circuits, labeled by direction.
pub const RELAYED_BYTES_TOTAL: &str = "detour_relayed_bytes_total";
/// Relay peers currently known to the dial side.
pub const RELAY_PEERS: &str = "detour_relay_peers";
/// Total failovers to the next relay candidate during a dial.
pub const DIAL_FAILOVERS_TOTAL: &str = "detour_dial_failovers_total";
/// Total dial-side negotiations, labeled by outcome.
pub const NEGOTIATIONS_TOTAL: &str = "detour_negotiations_total";

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record an inbound relay request (`hop`, `stop`, `can_hop`).
#[inline]
pub fn record_relay_request(kind: &'static str) {
    counter!(RELAY_REQUESTS_TOTAL, "type" => kind).increment(1);
}

/// Record a circuit reaching the spliced state.
#[inline]
pub fn record_circuit_established() {
    counter!(CIRCUITS_ESTABLISHED_TOTAL).increment(1);
    gauge!(CIRCUITS_ACTIVE).increment(1.0);
}

/// Record a spliced circuit ending.
#[inline]
pub fn record_circuit_closed(duration_secs: f64) {
    gauge!(CIRCUITS_ACTIVE).decrement(1.0);
    histogram!(CIRCUIT_DURATION_SECONDS).record(duration_secs);
}

/// Record a circuit failing before or during splice.
#[inline]
pub fn record_circuit_error(class: &'static str) {
    counter!(CIRCUIT_ERRORS_TOTAL, "class" => class).increment(1);
}

/// Record a handler error by error class.
#[inline]
pub fn record_error(class: &'static str) {
    counter!(ERRORS_TOTAL, "class" => class).increment(1);
}

/// Record a first frame that failed to decode or carried an unexpected type.
#[inline]
pub fn record_invalid_message() {
    counter!(INVALID_MESSAGES_TOTAL).increment(1);
}

/// Record relayed payload bytes (`forward` or `backward`).
#[inline]
pub fn record_relayed_bytes(direction: &'static str, bytes: u64) {
    counter!(RELAYED_BYTES_TOTAL, "direction" => direction).increment(bytes);
}

/// Record a relay peer entering the registry.
#[inline]
pub fn record_relay_added() {
    gauge!(RELAY_PEERS).increment(1.0);
}

/// Record a relay peer leaving the registry.
#[inline]
pub fn record_relay_removed() {
    gauge!(RELAY_PEERS).decrement(1.0);
}

/// Record failing over to the next relay candidate.
#[inline]
pub fn record_dial_failover() {
    counter!(DIAL_FAILOVERS_TOTAL).increment(1);
}

/// Record the outcome of one relay negotiation (`success`, `refused`,
/// `unreachable`, `transport`).
#[inline]
pub fn record_negotiation(outcome: &'static str) {
    counter!(NEGOTIATIONS_TOTAL, "outcome" => outcome).increment(1);
}
