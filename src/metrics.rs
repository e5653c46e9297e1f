use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Metric names for the journey, recorded through the `metrics` facade.
///
/// Without an installed recorder every call is a no-op, so the collector can be
/// used unconditionally.
#[derive(Debug, Clone, Copy)]
pub struct MetricsCollector {
    /// Inbound messages by transition outcome
    pub transitions_total: &'static str,
    /// Outbound sends by kind and outcome
    pub sends_total: &'static str,
    /// Attempts needed per delivered send
    pub send_attempts: &'static str,
    /// Provider field mirrors by status
    pub field_updates_total: &'static str,
    /// Tick runs by family
    pub ticks_total: &'static str,
    /// Tick wall-clock duration
    pub tick_duration: &'static str,
    /// Contacts scanned in the last tick of a family
    pub tick_contacts: &'static str,
    /// Recorded membership changes by new status
    pub member_updates_total: &'static str,
    /// Errors by type and operation
    pub errors_total: &'static str,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            transitions_total: "whatsapp_journey_transitions_total",
            sends_total: "whatsapp_journey_sends_total",
            send_attempts: "whatsapp_journey_send_attempts",
            field_updates_total: "whatsapp_journey_field_updates_total",
            ticks_total: "whatsapp_journey_ticks_total",
            tick_duration: "whatsapp_journey_tick_duration_seconds",
            tick_contacts: "whatsapp_journey_tick_contacts",
            member_updates_total: "whatsapp_journey_member_updates_total",
            errors_total: "whatsapp_journey_errors_total",
        }
    }
}

impl MetricsCollector {
    /// Register metric descriptions. Call once after installing a recorder.
    pub fn describe(&self) {
        describe_counter!(self.transitions_total, "Inbound messages by transition outcome");
        describe_counter!(self.sends_total, "Outbound sends by kind and outcome");
        describe_histogram!(self.send_attempts, "Attempts needed per delivered send");
        describe_counter!(self.field_updates_total, "Provider custom-field updates by status");
        describe_counter!(self.ticks_total, "Scheduler ticks by job family");
        describe_histogram!(self.tick_duration, "Scheduler tick duration in seconds");
        describe_gauge!(self.tick_contacts, "Contacts scanned by the last tick of a family");
        describe_counter!(self.member_updates_total, "Membership status changes by new status");
        describe_counter!(self.errors_total, "Errors by type and operation");
    }

    /// Record how an inbound message was handled
    pub fn record_transition(&self, outcome: &'static str) {
        counter!(self.transitions_total, "outcome" => outcome).increment(1);
    }

    /// Record the outcome of one outbound send
    pub fn record_send(&self, kind: &'static str, outcome: &'static str, attempts: u32) {
        counter!(self.sends_total, "kind" => kind, "outcome" => outcome).increment(1);
        if attempts > 0 {
            histogram!(self.send_attempts, "kind" => kind).record(f64::from(attempts));
        }
    }

    /// Record a provider field update
    pub fn record_field_update(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!(self.field_updates_total, "status" => status).increment(1);
    }

    /// Record a completed tick
    pub fn record_tick(&self, family: &'static str, contacts: usize, duration: Duration) {
        counter!(self.ticks_total, "family" => family).increment(1);
        histogram!(self.tick_duration, "family" => family).record(duration.as_secs_f64());
        #[allow(clippy::cast_precision_loss)]
        let contacts = contacts as f64;
        gauge!(self.tick_contacts, "family" => family).set(contacts);
    }

    /// Record a membership status change
    pub fn record_member_update(&self, status: &'static str) {
        counter!(self.member_updates_total, "status" => status).increment(1);
    }

    /// Record error metrics
    pub fn record_error(&self, error_type: &'static str, operation: &'static str) {
        counter!(self.errors_total, "type" => error_type, "operation" => operation).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::default();
        assert_eq!(collector.sends_total, "whatsapp_journey_sends_total");
    }

    #[test]
    fn test_recording_without_recorder_is_a_no_op() {
        let collector = MetricsCollector::default();
        collector.describe();
        collector.record_send("reminder_12h", "delivered", 1);
        collector.record_tick("reminders", 3, Duration::from_millis(20));
    }
}
