//! Metrics definitions for coordination component monitoring.

/// Label for the emitting component in metrics.
pub const COMPONENT_LABEL: &str = "component";

// Dispatch metrics

/// Counter for total work items processed.
pub const CREW_ITEMS_PROCESSED_TOTAL: &str = "crew_items_processed_total";

/// Counter for work items dropped without being processed.
pub const CREW_ITEMS_DROPPED_TOTAL: &str = "crew_items_dropped_total";

// Buffer metrics

/// Counter for total buffer flushes.
pub const CREW_FLUSHES_TOTAL: &str = "crew_flushes_total";

/// Counter for total items handed to flush handlers.
pub const CREW_FLUSHED_ITEMS_TOTAL: &str = "crew_flushed_items_total";

// Trigger metrics

/// Counter for total trigger action fires.
pub const CREW_TRIGGER_FIRES_TOTAL: &str = "crew_trigger_fires_total";

// Failure metrics

/// Counter for panics recovered from caller-supplied code.
pub const CREW_ACTION_PANICS_TOTAL: &str = "crew_action_panics_total";

/// Counter for errors forwarded to an error sink.
pub const CREW_ERRORS_FORWARDED_TOTAL: &str = "crew_errors_forwarded_total";
