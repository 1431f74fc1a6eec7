//! Metrics for the pipeline stages.
//!
//! Events are recorded through the `metrics` facade; whichever recorder the
//! hosting process installs receives them. Without a recorder they are no-ops.

pub mod events;

/// Emit an internal event.
///
/// This macro calls the `InternalEvent::emit()` method on the given event,
/// which records the corresponding counter or histogram.
///
/// # Example
///
/// ```ignore
/// use sleet::metrics::events::JobRunStarted;
///
/// emit!(JobRunStarted { job: "glue-clean-transform".to_string() });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
