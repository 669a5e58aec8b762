use crate::broker::Broker;
use crate::core::Message;

/// I/O and extension adapter hooked into the activity lifecycle.
///
/// Activated on `run.enter` (and again when a redelivered `run.execute`
/// resumes), deactivated on `run.leave` and on stop. Implementations
/// typically publish format fragments on the `format-run` exchange so the
/// formatter can amend run-message content before transitions.
pub trait Extensions: Send {
    fn activate(&mut self, broker: &Broker, message: &Message);
    fn deactivate(&mut self, broker: &Broker, message: &Message);
}
