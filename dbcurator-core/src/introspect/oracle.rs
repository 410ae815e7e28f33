//! Oracle adapter stub.
//!
//! The dialect is registered (DSNs resolve, registry entries load) but the
//! adapter itself needs the Oracle Instant Client libraries, which are not
//! part of this build. Scan and gateway calls against an Oracle profile
//! fail with the message below; the `oracle` Cargo feature is reserved for
//! the real adapter.

use crate::error::AgentError;

pub(crate) fn unavailable() -> AgentError {
    AgentError::configuration(
        "oracle support is not available in this build (the adapter requires Oracle Instant Client)",
    )
}
