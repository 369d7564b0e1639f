//! # tandem-observability
//!
//! Observability-Crate fuer Tandem:
//! - Prometheus-kompatible Metriken fuer Handshake, Entschluesselung und
//!   Nachrichtenfluss (Textformat fuer die einbettende App)
//! - Structured Logging via tracing-subscriber (Text oder JSON)

pub mod logging;
pub mod metrics;

pub use logging::logging_initialisieren;
pub use metrics::TandemMetrics;
