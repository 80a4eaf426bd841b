//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the subscription pipeline and the port interfaces
//! that define how it talks to the provider and the trading host.

/// Port interfaces for the provider and host collaborators.
pub mod ports;

/// Raw historical and live data sources.
pub mod sources;

/// Enumerator pipeline stages.
pub mod pipeline;

/// Source selection and subscription lifecycle.
pub mod services;
