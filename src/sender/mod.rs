pub mod client;
pub mod converter;
pub mod engine;
pub mod error;
#[cfg(feature = "otlp")]
pub mod otlp;
pub mod task;

pub use client::{ClientConfig, ClientError, HttpTransport, Transport};
pub use converter::{ConvertError, Converter, NdjsonConverter};
pub use engine::{DeliveryConfig, DeliveryEngine, DeliveryStats, DeliveryStatsSnapshot};
pub use error::DeliveryError;
#[cfg(feature = "otlp")]
pub use otlp::OtlpConverter;
pub use task::{DeliveryTask, Payload};
