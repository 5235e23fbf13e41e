//! Pipeline services
//!
//! Task tracking, the windowed query orchestrator and its graph client,
//! location resolution (gazetteer, geocoder, continent classification),
//! deduplication and the gazetteer loader.

pub mod deduplicator;
pub mod gazetteer_loader;
pub mod geocoding_client;
pub mod graph_query_client;
pub mod location_resolver;
pub mod spatial_classifier;
pub mod summary_client;
pub mod task_store;
pub mod window_orchestrator;

pub use deduplicator::{plan_deduplication, DedupPlan, DedupReport, Deduplicator};
pub use gazetteer_loader::{GazetteerLoader, GazetteerSyncReport};
pub use geocoding_client::NominatimClient;
pub use graph_query_client::SparqlClient;
pub use location_resolver::{
    BatchReport, LocationResolver, Placement, Resolution, ResolutionSink, ResolutionTier,
};
pub use spatial_classifier::SpatialClassifier;
pub use summary_client::SummaryClient;
pub use task_store::{TaskHandle, TaskStore};
pub use window_orchestrator::{OrchestrationReport, WindowOrchestrator};
