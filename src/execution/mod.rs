// Periodic ingestion and project management
pub mod ingestor;
pub mod kline_sync;
pub mod project_manager;
pub mod registry;

pub use ingestor::{IngestOutcome, IngestReport, OrderBookIngestor};
pub use kline_sync::{KlineSync, SyncReport};
pub use project_manager::{compute_roi, CycleReport, ProjectManager};
pub use registry::ProjectRegistry;
