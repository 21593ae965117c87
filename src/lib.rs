// Client-side core of a hotel booking front end: room search with ordered
// query results, stay pricing, and the booking lifecycle.

pub mod booking;
pub mod cache;
pub mod config;
pub mod debounce;
pub mod filter;
pub mod http_client;
pub mod models;
pub mod orchestrator;
pub mod pricing;
pub mod services;

// Re-export key types for convenience
pub use booking::{BookingController, BookingDraft, BookingError, BookingPhase, ServiceSelection};
pub use cache::{CacheStats, CatalogCache, CatalogConfig, CatalogError};
pub use config::{ConfigError, CoreConfig};
pub use debounce::{DebounceScheduler, Debouncer};
pub use filter::{filter_rooms, FilterChange, FilterCriteria, FilterState, PriceBand};
pub use http_client::{ClientConfig, ClientError, HttpClient};
pub use models::{
    Amenity, Booking, BookingStatus, Category, RoomListing, Service, StayInterval, UserRole,
    UserSession,
};
pub use orchestrator::{
    OrchestratorConfig, QueryOrchestrator, QueryOutcome, QueryToken, RoomListView, TokenLedger,
};
pub use pricing::{quote, quote_extension, ExtensionQuote, PriceQuote, QuoteError};
pub use services::{BookingService, CatalogService, CreateBooking, ServiceError};
