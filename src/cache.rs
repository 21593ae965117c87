// Session-scoped reference data: categories, amenities and add-on services.
// Loaded once, then read by the quotation engine and the room list without
// further round trips.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{Amenity, Category, CategoryId, RoomListing, Service, ServiceId};
use crate::services::{CatalogService, ServiceError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("Catalog reference data not loaded")]
    NotLoaded,

    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    // How long categories and amenities stay fresh before `ensure_loaded`
    // fetches them again
    pub reference_ttl_seconds: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            reference_ttl_seconds: 300,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub categories_count: usize,
    pub amenities_count: usize,
    pub services_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub load_count: usize,
}

#[derive(Default)]
pub struct CatalogCache {
    config: CatalogConfig,
    // Replaced whole on reload, never cleared in place
    categories: RwLock<HashMap<CategoryId, Category>>,
    amenities: RwLock<Vec<Amenity>>,
    // None until the booking view asks for them
    services: RwLock<Option<Arc<Vec<Service>>>>,
    loaded_at: RwLock<Option<Instant>>,
    cache_stats: RwLock<CacheStats>,
}

impl CatalogCache {
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded_at.read().is_some()
    }

    pub fn is_fresh(&self) -> bool {
        let ttl = Duration::from_secs(self.config.reference_ttl_seconds);
        self.loaded_at
            .read()
            .map_or(false, |at| at.elapsed() < ttl)
    }

    /// Fetch categories and amenities. The two requests run concurrently and
    /// either may finish first; the cache is only marked loaded once both
    /// have succeeded, and a failure leaves the previous contents untouched.
    pub async fn load_reference<C>(&self, catalog: &C) -> Result<(), CatalogError>
    where
        C: CatalogService + ?Sized,
    {
        let (categories, amenities) =
            futures::try_join!(catalog.list_categories(), catalog.list_amenities())?;

        let categories: HashMap<CategoryId, Category> =
            categories.into_iter().map(|c| (c.id, c)).collect();
        let categories_count = categories.len();
        let amenities_count = amenities.len();

        *self.categories.write() = categories;
        *self.amenities.write() = amenities;
        *self.loaded_at.write() = Some(Instant::now());

        let mut stats = self.cache_stats.write();
        stats.load_count += 1;
        stats.categories_count = categories_count;
        stats.amenities_count = amenities_count;

        info!(
            categories = stats.categories_count,
            amenities = stats.amenities_count,
            "catalog reference data loaded"
        );

        Ok(())
    }

    pub async fn ensure_loaded<C>(&self, catalog: &C) -> Result<(), CatalogError>
    where
        C: CatalogService + ?Sized,
    {
        if self.is_fresh() {
            return Ok(());
        }
        self.load_reference(catalog).await
    }

    pub fn category(&self, id: CategoryId) -> Option<Category> {
        let found = self.categories.read().get(&id).cloned();

        let mut stats = self.cache_stats.write();
        if found.is_some() {
            stats.hit_count += 1;
        } else {
            stats.miss_count += 1;
        }

        found
    }

    pub fn rate_for(&self, id: CategoryId) -> Option<Decimal> {
        self.category(id).map(|c| c.price)
    }

    // Nightly rate of a listed room; None when its category is unknown
    pub fn rate_for_room(&self, room: &RoomListing) -> Option<Decimal> {
        self.rate_for(room.category_id)
    }

    pub fn categories(&self) -> Vec<Category> {
        let mut categories: Vec<Category> = self.categories.read().values().cloned().collect();
        categories.sort_by_key(|c| c.id);
        categories
    }

    pub fn amenities(&self) -> Vec<Amenity> {
        self.amenities.read().clone()
    }

    // Loaded at most once until `clear_services`
    pub async fn load_services<C>(&self, catalog: &C) -> Result<Arc<Vec<Service>>, CatalogError>
    where
        C: CatalogService + ?Sized,
    {
        let cached = self.services.read().clone();
        if let Some(services) = cached {
            return Ok(services);
        }

        let services = Arc::new(catalog.list_services().await?);
        self.cache_stats.write().services_count = services.len();
        *self.services.write() = Some(services.clone());

        Ok(services)
    }

    pub fn services(&self) -> Option<Arc<Vec<Service>>> {
        self.services.read().clone()
    }

    pub fn clear_services(&self) {
        *self.services.write() = None;
        self.cache_stats.write().services_count = 0;
    }

    /// Look up selected service ids, keeping selection order. Ids missing
    /// from the catalog are dropped with a warning.
    pub fn resolve_services(&self, ids: &[ServiceId]) -> Result<Vec<Service>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let services = self.services().ok_or(CatalogError::NotLoaded)?;

        let mut resolved = Vec::with_capacity(ids.len());
        for id in ids {
            match services.iter().find(|s| s.service_id == *id) {
                Some(service) => resolved.push(service.clone()),
                None => warn!(service_id = id, "unknown service ignored"),
            }
        }

        Ok(resolved)
    }

    pub fn stats(&self) -> CacheStats {
        self.cache_stats.read().clone()
    }
}
