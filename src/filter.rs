// Room discovery criteria and the session-owned filter state that feeds the
// query orchestrator.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{Amenity, AmenityId, Category, CategoryId, RoomListing};

// Nightly price bounds, both inclusive
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceBand {
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
}

impl PriceBand {
    pub fn new(min: Option<Decimal>, max: Option<Decimal>) -> Self {
        Self { min, max }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_inverted(&self) -> bool {
        matches!((self.min, self.max), (Some(min), Some(max)) if min > max)
    }

    // An inverted band is read as "no price filter" so typing a max below
    // the min never empties the room list.
    pub fn normalized(&self) -> PriceBand {
        if self.is_inverted() {
            Self::unbounded()
        } else {
            self.clone()
        }
    }

    pub fn contains(&self, price: Decimal) -> bool {
        let band = self.normalized();
        band.min.map_or(true, |min| price >= min) && band.max.map_or(true, |max| price <= max)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterCriteria {
    pub category_id: Option<CategoryId>,
    pub min_capacity: Option<u32>,
    pub amenity_ids: BTreeSet<AmenityId>,
    pub price: PriceBand,
}

impl FilterCriteria {
    pub fn with_category(mut self, category_id: Option<CategoryId>) -> Self {
        self.category_id = category_id;
        self
    }

    pub fn with_min_capacity(mut self, min_capacity: Option<u32>) -> Self {
        self.min_capacity = min_capacity;
        self
    }

    pub fn with_amenities(mut self, amenity_ids: impl IntoIterator<Item = AmenityId>) -> Self {
        self.amenity_ids = amenity_ids.into_iter().collect();
        self
    }

    pub fn with_price(mut self, price: PriceBand) -> Self {
        self.price = price;
        self
    }

    // Checkbox semantics; returns whether the amenity is now selected
    pub fn toggle_amenity(&mut self, amenity_id: AmenityId) -> bool {
        if self.amenity_ids.remove(&amenity_id) {
            false
        } else {
            self.amenity_ids.insert(amenity_id);
            true
        }
    }

    // Everything except the price band applies without debouncing
    pub fn same_immediate_fields(&self, other: &FilterCriteria) -> bool {
        self.category_id == other.category_id
            && self.min_capacity == other.min_capacity
            && self.amenity_ids == other.amenity_ids
    }

    /// Query string pairs for `GET /rooms`.
    ///
    /// One `amenity` pair per selected amenity in ascending id order, a zero
    /// minimum price is left out, and unset fields are omitted entirely.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();

        for amenity_id in &self.amenity_ids {
            params.push(("amenity", amenity_id.to_string()));
        }

        let price = self.price.normalized();
        if let Some(min) = price.min.filter(|min| !min.is_zero()) {
            params.push(("min_price", min.normalize().to_string()));
        }
        if let Some(max) = price.max {
            params.push(("max_price", max.normalize().to_string()));
        }

        if let Some(category_id) = self.category_id {
            params.push(("category_id", category_id.to_string()));
        }
        if let Some(capacity) = self.min_capacity {
            params.push(("capacity", capacity.to_string()));
        }

        params
    }
}

// Which parts of the criteria moved after an update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterChange {
    pub immediate: bool,
    pub price_band: bool,
}

impl FilterChange {
    pub fn is_empty(&self) -> bool {
        !self.immediate && !self.price_band
    }
}

/// Latest user input plus the last price band that made it through the
/// debouncer. Queries are always built from [`FilterState::effective`].
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    requested: FilterCriteria,
    settled_price: PriceBand,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested(&self) -> &FilterCriteria {
        &self.requested
    }

    pub fn settled_price(&self) -> &PriceBand {
        &self.settled_price
    }

    pub fn update(&mut self, criteria: FilterCriteria) -> FilterChange {
        let change = FilterChange {
            immediate: !self.requested.same_immediate_fields(&criteria),
            price_band: self.requested.price != criteria.price,
        };
        self.requested = criteria;
        change
    }

    // Returns true when the settled band changes the effective criteria
    pub fn settle_price(&mut self, band: PriceBand) -> bool {
        if band.is_inverted() {
            warn!(min = ?band.min, max = ?band.max, "inverted price band, treating as unbounded");
        }

        let changed = self.settled_price.normalized() != band.normalized();
        self.settled_price = band;
        changed
    }

    pub fn effective(&self) -> FilterCriteria {
        FilterCriteria {
            price: self.settled_price.normalized(),
            ..self.requested.clone()
        }
    }
}

// In-memory evaluation of the criteria, used by the mock catalog and by
// hosts that want to pre-filter a cached list.
pub fn filter_rooms(
    rooms: &[RoomListing],
    criteria: &FilterCriteria,
    categories: &[Category],
    amenities: &[Amenity],
) -> Vec<RoomListing> {
    let required: Option<Vec<&str>> = criteria
        .amenity_ids
        .iter()
        .map(|id| {
            amenities
                .iter()
                .find(|a| a.amenity_id == *id)
                .map(|a| a.name.as_str())
        })
        .collect();

    // An amenity id the catalog doesn't know can't be satisfied
    let Some(required) = required else {
        return Vec::new();
    };

    let mut filtered = Vec::new();

    for room in rooms {
        let rate = categories
            .iter()
            .find(|c| c.id == room.category_id)
            .map(|c| c.price);

        let category_ok = criteria
            .category_id
            .map_or(true, |id| id == room.category_id);

        let capacity_ok = criteria
            .min_capacity
            .map_or(true, |min| room.capacity >= min);

        let amenities_ok = required
            .iter()
            .all(|name| room.amenities.iter().any(|a| a == name));

        let price_ok = rate.map_or(criteria.price.normalized() == PriceBand::unbounded(), |rate| {
            criteria.price.contains(rate)
        });

        if category_ok && capacity_ok && amenities_ok && price_ok {
            filtered.push(room.clone());
        }
    }

    filtered
}
