// Remote collaborators the core talks to. The catalog is read-only reference
// data plus room search; the booking service is the system of record for
// reservations.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::filter::FilterCriteria;
use crate::models::{
    Amenity, Booking, BookingId, Category, RoomId, RoomListing, Service, ServiceId, StayInterval,
    UserId,
};

// Every remote failure collapses into one of these two
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request rejected: {0}")]
    RequestRejected(String),
}

#[async_trait]
pub trait CatalogService: Send + Sync + 'static {
    async fn list_rooms(&self, criteria: &FilterCriteria) -> Result<Vec<RoomListing>, ServiceError>;

    async fn list_categories(&self) -> Result<Vec<Category>, ServiceError>;

    async fn list_amenities(&self) -> Result<Vec<Amenity>, ServiceError>;

    async fn list_services(&self) -> Result<Vec<Service>, ServiceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateBooking {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub stay: StayInterval,
    pub use_bonus: bool,
    pub services: Vec<ServiceId>,
}

#[async_trait]
pub trait BookingService: Send + Sync + 'static {
    async fn create(&self, request: CreateBooking) -> Result<Booking, ServiceError>;

    async fn cancel(&self, booking_id: BookingId, user_id: UserId) -> Result<(), ServiceError>;

    // Returns the booking as stored after the extension
    async fn extend(
        &self,
        booking_id: BookingId,
        user_id: UserId,
        new_check_out: NaiveDate,
    ) -> Result<Booking, ServiceError>;

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Booking>, ServiceError>;
}

// In-process stand-ins for the remote services. Latency, outages and
// one-off failures can be injected so the orchestrator and controller can be
// exercised without a network.
pub mod mock_service {
    use super::*;
    use crate::filter::filter_rooms;
    use crate::models::BookingStatus;
    use crate::pricing;
    use rust_decimal::Decimal;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Debug, Clone, Copy)]
    pub enum ServerMode {
        Normal,
        CompleteOutage,
    }

    pub struct MockCatalog {
        outage: AtomicBool,
        request_count: AtomicUsize,
        room_queries: AtomicUsize,
        fail_next_requests: AtomicUsize,
        // Consumed one per room query, front first
        room_delays_ms: Mutex<VecDeque<u64>>,
        category_delay_ms: AtomicUsize,
        amenity_delay_ms: AtomicUsize,
        rooms: Vec<RoomListing>,
        categories: Vec<Category>,
        amenities: Vec<Amenity>,
        services: Vec<Service>,
    }

    impl MockCatalog {
        pub fn new(
            rooms: Vec<RoomListing>,
            categories: Vec<Category>,
            amenities: Vec<Amenity>,
            services: Vec<Service>,
        ) -> Self {
            Self {
                outage: AtomicBool::new(false),
                request_count: AtomicUsize::new(0),
                room_queries: AtomicUsize::new(0),
                fail_next_requests: AtomicUsize::new(0),
                room_delays_ms: Mutex::new(VecDeque::new()),
                category_delay_ms: AtomicUsize::new(0),
                amenity_delay_ms: AtomicUsize::new(0),
                rooms,
                categories,
                amenities,
                services,
            }
        }

        pub fn set_mode(&self, mode: ServerMode) {
            self.outage
                .store(matches!(mode, ServerMode::CompleteOutage), Ordering::SeqCst);
        }

        pub fn fail_next_requests(&self, count: usize) {
            self.fail_next_requests.store(count, Ordering::SeqCst);
        }

        pub async fn push_room_delays(&self, delays_ms: impl IntoIterator<Item = u64>) {
            self.room_delays_ms.lock().await.extend(delays_ms);
        }

        // Lets categories and amenities complete in either order
        pub fn set_reference_delays(&self, categories_ms: usize, amenities_ms: usize) {
            self.category_delay_ms.store(categories_ms, Ordering::SeqCst);
            self.amenity_delay_ms.store(amenities_ms, Ordering::SeqCst);
        }

        pub fn request_count(&self) -> usize {
            self.request_count.load(Ordering::SeqCst)
        }

        pub fn room_queries(&self) -> usize {
            self.room_queries.load(Ordering::SeqCst)
        }

        fn check_health(&self) -> Result<(), ServiceError> {
            self.request_count.fetch_add(1, Ordering::SeqCst);

            if self.outage.load(Ordering::SeqCst) {
                return Err(ServiceError::ServiceUnavailable(
                    "connection refused".to_string(),
                ));
            }

            let fail_count = self.fail_next_requests.load(Ordering::SeqCst);
            if fail_count > 0 {
                self.fail_next_requests
                    .store(fail_count - 1, Ordering::SeqCst);
                return Err(ServiceError::ServiceUnavailable(
                    "Internal Server Error".to_string(),
                ));
            }

            Ok(())
        }

        async fn delay(delay_ms: &AtomicUsize) {
            let delay = delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }
        }
    }

    #[async_trait]
    impl CatalogService for MockCatalog {
        async fn list_rooms(
            &self,
            criteria: &FilterCriteria,
        ) -> Result<Vec<RoomListing>, ServiceError> {
            self.room_queries.fetch_add(1, Ordering::SeqCst);

            // Delay is taken before the health check so a failure can also
            // arrive late
            let delay = self.room_delays_ms.lock().await.pop_front().unwrap_or(0);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            self.check_health()?;

            Ok(filter_rooms(
                &self.rooms,
                criteria,
                &self.categories,
                &self.amenities,
            ))
        }

        async fn list_categories(&self) -> Result<Vec<Category>, ServiceError> {
            Self::delay(&self.category_delay_ms).await;
            self.check_health()?;
            Ok(self.categories.clone())
        }

        async fn list_amenities(&self) -> Result<Vec<Amenity>, ServiceError> {
            Self::delay(&self.amenity_delay_ms).await;
            self.check_health()?;
            Ok(self.amenities.clone())
        }

        async fn list_services(&self) -> Result<Vec<Service>, ServiceError> {
            self.check_health()?;
            Ok(self.services.clone())
        }
    }

    // Keeps bookings in memory and prices them with the same engine the
    // client uses, then applies a configurable surcharge so tests can tell
    // a server total from a locally computed one.
    pub struct MockBookingService {
        outage: AtomicBool,
        fail_next_requests: AtomicUsize,
        request_count: AtomicUsize,
        delay_ms: AtomicUsize,
        next_id: AtomicI64,
        bookings: Mutex<HashMap<BookingId, Booking>>,
        room_rates: HashMap<RoomId, Decimal>,
        service_prices: HashMap<ServiceId, Decimal>,
        bonus_balances: Mutex<HashMap<UserId, Decimal>>,
        surcharge: Mutex<Decimal>,
    }

    impl MockBookingService {
        pub fn new(
            room_rates: HashMap<RoomId, Decimal>,
            service_prices: HashMap<ServiceId, Decimal>,
        ) -> Self {
            Self {
                outage: AtomicBool::new(false),
                fail_next_requests: AtomicUsize::new(0),
                request_count: AtomicUsize::new(0),
                delay_ms: AtomicUsize::new(0),
                next_id: AtomicI64::new(1),
                bookings: Mutex::new(HashMap::new()),
                room_rates,
                service_prices,
                bonus_balances: Mutex::new(HashMap::new()),
                surcharge: Mutex::new(Decimal::ZERO),
            }
        }

        pub fn set_mode(&self, mode: ServerMode) {
            self.outage
                .store(matches!(mode, ServerMode::CompleteOutage), Ordering::SeqCst);
        }

        pub fn fail_next_requests(&self, count: usize) {
            self.fail_next_requests.store(count, Ordering::SeqCst);
        }

        pub fn set_delay(&self, delay_ms: usize) {
            self.delay_ms.store(delay_ms, Ordering::SeqCst);
        }

        pub fn request_count(&self) -> usize {
            self.request_count.load(Ordering::SeqCst)
        }

        pub async fn set_bonus_balance(&self, user_id: UserId, balance: Decimal) {
            self.bonus_balances.lock().await.insert(user_id, balance);
        }

        pub async fn set_surcharge(&self, surcharge: Decimal) {
            *self.surcharge.lock().await = surcharge;
        }

        pub async fn insert_booking(&self, booking: Booking) {
            self.next_id
                .fetch_max(booking.booking_id + 1, Ordering::SeqCst);
            self.bookings
                .lock()
                .await
                .insert(booking.booking_id, booking);
        }

        pub async fn booking(&self, booking_id: BookingId) -> Option<Booking> {
            self.bookings.lock().await.get(&booking_id).cloned()
        }

        async fn check_health(&self) -> Result<(), ServiceError> {
            self.request_count.fetch_add(1, Ordering::SeqCst);

            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }

            if self.outage.load(Ordering::SeqCst) {
                return Err(ServiceError::ServiceUnavailable(
                    "connection refused".to_string(),
                ));
            }

            let fail_count = self.fail_next_requests.load(Ordering::SeqCst);
            if fail_count > 0 {
                self.fail_next_requests
                    .store(fail_count - 1, Ordering::SeqCst);
                return Err(ServiceError::ServiceUnavailable(
                    "Internal Server Error".to_string(),
                ));
            }

            Ok(())
        }

        fn rate(&self, room_id: RoomId) -> Result<Decimal, ServiceError> {
            self.room_rates
                .get(&room_id)
                .copied()
                .ok_or_else(|| ServiceError::RequestRejected(format!("Room {room_id} not found")))
        }

        fn add(a: Decimal, b: Decimal) -> Result<Decimal, ServiceError> {
            a.checked_add(b).ok_or_else(|| {
                ServiceError::RequestRejected("Booking total out of range".to_string())
            })
        }

        fn overlaps(a: &StayInterval, b: &StayInterval) -> bool {
            a.check_in < b.check_out && b.check_in < a.check_out
        }
    }

    #[async_trait]
    impl BookingService for MockBookingService {
        async fn create(&self, request: CreateBooking) -> Result<Booking, ServiceError> {
            self.check_health().await?;

            let rate = self.rate(request.room_id)?;
            let mut bookings = self.bookings.lock().await;

            let taken = bookings.values().any(|b| {
                b.room_id == request.room_id
                    && b.status == BookingStatus::Confirmed
                    && Self::overlaps(&b.stay(), &request.stay)
            });
            if taken {
                return Err(ServiceError::RequestRejected(
                    "Room is already booked for these dates".to_string(),
                ));
            }

            let services: Vec<Service> = request
                .services
                .iter()
                .filter_map(|id| {
                    self.service_prices.get(id).map(|price| Service {
                        service_id: *id,
                        name: format!("service-{id}"),
                        price: *price,
                    })
                })
                .collect();

            let mut balances = self.bonus_balances.lock().await;
            let balance = balances
                .get(&request.user_id)
                .copied()
                .unwrap_or(Decimal::ZERO);

            let quote = pricing::quote(&request.stay, rate, &services, balance, request.use_bonus)
                .map_err(|e| ServiceError::RequestRejected(e.to_string()))?;

            let surcharge = *self.surcharge.lock().await;
            let total_cost = Self::add(quote.total, surcharge)?;

            if request.use_bonus {
                balances.insert(request.user_id, balance - quote.bonus_deduction);
            }

            let booking = Booking {
                booking_id: self.next_id.fetch_add(1, Ordering::SeqCst),
                user_id: request.user_id,
                room_id: request.room_id,
                check_in_date: request.stay.check_in,
                check_out_date: request.stay.check_out,
                status: BookingStatus::Confirmed,
                total_cost,
            };
            bookings.insert(booking.booking_id, booking.clone());

            Ok(booking)
        }

        async fn cancel(&self, booking_id: BookingId, user_id: UserId) -> Result<(), ServiceError> {
            self.check_health().await?;

            let mut bookings = self.bookings.lock().await;
            match bookings.get_mut(&booking_id) {
                Some(b) if b.user_id != user_id => Err(ServiceError::RequestRejected(
                    "Booking belongs to another user".to_string(),
                )),
                Some(b) if b.status != BookingStatus::Confirmed => Err(
                    ServiceError::RequestRejected("Booking cannot be cancelled".to_string()),
                ),
                Some(b) => {
                    b.status = BookingStatus::Cancelled;
                    Ok(())
                }
                None => Err(ServiceError::RequestRejected(format!(
                    "Booking {booking_id} not found"
                ))),
            }
        }

        async fn extend(
            &self,
            booking_id: BookingId,
            user_id: UserId,
            new_check_out: NaiveDate,
        ) -> Result<Booking, ServiceError> {
            self.check_health().await?;

            let surcharge = *self.surcharge.lock().await;
            let mut bookings = self.bookings.lock().await;

            let current = bookings
                .get(&booking_id)
                .filter(|b| b.user_id == user_id)
                .cloned()
                .ok_or_else(|| {
                    ServiceError::RequestRejected(format!("Booking {booking_id} not found"))
                })?;

            let extra = StayInterval::new(current.check_out_date, new_check_out);
            let clash = bookings.values().any(|b| {
                b.booking_id != booking_id
                    && b.room_id == current.room_id
                    && b.status == BookingStatus::Confirmed
                    && Self::overlaps(&b.stay(), &extra)
            });
            if clash {
                return Err(ServiceError::RequestRejected(
                    "Room is busy for the requested dates".to_string(),
                ));
            }

            let rate = self.rate(current.room_id)?;
            let ext = pricing::quote_extension(current.check_out_date, new_check_out, rate)
                .map_err(|e| ServiceError::RequestRejected(e.to_string()))?;

            let total_cost = Self::add(current.total_cost, ext.additional_cost)?;
            let updated = Booking {
                check_out_date: new_check_out,
                total_cost: Self::add(total_cost, surcharge)?,
                ..current
            };
            bookings.insert(booking_id, updated.clone());

            Ok(updated)
        }

        async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Booking>, ServiceError> {
            self.check_health().await?;

            let mut list: Vec<Booking> = self
                .bookings
                .lock()
                .await
                .values()
                .filter(|b| b.user_id == user_id)
                .cloned()
                .collect();
            list.sort_by_key(|b| b.booking_id);
            Ok(list)
        }
    }
}
