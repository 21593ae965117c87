// Booking lifecycle: drafting and submitting a stay, then cancelling or
// extending it. The booking service owns every committed record; methods here
// return the server's post-write state and never patch a booking locally
// before the service has confirmed the change.

use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::{mapref::entry::Entry, DashMap};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CatalogCache, CatalogError};
use crate::models::{
    Booking, BookingId, BookingStatus, CategoryId, RoomListing, ServiceId, StayInterval, UserId,
    UserSession,
};
use crate::pricing::{self, ExtensionQuote, PriceQuote, QuoteError};
use crate::services::{BookingService, CreateBooking, ServiceError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BookingError {
    #[error("Check-in and check-out dates are required")]
    MissingDates,

    #[error(transparent)]
    Quote(#[from] QuoteError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("No nightly rate known for category {0}")]
    UnknownRoomCategory(CategoryId),

    #[error("Cannot {action} a booking that is {phase:?}")]
    InvalidTransition {
        action: &'static str,
        phase: BookingPhase,
    },

    #[error("Another operation is already running for booking {0}")]
    OperationInProgress(BookingId),

    #[error("User {0} is not allowed to book rooms")]
    NotPermitted(UserId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingPhase {
    // Client-side only, nothing sent yet
    Draft,
    Submitting,
    Confirmed,
    Cancelling,
    Cancelled,
    Extending,
    Completed,
}

impl From<BookingStatus> for BookingPhase {
    fn from(status: BookingStatus) -> Self {
        match status {
            BookingStatus::Confirmed => BookingPhase::Confirmed,
            BookingStatus::Completed => BookingPhase::Completed,
            BookingStatus::Cancelled => BookingPhase::Cancelled,
        }
    }
}

// Add-on services picked in the booking view, in the order they were ticked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSelection {
    ids: Vec<ServiceId>,
}

impl ServiceSelection {
    // Returns whether the service is selected afterwards
    pub fn toggle(&mut self, service_id: ServiceId) -> bool {
        if let Some(pos) = self.ids.iter().position(|id| *id == service_id) {
            self.ids.remove(pos);
            false
        } else {
            self.ids.push(service_id);
            true
        }
    }

    pub fn contains(&self, service_id: ServiceId) -> bool {
        self.ids.contains(&service_id)
    }

    pub fn ids(&self) -> &[ServiceId] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub room: RoomListing,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    pub use_bonus: bool,
    pub services: ServiceSelection,
    phase: BookingPhase,
    last_error: Option<BookingError>,
}

impl BookingDraft {
    pub fn new(room: RoomListing) -> Self {
        Self {
            room,
            check_in: None,
            check_out: None,
            use_bonus: false,
            services: ServiceSelection::default(),
            phase: BookingPhase::Draft,
            last_error: None,
        }
    }

    pub fn with_dates(mut self, check_in: NaiveDate, check_out: NaiveDate) -> Self {
        self.check_in = Some(check_in);
        self.check_out = Some(check_out);
        self
    }

    pub fn phase(&self) -> BookingPhase {
        self.phase
    }

    pub fn last_error(&self) -> Option<&BookingError> {
        self.last_error.as_ref()
    }

    pub fn stay(&self) -> Result<StayInterval, BookingError> {
        match (self.check_in, self.check_out) {
            (Some(check_in), Some(check_out)) => Ok(StayInterval::new(check_in, check_out)),
            _ => Err(BookingError::MissingDates),
        }
    }
}

// Marks a booking busy for the duration of one remote call
struct InFlight<'a> {
    operations: &'a DashMap<BookingId, BookingPhase>,
    booking_id: BookingId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.operations.remove(&self.booking_id);
    }
}

pub struct BookingController<B: BookingService> {
    session: UserSession,
    bookings: Arc<B>,
    cache: Arc<CatalogCache>,
    in_flight: DashMap<BookingId, BookingPhase>,
}

impl<B: BookingService> BookingController<B> {
    pub fn new(session: UserSession, bookings: Arc<B>, cache: Arc<CatalogCache>) -> Self {
        Self {
            session,
            bookings,
            cache,
            in_flight: DashMap::new(),
        }
    }

    pub fn session(&self) -> &UserSession {
        &self.session
    }

    // Where a booking currently sits, counting operations still in flight
    pub fn phase(&self, booking: &Booking) -> BookingPhase {
        self.in_flight
            .get(&booking.booking_id)
            .map(|phase| *phase)
            .unwrap_or_else(|| booking.status.into())
    }

    fn rate_for_room(&self, room: &RoomListing) -> Result<Decimal, BookingError> {
        if !self.cache.is_loaded() {
            return Err(CatalogError::NotLoaded.into());
        }
        self.cache
            .rate_for_room(room)
            .ok_or(BookingError::UnknownRoomCategory(room.category_id))
    }

    fn bonus_for(&self, use_bonus: bool) -> (Decimal, bool) {
        if use_bonus && self.session.can_redeem_bonus() {
            (self.session.bonus_balance, true)
        } else {
            (Decimal::ZERO, false)
        }
    }

    /// Advisory total for the draft as it stands. Recomputed from scratch on
    /// every call; the committed total always comes from the server.
    pub fn live_quote(&self, draft: &BookingDraft) -> Result<PriceQuote, BookingError> {
        let stay = draft.stay()?;
        let rate = self.rate_for_room(&draft.room)?;
        let services = self.cache.resolve_services(draft.services.ids())?;
        let (bonus, use_bonus) = self.bonus_for(draft.use_bonus);

        Ok(pricing::quote(&stay, rate, &services, bonus, use_bonus)?)
    }

    pub async fn submit(&self, draft: &mut BookingDraft) -> Result<Booking, BookingError> {
        if draft.phase != BookingPhase::Draft {
            return Err(BookingError::InvalidTransition {
                action: "submit",
                phase: draft.phase,
            });
        }

        let result = self.submit_draft(draft).await;
        match &result {
            Ok(booking) => {
                draft.phase = BookingPhase::Confirmed;
                draft.last_error = None;
                info!(
                    booking_id = booking.booking_id,
                    room_id = booking.room_id,
                    total = %booking.total_cost,
                    "booking confirmed"
                );
            }
            Err(e) => {
                draft.phase = BookingPhase::Draft;
                draft.last_error = Some(e.clone());
                warn!(room_id = draft.room.room_id, error = %e, "booking submission failed");
            }
        }

        result
    }

    async fn submit_draft(&self, draft: &mut BookingDraft) -> Result<Booking, BookingError> {
        if !self.session.can_book() {
            return Err(BookingError::NotPermitted(self.session.user_id));
        }

        // Anything the engine refuses never reaches the service
        let quote = self.live_quote(draft)?;
        let stay = draft.stay()?;
        let (_, use_bonus) = self.bonus_for(draft.use_bonus);

        draft.phase = BookingPhase::Submitting;
        debug!(
            room_id = draft.room.room_id,
            nights = quote.nights,
            quoted_total = %quote.total,
            "submitting booking"
        );

        let booking = self
            .bookings
            .create(CreateBooking {
                user_id: self.session.user_id,
                room_id: draft.room.room_id,
                stay,
                use_bonus,
                services: draft.services.ids().to_vec(),
            })
            .await?;

        Ok(booking)
    }

    fn begin(
        &self,
        booking_id: BookingId,
        phase: BookingPhase,
    ) -> Result<InFlight<'_>, BookingError> {
        match self.in_flight.entry(booking_id) {
            Entry::Occupied(_) => Err(BookingError::OperationInProgress(booking_id)),
            Entry::Vacant(slot) => {
                slot.insert(phase);
                Ok(InFlight {
                    operations: &self.in_flight,
                    booking_id,
                })
            }
        }
    }

    /// Cancel a confirmed booking. Cancelling one that is already cancelled
    /// succeeds without contacting the service.
    pub async fn cancel(&self, booking: &Booking) -> Result<Booking, BookingError> {
        match booking.status {
            BookingStatus::Cancelled => {
                debug!(booking_id = booking.booking_id, "booking already cancelled");
                return Ok(booking.clone());
            }
            BookingStatus::Completed => {
                return Err(BookingError::InvalidTransition {
                    action: "cancel",
                    phase: BookingPhase::Completed,
                });
            }
            BookingStatus::Confirmed => {}
        }

        let _guard = self.begin(booking.booking_id, BookingPhase::Cancelling)?;

        self.bookings
            .cancel(booking.booking_id, self.session.user_id)
            .await?;

        info!(booking_id = booking.booking_id, "booking cancelled");
        Ok(Booking {
            status: BookingStatus::Cancelled,
            ..booking.clone()
        })
    }

    // Advisory price of the extra nights, at the rate of `category_id`
    pub fn extension_quote(
        &self,
        booking: &Booking,
        category_id: CategoryId,
        new_check_out: NaiveDate,
    ) -> Result<ExtensionQuote, BookingError> {
        let rate = self
            .cache
            .rate_for(category_id)
            .ok_or(BookingError::UnknownRoomCategory(category_id))?;

        Ok(pricing::quote_extension(
            booking.check_out_date,
            new_check_out,
            rate,
        )?)
    }

    /// Move the check-out of a confirmed booking later. The returned booking
    /// carries the server's new check-out and total.
    pub async fn extend(
        &self,
        booking: &Booking,
        new_check_out: NaiveDate,
    ) -> Result<Booking, BookingError> {
        if booking.status != BookingStatus::Confirmed {
            return Err(BookingError::InvalidTransition {
                action: "extend",
                phase: booking.status.into(),
            });
        }

        let added = pricing::night_count(booking.check_out_date, new_check_out)?;

        let _guard = self.begin(booking.booking_id, BookingPhase::Extending)?;

        let updated = self
            .bookings
            .extend(booking.booking_id, self.session.user_id, new_check_out)
            .await?;

        info!(
            booking_id = booking.booking_id,
            added_nights = added,
            total = %updated.total_cost,
            "booking extended"
        );
        Ok(updated)
    }

    pub async fn list_bookings(&self) -> Result<Vec<Booking>, BookingError> {
        Ok(self.bookings.list_for_user(self.session.user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CatalogConfig;
    use crate::models::{Amenity, Category, Service, UserRole};
    use crate::services::mock_service::{MockBookingService, MockCatalog, ServerMode};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio_test::assert_err;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn room() -> RoomListing {
        RoomListing {
            room_id: 7,
            room_number: "107".to_string(),
            category_id: 2,
            capacity: 2,
            description: None,
            amenities: vec![],
        }
    }

    async fn loaded_cache() -> Arc<CatalogCache> {
        let catalog = MockCatalog::new(
            vec![room()],
            vec![Category {
                id: 2,
                name: "Standart".to_string(),
                price: Decimal::from(1000),
            }],
            vec![Amenity {
                amenity_id: 1,
                name: "WiFi".to_string(),
            }],
            vec![Service {
                service_id: 1,
                name: "Breakfast".to_string(),
                price: Decimal::from(150),
            }],
        );
        let cache = Arc::new(CatalogCache::new(CatalogConfig::default()));
        cache.load_reference(&catalog).await.unwrap();
        cache.load_services(&catalog).await.unwrap();
        cache
    }

    fn booking_service() -> Arc<MockBookingService> {
        Arc::new(MockBookingService::new(
            HashMap::from([(7, Decimal::from(1000))]),
            HashMap::from([(1, Decimal::from(150))]),
        ))
    }

    async fn controller(
        session: UserSession,
    ) -> (BookingController<MockBookingService>, Arc<MockBookingService>) {
        let service = booking_service();
        service
            .set_bonus_balance(session.user_id, session.bonus_balance)
            .await;
        let controller = BookingController::new(session, service.clone(), loaded_cache().await);
        (controller, service)
    }

    fn confirmed(booking_id: BookingId) -> Booking {
        Booking {
            booking_id,
            user_id: 1,
            room_id: 7,
            check_in_date: date("2024-05-01"),
            check_out_date: date("2024-05-04"),
            status: BookingStatus::Confirmed,
            total_cost: Decimal::from(3000),
        }
    }

    #[tokio::test]
    async fn test_live_quote_follows_draft_edits() {
        let (controller, _) = controller(UserSession::guest(1, Decimal::from(500))).await;
        let mut draft = BookingDraft::new(room());

        assert_eq!(
            controller.live_quote(&draft),
            Err(BookingError::MissingDates)
        );

        draft = draft.with_dates(date("2024-05-01"), date("2024-05-04"));
        assert_eq!(
            controller.live_quote(&draft).unwrap().total,
            Decimal::from(3000)
        );

        draft.services.toggle(1);
        assert_eq!(
            controller.live_quote(&draft).unwrap().total,
            Decimal::from(3150)
        );

        draft.use_bonus = true;
        assert_eq!(
            controller.live_quote(&draft).unwrap().total,
            Decimal::from(2650)
        );

        // unknown service ids are skipped, not fatal
        draft.services.toggle(99);
        assert_eq!(
            controller.live_quote(&draft).unwrap().total,
            Decimal::from(2650)
        );

        draft.check_out = Some(date("2024-04-30"));
        assert!(matches!(
            controller.live_quote(&draft),
            Err(BookingError::Quote(QuoteError::InvalidDateRange { .. }))
        ));
    }

    #[tokio::test]
    async fn test_bonus_needs_positive_balance() {
        let (controller, _) = controller(UserSession::guest(1, Decimal::ZERO)).await;
        let mut draft =
            BookingDraft::new(room()).with_dates(date("2024-05-01"), date("2024-05-02"));
        draft.use_bonus = true;

        let quote = controller.live_quote(&draft).unwrap();
        assert_eq!(quote.bonus_deduction, Decimal::ZERO);
        assert_eq!(quote.total, Decimal::from(1000));
    }

    #[tokio::test]
    async fn test_submit_confirms_draft() {
        let (controller, service) = controller(UserSession::guest(1, Decimal::from(500))).await;
        let mut draft =
            BookingDraft::new(room()).with_dates(date("2024-05-01"), date("2024-05-04"));
        draft.services.toggle(1);
        draft.use_bonus = true;

        let booking = controller.submit(&mut draft).await.unwrap();
        assert_eq!(draft.phase(), BookingPhase::Confirmed);
        assert!(draft.last_error().is_none());
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.total_cost, Decimal::from(2650));
        assert_eq!(controller.phase(&booking), BookingPhase::Confirmed);
        assert_eq!(service.request_count(), 1);

        // a confirmed draft can't go out twice
        assert!(matches!(
            controller.submit(&mut draft).await,
            Err(BookingError::InvalidTransition {
                action: "submit",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_invalid_drafts_never_reach_the_service() {
        let (controller, service) = controller(UserSession::guest(1, Decimal::ZERO)).await;

        let mut no_dates = BookingDraft::new(room());
        assert_eq!(
            controller.submit(&mut no_dates).await,
            Err(BookingError::MissingDates)
        );
        assert_eq!(no_dates.phase(), BookingPhase::Draft);
        assert_eq!(no_dates.last_error(), Some(&BookingError::MissingDates));

        let mut reversed =
            BookingDraft::new(room()).with_dates(date("2024-05-04"), date("2024-05-01"));
        assert!(matches!(
            controller.submit(&mut reversed).await,
            Err(BookingError::Quote(QuoteError::InvalidDateRange { .. }))
        ));

        let mut unknown_category = BookingDraft::new(RoomListing {
            category_id: 42,
            ..room()
        })
        .with_dates(date("2024-05-01"), date("2024-05-02"));
        assert_eq!(
            controller.submit(&mut unknown_category).await,
            Err(BookingError::UnknownRoomCategory(42))
        );

        assert_eq!(service.request_count(), 0);
    }

    #[tokio::test]
    async fn test_admin_cannot_submit() {
        let admin = UserSession {
            user_id: 5,
            role: UserRole::Admin,
            bonus_balance: Decimal::ZERO,
        };
        let (controller, service) = controller(admin).await;
        let mut draft =
            BookingDraft::new(room()).with_dates(date("2024-05-01"), date("2024-05-02"));

        assert_eq!(
            controller.submit(&mut draft).await,
            Err(BookingError::NotPermitted(5))
        );
        assert_eq!(service.request_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_submit_returns_to_draft() {
        let (controller, service) = controller(UserSession::guest(1, Decimal::ZERO)).await;
        let mut draft =
            BookingDraft::new(room()).with_dates(date("2024-05-01"), date("2024-05-02"));

        service.set_mode(ServerMode::CompleteOutage);
        let err = controller.submit(&mut draft).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Service(ServiceError::ServiceUnavailable(_))
        ));
        assert_eq!(draft.phase(), BookingPhase::Draft);
        assert_eq!(draft.last_error(), Some(&err));
        // no retry behind the caller's back
        assert_eq!(service.request_count(), 1);

        service.set_mode(ServerMode::Normal);
        controller.submit(&mut draft).await.unwrap();
        assert_eq!(draft.phase(), BookingPhase::Confirmed);
    }

    #[tokio::test]
    async fn test_rejection_is_surfaced_verbatim() {
        let (controller, service) = controller(UserSession::guest(1, Decimal::ZERO)).await;
        service.insert_booking(confirmed(1)).await;

        let mut draft =
            BookingDraft::new(room()).with_dates(date("2024-05-02"), date("2024-05-03"));
        assert_eq!(
            controller.submit(&mut draft).await,
            Err(BookingError::Service(ServiceError::RequestRejected(
                "Room is already booked for these dates".to_string()
            )))
        );
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (controller, service) = controller(UserSession::guest(1, Decimal::ZERO)).await;
        let booking = confirmed(1);
        service.insert_booking(booking.clone()).await;

        let cancelled = controller.cancel(&booking).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(controller.phase(&cancelled), BookingPhase::Cancelled);
        assert_eq!(service.request_count(), 1);

        let again = controller.cancel(&cancelled).await.unwrap();
        assert_eq!(again, cancelled);
        assert_eq!(service.request_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_failure_leaves_booking_confirmed() {
        let (controller, service) = controller(UserSession::guest(1, Decimal::ZERO)).await;
        let booking = confirmed(1);
        service.insert_booking(booking.clone()).await;

        service.fail_next_requests(1);
        assert_err!(controller.cancel(&booking).await);
        assert_eq!(controller.phase(&booking), BookingPhase::Confirmed);
        assert_eq!(
            service.booking(1).await.unwrap().status,
            BookingStatus::Confirmed
        );

        let completed = Booking {
            status: BookingStatus::Completed,
            ..booking
        };
        assert_eq!(
            controller.cancel(&completed).await,
            Err(BookingError::InvalidTransition {
                action: "cancel",
                phase: BookingPhase::Completed
            })
        );
    }

    #[tokio::test]
    async fn test_extend_uses_server_total() {
        let (controller, service) = controller(UserSession::guest(1, Decimal::ZERO)).await;
        let booking = confirmed(1);
        service.insert_booking(booking.clone()).await;
        service.set_surcharge(Decimal::new(1250, 2)).await;

        let advisory = controller
            .extension_quote(&booking, 2, date("2024-05-06"))
            .unwrap();
        assert_eq!(advisory.additional_nights, 2);
        assert_eq!(advisory.additional_cost, Decimal::from(2000));

        let extended = controller
            .extend(&booking, date("2024-05-06"))
            .await
            .unwrap();
        assert_eq!(extended.check_out_date, date("2024-05-06"));
        // 3000 + 2000 + 12.50 surcharge the client could not have known
        assert_eq!(extended.total_cost, Decimal::new(501250, 2));
    }

    #[tokio::test]
    async fn test_extend_validates_before_calling() {
        let (controller, service) = controller(UserSession::guest(1, Decimal::ZERO)).await;
        let booking = confirmed(1);
        service.insert_booking(booking.clone()).await;

        for new_check_out in [date("2024-05-04"), date("2024-05-02")] {
            assert!(matches!(
                controller.extend(&booking, new_check_out).await,
                Err(BookingError::Quote(QuoteError::InvalidDateRange { .. }))
            ));
        }

        let cancelled = Booking {
            status: BookingStatus::Cancelled,
            ..booking
        };
        assert_eq!(
            controller.extend(&cancelled, date("2024-05-10")).await,
            Err(BookingError::InvalidTransition {
                action: "extend",
                phase: BookingPhase::Cancelled
            })
        );

        assert_eq!(service.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_operation_per_booking_at_a_time() {
        let (controller, service) = controller(UserSession::guest(1, Decimal::ZERO)).await;
        let controller = Arc::new(controller);
        let booking = confirmed(1);
        service.insert_booking(booking.clone()).await;
        service.set_delay(100);

        let c = controller.clone();
        let b = booking.clone();
        let extending = tokio::spawn(async move { c.extend(&b, date("2024-05-05")).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(controller.phase(&booking), BookingPhase::Extending);
        assert_eq!(
            controller.cancel(&booking).await,
            Err(BookingError::OperationInProgress(1))
        );

        let extended = extending.await.unwrap().unwrap();
        assert_eq!(extended.check_out_date, date("2024-05-05"));
        assert_eq!(controller.phase(&extended), BookingPhase::Confirmed);
    }

    #[tokio::test]
    async fn test_list_bookings_for_session_user() {
        let (controller, service) = controller(UserSession::guest(1, Decimal::ZERO)).await;
        service.insert_booking(confirmed(1)).await;
        service
            .insert_booking(Booking {
                user_id: 2,
                ..confirmed(2)
            })
            .await;

        let listed = controller.list_bookings().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].booking_id, 1);
    }
}
