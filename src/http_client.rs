// REST adapter for the catalog and booking services.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::filter::FilterCriteria;
use crate::models::{
    Amenity, Booking, BookingId, Category, RoomId, RoomListing, Service, ServiceId, UserId,
};
use crate::services::{BookingService, CatalogService, CreateBooking, ServiceError};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Initialization error: {0}")]
    InitError(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            timeout_ms: 10000,
        }
    }
}

// List endpoints wrap their payload in a single named field
#[derive(Deserialize)]
struct RoomsEnvelope {
    rooms: Vec<RoomListing>,
}

#[derive(Deserialize)]
struct CategoriesEnvelope {
    categories: Vec<Category>,
}

#[derive(Deserialize)]
struct AmenitiesEnvelope {
    amenities: Vec<Amenity>,
}

#[derive(Deserialize)]
struct ServicesEnvelope {
    services: Vec<Service>,
}

#[derive(Deserialize)]
struct BookingsEnvelope {
    bookings: Vec<Booking>,
}

#[derive(Debug, Serialize)]
struct CreateBookingBody<'a> {
    user_id: UserId,
    room_id: RoomId,
    check_in: NaiveDate,
    check_out: NaiveDate,
    use_bonuses: bool,
    services: &'a [ServiceId],
}

impl<'a> From<&'a CreateBooking> for CreateBookingBody<'a> {
    fn from(request: &'a CreateBooking) -> Self {
        Self {
            user_id: request.user_id,
            room_id: request.room_id,
            check_in: request.stay.check_in,
            check_out: request.stay.check_out,
            use_bonuses: request.use_bonus,
            services: &request.services,
        }
    }
}

#[derive(Debug, Serialize)]
struct CancelBody {
    user_id: UserId,
}

#[derive(Debug, Serialize)]
struct ExtendBody {
    user_id: UserId,
    new_check_out: NaiveDate,
}

// Server faults and transport trouble are worth retrying later; anything
// else is the server refusing this particular request
fn classify(status: StatusCode, body: String) -> ServiceError {
    if status.is_server_error() {
        ServiceError::ServiceUnavailable(format!("{status}: {body}"))
    } else {
        ServiceError::RequestRejected(body)
    }
}

fn transport_error(e: reqwest::Error) -> ServiceError {
    ServiceError::ServiceUnavailable(e.to_string())
}

/// One client for both remote services. They share a base URL and
/// connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn rooms_request(&self, criteria: &FilterCriteria) -> RequestBuilder {
        self.client
            .get(self.url("/rooms"))
            .query(&criteria.query_params())
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, ServiceError> {
        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        debug!(status = %status, url = %response.url(), "response received");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, body = %body, "request failed");
        Err(classify(status, body))
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ServiceError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ServiceError::ServiceUnavailable(format!("invalid response body: {e}")))
    }
}

#[async_trait]
impl CatalogService for HttpClient {
    async fn list_rooms(&self, criteria: &FilterCriteria) -> Result<Vec<RoomListing>, ServiceError> {
        let envelope: RoomsEnvelope = self.fetch(self.rooms_request(criteria)).await?;
        Ok(envelope.rooms)
    }

    async fn list_categories(&self) -> Result<Vec<Category>, ServiceError> {
        let envelope: CategoriesEnvelope =
            self.fetch(self.client.get(self.url("/categories"))).await?;
        Ok(envelope.categories)
    }

    async fn list_amenities(&self) -> Result<Vec<Amenity>, ServiceError> {
        let envelope: AmenitiesEnvelope =
            self.fetch(self.client.get(self.url("/amenities"))).await?;
        Ok(envelope.amenities)
    }

    async fn list_services(&self) -> Result<Vec<Service>, ServiceError> {
        let envelope: ServicesEnvelope =
            self.fetch(self.client.get(self.url("/services"))).await?;
        Ok(envelope.services)
    }
}

#[async_trait]
impl BookingService for HttpClient {
    async fn create(&self, request: CreateBooking) -> Result<Booking, ServiceError> {
        let body = CreateBookingBody::from(&request);
        self.fetch(self.client.post(self.url("/bookings")).json(&body))
            .await
    }

    async fn cancel(&self, booking_id: BookingId, user_id: UserId) -> Result<(), ServiceError> {
        let request = self
            .client
            .put(self.url(&format!("/bookings/{booking_id}/cancel")))
            .json(&CancelBody { user_id });
        self.send(request).await?;
        Ok(())
    }

    async fn extend(
        &self,
        booking_id: BookingId,
        user_id: UserId,
        new_check_out: NaiveDate,
    ) -> Result<Booking, ServiceError> {
        let request = self
            .client
            .put(self.url(&format!("/bookings/{booking_id}/extend")))
            .json(&ExtendBody {
                user_id,
                new_check_out,
            });
        self.send(request).await?;

        // The endpoint answers without a body; read back what was stored
        self.list_for_user(user_id)
            .await?
            .into_iter()
            .find(|b| b.booking_id == booking_id)
            .ok_or_else(|| {
                ServiceError::RequestRejected(format!("Booking {booking_id} not found"))
            })
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Booking>, ServiceError> {
        let envelope: BookingsEnvelope = self
            .fetch(self.client.get(self.url(&format!("/users/{user_id}/bookings"))))
            .await?;
        Ok(envelope.bookings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::PriceBand;
    use crate::models::StayInterval;
    use rust_decimal::Decimal;

    fn client() -> HttpClient {
        HttpClient::new(&ClientConfig::default()).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_rooms_query_string() {
        let criteria = FilterCriteria::default()
            .with_amenities([3, 1])
            .with_min_capacity(Some(2))
            .with_price(PriceBand::new(Some(Decimal::ZERO), Some(Decimal::from(500))));

        let request = client().rooms_request(&criteria).build().unwrap();
        assert_eq!(
            request.url().as_str(),
            "http://localhost:8080/api/rooms?amenity=1&amenity=3&max_price=500&capacity=2"
        );

        let request = client()
            .rooms_request(&FilterCriteria::default())
            .build()
            .unwrap();
        assert_eq!(request.url().path(), "/api/rooms");
        assert_eq!(request.url().query(), None);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = HttpClient::new(&ClientConfig {
            base_url: "http://hotel.test/api/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.url("/rooms"), "http://hotel.test/api/rooms");
    }

    #[test]
    fn test_create_booking_body() {
        let request = CreateBooking {
            user_id: 1,
            room_id: 7,
            stay: StayInterval::new(date("2024-05-01"), date("2024-05-04")),
            use_bonus: true,
            services: vec![2, 1],
        };

        let body = serde_json::to_value(CreateBookingBody::from(&request)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "user_id": 1,
                "room_id": 7,
                "check_in": "2024-05-01",
                "check_out": "2024-05-04",
                "use_bonuses": true,
                "services": [2, 1],
            })
        );

        let body = serde_json::to_value(ExtendBody {
            user_id: 1,
            new_check_out: date("2024-05-06"),
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "user_id": 1, "new_check_out": "2024-05-06" })
        );
    }

    #[test]
    fn test_envelopes_decode() {
        let services: ServicesEnvelope = serde_json::from_str(
            r#"{"services": [{"service_id": 1, "name": "Breakfast", "price": 150},
                             {"id": 2, "name": "Parking", "price": "60.50"}]}"#,
        )
        .unwrap();
        assert_eq!(services.services[1].service_id, 2);
        assert_eq!(services.services[1].price, Decimal::new(6050, 2));

        let categories: CategoriesEnvelope = serde_json::from_str(
            r#"{"categories": [{"id": 1, "name": "Standart", "price": 1000}]}"#,
        )
        .unwrap();
        assert_eq!(categories.categories[0].price, Decimal::from(1000));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, "Room is busy".to_string()),
            ServiceError::RequestRejected("Room is busy".to_string())
        );
        assert_eq!(
            classify(StatusCode::NOT_FOUND, String::new()),
            ServiceError::RequestRejected(String::new())
        );
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, "upstream down".to_string()),
            ServiceError::ServiceUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let client = HttpClient::new(&ClientConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_ms: 1000,
        })
        .unwrap();

        let result = client.list_categories().await;
        assert!(matches!(result, Err(ServiceError::ServiceUnavailable(_))));

        let result = client.cancel(1, 1).await;
        assert!(matches!(result, Err(ServiceError::ServiceUnavailable(_))));
    }
}
