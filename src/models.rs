// Catalog and booking records as the remote services hand them to us.
// Field names follow the REST wire format (snake_case), so the same types
// deserialize straight out of the HTTP adapter.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type RoomId = i64;
pub type CategoryId = i64;
pub type AmenityId = i64;
pub type ServiceId = i64;
pub type BookingId = i64;
pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomListing {
    pub room_id: RoomId,
    pub room_number: String,
    pub category_id: CategoryId,
    pub capacity: u32,
    #[serde(default, rename = "comments")]
    pub description: Option<String>,
    // Display order as returned by the catalog
    #[serde(default)]
    pub amenities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    // Nightly rate
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amenity {
    pub amenity_id: AmenityId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    // Older endpoints send `id`, newer ones `service_id`
    #[serde(alias = "id")]
    pub service_id: ServiceId,
    pub name: String,
    pub price: Decimal,
}

/// A check-in / check-out pair. Nothing here enforces ordering; the quotation
/// engine is the one place that decides whether a stay is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StayInterval {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayInterval {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self {
            check_in,
            check_out,
        }
    }

    // Signed whole-day difference; zero or negative for unusable stays
    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: BookingId,
    pub user_id: UserId,
    pub room_id: RoomId,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub status: BookingStatus,
    pub total_cost: Decimal,
}

impl Booking {
    pub fn stay(&self) -> StayInterval {
        StayInterval::new(self.check_in_date, self.check_out_date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Guest,
    Admin,
}

/// Who is driving the current session. Passed explicitly into the booking
/// controller; the core never reads it from ambient storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub user_id: UserId,
    pub role: UserRole,
    #[serde(default, rename = "bonuses")]
    pub bonus_balance: Decimal,
}

impl UserSession {
    pub fn guest(user_id: UserId, bonus_balance: Decimal) -> Self {
        Self {
            user_id,
            role: UserRole::Guest,
            bonus_balance,
        }
    }

    pub fn can_book(&self) -> bool {
        self.role == UserRole::Guest
    }

    // Only guests holding a positive balance get the redemption option
    pub fn can_redeem_bonus(&self) -> bool {
        self.can_book() && self.bonus_balance > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_nights_counts_calendar_days() {
        let stay = StayInterval::new(date("2024-05-01"), date("2024-05-04"));
        assert_eq!(stay.nights(), 3);

        let reversed = StayInterval::new(date("2024-05-04"), date("2024-05-01"));
        assert_eq!(reversed.nights(), -3);

        // crosses a month and a leap day
        let stay = StayInterval::new(date("2024-02-28"), date("2024-03-01"));
        assert_eq!(stay.nights(), 2);
    }

    #[test]
    fn test_wire_format_deserializes() {
        let room: RoomListing = serde_json::from_str(
            r#"{"room_id": 7, "room_number": "101", "category_id": 2, "capacity": 3,
                "comments": "Sea view", "amenities": ["WiFi", "Balcony"]}"#,
        )
        .unwrap();
        assert_eq!(room.description.as_deref(), Some("Sea view"));
        assert_eq!(room.amenities, vec!["WiFi", "Balcony"]);

        let service: Service =
            serde_json::from_str(r#"{"id": 4, "name": "Breakfast", "price": 150}"#).unwrap();
        assert_eq!(service.service_id, 4);
        assert_eq!(service.price, Decimal::from(150));

        let booking: Booking = serde_json::from_str(
            r#"{"booking_id": 1, "user_id": 9, "room_id": 7, "check_in_date": "2024-05-01",
                "check_out_date": "2024-05-04", "status": "cancelled", "total_cost": "3000.00"}"#,
        )
        .unwrap();
        assert_eq!(booking.status, BookingStatus::Cancelled);
        assert_eq!(booking.stay().nights(), 3);
    }

    #[test]
    fn test_session_permissions() {
        let guest = UserSession::guest(1, Decimal::from(200));
        assert!(guest.can_book());
        assert!(guest.can_redeem_bonus());

        let broke = UserSession::guest(2, Decimal::ZERO);
        assert!(!broke.can_redeem_bonus());

        let admin = UserSession {
            user_id: 3,
            role: UserRole::Admin,
            bonus_balance: Decimal::from(1000),
        };
        assert!(!admin.can_book());
        assert!(!admin.can_redeem_bonus());
    }
}
