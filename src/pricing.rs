// Price quotation for a prospective stay and for extending an existing one.
// Everything in here is a pure function of its inputs; the booking controller
// and the room details view both call it on every edit.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use thiserror::Error;

use crate::models::{Service, StayInterval};

// Minor-unit precision of the currency
pub const CURRENCY_SCALE: u32 = 2;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuoteError {
    #[error("Invalid date range: check-out {check_out} must be after check-in {check_in}")]
    InvalidDateRange {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },

    #[error("Negative amount for {0}")]
    NegativeAmount(String),

    #[error("Amount out of range while computing {0}")]
    AmountOverflow(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceQuote {
    pub nights: u32,
    pub base_subtotal: Decimal,
    pub services_subtotal: Decimal,
    pub bonus_deduction: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionQuote {
    pub additional_nights: u32,
    pub additional_cost: Decimal,
}

// Half-up to cents, always carrying exactly two decimal places
pub fn round_currency(amount: Decimal) -> Decimal {
    let mut rounded =
        amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(CURRENCY_SCALE);
    rounded
}

/// Nights between two dates, rejecting anything that isn't at least one.
/// Also the validator for moving a check-out date forward.
pub fn night_count(check_in: NaiveDate, check_out: NaiveDate) -> Result<u32, QuoteError> {
    let nights = (check_out - check_in).num_days();
    if nights <= 0 {
        return Err(QuoteError::InvalidDateRange {
            check_in,
            check_out,
        });
    }

    u32::try_from(nights).map_err(|_| QuoteError::InvalidDateRange {
        check_in,
        check_out,
    })
}

fn in_range(amount: Option<Decimal>, what: &'static str) -> Result<Decimal, QuoteError> {
    amount.ok_or(QuoteError::AmountOverflow(what))
}

fn non_negative(amount: Decimal, what: &str) -> Result<Decimal, QuoteError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(QuoteError::NegativeAmount(what.to_string()));
    }
    Ok(amount)
}

/// Quote a stay at `rate` per night with the given add-on services.
///
/// Every entry in `services` is charged, duplicates included. When
/// `use_bonus` is set the deduction is `min(bonus_balance, raw_total)`, so
/// the total bottoms out at zero and any surplus balance is simply unused.
/// A negative balance redeems nothing.
pub fn quote(
    stay: &StayInterval,
    rate: Decimal,
    services: &[Service],
    bonus_balance: Decimal,
    use_bonus: bool,
) -> Result<PriceQuote, QuoteError> {
    let nights = night_count(stay.check_in, stay.check_out)?;
    let rate = non_negative(rate, "nightly rate")?;

    let mut services_subtotal = Decimal::ZERO;
    for service in services {
        let price = non_negative(service.price, &service.name)?;
        services_subtotal = in_range(services_subtotal.checked_add(price), "services subtotal")?;
    }

    let base_subtotal = in_range(rate.checked_mul(Decimal::from(nights)), "base subtotal")?;
    let raw_total = in_range(base_subtotal.checked_add(services_subtotal), "total")?;

    let bonus_deduction = if use_bonus {
        bonus_balance.max(Decimal::ZERO).min(raw_total)
    } else {
        Decimal::ZERO
    };

    let total = (raw_total - bonus_deduction).max(Decimal::ZERO);

    Ok(PriceQuote {
        nights,
        base_subtotal: round_currency(base_subtotal),
        services_subtotal: round_currency(services_subtotal),
        bonus_deduction: round_currency(bonus_deduction),
        total: round_currency(total),
    })
}

/// Cost of moving a check-out from `current_check_out` to `new_check_out`.
/// Only the added nights are priced.
pub fn quote_extension(
    current_check_out: NaiveDate,
    new_check_out: NaiveDate,
    rate: Decimal,
) -> Result<ExtensionQuote, QuoteError> {
    let additional_nights = night_count(current_check_out, new_check_out)?;
    let rate = non_negative(rate, "nightly rate")?;

    let additional_cost = in_range(
        rate.checked_mul(Decimal::from(additional_nights)),
        "extension cost",
    )?;

    Ok(ExtensionQuote {
        additional_nights,
        additional_cost: round_currency(additional_cost),
    })
}
