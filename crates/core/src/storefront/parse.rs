//! Text extraction from storefront pages.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::order::OrderSnapshot;

static ORDER_ID: Lazy<Regex> = Lazy::new(|| compile(r"PO-[\w-]+"));
static ITEM_COUNT: Lazy<Regex> = Lazy::new(|| compile(r"(\d+)\s+items?"));
static PRICE: Lazy<Regex> = Lazy::new(|| compile(r"\d[\d.,]*"));

/// Date shapes seen on order cards, tried in order.
static DATE_PATTERNS: Lazy<Vec<(Regex, DateShape)>> = Lazy::new(|| {
    vec![
        (compile(r"([A-Z][a-z]{2}) (\d{1,2}),? (\d{4})"), DateShape::MonthDayYear),
        (compile(r"(\d{1,2}) ([A-Z][a-z]{2}),? (\d{4})"), DateShape::DayMonthYear),
        (compile(r"(\d{1,2})[/-](\d{1,2})[/-](\d{4})"), DateShape::Numeric),
        (compile(r"([A-Z][a-z]{2}) (\d{1,2})\b"), DateShape::MonthDay),
    ]
});

/// Phrases meaning the storefront refuses the adjustment for this order.
const NOT_AVAILABLE: &[&str] = &[
    "sorry, you cannot request",
    "sorry you cannot request",
    "not eligible for price adjustment",
    "exact same specifications",
    "same seller",
    "desculpe, você não pode solicitar",
    "desculpe você não pode solicitar",
    "não é elegível para ajuste",
    "mesmas especificações",
    "mesmo vendedor",
    "items that are sold out",
    "discontinued",
    "out of stock",
    "no longer available",
    "refunded",
    "refund/return",
];

/// Phrases meaning the dialog is the adjustment request form.
const REQUEST_FORM: &[&str] = &[
    "request a price adjustment",
    "select refund method",
    "price adjustment",
    "refund amount",
    "reembolso",
    "ajuste de preço",
    "solicitar ajuste",
    "selecionar método",
];

/// Phrases confirming a submitted request.
const CONFIRMATION: &[&str] = &[
    "your refund is being processed",
    "reembolso está sendo processado",
    "request has been submitted",
    "solicitação foi enviada",
    "successfully requested",
    "solicitado com sucesso",
];

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in pattern is valid")
}

#[derive(Debug, Clone, Copy)]
enum DateShape {
    MonthDayYear,
    DayMonthYear,
    Numeric,
    MonthDay,
}

/// How the adjustment dialog reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogKind {
    /// The request form; the flow can continue.
    RequestForm,
    /// The storefront refuses; carries the matched phrase.
    NotAvailable(String),
    Unknown,
}

/// Why an order card could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardSkip {
    #[error("order card without an order number")]
    NoOrderId,

    #[error("order {0} has no readable date")]
    NoDate(String),

    #[error("order {0} has no readable total")]
    NoTotal(String),
}

/// Build a snapshot from an order card's text and its price cells.
///
/// Cards only show a day, so the purchase instant is midnight UTC of it.
pub fn card_snapshot(
    text: &str,
    today: NaiveDate,
    paid_price: Option<Decimal>,
    current_price: Option<Decimal>,
) -> Result<OrderSnapshot, CardSkip> {
    let id = parse_order_id(text).ok_or(CardSkip::NoOrderId)?;
    let purchase_date = parse_order_date(text, today)
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| CardSkip::NoDate(id.clone()))?;
    let paid_price = paid_price.ok_or_else(|| CardSkip::NoTotal(id.clone()))?;

    Ok(OrderSnapshot {
        item_count: parse_item_count(text),
        id,
        purchase_date,
        paid_price,
        current_price,
        tracking_ref: None,
    })
}

/// Extract the order number (`PO-...`) from card text.
pub fn parse_order_id(text: &str) -> Option<String> {
    ORDER_ID.find(text).map(|m| m.as_str().to_string())
}

/// Extract the "N items" count from card text.
pub fn parse_item_count(text: &str) -> Option<u32> {
    ITEM_COUNT
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Parse an order date in any of the storefront's formats.
///
/// A date without a year is placed in the most recent year that does not
/// put it after `today`. Numeric dates are read day-first, falling back to
/// month-first when that is the only valid reading.
pub fn parse_order_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = match text.split_once("Order time:") {
        Some((_, rest)) => rest,
        None => text,
    };

    for (re, shape) in DATE_PATTERNS.iter() {
        let Some(caps) = re.captures(text) else {
            continue;
        };
        let part = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or_default();

        let parsed = match shape {
            DateShape::MonthDayYear => month_number(part(1)).and_then(|m| {
                NaiveDate::from_ymd_opt(part(3).parse().ok()?, m, part(2).parse().ok()?)
            }),
            DateShape::DayMonthYear => month_number(part(2)).and_then(|m| {
                NaiveDate::from_ymd_opt(part(3).parse().ok()?, m, part(1).parse().ok()?)
            }),
            DateShape::Numeric => {
                let (a, b, year) = (
                    part(1).parse().ok(),
                    part(2).parse().ok(),
                    part(3).parse().ok(),
                );
                match (a, b, year) {
                    (Some(a), Some(b), Some(year)) => NaiveDate::from_ymd_opt(year, b, a)
                        .or_else(|| NaiveDate::from_ymd_opt(year, a, b)),
                    _ => None,
                }
            }
            DateShape::MonthDay => month_number(part(1)).and_then(|m| {
                let day = part(2).parse().ok()?;
                NaiveDate::from_ymd_opt(today.year(), m, day)
                    .filter(|d| *d <= today)
                    .or_else(|| NaiveDate::from_ymd_opt(today.year() - 1, m, day))
            }),
        };

        if parsed.is_some() {
            return parsed;
        }
    }
    None
}

fn month_number(abbrev: &str) -> Option<u32> {
    let month = match abbrev.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" | "fev" => 2,
        "mar" => 3,
        "apr" | "abr" => 4,
        "may" | "mai" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" | "ago" => 8,
        "sep" | "set" => 9,
        "oct" | "out" => 10,
        "nov" => 11,
        "dec" | "dez" => 12,
        _ => return None,
    };
    Some(month)
}

/// Parse a displayed price such as `$12.34`, `US$1,234.50` or `R$ 1.234,56`.
///
/// The last separator followed by one or two digits is the decimal point;
/// every other separator groups thousands.
pub fn parse_price(text: &str) -> Option<Decimal> {
    let raw = PRICE.find(text)?.as_str().trim_end_matches(['.', ',']);

    let decimal_at = raw
        .rfind(['.', ','])
        .filter(|&i| (1..=2).contains(&(raw.len() - i - 1)));

    let normalized: String = raw
        .char_indices()
        .filter_map(|(i, c)| match c {
            '.' | ',' if Some(i) == decimal_at => Some('.'),
            '.' | ',' => None,
            _ => Some(c),
        })
        .collect();

    normalized.parse().ok()
}

/// Normalize a tracking number line: drop the label and all whitespace.
pub fn parse_tracking(text: &str) -> Option<String> {
    let value = match text.split_once(':') {
        Some((_, rest)) => rest,
        None => text,
    };
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    (!compact.is_empty()).then_some(compact)
}

/// Classify the text of the dialog shown after pressing "Price adjustment".
///
/// Refusal phrases win over form phrases since refusal dialogs also mention
/// price adjustments.
pub fn classify_dialog(text: &str) -> DialogKind {
    let text = text.to_lowercase();
    if let Some(phrase) = NOT_AVAILABLE.iter().find(|p| text.contains(*p)) {
        return DialogKind::NotAvailable((*phrase).to_string());
    }
    if REQUEST_FORM.iter().any(|p| text.contains(p)) {
        return DialogKind::RequestForm;
    }
    DialogKind::Unknown
}

/// Whether page text confirms a submitted request.
pub fn is_confirmation(text: &str) -> bool {
    let text = text.to_lowercase();
    CONFIRMATION.iter().any(|p| text.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    #[test]
    fn test_parse_order_id() {
        assert_eq!(
            parse_order_id("Order ID: PO-211-0123456789 Copy").as_deref(),
            Some("PO-211-0123456789")
        );
        assert_eq!(parse_order_id("no order here"), None);
    }

    #[test]
    fn test_parse_item_count() {
        assert_eq!(parse_item_count("3 items: $12.00"), Some(3));
        assert_eq!(parse_item_count("1 item"), Some(1));
        assert_eq!(parse_item_count("items"), None);
    }

    #[test]
    fn test_parse_order_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 2, 5).unwrap();
        assert_eq!(parse_order_date("Feb 5, 2024", today()), Some(expected));
        assert_eq!(parse_order_date("Feb 5 2024", today()), Some(expected));
        assert_eq!(parse_order_date("5 Feb 2024", today()), Some(expected));
        assert_eq!(parse_order_date("05/02/2024", today()), Some(expected));
        assert_eq!(parse_order_date("Order time: Feb 5, 2024", today()), Some(expected));
    }

    #[test]
    fn test_parse_numeric_date_falls_back_to_month_first() {
        assert_eq!(
            parse_order_date("02/25/2024", today()),
            NaiveDate::from_ymd_opt(2024, 2, 25)
        );
    }

    #[test]
    fn test_parse_date_without_year() {
        assert_eq!(
            parse_order_date("Mar 1", today()),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(
            parse_order_date("Dec 20", today()),
            NaiveDate::from_ymd_opt(2023, 12, 20)
        );
    }

    #[test]
    fn test_parse_order_date_garbage() {
        assert_eq!(parse_order_date("N/A", today()), None);
        assert_eq!(parse_order_date("Foo 5, 2024", today()), None);
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("$12.34"), Some(dec!(12.34)));
        assert_eq!(parse_price("US$1,234.50"), Some(dec!(1234.50)));
        assert_eq!(parse_price("R$ 1.234,56"), Some(dec!(1234.56)));
        assert_eq!(parse_price("R$ 45,9"), Some(dec!(45.9)));
        assert_eq!(parse_price("$1,234"), Some(dec!(1234)));
        assert_eq!(parse_price("Total: $7."), Some(dec!(7)));
        assert_eq!(parse_price("free"), None);
    }

    #[test]
    fn test_parse_tracking() {
        assert_eq!(
            parse_tracking("Tracking Number: 9400 1000 0000").as_deref(),
            Some("940010000000")
        );
        assert_eq!(parse_tracking("Tracking Number:   "), None);
    }

    #[test]
    fn test_classify_dialog() {
        assert_eq!(
            classify_dialog("Request a price adjustment\nSelect refund method"),
            DialogKind::RequestForm
        );
        assert_eq!(
            classify_dialog("Price adjustment\nThis item is out of stock"),
            DialogKind::NotAvailable("out of stock".to_string())
        );
        assert_eq!(
            classify_dialog("Desculpe, você não pode solicitar"),
            DialogKind::NotAvailable("desculpe, você não pode solicitar".to_string())
        );
        assert_eq!(classify_dialog("Something went wrong"), DialogKind::Unknown);
    }

    #[test]
    fn test_is_confirmation() {
        assert!(is_confirmation("Your refund is being processed. $8.00"));
        assert!(!is_confirmation("Please try again later"));
    }

    #[test]
    fn test_card_snapshot_maps_card_fields() {
        let text = "Order time: Feb 25, 2024\nOrder ID: PO-211-0123456789\n2 items";
        let snapshot = card_snapshot(text, today(), Some(dec!(20.00)), Some(dec!(12.00))).unwrap();

        assert_eq!(snapshot.id, "PO-211-0123456789");
        assert_eq!(
            snapshot.purchase_date,
            NaiveDate::from_ymd_opt(2024, 2, 25)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc()
        );
        assert_eq!(snapshot.paid_price, dec!(20.00));
        assert_eq!(snapshot.current_price, Some(dec!(12.00)));
        assert_eq!(snapshot.item_count, Some(2));
        assert_eq!(snapshot.tracking_ref, None);
    }

    #[test]
    fn test_card_snapshot_skips_unreadable_cards() {
        assert_eq!(
            card_snapshot("Feb 25, 2024", today(), Some(dec!(1.00)), None),
            Err(CardSkip::NoOrderId)
        );
        assert_eq!(
            card_snapshot("PO-1 pending", today(), Some(dec!(1.00)), None),
            Err(CardSkip::NoDate("PO-1".to_string()))
        );
        assert_eq!(
            card_snapshot("PO-1 Feb 25, 2024", today(), None, Some(dec!(1.00))),
            Err(CardSkip::NoTotal("PO-1".to_string()))
        );
    }
}
