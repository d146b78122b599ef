use crate::model::{non_blank, StoreAddress};

const COUNTRY: &str = "Brasil";

/// Builds the geocoder query for a store. The returned string doubles as the
/// geocode cache key, so any change to these rules orphans existing entries.
///
/// Returns `None` when the record carries nothing the geocoder could place
/// (no street, neighborhood, city or postal code). A state on its own is not
/// geocoded.
pub fn normalize_address(address: &StoreAddress) -> Option<String> {
    let street = non_blank(&address.street);
    let neighborhood = non_blank(&address.neighborhood);
    let city = non_blank(&address.city);
    let postal_code = address.postal_code.as_deref().and_then(postal_digits);

    if street.is_none() && neighborhood.is_none() && city.is_none() && postal_code.is_none() {
        return None;
    }

    let mut segments: Vec<String> = [street, neighborhood, city]
        .into_iter()
        .flatten()
        .map(collapse_whitespace)
        .collect();

    match non_blank(&address.state) {
        Some(state) => segments.push(format!("{}, {COUNTRY}", collapse_whitespace(state))),
        None => segments.push(COUNTRY.to_string()),
    }

    if let Some(digits) = postal_code {
        segments.push(digits);
    }

    Some(segments.join(", "))
}

/// Keeps only the digits of a postal code. Short codes are passed through.
pub fn postal_digits(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
