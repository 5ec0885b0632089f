//! WhatsApp click-to-chat links for the "contact owner" button.

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

/// Builds `https://wa.me/<digits>?text=<encoded>`.
///
/// Everything except ASCII digits is stripped from `phone`, so `+34 600-12-34`
/// and `34600 1234` produce the same link. Returns `None` when no digits remain.
#[must_use]
pub fn whatsapp_link(phone: &str, message: &str) -> Option<String> {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    let encoded = utf8_percent_encode(message, NON_ALPHANUMERIC).to_string();
    Some(format!("https://wa.me/{digits}?text={encoded}"))
}

/// Default text the finder sends the owner.
#[must_use]
pub fn contact_owner_message(pet_name: &str, maps_link: Option<&str>) -> String {
    match maps_link {
        Some(link) => format!("Hi! I found {pet_name}. I'm here: {link}"),
        None => format!("Hi! I found {pet_name}."),
    }
}
