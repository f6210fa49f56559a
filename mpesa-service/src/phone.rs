use crate::error::MpesaError;

const COUNTRY_CODE: &str = "254";
const MSISDN_LEN: usize = 12;

/// Normalize a Kenyan mobile number to the `2547XXXXXXXX` form the gateway expects.
///
/// Accepted inputs are the local `07…`/`01…` form, `+254…` and bare `254…`.
pub fn normalize_phone(raw: &str) -> Result<String, MpesaError> {
    let trimmed = raw.trim();
    let normalized = if let Some(rest) = trimmed.strip_prefix('0') {
        format!("{COUNTRY_CODE}{rest}")
    } else if let Some(rest) = trimmed.strip_prefix('+') {
        if !rest.starts_with(COUNTRY_CODE) {
            return Err(MpesaError::InvalidPhone(raw.to_string()));
        }
        rest.to_string()
    } else if trimmed.starts_with(COUNTRY_CODE) {
        trimmed.to_string()
    } else {
        return Err(MpesaError::InvalidPhone(raw.to_string()));
    };

    if normalized.len() != MSISDN_LEN || !normalized.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MpesaError::InvalidPhone(raw.to_string()));
    }
    Ok(normalized)
}
